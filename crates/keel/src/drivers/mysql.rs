//! MySQL (and MariaDB).
//!
//! Introspection reads `information_schema` with the binary protocol and
//! typed rows. DDL commits implicitly in MySQL, so a deploy is never
//! transactional: a failure part-way through leaves the earlier statements
//! applied.

use async_trait::async_trait;
use keel_schema::{DriverKind, MysqlTableSchema, SeedData, SeedRow, SeedValue};
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, Row, Value};
use tracing::Instrument;

use super::common::{self, TextLookup, TextQuery, is_numeric, unquote};
use crate::diff::{Change, DiffPolicy};
use crate::driver::{DeployReport, Driver, Executor, apply_sequential};
use crate::plan::{Dialect, Plan, Statement, normalize_type, plan_structure};
use crate::schema::{Column, ForeignKey, Index, Table};
use crate::seed::{SeedDialect, check_seed_columns, insert_or_ignore_all, plan_seed_rows};
use crate::sql::{BackslashLit, BacktickIdent, foreign_key_name};
use crate::{BoxError, Context, Error, Result};

const KIND: DriverKind = DriverKind::Mysql;

fn quote(name: &str) -> String {
    BacktickIdent(name).to_string()
}

/// Integer types whose display width carries no meaning.
const INTEGER_TYPES: [&str; 5] = ["tinyint", "smallint", "mediumint", "int", "bigint"];

#[derive(Debug, Clone, Default)]
pub struct MysqlDialect {
    default_charset: Option<String>,
    collation: Option<String>,
}

impl MysqlDialect {
    pub fn new(schema: &MysqlTableSchema) -> Self {
        MysqlDialect {
            default_charset: schema.default_charset.clone(),
            collation: schema.collation.clone(),
        }
    }

    fn canonical_type(data_type: &str) -> String {
        let t = normalize_type(data_type)
            .replace("integer", "int")
            .replace("character varying", "varchar")
            .replace("double precision", "double")
            .replace("numeric", "decimal");
        match t.as_str() {
            "bool" | "boolean" => return "tinyint(1)".to_string(),
            "decimal" => return "decimal(10,0)".to_string(),
            _ => {}
        }
        if t.starts_with("tinyint(1)") {
            return t;
        }
        let Some(open) = t.find('(') else {
            return t;
        };
        let base = &t[..open];
        if !INTEGER_TYPES.contains(&base) {
            return t;
        }
        match t[open..].find(')') {
            Some(close) => format!("{base}{}", &t[open + close + 1..]),
            None => t,
        }
    }

    fn canonical_default(column: &mut Column) {
        let Some(value) = column.default.take() else {
            return;
        };
        let value = value.trim();
        let lower = value.to_ascii_lowercase();
        column.default = match lower.as_str() {
            "" | "null" => None,
            "current_timestamp" | "current_timestamp()" | "now()" => {
                Some("CURRENT_TIMESTAMP".to_string())
            }
            "true" if column.data_type == "tinyint(1)" => Some("1".to_string()),
            "false" if column.data_type == "tinyint(1)" => Some("0".to_string()),
            _ => match unquote(value) {
                Some(inner) if is_numeric(&inner) => Some(inner),
                _ => Some(value.to_string()),
            },
        };
    }

    fn column_definition(&self, col: &Column) -> String {
        let mut def = format!("{} {}", quote(&col.name), col.data_type);
        if !col.nullable {
            def.push_str(" NOT NULL");
        }
        if let Some(default) = &col.default {
            def.push_str(" DEFAULT ");
            def.push_str(default);
        }
        if col.auto_increment {
            def.push_str(" AUTO_INCREMENT");
        }
        def
    }

    fn foreign_key_constraint(&self, table: &str, fk: &ForeignKey) -> String {
        let name = fk
            .name
            .clone()
            .unwrap_or_else(|| foreign_key_name(table, &fk.columns));
        format!(
            "CONSTRAINT {} {}",
            quote(&name),
            common::foreign_key_clause(&quote, fk)
        )
    }

    fn table_options(&self) -> String {
        let mut suffix = String::new();
        if let Some(charset) = &self.default_charset {
            suffix.push_str(&format!(" DEFAULT CHARSET={charset}"));
        }
        if let Some(collation) = &self.collation {
            suffix.push_str(&format!(" COLLATE={collation}"));
        }
        suffix
    }
}

impl Dialect for MysqlDialect {
    fn kind(&self) -> DriverKind {
        KIND
    }

    fn quote_ident(&self, name: &str) -> String {
        quote(name)
    }

    fn canonicalize_column(&self, column: &mut Column) {
        column.data_type = Self::canonical_type(&column.data_type);
        Self::canonical_default(column);
    }

    fn canonicalize_table(&self, table: &mut Table) {
        // InnoDB treats RESTRICT and NO ACTION alike.
        for fk in &mut table.foreign_keys {
            if fk.on_delete.as_deref() == Some("RESTRICT") {
                fk.on_delete = None;
            }
        }
    }

    fn create_table(&self, table: &Table) -> Vec<Statement> {
        let mut lines: Vec<String> = table
            .columns
            .iter()
            .map(|c| self.column_definition(c))
            .collect();
        if !table.primary_key.is_empty() {
            lines.push(format!(
                "PRIMARY KEY ({})",
                common::column_list(&quote, &table.primary_key)
            ));
        }
        for fk in &table.foreign_keys {
            lines.push(self.foreign_key_constraint(&table.name, fk));
        }

        let mut statements = vec![common::create_table_block(
            &quote,
            table,
            lines,
            &self.table_options(),
        )];
        statements.extend(
            table
                .indexes
                .iter()
                .map(|idx| common::create_index(&quote, &table.name, idx)),
        );
        statements
    }

    fn render_change(&self, table: &str, change: &Change) -> Result<Vec<Statement>> {
        let t = quote(table);
        let sql = match change {
            Change::AddColumn(col) => {
                format!("ALTER TABLE {t} ADD COLUMN {}", self.column_definition(col))
            }
            Change::DropColumn(name) => format!("ALTER TABLE {t} DROP COLUMN {}", quote(name)),
            Change::AlterColumn { to, .. } => {
                format!("ALTER TABLE {t} MODIFY COLUMN {}", self.column_definition(to))
            }
            Change::AddIndex(idx) => return Ok(vec![common::create_index(&quote, table, idx)]),
            Change::DropIndex(idx) => format!("DROP INDEX {} ON {t}", quote(&idx.name)),
            Change::AddPrimaryKey(columns) => format!(
                "ALTER TABLE {t} ADD PRIMARY KEY ({})",
                common::column_list(&quote, columns)
            ),
            Change::DropPrimaryKey { .. } => format!("ALTER TABLE {t} DROP PRIMARY KEY"),
            Change::AddForeignKey(fk) => {
                format!("ALTER TABLE {t} ADD {}", self.foreign_key_constraint(table, fk))
            }
            Change::DropForeignKey(fk) => {
                let Some(name) = &fk.name else {
                    return Err(Error::invalid(
                        table,
                        format!("cannot drop unnamed foreign key ({})", fk.columns.join(", ")),
                    ));
                };
                format!("ALTER TABLE {t} DROP FOREIGN KEY {}", quote(name))
            }
        };
        Ok(vec![Statement::new(sql)])
    }
}

impl SeedDialect for MysqlDialect {
    fn quote_ident(&self, name: &str) -> String {
        quote(name)
    }

    fn literal(&self, value: &SeedValue) -> String {
        match value {
            SeedValue::Str(s) => BackslashLit(s).to_string(),
            SeedValue::Bool(b) => if *b { "1" } else { "0" }.to_string(),
            other => other.to_string(),
        }
    }

    fn text_projection(&self, column: &str) -> String {
        format!("CAST({} AS CHAR)", quote(column))
    }

    fn insert_or_ignore(&self, table: &str, row: &SeedRow) -> Statement {
        let (columns, values) = self.column_lists(row);
        Statement::new(format!(
            "INSERT IGNORE INTO {} ({}) VALUES ({})",
            quote(table),
            columns,
            values
        ))
    }
}

/// Turn an `information_schema.COLUMNS.COLUMN_DEFAULT` value back into the
/// SQL expression that would produce it.
fn introspected_default(raw: Option<String>, extra: &str) -> Option<String> {
    let raw = raw?;
    if extra.to_ascii_uppercase().contains("DEFAULT_GENERATED")
        || raw.starts_with('\'')
        || is_numeric(&raw)
        || raw.eq_ignore_ascii_case("current_timestamp")
        || raw.eq_ignore_ascii_case("null")
    {
        return Some(raw);
    }
    Some(BackslashLit(raw).to_string())
}

/// One open connection.
struct MysqlConn {
    conn: Conn,
}

impl MysqlConn {
    async fn open(opts: &Opts) -> Result<Self> {
        let conn = Conn::new(opts.clone())
            .await
            .map_err(|e| Error::connection(KIND, e))?;
        Ok(MysqlConn { conn })
    }

    async fn close(self) {
        if let Err(e) = self.conn.disconnect().await {
            tracing::debug!(driver = %KIND, error = %e, "disconnect failed");
        }
    }

    async fn introspect(&mut self, name: &str) -> Result<Option<Table>> {
        let err = |e: mysql_async::Error| Error::introspection(KIND, e);

        let columns: Vec<(String, String, String, Option<String>, String)> = self
            .conn
            .exec(
                "SELECT COLUMN_NAME, COLUMN_TYPE, IS_NULLABLE, COLUMN_DEFAULT, EXTRA \
                 FROM information_schema.COLUMNS \
                 WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? \
                 ORDER BY ORDINAL_POSITION",
                (name,),
            )
            .await
            .map_err(err)?;
        if columns.is_empty() {
            return Ok(None);
        }

        let mut table = Table::new(name);
        for (column, data_type, is_nullable, default, extra) in columns {
            table.columns.push(Column {
                name: column,
                data_type,
                nullable: is_nullable == "YES",
                default: introspected_default(default, &extra),
                auto_increment: extra.to_ascii_lowercase().contains("auto_increment"),
            });
        }

        table.primary_key = self
            .conn
            .exec(
                "SELECT COLUMN_NAME FROM information_schema.KEY_COLUMN_USAGE \
                 WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? \
                   AND CONSTRAINT_NAME = 'PRIMARY' \
                 ORDER BY ORDINAL_POSITION",
                (name,),
            )
            .await
            .map_err(err)?;

        let foreign_keys: Vec<(String, String, String, String, String)> = self
            .conn
            .exec(
                "SELECT k.CONSTRAINT_NAME, k.COLUMN_NAME, k.REFERENCED_TABLE_NAME, \
                        k.REFERENCED_COLUMN_NAME, r.DELETE_RULE \
                 FROM information_schema.KEY_COLUMN_USAGE k \
                 JOIN information_schema.REFERENTIAL_CONSTRAINTS r \
                   ON r.CONSTRAINT_SCHEMA = k.CONSTRAINT_SCHEMA \
                  AND r.CONSTRAINT_NAME = k.CONSTRAINT_NAME \
                  AND r.TABLE_NAME = k.TABLE_NAME \
                 WHERE k.TABLE_SCHEMA = DATABASE() AND k.TABLE_NAME = ? \
                   AND k.REFERENCED_TABLE_NAME IS NOT NULL \
                 ORDER BY k.CONSTRAINT_NAME, k.ORDINAL_POSITION",
                (name,),
            )
            .await
            .map_err(err)?;
        for (constraint, column, referenced_table, referenced_column, rule) in foreign_keys {
            match table.foreign_keys.last_mut() {
                Some(fk) if fk.name.as_deref() == Some(constraint.as_str()) => {
                    fk.columns.push(column);
                    fk.references_columns.push(referenced_column);
                }
                _ => table.foreign_keys.push(ForeignKey {
                    name: Some(constraint),
                    columns: vec![column],
                    references_table: referenced_table,
                    references_columns: vec![referenced_column],
                    on_delete: Some(rule),
                }),
            }
        }

        let indexes: Vec<(String, i64, Option<String>)> = self
            .conn
            .exec(
                "SELECT INDEX_NAME, NON_UNIQUE, COLUMN_NAME FROM information_schema.STATISTICS \
                 WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? AND INDEX_NAME <> 'PRIMARY' \
                 ORDER BY INDEX_NAME, SEQ_IN_INDEX",
                (name,),
            )
            .await
            .map_err(err)?;
        let mut skipped: Vec<String> = Vec::new();
        for (index_name, non_unique, column) in indexes {
            // InnoDB names the index backing a foreign key after the
            // constraint. Expression indexes have no column.
            let backs_fk = table
                .foreign_keys
                .iter()
                .any(|fk| fk.name.as_deref() == Some(index_name.as_str()));
            let Some(column) = column.filter(|_| !backs_fk) else {
                skipped.push(index_name);
                continue;
            };
            if skipped.contains(&index_name) {
                continue;
            }
            match table.indexes.last_mut() {
                Some(idx) if idx.name == index_name => idx.columns.push(column),
                _ => table.indexes.push(Index {
                    name: index_name,
                    columns: vec![column],
                    unique: non_unique == 0,
                }),
            }
        }
        table.indexes.retain(|idx| !skipped.contains(&idx.name));

        Ok(Some(table))
    }
}

#[async_trait]
impl TextQuery for MysqlConn {
    async fn query_text(&mut self, sql: &str) -> Result<Vec<Vec<Option<String>>>> {
        let span = tracing::debug_span!("db.query", sql = %sql, rows = tracing::field::Empty);
        let rows: Vec<Row> = self
            .conn
            .query(sql)
            .instrument(span.clone())
            .await
            .map_err(|e| Error::introspection(KIND, e))?;
        span.record("rows", rows.len());

        rows.into_iter()
            .map(|row| {
                row.unwrap()
                    .into_iter()
                    .map(|value| match value {
                        Value::NULL => Ok(None),
                        value => mysql_async::from_value_opt::<String>(value)
                            .map(Some)
                            .map_err(|e| Error::introspection(KIND, e)),
                    })
                    .collect()
            })
            .collect()
    }
}

#[async_trait]
impl Executor for MysqlConn {
    async fn execute(&mut self, statement: &str) -> std::result::Result<(), BoxError> {
        let span = tracing::debug_span!("db.execute", sql = %statement);
        self.conn.query_drop(statement).instrument(span).await?;
        Ok(())
    }
}

/// A MySQL server. `Opts` are parsed up front; connections are opened per
/// call.
#[derive(Clone)]
pub struct MysqlDriver {
    opts: Opts,
    policy: DiffPolicy,
}

impl std::fmt::Debug for MysqlDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MysqlDriver")
            .field("host", &self.opts.ip_or_hostname())
            .field("db", &self.opts.db_name())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl MysqlDriver {
    pub fn new(uri: &str, policy: DiffPolicy) -> Result<Self> {
        let opts = Opts::from_url(uri).map_err(|e| Error::connection(KIND, e))?;
        Ok(MysqlDriver { opts, policy })
    }

    async fn connect(&self, ctx: &Context) -> Result<MysqlConn> {
        ctx.guard(MysqlConn::open(&self.opts)).await
    }

    async fn plan_on(
        &self,
        ctx: &Context,
        conn: &mut MysqlConn,
        name: &str,
        schema: &MysqlTableSchema,
        seed: Option<&SeedData>,
    ) -> Result<Vec<Statement>> {
        let dialect = MysqlDialect::new(schema);
        let current = ctx.guard(conn.introspect(name)).await?;

        if schema.table.is_deleted {
            return Ok(match current {
                Some(_) => vec![dialect.drop_table(name)],
                None => Vec::new(),
            });
        }

        let desired = Table::from_spec(name, &schema.table)?;
        if let Some(seed) = seed {
            check_seed_columns(&desired, seed)?;
        }
        let exists = current.is_some();
        let mut statements = plan_structure(&dialect, desired, current, self.policy)?;
        if let Some(seed) = seed
            && !exists
        {
            statements.extend(insert_or_ignore_all(&dialect, name, seed));
        }
        Ok(statements)
    }

    async fn seed_on(
        &self,
        ctx: &Context,
        conn: &mut MysqlConn,
        name: &str,
        schema: &MysqlTableSchema,
        seed: &SeedData,
    ) -> Result<Vec<Statement>> {
        let dialect = MysqlDialect::new(schema);
        let desired = Table::from_spec(name, &schema.table)?;
        check_seed_columns(&desired, seed)?;
        if ctx.guard(conn.introspect(name)).await?.is_none() {
            return Ok(insert_or_ignore_all(&dialect, name, seed));
        }
        let mut lookup = TextLookup(conn);
        plan_seed_rows(ctx, &dialect, &mut lookup, name, &desired.primary_key, seed).await
    }
}

#[async_trait]
impl Driver for MysqlDriver {
    type TableSchema = MysqlTableSchema;
    type TypeSchema = ();

    fn kind(&self) -> DriverKind {
        KIND
    }

    fn create_table_statements(
        &self,
        name: &str,
        schema: &MysqlTableSchema,
    ) -> Result<Vec<Statement>> {
        if schema.table.is_deleted {
            return Ok(Vec::new());
        }
        let desired = Table::from_spec(name, &schema.table)?;
        plan_structure(&MysqlDialect::new(schema), desired, None, DiffPolicy::default())
    }

    async fn plan_table(
        &self,
        ctx: &Context,
        name: &str,
        schema: &MysqlTableSchema,
        seed: Option<&SeedData>,
    ) -> Result<Plan> {
        let mut conn = self.connect(ctx).await?;
        let planned = self.plan_on(ctx, &mut conn, name, schema, seed).await;
        conn.close().await;
        Ok(Plan::new(planned?))
    }

    async fn plan_seed_data(
        &self,
        ctx: &Context,
        name: &str,
        schema: &MysqlTableSchema,
        seed: &SeedData,
    ) -> Result<Plan> {
        let mut conn = self.connect(ctx).await?;
        let planned = self.seed_on(ctx, &mut conn, name, schema, seed).await;
        conn.close().await;
        Ok(Plan::new(planned?))
    }

    async fn deploy_statements(
        &self,
        ctx: &Context,
        statements: &[Statement],
    ) -> Result<DeployReport> {
        if statements.is_empty() {
            return Ok(DeployReport {
                applied: 0,
                total: 0,
                transactional: false,
            });
        }
        let mut conn = self.connect(ctx).await?;
        let report = apply_sequential(ctx, KIND, &mut conn, statements, false).await;
        conn.close().await;
        report
    }
}
