//! SQLite.
//!
//! DDL is transactional, but `ALTER TABLE` can only add columns, so any
//! other structural change rebuilds the table: create a copy with the
//! target shape, move the rows over, drop the original and rename the copy.
//!
//! The dialect, introspection and planning here are shared with rqlite,
//! which speaks the same SQL over HTTP.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use keel_schema::{DriverKind, SeedData, SeedRow, SeedValue, SqliteTableSchema};
use rusqlite::OpenFlags;
use rusqlite::types::ValueRef;
use tracing::Instrument;

use super::common::{self, TextLookup, TextQuery};
use crate::diff::{Change, DiffPolicy};
use crate::driver::{DeployReport, Driver, Executor, apply_sequential};
use crate::plan::{Dialect, Plan, Statement, normalize_type, plan_structure};
use crate::schema::{Column, ForeignKey, Index, Table};
use crate::seed::{SeedDialect, check_seed_columns, insert_or_ignore_all, plan_seed_rows};
use crate::sql::{Ident, Lit};
use crate::{BoxError, Context, Error, Result};

/// Name prefix of the scratch table used while rebuilding.
const REBUILD_PREFIX: &str = "_keel_tmp_";

#[derive(Debug, Clone, Copy)]
pub struct SqliteDialect {
    kind: DriverKind,
    strict: bool,
}

fn quote(name: &str) -> String {
    Ident(name).to_string()
}

/// The single auto-increment primary key column, which SQLite declares
/// inline as `PRIMARY KEY AUTOINCREMENT`.
fn autoincrement_column(table: &Table) -> Option<&str> {
    match table.primary_key.as_slice() {
        [pk] => table
            .column(pk)
            .filter(|c| c.auto_increment)
            .map(|c| c.name.as_str()),
        _ => None,
    }
}

impl SqliteDialect {
    pub fn new(kind: DriverKind, strict: bool) -> Self {
        SqliteDialect { kind, strict }
    }

    fn column_definition(&self, col: &Column, inline_pk: bool) -> String {
        let mut def = format!("{} {}", quote(&col.name), col.data_type);
        if !col.nullable {
            def.push_str(" NOT NULL");
        }
        if inline_pk {
            def.push_str(" PRIMARY KEY AUTOINCREMENT");
        }
        if let Some(default) = &col.default {
            def.push_str(" DEFAULT ");
            def.push_str(default);
        }
        def
    }

    fn table_statement(&self, table: &Table) -> Statement {
        let inline = autoincrement_column(table);
        let mut lines: Vec<String> = table
            .columns
            .iter()
            .map(|c| self.column_definition(c, inline == Some(c.name.as_str())))
            .collect();
        if inline.is_none() && !table.primary_key.is_empty() {
            lines.push(format!(
                "PRIMARY KEY ({})",
                common::column_list(&quote, &table.primary_key)
            ));
        }
        for fk in &table.foreign_keys {
            lines.push(foreign_key_line(fk));
        }
        let suffix = if self.strict { " STRICT" } else { "" };
        common::create_table_block(&quote, table, lines, suffix)
    }

    fn in_place(change: &Change) -> bool {
        match change {
            Change::AddColumn(col) => {
                !col.auto_increment && (col.nullable || col.default.is_some())
            }
            Change::AddIndex(_) | Change::DropIndex(_) => true,
            _ => false,
        }
    }

    /// Statements that move `current` to the shape of `desired`, keeping
    /// live columns the changes do not drop.
    fn rebuild(&self, desired: &Table, current: &Table, changes: &[Change]) -> Vec<Statement> {
        let dropped: HashSet<&str> = changes
            .iter()
            .filter_map(|c| match c {
                Change::DropColumn(name) => Some(name.as_str()),
                _ => None,
            })
            .collect();

        let mut target = desired.clone();
        for col in &current.columns {
            if !target.has_column(&col.name) && !dropped.contains(col.name.as_str()) {
                target.columns.push(col.clone());
            }
        }

        let scratch = Table {
            name: format!("{REBUILD_PREFIX}{}", desired.name),
            ..target.clone()
        };
        let copied: Vec<String> = target
            .columns
            .iter()
            .filter(|c| current.has_column(&c.name))
            .map(|c| c.name.clone())
            .collect();

        let mut statements = vec![self.table_statement(&scratch)];
        if !copied.is_empty() {
            let cols = common::column_list(&quote, &copied);
            statements.push(Statement::new(format!(
                "INSERT INTO {} ({cols}) SELECT {cols} FROM {}",
                quote(&scratch.name),
                quote(&desired.name)
            )));
        }
        statements.push(self.drop_table(&desired.name));
        statements.push(Statement::new(format!(
            "ALTER TABLE {} RENAME TO {}",
            quote(&scratch.name),
            quote(&desired.name)
        )));
        statements.extend(
            target
                .indexes
                .iter()
                .map(|idx| common::create_index(&quote, &desired.name, idx)),
        );
        statements
    }
}

fn foreign_key_line(fk: &ForeignKey) -> String {
    match &fk.name {
        Some(name) => format!(
            "CONSTRAINT {} {}",
            quote(name),
            common::foreign_key_clause(&quote, fk)
        ),
        None => common::foreign_key_clause(&quote, fk),
    }
}

impl Dialect for SqliteDialect {
    fn kind(&self) -> DriverKind {
        self.kind
    }

    fn quote_ident(&self, name: &str) -> String {
        quote(name)
    }

    fn canonicalize_column(&self, column: &mut Column) {
        column.data_type = normalize_type(&column.data_type);
        column.default = column
            .default
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty() && !d.eq_ignore_ascii_case("null"))
            .map(str::to_string);
        // AUTOINCREMENT is only accepted on INTEGER PRIMARY KEY.
        if column.auto_increment && matches!(column.data_type.as_str(), "int" | "bigint") {
            column.data_type = "integer".to_string();
        }
    }

    fn create_table(&self, table: &Table) -> Vec<Statement> {
        let mut statements = vec![self.table_statement(table)];
        statements.extend(
            table
                .indexes
                .iter()
                .map(|idx| common::create_index(&quote, &table.name, idx)),
        );
        statements
    }

    fn render_change(&self, table: &str, change: &Change) -> Result<Vec<Statement>> {
        let statement = match change {
            Change::AddColumn(col) if Self::in_place(change) => Statement::new(format!(
                "ALTER TABLE {} ADD COLUMN {}",
                quote(table),
                self.column_definition(col, false)
            )),
            Change::AddIndex(idx) => common::create_index(&quote, table, idx),
            Change::DropIndex(idx) => Statement::new(format!("DROP INDEX {}", quote(&idx.name))),
            other => {
                return Err(Error::invalid(
                    table,
                    format!("{other} needs a table rebuild"),
                ));
            }
        };
        Ok(vec![statement])
    }

    fn render_changes(
        &self,
        desired: &Table,
        current: &Table,
        changes: &[Change],
    ) -> Result<Vec<Statement>> {
        if changes.iter().all(Self::in_place) {
            let mut statements = Vec::new();
            for change in changes {
                statements.extend(self.render_change(&desired.name, change)?);
            }
            return Ok(statements);
        }
        tracing::debug!(table = %desired.name, "rebuilding table");
        Ok(self.rebuild(desired, current, changes))
    }
}

impl SeedDialect for SqliteDialect {
    fn quote_ident(&self, name: &str) -> String {
        quote(name)
    }

    fn literal(&self, value: &SeedValue) -> String {
        match value {
            SeedValue::Str(s) => Lit(s).to_string(),
            SeedValue::Bool(b) => if *b { "1" } else { "0" }.to_string(),
            other => other.to_string(),
        }
    }

    fn text_projection(&self, column: &str) -> String {
        format!("CAST({} AS TEXT)", quote(column))
    }

    fn insert_or_ignore(&self, table: &str, row: &SeedRow) -> Statement {
        let (columns, values) = self.column_lists(row);
        Statement::new(format!(
            "INSERT OR IGNORE INTO {} ({}) VALUES ({})",
            quote(table),
            columns,
            values
        ))
    }
}

fn cell(row: &[Option<String>], i: usize) -> Option<&str> {
    row.get(i).and_then(|v| v.as_deref())
}

/// Read `name` back from the catalog, or `None` when it does not exist.
pub(crate) async fn introspect_table(
    conn: &mut dyn TextQuery,
    name: &str,
) -> Result<Option<Table>> {
    let lit = Lit(name).to_string();

    let master = conn
        .query_text(&format!(
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = {lit}"
        ))
        .await?;
    let Some(master) = master.first() else {
        return Ok(None);
    };
    let autoincrement = cell(master, 0)
        .is_some_and(|sql| sql.to_ascii_uppercase().contains("AUTOINCREMENT"));

    let mut table = Table::new(name);
    let mut pk: Vec<(usize, String)> = Vec::new();
    for row in conn
        .query_text(&format!(
            "SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info({lit})"
        ))
        .await?
    {
        let col_name = cell(&row, 0).unwrap_or_default().to_string();
        let position: usize = cell(&row, 4).and_then(|p| p.parse().ok()).unwrap_or(0);
        if position > 0 {
            pk.push((position, col_name.clone()));
        }
        table.columns.push(Column {
            name: col_name,
            data_type: cell(&row, 1).unwrap_or_default().to_string(),
            nullable: cell(&row, 2) != Some("1"),
            default: cell(&row, 3).map(str::to_string),
            auto_increment: false,
        });
    }
    pk.sort();
    table.primary_key = pk.into_iter().map(|(_, c)| c).collect();
    if autoincrement && let [only] = table.primary_key.as_slice() {
        let only = only.clone();
        if let Some(col) = table.columns.iter_mut().find(|c| c.name == only) {
            col.auto_increment = true;
        }
    }

    for row in conn
        .query_text(&format!(
            "SELECT name, \"unique\", origin FROM pragma_index_list({lit})"
        ))
        .await?
    {
        // Only indexes created by CREATE INDEX; key and UNIQUE constraint
        // indexes belong to the table definition.
        if cell(&row, 2) != Some("c") {
            continue;
        }
        let index_name = cell(&row, 0).unwrap_or_default().to_string();
        let columns = conn
            .query_text(&format!(
                "SELECT name FROM pragma_index_info({}) ORDER BY seqno",
                Lit(&index_name)
            ))
            .await?
            .into_iter()
            .filter_map(|r| r.into_iter().next().flatten())
            .collect();
        table.indexes.push(Index {
            name: index_name,
            columns,
            unique: cell(&row, 1) == Some("1"),
        });
    }

    let mut current_id: Option<String> = None;
    for row in conn
        .query_text(&format!(
            "SELECT id, \"table\", \"from\", \"to\", on_delete FROM pragma_foreign_key_list({lit}) ORDER BY id, seq"
        ))
        .await?
    {
        let id = cell(&row, 0).map(str::to_string);
        if id != current_id || table.foreign_keys.is_empty() {
            table.foreign_keys.push(ForeignKey {
                name: None,
                columns: Vec::new(),
                references_table: cell(&row, 1).unwrap_or_default().to_string(),
                references_columns: Vec::new(),
                on_delete: cell(&row, 4).map(str::to_string),
            });
            current_id = id;
        }
        if let Some(fk) = table.foreign_keys.last_mut() {
            fk.columns.push(cell(&row, 2).unwrap_or_default().to_string());
            fk.references_columns
                .push(cell(&row, 3).unwrap_or_default().to_string());
        }
    }

    Ok(Some(table))
}

/// Pure CREATE statements for a SQLite-family schema block.
pub(crate) fn create_statements(
    kind: DriverKind,
    name: &str,
    schema: &SqliteTableSchema,
) -> Result<Vec<Statement>> {
    if schema.table.is_deleted {
        return Ok(Vec::new());
    }
    let dialect = SqliteDialect::new(kind, schema.strict);
    let desired = Table::from_spec(name, &schema.table)?;
    plan_structure(&dialect, desired, None, DiffPolicy::default())
}

/// Introspect and plan one table over any SQLite-speaking connection.
pub(crate) async fn plan_table_on(
    ctx: &Context,
    conn: &mut dyn TextQuery,
    kind: DriverKind,
    name: &str,
    schema: &SqliteTableSchema,
    seed: Option<&SeedData>,
    policy: DiffPolicy,
) -> Result<Plan> {
    let dialect = SqliteDialect::new(kind, schema.strict);
    let current = ctx.guard(introspect_table(conn, name)).await?;

    if schema.table.is_deleted {
        return Ok(match current {
            Some(_) => Plan::new(vec![dialect.drop_table(name)]),
            None => Plan::empty(),
        });
    }

    let desired = Table::from_spec(name, &schema.table)?;
    if let Some(seed) = seed {
        check_seed_columns(&desired, seed)?;
    }
    let exists = current.is_some();
    let mut statements = plan_structure(&dialect, desired, current, policy)?;
    if let Some(seed) = seed
        && !exists
    {
        statements.extend(insert_or_ignore_all(&dialect, name, seed));
    }
    Ok(Plan::new(statements))
}

/// Plan seed rows over any SQLite-speaking connection.
pub(crate) async fn plan_seed_on(
    ctx: &Context,
    conn: &mut dyn TextQuery,
    kind: DriverKind,
    name: &str,
    schema: &SqliteTableSchema,
    seed: &SeedData,
) -> Result<Plan> {
    let dialect = SqliteDialect::new(kind, schema.strict);
    let desired = Table::from_spec(name, &schema.table)?;
    check_seed_columns(&desired, seed)?;

    let current = ctx.guard(introspect_table(conn, name)).await?;
    let statements = match current {
        None => insert_or_ignore_all(&dialect, name, seed),
        Some(_) => {
            let mut lookup = TextLookup(conn);
            plan_seed_rows(
                ctx,
                &dialect,
                &mut lookup,
                name,
                &desired.primary_key,
                seed,
            )
            .await?
        }
    };
    Ok(Plan::new(statements))
}

/// A rusqlite connection driven from blocking tasks.
struct SqliteConn {
    inner: Arc<Mutex<rusqlite::Connection>>,
}

impl SqliteConn {
    /// Open `path`. Read-only opens of a missing file yield an empty
    /// in-memory database, so planning never creates files.
    async fn open(path: String, read_only: bool) -> Result<Self> {
        let conn = tokio::task::spawn_blocking(move || {
            if !read_only {
                return rusqlite::Connection::open(&path);
            }
            if path != ":memory:" && !std::path::Path::new(&path).exists() {
                return rusqlite::Connection::open_in_memory();
            }
            rusqlite::Connection::open_with_flags(
                &path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI,
            )
        })
        .await
        .map_err(|e| Error::connection(DriverKind::Sqlite, e))?
        .map_err(|e| Error::connection(DriverKind::Sqlite, e))?;

        Ok(SqliteConn {
            inner: Arc::new(Mutex::new(conn)),
        })
    }

    async fn call<T, F>(&self, f: F) -> std::result::Result<T, BoxError>
    where
        T: Send + 'static,
        F: FnOnce(&rusqlite::Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || -> std::result::Result<T, BoxError> {
            let conn = inner
                .lock()
                .map_err(|_| BoxError::from("sqlite connection lock poisoned"))?;
            Ok(f(&conn)?)
        })
        .await?
    }
}

fn value_text(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(t) | ValueRef::Blob(t) => Some(String::from_utf8_lossy(t).into_owned()),
    }
}

#[async_trait]
impl TextQuery for SqliteConn {
    async fn query_text(&mut self, sql: &str) -> Result<Vec<Vec<Option<String>>>> {
        let span = tracing::debug_span!("db.query", sql = %sql, rows = tracing::field::Empty);
        let sql = sql.to_string();
        let rows = self
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let width = stmt.column_count();
                let mapped = stmt.query_map([], |row| {
                    (0..width)
                        .map(|i| row.get_ref(i).map(value_text))
                        .collect::<rusqlite::Result<Vec<_>>>()
                })?;
                let rows = mapped.collect::<rusqlite::Result<Vec<_>>>();
                rows
            })
            .instrument(span.clone())
            .await
            .map_err(|e| Error::introspection(DriverKind::Sqlite, e))?;
        span.record("rows", rows.len());
        Ok(rows)
    }
}

#[async_trait]
impl Executor for SqliteConn {
    async fn execute(&mut self, statement: &str) -> std::result::Result<(), BoxError> {
        let span = tracing::debug_span!("db.execute", sql = %statement);
        let sql = statement.to_string();
        self.call(move |conn| conn.execute_batch(&sql))
            .instrument(span)
            .await
    }
}

/// Run `statements` between `BEGIN` and `COMMIT`, rolling back on failure.
pub(crate) async fn deploy_in_transaction(
    ctx: &Context,
    kind: DriverKind,
    exec: &mut dyn Executor,
    statements: &[Statement],
) -> Result<DeployReport> {
    exec.execute("BEGIN")
        .await
        .map_err(|e| Error::connection(kind, e))?;

    match apply_sequential(ctx, kind, exec, statements, true).await {
        Ok(report) => {
            exec.execute("COMMIT")
                .await
                .map_err(|source| Error::Statement {
                    index: statements.len(),
                    statement: "COMMIT".to_string(),
                    source,
                })?;
            Ok(report)
        }
        Err(err) => {
            if let Err(rollback) = exec.execute("ROLLBACK").await {
                tracing::warn!(%kind, error = %rollback, "rollback failed");
            }
            Err(err)
        }
    }
}

/// Local SQLite database file.
#[derive(Debug, Clone)]
pub struct SqliteDriver {
    path: String,
    policy: DiffPolicy,
}

impl SqliteDriver {
    /// `uri` is a file path, optionally prefixed with `sqlite://`.
    pub fn new(uri: &str, policy: DiffPolicy) -> Self {
        let path = uri
            .strip_prefix("sqlite://")
            .or_else(|| uri.strip_prefix("sqlite:"))
            .unwrap_or(uri);
        SqliteDriver {
            path: path.to_string(),
            policy,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

#[async_trait]
impl Driver for SqliteDriver {
    type TableSchema = SqliteTableSchema;
    type TypeSchema = ();

    fn kind(&self) -> DriverKind {
        DriverKind::Sqlite
    }

    fn create_table_statements(
        &self,
        name: &str,
        schema: &SqliteTableSchema,
    ) -> Result<Vec<Statement>> {
        create_statements(DriverKind::Sqlite, name, schema)
    }

    async fn plan_table(
        &self,
        ctx: &Context,
        name: &str,
        schema: &SqliteTableSchema,
        seed: Option<&SeedData>,
    ) -> Result<Plan> {
        let mut conn = ctx.guard(SqliteConn::open(self.path.clone(), true)).await?;
        plan_table_on(ctx, &mut conn, self.kind(), name, schema, seed, self.policy).await
    }

    async fn plan_seed_data(
        &self,
        ctx: &Context,
        name: &str,
        schema: &SqliteTableSchema,
        seed: &SeedData,
    ) -> Result<Plan> {
        let mut conn = ctx.guard(SqliteConn::open(self.path.clone(), true)).await?;
        plan_seed_on(ctx, &mut conn, self.kind(), name, schema, seed).await
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
                transactional: true,
            });
        }
        let mut conn = ctx.guard(SqliteConn::open(self.path.clone(), false)).await?;
        deploy_in_transaction(ctx, self.kind(), &mut conn, statements).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_column(name: &str, data_type: &str, nullable: bool) -> Column {
        Column {
            name: name.to_string(),
            data_type: data_type.to_string(),
            nullable,
            ..Default::default()
        }
    }

    fn make_table(columns: Vec<Column>) -> Table {
        Table {
            name: "users".to_string(),
            columns,
            primary_key: vec!["id".into()],
            ..Default::default()
        }
    }

    fn dialect() -> SqliteDialect {
        SqliteDialect::new(DriverKind::Sqlite, false)
    }

    #[test]
    fn test_create_table_autoincrement() {
        let mut id = make_column("id", "integer", false);
        id.auto_increment = true;
        let table = make_table(vec![id, make_column("email", "text", true)]);
        let statements = dialect().create_table(&table);
        insta::assert_snapshot!(statements[0].as_str(), @r#"
        CREATE TABLE "users" (
            "id" integer NOT NULL PRIMARY KEY AUTOINCREMENT,
            "email" text
        )
        "#);
    }

    #[test]
    fn test_create_table_strict_with_composite_key() {
        let mut table = make_table(vec![
            make_column("id", "integer", false),
            make_column("org", "text", false),
        ]);
        table.primary_key = vec!["org".into(), "id".into()];
        let statements = SqliteDialect::new(DriverKind::Sqlite, true).create_table(&table);
        assert!(statements[0].as_str().ends_with(") STRICT"));
        assert!(
            statements[0]
                .as_str()
                .contains(r#"PRIMARY KEY ("org", "id")"#)
        );
    }

    #[test]
    fn test_nullable_add_column_is_in_place() {
        let desired = make_table(vec![
            make_column("id", "integer", false),
            make_column("age", "integer", true),
        ]);
        let current = make_table(vec![make_column("id", "integer", false)]);
        let statements =
            plan_structure(&dialect(), desired, Some(current), DiffPolicy::default()).unwrap();
        assert_eq!(
            statements,
            vec![Statement::from(
                r#"ALTER TABLE "users" ADD COLUMN "age" integer"#
            )]
        );
    }

    #[test]
    fn test_type_change_rebuilds_and_keeps_extra_columns() {
        let desired = make_table(vec![
            make_column("id", "integer", false),
            make_column("score", "real", true),
        ]);
        let current = make_table(vec![
            make_column("id", "integer", false),
            make_column("score", "integer", true),
            make_column("legacy", "text", true),
        ]);
        let statements =
            plan_structure(&dialect(), desired, Some(current), DiffPolicy::default()).unwrap();
        let sql: Vec<&str> = statements.iter().map(Statement::as_str).collect();
        assert!(sql[0].starts_with(r#"CREATE TABLE "_keel_tmp_users""#));
        assert!(sql[0].contains(r#""legacy" text"#));
        assert_eq!(
            sql[1],
            r#"INSERT INTO "_keel_tmp_users" ("id", "score", "legacy") SELECT "id", "score", "legacy" FROM "users""#
        );
        assert_eq!(sql[2], r#"DROP TABLE "users""#);
        assert_eq!(sql[3], r#"ALTER TABLE "_keel_tmp_users" RENAME TO "users""#);
    }

    #[test]
    fn test_dropped_column_left_out_of_rebuild() {
        let desired = make_table(vec![make_column("id", "integer", false)]);
        let current = make_table(vec![
            make_column("id", "integer", false),
            make_column("legacy", "text", true),
        ]);
        let policy = DiffPolicy { drop_columns: true };
        let statements = plan_structure(&dialect(), desired, Some(current), policy).unwrap();
        assert!(!statements[0].as_str().contains("legacy"));
        assert_eq!(
            statements[1].as_str(),
            r#"INSERT INTO "_keel_tmp_users" ("id") SELECT "id" FROM "users""#
        );
    }

    #[test]
    fn test_seed_literals() {
        let d = dialect();
        assert_eq!(d.literal(&SeedValue::Bool(true)), "1");
        assert_eq!(d.literal(&SeedValue::Str("o'k".into())), "'o''k'");
        assert_eq!(d.literal(&SeedValue::Null), "NULL");
        assert_eq!(d.text_projection("id"), r#"CAST("id" AS TEXT)"#);
    }

    #[test]
    fn test_driver_strips_scheme() {
        let driver = SqliteDriver::new("sqlite:///tmp/app.db", DiffPolicy::default());
        assert_eq!(driver.path(), "/tmp/app.db");
        let driver = SqliteDriver::new("app.db", DiffPolicy::default());
        assert_eq!(driver.path(), "app.db");
    }
}
