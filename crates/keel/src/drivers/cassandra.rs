//! Cassandra (CQL).
//!
//! Tables are compared through their own model rather than
//! [`crate::schema::Table`]: a CQL primary key is a partition key plus
//! ordered clustering columns, and the only in-place changes are adding and
//! dropping regular columns and secondary indexes. Anything else (a key
//! change, a column type change) is a planning error.

use std::collections::HashMap;

use async_trait::async_trait;
use keel_schema::{
    CassandraDataTypeSchema, CassandraTableSchema, DriverKind, SeedData,
};
use scylla::client::session::Session;
use scylla::client::session_builder::SessionBuilder;
use tracing::Instrument;

use crate::diff::DiffPolicy;
use crate::driver::{ConnectionParams, DeployReport, Driver, Executor, apply_sequential};
use crate::plan::{Plan, Statement};
use crate::sql::Ident;
use crate::{BoxError, Context, Error, Result};

const KIND: DriverKind = DriverKind::Cassandra;

fn quote(name: &str) -> String {
    Ident(name).to_string()
}

/// `map<text, int>` and `MAP<TEXT,INT>` compare equal.
fn canonical_type(data_type: &str) -> String {
    let t: String = data_type
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_lowercase();
    if t == "varchar" { "text".to_string() } else { t }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CqlColumn {
    name: String,
    data_type: String,
    is_static: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CqlIndex {
    name: String,
    column: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CqlTable {
    name: String,
    partition_key: Vec<String>,
    /// `(column, descending)`, in key order.
    clustering: Vec<(String, bool)>,
    columns: Vec<CqlColumn>,
    indexes: Vec<CqlIndex>,
}

impl CqlTable {
    fn column(&self, name: &str) -> Option<&CqlColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    fn from_spec(name: &str, schema: &CassandraTableSchema) -> Result<Self> {
        if schema.columns.is_empty() {
            return Err(Error::invalid(name, "table has no columns"));
        }
        if schema.partition_key.is_empty() {
            return Err(Error::invalid(name, "table has no partition key"));
        }
        let mut columns = Vec::with_capacity(schema.columns.len());
        for col in &schema.columns {
            if columns.iter().any(|c: &CqlColumn| c.name == col.name) {
                return Err(Error::invalid(
                    name,
                    format!("column {:?} is declared twice", col.name),
                ));
            }
            columns.push(CqlColumn {
                name: col.name.clone(),
                data_type: canonical_type(&col.data_type),
                is_static: col.is_static,
            });
        }

        let table = CqlTable {
            name: name.to_string(),
            partition_key: schema.partition_key.clone(),
            clustering: schema
                .clustering_key
                .iter()
                .map(|c| (c.name.clone(), c.descending))
                .collect(),
            columns,
            indexes: schema
                .indexes
                .iter()
                .map(|idx| CqlIndex {
                    name: idx
                        .name
                        .clone()
                        .unwrap_or_else(|| format!("{name}_{}_idx", idx.column)),
                    column: idx.column.clone(),
                })
                .collect(),
        };

        let referenced = table
            .partition_key
            .iter()
            .chain(table.clustering.iter().map(|(c, _)| c))
            .chain(table.indexes.iter().map(|i| &i.column));
        for col in referenced {
            if table.column(col).is_none() {
                return Err(Error::invalid(
                    name,
                    format!("key or index references unknown column {col:?}"),
                ));
            }
        }
        for col in &table.columns {
            let is_key = table.partition_key.contains(&col.name)
                || table.clustering.iter().any(|(c, _)| *c == col.name);
            if is_key && col.is_static {
                return Err(Error::invalid(
                    name,
                    format!("key column {:?} cannot be static", col.name),
                ));
            }
        }
        if table.clustering.is_empty() && table.columns.iter().any(|c| c.is_static) {
            return Err(Error::invalid(
                name,
                "static columns need a clustering key",
            ));
        }
        Ok(table)
    }
}

fn create_table(table: &CqlTable) -> Vec<Statement> {
    let mut lines: Vec<String> = table
        .columns
        .iter()
        .map(|c| {
            let mut def = format!("{} {}", quote(&c.name), c.data_type);
            if c.is_static {
                def.push_str(" STATIC");
            }
            def
        })
        .collect();

    let partition = table
        .partition_key
        .iter()
        .map(|c| quote(c))
        .collect::<Vec<_>>()
        .join(", ");
    let mut key = format!("({partition})");
    for (col, _) in &table.clustering {
        key.push_str(", ");
        key.push_str(&quote(col));
    }
    lines.push(format!("PRIMARY KEY ({key})"));

    let mut sql = format!(
        "CREATE TABLE {} (\n{}\n)",
        quote(&table.name),
        lines
            .iter()
            .map(|l| format!("    {l}"))
            .collect::<Vec<_>>()
            .join(",\n")
    );
    if !table.clustering.is_empty() {
        let order = table
            .clustering
            .iter()
            .map(|(c, desc)| format!("{} {}", quote(c), if *desc { "DESC" } else { "ASC" }))
            .collect::<Vec<_>>()
            .join(", ");
        sql.push_str(&format!(" WITH CLUSTERING ORDER BY ({order})"));
    }

    let mut statements = vec![Statement::new(sql)];
    statements.extend(table.indexes.iter().map(|idx| create_index(&table.name, idx)));
    statements
}

fn create_index(table: &str, idx: &CqlIndex) -> Statement {
    Statement::new(format!(
        "CREATE INDEX {} ON {} ({})",
        quote(&idx.name),
        quote(table),
        quote(&idx.column)
    ))
}

/// Statements taking `current` to `desired`.
fn plan_cql_table(
    desired: &CqlTable,
    current: Option<&CqlTable>,
    policy: DiffPolicy,
) -> Result<Vec<Statement>> {
    let Some(current) = current else {
        return Ok(create_table(desired));
    };
    let name = &desired.name;
    let t = quote(name);

    if desired.partition_key != current.partition_key || desired.clustering != current.clustering {
        return Err(Error::invalid(
            name,
            "the primary key of a cassandra table cannot be changed",
        ));
    }

    let mut statements = Vec::new();

    for idx in &current.indexes {
        if !desired.indexes.iter().any(|d| d.column == idx.column) {
            statements.push(Statement::new(format!("DROP INDEX {}", quote(&idx.name))));
        }
    }

    if policy.drop_columns {
        for col in &current.columns {
            if desired.column(&col.name).is_none() {
                statements.push(Statement::new(format!(
                    "ALTER TABLE {t} DROP {}",
                    quote(&col.name)
                )));
            }
        }
    }

    for col in &desired.columns {
        match current.column(&col.name) {
            None => {
                let mut sql = format!("ALTER TABLE {t} ADD {} {}", quote(&col.name), col.data_type);
                if col.is_static {
                    sql.push_str(" STATIC");
                }
                statements.push(Statement::new(sql));
            }
            Some(live) if live.data_type != col.data_type => {
                return Err(Error::invalid(
                    name,
                    format!(
                        "column {:?} cannot change type from {} to {}",
                        col.name, live.data_type, col.data_type
                    ),
                ));
            }
            Some(live) if live.is_static != col.is_static => {
                return Err(Error::invalid(
                    name,
                    format!("column {:?} cannot change staticness", col.name),
                ));
            }
            Some(_) => {}
        }
    }

    for idx in &desired.indexes {
        if !current.indexes.iter().any(|c| c.column == idx.column) {
            statements.push(create_index(name, idx));
        }
    }

    Ok(statements)
}

/// Statements taking the live field list of a user-defined type to the
/// desired one. Fields can only be added.
fn plan_cql_type(
    name: &str,
    desired: &CassandraDataTypeSchema,
    current: Option<&[(String, String)]>,
) -> Result<Vec<Statement>> {
    if desired.is_deleted {
        return Ok(match current {
            Some(_) => vec![Statement::new(format!("DROP TYPE {}", quote(name)))],
            None => Vec::new(),
        });
    }
    if desired.fields.is_empty() {
        return Err(Error::invalid(name, "type has no fields"));
    }

    let Some(current) = current else {
        let fields = desired
            .fields
            .iter()
            .map(|f| format!("{} {}", quote(&f.name), canonical_type(&f.data_type)))
            .collect::<Vec<_>>()
            .join(", ");
        return Ok(vec![Statement::new(format!(
            "CREATE TYPE {} ({fields})",
            quote(name)
        ))]);
    };

    let mut statements = Vec::new();
    for field in &desired.fields {
        let data_type = canonical_type(&field.data_type);
        match current.iter().find(|(n, _)| *n == field.name) {
            None => statements.push(Statement::new(format!(
                "ALTER TYPE {} ADD {} {}",
                quote(name),
                quote(&field.name),
                data_type
            ))),
            Some((_, live)) if canonical_type(live) != data_type => {
                return Err(Error::invalid(
                    name,
                    format!("field {:?} cannot change type", field.name),
                ));
            }
            Some(_) => {}
        }
    }
    Ok(statements)
}

/// Column named by a secondary index `target` option: `col`, `"Col"`, or
/// `values(col)`.
fn index_target(target: &str) -> String {
    let inner = match (target.find('('), target.rfind(')')) {
        (Some(open), Some(close)) if open < close => &target[open + 1..close],
        _ => target,
    };
    let inner = inner.trim();
    inner
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .map(|s| s.replace("\"\"", "\""))
        .unwrap_or_else(|| inner.to_string())
}

fn introspection<E: Into<BoxError>>(e: E) -> Error {
    Error::introspection(KIND, e)
}

struct CassandraConn {
    session: Session,
    keyspace: String,
}

impl CassandraConn {
    async fn query_rows<T>(&self, cql: &str, name: &str) -> Result<Vec<T>>
    where
        T: for<'f, 'm> scylla::deserialize::row::DeserializeRow<'f, 'm>,
    {
        let span = tracing::debug_span!("db.query", sql = %cql, rows = tracing::field::Empty);
        let result = self
            .session
            .query_unpaged(cql, (self.keyspace.as_str(), name))
            .instrument(span.clone())
            .await
            .map_err(introspection)?
            .into_rows_result()
            .map_err(introspection)?;
        let rows = result
            .rows::<T>()
            .map_err(introspection)?
            .collect::<std::result::Result<Vec<T>, _>>()
            .map_err(introspection)?;
        span.record("rows", rows.len());
        Ok(rows)
    }

    async fn introspect(&self, name: &str) -> Result<Option<CqlTable>> {
        let mut columns: Vec<(String, String, i32, String, String)> = self
            .query_rows(
                "SELECT column_name, kind, position, clustering_order, type \
                 FROM system_schema.columns WHERE keyspace_name = ? AND table_name = ?",
                name,
            )
            .await?;
        if columns.is_empty() {
            return Ok(None);
        }
        columns.sort_by(|a, b| (&a.1, a.2, &a.0).cmp(&(&b.1, b.2, &b.0)));

        let mut table = CqlTable {
            name: name.to_string(),
            partition_key: Vec::new(),
            clustering: Vec::new(),
            columns: Vec::new(),
            indexes: Vec::new(),
        };
        for (column, kind, _, order, data_type) in columns {
            match kind.as_str() {
                "partition_key" => table.partition_key.push(column.clone()),
                "clustering" => table.clustering.push((column.clone(), order == "desc")),
                _ => {}
            }
            table.columns.push(CqlColumn {
                name: column,
                data_type: canonical_type(&data_type),
                is_static: kind == "static",
            });
        }

        let indexes: Vec<(String, HashMap<String, String>)> = self
            .query_rows(
                "SELECT index_name, options FROM system_schema.indexes \
                 WHERE keyspace_name = ? AND table_name = ?",
                name,
            )
            .await?;
        for (index_name, options) in indexes {
            if let Some(target) = options.get("target") {
                table.indexes.push(CqlIndex {
                    name: index_name,
                    column: index_target(target),
                });
            }
        }
        table.indexes.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(Some(table))
    }

    async fn introspect_type(&self, name: &str) -> Result<Option<Vec<(String, String)>>> {
        let rows: Vec<(Vec<String>, Vec<String>)> = self
            .query_rows(
                "SELECT field_names, field_types FROM system_schema.types \
                 WHERE keyspace_name = ? AND type_name = ?",
                name,
            )
            .await?;
        Ok(rows
            .into_iter()
            .next()
            .map(|(names, types)| names.into_iter().zip(types).collect()))
    }
}

#[async_trait]
impl Executor for CassandraConn {
    async fn execute(&mut self, statement: &str) -> std::result::Result<(), BoxError> {
        let span = tracing::debug_span!("db.execute", sql = %statement);
        self.session
            .query_unpaged(statement, ())
            .instrument(span)
            .await?;
        Ok(())
    }
}

/// A Cassandra (or ScyllaDB) cluster and keyspace.
#[derive(Clone)]
pub struct CassandraDriver {
    params: ConnectionParams,
    policy: DiffPolicy,
}

impl std::fmt::Debug for CassandraDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CassandraDriver")
            .field("params", &self.params)
            .field("policy", &self.policy)
            .finish()
    }
}

impl CassandraDriver {
    pub fn new(params: ConnectionParams) -> Self {
        CassandraDriver {
            params,
            policy: DiffPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: DiffPolicy) -> Self {
        self.policy = policy;
        self
    }

    async fn connect(&self, ctx: &Context) -> Result<CassandraConn> {
        let ConnectionParams::Cassandra {
            hosts,
            username,
            password,
            keyspace,
        } = &self.params
        else {
            return Err(Error::ConnectionMismatch {
                driver: KIND,
                expected: "host list and keyspace",
            });
        };

        let mut builder = SessionBuilder::new().known_nodes(hosts);
        if let Some(username) = username {
            builder = builder.user(username, password.clone().unwrap_or_default());
        }
        let session = ctx
            .guard(async {
                builder
                    .use_keyspace(keyspace, false)
                    .build()
                    .await
                    .map_err(|e| Error::connection(KIND, e))
            })
            .await?;
        Ok(CassandraConn {
            session,
            keyspace: keyspace.clone(),
        })
    }
}

#[async_trait]
impl Driver for CassandraDriver {
    type TableSchema = CassandraTableSchema;
    type TypeSchema = CassandraDataTypeSchema;

    fn kind(&self) -> DriverKind {
        KIND
    }

    fn create_table_statements(
        &self,
        name: &str,
        schema: &CassandraTableSchema,
    ) -> Result<Vec<Statement>> {
        if schema.is_deleted {
            return Ok(Vec::new());
        }
        Ok(create_table(&CqlTable::from_spec(name, schema)?))
    }

    async fn plan_table(
        &self,
        ctx: &Context,
        name: &str,
        schema: &CassandraTableSchema,
        seed: Option<&SeedData>,
    ) -> Result<Plan> {
        if seed.is_some_and(|s| !s.is_empty()) {
            return Err(Error::unsupported(KIND, "seed data"));
        }
        let desired = if schema.is_deleted {
            None
        } else {
            Some(CqlTable::from_spec(name, schema)?)
        };

        let conn = self.connect(ctx).await?;
        let current = ctx.guard(conn.introspect(name)).await?;

        let statements = match (desired, current) {
            (None, Some(_)) => vec![Statement::new(format!("DROP TABLE {}", quote(name)))],
            (None, None) => Vec::new(),
            (Some(desired), current) => plan_cql_table(&desired, current.as_ref(), self.policy)?,
        };
        Ok(Plan::new(statements))
    }

    async fn plan_seed_data(
        &self,
        _ctx: &Context,
        _name: &str,
        _schema: &CassandraTableSchema,
        _seed: &SeedData,
    ) -> Result<Plan> {
        Err(Error::unsupported(KIND, "seed data"))
    }

    async fn plan_type(
        &self,
        ctx: &Context,
        name: &str,
        schema: &CassandraDataTypeSchema,
    ) -> Result<Plan> {
        let conn = self.connect(ctx).await?;
        let current = ctx.guard(conn.introspect_type(name)).await?;
        Ok(Plan::new(plan_cql_type(name, schema, current.as_deref())?))
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
        apply_sequential(ctx, KIND, &mut conn, statements, false).await
    }
}
