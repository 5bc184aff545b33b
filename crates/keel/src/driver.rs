//! The driver contract, the closed set of implementations, and the shared
//! statement applier.

use async_trait::async_trait;
use keel_schema::{
    DataTypeSpec, DialectSchema, DialectTypeSchema, DriverKind, SeedData, TableSpec,
};

use crate::drivers::{
    CassandraDriver, MysqlDriver, PostgresDriver, RqliteDriver, SqliteDriver, TimescaleDriver,
};
use crate::plan::{Plan, Statement};
use crate::{BoxError, Context, DiffPolicy, Error, Result};

/// Operations every dialect implements, over its own schema block types.
///
/// Planning never writes to the target; only `deploy_statements` does.
#[async_trait]
pub trait Driver: Send + Sync {
    type TableSchema: Send + Sync;
    type TypeSchema: Send + Sync;

    fn kind(&self) -> DriverKind;

    /// Statements creating the table from nothing. No I/O.
    fn create_table_statements(
        &self,
        name: &str,
        schema: &Self::TableSchema,
    ) -> Result<Vec<Statement>>;

    /// Introspect the live table and plan its convergence. With `seed`,
    /// a table that does not exist yet is followed by insert-or-ignore rows.
    async fn plan_table(
        &self,
        ctx: &Context,
        name: &str,
        schema: &Self::TableSchema,
        seed: Option<&SeedData>,
    ) -> Result<Plan>;

    /// Inserts and updates that make the seed rows present.
    async fn plan_seed_data(
        &self,
        ctx: &Context,
        name: &str,
        schema: &Self::TableSchema,
        seed: &SeedData,
    ) -> Result<Plan>;

    async fn plan_type(
        &self,
        _ctx: &Context,
        _name: &str,
        _schema: &Self::TypeSchema,
    ) -> Result<Plan> {
        Err(Error::unsupported(self.kind(), "planning types"))
    }

    /// Run statements in order, stopping at the first failure.
    async fn deploy_statements(
        &self,
        ctx: &Context,
        statements: &[Statement],
    ) -> Result<DeployReport>;
}

/// Outcome of a successful deploy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeployReport {
    pub applied: usize,
    pub total: usize,
    /// Whether the statements ran inside one transaction.
    pub transactional: bool,
}

/// Where a driver connects. Passed through opaquely.
#[derive(Clone, PartialEq, Eq)]
pub enum ConnectionParams {
    Uri(String),
    Cassandra {
        hosts: Vec<String>,
        username: Option<String>,
        password: Option<String>,
        keyspace: String,
    },
}

impl std::fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionParams::Uri(_) => f.debug_tuple("Uri").field(&"<redacted>").finish(),
            ConnectionParams::Cassandra {
                hosts,
                username,
                keyspace,
                ..
            } => f
                .debug_struct("Cassandra")
                .field("hosts", hosts)
                .field("username", username)
                .field("keyspace", keyspace)
                .finish_non_exhaustive(),
        }
    }
}

/// Every supported driver. Chosen once by [`DriverRegistry::resolve`].
#[derive(Debug, Clone)]
pub enum AnyDriver {
    Postgres(PostgresDriver),
    Mysql(MysqlDriver),
    CockroachDb(PostgresDriver),
    Sqlite(SqliteDriver),
    Rqlite(RqliteDriver),
    TimescaleDb(TimescaleDriver),
    Cassandra(CassandraDriver),
}

/// Maps driver identifiers to implementations. Holds no state.
pub struct DriverRegistry;

impl DriverRegistry {
    /// Parse a driver identifier.
    pub fn kind(name: &str) -> Result<DriverKind> {
        name.parse()
            .map_err(|_| Error::UnknownDriver(name.to_string()))
    }

    /// Build the driver for `kind`. Nothing is opened until the first call.
    pub fn resolve(
        kind: DriverKind,
        params: &ConnectionParams,
        policy: DiffPolicy,
    ) -> Result<AnyDriver> {
        let driver = match (kind, params) {
            (DriverKind::Cassandra, ConnectionParams::Cassandra { .. }) => {
                AnyDriver::Cassandra(CassandraDriver::new(params.clone()).with_policy(policy))
            }
            (DriverKind::Cassandra, ConnectionParams::Uri(_)) => {
                return Err(Error::ConnectionMismatch {
                    driver: kind,
                    expected: "host list and keyspace",
                });
            }
            (_, ConnectionParams::Cassandra { .. }) => {
                return Err(Error::ConnectionMismatch {
                    driver: kind,
                    expected: "URI",
                });
            }
            (DriverKind::Postgres, ConnectionParams::Uri(uri)) => {
                AnyDriver::Postgres(PostgresDriver::postgres(uri, policy))
            }
            (DriverKind::CockroachDb, ConnectionParams::Uri(uri)) => {
                AnyDriver::CockroachDb(PostgresDriver::cockroach(uri, policy))
            }
            (DriverKind::TimescaleDb, ConnectionParams::Uri(uri)) => {
                AnyDriver::TimescaleDb(TimescaleDriver::new(uri, policy))
            }
            (DriverKind::Mysql, ConnectionParams::Uri(uri)) => {
                AnyDriver::Mysql(MysqlDriver::new(uri, policy)?)
            }
            (DriverKind::Sqlite, ConnectionParams::Uri(uri)) => {
                AnyDriver::Sqlite(SqliteDriver::new(uri, policy))
            }
            (DriverKind::Rqlite, ConnectionParams::Uri(uri)) => {
                AnyDriver::Rqlite(RqliteDriver::new(uri, policy)?)
            }
        };
        Ok(driver)
    }
}

/// Dispatch on the driver together with its own schema block. The spec is
/// asked for this driver's block only; other dialects' blocks are never read.
macro_rules! with_table_schema {
    ($self:ident, $spec:ident, |$d:ident, $s:ident| $body:expr) => {{
        let schema = $self.schema_for($spec)?;
        match ($self, schema) {
            (AnyDriver::Postgres($d), DialectSchema::Postgres($s)) => $body,
            (AnyDriver::CockroachDb($d), DialectSchema::CockroachDb($s)) => $body,
            (AnyDriver::Mysql($d), DialectSchema::Mysql($s)) => $body,
            (AnyDriver::Sqlite($d), DialectSchema::Sqlite($s)) => $body,
            (AnyDriver::Rqlite($d), DialectSchema::Rqlite($s)) => $body,
            (AnyDriver::TimescaleDb($d), DialectSchema::TimescaleDb($s)) => $body,
            (AnyDriver::Cassandra($d), DialectSchema::Cassandra($s)) => $body,
            _ => Err($self.missing_schema($spec)),
        }
    }};
}

impl AnyDriver {
    pub fn kind(&self) -> DriverKind {
        match self {
            AnyDriver::Postgres(_) => DriverKind::Postgres,
            AnyDriver::Mysql(_) => DriverKind::Mysql,
            AnyDriver::CockroachDb(_) => DriverKind::CockroachDb,
            AnyDriver::Sqlite(_) => DriverKind::Sqlite,
            AnyDriver::Rqlite(_) => DriverKind::Rqlite,
            AnyDriver::TimescaleDb(_) => DriverKind::TimescaleDb,
            AnyDriver::Cassandra(_) => DriverKind::Cassandra,
        }
    }

    fn missing_schema(&self, spec: &TableSpec) -> Error {
        Error::MissingSchema {
            table: spec.name.clone(),
            driver: self.kind(),
        }
    }

    /// This driver's schema block, or a configuration error.
    pub fn schema_for<'a>(&self, spec: &'a TableSpec) -> Result<DialectSchema<'a>> {
        spec.schema_for(self.kind())
            .ok_or_else(|| self.missing_schema(spec))
    }

    pub fn create_table_statements(&self, spec: &TableSpec) -> Result<Vec<Statement>> {
        with_table_schema!(self, spec, |d, s| d.create_table_statements(&spec.name, s))
    }

    pub async fn plan_table(
        &self,
        ctx: &Context,
        spec: &TableSpec,
        seed: Option<&SeedData>,
    ) -> Result<Plan> {
        with_table_schema!(self, spec, |d, s| d.plan_table(ctx, &spec.name, s, seed).await)
    }

    pub async fn plan_seed_data(
        &self,
        ctx: &Context,
        spec: &TableSpec,
        seed: &SeedData,
    ) -> Result<Plan> {
        with_table_schema!(self, spec, |d, s| d.plan_seed_data(ctx, &spec.name, s, seed).await)
    }

    pub async fn plan_type(&self, ctx: &Context, spec: &DataTypeSpec) -> Result<Plan> {
        let AnyDriver::Cassandra(d) = self else {
            return Err(Error::unsupported(self.kind(), "planning types"));
        };
        match spec.schema_for(self.kind()) {
            Some(DialectTypeSchema::Cassandra(s)) => d.plan_type(ctx, &spec.name, s).await,
            None => Err(Error::MissingSchema {
                table: spec.name.clone(),
                driver: self.kind(),
            }),
        }
    }

    pub async fn deploy_statements(
        &self,
        ctx: &Context,
        statements: &[Statement],
    ) -> Result<DeployReport> {
        match self {
            AnyDriver::Postgres(d) | AnyDriver::CockroachDb(d) => {
                d.deploy_statements(ctx, statements).await
            }
            AnyDriver::Mysql(d) => d.deploy_statements(ctx, statements).await,
            AnyDriver::Sqlite(d) => d.deploy_statements(ctx, statements).await,
            AnyDriver::Rqlite(d) => d.deploy_statements(ctx, statements).await,
            AnyDriver::TimescaleDb(d) => d.deploy_statements(ctx, statements).await,
            AnyDriver::Cassandra(d) => d.deploy_statements(ctx, statements).await,
        }
    }
}

/// Runs one statement against an open connection.
#[async_trait]
pub trait Executor: Send {
    async fn execute(&mut self, statement: &str) -> std::result::Result<(), BoxError>;
}

/// Run `statements` in order on `exec`, checking for cancellation before
/// each one.
///
/// With `transactional`, the caller has opened a transaction and will roll
/// it back on error, so any failure means nothing was applied. Otherwise a
/// failure after at least one success is reported as
/// [`Error::PartialApply`].
pub async fn apply_sequential(
    ctx: &Context,
    driver: DriverKind,
    exec: &mut dyn Executor,
    statements: &[Statement],
    transactional: bool,
) -> Result<DeployReport> {
    let total = statements.len();

    for (index, statement) in statements.iter().enumerate() {
        let committed = if transactional { 0 } else { index };
        ctx.ensure_active_at(committed, total)?;

        tracing::debug!(%driver, statement = %statement, index, total, "applying statement");
        if let Err(source) = exec.execute(statement.as_str()).await {
            if transactional || index == 0 {
                return Err(Error::Statement {
                    index,
                    statement: statement.to_string(),
                    source,
                });
            }
            return Err(Error::PartialApply {
                applied: index,
                total,
                statement: statement.to_string(),
                source,
            });
        }
        ctx.observer().statement_applied(driver, index, total);
    }

    Ok(DeployReport {
        applied: total,
        total,
        transactional,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingExecutor {
        fail_at: usize,
        seen: Vec<String>,
    }

    #[async_trait]
    impl Executor for FailingExecutor {
        async fn execute(&mut self, statement: &str) -> std::result::Result<(), BoxError> {
            self.seen.push(statement.to_string());
            if self.seen.len() == self.fail_at {
                return Err("boom".into());
            }
            Ok(())
        }
    }

    fn three_statements() -> Vec<Statement> {
        vec!["S1".into(), "S2".into(), "S3".into()]
    }

    #[tokio::test]
    async fn test_partial_apply_on_non_transactional_dialect() {
        let mut exec = FailingExecutor {
            fail_at: 2,
            seen: vec![],
        };
        let err = apply_sequential(
            &Context::new(),
            DriverKind::Mysql,
            &mut exec,
            &three_statements(),
            false,
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            Error::PartialApply {
                applied: 1,
                total: 3,
                ..
            }
        ));
        assert_eq!(err.partial_progress(), Some((1, 3)));
        assert_eq!(exec.seen, vec!["S1", "S2"]);
        assert_eq!(
            err.to_string(),
            "1 of 3 statements applied, then failed: S2: boom"
        );
    }

    #[tokio::test]
    async fn test_transactional_failure_reports_nothing_applied() {
        let mut exec = FailingExecutor {
            fail_at: 2,
            seen: vec![],
        };
        let err = apply_sequential(
            &Context::new(),
            DriverKind::Postgres,
            &mut exec,
            &three_statements(),
            true,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Statement { index: 1, .. }));
        assert_eq!(err.partial_progress(), None);
    }

    #[tokio::test]
    async fn test_first_statement_failure_is_total() {
        let mut exec = FailingExecutor {
            fail_at: 1,
            seen: vec![],
        };
        let err = apply_sequential(
            &Context::new(),
            DriverKind::Cassandra,
            &mut exec,
            &three_statements(),
            false,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Statement { index: 0, .. }));
    }

    #[tokio::test]
    async fn test_cancelled_before_any_statement() {
        let ctx = Context::new();
        ctx.cancellation_token().cancel();
        let mut exec = FailingExecutor {
            fail_at: 0,
            seen: vec![],
        };
        let err = apply_sequential(&ctx, DriverKind::Mysql, &mut exec, &three_statements(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled { applied: 0, total: 3 }));
        assert!(exec.seen.is_empty());
    }

    #[tokio::test]
    async fn test_all_applied() {
        let mut exec = FailingExecutor {
            fail_at: 0,
            seen: vec![],
        };
        let report = apply_sequential(
            &Context::new(),
            DriverKind::Sqlite,
            &mut exec,
            &three_statements(),
            true,
        )
        .await
        .unwrap();
        assert_eq!(
            report,
            DeployReport {
                applied: 3,
                total: 3,
                transactional: true
            }
        );
    }

    #[test]
    fn test_resolve_rejects_mismatched_params() {
        let err = DriverRegistry::resolve(
            DriverKind::Cassandra,
            &ConnectionParams::Uri("postgres://localhost".into()),
            DiffPolicy::default(),
        )
        .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_unknown_driver() {
        let err = DriverRegistry::kind("oracle").unwrap_err();
        assert_eq!(err.to_string(), r#"unknown database driver: "oracle""#);
    }

    #[test]
    fn test_connection_params_debug_hides_uri() {
        let params = ConnectionParams::Uri("postgres://u:secret@h/db".into());
        assert!(!format!("{params:?}").contains("secret"));
    }
}
