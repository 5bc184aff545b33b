//! TimescaleDB: Postgres plus hypertables.

use async_trait::async_trait;
use keel_schema::{DriverKind, HypertableSpec, SeedData, TimescaleTableSchema};

use super::postgres::{Flavor, PostgresDriver};
use crate::diff::DiffPolicy;
use crate::driver::{DeployReport, Driver};
use crate::plan::{Plan, Statement};
use crate::sql::{Ident, Lit};
use crate::traced::TracedConn;
use crate::{Context, Error, Result};

#[derive(Debug, Clone)]
pub struct TimescaleDriver {
    inner: PostgresDriver,
}

/// `SELECT create_hypertable(...)`. With `migrate_data`, rows already in
/// the table are moved into chunks. Default indexes are not created; the
/// spec's own indexes are the only ones that exist.
fn create_hypertable(table: &str, spec: &HypertableSpec, migrate_data: bool) -> Statement {
    let mut sql = format!(
        "SELECT create_hypertable({}, {}",
        Lit(Ident(table).to_string()),
        Lit(&spec.time_column_name)
    );
    if let Some(interval) = &spec.chunk_time_interval {
        sql.push_str(&format!(", chunk_time_interval => INTERVAL {}", Lit(interval)));
    }
    sql.push_str(", create_default_indexes => false");
    if migrate_data {
        sql.push_str(", migrate_data => true");
    }
    sql.push(')');
    Statement::new(sql)
}

fn check_time_column(name: &str, schema: &TimescaleTableSchema) -> Result<()> {
    if let Some(spec) = &schema.hypertable
        && !schema
            .table
            .columns
            .iter()
            .any(|c| c.name == spec.time_column_name)
    {
        return Err(Error::invalid(
            name,
            format!(
                "hypertable time column {:?} is not a column",
                spec.time_column_name
            ),
        ));
    }
    Ok(())
}

impl TimescaleDriver {
    pub fn new(uri: &str, policy: DiffPolicy) -> Self {
        TimescaleDriver {
            inner: PostgresDriver::with_kind(
                uri,
                DriverKind::TimescaleDb,
                Flavor::Postgres,
                policy,
            ),
        }
    }

    async fn is_hypertable(
        &self,
        conn: &TracedConn<'_, tokio_postgres::Client>,
        name: &str,
    ) -> Result<bool> {
        let rows = conn
            .query(
                "SELECT 1 FROM timescaledb_information.hypertables \
                 WHERE hypertable_schema = current_schema() AND hypertable_name = $1",
                &[&name],
            )
            .await
            .map_err(|e| Error::introspection(DriverKind::TimescaleDb, e))?;
        Ok(!rows.is_empty())
    }
}

#[async_trait]
impl Driver for TimescaleDriver {
    type TableSchema = TimescaleTableSchema;
    type TypeSchema = ();

    fn kind(&self) -> DriverKind {
        DriverKind::TimescaleDb
    }

    fn create_table_statements(
        &self,
        name: &str,
        schema: &TimescaleTableSchema,
    ) -> Result<Vec<Statement>> {
        check_time_column(name, schema)?;
        let mut statements = self.inner.create_statements(name, &schema.table)?;
        if let Some(spec) = &schema.hypertable
            && !schema.table.is_deleted
        {
            statements.push(create_hypertable(name, spec, false));
        }
        Ok(statements)
    }

    async fn plan_table(
        &self,
        ctx: &Context,
        name: &str,
        schema: &TimescaleTableSchema,
        seed: Option<&SeedData>,
    ) -> Result<Plan> {
        check_time_column(name, schema)?;
        let client = self.inner.connect(ctx).await?;
        let conn = TracedConn::new(&client, DriverKind::TimescaleDb);
        let planned = self.inner.plan_on(ctx, &conn, name, &schema.table, seed).await?;

        let mut plan = Plan::new(planned.structure);
        if let Some(spec) = &schema.hypertable
            && !schema.table.is_deleted
        {
            if !planned.exists {
                plan.extend([create_hypertable(name, spec, false)]);
            } else if !ctx.guard(self.is_hypertable(&conn, name)).await? {
                plan.extend([create_hypertable(name, spec, true)]);
            }
        }
        plan.extend(planned.seed);
        Ok(plan)
    }

    async fn plan_seed_data(
        &self,
        ctx: &Context,
        name: &str,
        schema: &TimescaleTableSchema,
        seed: &SeedData,
    ) -> Result<Plan> {
        self.inner.plan_seed_data(ctx, name, &schema.table, seed).await
    }

    async fn deploy_statements(
        &self,
        ctx: &Context,
        statements: &[Statement],
    ) -> Result<DeployReport> {
        self.inner.deploy_statements(ctx, statements).await
    }
}
