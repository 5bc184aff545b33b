//! Traced Postgres connection wrapper.
//!
//! Every query and statement sent through [`TracedConn`] runs inside a
//! `db.query` or `db.execute` debug span carrying the SQL text.

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Error, Row};
use tracing::Instrument;

use keel_schema::DriverKind;

use crate::BoxError;
use crate::driver::Executor;
use crate::seed::RowLookup;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, Error>> + Send + 'a>>;

/// Anything that can run Postgres queries: a client or an open transaction.
pub trait Connection: Send + Sync {
    fn query<'a>(&'a self, sql: &'a str, params: &'a [&'a (dyn ToSql + Sync)])
    -> BoxFuture<'a, Vec<Row>>;

    /// Run one or more statements without parameters.
    fn batch_execute<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, ()>;
}

impl Connection for tokio_postgres::Client {
    fn query<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [&'a (dyn ToSql + Sync)],
    ) -> BoxFuture<'a, Vec<Row>> {
        Box::pin(tokio_postgres::Client::query(self, sql, params))
    }

    fn batch_execute<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(tokio_postgres::Client::batch_execute(self, sql))
    }
}

impl Connection for tokio_postgres::Transaction<'_> {
    fn query<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [&'a (dyn ToSql + Sync)],
    ) -> BoxFuture<'a, Vec<Row>> {
        Box::pin(tokio_postgres::Transaction::query(self, sql, params))
    }

    fn batch_execute<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(tokio_postgres::Transaction::batch_execute(self, sql))
    }
}

/// Logs every call on the wrapped connection. `driver` names the dialect in
/// errors, since postgres, cockroachdb and timescaledb share this wrapper.
pub struct TracedConn<'a, C: Connection> {
    conn: &'a C,
    driver: DriverKind,
}

impl<'a, C: Connection> TracedConn<'a, C> {
    pub fn new(conn: &'a C, driver: DriverKind) -> Self {
        Self { conn, driver }
    }

    pub fn driver(&self) -> DriverKind {
        self.driver
    }

    pub async fn query(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<Row>, Error> {
        let span = tracing::debug_span!(
            "db.query",
            sql = %sql,
            params = params.len(),
            rows = tracing::field::Empty,
        );
        let rows = self
            .conn
            .query(sql, params)
            .instrument(span.clone())
            .await?;
        span.record("rows", rows.len());
        Ok(rows)
    }

    pub async fn execute(&self, sql: &str) -> Result<(), Error> {
        let span = tracing::debug_span!("db.execute", sql = %sql);
        self.conn.batch_execute(sql).instrument(span).await
    }
}

#[async_trait]
impl<C: Connection> Executor for TracedConn<'_, C> {
    async fn execute(&mut self, statement: &str) -> Result<(), BoxError> {
        TracedConn::execute(self, statement).await?;
        Ok(())
    }
}

#[async_trait]
impl<C: Connection> RowLookup for TracedConn<'_, C> {
    async fn fetch_row(&mut self, sql: &str) -> crate::Result<Option<Vec<Option<String>>>> {
        let driver = self.driver;
        let rows = self
            .query(sql, &[])
            .await
            .map_err(|e| crate::Error::introspection(driver, e))?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };
        let mut values = Vec::with_capacity(row.len());
        for i in 0..row.len() {
            let value: Option<String> = row
                .try_get(i)
                .map_err(|e| crate::Error::introspection(driver, e))?;
            values.push(value);
        }
        Ok(Some(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct IdleConn;

    impl Connection for IdleConn {
        fn query<'a>(
            &'a self,
            _sql: &'a str,
            _params: &'a [&'a (dyn ToSql + Sync)],
        ) -> BoxFuture<'a, Vec<Row>> {
            Box::pin(std::future::pending())
        }

        fn batch_execute<'a>(&'a self, _sql: &'a str) -> BoxFuture<'a, ()> {
            Box::pin(std::future::pending())
        }
    }

    #[test]
    fn test_traced_conn_keeps_driver() {
        for driver in [
            DriverKind::Postgres,
            DriverKind::CockroachDb,
            DriverKind::TimescaleDb,
        ] {
            assert_eq!(TracedConn::new(&IdleConn, driver).driver(), driver);
        }
    }
}
