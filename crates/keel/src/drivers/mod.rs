//! Dialect drivers.
//!
//! Each driver turns its own schema block into a [`crate::schema::Table`],
//! introspects the live table into the same shape, and renders the diff in
//! its own SQL (or CQL). Connections are opened per call.

mod cassandra;
mod common;
mod mysql;
mod postgres;
mod rqlite;
mod sqlite;
mod timescale;

pub use cassandra::CassandraDriver;
pub use mysql::{MysqlDialect, MysqlDriver};
pub use postgres::{Flavor, PostgresDialect, PostgresDriver};
pub use rqlite::RqliteDriver;
pub use sqlite::{SqliteDialect, SqliteDriver};
pub use timescale::TimescaleDriver;
