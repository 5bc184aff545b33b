//! Specification types for keel.
//!
//! This crate contains the decoded shape of table and type specifications,
//! as they arrive from disk or from a controller, plus the loader that
//! decodes them. It has no knowledge of how a database is reached; the
//! `keel` crate consumes these values and plans against live targets.
//!
//! A table spec carries one schema block per dialect. Only the block that
//! matches the configured [`DriverKind`] is ever looked at:
//!
//! ```yaml
//! name: users
//! schema:
//!   postgres:
//!     primaryKey: [id]
//!     columns:
//!       - name: id
//!         type: integer
//!       - name: email
//!         type: text
//! ```

use std::fmt;
use std::str::FromStr;

mod cassandra;
mod error;
pub mod loader;
mod seed;
mod spec;
mod table;

pub use cassandra::{
    CassandraClusteringColumn, CassandraColumn, CassandraDataTypeSchema, CassandraField,
    CassandraIndex, CassandraTableSchema,
};
pub use error::SpecError;
pub use loader::{decode_table_spec, parse_table_spec, parse_type_spec};
pub use seed::{SeedData, SeedRow, SeedValue};
pub use spec::{
    DataTypeSpec, DialectSchema, DialectSchemas, DialectTypeSchema, DialectTypeSchemas, TableSpec,
};
pub use table::{
    ColumnAttributes, ColumnConstraints, ColumnSpec, ForeignKeyReference, ForeignKeySpec,
    HypertableSpec, IndexSpec, MysqlTableSchema, PostgresTableSchema, SqliteTableSchema,
    TimescaleTableSchema,
};

/// Result type for spec operations.
pub type Result<T> = std::result::Result<T, SpecError>;

/// The closed set of database dialects keel can reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DriverKind {
    Postgres,
    Mysql,
    CockroachDb,
    Sqlite,
    Rqlite,
    TimescaleDb,
    Cassandra,
}

impl DriverKind {
    /// Every supported driver, in a stable order.
    pub const ALL: [DriverKind; 7] = [
        DriverKind::Postgres,
        DriverKind::Mysql,
        DriverKind::CockroachDb,
        DriverKind::Sqlite,
        DriverKind::Rqlite,
        DriverKind::TimescaleDb,
        DriverKind::Cassandra,
    ];

    /// The identifier used in configuration and in spec schema blocks.
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverKind::Postgres => "postgres",
            DriverKind::Mysql => "mysql",
            DriverKind::CockroachDb => "cockroachdb",
            DriverKind::Sqlite => "sqlite",
            DriverKind::Rqlite => "rqlite",
            DriverKind::TimescaleDb => "timescaledb",
            DriverKind::Cassandra => "cassandra",
        }
    }

    /// Whether targets of this kind are addressed by a single URI.
    ///
    /// Cassandra is the only exception: it takes a host list plus
    /// credentials and a keyspace.
    pub fn uses_uri(&self) -> bool {
        !matches!(self, DriverKind::Cassandra)
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DriverKind {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self> {
        DriverKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| SpecError::UnknownDriver(s.to_string()))
    }
}

impl serde::Serialize for DriverKind {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> serde::Deserialize<'de> for DriverKind {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests;
