use serde::{Deserialize, Serialize};

use crate::{
    CassandraDataTypeSchema, CassandraTableSchema, DriverKind, MysqlTableSchema,
    PostgresTableSchema, Result, SeedData, SpecError, SqliteTableSchema, TimescaleTableSchema,
};

/// A desired table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<DialectSchemas>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed_data: Option<SeedData>,
}

impl TableSpec {
    /// The schema block for `kind`, if the spec carries one.
    pub fn schema_for(&self, kind: DriverKind) -> Option<DialectSchema<'_>> {
        self.schema.as_ref().and_then(|s| s.get(kind))
    }

    /// Structural checks that do not depend on the target dialect.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(SpecError::EmptyName);
        }
        match &self.schema {
            Some(schemas) if !schemas.kinds().is_empty() => {}
            _ => {
                return Err(SpecError::NoSchema {
                    name: self.name.clone(),
                });
            }
        }
        if let Some(seed) = &self.seed_data {
            for (i, row) in seed.rows.iter().enumerate() {
                if row.columns.is_empty() {
                    return Err(SpecError::InvalidSeed {
                        table: self.name.clone(),
                        reason: format!("row {i} has no columns"),
                    });
                }
            }
        }
        Ok(())
    }
}

/// One optional schema block per dialect.
///
/// Several blocks may be present; a driver only ever reads its own.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialectSchemas {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postgres: Option<PostgresTableSchema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mysql: Option<MysqlTableSchema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cockroachdb: Option<PostgresTableSchema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sqlite: Option<SqliteTableSchema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rqlite: Option<SqliteTableSchema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timescaledb: Option<TimescaleTableSchema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cassandra: Option<CassandraTableSchema>,
}

impl DialectSchemas {
    pub fn get(&self, kind: DriverKind) -> Option<DialectSchema<'_>> {
        match kind {
            DriverKind::Postgres => self.postgres.as_ref().map(DialectSchema::Postgres),
            DriverKind::Mysql => self.mysql.as_ref().map(DialectSchema::Mysql),
            DriverKind::CockroachDb => self.cockroachdb.as_ref().map(DialectSchema::CockroachDb),
            DriverKind::Sqlite => self.sqlite.as_ref().map(DialectSchema::Sqlite),
            DriverKind::Rqlite => self.rqlite.as_ref().map(DialectSchema::Rqlite),
            DriverKind::TimescaleDb => self.timescaledb.as_ref().map(DialectSchema::TimescaleDb),
            DriverKind::Cassandra => self.cassandra.as_ref().map(DialectSchema::Cassandra),
        }
    }

    /// Dialects with a populated block.
    pub fn kinds(&self) -> Vec<DriverKind> {
        DriverKind::ALL
            .into_iter()
            .filter(|kind| self.get(*kind).is_some())
            .collect()
    }
}

/// A borrowed, tagged schema block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DialectSchema<'a> {
    Postgres(&'a PostgresTableSchema),
    Mysql(&'a MysqlTableSchema),
    CockroachDb(&'a PostgresTableSchema),
    Sqlite(&'a SqliteTableSchema),
    Rqlite(&'a SqliteTableSchema),
    TimescaleDb(&'a TimescaleTableSchema),
    Cassandra(&'a CassandraTableSchema),
}

impl DialectSchema<'_> {
    pub fn kind(&self) -> DriverKind {
        match self {
            DialectSchema::Postgres(_) => DriverKind::Postgres,
            DialectSchema::Mysql(_) => DriverKind::Mysql,
            DialectSchema::CockroachDb(_) => DriverKind::CockroachDb,
            DialectSchema::Sqlite(_) => DriverKind::Sqlite,
            DialectSchema::Rqlite(_) => DriverKind::Rqlite,
            DialectSchema::TimescaleDb(_) => DriverKind::TimescaleDb,
            DialectSchema::Cassandra(_) => DriverKind::Cassandra,
        }
    }

    /// Whether the block asks for the table to be dropped.
    pub fn is_deleted(&self) -> bool {
        match self {
            DialectSchema::Postgres(s) | DialectSchema::CockroachDb(s) => s.is_deleted,
            DialectSchema::Mysql(s) => s.table.is_deleted,
            DialectSchema::Sqlite(s) | DialectSchema::Rqlite(s) => s.table.is_deleted,
            DialectSchema::TimescaleDb(s) => s.table.is_deleted,
            DialectSchema::Cassandra(s) => s.is_deleted,
        }
    }
}

/// A desired user-defined type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataTypeSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<DialectTypeSchemas>,
}

impl DataTypeSpec {
    pub fn schema_for(&self, kind: DriverKind) -> Option<DialectTypeSchema<'_>> {
        self.schema.as_ref().and_then(|s| s.get(kind))
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(SpecError::EmptyName);
        }
        if self.schema.as_ref().is_none_or(|s| s.cassandra.is_none()) {
            return Err(SpecError::NoSchema {
                name: self.name.clone(),
            });
        }
        Ok(())
    }
}

/// Only the wide-column dialect has user-defined types.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialectTypeSchemas {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cassandra: Option<CassandraDataTypeSchema>,
}

impl DialectTypeSchemas {
    pub fn get(&self, kind: DriverKind) -> Option<DialectTypeSchema<'_>> {
        match kind {
            DriverKind::Cassandra => self.cassandra.as_ref().map(DialectTypeSchema::Cassandra),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DialectTypeSchema<'a> {
    Cassandra(&'a CassandraDataTypeSchema),
}
