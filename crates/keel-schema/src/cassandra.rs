//! Schema blocks for the wide-column dialect.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CassandraTableSchema {
    /// Partition key columns, in order. A single entry is a simple key.
    #[serde(default)]
    pub partition_key: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clustering_key: Vec<CassandraClusteringColumn>,
    #[serde(default)]
    pub columns: Vec<CassandraColumn>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<CassandraIndex>,
    #[serde(default)]
    pub is_deleted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CassandraClusteringColumn {
    pub name: String,
    #[serde(default)]
    pub descending: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CassandraColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default)]
    pub is_static: bool,
}

/// A secondary index on a single column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CassandraIndex {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub column: String,
}

/// A user-defined type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CassandraDataTypeSchema {
    #[serde(default)]
    pub fields: Vec<CassandraField>,
    #[serde(default)]
    pub is_deleted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CassandraField {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
}
