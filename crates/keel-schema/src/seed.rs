//! Seed data: rows a table must contain after convergence.
//!
//! ```yaml
//! seedData:
//!   rows:
//!     - columns:
//!         - column: id
//!           value:
//!             int: 1
//!         - column: name
//!           value:
//!             str: a
//! ```

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::SpecError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeedData {
    #[serde(default)]
    pub rows: Vec<SeedRow>,
}

impl SeedData {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// One desired row, keyed by column name in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSeedRow", into = "RawSeedRow")]
pub struct SeedRow {
    pub columns: IndexMap<String, SeedValue>,
}

impl SeedRow {
    pub fn get(&self, column: &str) -> Option<&SeedValue> {
        self.columns.get(column)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.columns.contains_key(column)
    }
}

impl<K: Into<String>> FromIterator<(K, SeedValue)> for SeedRow {
    fn from_iter<I: IntoIterator<Item = (K, SeedValue)>>(iter: I) -> Self {
        SeedRow {
            columns: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSeedValue", into = "RawSeedValue")]
pub enum SeedValue {
    Int(i64),
    Str(String),
    Bool(bool),
    Float(f64),
    Null,
}

impl SeedValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SeedValue::Null)
    }
}

/// Renders the value the way a database returns it as text, which is the
/// form seed rows are compared in.
impl fmt::Display for SeedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeedValue::Int(v) => write!(f, "{v}"),
            SeedValue::Str(v) => f.write_str(v),
            SeedValue::Bool(v) => write!(f, "{v}"),
            SeedValue::Float(v) => write!(f, "{v}"),
            SeedValue::Null => f.write_str("NULL"),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct RawSeedRow {
    #[serde(default)]
    columns: Vec<RawSeedColumn>,
}

#[derive(Serialize, Deserialize)]
struct RawSeedColumn {
    column: String,
    #[serde(default = "null_value")]
    value: SeedValue,
}

fn null_value() -> SeedValue {
    SeedValue::Null
}

#[derive(Default, Serialize, Deserialize)]
struct RawSeedValue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    int: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    str: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bool: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    float: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    null: Option<bool>,
}

impl TryFrom<RawSeedRow> for SeedRow {
    type Error = SpecError;

    fn try_from(raw: RawSeedRow) -> Result<Self, SpecError> {
        let mut columns = IndexMap::with_capacity(raw.columns.len());
        for col in raw.columns {
            if col.column.is_empty() {
                return Err(SpecError::InvalidSeedValue(
                    "seed column name must not be empty".to_string(),
                ));
            }
            if columns.insert(col.column.clone(), col.value).is_some() {
                return Err(SpecError::InvalidSeedValue(format!(
                    "column {:?} appears twice in one row",
                    col.column
                )));
            }
        }
        Ok(SeedRow { columns })
    }
}

impl From<SeedRow> for RawSeedRow {
    fn from(row: SeedRow) -> Self {
        RawSeedRow {
            columns: row
                .columns
                .into_iter()
                .map(|(column, value)| RawSeedColumn { column, value })
                .collect(),
        }
    }
}

impl TryFrom<RawSeedValue> for SeedValue {
    type Error = SpecError;

    fn try_from(raw: RawSeedValue) -> Result<Self, SpecError> {
        let mut found = Vec::new();
        if let Some(v) = raw.int {
            found.push(SeedValue::Int(v));
        }
        if let Some(v) = raw.str {
            found.push(SeedValue::Str(v));
        }
        if let Some(v) = raw.bool {
            found.push(SeedValue::Bool(v));
        }
        if let Some(v) = raw.float {
            found.push(SeedValue::Float(v));
        }
        if raw.null == Some(true) {
            found.push(SeedValue::Null);
        }
        match found.len() {
            0 => Ok(SeedValue::Null),
            1 => Ok(found.remove(0)),
            n => Err(SpecError::InvalidSeedValue(format!(
                "expected exactly one of int, str, bool, float, null; got {n}"
            ))),
        }
    }
}

impl From<SeedValue> for RawSeedValue {
    fn from(value: SeedValue) -> Self {
        let mut raw = RawSeedValue::default();
        match value {
            SeedValue::Int(v) => raw.int = Some(v),
            SeedValue::Str(v) => raw.str = Some(v),
            SeedValue::Bool(v) => raw.bool = Some(v),
            SeedValue::Float(v) => raw.float = Some(v),
            SeedValue::Null => raw.null = Some(true),
        }
        raw
    }
}
