//! Canonical in-memory table description.
//!
//! Both sides of a diff are lowered into these types: the desired side from
//! a spec's schema block, the live side from introspection. Drivers then
//! canonicalize both symmetrically (see [`crate::plan::canonicalize`]).

use std::collections::HashSet;

use keel_schema::{ColumnSpec, ForeignKeySpec, IndexSpec, PostgresTableSchema};

use crate::sql::{index_name, unique_index_name};
use crate::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    /// Primary key columns, in key order. Empty means no primary key.
    pub primary_key: Vec<String>,
    /// Live constraint name of the primary key, when known.
    pub primary_key_name: Option<String>,
    pub indexes: Vec<Index>,
    pub foreign_keys: Vec<ForeignKey>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    /// Raw SQL default expression.
    pub default: Option<String>,
    pub auto_increment: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Index {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

impl Index {
    /// Identity used when diffing: names are ignored.
    pub fn key(&self) -> String {
        format!(
            "{}:{}",
            if self.unique { "U" } else { "" },
            self.columns.join(",")
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForeignKey {
    /// Constraint name, when declared or introspected.
    pub name: Option<String>,
    pub columns: Vec<String>,
    pub references_table: String,
    pub references_columns: Vec<String>,
    /// Upper-case referential action; `None` means the engine default.
    pub on_delete: Option<String>,
}

impl ForeignKey {
    /// Identity used when diffing: names are ignored.
    pub fn key(&self) -> String {
        format!(
            "{}->{}({}) {}",
            self.columns.join(","),
            self.references_table,
            self.references_columns.join(","),
            self.on_delete.as_deref().unwrap_or("NO ACTION")
        )
    }
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Table {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Lower a SQL schema block into the canonical model, rejecting
    /// structurally invalid input.
    pub fn from_spec(name: &str, schema: &PostgresTableSchema) -> Result<Table> {
        if schema.columns.is_empty() {
            return Err(Error::invalid(name, "table has no columns"));
        }

        let mut seen = HashSet::new();
        for col in &schema.columns {
            if col.name.is_empty() {
                return Err(Error::invalid(name, "column with an empty name"));
            }
            if col.data_type.trim().is_empty() {
                return Err(Error::invalid(
                    name,
                    format!("column {:?} has no type", col.name),
                ));
            }
            if !seen.insert(col.name.as_str()) {
                return Err(Error::invalid(
                    name,
                    format!("column {:?} is declared twice", col.name),
                ));
            }
        }

        let known = |col: &str| seen.contains(col);

        for col in &schema.primary_key {
            if !known(col.as_str()) {
                return Err(Error::invalid(
                    name,
                    format!("primary key references unknown column {col:?}"),
                ));
            }
        }

        let mut table = Table {
            name: name.to_string(),
            columns: schema.columns.iter().map(column_from_spec).collect(),
            primary_key: schema.primary_key.clone(),
            primary_key_name: None,
            indexes: Vec::with_capacity(schema.indexes.len()),
            foreign_keys: Vec::with_capacity(schema.foreign_keys.len()),
        };

        for idx in &schema.indexes {
            if idx.columns.is_empty() {
                return Err(Error::invalid(name, "index with no columns"));
            }
            if let Some(col) = idx.columns.iter().find(|c| !known(c.as_str())) {
                return Err(Error::invalid(
                    name,
                    format!("index references unknown column {col:?}"),
                ));
            }
            table.indexes.push(index_from_spec(name, idx));
        }

        for fk in &schema.foreign_keys {
            if fk.columns.is_empty() || fk.references.table.is_empty() {
                return Err(Error::invalid(name, "incomplete foreign key"));
            }
            if fk.columns.len() != fk.references.columns.len() {
                return Err(Error::invalid(
                    name,
                    format!(
                        "foreign key ({}) lists {} referenced columns",
                        fk.columns.join(", "),
                        fk.references.columns.len()
                    ),
                ));
            }
            if let Some(col) = fk.columns.iter().find(|c| !known(c.as_str())) {
                return Err(Error::invalid(
                    name,
                    format!("foreign key references unknown column {col:?}"),
                ));
            }
            table.foreign_keys.push(foreign_key_from_spec(fk));
        }

        table.normalize();
        Ok(table)
    }

    /// Apply the dialect-independent rules: primary key columns are
    /// never nullable, and referential actions are upper-cased.
    pub fn normalize(&mut self) {
        for col in &mut self.columns {
            if self.primary_key.contains(&col.name) {
                col.nullable = false;
            }
        }
        for fk in &mut self.foreign_keys {
            fk.on_delete = fk
                .on_delete
                .take()
                .map(|a| a.trim().to_ascii_uppercase())
                .filter(|a| !a.is_empty() && a != "NO ACTION");
        }
    }
}

fn column_from_spec(spec: &ColumnSpec) -> Column {
    Column {
        name: spec.name.clone(),
        data_type: spec.data_type.trim().to_string(),
        nullable: !spec.is_not_null(),
        default: spec.default.clone(),
        auto_increment: spec.is_auto_increment(),
    }
}

fn index_from_spec(table: &str, spec: &IndexSpec) -> Index {
    let name = spec.name.clone().unwrap_or_else(|| {
        if spec.is_unique {
            unique_index_name(table, &spec.columns)
        } else {
            index_name(table, &spec.columns)
        }
    });
    Index {
        name,
        columns: spec.columns.clone(),
        unique: spec.is_unique,
    }
}

fn foreign_key_from_spec(spec: &ForeignKeySpec) -> ForeignKey {
    ForeignKey {
        name: spec.name.clone(),
        columns: spec.columns.clone(),
        references_table: spec.references.table.clone(),
        references_columns: spec.references.columns.clone(),
        on_delete: spec.on_delete.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_schema::{ColumnConstraints, ForeignKeyReference};

    fn make_column(name: &str, data_type: &str) -> ColumnSpec {
        ColumnSpec {
            name: name.to_string(),
            data_type: data_type.to_string(),
            ..Default::default()
        }
    }

    fn make_schema(columns: Vec<ColumnSpec>) -> PostgresTableSchema {
        PostgresTableSchema {
            columns,
            ..Default::default()
        }
    }

    #[test]
    fn test_zero_columns_is_invalid() {
        let err = Table::from_spec("users", &make_schema(vec![])).unwrap_err();
        assert!(matches!(err, Error::InvalidSchema { .. }), "{err}");
    }

    #[test]
    fn test_duplicate_column_is_invalid() {
        let schema = make_schema(vec![make_column("id", "int"), make_column("id", "int")]);
        assert!(Table::from_spec("users", &schema).is_err());
    }

    #[test]
    fn test_primary_key_columns_become_not_null() {
        let mut schema =
            make_schema(vec![make_column("id", "integer"), make_column("email", "text")]);
        schema.primary_key = vec!["id".into()];
        let table = Table::from_spec("users", &schema).unwrap();
        assert!(!table.column("id").unwrap().nullable);
        assert!(table.column("email").unwrap().nullable);
    }

    #[test]
    fn test_not_null_constraint() {
        let mut email = make_column("email", "text");
        email.constraints = Some(ColumnConstraints {
            not_null: Some(true),
        });
        let table = Table::from_spec("users", &make_schema(vec![email])).unwrap();
        assert!(!table.columns[0].nullable);
    }

    #[test]
    fn test_unknown_primary_key_column() {
        let mut schema = make_schema(vec![make_column("id", "integer")]);
        schema.primary_key = vec!["uuid".into()];
        assert!(Table::from_spec("users", &schema).is_err());
    }

    #[test]
    fn test_index_gets_generated_name() {
        let mut schema = make_schema(vec![make_column("email", "text")]);
        schema.indexes = vec![IndexSpec {
            name: None,
            columns: vec!["email".into()],
            is_unique: true,
        }];
        let table = Table::from_spec("users", &schema).unwrap();
        assert_eq!(table.indexes[0].name, "uq_users_email");
    }

    #[test]
    fn test_foreign_key_arity_mismatch() {
        let mut schema = make_schema(vec![make_column("author_id", "integer")]);
        schema.foreign_keys = vec![ForeignKeySpec {
            name: None,
            columns: vec!["author_id".into()],
            references: ForeignKeyReference {
                table: "users".into(),
                columns: vec![],
            },
            on_delete: None,
        }];
        assert!(Table::from_spec("posts", &schema).is_err());
    }

    #[test]
    fn test_on_delete_is_normalized() {
        let mut schema = make_schema(vec![make_column("author_id", "integer")]);
        schema.foreign_keys = vec![ForeignKeySpec {
            name: None,
            columns: vec!["author_id".into()],
            references: ForeignKeyReference {
                table: "users".into(),
                columns: vec!["id".into()],
            },
            on_delete: Some("cascade".into()),
        }];
        let table = Table::from_spec("posts", &schema).unwrap();
        assert_eq!(table.foreign_keys[0].on_delete.as_deref(), Some("CASCADE"));

        let mut fk = table.foreign_keys[0].clone();
        fk.on_delete = Some("no action".into());
        let mut t = Table::new("posts");
        t.foreign_keys.push(fk);
        t.normalize();
        assert_eq!(t.foreign_keys[0].on_delete, None);
    }
}
