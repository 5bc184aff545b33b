//! Change ordering.
//!
//! Changes are first grouped by phase (columns, then indexes, then
//! constraints) and, inside a phase, drops before alters before adds. They
//! are then scheduled one by one against a virtual copy of the live table,
//! always taking the earliest change whose preconditions hold:
//!
//! - a column cannot be dropped while an index, foreign key or the primary
//!   key still references it;
//! - an index or constraint cannot be added before its columns exist.
//!
//! ```text
//! -- This fails:
//! ALTER TABLE users DROP COLUMN email;   -- idx_users_email still uses it
//! DROP INDEX idx_users_email;
//!
//! -- This works:
//! DROP INDEX idx_users_email;
//! ALTER TABLE users DROP COLUMN email;
//! ```

use std::collections::HashSet;

use crate::diff::Change;
use crate::schema::{ForeignKey, Index, Table};

/// Error when a set of changes cannot be applied in any order.
#[derive(Debug, Clone, PartialEq)]
pub enum SolverError {
    /// A change requires a column that doesn't exist.
    ColumnNotFound {
        change: String,
        table: String,
        column: String,
    },
    /// A change requires a column to NOT exist, but it does.
    ColumnAlreadyExists {
        change: String,
        table: String,
        column: String,
    },
    /// A column is still referenced and cannot be dropped.
    ColumnInUse {
        change: String,
        table: String,
        column: String,
        used_by: String,
    },
    /// A primary key is added while another one is in place.
    PrimaryKeyExists { change: String, table: String },
}

impl std::fmt::Display for SolverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SolverError::ColumnNotFound {
                change,
                table,
                column,
            } => {
                write!(f, "{}: column '{}.{}' does not exist", change, table, column)
            }
            SolverError::ColumnAlreadyExists {
                change,
                table,
                column,
            } => {
                write!(f, "{}: column '{}.{}' already exists", change, table, column)
            }
            SolverError::ColumnInUse {
                change,
                table,
                column,
                used_by,
            } => {
                write!(
                    f,
                    "{}: column '{}.{}' is still used by {}",
                    change, table, column, used_by
                )
            }
            SolverError::PrimaryKeyExists { change, table } => {
                write!(f, "{}: table '{}' already has a primary key", change, table)
            }
        }
    }
}

impl std::error::Error for SolverError {}

/// Virtual representation of a table for simulation.
#[derive(Debug, Clone)]
pub struct VirtualTable {
    name: String,
    columns: HashSet<String>,
    primary_key: Vec<String>,
    indexes: Vec<Index>,
    foreign_keys: Vec<ForeignKey>,
}

impl VirtualTable {
    pub fn from_table(table: &Table) -> Self {
        VirtualTable {
            name: table.name.clone(),
            columns: table.columns.iter().map(|c| c.name.clone()).collect(),
            primary_key: table.primary_key.clone(),
            indexes: table.indexes.clone(),
            foreign_keys: table.foreign_keys.clone(),
        }
    }

    pub fn column_exists(&self, column: &str) -> bool {
        self.columns.contains(column)
    }

    fn require_columns<'a>(
        &self,
        change: &Change,
        columns: impl IntoIterator<Item = &'a String>,
    ) -> Result<(), SolverError> {
        for column in columns {
            if !self.column_exists(column) {
                return Err(SolverError::ColumnNotFound {
                    change: change.to_string(),
                    table: self.name.clone(),
                    column: column.clone(),
                });
            }
        }
        Ok(())
    }

    fn user_of(&self, column: &str) -> Option<String> {
        if self.primary_key.iter().any(|c| c == column) {
            return Some("the primary key".to_string());
        }
        if let Some(idx) = self
            .indexes
            .iter()
            .find(|i| i.columns.iter().any(|c| c == column))
        {
            return Some(format!("index {}", idx.name));
        }
        self.foreign_keys
            .iter()
            .find(|fk| fk.columns.iter().any(|c| c == column))
            .map(|fk| format!("foreign key ({})", fk.columns.join(", ")))
    }

    /// Apply a change, validating preconditions.
    pub fn apply(&mut self, change: &Change) -> Result<(), SolverError> {
        match change {
            Change::AddColumn(col) => {
                if self.column_exists(&col.name) {
                    return Err(SolverError::ColumnAlreadyExists {
                        change: change.to_string(),
                        table: self.name.clone(),
                        column: col.name.clone(),
                    });
                }
                self.columns.insert(col.name.clone());
            }

            Change::DropColumn(name) => {
                self.require_columns(change, [name])?;
                if let Some(used_by) = self.user_of(name) {
                    return Err(SolverError::ColumnInUse {
                        change: change.to_string(),
                        table: self.name.clone(),
                        column: name.clone(),
                        used_by,
                    });
                }
                self.columns.remove(name);
            }

            Change::AlterColumn { to, .. } => {
                self.require_columns(change, [&to.name])?;
            }

            Change::AddIndex(idx) => {
                self.require_columns(change, &idx.columns)?;
                self.indexes.push(idx.clone());
            }

            Change::DropIndex(idx) => {
                self.indexes.retain(|i| i.key() != idx.key());
            }

            Change::AddPrimaryKey(columns) => {
                if !self.primary_key.is_empty() {
                    return Err(SolverError::PrimaryKeyExists {
                        change: change.to_string(),
                        table: self.name.clone(),
                    });
                }
                self.require_columns(change, columns)?;
                self.primary_key = columns.clone();
            }

            Change::DropPrimaryKey { .. } => {
                self.primary_key.clear();
            }

            Change::AddForeignKey(fk) => {
                self.require_columns(change, &fk.columns)?;
                self.foreign_keys.push(fk.clone());
            }

            Change::DropForeignKey(fk) => {
                self.foreign_keys.retain(|f| f.key() != fk.key());
            }
        }

        Ok(())
    }

    /// Check if a change can be applied (without actually applying it).
    pub fn can_apply(&self, change: &Change) -> bool {
        let mut clone = self.clone();
        clone.apply(change).is_ok()
    }
}

/// Order changes so that each one's preconditions hold when it runs.
///
/// Fails with the first blocking precondition when no order works.
pub fn order_changes(
    current: &Table,
    mut changes: Vec<Change>,
) -> Result<Vec<Change>, SolverError> {
    changes.sort_by_key(|c| (c.phase(), c.rank()));

    let mut table = VirtualTable::from_table(current);
    let mut pending = changes;
    let mut ordered = Vec::with_capacity(pending.len());

    while !pending.is_empty() {
        let Some(pos) = pending.iter().position(|c| table.can_apply(c)) else {
            // Nothing applies: surface why the earliest pending change is stuck.
            for change in &pending {
                table.apply(change)?;
            }
            break;
        };
        let change = pending.remove(pos);
        table.apply(&change)?;
        ordered.push(change);
    }

    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Column;

    fn make_column(name: &str) -> Column {
        Column {
            name: name.to_string(),
            data_type: "integer".to_string(),
            nullable: true,
            ..Default::default()
        }
    }

    fn make_table(columns: &[&str]) -> Table {
        Table {
            name: "t".to_string(),
            columns: columns.iter().map(|c| make_column(c)).collect(),
            ..Default::default()
        }
    }

    fn make_index(name: &str, columns: &[&str]) -> Index {
        Index {
            name: name.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique: false,
        }
    }

    #[test]
    fn test_phases_column_then_index_then_constraint() {
        let current = make_table(&["id"]);
        let changes = vec![
            Change::AddPrimaryKey(vec!["id".into()]),
            Change::AddIndex(make_index("idx_t_a", &["a"])),
            Change::AddColumn(make_column("a")),
        ];
        let ordered = order_changes(&current, changes).unwrap();
        let phases: Vec<_> = ordered.iter().map(Change::to_string).collect();
        assert_eq!(
            phases,
            vec!["+ a: integer (nullable)", "+ INDEX idx_t_a (a)", "+ PRIMARY KEY (id)"]
        );
    }

    #[test]
    fn test_drop_index_before_drop_column() {
        let mut current = make_table(&["id", "email"]);
        current.indexes.push(make_index("idx_t_email", &["email"]));
        let changes = vec![
            Change::DropColumn("email".into()),
            Change::DropIndex(make_index("idx_t_email", &["email"])),
        ];
        let ordered = order_changes(&current, changes).unwrap();
        assert!(matches!(ordered[0], Change::DropIndex(_)));
        assert!(matches!(ordered[1], Change::DropColumn(_)));
    }

    #[test]
    fn test_drop_primary_key_before_drop_column() {
        let mut current = make_table(&["id", "uuid"]);
        current.primary_key = vec!["uuid".into()];
        let changes = vec![
            Change::DropColumn("uuid".into()),
            Change::DropPrimaryKey {
                name: None,
                columns: vec!["uuid".into()],
            },
            Change::AddPrimaryKey(vec!["id".into()]),
        ];
        let ordered = order_changes(&current, changes).unwrap();
        assert!(matches!(ordered[0], Change::DropPrimaryKey { .. }));
        assert!(matches!(ordered[1], Change::DropColumn(_)));
        assert!(matches!(ordered[2], Change::AddPrimaryKey(_)));
    }

    #[test]
    fn test_dropping_column_still_indexed_fails() {
        let mut current = make_table(&["id", "email"]);
        current.indexes.push(make_index("idx_t_email", &["email"]));
        let err = order_changes(&current, vec![Change::DropColumn("email".into())]).unwrap_err();
        assert!(matches!(err, SolverError::ColumnInUse { .. }));
        assert_eq!(
            err.to_string(),
            "- email: column 't.email' is still used by index idx_t_email"
        );
    }

    #[test]
    fn test_index_on_missing_column_fails() {
        let current = make_table(&["id"]);
        let err = order_changes(&current, vec![Change::AddIndex(make_index("i", &["nope"]))])
            .unwrap_err();
        assert!(matches!(err, SolverError::ColumnNotFound { .. }));
    }
}
