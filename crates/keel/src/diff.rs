//! Table diffing: compare a desired table against its live counterpart.
//!
//! Columns are matched by name. Indexes and foreign keys are matched by
//! definition, so a differently named but otherwise identical index on the
//! live side counts as present.
//!
//! There is no rename detection. A renamed column shows up as an add of the
//! new name, plus a drop of the old one when [`DiffPolicy::drop_columns`] is
//! set; otherwise both columns coexist.

use std::collections::HashSet;
use std::fmt;

use crate::schema::{Column, ForeignKey, Index, Table};

/// Knobs that decide which destructive changes the diff may emit.
///
/// This is the only place column removal is decided.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffPolicy {
    /// Emit `DropColumn` for live columns missing from the spec.
    pub drop_columns: bool,
}

/// A single change to an existing table.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    AddColumn(Column),
    DropColumn(String),
    /// Type, nullability, default or auto-increment differ.
    AlterColumn { from: Column, to: Column },
    AddIndex(Index),
    DropIndex(Index),
    AddPrimaryKey(Vec<String>),
    DropPrimaryKey {
        name: Option<String>,
        columns: Vec<String>,
    },
    AddForeignKey(ForeignKey),
    DropForeignKey(ForeignKey),
}

/// Statement groups, emitted in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChangePhase {
    Column,
    Index,
    Constraint,
}

impl Change {
    pub fn phase(&self) -> ChangePhase {
        match self {
            Change::AddColumn(_) | Change::DropColumn(_) | Change::AlterColumn { .. } => {
                ChangePhase::Column
            }
            Change::AddIndex(_) | Change::DropIndex(_) => ChangePhase::Index,
            Change::AddPrimaryKey(_)
            | Change::DropPrimaryKey { .. }
            | Change::AddForeignKey(_)
            | Change::DropForeignKey(_) => ChangePhase::Constraint,
        }
    }

    /// Drops sort before alters, alters before adds.
    pub(crate) fn rank(&self) -> u8 {
        match self {
            Change::DropColumn(_)
            | Change::DropIndex(_)
            | Change::DropPrimaryKey { .. }
            | Change::DropForeignKey(_) => 0,
            Change::AlterColumn { .. } => 1,
            Change::AddColumn(_)
            | Change::AddIndex(_)
            | Change::AddPrimaryKey(_)
            | Change::AddForeignKey(_) => 2,
        }
    }

    pub fn is_destructive(&self) -> bool {
        matches!(self, Change::DropColumn(_))
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Change::AddColumn(col) => {
                let nullable = if col.nullable { " (nullable)" } else { "" };
                write!(f, "+ {}: {}{}", col.name, col.data_type, nullable)
            }
            Change::DropColumn(name) => write!(f, "- {}", name),
            Change::AlterColumn { from, to } => {
                write!(f, "~ {}:", to.name)?;
                if from.data_type != to.data_type {
                    write!(f, " {} -> {}", from.data_type, to.data_type)?;
                }
                if from.nullable != to.nullable {
                    let n = |b: bool| if b { "nullable" } else { "not null" };
                    write!(f, " {} -> {}", n(from.nullable), n(to.nullable))?;
                }
                if from.default != to.default {
                    write!(
                        f,
                        " default {} -> {}",
                        from.default.as_deref().unwrap_or("(none)"),
                        to.default.as_deref().unwrap_or("(none)")
                    )?;
                }
                if from.auto_increment != to.auto_increment {
                    write!(f, " auto_increment {} -> {}", from.auto_increment, to.auto_increment)?;
                }
                Ok(())
            }
            Change::AddIndex(idx) => {
                let unique = if idx.unique { "UNIQUE " } else { "" };
                write!(f, "+ {}INDEX {} ({})", unique, idx.name, idx.columns.join(", "))
            }
            Change::DropIndex(idx) => write!(f, "- INDEX {}", idx.name),
            Change::AddPrimaryKey(cols) => write!(f, "+ PRIMARY KEY ({})", cols.join(", ")),
            Change::DropPrimaryKey { columns, .. } => {
                write!(f, "- PRIMARY KEY ({})", columns.join(", "))
            }
            Change::AddForeignKey(fk) => write!(
                f,
                "+ FOREIGN KEY ({}) -> {}.{}",
                fk.columns.join(", "),
                fk.references_table,
                fk.references_columns.join(", ")
            ),
            Change::DropForeignKey(fk) => write!(
                f,
                "- FOREIGN KEY ({}) -> {}.{}",
                fk.columns.join(", "),
                fk.references_table,
                fk.references_columns.join(", ")
            ),
        }
    }
}

/// Diff two canonicalized tables with the same name.
///
/// The result is unordered; pass it through [`crate::solver::order_changes`]
/// before rendering.
pub fn diff_tables(desired: &Table, current: &Table, policy: DiffPolicy) -> Vec<Change> {
    let mut changes = Vec::new();
    changes.extend(diff_columns(&desired.columns, &current.columns, policy));
    changes.extend(diff_indexes(&desired.indexes, &current.indexes));
    changes.extend(diff_primary_key(desired, current));
    changes.extend(diff_foreign_keys(
        &desired.foreign_keys,
        &current.foreign_keys,
    ));
    changes
}

fn diff_columns(desired: &[Column], current: &[Column], policy: DiffPolicy) -> Vec<Change> {
    let mut changes = Vec::new();

    let desired_names: HashSet<&str> = desired.iter().map(|c| c.name.as_str()).collect();

    for col in desired {
        match current.iter().find(|c| c.name == col.name) {
            None => changes.push(Change::AddColumn(col.clone())),
            Some(live) if columns_differ(col, live) => changes.push(Change::AlterColumn {
                from: live.clone(),
                to: col.clone(),
            }),
            Some(_) => {}
        }
    }

    if policy.drop_columns {
        for col in current {
            if !desired_names.contains(col.name.as_str()) {
                changes.push(Change::DropColumn(col.name.clone()));
            }
        }
    }

    changes
}

fn columns_differ(desired: &Column, live: &Column) -> bool {
    if desired.data_type != live.data_type
        || desired.nullable != live.nullable
        || desired.auto_increment != live.auto_increment
    {
        return true;
    }
    // Auto-increment columns own their default.
    if desired.auto_increment || live.auto_increment {
        return false;
    }
    desired.default != live.default
}

fn diff_indexes(desired: &[Index], current: &[Index]) -> Vec<Change> {
    let desired_keys: HashSet<String> = desired.iter().map(Index::key).collect();
    let current_keys: HashSet<String> = current.iter().map(Index::key).collect();

    let drops = current
        .iter()
        .filter(|idx| !desired_keys.contains(&idx.key()))
        .map(|idx| Change::DropIndex(idx.clone()));
    let adds = desired
        .iter()
        .filter(|idx| !current_keys.contains(&idx.key()))
        .map(|idx| Change::AddIndex(idx.clone()));

    drops.chain(adds).collect()
}

fn diff_primary_key(desired: &Table, current: &Table) -> Vec<Change> {
    if desired.primary_key == current.primary_key {
        return Vec::new();
    }
    let mut changes = Vec::new();
    if !current.primary_key.is_empty() {
        changes.push(Change::DropPrimaryKey {
            name: current.primary_key_name.clone(),
            columns: current.primary_key.clone(),
        });
    }
    if !desired.primary_key.is_empty() {
        changes.push(Change::AddPrimaryKey(desired.primary_key.clone()));
    }
    changes
}

fn diff_foreign_keys(desired: &[ForeignKey], current: &[ForeignKey]) -> Vec<Change> {
    let desired_keys: HashSet<String> = desired.iter().map(ForeignKey::key).collect();
    let current_keys: HashSet<String> = current.iter().map(ForeignKey::key).collect();

    let drops = current
        .iter()
        .filter(|fk| !desired_keys.contains(&fk.key()))
        .map(|fk| Change::DropForeignKey(fk.clone()));
    let adds = desired
        .iter()
        .filter(|fk| !current_keys.contains(&fk.key()))
        .map(|fk| Change::AddForeignKey(fk.clone()));

    drops.chain(adds).collect()
}
