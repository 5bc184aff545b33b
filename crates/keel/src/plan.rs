//! Statements, plans, and the per-dialect rendering seam.

use std::fmt;

use keel_schema::DriverKind;

use crate::Result;
use crate::diff::{Change, DiffPolicy, diff_tables};
use crate::schema::{Column, Table};
use crate::solver::order_changes;

/// One unit of dialect-native DDL or DML.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Statement(String);

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Statement(sql.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Statement {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for Statement {
    fn from(sql: String) -> Self {
        Statement(sql)
    }
}

impl From<&str> for Statement {
    fn from(sql: &str) -> Self {
        Statement(sql.to_string())
    }
}

/// Ordered statements that converge one table (or type). Empty means the
/// target is already converged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    statements: Vec<Statement>,
}

impl Plan {
    pub fn new(statements: Vec<Statement>) -> Self {
        Plan { statements }
    }

    pub fn empty() -> Self {
        Plan::default()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    pub fn into_statements(self) -> Vec<Statement> {
        self.statements
    }

    pub fn extend(&mut self, statements: impl IntoIterator<Item = Statement>) {
        self.statements.extend(statements);
    }

    /// Hex blake3 digest of the statement list.
    ///
    /// Two plans with the same statements in the same order share a
    /// fingerprint.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for stmt in &self.statements {
            hasher.update(stmt.as_str().as_bytes());
            hasher.update(&[0]);
        }
        hasher.finalize().to_hex().to_string()
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for stmt in &self.statements {
            writeln!(f, "{stmt};")?;
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a Plan {
    type Item = &'a Statement;
    type IntoIter = std::slice::Iter<'a, Statement>;

    fn into_iter(self) -> Self::IntoIter {
        self.statements.iter()
    }
}

/// How one SQL dialect canonicalizes and renders tables and changes.
pub trait Dialect: Send + Sync {
    fn kind(&self) -> DriverKind;

    fn quote_ident(&self, name: &str) -> String;

    /// Bring a column into canonical form. Applied to desired and
    /// introspected columns alike.
    fn canonicalize_column(&self, column: &mut Column) {
        column.data_type = normalize_type(&column.data_type);
        column.default = column
            .default
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty() && !d.eq_ignore_ascii_case("null"))
            .map(str::to_string);
    }

    /// Table-level canonicalization, run after every column is canonical.
    fn canonicalize_table(&self, _table: &mut Table) {}

    /// Statements that create `table` from nothing.
    fn create_table(&self, table: &Table) -> Vec<Statement>;

    fn drop_table(&self, name: &str) -> Statement {
        Statement::new(format!("DROP TABLE {}", self.quote_ident(name)))
    }

    /// Render one ordered change against the table named `table`.
    fn render_change(&self, table: &str, change: &Change) -> Result<Vec<Statement>>;

    /// Render a whole ordered change list. Dialects that cannot alter in
    /// place override this to rebuild the table.
    fn render_changes(
        &self,
        desired: &Table,
        _current: &Table,
        changes: &[Change],
    ) -> Result<Vec<Statement>> {
        let mut statements = Vec::new();
        for change in changes {
            statements.extend(self.render_change(&desired.name, change)?);
        }
        Ok(statements)
    }
}

/// Lower-case a type name and collapse whitespace, so that
/// `VARCHAR ( 255 )` and `varchar(255)` compare equal.
pub fn normalize_type(data_type: &str) -> String {
    let collapsed = data_type
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase();
    collapsed
        .replace(" (", "(")
        .replace("( ", "(")
        .replace(" )", ")")
        .replace(", ", ",")
        .replace(" ,", ",")
}

/// Canonicalize every column of `table` for `dialect`.
pub fn canonicalize(dialect: &dyn Dialect, table: &mut Table) {
    table.normalize();
    for column in &mut table.columns {
        dialect.canonicalize_column(column);
        if column.auto_increment {
            column.default = None;
        }
    }
    dialect.canonicalize_table(table);
}

/// The generic plan for one table.
///
/// An absent live table yields the CREATE statements. Otherwise both sides
/// are canonicalized, diffed, ordered and rendered.
pub fn plan_structure(
    dialect: &dyn Dialect,
    mut desired: Table,
    current: Option<Table>,
    policy: DiffPolicy,
) -> Result<Vec<Statement>> {
    canonicalize(dialect, &mut desired);

    let Some(mut current) = current else {
        return Ok(dialect.create_table(&desired));
    };
    canonicalize(dialect, &mut current);

    let changes = diff_tables(&desired, &current, policy);
    if changes.is_empty() {
        return Ok(Vec::new());
    }
    tracing::debug!(
        table = %desired.name,
        changes = changes.len(),
        "table differs from spec"
    );
    let ordered = order_changes(&current, changes)?;
    dialect.render_changes(&desired, &current, &ordered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_type() {
        assert_eq!(normalize_type("VARCHAR ( 255 )"), "varchar(255)");
        assert_eq!(normalize_type("numeric(10, 2)"), "numeric(10,2)");
        assert_eq!(normalize_type("double   precision"), "double precision");
    }

    #[test]
    fn test_fingerprint_tracks_order() {
        let a = Plan::new(vec!["SELECT 1".into(), "SELECT 2".into()]);
        let b = Plan::new(vec!["SELECT 2".into(), "SELECT 1".into()]);
        let c = Plan::new(vec!["SELECT 1".into(), "SELECT 2".into()]);
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }

    #[test]
    fn test_fingerprint_separates_statements() {
        let a = Plan::new(vec!["AB".into()]);
        let b = Plan::new(vec!["A".into(), "B".into()]);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_plan_display() {
        let plan = Plan::new(vec!["DROP TABLE \"x\"".into()]);
        insta::assert_snapshot!(plan.to_string().trim_end(), @r#"DROP TABLE "x";"#);
    }
}
