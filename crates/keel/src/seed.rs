//! Seed row reconciliation.
//!
//! Each desired row is matched against the live table by its key: the
//! declared primary key when the row supplies every key column, otherwise
//! every column the row declares. A missing row becomes an `INSERT`; a
//! matched row whose other columns differ becomes an `UPDATE` of only those
//! columns. Rows are never deleted.
//!
//! Live values are read back as text and compared against the desired
//! value's canonical text form, so `1`, `1.0` and `t`/`true` line up with
//! their typed counterparts.

use async_trait::async_trait;
use keel_schema::{SeedData, SeedRow, SeedValue};

use crate::plan::Statement;
use crate::schema::Table;
use crate::{Context, Error, Result};

/// How a dialect writes seed statements and reads rows back.
pub trait SeedDialect: Send + Sync {
    fn quote_ident(&self, name: &str) -> String;

    /// A SQL literal for `value`.
    fn literal(&self, value: &SeedValue) -> String;

    /// `column` projected as text in a SELECT list.
    fn text_projection(&self, column: &str) -> String;

    /// An insert that is a no-op when the row's key already exists.
    fn insert_or_ignore(&self, table: &str, row: &SeedRow) -> Statement;

    fn insert(&self, table: &str, row: &SeedRow) -> Statement {
        let (columns, values) = self.column_lists(row);
        Statement::new(format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.quote_ident(table),
            columns,
            values
        ))
    }

    fn update(
        &self,
        table: &str,
        set: &[(&str, &SeedValue)],
        key: &[(&str, &SeedValue)],
    ) -> Statement {
        let assignments = set
            .iter()
            .map(|(col, value)| format!("{} = {}", self.quote_ident(col), self.literal(value)))
            .collect::<Vec<_>>()
            .join(", ");
        Statement::new(format!(
            "UPDATE {} SET {} WHERE {}",
            self.quote_ident(table),
            assignments,
            self.where_clause(key)
        ))
    }

    /// A query returning at most one row with `columns` as text. With no
    /// columns to compare, the key columns are projected instead.
    fn lookup(&self, table: &str, columns: &[&str], key: &[(&str, &SeedValue)]) -> String {
        let projected: Vec<&str> = if columns.is_empty() {
            key.iter().map(|(c, _)| *c).collect()
        } else {
            columns.to_vec()
        };
        let projection = projected
            .iter()
            .map(|c| self.text_projection(c))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "SELECT {} FROM {} WHERE {} LIMIT 1",
            projection,
            self.quote_ident(table),
            self.where_clause(key)
        )
    }

    fn where_clause(&self, key: &[(&str, &SeedValue)]) -> String {
        key.iter()
            .map(|(col, value)| match value {
                SeedValue::Null => format!("{} IS NULL", self.quote_ident(col)),
                v => format!("{} = {}", self.quote_ident(col), self.literal(v)),
            })
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    fn column_lists(&self, row: &SeedRow) -> (String, String) {
        let columns = row
            .columns
            .keys()
            .map(|c| self.quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let values = row
            .columns
            .values()
            .map(|v| self.literal(v))
            .collect::<Vec<_>>()
            .join(", ");
        (columns, values)
    }
}

/// Reads one row by query, as nullable text values.
#[async_trait]
pub trait RowLookup: Send {
    async fn fetch_row(&mut self, sql: &str) -> Result<Option<Vec<Option<String>>>>;
}

/// Key columns for `row`.
pub fn seed_key<'a>(primary_key: &[String], row: &'a SeedRow) -> Vec<&'a str> {
    if !primary_key.is_empty() && primary_key.iter().all(|k| row.contains(k)) {
        row.columns
            .keys()
            .filter(|c| primary_key.contains(*c))
            .map(String::as_str)
            .collect()
    } else {
        row.columns.keys().map(String::as_str).collect()
    }
}

/// What to do with one desired row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowAction {
    Insert,
    /// Columns whose live value differs.
    Update(Vec<String>),
    Unchanged,
}

/// Decide the action for `row`, given the live values of `compared`
/// columns (in the same order) or `None` when no row matched.
pub fn reconcile_row(
    row: &SeedRow,
    compared: &[&str],
    live: Option<&[Option<String>]>,
) -> RowAction {
    let Some(live) = live else {
        return RowAction::Insert;
    };
    let differing: Vec<String> = compared
        .iter()
        .zip(live)
        .filter_map(|(col, live)| {
            let desired = row.get(col)?;
            (!values_match(desired, live.as_deref())).then(|| col.to_string())
        })
        .collect();
    if differing.is_empty() {
        RowAction::Unchanged
    } else {
        RowAction::Update(differing)
    }
}

/// Compare a desired value against the text a database returned for it.
pub fn values_match(desired: &SeedValue, live: Option<&str>) -> bool {
    match (desired, live) {
        (SeedValue::Null, None) => true,
        (SeedValue::Null, Some(_)) | (_, None) => false,
        (SeedValue::Str(s), Some(live)) => s == live,
        (SeedValue::Int(i), Some(live)) => match live.trim().parse::<i64>() {
            Ok(v) => v == *i,
            Err(_) => live.trim().parse::<f64>().is_ok_and(|v| v == *i as f64),
        },
        (SeedValue::Float(f), Some(live)) => live.trim().parse::<f64>().is_ok_and(|v| v == *f),
        (SeedValue::Bool(b), Some(live)) => match live.trim().to_ascii_lowercase().as_str() {
            "t" | "true" | "1" => *b,
            "f" | "false" | "0" => !*b,
            _ => false,
        },
    }
}

/// Reject seed rows that set columns the table does not declare.
pub fn check_seed_columns(table: &Table, seed: &SeedData) -> Result<()> {
    for row in &seed.rows {
        if let Some(col) = row.columns.keys().find(|c| !table.has_column(c)) {
            return Err(Error::invalid(
                &table.name,
                format!("seed row sets unknown column {col:?}"),
            ));
        }
    }
    Ok(())
}

/// Insert-or-ignore statements for every row, used when no live lookup is
/// possible (the table is about to be created).
pub fn insert_or_ignore_all(
    dialect: &dyn SeedDialect,
    table: &str,
    seed: &SeedData,
) -> Vec<Statement> {
    seed.rows
        .iter()
        .map(|row| dialect.insert_or_ignore(table, row))
        .collect()
}

/// Plan inserts and updates for `seed` against the live table.
pub async fn plan_seed_rows(
    ctx: &Context,
    dialect: &dyn SeedDialect,
    lookup: &mut dyn RowLookup,
    table: &str,
    primary_key: &[String],
    seed: &SeedData,
) -> Result<Vec<Statement>> {
    let mut statements = Vec::new();

    for row in &seed.rows {
        ctx.ensure_active()?;

        let key = seed_key(primary_key, row);
        let key_values: Vec<(&str, &SeedValue)> = key
            .iter()
            .filter_map(|k| row.get(k).map(|v| (*k, v)))
            .collect();
        let compared: Vec<&str> = row
            .columns
            .keys()
            .map(String::as_str)
            .filter(|c| !key.contains(c))
            .collect();

        let sql = dialect.lookup(table, &compared, &key_values);
        let live = ctx.guard(lookup.fetch_row(&sql)).await?;

        match reconcile_row(row, &compared, live.as_deref()) {
            RowAction::Insert => statements.push(dialect.insert(table, row)),
            RowAction::Update(columns) => {
                let set: Vec<(&str, &SeedValue)> = columns
                    .iter()
                    .filter_map(|c| row.get(c).map(|v| (c.as_str(), v)))
                    .collect();
                statements.push(dialect.update(table, &set, &key_values));
            }
            RowAction::Unchanged => {}
        }
    }

    Ok(statements)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::{Ident, Lit};

    struct TestDialect;

    impl SeedDialect for TestDialect {
        fn quote_ident(&self, name: &str) -> String {
            Ident(name).to_string()
        }

        fn literal(&self, value: &SeedValue) -> String {
            match value {
                SeedValue::Str(s) => Lit(s).to_string(),
                other => other.to_string(),
            }
        }

        fn text_projection(&self, column: &str) -> String {
            format!("{}::text", self.quote_ident(column))
        }

        fn insert_or_ignore(&self, table: &str, row: &SeedRow) -> Statement {
            let (columns, values) = self.column_lists(row);
            Statement::new(format!(
                "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT DO NOTHING",
                self.quote_ident(table),
                columns,
                values
            ))
        }
    }

    struct FakeLookup {
        rows: Vec<Option<Vec<Option<String>>>>,
        queries: Vec<String>,
    }

    #[async_trait]
    impl RowLookup for FakeLookup {
        async fn fetch_row(&mut self, sql: &str) -> Result<Option<Vec<Option<String>>>> {
            self.queries.push(sql.to_string());
            Ok(self.rows.remove(0))
        }
    }

    fn make_row(values: &[(&str, SeedValue)]) -> SeedRow {
        values.iter().cloned().collect()
    }

    #[test]
    fn test_seed_key_prefers_primary_key() {
        let row = make_row(&[("id", SeedValue::Int(1)), ("name", SeedValue::Str("a".into()))]);
        assert_eq!(seed_key(&["id".into()], &row), vec!["id"]);
        assert_eq!(seed_key(&[], &row), vec!["id", "name"]);
        assert_eq!(seed_key(&["uuid".into()], &row), vec!["id", "name"]);
    }

    #[test]
    fn test_values_match() {
        assert!(values_match(&SeedValue::Int(1), Some("1")));
        assert!(values_match(&SeedValue::Int(1), Some("1.0")));
        assert!(values_match(&SeedValue::Bool(true), Some("t")));
        assert!(values_match(&SeedValue::Bool(false), Some("0")));
        assert!(values_match(&SeedValue::Null, None));
        assert!(!values_match(&SeedValue::Null, Some("")));
        assert!(!values_match(&SeedValue::Str("a".into()), Some("b")));
    }

    #[test]
    fn test_reconcile_row() {
        let row = make_row(&[("id", SeedValue::Int(1)), ("name", SeedValue::Str("a".into()))]);
        assert_eq!(reconcile_row(&row, &["name"], None), RowAction::Insert);
        assert_eq!(
            reconcile_row(&row, &["name"], Some([Some("a".to_string())].as_slice())),
            RowAction::Unchanged
        );
        assert_eq!(
            reconcile_row(&row, &["name"], Some([Some("b".to_string())].as_slice())),
            RowAction::Update(vec!["name".into()])
        );
    }

    #[tokio::test]
    async fn test_plan_seed_rows() {
        let seed = SeedData {
            rows: vec![
                make_row(&[("id", SeedValue::Int(1)), ("name", SeedValue::Str("a".into()))]),
                make_row(&[("id", SeedValue::Int(2)), ("name", SeedValue::Str("b".into()))]),
                make_row(&[("id", SeedValue::Int(3)), ("name", SeedValue::Str("c".into()))]),
            ],
        };
        let mut lookup = FakeLookup {
            rows: vec![
                None,
                Some(vec![Some("b".into())]),
                Some(vec![Some("old".into())]),
            ],
            queries: vec![],
        };
        let ctx = Context::new();
        let key = ["id".to_string()];
        let statements = plan_seed_rows(&ctx, &TestDialect, &mut lookup, "users", &key, &seed)
            .await
            .unwrap();

        let sql: Vec<&str> = statements.iter().map(Statement::as_str).collect();
        assert_eq!(
            sql,
            vec![
                r#"INSERT INTO "users" ("id", "name") VALUES (1, 'a')"#,
                r#"UPDATE "users" SET "name" = 'c' WHERE "id" = 3"#,
            ]
        );
        insta::assert_snapshot!(
            lookup.queries[0],
            @r#"SELECT "name"::text FROM "users" WHERE "id" = 1 LIMIT 1"#
        );
    }

    #[test]
    fn test_null_key_uses_is_null() {
        let key = [("deleted_at", &SeedValue::Null)];
        assert_eq!(TestDialect.where_clause(&key), r#""deleted_at" IS NULL"#);
    }
}
