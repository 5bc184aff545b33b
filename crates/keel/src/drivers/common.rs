//! Rendering helpers shared by the SQL dialects.

use async_trait::async_trait;

use crate::Result;
use crate::plan::Statement;
use crate::schema::{ForeignKey, Index, Table};
use crate::seed::RowLookup;

/// Quote function for one dialect.
pub(crate) type Quote<'a> = &'a dyn Fn(&str) -> String;

pub(crate) fn column_list(quote: Quote<'_>, columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| quote(c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `FOREIGN KEY (...) REFERENCES t (...) [ON DELETE ...]`
pub(crate) fn foreign_key_clause(quote: Quote<'_>, fk: &ForeignKey) -> String {
    let mut clause = format!(
        "FOREIGN KEY ({}) REFERENCES {} ({})",
        column_list(quote, &fk.columns),
        quote(&fk.references_table),
        column_list(quote, &fk.references_columns)
    );
    if let Some(action) = &fk.on_delete {
        clause.push_str(" ON DELETE ");
        clause.push_str(action);
    }
    clause
}

pub(crate) fn create_index(quote: Quote<'_>, table: &str, idx: &Index) -> Statement {
    Statement::new(format!(
        "CREATE {}INDEX {} ON {} ({})",
        if idx.unique { "UNIQUE " } else { "" },
        quote(&idx.name),
        quote(table),
        column_list(quote, &idx.columns)
    ))
}

/// A multi-line `CREATE TABLE` with one definition per line.
pub(crate) fn create_table_block(
    quote: Quote<'_>,
    table: &Table,
    lines: Vec<String>,
    suffix: &str,
) -> Statement {
    let body = lines
        .iter()
        .map(|l| format!("    {l}"))
        .collect::<Vec<_>>()
        .join(",\n");
    Statement::new(format!(
        "CREATE TABLE {} (\n{}\n){}",
        quote(&table.name),
        body,
        suffix
    ))
}

/// Runs a query and returns every row as nullable text.
#[async_trait]
pub(crate) trait TextQuery: Send {
    async fn query_text(&mut self, sql: &str) -> Result<Vec<Vec<Option<String>>>>;
}

/// Adapts a [`TextQuery`] to seed lookups.
pub(crate) struct TextLookup<'a>(pub &'a mut dyn TextQuery);

#[async_trait]
impl RowLookup for TextLookup<'_> {
    async fn fetch_row(&mut self, sql: &str) -> Result<Option<Vec<Option<String>>>> {
        Ok(self.0.query_text(sql).await?.into_iter().next())
    }
}

/// Strip one pair of surrounding single quotes, undoubling inner quotes.
pub(crate) fn unquote(value: &str) -> Option<String> {
    let inner = value.strip_prefix('\'')?.strip_suffix('\'')?;
    Some(inner.replace("''", "'"))
}

/// Whether `value` is a plain numeric literal.
pub(crate) fn is_numeric(value: &str) -> bool {
    value
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E'))
        && value.parse::<f64>().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::Ident;

    fn quote(name: &str) -> String {
        Ident(name).to_string()
    }

    #[test]
    fn test_foreign_key_clause() {
        let fk = ForeignKey {
            name: None,
            columns: vec!["author_id".into()],
            references_table: "users".into(),
            references_columns: vec!["id".into()],
            on_delete: Some("CASCADE".into()),
        };
        assert_eq!(
            foreign_key_clause(&quote, &fk),
            r#"FOREIGN KEY ("author_id") REFERENCES "users" ("id") ON DELETE CASCADE"#
        );
    }

    #[test]
    fn test_create_index() {
        let idx = Index {
            name: "uq_users_email".into(),
            columns: vec!["email".into()],
            unique: true,
        };
        assert_eq!(
            create_index(&quote, "users", &idx).as_str(),
            r#"CREATE UNIQUE INDEX "uq_users_email" ON "users" ("email")"#
        );
    }

    #[test]
    fn test_unquote() {
        assert_eq!(unquote("'it''s'").as_deref(), Some("it's"));
        assert_eq!(unquote("now()"), None);
        assert!(is_numeric("-1.5"));
        assert!(!is_numeric("abc"));
    }
}
