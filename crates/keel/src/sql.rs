//! Identifier and literal quoting, plus naming conventions.

use std::fmt;

/// A string literal. Display writes it quoted with single quotes.
///
/// ```
/// use keel::sql::Lit;
/// assert_eq!(format!("{}", Lit("it's")), "'it''s'");
/// ```
pub struct Lit<T: AsRef<str>>(pub T);

impl<T: AsRef<str>> fmt::Display for Lit<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_quoted(f, self.0.as_ref(), '\'')
    }
}

/// A string literal for engines that also treat backslash as an escape.
///
/// ```
/// use keel::sql::BackslashLit;
/// assert_eq!(format!("{}", BackslashLit(r"a\b'c")), r"'a\\b''c'");
/// ```
pub struct BackslashLit<T: AsRef<str>>(pub T);

impl<T: AsRef<str>> fmt::Display for BackslashLit<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("'")?;
        for c in self.0.as_ref().chars() {
            match c {
                '\'' => f.write_str("''")?,
                '\\' => f.write_str("\\\\")?,
                c => write!(f, "{c}")?,
            }
        }
        f.write_str("'")
    }
}

/// An identifier quoted with double quotes.
///
/// ```
/// use keel::sql::Ident;
/// assert_eq!(format!("{}", Ident("user")), "\"user\"");
/// assert_eq!(format!("{}", Ident("bla\"h")), "\"bla\"\"h\"");
/// ```
pub struct Ident<T: AsRef<str>>(pub T);

impl<T: AsRef<str>> fmt::Display for Ident<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_quoted(f, self.0.as_ref(), '"')
    }
}

/// An identifier quoted with backticks.
pub struct BacktickIdent<T: AsRef<str>>(pub T);

impl<T: AsRef<str>> fmt::Display for BacktickIdent<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_quoted(f, self.0.as_ref(), '`')
    }
}

fn write_quoted(f: &mut fmt::Formatter<'_>, s: &str, quote: char) -> fmt::Result {
    write!(f, "{quote}")?;
    for c in s.chars() {
        if c == quote {
            write!(f, "{quote}{quote}")?;
        } else {
            write!(f, "{c}")?;
        }
    }
    write!(f, "{quote}")
}

/// Join identifiers with `, ` using the given quoting.
pub fn join_idents<S: AsRef<str>>(names: &[S], quote: impl Fn(&str) -> String) -> String {
    names
        .iter()
        .map(|n| quote(n.as_ref()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `idx_{table}_{columns}`
pub fn index_name(table: &str, columns: &[impl AsRef<str>]) -> String {
    let cols: Vec<&str> = columns.iter().map(|c| c.as_ref()).collect();
    format!("idx_{}_{}", table, cols.join("_"))
}

/// `uq_{table}_{columns}`
pub fn unique_index_name(table: &str, columns: &[impl AsRef<str>]) -> String {
    let cols: Vec<&str> = columns.iter().map(|c| c.as_ref()).collect();
    format!("uq_{}_{}", table, cols.join("_"))
}

/// `{table}_{columns}_fkey`
pub fn foreign_key_name(table: &str, columns: &[impl AsRef<str>]) -> String {
    let cols: Vec<&str> = columns.iter().map(|c| c.as_ref()).collect();
    format!("{}_{}_fkey", table, cols.join("_"))
}

/// `{table}_pkey`
pub fn primary_key_name(table: &str) -> String {
    format!("{table}_pkey")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        assert_eq!(index_name("users", &["email"]), "idx_users_email");
        assert_eq!(unique_index_name("users", &["org", "email"]), "uq_users_org_email");
        assert_eq!(foreign_key_name("posts", &["author_id"]), "posts_author_id_fkey");
        assert_eq!(primary_key_name("posts"), "posts_pkey");
    }

    #[test]
    fn test_backtick_ident() {
        assert_eq!(BacktickIdent("a`b").to_string(), "`a``b`");
    }

    #[test]
    fn test_join_idents() {
        let joined = join_idents(&["a", "b"], |n| Ident(n).to_string());
        assert_eq!(joined, r#""a", "b""#);
    }
}
