//! Offline fixture generation: `CREATE` statements for a directory of
//! specs, concatenated into one SQL file.

use camino::{Utf8Path, Utf8PathBuf};
use keel_schema::decode_table_spec;

use crate::context::{Context, Phase};
use crate::driver::AnyDriver;
use crate::{Error, Result};

/// First line of every generated fixture file.
pub const FIXTURE_BANNER: &str =
    "/* Auto generated file. Do not edit by hand. This file was generated by keel. */";

const FIXTURE_FILE: &str = "fixtures.sql";

/// Extensions read as specs.
const SPEC_EXTENSIONS: [&str; 3] = ["yaml", "yml", "json"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixtureReport {
    /// The written file.
    pub path: Utf8PathBuf,
    /// Tables that contributed statements, in output order.
    pub tables: Vec<String>,
    pub statements: usize,
}

fn io_error(path: &Utf8Path) -> impl FnOnce(std::io::Error) -> Error + '_ {
    move |source| Error::Io {
        path: path.to_owned(),
        source,
    }
}

/// Every spec file under `dir`, depth first, sorted by path.
fn spec_files(dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>> {
    let mut files = Vec::new();
    let mut entries = dir
        .read_dir_utf8()
        .map_err(io_error(dir))?
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(io_error(dir))?;
    entries.sort_by(|a, b| a.path().cmp(b.path()));

    for entry in entries {
        let path = entry.path();
        let file_type = entry.file_type().map_err(io_error(path))?;
        if file_type.is_dir() {
            files.extend(spec_files(path)?);
        } else if path
            .extension()
            .is_some_and(|ext| SPEC_EXTENSIONS.contains(&ext))
        {
            files.push(path.to_owned());
        }
    }
    Ok(files)
}

/// Render the fixture file body.
pub(crate) fn render_fixtures(statements: &[String]) -> String {
    if statements.is_empty() {
        return format!("{FIXTURE_BANNER}\n");
    }
    format!("{FIXTURE_BANNER}\n\n{};\n", statements.join(";\n"))
}

/// Walk `input_dir`, render `CREATE` statements for every spec that has a
/// block for `driver`, and write them to `output_dir/fixtures.sql`.
///
/// Specs without a block for the driver are skipped. Nothing connects to a
/// database.
pub async fn generate_fixtures(
    ctx: &Context,
    driver: &AnyDriver,
    input_dir: &Utf8Path,
    output_dir: &Utf8Path,
) -> Result<FixtureReport> {
    let files = spec_files(input_dir)?;
    let mut statements = Vec::new();
    let mut tables = Vec::new();

    for file in &files {
        ctx.ensure_active()?;
        let input = tokio::fs::read_to_string(file)
            .await
            .map_err(io_error(file))?;
        let wrap = |source: Error| Error::Reconcile {
            table: file.to_string(),
            driver: driver.kind(),
            phase: Phase::Fixtures,
            source: Box::new(source),
        };
        let spec = decode_table_spec(&input).map_err(|e| wrap(e.into()))?;
        if spec.schema_for(driver.kind()).is_none() {
            tracing::debug!(file = %file, driver = %driver.kind(), "no schema block, skipping");
            continue;
        }
        spec.validate().map_err(|e| wrap(e.into()))?;
        let created = driver.create_table_statements(&spec).map_err(wrap)?;
        if created.is_empty() {
            continue;
        }
        statements.extend(created.into_iter().map(|s| s.into_inner()));
        tables.push(spec.name);
    }

    tokio::fs::create_dir_all(output_dir)
        .await
        .map_err(io_error(output_dir))?;
    let path = output_dir.join(FIXTURE_FILE);
    tokio::fs::write(&path, render_fixtures(&statements))
        .await
        .map_err(io_error(&path))?;

    tracing::info!(
        path = %path,
        tables = tables.len(),
        statements = statements.len(),
        "wrote fixtures"
    );
    Ok(FixtureReport {
        path,
        tables,
        statements: statements.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_fixtures() {
        let body = render_fixtures(&[
            "CREATE TABLE \"a\" (\n    \"id\" integer\n)".to_string(),
            "CREATE TABLE \"b\" (\n    \"id\" integer\n)".to_string(),
        ]);
        insta::assert_snapshot!(body, @r#"
        /* Auto generated file. Do not edit by hand. This file was generated by keel. */

        CREATE TABLE "a" (
            "id" integer
        );
        CREATE TABLE "b" (
            "id" integer
        );
        "#);
    }

    #[test]
    fn test_render_empty() {
        assert_eq!(render_fixtures(&[]), format!("{FIXTURE_BANNER}\n"));
    }

    #[test]
    fn test_spec_files_are_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        std::fs::create_dir(root.join("nested")).unwrap();
        std::fs::write(root.join("b.yaml"), "").unwrap();
        std::fs::write(root.join("a.yml"), "").unwrap();
        std::fs::write(root.join("README.md"), "").unwrap();
        std::fs::write(root.join("nested/c.yaml"), "").unwrap();

        let files: Vec<String> = spec_files(root)
            .unwrap()
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().to_string())
            .collect();
        assert_eq!(files, vec!["a.yml", "b.yaml", "nested/c.yaml"]);
    }
}
