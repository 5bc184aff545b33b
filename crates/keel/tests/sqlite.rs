//! End-to-end reconciliation against real SQLite files.

use camino::{Utf8Path, Utf8PathBuf};
use keel::{
    Context, Database, DatabaseConfig, DriverKind, Error, FIXTURE_BANNER, RequestKind, TableSpec,
};
use keel_schema::parse_table_spec;

const USERS: &str = r#"
name: users
schema:
  sqlite:
    primaryKey: [id]
    columns:
      - name: id
        type: integer
        attributes:
          autoIncrement: true
      - name: email
        type: text
        constraints:
          notNull: true
        default: "''"
      - name: name
        type: text
    indexes:
      - columns: [email]
        isUnique: true
  postgres:
    primaryKey: [id]
    columns:
      - name: id
        type: bigint
      - name: only_on_postgres
        type: jsonb
"#;

const USERS_WITH_AGE: &str = r#"
name: users
schema:
  sqlite:
    primaryKey: [id]
    columns:
      - name: id
        type: integer
        attributes:
          autoIncrement: true
      - name: email
        type: text
        constraints:
          notNull: true
        default: "''"
      - name: name
        type: text
      - name: age
        type: integer
    indexes:
      - columns: [email]
        isUnique: true
"#;

fn roles(admin_label: &str) -> String {
    format!(
        r#"
name: roles
schema:
  sqlite:
    primaryKey: [id]
    columns:
      - name: id
        type: integer
      - name: label
        type: text
seedData:
  rows:
    - columns:
        - column: id
          value:
            int: 1
        - column: label
          value:
            str: {admin_label}
    - columns:
        - column: id
          value:
            int: 2
        - column: label
          value:
            str: member
"#
    )
}

struct Fixture {
    _dir: tempfile::TempDir,
    root: Utf8PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap().to_owned();
        Fixture { _dir: dir, root }
    }

    fn db_path(&self) -> Utf8PathBuf {
        self.root.join("app.db")
    }

    fn config(&self) -> DatabaseConfig {
        DatabaseConfig::uri(DriverKind::Sqlite, self.db_path().as_str())
    }

    fn database(&self) -> Database {
        Database::new(self.config()).unwrap()
    }

    fn query_labels(&self) -> Vec<(i64, String)> {
        let conn = rusqlite::Connection::open(self.db_path()).unwrap();
        let mut stmt = conn
            .prepare("SELECT id, label FROM roles ORDER BY id")
            .unwrap();
        stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap()
    }
}

fn spec(input: &str) -> TableSpec {
    parse_table_spec(input).unwrap()
}

#[tokio::test]
async fn test_create_then_replan_is_empty() {
    let fx = Fixture::new();
    let db = fx.database();
    let ctx = Context::new();

    let planned = db
        .load_table(&ctx, spec(USERS), RequestKind::Table)
        .unwrap()
        .plan(&ctx)
        .await
        .unwrap();
    assert_eq!(planned.plan().len(), 2);
    assert!(planned.plan().statements()[0].as_str().starts_with("CREATE TABLE \"users\""));

    let outcome = planned.apply(&ctx).await.unwrap();
    assert_eq!(outcome.report.applied, 2);
    assert!(outcome.report.transactional);

    let again = db.plan_sync_table_spec(&ctx, &spec(USERS)).await.unwrap();
    assert!(again.is_empty(), "unexpected plan:\n{again}");
}

#[tokio::test]
async fn test_planning_does_not_create_the_database() {
    let fx = Fixture::new();
    let db = fx.database();
    let ctx = Context::new();

    let plan = db.plan_sync_table_spec(&ctx, &spec(USERS)).await.unwrap();
    assert!(!plan.is_empty());
    assert!(!fx.db_path().exists());
}

#[tokio::test]
async fn test_nullable_column_is_added_in_place() {
    let fx = Fixture::new();
    let db = fx.database();
    let ctx = Context::new();
    db.reconcile_table(&ctx, &spec(USERS)).await.unwrap();

    let plan = db
        .plan_sync_table_spec(&ctx, &spec(USERS_WITH_AGE))
        .await
        .unwrap();
    let sql: Vec<&str> = plan.statements().iter().map(|s| s.as_str()).collect();
    assert_eq!(sql, vec![r#"ALTER TABLE "users" ADD COLUMN "age" integer"#]);

    db.apply_sync(&ctx, plan.statements()).await.unwrap();
    let converged = db
        .plan_sync_table_spec(&ctx, &spec(USERS_WITH_AGE))
        .await
        .unwrap();
    assert!(converged.is_empty(), "unexpected plan:\n{converged}");
}

#[tokio::test]
async fn test_missing_block_fails_before_connecting() {
    let fx = Fixture::new();
    let db = fx.database();
    let ctx = Context::new();

    let postgres_only = spec(
        r#"
name: accounts
schema:
  postgres:
    columns:
      - name: id
        type: bigint
"#,
    );
    let err = db
        .load_table(&ctx, postgres_only, RequestKind::Table)
        .unwrap_err();
    assert!(err.is_configuration());
    assert!(matches!(
        err.root(),
        Error::MissingSchema { table, driver: DriverKind::Sqlite } if table == "accounts"
    ));
    assert!(!fx.db_path().exists());
}

#[tokio::test]
async fn test_seed_rows_are_inserted_with_the_table() {
    let fx = Fixture::new();
    let db = Database::new(DatabaseConfig {
        deploy_seed_data: true,
        ..fx.config()
    })
    .unwrap();
    let ctx = Context::new();

    let outcomes = db.reconcile_table(&ctx, &spec(&roles("admin"))).await.unwrap();
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].report.applied, 3);
    assert!(outcomes[1].plan.is_empty());

    assert_eq!(
        fx.query_labels(),
        vec![(1, "admin".to_string()), (2, "member".to_string())]
    );
}

#[tokio::test]
async fn test_seed_updates_changed_rows_and_keeps_extra_rows() {
    let fx = Fixture::new();
    let db = Database::new(DatabaseConfig {
        deploy_seed_data: true,
        ..fx.config()
    })
    .unwrap();
    let ctx = Context::new();
    db.reconcile_table(&ctx, &spec(&roles("admin"))).await.unwrap();

    rusqlite::Connection::open(fx.db_path())
        .unwrap()
        .execute("INSERT INTO roles (id, label) VALUES (3, 'guest')", [])
        .unwrap();

    let plan = db
        .plan_sync_seed_data(&ctx, &spec(&roles("owner")))
        .await
        .unwrap();
    let sql: Vec<&str> = plan.statements().iter().map(|s| s.as_str()).collect();
    assert_eq!(
        sql,
        vec![r#"UPDATE "roles" SET "label" = 'owner' WHERE "id" = 1"#]
    );

    db.reconcile_table(&ctx, &spec(&roles("owner"))).await.unwrap();
    assert_eq!(
        fx.query_labels(),
        vec![
            (1, "owner".to_string()),
            (2, "member".to_string()),
            (3, "guest".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_seed_request_without_rows_plans_nothing() {
    let fx = Fixture::new();
    let db = fx.database();
    let ctx = Context::new();

    let planned = db
        .load_table(&ctx, spec(USERS), RequestKind::Seed)
        .unwrap()
        .plan(&ctx)
        .await
        .unwrap();
    assert!(planned.plan().is_empty());
    assert!(!fx.db_path().exists());
}

#[tokio::test]
async fn test_deleted_table_is_dropped() {
    let fx = Fixture::new();
    let db = fx.database();
    let ctx = Context::new();
    db.reconcile_table(&ctx, &spec(USERS)).await.unwrap();

    let deleted = spec(
        r#"
name: users
schema:
  sqlite:
    isDeleted: true
    columns:
      - name: id
        type: integer
"#,
    );
    let plan = db.plan_sync_table_spec(&ctx, &deleted).await.unwrap();
    let sql: Vec<&str> = plan.statements().iter().map(|s| s.as_str()).collect();
    assert_eq!(sql, vec![r#"DROP TABLE "users""#]);

    db.apply_sync(&ctx, plan.statements()).await.unwrap();
    let gone = db.plan_sync_table_spec(&ctx, &deleted).await.unwrap();
    assert!(gone.is_empty());
}

#[tokio::test]
async fn test_cancelled_context_stops_planning() {
    let fx = Fixture::new();
    let db = fx.database();
    let ctx = Context::new();
    ctx.cancellation_token().cancel();

    let err = db
        .load_table(&ctx, spec(USERS), RequestKind::Table)
        .unwrap()
        .plan(&ctx)
        .await
        .unwrap_err();
    assert!(matches!(err.root(), Error::Cancelled { .. }));
}

#[tokio::test]
async fn test_fixtures_for_a_spec_directory() {
    let fx = Fixture::new();
    let input = fx.root.join("specs");
    let output = fx.root.join("out");
    std::fs::create_dir_all(&input).unwrap();
    std::fs::write(input.join("users.yaml"), USERS).unwrap();
    std::fs::write(input.join("roles.yaml"), roles("admin")).unwrap();
    std::fs::write(input.join("b.yaml"), "name: b\n").unwrap();
    std::fs::write(
        input.join("accounts.yaml"),
        r#"
name: accounts
schema:
  mysql:
    columns:
      - name: id
        type: int
"#,
    )
    .unwrap();

    let db = Database::new(DatabaseConfig {
        input_dir: Some(input),
        output_dir: Some(output.clone()),
        ..fx.config()
    })
    .unwrap();
    let report = db.create_fixtures(&Context::new()).await.unwrap();
    assert_eq!(report.tables, vec!["roles", "users"]);
    assert_eq!(report.path, output.join("fixtures.sql"));

    let body = std::fs::read_to_string(&report.path).unwrap();
    assert!(body.starts_with(FIXTURE_BANNER));
    assert!(body.contains("CREATE TABLE \"roles\""));
    assert!(body.contains("CREATE UNIQUE INDEX"));
    assert!(!body.contains("accounts"));
    assert!(!fx.db_path().exists());
}
