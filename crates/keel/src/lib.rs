//! Declarative schema reconciliation across SQL and CQL dialects.
//!
//! A table spec says what a table should look like. Keel introspects the
//! live table, diffs it against the spec, and produces the ordered,
//! dialect-native statements that converge one to the other:
//!
//! ```ignore
//! let ctx = Context::new();
//! let db = Database::new(DatabaseConfig::uri(DriverKind::Postgres, url))?;
//! let planned = db
//!     .load_table_file(&ctx, Utf8Path::new("schema/users.yaml"))
//!     .await?
//!     .plan(&ctx)
//!     .await?;
//! println!("{}", planned.plan());
//! planned.apply(&ctx).await?;
//! ```
//!
//! Planning only reads from the target. Applying runs the statements in
//! order and stops at the first failure.
//!
//! # Drivers
//!
//! `postgres`, `cockroachdb`, `timescaledb`, `mysql`, `sqlite`, `rqlite`
//! and `cassandra`. Each reads only its own block of a spec; a spec may
//! carry blocks for several dialects at once.
//!
//! # Seed data
//!
//! Seed rows are made present, never removed. On a table that is about to
//! be created they become insert-or-ignore statements; on an existing table
//! each row is looked up by key and inserted or updated.

mod context;
mod database;
mod diff;
mod driver;
pub mod drivers;
mod error;
mod fixtures;
pub mod plan;
pub mod schema;
pub mod seed;
pub mod solver;
pub mod sql;
mod traced;

pub use context::{Context, Observer, Phase, PhaseEvent, ReconcileState, TracingObserver};
pub use database::{
    APPLY_SYNC_TARGET, AppliedTable, Database, DatabaseConfig, LoadedTable, PlannedTable,
    RequestKind,
};
pub use diff::{Change, ChangePhase, DiffPolicy, diff_tables};
pub use driver::{
    AnyDriver, ConnectionParams, DeployReport, Driver, DriverRegistry, Executor, apply_sequential,
};
pub use error::{BoxError, Error, Result};
pub use fixtures::{FIXTURE_BANNER, FixtureReport, generate_fixtures};
pub use plan::{Plan, Statement};
pub use traced::{Connection, TracedConn};

pub use keel_schema::{
    DataTypeSpec, DriverKind, SeedData, SeedRow, SeedValue, SpecError, TableSpec,
};
