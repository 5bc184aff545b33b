//! The reconciliation orchestrator.
//!
//! A [`Database`] pairs a configuration with the one driver it selects.
//! Each request walks a typestate chain: [`Database::load_table`] yields a
//! [`LoadedTable`], planning it yields a [`PlannedTable`], and applying
//! that yields an [`AppliedTable`]. Either intermediate state can be
//! discarded instead. Every transition is reported to the context's
//! observer.

use camino::{Utf8Path, Utf8PathBuf};
use keel_schema::{DataTypeSpec, DriverKind, TableSpec, parse_table_spec, parse_type_spec};
use serde::Deserialize;

use crate::context::{Context, Phase, ReconcileState};
use crate::diff::DiffPolicy;
use crate::driver::{AnyDriver, ConnectionParams, DeployReport, DriverRegistry};
use crate::fixtures::{FixtureReport, generate_fixtures};
use crate::plan::{Plan, Statement};
use crate::{Error, Result};

/// Table name reported for [`Database::apply_sync`] phase events.
pub const APPLY_SYNC_TARGET: &str = "<statements>";

/// Everything a [`Database`] needs. Deserializable from a config file.
#[derive(Clone, Deserialize)]
pub struct DatabaseConfig {
    pub driver: DriverKind,
    /// Connection URI for every driver except cassandra.
    #[serde(default)]
    pub uri: Option<String>,
    /// Cassandra contact points.
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub keyspace: Option<String>,
    #[serde(default)]
    pub input_dir: Option<Utf8PathBuf>,
    #[serde(default)]
    pub output_dir: Option<Utf8PathBuf>,
    /// Plan and apply seed rows along with the structure.
    #[serde(default)]
    pub deploy_seed_data: bool,
    /// Let plans drop live columns the spec no longer declares.
    #[serde(default)]
    pub allow_drop_columns: bool,
    /// Re-plan right before applying and refuse if the plan changed.
    #[serde(default)]
    pub verify_before_apply: bool,
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("driver", &self.driver)
            .field("hosts", &self.hosts)
            .field("username", &self.username)
            .field("keyspace", &self.keyspace)
            .field("input_dir", &self.input_dir)
            .field("output_dir", &self.output_dir)
            .field("deploy_seed_data", &self.deploy_seed_data)
            .field("allow_drop_columns", &self.allow_drop_columns)
            .field("verify_before_apply", &self.verify_before_apply)
            .finish_non_exhaustive()
    }
}

impl DatabaseConfig {
    fn empty(driver: DriverKind) -> Self {
        DatabaseConfig {
            driver,
            uri: None,
            hosts: Vec::new(),
            username: None,
            password: None,
            keyspace: None,
            input_dir: None,
            output_dir: None,
            deploy_seed_data: false,
            allow_drop_columns: false,
            verify_before_apply: false,
        }
    }

    /// A config for a URI-addressed driver.
    pub fn uri(driver: DriverKind, uri: impl Into<String>) -> Self {
        DatabaseConfig {
            uri: Some(uri.into()),
            ..Self::empty(driver)
        }
    }

    pub fn cassandra(hosts: Vec<String>, keyspace: impl Into<String>) -> Self {
        DatabaseConfig {
            hosts,
            keyspace: Some(keyspace.into()),
            ..Self::empty(DriverKind::Cassandra)
        }
    }

    pub fn policy(&self) -> DiffPolicy {
        DiffPolicy {
            drop_columns: self.allow_drop_columns,
        }
    }

    /// The connection parameters this config describes for its driver.
    pub fn connection_params(&self) -> Result<ConnectionParams> {
        if self.driver.uses_uri() {
            let uri = self.uri.clone().ok_or(Error::ConnectionMismatch {
                driver: self.driver,
                expected: "URI",
            })?;
            return Ok(ConnectionParams::Uri(uri));
        }
        match &self.keyspace {
            Some(keyspace) if !self.hosts.is_empty() => Ok(ConnectionParams::Cassandra {
                hosts: self.hosts.clone(),
                username: self.username.clone(),
                password: self.password.clone(),
                keyspace: keyspace.clone(),
            }),
            _ => Err(Error::ConnectionMismatch {
                driver: self.driver,
                expected: "host list and keyspace",
            }),
        }
    }
}

/// What a request reconciles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// Table structure, plus insert-or-ignore seed rows for a table that
    /// does not exist yet when seeding is enabled.
    Table,
    /// Seed rows only.
    Seed,
    /// A user-defined type.
    Type,
}

impl RequestKind {
    fn plan_phase(self) -> Phase {
        match self {
            RequestKind::Table => Phase::Plan,
            RequestKind::Seed => Phase::PlanSeed,
            RequestKind::Type => Phase::PlanType,
        }
    }
}

#[derive(Debug, Clone)]
enum Target {
    Table(TableSpec),
    Type(DataTypeSpec),
}

impl Target {
    fn name(&self) -> &str {
        match self {
            Target::Table(spec) => &spec.name,
            Target::Type(spec) => &spec.name,
        }
    }
}

/// A configured target database. Creating one performs no I/O.
#[derive(Debug, Clone)]
pub struct Database {
    config: DatabaseConfig,
    driver: AnyDriver,
}

impl Database {
    pub fn new(config: DatabaseConfig) -> Result<Self> {
        let params = config.connection_params()?;
        let driver = DriverRegistry::resolve(config.driver, &params, config.policy())?;
        Ok(Database { config, driver })
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn driver(&self) -> &AnyDriver {
        &self.driver
    }

    pub fn kind(&self) -> DriverKind {
        self.config.driver
    }

    fn wrap(&self, table: &str, phase: Phase) -> impl Fn(Error) -> Error + '_ {
        let table = table.to_string();
        move |source| Error::Reconcile {
            table: table.clone(),
            driver: self.kind(),
            phase,
            source: Box::new(source),
        }
    }

    fn transition(&self, ctx: &Context, table: &str, from: ReconcileState, to: ReconcileState) {
        ctx.observer().state_changed(table, from, to);
    }

    fn load(&self, ctx: &Context, target: Target, kind: RequestKind) -> Result<LoadedTable<'_>> {
        let checked = match (&target, kind) {
            (Target::Table(spec), RequestKind::Table | RequestKind::Seed) => {
                self.driver.schema_for(spec).map(|_| ())
            }
            (Target::Type(spec), RequestKind::Type) => match spec.schema_for(self.kind()) {
                Some(_) => Ok(()),
                None => Err(Error::MissingSchema {
                    table: spec.name.clone(),
                    driver: self.kind(),
                }),
            },
            (target, _) => Err(Error::invalid(
                target.name(),
                format!("{kind:?} request does not match the spec"),
            )),
        };
        if let Err(err) = checked {
            self.transition(ctx, target.name(), ReconcileState::Idle, ReconcileState::Failed);
            return Err(self.wrap(target.name(), Phase::Load)(err));
        }

        self.transition(ctx, target.name(), ReconcileState::Idle, ReconcileState::Loaded);
        Ok(LoadedTable {
            db: self,
            target,
            kind,
        })
    }

    /// Start a table or seed request. Fails before any I/O when the spec
    /// has no block for the configured driver.
    pub fn load_table(
        &self,
        ctx: &Context,
        spec: TableSpec,
        kind: RequestKind,
    ) -> Result<LoadedTable<'_>> {
        self.load(ctx, Target::Table(spec), kind)
    }

    /// Start a user-defined type request.
    pub fn load_type(&self, ctx: &Context, spec: DataTypeSpec) -> Result<LoadedTable<'_>> {
        self.load(ctx, Target::Type(spec), RequestKind::Type)
    }

    async fn read_spec(&self, path: &Utf8Path) -> Result<String> {
        tokio::fs::read_to_string(path)
            .await
            .map_err(|source| Error::Io {
                path: path.to_owned(),
                source,
            })
    }

    /// Read a table spec from disk and start a table request for it.
    pub async fn load_table_file(&self, ctx: &Context, path: &Utf8Path) -> Result<LoadedTable<'_>> {
        let input = self.read_spec(path).await?;
        let spec = parse_table_spec(&input)
            .map_err(|e| self.wrap(path.as_str(), Phase::Load)(e.into()))?;
        self.load_table(ctx, spec, RequestKind::Table)
    }

    async fn plan_target(&self, ctx: &Context, target: &Target, kind: RequestKind) -> Result<Plan> {
        match (target, kind) {
            (Target::Table(spec), RequestKind::Table) => {
                let seed = if self.config.deploy_seed_data {
                    spec.seed_data.as_ref()
                } else {
                    None
                };
                self.driver.plan_table(ctx, spec, seed).await
            }
            // No seed rows means nothing to converge.
            (Target::Table(spec), RequestKind::Seed) => {
                match spec.seed_data.as_ref().filter(|seed| !seed.is_empty()) {
                    Some(seed) => self.driver.plan_seed_data(ctx, spec, seed).await,
                    None => Ok(Plan::empty()),
                }
            }
            (Target::Type(spec), _) => self.driver.plan_type(ctx, spec).await,
            (Target::Table(spec), RequestKind::Type) => Err(Error::invalid(
                &spec.name,
                "a table spec cannot be planned as a type",
            )),
        }
    }

    /// Plan a table or type spec read from `path`.
    pub async fn plan_sync_from_file(
        &self,
        ctx: &Context,
        path: &Utf8Path,
        kind: RequestKind,
    ) -> Result<Plan> {
        let input = self.read_spec(path).await?;
        let wrap = self.wrap(path.as_str(), Phase::Load);
        match kind {
            RequestKind::Type => {
                let spec = parse_type_spec(&input).map_err(|e| wrap(e.into()))?;
                self.plan_sync_type_spec(ctx, &spec).await
            }
            RequestKind::Table => {
                let spec = parse_table_spec(&input).map_err(|e| wrap(e.into()))?;
                self.plan_sync_table_spec(ctx, &spec).await
            }
            RequestKind::Seed => {
                let spec = parse_table_spec(&input).map_err(|e| wrap(e.into()))?;
                self.plan_sync_seed_data(ctx, &spec).await
            }
        }
    }

    pub async fn plan_sync_table_spec(&self, ctx: &Context, spec: &TableSpec) -> Result<Plan> {
        let planned = self
            .load_table(ctx, spec.clone(), RequestKind::Table)?
            .plan(ctx)
            .await?;
        Ok(planned.into_plan())
    }

    pub async fn plan_sync_seed_data(&self, ctx: &Context, spec: &TableSpec) -> Result<Plan> {
        let planned = self
            .load_table(ctx, spec.clone(), RequestKind::Seed)?
            .plan(ctx)
            .await?;
        Ok(planned.into_plan())
    }

    pub async fn plan_sync_type_spec(&self, ctx: &Context, spec: &DataTypeSpec) -> Result<Plan> {
        let planned = self.load_type(ctx, spec.clone())?.plan(ctx).await?;
        Ok(planned.into_plan())
    }

    /// Deploy previously planned statements as-is. Phase events name
    /// [`APPLY_SYNC_TARGET`] since the statements carry no table.
    pub async fn apply_sync(
        &self,
        ctx: &Context,
        statements: &[Statement],
    ) -> Result<DeployReport> {
        ctx.phase(
            APPLY_SYNC_TARGET,
            self.kind(),
            Phase::Apply,
            self.driver.deploy_statements(ctx, statements),
        )
        .await
    }

    /// Plan and apply the structure, then (with seeding enabled and seed
    /// rows present) plan and apply the seed rows against the converged
    /// table.
    pub async fn reconcile_table(
        &self,
        ctx: &Context,
        spec: &TableSpec,
    ) -> Result<Vec<AppliedTable>> {
        let mut outcomes = Vec::with_capacity(2);
        let structure = self
            .load_table(ctx, spec.clone(), RequestKind::Table)?
            .plan(ctx)
            .await?
            .apply(ctx)
            .await?;
        outcomes.push(structure);

        let has_seed = spec.seed_data.as_ref().is_some_and(|s| !s.is_empty());
        if self.config.deploy_seed_data && has_seed && !self.driver.schema_for(spec)?.is_deleted() {
            let seed = self
                .load_table(ctx, spec.clone(), RequestKind::Seed)?
                .plan(ctx)
                .await?
                .apply(ctx)
                .await?;
            outcomes.push(seed);
        }
        Ok(outcomes)
    }

    /// Write `fixtures.sql` for every spec under the configured input
    /// directory.
    pub async fn create_fixtures(&self, ctx: &Context) -> Result<FixtureReport> {
        let (Some(input), Some(output)) = (&self.config.input_dir, &self.config.output_dir) else {
            return Err(Error::invalid(
                "fixtures",
                "input_dir and output_dir must both be set",
            ));
        };
        ctx.phase(
            input.as_str(),
            self.kind(),
            Phase::Fixtures,
            generate_fixtures(ctx, &self.driver, input, output),
        )
        .await
    }
}

/// A validated request, not yet planned.
#[derive(Debug)]
pub struct LoadedTable<'db> {
    db: &'db Database,
    target: Target,
    kind: RequestKind,
}

impl<'db> LoadedTable<'db> {
    pub fn name(&self) -> &str {
        self.target.name()
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    /// Introspect and plan. Reads from the target only.
    pub async fn plan(self, ctx: &Context) -> Result<PlannedTable<'db>> {
        let db = self.db;
        let name = self.target.name();
        let phase = self.kind.plan_phase();
        let planned = ctx
            .phase(name, db.kind(), phase, db.plan_target(ctx, &self.target, self.kind))
            .await;

        match planned {
            Ok(plan) => {
                db.transition(ctx, name, ReconcileState::Loaded, ReconcileState::Planned);
                tracing::info!(
                    table = name,
                    driver = %db.kind(),
                    statements = plan.len(),
                    "planned"
                );
                Ok(PlannedTable {
                    db,
                    target: self.target,
                    kind: self.kind,
                    plan,
                })
            }
            Err(err) => {
                db.transition(ctx, name, ReconcileState::Loaded, ReconcileState::Failed);
                Err(db.wrap(name, phase)(err))
            }
        }
    }

    pub fn discard(self, ctx: &Context) {
        self.db
            .transition(ctx, self.name(), ReconcileState::Loaded, ReconcileState::Discarded);
    }
}

/// A request with its plan, ready to apply or discard.
#[derive(Debug)]
pub struct PlannedTable<'db> {
    db: &'db Database,
    target: Target,
    kind: RequestKind,
    plan: Plan,
}

impl<'db> PlannedTable<'db> {
    pub fn name(&self) -> &str {
        self.target.name()
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    pub fn into_plan(self) -> Plan {
        self.plan
    }

    /// Deploy the plan. An empty plan succeeds without connecting.
    pub async fn apply(self, ctx: &Context) -> Result<AppliedTable> {
        let db = self.db;
        let name = self.target.name();
        let outcome = self.deploy(ctx).await;
        match outcome {
            Ok(report) => {
                db.transition(ctx, name, ReconcileState::Planned, ReconcileState::Applied);
                Ok(AppliedTable {
                    table: name.to_string(),
                    kind: self.kind,
                    plan: self.plan,
                    report,
                })
            }
            Err(err) => {
                db.transition(ctx, name, ReconcileState::Planned, ReconcileState::Failed);
                Err(db.wrap(name, Phase::Apply)(err))
            }
        }
    }

    async fn deploy(&self, ctx: &Context) -> Result<DeployReport> {
        if self.plan.is_empty() {
            return Ok(DeployReport {
                applied: 0,
                total: 0,
                transactional: false,
            });
        }
        let db = self.db;
        let name = self.target.name();

        if db.config.verify_before_apply {
            let fresh = ctx
                .phase(
                    name,
                    db.kind(),
                    self.kind.plan_phase(),
                    db.plan_target(ctx, &self.target, self.kind),
                )
                .await?;
            if fresh.fingerprint() != self.plan.fingerprint() {
                return Err(Error::StalePlan {
                    table: name.to_string(),
                });
            }
        }

        ctx.phase(
            name,
            db.kind(),
            Phase::Apply,
            db.driver.deploy_statements(ctx, self.plan.statements()),
        )
        .await
    }

    pub fn discard(self, ctx: &Context) {
        self.db
            .transition(ctx, self.name(), ReconcileState::Planned, ReconcileState::Discarded);
    }
}

/// The result of an applied request.
#[derive(Debug, Clone)]
pub struct AppliedTable {
    pub table: String,
    pub kind: RequestKind,
    pub plan: Plan,
    pub report: DeployReport,
}
