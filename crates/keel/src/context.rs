//! Per-call context: cancellation and the observer.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use keel_schema::DriverKind;
use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

/// The step of a reconciliation an event or error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Load,
    Introspect,
    Plan,
    PlanSeed,
    PlanType,
    Apply,
    Fixtures,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Load => "load",
            Phase::Introspect => "introspect",
            Phase::Plan => "plan",
            Phase::PlanSeed => "plan-seed",
            Phase::PlanType => "plan-type",
            Phase::Apply => "apply",
            Phase::Fixtures => "fixtures",
        })
    }
}

/// Orchestrator state for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReconcileState {
    Idle,
    Loaded,
    Planned,
    Applied,
    Discarded,
    Failed,
}

impl fmt::Display for ReconcileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PhaseEvent<'a> {
    pub table: &'a str,
    pub driver: DriverKind,
    pub phase: Phase,
}

/// Receives progress events. All methods default to doing nothing.
pub trait Observer: Send + Sync {
    fn phase_started(&self, _event: &PhaseEvent<'_>) {}

    fn phase_finished(&self, _event: &PhaseEvent<'_>, _outcome: std::result::Result<(), &Error>) {}

    fn state_changed(&self, _table: &str, _from: ReconcileState, _to: ReconcileState) {}

    /// Called after each statement a deploy commits or sends.
    fn statement_applied(&self, _driver: DriverKind, _index: usize, _total: usize) {}
}

/// Reports every event through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn phase_started(&self, event: &PhaseEvent<'_>) {
        tracing::debug!(
            table = event.table,
            driver = %event.driver,
            phase = %event.phase,
            "phase started"
        );
    }

    fn phase_finished(&self, event: &PhaseEvent<'_>, outcome: std::result::Result<(), &Error>) {
        match outcome {
            Ok(()) => tracing::debug!(
                table = event.table,
                driver = %event.driver,
                phase = %event.phase,
                "phase finished"
            ),
            Err(err) => tracing::warn!(
                table = event.table,
                driver = %event.driver,
                phase = %event.phase,
                error = %err,
                "phase failed"
            ),
        }
    }

    fn state_changed(&self, table: &str, from: ReconcileState, to: ReconcileState) {
        tracing::info!(table, %from, %to, "reconcile state");
    }

    fn statement_applied(&self, driver: DriverKind, index: usize, total: usize) {
        tracing::trace!(%driver, statement = index + 1, total, "statement applied");
    }
}

/// Carried into every introspect, plan and deploy call.
#[derive(Clone)]
pub struct Context {
    cancel: CancellationToken,
    observer: Arc<dyn Observer>,
}

impl Default for Context {
    fn default() -> Self {
        Context {
            cancel: CancellationToken::new(),
            observer: Arc::new(TracingObserver),
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = observer;
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn observer(&self) -> &dyn Observer {
        self.observer.as_ref()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fail with [`Error::Cancelled`] if the token has fired.
    pub fn ensure_active(&self) -> Result<()> {
        self.ensure_active_at(0, 0)
    }

    pub(crate) fn ensure_active_at(&self, applied: usize, total: usize) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled { applied, total });
        }
        Ok(())
    }

    /// Run `fut` unless the token fires first.
    pub async fn guard<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled { applied: 0, total: 0 }),
            out = fut => out,
        }
    }

    /// Run `f` between a started and a finished event for `phase`.
    pub(crate) async fn phase<T>(
        &self,
        table: &str,
        driver: DriverKind,
        phase: Phase,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let event = PhaseEvent {
            table,
            driver,
            phase,
        };
        self.observer.phase_started(&event);
        let out = match self.ensure_active() {
            Ok(()) => fut.await,
            Err(err) => Err(err),
        };
        self.observer
            .phase_finished(&event, out.as_ref().map(|_| ()));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_guard_cancelled() {
        let ctx = Context::new();
        ctx.cancellation_token().cancel();
        let out = ctx.guard(std::future::pending::<Result<()>>()).await;
        assert!(matches!(out, Err(Error::Cancelled { applied: 0, .. })));
        assert!(ctx.ensure_active().is_err());
    }

    #[tokio::test]
    async fn test_guard_passes_through() {
        let ctx = Context::new();
        let out = ctx.guard(async { Ok(7) }).await.unwrap();
        assert_eq!(out, 7);
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(Phase::PlanSeed.to_string(), "plan-seed");
        assert_eq!(ReconcileState::Discarded.to_string(), "Discarded");
    }
}
