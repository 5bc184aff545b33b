use camino::Utf8PathBuf;
use keel_schema::{DriverKind, SpecError};
use thiserror::Error;

use crate::Phase;
use crate::solver::SolverError;

/// A boxed error from a database client library.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown database driver: {0:?}")]
    UnknownDriver(String),

    #[error("table {table:?} has no schema block for driver {driver}")]
    MissingSchema { table: String, driver: DriverKind },

    #[error("driver {driver} expects {expected} connection parameters")]
    ConnectionMismatch {
        driver: DriverKind,
        expected: &'static str,
    },

    #[error(transparent)]
    Spec(#[from] SpecError),

    #[error("invalid schema for {table:?}: {reason}")]
    InvalidSchema { table: String, reason: String },

    #[error("cannot order changes: {0}")]
    Solver(#[from] SolverError),

    #[error("{driver}: could not connect: {source}")]
    Connection {
        driver: DriverKind,
        #[source]
        source: BoxError,
    },

    #[error("{driver}: introspection failed: {source}")]
    Introspection {
        driver: DriverKind,
        #[source]
        source: BoxError,
    },

    /// A statement failed and nothing from this deploy was committed.
    #[error("statement {index} failed, nothing applied: {statement}: {source}")]
    Statement {
        index: usize,
        statement: String,
        #[source]
        source: BoxError,
    },

    /// A non-transactional deploy failed after some statements committed.
    #[error("{applied} of {total} statements applied, then failed: {statement}: {source}")]
    PartialApply {
        applied: usize,
        total: usize,
        statement: String,
        #[source]
        source: BoxError,
    },

    #[error("{operation} is not supported for driver {driver}")]
    Unsupported {
        driver: DriverKind,
        operation: &'static str,
    },

    #[error("cancelled after {applied} of {total} statements")]
    Cancelled { applied: usize, total: usize },

    #[error("plan for {table:?} changed since it was produced")]
    StalePlan { table: String },

    #[error("{path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{driver} {phase} {table:?}: {source}")]
    Reconcile {
        table: String,
        driver: DriverKind,
        phase: Phase,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub(crate) fn connection(driver: DriverKind, source: impl Into<BoxError>) -> Self {
        Error::Connection {
            driver,
            source: source.into(),
        }
    }

    pub(crate) fn introspection(driver: DriverKind, source: impl Into<BoxError>) -> Self {
        Error::Introspection {
            driver,
            source: source.into(),
        }
    }

    pub(crate) fn invalid(table: &str, reason: impl Into<String>) -> Self {
        Error::InvalidSchema {
            table: table.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn unsupported(driver: DriverKind, operation: &'static str) -> Self {
        Error::Unsupported { driver, operation }
    }

    /// The underlying error, with orchestrator context peeled off.
    pub fn root(&self) -> &Error {
        match self {
            Error::Reconcile { source, .. } => source.root(),
            other => other,
        }
    }

    /// `(applied, total)` when some statements committed before the failure.
    pub fn partial_progress(&self) -> Option<(usize, usize)> {
        match self.root() {
            Error::PartialApply { applied, total, .. } => Some((*applied, *total)),
            Error::Cancelled { applied, total } if *applied > 0 => Some((*applied, *total)),
            _ => None,
        }
    }

    /// Whether this is a configuration error raised before any I/O.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self.root(),
            Error::UnknownDriver(_) | Error::MissingSchema { .. } | Error::ConnectionMismatch { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
