use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpecError {
    #[error("unknown database driver: {0:?}")]
    UnknownDriver(String),

    #[error("failed to parse spec: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("table name must not be empty")]
    EmptyName,

    #[error("spec {name:?} has no schema block")]
    NoSchema { name: String },

    #[error("invalid seed data for {table:?}: {reason}")]
    InvalidSeed { table: String, reason: String },

    #[error("invalid seed value: {0}")]
    InvalidSeedValue(String),
}
