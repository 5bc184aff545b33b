//! Configuration file handling for keel.
//!
//! Looks for `.config/keel.yaml` in the current directory or any parent
//! directory. Every field is optional; command-line flags and `KEEL_*`
//! environment variables take precedence.

use camino::{Utf8Path, Utf8PathBuf};
use keel::DriverKind;
use serde::Deserialize;

const CONFIG_FILE: &str = ".config/keel.yaml";

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub driver: Option<DriverKind>,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub keyspace: Option<String>,
    /// Relative paths are resolved against the project root.
    #[serde(default)]
    pub input_dir: Option<Utf8PathBuf>,
    #[serde(default)]
    pub output_dir: Option<Utf8PathBuf>,
    #[serde(default)]
    pub deploy_seed_data: bool,
    #[serde(default)]
    pub allow_drop_columns: bool,
    #[serde(default)]
    pub verify_before_apply: bool,
}

/// A config file and the project root it was found in (the directory
/// holding `.config/`).
#[derive(Debug)]
pub struct Loaded {
    pub config: FileConfig,
    pub path: Utf8PathBuf,
    pub root: Utf8PathBuf,
}

impl Loaded {
    /// `path` as given when absolute, otherwise under the project root.
    pub fn resolve(&self, path: &Utf8Path) -> Utf8PathBuf {
        if path.is_absolute() {
            path.to_owned()
        } else {
            self.root.join(path)
        }
    }
}

/// Load `.config/keel.yaml`, searching up from the current directory.
/// `Ok(None)` when there is no config file.
pub fn load() -> Result<Option<Loaded>, ConfigError> {
    let cwd = std::env::current_dir().map_err(|e| ConfigError::Io {
        path: ".".into(),
        source: e,
    })?;
    let cwd = Utf8PathBuf::from_path_buf(cwd)
        .map_err(|p| ConfigError::NonUtf8(p.display().to_string()))?;
    load_from(&cwd)
}

/// Load configuration starting from a specific directory.
pub fn load_from(start: &Utf8Path) -> Result<Option<Loaded>, ConfigError> {
    let Some(root) = find_root(start) else {
        return Ok(None);
    };
    let path = root.join(CONFIG_FILE);
    let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    let config: FileConfig = serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.clone(),
        source,
    })?;
    tracing::debug!(%path, "loaded config");
    Ok(Some(Loaded { config, path, root }))
}

/// The nearest ancestor of `start` (itself included) holding `.config/keel.yaml`.
fn find_root(start: &Utf8Path) -> Option<Utf8PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(CONFIG_FILE).is_file())
        .map(Utf8Path::to_owned)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: Utf8PathBuf,
        source: serde_yaml::Error,
    },

    #[error("current directory is not valid UTF-8: {0}")]
    NonUtf8(String),
}
