//! Runtime configuration.
//!
//! Read from `<data_dir>/config.json` when present. Every field is optional:
//!
//! ```json
//! {
//!     "tick_budget_ms": 10,
//!     "update": {
//!         "owner": "noonmaru",
//!         "repository": "psychics",
//!         "package_path": "plugins/psychics.jar"
//!     }
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use psychics_update::UpdateConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::definition::DataDirectories;

/// Name of the configuration file inside the data directory.
pub const CONFIG_FILE: &str = "config.json";

const DEFAULT_TICK_BUDGET_MS: u64 = 10;

fn default_tick_budget_ms() -> u64 {
    DEFAULT_TICK_BUDGET_MS
}

/// Errors reading the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but cannot be read.
    #[error("cannot read {}: {source}", path.display())]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid configuration JSON.
    #[error("malformed {}: {source}", path.display())]
    Parse {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
}

/// Settings for a [`Psychics`](crate::Psychics) runtime.
///
/// # Example
///
/// ```
/// use psychics_core::PsychicsConfig;
/// use std::time::Duration;
///
/// let config = PsychicsConfig::new("plugins/Psychics");
/// assert_eq!(config.tick_budget(), Duration::from_millis(10));
/// assert!(config.update.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PsychicsConfig {
    /// Root of the definition directories. Defaults to the directory holding
    /// the configuration file.
    #[serde(default)]
    pub data_dir: PathBuf,
    /// Tick duration above which a warning is logged.
    #[serde(default = "default_tick_budget_ms")]
    pub tick_budget_ms: u64,
    /// Self-update settings; updates are unavailable without them.
    #[serde(default)]
    pub update: Option<UpdateConfig>,
}

impl PsychicsConfig {
    /// Default settings rooted at `data_dir`.
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            tick_budget_ms: DEFAULT_TICK_BUDGET_MS,
            update: None,
        }
    }

    /// Reads a configuration file. A missing `data_dir` resolves to the
    /// file's directory.
    ///
    /// # Errors
    ///
    /// [`ConfigError`] if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        if config.data_dir.as_os_str().is_empty() {
            config.data_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        }
        Ok(config)
    }

    /// Reads `<data_dir>/config.json`, or returns defaults if it does not exist.
    ///
    /// # Errors
    ///
    /// [`ConfigError`] if the file exists but is unreadable or malformed.
    pub fn load_or_default(data_dir: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let data_dir = data_dir.into();
        let path = data_dir.join(CONFIG_FILE);
        if path.is_file() {
            Self::from_file(&path)
        } else {
            debug!(path = %path.display(), "no configuration file, using defaults");
            Ok(Self::new(data_dir))
        }
    }

    /// Attaches self-update settings.
    #[must_use]
    pub fn with_update(mut self, update: UpdateConfig) -> Self {
        self.update = Some(update);
        self
    }

    /// The tick budget as a [`Duration`].
    #[must_use]
    pub fn tick_budget(&self) -> Duration {
        Duration::from_millis(self.tick_budget_ms)
    }

    /// The definition directories under `data_dir`.
    #[must_use]
    pub fn directories(&self) -> DataDirectories {
        DataDirectories::new(&self.data_dir)
    }
}
