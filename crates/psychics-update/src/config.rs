//! Configuration for the self-update agent.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::source::RepoRef;

/// Default GitHub API endpoint.
pub const DEFAULT_API_BASE: &str = "https://api.github.com";

/// Default bound on each network step, in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Where updates come from and where the running package lives.
///
/// # Example
///
/// ```
/// use psychics_update::UpdateConfig;
/// use std::time::Duration;
///
/// let config = UpdateConfig::new("noonmaru", "psychics", "plugins/psychics.jar");
/// assert_eq!(config.repo().to_string(), "noonmaru/psychics");
/// assert_eq!(config.timeout(), Duration::from_secs(30));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// Repository owner on the release host.
    pub owner: String,
    /// Repository name on the release host.
    pub repository: String,
    /// Path of the running package. The staged download goes next to it.
    pub package_path: PathBuf,
    /// Bound on each network step, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Base URL of the release API.
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

impl UpdateConfig {
    /// Creates a config with default timeout and API base.
    #[must_use]
    pub fn new(owner: &str, repository: &str, package_path: impl Into<PathBuf>) -> Self {
        Self {
            owner: owner.to_string(),
            repository: repository.to_string(),
            package_path: package_path.into(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }

    /// Overrides the per-step timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX).max(1);
        self
    }

    /// The repository reference used for release queries.
    #[must_use]
    pub fn repo(&self) -> RepoRef {
        RepoRef::new(&self.owner, &self.repository)
    }

    /// The per-step timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let json = r#"{"owner":"a","repository":"b","package_path":"p.jar"}"#;
        let config: UpdateConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert_eq!(config.api_base, DEFAULT_API_BASE);
        assert_eq!(config.package_path, PathBuf::from("p.jar"));
    }

    #[test]
    fn with_timeout_never_zero() {
        let config = UpdateConfig::new("a", "b", "p.jar").with_timeout(Duration::ZERO);
        assert_eq!(config.timeout(), Duration::from_millis(1));

        let config = config.with_timeout(Duration::from_millis(250));
        assert_eq!(config.timeout_ms, 250);
    }
}
