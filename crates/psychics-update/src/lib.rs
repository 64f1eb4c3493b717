//! # Psychics Update
//!
//! Background self-update agent for the psychics runtime.
//!
//! The agent asks a remote release source for the latest release tag, compares
//! it with the running version and, when they differ, downloads the release
//! artifact next to the running package. The active package file is never
//! opened for writing: downloads land in a temporary file inside the staging
//! directory and are renamed into place only once fully written.
//!
//! ```text
//! <package dir>/psychics.jar          <- active package, untouched
//! <package dir>/update/psychics.jar   <- staged release, applied on restart
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use psychics_update::{GitHubReleaseSource, SelfUpdateAgent, UpdateConfig, UpdateOutcome};
//!
//! let config = UpdateConfig::new("noonmaru", "psychics", "plugins/psychics.jar");
//! let source = Arc::new(GitHubReleaseSource::new(&config)?);
//! let agent = SelfUpdateAgent::new(config, source, tokio::runtime::Handle::current());
//!
//! match agent.request_update("1.2.0").await {
//!     UpdateOutcome::Updated { staged_path, .. } => println!("staged {}", staged_path.display()),
//!     UpdateOutcome::UpToDate { .. } => println!("up to date"),
//!     UpdateOutcome::Failed(e) => eprintln!("update failed: {e}"),
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod agent;
pub mod config;
pub mod error;
pub mod source;
pub mod staging;

// Re-exports for convenience
pub use agent::{SelfUpdateAgent, UpdateOutcome, UpdateState, UpdateTask};
pub use config::UpdateConfig;
pub use error::UpdateError;
pub use source::{GitHubReleaseSource, Release, ReleaseAsset, ReleaseSource, RepoRef};
pub use staging::{staging_path_for, StagedDownload};

/// Returns true if two release tags name the same version.
///
/// A leading `v` is ignored on either side, so `v1.2.0` matches `1.2.0`.
#[must_use]
pub fn same_version(a: &str, b: &str) -> bool {
    fn strip(tag: &str) -> &str {
        let tag = tag.trim();
        tag.strip_prefix('v')
            .or_else(|| tag.strip_prefix('V'))
            .unwrap_or(tag)
    }
    strip(a) == strip(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_version_ignores_prefix() {
        assert!(same_version("v1.2.0", "1.2.0"));
        assert!(same_version("1.2.0", "V1.2.0"));
        assert!(same_version(" 0.3 ", "0.3"));
    }

    #[test]
    fn same_version_detects_difference() {
        assert!(!same_version("1.2.0", "1.2.1"));
        assert!(!same_version("v2", "1"));
    }
}
