//! Error types for the self-update agent.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Why an update attempt failed.
///
/// These errors never leave the agent as panics: they are carried inside
/// [`UpdateOutcome::Failed`](crate::UpdateOutcome::Failed) to whoever
/// requested the update.
#[derive(Debug, Error)]
pub enum UpdateError {
    /// The release index could not be queried or understood.
    #[error("update check failed: {0}")]
    Check(String),
    /// The release artifact could not be fetched.
    #[error("download failed: {0}")]
    Download(String),
    /// A local file operation failed.
    #[error("{action} {}: {source}", path.display())]
    Io {
        /// What the agent was doing.
        action: &'static str,
        /// The file involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// A network step exceeded its bound.
    #[error("{step} timed out after {timeout:?}")]
    TimedOut {
        /// Which step ran out of time.
        step: &'static str,
        /// The bound that was exceeded.
        timeout: Duration,
    },
    /// Another update is already running.
    #[error("an update is already in progress")]
    InProgress,
    /// The background task ended without reporting.
    #[error("update task aborted before completion")]
    Aborted,
}

impl UpdateError {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }
}
