//! The self-update agent and its one-shot outcome.
//!
//! # State Machine
//!
//! ```text
//! Idle -> Checking -> UpToDate
//!                  -> Downloading -> Downloaded
//!                  -> Failed        (from Checking or Downloading)
//! ```
//!
//! Every request runs as its own task on the runtime handle given to the
//! agent, so callers on a latency-sensitive thread never block. The outcome
//! arrives through the returned [`UpdateTask`], which can be awaited, polled
//! without blocking via [`UpdateTask::try_take`], or handed a callback with
//! [`UpdateTask::on_complete`].

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::runtime::Handle;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use crate::config::UpdateConfig;
use crate::error::UpdateError;
use crate::same_version;
use crate::source::ReleaseSource;
use crate::staging::StagedDownload;

// =============================================================================
// State and Outcome
// =============================================================================

/// Where the agent currently is in its state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateState {
    /// No update has run yet.
    Idle,
    /// Querying the release index.
    Checking,
    /// Fetching the release artifact.
    Downloading,
    /// The last check found the running version current.
    UpToDate,
    /// The last update staged a new package.
    Downloaded,
    /// The last update failed.
    Failed,
}

impl UpdateState {
    /// Returns true while a request is in flight.
    #[must_use]
    pub fn is_running(self) -> bool {
        matches!(self, Self::Checking | Self::Downloading)
    }
}

/// Terminal result of one update request.
#[derive(Debug)]
pub enum UpdateOutcome {
    /// A newer release was staged; it applies after the host restarts.
    Updated {
        /// Tag of the staged release.
        version: String,
        /// Where the release was written.
        staged_path: PathBuf,
    },
    /// The running version is already the latest.
    UpToDate {
        /// The latest tag reported by the source.
        version: String,
    },
    /// The update did not complete.
    Failed(UpdateError),
}

impl UpdateOutcome {
    /// Returns true for `Updated` and `UpToDate`.
    #[must_use]
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed(_))
    }

    fn terminal_state(&self) -> UpdateState {
        match self {
            Self::Updated { .. } => UpdateState::Downloaded,
            Self::UpToDate { .. } => UpdateState::UpToDate,
            Self::Failed(_) => UpdateState::Failed,
        }
    }
}

// =============================================================================
// Update Task
// =============================================================================

/// Handle to one in-flight update request.
///
/// Resolves exactly once. If the background task is torn down before it
/// reports (for instance because the runtime shut down), the task resolves to
/// [`UpdateError::Aborted`].
#[derive(Debug)]
pub struct UpdateTask {
    rx: oneshot::Receiver<UpdateOutcome>,
}

impl UpdateTask {
    fn ready(outcome: UpdateOutcome) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(outcome);
        Self { rx }
    }

    /// Takes the outcome if it is available, without blocking.
    ///
    /// Returns `None` while the update is still running. After the outcome has
    /// been taken, later calls report [`UpdateError::Aborted`].
    pub fn try_take(&mut self) -> Option<UpdateOutcome> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => {
                Some(UpdateOutcome::Failed(UpdateError::Aborted))
            }
        }
    }

    /// Runs `handler` with the outcome once it arrives.
    pub fn on_complete<F>(self, runtime: &Handle, handler: F)
    where
        F: FnOnce(UpdateOutcome) + Send + 'static,
    {
        runtime.spawn(async move {
            handler(self.await);
        });
    }
}

impl Future for UpdateTask {
    type Output = UpdateOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.unwrap_or_else(|_| UpdateOutcome::Failed(UpdateError::Aborted)))
    }
}

// =============================================================================
// Agent
// =============================================================================

struct AgentInner {
    config: UpdateConfig,
    source: Arc<dyn ReleaseSource>,
    state: watch::Sender<UpdateState>,
    busy: AtomicBool,
}

/// Checks for, downloads, and stages newer releases off the caller's thread.
///
/// Cloning the agent is cheap; clones share state, so at most one update runs
/// at a time across all of them.
#[derive(Clone)]
pub struct SelfUpdateAgent {
    inner: Arc<AgentInner>,
    runtime: Handle,
}

impl std::fmt::Debug for SelfUpdateAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelfUpdateAgent")
            .field("repo", &self.inner.config.repo())
            .field("package_path", &self.inner.config.package_path)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl SelfUpdateAgent {
    /// Creates an idle agent that spawns its work on `runtime`.
    #[must_use]
    pub fn new(config: UpdateConfig, source: Arc<dyn ReleaseSource>, runtime: Handle) -> Self {
        let (state, _) = watch::channel(UpdateState::Idle);
        Self {
            inner: Arc::new(AgentInner {
                config,
                source,
                state,
                busy: AtomicBool::new(false),
            }),
            runtime,
        }
    }

    /// Current state of the agent.
    #[must_use]
    pub fn state(&self) -> UpdateState {
        *self.inner.state.borrow()
    }

    /// Subscribes to state transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<UpdateState> {
        self.inner.state.subscribe()
    }

    /// The runtime handle the agent spawns on.
    #[must_use]
    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    /// Starts an update against `current_version` and returns immediately.
    ///
    /// If another request is still running, the returned task is already
    /// resolved with [`UpdateError::InProgress`].
    #[must_use = "the outcome is only observable through the returned task"]
    pub fn request_update(&self, current_version: &str) -> UpdateTask {
        if self.inner.busy.swap(true, Ordering::AcqRel) {
            debug!("update requested while another is running");
            return UpdateTask::ready(UpdateOutcome::Failed(UpdateError::InProgress));
        }

        let guard = RunGuard {
            inner: Arc::clone(&self.inner),
            finished: false,
        };
        let (tx, rx) = oneshot::channel();
        let current = current_version.to_string();
        self.runtime.spawn(async move {
            let outcome = match guard.inner.try_update(&current).await {
                Ok(outcome) => outcome,
                Err(e) => UpdateOutcome::Failed(e),
            };
            guard.finish(&outcome);
            if tx.send(outcome).is_err() {
                debug!("update requester went away before the outcome arrived");
            }
        });
        UpdateTask { rx }
    }
}

/// Owns the busy flag for one request. Dropping it without
/// [`finish`](Self::finish), as when the task panics or is aborted, records
/// a failure and frees the agent.
struct RunGuard {
    inner: Arc<AgentInner>,
    finished: bool,
}

impl RunGuard {
    fn finish(mut self, outcome: &UpdateOutcome) {
        self.inner.finish(outcome);
        self.finished = true;
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if !self.finished {
            warn!("update task ended without an outcome");
            self.inner.state.send_replace(UpdateState::Failed);
            self.inner.busy.store(false, Ordering::Release);
        }
    }
}

impl AgentInner {
    async fn try_update(&self, current: &str) -> Result<UpdateOutcome, UpdateError> {
        let repo = self.config.repo();
        let timeout = self.config.timeout();

        self.state.send_replace(UpdateState::Checking);
        let release = tokio::time::timeout(timeout, self.source.latest_version(&repo))
            .await
            .map_err(|_| UpdateError::TimedOut {
                step: "latest release lookup",
                timeout,
            })??;

        if same_version(&release.tag, current) {
            return Ok(UpdateOutcome::UpToDate {
                version: release.tag,
            });
        }

        let file_name = self
            .config
            .package_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let asset = release
            .asset_for(&file_name)
            .cloned()
            .ok_or_else(|| UpdateError::Check(format!("release {} has no assets", release.tag)))?;

        self.state.send_replace(UpdateState::Downloading);
        let staged = StagedDownload::create(&self.config.package_path)?;
        let bytes = tokio::time::timeout(
            timeout,
            self.source
                .download_asset(&repo, &asset, staged.scratch_path()),
        )
        .await
        .map_err(|_| UpdateError::TimedOut {
            step: "release download",
            timeout,
        })??;
        let staged_path = staged.commit()?;

        debug!(bytes, path = %staged_path.display(), "release staged");
        Ok(UpdateOutcome::Updated {
            version: release.tag,
            staged_path,
        })
    }

    fn finish(&self, outcome: &UpdateOutcome) {
        match outcome {
            UpdateOutcome::Updated {
                version,
                staged_path,
            } => info!(%version, path = %staged_path.display(), "update staged; applies after restart"),
            UpdateOutcome::UpToDate { version } => info!(%version, "already up to date"),
            UpdateOutcome::Failed(error) => warn!(%error, "update failed"),
        }
        self.state.send_replace(outcome.terminal_state());
        self.busy.store(false, Ordering::Release);
    }
}

// =============================================================================
// Tests
// =============================================================================
