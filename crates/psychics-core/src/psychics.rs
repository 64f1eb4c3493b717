//! The [`Psychics`] runtime facade and its cross-thread [`PsychicsHandle`].

use std::sync::{Arc, Weak};

use psychics_update::{GitHubReleaseSource, SelfUpdateAgent, UpdateOutcome, UpdateState};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::bridge::{BridgeOutcome, EventBridge};
use crate::config::PsychicsConfig;
use crate::coordinator::{TickCoordinator, TickReport};
use crate::definition::{DefinitionStore, LoadReport, StoreError};
use crate::error::{HandleError, PsychicsError};
use crate::host::{event_names, EntityTransport, HostEvent, PlayerId, Requester, Roster};
use crate::instance::{AbilityCatalog, PsychicInstance};
use crate::projector::FakeEntityProjector;
use crate::registry::{InstanceRegistry, RegistryError};

/// Feedback lines sent to an update requester.
pub mod update_messages {
    /// Sent when the request starts.
    pub const STARTED: &str = "Attempt to update.";
    /// Sent when a newer release was staged.
    pub const UPDATED: &str = "Updated successfully. Applies after the server restarts.";
    /// Sent when the running version is the latest.
    pub const UP_TO_DATE: &str = "Up to date!";
    /// Sent when the update failed.
    pub const FAILED: &str = "Update failed. Check the console.";
}

// =============================================================================
// Handle
// =============================================================================

enum Request {
    Attach {
        player: PlayerId,
        psychic: String,
        reply: oneshot::Sender<Result<(), RegistryError>>,
    },
    Detach {
        player: PlayerId,
        reply: oneshot::Sender<bool>,
    },
    Event(HostEvent),
}

/// Sends work to the tick thread from anywhere.
///
/// Requests queue up and are applied at the start of the next
/// [`Psychics::on_tick`]. Replies arrive on the returned `oneshot` receivers.
/// Definition reloads do not need the tick thread and run on the caller.
#[derive(Clone)]
pub struct PsychicsHandle {
    tx: mpsc::UnboundedSender<Request>,
    store: Arc<DefinitionStore>,
}

impl std::fmt::Debug for PsychicsHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PsychicsHandle")
            .field("closed", &self.tx.is_closed())
            .finish_non_exhaustive()
    }
}

impl PsychicsHandle {
    fn send(&self, request: Request) -> Result<(), HandleError> {
        self.tx.send(request).map_err(|_| HandleError::Closed)
    }

    /// Queues an attach.
    ///
    /// # Errors
    ///
    /// [`HandleError::Closed`] if the runtime is gone.
    pub fn attach(
        &self,
        player: PlayerId,
        psychic: &str,
    ) -> Result<oneshot::Receiver<Result<(), RegistryError>>, HandleError> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::Attach {
            player,
            psychic: psychic.to_string(),
            reply,
        })?;
        Ok(rx)
    }

    /// Queues a detach. The reply is `false` if the player had no psychic.
    ///
    /// # Errors
    ///
    /// [`HandleError::Closed`] if the runtime is gone.
    pub fn detach(&self, player: PlayerId) -> Result<oneshot::Receiver<bool>, HandleError> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::Detach { player, reply })?;
        Ok(rx)
    }

    /// Queues a host event for the event bridge.
    ///
    /// # Errors
    ///
    /// [`HandleError::Closed`] if the runtime is gone.
    pub fn dispatch_event(&self, event: HostEvent) -> Result<(), HandleError> {
        self.send(Request::Event(event))
    }

    /// Queues a `player_join` event.
    ///
    /// # Errors
    ///
    /// [`HandleError::Closed`] if the runtime is gone.
    pub fn join(&self, player: PlayerId) -> Result<(), HandleError> {
        self.dispatch_event(HostEvent::for_player(event_names::PLAYER_JOIN, player))
    }

    /// Queues a `player_quit` event.
    ///
    /// # Errors
    ///
    /// [`HandleError::Closed`] if the runtime is gone.
    pub fn quit(&self, player: PlayerId) -> Result<(), HandleError> {
        self.dispatch_event(HostEvent::for_player(event_names::PLAYER_QUIT, player))
    }

    /// Reloads every definition kind on the calling thread.
    ///
    /// Running instances keep the definitions they were built from; later
    /// attaches see the new ones.
    ///
    /// # Errors
    ///
    /// See [`DefinitionStore::load_all`].
    pub fn reload(&self) -> Result<Vec<LoadReport>, StoreError> {
        self.store.load_all()
    }
}

// =============================================================================
// Runtime
// =============================================================================

/// The psychics runtime: definitions, live instances, and fake entities.
///
/// Construct once at host start-up with [`initialize`](Self::initialize),
/// call [`on_tick`](Self::on_tick) every host tick, and
/// [`shutdown`](Self::shutdown) when the host stops. Everything except
/// [`handle`](Self::handle) and the self-update calls belongs to the tick
/// thread.
pub struct Psychics {
    config: PsychicsConfig,
    store: Arc<DefinitionStore>,
    registry: InstanceRegistry,
    projector: FakeEntityProjector,
    coordinator: TickCoordinator,
    bridge: EventBridge,
    handle: PsychicsHandle,
    requests: mpsc::UnboundedReceiver<Request>,
    updater: Option<SelfUpdateAgent>,
}

impl std::fmt::Debug for Psychics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Psychics")
            .field("data_dir", &self.config.data_dir)
            .field("store", &self.store)
            .field("instances", &self.registry.len())
            .field("projector", &self.projector)
            .field("updater", &self.updater)
            .finish_non_exhaustive()
    }
}

impl Psychics {
    /// Starts the runtime.
    ///
    /// Loads every definition kind, makes each online player an observer,
    /// attaches the psychics their esper bindings name, and flushes the
    /// projector. A player whose binding cannot be attached is logged and
    /// skipped.
    ///
    /// # Errors
    ///
    /// [`PsychicsError::Store`] if a definition directory cannot be listed.
    pub fn initialize(
        config: PsychicsConfig,
        catalog: AbilityCatalog,
        transport: Box<dyn EntityTransport>,
        roster: &dyn Roster,
    ) -> Result<Self, PsychicsError> {
        let store = Arc::new(DefinitionStore::new(config.directories()));
        store.load_all()?;

        let mut registry = InstanceRegistry::new(catalog);
        let mut projector = FakeEntityProjector::new(transport);
        for player in roster.online_players() {
            projector.add_observer(player);
            if let Err(err) = registry.attach_esper(&store, player, &mut projector) {
                warn!(%player, error = %err, "cannot attach esper psychic");
            }
        }
        projector.flush();

        let (tx, requests) = mpsc::unbounded_channel();
        let handle = PsychicsHandle {
            tx,
            store: Arc::clone(&store),
        };
        info!(
            data_dir = %config.data_dir.display(),
            instances = registry.len(),
            "psychics initialized"
        );

        Ok(Self {
            coordinator: TickCoordinator::new(config.tick_budget()),
            config,
            store,
            registry,
            projector,
            bridge: EventBridge::new(),
            handle,
            requests,
            updater: None,
        })
    }

    /// Detaches every instance and removes every fake entity.
    pub fn shutdown(&mut self) {
        self.registry.unload_all(&mut self.projector);
        self.projector.clear();
        self.projector.flush();
        info!("psychics shut down");
    }

    /// Runs one host tick: applies queued handle requests, then updates every
    /// live instance.
    pub fn on_tick(&mut self) -> TickReport {
        while let Ok(request) = self.requests.try_recv() {
            self.apply(request);
        }
        self.coordinator.run_tick(&mut self.registry, &mut self.projector)
    }

    fn apply(&mut self, request: Request) {
        // A dropped receiver only means the caller stopped waiting.
        match request {
            Request::Attach {
                player,
                psychic,
                reply,
            } => {
                let result = self.attach(player, &psychic).map(|_| ());
                if let Err(err) = &result {
                    warn!(%player, %psychic, error = %err, "queued attach failed");
                }
                let _ = reply.send(result);
            }
            Request::Detach { player, reply } => {
                let _ = reply.send(self.detach(player));
            }
            Request::Event(event) => {
                self.dispatch_event(&event);
            }
        }
    }

    /// Attaches `psychic` to `player`, replacing any current instance.
    ///
    /// # Errors
    ///
    /// See [`InstanceRegistry::attach`].
    pub fn attach(
        &mut self,
        player: PlayerId,
        psychic: &str,
    ) -> Result<&mut PsychicInstance, RegistryError> {
        self.registry
            .attach(&self.store, player, psychic, &mut self.projector)
    }

    /// Detaches `player`'s psychic. Returns `false` if there was none.
    pub fn detach(&mut self, player: PlayerId) -> bool {
        self.registry.detach(player, &mut self.projector)
    }

    /// Reloads every definition kind.
    ///
    /// # Errors
    ///
    /// See [`DefinitionStore::load_all`].
    pub fn reload(&self) -> Result<Vec<LoadReport>, StoreError> {
        self.store.load_all()
    }

    /// Routes a host event through the event bridge.
    pub fn dispatch_event(&mut self, event: &HostEvent) -> BridgeOutcome {
        self.bridge
            .dispatch(event, &self.store, &mut self.registry, &mut self.projector)
    }

    /// A handle for other threads.
    #[must_use]
    pub fn handle(&self) -> PsychicsHandle {
        self.handle.clone()
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &PsychicsConfig {
        &self.config
    }

    /// The definition store.
    #[must_use]
    pub fn store(&self) -> &Arc<DefinitionStore> {
        &self.store
    }

    /// Live instances.
    #[must_use]
    pub fn registry(&self) -> &InstanceRegistry {
        &self.registry
    }

    /// The fake-entity projector.
    #[must_use]
    pub fn projector(&self) -> &FakeEntityProjector {
        &self.projector
    }

    // -------------------------------------------------------------------------
    // Self-update
    // -------------------------------------------------------------------------

    /// Enables self-update against GitHub releases using the `update`
    /// configuration section. Work is spawned on `runtime`.
    ///
    /// # Errors
    ///
    /// [`PsychicsError::UpdateUnavailable`] without an `update` section, or
    /// [`PsychicsError::Update`] if the HTTP client cannot be built.
    pub fn enable_self_update(&mut self, runtime: Handle) -> Result<(), PsychicsError> {
        let config = self
            .config
            .update
            .clone()
            .ok_or(PsychicsError::UpdateUnavailable)?;
        let source = Arc::new(GitHubReleaseSource::new(&config)?);
        self.updater = Some(SelfUpdateAgent::new(config, source, runtime));
        Ok(())
    }

    /// Uses `agent` for self-updates.
    pub fn set_update_agent(&mut self, agent: SelfUpdateAgent) {
        self.updater = Some(agent);
    }

    /// State of the update agent, if self-update is enabled.
    #[must_use]
    pub fn update_state(&self) -> Option<UpdateState> {
        self.updater.as_ref().map(SelfUpdateAgent::state)
    }

    /// Starts a self-update and calls `on_outcome` from the update runtime
    /// when it finishes. Returns immediately.
    ///
    /// # Errors
    ///
    /// [`PsychicsError::UpdateUnavailable`] if self-update is not enabled.
    pub fn request_self_update<F>(
        &self,
        current_version: &str,
        on_outcome: F,
    ) -> Result<(), PsychicsError>
    where
        F: FnOnce(UpdateOutcome) + Send + 'static,
    {
        let agent = self
            .updater
            .as_ref()
            .ok_or(PsychicsError::UpdateUnavailable)?;
        info!(current_version, "self-update requested");
        agent
            .request_update(current_version)
            .on_complete(agent.runtime(), on_outcome);
        Ok(())
    }

    /// Starts a self-update on behalf of `requester` and reports the result
    /// to it, if it is still connected by then.
    ///
    /// # Errors
    ///
    /// [`PsychicsError::UpdateUnavailable`] if self-update is not enabled.
    pub fn request_self_update_for(
        &self,
        current_version: &str,
        requester: Weak<dyn Requester>,
    ) -> Result<(), PsychicsError> {
        notify(&requester, update_messages::STARTED);
        self.request_self_update(current_version, move |outcome| {
            let message = match &outcome {
                UpdateOutcome::Updated { version, staged_path } => {
                    info!(%version, path = %staged_path.display(), "update staged");
                    update_messages::UPDATED
                }
                UpdateOutcome::UpToDate { version } => {
                    info!(%version, "already up to date");
                    update_messages::UP_TO_DATE
                }
                UpdateOutcome::Failed(err) => {
                    warn!(error = %err, "self-update failed");
                    update_messages::FAILED
                }
            };
            notify(&requester, message);
        })
    }
}

fn notify(requester: &Weak<dyn Requester>, message: &str) {
    match requester.upgrade() {
        Some(requester) if requester.is_connected() => requester.send_message(message),
        _ => info!(message, "update requester disconnected; message not delivered"),
    }
}

// =============================================================================
// Tests
// =============================================================================
