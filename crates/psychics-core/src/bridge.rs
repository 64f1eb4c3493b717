//! Event bridge: turns host events into registry and instance operations.

use glam::Vec3;
use tracing::{debug, warn};

use crate::coordinator::InstanceFailure;
use crate::definition::DefinitionStore;
use crate::host::{event_names, HostEvent, PlayerId};
use crate::instance::{isolate, Activation, Directive, InstanceError};
use crate::projector::FakeEntityProjector;
use crate::registry::InstanceRegistry;

/// What the bridge did with an event.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeOutcome {
    /// A player joined and became an observer.
    Joined {
        /// The player.
        player: PlayerId,
        /// Psychic attached from the player's esper binding.
        psychic: Option<String>,
    },
    /// A player left.
    Quit {
        /// The player.
        player: PlayerId,
        /// Whether an instance was detached.
        detached: bool,
    },
    /// A player's location was recorded.
    Moved {
        /// The player.
        player: PlayerId,
    },
    /// An activation was attempted.
    Activation {
        /// The player.
        player: PlayerId,
        /// The ability.
        ability: String,
        /// Result of the attempt.
        result: Activation,
    },
    /// The event was forwarded to instances.
    Delivered {
        /// Instances that received it.
        recipients: usize,
        /// Instances that failed while handling it.
        failures: Vec<InstanceFailure>,
    },
    /// Nothing to do.
    Ignored {
        /// Why.
        reason: String,
    },
    /// The event was understood but could not be carried out.
    Failed {
        /// Why.
        reason: String,
    },
}

/// Routes [`HostEvent`]s.
///
/// Stateless; the borrowed store, registry, and projector are the state.
#[derive(Debug, Default, Clone, Copy)]
pub struct EventBridge;

impl EventBridge {
    /// Creates a bridge.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Handles one event. Never panics on malformed input; problems are
    /// logged and reported in the outcome.
    pub fn dispatch(
        &self,
        event: &HostEvent,
        store: &DefinitionStore,
        registry: &mut InstanceRegistry,
        projector: &mut FakeEntityProjector,
    ) -> BridgeOutcome {
        let outcome = match (event.name.as_str(), event.player) {
            (event_names::PLAYER_JOIN, Some(player)) => {
                Self::join(player, store, registry, projector)
            }
            (event_names::PLAYER_QUIT, Some(player)) => {
                let detached = registry.detach(player, projector);
                projector.remove_observer(player);
                BridgeOutcome::Quit { player, detached }
            }
            (event_names::PLAYER_MOVE, Some(player)) => Self::move_to(event, player, registry),
            (event_names::ABILITY_ACTIVATE, Some(player)) => {
                Self::activate(event, player, registry, projector)
            }
            (
                event_names::PLAYER_JOIN
                | event_names::PLAYER_QUIT
                | event_names::PLAYER_MOVE
                | event_names::ABILITY_ACTIVATE,
                None,
            ) => BridgeOutcome::Ignored {
                reason: format!("{} without a player", event.name),
            },
            (_, Some(player)) => Self::forward(event, &[player], registry, projector),
            (_, None) => {
                let everyone: Vec<_> = registry.live_snapshot().iter().collect();
                Self::forward(event, &everyone, registry, projector)
            }
        };

        match &outcome {
            BridgeOutcome::Ignored { reason } => debug!(event = %event.name, %reason, "event ignored"),
            BridgeOutcome::Failed { reason } => warn!(event = %event.name, %reason, "event failed"),
            _ => debug!(event = %event.name, "event handled"),
        }
        outcome
    }

    fn join(
        player: PlayerId,
        store: &DefinitionStore,
        registry: &mut InstanceRegistry,
        projector: &mut FakeEntityProjector,
    ) -> BridgeOutcome {
        projector.add_observer(player);
        match registry.attach_esper(store, player, projector) {
            Ok(instance) => BridgeOutcome::Joined {
                player,
                psychic: instance.map(|i| i.psychic_name().to_string()),
            },
            Err(err) => BridgeOutcome::Failed {
                reason: format!("cannot attach esper psychic for {player}: {err}"),
            },
        }
    }

    fn move_to(event: &HostEvent, player: PlayerId, registry: &mut InstanceRegistry) -> BridgeOutcome {
        let position = event
            .payload
            .get("position")
            .cloned()
            .map(serde_json::from_value::<[f32; 3]>);
        let location = match position {
            Some(Ok(xyz)) => Vec3::from_array(xyz),
            Some(Err(err)) => {
                return BridgeOutcome::Failed {
                    reason: format!("bad position: {err}"),
                }
            }
            None => {
                return BridgeOutcome::Failed {
                    reason: "missing position".to_string(),
                }
            }
        };
        match registry.get_mut(player) {
            Some(instance) => {
                instance.set_location(location);
                BridgeOutcome::Moved { player }
            }
            None => BridgeOutcome::Ignored {
                reason: format!("{player} has no psychic"),
            },
        }
    }

    fn activate(
        event: &HostEvent,
        player: PlayerId,
        registry: &mut InstanceRegistry,
        projector: &mut FakeEntityProjector,
    ) -> BridgeOutcome {
        let Some(ability) = event.payload_str("ability") else {
            return BridgeOutcome::Failed {
                reason: "missing ability".to_string(),
            };
        };
        let Some(instance) = registry.get_mut(player) else {
            return BridgeOutcome::Ignored {
                reason: format!("{player} has no psychic"),
            };
        };

        let mut directives = Vec::new();
        let result = isolate(|| instance.activate(ability, projector, &mut directives));
        apply(directives, registry, projector);

        match result {
            Ok(result) => BridgeOutcome::Activation {
                player,
                ability: ability.to_string(),
                result,
            },
            Err(err) => {
                settle(player, &err, registry, projector);
                BridgeOutcome::Failed {
                    reason: err.to_string(),
                }
            }
        }
    }

    fn forward(
        event: &HostEvent,
        players: &[PlayerId],
        registry: &mut InstanceRegistry,
        projector: &mut FakeEntityProjector,
    ) -> BridgeOutcome {
        let mut recipients = 0;
        let mut failures = Vec::new();
        let mut directives = Vec::new();

        for &player in players {
            let Some(instance) = registry.get_mut(player) else {
                continue;
            };
            recipients += 1;
            let handled = isolate(|| instance.handle_event(event, projector, &mut directives));
            if let Err(error) = handled {
                if error.is_fatal() {
                    directives.push(Directive::Detach(player));
                }
                failures.push(InstanceFailure { player, error });
            }
        }
        apply(directives, registry, projector);

        if recipients == 0 {
            return BridgeOutcome::Ignored {
                reason: "no psychic to receive it".to_string(),
            };
        }
        for failure in &failures {
            warn!(player = %failure.player, error = %failure.error, event = %event.name, "event handler failed");
        }
        BridgeOutcome::Delivered {
            recipients,
            failures,
        }
    }
}

fn settle(
    player: PlayerId,
    err: &InstanceError,
    registry: &mut InstanceRegistry,
    projector: &mut FakeEntityProjector,
) {
    if err.is_fatal() {
        warn!(%player, error = %err, "psychic failed fatally; detaching");
        registry.detach(player, projector);
    }
}

fn apply(directives: Vec<Directive>, registry: &mut InstanceRegistry, projector: &mut FakeEntityProjector) {
    for directive in directives {
        match directive {
            Directive::Detach(player) => {
                registry.detach(player, projector);
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
