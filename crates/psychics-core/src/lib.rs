//! # Psychics Core
//!
//! Coordination core for player-bound psychic personas.
//!
//! A host (game server) owns players, events, and the wire protocol for
//! synthetic entities. This crate owns everything in between:
//!
//! - **Definitions**: abilities, psychics, and esper bindings loaded from JSON
//!   and published as immutable, atomically swapped snapshots
//! - **Instances**: one live psychic per player, built from those definitions
//! - **Ticks**: a fault-isolated update of every instance per host tick
//! - **Projections**: fake entities shown to exactly the current observers
//! - **Events**: host events routed to the registry and to instances
//!
//! ## Architecture
//!
//! ```text
//! host tick ──> Psychics::on_tick ──> TickCoordinator ──> InstanceRegistry
//!                                            │                  │
//!                                            │            PsychicInstance::update
//!                                            │                  │
//!                                            └────────> FakeEntityProjector::flush
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use psychics_core::{AbilityCatalog, Psychics, PsychicsConfig};
//!
//! let config = PsychicsConfig::load_or_default("plugins/Psychics")?;
//! let mut psychics = Psychics::initialize(config, AbilityCatalog::with_builtins(), transport, &roster)?;
//!
//! // every tick
//! let report = psychics.on_tick();
//!
//! // on host shutdown
//! psychics.shutdown();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod bridge;
pub mod config;
pub mod coordinator;
pub mod definition;
pub mod error;
pub mod host;
pub mod instance;
pub mod projector;
pub mod registry;

mod psychics;

#[cfg(test)]
mod tests;

// Re-exports for convenience
pub use bridge::{BridgeOutcome, EventBridge};
pub use config::{ConfigError, PsychicsConfig};
pub use coordinator::{InstanceFailure, TickCoordinator, TickReport};
pub use definition::{
    AbilityDefinition, DefinitionKind, DefinitionStore, EsperDefinition, PsychicDefinition,
};
pub use error::{HandleError, PsychicsError};
pub use host::{EntityTransport, HostEvent, PlayerId, Requester, Roster};
pub use instance::{AbilityBehavior, AbilityCatalog, AbilityContext, AbilityError, Activation};
pub use projector::{EntityHandle, FakeEntity, FakeEntityProjector};
pub use psychics::{update_messages, Psychics, PsychicsHandle};
pub use registry::{InstanceRegistry, RegistryError};

pub use psychics_update as update;
