//! Live psychic instances.
//!
//! A [`PsychicInstance`] is one player's running persona: a mana pool plus one
//! [`AbilityInstance`] per ability its definition lists. Instances are owned by
//! the [`InstanceRegistry`](crate::registry::InstanceRegistry) and only touched
//! on the tick thread.

mod ability;
pub mod behaviors;

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use glam::Vec3;
use thiserror::Error;
use tracing::error;

use crate::definition::PsychicDefinition;
use crate::host::{HostEvent, PlayerId};
use crate::projector::FakeEntityProjector;

pub use ability::{
    AbilityBehavior, AbilityCatalog, AbilityContext, AbilityError, AbilityFlags, AbilityInstance,
    Activation, BehaviorFactory,
};
pub(crate) use ability::Scope;

// =============================================================================
// Directives and Errors
// =============================================================================

/// A structural change requested from inside an update.
///
/// Directives are queued while the registry is being iterated and applied
/// once the iteration is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Detach the psychic of this player.
    Detach(PlayerId),
}

/// Failure of a psychic instance.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InstanceError {
    /// One of its abilities failed.
    #[error("ability {ability:?} failed: {source}")]
    Ability {
        /// The failing ability.
        ability: String,
        /// What went wrong.
        #[source]
        source: AbilityError,
    },
    /// The psychic has no ability with this name.
    #[error("no ability named {0:?}")]
    UnknownAbility(String),
    /// A behavior panicked.
    #[error("behavior panicked: {0}")]
    Panicked(String),
}

impl InstanceError {
    /// Whether the instance must be detached.
    ///
    /// Panics and [`AbilityError::Fatal`] are fatal; everything else is
    /// recorded and the instance keeps running.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Ability { source, .. } => source.is_fatal(),
            Self::Panicked(_) => true,
            Self::UnknownAbility(_) => false,
        }
    }
}

/// Runs one call into instance code, turning a panic into
/// [`InstanceError::Panicked`].
pub(crate) fn isolate<T>(
    call: impl FnOnce() -> Result<T, InstanceError>,
) -> Result<T, InstanceError> {
    panic::catch_unwind(AssertUnwindSafe(call))
        .unwrap_or_else(|payload| Err(InstanceError::Panicked(panic_message(&*payload))))
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// =============================================================================
// Psychic Instance
// =============================================================================

/// One player's live psychic.
#[derive(Debug)]
pub struct PsychicInstance {
    player: PlayerId,
    definition: Arc<PsychicDefinition>,
    abilities: Vec<AbilityInstance>,
    mana: f64,
    location: Vec3,
    ticks: u64,
}

impl PsychicInstance {
    /// Assembles an instance with a full mana pool.
    #[must_use]
    pub fn new(
        player: PlayerId,
        definition: Arc<PsychicDefinition>,
        abilities: Vec<AbilityInstance>,
    ) -> Self {
        let mana = definition.max_mana;
        Self {
            player,
            definition,
            abilities,
            mana,
            location: Vec3::ZERO,
            ticks: 0,
        }
    }

    /// The owning player.
    #[must_use]
    pub fn player(&self) -> PlayerId {
        self.player
    }

    /// The psychic definition this instance was built from.
    #[must_use]
    pub fn definition(&self) -> &Arc<PsychicDefinition> {
        &self.definition
    }

    /// Name of the psychic definition.
    #[must_use]
    pub fn psychic_name(&self) -> &str {
        &self.definition.name
    }

    /// Ability instances, in definition order.
    #[must_use]
    pub fn abilities(&self) -> &[AbilityInstance] {
        &self.abilities
    }

    /// Looks up an ability by name.
    #[must_use]
    pub fn ability(&self, name: &str) -> Option<&AbilityInstance> {
        self.abilities.iter().find(|a| a.name() == name)
    }

    /// Mutable lookup by name.
    pub fn ability_mut(&mut self, name: &str) -> Option<&mut AbilityInstance> {
        self.abilities.iter_mut().find(|a| a.name() == name)
    }

    /// Current mana.
    #[must_use]
    pub fn mana(&self) -> f64 {
        self.mana
    }

    /// Last known location of the player.
    #[must_use]
    pub fn location(&self) -> Vec3 {
        self.location
    }

    /// Records the player's location.
    pub fn set_location(&mut self, location: Vec3) {
        self.location = location;
    }

    /// Number of completed updates.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Advances the instance by one tick.
    ///
    /// Regenerates mana, then ticks each ability in order. Stops at the first
    /// failing ability.
    ///
    /// # Errors
    ///
    /// [`InstanceError::Ability`] naming the ability that failed.
    pub fn update(
        &mut self,
        projector: &mut FakeEntityProjector,
        directives: &mut Vec<Directive>,
    ) -> Result<(), InstanceError> {
        self.ticks += 1;
        self.mana = (self.mana + self.definition.mana_regen_per_tick).min(self.definition.max_mana);

        let mut scope = Scope {
            player: self.player,
            location: self.location,
            projector,
            directives,
        };
        for ability in &mut self.abilities {
            ability
                .tick(&mut scope)
                .map_err(|source| InstanceError::Ability {
                    ability: ability.name().to_string(),
                    source,
                })?;
        }
        Ok(())
    }

    /// Tries to fire the ability called `name`.
    ///
    /// # Errors
    ///
    /// [`InstanceError::UnknownAbility`] if there is no such ability, or
    /// [`InstanceError::Ability`] if its behavior fails.
    pub fn activate(
        &mut self,
        name: &str,
        projector: &mut FakeEntityProjector,
        directives: &mut Vec<Directive>,
    ) -> Result<Activation, InstanceError> {
        let ability = self
            .abilities
            .iter_mut()
            .find(|a| a.name() == name)
            .ok_or_else(|| InstanceError::UnknownAbility(name.to_string()))?;

        let mut scope = Scope {
            player: self.player,
            location: self.location,
            projector,
            directives,
        };
        ability
            .activate(&mut self.mana, &mut scope)
            .map_err(|source| InstanceError::Ability {
                ability: name.to_string(),
                source,
            })
    }

    /// Delivers a host event to every ability.
    ///
    /// # Errors
    ///
    /// [`InstanceError::Ability`] naming the first ability that failed.
    pub fn handle_event(
        &mut self,
        event: &HostEvent,
        projector: &mut FakeEntityProjector,
        directives: &mut Vec<Directive>,
    ) -> Result<(), InstanceError> {
        let mut scope = Scope {
            player: self.player,
            location: self.location,
            projector,
            directives,
        };
        for ability in &mut self.abilities {
            ability
                .event(event, &mut scope)
                .map_err(|source| InstanceError::Ability {
                    ability: ability.name().to_string(),
                    source,
                })?;
        }
        Ok(())
    }

    /// Tears the instance down: notifies every ability, then stages removal
    /// of every fake entity the player still owns.
    ///
    /// A panicking `on_detach` is logged and skipped; the remaining abilities
    /// are still notified and the entities are still released.
    pub fn release(&mut self, projector: &mut FakeEntityProjector) {
        let mut ignored = Vec::new();
        let mut scope = Scope {
            player: self.player,
            location: self.location,
            projector: &mut *projector,
            directives: &mut ignored,
        };
        for ability in &mut self.abilities {
            let name = ability.name().to_string();
            let detached = isolate(|| {
                ability.detach(&mut scope);
                Ok(())
            });
            if let Err(err) = detached {
                error!(player = %self.player, ability = %name, error = %err, "ability detach panicked");
            }
        }
        projector.release_owner(self.player);
    }
}

// =============================================================================
// Tests
// =============================================================================
