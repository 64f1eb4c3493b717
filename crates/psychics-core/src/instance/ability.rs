//! Ability runtime: behaviors, per-player ability state, and the catalog.
//!
//! An [`AbilityDefinition`] is shared data. What an ability actually *does* is
//! an [`AbilityBehavior`], created per ability instance by the factory the
//! [`AbilityCatalog`] registers under the definition's `behavior` key.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;
use glam::Vec3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::Directive;
use crate::definition::AbilityDefinition;
use crate::host::{HostEvent, PlayerId};
use crate::projector::FakeEntityProjector;
use crate::registry::RegistryError;

// =============================================================================
// Flags and Errors
// =============================================================================

bitflags! {
    /// Runtime state bits of an ability instance.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct AbilityFlags: u8 {
        /// The ability is inside its active window.
        const ACTIVE = 1 << 0;
        /// The ability refuses activation.
        const DISABLED = 1 << 1;
    }
}

/// Failure raised by an ability behavior.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AbilityError {
    /// The ability misbehaved this tick but its state is still sound.
    #[error("{0}")]
    Recoverable(String),
    /// The ability's state is broken; its psychic must be detached.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl AbilityError {
    /// Whether the owning psychic must be detached.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

/// Result of an activation attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Activation {
    /// The ability fired.
    Activated,
    /// The ability is cooling down for this many more ticks.
    OnCooldown(u32),
    /// Not enough mana.
    InsufficientMana {
        /// Cost of the ability.
        required: f64,
        /// Mana the psychic has.
        available: f64,
    },
    /// The ability is still inside its active window.
    AlreadyActive,
    /// The ability is disabled.
    Disabled,
}

impl Activation {
    /// Whether the ability fired.
    #[must_use]
    pub fn is_activated(self) -> bool {
        matches!(self, Self::Activated)
    }
}

// =============================================================================
// Behavior Trait
// =============================================================================

/// Everything a behavior may touch during a callback.
pub struct AbilityContext<'a> {
    /// The owning player.
    pub player: PlayerId,
    /// The ability's definition.
    pub definition: &'a AbilityDefinition,
    /// Last known location of the player.
    pub location: Vec3,
    /// Whether the ability is inside its active window.
    pub active: bool,
    /// Fake-entity projector; changes are staged until the end of the tick.
    pub projector: &'a mut FakeEntityProjector,
    /// Structural changes to apply after the tick iteration.
    pub directives: &'a mut Vec<Directive>,
}

impl fmt::Debug for AbilityContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbilityContext")
            .field("player", &self.player)
            .field("ability", &self.definition.name)
            .field("location", &self.location)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

/// What an ability does.
///
/// Callbacks run on the tick thread and must not block. Every callback but
/// [`on_tick`](Self::on_tick) defaults to doing nothing.
pub trait AbilityBehavior: Send {
    /// Called once per tick, active or not.
    ///
    /// # Errors
    ///
    /// A [`AbilityError::Fatal`] detaches the owning psychic.
    fn on_tick(&mut self, ctx: &mut AbilityContext<'_>) -> Result<(), AbilityError>;

    /// Called when the ability fires.
    ///
    /// # Errors
    ///
    /// See [`on_tick`](Self::on_tick).
    fn on_activate(&mut self, _ctx: &mut AbilityContext<'_>) -> Result<(), AbilityError> {
        Ok(())
    }

    /// Called when the active window ends (immediately for instant abilities).
    ///
    /// # Errors
    ///
    /// See [`on_tick`](Self::on_tick).
    fn on_deactivate(&mut self, _ctx: &mut AbilityContext<'_>) -> Result<(), AbilityError> {
        Ok(())
    }

    /// Called for host events routed to the owning psychic.
    ///
    /// # Errors
    ///
    /// See [`on_tick`](Self::on_tick).
    fn on_event(
        &mut self,
        _event: &HostEvent,
        _ctx: &mut AbilityContext<'_>,
    ) -> Result<(), AbilityError> {
        Ok(())
    }

    /// Called when the owning psychic is detached.
    fn on_detach(&mut self, _ctx: &mut AbilityContext<'_>) {}
}

// =============================================================================
// Ability Instance
// =============================================================================

/// The tick-thread resources an ability callback borrows.
pub(crate) struct Scope<'a> {
    pub player: PlayerId,
    pub location: Vec3,
    pub projector: &'a mut FakeEntityProjector,
    pub directives: &'a mut Vec<Directive>,
}

/// One ability of one psychic, with its own cooldown and activation state.
pub struct AbilityInstance {
    definition: Arc<AbilityDefinition>,
    behavior: Box<dyn AbilityBehavior>,
    flags: AbilityFlags,
    cooldown_remaining: u32,
    active_remaining: u32,
}

impl fmt::Debug for AbilityInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbilityInstance")
            .field("name", &self.definition.name)
            .field("flags", &self.flags)
            .field("cooldown_remaining", &self.cooldown_remaining)
            .field("active_remaining", &self.active_remaining)
            .finish_non_exhaustive()
    }
}

macro_rules! context {
    ($def:expr, $scope:expr, $active:expr) => {
        AbilityContext {
            player: $scope.player,
            definition: $def,
            location: $scope.location,
            active: $active,
            projector: &mut *$scope.projector,
            directives: &mut *$scope.directives,
        }
    };
}

impl AbilityInstance {
    /// Pairs a definition with a freshly created behavior.
    #[must_use]
    pub fn new(definition: Arc<AbilityDefinition>, behavior: Box<dyn AbilityBehavior>) -> Self {
        Self {
            definition,
            behavior,
            flags: AbilityFlags::empty(),
            cooldown_remaining: 0,
            active_remaining: 0,
        }
    }

    /// The ability's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    /// The shared definition.
    #[must_use]
    pub fn definition(&self) -> &Arc<AbilityDefinition> {
        &self.definition
    }

    /// Current state bits.
    #[must_use]
    pub fn flags(&self) -> AbilityFlags {
        self.flags
    }

    /// Ticks until the ability can fire again.
    #[must_use]
    pub fn cooldown_remaining(&self) -> u32 {
        self.cooldown_remaining
    }

    /// Whether the ability is inside its active window.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.flags.contains(AbilityFlags::ACTIVE)
    }

    /// Enables or disables activation. Does not end an active window.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.flags.set(AbilityFlags::DISABLED, !enabled);
    }

    pub(crate) fn activate(
        &mut self,
        mana: &mut f64,
        scope: &mut Scope<'_>,
    ) -> Result<Activation, AbilityError> {
        if self.flags.contains(AbilityFlags::DISABLED) {
            return Ok(Activation::Disabled);
        }
        if self.is_active() {
            return Ok(Activation::AlreadyActive);
        }
        if self.cooldown_remaining > 0 {
            return Ok(Activation::OnCooldown(self.cooldown_remaining));
        }
        let cost = self.definition.mana_cost;
        if *mana < cost {
            return Ok(Activation::InsufficientMana {
                required: cost,
                available: *mana,
            });
        }

        *mana -= cost;
        self.cooldown_remaining = self.definition.cooldown_ticks;

        let mut ctx = context!(&self.definition, scope, true);
        self.behavior.on_activate(&mut ctx)?;
        if self.definition.duration_ticks == 0 {
            ctx.active = false;
            self.behavior.on_deactivate(&mut ctx)?;
        } else {
            self.flags.insert(AbilityFlags::ACTIVE);
            self.active_remaining = self.definition.duration_ticks;
        }
        Ok(Activation::Activated)
    }

    pub(crate) fn tick(&mut self, scope: &mut Scope<'_>) -> Result<(), AbilityError> {
        self.cooldown_remaining = self.cooldown_remaining.saturating_sub(1);

        let active = self.is_active();
        let mut ctx = context!(&self.definition, scope, active);
        self.behavior.on_tick(&mut ctx)?;

        if active {
            self.active_remaining = self.active_remaining.saturating_sub(1);
            if self.active_remaining == 0 {
                self.flags.remove(AbilityFlags::ACTIVE);
                ctx.active = false;
                self.behavior.on_deactivate(&mut ctx)?;
            }
        }
        Ok(())
    }

    pub(crate) fn event(
        &mut self,
        event: &HostEvent,
        scope: &mut Scope<'_>,
    ) -> Result<(), AbilityError> {
        let active = self.is_active();
        let mut ctx = context!(&self.definition, scope, active);
        self.behavior.on_event(event, &mut ctx)
    }

    pub(crate) fn detach(&mut self, scope: &mut Scope<'_>) {
        let active = self.is_active();
        let mut ctx = context!(&self.definition, scope, active);
        self.behavior.on_detach(&mut ctx);
        self.flags.remove(AbilityFlags::ACTIVE);
    }
}

// =============================================================================
// Ability Catalog
// =============================================================================

/// Creates a behavior for one ability instance.
pub type BehaviorFactory =
    dyn Fn(&AbilityDefinition) -> Result<Box<dyn AbilityBehavior>, AbilityError> + Send + Sync;

/// Behavior factories keyed by the `behavior` field of ability definitions.
///
/// # Example
///
/// ```
/// use psychics_core::instance::{AbilityCatalog, AbilityBehavior, AbilityContext, AbilityError};
/// use psychics_core::definition::AbilityDefinition;
///
/// struct Heartbeat(u64);
///
/// impl AbilityBehavior for Heartbeat {
///     fn on_tick(&mut self, _ctx: &mut AbilityContext<'_>) -> Result<(), AbilityError> {
///         self.0 += 1;
///         Ok(())
///     }
/// }
///
/// let mut catalog = AbilityCatalog::with_builtins();
/// catalog.register("heartbeat", |_def| Ok(Box::new(Heartbeat(0))));
///
/// assert!(catalog.contains("heartbeat"));
/// assert!(catalog.contains("passive"));
/// let mut def = AbilityDefinition::new("pulse");
/// def.behavior = "heartbeat".to_string();
/// assert!(catalog.create(&def).is_ok());
/// ```
#[derive(Default, Clone)]
pub struct AbilityCatalog {
    factories: HashMap<String, Arc<BehaviorFactory>>,
}

impl AbilityCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a catalog with the built-in `passive` and `projection` behaviors.
    #[must_use]
    pub fn with_builtins() -> Self {
        use super::behaviors::{PassiveBehavior, ProjectionBehavior};

        let mut catalog = Self::new();
        catalog.register(PassiveBehavior::KEY, |_| Ok(Box::new(PassiveBehavior)));
        catalog.register(ProjectionBehavior::KEY, |def| {
            Ok(Box::new(ProjectionBehavior::from_definition(def)?))
        });
        catalog
    }

    /// Registers `factory` under `key`, replacing any previous factory.
    pub fn register<F>(&mut self, key: &str, factory: F)
    where
        F: Fn(&AbilityDefinition) -> Result<Box<dyn AbilityBehavior>, AbilityError>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(key.to_string(), Arc::new(factory));
    }

    /// Whether a factory is registered under `key`.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.factories.contains_key(key)
    }

    /// Registered keys, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<_> = self.factories.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// Creates the behavior for `definition`.
    ///
    /// # Errors
    ///
    /// [`RegistryError::UnknownBehavior`] if no factory matches, or
    /// [`RegistryError::BehaviorRejected`] if the factory refuses the definition.
    pub fn create(
        &self,
        definition: &AbilityDefinition,
    ) -> Result<Box<dyn AbilityBehavior>, RegistryError> {
        let factory =
            self.factories
                .get(&definition.behavior)
                .ok_or_else(|| RegistryError::UnknownBehavior {
                    ability: definition.name.clone(),
                    behavior: definition.behavior.clone(),
                })?;
        factory(definition).map_err(|e| RegistryError::BehaviorRejected {
            ability: definition.name.clone(),
            reason: e.to_string(),
        })
    }
}

impl fmt::Debug for AbilityCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbilityCatalog")
            .field("keys", &self.keys())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
