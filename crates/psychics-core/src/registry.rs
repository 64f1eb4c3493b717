//! Instance registry: which player runs which psychic.
//!
//! The registry is the only owner of [`PsychicInstance`]s and holds at most one
//! per player. Attaching resolves every definition and behavior up front, so a
//! failed attach leaves the registry exactly as it was.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::definition::{
    AbilityDefinition, DefinitionKind, DefinitionStore, PsychicDefinition, StoreError,
};
use crate::host::PlayerId;
use crate::instance::{AbilityCatalog, AbilityInstance, PsychicInstance};
use crate::projector::FakeEntityProjector;

// =============================================================================
// Errors
// =============================================================================

/// Reasons an attach can fail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A psychic or ability definition does not exist.
    #[error("unknown {kind} {name:?}")]
    UnknownDefinition {
        /// Kind of the missing definition.
        kind: DefinitionKind,
        /// Name of the missing definition.
        name: String,
    },
    /// An ability names a behavior the catalog does not know.
    #[error("ability {ability:?} uses unknown behavior {behavior:?}")]
    UnknownBehavior {
        /// The ability.
        ability: String,
        /// The unknown behavior key.
        behavior: String,
    },
    /// The behavior factory refused the ability's parameters.
    #[error("ability {ability:?} rejected: {reason}")]
    BehaviorRejected {
        /// The ability.
        ability: String,
        /// Why the factory refused it.
        reason: String,
    },
}

impl From<StoreError> for RegistryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { kind, name } => Self::UnknownDefinition { kind, name },
            StoreError::Directory { kind, path, .. } => Self::UnknownDefinition {
                kind,
                name: path.display().to_string(),
            },
        }
    }
}

// =============================================================================
// Live Snapshot
// =============================================================================

/// Point-in-time list of players with a live instance.
///
/// Later attaches and detaches do not change a snapshot, and a snapshot can be
/// iterated any number of times.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveSnapshot {
    players: Arc<[PlayerId]>,
}

impl LiveSnapshot {
    /// Player ids in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = PlayerId> + '_ {
        self.players.iter().copied()
    }

    /// Number of players captured.
    #[must_use]
    pub fn len(&self) -> usize {
        self.players.len()
    }

    /// Whether nobody was live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Whether `player` was live when the snapshot was taken.
    #[must_use]
    pub fn contains(&self, player: PlayerId) -> bool {
        self.players.binary_search(&player).is_ok()
    }
}

impl<'a> IntoIterator for &'a LiveSnapshot {
    type Item = PlayerId;
    type IntoIter = std::iter::Copied<std::slice::Iter<'a, PlayerId>>;

    fn into_iter(self) -> Self::IntoIter {
        self.players.iter().copied()
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Live psychic instances keyed by player.
///
/// # Example
///
/// ```
/// use psychics_core::definition::{AbilityDefinition, DataDirectories, DefinitionStore, PsychicDefinition};
/// use psychics_core::host::{NullTransport, PlayerId};
/// use psychics_core::instance::AbilityCatalog;
/// use psychics_core::projector::FakeEntityProjector;
/// use psychics_core::registry::InstanceRegistry;
///
/// let store = DefinitionStore::new(DataDirectories::new("unused"));
/// store.publish([AbilityDefinition::new("a"), AbilityDefinition::new("b")]);
/// store.publish([PsychicDefinition::new("p", &["a", "b"])]);
///
/// let mut registry = InstanceRegistry::new(AbilityCatalog::with_builtins());
/// let mut projector = FakeEntityProjector::new(Box::new(NullTransport));
/// let player = PlayerId::random();
///
/// let instance = registry.attach(&store, player, "p", &mut projector).unwrap();
/// assert_eq!(instance.abilities().len(), 2);
/// assert_eq!(registry.len(), 1);
/// assert!(registry.detach(player, &mut projector));
/// assert!(registry.is_empty());
/// ```
#[derive(Debug)]
pub struct InstanceRegistry {
    catalog: AbilityCatalog,
    instances: BTreeMap<PlayerId, PsychicInstance>,
}

impl InstanceRegistry {
    /// Creates an empty registry that builds behaviors from `catalog`.
    #[must_use]
    pub fn new(catalog: AbilityCatalog) -> Self {
        Self {
            catalog,
            instances: BTreeMap::new(),
        }
    }

    /// The behavior catalog.
    #[must_use]
    pub fn catalog(&self) -> &AbilityCatalog {
        &self.catalog
    }

    /// Attaches the psychic `psychic_name` to `player`.
    ///
    /// Any existing instance of the player is detached first, so the registry
    /// never holds two instances for one player.
    ///
    /// # Errors
    ///
    /// [`RegistryError`] if the psychic, one of its abilities, or a behavior
    /// cannot be resolved. The registry is unchanged in that case.
    pub fn attach(
        &mut self,
        store: &DefinitionStore,
        player: PlayerId,
        psychic_name: &str,
        projector: &mut FakeEntityProjector,
    ) -> Result<&mut PsychicInstance, RegistryError> {
        let instance = self.build(store, player, psychic_name)?;

        if let Some(mut previous) = self.instances.remove(&player) {
            debug!(%player, psychic = previous.psychic_name(), "replacing instance");
            previous.release(projector);
        }

        info!(%player, psychic = psychic_name, "psychic attached");
        Ok(self.instances.entry(player).or_insert(instance))
    }

    /// Attaches the psychic named by `player`'s esper binding.
    ///
    /// Returns `Ok(None)` when the player has no binding.
    ///
    /// # Errors
    ///
    /// See [`attach`](Self::attach).
    pub fn attach_esper(
        &mut self,
        store: &DefinitionStore,
        player: PlayerId,
        projector: &mut FakeEntityProjector,
    ) -> Result<Option<&mut PsychicInstance>, RegistryError> {
        let Some(esper) = store.esper_for(player) else {
            return Ok(None);
        };
        self.attach(store, player, &esper.psychic, projector)
            .map(Some)
    }

    fn build(
        &self,
        store: &DefinitionStore,
        player: PlayerId,
        psychic_name: &str,
    ) -> Result<PsychicInstance, RegistryError> {
        let psychic: Arc<PsychicDefinition> = store.get(psychic_name)?;
        let abilities = psychic
            .abilities
            .iter()
            .map(|name| -> Result<AbilityInstance, RegistryError> {
                let definition: Arc<AbilityDefinition> = store.get(name)?;
                let behavior = self.catalog.create(&definition)?;
                Ok(AbilityInstance::new(definition, behavior))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PsychicInstance::new(player, psychic, abilities))
    }

    /// Detaches and releases `player`'s instance.
    ///
    /// Returns `false` if the player had none.
    pub fn detach(&mut self, player: PlayerId, projector: &mut FakeEntityProjector) -> bool {
        let Some(mut instance) = self.instances.remove(&player) else {
            return false;
        };
        instance.release(projector);
        info!(%player, psychic = instance.psychic_name(), "psychic detached");
        true
    }

    /// Detaches every instance.
    pub fn unload_all(&mut self, projector: &mut FakeEntityProjector) {
        let count = self.instances.len();
        for (_, mut instance) in std::mem::take(&mut self.instances) {
            instance.release(projector);
        }
        if count > 0 {
            info!(count, "all psychics unloaded");
        }
    }

    /// The player's instance.
    #[must_use]
    pub fn get(&self, player: PlayerId) -> Option<&PsychicInstance> {
        self.instances.get(&player)
    }

    /// The player's instance, mutably.
    pub fn get_mut(&mut self, player: PlayerId) -> Option<&mut PsychicInstance> {
        self.instances.get_mut(&player)
    }

    /// Whether the player has an instance.
    #[must_use]
    pub fn contains(&self, player: PlayerId) -> bool {
        self.instances.contains_key(&player)
    }

    /// Number of live instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Whether no instance is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Copies the set of live players.
    #[must_use]
    pub fn live_snapshot(&self) -> LiveSnapshot {
        LiveSnapshot {
            players: self.instances.keys().copied().collect(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
