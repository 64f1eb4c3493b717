//! Fake-entity projector.
//!
//! Tracks synthetic entities and the players who observe them. Every live
//! entity is visible to exactly the current observer set.
//!
//! Mutations may happen in the middle of a tick, so nothing reaches the
//! [`EntityTransport`] until [`FakeEntityProjector::flush`]. Each flush diffs
//! the requested state against what the transport was last told and emits
//! only the difference, in a fixed order:
//!
//! 1. `destroy` entities that were despawned
//! 2. `hide` surviving entities from observers that left
//! 3. `show` surviving entities to observers that joined
//! 4. `create` new entities and `show` them to every observer
//!
//! An entity spawned and despawned between two flushes never reaches the
//! transport at all.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use glam::Vec3;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::host::{EntityTransport, PlayerId};

// =============================================================================
// Entity Handle
// =============================================================================

/// Identifier of a fake entity. Never reused within a projector.
///
/// # Example
///
/// ```
/// use psychics_core::projector::EntityHandle;
///
/// let handle = EntityHandle::new(9);
/// assert_eq!(handle.as_u64(), 9);
/// assert_eq!(format!("{handle}"), "9");
/// ```
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityHandle(u64);

impl EntityHandle {
    /// Creates a handle from a raw value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityHandle({})", self.0)
    }
}

impl fmt::Display for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for EntityHandle {
    fn from(id: u64) -> Self {
        Self::new(id)
    }
}

// =============================================================================
// Fake Entity
// =============================================================================

/// A synthetic entity that exists only on observers' clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FakeEntity {
    /// Entity type understood by the transport.
    pub kind: String,
    /// World position.
    pub position: Vec3,
    /// The player whose psychic created it.
    pub owner: Option<PlayerId>,
}

impl FakeEntity {
    /// Creates an unowned entity.
    #[must_use]
    pub fn new(kind: &str, position: Vec3) -> Self {
        Self {
            kind: kind.to_string(),
            position,
            owner: None,
        }
    }

    /// Marks the entity as owned by `player`.
    #[must_use]
    pub fn owned_by(mut self, player: PlayerId) -> Self {
        self.owner = Some(player);
        self
    }
}

// =============================================================================
// Flush Report
// =============================================================================

/// Transport calls issued by one flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// `create` calls.
    pub created: usize,
    /// `destroy` calls.
    pub destroyed: usize,
    /// `show` calls.
    pub shown: usize,
    /// `hide` calls.
    pub hidden: usize,
}

impl FlushReport {
    /// Whether the flush touched the transport at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

// =============================================================================
// Projector
// =============================================================================

/// Visibility graph of fake entities and their observers.
///
/// # Example
///
/// ```
/// use glam::Vec3;
/// use psychics_core::host::{NullTransport, PlayerId};
/// use psychics_core::projector::{FakeEntity, FakeEntityProjector};
///
/// let mut projector = FakeEntityProjector::new(Box::new(NullTransport));
/// let viewer = PlayerId::random();
/// projector.add_observer(viewer);
/// let handle = projector.spawn(FakeEntity::new("armor_stand", Vec3::ZERO));
///
/// // Nothing is visible until the flush point.
/// assert!(projector.viewers(handle).is_empty());
/// projector.flush();
/// assert_eq!(projector.viewers(handle), vec![viewer]);
/// ```
pub struct FakeEntityProjector {
    transport: Box<dyn EntityTransport>,
    next_handle: u64,
    // Requested state.
    entities: BTreeMap<EntityHandle, FakeEntity>,
    observers: BTreeSet<PlayerId>,
    // State the transport was last told about.
    applied_entities: BTreeSet<EntityHandle>,
    applied_observers: BTreeSet<PlayerId>,
}

impl fmt::Debug for FakeEntityProjector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeEntityProjector")
            .field("entities", &self.entities.len())
            .field("observers", &self.observers.len())
            .field("dirty", &self.is_dirty())
            .finish_non_exhaustive()
    }
}

impl FakeEntityProjector {
    /// Creates an empty projector that drives `transport`.
    #[must_use]
    pub fn new(transport: Box<dyn EntityTransport>) -> Self {
        Self {
            transport,
            next_handle: 1,
            entities: BTreeMap::new(),
            observers: BTreeSet::new(),
            applied_entities: BTreeSet::new(),
            applied_observers: BTreeSet::new(),
        }
    }

    // -------------------------------------------------------------------------
    // Staged mutations
    // -------------------------------------------------------------------------

    /// Lets `player` see every entity from the next flush on.
    ///
    /// Returns `false` if the player was already an observer.
    pub fn add_observer(&mut self, player: PlayerId) -> bool {
        self.observers.insert(player)
    }

    /// Hides every entity from `player` at the next flush.
    ///
    /// Entities are never despawned because their last observer left.
    pub fn remove_observer(&mut self, player: PlayerId) -> bool {
        self.observers.remove(&player)
    }

    /// Registers a new entity. It is created on the transport at the next flush.
    pub fn spawn(&mut self, entity: FakeEntity) -> EntityHandle {
        let handle = EntityHandle::new(self.next_handle);
        self.next_handle += 1;
        trace!(%handle, kind = %entity.kind, "fake entity spawned");
        self.entities.insert(handle, entity);
        handle
    }

    /// Removes an entity. Returns `false` if the handle is not live.
    pub fn despawn(&mut self, handle: EntityHandle) -> bool {
        self.entities.remove(&handle).is_some()
    }

    /// Removes every entity owned by `player`. Returns how many were removed.
    pub fn release_owner(&mut self, player: PlayerId) -> usize {
        let before = self.entities.len();
        self.entities.retain(|_, e| e.owner != Some(player));
        before - self.entities.len()
    }

    /// Removes every entity. Observers stay registered.
    pub fn clear(&mut self) {
        self.entities.clear();
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Whether `handle` is live (spawned and not despawned).
    #[must_use]
    pub fn contains(&self, handle: EntityHandle) -> bool {
        self.entities.contains_key(&handle)
    }

    /// Looks up a live entity.
    #[must_use]
    pub fn get(&self, handle: EntityHandle) -> Option<&FakeEntity> {
        self.entities.get(&handle)
    }

    /// Number of live entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether there are no live entities.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Registered observers, sorted.
    pub fn observers(&self) -> impl Iterator<Item = PlayerId> + '_ {
        self.observers.iter().copied()
    }

    /// Whether `player` is a registered observer.
    #[must_use]
    pub fn is_observer(&self, player: PlayerId) -> bool {
        self.observers.contains(&player)
    }

    /// Handles of live entities owned by `player`.
    #[must_use]
    pub fn owned_by(&self, player: PlayerId) -> Vec<EntityHandle> {
        self.entities
            .iter()
            .filter(|(_, e)| e.owner == Some(player))
            .map(|(h, _)| *h)
            .collect()
    }

    /// Players who currently see `handle` on the transport, sorted.
    #[must_use]
    pub fn viewers(&self, handle: EntityHandle) -> Vec<PlayerId> {
        if self.applied_entities.contains(&handle) {
            self.applied_observers.iter().copied().collect()
        } else {
            Vec::new()
        }
    }

    /// Live entities nobody can see. They stay alive until their owner
    /// despawns them.
    #[must_use]
    pub fn orphaned(&self) -> Vec<EntityHandle> {
        if !self.applied_observers.is_empty() {
            return Vec::new();
        }
        self.entities
            .keys()
            .filter(|h| self.applied_entities.contains(h))
            .copied()
            .collect()
    }

    /// Whether a flush would touch the transport.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.observers != self.applied_observers
            || self.entities.len() != self.applied_entities.len()
            || self
                .entities
                .keys()
                .any(|h| !self.applied_entities.contains(h))
    }

    // -------------------------------------------------------------------------
    // Flush point
    // -------------------------------------------------------------------------

    /// Applies every staged change to the transport.
    pub fn flush(&mut self) -> FlushReport {
        let mut report = FlushReport::default();
        if !self.is_dirty() {
            return report;
        }

        let gone: Vec<EntityHandle> = self
            .applied_entities
            .iter()
            .filter(|h| !self.entities.contains_key(h))
            .copied()
            .collect();
        for handle in gone {
            self.transport.destroy(handle);
            self.applied_entities.remove(&handle);
            report.destroyed += 1;
        }

        let left: Vec<PlayerId> = self
            .applied_observers
            .difference(&self.observers)
            .copied()
            .collect();
        for observer in &left {
            for handle in &self.applied_entities {
                self.transport.hide(*handle, *observer);
                report.hidden += 1;
            }
        }

        let joined: Vec<PlayerId> = self
            .observers
            .difference(&self.applied_observers)
            .copied()
            .collect();
        for observer in &joined {
            for handle in &self.applied_entities {
                self.transport.show(*handle, *observer);
                report.shown += 1;
            }
        }

        for (handle, entity) in &self.entities {
            if self.applied_entities.contains(handle) {
                continue;
            }
            self.transport.create(*handle, entity);
            report.created += 1;
            for observer in &self.observers {
                self.transport.show(*handle, *observer);
                report.shown += 1;
            }
        }

        self.applied_entities = self.entities.keys().copied().collect();
        self.applied_observers.clone_from(&self.observers);

        debug!(
            created = report.created,
            destroyed = report.destroyed,
            shown = report.shown,
            hidden = report.hidden,
            "projector flushed"
        );
        report
    }
}

// =============================================================================
// Tests
// =============================================================================
