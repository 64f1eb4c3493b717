//! Boundary types and traits for the host runtime.
//!
//! The host owns players, the event bus, and the synthetic-entity protocol.
//! This module defines the narrow contracts the coordinator consumes:
//!
//! - [`PlayerId`]: stable player identity
//! - [`HostEvent`]: a named event forwarded by the host's event bus
//! - [`Roster`]: enumerates connected players
//! - [`EntityTransport`]: create/destroy/show/hide primitives for fake entities
//! - [`Requester`]: whoever issued an administrative command

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::projector::{EntityHandle, FakeEntity};

// =============================================================================
// Player Identity
// =============================================================================

/// Unique identifier for a player.
///
/// # Example
///
/// ```
/// use psychics_core::host::PlayerId;
/// use uuid::Uuid;
///
/// let raw = Uuid::from_u128(7);
/// let id = PlayerId::new(raw);
/// assert_eq!(id.as_uuid(), raw);
/// assert_eq!(id.to_string(), raw.to_string());
/// ```
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(Uuid);

impl PlayerId {
    /// Wraps a raw UUID.
    #[must_use]
    pub const fn new(id: Uuid) -> Self {
        Self(id)
    }

    /// Generates a random identifier.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the raw UUID.
    #[must_use]
    pub const fn as_uuid(self) -> Uuid {
        self.0
    }
}

impl fmt::Debug for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PlayerId({})", self.0)
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for PlayerId {
    fn from(id: Uuid) -> Self {
        Self::new(id)
    }
}

// =============================================================================
// Host Events
// =============================================================================

/// Event names the bridge interprets itself.
pub mod event_names {
    /// A player connected.
    pub const PLAYER_JOIN: &str = "player_join";
    /// A player disconnected.
    pub const PLAYER_QUIT: &str = "player_quit";
    /// A player moved; payload `{"position": [x, y, z]}`.
    pub const PLAYER_MOVE: &str = "player_move";
    /// A player triggered an ability; payload `{"ability": "<name>"}`.
    pub const ABILITY_ACTIVATE: &str = "ability_activate";
}

/// A named notification from the host's event bus.
///
/// # Example
///
/// ```
/// use psychics_core::host::{HostEvent, PlayerId, event_names};
/// use serde_json::json;
///
/// let player = PlayerId::random();
/// let event = HostEvent::for_player(event_names::ABILITY_ACTIVATE, player)
///     .with_payload(json!({"ability": "fireball"}));
///
/// assert_eq!(event.player, Some(player));
/// assert_eq!(event.payload_str("ability"), Some("fireball"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostEvent {
    /// Event name.
    pub name: String,
    /// The player the event concerns, if any.
    #[serde(default)]
    pub player: Option<PlayerId>,
    /// Free-form event data.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl HostEvent {
    /// Creates an event that concerns no particular player.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            player: None,
            payload: serde_json::Value::Null,
        }
    }

    /// Creates an event about `player`.
    #[must_use]
    pub fn for_player(name: &str, player: PlayerId) -> Self {
        Self {
            player: Some(player),
            ..Self::new(name)
        }
    }

    /// Attaches a payload.
    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Reads a string field from the payload.
    #[must_use]
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key)?.as_str()
    }
}

// =============================================================================
// Collaborator Traits
// =============================================================================

/// The host's view of connected players.
pub trait Roster {
    /// Players connected right now.
    fn online_players(&self) -> Vec<PlayerId>;

    /// Whether `player` is connected.
    fn is_online(&self, player: PlayerId) -> bool {
        self.online_players().contains(&player)
    }
}

impl Roster for Vec<PlayerId> {
    fn online_players(&self) -> Vec<PlayerId> {
        self.clone()
    }
}

/// Wire-level primitives for synthetic entities, keyed by observer.
///
/// The projector calls these only from its flush point, in staging order.
pub trait EntityTransport: Send {
    /// Brings `entity` into existence under `handle`. Nobody sees it yet.
    fn create(&mut self, handle: EntityHandle, entity: &FakeEntity);
    /// Removes the entity for everyone who could see it.
    fn destroy(&mut self, handle: EntityHandle);
    /// Makes the entity visible to `observer`.
    fn show(&mut self, handle: EntityHandle, observer: PlayerId);
    /// Hides the entity from `observer`.
    fn hide(&mut self, handle: EntityHandle, observer: PlayerId);
}

/// A transport that drops everything. Useful for headless hosts.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTransport;

impl EntityTransport for NullTransport {
    fn create(&mut self, _: EntityHandle, _: &FakeEntity) {}
    fn destroy(&mut self, _: EntityHandle) {}
    fn show(&mut self, _: EntityHandle, _: PlayerId) {}
    fn hide(&mut self, _: EntityHandle, _: PlayerId) {}
}

/// Whoever issued an administrative command (a player or the console).
///
/// Asynchronous results check [`is_connected`](Requester::is_connected)
/// before replying, since the requester may have left in the meantime.
pub trait Requester: Send + Sync {
    /// Whether replies can still be delivered.
    fn is_connected(&self) -> bool;
    /// Sends a line of feedback.
    fn send_message(&self, message: &str);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    mod player_id_tests {
        use super::*;

        #[test]
        fn ordering_follows_uuid() {
            let a = PlayerId::new(Uuid::from_u128(1));
            let b = PlayerId::new(Uuid::from_u128(2));
            assert!(a < b);
        }

        #[test]
        fn serializes_as_bare_uuid() {
            let id = PlayerId::new(Uuid::from_u128(42));
            let json = serde_json::to_string(&id).unwrap();
            assert_eq!(json, format!("\"{}\"", Uuid::from_u128(42)));
            let back: PlayerId = serde_json::from_str(&json).unwrap();
            assert_eq!(back, id);
        }

        #[test]
        fn random_ids_differ() {
            assert_ne!(PlayerId::random(), PlayerId::random());
        }

        #[test]
        fn debug_format() {
            let debug = format!("{:?}", PlayerId::new(Uuid::nil()));
            assert!(debug.starts_with("PlayerId("));
        }
    }

    mod host_event_tests {
        use super::*;

        #[test]
        fn new_has_no_player() {
            let event = HostEvent::new("weather_change");
            assert_eq!(event.player, None);
            assert!(event.payload.is_null());
        }

        #[test]
        fn payload_str_missing_or_wrong_type() {
            let event = HostEvent::new("x").with_payload(json!({"ability": 3}));
            assert_eq!(event.payload_str("ability"), None);
            assert_eq!(event.payload_str("other"), None);
        }

        #[test]
        fn deserializes_with_defaults() {
            let event: HostEvent = serde_json::from_str(r#"{"name":"tick_hint"}"#).unwrap();
            assert_eq!(event.name, "tick_hint");
            assert!(event.player.is_none());
        }
    }

    mod roster_tests {
        use super::*;

        #[test]
        fn vec_roster_is_online() {
            let a = PlayerId::random();
            let roster = vec![a];
            assert!(roster.is_online(a));
            assert!(!roster.is_online(PlayerId::random()));
        }
    }
}
