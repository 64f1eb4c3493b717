//! Test fixtures: recording fakes, definition sets, and on-disk data trees.

use std::fs;
use std::path::Path;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::definition::{
    AbilityDefinition, DataDirectories, DefinitionKind, DefinitionStore, PsychicDefinition,
};
use crate::host::{EntityTransport, PlayerId, Requester};
use crate::projector::{EntityHandle, FakeEntity, FakeEntityProjector};

// =============================================================================
// Logging
// =============================================================================

/// Routes `tracing` output to the test harness. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

// =============================================================================
// Recording Fakes
// =============================================================================

/// One call made to a [`RecordingTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    /// `create(handle, entity)`; records the entity kind.
    Create(EntityHandle, String),
    /// `destroy(handle)`.
    Destroy(EntityHandle),
    /// `show(handle, observer)`.
    Show(EntityHandle, PlayerId),
    /// `hide(handle, observer)`.
    Hide(EntityHandle, PlayerId),
}

/// Transport that records every call. Clones share the log.
#[derive(Debug, Default, Clone)]
pub struct RecordingTransport {
    calls: Arc<Mutex<Vec<TransportCall>>>,
}

impl RecordingTransport {
    /// Every call so far, in order.
    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().clone()
    }

    /// Forgets recorded calls.
    pub fn reset(&self) {
        self.calls.lock().clear();
    }
}

impl EntityTransport for RecordingTransport {
    fn create(&mut self, handle: EntityHandle, entity: &FakeEntity) {
        self.calls
            .lock()
            .push(TransportCall::Create(handle, entity.kind.clone()));
    }

    fn destroy(&mut self, handle: EntityHandle) {
        self.calls.lock().push(TransportCall::Destroy(handle));
    }

    fn show(&mut self, handle: EntityHandle, observer: PlayerId) {
        self.calls.lock().push(TransportCall::Show(handle, observer));
    }

    fn hide(&mut self, handle: EntityHandle, observer: PlayerId) {
        self.calls.lock().push(TransportCall::Hide(handle, observer));
    }
}

/// A projector over a fresh [`RecordingTransport`], plus the transport's log.
pub fn recording_projector() -> (FakeEntityProjector, RecordingTransport) {
    let transport = RecordingTransport::default();
    (FakeEntityProjector::new(Box::new(transport.clone())), transport)
}

/// Requester that collects messages and can be disconnected.
#[derive(Debug)]
pub struct RecordingRequester {
    connected: Mutex<bool>,
    messages: Mutex<Vec<String>>,
}

impl RecordingRequester {
    /// A connected requester.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connected: Mutex::new(true),
            messages: Mutex::new(Vec::new()),
        })
    }

    /// Simulates the requester leaving.
    pub fn disconnect(&self) {
        *self.connected.lock() = false;
    }

    /// Messages received so far.
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }

    /// A weak trait-object reference, as the runtime stores it.
    pub fn weak(self: &Arc<Self>) -> Weak<dyn Requester> {
        let strong: Arc<dyn Requester> = Arc::clone(self) as Arc<dyn Requester>;
        Arc::downgrade(&strong)
    }
}

impl Requester for RecordingRequester {
    fn is_connected(&self) -> bool {
        *self.connected.lock()
    }

    fn send_message(&self, message: &str) {
        self.messages.lock().push(message.to_string());
    }
}

// =============================================================================
// Definition Fixtures
// =============================================================================

/// A store holding passive abilities `a`, `b`, `c`, psychic `p` = {a, b} and
/// psychic `q` = {c}. Nothing is read from disk.
pub fn abc_store() -> DefinitionStore {
    let store = DefinitionStore::new(DataDirectories::new("unused"));
    store.publish(["a", "b", "c"].map(AbilityDefinition::new));
    store.publish([
        PsychicDefinition::new("p", &["a", "b"]),
        PsychicDefinition::new("q", &["c"]),
    ]);
    store
}

/// [`abc_store`] plus, for each key, an ability and a single-ability psychic
/// both named after the key and using the behavior registered under it.
pub fn store_with_behaviors(keys: &[&str]) -> DefinitionStore {
    let store = DefinitionStore::new(DataDirectories::new("unused"));

    let mut abilities: Vec<AbilityDefinition> =
        ["a", "b", "c"].map(AbilityDefinition::new).into();
    let mut psychics = vec![
        PsychicDefinition::new("p", &["a", "b"]),
        PsychicDefinition::new("q", &["c"]),
    ];
    for key in keys {
        let mut ability = AbilityDefinition::new(key);
        ability.behavior = (*key).to_string();
        abilities.push(ability);
        psychics.push(PsychicDefinition::new(key, &[*key]));
    }
    store.publish(abilities);
    store.publish(psychics);
    store
}

/// Writes `body` to `<root>/<kind dir>/<name>.json`.
pub fn write_definition(root: &Path, kind: DefinitionKind, name: &str, body: &str) {
    let dir = root.join(kind.dir_name());
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(format!("{name}.json")), body).unwrap();
}

/// Writes the [`abc_store`] definitions to disk under `root`, plus one esper
/// file per `(player, psychic)` binding.
pub fn write_abc_tree(root: &Path, espers: &[(PlayerId, &str)]) {
    for name in ["a", "b", "c"] {
        write_definition(root, DefinitionKind::Ability, name, "{}");
    }
    write_definition(
        root,
        DefinitionKind::Psychic,
        "p",
        r#"{"abilities": ["a", "b"]}"#,
    );
    write_definition(root, DefinitionKind::Psychic, "q", r#"{"abilities": ["c"]}"#);
    for (i, (player, psychic)) in espers.iter().enumerate() {
        write_definition(
            root,
            DefinitionKind::Esper,
            &format!("esper{i}"),
            &format!(r#"{{"player": "{player}", "psychic": "{psychic}"}}"#),
        );
    }
}
