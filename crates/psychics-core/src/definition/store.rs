//! Hot-reloadable definition storage.
//!
//! Each kind lives behind an [`ArcSwap`]. A load parses the whole directory
//! off to the side (in parallel with rayon), builds a new [`DefinitionSet`],
//! and publishes it with a single pointer swap. Readers holding the previous
//! set keep a consistent view until they drop it; new readers see the new set.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{
    AbilityDefinition, Definition, DefinitionKind, DefinitionSet, EsperDefinition, LoadError,
    PsychicDefinition,
};
use crate::host::PlayerId;

// =============================================================================
// Data Directories
// =============================================================================

/// Location of the definition tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDirectories {
    root: PathBuf,
}

impl DataDirectories {
    /// Uses `root` as the data directory.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The data directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The directory holding definitions of `kind`.
    #[must_use]
    pub fn dir(&self, kind: DefinitionKind) -> PathBuf {
        self.root.join(kind.dir_name())
    }
}

// =============================================================================
// Errors and Reports
// =============================================================================

/// Store-level failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A definition directory exists but cannot be listed. Nothing was published.
    #[error("cannot scan {kind} directory {}: {source}", path.display())]
    Directory {
        /// Kind being loaded.
        kind: DefinitionKind,
        /// The directory.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// No definition with that name exists in the current generation.
    #[error("unknown {kind} {name:?}")]
    NotFound {
        /// Kind searched.
        kind: DefinitionKind,
        /// Name searched.
        name: String,
    },
}

/// Summary of one load or reload.
#[derive(Debug)]
pub struct LoadReport {
    /// Kind loaded.
    pub kind: DefinitionKind,
    /// Directory scanned.
    pub directory: PathBuf,
    /// Definitions published.
    pub loaded: usize,
    /// Files skipped.
    pub failed: Vec<LoadError>,
    /// Store generation of the published set.
    pub generation: u64,
}

impl LoadReport {
    /// Whether every file loaded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    fn log(&self) {
        for error in &self.failed {
            warn!(kind = %self.kind, %error, "skipped definition");
        }
        info!(
            kind = %self.kind,
            directory = %self.directory.display(),
            loaded = self.loaded,
            failed = self.failed.len(),
            generation = self.generation,
            "definitions loaded"
        );
    }
}

/// A definition of any kind.
#[derive(Debug, Clone)]
pub enum DefinitionRef {
    /// An ability definition.
    Ability(Arc<AbilityDefinition>),
    /// A psychic definition.
    Psychic(Arc<PsychicDefinition>),
    /// An esper binding.
    Esper(Arc<EsperDefinition>),
}

impl DefinitionRef {
    /// Kind of the referenced definition.
    #[must_use]
    pub fn kind(&self) -> DefinitionKind {
        match self {
            Self::Ability(_) => DefinitionKind::Ability,
            Self::Psychic(_) => DefinitionKind::Psychic,
            Self::Esper(_) => DefinitionKind::Esper,
        }
    }

    /// Name of the referenced definition.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Ability(d) => &d.name,
            Self::Psychic(d) => &d.name,
            Self::Esper(d) => &d.name,
        }
    }
}

// =============================================================================
// Definition Store
// =============================================================================

/// Owns the current generation of every definition kind.
///
/// # Example
///
/// ```
/// use psychics_core::definition::{
///     AbilityDefinition, DataDirectories, DefinitionKind, DefinitionStore,
/// };
///
/// let dir = tempfile::tempdir().unwrap();
/// let abilities = dir.path().join("abilities");
/// std::fs::create_dir_all(&abilities).unwrap();
/// std::fs::write(abilities.join("blink.json"), r#"{"cooldown_ticks": 20}"#).unwrap();
/// std::fs::write(abilities.join("broken.json"), "{ nope").unwrap();
///
/// let store = DefinitionStore::new(DataDirectories::new(dir.path()));
/// let report = store.reload(DefinitionKind::Ability).unwrap();
///
/// assert_eq!(report.loaded, 1);
/// assert_eq!(report.failed.len(), 1);
/// assert_eq!(store.get::<AbilityDefinition>("blink").unwrap().cooldown_ticks, 20);
/// ```
pub struct DefinitionStore {
    dirs: DataDirectories,
    pub(crate) abilities: ArcSwap<DefinitionSet<AbilityDefinition>>,
    pub(crate) psychics: ArcSwap<DefinitionSet<PsychicDefinition>>,
    pub(crate) espers: ArcSwap<DefinitionSet<EsperDefinition>>,
    generation: AtomicU64,
}

impl std::fmt::Debug for DefinitionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefinitionStore")
            .field("root", &self.dirs.root())
            .field("abilities", &self.abilities.load().len())
            .field("psychics", &self.psychics.load().len())
            .field("espers", &self.espers.load().len())
            .field("generation", &self.generation())
            .finish()
    }
}

impl DefinitionStore {
    /// Creates an empty store rooted at `dirs`. Nothing is read until a load.
    #[must_use]
    pub fn new(dirs: DataDirectories) -> Self {
        Self {
            dirs,
            abilities: ArcSwap::from_pointee(DefinitionSet::default()),
            psychics: ArcSwap::from_pointee(DefinitionSet::default()),
            espers: ArcSwap::from_pointee(DefinitionSet::default()),
            generation: AtomicU64::new(0),
        }
    }

    /// The configured data directories.
    #[must_use]
    pub fn directories(&self) -> &DataDirectories {
        &self.dirs
    }

    /// Generation of the most recent publish across all kinds.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Loads every `*.json` file in `directory` as `kind` and publishes the result.
    ///
    /// Malformed files are skipped and listed in the report. A missing
    /// directory publishes an empty set.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Directory`] if the directory exists but cannot be
    /// listed; the previous set stays published.
    pub fn load(&self, kind: DefinitionKind, directory: &Path) -> Result<LoadReport, StoreError> {
        match kind {
            DefinitionKind::Ability => self.load_into::<AbilityDefinition>(directory),
            DefinitionKind::Psychic => self.load_into::<PsychicDefinition>(directory),
            DefinitionKind::Esper => self.load_into::<EsperDefinition>(directory),
        }
    }

    /// Reloads `kind` from its configured directory.
    ///
    /// # Errors
    ///
    /// See [`load`](Self::load).
    pub fn reload(&self, kind: DefinitionKind) -> Result<LoadReport, StoreError> {
        let directory = self.dirs.dir(kind);
        self.load(kind, &directory)
    }

    /// Reloads every kind, abilities first.
    ///
    /// # Errors
    ///
    /// Stops at the first [`StoreError::Directory`]; kinds loaded before it
    /// stay published.
    pub fn load_all(&self) -> Result<Vec<LoadReport>, StoreError> {
        DefinitionKind::ALL
            .iter()
            .map(|&kind| self.reload(kind))
            .collect()
    }

    /// Replaces every definition of type `D` with `definitions`.
    ///
    /// Intended for hosts that build definitions in code.
    pub fn publish<D: Definition>(&self, definitions: impl IntoIterator<Item = D>) -> u64 {
        let generation = self.next_generation();
        D::slot(self).store(Arc::new(DefinitionSet::new(definitions, generation)));
        generation
    }

    /// Looks up a definition of type `D`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when no such definition is published.
    pub fn get<D: Definition>(&self, name: &str) -> Result<Arc<D>, StoreError> {
        D::slot(self)
            .load()
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: D::KIND,
                name: name.to_string(),
            })
    }

    /// Looks up a definition of `kind` by name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when no such definition is published.
    pub fn lookup(&self, kind: DefinitionKind, name: &str) -> Result<DefinitionRef, StoreError> {
        Ok(match kind {
            DefinitionKind::Ability => DefinitionRef::Ability(self.get(name)?),
            DefinitionKind::Psychic => DefinitionRef::Psychic(self.get(name)?),
            DefinitionKind::Esper => DefinitionRef::Esper(self.get(name)?),
        })
    }

    /// Whether a definition of `kind` named `name` is published.
    #[must_use]
    pub fn contains(&self, kind: DefinitionKind, name: &str) -> bool {
        match kind {
            DefinitionKind::Ability => self.abilities.load().contains(name),
            DefinitionKind::Psychic => self.psychics.load().contains(name),
            DefinitionKind::Esper => self.espers.load().contains(name),
        }
    }

    /// The current set of `D`. Stays consistent for as long as it is held.
    #[must_use]
    pub fn snapshot<D: Definition>(&self) -> Arc<DefinitionSet<D>> {
        D::slot(self).load_full()
    }

    /// The esper binding for `player`, if one is published.
    ///
    /// When several files bind the same player, the first in name order wins.
    #[must_use]
    pub fn esper_for(&self, player: PlayerId) -> Option<Arc<EsperDefinition>> {
        self.espers
            .load()
            .iter()
            .find(|e| e.player == player)
            .cloned()
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn load_into<D: Definition>(&self, directory: &Path) -> Result<LoadReport, StoreError> {
        let (definitions, failed) = scan::<D>(directory)?;
        let loaded = definitions.len();
        let generation = self.publish(definitions);

        let report = LoadReport {
            kind: D::KIND,
            directory: directory.to_path_buf(),
            loaded,
            failed,
            generation,
        };
        report.log();
        Ok(report)
    }
}

// =============================================================================
// Scanning
// =============================================================================

fn is_definition_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

fn scan<D: Definition>(directory: &Path) -> Result<(Vec<D>, Vec<LoadError>), StoreError> {
    let entries = match fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(kind = %D::KIND, directory = %directory.display(), "definition directory missing");
            return Ok((Vec::new(), Vec::new()));
        }
        Err(source) => {
            return Err(StoreError::Directory {
                kind: D::KIND,
                path: directory.to_path_buf(),
                source,
            })
        }
    };

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry.path()),
            Err(error) => {
                warn!(directory = %directory.display(), %error, "unreadable directory entry");
                None
            }
        })
        .filter(|p| is_definition_file(p))
        .collect();
    paths.sort();
    debug!(kind = %D::KIND, files = paths.len(), "parsing definitions");

    let parsed: Vec<Result<D, LoadError>> = paths
        .par_iter()
        .map(|path| parse_file::<D>(path))
        .collect();

    // Stems can collide across extension spellings; the first path wins.
    let mut names = BTreeSet::new();
    let mut definitions = Vec::new();
    let mut failed = Vec::new();
    for (path, result) in paths.into_iter().zip(parsed) {
        match result {
            Ok(definition) => {
                if names.insert(definition.name().to_string()) {
                    definitions.push(definition);
                } else {
                    failed.push(LoadError::Invalid {
                        reason: format!("duplicate name {:?}", definition.name()),
                        path,
                    });
                }
            }
            Err(error) => failed.push(error),
        }
    }
    Ok((definitions, failed))
}

fn parse_file<D: Definition>(path: &Path) -> Result<D, LoadError> {
    let bytes = fs::read(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut definition: D = serde_json::from_slice(&bytes).map_err(|source| LoadError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    definition.set_name(name);
    definition.validate().map_err(|reason| LoadError::Invalid {
        path: path.to_path_buf(),
        reason,
    })?;
    Ok(definition)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;

    fn write(dir: &Path, kind: DefinitionKind, name: &str, body: &str) {
        let sub = dir.join(kind.dir_name());
        fs::create_dir_all(&sub).unwrap();
        fs::write(sub.join(format!("{name}.json")), body).unwrap();
    }

    fn store_at(dir: &Path) -> DefinitionStore {
        DefinitionStore::new(DataDirectories::new(dir))
    }

    mod load_tests {
        use super::*;

        #[test]
        fn malformed_files_are_skipped_not_fatal() {
            let dir = tempfile::tempdir().unwrap();
            write(dir.path(), DefinitionKind::Ability, "a", "{}");
            write(dir.path(), DefinitionKind::Ability, "b", r#"{"cooldown_ticks": 5}"#);
            write(dir.path(), DefinitionKind::Ability, "c", "not json");
            write(dir.path(), DefinitionKind::Ability, "d", r#"{"mana_cost": -3}"#);
            write(dir.path(), DefinitionKind::Ability, "e", r#"{"cooldown_ticks": "x"}"#);

            let store = store_at(dir.path());
            let report = store.reload(DefinitionKind::Ability).unwrap();

            assert_eq!(report.loaded, 2);
            assert_eq!(report.failed.len(), 3);
            assert!(!report.is_clean());
            let set = store.snapshot::<AbilityDefinition>();
            assert_eq!(set.names().collect::<Vec<_>>(), vec!["a", "b"]);
            assert!(report
                .failed
                .iter()
                .any(|e| matches!(e, LoadError::Invalid { .. })));
        }

        #[test]
        fn colliding_stems_load_once() {
            let dir = tempfile::tempdir().unwrap();
            write(dir.path(), DefinitionKind::Ability, "a", "{}");
            let sub = dir.path().join("abilities");
            fs::write(sub.join("a.JSON"), r#"{"cooldown_ticks": 9}"#).unwrap();

            let store = store_at(dir.path());
            let report = store.reload(DefinitionKind::Ability).unwrap();

            assert_eq!(report.loaded, 1);
            assert_eq!(report.loaded, store.snapshot::<AbilityDefinition>().len());
            assert_eq!(report.failed.len(), 1);
            assert!(matches!(
                &report.failed[0],
                LoadError::Invalid { path, reason } if path.ends_with("a.json") && reason.contains("duplicate")
            ));
            // "a.JSON" sorts first.
            assert_eq!(store.get::<AbilityDefinition>("a").unwrap().cooldown_ticks, 9);
        }

        #[test]
        fn non_json_files_are_ignored() {
            let dir = tempfile::tempdir().unwrap();
            write(dir.path(), DefinitionKind::Ability, "a", "{}");
            let sub = dir.path().join("abilities");
            fs::write(sub.join("README.txt"), "notes").unwrap();
            fs::create_dir_all(sub.join("nested.json")).unwrap();

            let store = store_at(dir.path());
            let report = store.reload(DefinitionKind::Ability).unwrap();
            assert_eq!(report.loaded, 1);
            assert!(report.is_clean());
        }

        #[test]
        fn missing_directory_is_empty() {
            let dir = tempfile::tempdir().unwrap();
            let store = store_at(dir.path());
            let report = store.reload(DefinitionKind::Psychic).unwrap();
            assert_eq!(report.loaded, 0);
            assert!(store.snapshot::<PsychicDefinition>().is_empty());
        }

        #[test]
        fn unreadable_directory_keeps_previous_set() {
            let dir = tempfile::tempdir().unwrap();
            write(dir.path(), DefinitionKind::Ability, "a", "{}");
            let store = store_at(dir.path());
            store.reload(DefinitionKind::Ability).unwrap();

            // A regular file where a directory is expected cannot be listed.
            let file = dir.path().join("file.json");
            fs::write(&file, "{}").unwrap();
            let err = store.load(DefinitionKind::Ability, &file).unwrap_err();

            assert!(matches!(err, StoreError::Directory { .. }));
            assert!(store.contains(DefinitionKind::Ability, "a"));
        }

        #[test]
        fn name_comes_from_file_stem() {
            let dir = tempfile::tempdir().unwrap();
            write(dir.path(), DefinitionKind::Psychic, "pyro", r#"{"abilities": ["fireball"]}"#);
            let store = store_at(dir.path());
            store.reload(DefinitionKind::Psychic).unwrap();
            let pyro = store.get::<PsychicDefinition>("pyro").unwrap();
            assert_eq!(pyro.name, "pyro");
            assert_eq!(pyro.abilities, vec!["fireball"]);
        }

        #[test]
        fn load_all_loads_each_kind() {
            let dir = tempfile::tempdir().unwrap();
            let player = PlayerId::random();
            write(dir.path(), DefinitionKind::Ability, "a", "{}");
            write(dir.path(), DefinitionKind::Psychic, "p", r#"{"abilities": ["a"]}"#);
            write(
                dir.path(),
                DefinitionKind::Esper,
                "someone",
                &format!(r#"{{"player": "{player}", "psychic": "p"}}"#),
            );

            let store = store_at(dir.path());
            let reports = store.load_all().unwrap();

            assert_eq!(reports.len(), 3);
            assert!(reports.iter().all(|r| r.loaded == 1));
            assert_eq!(store.esper_for(player).unwrap().psychic, "p");
            assert!(store.esper_for(PlayerId::random()).is_none());
        }
    }

    mod lookup_tests {
        use super::*;

        #[test]
        fn get_unknown_is_not_found() {
            let store = store_at(Path::new("/nonexistent"));
            let err = store.get::<AbilityDefinition>("ghost").unwrap_err();
            assert!(matches!(
                err,
                StoreError::NotFound { kind: DefinitionKind::Ability, ref name } if name == "ghost"
            ));
        }

        #[test]
        fn lookup_returns_matching_kind() {
            let store = store_at(Path::new("/nonexistent"));
            store.publish([AbilityDefinition::new("a")]);
            let found = store.lookup(DefinitionKind::Ability, "a").unwrap();
            assert_eq!(found.kind(), DefinitionKind::Ability);
            assert_eq!(found.name(), "a");
            assert!(store.lookup(DefinitionKind::Psychic, "a").is_err());
        }

        #[test]
        fn publish_bumps_generation() {
            let store = store_at(Path::new("/nonexistent"));
            assert_eq!(store.generation(), 0);
            let g1 = store.publish([AbilityDefinition::new("a")]);
            let g2 = store.publish([PsychicDefinition::new("p", &["a"])]);
            assert!(g2 > g1);
            assert_eq!(store.snapshot::<AbilityDefinition>().generation(), g1);
            assert_eq!(store.generation(), g2);
        }
    }

    mod reload_tests {
        use super::*;

        #[test]
        fn held_snapshot_survives_reload() {
            let dir = tempfile::tempdir().unwrap();
            write(dir.path(), DefinitionKind::Ability, "old", "{}");
            let store = store_at(dir.path());
            store.reload(DefinitionKind::Ability).unwrap();

            let before = store.snapshot::<AbilityDefinition>();
            fs::remove_file(dir.path().join("abilities/old.json")).unwrap();
            write(dir.path(), DefinitionKind::Ability, "new", "{}");
            store.reload(DefinitionKind::Ability).unwrap();

            assert!(before.contains("old"));
            assert!(!before.contains("new"));
            let after = store.snapshot::<AbilityDefinition>();
            assert!(after.contains("new"));
            assert!(!after.contains("old"));
        }

        #[test]
        fn concurrent_readers_see_whole_generations() {
            // Generation A has a0..a9, generation B has b0..b9. A reader must
            // never see a mix of prefixes within one snapshot.
            let store = Arc::new(store_at(Path::new("/nonexistent")));
            let gen_a: Vec<_> = (0..10).map(|i| AbilityDefinition::new(&format!("a{i}"))).collect();
            let gen_b: Vec<_> = (0..10).map(|i| AbilityDefinition::new(&format!("b{i}"))).collect();
            store.publish(gen_a.clone());

            let barrier = Arc::new(Barrier::new(3));
            let readers: Vec<_> = (0..2)
                .map(|_| {
                    let store = Arc::clone(&store);
                    let barrier = Arc::clone(&barrier);
                    std::thread::spawn(move || {
                        barrier.wait();
                        for _ in 0..500 {
                            let set = store.snapshot::<AbilityDefinition>();
                            let prefixes: std::collections::BTreeSet<char> = set
                                .names()
                                .filter_map(|n| n.chars().next())
                                .collect();
                            assert_eq!(set.len(), 10);
                            assert_eq!(prefixes.len(), 1);
                        }
                    })
                })
                .collect();

            barrier.wait();
            for i in 0..200 {
                if i % 2 == 0 {
                    store.publish(gen_b.clone());
                } else {
                    store.publish(gen_a.clone());
                }
            }
            for reader in readers {
                reader.join().unwrap();
            }
        }
    }
}
