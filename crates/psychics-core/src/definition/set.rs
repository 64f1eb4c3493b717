use std::collections::BTreeMap;
use std::sync::Arc;

use super::Definition;

/// One immutable generation of definitions of a single kind.
///
/// Sets are never mutated after construction; a reload builds a fresh set and
/// swaps it in. Iteration is in name order.
#[derive(Debug)]
pub struct DefinitionSet<D> {
    by_name: BTreeMap<String, Arc<D>>,
    generation: u64,
}

impl<D> Default for DefinitionSet<D> {
    fn default() -> Self {
        Self {
            by_name: BTreeMap::new(),
            generation: 0,
        }
    }
}

impl<D: Definition> DefinitionSet<D> {
    /// Builds a set from definitions. Later duplicates replace earlier ones.
    #[must_use]
    pub fn new(definitions: impl IntoIterator<Item = D>, generation: u64) -> Self {
        let by_name = definitions
            .into_iter()
            .map(|d| (d.name().to_string(), Arc::new(d)))
            .collect();
        Self {
            by_name,
            generation,
        }
    }

    /// Looks up a definition by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<D>> {
        self.by_name.get(name)
    }

    /// Whether a definition with `name` exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Number of definitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(String::as_str)
    }

    /// Definitions in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<D>> {
        self.by_name.values()
    }

    /// The store generation that published this set.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}
