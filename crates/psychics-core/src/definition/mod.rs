//! Immutable definitions loaded from the data directory.
//!
//! Three categories of definition live in sibling directories, one JSON file
//! per definition. The file stem is the definition's name:
//!
//! ```text
//! <data_dir>/abilities/fireball.json   -> AbilityDefinition "fireball"
//! <data_dir>/psychics/pyro.json        -> PsychicDefinition "pyro"
//! <data_dir>/espers/<anything>.json    -> EsperDefinition   (player -> psychic)
//! ```
//!
//! Definitions own no runtime state. Every live instance shares them through
//! `Arc`, and a reload publishes a whole new [`DefinitionSet`] at once (see
//! [`DefinitionStore`]).

mod set;
mod store;

use std::fmt;
use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::host::PlayerId;

pub use set::DefinitionSet;
pub use store::{DataDirectories, DefinitionRef, DefinitionStore, LoadReport, StoreError};

// =============================================================================
// Definition Kind
// =============================================================================

/// The three definition categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefinitionKind {
    /// Ability definitions (`abilities/`).
    Ability,
    /// Psychic definitions (`psychics/`).
    Psychic,
    /// Esper bindings (`espers/`).
    Esper,
}

impl DefinitionKind {
    /// All kinds, in load order.
    pub const ALL: [Self; 3] = [Self::Ability, Self::Psychic, Self::Esper];

    /// Name of the directory holding this kind under the data directory.
    #[must_use]
    pub const fn dir_name(self) -> &'static str {
        match self {
            Self::Ability => "abilities",
            Self::Psychic => "psychics",
            Self::Esper => "espers",
        }
    }
}

impl fmt::Display for DefinitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ability => write!(f, "ability"),
            Self::Psychic => write!(f, "psychic"),
            Self::Esper => write!(f, "esper"),
        }
    }
}

// =============================================================================
// Definition Trait
// =============================================================================

/// Common behavior of the three definition types.
pub trait Definition: DeserializeOwned + fmt::Debug + Send + Sync + 'static {
    /// Which category this type belongs to.
    const KIND: DefinitionKind;

    /// The definition's name (its file stem).
    fn name(&self) -> &str;

    /// Assigns the name after parsing.
    fn set_name(&mut self, name: String);

    /// Checks semantic constraints that the JSON shape cannot express.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when the definition is unusable.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }

    #[doc(hidden)]
    fn slot(store: &DefinitionStore) -> &arc_swap::ArcSwap<DefinitionSet<Self>>;
}

fn check_non_negative(field: &str, value: f64) -> Result<(), String> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(format!("{field} must be a finite, non-negative number (got {value})"))
    }
}

// =============================================================================
// Ability Definition
// =============================================================================

fn default_behavior() -> String {
    "passive".to_string()
}

/// A unit of behavior with cooldown and activation rules.
///
/// # Example
///
/// ```
/// use psychics_core::definition::AbilityDefinition;
///
/// let def: AbilityDefinition = serde_json::from_str(r#"{
///     "behavior": "projection",
///     "cooldown_ticks": 40,
///     "duration_ticks": 100,
///     "mana_cost": 25.0,
///     "parameters": {"entity": "armor_stand"}
/// }"#).unwrap();
///
/// assert_eq!(def.behavior, "projection");
/// assert_eq!(def.cooldown_ticks, 40);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbilityDefinition {
    /// Name, taken from the file stem.
    #[serde(skip)]
    pub name: String,
    /// Behavior key resolved through the ability catalog.
    #[serde(default = "default_behavior")]
    pub behavior: String,
    /// Name shown to players.
    #[serde(default)]
    pub display_name: Option<String>,
    /// Free-text description.
    #[serde(default)]
    pub description: String,
    /// Ticks before the ability can be activated again.
    #[serde(default)]
    pub cooldown_ticks: u32,
    /// Ticks the ability stays active; zero means instantaneous.
    #[serde(default)]
    pub duration_ticks: u32,
    /// Mana charged on activation.
    #[serde(default)]
    pub mana_cost: f64,
    /// Behavior-specific settings.
    #[serde(default)]
    pub parameters: serde_json::Value,
}

impl AbilityDefinition {
    /// Creates a passive ability definition with no cost or cooldown.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            behavior: default_behavior(),
            display_name: None,
            description: String::new(),
            cooldown_ticks: 0,
            duration_ticks: 0,
            mana_cost: 0.0,
            parameters: serde_json::Value::Null,
        }
    }

    /// Name shown to players, falling back to the definition name.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }
}

impl Definition for AbilityDefinition {
    const KIND: DefinitionKind = DefinitionKind::Ability;

    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: String) {
        self.name = name;
    }

    fn validate(&self) -> Result<(), String> {
        if self.behavior.trim().is_empty() {
            return Err("behavior must not be empty".to_string());
        }
        check_non_negative("mana_cost", self.mana_cost)
    }

    fn slot(store: &DefinitionStore) -> &arc_swap::ArcSwap<DefinitionSet<Self>> {
        &store.abilities
    }
}

// =============================================================================
// Psychic Definition
// =============================================================================

fn default_max_mana() -> f64 {
    100.0
}

/// A persona made of abilities, with a mana pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PsychicDefinition {
    /// Name, taken from the file stem.
    #[serde(skip)]
    pub name: String,
    /// Name shown to players.
    #[serde(default)]
    pub display_name: Option<String>,
    /// Free-text description.
    #[serde(default)]
    pub description: String,
    /// Ability names, in activation-slot order.
    #[serde(default)]
    pub abilities: Vec<String>,
    /// Mana pool size.
    #[serde(default = "default_max_mana")]
    pub max_mana: f64,
    /// Mana regained every tick.
    #[serde(default)]
    pub mana_regen_per_tick: f64,
}

impl PsychicDefinition {
    /// Creates a psychic referencing `abilities`, with default mana settings.
    #[must_use]
    pub fn new(name: &str, abilities: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            display_name: None,
            description: String::new(),
            abilities: abilities.iter().map(|a| (*a).to_string()).collect(),
            max_mana: default_max_mana(),
            mana_regen_per_tick: 0.0,
        }
    }
}

impl Definition for PsychicDefinition {
    const KIND: DefinitionKind = DefinitionKind::Psychic;

    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: String) {
        self.name = name;
    }

    fn validate(&self) -> Result<(), String> {
        check_non_negative("max_mana", self.max_mana)?;
        check_non_negative("mana_regen_per_tick", self.mana_regen_per_tick)?;
        for (i, ability) in self.abilities.iter().enumerate() {
            if self.abilities[..i].contains(ability) {
                return Err(format!("ability {ability:?} is listed twice"));
            }
        }
        Ok(())
    }

    fn slot(store: &DefinitionStore) -> &arc_swap::ArcSwap<DefinitionSet<Self>> {
        &store.psychics
    }
}

// =============================================================================
// Esper Definition
// =============================================================================

/// Binds a player to the psychic they receive when they join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EsperDefinition {
    /// Name, taken from the file stem.
    #[serde(skip)]
    pub name: String,
    /// The bound player.
    pub player: PlayerId,
    /// Name of the psychic to attach.
    pub psychic: String,
}

impl Definition for EsperDefinition {
    const KIND: DefinitionKind = DefinitionKind::Esper;

    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: String) {
        self.name = name;
    }

    fn validate(&self) -> Result<(), String> {
        if self.psychic.trim().is_empty() {
            return Err("psychic must not be empty".to_string());
        }
        Ok(())
    }

    fn slot(store: &DefinitionStore) -> &arc_swap::ArcSwap<DefinitionSet<Self>> {
        &store.espers
    }
}

// =============================================================================
// Load Errors
// =============================================================================

/// A single definition file that could not be loaded.
///
/// Load errors are reported and skipped; they never abort the batch.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The file could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid JSON for this kind.
    #[error("malformed {}: {source}", path.display())]
    Parse {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
    /// The file parsed but breaks a semantic rule.
    #[error("invalid {}: {reason}", path.display())]
    Invalid {
        /// File path.
        path: PathBuf,
        /// What is wrong.
        reason: String,
    },
}

impl LoadError {
    /// The file the error refers to.
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        match self {
            Self::Io { path, .. } | Self::Parse { path, .. } | Self::Invalid { path, .. } => path,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    mod kind_tests {
        use super::*;

        #[test]
        fn dir_names() {
            assert_eq!(DefinitionKind::Ability.dir_name(), "abilities");
            assert_eq!(DefinitionKind::Psychic.dir_name(), "psychics");
            assert_eq!(DefinitionKind::Esper.dir_name(), "espers");
        }

        #[test]
        fn display_format() {
            assert_eq!(DefinitionKind::Ability.to_string(), "ability");
            assert_eq!(DefinitionKind::Esper.to_string(), "esper");
        }

        #[test]
        fn load_order() {
            assert_eq!(
                DefinitionKind::ALL,
                [
                    DefinitionKind::Ability,
                    DefinitionKind::Psychic,
                    DefinitionKind::Esper
                ]
            );
        }
    }

    mod ability_tests {
        use super::*;

        #[test]
        fn defaults_to_passive() {
            let def: AbilityDefinition = serde_json::from_str("{}").unwrap();
            assert_eq!(def.behavior, "passive");
            assert_eq!(def.cooldown_ticks, 0);
            assert!(def.validate().is_ok());
        }

        #[test]
        fn name_is_not_read_from_json() {
            let def: AbilityDefinition =
                serde_json::from_str(r#"{"name": "sneaky"}"#).unwrap();
            assert_eq!(def.name, "");
        }

        #[test]
        fn negative_cost_is_invalid() {
            let mut def = AbilityDefinition::new("a");
            def.mana_cost = -1.0;
            assert!(def.validate().is_err());
            def.mana_cost = f64::NAN;
            assert!(def.validate().is_err());
        }

        #[test]
        fn display_name_falls_back() {
            let mut def = AbilityDefinition::new("blink");
            assert_eq!(def.display_name(), "blink");
            def.display_name = Some("Blink".to_string());
            assert_eq!(def.display_name(), "Blink");
        }
    }

    mod psychic_tests {
        use super::*;

        #[test]
        fn default_mana() {
            let def: PsychicDefinition =
                serde_json::from_str(r#"{"abilities": ["a", "b"]}"#).unwrap();
            assert_eq!(def.max_mana, 100.0);
            assert_eq!(def.abilities, vec!["a", "b"]);
        }

        #[test]
        fn duplicate_abilities_are_invalid() {
            let def = PsychicDefinition::new("p", &["a", "b", "a"]);
            let err = def.validate().unwrap_err();
            assert!(err.contains("\"a\""));
        }

        #[test]
        fn empty_ability_list_is_valid() {
            assert!(PsychicDefinition::new("p", &[]).validate().is_ok());
        }
    }

    mod esper_tests {
        use super::*;

        #[test]
        fn requires_player_and_psychic() {
            assert!(serde_json::from_str::<EsperDefinition>(r#"{"psychic": "p"}"#).is_err());

            let json = format!(
                r#"{{"player": "{}", "psychic": ""}}"#,
                uuid::Uuid::from_u128(1)
            );
            let def: EsperDefinition = serde_json::from_str(&json).unwrap();
            assert!(def.validate().is_err());
        }
    }
}
