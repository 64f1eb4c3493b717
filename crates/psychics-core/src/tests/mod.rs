//! Cross-module tests for the psychics runtime.
//!
//! - `integration.rs`: end-to-end scenarios through [`Psychics`](crate::Psychics)
//! - `properties.rs`: proptest checks on registry and tick invariants
//! - `helpers.rs`: fixtures shared with the inline unit tests

pub(crate) mod helpers;
