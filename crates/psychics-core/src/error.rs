//! Top-level error types.

use psychics_update::UpdateError;
use thiserror::Error;

use crate::config::ConfigError;
use crate::definition::StoreError;

/// The tick thread is gone; the request was not delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HandleError {
    /// The [`Psychics`](crate::Psychics) runtime was dropped.
    #[error("psychics runtime is closed")]
    Closed,
}

/// Errors surfaced by the [`Psychics`](crate::Psychics) facade.
#[derive(Debug, Error)]
pub enum PsychicsError {
    /// Configuration could not be read.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Definitions could not be loaded.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The update agent could not be built.
    #[error(transparent)]
    Update(#[from] UpdateError),
    /// Self-update was requested but is not enabled.
    #[error("self-update is not configured")]
    UpdateUnavailable,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::DefinitionKind;

    #[test]
    fn store_errors_convert_transparently() {
        let err: PsychicsError = StoreError::NotFound {
            kind: DefinitionKind::Psychic,
            name: "ghost".into(),
        }
        .into();
        assert!(matches!(err, PsychicsError::Store(_)));
        assert!(err.to_string().contains("\"ghost\""));
    }

    #[test]
    fn handle_error_message() {
        assert_eq!(HandleError::Closed.to_string(), "psychics runtime is closed");
    }
}
