//! Error types for Remembr core operations.

use thiserror::Error;

use crate::enums::ScopeLevel;

/// Errors produced below the HTTP layer.
///
/// The API crate maps each variant onto a stable wire code; see the error
/// taxonomy there. `NotFound` deliberately does not distinguish "absent" from
/// "outside scope" to prevent scope probing.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Scope construction violated the hierarchy rules.
    #[error("invalid scope: {0}")]
    InvalidScope(String),

    /// The identified level requires an id that was not provided.
    #[error("{level} scope requires {missing}")]
    ScopeIdMissing {
        level: ScopeLevel,
        missing: &'static str,
    },

    /// Unknown search mode string.
    #[error("unknown search mode: {0}")]
    InvalidSearchMode(String),

    /// Unknown environment string.
    #[error("unknown environment: {0}")]
    InvalidEnvironment(String),

    /// Configuration value failed validation.
    #[error("invalid configuration for {field}: {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    /// A serialized window payload could not be decoded.
    #[error("malformed window payload: {0}")]
    MalformedWindow(#[from] serde_json::Error),
}

/// Result alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
