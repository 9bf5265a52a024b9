//! Custom error types for cipherbook
//!
//! This module defines the error hierarchy for the client using thiserror
//! for ergonomic error definitions. The variants follow the failure taxonomy
//! of the key lifecycle: missing keys, remote validation failures, transport
//! failures, and the two ways a credential rotation can end badly.

use thiserror::Error;

use crate::models::EntityKind;

/// The main error type for cipherbook operations
#[derive(Error, Debug)]
pub enum CipherbookError {
    /// No cipher key is installed for an operation that needs one
    #[error("Not authenticated: no active cipher key")]
    Unauthenticated,

    /// The remote rejected the payload shape or content (non-retryable)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Network or server-side failure (retryable by caller policy)
    #[error("Transport error: {0}")]
    Transport(String),

    /// A remote call exceeded its deadline (final for that attempt)
    #[error("Timed out: {0}")]
    Timeout(String),

    /// The authentication transport refused the credential or token
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// One or more repositories failed during rotation; the old key stays active
    #[error("Credential change did not take effect: {cause}")]
    RotationAborted {
        cause: Box<CipherbookError>,
        /// Repositories whose server copy was already re-encrypted under the
        /// discarded key
        diverged: Vec<EntityKind>,
    },

    /// A rotation is still settling
    #[error("A credential rotation is already in progress")]
    RotationInProgress,

    /// Server payloads of a repository no longer match the active key after an
    /// aborted rotation
    #[error("{kind} records on the server were re-encrypted by an aborted rotation")]
    PartialRotationInconsistency { kind: EntityKind },

    /// A repository was asked to push a snapshot it never loaded
    #[error("{0} snapshot has not been loaded in this session")]
    NotMaterialized(EntityKind),

    /// Operation not allowed in the current session state
    #[error("Invalid session state: {0}")]
    InvalidState(String),

    /// Encryption errors
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(String),

    /// Local cache errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Entity not found errors
    #[error("{entity_type} not found: {identifier}")]
    NotFound {
        entity_type: &'static str,
        identifier: String,
    },
}

impl CipherbookError {
    /// Create a "not found" error for a record of the given kind
    pub fn record_not_found(kind: EntityKind, identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: kind.label(),
            identifier: identifier.into(),
        }
    }

    /// Whether the coordinator may try the same call again
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Check if this is a validation error
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Check if this is an unauthenticated error
    pub fn is_unauthenticated(&self) -> bool {
        matches!(self, Self::Unauthenticated)
    }

    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// The underlying failure of an aborted rotation, or `self` otherwise
    pub fn root_cause(&self) -> &CipherbookError {
        match self {
            Self::RotationAborted { cause, .. } => cause.root_cause(),
            other => other,
        }
    }
}

// Implement From traits for common error types

impl From<std::io::Error> for CipherbookError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for CipherbookError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl From<reqwest::Error> for CipherbookError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_decode() {
            Self::Validation(format!("Malformed server response: {}", err))
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Result type alias for cipherbook operations
pub type CipherbookResult<T> = Result<T, CipherbookError>;
