//! Machine-readable error kinds for the core.

use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

/// One of the error kinds named in the design: every variant maps to a
/// single `ErrorKind` so callers (HTTP layer, CLI) can branch on `kind()`
/// without matching the full variant set.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("sequence length {found} does not match reference length {expected}")]
    LengthMismatch { expected: usize, found: usize },

    #[error("raw sequence contains disallowed symbol '{0}'")]
    DisallowedSymbol(char),

    #[error("unknown guid: {0}")]
    UnknownGuid(String),

    #[error("sequence is invalid (N-density above threshold), cannot be uncompressed")]
    InvalidSequence,

    #[error("guid {guid} already exists with different content")]
    GuidCollision { guid: String },

    #[error("persisted config differs from requested config in field '{field}'")]
    ConfigDrift { field: String },

    #[error("patched record references unknown consensus {0}")]
    UnknownConsensus(String),

    #[error("durable backend unavailable: {0}")]
    TransientBackend(String),

    #[error("clustering policy '{0}' is not configured")]
    PolicyMiss(String),
}

/// Coarse classification used by the HTTP layer to pick a status code and
/// by callers who only care about the category, not the exact variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InputRejected,
    InvalidSequence,
    StateConflict,
    IntegrityError,
    TransientBackend,
    PolicyMiss,
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::LengthMismatch { .. }
            | CoreError::DisallowedSymbol(_)
            | CoreError::UnknownGuid(_) => ErrorKind::InputRejected,
            CoreError::InvalidSequence => ErrorKind::InvalidSequence,
            CoreError::GuidCollision { .. } | CoreError::ConfigDrift { .. } => {
                ErrorKind::StateConflict
            }
            CoreError::UnknownConsensus(_) => ErrorKind::IntegrityError,
            CoreError::TransientBackend(_) => ErrorKind::TransientBackend,
            CoreError::PolicyMiss(_) => ErrorKind::PolicyMiss,
        }
    }
}
