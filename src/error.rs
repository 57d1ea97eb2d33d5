//! Error taxonomy for the matching core.

use crate::protocol::ServerMessage;
use thiserror::Error;

/// Failures surfaced to clients through the error envelope.
#[derive(Debug, Error)]
pub enum MatchError {
    /// Missing or out-of-range input; no state was changed.
    #[error("{0}")]
    Validation(String),

    /// The request conflicts with current matching state.
    #[error("{0}")]
    StateConflict(String),

    /// A referenced entity no longer exists.
    #[error("{0}")]
    NotFound(String),

    /// A storage/cache collaborator was unreachable. The operation is not
    /// retried automatically; the client re-issues the request.
    #[error(transparent)]
    Collaborator(#[from] anyhow::Error),
}

impl MatchError {
    pub fn code(&self) -> &'static str {
        match self {
            MatchError::Validation(_) => "validation",
            MatchError::StateConflict(_) => "state_conflict",
            MatchError::NotFound(_) => "not_found",
            MatchError::Collaborator(_) => "collaborator_unavailable",
        }
    }

    pub fn to_envelope(&self) -> ServerMessage {
        ServerMessage::Error {
            code: self.code().to_string(),
            message: self.to_string(),
        }
    }
}
