//! Collaborator error type

use thiserror::Error;

use crate::llm::LlmError;

/// Errors returned by external collaborators
///
/// None of these escape the loops; each one becomes a recorded failure.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("Collaborator failed: {0}")]
    Failed(String),

    #[error("No fix found: {0}")]
    NoFix(String),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),
}

impl CollaboratorError {
    pub fn failed(msg: impl Into<String>) -> Self {
        CollaboratorError::Failed(msg.into())
    }

    /// True for the repair requester's "nothing to suggest" signal
    pub fn is_no_fix(&self) -> bool {
        matches!(self, CollaboratorError::NoFix(_))
    }
}
