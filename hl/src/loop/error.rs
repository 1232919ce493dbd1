//! Construction errors

use thiserror::Error;

/// Raised when a loop is built without what it needs
///
/// This is the only error the loops return; runtime failures end up in the
/// result types instead.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Missing required collaborator: {0}")]
    MissingCollaborator(&'static str),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<eyre::Report> for BuildError {
    fn from(e: eyre::Report) -> Self {
        BuildError::InvalidConfig(format!("{:#}", e))
    }
}
