//! Top-level error type for credforge.

use thiserror::Error;

use crate::auth::AuthError;
use crate::launcher::LaunchError;
use crate::prompt::PromptError;
use crate::store::StoreError;
use crate::target::NormalizeError;
use crate::transport::TransportError;

/// Any error the core can report.
#[derive(Debug, Error)]
pub enum CredforgeError {
    #[error("invalid argument: {0}")]
    Normalize(#[from] NormalizeError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("prompt error: {0}")]
    Prompt(#[from] PromptError),

    #[error("launch error: {0}")]
    Launch(#[from] LaunchError),

    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl CredforgeError {
    /// Whether the caller may retry the operation that produced this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CredforgeError::Transport(_))
    }
}
