//! Prompt collaborator.
//!
//! The UI layer implements [`Prompter`]; the core only awaits its answers.
//! A `None` answer means the user cancelled.

use async_trait::async_trait;
use thiserror::Error;

use crate::model::Credential;
use crate::target::TargetUri;

/// The prompt could not be shown or read.
#[derive(Debug, Error)]
pub enum PromptError {
    #[error("no interactive terminal available")]
    NoTerminal,

    #[error("prompt failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Asks the user for credentials.
#[async_trait]
pub trait Prompter: Send + Sync {
    /// Ask for a username and secret for `target`.
    async fn prompt_credentials(
        &self,
        target: &TargetUri,
        message: &str,
    ) -> Result<Option<Credential>, PromptError>;

    /// Ask for a one-time second-factor code for `target`.
    async fn prompt_second_factor(
        &self,
        target: &TargetUri,
        message: &str,
    ) -> Result<Option<String>, PromptError>;
}

/// Prompter for unattended runs: every prompt is cancelled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NonInteractive;

#[async_trait]
impl Prompter for NonInteractive {
    async fn prompt_credentials(
        &self,
        target: &TargetUri,
        _message: &str,
    ) -> Result<Option<Credential>, PromptError> {
        tracing::debug!("Prompting disabled, not asking for {} credentials", target);
        Ok(None)
    }

    async fn prompt_second_factor(
        &self,
        target: &TargetUri,
        _message: &str,
    ) -> Result<Option<String>, PromptError> {
        tracing::debug!("Prompting disabled, not asking for {} second factor", target);
        Ok(None)
    }
}
