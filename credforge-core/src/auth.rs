//! Authentication orchestration.
//!
//! [`Authenticator`] resolves credentials for a target: it consults the
//! store under the normalized key, renews expired tokens through the bound
//! OAuth strategy, and on a miss runs the acquisition delegate, persisting
//! the result before returning it.
//!
//! ```text
//! CacheLookup ─┬─ valid hit ───────────────────────────────► Return
//!              ├─ expired ── Refresh ─┬─ Success ─► Persist ► Return
//!              │                      └─ otherwise ─┐
//!              └─ miss ─────────────────────────────┴─► Acquire
//! Acquire ─┬─ Success ───────────► Persist ► Return
//!          ├─ TwoFactorRequired ─► second factor ► Acquire once more
//!          └─ Cancelled / InvalidCredentials / Failure ─► Report
//! ```

use chrono::Duration;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::context::RuntimeContext;
use crate::model::{
    AuthenticationResult, Credential, FailureKind, FailureReason, StoredRecord, TokenScope,
};
use crate::oauth::{select_strategy, OAuthStrategy};
use crate::prompt::Prompter;
use crate::provider::{Acquisition, ProviderConfig};
use crate::store::{CredentialStore, Secret, StoreError};
use crate::target::{KeyNormalizer, NormalizeError, TargetUri};

/// Default window before expiry in which a credential is renewed.
pub const DEFAULT_EXPIRY_BUFFER_MINUTES: i64 = 5;

/// Contract violations and failed explicit store writes.
///
/// Expected authentication outcomes are [`AuthenticationResult`] variants,
/// never errors.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    InvalidArgument(#[from] NormalizeError),

    #[error("credential store error: {0}")]
    Store(#[from] StoreError),
}

/// How new credentials are obtained on a cache miss.
#[derive(Clone)]
pub enum Acquirer {
    /// Ask for a username and secret and store them as given.
    Prompt { prompter: Arc<dyn Prompter> },

    /// Run the strategy's interactive authorization-code flow.
    Authorize { strategy: Arc<dyn OAuthStrategy> },

    /// Ask for a username and password, then exchange them for a token.
    Exchange {
        prompter: Arc<dyn Prompter>,
        strategy: Arc<dyn OAuthStrategy>,
    },
}

impl Acquirer {
    /// The strategy used for refresh, if this delegate has one.
    pub fn strategy(&self) -> Option<&Arc<dyn OAuthStrategy>> {
        match self {
            Acquirer::Prompt { .. } => None,
            Acquirer::Authorize { strategy } | Acquirer::Exchange { strategy, .. } => Some(strategy),
        }
    }
}

impl std::fmt::Debug for Acquirer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Acquirer::Prompt { .. } => write!(f, "Acquirer::Prompt"),
            Acquirer::Authorize { strategy } => write!(f, "Acquirer::Authorize({})", strategy.kind()),
            Acquirer::Exchange { strategy, .. } => {
                write!(f, "Acquirer::Exchange({})", strategy.kind())
            }
        }
    }
}

/// Outcome of the cache stage.
enum Lookup {
    Hit {
        credential: Credential,
        refresh_token: Option<Secret>,
    },
    Miss,
    Cancelled,
}

/// Resolves, acquires and persists credentials for targets.
pub struct Authenticator {
    normalizer: KeyNormalizer,
    store: CredentialStore,
    acquirer: Acquirer,
    scope: TokenScope,
    cancel: CancellationToken,
    expiry_buffer: Duration,
}

impl Authenticator {
    pub fn new(normalizer: KeyNormalizer, store: CredentialStore, acquirer: Acquirer) -> Self {
        Self {
            normalizer,
            store,
            acquirer,
            scope: TokenScope::default(),
            cancel: CancellationToken::new(),
            expiry_buffer: Duration::minutes(DEFAULT_EXPIRY_BUFFER_MINUTES),
        }
    }

    /// Build an authenticator for `provider` from the context's collaborators.
    ///
    /// The provider's host aliases are added to `normalizer` and its default
    /// scopes become the requested scope.
    pub fn for_provider(
        ctx: &RuntimeContext,
        provider: &ProviderConfig,
        normalizer: KeyNormalizer,
    ) -> Self {
        let acquirer = match provider.acquisition {
            Acquisition::Prompt => Acquirer::Prompt {
                prompter: ctx.prompter(),
            },
            Acquisition::Authorize => Acquirer::Authorize {
                strategy: select_strategy(provider, ctx.transport(), ctx.launcher()),
            },
            Acquisition::Exchange => Acquirer::Exchange {
                prompter: ctx.prompter(),
                strategy: select_strategy(provider, ctx.transport(), ctx.launcher()),
            },
        };

        tracing::debug!("Using provider {} with {:?}", provider.id, acquirer);

        Self::new(
            provider.apply_aliases(normalizer),
            CredentialStore::new(ctx.store()),
            acquirer,
        )
        .with_scope(provider.scope())
    }

    /// Set the scope requested for tokens and required of cached records.
    pub fn with_scope(mut self, scope: TokenScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Treat credentials expiring within `buffer` as already expired.
    pub fn with_expiry_buffer(mut self, buffer: Duration) -> Self {
        self.expiry_buffer = buffer;
        self
    }

    pub fn scope(&self) -> &TokenScope {
        &self.scope
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// The storage key for `target`.
    pub fn storage_key(&self, target: &TargetUri) -> Result<String, AuthError> {
        Ok(self.normalizer.storage_key(target)?)
    }

    /// Resolve credentials for `target`, acquiring them on a miss.
    pub async fn get_credentials(
        &self,
        target: &TargetUri,
    ) -> Result<AuthenticationResult, AuthError> {
        let key = self.storage_key(target)?;

        match self.lookup(target, &key).await {
            Lookup::Hit {
                credential,
                refresh_token,
            } => {
                return Ok(AuthenticationResult::Success {
                    credential,
                    refresh_token,
                })
            }
            Lookup::Cancelled => return Ok(AuthenticationResult::Cancelled),
            Lookup::Miss => {}
        }

        tracing::info!("Acquiring credentials for {}", target);
        let result = match self.acquire(target).await {
            AuthenticationResult::TwoFactorRequired => AuthenticationResult::Failure(
                FailureReason::protocol("second_factor_rejected", "second factor was not accepted"),
            ),
            AuthenticationResult::InvalidCredentials => AuthenticationResult::Failure(
                FailureReason::protocol("invalid_credentials", "credentials were rejected"),
            ),
            other => other,
        };

        if let AuthenticationResult::Success {
            credential,
            refresh_token,
        } = &result
        {
            self.persist(&key, credential.clone(), refresh_token.clone(), self.scope.clone())
                .await;
        }

        Ok(result)
    }

    /// Resolve credentials from the store only, renewing them if expired.
    /// Never prompts or starts an interactive flow.
    pub async fn cached_credentials(
        &self,
        target: &TargetUri,
    ) -> Result<Option<Credential>, AuthError> {
        let key = self.storage_key(target)?;
        Ok(match self.lookup(target, &key).await {
            Lookup::Hit { credential, .. } => Some(credential),
            Lookup::Miss | Lookup::Cancelled => None,
        })
    }

    /// Store `credential` for `target`, replacing any existing record.
    ///
    /// Storing the credential a record already holds leaves the record alone,
    /// so its expiry and refresh token survive git echoing back what `get`
    /// returned.
    pub async fn set_credentials(
        &self,
        target: &TargetUri,
        credential: Credential,
    ) -> Result<(), AuthError> {
        let key = self.storage_key(target)?;
        if let Some(existing) = self.store.get(&key).await {
            if holds_same(&existing.credential, &credential) {
                tracing::debug!("Credentials under {} unchanged", key);
                return Ok(());
            }
        }

        let record = StoredRecord::new(key.as_str(), credential).with_scope(self.scope.clone());
        self.store.set(&record).await?;
        tracing::debug!("Stored credentials under {}", key);
        Ok(())
    }

    /// Delete the record for `target`. Returns `false` when none existed.
    pub async fn delete_credentials(&self, target: &TargetUri) -> Result<bool, AuthError> {
        let key = self.storage_key(target)?;
        let removed = self.store.delete(&key).await?;
        tracing::debug!("Delete {}: {}", key, if removed { "removed" } else { "not found" });
        Ok(removed)
    }

    async fn lookup(&self, target: &TargetUri, key: &str) -> Lookup {
        let Some(record) = self.store.get(key).await else {
            tracing::debug!("Cache miss for {}", key);
            return Lookup::Miss;
        };

        if !record.satisfies(&self.scope) {
            tracing::debug!("Cached record for {} does not cover scope '{}'", key, self.scope);
            return Lookup::Miss;
        }

        if !record.credential.expires_within(self.expiry_buffer) {
            tracing::debug!("Cache hit for {}", key);
            return Lookup::Hit {
                credential: record.credential,
                refresh_token: record.refresh_token,
            };
        }

        let (Some(refresh_token), Some(strategy)) =
            (record.refresh_token.as_ref(), self.acquirer.strategy())
        else {
            tracing::debug!("Cached record for {} expired and cannot be renewed", key);
            return Lookup::Miss;
        };

        tracing::info!("Refreshing expired credentials for {}", target);
        match strategy.refresh_auth(target, refresh_token, &self.cancel).await {
            AuthenticationResult::Success {
                mut credential,
                refresh_token,
            } => {
                if credential.username.is_none() {
                    credential.username = record.credential.username.clone();
                }
                let scope = record.scope.clone().unwrap_or_default();
                self.persist(key, credential.clone(), refresh_token.clone(), scope)
                    .await;
                Lookup::Hit {
                    credential,
                    refresh_token,
                }
            }
            AuthenticationResult::Cancelled => Lookup::Cancelled,
            AuthenticationResult::Failure(reason) => {
                tracing::warn!("Refresh for {} failed, acquiring anew: {}", target, reason);
                Lookup::Miss
            }
            other => {
                tracing::debug!("Refresh for {} ended with {:?}, acquiring anew", target, other);
                Lookup::Miss
            }
        }
    }

    async fn acquire(&self, target: &TargetUri) -> AuthenticationResult {
        match &self.acquirer {
            Acquirer::Prompt { prompter } => {
                match self.prompt_credentials(prompter.as_ref(), target).await {
                    Ok(Some(credential)) => AuthenticationResult::success(credential),
                    Ok(None) => AuthenticationResult::Cancelled,
                    Err(reason) => AuthenticationResult::Failure(reason),
                }
            }
            Acquirer::Authorize { strategy } => {
                match strategy.get_auth(target, &self.scope, &self.cancel).await {
                    AuthenticationResult::TwoFactorRequired => {
                        tracing::info!("Second factor required for {}, retrying once", target);
                        strategy.get_auth(target, &self.scope, &self.cancel).await
                    }
                    other => other,
                }
            }
            Acquirer::Exchange { prompter, strategy } => {
                let credential = match self.prompt_credentials(prompter.as_ref(), target).await {
                    Ok(Some(credential)) => credential,
                    Ok(None) => return AuthenticationResult::Cancelled,
                    Err(reason) => return AuthenticationResult::Failure(reason),
                };

                match self.exchange(strategy.as_ref(), target, &credential, None).await {
                    AuthenticationResult::TwoFactorRequired => {
                        tracing::info!("Second factor required for {}", target);
                        let code = match self.prompt_second_factor(prompter.as_ref(), target).await
                        {
                            Ok(Some(code)) => code,
                            Ok(None) => return AuthenticationResult::Cancelled,
                            Err(reason) => return AuthenticationResult::Failure(reason),
                        };
                        self.exchange(strategy.as_ref(), target, &credential, Some(&code))
                            .await
                    }
                    other => other,
                }
            }
        }
    }

    async fn exchange(
        &self,
        strategy: &dyn OAuthStrategy,
        target: &TargetUri,
        credential: &Credential,
        second_factor: Option<&str>,
    ) -> AuthenticationResult {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => AuthenticationResult::Cancelled,
            result = strategy.authenticate(target, credential, &self.scope, second_factor) => result,
        }
    }

    async fn prompt_credentials(
        &self,
        prompter: &dyn Prompter,
        target: &TargetUri,
    ) -> Result<Option<Credential>, FailureReason> {
        let message = format!("Enter credentials for {}", target);
        let answer = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Ok(None),
            answer = prompter.prompt_credentials(target, &message) => answer,
        };

        let credential = answer.map_err(prompt_failure)?;
        Ok(credential.map(|mut credential| {
            if credential.username.is_none() {
                credential.username = target.username().map(str::to_string);
            }
            credential
        }))
    }

    async fn prompt_second_factor(
        &self,
        prompter: &dyn Prompter,
        target: &TargetUri,
    ) -> Result<Option<String>, FailureReason> {
        let message = format!("Enter the authentication code for {}", target);
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Ok(None),
            answer = prompter.prompt_second_factor(target, &message) => {
                answer.map_err(prompt_failure)
            }
        }
    }

    /// Write an acquired or renewed credential. A failed write is logged; the
    /// credential is still returned to the caller.
    async fn persist(
        &self,
        key: &str,
        credential: Credential,
        refresh_token: Option<Secret>,
        scope: TokenScope,
    ) {
        let record = StoredRecord::new(key, credential)
            .with_scope(scope)
            .with_refresh_token(refresh_token);
        match self.store.set(&record).await {
            Ok(()) => tracing::debug!("Persisted credentials under {}", key),
            Err(e) => tracing::warn!("Could not persist credentials under {}: {}", key, e),
        }
    }
}

/// Same secret, and the incoming user name and expiry (when given) match.
fn holds_same(stored: &Credential, incoming: &Credential) -> bool {
    stored.secret == incoming.secret
        && incoming
            .username
            .as_ref()
            .map_or(true, |name| stored.username.as_ref() == Some(name))
        && incoming
            .expires_at
            .map_or(true, |at| stored.expires_at == Some(at))
}

fn prompt_failure(error: crate::prompt::PromptError) -> FailureReason {
    FailureReason::new(FailureKind::Prompt, "prompt_failed", error.to_string())
}
