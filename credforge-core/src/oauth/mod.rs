//! OAuth 2.0 acquisition strategies.
//!
//! This module provides:
//! - [`OAuthStrategy`] - Uniform acquire/refresh/exchange contract
//! - [`HostedStrategy`] - Public client with PKCE against fixed SaaS endpoints
//! - [`LegacyStrategy`] - Consumer key/secret client for self-hosted servers
//! - [`select_strategy`] - Pure dispatch from provider configuration
//!
//! Every token request goes through the [`HttpTransport`] collaborator, and
//! every outcome is an [`AuthenticationResult`]; nothing here returns an
//! error for an expected failure.

mod callback;
mod grant;
mod hosted;
mod legacy;

pub use callback::{CallbackError, CallbackListener};
pub use hosted::HostedStrategy;
pub use legacy::LegacyStrategy;

use async_trait::async_trait;
use oauth2::basic::BasicClient;
use oauth2::{AuthUrl, ClientId, ClientSecret, TokenUrl};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::launcher::BrowserLauncher;
use crate::model::{AuthenticationResult, Credential, FailureReason, TokenScope};
use crate::provider::{OAuthVariant, ProviderConfig};
use crate::store::Secret;
use crate::target::TargetUri;
use crate::transport::HttpTransport;

/// Which strategy implementation is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Hosted,
    Legacy,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::Hosted => write!(f, "hosted"),
            StrategyKind::Legacy => write!(f, "legacy"),
        }
    }
}

/// Acquire, renew and exchange OAuth credentials for a target.
#[async_trait]
pub trait OAuthStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Run the interactive authorization-code flow.
    ///
    /// Cancellation at any suspension point yields
    /// [`AuthenticationResult::Cancelled`].
    async fn get_auth(
        &self,
        target: &TargetUri,
        scope: &TokenScope,
        cancel: &CancellationToken,
    ) -> AuthenticationResult;

    /// Renew an access token silently. A rejected refresh token yields
    /// [`AuthenticationResult::InvalidCredentials`].
    async fn refresh_auth(
        &self,
        target: &TargetUri,
        refresh_token: &Secret,
        cancel: &CancellationToken,
    ) -> AuthenticationResult;

    /// Exchange a username and password directly for a token.
    ///
    /// The token endpoint is bound when the strategy is built. When the
    /// provider asked for a second factor, the caller repeats the call with
    /// `second_factor` set.
    async fn authenticate(
        &self,
        target: &TargetUri,
        credential: &Credential,
        scope: &TokenScope,
        second_factor: Option<&str>,
    ) -> AuthenticationResult;
}

/// Pick the strategy for a provider. Makes no network calls.
pub fn select_strategy(
    config: &ProviderConfig,
    transport: Arc<dyn HttpTransport>,
    launcher: Arc<dyn BrowserLauncher>,
) -> Arc<dyn OAuthStrategy> {
    match OAuthVariant::from_config(config) {
        OAuthVariant::Hosted => {
            tracing::debug!("Provider {} uses the hosted OAuth strategy", config.id);
            Arc::new(HostedStrategy::new(config.clone(), transport, launcher))
        }
        OAuthVariant::Legacy {
            consumer_key,
            consumer_secret,
        } => {
            tracing::debug!("Provider {} uses the legacy OAuth strategy", config.id);
            Arc::new(LegacyStrategy::new(
                config.clone(),
                consumer_key,
                consumer_secret,
                transport,
                launcher,
            ))
        }
    }
}

/// Build an oauth2 client, reporting bad endpoints as a configuration failure.
pub(crate) fn build_client(
    client_id: &str,
    client_secret: Option<&Secret>,
    auth_url: &str,
    token_url: &str,
) -> Result<BasicClient, FailureReason> {
    let auth_url = AuthUrl::new(auth_url.to_string())
        .map_err(|e| FailureReason::configuration(format!("invalid authorization URL: {}", e)))?;
    let token_url = TokenUrl::new(token_url.to_string())
        .map_err(|e| FailureReason::configuration(format!("invalid token URL: {}", e)))?;

    Ok(BasicClient::new(
        ClientId::new(client_id.to_string()),
        client_secret.map(|s| ClientSecret::new(s.expose().to_string())),
        auth_url,
        Some(token_url),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launcher::SystemBrowser;
    use crate::transport::ReqwestTransport;

    fn collaborators() -> (Arc<dyn HttpTransport>, Arc<dyn BrowserLauncher>) {
        (Arc::new(ReqwestTransport::default()), Arc::new(SystemBrowser))
    }

    #[test]
    fn test_select_hosted_without_consumer() {
        let (transport, launcher) = collaborators();
        let config = ProviderConfig::new("bitbucket", "Bitbucket").with_consumer(" ", "");

        let strategy = select_strategy(&config, transport, launcher);
        assert_eq!(strategy.kind(), StrategyKind::Hosted);
    }

    #[test]
    fn test_select_legacy_with_consumer() {
        let (transport, launcher) = collaborators();
        let config = ProviderConfig::new("server", "Server").with_consumer("key", "secret");

        let strategy = select_strategy(&config, transport, launcher);
        assert_eq!(strategy.kind(), StrategyKind::Legacy);
    }

    #[test]
    fn test_build_client_rejects_bad_urls() {
        let result = build_client("id", None, "not a url", "https://example.com/token");
        match result {
            Err(reason) => assert!(reason.message.contains("authorization URL")),
            Ok(_) => panic!("expected a configuration failure"),
        }

        assert!(build_client("id", None, "https://example.com/a", "https://example.com/t").is_ok());
    }
}
