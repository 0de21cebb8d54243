//! OAuth against a hosted service with fixed endpoints.
//!
//! The client is public: no secret is sent, and the authorization-code leg
//! is protected with PKCE (S256). Endpoints and client ID come from the
//! provider configuration; a gap there is reported as a configuration
//! failure when a flow starts.

use async_trait::async_trait;
use oauth2::basic::BasicClient;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::grant::Grants;
use super::{build_client, OAuthStrategy, StrategyKind};
use crate::launcher::BrowserLauncher;
use crate::model::{AuthenticationResult, Credential, FailureReason, TokenScope};
use crate::provider::ProviderConfig;
use crate::store::Secret;
use crate::target::TargetUri;
use crate::transport::HttpTransport;

/// Public OAuth client against a provider's fixed endpoints.
///
/// Uses PKCE (S256) for the authorization-code flow. The client ID and
/// endpoints come from [`ProviderConfig`]; when any is missing, every
/// operation reports a configuration failure.
pub struct HostedStrategy {
    config: ProviderConfig,
    grants: Grants,
}

impl HostedStrategy {
    pub fn new(
        config: ProviderConfig,
        transport: Arc<dyn HttpTransport>,
        launcher: Arc<dyn BrowserLauncher>,
    ) -> Self {
        let grants = Grants::new(&config, transport, launcher);
        Self { config, grants }
    }

    fn client(&self) -> Result<BasicClient, FailureReason> {
        let missing = |field: &str| {
            FailureReason::configuration(format!(
                "provider '{}' has no {} configured",
                self.config.id, field
            ))
        };

        let client_id = self
            .config
            .client_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| missing("client_id"))?;
        let auth_url = self.config.auth_url.as_deref().ok_or_else(|| missing("auth_url"))?;
        let token_url = self
            .config
            .token_url
            .as_deref()
            .ok_or_else(|| missing("token_url"))?;

        build_client(client_id, None, auth_url, token_url)
    }
}

#[async_trait]
impl OAuthStrategy for HostedStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Hosted
    }

    async fn get_auth(
        &self,
        target: &TargetUri,
        scope: &TokenScope,
        cancel: &CancellationToken,
    ) -> AuthenticationResult {
        match self.client() {
            Ok(client) => {
                self.grants
                    .authorization_code(client, true, target, scope, cancel)
                    .await
            }
            Err(reason) => AuthenticationResult::Failure(reason),
        }
    }

    async fn refresh_auth(
        &self,
        target: &TargetUri,
        refresh_token: &Secret,
        cancel: &CancellationToken,
    ) -> AuthenticationResult {
        match self.client() {
            Ok(client) => self.grants.refresh(client, target, refresh_token, cancel).await,
            Err(reason) => AuthenticationResult::Failure(reason),
        }
    }

    async fn authenticate(
        &self,
        target: &TargetUri,
        credential: &Credential,
        scope: &TokenScope,
        second_factor: Option<&str>,
    ) -> AuthenticationResult {
        match self.client() {
            Ok(client) => {
                self.grants
                    .password(client, target, credential, scope, second_factor)
                    .await
            }
            Err(reason) => AuthenticationResult::Failure(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launcher::SystemBrowser;
    use crate::model::FailureKind;
    use crate::transport::ReqwestTransport;

    #[tokio::test]
    async fn test_missing_client_id_is_configuration_failure() {
        let config = ProviderConfig::new("bitbucket", "Bitbucket");
        let strategy = HostedStrategy::new(
            config,
            Arc::new(ReqwestTransport::default()),
            Arc::new(SystemBrowser),
        );
        let target = TargetUri::parse("https://bitbucket.org/team/repo").unwrap();

        let result = strategy
            .get_auth(&target, &TokenScope::default(), &CancellationToken::new())
            .await;

        match result {
            AuthenticationResult::Failure(reason) => {
                assert_eq!(reason.kind, FailureKind::Configuration);
                assert!(reason.message.contains("client_id"));
            }
            other => panic!("expected configuration failure, got {:?}", other),
        }
    }
}
