//! OAuth against self-hosted servers.

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

/// Confidential client for self-hosted servers.
///
/// Authenticates with the registered consumer key/secret. Endpoints are
/// resolved against the target's server root, so one provider entry covers
/// any host it is configured for.
pub struct LegacyStrategy {
    config: ProviderConfig,
    consumer_key: String,
    consumer_secret: Secret,
    grants: Grants,
}

impl LegacyStrategy {
    pub fn new(
        config: ProviderConfig,
        consumer_key: String,
        consumer_secret: Secret,
        transport: Arc<dyn HttpTransport>,
        launcher: Arc<dyn BrowserLauncher>,
    ) -> Self {
        let grants = Grants::new(&config, transport, launcher);
        Self {
            config,
            consumer_key,
            consumer_secret,
            grants,
        }
    }

    /// Authorization and token endpoints on the target's server.
    pub fn endpoints(&self, target: &TargetUri) -> Result<(String, String), FailureReason> {
        let root = target.server_root();
        let resolve = |path: &str| {
            root.join(path).map(|url| url.to_string()).map_err(|e| {
                FailureReason::configuration(format!("invalid endpoint path '{}': {}", path, e))
            })
        };
        Ok((
            resolve(&self.config.authorize_path)?,
            resolve(&self.config.token_path)?,
        ))
    }

    fn client(&self, target: &TargetUri) -> Result<BasicClient, FailureReason> {
        let (auth_url, token_url) = self.endpoints(target)?;
        build_client(
            &self.consumer_key,
            Some(&self.consumer_secret),
            &auth_url,
            &token_url,
        )
    }
}

#[async_trait]
impl OAuthStrategy for LegacyStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Legacy
    }

    async fn get_auth(
        &self,
        target: &TargetUri,
        scope: &TokenScope,
        cancel: &CancellationToken,
    ) -> AuthenticationResult {
        match self.client(target) {
            Ok(client) => {
                self.grants
                    .authorization_code(client, false, target, scope, cancel)
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
        match self.client(target) {
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
        match self.client(target) {
            Ok(client) => {
                self.grants
                    .password(client, target, credential, scope, second_factor)
                    .await
            }
            Err(reason) => AuthenticationResult::Failure(reason),
        }
    }
}
