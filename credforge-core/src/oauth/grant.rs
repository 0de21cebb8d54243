//! Grant execution shared by every OAuth strategy.
//!
//! A strategy decides which client and endpoints to use; [`Grants`] runs the
//! token requests through the [`HttpTransport`] collaborator and turns their
//! outcome into an [`AuthenticationResult`].

use chrono::Utc;
use oauth2::basic::{BasicClient, BasicErrorResponse, BasicErrorResponseType, BasicTokenResponse};
use oauth2::http::{HeaderName, HeaderValue, StatusCode};
use oauth2::{
    AuthorizationCode, CsrfToken, HttpRequest, HttpResponse, PkceCodeChallenge, RedirectUrl,
    RefreshToken, RequestTokenError, ResourceOwnerPassword, ResourceOwnerUsername, Scope,
    TokenResponse,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::callback::{CallbackError, CallbackListener};
use crate::launcher::BrowserLauncher;
use crate::model::{AuthenticationResult, Credential, FailureKind, FailureReason, TokenScope};
use crate::provider::ProviderConfig;
use crate::store::Secret;
use crate::target::TargetUri;
use crate::transport::{HttpTransport, TransportError};

type TokenRequestError = RequestTokenError<TransportError, BasicErrorResponse>;

/// Which grant a token request belongs to; decides which server errors
/// mean the presented credential is no good.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Grant {
    AuthorizationCode,
    Refresh,
    Password,
}

impl Grant {
    fn rejects_credentials(self, error: &BasicErrorResponseType) -> bool {
        match error {
            BasicErrorResponseType::InvalidGrant => true,
            BasicErrorResponseType::InvalidClient | BasicErrorResponseType::UnauthorizedClient => {
                self == Grant::Refresh
            }
            _ => false,
        }
    }
}

/// Observations about the token endpoint's raw response.
#[derive(Debug, Default)]
struct ResponseFlags {
    second_factor: AtomicBool,
    unauthorized: AtomicBool,
}

/// Runs token grants for one provider.
pub(crate) struct Grants {
    transport: Arc<dyn HttpTransport>,
    launcher: Arc<dyn BrowserLauncher>,
    token_username: Option<String>,
    second_factor_header: Option<String>,
    callback_port: u16,
}

impl Grants {
    pub(crate) fn new(
        config: &ProviderConfig,
        transport: Arc<dyn HttpTransport>,
        launcher: Arc<dyn BrowserLauncher>,
    ) -> Self {
        Self {
            transport,
            launcher,
            token_username: config.token_username.clone(),
            second_factor_header: config.second_factor_header.clone(),
            callback_port: config.callback_port,
        }
    }

    async fn execute(
        &self,
        mut request: HttpRequest,
        flags: &ResponseFlags,
        extra_header: Option<&(HeaderName, HeaderValue)>,
    ) -> Result<HttpResponse, TransportError> {
        if let Some((name, value)) = extra_header {
            request.headers.insert(name.clone(), value.clone());
        }

        let response = self.transport.execute(request).await?;

        if response.status_code == StatusCode::UNAUTHORIZED {
            flags.unauthorized.store(true, Ordering::SeqCst);
        }
        if let Some(header) = &self.second_factor_header {
            let required = response
                .headers
                .get(header.as_str())
                .and_then(|value| value.to_str().ok())
                .map(|value| value.trim_start().to_ascii_lowercase().starts_with("required"))
                .unwrap_or(false);
            if required {
                flags.second_factor.store(true, Ordering::SeqCst);
            }
        }

        Ok(response)
    }

    /// Interactive authorization-code flow through the system browser.
    pub(crate) async fn authorization_code(
        &self,
        client: BasicClient,
        pkce: bool,
        target: &TargetUri,
        scope: &TokenScope,
        cancel: &CancellationToken,
    ) -> AuthenticationResult {
        let listener = match CallbackListener::bind(self.callback_port).await {
            Ok(listener) => listener,
            Err(e) => {
                return AuthenticationResult::Failure(FailureReason::new(
                    FailureKind::Configuration,
                    "callback_unavailable",
                    e.to_string(),
                ));
            }
        };

        let redirect = match RedirectUrl::new(listener.redirect_url()) {
            Ok(redirect) => redirect,
            Err(e) => return AuthenticationResult::Failure(FailureReason::configuration(e.to_string())),
        };
        let client = client.set_redirect_uri(redirect);

        let mut request = client.authorize_url(CsrfToken::new_random);
        for s in scope.iter() {
            request = request.add_scope(Scope::new(s.to_string()));
        }
        let verifier = if pkce {
            let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();
            request = request.set_pkce_challenge(challenge);
            Some(verifier)
        } else {
            None
        };
        let (authorize_url, state) = request.url();

        if let Err(e) = self.launcher.open(authorize_url.as_str()) {
            tracing::warn!("Could not open a browser: {}", e);
            tracing::info!("Open this URL to authorize access to {}: {}", target, authorize_url);
        }

        let code = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("Authorization for {} cancelled while waiting for redirect", target);
                return AuthenticationResult::Cancelled;
            }
            received = listener.accept(state.secret()) => received,
        };

        let code = match code {
            Ok(code) => code,
            Err(CallbackError::Denied { code, .. }) if code == "access_denied" => {
                return AuthenticationResult::Cancelled;
            }
            Err(CallbackError::Denied { code, description }) => {
                let message = description.unwrap_or_else(|| "authorization request rejected".to_string());
                return AuthenticationResult::Failure(FailureReason::protocol(code, message));
            }
            Err(CallbackError::StateMismatch) => {
                return AuthenticationResult::Failure(FailureReason::protocol(
                    "state_mismatch",
                    "authorization redirect carried an unexpected state",
                ));
            }
            Err(CallbackError::Io(e)) => {
                return AuthenticationResult::Failure(FailureReason::transport(e.to_string()));
            }
        };

        let flags = ResponseFlags::default();
        let mut exchange = client.exchange_code(AuthorizationCode::new(code));
        if let Some(verifier) = verifier {
            exchange = exchange.set_pkce_verifier(verifier);
        }

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return AuthenticationResult::Cancelled,
            response = exchange.request_async(|request| self.execute(request, &flags, None)) => response,
        };

        match response {
            Ok(token) => self.success(target, token, None, None),
            Err(e) => classify(e, &flags, Grant::AuthorizationCode),
        }
    }

    /// Silent renewal with a refresh token.
    pub(crate) async fn refresh(
        &self,
        client: BasicClient,
        target: &TargetUri,
        refresh_token: &Secret,
        cancel: &CancellationToken,
    ) -> AuthenticationResult {
        let flags = ResponseFlags::default();
        let token = RefreshToken::new(refresh_token.expose().to_string());
        let request = client.exchange_refresh_token(&token);

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return AuthenticationResult::Cancelled,
            response = request.request_async(|request| self.execute(request, &flags, None)) => response,
        };

        match response {
            Ok(token) => self.success(target, token, None, Some(refresh_token)),
            Err(e) => classify(e, &flags, Grant::Refresh),
        }
    }

    /// Resource-owner password grant, optionally carrying a second factor.
    pub(crate) async fn password(
        &self,
        client: BasicClient,
        target: &TargetUri,
        credential: &Credential,
        scope: &TokenScope,
        second_factor: Option<&str>,
    ) -> AuthenticationResult {
        let Some(username) = credential
            .username
            .clone()
            .or_else(|| target.username().map(str::to_string))
        else {
            return AuthenticationResult::InvalidCredentials;
        };

        let otp = match (second_factor, self.second_factor_header.as_deref()) {
            (Some(code), Some(header)) => {
                match (
                    HeaderName::from_bytes(header.as_bytes()),
                    HeaderValue::from_str(code.trim()),
                ) {
                    (Ok(name), Ok(value)) => Some((name, value)),
                    _ => {
                        return AuthenticationResult::Failure(FailureReason::new(
                            FailureKind::Prompt,
                            "invalid_second_factor",
                            "second-factor code contains invalid characters",
                        ));
                    }
                }
            }
            (Some(_), None) => {
                tracing::warn!("Second-factor code supplied but provider defines no header for it");
                None
            }
            (None, _) => None,
        };

        let flags = ResponseFlags::default();
        let owner = ResourceOwnerUsername::new(username.clone());
        let password = ResourceOwnerPassword::new(credential.secret.expose().to_string());
        let mut request = client.exchange_password(&owner, &password);
        for s in scope.iter() {
            request = request.add_scope(Scope::new(s.to_string()));
        }

        match request
            .request_async(|request| self.execute(request, &flags, otp.as_ref()))
            .await
        {
            Ok(token) => self.success(target, token, Some(username), None),
            Err(e) => classify(e, &flags, Grant::Password),
        }
    }

    fn success(
        &self,
        target: &TargetUri,
        token: BasicTokenResponse,
        username: Option<String>,
        previous_refresh: Option<&Secret>,
    ) -> AuthenticationResult {
        let username = username
            .or_else(|| target.username().map(str::to_string))
            .or_else(|| self.token_username.clone());

        let mut credential = Credential {
            username,
            secret: Secret::new(token.access_token().secret().as_str()),
            expires_at: None,
        };
        if let Some(expires_in) = token.expires_in() {
            match chrono::Duration::from_std(expires_in) {
                Ok(lifetime) => credential = credential.with_expiry(Utc::now() + lifetime),
                Err(e) => tracing::warn!("Ignoring out-of-range token lifetime: {}", e),
            }
        }

        let refresh_token = token
            .refresh_token()
            .map(|t| Secret::new(t.secret().as_str()))
            .or_else(|| previous_refresh.cloned());

        tracing::info!("Obtained access token for {}", target);
        AuthenticationResult::Success {
            credential,
            refresh_token,
        }
    }
}

fn classify(error: TokenRequestError, flags: &ResponseFlags, grant: Grant) -> AuthenticationResult {
    if flags.second_factor.load(Ordering::SeqCst) {
        return AuthenticationResult::TwoFactorRequired;
    }
    let unauthorized = flags.unauthorized.load(Ordering::SeqCst);

    match error {
        RequestTokenError::Request(e) => {
            tracing::debug!("Token request failed in transport: {}", e);
            AuthenticationResult::Failure(FailureReason::transport(e.to_string()))
        }
        RequestTokenError::ServerResponse(response) => {
            let kind = response.error();
            if grant.rejects_credentials(kind) {
                return AuthenticationResult::InvalidCredentials;
            }
            let message = response
                .error_description()
                .cloned()
                .unwrap_or_else(|| format!("token request rejected: {}", kind));
            AuthenticationResult::Failure(FailureReason::protocol(kind.to_string(), message))
        }
        RequestTokenError::Parse(_, _) | RequestTokenError::Other(_) if unauthorized => {
            AuthenticationResult::InvalidCredentials
        }
        RequestTokenError::Parse(e, _) => {
            AuthenticationResult::Failure(FailureReason::protocol("invalid_response", e.to_string()))
        }
        RequestTokenError::Other(message) => {
            AuthenticationResult::Failure(FailureReason::protocol("unexpected_response", message))
        }
    }
}
