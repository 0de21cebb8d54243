//! Integration tests for the OAuth strategies.
//!
//! A wiremock server stands in for the provider's token endpoint. These tests
//! verify that the strategies:
//! - Exchange passwords for tokens and honour second-factor challenges
//! - Renew tokens and map rejected refresh tokens to InvalidCredentials
//! - Run the authorization-code flow through the loopback listener
//! - Distinguish transport failures from protocol rejections

use async_trait::async_trait;
use serde_json::json;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use url::Url;
use wiremock::{
    matchers::{body_string_contains, header, header_exists, method, path},
    Mock, MockServer, ResponseTemplate,
};

use credforge_core::{
    context::{ContextOptions, RuntimeContext},
    launcher::{BrowserLauncher, LaunchError},
    oauth::{select_strategy, OAuthStrategy, StrategyKind},
    paths::AppPaths,
    prompt::{PromptError, Prompter},
    provider::{Acquisition, ProviderConfig},
    store::{Secret, SecretStore, StoreBackend},
    transport::{HttpTransport, ReqwestTransport},
    AuthenticationResult, Authenticator, Credential, FailureKind, KeyNormalizer, NamingMode,
    TargetUri, TokenScope,
};

/// Browser double: completes the redirect itself, or does nothing.
#[derive(Default)]
struct FakeBrowser {
    complete: bool,
    opened: Mutex<Option<String>>,
}

impl FakeBrowser {
    fn completing() -> Self {
        Self {
            complete: true,
            ..Self::default()
        }
    }
}

impl BrowserLauncher for FakeBrowser {
    fn open(&self, url: &str) -> Result<(), LaunchError> {
        *self.opened.lock().unwrap() = Some(url.to_string());
        if !self.complete {
            return Ok(());
        }

        let authorize = Url::parse(url).map_err(|e| LaunchError::Rejected(e.to_string()))?;
        let param = |name: &str| {
            authorize
                .query_pairs()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.into_owned())
                .unwrap_or_default()
        };

        let mut callback = Url::parse(&param("redirect_uri")).map_err(|e| LaunchError::Rejected(e.to_string()))?;
        callback
            .query_pairs_mut()
            .append_pair("code", "auth-code")
            .append_pair("state", &param("state"));

        tokio::spawn(async move {
            let _ = reqwest::get(callback.as_str()).await;
        });
        Ok(())
    }
}

struct FixedPrompter {
    code: Option<String>,
}

#[async_trait]
impl Prompter for FixedPrompter {
    async fn prompt_credentials(
        &self,
        _target: &TargetUri,
        _message: &str,
    ) -> Result<Option<Credential>, PromptError> {
        Ok(Some(Credential::new("octocat", "hunter2")))
    }

    async fn prompt_second_factor(
        &self,
        _target: &TargetUri,
        _message: &str,
    ) -> Result<Option<String>, PromptError> {
        Ok(self.code.clone())
    }
}

fn transport() -> Arc<dyn HttpTransport> {
    Arc::new(ReqwestTransport::default())
}

fn hosted_provider(server: &MockServer) -> ProviderConfig {
    ProviderConfig::new("test-provider", "Test Provider")
        .with_oauth(
            "client-123",
            format!("{}/authorize", server.uri()),
            format!("{}/token", server.uri()),
        )
        .with_second_factor_header("X-GitHub-OTP")
}

fn target(uri: &str) -> TargetUri {
    TargetUri::parse(uri).unwrap()
}

fn token_body(access_token: &str, refresh_token: Option<&str>) -> serde_json::Value {
    let mut body = json!({
        "access_token": access_token,
        "token_type": "bearer",
        "expires_in": 3600,
    });
    if let Some(refresh) = refresh_token {
        body["refresh_token"] = json!(refresh);
    }
    body
}

#[tokio::test]
async fn test_password_grant_with_second_factor() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(header("X-GitHub-OTP", "123456"))
        .and(body_string_contains("grant_type=password"))
        .and(body_string_contains("username=octocat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("gho_otp", Some("r-1"))))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(401)
                .insert_header("X-GitHub-OTP", "required; app")
                .set_body_json(json!({ "error": "invalid_request" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let strategy = select_strategy(&hosted_provider(&server), transport(), Arc::new(FakeBrowser::default()));
    let repo = target("https://github.com/octocat/hello");
    let credential = Credential::new("octocat", "hunter2");
    let scope = TokenScope::from("repo");

    let first = strategy.authenticate(&repo, &credential, &scope, None).await;
    assert_eq!(first, AuthenticationResult::TwoFactorRequired);

    match strategy.authenticate(&repo, &credential, &scope, Some("123456")).await {
        AuthenticationResult::Success {
            credential,
            refresh_token,
        } => {
            assert_eq!(credential.username.as_deref(), Some("octocat"));
            assert_eq!(credential.secret.expose(), "gho_otp");
            assert!(credential.expires_at.is_some());
            assert_eq!(refresh_token.unwrap().expose(), "r-1");
        }
        other => panic!("expected success, got {:?}", other),
    }
}

#[tokio::test]
async fn test_password_grant_protocol_rejection() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_scope",
            "error_description": "scope not allowed"
        })))
        .mount(&server)
        .await;

    let strategy = select_strategy(&hosted_provider(&server), transport(), Arc::new(FakeBrowser::default()));
    let result = strategy
        .authenticate(
            &target("https://github.com/o/r"),
            &Credential::new("octocat", "hunter2"),
            &TokenScope::from("admin"),
            None,
        )
        .await;

    match result {
        AuthenticationResult::Failure(reason) => {
            assert_eq!(reason.kind, FailureKind::Protocol);
            assert_eq!(reason.code, "invalid_scope");
            assert_eq!(reason.message, "scope not allowed");
        }
        other => panic!("expected protocol failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_refresh_keeps_previous_refresh_token() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=r-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("renewed", None)))
        .expect(1)
        .mount(&server)
        .await;

    let config = hosted_provider(&server).with_token_username("x-token-auth");
    let strategy = select_strategy(&config, transport(), Arc::new(FakeBrowser::default()));

    let result = strategy
        .refresh_auth(
            &target("https://bitbucket.org/team/repo"),
            &Secret::new("r-1"),
            &CancellationToken::new(),
        )
        .await;

    match result {
        AuthenticationResult::Success {
            credential,
            refresh_token,
        } => {
            assert_eq!(credential.username.as_deref(), Some("x-token-auth"));
            assert_eq!(credential.secret.expose(), "renewed");
            assert_eq!(refresh_token.unwrap().expose(), "r-1");
        }
        other => panic!("expected success, got {:?}", other),
    }
}

#[tokio::test]
async fn test_rejected_refresh_is_invalid_credentials() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({ "error": "invalid_grant" })))
        .mount(&server)
        .await;

    let strategy = select_strategy(&hosted_provider(&server), transport(), Arc::new(FakeBrowser::default()));
    let result = strategy
        .refresh_auth(
            &target("https://bitbucket.org/team/repo"),
            &Secret::new("revoked"),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(result, AuthenticationResult::InvalidCredentials);
}

#[tokio::test]
async fn test_unreachable_token_endpoint_is_transport_failure() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let config = ProviderConfig::new("dead", "Dead").with_oauth(
        "client",
        format!("http://127.0.0.1:{}/authorize", port),
        format!("http://127.0.0.1:{}/token", port),
    );
    let strategy = select_strategy(&config, transport(), Arc::new(FakeBrowser::default()));

    let result = strategy
        .refresh_auth(&target("https://example.com/r"), &Secret::new("r"), &CancellationToken::new())
        .await;

    match result {
        AuthenticationResult::Failure(reason) => {
            assert_eq!(reason.kind, FailureKind::Transport);
            assert!(reason.is_retryable());
        }
        other => panic!("expected transport failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_authorization_code_flow_with_pkce() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=auth-code"))
        .and(body_string_contains("code_verifier="))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("from-code", Some("r-code"))))
        .expect(1)
        .mount(&server)
        .await;

    let browser = Arc::new(FakeBrowser::completing());
    let config = hosted_provider(&server).with_token_username("x-token-auth");
    let strategy = select_strategy(&config, transport(), browser.clone());
    assert_eq!(strategy.kind(), StrategyKind::Hosted);

    let result = strategy
        .get_auth(
            &target("https://bitbucket.org/team/repo"),
            &TokenScope::from("repository"),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(
        result.into_credential().unwrap().secret.expose(),
        "from-code"
    );

    let opened = browser.opened.lock().unwrap().clone().unwrap();
    assert!(opened.starts_with(&format!("{}/authorize", server.uri())));
    assert!(opened.contains("client_id=client-123"));
    assert!(opened.contains("code_challenge_method=S256"));
    assert!(opened.contains("scope=repository"));
}

#[tokio::test]
async fn test_authorization_code_flow_cancelled() {
    let server = MockServer::start().await;
    let strategy = select_strategy(&hosted_provider(&server), transport(), Arc::new(FakeBrowser::default()));
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let result = strategy
        .get_auth(&target("https://bitbucket.org/t/r"), &TokenScope::default(), &cancel)
        .await;

    assert_eq!(result, AuthenticationResult::Cancelled);
}

#[tokio::test]
async fn test_legacy_strategy_uses_server_endpoints() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/rest/oauth2/latest/token"))
        .and(header_exists("authorization"))
        .and(body_string_contains("grant_type=password"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("server-token", None)))
        .expect(1)
        .mount(&server)
        .await;

    let config = ProviderConfig::new("server", "Bitbucket Server").with_consumer("consumer", "shh");
    let strategy = select_strategy(&config, transport(), Arc::new(FakeBrowser::default()));
    assert_eq!(strategy.kind(), StrategyKind::Legacy);

    let repo = target(&format!("{}/scm/proj/repo.git", server.uri()));
    let result = strategy
        .authenticate(&repo, &Credential::new("dev", "pw"), &TokenScope::default(), None)
        .await;

    assert_eq!(result.into_credential().unwrap().secret.expose(), "server-token");
}

#[tokio::test]
async fn test_exchange_provider_end_to_end() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(header("X-GitHub-OTP", "654321"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("e2e-token", None)))
        .with_priority(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(401).insert_header("X-GitHub-OTP", "required; sms"))
        .mount(&server)
        .await;

    let dir = tempfile::TempDir::new().unwrap();
    let ctx = RuntimeContext::new(ContextOptions {
        store_backend: StoreBackend::Memory,
        http_timeout: std::time::Duration::from_secs(5),
        paths: AppPaths::in_dir(dir.path()),
    });
    ctx.set_prompter(Arc::new(FixedPrompter {
        code: Some("654321".to_string()),
    }));

    let provider = hosted_provider(&server).with_acquisition(Acquisition::Exchange);
    let auth = Authenticator::for_provider(
        &ctx,
        &provider,
        KeyNormalizer::new(NamingMode::Default, Some("git")),
    );
    let repo = target("https://github.com/octocat/hello");

    let result = auth.get_credentials(&repo).await.unwrap();
    assert_eq!(result.into_credential().unwrap().secret.expose(), "e2e-token");

    // A second lookup is served from the context's store.
    let cached = auth.cached_credentials(&repo).await.unwrap().unwrap();
    assert_eq!(cached.username.as_deref(), Some("octocat"));
    assert!(ctx.store().exists(&auth.storage_key(&repo).unwrap()).await.unwrap());
}
