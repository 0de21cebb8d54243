//! Provider configuration and registry.
//!
//! This module provides:
//! - [`ProviderConfig`] - How credentials are acquired for a family of hosts
//! - [`Acquisition`] - Which acquisition delegate a provider uses
//! - [`OAuthVariant`] - Hosted vs. legacy OAuth, resolved from configuration
//! - [`ProviderRegistry`] - Registry of configured providers, looked up by host
//!
//! The registry comes pre-configured with GitHub, Bitbucket and a generic
//! fallback, and can be extended or overridden from configuration.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::model::TokenScope;
use crate::store::Secret;
use crate::target::KeyNormalizer;

/// Identifier of the provider used when no other matches a host.
pub const GENERIC_PROVIDER: &str = "generic";

/// How new credentials are obtained on a cache miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Acquisition {
    /// Ask the user for a username and secret; store them as given.
    #[default]
    Prompt,

    /// Run the interactive OAuth authorization-code flow.
    Authorize,

    /// Ask for a username and password, then exchange them for a token
    /// (resource-owner grant), with second-factor support.
    Exchange,
}

/// Which OAuth strategy a provider uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OAuthVariant {
    /// Public client against the provider's fixed SaaS endpoints.
    Hosted,

    /// Registered consumer key/secret against a self-hosted server.
    Legacy {
        consumer_key: String,
        consumer_secret: Secret,
    },
}

impl OAuthVariant {
    /// Resolve the variant: a non-blank consumer key AND secret select
    /// [`OAuthVariant::Legacy`], anything else [`OAuthVariant::Hosted`].
    pub fn from_config(config: &ProviderConfig) -> Self {
        let key = config
            .consumer_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty());
        let secret = config
            .consumer_secret
            .as_ref()
            .filter(|s| !s.expose().trim().is_empty());

        match (key, secret) {
            (Some(key), Some(secret)) => Self::Legacy {
                consumer_key: key.to_string(),
                consumer_secret: secret.clone(),
            },
            _ => Self::Hosted,
        }
    }
}

/// Configuration for a credential provider.
///
/// # Example
///
/// ```
/// use credforge_core::provider::{Acquisition, ProviderConfig};
///
/// let server = ProviderConfig::new("bitbucket-server", "Bitbucket Server")
///     .with_hosts(vec!["git.example.com".to_string()])
///     .with_acquisition(Acquisition::Authorize)
///     .with_consumer("consumer-key", "consumer-secret");
/// assert!(server.serves("git.example.com"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderConfig {
    /// Unique identifier for the provider (e.g., "github").
    pub id: String,

    /// Human-readable name (e.g., "GitHub").
    pub name: String,

    /// Hosts this provider serves.
    pub hosts: Vec<String>,

    /// Alias host → canonical host. Aliased hosts share the canonical
    /// host's credential record.
    pub aliases: BTreeMap<String, String>,

    /// Acquisition delegate used on a cache miss.
    pub acquisition: Acquisition,

    /// OAuth client ID for the hosted variant.
    pub client_id: Option<String>,

    /// OAuth authorization endpoint (hosted variant).
    pub auth_url: Option<String>,

    /// OAuth token endpoint (hosted variant).
    pub token_url: Option<String>,

    /// Consumer key registered with a self-hosted server.
    pub consumer_key: Option<String>,

    /// Consumer secret registered with a self-hosted server.
    pub consumer_secret: Option<Secret>,

    /// Authorization path on a self-hosted server (legacy variant).
    pub authorize_path: String,

    /// Token path on a self-hosted server (legacy variant).
    pub token_path: String,

    /// Scopes requested when acquiring tokens.
    pub default_scopes: Vec<String>,

    /// Username paired with OAuth access tokens when the target URI
    /// carries none.
    pub token_username: Option<String>,

    /// Response header signalling that a second factor is required; the
    /// code is sent back in the same header.
    pub second_factor_header: Option<String>,

    /// Loopback port for the authorization redirect; 0 picks a free port.
    pub callback_port: u16,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self::new(GENERIC_PROVIDER, "Generic")
    }
}

impl ProviderConfig {
    /// Create a new provider configuration.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            hosts: Vec::new(),
            aliases: BTreeMap::new(),
            acquisition: Acquisition::Prompt,
            client_id: None,
            auth_url: None,
            token_url: None,
            consumer_key: None,
            consumer_secret: None,
            authorize_path: "/rest/oauth2/latest/authorize".to_string(),
            token_path: "/rest/oauth2/latest/token".to_string(),
            default_scopes: Vec::new(),
            token_username: None,
            second_factor_header: None,
            callback_port: 0,
        }
    }

    /// Set the hosts this provider serves.
    pub fn with_hosts(mut self, hosts: Vec<String>) -> Self {
        self.hosts = hosts;
        self
    }

    /// Add a host alias.
    pub fn with_alias(mut self, alias: impl Into<String>, canonical: impl Into<String>) -> Self {
        self.aliases.insert(alias.into(), canonical.into());
        self
    }

    /// Set the acquisition delegate.
    pub fn with_acquisition(mut self, acquisition: Acquisition) -> Self {
        self.acquisition = acquisition;
        self
    }

    /// Set hosted OAuth endpoints and client ID.
    pub fn with_oauth(
        mut self,
        client_id: impl Into<String>,
        auth_url: impl Into<String>,
        token_url: impl Into<String>,
    ) -> Self {
        self.client_id = Some(client_id.into());
        self.auth_url = Some(auth_url.into());
        self.token_url = Some(token_url.into());
        self
    }

    /// Set the consumer key/secret of a self-hosted server.
    pub fn with_consumer(mut self, key: impl Into<String>, secret: impl Into<String>) -> Self {
        self.consumer_key = Some(key.into());
        self.consumer_secret = Some(Secret::new(secret));
        self
    }

    /// Set the default scopes.
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.default_scopes = scopes;
        self
    }

    /// Set the username paired with OAuth tokens.
    pub fn with_token_username(mut self, username: impl Into<String>) -> Self {
        self.token_username = Some(username.into());
        self
    }

    /// Set the second-factor response header.
    pub fn with_second_factor_header(mut self, header: impl Into<String>) -> Self {
        self.second_factor_header = Some(header.into());
        self
    }

    /// Set the loopback callback port.
    pub fn with_callback_port(mut self, port: u16) -> Self {
        self.callback_port = port;
        self
    }

    /// Whether this provider serves `host`, directly or via an alias.
    pub fn serves(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        self.hosts.iter().any(|h| h.eq_ignore_ascii_case(&host))
            || self.aliases.keys().any(|a| a.eq_ignore_ascii_case(&host))
    }

    /// The OAuth variant this configuration selects.
    pub fn oauth_variant(&self) -> OAuthVariant {
        OAuthVariant::from_config(self)
    }

    /// Default scopes as a [`TokenScope`].
    pub fn scope(&self) -> TokenScope {
        TokenScope::new(self.default_scopes.iter().cloned())
    }

    /// Apply this provider's host aliases to a normalizer.
    pub fn apply_aliases(&self, normalizer: KeyNormalizer) -> KeyNormalizer {
        normalizer.with_aliases(self.aliases.clone())
    }
}

/// Registry of provider configurations.
///
/// # Example
///
/// ```
/// use credforge_core::provider::ProviderRegistry;
///
/// let registry = ProviderRegistry::with_defaults();
/// assert_eq!(registry.for_host("gist.github.com").id, "github");
/// assert_eq!(registry.for_host("example.com").id, "generic");
/// ```
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<String, ProviderConfig>,
    fallback: ProviderConfig,
}

impl ProviderRegistry {
    /// Create a registry with only the generic fallback.
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            fallback: ProviderConfig::default(),
        }
    }

    /// Create a provider registry with default providers pre-registered.
    ///
    /// Default providers include:
    /// - GitHub (prompt; `gist.github.com` shares `github.com` records)
    /// - Bitbucket Cloud (hosted OAuth; needs a configured client ID)
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        registry.register(
            ProviderConfig::new("github", "GitHub")
                .with_hosts(vec!["github.com".to_string()])
                .with_alias("gist.github.com", "github.com")
                .with_scopes(vec!["repo".to_string(), "gist".to_string()]),
        );

        let mut bitbucket = ProviderConfig::new("bitbucket", "Bitbucket")
            .with_hosts(vec!["bitbucket.org".to_string()])
            .with_acquisition(Acquisition::Authorize)
            .with_token_username("x-token-auth");
        bitbucket.auth_url = Some("https://bitbucket.org/site/oauth2/authorize".to_string());
        bitbucket.token_url = Some("https://bitbucket.org/site/oauth2/access_token".to_string());
        registry.register(bitbucket);

        registry
    }

    /// Register a provider configuration.
    ///
    /// Registering [`GENERIC_PROVIDER`] replaces the fallback; any other ID
    /// replaces an existing provider with the same ID.
    pub fn register(&mut self, config: ProviderConfig) {
        if config.id == GENERIC_PROVIDER {
            self.fallback = config;
        } else {
            self.providers.insert(config.id.clone(), config);
        }
    }

    /// Get a provider configuration by ID.
    pub fn get(&self, id: &str) -> Option<&ProviderConfig> {
        if id == GENERIC_PROVIDER {
            return Some(&self.fallback);
        }
        self.providers.get(id)
    }

    /// The provider serving `host`, or the generic fallback.
    pub fn for_host(&self, host: &str) -> &ProviderConfig {
        let mut matches: Vec<&ProviderConfig> =
            self.providers.values().filter(|p| p.serves(host)).collect();
        // Deterministic pick when several providers claim a host.
        matches.sort_by(|a, b| a.id.cmp(&b.id));
        matches.first().copied().unwrap_or(&self.fallback)
    }

    /// Check if a provider is registered.
    pub fn contains(&self, id: &str) -> bool {
        id == GENERIC_PROVIDER || self.providers.contains_key(id)
    }

    /// Get the number of registered providers, excluding the fallback.
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_config_builder() {
        let config = ProviderConfig::new("test", "Test Provider")
            .with_oauth("client", "https://example.com/auth", "https://example.com/token")
            .with_scopes(vec!["read".to_string()])
            .with_acquisition(Acquisition::Authorize);

        assert_eq!(config.id, "test");
        assert_eq!(config.client_id.as_deref(), Some("client"));
        assert_eq!(config.token_url.as_deref(), Some("https://example.com/token"));
        assert_eq!(config.scope(), TokenScope::from("read"));
        assert_eq!(config.acquisition, Acquisition::Authorize);
    }

    #[test]
    fn test_variant_blank_consumer_is_hosted() {
        let blank = ProviderConfig::new("p", "P").with_consumer("", "  ");
        assert_eq!(blank.oauth_variant(), OAuthVariant::Hosted);

        let key_only = ProviderConfig {
            consumer_key: Some("key".to_string()),
            ..ProviderConfig::new("p", "P")
        };
        assert_eq!(key_only.oauth_variant(), OAuthVariant::Hosted);

        assert_eq!(ProviderConfig::new("p", "P").oauth_variant(), OAuthVariant::Hosted);
    }

    #[test]
    fn test_variant_consumer_pair_is_legacy() {
        let config = ProviderConfig::new("p", "P").with_consumer("key", "secret");
        match config.oauth_variant() {
            OAuthVariant::Legacy {
                consumer_key,
                consumer_secret,
            } => {
                assert_eq!(consumer_key, "key");
                assert_eq!(consumer_secret.expose(), "secret");
            }
            other => panic!("expected legacy variant, got {:?}", other),
        }
    }

    #[test]
    fn test_registry_with_defaults() {
        let registry = ProviderRegistry::with_defaults();

        assert!(registry.contains("github"));
        assert!(registry.contains("bitbucket"));
        assert_eq!(registry.for_host("github.com").id, "github");
        assert_eq!(registry.for_host("GIST.github.com").id, "github");
        assert_eq!(registry.for_host("bitbucket.org").id, "bitbucket");
        assert_eq!(registry.for_host("example.com").id, GENERIC_PROVIDER);

        // Prompt acquisition never exchanges, so no second-factor header.
        let github = registry.get("github").unwrap();
        assert_eq!(github.acquisition, Acquisition::Prompt);
        assert!(github.second_factor_header.is_none());
    }

    #[test]
    fn test_registry_replace() {
        let mut registry = ProviderRegistry::new();

        registry.register(ProviderConfig::new("test", "Test 1"));
        registry.register(ProviderConfig::new("test", "Test 2"));

        assert_eq!(registry.get("test").unwrap().name, "Test 2");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_registry_replace_fallback() {
        let mut registry = ProviderRegistry::new();
        registry.register(
            ProviderConfig::new(GENERIC_PROVIDER, "Fallback").with_acquisition(Acquisition::Exchange),
        );

        assert_eq!(registry.for_host("anything.example").acquisition, Acquisition::Exchange);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_provider_config_from_toml_like_json() {
        let config: ProviderConfig = serde_json::from_value(serde_json::json!({
            "id": "corp",
            "name": "Corp Server",
            "hosts": ["git.corp.example"],
            "acquisition": "authorize",
            "consumer_key": "k",
            "consumer_secret": "s"
        }))
        .unwrap();

        assert!(config.serves("git.corp.example"));
        assert_eq!(config.authorize_path, "/rest/oauth2/latest/authorize");
        assert!(matches!(config.oauth_variant(), OAuthVariant::Legacy { .. }));
    }
}
