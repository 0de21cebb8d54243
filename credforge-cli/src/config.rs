//! Helper configuration handling.

use anyhow::{Context, Result};
use credforge_core::paths::AppPaths;
use credforge_core::provider::{ProviderConfig, ProviderRegistry};
use credforge_core::store::StoreBackend;
use credforge_core::target::NamingMode;
use credforge_core::TokenScope;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Namespace prefixed to storage keys in default naming mode.
    pub namespace: String,

    /// Storage key shape.
    pub naming_mode: NamingMode,

    /// Secret store backend.
    pub store: StoreBackend,

    /// Logging level used when `RUST_LOG` is unset.
    pub log_level: String,

    /// HTTP request timeout in seconds.
    pub http_timeout_secs: u64,

    /// How many times a transport failure is retried.
    pub transport_retries: u32,

    /// Scopes requested in addition to each provider's defaults.
    pub scopes: Vec<String>,

    /// Provider definitions; an entry replaces the built-in one with the same id.
    pub providers: Vec<ProviderConfig>,

    /// Path to the configuration file that was loaded.
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            namespace: "git".to_string(),
            naming_mode: NamingMode::Default,
            store: StoreBackend::Keyring,
            log_level: "warn".to_string(),
            http_timeout_secs: 30,
            transport_retries: 2,
            scopes: Vec::new(),
            providers: Vec::new(),
            config_path: None,
        }
    }
}

impl CliConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn scope(&self) -> TokenScope {
        TokenScope::new(self.scopes.iter().cloned())
    }

    /// Built-in providers with configured ones merged over them.
    pub fn registry(&self) -> ProviderRegistry {
        let mut registry = ProviderRegistry::with_defaults();
        for provider in &self.providers {
            tracing::debug!(
                "Configured provider {} ({:?} OAuth)",
                provider.id,
                provider.oauth_variant()
            );
            registry.register(provider.clone());
        }
        registry
    }
}

/// Load configuration from `explicit`, or from the default location.
///
/// A missing default file yields defaults; a missing explicit file is an error.
pub fn load_config(explicit: Option<&Path>, paths: &AppPaths) -> Result<CliConfig> {
    let (config_path, required) = match explicit {
        Some(path) => (path.to_path_buf(), true),
        None => (paths.config_file(), false),
    };

    if !config_path.exists() {
        if required {
            anyhow::bail!("Config file {:?} does not exist", config_path);
        }
        return Ok(CliConfig::default());
    }

    let contents = std::fs::read_to_string(&config_path)
        .with_context(|| format!("Failed to read config from {:?}", config_path))?;
    let mut config: CliConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config from {:?}", config_path))?;

    config.config_path = Some(config_path);
    Ok(config)
}
