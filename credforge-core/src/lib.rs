//! # Credforge Core
//!
//! Credential resolution engine for source-control tooling.
//!
//! This crate provides:
//! - Storage-key normalization for repository endpoints
//! - A secure credential store with keyring, encrypted-file and in-memory backends
//! - OAuth strategies (hosted PKCE and self-hosted consumer-key) over a pluggable transport
//! - The [`Authenticator`] that ties cache lookup, refresh, acquisition and persistence together
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use credforge_core::context::RuntimeContext;
//! use credforge_core::provider::ProviderRegistry;
//! use credforge_core::target::{KeyNormalizer, NamingMode, TargetUri};
//! use credforge_core::{AuthenticationResult, Authenticator};
//!
//! # async fn example() -> Result<(), credforge_core::CredforgeError> {
//! let ctx = RuntimeContext::default();
//! let target = TargetUri::parse("https://github.com/owner/repo")?;
//! let provider = ProviderRegistry::with_defaults().for_host(target.host()).clone();
//! let normalizer = KeyNormalizer::new(NamingMode::from_env(), Some("git"));
//!
//! let auth = Authenticator::for_provider(&ctx, &provider, normalizer);
//! if let AuthenticationResult::Success { credential, .. } = auth.get_credentials(&target).await? {
//!     println!("username: {:?}", credential.username);
//! }
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod context;
pub mod error;
pub mod launcher;
pub mod model;
pub mod oauth;
pub mod paths;
pub mod prompt;
pub mod provider;
pub mod store;
pub mod target;
pub mod transport;

// Re-export commonly used types at crate root
pub use model::{
    AuthenticationResult,
    Credential,
    FailureKind,
    FailureReason,
    StoredRecord,
    TokenScope,
};

pub use target::{
    normalize,
    KeyNormalizer,
    NamingMode,
    NormalizeError,
    TargetUri,
};

pub use store::{
    create_store,
    CredentialStore,
    MemoryStore,
    Secret,
    SecretStore,
    StoreBackend,
    StoreError,
};

#[cfg(feature = "keyring-store")]
pub use store::KeyringStore;

#[cfg(feature = "file-store")]
pub use store::EncryptedFileStore;

pub use auth::{Acquirer, AuthError, Authenticator};
pub use context::{ContextOptions, RuntimeContext, ServiceRegistry};
pub use error::CredforgeError;
pub use oauth::{select_strategy, OAuthStrategy, StrategyKind};
pub use provider::{Acquisition, OAuthVariant, ProviderConfig, ProviderRegistry};
