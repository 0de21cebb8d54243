//! Target identity normalization.
//!
//! This module turns a remote repository endpoint into the storage key used
//! to address its credential record:
//! - [`TargetUri`] - A parsed, validated remote endpoint
//! - [`NamingMode`] - Which key shape to produce
//! - [`KeyNormalizer`] - Builds storage keys, applying provider host aliases
//! - [`normalize`] - One-shot helper over raw strings
//!
//! # Key Shapes
//!
//! - Default mode: `{namespace}:{absolute_uri}`
//! - Mercurial mode: `{user}@@{base_url}@Mercurial`, or `@{base_url}@Mercurial`
//!   when the URI carries no user-info
//!
//! Trailing path separators are stripped in both modes. Every function here
//! is pure: the same inputs always produce the same key.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use url::Url;

/// Suffix appended to keys built in [`NamingMode::Mercurial`].
pub const MERCURIAL_SUFFIX: &str = "@Mercurial";

/// Environment variable selecting the alternate naming mode.
pub const VCS_ENV_VAR: &str = "CREDFORGE_VCS";

/// Error produced when a target or namespace cannot be normalized.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },
}

impl NormalizeError {
    fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }
}

/// Storage key shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamingMode {
    /// `{namespace}:{absolute_uri}`
    #[default]
    Default,

    /// Keys shared with Mercurial front-ends; the namespace is ignored.
    Mercurial,
}

impl NamingMode {
    /// Map a VCS name (`hg`, `mercurial`, `git`, ...) to a naming mode.
    pub fn from_vcs_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "hg" | "mercurial" => Self::Mercurial,
            _ => Self::Default,
        }
    }

    /// Read the naming mode from [`VCS_ENV_VAR`], defaulting when unset.
    pub fn from_env() -> Self {
        std::env::var(VCS_ENV_VAR)
            .map(|value| Self::from_vcs_name(&value))
            .unwrap_or_default()
    }
}

/// Strip trailing `/` and `\` characters.
///
/// Idempotent: stripping an already stripped string is a no-op.
pub fn strip_trailing_separators(value: &str) -> &str {
    value.trim_end_matches(['/', '\\'])
}

/// A parsed remote repository endpoint.
///
/// Only absolute URIs with a host are accepted. Two targets are equal when
/// their serialized forms match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetUri {
    url: Url,
}

impl TargetUri {
    /// Parse and validate a target URI.
    pub fn parse(raw: &str) -> Result<Self, NormalizeError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(NormalizeError::invalid("target URI is blank"));
        }

        let url = Url::parse(trimmed)
            .map_err(|e| NormalizeError::invalid(format!("unparseable target URI: {}", e)))?;

        if url.cannot_be_a_base() || url.host_str().map_or(true, str::is_empty) {
            return Err(NormalizeError::invalid(format!(
                "target URI has no host: {}",
                trimmed
            )));
        }

        Ok(Self { url })
    }

    /// The URI scheme (e.g. `https`).
    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    /// The host name, lowercased by the parser.
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    /// The explicit port, if any.
    pub fn port(&self) -> Option<u16> {
        self.url.port()
    }

    /// The path component.
    pub fn path(&self) -> &str {
        self.url.path()
    }

    /// User name embedded in the URI, if any.
    pub fn username(&self) -> Option<&str> {
        Some(self.url.username()).filter(|u| !u.is_empty())
    }

    /// The full URI without user-info, query or fragment, trailing
    /// separators stripped.
    pub fn base_url(&self) -> String {
        let mut base = self.url.clone();
        // Url only rejects these for cannot-be-a-base URIs, excluded by parse.
        let _ = base.set_username("");
        let _ = base.set_password(None);
        base.set_query(None);
        base.set_fragment(None);
        strip_trailing_separators(base.as_str()).to_string()
    }

    /// The URI with password, query and fragment removed. The user name is
    /// kept, trailing separators are stripped.
    pub fn key_url(&self) -> String {
        let mut keyed = self.url.clone();
        let _ = keyed.set_password(None);
        keyed.set_query(None);
        keyed.set_fragment(None);
        strip_trailing_separators(keyed.as_str()).to_string()
    }

    /// `scheme://host[:port]/` of this target.
    pub fn server_root(&self) -> Url {
        let mut root = self.url.clone();
        let _ = root.set_username("");
        let _ = root.set_password(None);
        root.set_path("/");
        root.set_query(None);
        root.set_fragment(None);
        root
    }

    /// A copy of this target addressing another host.
    pub fn with_host(&self, host: &str) -> Result<Self, NormalizeError> {
        let mut url = self.url.clone();
        url.set_host(Some(host))
            .map_err(|e| NormalizeError::invalid(format!("invalid host '{}': {}", host, e)))?;
        Ok(Self { url })
    }

    /// The serialized URI.
    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    /// The underlying parsed URL.
    pub fn as_url(&self) -> &Url {
        &self.url
    }
}

impl fmt::Display for TargetUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base_url())
    }
}

impl FromStr for TargetUri {
    type Err = NormalizeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Builds storage keys for targets.
///
/// Carries the naming mode, the namespace used in default mode, and the
/// provider's host aliases (alias host → canonical host).
///
/// # Example
///
/// ```
/// use credforge_core::target::{KeyNormalizer, NamingMode, TargetUri};
///
/// let normalizer = KeyNormalizer::new(NamingMode::Default, Some("git"))
///     .with_alias("gist.github.com", "github.com");
///
/// let gist = TargetUri::parse("https://gist.github.com/").unwrap();
/// assert_eq!(normalizer.storage_key(&gist).unwrap(), "git:https://github.com");
/// ```
#[derive(Debug, Clone, Default)]
pub struct KeyNormalizer {
    mode: NamingMode,
    namespace: Option<String>,
    aliases: BTreeMap<String, String>,
}

impl KeyNormalizer {
    pub fn new(mode: NamingMode, namespace: Option<&str>) -> Self {
        Self {
            mode,
            namespace: namespace.map(str::to_string),
            aliases: BTreeMap::new(),
        }
    }

    /// Register a host alias.
    pub fn with_alias(mut self, alias: impl Into<String>, canonical: impl Into<String>) -> Self {
        self.aliases
            .insert(alias.into().to_ascii_lowercase(), canonical.into().to_ascii_lowercase());
        self
    }

    /// Register several host aliases at once.
    pub fn with_aliases<I, K, V>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (alias, canonical) in aliases {
            self = self.with_alias(alias, canonical);
        }
        self
    }

    pub fn mode(&self) -> NamingMode {
        self.mode
    }

    /// Rewrite an aliased host to its canonical host.
    pub fn canonical(&self, target: &TargetUri) -> Result<TargetUri, NormalizeError> {
        match self.aliases.get(target.host()) {
            Some(canonical) => target.with_host(canonical),
            None => Ok(target.clone()),
        }
    }

    /// Compute the storage key for a target.
    pub fn storage_key(&self, target: &TargetUri) -> Result<String, NormalizeError> {
        let target = self.canonical(target)?;

        match self.mode {
            NamingMode::Mercurial => {
                let base = target.base_url();
                Ok(match target.username() {
                    Some(user) => format!("{}@@{}{}", user, base, MERCURIAL_SUFFIX),
                    None => format!("@{}{}", base, MERCURIAL_SUFFIX),
                })
            }
            NamingMode::Default => {
                let namespace = self
                    .namespace
                    .as_deref()
                    .map(str::trim)
                    .filter(|ns| !ns.is_empty())
                    .ok_or_else(|| NormalizeError::invalid("namespace is required"))?;

                Ok(format!("{}:{}", namespace, target.key_url()))
            }
        }
    }
}

/// Normalize a raw target URI and namespace into a storage key.
pub fn normalize(
    target_uri: &str,
    namespace: Option<&str>,
    mode: NamingMode,
) -> Result<String, NormalizeError> {
    let target = TargetUri::parse(target_uri)?;
    KeyNormalizer::new(mode, namespace).storage_key(&target)
}
