//! Domain model types for credforge.
//!
//! This module defines the core values that flow through credential
//! resolution:
//! - [`Credential`] - A username/secret pair with optional expiry
//! - [`TokenScope`] - The set of capabilities a token is authorized for
//! - [`StoredRecord`] - What the secure store persists per storage key
//! - [`AuthenticationResult`] - Outcome of an acquisition or refresh attempt
//! - [`FailureReason`] - Diagnostics carried by a failed attempt

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::ops::BitOr;

use crate::store::Secret;

/// A username and secret (password or access token).
///
/// The username is optional for token-only forms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub username: Option<String>,
    pub secret: Secret,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    /// Create a credential with a username.
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            secret: Secret::new(secret),
            expires_at: None,
        }
    }

    /// Create a token-only credential.
    pub fn token(secret: impl Into<String>) -> Self {
        Self {
            username: None,
            secret: Secret::new(secret),
            expires_at: None,
        }
    }

    /// Set the expiry timestamp.
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Check if this credential has expired.
    ///
    /// Returns `false` if no expiration is set.
    pub fn is_expired(&self) -> bool {
        self.expires_at.map(|exp| exp < Utc::now()).unwrap_or(false)
    }

    /// Check if this credential will expire within the given duration.
    pub fn expires_within(&self, duration: Duration) -> bool {
        self.expires_at
            .map(|exp| exp < Utc::now() + duration)
            .unwrap_or(false)
    }
}

/// A set of capability grants (e.g. `repo`, `gist`).
///
/// Scopes combine with union semantics via `|`.
///
/// ```
/// use credforge_core::TokenScope;
///
/// let scope = TokenScope::from("repo") | TokenScope::from("gist");
/// assert!(scope.covers(&TokenScope::from("gist")));
/// assert_eq!(scope.to_string(), "gist repo");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenScope(BTreeSet<String>);

impl TokenScope {
    pub fn new<I, S>(scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(
            scopes
                .into_iter()
                .map(Into::into)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        )
    }

    /// Parse a space or comma separated scope list.
    pub fn parse(raw: &str) -> Self {
        Self::new(raw.split([' ', ',']))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Union of two scopes.
    pub fn union(&self, other: &TokenScope) -> TokenScope {
        Self(self.0.union(&other.0).cloned().collect())
    }

    /// True when every capability in `other` is granted by `self`.
    pub fn covers(&self, other: &TokenScope) -> bool {
        other.0.is_subset(&self.0)
    }
}

impl BitOr for TokenScope {
    type Output = TokenScope;

    fn bitor(self, rhs: Self) -> Self::Output {
        self.union(&rhs)
    }
}

impl From<&str> for TokenScope {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

impl fmt::Display for TokenScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<&str> = self.iter().collect();
        write!(f, "{}", joined.join(" "))
    }
}

/// The record persisted under one storage key.
///
/// Written and read whole by [`CredentialStore`](crate::store::CredentialStore).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub storage_key: String,
    pub credential: Credential,
    pub scope: Option<TokenScope>,
    pub created_at: DateTime<Utc>,
    pub refresh_token: Option<Secret>,
}

impl StoredRecord {
    pub fn new(storage_key: impl Into<String>, credential: Credential) -> Self {
        Self {
            storage_key: storage_key.into(),
            credential,
            scope: None,
            created_at: Utc::now(),
            refresh_token: None,
        }
    }

    pub fn with_scope(mut self, scope: TokenScope) -> Self {
        self.scope = Some(scope).filter(|s| !s.is_empty());
        self
    }

    pub fn with_refresh_token(mut self, refresh_token: Option<Secret>) -> Self {
        self.refresh_token = refresh_token;
        self
    }

    /// Whether this record satisfies a requested scope.
    ///
    /// Records without a stored scope (plain passwords) satisfy any request.
    pub fn satisfies(&self, requested: &TokenScope) -> bool {
        match &self.scope {
            Some(stored) => stored.covers(requested),
            None => true,
        }
    }
}

/// Category of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Network-layer failure (timeout, DNS, connection refused).
    Transport,

    /// The provider explicitly rejected the request.
    Protocol,

    /// The prompt collaborator failed.
    Prompt,

    /// Provider configuration is incomplete.
    Configuration,
}

/// Why an attempt failed, with the provider's reason code preserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureReason {
    pub kind: FailureKind,
    pub code: String,
    pub message: String,
}

impl FailureReason {
    pub fn new(kind: FailureKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Transport, "transport_failure", message)
    }

    pub fn protocol(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(FailureKind::Protocol, code, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Configuration, "misconfigured", message)
    }

    /// Transport failures may be retried by the caller; nothing else is.
    pub fn is_retryable(&self) -> bool {
        self.kind == FailureKind::Transport
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

/// Outcome of an authentication attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationResult {
    /// Credentials were obtained. Providers that issue refresh tokens
    /// return one alongside.
    Success {
        credential: Credential,
        refresh_token: Option<Secret>,
    },

    /// The provider wants a second factor before issuing credentials.
    TwoFactorRequired,

    /// The provider rejected the supplied credentials or grant.
    InvalidCredentials,

    /// The user aborted the attempt.
    Cancelled,

    /// The attempt failed for another reason.
    Failure(FailureReason),
}

impl AuthenticationResult {
    pub fn success(credential: Credential) -> Self {
        Self::Success {
            credential,
            refresh_token: None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// The credential, if this is a success.
    pub fn into_credential(self) -> Option<Credential> {
        match self {
            Self::Success { credential, .. } => Some(credential),
            _ => None,
        }
    }
}
