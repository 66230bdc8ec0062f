//! Credentials
//!
//! A resolved credential carries its source tier, a redacted token, and an
//! expiry bound. Token material never appears in Debug output, log records,
//! or serialized form.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which tier of the resolution hierarchy produced a credential
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialSource {
    /// An existing active session token
    Session,
    /// An environment-supplied key
    ApiKey,
    /// Ambient platform default credentials
    Adc,
    /// Interactive consent flow delegated to the host
    OAuth,
}

impl std::fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Session => "session",
            Self::ApiKey => "apikey",
            Self::Adc => "adc",
            Self::OAuth => "oauth",
        };
        f.write_str(name)
    }
}

/// An opaque token that redacts itself everywhere except [`SecretToken::expose`].
#[derive(Clone, PartialEq, Eq)]
pub struct SecretToken(String);

impl SecretToken {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token, for injection into a process environment only.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretToken(****)")
    }
}

impl std::fmt::Display for SecretToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("****")
    }
}

/// A resolved credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub source: CredentialSource,
    pub token: SecretToken,
    /// None means the credential does not expire
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    #[must_use]
    pub fn new(source: CredentialSource, token: impl Into<String>) -> Self {
        Self {
            source,
            token: SecretToken::new(token),
            expires_at: None,
        }
    }

    /// With an expiry bound
    #[must_use]
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Whether the credential's lifetime has ended.
    ///
    /// Expired credentials are re-resolved, never silently reused.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn token_is_redacted_in_debug_and_display() {
        let credential = Credential::new(CredentialSource::ApiKey, "sk-live-abc123");

        let debug = format!("{:?}", credential);
        assert!(!debug.contains("abc123"));
        assert!(debug.contains("SecretToken(****)"));
        assert_eq!(credential.token.to_string(), "****");
        assert_eq!(credential.token.expose(), "sk-live-abc123");
    }

    #[test]
    fn expiry_bounds_credential_lifetime() {
        let fresh = Credential::new(CredentialSource::Session, "t")
            .with_expiry(Utc::now() + Duration::minutes(5));
        assert!(!fresh.is_expired());

        let stale = Credential::new(CredentialSource::Session, "t")
            .with_expiry(Utc::now() - Duration::seconds(1));
        assert!(stale.is_expired());

        let eternal = Credential::new(CredentialSource::ApiKey, "t");
        assert!(!eternal.is_expired());
    }
}
