//! Resolver strategies
//!
//! Each tier of the hierarchy is one [`CredentialResolver`]; the gate tries
//! them in order until one succeeds or all fail.

use std::path::PathBuf;
use std::sync::Arc;

use ace_types::{Credential, CredentialSource};
use async_trait::async_trait;
use parking_lot::Mutex;

/// Environment variable holding an API key
pub const API_KEY_ENV: &str = "ACE_API_KEY";

/// Environment variable overriding the ambient credential file location
pub const ADC_FILE_ENV: &str = "ACE_ADC_FILE";

/// Failure inside one resolver tier
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResolverError {
    /// The tier is configured but its backing source misbehaved
    #[error("{source_name} tier failed: {detail}")]
    TierFailed {
        source_name: CredentialSource,
        detail: String,
    },
}

impl ResolverError {
    #[must_use]
    pub fn tier(source: CredentialSource, detail: impl Into<String>) -> Self {
        Self::TierFailed {
            source_name: source,
            detail: detail.into(),
        }
    }
}

/// One tier of the credential resolution hierarchy.
///
/// `Ok(None)` means the tier has nothing to offer (not configured, cache
/// empty); the chain moves on. `Err` is recorded and the chain also moves on.
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    /// Which hierarchy tier this resolver implements
    fn source(&self) -> CredentialSource;

    /// Attempt resolution for the requested scopes.
    async fn resolve(&self, scopes: &[String]) -> Result<Option<Credential>, ResolverError>;
}

/// Host-provided interactive consent capability (out of engine scope)
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Run the interactive flow and return a credential.
    ///
    /// # Errors
    /// Returns a human-readable reason when consent fails or is refused.
    async fn get_credential(&self, scopes: &[String]) -> Result<Credential, String>;
}

/// Shared cache of the active session token
#[derive(Debug, Default)]
pub struct SessionCache {
    inner: Mutex<Option<Credential>>,
}

impl SessionCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a freshly minted session credential.
    pub fn store(&self, credential: Credential) {
        *self.inner.lock() = Some(credential);
    }

    /// Drop the cached credential, forcing the next resolution to fall
    /// through to later tiers.
    pub fn clear(&self) {
        *self.inner.lock() = None;
    }

    /// The cached credential, if present and unexpired. Expired entries are
    /// evicted, never returned.
    #[must_use]
    pub fn active(&self) -> Option<Credential> {
        let mut guard = self.inner.lock();
        match guard.as_ref() {
            Some(credential) if !credential.is_expired() => Some(credential.clone()),
            Some(_) => {
                *guard = None;
                None
            }
            None => None,
        }
    }
}

/// Tier 1: an existing active session token
pub struct SessionResolver {
    cache: Arc<SessionCache>,
}

impl SessionResolver {
    #[must_use]
    pub fn new(cache: Arc<SessionCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl CredentialResolver for SessionResolver {
    fn source(&self) -> CredentialSource {
        CredentialSource::Session
    }

    async fn resolve(&self, _scopes: &[String]) -> Result<Option<Credential>, ResolverError> {
        Ok(self.cache.active())
    }
}

/// Tier 2: an environment-supplied key
pub struct EnvKeyResolver {
    var: String,
}

impl EnvKeyResolver {
    #[must_use]
    pub fn new() -> Self {
        Self {
            var: API_KEY_ENV.to_string(),
        }
    }

    /// Read from a non-default environment variable
    #[must_use]
    pub fn from_var(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl Default for EnvKeyResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialResolver for EnvKeyResolver {
    fn source(&self) -> CredentialSource {
        CredentialSource::ApiKey
    }

    async fn resolve(&self, _scopes: &[String]) -> Result<Option<Credential>, ResolverError> {
        match std::env::var(&self.var) {
            Ok(key) if !key.trim().is_empty() => {
                Ok(Some(Credential::new(CredentialSource::ApiKey, key)))
            }
            _ => Ok(None),
        }
    }
}

/// Tier 3: ambient platform default credentials from a well-known file
pub struct AdcResolver {
    path: Option<PathBuf>,
}

impl AdcResolver {
    /// Resolve the file from `ACE_ADC_FILE`, falling back to
    /// `$HOME/.config/ace/adc.json`.
    #[must_use]
    pub fn new() -> Self {
        Self { path: None }
    }

    /// Read from an explicit file path
    #[must_use]
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    fn credential_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.path {
            return Some(path.clone());
        }
        if let Ok(path) = std::env::var(ADC_FILE_ENV) {
            return Some(PathBuf::from(path));
        }
        std::env::var("HOME")
            .ok()
            .map(|home| PathBuf::from(home).join(".config/ace/adc.json"))
    }
}

impl Default for AdcResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialResolver for AdcResolver {
    fn source(&self) -> CredentialSource {
        CredentialSource::Adc
    }

    async fn resolve(&self, _scopes: &[String]) -> Result<Option<Credential>, ResolverError> {
        let Some(path) = self.credential_file() else {
            return Ok(None);
        };

        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(ResolverError::tier(
                    CredentialSource::Adc,
                    format!("reading {}: {err}", path.display()),
                ));
            }
        };

        let value: serde_json::Value = serde_json::from_str(&contents).map_err(|err| {
            ResolverError::tier(
                CredentialSource::Adc,
                format!("parsing {}: {err}", path.display()),
            )
        })?;

        match value.get("token").and_then(serde_json::Value::as_str) {
            Some(token) if !token.is_empty() => {
                Ok(Some(Credential::new(CredentialSource::Adc, token)))
            }
            _ => Err(ResolverError::tier(
                CredentialSource::Adc,
                format!("{} has no token field", path.display()),
            )),
        }
    }
}

/// Tier 4: interactive consent flow delegated to the host
pub struct InteractiveResolver {
    provider: Arc<dyn CredentialProvider>,
}

impl InteractiveResolver {
    #[must_use]
    pub fn new(provider: Arc<dyn CredentialProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl CredentialResolver for InteractiveResolver {
    fn source(&self) -> CredentialSource {
        CredentialSource::OAuth
    }

    async fn resolve(&self, scopes: &[String]) -> Result<Option<Credential>, ResolverError> {
        match self.provider.get_credential(scopes).await {
            Ok(credential) => Ok(Some(credential)),
            Err(reason) => Err(ResolverError::tier(CredentialSource::OAuth, reason)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn session_cache_evicts_expired_tokens() {
        let cache = Arc::new(SessionCache::new());
        cache.store(
            Credential::new(CredentialSource::Session, "stale")
                .with_expiry(Utc::now() - Duration::seconds(1)),
        );

        let resolver = SessionResolver::new(Arc::clone(&cache));
        let resolved = resolver.resolve(&[]).await.unwrap();
        assert!(resolved.is_none());
    }

    #[tokio::test]
    async fn session_cache_returns_active_token() {
        let cache = Arc::new(SessionCache::new());
        cache.store(
            Credential::new(CredentialSource::Session, "fresh")
                .with_expiry(Utc::now() + Duration::minutes(10)),
        );

        let resolver = SessionResolver::new(cache);
        let resolved = resolver.resolve(&[]).await.unwrap().unwrap();
        assert_eq!(resolved.token.expose(), "fresh");
    }

    #[tokio::test]
    async fn env_key_resolver_reads_configured_variable() {
        let var = "ACE_TEST_KEY_VAR_RESOLVER";
        std::env::set_var(var, "sk-test-1");
        let resolver = EnvKeyResolver::from_var(var);

        let resolved = resolver.resolve(&[]).await.unwrap().unwrap();
        assert_eq!(resolved.source, CredentialSource::ApiKey);
        assert_eq!(resolved.token.expose(), "sk-test-1");
        std::env::remove_var(var);
    }

    #[tokio::test]
    async fn missing_env_key_yields_none() {
        let resolver = EnvKeyResolver::from_var("ACE_TEST_KEY_VAR_ABSENT");
        assert!(resolver.resolve(&[]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn adc_resolver_reads_token_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("adc.json");
        std::fs::write(&path, r#"{"token": "adc-token-1"}"#).unwrap();

        let resolver = AdcResolver::from_path(&path);
        let resolved = resolver.resolve(&[]).await.unwrap().unwrap();
        assert_eq!(resolved.source, CredentialSource::Adc);
        assert_eq!(resolved.token.expose(), "adc-token-1");
    }

    #[tokio::test]
    async fn adc_resolver_missing_file_yields_none() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = AdcResolver::from_path(dir.path().join("absent.json"));
        assert!(resolver.resolve(&[]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn adc_resolver_rejects_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("adc.json");
        std::fs::write(&path, "not json").unwrap();

        let resolver = AdcResolver::from_path(&path);
        assert!(resolver.resolve(&[]).await.is_err());
    }
}
