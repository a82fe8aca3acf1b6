//! Startup secret resolution
//!
//! Signing secrets come from an external [`SecretProvider`] (a vault client in
//! production, environment variables or a static map elsewhere). They are
//! resolved exactly once into an immutable [`SessionSecrets`] value that is then
//! handed to the token services.

use crate::config::Environment;
use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{info, warn};

pub const JWT_SECRET_KEY: &str = "jwt_secret";
pub const CSRF_SECRET_KEY: &str = "csrf_secret";

/// Minimum secret length accepted in production (256 bits)
const MIN_PRODUCTION_SECRET_LEN: usize = 32;

const DEV_JWT_SECRET: &str = "development-jwt-secret-change-in-production";
const DEV_CSRF_SECRET: &str = "development-csrf-secret-change-in-production";

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("Required secret not found: {0}")]
    Missing(String),

    #[error("Secret backend error: {0}")]
    Backend(String),

    #[error("Secret {key} rejected: {reason}")]
    Invalid { key: String, reason: String },
}

/// Source of signing secrets
#[async_trait]
pub trait SecretProvider: Send + Sync {
    /// Fetch a secret, `None` when the provider has no value for `key`
    async fn get(&self, key: &str) -> Result<Option<String>, SecretError>;

    async fn get_required(&self, key: &str) -> Result<String, SecretError> {
        self.get(key)
            .await?
            .filter(|value| !value.is_empty())
            .ok_or_else(|| SecretError::Missing(key.to_string()))
    }
}

/// Reads secrets from environment variables: `jwt_secret` → `{PREFIX}JWT_SECRET`
#[derive(Debug, Clone, Default)]
pub struct EnvSecretProvider {
    prefix: String,
}

impl EnvSecretProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn variable_name(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key.to_uppercase())
    }
}

#[async_trait]
impl SecretProvider for EnvSecretProvider {
    async fn get(&self, key: &str) -> Result<Option<String>, SecretError> {
        Ok(std::env::var(self.variable_name(key)).ok())
    }
}

/// In-memory provider, used by tests and local tooling
#[derive(Debug, Clone, Default)]
pub struct StaticSecretProvider {
    values: HashMap<String, String>,
}

impl StaticSecretProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

#[async_trait]
impl SecretProvider for StaticSecretProvider {
    async fn get(&self, key: &str) -> Result<Option<String>, SecretError> {
        Ok(self.values.get(key).cloned())
    }
}

/// Signing secrets for session JWTs and CSRF tokens
#[derive(Clone)]
pub struct SessionSecrets {
    jwt_secret: String,
    csrf_secret: String,
}

impl SessionSecrets {
    /// Build from explicit values. The two secrets must differ.
    pub fn new(
        jwt_secret: impl Into<String>,
        csrf_secret: impl Into<String>,
    ) -> Result<Self, SecretError> {
        let secrets = Self {
            jwt_secret: jwt_secret.into(),
            csrf_secret: csrf_secret.into(),
        };
        if secrets.jwt_secret.is_empty() {
            return Err(SecretError::Missing(JWT_SECRET_KEY.to_string()));
        }
        if secrets.csrf_secret.is_empty() {
            return Err(SecretError::Missing(CSRF_SECRET_KEY.to_string()));
        }
        if secrets.jwt_secret == secrets.csrf_secret {
            return Err(SecretError::Invalid {
                key: CSRF_SECRET_KEY.to_string(),
                reason: "must differ from the session signing secret".to_string(),
            });
        }
        Ok(secrets)
    }

    /// Resolve both secrets from `provider`.
    ///
    /// In production any failure is returned to the caller and startup must
    /// abort. In every other environment a missing secret is replaced by a
    /// fixed development value and a warning is logged.
    pub async fn resolve(
        provider: &dyn SecretProvider,
        environment: Environment,
    ) -> Result<Self, SecretError> {
        let jwt_secret = resolve_one(provider, JWT_SECRET_KEY, DEV_JWT_SECRET, environment).await?;
        let csrf_secret =
            resolve_one(provider, CSRF_SECRET_KEY, DEV_CSRF_SECRET, environment).await?;

        if environment.is_production() {
            for (key, value) in [(JWT_SECRET_KEY, &jwt_secret), (CSRF_SECRET_KEY, &csrf_secret)] {
                if value.len() < MIN_PRODUCTION_SECRET_LEN {
                    return Err(SecretError::Invalid {
                        key: key.to_string(),
                        reason: format!("shorter than {MIN_PRODUCTION_SECRET_LEN} bytes"),
                    });
                }
            }
        }

        let secrets = Self::new(jwt_secret, csrf_secret)?;
        info!(environment = %environment, "Signing secrets resolved");
        Ok(secrets)
    }

    pub fn jwt_secret(&self) -> &[u8] {
        self.jwt_secret.as_bytes()
    }

    pub fn csrf_secret(&self) -> &[u8] {
        self.csrf_secret.as_bytes()
    }
}

impl std::fmt::Debug for SessionSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSecrets")
            .field("jwt_secret", &"[REDACTED]")
            .field("csrf_secret", &"[REDACTED]")
            .finish()
    }
}

async fn resolve_one(
    provider: &dyn SecretProvider,
    key: &str,
    fallback: &str,
    environment: Environment,
) -> Result<String, SecretError> {
    match provider.get_required(key).await {
        Ok(value) => Ok(value),
        Err(e) if environment.is_production() => Err(e),
        Err(e) => {
            warn!(
                secret = key,
                environment = %environment,
                error = %e,
                "Secret unavailable, using development default"
            );
            Ok(fallback.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LONG_JWT: &str = "0123456789abcdef0123456789abcdef-jwt";
    const LONG_CSRF: &str = "0123456789abcdef0123456789abcdef-csrf";

    #[tokio::test]
    async fn test_resolve_from_static_provider() {
        let provider = StaticSecretProvider::new()
            .with(JWT_SECRET_KEY, LONG_JWT)
            .with(CSRF_SECRET_KEY, LONG_CSRF);

        let secrets = SessionSecrets::resolve(&provider, Environment::Production)
            .await
            .unwrap();
        assert_eq!(secrets.jwt_secret(), LONG_JWT.as_bytes());
        assert_eq!(secrets.csrf_secret(), LONG_CSRF.as_bytes());
    }

    #[tokio::test]
    async fn test_missing_secret_is_fatal_in_production() {
        let provider = StaticSecretProvider::new().with(JWT_SECRET_KEY, LONG_JWT);

        let result = SessionSecrets::resolve(&provider, Environment::Production).await;
        assert!(matches!(result, Err(SecretError::Missing(key)) if key == CSRF_SECRET_KEY));
    }

    #[tokio::test]
    async fn test_missing_secret_falls_back_outside_production() {
        let provider = StaticSecretProvider::new();

        let secrets = SessionSecrets::resolve(&provider, Environment::Test)
            .await
            .unwrap();
        assert_eq!(secrets.jwt_secret(), DEV_JWT_SECRET.as_bytes());
        assert_ne!(secrets.jwt_secret(), secrets.csrf_secret());
    }

    #[tokio::test]
    async fn test_short_secret_rejected_in_production() {
        let provider = StaticSecretProvider::new()
            .with(JWT_SECRET_KEY, "short")
            .with(CSRF_SECRET_KEY, LONG_CSRF);

        let result = SessionSecrets::resolve(&provider, Environment::Production).await;
        assert!(matches!(result, Err(SecretError::Invalid { .. })));
    }

    #[test]
    fn test_env_provider_applies_prefix() {
        let provider = EnvSecretProvider::with_prefix("MEDAUTH_TEST_PREFIX_");
        std::env::set_var("MEDAUTH_TEST_PREFIX_PEPPER", "from-env");

        let value = tokio_test::block_on(provider.get("pepper")).unwrap();
        assert_eq!(value.as_deref(), Some("from-env"));
        assert_eq!(
            tokio_test::block_on(provider.get("absent_key")).unwrap(),
            None
        );
    }

    #[test]
    fn test_identical_secrets_rejected() {
        assert!(SessionSecrets::new("same-secret", "same-secret").is_err());
    }

    #[test]
    fn test_debug_redacts_values() {
        let secrets = SessionSecrets::new("jwt-value", "csrf-value").unwrap();
        let debug = format!("{secrets:?}");
        assert!(!debug.contains("jwt-value"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn test_env_variable_name() {
        let provider = EnvSecretProvider::with_prefix("MEDAUTH_");
        assert_eq!(provider.variable_name("jwt_secret"), "MEDAUTH_JWT_SECRET");
    }
}
