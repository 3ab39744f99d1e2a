//! Secret storage abstraction.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::{Error, Result};

/// Trait for secret storage backends.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Get a secret by path, e.g. `github/token`.
    async fn get(&self, path: &str) -> Result<String>;
}

/// Secrets read from process environment variables.
///
/// A path maps to `SHIPYARD_SECRET_` plus the path upper-cased with every
/// non-alphanumeric character replaced by `_`: `github/token` is read from
/// `SHIPYARD_SECRET_GITHUB_TOKEN`.
#[derive(Debug, Clone, Default)]
pub struct EnvSecretStore;

impl EnvSecretStore {
    pub fn var_name(path: &str) -> String {
        let suffix: String = path
            .trim_matches('/')
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("SHIPYARD_SECRET_{}", suffix)
    }
}

#[async_trait]
impl SecretStore for EnvSecretStore {
    async fn get(&self, path: &str) -> Result<String> {
        let var = Self::var_name(path);
        std::env::var(&var).map_err(|_| Error::NotFound(format!("secret {} (${})", path, var)))
    }
}

/// Fixed in-memory secrets, for local runs and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticSecretStore {
    secrets: HashMap<String, String>,
}

impl StaticSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, path: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets.insert(path.into(), value.into());
        self
    }
}

#[async_trait]
impl SecretStore for StaticSecretStore {
    async fn get(&self, path: &str) -> Result<String> {
        self.secrets
            .get(path)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("secret {}", path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_name() {
        assert_eq!(
            EnvSecretStore::var_name("github/token"),
            "SHIPYARD_SECRET_GITHUB_TOKEN"
        );
        assert_eq!(
            EnvSecretStore::var_name("/aws-samples/app/github/personal_access_token"),
            "SHIPYARD_SECRET_AWS_SAMPLES_APP_GITHUB_PERSONAL_ACCESS_TOKEN"
        );
    }

    #[test]
    fn test_static_store() {
        let store = StaticSecretStore::new().with("github/token", "t0k");
        let rt = futures::executor::block_on(store.get("github/token"));
        assert_eq!(rt.unwrap(), "t0k");
        let missing = futures::executor::block_on(store.get("nope"));
        assert!(matches!(missing, Err(Error::NotFound(_))));
    }
}
