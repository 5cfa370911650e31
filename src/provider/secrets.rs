//! Secret inputs.
//!
//! Secrets are referenced by name in configuration and fetched only when a
//! provider payload is built. Values are wrapped in [`SecretString`] so they
//! never show up in `Debug` or `Display` output.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{ConfigError, PipeformError, Result};

/// Default environment variable prefix for secrets.
pub const DEFAULT_SECRET_PREFIX: &str = "PIPEFORM_SECRET_";

/// A secret value that redacts itself when formatted.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
    /// Wraps a secret value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the underlying value.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretString(***)")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Source of secret values.
pub trait SecretStore: Send + Sync + fmt::Debug {
    /// Fetches a secret by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the secret is not defined.
    fn get(&self, name: &str) -> Result<SecretString>;
}

/// Reads secrets from `{prefix}{NAME}` environment variables.
#[derive(Debug, Clone)]
pub struct EnvSecretStore {
    prefix: String,
}

impl EnvSecretStore {
    /// Creates a store with the given prefix.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Default for EnvSecretStore {
    fn default() -> Self {
        Self::new(DEFAULT_SECRET_PREFIX)
    }
}

impl SecretStore for EnvSecretStore {
    fn get(&self, name: &str) -> Result<SecretString> {
        let var = format!("{}{name}", self.prefix);
        std::env::var(&var)
            .map(SecretString::new)
            .map_err(|_| PipeformError::Config(ConfigError::MissingEnvVar { name: var }))
    }
}

/// Fixed secrets, for tests and simulation.
#[derive(Debug, Clone, Default)]
pub struct StaticSecretStore {
    values: BTreeMap<String, SecretString>,
}

impl StaticSecretStore {
    /// Creates a store from name/value pairs.
    pub fn new<'a>(values: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            values: values
                .into_iter()
                .map(|(k, v)| (k.to_string(), SecretString::new(v)))
                .collect(),
        }
    }
}

impl SecretStore for StaticSecretStore {
    fn get(&self, name: &str) -> Result<SecretString> {
        self.values.get(name).cloned().ok_or_else(|| {
            PipeformError::Config(ConfigError::MissingEnvVar {
                name: name.to_string(),
            })
        })
    }
}

/// Accepts any secret name and returns a placeholder value.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderSecretStore;

impl SecretStore for PlaceholderSecretStore {
    fn get(&self, name: &str) -> Result<SecretString> {
        Ok(SecretString::new(format!("<simulated:{name}>")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_string_redacts() {
        let secret = SecretString::new("hunter2");
        assert_eq!(format!("{secret}"), "***");
        assert!(!format!("{secret:?}").contains("hunter2"));
        assert_eq!(secret.expose(), "hunter2");
    }

    #[test]
    fn test_static_store() {
        let store = StaticSecretStore::new([("HASH_SALT", "pepper")]);
        assert_eq!(store.get("HASH_SALT").unwrap().expose(), "pepper");
        assert!(store.get("OTHER").is_err());
    }

    #[test]
    fn test_env_store_prefix() {
        let store = EnvSecretStore::new("PIPEFORM_TEST_SECRET_UNSET_");
        let err = store.get("NOPE").unwrap_err();
        assert!(err.to_string().contains("PIPEFORM_TEST_SECRET_UNSET_NOPE"));
    }
}
