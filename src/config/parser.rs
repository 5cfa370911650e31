//! Configuration parser for loading and merging configuration files.
//!
//! This module handles loading configuration from YAML files and environment
//! variables, with proper precedence and error handling. It also computes
//! the content hash of every script artifact so plans see byte changes.

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{ConfigError, PipeformError, Result};
use crate::model::{AttrValue, ResourceKind};
use crate::provider::secrets::SecretString;

use super::hash::ConfigHasher;
use super::spec::DeployConfig;

/// Name of the user-level config directory under the platform config dir.
const USER_CONFIG_DIR: &str = "pipeform";

/// Configuration parser for loading deployment configuration.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving relative paths.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Directory that relative paths resolve against.
    #[must_use]
    pub fn base_dir(&self) -> PathBuf {
        self.base_path.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if a
    /// script artifact source cannot be read.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<DeployConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(PipeformError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            PipeformError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        let mut config = self.parse_yaml(&content, Some(path))?;
        let base = self.base_path.clone().unwrap_or_else(|| {
            path.parent()
                .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
        });
        inject_artifact_hashes(&mut config, &base)?;
        Ok(config)
    }

    /// Parses configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<DeployConfig> {
        debug!("Parsing YAML configuration");

        let config: DeployConfig = serde_yaml::from_str(content).map_err(|e| {
            let location = e
                .location()
                .map(|l| {
                    let file = source.map_or_else(String::new, |p| format!("{}:", p.display()));
                    format!("{file}{}:{}", l.line(), l.column())
                })
                .or_else(|| source.map(|p| p.display().to_string()));
            PipeformError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!(
            "Parsed configuration for project {} with {} resources",
            config.project.name,
            config.resources.len()
        );
        Ok(config)
    }

    /// Loads configuration with environment variable overrides.
    ///
    /// Environment variables are checked in the format
    /// `PIPEFORM_<SECTION>_<KEY>` (e.g., `PIPEFORM_PROJECT_NAME`).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<DeployConfig> {
        let mut config = self.load_file(path)?;
        Self::apply_env_overrides(&mut config);
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    pub fn apply_env_overrides(config: &mut DeployConfig) {
        if let Ok(name) = std::env::var("PIPEFORM_PROJECT_NAME") {
            debug!("Overriding project.name from environment");
            config.project.name = name;
        }

        if let Ok(env) = std::env::var("PIPEFORM_PROJECT_ENVIRONMENT") {
            debug!("Overriding project.environment from environment");
            config.project.environment = env;
        }

        if let Ok(bucket) = std::env::var("PIPEFORM_STATE_BUCKET") {
            debug!("Overriding state.bucket from environment");
            config.state.bucket = Some(bucket);
        }

        if let Ok(prefix) = std::env::var("PIPEFORM_STATE_PREFIX") {
            debug!("Overriding state.prefix from environment");
            config.state.prefix = Some(prefix);
        }

        if let Ok(endpoint) = std::env::var("PIPEFORM_PROVIDER_ENDPOINT") {
            debug!("Overriding provider.endpoint from environment");
            config.provider.endpoint = Some(endpoint);
        }
    }

    /// Loads the `.env` file next to the configuration, falling back to the
    /// user-level `pipeform/.env` in the platform config directory.
    ///
    /// # Errors
    ///
    /// Returns an error if a .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let local = self.base_dir().join(".env");
        let user = dirs::config_dir().map(|d| d.join(USER_CONFIG_DIR).join(".env"));

        let Some(env_path) = std::iter::once(local)
            .chain(user)
            .find(|p| p.exists())
        else {
            debug!("No .env file found");
            return Ok(());
        };

        info!("Loading environment from: {}", env_path.display());
        dotenvy::from_path(&env_path).map_err(|e| {
            PipeformError::Config(ConfigError::ParseError {
                message: format!("Failed to load .env file: {e}"),
                location: Some(env_path.display().to_string()),
            })
        })?;

        Ok(())
    }

    /// Reads the provider token from the configured environment variable.
    #[must_use]
    pub fn provider_token(config: &DeployConfig) -> Option<SecretString> {
        std::env::var(&config.provider.token_env)
            .ok()
            .filter(|t| !t.is_empty())
            .map(SecretString::new)
    }
}

/// Resolves a script artifact `source` against the configuration directory.
#[must_use]
pub fn resolve_source_path(base_dir: &Path, source: &str) -> PathBuf {
    let path = Path::new(source);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

/// Sets `content_hash` on every script artifact from its source bytes.
///
/// # Errors
///
/// Returns a validation error if a source is missing or unreadable.
pub fn inject_artifact_hashes(config: &mut DeployConfig, base_dir: &Path) -> Result<()> {
    for resource in &mut config.resources {
        if resource.kind != ResourceKind::ScriptArtifact {
            continue;
        }
        let id = resource.id().to_string();
        let Some(source) = resource.attributes.get("source").and_then(AttrValue::as_str) else {
            continue;
        };
        let path = resolve_source_path(base_dir, source);
        let bytes = std::fs::read(&path).map_err(|e| {
            PipeformError::Config(ConfigError::validation(
                &id,
                "source",
                format!("cannot read {}: {e}", path.display()),
            ))
        })?;
        let hash = ConfigHasher::hash_bytes(&bytes);
        debug!("{id}: content_hash {}", ConfigHasher::short_hash(&hash));
        resource
            .attributes
            .insert(String::from("content_hash"), AttrValue::string(hash));
    }
    Ok(())
}

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &[
    "pipeform.deploy.yaml",
    "pipeform.deploy.yml",
    "pipeform.yaml",
    "pipeform.yml",
];

/// Finds the configuration file in the current directory or parent directories.
///
/// # Errors
///
/// Returns an error if no configuration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(PipeformError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}
