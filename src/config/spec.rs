//! Configuration specification types.
//!
//! This module defines the structs that map to the `pipeform.deploy.yaml`
//! file: project identity, state backend, provider endpoint, apply tuning,
//! secret lookup, named templates, and the desired resources.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::model::{ResourceId, ResourceSpec};
use crate::provider::RetryPolicy;
use crate::provider::secrets::DEFAULT_SECRET_PREFIX;
use crate::template::{TemplateDef, TemplateLibrary};

/// Default environment name.
pub const DEFAULT_ENVIRONMENT: &str = "dev";

/// Default number of actions applied concurrently.
pub const DEFAULT_PARALLELISM: usize = 4;

/// Default environment variable holding the provider token.
pub const DEFAULT_TOKEN_ENV: &str = "PIPEFORM_PROVIDER_TOKEN";

/// The root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DeployConfig {
    /// Project-level configuration.
    pub project: ProjectConfig,
    /// State backend configuration.
    #[serde(default)]
    pub state: StateConfig,
    /// Provider endpoint configuration.
    #[serde(default)]
    pub provider: ProviderConfig,
    /// Apply tuning.
    #[serde(default)]
    pub apply: ApplyConfig,
    /// Secret lookup configuration.
    #[serde(default)]
    pub secrets: SecretsConfig,
    /// Named templates.
    #[serde(default)]
    pub templates: BTreeMap<String, TemplateDef>,
    /// Desired resources.
    #[serde(default)]
    pub resources: Vec<ResourceSpec>,
}

/// Project-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectConfig {
    /// Unique name for the project.
    pub name: String,
    /// Environment (e.g., "dev", "staging", "prod").
    #[serde(default = "default_environment")]
    pub environment: String,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
}

/// State backend configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateConfig {
    /// Backend type (local or s3).
    #[serde(default)]
    pub backend: StateBackend,
    /// S3 bucket name (required for s3 backend).
    #[serde(default)]
    pub bucket: Option<String>,
    /// S3 key prefix. Defaults to `pipeform/{project}/{environment}`.
    #[serde(default)]
    pub prefix: Option<String>,
    /// S3 region (optional, uses AWS default if not specified).
    #[serde(default)]
    pub region: Option<String>,
    /// Local state file path (for local backend).
    #[serde(default)]
    pub path: Option<String>,
}

/// State backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    /// Local file-based state storage.
    #[default]
    Local,
    /// AWS S3-based state storage.
    S3,
}

/// Provider endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Control-plane base URL. Required unless simulating.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Environment variable holding the bearer token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Region for script artifact uploads.
    #[serde(default)]
    pub artifact_region: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            token_env: default_token_env(),
            timeout_secs: default_timeout_secs(),
            artifact_region: None,
        }
    }
}

/// Apply tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApplyConfig {
    /// Maximum actions in flight.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    /// Stop starting new actions after the first failure.
    #[serde(default)]
    pub halt_on_error: bool,
    /// Retry policy for transient provider errors.
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            parallelism: DEFAULT_PARALLELISM,
            halt_on_error: false,
            retry: RetryPolicy::default(),
        }
    }
}

/// Secret lookup configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SecretsConfig {
    /// Environment variable prefix.
    #[serde(default = "default_secret_prefix")]
    pub prefix: String,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            prefix: default_secret_prefix(),
        }
    }
}

fn default_environment() -> String {
    String::from(DEFAULT_ENVIRONMENT)
}

fn default_token_env() -> String {
    String::from(DEFAULT_TOKEN_ENV)
}

const fn default_timeout_secs() -> u64 {
    crate::provider::DEFAULT_TIMEOUT_SECS
}

const fn default_parallelism() -> usize {
    DEFAULT_PARALLELISM
}

fn default_secret_prefix() -> String {
    String::from(DEFAULT_SECRET_PREFIX)
}

impl DeployConfig {
    /// Gets a resource by id.
    #[must_use]
    pub fn resource(&self, id: &ResourceId) -> Option<&ResourceSpec> {
        self.resources.iter().find(|r| r.kind == id.kind && r.name == id.name)
    }

    /// Returns the set of declared resource ids.
    #[must_use]
    pub fn resource_ids(&self) -> BTreeSet<ResourceId> {
        self.resources.iter().map(ResourceSpec::id).collect()
    }

    /// Returns the named templates as a library.
    #[must_use]
    pub fn template_library(&self) -> TemplateLibrary {
        TemplateLibrary::new(self.templates.clone())
    }

    /// Returns the S3 state prefix, defaulting to the project path.
    #[must_use]
    pub fn state_prefix(&self) -> String {
        self.state.prefix.clone().unwrap_or_else(|| {
            format!(
                "pipeform/{}/{}",
                self.project.name, self.project.environment
            )
        })
    }

    /// Returns a copy with resources sorted by id.
    #[must_use]
    pub fn canonical(&self) -> Self {
        let mut config = self.clone();
        config.resources.sort_by_key(ResourceSpec::id);
        config
    }
}
