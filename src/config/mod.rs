//! Configuration module for pipeform.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `pipeform.deploy.yaml`
//! - Validation of configuration values
//! - Computing configuration hashes for change detection

mod hash;
mod parser;
mod spec;
mod validator;

pub use hash::ConfigHasher;
pub use parser::{
    ConfigParser, DEFAULT_CONFIG_FILES, find_config_file, inject_artifact_hashes,
    resolve_source_path,
};
pub use spec::{
    ApplyConfig, DEFAULT_ENVIRONMENT, DEFAULT_PARALLELISM, DEFAULT_TOKEN_ENV, DeployConfig,
    ProjectConfig, ProviderConfig, SecretsConfig, StateBackend, StateConfig,
};
pub use validator::{ConfigValidator, ValidationResult};
