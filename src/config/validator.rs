//! Configuration validation for deployment specs.
//!
//! This module validates a whole deployment configuration: project identity,
//! state backend, provider and apply settings, and every resource against
//! its kind's schema. All problems are collected before reporting.

use crate::error::{ConfigError, PipeformError, Result};
use crate::model::{AttrValue, ResourceId, is_valid_name, validate_resource};
use crate::template::{TemplateLibrary, TemplateSource};
use std::collections::BTreeSet;
use tracing::debug;

use super::spec::{ApplyConfig, DeployConfig, ProjectConfig, StateBackend, StateConfig};

/// Validator for deployment configurations.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ConfigError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Returns true if no errors were found.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a deployment configuration.
    ///
    /// # Errors
    ///
    /// Returns the first error if validation fails. Use [`Self::check`] to
    /// get every problem.
    pub fn validate(&self, config: &DeployConfig) -> Result<ValidationResult> {
        let mut result = self.check(config);
        if result.errors.is_empty() {
            debug!("Configuration validation passed");
            Ok(result)
        } else {
            Err(PipeformError::Config(result.errors.remove(0)))
        }
    }

    /// Collects every error and warning without failing.
    #[must_use]
    pub fn check(&self, config: &DeployConfig) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_project(&config.project, &mut result);
        Self::validate_state(&config.state, &mut result);
        Self::validate_provider(config, &mut result);
        Self::validate_apply(&config.apply, &mut result);
        Self::validate_resources(config, &mut result);

        result
    }

    /// Validates project configuration.
    fn validate_project(project: &ProjectConfig, result: &mut ValidationResult) {
        if project.name.is_empty() {
            result.errors.push(ConfigError::validation_field(
                "project.name",
                "Project name cannot be empty",
            ));
        } else if !is_valid_name(&project.name) {
            result.errors.push(ConfigError::validation_field(
                "project.name",
                format!(
                    "Project name '{}' is invalid. Must be lowercase alphanumeric with '-' or '_'.",
                    project.name
                ),
            ));
        }

        if project.environment.is_empty() {
            result.errors.push(ConfigError::validation_field(
                "project.environment",
                "Environment cannot be empty",
            ));
        }
    }

    /// Validates state configuration.
    fn validate_state(state: &StateConfig, result: &mut ValidationResult) {
        if state.backend == StateBackend::S3 && state.bucket.as_ref().is_none_or(String::is_empty) {
            result.errors.push(ConfigError::validation_field(
                "state.bucket",
                "S3 bucket name is required when using S3 backend",
            ));
        }
    }

    /// Validates provider configuration.
    fn validate_provider(config: &DeployConfig, result: &mut ValidationResult) {
        if let Some(endpoint) = &config.provider.endpoint
            && !(endpoint.starts_with("http://") || endpoint.starts_with("https://"))
        {
            result.errors.push(ConfigError::validation_field(
                "provider.endpoint",
                format!("Endpoint '{endpoint}' must be an http(s) URL"),
            ));
        }

        if config.provider.timeout_secs == 0 {
            result.errors.push(ConfigError::validation_field(
                "provider.timeout_secs",
                "Timeout must be at least 1 second",
            ));
        }
    }

    /// Validates apply tuning.
    fn validate_apply(apply: &ApplyConfig, result: &mut ValidationResult) {
        if apply.parallelism == 0 {
            result.errors.push(ConfigError::validation_field(
                "apply.parallelism",
                "Parallelism must be at least 1",
            ));
        }

        if apply.retry.max_attempts == 0 {
            result.errors.push(ConfigError::validation_field(
                "apply.retry.max_attempts",
                "At least one attempt is required",
            ));
        }

        if apply.retry.base_delay_ms > apply.retry.max_delay_ms {
            result.errors.push(ConfigError::validation_field(
                "apply.retry.base_delay_ms",
                "Base delay cannot exceed max delay",
            ));
        }
    }

    /// Validates every resource and template.
    fn validate_resources(config: &DeployConfig, result: &mut ValidationResult) {
        if config.resources.is_empty() {
            result
                .warnings
                .push(String::from("No resources defined in configuration"));
        }

        let mut seen: BTreeSet<ResourceId> = BTreeSet::new();
        for spec in &config.resources {
            if !seen.insert(spec.id()) {
                result.errors.push(ConfigError::DuplicateResource {
                    resource: spec.id().to_string(),
                });
            }
        }

        let templates = config.template_library();
        for spec in &config.resources {
            result
                .errors
                .extend(validate_resource(spec, &seen, &templates));
        }

        Self::warn_batch_terminators(config, &templates, result);
    }

    /// Warns about templates containing a `GO` batch separator line, which
    /// query engines reject.
    fn warn_batch_terminators(
        config: &DeployConfig,
        templates: &TemplateLibrary,
        result: &mut ValidationResult,
    ) {
        for (name, def) in templates.iter() {
            if def.has_batch_terminator() {
                result.warnings.push(format!(
                    "templates.{name}: contains a 'GO' batch terminator line"
                ));
            }
        }

        for spec in &config.resources {
            for (attr, value) in &spec.attributes {
                if let AttrValue::Template(t) = value
                    && let TemplateSource::Inline(def) = &t.template
                    && def.has_batch_terminator()
                {
                    result.warnings.push(format!(
                        "{}.{attr}: inline template contains a 'GO' batch terminator line",
                        spec.id()
                    ));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;

    fn parse(yaml: &str) -> DeployConfig {
        ConfigParser::new().parse_yaml(yaml, None).unwrap()
    }

    const VALID: &str = r"
project:
  name: dns-analytics
resources:
  - kind: bucket
    name: results
    attributes:
      name: dns-results
  - kind: workgroup
    name: primary
    attributes:
      name: primary
      result_location: { ref: bucket.results.name }
";

    #[test]
    fn test_valid_config() {
        let result = ConfigValidator::new().validate(&parse(VALID)).unwrap();
        assert!(result.is_ok());
    }

    #[test]
    fn test_invalid_project_name() {
        let config = parse("project:\n  name: DNS Analytics\n");
        let result = ConfigValidator::new().check(&config);
        assert!(!result.is_ok());
        assert!(result.errors[0].to_string().contains("project.name"));
    }

    #[test]
    fn test_s3_requires_bucket() {
        let config = parse("project:\n  name: p\nstate:\n  backend: s3\n");
        let result = ConfigValidator::new().check(&config);
        assert!(result.errors.iter().any(|e| e.to_string().contains("state.bucket")));
    }

    #[test]
    fn test_zero_parallelism_rejected() {
        let config = parse("project:\n  name: p\napply:\n  parallelism: 0\n");
        assert!(ConfigValidator::new().validate(&config).is_err());
    }

    #[test]
    fn test_duplicate_resource() {
        let config = parse(
            r"
project:
  name: p
resources:
  - { kind: bucket, name: results, attributes: { name: a } }
  - { kind: bucket, name: results, attributes: { name: b } }
",
        );
        let result = ConfigValidator::new().check(&config);
        assert!(
            result
                .errors
                .iter()
                .any(|e| matches!(e, ConfigError::DuplicateResource { .. }))
        );
    }

    #[test]
    fn test_unknown_reference_target() {
        let config = parse(
            r"
project:
  name: p
resources:
  - kind: workgroup
    name: primary
    attributes:
      name: primary
      result_location: { ref: bucket.missing.name }
",
        );
        let result = ConfigValidator::new().check(&config);
        assert!(result.errors.iter().any(|e| e.to_string().contains("workgroup.primary")));
    }

    #[test]
    fn test_go_terminator_warns() {
        let config = parse(
            r#"
project:
  name: p
templates:
  legacy:
    text: "SELECT 1\nGO\n"
"#,
        );
        let result = ConfigValidator::new().check(&config);
        assert!(result.is_ok());
        assert!(result.warnings.iter().any(|w| w.contains("templates.legacy")));
    }
}
