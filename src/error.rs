//! Error types for the pipeform reconciliation engine.
//!
//! This module provides the error hierarchy for every stage of a run:
//! configuration, templating, state management, provider calls, planning,
//! and apply/reconciliation.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// The main error type for pipeform.
#[derive(Debug, Error)]
pub enum PipeformError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Template rendering errors.
    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Provider API errors.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Planning errors.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// Reconciliation errors.
    #[error("Reconciliation error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// A resource or configuration section failed validation.
    #[error("{}", validation_display(.resource.as_deref(), .field.as_deref(), .message))]
    ValidationError {
        /// Resource (`kind.name`) that failed validation, if any.
        resource: Option<String>,
        /// Field that failed validation.
        field: Option<String>,
        /// Description of the validation error.
        message: String,
    },

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },

    /// Duplicate resource definition.
    #[error("Duplicate resource: {resource}")]
    DuplicateResource {
        /// The duplicated `kind.name`.
        resource: String,
    },

    /// Circular dependency detected between resources.
    #[error("Circular dependency detected: {cycle}")]
    CircularDependency {
        /// The cycle, rendered as `a -> b -> a`.
        cycle: String,
        /// The resources on the cycle, in order.
        members: Vec<String>,
    },
}

fn validation_display(resource: Option<&str>, field: Option<&str>, message: &str) -> String {
    match (resource, field) {
        (Some(r), Some(f)) => format!("Validation failed for {r} (field '{f}'): {message}"),
        (Some(r), None) => format!("Validation failed for {r}: {message}"),
        (None, Some(f)) => format!("Validation failed for field '{f}': {message}"),
        (None, None) => format!("Validation failed: {message}"),
    }
}

/// Template rendering errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TemplateError {
    /// A placeholder has no value.
    #[error("Missing template variable: {name}")]
    MissingVariable {
        /// Name of the placeholder.
        name: String,
    },

    /// A repeat template iterates over a variable that is not a list.
    #[error("Template variable '{name}' must be a list")]
    NotAList {
        /// Name of the variable.
        name: String,
    },

    /// A list variable was used where a single value is expected.
    #[error("Template variable '{name}' is a list and cannot be substituted directly")]
    NotAScalar {
        /// Name of the variable.
        name: String,
    },

    /// A named template does not exist.
    #[error("Unknown template: {name}")]
    UnknownTemplate {
        /// Name of the template.
        name: String,
    },
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State file not found.
    #[error("State file not found: {path}")]
    NotFound {
        /// Path to the missing state file.
        path: PathBuf,
    },

    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another process.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// Storage backend error.
    #[error("State backend error: {message}")]
    Backend {
        /// Description of the backend error.
        message: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// State version mismatch.
    #[error("State version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected state version.
        expected: String,
        /// Found state version.
        found: String,
    },
}

/// Provider API errors.
///
/// Variants are split into transient ones, which the executor retries, and
/// permanent ones, which fail the resource immediately.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Rate limited by the provider.
    #[error("Provider rate limited, retry after {retry_after_ms} ms")]
    RateLimited {
        /// Milliseconds to wait before retrying.
        retry_after_ms: u64,
    },

    /// A just-created dependency is not visible yet.
    #[error("Provider not yet consistent: {message}")]
    NotYetConsistent {
        /// Description from the provider.
        message: String,
    },

    /// Network error.
    #[error("Network error communicating with provider: {message}")]
    Network {
        /// Description of the network error.
        message: String,
    },

    /// Provider-side outage.
    #[error("Provider unavailable ({status}): {message}")]
    Unavailable {
        /// HTTP status code.
        status: u16,
        /// Error message from the provider.
        message: String,
    },

    /// The request was rejected as invalid.
    #[error("Provider rejected request: {message}")]
    Rejected {
        /// Error message from the provider.
        message: String,
    },

    /// Caller lacks permission.
    #[error("Permission denied: {message}")]
    PermissionDenied {
        /// Error message from the provider.
        message: String,
    },

    /// The call failed after part of the resource was created.
    #[error("Resource partially applied: {message}")]
    PartiallyApplied {
        /// Error message from the provider.
        message: String,
        /// Outputs the provider assigned before failing.
        outputs: BTreeMap<String, String>,
    },

    /// The resource does not exist.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Resource kind.
        kind: String,
        /// Provider identifier.
        id: String,
    },

    /// Invalid response from the provider.
    #[error("Invalid response from provider: {message}")]
    InvalidResponse {
        /// Description of the response issue.
        message: String,
    },
}

/// Planning errors.
#[derive(Debug, Error)]
pub enum PlanError {
    /// Plan is empty (nothing to do).
    #[error("Plan is empty: no changes required")]
    EmptyPlan,

    /// A resource cannot be resolved into concrete attributes.
    #[error("Cannot resolve {resource}: {message}")]
    Unresolvable {
        /// Resource that failed.
        resource: String,
        /// Description of the problem.
        message: String,
    },
}

/// Reconciliation errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Reconciliation failed for a specific resource.
    #[error("Failed to reconcile {resource}: {reason}")]
    ResourceFailed {
        /// Resource (`kind.name`).
        resource: String,
        /// Reason for failure.
        reason: String,
    },

    /// Maximum retry attempts exceeded.
    #[error("Maximum retry attempts ({attempts}) exceeded for {resource}: {last_error}")]
    MaxRetriesExceeded {
        /// Number of attempts made.
        attempts: u32,
        /// Resource that failed.
        resource: String,
        /// Last transient error.
        last_error: String,
    },

    /// Drift detected.
    #[error("Drift detected for {resource}: {drift_description}")]
    DriftDetected {
        /// Resource with drift.
        resource: String,
        /// Description of the drift.
        drift_description: String,
    },

    /// Reconciliation was aborted.
    #[error("Reconciliation aborted: {reason}")]
    Aborted {
        /// Reason for abort.
        reason: String,
    },

    /// The run was cancelled.
    #[error("Run cancelled")]
    Cancelled,
}

/// Result type alias for pipeform operations.
pub type Result<T> = std::result::Result<T, PipeformError>;

impl PipeformError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Provider(e) => e.is_transient(),
            Self::State(StateError::LockFailed { .. }) => true,
            _ => false,
        }
    }

    /// Returns the suggested retry delay, if applicable.
    #[must_use]
    pub const fn retry_delay(&self) -> Option<Duration> {
        match self {
            Self::Provider(e) => e.retry_delay(),
            Self::State(StateError::LockFailed { .. }) => Some(Duration::from_secs(2)),
            _ => None,
        }
    }
}

impl ConfigError {
    /// Creates a validation error for a resource field.
    #[must_use]
    pub fn validation(
        resource: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::ValidationError {
            resource: Some(resource.into()),
            field: Some(field.into()),
            message: message.into(),
        }
    }

    /// Creates a validation error for a configuration field outside any resource.
    #[must_use]
    pub fn validation_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidationError {
            resource: None,
            field: Some(field.into()),
            message: message.into(),
        }
    }
}

impl StateError {
    /// Creates a backend error with the given message.
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}

impl ProviderError {
    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Creates a rejected-request error.
    #[must_use]
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }

    /// Returns true for errors the executor should retry.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::NotYetConsistent { .. }
                | Self::Network { .. }
                | Self::Unavailable { .. }
        )
    }

    /// Returns the delay the provider asked for, if any.
    #[must_use]
    pub const fn retry_delay(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after_ms } => Some(Duration::from_millis(*retry_after_ms)),
            _ => None,
        }
    }

    /// Returns outputs assigned before a partial failure.
    #[must_use]
    pub const fn partial_outputs(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            Self::PartiallyApplied { outputs, .. } => Some(outputs),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ProviderError::RateLimited { retry_after_ms: 10 }.is_transient());
        assert!(ProviderError::network("reset").is_transient());
        assert!(
            ProviderError::NotYetConsistent {
                message: String::from("role not visible"),
            }
            .is_transient()
        );
        assert!(!ProviderError::rejected("bad name").is_transient());
        assert!(
            !ProviderError::PermissionDenied {
                message: String::from("denied"),
            }
            .is_transient()
        );
    }

    #[test]
    fn test_validation_error_names_resource_and_field() {
        let err = ConfigError::validation("workgroup.primary", "result_location", "is required");
        let text = err.to_string();
        assert!(text.contains("workgroup.primary"));
        assert!(text.contains("result_location"));
    }

    #[test]
    fn test_rate_limit_delay() {
        let err = PipeformError::Provider(ProviderError::RateLimited { retry_after_ms: 1500 });
        assert!(err.is_retryable());
        assert_eq!(err.retry_delay(), Some(Duration::from_millis(1500)));
    }
}
