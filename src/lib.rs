// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Pipeform
//!
//! A declarative, idempotent deployment engine for data-pipeline resources.
//!
//! ## Overview
//!
//! Pipeform lets you describe storage buckets, catalog databases, query
//! workgroups, named queries, ETL jobs and their triggers in one YAML file,
//! and converges a provider to match:
//!
//! - Resources reference each other's outputs explicitly, so ordering is derived
//! - SQL templates render with plain substitution and a repeat-and-join primitive
//! - Every run is planned first, then applied along the dependency graph
//! - State records what was applied, so re-running changes nothing
//!
//! ## Architecture
//!
//! 1. **Desired State**: Defined in `pipeform.deploy.yaml`
//! 2. **Recorded State**: The snapshot kept by a [`state::StateStore`]
//! 3. **Planner**: Diffs the two into an ordered [`planner::Plan`]
//! 4. **Executor**: Applies the plan against a [`provider::Provider`]
//!
//! ## Modules
//!
//! - [`config`]: Configuration parsing, validation and hashing
//! - [`model`]: Resource kinds, schemas, references and resolution
//! - [`template`]: SQL/text templating
//! - [`state`]: State storage backends (local, S3, memory)
//! - [`provider`]: Provider API, HTTP client, artifacts and drift observation
//! - [`planner`]: Dependency graph, diff, plan and executor
//! - [`reconciler`]: Lock, plan, apply and history
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! project:
//!   name: dns-analytics
//!   environment: prod
//!
//! resources:
//!   - kind: bucket
//!     name: results
//!     attributes:
//!       name: dns-results
//!   - kind: workgroup
//!     name: primary
//!     attributes:
//!       name: primary
//!       result_location: { ref: bucket.results.name }
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod error;
pub mod model;
pub mod planner;
pub mod provider;
pub mod reconciler;
pub mod state;
pub mod template;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigHasher, ConfigParser, ConfigValidator, DeployConfig};
pub use error::{PipeformError, Result};
pub use planner::{ApplyExecutor, Plan, Planner, RunReport};
pub use provider::{DriftReport, HttpProvider, MemoryProvider, Provider};
pub use reconciler::{ApplyOutcome, ReconcileOptions, Reconciler};
pub use state::{LocalStateStore, S3StateStore, StateSnapshot, StateStore};
