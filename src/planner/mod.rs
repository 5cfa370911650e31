//! Planning and execution.
//!
//! This module compares desired resources with recorded state, orders the
//! resulting actions by dependency, and executes them against a provider.

mod diff;
mod executor;
mod graph;
mod plan;

pub use diff::{AttributeChange, diff_attributes, display_value, requires_replacement};
pub use executor::{ActionReport, ApplyExecutor, ApplyOptions, CancelToken, Outcome, RunReport};
pub use graph::DependencyGraph;
pub use plan::{Action, Plan, PlannedAction, Planner};
