//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use serde::Serialize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{ConfigHasher, DeployConfig, ValidationResult};
use crate::planner::{Action, Outcome, Plan};
use crate::provider::DriftReport;
use crate::reconciler::ApplyOutcome;
use crate::state::{LockInfo, StateSnapshot};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan action row for table display.
#[derive(Tabled)]
struct PlanActionRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

/// Run outcome row for table display.
#[derive(Tabled)]
struct OutcomeRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
}

/// Recorded resource row for table display.
#[derive(Tabled)]
struct ResourceRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Provider ID")]
    provider_id: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Returns true for JSON output.
    #[must_use]
    pub fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    fn json<T: Serialize>(value: &T) -> String {
        serde_json::to_string_pretty(value).unwrap_or_default()
    }

    /// Formats a plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &Plan, detailed: bool) -> String {
        match self.format {
            OutputFormat::Json => Self::json(plan),
            OutputFormat::Text => Self::format_plan_text(plan, detailed),
        }
    }

    fn format_plan_text(plan: &Plan, detailed: bool) -> String {
        if plan.is_empty() {
            return format!(
                "{} No changes required - resources match the configuration.\n",
                "✓".green()
            );
        }

        let mut output = String::new();
        let _ = writeln!(output, "\nExecution Plan");
        let _ = writeln!(
            output,
            "   Config hash: {}\n",
            ConfigHasher::short_hash(&plan.config_hash)
        );

        let rows: Vec<PlanActionRow> = plan
            .actions()
            .map(|a| PlanActionRow {
                index: a.index + 1,
                action: Self::format_action(a.action),
                resource: a.resource.to_string(),
                reason: Self::truncate(&a.reason, 48),
            })
            .collect();
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        if detailed {
            output.push_str("\nChanges:\n");
            for action in plan.actions() {
                let _ = writeln!(output, "   {}", action.description());
                if !action.depends_on.is_empty() {
                    let after: Vec<String> =
                        action.depends_on.iter().map(|d| (d + 1).to_string()).collect();
                    let _ = writeln!(output, "     after: #{}", after.join(", #"));
                }
                for change in &action.changes {
                    let _ = writeln!(output, "     {change}");
                }
            }
        }

        let _ = write!(
            output,
            "\nPlan: {} to create, {} to update, {} to delete\n",
            plan.count(Action::Create).to_string().green(),
            plan.count(Action::Update).to_string().yellow(),
            plan.count(Action::Delete).to_string().red()
        );
        output
    }

    /// Formats the outcome of an apply or destroy run.
    #[must_use]
    pub fn format_outcome(&self, outcome: &ApplyOutcome) -> String {
        match self.format {
            OutputFormat::Json => Self::json(outcome),
            OutputFormat::Text => Self::format_outcome_text(outcome),
        }
    }

    fn format_outcome_text(outcome: &ApplyOutcome) -> String {
        let mut output = String::new();
        for id in &outcome.refreshed {
            let _ = writeln!(output, "{} {id} was missing and dropped from state", "⚠".yellow());
        }

        let Some(report) = &outcome.report else {
            if !outcome.confirmed {
                output.push_str("Apply cancelled.\n");
            } else if outcome.plan.is_empty() {
                let _ = writeln!(output, "{} No changes to apply.", "✓".green());
            }
            return output;
        };

        let rows: Vec<OutcomeRow> = report
            .actions
            .iter()
            .map(|a| OutcomeRow {
                index: a.index + 1,
                action: Self::format_action(a.action),
                resource: a.resource.to_string(),
                outcome: Self::truncate(&Self::format_run_outcome(&a.outcome), 60),
            })
            .collect();
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        let status = if report.is_success() {
            format!("{} Apply complete", "✓".green())
        } else {
            format!("{} Apply finished with errors", "✗".red())
        };
        let _ = write!(
            output,
            "\n{status}: {} succeeded, {} failed, {} skipped, {} halted, {} cancelled\n",
            report.succeeded().count(),
            report.failed().count(),
            report.skipped().count(),
            report.halted().count(),
            report.cancelled().count()
        );

        let failures: Vec<_> = report.failed().collect();
        if !failures.is_empty() {
            output.push_str("\nErrors:\n");
            for failure in failures {
                let _ = writeln!(output, "   - {}", failure.outcome);
            }
        }
        output
    }

    /// Formats a drift report.
    #[must_use]
    pub fn format_drift(&self, report: &DriftReport) -> String {
        match self.format {
            OutputFormat::Json => Self::json(report),
            OutputFormat::Text => {
                if report.is_clean() {
                    return format!(
                        "{} No drift detected across {} resources.\n",
                        "✓".green(),
                        report.checked
                    );
                }
                let mut output = format!("{} Drift detected:\n\n", "⚠".yellow());
                for id in &report.missing {
                    let _ = writeln!(output, "   - {id}: {}", "missing".red());
                }
                for drifted in &report.drifted {
                    let _ = writeln!(output, "   - {}:", drifted.id);
                    for diff in &drifted.differences {
                        let _ = writeln!(
                            output,
                            "       {}: recorded {} observed {}",
                            diff.key, diff.recorded, diff.observed
                        );
                    }
                }
                for (id, error) in &report.unreadable {
                    let _ = writeln!(output, "   - {id}: unreadable ({error})");
                }
                let _ = write!(
                    output,
                    "\n{} missing, {} drifted, {} unreadable of {} resources.\n",
                    report.missing.len(),
                    report.drifted.len(),
                    report.unreadable.len(),
                    report.checked
                );
                output
            }
        }
    }

    /// Formats recorded state and the current lock.
    #[must_use]
    pub fn format_state(&self, state: &StateSnapshot, lock: Option<&LockInfo>) -> String {
        match self.format {
            OutputFormat::Json => Self::json(&serde_json::json!({ "state": state, "lock": lock })),
            OutputFormat::Text => {
                let mut output = String::new();
                let _ = write!(output, "\nState: {}/{}\n\n", state.project, state.environment);
                let _ = writeln!(output, "   Version: {}", state.version);
                let _ = writeln!(output, "   Serial: {}", state.serial);
                let _ = writeln!(
                    output,
                    "   Config hash: {}",
                    ConfigHasher::short_hash(&state.config_hash)
                );
                let _ = writeln!(output, "   Last updated: {}", state.last_updated);
                match lock {
                    Some(lock) => {
                        let _ = writeln!(
                            output,
                            "   Lock: {} held by {} ({}s left)",
                            lock.lock_id,
                            lock.holder,
                            lock.remaining_secs()
                        );
                    }
                    None => output.push_str("   Lock: none\n"),
                }

                if !state.resources.is_empty() {
                    output.push('\n');
                    let rows: Vec<ResourceRow> = state
                        .resources
                        .iter()
                        .map(|(id, r)| ResourceRow {
                            resource: id.to_string(),
                            status: if r.is_tainted() {
                                r.status.to_string().red().to_string()
                            } else {
                                r.status.to_string()
                            },
                            provider_id: Self::truncate(&r.provider_id, 32),
                            updated: r.updated_at.format("%Y-%m-%d %H:%M").to_string(),
                        })
                        .collect();
                    output.push_str(&Table::new(rows).to_string());
                    output.push('\n');
                }

                if !state.history.is_empty() {
                    let _ = writeln!(output, "\n   Recent history ({}):", state.history.len());
                    for entry in state.history.iter().rev().take(5) {
                        let status = if entry.success { "✓" } else { "✗" };
                        let _ = writeln!(
                            output,
                            "     {status} {} - {} ({})",
                            entry.timestamp.format("%Y-%m-%d %H:%M"),
                            entry.operation,
                            entry.resources.join(", ")
                        );
                    }
                }
                output
            }
        }
    }

    /// Formats a validation result with a configuration summary.
    #[must_use]
    pub fn format_validation(
        &self,
        config: &DeployConfig,
        result: &ValidationResult,
        show_warnings: bool,
    ) -> String {
        match self.format {
            OutputFormat::Json => {
                let errors: Vec<String> = result.errors.iter().map(ToString::to_string).collect();
                Self::json(&serde_json::json!({
                    "valid": result.is_ok(),
                    "errors": errors,
                    "warnings": result.warnings,
                    "project": config.project.name,
                    "environment": config.project.environment,
                    "resources": config.resources.len(),
                }))
            }
            OutputFormat::Text => {
                let mut output = String::new();
                if result.is_ok() {
                    let _ = writeln!(output, "{} Configuration is valid!", "✓".green());
                } else {
                    let _ = writeln!(output, "{} Configuration is invalid:", "✗".red());
                    for error in &result.errors {
                        let _ = writeln!(output, "   - {error}");
                    }
                }
                if show_warnings && !result.warnings.is_empty() {
                    output.push_str("\nWarnings:\n");
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                }
                output.push_str("\nConfiguration summary:\n");
                let _ = writeln!(output, "   Project: {}", config.project.name);
                let _ = writeln!(output, "   Environment: {}", config.project.environment);
                let _ = writeln!(output, "   Resources: {}", config.resources.len());
                let _ = writeln!(output, "   Templates: {}", config.templates.len());
                output
            }
        }
    }

    /// Formats the configuration hash and artifact content hashes.
    #[must_use]
    pub fn format_hashes(&self, config_hash: &str, artifacts: &[(String, String)]) -> String {
        match self.format {
            OutputFormat::Json => {
                let artifacts: serde_json::Map<String, serde_json::Value> = artifacts
                    .iter()
                    .map(|(id, hash)| (id.clone(), serde_json::Value::String(hash.clone())))
                    .collect();
                Self::json(&serde_json::json!({
                    "config_hash": config_hash,
                    "artifacts": artifacts,
                }))
            }
            OutputFormat::Text => {
                let mut output = format!("config  {config_hash}\n");
                for (id, hash) in artifacts {
                    let _ = writeln!(output, "{id}  {hash}");
                }
                output
            }
        }
    }

    /// Formats a success message.
    #[must_use]
    pub fn success(&self, message: &str) -> String {
        self.message("success", &"✓".green().to_string(), message)
    }

    /// Formats an error message.
    #[must_use]
    pub fn error(&self, message: &str) -> String {
        self.message("error", &"✗".red().to_string(), message)
    }

    /// Formats a warning message.
    #[must_use]
    pub fn warning(&self, message: &str) -> String {
        self.message("warning", &"⚠".yellow().to_string(), message)
    }

    fn message(&self, status: &str, marker: &str, message: &str) -> String {
        match self.format {
            OutputFormat::Json => {
                Self::json(&serde_json::json!({ "status": status, "message": message }))
            }
            OutputFormat::Text => format!("{marker} {message}"),
        }
    }

    /// Formats an action with color.
    fn format_action(action: Action) -> String {
        match action {
            Action::Create => "+create".green().to_string(),
            Action::Update => "~update".yellow().to_string(),
            Action::Delete => "-delete".red().to_string(),
            Action::NoOp => "no-op".dimmed().to_string(),
        }
    }

    /// Formats a run outcome with color.
    fn format_run_outcome(outcome: &Outcome) -> String {
        match outcome {
            Outcome::Succeeded { attempts } if *attempts > 1 => {
                format!("{} ({attempts} attempts)", "succeeded".green())
            }
            Outcome::Succeeded { .. } => "succeeded".green().to_string(),
            Outcome::Failed { .. } => "failed".red().to_string(),
            Outcome::Skipped { .. } => outcome.to_string().yellow().to_string(),
            Outcome::Halted | Outcome::Cancelled => outcome.to_string().dimmed().to_string(),
        }
    }

    /// Truncates a string to at most `max_len` characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{kept}...")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;
    use crate::planner::Planner;

    fn plan() -> Plan {
        let config = ConfigParser::new()
            .parse_yaml(
                "project:\n  name: p\nresources:\n  - kind: bucket\n    name: results\n    attributes:\n      name: r\n",
                None,
            )
            .unwrap();
        Planner::new()
            .plan(&config, &StateSnapshot::new("p", "dev"))
            .unwrap()
    }

    #[test]
    fn test_plan_json_lists_steps() {
        let formatter = OutputFormatter::new(OutputFormat::Json);
        let value: serde_json::Value = serde_json::from_str(&formatter.format_plan(&plan(), false)).unwrap();
        assert_eq!(value["steps"][0]["action"], "create");
        assert_eq!(value["steps"][0]["resource"], "bucket.results");
    }

    #[test]
    fn test_plan_text_summary() {
        colored::control::set_override(false);
        let text = OutputFormatter::new(OutputFormat::Text).format_plan(&plan(), true);
        assert!(text.contains("bucket.results"));
        assert!(text.contains("Plan: 1 to create, 0 to update, 0 to delete"));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(OutputFormatter::truncate("short", 10), "short");
        assert_eq!(OutputFormatter::truncate("ééééééééé", 6), "ééé...");
    }
}
