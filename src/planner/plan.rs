//! Plan types and construction.
//!
//! This module defines the structure of plans and builds them by comparing
//! the desired configuration against the recorded state snapshot.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use crate::config::{ConfigHasher, DeployConfig};
use crate::error::Result;
use crate::model::{ResolveContext, ResourceId, ResourceSpec, resolve};
use crate::state::StateSnapshot;

use super::diff::{AttributeChange, diff_attributes, requires_replacement};
use super::graph::DependencyGraph;

/// A complete plan.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Configuration hash this plan is based on. Empty for destroy plans.
    pub config_hash: String,
    /// Every step in execution order, including no-ops.
    pub steps: Vec<PlannedAction>,
}

/// A single planned step.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedAction {
    /// Position in [`Plan::steps`].
    pub index: usize,
    /// What to do.
    pub action: Action,
    /// Target resource.
    pub resource: ResourceId,
    /// Why.
    pub reason: String,
    /// Attribute differences behind an update or replacement.
    pub changes: Vec<AttributeChange>,
    /// Indices of steps that must succeed first.
    pub depends_on: Vec<usize>,
    /// Desired spec for creates and updates.
    #[serde(skip)]
    pub spec: Option<ResourceSpec>,
    /// Provider identifier for updates and deletes.
    pub provider_id: Option<String>,
}

/// Kinds of plan steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Create a resource.
    Create,
    /// Update a resource in place.
    Update,
    /// Delete a resource.
    Delete,
    /// Nothing to do.
    #[serde(rename = "no-op")]
    NoOp,
}

impl Plan {
    /// Steps that do something.
    pub fn actions(&self) -> impl Iterator<Item = &PlannedAction> {
        self.steps.iter().filter(|s| s.action != Action::NoOp)
    }

    /// Returns true if nothing needs to change.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions().next().is_none()
    }

    /// Number of actionable steps.
    #[must_use]
    pub fn action_count(&self) -> usize {
        self.actions().count()
    }

    /// Number of steps of one kind.
    #[must_use]
    pub fn count(&self, action: Action) -> usize {
        self.steps.iter().filter(|s| s.action == action).count()
    }

    /// Gets steps that depend on a specific step index.
    #[must_use]
    pub fn dependent_actions(&self, index: usize) -> Vec<&PlannedAction> {
        self.steps
            .iter()
            .filter(|s| s.depends_on.contains(&index))
            .collect()
    }

    /// Resources with at least one action, in first-action order.
    #[must_use]
    pub fn touched_resources(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.actions()
            .filter(|a| seen.insert(a.resource.clone()))
            .map(|a| a.resource.to_string())
            .collect()
    }

    fn push(&mut self, mut step: PlannedAction) -> usize {
        let index = self.steps.len();
        step.index = index;
        step.depends_on.sort_unstable();
        step.depends_on.dedup();
        self.steps.push(step);
        index
    }
}

impl PlannedAction {
    fn new(action: Action, resource: ResourceId, reason: impl Into<String>) -> Self {
        Self {
            index: 0,
            action,
            resource,
            reason: reason.into(),
            changes: Vec::new(),
            depends_on: Vec::new(),
            spec: None,
            provider_id: None,
        }
    }

    /// Returns a human-readable description of the step.
    #[must_use]
    pub fn description(&self) -> String {
        match self.action {
            Action::Create => format!("Create {}", self.resource),
            Action::Update => format!("Update {}", self.resource),
            Action::Delete => format!("Delete {}", self.resource),
            Action::NoOp => format!("No change for {}", self.resource),
        }
    }
}

/// Builds plans.
#[derive(Debug, Default, Clone, Copy)]
pub struct Planner {
    hasher: ConfigHasher,
}

impl Planner {
    /// Creates a new planner.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            hasher: ConfigHasher::new(),
        }
    }

    /// Plans the changes that bring `snapshot` to `config`.
    ///
    /// Deletes of resources no longer declared come first, dependents before
    /// their dependencies. Desired resources follow in dependency order.
    ///
    /// # Errors
    ///
    /// Returns an error on a dependency cycle or an unresolvable reference.
    pub fn plan(&self, config: &DeployConfig, snapshot: &StateSnapshot) -> Result<Plan> {
        let order = DependencyGraph::from_specs(&config.resources).topological_order()?;
        let desired: BTreeSet<&ResourceId> = order.iter().collect();

        let mut plan = Plan {
            created_at: Utc::now(),
            config_hash: self.hasher.hash_config(config),
            steps: Vec::new(),
        };
        let mut last_action: BTreeMap<ResourceId, usize> = BTreeMap::new();

        let removed: BTreeSet<ResourceId> = snapshot
            .resources
            .keys()
            .filter(|id| !desired.contains(id))
            .cloned()
            .collect();
        Self::plan_deletes(&mut plan, snapshot, &removed, "removed from configuration", &mut last_action)?;

        let outputs = snapshot.outputs();
        let templates = config.template_library();
        let mut pending: BTreeSet<ResourceId> = BTreeSet::new();
        let mut updating: BTreeSet<ResourceId> = BTreeSet::new();

        for id in &order {
            let Some(spec) = config.resource(id) else {
                continue;
            };
            let ctx = ResolveContext {
                outputs: &outputs,
                pending: &pending,
                updating: &updating,
                templates: &templates,
            };
            let resolved = resolve(spec, &ctx)?;

            let deps: Vec<usize> = spec
                .dependencies()
                .iter()
                .filter_map(|d| last_action.get(d).copied())
                .collect();

            let Some(recorded) = snapshot.get(id) else {
                debug!("{id}: not in state");
                let mut create = PlannedAction::new(Action::Create, id.clone(), "not in state");
                create.depends_on = deps;
                create.spec = Some(spec.clone());
                last_action.insert(id.clone(), plan.push(create));
                pending.insert(id.clone());
                continue;
            };

            let changes = diff_attributes(id.kind, &recorded.attributes, &resolved);
            let replace_reason = if recorded.is_tainted() {
                Some(String::from("tainted by a previous partial failure"))
            } else if requires_replacement(&changes) {
                let keys: Vec<&str> = changes
                    .iter()
                    .filter(|c| c.forces_replacement)
                    .map(|c| c.key.as_str())
                    .collect();
                Some(format!("{} forces replacement", keys.join(", ")))
            } else {
                None
            };

            if let Some(reason) = replace_reason {
                debug!("{id}: replace ({reason})");
                let mut delete = PlannedAction::new(Action::Delete, id.clone(), reason.clone());
                delete.provider_id = Some(recorded.provider_id.clone());
                delete.changes.clone_from(&changes);
                let delete_index = plan.push(delete);

                let mut create = PlannedAction::new(Action::Create, id.clone(), reason);
                create.depends_on = deps;
                create.depends_on.push(delete_index);
                create.changes = changes;
                create.spec = Some(spec.clone());
                last_action.insert(id.clone(), plan.push(create));
                pending.insert(id.clone());
                continue;
            }

            let mut recorded_deps = recorded.depends_on.clone();
            recorded_deps.sort();
            let desired_deps: Vec<ResourceId> = spec.dependencies().into_iter().collect();

            let reason = if changes.is_empty() {
                (recorded_deps != desired_deps).then(|| String::from("dependencies changed"))
            } else {
                let keys: Vec<&str> = changes.iter().map(|c| c.key.as_str()).collect();
                Some(format!("{} changed", keys.join(", ")))
            };

            let Some(reason) = reason else {
                plan.push(PlannedAction::new(Action::NoOp, id.clone(), "up to date"));
                continue;
            };

            let mut update = PlannedAction::new(Action::Update, id.clone(), reason);
            update.changes = changes;
            update.depends_on = deps;
            update.spec = Some(spec.clone());
            update.provider_id = Some(recorded.provider_id.clone());
            last_action.insert(id.clone(), plan.push(update));
            updating.insert(id.clone());
        }

        info!(
            "Plan: {} to create, {} to update, {} to delete, {} unchanged",
            plan.count(Action::Create),
            plan.count(Action::Update),
            plan.count(Action::Delete),
            plan.count(Action::NoOp)
        );
        Ok(plan)
    }

    /// Plans deletion of every recorded resource.
    ///
    /// # Errors
    ///
    /// Returns an error if recorded dependencies form a cycle.
    pub fn plan_destroy(&self, snapshot: &StateSnapshot) -> Result<Plan> {
        let mut plan = Plan {
            created_at: Utc::now(),
            config_hash: String::new(),
            steps: Vec::new(),
        };
        let all: BTreeSet<ResourceId> = snapshot.resources.keys().cloned().collect();
        let mut last_action = BTreeMap::new();
        Self::plan_deletes(&mut plan, snapshot, &all, "destroy requested", &mut last_action)?;

        info!("Destroy plan: {} to delete", plan.count(Action::Delete));
        Ok(plan)
    }

    /// Appends deletes for `targets`, dependents first. Each delete waits for
    /// the deletes of its recorded dependents.
    fn plan_deletes(
        plan: &mut Plan,
        snapshot: &StateSnapshot,
        targets: &BTreeSet<ResourceId>,
        reason: &str,
        last_action: &mut BTreeMap<ResourceId, usize>,
    ) -> Result<()> {
        if targets.is_empty() {
            return Ok(());
        }
        let order = DependencyGraph::from_snapshot(snapshot).reverse_order()?;

        for id in order.iter().filter(|id| targets.contains(id)) {
            let Some(recorded) = snapshot.get(id) else {
                continue;
            };
            let mut delete = PlannedAction::new(Action::Delete, id.clone(), reason);
            delete.provider_id = Some(recorded.provider_id.clone());
            delete.depends_on = snapshot
                .dependents_of(id)
                .filter_map(|d| last_action.get(d).copied())
                .collect();
            last_action.insert(id.clone(), plan.push(delete));
        }
        Ok(())
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::NoOp => "no-op",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for PlannedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.action, self.resource)?;
        if !self.reason.is_empty() {
            write!(f, " ({})", self.reason)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "No changes required");
        }

        writeln!(f, "Plan ({} actions):", self.action_count())?;
        for action in self.actions() {
            writeln!(f, "  {}. {action}", action.index)?;
        }
        Ok(())
    }
}
