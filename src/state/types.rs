//! State snapshot types.
//!
//! The snapshot records, per `(kind, logical_name)`, what pipeform last
//! applied: the provider identifier, the concrete attributes (secrets as
//! markers), the outputs, and the recorded dependencies used to order deletes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::{ConcreteAttributes, Outputs, ResourceId, ResourceKind};

/// Current version of the state format.
pub const STATE_VERSION: &str = "1.0";

/// Number of history entries kept.
pub const MAX_HISTORY: usize = 100;

/// The persisted state of one project/environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// State format version.
    pub version: String,
    /// Project name.
    pub project: String,
    /// Environment name.
    pub environment: String,
    /// Incremented on every save.
    #[serde(default)]
    pub serial: u64,
    /// Hash of the last applied configuration.
    #[serde(default)]
    pub config_hash: String,
    /// Recorded resources.
    #[serde(default)]
    pub resources: BTreeMap<ResourceId, RecordedResource>,
    /// When the state was last updated.
    pub last_updated: DateTime<Utc>,
    /// Recent runs.
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

/// Recorded state of one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedResource {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Logical name.
    pub name: String,
    /// Identifier assigned by the provider.
    pub provider_id: String,
    /// Attributes as last applied.
    #[serde(default)]
    pub attributes: ConcreteAttributes,
    /// Outputs assigned by the provider.
    #[serde(default)]
    pub outputs: Outputs,
    /// Resources this one depended on when applied.
    #[serde(default)]
    pub depends_on: Vec<ResourceId>,
    /// Whether the resource is healthy.
    #[serde(default)]
    pub status: ResourceStatus,
    /// Hash of `attributes`.
    #[serde(default)]
    pub attributes_hash: String,
    /// When the resource was created.
    pub created_at: DateTime<Utc>,
    /// When the resource was last changed.
    pub updated_at: DateTime<Utc>,
}

/// Status of a recorded resource.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    /// Applied successfully.
    #[default]
    Present,
    /// Partially applied; the next plan replaces it.
    Tainted,
}

/// One run in the history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// When the run finished.
    pub timestamp: DateTime<Utc>,
    /// Kind of run.
    pub operation: RunOperation,
    /// Configuration hash used.
    pub config_hash: String,
    /// Resources touched.
    pub resources: Vec<String>,
    /// Whether every action succeeded.
    pub success: bool,
    /// Summary of failures.
    #[serde(default)]
    pub error: Option<String>,
}

/// Kinds of runs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunOperation {
    /// Plan applied.
    Apply,
    /// Everything deleted.
    Destroy,
    /// Missing resources dropped from state.
    Refresh,
}

impl StateSnapshot {
    /// Creates an empty snapshot.
    #[must_use]
    pub fn new(project: &str, environment: &str) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            project: project.to_string(),
            environment: environment.to_string(),
            serial: 0,
            config_hash: String::new(),
            resources: BTreeMap::new(),
            last_updated: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Gets a recorded resource.
    #[must_use]
    pub fn get(&self, id: &ResourceId) -> Option<&RecordedResource> {
        self.resources.get(id)
    }

    /// Records or replaces a resource.
    pub fn record(&mut self, resource: RecordedResource) {
        self.resources.insert(resource.id(), resource);
        self.last_updated = Utc::now();
    }

    /// Removes a resource.
    pub fn remove(&mut self, id: &ResourceId) -> Option<RecordedResource> {
        let removed = self.resources.remove(id);
        if removed.is_some() {
            self.last_updated = Utc::now();
        }
        removed
    }

    /// Outputs of every recorded resource.
    #[must_use]
    pub fn outputs(&self) -> BTreeMap<ResourceId, Outputs> {
        self.resources
            .iter()
            .map(|(id, r)| (id.clone(), r.outputs.clone()))
            .collect()
    }

    /// Recorded resources that depend on `id`.
    pub fn dependents_of<'a>(&'a self, id: &'a ResourceId) -> impl Iterator<Item = &'a ResourceId> + 'a {
        self.resources
            .iter()
            .filter(move |(_, r)| r.depends_on.contains(id))
            .map(|(other, _)| other)
    }

    /// Adds a history entry, keeping the most recent [`MAX_HISTORY`].
    pub fn add_history(&mut self, entry: HistoryEntry) {
        if self.history.len() >= MAX_HISTORY {
            let excess = self.history.len() + 1 - MAX_HISTORY;
            self.history.drain(..excess);
        }
        self.history.push(entry);
    }

    /// Marks the snapshot as about to be saved.
    pub fn bump_serial(&mut self) {
        self.serial += 1;
        self.last_updated = Utc::now();
    }
}

impl RecordedResource {
    /// Creates a record for a freshly applied resource.
    #[must_use]
    pub fn new(id: &ResourceId, provider_id: &str) -> Self {
        let now = Utc::now();
        Self {
            kind: id.kind,
            name: id.name.clone(),
            provider_id: provider_id.to_string(),
            attributes: ConcreteAttributes::new(),
            outputs: Outputs::new(),
            depends_on: Vec::new(),
            status: ResourceStatus::Present,
            attributes_hash: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Resource identity.
    #[must_use]
    pub fn id(&self) -> ResourceId {
        ResourceId::new(self.kind, self.name.clone())
    }

    /// Returns true if the resource must be replaced.
    #[must_use]
    pub fn is_tainted(&self) -> bool {
        self.status == ResourceStatus::Tainted
    }
}

impl HistoryEntry {
    /// Creates a history entry.
    #[must_use]
    pub fn new(
        operation: RunOperation,
        config_hash: &str,
        resources: Vec<String>,
        error: Option<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            config_hash: config_hash.to_string(),
            resources,
            success: error.is_none(),
            error,
        }
    }
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = match self {
            Self::Present => "present",
            Self::Tainted => "tainted",
        };
        write!(f, "{status}")
    }
}

impl std::fmt::Display for RunOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            Self::Apply => "apply",
            Self::Destroy => "destroy",
            Self::Refresh => "refresh",
        };
        write!(f, "{op}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Concrete;

    #[test]
    fn test_snapshot_json_uses_addresses_as_keys() {
        let mut snapshot = StateSnapshot::new("dns-analytics", "dev");
        let id = ResourceId::new(ResourceKind::Bucket, "results");
        let mut recorded = RecordedResource::new(&id, "bucket-results-1");
        recorded
            .attributes
            .insert(String::from("name"), Concrete::String(String::from("results")));
        snapshot.record(recorded);

        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"bucket.results\""));

        let back: StateSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back.get(&id).unwrap().provider_id, "bucket-results-1");
    }

    #[test]
    fn test_history_is_bounded() {
        let mut snapshot = StateSnapshot::new("p", "dev");
        for _ in 0..(MAX_HISTORY + 5) {
            snapshot.add_history(HistoryEntry::new(RunOperation::Apply, "h", vec![], None));
        }
        assert_eq!(snapshot.history.len(), MAX_HISTORY);
    }

    #[test]
    fn test_dependents_of() {
        let mut snapshot = StateSnapshot::new("p", "dev");
        let role = ResourceId::new(ResourceKind::Role, "runner");
        let job = ResourceId::new(ResourceKind::EtlJob, "load");
        snapshot.record(RecordedResource::new(&role, "r-1"));
        let mut recorded = RecordedResource::new(&job, "j-1");
        recorded.depends_on.push(role.clone());
        snapshot.record(recorded);

        let dependents: Vec<_> = snapshot.dependents_of(&role).collect();
        assert_eq!(dependents, vec![&job]);
    }
}
