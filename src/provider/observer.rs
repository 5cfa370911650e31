//! Resource observer for drift detection.
//!
//! Reads every recorded resource back from the provider and compares what
//! the provider reports against what was recorded at apply time.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::ProviderError;
use crate::model::{Concrete, ResourceId};
use crate::state::{RecordedResource, StateSnapshot};

use super::types::{Payload, Provider};

/// What the provider reported for one resource.
#[derive(Debug, Clone, PartialEq)]
pub enum ObservedState {
    /// The resource exists with these attributes.
    Present(Payload),
    /// The provider does not know the resource.
    Missing,
    /// The resource could not be read.
    Unknown(String),
}

/// Observation of one recorded resource.
#[derive(Debug, Clone)]
pub struct Observation {
    /// Resource identity.
    pub id: ResourceId,
    /// Provider identifier from state.
    pub provider_id: String,
    /// Observed state.
    pub state: ObservedState,
}

/// One attribute whose observed value differs from the recorded one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeDrift {
    /// Attribute key.
    pub key: String,
    /// Value recorded in state.
    pub recorded: serde_json::Value,
    /// Value the provider reported, `null` when absent.
    pub observed: serde_json::Value,
}

/// A resource whose attributes drifted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriftedResource {
    /// Resource identity.
    pub id: ResourceId,
    /// Differing attributes.
    pub differences: Vec<AttributeDrift>,
}

/// Result of a drift check.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DriftReport {
    /// Number of resources checked.
    pub checked: usize,
    /// Recorded resources the provider no longer has.
    pub missing: Vec<ResourceId>,
    /// Resources whose attributes changed outside pipeform.
    pub drifted: Vec<DriftedResource>,
    /// Resources that could not be read, with the error.
    pub unreadable: Vec<(ResourceId, String)>,
}

impl DriftReport {
    /// Returns true if nothing drifted and everything was readable.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.drifted.is_empty() && self.unreadable.is_empty()
    }
}

/// Observer for recorded resources.
#[derive(Debug, Clone)]
pub struct ResourceObserver {
    provider: Arc<dyn Provider>,
}

impl ResourceObserver {
    /// Creates a new observer.
    #[must_use]
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self { provider }
    }

    /// Reads every recorded resource, in id order.
    pub async fn observe(&self, snapshot: &StateSnapshot) -> Vec<Observation> {
        info!("Observing {} recorded resources", snapshot.resources.len());
        let mut observations = Vec::with_capacity(snapshot.resources.len());

        for (id, recorded) in &snapshot.resources {
            let state = match self.provider.get(id, &recorded.provider_id).await {
                Ok(attributes) => ObservedState::Present(attributes),
                Err(ProviderError::NotFound { .. }) => {
                    debug!("{id} ({}) not found", recorded.provider_id);
                    ObservedState::Missing
                }
                Err(e) => {
                    warn!("Failed to read {id}: {e}");
                    ObservedState::Unknown(e.to_string())
                }
            };
            observations.push(Observation {
                id: id.clone(),
                provider_id: recorded.provider_id.clone(),
                state,
            });
        }

        observations
    }

    /// Observes and compares every recorded resource.
    pub async fn check_drift(&self, snapshot: &StateSnapshot) -> DriftReport {
        let observations = self.observe(snapshot).await;
        let mut report = DriftReport {
            checked: observations.len(),
            ..DriftReport::default()
        };

        for observation in observations {
            match observation.state {
                ObservedState::Missing => report.missing.push(observation.id),
                ObservedState::Unknown(e) => report.unreadable.push((observation.id, e)),
                ObservedState::Present(observed) => {
                    let Some(recorded) = snapshot.get(&observation.id) else {
                        continue;
                    };
                    let differences = compare(recorded, &observed);
                    if !differences.is_empty() {
                        report.drifted.push(DriftedResource {
                            id: observation.id,
                            differences,
                        });
                    }
                }
            }
        }

        report
    }
}

/// Compares recorded attributes with observed ones. Secret attributes are
/// skipped since state only holds markers.
#[must_use]
pub fn compare(recorded: &RecordedResource, observed: &Payload) -> Vec<AttributeDrift> {
    recorded
        .attributes
        .iter()
        .filter(|(_, value)| !contains_secret(value))
        .filter_map(|(key, value)| {
            let recorded = value.to_json();
            let observed = observed.get(key).cloned().unwrap_or(serde_json::Value::Null);
            (recorded != observed).then(|| AttributeDrift {
                key: key.clone(),
                recorded,
                observed,
            })
        })
        .collect()
}

fn contains_secret(value: &Concrete) -> bool {
    match value {
        Concrete::Secret(_) => true,
        Concrete::List(items) => items.iter().any(contains_secret),
        Concrete::Map(map) => map.values().any(contains_secret),
        Concrete::Bool(_) | Concrete::Number(_) | Concrete::String(_) | Concrete::Pending { .. } => {
            false
        }
    }
}
