//! Attribute diff between recorded and desired resources.
//!
//! This module compares the concrete attributes recorded in state with the
//! freshly resolved desired attributes and classifies each difference.

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

use crate::model::{Concrete, ConcreteAttributes, ResourceKind, schema_for};

/// A single attribute difference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttributeChange {
    /// Attribute key.
    pub key: String,
    /// Recorded value, if any.
    pub old: Option<Concrete>,
    /// Desired value, if any.
    pub new: Option<Concrete>,
    /// Whether this change requires Delete then Create.
    pub forces_replacement: bool,
}

/// Computes attribute differences, sorted by key.
///
/// A pending desired value always counts as a change, since its final value
/// is not known until apply.
#[must_use]
pub fn diff_attributes(
    kind: ResourceKind,
    recorded: &ConcreteAttributes,
    desired: &ConcreteAttributes,
) -> Vec<AttributeChange> {
    let schema = schema_for(kind);
    let keys: BTreeSet<&String> = recorded.keys().chain(desired.keys()).collect();

    keys.into_iter()
        .filter_map(|key| {
            let old = recorded.get(key);
            let new = desired.get(key);
            let pending = new.is_some_and(Concrete::is_pending);
            (old != new || pending).then(|| AttributeChange {
                key: key.clone(),
                old: old.cloned(),
                new: new.cloned(),
                forces_replacement: schema.forces_replacement(key),
            })
        })
        .collect()
}

/// Returns true if any change forces replacement.
#[must_use]
pub fn requires_replacement(changes: &[AttributeChange]) -> bool {
    changes.iter().any(|c| c.forces_replacement)
}

/// Display form of a concrete value. Secrets are never shown.
#[must_use]
pub fn display_value(value: Option<&Concrete>) -> String {
    match value {
        None => String::from("(none)"),
        Some(Concrete::Pending { pending }) => format!("(known after apply: {pending})"),
        Some(Concrete::Secret(s)) => format!("(secret {})", s.secret),
        Some(Concrete::String(s)) => format!("{s:?}"),
        Some(other) => other.to_json().to_string(),
    }
}

impl fmt::Display for AttributeChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} -> {}",
            self.key,
            display_value(self.old.as_ref()),
            display_value(self.new.as_ref())
        )?;
        if self.forces_replacement {
            write!(f, " (forces replacement)")?;
        }
        Ok(())
    }
}
