//! Resolution of desired-state attributes into concrete values.
//!
//! Resolution is pure: references are replaced by outputs already known,
//! references to resources that have not been applied (or are being
//! replaced) stay [`Concrete::Pending`], templates are rendered, and secrets
//! stay as markers until the provider payload is built. A resource updated in
//! place keeps its stable outputs; only outputs its schema marks as changing
//! on update become pending.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::resource::{AttrValue, Reference, ResourceId, ResourceSpec, SecretRef, TemplateValue};
use super::schema::schema_for;
use crate::error::{PipeformError, PlanError, Result};
use crate::provider::secrets::SecretStore;
use crate::template::{TemplateLibrary, TemplateVar, TemplateVars};

/// Provider-assigned outputs of one resource.
pub type Outputs = BTreeMap<String, String>;

/// Resolved attributes of one resource.
pub type ConcreteAttributes = BTreeMap<String, Concrete>;

/// A resolved attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Concrete {
    /// Boolean.
    Bool(bool),
    /// Number.
    Number(serde_json::Number),
    /// Text.
    String(String),
    /// List.
    List(Vec<Concrete>),
    /// Secret marker, materialized only in the provider payload.
    Secret(SecretRef),
    /// Value not known until the referenced resource is applied.
    Pending {
        /// Reference waiting on an output.
        pending: Reference,
    },
    /// Nested map.
    Map(BTreeMap<String, Concrete>),
}

impl Concrete {
    /// Returns the first pending reference inside this value.
    #[must_use]
    pub fn first_pending(&self) -> Option<&Reference> {
        match self {
            Self::Pending { pending } => Some(pending),
            Self::List(items) => items.iter().find_map(Self::first_pending),
            Self::Map(map) => map.values().find_map(Self::first_pending),
            Self::Bool(_) | Self::Number(_) | Self::String(_) | Self::Secret(_) => None,
        }
    }

    /// Returns true if the value contains a pending reference.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.first_pending().is_some()
    }

    /// Converts to JSON, replacing secret markers with their values.
    ///
    /// # Errors
    ///
    /// Fails on a pending value or an unknown secret.
    pub fn to_payload(&self, secrets: &dyn SecretStore) -> Result<serde_json::Value> {
        Ok(match self {
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Number(n) => serde_json::Value::Number(n.clone()),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::List(items) => serde_json::Value::Array(
                items
                    .iter()
                    .map(|v| v.to_payload(secrets))
                    .collect::<Result<Vec<_>>>()?,
            ),
            Self::Map(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| Ok((k.clone(), v.to_payload(secrets)?)))
                    .collect::<Result<serde_json::Map<_, _>>>()?,
            ),
            Self::Secret(secret) => {
                serde_json::Value::String(secrets.get(&secret.secret)?.expose().to_string())
            }
            Self::Pending { pending } => {
                return Err(PipeformError::Plan(PlanError::Unresolvable {
                    resource: pending.target.to_string(),
                    message: format!("output '{pending}' is not known yet"),
                }));
            }
        })
    }

    /// Converts to a JSON value for comparison and display. Secrets stay markers.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    fn as_template_scalar(&self) -> Option<String> {
        match self {
            Self::String(s) => Some(s.clone()),
            Self::Number(n) => Some(n.to_string()),
            Self::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

/// Converts concrete attributes into a provider payload.
///
/// # Errors
///
/// Fails if any attribute is pending or names an unknown secret.
pub fn to_payload(
    attributes: &ConcreteAttributes,
    secrets: &dyn SecretStore,
) -> Result<serde_json::Map<String, serde_json::Value>> {
    attributes
        .iter()
        .map(|(k, v)| Ok((k.clone(), v.to_payload(secrets)?)))
        .collect()
}

/// Returns the first pending reference across all attributes.
#[must_use]
pub fn first_pending(attributes: &ConcreteAttributes) -> Option<&Reference> {
    attributes.values().find_map(Concrete::first_pending)
}

/// Inputs to resolution.
#[derive(Debug, Clone, Copy)]
pub struct ResolveContext<'a> {
    /// Outputs of resources whose outputs are final.
    pub outputs: &'a BTreeMap<ResourceId, Outputs>,
    /// Resources whose outputs will change (being created or replaced).
    pub pending: &'a BTreeSet<ResourceId>,
    /// Resources being updated in place.
    pub updating: &'a BTreeSet<ResourceId>,
    /// Named templates.
    pub templates: &'a TemplateLibrary,
}

/// Resolves a resource spec into concrete attributes.
///
/// # Errors
///
/// Returns an error if an applied resource lacks the referenced output key,
/// or a template fails to render.
pub fn resolve(spec: &ResourceSpec, ctx: &ResolveContext<'_>) -> Result<ConcreteAttributes> {
    spec.attributes
        .iter()
        .map(|(key, value)| Ok((key.clone(), resolve_value(value, ctx)?)))
        .collect::<Result<ConcreteAttributes>>()
        .map_err(|e| match e {
            PipeformError::Template(t) => PipeformError::Plan(PlanError::Unresolvable {
                resource: spec.id().to_string(),
                message: t.to_string(),
            }),
            other => other,
        })
}

fn resolve_value(value: &AttrValue, ctx: &ResolveContext<'_>) -> Result<Concrete> {
    Ok(match value {
        AttrValue::Bool(b) => Concrete::Bool(*b),
        AttrValue::Number(n) => Concrete::Number(n.clone()),
        AttrValue::String(s) => Concrete::String(s.clone()),
        AttrValue::List(items) => Concrete::List(
            items
                .iter()
                .map(|v| resolve_value(v, ctx))
                .collect::<Result<Vec<_>>>()?,
        ),
        AttrValue::Map(map) => Concrete::Map(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), resolve_value(v, ctx)?)))
                .collect::<Result<BTreeMap<_, _>>>()?,
        ),
        AttrValue::Secret(secret) => Concrete::Secret(secret.clone()),
        AttrValue::Ref(r) => resolve_reference(&r.reference, ctx)?,
        AttrValue::Template(t) => render_template(t, ctx)?,
    })
}

fn resolve_reference(reference: &Reference, ctx: &ResolveContext<'_>) -> Result<Concrete> {
    let stale = ctx.updating.contains(&reference.target)
        && schema_for(reference.target.kind).output_changes_on_update(&reference.output);
    if stale || ctx.pending.contains(&reference.target) {
        return Ok(Concrete::Pending {
            pending: reference.clone(),
        });
    }
    match ctx.outputs.get(&reference.target) {
        None => Ok(Concrete::Pending {
            pending: reference.clone(),
        }),
        Some(outputs) => outputs
            .get(&reference.output)
            .map(|v| Concrete::String(v.clone()))
            .ok_or_else(|| {
                PipeformError::Plan(PlanError::Unresolvable {
                    resource: reference.target.to_string(),
                    message: format!("applied resource has no output '{}'", reference.output),
                })
            }),
    }
}

fn render_template(value: &TemplateValue, ctx: &ResolveContext<'_>) -> Result<Concrete> {
    let def = ctx.templates.resolve(&value.template)?;

    let mut vars = TemplateVars::new();
    for (name, raw) in &value.vars {
        let resolved = resolve_value(raw, ctx)?;
        if let Some(pending) = resolved.first_pending() {
            return Ok(Concrete::Pending {
                pending: pending.clone(),
            });
        }
        let var = match &resolved {
            Concrete::List(items) => TemplateVar::List(
                items
                    .iter()
                    .map(|item| item.as_template_scalar().ok_or_else(|| unsupported_var(name)))
                    .collect::<Result<Vec<_>>>()?,
            ),
            other => TemplateVar::Scalar(other.as_template_scalar().ok_or_else(|| unsupported_var(name))?),
        };
        vars.insert(name.clone(), var);
    }

    Ok(Concrete::String(def.render(&vars)?))
}

fn unsupported_var(name: &str) -> PipeformError {
    PipeformError::Plan(PlanError::Unresolvable {
        resource: name.to_string(),
        message: String::from("template variables must be scalars or lists of scalars"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::resource::ResourceKind;
    use crate::provider::secrets::StaticSecretStore;
    use crate::template::{RepeatJoin, TemplateDef, TemplateSource};

    fn role() -> ResourceId {
        ResourceId::new(ResourceKind::Role, "glue_runner")
    }

    fn job() -> ResourceSpec {
        ResourceSpec::new(ResourceKind::EtlJob, "create_csv")
            .with_attr("name", AttrValue::string("create_csv"))
            .with_attr("role_arn", AttrValue::reference("role.glue_runner.arn").unwrap())
    }

    #[test]
    fn test_reference_to_unapplied_is_pending() {
        let outputs = BTreeMap::new();
        let pending = BTreeSet::new();
        let templates = TemplateLibrary::default();
        let ctx = ResolveContext {
            outputs: &outputs,
            pending: &pending,
            updating: &BTreeSet::new(),
            templates: &templates,
        };
        let attrs = resolve(&job(), &ctx).unwrap();
        assert!(attrs["role_arn"].is_pending());
        assert_eq!(attrs["name"], Concrete::String(String::from("create_csv")));
    }

    #[test]
    fn test_reference_to_applied_is_substituted() {
        let mut outputs = BTreeMap::new();
        outputs.insert(
            role(),
            Outputs::from([(String::from("arn"), String::from("arn:role/glue_runner"))]),
        );
        let pending = BTreeSet::new();
        let templates = TemplateLibrary::default();
        let ctx = ResolveContext {
            outputs: &outputs,
            pending: &pending,
            updating: &BTreeSet::new(),
            templates: &templates,
        };
        let attrs = resolve(&job(), &ctx).unwrap();
        assert_eq!(attrs["role_arn"], Concrete::String(String::from("arn:role/glue_runner")));

        // Being replaced hides the recorded output.
        let pending = BTreeSet::from([role()]);
        let ctx = ResolveContext {
            outputs: &outputs,
            pending: &pending,
            updating: &BTreeSet::new(),
            templates: &templates,
        };
        assert!(resolve(&job(), &ctx).unwrap()["role_arn"].is_pending());
    }

    #[test]
    fn test_update_hides_only_changing_outputs() {
        let artifact = ResourceId::new(ResourceKind::ScriptArtifact, "create_csv");
        let outputs = BTreeMap::from([(
            artifact.clone(),
            Outputs::from([
                (String::from("location"), String::from("s3://scripts/create_csv.py")),
                (String::from("content_hash"), String::from("aaa")),
            ]),
        )]);
        let spec = ResourceSpec::new(ResourceKind::EtlJob, "create_csv")
            .with_attr(
                "script_location",
                AttrValue::reference("script_artifact.create_csv.location").unwrap(),
            )
            .with_attr(
                "default_arguments",
                AttrValue::Map(BTreeMap::from([(
                    String::from("--script-hash"),
                    AttrValue::reference("script_artifact.create_csv.content_hash").unwrap(),
                )])),
            );
        let pending = BTreeSet::new();
        let updating = BTreeSet::from([artifact]);
        let templates = TemplateLibrary::default();
        let ctx = ResolveContext {
            outputs: &outputs,
            pending: &pending,
            updating: &updating,
            templates: &templates,
        };
        let attrs = resolve(&spec, &ctx).unwrap();
        assert_eq!(
            attrs["script_location"],
            Concrete::String(String::from("s3://scripts/create_csv.py"))
        );
        assert!(attrs["default_arguments"].is_pending());
    }

    #[test]
    fn test_missing_output_key_is_error() {
        let mut outputs = BTreeMap::new();
        outputs.insert(role(), Outputs::new());
        let pending = BTreeSet::new();
        let templates = TemplateLibrary::default();
        let ctx = ResolveContext {
            outputs: &outputs,
            pending: &pending,
            updating: &BTreeSet::new(),
            templates: &templates,
        };
        assert!(resolve(&job(), &ctx).is_err());
    }

    #[test]
    fn test_template_attribute_renders() {
        let union = TemplateDef::Repeat {
            repeat: RepeatJoin {
                over: String::from("dbs"),
                binding: String::from("db"),
                body: String::from("SELECT * FROM ${db}.dns"),
                separator: String::from(" UNION ALL "),
                header: None,
                footer: None,
            },
        };
        let templates = TemplateLibrary::new(BTreeMap::from([(String::from("union"), union)]));
        let spec = ResourceSpec::new(ResourceKind::NamedQuery, "all_dns").with_attr(
            "query",
            AttrValue::Template(TemplateValue {
                template: TemplateSource::Named(String::from("union")),
                vars: BTreeMap::from([(
                    String::from("dbs"),
                    AttrValue::List(vec![AttrValue::string("a"), AttrValue::string("b")]),
                )]),
            }),
        );
        let outputs = BTreeMap::new();
        let pending = BTreeSet::new();
        let ctx = ResolveContext {
            outputs: &outputs,
            pending: &pending,
            updating: &BTreeSet::new(),
            templates: &templates,
        };
        let attrs = resolve(&spec, &ctx).unwrap();
        assert_eq!(
            attrs["query"],
            Concrete::String(String::from("SELECT * FROM a.dns UNION ALL SELECT * FROM b.dns"))
        );
    }

    #[test]
    fn test_secret_materialized_only_in_payload() {
        let attrs = ConcreteAttributes::from([(
            String::from("salt"),
            Concrete::Secret(SecretRef {
                secret: String::from("HASH_SALT"),
            }),
        )]);
        let stored = serde_json::to_string(&attrs).unwrap();
        assert!(!stored.contains("pepper"));

        let store = StaticSecretStore::new([("HASH_SALT", "pepper")]);
        let payload = to_payload(&attrs, &store).unwrap();
        assert_eq!(payload["salt"], serde_json::json!("pepper"));
    }

    #[test]
    fn test_concrete_state_round_trip_keeps_markers() {
        let value: Concrete = serde_json::from_str(r#"{"secret":"HASH_SALT"}"#).unwrap();
        assert!(matches!(value, Concrete::Secret(_)));
        let value: Concrete = serde_json::from_str(r#"{"team":"analytics"}"#).unwrap();
        assert!(matches!(value, Concrete::Map(_)));
    }
}
