//! Schema validation of a single resource spec.

use std::collections::{BTreeMap, BTreeSet};

use super::resource::{AttrValue, ResourceId, ResourceKind, ResourceSpec};
use super::schema::{TRIGGER_TYPES, schema_for};
use crate::error::ConfigError;
use crate::template::TemplateLibrary;

/// Returns true for a valid logical name: lowercase ASCII letters, digits,
/// `_` and `-`, starting with a letter.
#[must_use]
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

/// Validates a resource against its kind's schema.
///
/// `known` holds every resource id in the desired set. All problems are
/// returned; an empty vector means the resource is valid.
#[must_use]
pub fn validate_resource(
    spec: &ResourceSpec,
    known: &BTreeSet<ResourceId>,
    templates: &TemplateLibrary,
) -> Vec<ConfigError> {
    let id = spec.id().to_string();
    let schema = schema_for(spec.kind);
    let mut errors = Vec::new();

    if !is_valid_name(&spec.name) {
        errors.push(ConfigError::validation(
            &id,
            "name",
            "logical names must start with a lowercase letter and contain only a-z, 0-9, '_' or '-'",
        ));
    }

    for attr in schema.required() {
        if !spec.attributes.contains_key(attr.name) {
            errors.push(ConfigError::validation(&id, attr.name, "is required"));
        }
    }

    for (name, value) in &spec.attributes {
        match schema.attribute(name) {
            None => errors.push(ConfigError::validation(&id, name, "unknown attribute")),
            Some(attr) if !attr.shape.accepts(value) => errors.push(ConfigError::validation(
                &id,
                name,
                format!("must be {}", attr.shape.describe()),
            )),
            Some(_) => {}
        }
        check_value(&id, name, value, known, templates, &mut errors);
    }

    for dep in &spec.depends_on {
        if !known.contains(dep) {
            errors.push(ConfigError::validation(
                &id,
                "depends_on",
                format!("depends on unknown resource {dep}"),
            ));
        }
    }

    if spec.kind == ResourceKind::Trigger {
        check_trigger(&id, spec, &mut errors);
    }

    errors
}

/// Keys that introduce a reference, secret or template value.
const MARKER_KEYS: &[&str] = &["ref", "secret", "template"];

/// A map made only of marker keys is a marker that failed to parse, not a
/// literal.
fn malformed_marker(map: &BTreeMap<String, AttrValue>) -> Option<&'static str> {
    let marker = MARKER_KEYS.iter().copied().find(|m| map.contains_key(*m))?;
    map.keys()
        .all(|k| MARKER_KEYS.contains(&k.as_str()) || k == "vars")
        .then_some(marker)
}

fn marker_form(marker: &str) -> &'static str {
    match marker {
        "ref" => "{ ref: kind.name.output }",
        "secret" => "{ secret: NAME }",
        _ => "{ template: NAME, vars: { ... } }",
    }
}

fn check_value(
    id: &str,
    field: &str,
    value: &AttrValue,
    known: &BTreeSet<ResourceId>,
    templates: &TemplateLibrary,
    errors: &mut Vec<ConfigError>,
) {
    match value {
        AttrValue::Ref(r) => {
            let target = &r.reference.target;
            if !known.contains(target) {
                errors.push(ConfigError::validation(
                    id,
                    field,
                    format!("references unknown resource {target}"),
                ));
            } else if !schema_for(target.kind).has_output(&r.reference.output) {
                errors.push(ConfigError::validation(
                    id,
                    field,
                    format!("{} does not declare output '{}'", target.kind, r.reference.output),
                ));
            }
        }
        AttrValue::List(items) => {
            for item in items {
                check_value(id, field, item, known, templates, errors);
            }
        }
        AttrValue::Map(map) => {
            if let Some(marker) = malformed_marker(map) {
                errors.push(ConfigError::validation(
                    id,
                    field,
                    format!("malformed `{marker}` value; expected {}", marker_form(marker)),
                ));
                return;
            }
            for item in map.values() {
                check_value(id, field, item, known, templates, errors);
            }
        }
        AttrValue::Template(t) => {
            match templates.resolve(&t.template) {
                Ok(def) => {
                    for var in def.required_vars() {
                        if !t.vars.contains_key(&var) {
                            errors.push(ConfigError::validation(
                                id,
                                field,
                                format!("template variable '{var}' has no value"),
                            ));
                        }
                    }
                }
                Err(e) => errors.push(ConfigError::validation(id, field, e.to_string())),
            }
            if t.vars.values().any(AttrValue::contains_secret) {
                errors.push(ConfigError::validation(
                    id,
                    field,
                    "secrets cannot be used as template variables",
                ));
            }
            for var in t.vars.values() {
                check_value(id, field, var, known, templates, errors);
            }
        }
        AttrValue::Bool(_) | AttrValue::Number(_) | AttrValue::String(_) | AttrValue::Secret(_) => {}
    }
}

fn check_trigger(id: &str, spec: &ResourceSpec, errors: &mut Vec<ConfigError>) {
    let Some(kind) = spec.attributes.get("type").and_then(AttrValue::as_str) else {
        return;
    };
    if !TRIGGER_TYPES.contains(&kind) {
        errors.push(ConfigError::validation(
            id,
            "type",
            format!("must be one of {}", TRIGGER_TYPES.join(", ")),
        ));
    }
    if kind == "SCHEDULED" && !spec.attributes.contains_key("schedule") {
        errors.push(ConfigError::validation(
            id,
            "schedule",
            "is required for SCHEDULED triggers",
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{TemplateDef, TemplateSource};
    use crate::model::resource::{SecretRef, TemplateValue};

    fn workgroup() -> ResourceSpec {
        ResourceSpec::new(ResourceKind::Workgroup, "primary")
            .with_attr("name", AttrValue::string("primary"))
            .with_attr("result_location", AttrValue::string("s3://results/"))
    }

    fn known(specs: &[&ResourceSpec]) -> BTreeSet<ResourceId> {
        specs.iter().map(|s| s.id()).collect()
    }

    fn fields(errors: &[ConfigError]) -> Vec<String> {
        errors
            .iter()
            .filter_map(|e| match e {
                ConfigError::ValidationError { field, .. } => field.clone(),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_valid_resource() {
        let wg = workgroup();
        assert!(validate_resource(&wg, &known(&[&wg]), &TemplateLibrary::default()).is_empty());
    }

    #[test]
    fn test_missing_and_unknown_attributes() {
        let wg = ResourceSpec::new(ResourceKind::Workgroup, "primary")
            .with_attr("name", AttrValue::string("primary"))
            .with_attr("colour", AttrValue::string("blue"));
        let errors = validate_resource(&wg, &known(&[&wg]), &TemplateLibrary::default());
        let f = fields(&errors);
        assert!(f.contains(&String::from("result_location")));
        assert!(f.contains(&String::from("colour")));
    }

    #[test]
    fn test_wrong_shape() {
        let wg = workgroup().with_attr("enforce_configuration", AttrValue::string("yes"));
        let errors = validate_resource(&wg, &known(&[&wg]), &TemplateLibrary::default());
        assert_eq!(fields(&errors), vec![String::from("enforce_configuration")]);
    }

    #[test]
    fn test_invalid_name() {
        assert!(is_valid_name("dns_events-2"));
        assert!(!is_valid_name("DnsEvents"));
        assert!(!is_valid_name("2dns"));
        assert!(!is_valid_name(""));
    }

    #[test]
    fn test_reference_checks() {
        let bucket = ResourceSpec::new(ResourceKind::Bucket, "results")
            .with_attr("name", AttrValue::string("results"));
        let good = ResourceSpec::new(ResourceKind::Workgroup, "primary")
            .with_attr("name", AttrValue::string("primary"))
            .with_attr("result_location", AttrValue::reference("bucket.results.name").unwrap());
        let set = known(&[&bucket, &good]);
        assert!(validate_resource(&good, &set, &TemplateLibrary::default()).is_empty());

        let bad_output = good
            .clone()
            .with_attr("result_location", AttrValue::reference("bucket.results.location").unwrap());
        assert_eq!(validate_resource(&bad_output, &set, &TemplateLibrary::default()).len(), 1);

        let unknown = good.with_attr("result_location", AttrValue::reference("bucket.other.name").unwrap());
        assert_eq!(validate_resource(&unknown, &set, &TemplateLibrary::default()).len(), 1);
    }

    #[test]
    fn test_scheduled_trigger_requires_schedule() {
        let trigger = ResourceSpec::new(ResourceKind::Trigger, "nightly")
            .with_attr("name", AttrValue::string("nightly"))
            .with_attr("type", AttrValue::string("SCHEDULED"))
            .with_attr("actions", AttrValue::List(vec![]));
        let errors = validate_resource(&trigger, &known(&[&trigger]), &TemplateLibrary::default());
        assert_eq!(fields(&errors), vec![String::from("schedule")]);
    }

    #[test]
    fn test_secret_in_template_vars_rejected() {
        let query = ResourceSpec::new(ResourceKind::NamedQuery, "q")
            .with_attr("name", AttrValue::string("q"))
            .with_attr("workgroup", AttrValue::string("primary"))
            .with_attr("database", AttrValue::string("dns"))
            .with_attr(
                "query",
                AttrValue::Template(TemplateValue {
                    template: TemplateSource::Inline(TemplateDef::Text {
                        text: String::from("SELECT '${salt}'"),
                    }),
                    vars: BTreeMap::from([(
                        String::from("salt"),
                        AttrValue::Secret(SecretRef {
                            secret: String::from("HASH_SALT"),
                        }),
                    )]),
                }),
            );
        let errors = validate_resource(&query, &known(&[&query]), &TemplateLibrary::default());
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("secrets"));
    }

    #[test]
    fn test_malformed_marker_is_not_a_literal_map() {
        let attributes: BTreeMap<String, AttrValue> = serde_yaml::from_str(
            "name: glue-read\ndocument: { ref: role.x }\n",
        )
        .unwrap();
        assert!(matches!(attributes["document"], AttrValue::Map(_)));

        let mut policy = ResourceSpec::new(ResourceKind::Policy, "glue_read");
        policy.attributes = attributes;
        let errors = validate_resource(&policy, &known(&[&policy]), &TemplateLibrary::default());
        assert_eq!(fields(&errors), vec![String::from("document")]);
        assert!(errors[0].to_string().contains("malformed `ref`"));

        let literal = ResourceSpec::new(ResourceKind::Policy, "glue_write")
            .with_attr("name", AttrValue::string("glue-write"))
            .with_attr(
                "document",
                AttrValue::Map(BTreeMap::from([
                    (String::from("ref"), AttrValue::string("x")),
                    (String::from("Version"), AttrValue::string("2012-10-17")),
                ])),
            );
        assert!(validate_resource(&literal, &known(&[&literal]), &TemplateLibrary::default()).is_empty());
    }
}
