//! Resource identities, desired-state attribute values and references.
//!
//! A resource is identified by `(kind, logical_name)` and carries a map of
//! attribute values. Values may reference outputs of other resources, name
//! a secret, or render a template; those forms are what produce edges in the
//! dependency graph.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::template::TemplateSource;

/// Kinds of managed resources.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Object storage bucket (query results, scripts, data).
    Bucket,
    /// Catalog database grouping table metadata.
    CatalogDatabase,
    /// Scheduled or triggered ETL job.
    EtlJob,
    /// Saved query bound to a workgroup and database.
    NamedQuery,
    /// Access policy document.
    Policy,
    /// Assumable role.
    Role,
    /// Binding of a policy to a role.
    RolePolicyAttachment,
    /// Opaque script uploaded verbatim to a bucket.
    ScriptArtifact,
    /// Encryption settings bundle for jobs.
    SecurityConfiguration,
    /// Job trigger (schedule, on-demand, conditional).
    Trigger,
    /// Query execution and result isolation context.
    Workgroup,
}

/// All resource kinds, in lexical order.
pub const ALL_KINDS: &[ResourceKind] = &[
    ResourceKind::Bucket,
    ResourceKind::CatalogDatabase,
    ResourceKind::EtlJob,
    ResourceKind::NamedQuery,
    ResourceKind::Policy,
    ResourceKind::Role,
    ResourceKind::RolePolicyAttachment,
    ResourceKind::ScriptArtifact,
    ResourceKind::SecurityConfiguration,
    ResourceKind::Trigger,
    ResourceKind::Workgroup,
];

impl ResourceKind {
    /// Returns the snake_case name used in configuration and state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bucket => "bucket",
            Self::CatalogDatabase => "catalog_database",
            Self::EtlJob => "etl_job",
            Self::NamedQuery => "named_query",
            Self::Policy => "policy",
            Self::Role => "role",
            Self::RolePolicyAttachment => "role_policy_attachment",
            Self::ScriptArtifact => "script_artifact",
            Self::SecurityConfiguration => "security_configuration",
            Self::Trigger => "trigger",
            Self::Workgroup => "workgroup",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL_KINDS
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("Unknown resource kind: {s}"))
    }
}

// Ordering follows the configuration name, not declaration order.
impl PartialOrd for ResourceKind {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ResourceKind {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_str().cmp(other.as_str())
    }
}

/// Identity of a managed resource: `(kind, logical_name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceId {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Logical name, unique per kind.
    pub name: String,
}

impl ResourceId {
    /// Creates a new resource identifier.
    #[must_use]
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    /// Parses `kind.name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not `kind.name` with a known kind.
    pub fn parse(s: &str) -> Result<Self, String> {
        let (kind, name) = s
            .split_once('.')
            .ok_or_else(|| format!("Invalid resource address '{s}'. Expected format: KIND.NAME"))?;
        if name.is_empty() || name.contains('.') {
            return Err(format!("Invalid resource address '{s}'. Expected format: KIND.NAME"));
        }
        Ok(Self::new(kind.parse()?, name))
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.kind, self.name)
    }
}

impl TryFrom<String> for ResourceId {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<ResourceId> for String {
    fn from(id: ResourceId) -> Self {
        id.to_string()
    }
}

/// A typed edge to another resource's output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Reference {
    /// Referenced resource.
    pub target: ResourceId,
    /// Output key on the referenced resource.
    pub output: String,
}

impl Reference {
    /// Creates a new reference.
    #[must_use]
    pub fn new(target: ResourceId, output: impl Into<String>) -> Self {
        Self {
            target,
            output: output.into(),
        }
    }

    /// Parses `kind.name.output`.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is malformed.
    pub fn parse(s: &str) -> Result<Self, String> {
        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() != 3 || parts.iter().any(|p| p.is_empty()) {
            return Err(format!(
                "Invalid reference '{s}'. Expected format: KIND.NAME.OUTPUT"
            ));
        }
        Ok(Self::new(ResourceId::new(parts[0].parse()?, parts[1]), parts[2]))
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.target, self.output)
    }
}

impl TryFrom<String> for Reference {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Reference> for String {
    fn from(r: Reference) -> Self {
        r.to_string()
    }
}

/// `{ ref: kind.name.output }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RefValue {
    /// The reference.
    #[serde(rename = "ref")]
    pub reference: Reference,
}

/// `{ secret: NAME }`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecretRef {
    /// Name of the secret in the secret store.
    pub secret: String,
}

/// `{ template: NAME | { ... }, vars: { ... } }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TemplateValue {
    /// Named or inline template.
    pub template: TemplateSource,
    /// Template variables.
    #[serde(default)]
    pub vars: BTreeMap<String, AttrValue>,
}

/// A desired-state attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    /// Boolean literal.
    Bool(bool),
    /// Numeric literal.
    Number(serde_json::Number),
    /// String literal.
    String(String),
    /// List of values.
    List(Vec<AttrValue>),
    /// Reference to another resource's output.
    Ref(RefValue),
    /// Secret input resolved at apply time.
    Secret(SecretRef),
    /// Rendered template text.
    Template(TemplateValue),
    /// Nested map.
    Map(BTreeMap<String, AttrValue>),
}

impl AttrValue {
    /// Creates a string value.
    #[must_use]
    pub fn string(s: impl Into<String>) -> Self {
        Self::String(s.into())
    }

    /// Creates a reference value from `kind.name.output`.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is malformed.
    pub fn reference(address: &str) -> Result<Self, String> {
        Ok(Self::Ref(RefValue {
            reference: Reference::parse(address)?,
        }))
    }

    /// Collects every reference contained in this value.
    pub fn collect_references(&self, out: &mut BTreeSet<Reference>) {
        match self {
            Self::Ref(r) => {
                out.insert(r.reference.clone());
            }
            Self::List(items) => items.iter().for_each(|v| v.collect_references(out)),
            Self::Map(map) => map.values().for_each(|v| v.collect_references(out)),
            Self::Template(t) => t.vars.values().for_each(|v| v.collect_references(out)),
            Self::Bool(_) | Self::Number(_) | Self::String(_) | Self::Secret(_) => {}
        }
    }

    /// Returns true if a secret appears anywhere in this value.
    #[must_use]
    pub fn contains_secret(&self) -> bool {
        match self {
            Self::Secret(_) => true,
            Self::List(items) => items.iter().any(Self::contains_secret),
            Self::Map(map) => map.values().any(Self::contains_secret),
            Self::Template(t) => t.vars.values().any(Self::contains_secret),
            Self::Bool(_) | Self::Number(_) | Self::String(_) | Self::Ref(_) => false,
        }
    }

    /// Returns the literal string, if this is one.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

/// Desired state of one managed resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceSpec {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Logical name, unique per kind.
    pub name: String,
    /// Attribute values.
    #[serde(default)]
    pub attributes: BTreeMap<String, AttrValue>,
    /// Explicit dependencies in addition to references.
    #[serde(default)]
    pub depends_on: Vec<ResourceId>,
}

impl ResourceSpec {
    /// Creates an empty resource spec.
    #[must_use]
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            attributes: BTreeMap::new(),
            depends_on: Vec::new(),
        }
    }

    /// Adds an attribute.
    #[must_use]
    pub fn with_attr(mut self, key: impl Into<String>, value: AttrValue) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Adds an explicit dependency.
    #[must_use]
    pub fn with_dependency(mut self, id: ResourceId) -> Self {
        self.depends_on.push(id);
        self
    }

    /// Returns the resource identity.
    #[must_use]
    pub fn id(&self) -> ResourceId {
        ResourceId::new(self.kind, self.name.clone())
    }

    /// Returns every reference in this spec's attributes.
    #[must_use]
    pub fn references(&self) -> BTreeSet<Reference> {
        let mut refs = BTreeSet::new();
        for value in self.attributes.values() {
            value.collect_references(&mut refs);
        }
        refs
    }

    /// Returns the resources this spec depends on, via references or `depends_on`.
    #[must_use]
    pub fn dependencies(&self) -> BTreeSet<ResourceId> {
        let mut deps: BTreeSet<ResourceId> =
            self.references().into_iter().map(|r| r.target).collect();
        deps.extend(self.depends_on.iter().cloned());
        deps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_order_is_lexical() {
        let mut kinds = vec![
            ResourceKind::Workgroup,
            ResourceKind::Bucket,
            ResourceKind::RolePolicyAttachment,
            ResourceKind::Role,
        ];
        kinds.sort();
        assert_eq!(
            kinds,
            vec![
                ResourceKind::Bucket,
                ResourceKind::Role,
                ResourceKind::RolePolicyAttachment,
                ResourceKind::Workgroup,
            ]
        );
    }

    #[test]
    fn test_resource_id_parse() {
        let id = ResourceId::parse("catalog_database.dns_events").unwrap();
        assert_eq!(id.kind, ResourceKind::CatalogDatabase);
        assert_eq!(id.name, "dns_events");
        assert_eq!(id.to_string(), "catalog_database.dns_events");

        assert!(ResourceId::parse("spaceship.one").is_err());
        assert!(ResourceId::parse("bucket").is_err());
    }

    #[test]
    fn test_reference_parse() {
        let r = Reference::parse("role.glue_runner.arn").unwrap();
        assert_eq!(r.target, ResourceId::new(ResourceKind::Role, "glue_runner"));
        assert_eq!(r.output, "arn");
        assert!(Reference::parse("role.glue_runner").is_err());
    }

    #[test]
    fn test_attr_value_untagged_yaml() {
        let yaml = r#"
name: results
enabled: true
workers: 2
tags: { team: analytics }
role_arn: { ref: role.glue_runner.arn }
salt: { secret: HASH_SALT }
"#;
        let attrs: BTreeMap<String, AttrValue> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(attrs["name"], AttrValue::string("results"));
        assert_eq!(attrs["enabled"], AttrValue::Bool(true));
        assert!(matches!(attrs["workers"], AttrValue::Number(_)));
        assert!(matches!(attrs["tags"], AttrValue::Map(_)));
        assert!(matches!(attrs["role_arn"], AttrValue::Ref(_)));
        assert!(matches!(attrs["salt"], AttrValue::Secret(_)));
    }

    #[test]
    fn test_dependencies_include_explicit_and_references() {
        let spec = ResourceSpec::new(ResourceKind::EtlJob, "create_csv")
            .with_attr("role_arn", AttrValue::reference("role.glue_runner.arn").unwrap())
            .with_dependency(ResourceId::new(ResourceKind::Bucket, "scripts"));

        let deps = spec.dependencies();
        assert!(deps.contains(&ResourceId::new(ResourceKind::Role, "glue_runner")));
        assert!(deps.contains(&ResourceId::new(ResourceKind::Bucket, "scripts")));
    }
}
