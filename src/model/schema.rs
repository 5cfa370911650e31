//! Per-kind attribute schemas.
//!
//! Each kind declares its attributes (with shape, whether required, and
//! whether a change forces replacement) and the output keys the provider
//! assigns once the resource exists.

use super::resource::{AttrValue, ResourceKind};

/// Expected shape of an attribute value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// Text. References, secrets and templates also produce text.
    String,
    /// Numeric literal.
    Number,
    /// Boolean literal.
    Bool,
    /// List of values.
    List,
    /// Nested map.
    Map,
    /// Any value.
    Any,
}

impl Shape {
    /// Returns true if the value is acceptable for this shape.
    #[must_use]
    pub const fn accepts(self, value: &AttrValue) -> bool {
        match self {
            Self::Any => true,
            Self::String => matches!(
                value,
                AttrValue::String(_) | AttrValue::Ref(_) | AttrValue::Secret(_) | AttrValue::Template(_)
            ),
            Self::Number => matches!(value, AttrValue::Number(_) | AttrValue::Ref(_)),
            Self::Bool => matches!(value, AttrValue::Bool(_)),
            Self::List => matches!(value, AttrValue::List(_)),
            Self::Map => matches!(value, AttrValue::Map(_)),
        }
    }

    /// Short name for error messages.
    #[must_use]
    pub const fn describe(self) -> &'static str {
        match self {
            Self::String => "a string",
            Self::Number => "a number",
            Self::Bool => "a boolean",
            Self::List => "a list",
            Self::Map => "a map",
            Self::Any => "any value",
        }
    }
}

/// Schema entry for one attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttrSchema {
    /// Attribute name.
    pub name: &'static str,
    /// Expected shape.
    pub shape: Shape,
    /// Whether the attribute must be present.
    pub required: bool,
    /// Whether changing the attribute requires delete and re-create.
    pub forces_replacement: bool,
}

const fn req(name: &'static str, shape: Shape) -> AttrSchema {
    AttrSchema {
        name,
        shape,
        required: true,
        forces_replacement: false,
    }
}

const fn opt(name: &'static str, shape: Shape) -> AttrSchema {
    AttrSchema {
        name,
        shape,
        required: false,
        forces_replacement: false,
    }
}

const fn replace(attr: AttrSchema) -> AttrSchema {
    AttrSchema {
        forces_replacement: true,
        ..attr
    }
}

/// Schema for one resource kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindSchema {
    /// The kind described.
    pub kind: ResourceKind,
    /// Accepted attributes.
    pub attributes: &'static [AttrSchema],
    /// Output keys assigned by the provider.
    pub outputs: &'static [&'static str],
    /// Output keys an in-place update may change. Every other output is
    /// fixed for the life of the resource.
    pub update_outputs: &'static [&'static str],
}

impl KindSchema {
    /// Looks up an attribute schema.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&AttrSchema> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Iterates over required attributes.
    pub fn required(&self) -> impl Iterator<Item = &AttrSchema> {
        self.attributes.iter().filter(|a| a.required)
    }

    /// Returns true if a change to `name` forces replacement.
    #[must_use]
    pub fn forces_replacement(&self, name: &str) -> bool {
        self.attribute(name).is_some_and(|a| a.forces_replacement)
    }

    /// Returns true if the kind declares the output key.
    #[must_use]
    pub fn has_output(&self, key: &str) -> bool {
        self.outputs.contains(&key)
    }

    /// Returns true if an in-place update may assign a new value to `key`.
    #[must_use]
    pub fn output_changes_on_update(&self, key: &str) -> bool {
        self.update_outputs.contains(&key)
    }
}

const NAMED_OUTPUTS: &[&str] = &["id", "arn", "name"];

static WORKGROUP: KindSchema = KindSchema {
    kind: ResourceKind::Workgroup,
    attributes: &[
        replace(req("name", Shape::String)),
        req("result_location", Shape::String),
        opt("encryption", Shape::Any),
        opt("enforce_configuration", Shape::Bool),
        opt("bytes_scanned_cutoff", Shape::Number),
        opt("state", Shape::String),
        opt("tags", Shape::Map),
        opt("description", Shape::String),
    ],
    outputs: NAMED_OUTPUTS,
    update_outputs: &[],
};

static CATALOG_DATABASE: KindSchema = KindSchema {
    kind: ResourceKind::CatalogDatabase,
    attributes: &[
        replace(req("name", Shape::String)),
        opt("description", Shape::String),
        opt("location_uri", Shape::String),
        opt("parameters", Shape::Map),
    ],
    outputs: NAMED_OUTPUTS,
    update_outputs: &[],
};

static NAMED_QUERY: KindSchema = KindSchema {
    kind: ResourceKind::NamedQuery,
    attributes: &[
        replace(req("name", Shape::String)),
        replace(req("workgroup", Shape::String)),
        replace(req("database", Shape::String)),
        replace(req("query", Shape::String)),
        replace(opt("description", Shape::String)),
    ],
    outputs: &["id"],
    update_outputs: &[],
};

static ETL_JOB: KindSchema = KindSchema {
    kind: ResourceKind::EtlJob,
    attributes: &[
        replace(req("name", Shape::String)),
        req("role_arn", Shape::String),
        req("script_location", Shape::String),
        opt("security_configuration", Shape::String),
        opt("default_arguments", Shape::Map),
        opt("glue_version", Shape::String),
        opt("worker_type", Shape::String),
        opt("number_of_workers", Shape::Number),
        opt("max_capacity", Shape::Number),
        opt("timeout", Shape::Number),
        opt("max_retries", Shape::Number),
        opt("command_name", Shape::String),
        opt("python_version", Shape::String),
        opt("tags", Shape::Map),
        opt("description", Shape::String),
    ],
    outputs: NAMED_OUTPUTS,
    update_outputs: &[],
};

static TRIGGER: KindSchema = KindSchema {
    kind: ResourceKind::Trigger,
    attributes: &[
        replace(req("name", Shape::String)),
        replace(req("type", Shape::String)),
        req("actions", Shape::List),
        opt("schedule", Shape::String),
        opt("enabled", Shape::Bool),
        opt("description", Shape::String),
        opt("predicate", Shape::Map),
    ],
    outputs: NAMED_OUTPUTS,
    update_outputs: &[],
};

static BUCKET: KindSchema = KindSchema {
    kind: ResourceKind::Bucket,
    attributes: &[
        replace(req("name", Shape::String)),
        opt("versioning", Shape::Bool),
        opt("encryption", Shape::Any),
        opt("lifecycle_rules", Shape::List),
        opt("force_destroy", Shape::Bool),
        opt("tags", Shape::Map),
    ],
    outputs: NAMED_OUTPUTS,
    update_outputs: &[],
};

static SCRIPT_ARTIFACT: KindSchema = KindSchema {
    kind: ResourceKind::ScriptArtifact,
    attributes: &[
        replace(req("bucket", Shape::String)),
        replace(req("key", Shape::String)),
        req("source", Shape::String),
        opt("content_type", Shape::String),
        opt("content_hash", Shape::String),
    ],
    outputs: &["id", "location", "content_hash"],
    update_outputs: &["content_hash"],
};

static POLICY: KindSchema = KindSchema {
    kind: ResourceKind::Policy,
    attributes: &[
        replace(req("name", Shape::String)),
        req("document", Shape::Any),
        opt("description", Shape::String),
        replace(opt("path", Shape::String)),
    ],
    outputs: NAMED_OUTPUTS,
    update_outputs: &[],
};

static ROLE: KindSchema = KindSchema {
    kind: ResourceKind::Role,
    attributes: &[
        replace(req("name", Shape::String)),
        req("assume_role_policy", Shape::Any),
        opt("description", Shape::String),
        replace(opt("path", Shape::String)),
        opt("max_session_duration", Shape::Number),
        opt("tags", Shape::Map),
    ],
    outputs: NAMED_OUTPUTS,
    update_outputs: &[],
};

static ROLE_POLICY_ATTACHMENT: KindSchema = KindSchema {
    kind: ResourceKind::RolePolicyAttachment,
    attributes: &[
        replace(req("role", Shape::String)),
        replace(req("policy_arn", Shape::String)),
    ],
    outputs: &["id"],
    update_outputs: &[],
};

static SECURITY_CONFIGURATION: KindSchema = KindSchema {
    kind: ResourceKind::SecurityConfiguration,
    attributes: &[
        replace(req("name", Shape::String)),
        replace(req("s3_encryption", Shape::Any)),
        replace(opt("cloudwatch_encryption", Shape::Any)),
        replace(opt("job_bookmarks_encryption", Shape::Any)),
    ],
    outputs: &["id", "name"],
    update_outputs: &[],
};

/// Trigger types accepted by the `type` attribute.
pub const TRIGGER_TYPES: &[&str] = &["SCHEDULED", "ON_DEMAND", "CONDITIONAL"];

/// Returns the schema for a kind.
#[must_use]
pub fn schema_for(kind: ResourceKind) -> &'static KindSchema {
    match kind {
        ResourceKind::Bucket => &BUCKET,
        ResourceKind::CatalogDatabase => &CATALOG_DATABASE,
        ResourceKind::EtlJob => &ETL_JOB,
        ResourceKind::NamedQuery => &NAMED_QUERY,
        ResourceKind::Policy => &POLICY,
        ResourceKind::Role => &ROLE,
        ResourceKind::RolePolicyAttachment => &ROLE_POLICY_ATTACHMENT,
        ResourceKind::ScriptArtifact => &SCRIPT_ARTIFACT,
        ResourceKind::SecurityConfiguration => &SECURITY_CONFIGURATION,
        ResourceKind::Trigger => &TRIGGER,
        ResourceKind::Workgroup => &WORKGROUP,
    }
}
