//! Resource model: identities, per-kind schemas, validation and resolution.

mod resolve;
mod resource;
mod schema;
mod validate;

pub use resolve::{
    Concrete, ConcreteAttributes, Outputs, ResolveContext, first_pending, resolve, to_payload,
};
pub use resource::{
    ALL_KINDS, AttrValue, RefValue, Reference, ResourceId, ResourceKind, ResourceSpec, SecretRef,
    TemplateValue,
};
pub use schema::{AttrSchema, KindSchema, Shape, TRIGGER_TYPES, schema_for};
pub use validate::{is_valid_name, validate_resource};
