//! Hashing for change detection.
//!
//! Hashes are SHA-256 over canonical JSON. Maps are `BTreeMap`s and resources
//! are sorted before hashing, so the same desired state always hashes the
//! same regardless of declaration order.

use serde::Serialize;
use sha2::{Digest, Sha256};

use super::spec::DeployConfig;
use crate::model::{ConcreteAttributes, ResourceSpec};

/// Length of the display form of a hash.
const SHORT_HASH_LEN: usize = 12;

/// Hasher for computing configuration hashes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new configuration hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Hashes the whole desired state.
    #[must_use]
    pub fn hash_config(&self, config: &DeployConfig) -> String {
        let canonical = config.canonical();
        let mut hasher = Sha256::new();

        hasher.update(canonical.project.name.as_bytes());
        hasher.update([0]);
        hasher.update(canonical.project.environment.as_bytes());
        hasher.update([0]);
        hasher.update(Self::canonical_json(&canonical.templates));
        for resource in &canonical.resources {
            hasher.update(self.hash_resource(resource).as_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// Hashes one resource's desired definition.
    #[must_use]
    pub fn hash_resource(&self, resource: &ResourceSpec) -> String {
        let mut deps = resource.depends_on.clone();
        deps.sort();
        let mut hasher = Sha256::new();
        hasher.update(resource.id().to_string().as_bytes());
        hasher.update(Self::canonical_json(&resource.attributes));
        hasher.update(Self::canonical_json(&deps));
        hex::encode(hasher.finalize())
    }

    /// Hashes resolved attributes, as stored in state.
    #[must_use]
    pub fn hash_attributes(&self, attributes: &ConcreteAttributes) -> String {
        Self::hash_bytes(&Self::canonical_json(attributes))
    }

    /// SHA-256 hex digest of raw bytes.
    #[must_use]
    pub fn hash_bytes(bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }

    /// Returns the display prefix of a hash.
    #[must_use]
    pub fn short_hash(hash: &str) -> &str {
        hash.get(..SHORT_HASH_LEN).unwrap_or(hash)
    }

    fn canonical_json<T: Serialize + ?Sized>(value: &T) -> Vec<u8> {
        serde_json::to_vec(value).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AttrValue, ResourceKind};

    fn config(resources: Vec<ResourceSpec>) -> DeployConfig {
        let mut config: DeployConfig = serde_yaml::from_str("project:\n  name: p\n").unwrap();
        config.resources = resources;
        config
    }

    fn bucket(name: &str) -> ResourceSpec {
        ResourceSpec::new(ResourceKind::Bucket, name).with_attr("name", AttrValue::string(name))
    }

    #[test]
    fn test_hash_independent_of_order() {
        let hasher = ConfigHasher::new();
        let a = config(vec![bucket("a"), bucket("b")]);
        let b = config(vec![bucket("b"), bucket("a")]);
        assert_eq!(hasher.hash_config(&a), hasher.hash_config(&b));
    }

    #[test]
    fn test_hash_changes_with_attributes() {
        let hasher = ConfigHasher::new();
        let a = config(vec![bucket("a")]);
        let b = config(vec![bucket("a").with_attr("versioning", AttrValue::Bool(true))]);
        assert_ne!(hasher.hash_config(&a), hasher.hash_config(&b));
    }

    #[test]
    fn test_hash_bytes_is_sha256_hex() {
        assert_eq!(
            ConfigHasher::hash_bytes(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_short_hash() {
        assert_eq!(ConfigHasher::short_hash("0123456789abcdef"), "0123456789ab");
        assert_eq!(ConfigHasher::short_hash("abc"), "abc");
    }
}
