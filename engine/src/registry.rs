//! Registered schemas and capability negotiation.

use crate::{error::Result, Error, ObjectType, SchemaDescriptor, SyncableObject};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Schemas known to one replica, keyed by object type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaRegistry {
    schemas: BTreeMap<ObjectType, SchemaDescriptor>,
}

/// A capability both sides know under different versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityMismatch {
    pub capability: String,
    pub local: String,
    pub remote: String,
}

/// Outcome of comparing local capabilities with a peer's.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Negotiation {
    /// Object types both sides will exchange
    pub agreed: Vec<ObjectType>,
    /// Shared capability names whose versions differ; skipped
    pub version_mismatches: Vec<CapabilityMismatch>,
    /// Local capabilities the peer did not advertise
    pub unsupported: Vec<String>,
}

impl Negotiation {
    pub fn is_empty(&self) -> bool {
        self.agreed.is_empty()
    }

    pub fn allows(&self, object_type: &str) -> bool {
        self.agreed.iter().any(|t| t == object_type)
    }
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding a single schema.
    pub fn with_schema(schema: SchemaDescriptor) -> Self {
        let mut schemas = BTreeMap::new();
        schemas.insert(schema.object_type.clone(), schema);
        Self { schemas }
    }

    /// Register a schema. Each object type may be registered once.
    pub fn register(&mut self, schema: SchemaDescriptor) -> Result<()> {
        if self.schemas.contains_key(&schema.object_type) {
            return Err(Error::DuplicateSchema(schema.object_type));
        }
        self.schemas.insert(schema.object_type.clone(), schema);
        Ok(())
    }

    pub fn get(&self, object_type: &str) -> Option<&SchemaDescriptor> {
        self.schemas.get(object_type)
    }

    pub fn object_types(&self) -> impl Iterator<Item = &ObjectType> {
        self.schemas.keys()
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Capability name to version, as advertised in a handshake.
    pub fn capabilities(&self) -> BTreeMap<String, String> {
        self.schemas
            .values()
            .map(|s| (s.capability.clone(), s.capability_version.clone()))
            .collect()
    }

    /// Validate an object against the schema registered for its type.
    pub fn validate(&self, object: &SyncableObject) -> Result<()> {
        self.get(&object.object_type)
            .ok_or_else(|| Error::UnknownObjectType(object.object_type.clone()))?
            .validate(object)
    }

    /// Intersect local capabilities with a peer's.
    ///
    /// A schema is agreed only when the peer lists its capability under the
    /// same version string.
    pub fn negotiate(&self, remote: &BTreeMap<String, String>) -> Negotiation {
        let mut negotiation = Negotiation::default();
        for schema in self.schemas.values() {
            match remote.get(&schema.capability) {
                Some(version) if *version == schema.capability_version => {
                    negotiation.agreed.push(schema.object_type.clone());
                }
                Some(version) => negotiation.version_mismatches.push(CapabilityMismatch {
                    capability: schema.capability.clone(),
                    local: schema.capability_version.clone(),
                    remote: version.clone(),
                }),
                None => negotiation.unsupported.push(schema.capability.clone()),
            }
        }
        negotiation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{fields, FieldDef, FieldKind};

    fn schema(object_type: &str, capability: &str, version: &str) -> SchemaDescriptor {
        SchemaDescriptor::new(
            object_type,
            capability,
            version,
            vec![FieldDef::required("name", FieldKind::String)],
        )
    }

    fn caps(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn register_rejects_duplicates() {
        let mut registry = SchemaRegistry::new();
        registry.register(schema("theme", "theme_sync", "1.0")).unwrap();
        assert_eq!(
            registry.register(schema("theme", "theme_sync", "2.0")),
            Err(Error::DuplicateSchema("theme".into()))
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn capabilities_map() {
        let mut registry = SchemaRegistry::new();
        registry.register(schema("theme", "theme_sync", "1.0")).unwrap();
        registry.register(schema("profile", "profile_sync", "1.1")).unwrap();
        assert_eq!(
            registry.capabilities(),
            caps(&[("profile_sync", "1.1"), ("theme_sync", "1.0")])
        );
    }

    #[test]
    fn negotiate_requires_equal_versions() {
        let mut registry = SchemaRegistry::new();
        registry.register(schema("theme", "theme_sync", "1.0")).unwrap();
        registry.register(schema("profile", "profile_sync", "1.0")).unwrap();
        registry.register(schema("history", "history_sync", "1.0")).unwrap();

        let result = registry.negotiate(&caps(&[
            ("theme_sync", "1.0"),
            ("profile_sync", "2.0"),
            ("bookmark_sync", "1.0"),
        ]));

        assert_eq!(result.agreed, vec!["theme".to_string()]);
        assert!(result.allows("theme"));
        assert!(!result.allows("profile"));
        assert_eq!(
            result.version_mismatches,
            vec![CapabilityMismatch {
                capability: "profile_sync".into(),
                local: "1.0".into(),
                remote: "2.0".into(),
            }]
        );
        assert_eq!(result.unsupported, vec!["history_sync".to_string()]);
    }

    #[test]
    fn negotiate_with_nothing_in_common_is_empty() {
        let registry = SchemaRegistry::with_schema(schema("theme", "theme_sync", "1.0"));
        assert!(registry.negotiate(&caps(&[("profile_sync", "1.0")])).is_empty());
    }

    #[test]
    fn validate_unknown_type() {
        let registry = SchemaRegistry::with_schema(schema("theme", "theme_sync", "1.0"));
        let obj = SyncableObject::new("profile", "p1", fields! { "name" => "x" }, 1);
        assert_eq!(
            registry.validate(&obj),
            Err(Error::UnknownObjectType("profile".into()))
        );
    }
}
