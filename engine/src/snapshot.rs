//! Snapshot types for persisting and restoring store state.
//!
//! Snapshots are the bridge between an in-memory store and whatever the host
//! uses for persistence. They serialize deterministically: the same set of
//! objects always produces byte-identical JSON.

use crate::{
    error::Result, Error, ObjectId, ObjectKey, ObjectType, SchemaRegistry, SchemaVersion,
    SyncableObject,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: SchemaVersion = 1;

/// A point-in-time copy of every stored object, tombstones included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    /// Snapshot format version
    pub format_version: SchemaVersion,
    /// Objects by type, then by id
    pub objects: BTreeMap<ObjectType, BTreeMap<ObjectId, SyncableObject>>,
}

impl Default for StoreSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreSnapshot {
    /// Create a new empty snapshot.
    pub fn new() -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            objects: BTreeMap::new(),
        }
    }

    /// Add an object, replacing any entry with the same key.
    pub fn add(&mut self, object: SyncableObject) {
        self.objects
            .entry(object.object_type.clone())
            .or_default()
            .insert(object.object_id.clone(), object);
    }

    pub fn get(&self, key: &ObjectKey) -> Option<&SyncableObject> {
        self.objects.get(&key.object_type)?.get(&key.object_id)
    }

    /// Iterate over every object in deterministic order.
    pub fn iter(&self) -> impl Iterator<Item = &SyncableObject> {
        self.objects.values().flat_map(|by_id| by_id.values())
    }

    /// Count objects across all types, tombstones included.
    pub fn len(&self) -> usize {
        self.objects.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Count objects that are not tombstones.
    pub fn live_count(&self) -> usize {
        self.iter().filter(|o| !o.is_deleted()).count()
    }

    /// Check internal consistency, and every object against `registry` when
    /// one is given.
    pub fn validate(&self, registry: Option<&SchemaRegistry>) -> Result<()> {
        if self.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(Error::SchemaVersionMismatch {
                expected: SNAPSHOT_FORMAT_VERSION,
                actual: self.format_version,
            });
        }

        for (object_type, by_id) in &self.objects {
            for (object_id, object) in by_id {
                if &object.object_type != object_type || &object.object_id != object_id {
                    return Err(Error::InvalidSnapshot(format!(
                        "entry {object_type}/{object_id} holds {}",
                        object.key()
                    )));
                }
                match registry {
                    Some(registry) => registry.validate(object)?,
                    None => object.check()?,
                }
            }
        }

        Ok(())
    }

    /// Serialize to JSON with deterministic ordering.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Serialize to pretty JSON with deterministic ordering.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                snapshot.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        Ok(snapshot)
    }
}

impl FromIterator<SyncableObject> for StoreSnapshot {
    fn from_iter<I: IntoIterator<Item = SyncableObject>>(iter: I) -> Self {
        let mut snapshot = Self::new();
        for object in iter {
            snapshot.add(object);
        }
        snapshot
    }
}
