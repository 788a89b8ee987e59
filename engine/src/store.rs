//! Store - the local object container a replica merges into.
//!
//! The engine only needs three things from a store: load one object, list the
//! objects of a type and write one object. Hosts plug in their own database;
//! [`MemoryStore`] is the reference implementation.

use crate::{error::Result, ObjectId, ObjectKey, ObjectType, StoreSnapshot, SyncableObject};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Storage contract consumed by [`Replica`](crate::Replica).
///
/// Implementations need no merge logic of their own: `save` overwrites
/// unconditionally and the replica decides what reaches it.
pub trait ObjectStore: Send + Sync {
    /// Load the stored object for `key`, tombstones included.
    fn load(&self, key: &ObjectKey) -> Result<Option<SyncableObject>>;

    /// Every stored object of `object_type`, tombstones included.
    fn list(&self, object_type: &str) -> Result<Vec<SyncableObject>>;

    /// Insert or overwrite an object.
    fn save(&self, object: SyncableObject) -> Result<()>;
}

/// In-memory store, ordered by type then id.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: RwLock<BTreeMap<ObjectType, BTreeMap<ObjectId, SyncableObject>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding the contents of a snapshot.
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Result<Self> {
        let store = Self::new();
        store.import_snapshot(snapshot)?;
        Ok(store)
    }

    /// Count of stored objects, tombstones included.
    pub fn len(&self) -> usize {
        self.objects.read().values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy the whole store into a snapshot.
    pub fn export_snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            objects: self.objects.read().clone(),
            ..StoreSnapshot::new()
        }
    }

    /// Replace the store's contents with a validated snapshot.
    pub fn import_snapshot(&self, snapshot: StoreSnapshot) -> Result<()> {
        snapshot.validate(None)?;
        *self.objects.write() = snapshot.objects;
        Ok(())
    }
}

impl ObjectStore for MemoryStore {
    fn load(&self, key: &ObjectKey) -> Result<Option<SyncableObject>> {
        Ok(self
            .objects
            .read()
            .get(&key.object_type)
            .and_then(|by_id| by_id.get(&key.object_id))
            .cloned())
    }

    fn list(&self, object_type: &str) -> Result<Vec<SyncableObject>> {
        Ok(self
            .objects
            .read()
            .get(object_type)
            .map(|by_id| by_id.values().cloned().collect())
            .unwrap_or_default())
    }

    fn save(&self, object: SyncableObject) -> Result<()> {
        self.objects
            .write()
            .entry(object.object_type.clone())
            .or_default()
            .insert(object.object_id.clone(), object);
        Ok(())
    }
}
