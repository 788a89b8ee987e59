//! Replica - schema validation and merging on top of an [`ObjectStore`].
//!
//! `apply` is the single place where conflicts are resolved. It is idempotent
//! and serialized per object key, so two sessions delivering versions of the
//! same object cannot lose an update between load and save.

use crate::{
    error::Result, merge, Error, KeepReason, MergeDecision, ObjectKey, ObjectStore, Revision,
    SchemaRegistry, SyncableObject,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

const LOCK_STRIPES: usize = 64;

/// What `apply` did with an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ApplyOutcome {
    /// First version of this object seen here
    Inserted,
    /// Replaced an older version
    Updated { previous: Revision },
    /// Stored version kept
    Unchanged(KeepReason),
}

impl ApplyOutcome {
    /// Whether the store was written.
    pub fn changed(&self) -> bool {
        !matches!(self, ApplyOutcome::Unchanged(_))
    }
}

/// A validated, merge-aware view of a store.
pub struct Replica {
    registry: SchemaRegistry,
    store: Arc<dyn ObjectStore>,
    locks: Box<[Mutex<()>; LOCK_STRIPES]>,
}

impl std::fmt::Debug for Replica {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replica")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl Replica {
    pub fn new(registry: SchemaRegistry, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            registry,
            store,
            locks: Box::new(std::array::from_fn(|_| Mutex::new(()))),
        }
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    fn stripe(&self, key: &ObjectKey) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.locks[(hasher.finish() as usize) % LOCK_STRIPES]
    }

    /// Validate and merge an object into the store.
    ///
    /// Invalid objects are rejected without touching the stored value.
    pub fn apply(&self, object: SyncableObject) -> Result<ApplyOutcome> {
        self.registry.validate(&object)?;
        let key = object.key();
        let _guard = self.stripe(&key).lock();
        self.merge_locked(&key, object)
    }

    /// Derive a new version from the stored one and merge it, atomically with
    /// respect to other writers of the same key.
    ///
    /// `build` sees the stored object (if any) and returns the object to
    /// apply. Returns the applied object alongside the outcome.
    pub fn apply_with<F>(&self, key: &ObjectKey, build: F) -> Result<(SyncableObject, ApplyOutcome)>
    where
        F: FnOnce(Option<&SyncableObject>) -> Result<SyncableObject>,
    {
        let _guard = self.stripe(key).lock();
        let existing = self.store.load(key)?;
        let object = build(existing.as_ref())?;
        if object.key() != *key {
            return Err(Error::InvalidObject(format!(
                "expected {key}, built {}",
                object.key()
            )));
        }
        self.registry.validate(&object)?;
        let outcome = self.decide_and_save(existing.as_ref(), object.clone())?;
        Ok((object, outcome))
    }

    fn merge_locked(&self, key: &ObjectKey, object: SyncableObject) -> Result<ApplyOutcome> {
        let existing = self.store.load(key)?;
        self.decide_and_save(existing.as_ref(), object)
    }

    fn decide_and_save(
        &self,
        existing: Option<&SyncableObject>,
        object: SyncableObject,
    ) -> Result<ApplyOutcome> {
        match merge::decide(existing, &object) {
            MergeDecision::Insert => {
                self.store.save(object)?;
                Ok(ApplyOutcome::Inserted)
            }
            MergeDecision::Replace => {
                let previous = existing.map(SyncableObject::revision).unwrap_or_default();
                self.store.save(object)?;
                Ok(ApplyOutcome::Updated { previous })
            }
            MergeDecision::KeepExisting(reason) => Ok(ApplyOutcome::Unchanged(reason)),
        }
    }

    pub fn get(&self, key: &ObjectKey) -> Result<Option<SyncableObject>> {
        self.store.load(key)
    }

    /// Every stored object of a registered type, ordered by id.
    pub fn snapshot(&self, object_type: &str) -> Result<Vec<SyncableObject>> {
        if self.registry.get(object_type).is_none() {
            return Err(Error::UnknownObjectType(object_type.to_string()));
        }
        let mut objects = self.store.list(object_type)?;
        objects.sort_by(|a, b| a.object_id.cmp(&b.object_id));
        Ok(objects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{fields, FieldDef, FieldKind, MemoryStore, SchemaDescriptor};

    fn replica() -> Replica {
        let registry = SchemaRegistry::with_schema(SchemaDescriptor::new(
            "theme",
            "theme_sync",
            "1.0",
            vec![
                FieldDef::required("colorScheme", FieldKind::String),
                FieldDef::required("isDarkMode", FieldKind::Bool),
            ],
        ));
        Replica::new(registry, Arc::new(MemoryStore::new()))
    }

    fn theme(version: u64, ts: u64, scheme: &str) -> SyncableObject {
        SyncableObject::new(
            "theme",
            "t1",
            fields! { "colorScheme" => scheme, "isDarkMode" => false },
            ts,
        )
        .with_revision(version, ts)
    }

    fn stored(replica: &Replica) -> SyncableObject {
        replica
            .get(&ObjectKey::new("theme", "t1"))
            .unwrap()
            .unwrap()
    }

    #[test]
    fn apply_inserts_then_updates() {
        let replica = replica();
        assert_eq!(replica.apply(theme(1, 100, "green")).unwrap(), ApplyOutcome::Inserted);
        assert_eq!(
            replica.apply(theme(2, 200, "purple")).unwrap(),
            ApplyOutcome::Updated {
                previous: Revision::new(1, 100)
            }
        );
        assert_eq!(stored(&replica).get("colorScheme").unwrap().as_str(), Some("purple"));
    }

    #[test]
    fn apply_is_idempotent() {
        let replica = replica();
        replica.apply(theme(3, 100, "green")).unwrap();
        let outcome = replica.apply(theme(3, 100, "green")).unwrap();
        assert_eq!(outcome, ApplyOutcome::Unchanged(KeepReason::Duplicate));
        assert!(!outcome.changed());
    }

    #[test]
    fn stale_versions_never_regress() {
        let replica = replica();
        replica.apply(theme(5, 100, "green")).unwrap();
        let outcome = replica.apply(theme(4, 999, "purple")).unwrap();
        assert_eq!(outcome, ApplyOutcome::Unchanged(KeepReason::Stale));
        assert_eq!(stored(&replica).version, 5);
    }

    #[test]
    fn invalid_object_keeps_stored_value() {
        let replica = replica();
        replica.apply(theme(1, 100, "green")).unwrap();

        let bad = SyncableObject::new("theme", "t1", fields! { "colorScheme" => "red" }, 200)
            .with_revision(9, 200);
        assert!(matches!(
            replica.apply(bad),
            Err(Error::MissingRequiredField(_))
        ));
        assert_eq!(stored(&replica).version, 1);
    }

    #[test]
    fn unknown_type_is_rejected() {
        let replica = replica();
        let obj = SyncableObject::new("profile", "p1", fields! {}, 1);
        assert!(matches!(
            replica.apply(obj),
            Err(Error::UnknownObjectType(_))
        ));
        assert!(matches!(
            replica.snapshot("profile"),
            Err(Error::UnknownObjectType(_))
        ));
    }

    #[test]
    fn apply_with_derives_from_stored() {
        let replica = replica();
        replica.apply(theme(2, 100, "green")).unwrap();

        let key = ObjectKey::new("theme", "t1");
        let (applied, outcome) = replica
            .apply_with(&key, |existing| {
                let existing = existing.expect("stored");
                Ok(existing.revise(
                    fields! { "colorScheme" => "crimson", "isDarkMode" => true },
                    150,
                ))
            })
            .unwrap();
        assert_eq!(applied.version, 3);
        assert!(outcome.changed());
        assert_eq!(stored(&replica), applied);
    }

    #[test]
    fn apply_with_rejects_key_change() {
        let replica = replica();
        let key = ObjectKey::new("theme", "other");
        let result = replica.apply_with(&key, |_| Ok(theme(1, 1, "green")));
        assert!(matches!(result, Err(Error::InvalidObject(_))));
    }

    #[test]
    fn snapshot_sorted_by_id() {
        let replica = replica();
        for id in ["c", "a", "b"] {
            let mut obj = theme(1, 1, "green");
            obj.object_id = id.into();
            replica.apply(obj).unwrap();
        }
        let ids: Vec<_> = replica
            .snapshot("theme")
            .unwrap()
            .into_iter()
            .map(|o| o.object_id)
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
