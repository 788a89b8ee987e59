//! The unit of synchronization.

use crate::{
    error::Result, Error, FieldMap, FieldValue, ObjectId, ObjectType, Revision, Timestamp,
    Version,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Field that marks an object as a tombstone.
pub const DELETED_FIELD: &str = "deleted";

/// Stable identity of an object across all of its versions.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectKey {
    pub object_type: ObjectType,
    pub object_id: ObjectId,
}

impl ObjectKey {
    pub fn new(object_type: impl Into<ObjectType>, object_id: impl Into<ObjectId>) -> Self {
        Self {
            object_type: object_type.into(),
            object_id: object_id.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.object_type, self.object_id)
    }
}

/// A typed, versioned object exchanged between processes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncableObject {
    /// Schema identifier, fixed per domain
    pub object_type: ObjectType,
    /// Unique within the object type
    pub object_id: ObjectId,
    /// Edit counter, incremented on every propagated local mutation
    pub version: Version,
    /// Wall-clock milliseconds of the last local mutation
    pub last_modified: Timestamp,
    /// Serializable payload
    pub fields: FieldMap,
}

impl SyncableObject {
    /// Create the first revision of an object.
    pub fn new(
        object_type: impl Into<ObjectType>,
        object_id: impl Into<ObjectId>,
        fields: FieldMap,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            object_type: object_type.into(),
            object_id: object_id.into(),
            version: 1,
            last_modified: timestamp,
            fields,
        }
    }

    /// Builder-style override of the revision.
    pub fn with_revision(mut self, version: Version, last_modified: Timestamp) -> Self {
        self.version = version;
        self.last_modified = last_modified;
        self
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.object_type.clone(), self.object_id.clone())
    }

    pub fn revision(&self) -> Revision {
        Revision::new(self.version, self.last_modified)
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    /// A string field that must be present, for typed conversions.
    pub(crate) fn required_str(&self, field: &str) -> Result<String> {
        match self.get(field) {
            Some(FieldValue::Str(s)) => Ok(s.clone()),
            Some(other) => Err(Error::TypeMismatch {
                field: field.to_string(),
                expected: "string".into(),
                got: other.kind_name().into(),
            }),
            None => Err(Error::MissingRequiredField(field.to_string())),
        }
    }

    pub(crate) fn optional_str(&self, field: &str) -> Option<String> {
        self.get(field).and_then(FieldValue::as_str).map(str::to_string)
    }

    /// A bool field, `false` when absent.
    pub(crate) fn flag(&self, field: &str) -> bool {
        self.get(field).and_then(FieldValue::as_bool).unwrap_or(false)
    }

    /// Whether this object is a tombstone.
    pub fn is_deleted(&self) -> bool {
        matches!(self.fields.get(DELETED_FIELD), Some(FieldValue::Bool(true)))
    }

    /// Check structural soundness, independent of any schema.
    pub fn check(&self) -> Result<()> {
        if self.object_type.is_empty() {
            return Err(Error::InvalidObject("empty object type".into()));
        }
        if self.object_id.is_empty() {
            return Err(Error::InvalidObject(format!(
                "empty object id for type {}",
                self.object_type
            )));
        }
        if self.version == 0 {
            return Err(Error::InvalidObject(format!(
                "{} has version 0",
                self.key()
            )));
        }
        Ok(())
    }

    /// The next revision of this object with a replaced payload.
    pub fn revise(&self, fields: FieldMap, timestamp: Timestamp) -> Self {
        let next = self.revision().next(timestamp);
        Self {
            object_type: self.object_type.clone(),
            object_id: self.object_id.clone(),
            version: next.version,
            last_modified: next.last_modified,
            fields,
        }
    }

    /// The next revision of this object, marked deleted.
    ///
    /// The payload is kept so that receivers still see what was removed.
    pub fn tombstone(&self, timestamp: Timestamp) -> Self {
        let mut fields = self.fields.clone();
        fields.insert(DELETED_FIELD.to_string(), FieldValue::Bool(true));
        self.revise(fields, timestamp)
    }
}

/// A rich domain object that degrades to a [`SyncableObject`] for transport.
pub trait Syncable: Sized {
    /// Object type shared by every instance.
    const OBJECT_TYPE: &'static str;

    fn object_id(&self) -> &str;
    fn version(&self) -> Version;
    fn last_modified(&self) -> Timestamp;

    /// Serializable payload of this object.
    fn to_field_map(&self) -> FieldMap;

    /// Rehydrate from a transported object of type [`Self::OBJECT_TYPE`].
    fn from_object(object: &SyncableObject) -> Result<Self>;

    fn to_object(&self) -> SyncableObject {
        SyncableObject {
            object_type: Self::OBJECT_TYPE.to_string(),
            object_id: self.object_id().to_string(),
            version: self.version(),
            last_modified: self.last_modified(),
            fields: self.to_field_map(),
        }
    }
}
