//! Schema definition and validation.
//!
//! A schema describes the fields of one object type and the capability it is
//! advertised under. Inbound objects are validated against it before they are
//! merged.

use crate::{error::Result, Error, FieldValue, ObjectType, SyncableObject, DELETED_FIELD};
use serde::{Deserialize, Serialize};

/// Field kinds supported in schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Int,
    /// 64-bit integer; also accepts `Int` values
    Long,
    Bool,
}

impl FieldKind {
    fn accepts(&self, value: &FieldValue) -> bool {
        matches!(
            (self, value),
            (FieldKind::String, FieldValue::Str(_))
                | (FieldKind::Int, FieldValue::Int(_))
                | (FieldKind::Long, FieldValue::Long(_) | FieldValue::Int(_))
                | (FieldKind::Bool, FieldValue::Bool(_))
        )
    }
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldKind::String => write!(f, "string"),
            FieldKind::Int => write!(f, "int"),
            FieldKind::Long => write!(f, "long"),
            FieldKind::Bool => write!(f, "bool"),
        }
    }
}

/// Definition of a field in an object type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    /// Field name
    pub name: String,
    /// Field kind
    pub kind: FieldKind,
    /// Whether this field is required
    pub required: bool,
}

impl FieldDef {
    /// Create a new required field definition.
    pub fn required(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
        }
    }

    /// Create a new optional field definition.
    pub fn optional(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
        }
    }

    /// Validate a field value against this definition.
    ///
    /// `Null` counts as absent.
    pub fn validate(&self, value: Option<&FieldValue>) -> Result<()> {
        match value {
            None | Some(FieldValue::Null) if self.required => {
                Err(Error::MissingRequiredField(self.name.clone()))
            }
            None | Some(FieldValue::Null) => Ok(()),
            Some(v) if self.kind.accepts(v) => Ok(()),
            Some(v) => Err(Error::TypeMismatch {
                field: self.name.clone(),
                expected: self.kind.to_string(),
                got: v.kind_name().to_string(),
            }),
        }
    }
}

/// Schema for one object type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaDescriptor {
    /// Object type this schema describes
    pub object_type: ObjectType,
    /// Capability name advertised in handshakes, e.g. `theme_sync`
    pub capability: String,
    /// Capability version; peers exchange this schema only on an exact match
    pub capability_version: String,
    /// Field definitions
    pub fields: Vec<FieldDef>,
}

impl SchemaDescriptor {
    /// Create a new schema descriptor.
    pub fn new(
        object_type: impl Into<ObjectType>,
        capability: impl Into<String>,
        capability_version: impl Into<String>,
        fields: Vec<FieldDef>,
    ) -> Self {
        Self {
            object_type: object_type.into(),
            capability: capability.into(),
            capability_version: capability_version.into(),
            fields,
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Validate an object against this schema.
    ///
    /// Fields the schema does not name are accepted untouched. Tombstones
    /// only need a well-formed identity: required payload fields may be gone.
    pub fn validate(&self, object: &SyncableObject) -> Result<()> {
        if object.object_type != self.object_type {
            return Err(Error::SchemaMismatch {
                expected: self.object_type.clone(),
                actual: object.object_type.clone(),
            });
        }
        object.check()?;

        if let Some(flag) = object.fields.get(DELETED_FIELD) {
            if !flag.is_null() && flag.as_bool().is_none() {
                return Err(Error::TypeMismatch {
                    field: DELETED_FIELD.to_string(),
                    expected: FieldKind::Bool.to_string(),
                    got: flag.kind_name().to_string(),
                });
            }
        }

        let deleted = object.is_deleted();
        for def in &self.fields {
            let value = object.fields.get(&def.name);
            if deleted && value.map_or(true, FieldValue::is_null) {
                continue;
            }
            def.validate(value)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields;

    fn theme_schema() -> SchemaDescriptor {
        SchemaDescriptor::new(
            "theme",
            "theme_sync",
            "1.0",
            vec![
                FieldDef::required("colorScheme", FieldKind::String),
                FieldDef::required("isDarkMode", FieldKind::Bool),
                FieldDef::optional("customPrimary", FieldKind::Long),
            ],
        )
    }

    fn object(fields: crate::FieldMap) -> SyncableObject {
        SyncableObject::new("theme", "t1", fields, 1000)
    }

    #[test]
    fn validate_valid_object() {
        let schema = theme_schema();
        let obj = object(fields! { "colorScheme" => "green", "isDarkMode" => true });
        assert!(schema.validate(&obj).is_ok());
    }

    #[test]
    fn validate_missing_required_field() {
        let schema = theme_schema();
        let obj = object(fields! { "colorScheme" => "green" });
        assert_eq!(
            schema.validate(&obj),
            Err(Error::MissingRequiredField("isDarkMode".into()))
        );
    }

    #[test]
    fn null_required_field_counts_as_missing() {
        let schema = theme_schema();
        let obj = object(fields! {
            "colorScheme" => "green",
            "isDarkMode" => FieldValue::Null,
        });
        assert!(matches!(
            schema.validate(&obj),
            Err(Error::MissingRequiredField(_))
        ));
    }

    #[test]
    fn validate_wrong_kind() {
        let schema = theme_schema();
        let obj = object(fields! { "colorScheme" => "green", "isDarkMode" => "yes" });
        let err = schema.validate(&obj).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { ref field, .. } if field == "isDarkMode"));
    }

    #[test]
    fn long_field_accepts_int() {
        let schema = theme_schema();
        let obj = object(fields! {
            "colorScheme" => "custom",
            "isDarkMode" => false,
            "customPrimary" => 0x00ff00,
        });
        assert!(schema.validate(&obj).is_ok());
    }

    #[test]
    fn unknown_fields_are_allowed() {
        let schema = theme_schema();
        let obj = object(fields! {
            "colorScheme" => "green",
            "isDarkMode" => true,
            "addedInNewerRelease" => 7,
        });
        assert!(schema.validate(&obj).is_ok());
    }

    #[test]
    fn wrong_object_type_is_rejected() {
        let schema = theme_schema();
        let obj = SyncableObject::new("profile", "p1", fields! {}, 1000);
        assert!(matches!(
            schema.validate(&obj),
            Err(Error::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn tombstone_skips_missing_required_fields() {
        let schema = theme_schema();
        let obj = object(fields! { "deleted" => true }).with_revision(4, 2000);
        assert!(schema.validate(&obj).is_ok());

        // Present fields are still checked
        let obj = object(fields! { "deleted" => true, "isDarkMode" => "no" });
        assert!(matches!(
            schema.validate(&obj),
            Err(Error::TypeMismatch { .. })
        ));
    }

    #[test]
    fn deleted_flag_must_be_bool() {
        let schema = theme_schema();
        let obj = object(fields! {
            "colorScheme" => "green",
            "isDarkMode" => true,
            "deleted" => "true",
        });
        assert!(matches!(
            schema.validate(&obj),
            Err(Error::TypeMismatch { ref field, .. }) if field == "deleted"
        ));
    }
}
