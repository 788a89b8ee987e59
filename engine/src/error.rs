//! Error types for the loopsync engine.

use crate::{ObjectType, SchemaVersion};
use thiserror::Error;

/// All possible errors from the loopsync engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Registry errors
    #[error("unknown object type: {0}")]
    UnknownObjectType(ObjectType),

    #[error("schema already registered for object type: {0}")]
    DuplicateSchema(ObjectType),

    #[error("object type mismatch: expected {expected}, got {actual}")]
    SchemaMismatch {
        expected: ObjectType,
        actual: ObjectType,
    },

    // Validation errors
    #[error("missing required field: {0}")]
    MissingRequiredField(String),

    #[error("type mismatch for field '{field}': expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: String,
        got: String,
    },

    #[error("invalid object: {0}")]
    InvalidObject(String),

    // Store errors
    #[error("store error: {0}")]
    Store(String),

    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("snapshot format version mismatch: expected {expected}, got {actual}")]
    SchemaVersionMismatch {
        expected: SchemaVersion,
        actual: SchemaVersion,
    },
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::UnknownObjectType("theme".into());
        assert_eq!(err.to_string(), "unknown object type: theme");

        let err = Error::SchemaMismatch {
            expected: "theme".into(),
            actual: "bookmark".into(),
        };
        assert_eq!(
            err.to_string(),
            "object type mismatch: expected theme, got bookmark"
        );

        let err = Error::TypeMismatch {
            field: "isDarkMode".into(),
            expected: "bool".into(),
            got: "string".into(),
        };
        assert_eq!(
            err.to_string(),
            "type mismatch for field 'isDarkMode': expected bool, got string"
        );
    }
}
