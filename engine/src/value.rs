//! Scalar field values carried by synchronized objects.
//!
//! Every domain object degrades to a map of these values for transport. The
//! set of kinds is closed so that (de)serialization is total: a payload that
//! parses is always representable, and nothing needs a runtime downcast.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Ordered field payload of an object.
pub type FieldMap = BTreeMap<String, FieldValue>;

/// A single scalar field value.
///
/// Serialized adjacently tagged, e.g. `{"kind":"long","value":42}`, so that
/// `Int` and `Long` survive a round trip through JSON.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    #[serde(rename = "string")]
    Str(String),
}

impl FieldValue {
    /// Name of this value's kind, as used in error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            FieldValue::Null => "null",
            FieldValue::Bool(_) => "bool",
            FieldValue::Int(_) => "int",
            FieldValue::Long(_) => "long",
            FieldValue::Str(_) => "string",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer value, widening `Int` to 64 bits.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int(v) => Some(i64::from(*v)),
            FieldValue::Long(v) => Some(*v),
            _ => None,
        }
    }

    /// Integer value if it fits in 32 bits.
    pub fn as_i32(&self) -> Option<i32> {
        self.as_i64().and_then(|v| i32::try_from(v).ok())
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => write!(f, "null"),
            FieldValue::Bool(b) => write!(f, "{b}"),
            FieldValue::Int(v) => write!(f, "{v}"),
            FieldValue::Long(v) => write!(f, "{v}L"),
            FieldValue::Str(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::Int(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Long(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Str(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Str(value)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(FieldValue::Null, Into::into)
    }
}

/// Build a [`FieldMap`] from `name => value` pairs.
///
/// ```
/// use loopsync_engine::{fields, FieldValue};
///
/// let map = fields! { "colorScheme" => "green", "isDarkMode" => false };
/// assert_eq!(map["isDarkMode"], FieldValue::Bool(false));
/// ```
#[macro_export]
macro_rules! fields {
    () => { $crate::FieldMap::new() };
    ($($name:expr => $value:expr),+ $(,)?) => {{
        let mut map = $crate::FieldMap::new();
        $( map.insert(::std::string::String::from($name), $crate::FieldValue::from($value)); )+
        map
    }};
}
