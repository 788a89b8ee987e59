//! Typed language preference.

use crate::{error::Result, Domain, FieldMap, Syncable, SyncableObject, Timestamp, Version};

/// Id of the single language preference every app shares.
pub const LANGUAGE_PREFERENCE_ID: &str = "language_preference";

pub const CODE_SYSTEM_DEFAULT: &str = "system";

/// Languages the apps ship translations for, as (ISO 639-1 code, native name).
pub const AVAILABLE_LANGUAGES: [(&str, &str); 16] = [
    (CODE_SYSTEM_DEFAULT, "System Default"),
    ("en", "English"),
    ("ar", "العربية"),
    ("be", "Беларуская"),
    ("de", "Deutsch"),
    ("es", "Español"),
    ("fr", "Français"),
    ("hu", "Magyar"),
    ("it", "Italiano"),
    ("ja", "日本語"),
    ("kn", "ಕನ್ನಡ"),
    ("ko", "한국어"),
    ("pt", "Português"),
    ("ru", "Русский"),
    ("sr", "Српски"),
    ("zh", "中文"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageData {
    pub id: String,
    pub language_code: String,
    pub display_name: String,
    /// Follow the system language instead of `language_code`
    pub is_system_default: bool,
    pub version: Version,
    pub last_modified: Timestamp,
}

impl LanguageData {
    /// The shared preference set to `code`, named from the available list
    /// when the code is known.
    pub fn new(code: &str, timestamp: Timestamp) -> Self {
        let display_name = AVAILABLE_LANGUAGES
            .iter()
            .find(|(c, _)| *c == code)
            .map_or(code, |(_, name)| *name);
        Self {
            id: LANGUAGE_PREFERENCE_ID.to_string(),
            language_code: code.to_string(),
            display_name: display_name.to_string(),
            is_system_default: code == CODE_SYSTEM_DEFAULT,
            version: 1,
            last_modified: timestamp,
        }
    }

    pub fn system_default(timestamp: Timestamp) -> Self {
        Self::new(CODE_SYSTEM_DEFAULT, timestamp)
    }
}

impl Syncable for LanguageData {
    const OBJECT_TYPE: &'static str = "language_preference";

    fn object_id(&self) -> &str {
        &self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn last_modified(&self) -> Timestamp {
        self.last_modified
    }

    fn to_field_map(&self) -> FieldMap {
        crate::fields! {
            "languageCode" => self.language_code.as_str(),
            "displayName" => self.display_name.as_str(),
            "isSystemDefault" => self.is_system_default,
        }
    }

    fn from_object(object: &SyncableObject) -> Result<Self> {
        Domain::Language.schema().validate(object)?;
        Ok(Self {
            id: object.object_id.clone(),
            language_code: object.required_str("languageCode")?,
            display_name: object.required_str("displayName")?,
            is_system_default: object.flag("isSystemDefault"),
            version: object.version,
            last_modified: object.last_modified,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_get_native_names() {
        let french = LanguageData::new("fr", 10);
        assert_eq!(french.id, LANGUAGE_PREFERENCE_ID);
        assert_eq!(french.display_name, "Français");
        assert!(!french.is_system_default);

        let unknown = LanguageData::new("tlh", 10);
        assert_eq!(unknown.display_name, "tlh");

        assert!(LanguageData::system_default(10).is_system_default);
    }

    #[test]
    fn object_conversion() {
        let mut language = LanguageData::new("ja", 7000);
        language.version = 3;
        let object = language.to_object();
        assert_eq!(object.object_type, "language_preference");
        assert_eq!(object.object_id, "language_preference");
        assert_eq!(LanguageData::from_object(&object).unwrap(), language);
    }
}
