//! Typed theme objects.

use crate::{error::Result, Domain, FieldMap, FieldValue, Syncable, SyncableObject, Timestamp, Version};

pub const COLOR_WARM_ORANGE: &str = "warm_orange";
pub const COLOR_CRIMSON: &str = "crimson";
pub const COLOR_LIGHT_BLUE: &str = "light_blue";
pub const COLOR_PURPLE: &str = "purple";
pub const COLOR_GREEN: &str = "green";
pub const COLOR_MATERIAL: &str = "material";
pub const COLOR_CUSTOM: &str = "custom";

const PALETTE: [(&str, &str); 6] = [
    (COLOR_WARM_ORANGE, "Warm Orange"),
    (COLOR_CRIMSON, "Crimson"),
    (COLOR_LIGHT_BLUE, "Light Blue"),
    (COLOR_PURPLE, "Purple"),
    (COLOR_GREEN, "Green"),
    (COLOR_MATERIAL, "Material"),
];

/// Custom colors of a user-defined theme, as ARGB values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CustomColors {
    pub primary: Option<i64>,
    pub secondary: Option<i64>,
    pub background: Option<i64>,
    pub surface: Option<i64>,
}

/// A theme shared between apps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThemeData {
    pub id: String,
    pub name: String,
    pub color_scheme: String,
    pub is_dark_mode: bool,
    pub is_default: bool,
    pub source_app: String,
    pub version: Version,
    pub last_modified: Timestamp,
    pub custom: Option<CustomColors>,
}

impl ThemeData {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        color_scheme: impl Into<String>,
        is_dark_mode: bool,
        source_app: impl Into<String>,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            color_scheme: color_scheme.into(),
            is_dark_mode,
            is_default: false,
            source_app: source_app.into(),
            version: 1,
            last_modified: timestamp,
            custom: None,
        }
    }

    /// The built-in palette: a light and a dark variant of every scheme. The
    /// first entry is the default.
    pub fn defaults(source_app: &str, timestamp: Timestamp) -> Vec<ThemeData> {
        PALETTE
            .iter()
            .flat_map(|(scheme, label)| {
                [(false, "Light"), (true, "Dark")]
                    .into_iter()
                    .map(move |(dark, variant)| (*scheme, format!("{label} {variant}"), dark))
            })
            .enumerate()
            .map(|(i, (scheme, name, dark))| {
                let mut theme = ThemeData::new(
                    format!("{source_app}_theme_{}", i + 1),
                    name,
                    scheme,
                    dark,
                    source_app,
                    timestamp,
                );
                theme.is_default = i == 0;
                theme
            })
            .collect()
    }

    /// A user-defined theme with its own colors.
    pub fn custom(
        name: impl Into<String>,
        is_dark_mode: bool,
        source_app: &str,
        colors: CustomColors,
        timestamp: Timestamp,
    ) -> Self {
        let name = name.into();
        let mut theme = ThemeData::new(
            format!("custom_{source_app}_{timestamp}_{}", name.to_lowercase().replace(' ', "_")),
            name,
            COLOR_CUSTOM,
            is_dark_mode,
            source_app,
            timestamp,
        );
        theme.custom = Some(colors);
        theme
    }

    pub fn is_custom(&self) -> bool {
        self.custom.is_some()
    }
}

fn color(object: &SyncableObject, field: &str) -> Option<i64> {
    object.get(field).and_then(FieldValue::as_i64)
}

impl Syncable for ThemeData {
    const OBJECT_TYPE: &'static str = "theme";

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
        let mut map = crate::fields! {
            "name" => self.name.as_str(),
            "colorScheme" => self.color_scheme.as_str(),
            "isDarkMode" => self.is_dark_mode,
            "isDefault" => self.is_default,
            "sourceApp" => self.source_app.as_str(),
            "isCustom" => self.is_custom(),
        };
        if let Some(custom) = &self.custom {
            map.insert("customPrimary".into(), custom.primary.into());
            map.insert("customSecondary".into(), custom.secondary.into());
            map.insert("customBackground".into(), custom.background.into());
            map.insert("customSurface".into(), custom.surface.into());
        }
        map
    }

    fn from_object(object: &SyncableObject) -> Result<Self> {
        Domain::Theme.schema().validate(object)?;

        let custom = object.flag("isCustom").then(|| CustomColors {
            primary: color(object, "customPrimary"),
            secondary: color(object, "customSecondary"),
            background: color(object, "customBackground"),
            surface: color(object, "customSurface"),
        });

        Ok(Self {
            id: object.object_id.clone(),
            name: object.optional_str("name").unwrap_or_default(),
            color_scheme: object.required_str("colorScheme")?,
            is_dark_mode: object.flag("isDarkMode"),
            is_default: object.flag("isDefault"),
            source_app: object.optional_str("sourceApp").unwrap_or_default(),
            version: object.version,
            last_modified: object.last_modified,
            custom,
        })
    }
}
