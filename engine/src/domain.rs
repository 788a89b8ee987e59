//! Catalogue of the synchronized preference domains.
//!
//! Every domain has its own object type, capability, base port and schema.
//! Processes that share a domain guess each other's ports from the base port,
//! so these constants are part of the wire contract.

use crate::{FieldDef, FieldKind, SchemaDescriptor, SyncableObject, Timestamp, Version};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Capability version every built-in domain advertises.
pub const CAPABILITY_VERSION: &str = "1.0";

/// A synchronized domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Theme,
    Profile,
    History,
    Rss,
    Bookmark,
    Preferences,
    Language,
    TorrentSharing,
}

impl Domain {
    pub const ALL: [Domain; 8] = [
        Domain::Theme,
        Domain::Profile,
        Domain::History,
        Domain::Rss,
        Domain::Bookmark,
        Domain::Preferences,
        Domain::Language,
        Domain::TorrentSharing,
    ];

    pub fn all() -> impl Iterator<Item = Domain> {
        Self::ALL.into_iter()
    }

    /// Short name used in configuration and file names.
    pub fn name(&self) -> &'static str {
        match self {
            Domain::Theme => "theme",
            Domain::Profile => "profile",
            Domain::History => "history",
            Domain::Rss => "rss",
            Domain::Bookmark => "bookmark",
            Domain::Preferences => "preferences",
            Domain::Language => "language",
            Domain::TorrentSharing => "torrent_sharing",
        }
    }

    pub fn object_type(&self) -> &'static str {
        match self {
            Domain::Theme => "theme",
            Domain::Profile => "profile",
            Domain::History => "history",
            Domain::Rss => "rss_feed",
            Domain::Bookmark => "bookmark",
            Domain::Preferences => "preferences",
            Domain::Language => "language_preference",
            Domain::TorrentSharing => "torrent_sharing_prefs",
        }
    }

    pub fn capability(&self) -> &'static str {
        match self {
            Domain::Theme => "theme_sync",
            Domain::Profile => "profile_sync",
            Domain::History => "history_sync",
            Domain::Rss => "rss_sync",
            Domain::Bookmark => "bookmark_sync",
            Domain::Preferences => "preferences_sync",
            Domain::Language => "language_sync",
            Domain::TorrentSharing => "torrent_sharing_sync",
        }
    }

    pub fn base_port(&self) -> u16 {
        match self {
            Domain::Theme => 8890,
            Domain::Profile => 8900,
            Domain::History => 8910,
            Domain::Rss => 8920,
            Domain::Bookmark => 8930,
            Domain::Preferences => 8940,
            Domain::Language => 8950,
            Domain::TorrentSharing => 8960,
        }
    }

    /// How the domain's single current value is chosen.
    pub fn current_rule(&self) -> CurrentRule {
        match self {
            Domain::Theme | Domain::Profile => CurrentRule::FlaggedDefault("isDefault".into()),
            Domain::Language | Domain::TorrentSharing => CurrentRule::Latest,
            Domain::History | Domain::Rss | Domain::Bookmark | Domain::Preferences => {
                CurrentRule::None
            }
        }
    }

    pub fn schema(&self) -> SchemaDescriptor {
        use FieldKind::{Bool, Int, Long, String};
        let fields = match self {
            Domain::Theme => vec![
                FieldDef::optional("name", String),
                FieldDef::required("colorScheme", String),
                FieldDef::required("isDarkMode", Bool),
                FieldDef::optional("isDefault", Bool),
                FieldDef::optional("sourceApp", String),
                FieldDef::optional("isCustom", Bool),
                FieldDef::optional("customPrimary", Long),
                FieldDef::optional("customSecondary", Long),
                FieldDef::optional("customBackground", Long),
                FieldDef::optional("customSurface", Long),
            ],
            Domain::Profile => vec![
                FieldDef::required("name", String),
                FieldDef::required("host", String),
                FieldDef::optional("port", Int),
                FieldDef::optional("isDefault", Bool),
                FieldDef::optional("serviceType", String),
                FieldDef::optional("torrentClientType", String),
                FieldDef::optional("username", String),
                FieldDef::optional("password", String),
                FieldDef::optional("rpcUrl", String),
                FieldDef::optional("sourceApp", String),
            ],
            Domain::History => vec![
                FieldDef::required("url", String),
                FieldDef::optional("title", String),
                FieldDef::optional("description", String),
                FieldDef::optional("type", String),
                FieldDef::optional("serviceProvider", String),
                FieldDef::optional("profileId", String),
                FieldDef::optional("timestamp", Long),
                FieldDef::optional("category", String),
                FieldDef::optional("tags", String),
                FieldDef::optional("sourceApp", String),
            ],
            Domain::Rss => vec![
                FieldDef::required("url", String),
                FieldDef::required("name", String),
                FieldDef::optional("autoDownload", Bool),
                FieldDef::optional("filters", String),
                FieldDef::optional("excludeFilters", String),
                FieldDef::optional("updateInterval", Int),
                FieldDef::optional("isEnabled", Bool),
                FieldDef::optional("category", String),
                FieldDef::optional("torrentClientType", String),
                FieldDef::optional("downloadPath", String),
                FieldDef::optional("sourceApp", String),
            ],
            Domain::Bookmark => vec![
                FieldDef::required("url", String),
                FieldDef::optional("title", String),
                FieldDef::optional("description", String),
                FieldDef::optional("type", String),
                FieldDef::optional("category", String),
                FieldDef::optional("tags", String),
                FieldDef::optional("isFavorite", Bool),
                FieldDef::optional("notes", String),
                FieldDef::optional("sourceApp", String),
            ],
            Domain::Preferences => vec![
                FieldDef::required("category", String),
                FieldDef::required("key", String),
                FieldDef::required("value", String),
                FieldDef::optional("type", String),
                FieldDef::optional("description", String),
                FieldDef::optional("sourceApp", String),
            ],
            Domain::Language => vec![
                FieldDef::required("languageCode", String),
                FieldDef::required("displayName", String),
                FieldDef::optional("isSystemDefault", Bool),
            ],
            Domain::TorrentSharing => vec![
                FieldDef::required("directSharingEnabled", Bool),
                FieldDef::optional("dontAskQBitConnect", Bool),
                FieldDef::optional("dontAskTransmissionConnect", Bool),
            ],
        };
        SchemaDescriptor::new(
            self.object_type(),
            self.capability(),
            CAPABILITY_VERSION,
            fields,
        )
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error for an unrecognised domain name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown domain: {0}")]
pub struct UnknownDomain(pub String);

impl FromStr for Domain {
    type Err = UnknownDomain;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Domain::all()
            .find(|d| d.name() == wanted || d.object_type() == wanted)
            .ok_or_else(|| UnknownDomain(s.to_string()))
    }
}

/// Rule that picks the single "current" object of a domain, if it has one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CurrentRule {
    /// The live object whose named bool field is true. With several flagged
    /// objects the most recently modified wins.
    FlaggedDefault(String),
    /// The most recently modified live object.
    Latest,
    /// Collection-style domain without a current value.
    None,
}

impl CurrentRule {
    /// Whether `object` can be the current value at all.
    pub fn qualifies(&self, object: &SyncableObject) -> bool {
        if object.is_deleted() {
            return false;
        }
        match self {
            CurrentRule::FlaggedDefault(field) => {
                object.get(field).and_then(|v| v.as_bool()) == Some(true)
            }
            CurrentRule::Latest => true,
            CurrentRule::None => false,
        }
    }

    /// Whether `candidate` would take over from `current`.
    pub fn prefers(&self, candidate: &SyncableObject, current: &SyncableObject) -> bool {
        self.qualifies(candidate) && rank(candidate) > rank(current)
    }

    /// Select the current object among `objects`. Tombstones never qualify.
    pub fn select<'a, I>(&self, objects: I) -> Option<&'a SyncableObject>
    where
        I: IntoIterator<Item = &'a SyncableObject>,
    {
        objects
            .into_iter()
            .filter(|o| self.qualifies(o))
            .max_by(|a, b| rank(a).cmp(&rank(b)))
    }
}

/// Newest first: modification time, then version, then id.
fn rank(object: &SyncableObject) -> (Timestamp, Version, &str) {
    (object.last_modified, object.version, object.object_id.as_str())
}
