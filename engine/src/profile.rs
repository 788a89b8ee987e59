//! Typed service profiles.

use crate::{
    error::Result, Domain, FieldMap, FieldValue, Syncable, SyncableObject, Timestamp, Version,
};

pub const TYPE_METUBE: &str = "metube";
pub const TYPE_YTDL: &str = "ytdl";
pub const TYPE_TORRENT: &str = "torrent";
pub const TYPE_JDOWNLOADER: &str = "jdownloader";

pub const TORRENT_CLIENT_QBITTORRENT: &str = "qbittorrent";
pub const TORRENT_CLIENT_TRANSMISSION: &str = "transmission";
pub const TORRENT_CLIENT_UTORRENT: &str = "utorrent";

/// Connection settings for one download service, shared between apps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileData {
    pub id: String,
    pub name: String,
    pub host: String,
    pub port: Option<i32>,
    pub is_default: bool,
    pub service_type: Option<String>,
    pub torrent_client_type: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub rpc_url: Option<String>,
    pub source_app: Option<String>,
    pub version: Version,
    pub last_modified: Timestamp,
}

impl ProfileData {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        host: impl Into<String>,
        port: i32,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            host: host.into(),
            port: Some(port),
            is_default: false,
            service_type: None,
            torrent_client_type: None,
            username: None,
            password: None,
            rpc_url: None,
            source_app: None,
            version: 1,
            last_modified: timestamp,
        }
    }

    fn is_torrent_client(&self, client: &str) -> bool {
        self.service_type.as_deref() == Some(TYPE_TORRENT)
            && self.torrent_client_type.as_deref() == Some(client)
    }

    pub fn is_transmission(&self) -> bool {
        self.is_torrent_client(TORRENT_CLIENT_TRANSMISSION)
    }

    pub fn is_qbittorrent(&self) -> bool {
        self.is_torrent_client(TORRENT_CLIENT_QBITTORRENT)
    }
}

impl Syncable for ProfileData {
    const OBJECT_TYPE: &'static str = "profile";

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
            "host" => self.host.as_str(),
            "isDefault" => self.is_default,
        };
        let optional = [
            ("port", self.port.map(FieldValue::from)),
            ("serviceType", self.service_type.clone().map(FieldValue::from)),
            ("torrentClientType", self.torrent_client_type.clone().map(FieldValue::from)),
            ("username", self.username.clone().map(FieldValue::from)),
            ("password", self.password.clone().map(FieldValue::from)),
            ("rpcUrl", self.rpc_url.clone().map(FieldValue::from)),
            ("sourceApp", self.source_app.clone().map(FieldValue::from)),
        ];
        for (field, value) in optional {
            if let Some(value) = value {
                map.insert(field.into(), value);
            }
        }
        map
    }

    fn from_object(object: &SyncableObject) -> Result<Self> {
        Domain::Profile.schema().validate(object)?;
        Ok(Self {
            id: object.object_id.clone(),
            name: object.required_str("name")?,
            host: object.required_str("host")?,
            port: object.get("port").and_then(FieldValue::as_i32),
            is_default: object.flag("isDefault"),
            service_type: object.optional_str("serviceType"),
            torrent_client_type: object.optional_str("torrentClientType"),
            username: object.optional_str("username"),
            password: object.optional_str("password"),
            rpc_url: object.optional_str("rpcUrl"),
            source_app: object.optional_str("sourceApp"),
            version: object.version,
            last_modified: object.last_modified,
        })
    }
}
