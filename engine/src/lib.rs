//! # Loopsync Engine
//!
//! The object model and merge rule behind loopback preference sync.
//!
//! Independently installed apps on one device share small preference objects
//! (theme, server profile, language, bookmarks...) without a central server.
//! This crate holds everything about those objects that does not involve a
//! socket: their shape, their schemas, and how two versions of the same object
//! are reconciled.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine has no knowledge of sockets or files
//! - **Deterministic**: replicas that saw the same versions hold the same value
//! - **Idempotent**: applying an object twice is a no-op
//!
//! ## Core Concepts
//!
//! ### Objects
//!
//! A [`SyncableObject`] carries a type, an id, a `(version, last_modified)`
//! [`Revision`] and an ordered map of [`FieldValue`]s. Deleting writes a
//! tombstone: the `deleted` field set to `true` under a new version.
//!
//! ### Schemas
//!
//! A [`SchemaDescriptor`] names the fields of one object type and the
//! capability it is advertised under. A [`SchemaRegistry`] intersects local
//! capabilities with a peer's during the handshake.
//!
//! ### Merging
//!
//! [`merge::decide`] is last-writer-wins on the revision: higher version wins,
//! then later timestamp, and a full tie keeps the stored value. [`Replica`]
//! applies it under a per-key lock on top of any [`ObjectStore`].
//!
//! ## Quick Start
//!
//! ```rust
//! use loopsync_engine::{fields, Domain, MemoryStore, ObjectKey, Replica, SchemaRegistry, SyncableObject};
//! use std::sync::Arc;
//!
//! // 1. Registry with the theme schema
//! let registry = SchemaRegistry::with_schema(Domain::Theme.schema());
//!
//! // 2. Replica over an in-memory store
//! let replica = Replica::new(registry, Arc::new(MemoryStore::new()));
//!
//! // 3. Apply two versions in either order
//! let v1 = SyncableObject::new(
//!     "theme",
//!     "t1",
//!     fields! { "colorScheme" => "green", "isDarkMode" => false },
//!     1706745600000,
//! );
//! let v2 = v1.revise(
//!     fields! { "colorScheme" => "purple", "isDarkMode" => false },
//!     1706745601000,
//! );
//! replica.apply(v2.clone()).unwrap();
//! replica.apply(v1).unwrap();
//!
//! // 4. The newer version stays
//! let stored = replica.get(&ObjectKey::new("theme", "t1")).unwrap();
//! assert_eq!(stored, Some(v2));
//! ```
//!
//! ## Persistence
//!
//! Use [`MemoryStore::export_snapshot`] and [`MemoryStore::import_snapshot`]
//! with [`StoreSnapshot`]. Snapshots serialize to JSON deterministically.

pub mod domain;
pub mod error;
pub mod language;
pub mod merge;
pub mod object;
pub mod profile;
pub mod registry;
pub mod replica;
pub mod revision;
pub mod schema;
pub mod snapshot;
pub mod store;
pub mod theme;
pub mod value;

// Re-export main types at crate root
pub use domain::{CurrentRule, Domain, UnknownDomain, CAPABILITY_VERSION};
pub use error::Error;
pub use language::{LanguageData, AVAILABLE_LANGUAGES, LANGUAGE_PREFERENCE_ID};
pub use merge::{KeepReason, MergeDecision};
pub use object::{ObjectKey, Syncable, SyncableObject, DELETED_FIELD};
pub use profile::ProfileData;
pub use registry::{CapabilityMismatch, Negotiation, SchemaRegistry};
pub use replica::{ApplyOutcome, Replica};
pub use revision::Revision;
pub use schema::{FieldDef, FieldKind, SchemaDescriptor};
pub use snapshot::{StoreSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use store::{MemoryStore, ObjectStore};
pub use theme::{CustomColors, ThemeData};
pub use value::{FieldMap, FieldValue};

/// Type aliases for clarity
pub type ObjectType = String;
pub type ObjectId = String;
pub type AppId = String;
pub type Version = u64;
pub type Timestamp = u64;
pub type SchemaVersion = u32;
