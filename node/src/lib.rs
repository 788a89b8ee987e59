//! # Loopsync Node
//!
//! Loopback replication runtime for [`loopsync_engine`].
//!
//! Every app on the device runs one [`SyncManager`] per synchronized domain.
//! Managers listen on a port derived from their app id, dial the ports their
//! siblings hash to, and keep one session per peer:
//!
//! 1. **Handshake**: identities and capabilities are exchanged; only object
//!    types both sides advertise at the same version are synced.
//! 2. **Reconcile**: each side sends its full snapshot of those types.
//! 3. **Stream**: committed changes are coalesced over a short window and
//!    pushed; heartbeats keep the session alive.
//!
//! Conflicts are resolved only by the engine's merge rule, so peers converge
//! regardless of delivery order.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use loopsync_engine::{fields, Domain, MemoryStore};
//! use loopsync_node::{NodeConfig, SyncContext};
//! use std::sync::Arc;
//!
//! # async fn run() -> loopsync_node::Result<()> {
//! let config = NodeConfig::new("com.example.notes", "Notes", "1.0.0")
//!     .with_known_apps(["com.example.reader"]);
//! let ctx = SyncContext::new_shared(config);
//!
//! let language = ctx.manager(Domain::Language, Arc::new(MemoryStore::new()));
//! language.start().await?;
//! language.update("current", fields! { "languageCode" => "en", "displayName" => "English" })?;
//!
//! let current = language.current_value();
//! println!("{:?}", *current.borrow());
//!
//! ctx.stop_all().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
mod discovery;
pub mod error;
pub mod frame;
pub mod manager;
pub mod peers;
pub mod port;
mod replicator;
mod session;
pub mod status;
pub mod transport;

pub use config::{ConfigError, DaemonConfig, NodeConfig, RetryConfig};
pub use context::SyncContext;
pub use error::{Result, SyncError};
pub use frame::{Frame, Handshake, ObjectBatch, WireObject, MAX_FRAME_SIZE};
pub use manager::{DomainSpec, SyncManager, SyncStatus};
pub use peers::{Direction, PeerInfo};
pub use port::{app_hash, preferred_port, BoundPort, PortAllocator};
pub use replicator::{ChangeEvent, Origin};
pub use transport::{PeerLink, ServerHandle};
