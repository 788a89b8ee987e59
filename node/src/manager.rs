//! Per-domain sync manager.
//!
//! A [`SyncManager`] owns one schema, one listener and the sessions to every
//! sibling that shares the schema. Local mutations go through it so they are
//! versioned, merged and pushed to peers; reactive accessors expose what the
//! store currently holds.

use crate::config::NodeConfig;
use crate::discovery;
use crate::error::{Result, SyncError};
use crate::peers::{Direction, PeerInfo};
use crate::port::{preferred_port, PortAllocator};
use crate::replicator::{ChangeEvent, Origin, SyncCore};
use crate::transport::{self, PeerLink, ServerHandle};
use chrono::Utc;
use futures::future::join_all;
use loopsync_engine::{
    ApplyOutcome, CurrentRule, Domain, Error as EngineError, FieldMap, ObjectKey, ObjectStore,
    Replica, SchemaDescriptor, SchemaRegistry, Syncable, SyncableObject, Timestamp,
};
use serde::Serialize;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use uuid::Uuid;

/// What a manager synchronizes and where it listens.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainSpec {
    pub schema: SchemaDescriptor,
    pub base_port: u16,
    pub current_rule: CurrentRule,
}

impl DomainSpec {
    pub fn new(schema: SchemaDescriptor, base_port: u16, current_rule: CurrentRule) -> Self {
        Self {
            schema,
            base_port,
            current_rule,
        }
    }
}

impl From<Domain> for DomainSpec {
    fn from(domain: Domain) -> Self {
        Self::new(domain.schema(), domain.base_port(), domain.current_rule())
    }
}

/// Lifecycle state of a manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SyncStatus {
    Stopped,
    Starting,
    Running { port: u16, ephemeral: bool },
    /// Listening failed; local operation continues
    Unavailable { reason: String },
}

#[derive(Debug)]
struct Running {
    accept: JoinHandle<()>,
    discovery: Option<JoinHandle<()>>,
}

/// Synchronizes one object type with sibling apps on this device.
pub struct SyncManager {
    core: Arc<SyncCore>,
    base_port: u16,
    running: Mutex<Option<Running>>,
    status: watch::Sender<SyncStatus>,
}

impl std::fmt::Debug for SyncManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncManager")
            .field("app_id", &self.core.config.app_id)
            .field("object_type", &self.core.object_type)
            .field("base_port", &self.base_port)
            .field("status", &*self.status.borrow())
            .finish()
    }
}

impl SyncManager {
    /// Create a stopped manager over `store`.
    pub fn new(config: NodeConfig, spec: DomainSpec, store: Arc<dyn ObjectStore>) -> Self {
        let DomainSpec {
            schema,
            base_port,
            current_rule,
        } = spec;
        let object_type = schema.object_type.clone();
        let replica = Replica::new(SchemaRegistry::with_schema(schema), store);
        let core = Arc::new(SyncCore::new(config, replica, object_type, current_rule));
        if let Err(e) = core.refresh_current() {
            tracing::warn!(object_type = %core.object_type, error = %e, "could not read current value");
        }
        let (status, _) = watch::channel(SyncStatus::Stopped);
        Self {
            core,
            base_port,
            running: Mutex::new(None),
            status,
        }
    }

    /// Create a manager for one of the built-in domains.
    pub fn for_domain(config: NodeConfig, domain: Domain, store: Arc<dyn ObjectStore>) -> Self {
        Self::new(config, domain.into(), store)
    }

    pub fn config(&self) -> &NodeConfig {
        &self.core.config
    }

    pub fn object_type(&self) -> &str {
        &self.core.object_type
    }

    pub fn base_port(&self) -> u16 {
        self.base_port
    }

    /// Bind the listener and start discovery. Calling it while running does
    /// nothing.
    ///
    /// When no port can be bound the manager stays usable locally and the
    /// error is [`SyncError::SyncUnavailable`].
    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Ok(());
        }

        let config = &self.core.config;
        self.status.send_replace(SyncStatus::Starting);
        let allocator = PortAllocator::new(config.host, config.port_window);
        let preferred = preferred_port(&config.app_id, self.base_port);
        let bound = match transport::listen(
            &allocator,
            preferred,
            config.bind_attempts,
            config.bind_backoff,
        )
        .await
        {
            Ok(bound) => bound,
            Err(e) => {
                tracing::error!(
                    object_type = %self.core.object_type,
                    preferred,
                    error = %e,
                    "sync unavailable"
                );
                self.status.send_replace(SyncStatus::Unavailable {
                    reason: e.to_string(),
                });
                return Err(SyncError::SyncUnavailable(e.to_string()));
            }
        };

        self.core.set_running(true);
        let core = Arc::clone(&self.core);
        let server = ServerHandle::spawn(bound, self.core.shutdown_signal(), move |stream, addr| {
            match PeerLink::new(stream) {
                Ok(link) => core.spawn_session(link, Direction::Inbound, None, None),
                Err(e) => tracing::warn!(peer = %addr, error = %e, "could not open link"),
            }
        });
        let (port, ephemeral) = (server.port, server.ephemeral);

        let discovery = config.discovery_interval.map(|interval| {
            tokio::spawn(discovery::run(
                Arc::clone(&self.core),
                interval,
                self.base_port,
                port,
            ))
        });

        *running = Some(Running {
            accept: server.into_task(),
            discovery,
        });
        self.status
            .send_replace(SyncStatus::Running { port, ephemeral });
        tracing::info!(
            app_id = %config.app_id,
            object_type = %self.core.object_type,
            port,
            ephemeral,
            "sync started"
        );
        Ok(())
    }

    /// Close every session, release the listener and wait for background
    /// tasks. Safe to call when the manager never started.
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        let Some(Running { accept, discovery }) = running.take() else {
            let unavailable = matches!(*self.status.borrow(), SyncStatus::Unavailable { .. });
            if unavailable {
                self.status.send_replace(SyncStatus::Stopped);
            }
            return;
        };

        self.core.set_running(false);
        let deadline = Instant::now() + self.core.config.shutdown_grace;

        let mut background = vec![accept];
        background.extend(discovery);
        await_or_abort(background, deadline).await;
        // The accept loop is gone, so no session can be added after this
        await_or_abort(self.core.take_sessions(), deadline).await;

        self.status.send_replace(SyncStatus::Stopped);
        tracing::info!(object_type = %self.core.object_type, "sync stopped");
    }

    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.status.borrow(), SyncStatus::Running { .. })
    }

    /// Port of the listener while running.
    pub fn local_port(&self) -> Option<u16> {
        match *self.status.borrow() {
            SyncStatus::Running { port, .. } => Some(port),
            _ => None,
        }
    }

    /// Merge a pre-versioned object, as received from elsewhere.
    pub fn upsert(&self, object: SyncableObject) -> Result<ApplyOutcome> {
        Ok(self.core.commit(object, Origin::Local)?)
    }

    /// Write `fields` as the next version of `object_id`, creating it at
    /// version 1 if it does not exist.
    pub fn update(&self, object_id: &str, fields: FieldMap) -> Result<SyncableObject> {
        let key = self.key(object_id);
        let now = now_millis();
        let (object, outcome) = self.core.replica.apply_with(&key, |existing| {
            Ok(match existing {
                Some(existing) => existing.revise(fields, now),
                None => SyncableObject::new(&key.object_type, &key.object_id, fields, now),
            })
        })?;
        if outcome.changed() {
            self.core.publish(object.clone(), Origin::Local)?;
        }
        Ok(object)
    }

    /// Write a tombstone for `object_id`. Returns `None` if it never existed.
    pub fn delete(&self, object_id: &str) -> Result<Option<SyncableObject>> {
        let key = self.key(object_id);
        if self.core.replica.get(&key)?.is_none() {
            return Ok(None);
        }
        let now = now_millis();
        let (object, outcome) = self.core.replica.apply_with(&key, |existing| match existing {
            Some(existing) if existing.is_deleted() => Ok(existing.clone()),
            Some(existing) => Ok(existing.tombstone(now)),
            None => Err(EngineError::InvalidObject(format!("{key} does not exist"))),
        })?;
        if outcome.changed() {
            self.core.publish(object.clone(), Origin::Local)?;
        }
        Ok(Some(object))
    }

    /// Merge a typed domain object.
    pub fn publish<T: Syncable>(&self, item: &T) -> Result<ApplyOutcome> {
        self.upsert(item.to_object())
    }

    /// The stored object, tombstones included.
    pub fn get(&self, object_id: &str) -> Result<Option<SyncableObject>> {
        Ok(self.core.replica.get(&self.key(object_id))?)
    }

    /// Live objects ordered by id.
    pub fn objects(&self) -> Result<Vec<SyncableObject>> {
        let mut objects = self.snapshot()?;
        objects.retain(|o| !o.is_deleted());
        Ok(objects)
    }

    /// Every stored object ordered by id, tombstones included.
    pub fn snapshot(&self) -> Result<Vec<SyncableObject>> {
        Ok(self.core.replica.snapshot(&self.core.object_type)?)
    }

    /// Every committed change, local or from a peer.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.core.subscribe_changes()
    }

    /// The domain's current value; `None` for collection domains.
    pub fn current_value(&self) -> watch::Receiver<Option<SyncableObject>> {
        self.core.current_value()
    }

    /// Dial a peer and wait for the session to be established.
    pub async fn connect(&self, host: IpAddr, port: u16) -> Result<PeerInfo> {
        if !host.is_loopback() {
            return Err(SyncError::Protocol(format!("{host} is not a loopback address")));
        }
        self.core.dial(host, port).await
    }

    /// Close a session. Returns whether it existed.
    pub fn disconnect(&self, session_id: &Uuid) -> bool {
        self.core.peers.close(session_id)
    }

    /// Established sessions, oldest first.
    pub fn sessions(&self) -> Vec<PeerInfo> {
        self.core.peers.list()
    }

    fn key(&self, object_id: &str) -> ObjectKey {
        ObjectKey::new(self.core.object_type.clone(), object_id)
    }
}

/// Wait for `handles` until `deadline`, then abort whatever is left.
async fn await_or_abort(handles: Vec<JoinHandle<()>>, deadline: Instant) {
    if handles.is_empty() {
        return;
    }
    let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
    if time::timeout_at(deadline, join_all(handles)).await.is_err() {
        tracing::warn!(tasks = aborts.len(), "shutdown grace elapsed, aborting tasks");
        for abort in aborts {
            abort.abort();
        }
    }
}

fn now_millis() -> Timestamp {
    Timestamp::try_from(Utc::now().timestamp_millis()).unwrap_or_default()
}
