//! State shared by one manager's accept loop, discovery task and sessions.

use crate::config::NodeConfig;
use crate::error::{Result, SyncError};
use crate::frame::Handshake;
use crate::peers::{Direction, PeerInfo, PeerRegistry};
use crate::session;
use crate::transport::{self, PeerLink};
use loopsync_engine::{
    ApplyOutcome, CurrentRule, ObjectKey, ObjectType, Replica, SyncableObject,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Capacity of the change feed before slow sessions start lagging.
const CHANGE_FEED_CAPACITY: usize = 1024;

/// Where a committed change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "sessionId", rename_all = "snake_case")]
pub enum Origin {
    /// A mutation made by this process
    Local,
    /// An object received on the given session
    Peer(Uuid),
}

/// A change that was merged into the local store.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub object: SyncableObject,
    pub origin: Origin,
}

/// Resolve once `shutdown` reads `true`.
pub(crate) async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    // An error means the manager is gone, which counts as stopped
    let _ = shutdown.wait_for(|stopped| *stopped).await;
}

pub(crate) struct SyncCore {
    pub(crate) config: NodeConfig,
    pub(crate) replica: Replica,
    pub(crate) object_type: ObjectType,
    pub(crate) peers: PeerRegistry,
    current_rule: CurrentRule,
    changes: broadcast::Sender<ChangeEvent>,
    current: watch::Sender<Option<SyncableObject>>,
    current_lock: Mutex<()>,
    /// `true` while the manager is stopped
    shutdown: watch::Sender<bool>,
    sessions: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncCore {
    pub(crate) fn new(
        config: NodeConfig,
        replica: Replica,
        object_type: ObjectType,
        current_rule: CurrentRule,
    ) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        let (current, _) = watch::channel(None);
        let (shutdown, _) = watch::channel(true);
        let peers = PeerRegistry::new(config.app_id.clone());
        Self {
            config,
            replica,
            object_type,
            peers,
            current_rule,
            changes,
            current,
            current_lock: Mutex::new(()),
            shutdown,
            sessions: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn handshake(&self) -> Handshake {
        Handshake {
            app_id: self.config.app_id.clone(),
            app_name: self.config.app_name.clone(),
            app_version: self.config.app_version.clone(),
            capabilities: self.replica.registry().capabilities(),
        }
    }

    /// Merge `object` and publish it if the store changed.
    pub(crate) fn commit(&self, object: SyncableObject, origin: Origin) -> Result<ApplyOutcome> {
        let outcome = self.replica.apply(object.clone())?;
        if outcome.changed() {
            self.publish(object, origin)?;
        }
        Ok(outcome)
    }

    /// Announce an object already written to the store.
    pub(crate) fn publish(&self, object: SyncableObject, origin: Origin) -> Result<()> {
        let key = object.key();
        // No receivers just means no sessions yet
        let _ = self.changes.send(ChangeEvent { object, origin });
        self.track_current(&key)
    }

    /// Recompute the domain's current value from the whole store.
    pub(crate) fn refresh_current(&self) -> Result<()> {
        if self.current_rule == CurrentRule::None {
            return Ok(());
        }
        let _guard = self.current_lock.lock();
        self.rescan_current()
    }

    fn rescan_current(&self) -> Result<()> {
        let objects = self.replica.snapshot(&self.object_type)?;
        let selected = self.current_rule.select(&objects).cloned();
        self.current.send_if_modified(|current| {
            if *current == selected {
                false
            } else {
                *current = selected;
                true
            }
        });
        Ok(())
    }

    /// Update the current value after `key` changed in the store. Only a
    /// change to the current object itself needs a full rescan.
    fn track_current(&self, key: &ObjectKey) -> Result<()> {
        if self.current_rule == CurrentRule::None || key.object_type != self.object_type {
            return Ok(());
        }
        let _guard = self.current_lock.lock();
        let holds_key = self
            .current
            .borrow()
            .as_ref()
            .is_some_and(|current| current.key() == *key);
        if holds_key {
            return self.rescan_current();
        }

        let Some(stored) = self.replica.get(key)? else {
            return Ok(());
        };
        let replace = match &*self.current.borrow() {
            Some(current) => self.current_rule.prefers(&stored, current),
            None => self.current_rule.qualifies(&stored),
        };
        if replace {
            self.current.send_replace(Some(stored));
        }
        Ok(())
    }

    pub(crate) fn subscribe_changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }

    pub(crate) fn current_value(&self) -> watch::Receiver<Option<SyncableObject>> {
        self.current.subscribe()
    }

    pub(crate) fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.shutdown.send_replace(!running);
    }

    pub(crate) fn is_running(&self) -> bool {
        !*self.shutdown.borrow()
    }

    /// Run a session on `link` in the background.
    pub(crate) fn spawn_session(
        self: &Arc<Self>,
        link: PeerLink,
        direction: Direction,
        dialed_port: Option<u16>,
        ready: Option<oneshot::Sender<Result<PeerInfo>>>,
    ) {
        let core = Arc::clone(self);
        let handle = tokio::spawn(session::run(core, link, direction, dialed_port, ready));
        let mut sessions = self.sessions.lock();
        sessions.retain(|h| !h.is_finished());
        sessions.push(handle);
    }

    /// Dial `host:port` and wait until the session is established.
    pub(crate) async fn dial(self: &Arc<Self>, host: IpAddr, port: u16) -> Result<PeerInfo> {
        if !self.is_running() {
            return Err(SyncError::SyncUnavailable("manager is not running".into()));
        }
        let link = transport::connect(host, port, self.config.connect_timeout).await?;
        tracing::debug!(port, "dialed peer");
        let (tx, rx) = oneshot::channel();
        self.spawn_session(link, Direction::Outbound, Some(port), Some(tx));
        rx.await.map_err(|_| SyncError::Closed)?
    }

    /// Hand over every tracked session task.
    pub(crate) fn take_sessions(&self) -> Vec<JoinHandle<()>> {
        std::mem::take(&mut *self.sessions.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loopsync_engine::{fields, Domain, MemoryStore, SchemaRegistry};

    fn core(domain: Domain) -> SyncCore {
        let replica = Replica::new(
            SchemaRegistry::with_schema(domain.schema()),
            Arc::new(MemoryStore::new()),
        );
        SyncCore::new(
            NodeConfig::new("com.example.a", "A", "1.0"),
            replica,
            domain.object_type().to_string(),
            domain.current_rule(),
        )
    }

    fn theme(id: &str, is_default: bool, ts: u64) -> SyncableObject {
        SyncableObject::new(
            "theme",
            id,
            fields! {
                "name" => id,
                "colorScheme" => "green",
                "isDarkMode" => false,
                "isDefault" => is_default,
                "sourceApp" => "com.example.a",
            },
            ts,
        )
    }

    #[test]
    fn commit_publishes_changes_once() {
        let core = core(Domain::Theme);
        let mut feed = core.subscribe_changes();
        let obj = theme("t1", false, 1000);

        assert_eq!(
            core.commit(obj.clone(), Origin::Local).unwrap(),
            ApplyOutcome::Inserted
        );
        assert!(!core.commit(obj.clone(), Origin::Local).unwrap().changed());

        let event = feed.try_recv().unwrap();
        assert_eq!(event.object, obj);
        assert_eq!(event.origin, Origin::Local);
        assert!(feed.try_recv().is_err());
    }

    #[test]
    fn current_value_follows_flagged_default() {
        let core = core(Domain::Theme);
        let current = core.current_value();
        assert!(current.borrow().is_none());

        core.commit(theme("t1", true, 1000), Origin::Local).unwrap();
        assert_eq!(current.borrow().as_ref().unwrap().object_id, "t1");

        core.commit(theme("t2", false, 2000), Origin::Local).unwrap();
        assert_eq!(current.borrow().as_ref().unwrap().object_id, "t1");

        let deleted = theme("t1", true, 1000).tombstone(3000);
        core.commit(deleted, Origin::Local).unwrap();
        assert!(current.borrow().is_none());
    }

    #[test]
    fn current_value_rescans_when_current_loses_its_flag() {
        let core = core(Domain::Theme);
        let current = core.current_value();

        core.commit(theme("t1", true, 1000), Origin::Local).unwrap();
        core.commit(theme("t2", true, 2000), Origin::Local).unwrap();
        assert_eq!(current.borrow().as_ref().unwrap().object_id, "t2");

        // An older flagged theme does not take over
        core.commit(theme("t0", true, 500), Origin::Local).unwrap();
        assert_eq!(current.borrow().as_ref().unwrap().object_id, "t2");

        let unflagged = theme("t2", false, 3000).with_revision(2, 3000);
        core.commit(unflagged, Origin::Local).unwrap();
        assert_eq!(current.borrow().as_ref().unwrap().object_id, "t1");
    }

    #[test]
    fn latest_rule_tracks_newest_commit() {
        let core = core(Domain::Language);
        let current = core.current_value();
        let language = |id: &str, ts: u64| {
            SyncableObject::new(
                "language_preference",
                id,
                fields! { "languageCode" => id, "displayName" => id },
                ts,
            )
        };

        core.commit(language("en", 2000), Origin::Local).unwrap();
        core.commit(language("fr", 1000), Origin::Local).unwrap();
        assert_eq!(current.borrow().as_ref().unwrap().object_id, "en");
        core.commit(language("de", 3000), Origin::Local).unwrap();
        assert_eq!(current.borrow().as_ref().unwrap().object_id, "de");
    }

    #[test]
    fn running_flag() {
        let core = core(Domain::Bookmark);
        assert!(!core.is_running());
        core.set_running(true);
        assert!(core.is_running());
        assert!(!*core.shutdown_signal().borrow());
    }

    #[tokio::test]
    async fn dial_requires_running() {
        let core = Arc::new(core(Domain::Theme));
        let err = core
            .dial("127.0.0.1".parse().unwrap(), 9)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::SyncUnavailable(_)));
    }
}
