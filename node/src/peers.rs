//! Registry of established peer sessions.
//!
//! Tracks one session per peer app and lets the manager close any of them.
//! Thread-safe and shared between the accept loop, discovery and sessions.

use crate::error::{Result, SyncError};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use loopsync_engine::{AppId, ObjectType};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Notify;
use uuid::Uuid;

/// Which side opened the TCP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Public view of a connected peer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    pub session_id: Uuid,
    pub app_id: AppId,
    pub app_name: String,
    pub app_version: String,
    pub direction: Direction,
    pub remote_addr: SocketAddr,
    /// Port we dialed, for outbound sessions
    pub dialed_port: Option<u16>,
    /// Object types exchanged on this session
    pub agreed: Vec<ObjectType>,
    pub connected_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug)]
struct PeerEntry {
    info: PeerInfo,
    close: Arc<Notify>,
}

/// Manages established sessions, keyed by session id and by peer app id.
#[derive(Debug)]
pub struct PeerRegistry {
    local_app_id: AppId,
    sessions: DashMap<Uuid, PeerEntry>,
    by_app: DashMap<AppId, Uuid>,
}

impl PeerRegistry {
    pub fn new(local_app_id: impl Into<AppId>) -> Self {
        Self {
            local_app_id: local_app_id.into(),
            sessions: DashMap::new(),
            by_app: DashMap::new(),
        }
    }

    /// App id of whoever dialed the session described by `info`.
    fn dialer<'a>(&'a self, info: &'a PeerInfo) -> &'a str {
        match info.direction {
            Direction::Outbound => &self.local_app_id,
            Direction::Inbound => &info.app_id,
        }
    }

    /// Register an established session.
    ///
    /// With two sessions to the same app, the one dialed by the smaller app id
    /// is kept on both ends; between two dialed by the same side the newer one
    /// wins. A displaced session is told to close through its notify handle.
    pub fn register(&self, info: PeerInfo, close: Arc<Notify>) -> Result<()> {
        let canonical = self.local_app_id.as_str().min(info.app_id.as_str()).to_string();
        let session_id = info.session_id;

        // The app slot stays locked until the session is in place
        match self.by_app.entry(info.app_id.clone()) {
            Entry::Vacant(slot) => {
                log_registered(&info);
                self.sessions.insert(session_id, PeerEntry { info, close });
                slot.insert(session_id);
            }
            Entry::Occupied(mut slot) => {
                let existing_id = *slot.get();
                let keep_existing = self.sessions.get(&existing_id).is_some_and(|existing| {
                    self.dialer(&existing.info) == canonical && self.dialer(&info) != canonical
                });
                if keep_existing {
                    tracing::debug!(
                        peer = %info.app_id,
                        session_id = %session_id,
                        kept = %existing_id,
                        "duplicate session rejected"
                    );
                    return Err(SyncError::DuplicateSession { peer: info.app_id });
                }
                if let Some(existing) = self.sessions.get(&existing_id) {
                    existing.close.notify_one();
                }
                tracing::debug!(
                    peer = %info.app_id,
                    session_id = %session_id,
                    replaced = %existing_id,
                    "duplicate session replaced"
                );
                log_registered(&info);
                self.sessions.insert(session_id, PeerEntry { info, close });
                slot.insert(session_id);
            }
        }
        Ok(())
    }

    /// Remove a session. The app index is only cleared if it still points at
    /// this session.
    pub fn unregister(&self, session_id: &Uuid) -> Option<PeerInfo> {
        let (_, entry) = self.sessions.remove(session_id)?;
        self.by_app
            .remove_if(&entry.info.app_id, |_, id| id == session_id);
        tracing::info!(
            session_id = %session_id,
            peer = %entry.info.app_id,
            "session unregistered"
        );
        Some(entry.info)
    }

    /// Record inbound traffic on a session.
    pub fn touch(&self, session_id: &Uuid) {
        if let Some(mut entry) = self.sessions.get_mut(session_id) {
            entry.info.last_seen = Utc::now();
        }
    }

    /// Ask a session to close. Returns whether it was known.
    pub fn close(&self, session_id: &Uuid) -> bool {
        match self.sessions.get(session_id) {
            Some(entry) => {
                entry.close.notify_one();
                true
            }
            None => false,
        }
    }

    /// All sessions, oldest first.
    pub fn list(&self) -> Vec<PeerInfo> {
        let mut peers: Vec<_> = self.sessions.iter().map(|e| e.info.clone()).collect();
        peers.sort_by(|a, b| {
            a.connected_at
                .cmp(&b.connected_at)
                .then_with(|| a.app_id.cmp(&b.app_id))
        });
        peers
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_connected(&self, app_id: &str) -> bool {
        self.by_app.contains_key(app_id)
    }

    /// Whether `session_id` is the session kept for `app_id`.
    pub fn is_current(&self, app_id: &str, session_id: &Uuid) -> bool {
        self.by_app
            .get(app_id)
            .is_some_and(|id| *id == *session_id)
    }

    /// Whether an outbound session to `port` is established.
    pub fn has_dialed(&self, port: u16) -> bool {
        self.sessions
            .iter()
            .any(|e| e.info.dialed_port == Some(port))
    }
}

fn log_registered(info: &PeerInfo) {
    tracing::info!(
        session_id = %info.session_id,
        peer = %info.app_id,
        direction = ?info.direction,
        "session registered"
    );
}
