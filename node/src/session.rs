//! One replication session with one peer.
//!
//! A session walks `Handshaking → Reconciling → Streaming → Closed`. It first
//! exchanges handshakes and negotiates the object types both sides can sync,
//! then sends a full snapshot of those types, then streams committed changes
//! until either side leaves or the peer goes silent.
//!
//! Outbound frames wait in an outbox that the session loop drains as the
//! link accepts them, so inbound frames keep being applied while a large
//! snapshot is still on its way out.

use crate::error::{Result, SyncError};
use crate::frame::{Frame, Handshake, ObjectBatch};
use crate::peers::{Direction, PeerInfo};
use crate::replicator::{stopped, ChangeEvent, Origin, SyncCore};
use crate::transport::PeerLink;
use chrono::Utc;
use loopsync_engine::{Negotiation, ObjectKey, SyncableObject};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{oneshot, Notify};
use tokio::time::{self, Instant, MissedTickBehavior};
use uuid::Uuid;

/// Run a session to completion on an open link.
///
/// `ready` receives the peer once the session is registered, or the reason
/// the handshake failed.
pub(crate) async fn run(
    core: Arc<SyncCore>,
    mut link: PeerLink,
    direction: Direction,
    dialed_port: Option<u16>,
    ready: Option<oneshot::Sender<Result<PeerInfo>>>,
) {
    let session_id = Uuid::new_v4();
    let close = Arc::new(Notify::new());

    let established = establish(&core, &mut link, session_id, direction, dialed_port, &close).await;
    let (peer, negotiation) = match established {
        Ok(established) => established,
        Err(e) => {
            let reason = match &e {
                SyncError::NoSharedSchemas { .. } => "no shared schemas",
                SyncError::DuplicateSession { .. } => "duplicate session",
                SyncError::SelfConnection(_) => "self connection",
                _ => "handshake failed",
            };
            tracing::warn!(
                session_id = %session_id,
                remote = %link.peer_addr(),
                error = %e,
                "session not established"
            );
            link.close(reason).await;
            report(ready, Err(e));
            return;
        }
    };

    // Subscribe before the snapshot so nothing committed meanwhile is missed
    let changes = core.subscribe_changes();
    report(ready, Ok(peer.clone()));

    let mut session = Session {
        core: Arc::clone(&core),
        link,
        session_id,
        peer: peer.app_id.clone(),
        negotiation,
        pending: BTreeMap::new(),
    };

    let reason = match session.snapshot() {
        Ok(outbox) => session.stream(changes, &close, outbox).await,
        Err(e) => {
            tracing::warn!(session_id = %session_id, peer = %peer.app_id, error = %e, "snapshot failed");
            Exit::Goodbye("snapshot failed")
        }
    };

    core.peers.unregister(&session_id);
    match reason {
        Exit::Goodbye(reason) => {
            tracing::info!(session_id = %session_id, peer = %peer.app_id, reason = %reason, "session closed");
            session.link.close(reason).await;
        }
        Exit::Remote(reason) => {
            tracing::info!(session_id = %session_id, peer = %peer.app_id, reason = %reason, "session closed by peer");
        }
    }
}

fn report(ready: Option<oneshot::Sender<Result<PeerInfo>>>, result: Result<PeerInfo>) {
    if let Some(ready) = ready {
        let _ = ready.send(result);
    }
}

/// Exchange handshakes, negotiate and register the session.
async fn establish(
    core: &SyncCore,
    link: &mut PeerLink,
    session_id: Uuid,
    direction: Direction,
    dialed_port: Option<u16>,
    close: &Arc<Notify>,
) -> Result<(PeerInfo, Negotiation)> {
    link.send(Frame::Handshake(core.handshake())).await?;
    let remote = receive_handshake(core, link).await?;

    if remote.app_id == core.config.app_id {
        return Err(SyncError::SelfConnection(remote.app_id));
    }

    let negotiation = core.replica.registry().negotiate(&remote.capabilities);
    for mismatch in &negotiation.version_mismatches {
        tracing::warn!(
            session_id = %session_id,
            peer = %remote.app_id,
            capability = %mismatch.capability,
            local = %mismatch.local,
            remote = %mismatch.remote,
            "capability version mismatch, schema skipped"
        );
    }
    if negotiation.is_empty() {
        return Err(SyncError::NoSharedSchemas {
            peer: remote.app_id,
        });
    }

    let now = Utc::now();
    let info = PeerInfo {
        session_id,
        app_id: remote.app_id,
        app_name: remote.app_name,
        app_version: remote.app_version,
        direction,
        remote_addr: link.peer_addr(),
        dialed_port,
        agreed: negotiation.agreed.clone(),
        connected_at: now,
        last_seen: now,
    };
    core.peers.register(info.clone(), Arc::clone(close))?;
    Ok((info, negotiation))
}

async fn receive_handshake(core: &SyncCore, link: &mut PeerLink) -> Result<Handshake> {
    let timeout = core.config.handshake_timeout;
    let frame = time::timeout(timeout, link.recv())
        .await
        .map_err(|_| SyncError::Timeout(timeout))?;
    match frame {
        Some(Ok(Frame::Handshake(handshake))) => Ok(handshake),
        Some(Ok(Frame::Goodbye { reason })) => Err(SyncError::Protocol(format!(
            "peer left during handshake: {reason}"
        ))),
        Some(Ok(other)) => Err(SyncError::Protocol(format!(
            "expected handshake, got {}",
            other.kind()
        ))),
        Some(Err(e)) => Err(e),
        None => Err(SyncError::Closed),
    }
}

/// Why the streaming loop ended.
enum Exit {
    /// We end the session and say goodbye
    Goodbye(&'static str),
    /// The peer ended it
    Remote(String),
}

struct Session {
    core: Arc<SyncCore>,
    link: PeerLink,
    session_id: Uuid,
    peer: String,
    negotiation: Negotiation,
    /// Changes waiting for the debounce window to close
    pending: BTreeMap<ObjectKey, SyncableObject>,
}

impl Session {
    /// Snapshot batches of every agreed type, ready to send.
    fn snapshot(&self) -> Result<VecDeque<Frame>> {
        let max = self.core.config.max_batch_objects;
        let mut frames = VecDeque::new();
        for object_type in &self.negotiation.agreed {
            let objects = self.core.replica.snapshot(object_type)?;
            let batches = ObjectBatch::chunked(object_type, &objects, max);
            tracing::debug!(
                session_id = %self.session_id,
                peer = %self.peer,
                object_type = %object_type,
                objects = objects.len(),
                batches = batches.len(),
                "sending snapshot"
            );
            frames.extend(batches.into_iter().map(Frame::ObjectBatch));
        }
        Ok(frames)
    }

    async fn stream(
        &mut self,
        mut changes: tokio::sync::broadcast::Receiver<ChangeEvent>,
        close: &Notify,
        mut outbox: VecDeque<Frame>,
    ) -> Exit {
        let config = &self.core.config;
        let liveness = config.liveness_timeout();
        let debounce = config.debounce;
        let interval = config.heartbeat_interval;

        let outgoing = self.link.sender();
        let mut shutdown = self.core.shutdown_signal();
        let mut heartbeat = time::interval_at(Instant::now() + interval, interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_seen = Instant::now();

        let flush = time::sleep(debounce);
        tokio::pin!(flush);
        let mut flush_armed = false;

        loop {
            tokio::select! {
                _ = stopped(&mut shutdown) => {
                    return Exit::Goodbye("shutting down");
                }
                _ = close.notified() => {
                    let displaced = !self.core.peers.is_current(&self.peer, &self.session_id);
                    return Exit::Goodbye(if displaced { "duplicate session" } else { "disconnected" });
                }
                frame = self.link.recv() => match frame {
                    None => return Exit::Remote("connection closed".into()),
                    Some(Err(e)) => {
                        tracing::warn!(session_id = %self.session_id, peer = %self.peer, error = %e, "unreadable frame");
                        return Exit::Goodbye("protocol error");
                    }
                    Some(Ok(frame)) => {
                        last_seen = Instant::now();
                        self.core.peers.touch(&self.session_id);
                        if let Some(exit) = self.handle_frame(frame) {
                            return exit;
                        }
                    }
                },
                permit = outgoing.reserve(), if !outbox.is_empty() => match permit {
                    Ok(permit) => {
                        if let Some(frame) = outbox.pop_front() {
                            permit.send(frame);
                        }
                    }
                    Err(_) => return Exit::Goodbye("send failed"),
                },
                event = changes.recv() => match event {
                    Ok(event) => {
                        if self.queue(event) && !flush_armed {
                            flush.as_mut().reset(Instant::now() + debounce);
                            flush_armed = true;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(session_id = %self.session_id, peer = %self.peer, skipped, "change feed lagged, resending snapshot");
                        self.pending.clear();
                        flush_armed = false;
                        match self.snapshot() {
                            Ok(frames) => outbox = frames,
                            Err(e) => {
                                tracing::warn!(session_id = %self.session_id, peer = %self.peer, error = %e, "snapshot failed");
                                return Exit::Goodbye("snapshot failed");
                            }
                        }
                    }
                    Err(RecvError::Closed) => return Exit::Goodbye("shutting down"),
                },
                _ = &mut flush, if flush_armed => {
                    // Keep coalescing until the outbox has drained
                    if outbox.is_empty() {
                        flush_armed = false;
                        outbox.extend(self.drain_pending());
                    } else {
                        flush.as_mut().reset(Instant::now() + debounce);
                    }
                }
                _ = heartbeat.tick() => {
                    if last_seen.elapsed() >= liveness {
                        tracing::warn!(session_id = %self.session_id, peer = %self.peer, timeout = ?liveness, "heartbeat timeout");
                        return Exit::Goodbye("heartbeat timeout");
                    }
                    if outbox.is_empty() {
                        outbox.push_back(Frame::Heartbeat);
                    }
                }
            }
        }
    }

    /// Apply one inbound frame. Returns how to leave if the frame ends the
    /// session.
    fn handle_frame(&mut self, frame: Frame) -> Option<Exit> {
        match frame {
            Frame::Heartbeat => None,
            Frame::Goodbye { reason } => Some(Exit::Remote(reason)),
            Frame::Handshake(_) => {
                tracing::warn!(session_id = %self.session_id, peer = %self.peer, "unexpected handshake");
                Some(Exit::Goodbye("protocol error"))
            }
            Frame::ObjectBatch(batch) => {
                if !self.negotiation.allows(&batch.object_type) {
                    tracing::warn!(
                        session_id = %self.session_id,
                        peer = %self.peer,
                        object_type = %batch.object_type,
                        "batch for unagreed object type"
                    );
                    return Some(Exit::Goodbye("protocol error"));
                }
                self.apply_batch(batch);
                None
            }
        }
    }

    fn apply_batch(&self, batch: ObjectBatch) {
        let object_type = batch.object_type.clone();
        let received = batch.objects.len();
        let mut changed = 0usize;
        for object in batch.into_objects() {
            let key = object.key();
            match self.core.commit(object, Origin::Peer(self.session_id)) {
                Ok(outcome) if outcome.changed() => changed += 1,
                Ok(_) => {}
                Err(e) => tracing::warn!(
                    session_id = %self.session_id,
                    peer = %self.peer,
                    key = %key,
                    error = %e,
                    "object rejected"
                ),
            }
        }
        tracing::debug!(
            session_id = %self.session_id,
            peer = %self.peer,
            object_type = %object_type,
            received,
            changed,
            "applied batch"
        );
    }

    /// Queue a change for the next flush. Returns whether it was queued.
    fn queue(&mut self, event: ChangeEvent) -> bool {
        if event.origin == Origin::Peer(self.session_id)
            || !self.negotiation.allows(&event.object.object_type)
        {
            return false;
        }
        let object = event.object;
        match self.pending.get(&object.key()) {
            Some(queued) if queued.revision() >= object.revision() => {}
            _ => {
                self.pending.insert(object.key(), object);
            }
        }
        true
    }

    /// Batch queued changes, one batch sequence per object type.
    fn drain_pending(&mut self) -> Vec<Frame> {
        let mut by_type: BTreeMap<String, Vec<SyncableObject>> = BTreeMap::new();
        for (key, object) in std::mem::take(&mut self.pending) {
            by_type.entry(key.object_type).or_default().push(object);
        }
        let max = self.core.config.max_batch_objects;
        let mut frames = Vec::new();
        for (object_type, objects) in by_type {
            tracing::debug!(
                session_id = %self.session_id,
                peer = %self.peer,
                object_type = %object_type,
                objects = objects.len(),
                "pushing changes"
            );
            frames.extend(
                ObjectBatch::chunked(&object_type, &objects, max)
                    .into_iter()
                    .map(Frame::ObjectBatch),
            );
        }
        frames
    }
}
