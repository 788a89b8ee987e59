//! Wire frames exchanged between peers.
//!
//! Every frame is a u32 big-endian length followed by a JSON document tagged
//! with `type`. Frames larger than [`MAX_FRAME_SIZE`] are rejected on both
//! ends.

use crate::error::{Result, SyncError};
use loopsync_engine::{FieldMap, ObjectType, SyncableObject, Timestamp, Version};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum frame body size (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Frames of the replication protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// First frame on every session, in both directions.
    Handshake(Handshake),
    /// Objects of one type, from a snapshot or the live change feed.
    ObjectBatch(ObjectBatch),
    /// Keep-alive; any frame counts as liveness.
    Heartbeat,
    /// Orderly close.
    Goodbye { reason: String },
}

impl Frame {
    pub fn goodbye(reason: impl Into<String>) -> Self {
        Frame::Goodbye {
            reason: reason.into(),
        }
    }

    /// Frame name as used on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Handshake(_) => "handshake",
            Frame::ObjectBatch(_) => "object_batch",
            Frame::Heartbeat => "heartbeat",
            Frame::Goodbye { .. } => "goodbye",
        }
    }
}

/// Identity and capabilities of a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub app_id: String,
    pub app_name: String,
    pub app_version: String,
    /// Capability name to version
    pub capabilities: BTreeMap<String, String>,
}

/// A batch of objects sharing one object type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectBatch {
    pub object_type: ObjectType,
    pub objects: Vec<WireObject>,
}

/// An object without its type, which the enclosing batch carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireObject {
    pub id: String,
    pub version: Version,
    pub last_modified: Timestamp,
    pub fields: FieldMap,
}

impl From<&SyncableObject> for WireObject {
    fn from(object: &SyncableObject) -> Self {
        Self {
            id: object.object_id.clone(),
            version: object.version,
            last_modified: object.last_modified,
            fields: object.fields.clone(),
        }
    }
}

impl WireObject {
    pub fn into_object(self, object_type: &str) -> SyncableObject {
        SyncableObject {
            object_type: object_type.to_string(),
            object_id: self.id,
            version: self.version,
            last_modified: self.last_modified,
            fields: self.fields,
        }
    }
}

impl ObjectBatch {
    /// Split objects of one type into batches of at most `max` objects.
    pub fn chunked(object_type: &str, objects: &[SyncableObject], max: usize) -> Vec<ObjectBatch> {
        objects
            .chunks(max.max(1))
            .map(|chunk| ObjectBatch {
                object_type: object_type.to_string(),
                objects: chunk.iter().map(WireObject::from).collect(),
            })
            .collect()
    }

    pub fn into_objects(self) -> Vec<SyncableObject> {
        let object_type = self.object_type;
        self.objects
            .into_iter()
            .map(|o| o.into_object(&object_type))
            .collect()
    }
}

/// Serialize a frame with its length prefix.
pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(frame)
        .map_err(|e| SyncError::Frame(format!("JSON encode error: {e}")))?;
    if body.len() > MAX_FRAME_SIZE {
        return Err(SyncError::Frame(format!(
            "frame too large: {} bytes",
            body.len()
        )));
    }
    let len = u32::try_from(body.len())
        .map_err(|_| SyncError::Frame(format!("frame too large: {} bytes", body.len())))?;

    let mut buf = Vec::with_capacity(4 + body.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&body);
    Ok(buf)
}

/// Read one frame. Returns `Ok(None)` on a clean end of stream between frames.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Frame>> {
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(len_bytes) as usize;

    if len > MAX_FRAME_SIZE {
        return Err(SyncError::Frame(format!("frame too large: {len} bytes")));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;

    serde_json::from_slice(&body)
        .map(Some)
        .map_err(|e| SyncError::Frame(format!("JSON decode error: {e}")))
}

/// Write one frame and flush.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &Frame) -> Result<()> {
    let buf = encode_frame(frame)?;
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}
