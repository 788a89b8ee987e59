//! Unified error handling for the sync runtime.

use std::time::Duration;

/// Sync runtime error type.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("no free port near {preferred} and no ephemeral port available")]
    PortExhaustion { preferred: u16 },

    #[error("listener bind failed after {attempts} attempts")]
    BindExhausted { attempts: u32 },

    #[error("sync unavailable: {0}")]
    SyncUnavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame error: {0}")]
    Frame(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("no shared schemas with {peer}")]
    NoSharedSchemas { peer: String },

    #[error("already connected to {peer}")]
    DuplicateSession { peer: String },

    #[error("refusing to sync with own app id {0}")]
    SelfConnection(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection closed")]
    Closed,

    #[error("engine error: {0}")]
    Engine(#[from] loopsync_engine::Error),
}

impl SyncError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SyncError::Io(_) | SyncError::Timeout(_) | SyncError::Closed
        )
    }
}

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_errors_convert() {
        let err: SyncError = loopsync_engine::Error::UnknownObjectType("theme".into()).into();
        assert_eq!(err.to_string(), "engine error: unknown object type: theme");
        assert!(!err.is_transient());
    }

    #[test]
    fn transient_classification() {
        assert!(SyncError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(SyncError::Closed.is_transient());
        assert!(!SyncError::NoSharedSchemas { peer: "a".into() }.is_transient());
    }
}
