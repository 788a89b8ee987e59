//! Deterministic port allocation.
//!
//! Each app listens near a port derived from its id, so siblings can find it
//! without a directory. The derivation is the 31-multiplier string hash over
//! UTF-16 code units with wrapping 32-bit arithmetic, identical in every
//! implementation that takes part in sync.

use crate::error::{Result, SyncError};
use std::net::IpAddr;
use tokio::net::TcpListener;

/// 31-multiplier hash of `app_id` over UTF-16 code units.
pub fn app_hash(app_id: &str) -> i32 {
    app_id
        .encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(i32::from(unit)))
}

/// The port `app_id` tries first within a domain starting at `base_port`.
pub fn preferred_port(app_id: &str, base_port: u16) -> u16 {
    // |h % 100| < 100, so the cast is lossless
    let offset = (app_hash(app_id) % 100).unsigned_abs() as u16;
    base_port.saturating_add(offset)
}

/// A listener that is already bound, with how it was obtained.
#[derive(Debug)]
pub struct BoundPort {
    pub listener: TcpListener,
    pub port: u16,
    /// Port derived from the app id
    pub preferred: u16,
    /// Whether the OS picked the port after the window was exhausted
    pub ephemeral: bool,
}

/// Binds listeners in a window of ports.
#[derive(Debug, Clone)]
pub struct PortAllocator {
    host: IpAddr,
    window: u16,
}

impl PortAllocator {
    pub fn new(host: IpAddr, window: u16) -> Self {
        Self {
            host,
            window: window.max(1),
        }
    }

    /// Bind the first free port from `app_id`'s preferred port.
    pub async fn allocate(&self, app_id: &str, base_port: u16) -> Result<BoundPort> {
        let preferred = preferred_port(app_id, base_port);
        self.allocate_from(preferred, preferred).await
    }

    /// Bind the first free port in `start..start + window`, then fall back to
    /// an ephemeral port.
    pub async fn allocate_from(&self, start: u16, preferred: u16) -> Result<BoundPort> {
        for offset in 0..self.window {
            let Some(port) = start.checked_add(offset) else {
                break;
            };
            if port == 0 {
                continue;
            }
            match TcpListener::bind((self.host, port)).await {
                Ok(listener) => {
                    tracing::debug!(port, preferred, "bound listener");
                    return Ok(BoundPort {
                        listener,
                        port,
                        preferred,
                        ephemeral: false,
                    });
                }
                Err(e) => tracing::trace!(port, error = %e, "port unavailable"),
            }
        }

        match TcpListener::bind((self.host, 0)).await {
            Ok(listener) => {
                let port = listener.local_addr()?.port();
                tracing::warn!(
                    port,
                    preferred,
                    window = self.window,
                    "port window exhausted, using ephemeral port"
                );
                Ok(BoundPort {
                    listener,
                    port,
                    preferred,
                    ephemeral: true,
                })
            }
            Err(e) => {
                tracing::error!(preferred, error = %e, "ephemeral bind failed");
                Err(SyncError::PortExhaustion { preferred })
            }
        }
    }
}
