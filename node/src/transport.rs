//! Loopback session transport.
//!
//! A [`PeerLink`] wraps one TCP stream with its own reader and writer tasks,
//! so a slow peer only ever backs up its own buffers. Frames flow through
//! bounded channels on both sides.

use crate::error::{Result, SyncError};
use crate::frame::{read_frame, write_frame, Frame};
use crate::port::{BoundPort, PortAllocator};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Frames buffered per direction of a link.
const LINK_BUFFER: usize = 64;

/// How long `close` waits for the goodbye to be flushed.
const CLOSE_FLUSH: Duration = Duration::from_secs(1);

/// A framed, full-duplex connection to one peer.
#[derive(Debug)]
pub struct PeerLink {
    peer_addr: SocketAddr,
    outgoing: mpsc::Sender<Frame>,
    incoming: mpsc::Receiver<Result<Frame>>,
    reader: JoinHandle<()>,
    writer: Option<JoinHandle<()>>,
}

impl PeerLink {
    /// Take ownership of a connected stream and start its I/O tasks.
    pub fn new(stream: TcpStream) -> Result<Self> {
        let peer_addr = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        let (mut read_half, mut write_half) = stream.into_split();

        let (in_tx, in_rx) = mpsc::channel::<Result<Frame>>(LINK_BUFFER);
        let reader = tokio::spawn(async move {
            loop {
                match read_frame(&mut read_half).await {
                    Ok(Some(frame)) => {
                        if in_tx.send(Ok(frame)).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let _ = in_tx.send(Err(e)).await;
                        break;
                    }
                }
            }
        });

        let (out_tx, mut out_rx) = mpsc::channel::<Frame>(LINK_BUFFER);
        let writer = tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let last = matches!(frame, Frame::Goodbye { .. });
                if let Err(e) = write_frame(&mut write_half, &frame).await {
                    tracing::debug!(peer = %peer_addr, error = %e, "link write failed");
                    break;
                }
                if last {
                    break;
                }
            }
        });

        Ok(Self {
            peer_addr,
            outgoing: out_tx,
            incoming: in_rx,
            reader,
            writer: Some(writer),
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Queue a frame for the writer task.
    pub async fn send(&self, frame: Frame) -> Result<()> {
        self.outgoing
            .send(frame)
            .await
            .map_err(|_| SyncError::Closed)
    }

    /// A handle for queueing frames while `recv` is borrowed.
    pub fn sender(&self) -> mpsc::Sender<Frame> {
        self.outgoing.clone()
    }

    /// Next inbound frame; `None` once the peer closed the stream.
    pub async fn recv(&mut self) -> Option<Result<Frame>> {
        self.incoming.recv().await
    }

    /// Send a goodbye, wait briefly for it to flush, and tear the link down.
    pub async fn close(mut self, reason: &str) {
        let _ = self.outgoing.try_send(Frame::goodbye(reason));
        if let Some(writer) = self.writer.take() {
            let abort = writer.abort_handle();
            if tokio::time::timeout(CLOSE_FLUSH, writer).await.is_err() {
                abort.abort();
            }
        }
    }
}

impl Drop for PeerLink {
    fn drop(&mut self) {
        self.reader.abort();
        if let Some(writer) = &self.writer {
            writer.abort();
        }
    }
}

/// Open a link to `host:port`.
pub async fn connect(host: IpAddr, port: u16, timeout: Duration) -> Result<PeerLink> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect((host, port)))
        .await
        .map_err(|_| SyncError::Timeout(timeout))??;
    PeerLink::new(stream)
}

/// Bind a listener, re-running the allocator from `preferred + attempt` with
/// a fixed backoff between attempts.
pub async fn listen(
    allocator: &PortAllocator,
    preferred: u16,
    attempts: u32,
    backoff: Duration,
) -> Result<BoundPort> {
    let attempts = attempts.max(1);
    for attempt in 0..attempts {
        let offset = u16::try_from(attempt).unwrap_or(u16::MAX);
        let start = preferred.saturating_add(offset);
        match allocator.allocate_from(start, preferred).await {
            Ok(bound) => return Ok(bound),
            Err(e) => {
                tracing::warn!(attempt, preferred, error = %e, "bind attempt failed");
                if attempt + 1 < attempts {
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
    Err(SyncError::BindExhausted { attempts })
}

/// A running accept loop.
#[derive(Debug)]
pub struct ServerHandle {
    pub port: u16,
    pub ephemeral: bool,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// Accept loopback connections until `shutdown` flips to true.
    ///
    /// Connections from non-loopback addresses are dropped unanswered.
    pub fn spawn<F>(bound: BoundPort, mut shutdown: watch::Receiver<bool>, on_accept: F) -> Self
    where
        F: Fn(TcpStream, SocketAddr) + Send + 'static,
    {
        let BoundPort {
            listener,
            port,
            ephemeral,
            ..
        } = bound;

        let task = tokio::spawn(async move {
            tracing::info!(port, ephemeral, "accepting peers");
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    accepted = listener.accept() => match accepted {
                        Ok((stream, addr)) if addr.ip().is_loopback() => on_accept(stream, addr),
                        Ok((_, addr)) => {
                            tracing::warn!(peer = %addr, "rejected non-loopback connection");
                        }
                        Err(e) => {
                            tracing::error!(port, error = %e, "accept failed");
                            tokio::time::sleep(Duration::from_millis(50)).await;
                        }
                    },
                }
            }
            drop(listener);
            tracing::info!(port, "listener released");
        });

        Self {
            port,
            ephemeral,
            task,
        }
    }

    pub fn into_task(self) -> JoinHandle<()> {
        self.task
    }
}

/// Bound listener for tests and callers that bring their own socket.
pub async fn bind_exact(host: IpAddr, port: u16) -> Result<BoundPort> {
    let listener = TcpListener::bind((host, port)).await?;
    let port = listener.local_addr()?.port();
    Ok(BoundPort {
        listener,
        port,
        preferred: port,
        ephemeral: false,
    })
}
