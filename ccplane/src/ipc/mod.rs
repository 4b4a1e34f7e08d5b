//! Control-message transport.
//!
//! A [`Backend`] moves opaque datagrams between two endpoints; a
//! [`Channel`] layers the [`Msg`] codec on top and is what controllers and
//! the control plane talk through.
//!
//! Endpoints are named by a location string plus a connection id, so many
//! connections can share one rendezvous directory (or hub) without
//! colliding.

pub mod memory;
pub mod msg;
pub mod unix;

use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::congestion::OutboundSink;
use crate::error::{CcpError, Result};

pub use memory::{MemoryBackend, MemoryBuilder, MemoryHub};
pub use msg::{Msg, MsgType};
pub use unix::{UnixBackend, UnixBuilder};

/// A bidirectional datagram transport.
pub trait Backend: Send + Sync {
    /// Send one message. Synchronous; failures are returned, never dropped.
    fn send(&self, buf: &[u8]) -> Result<()>;

    /// Take the inbound message queue. It yields messages in arrival order
    /// and ends when the backend is closed. Can be taken once.
    fn listen(&self) -> Result<mpsc::Receiver<Bytes>>;

    /// Stop background receipt and release addressing resources.
    /// Idempotent.
    fn close(&self) -> Result<()>;
}

/// Staged construction of a [`Backend`].
///
/// Errors in the `prepare_*` steps are deferred and reported by
/// `finish_setup`, so setup reads as one chain.
pub trait BackendBuilder: Sized {
    type Backend: Backend;

    fn prepare_listen(self, location: &str, id: u32) -> Self;

    fn prepare_send(self, location: &str, id: u32) -> Self;

    fn finish_setup(self) -> Result<Self::Backend>;
}

/// Unique endpoint name for `location` and connection `id`.
pub fn endpoint_name(location: &str, id: u32) -> Result<String> {
    if location.is_empty() {
        return Err(CcpError::InvalidAddress("empty location".into()));
    }
    if location.contains(['/', '\\', '\0']) {
        return Err(CcpError::InvalidAddress(format!(
            "location {location:?} contains a path separator"
        )));
    }
    Ok(format!("{location}-{id}"))
}

/// Filesystem path of an endpoint inside the rendezvous directory `dir`.
pub fn endpoint_path(dir: &Path, location: &str, id: u32) -> Result<PathBuf> {
    Ok(dir.join(endpoint_name(location, id)?))
}

/// Message-level view of a backend.
pub struct Channel {
    backend: Box<dyn Backend>,
    queue_capacity: usize,
}

impl Channel {
    pub fn new<B: Backend + 'static>(backend: B, queue_capacity: usize) -> Self {
        Self {
            backend: Box::new(backend),
            queue_capacity: queue_capacity.max(1),
        }
    }

    pub fn send_msg(&self, msg: &Msg) -> Result<()> {
        self.backend.send(&msg.encode())
    }

    /// Decoded inbound messages. Undecodable datagrams are logged and
    /// skipped. Must be called from within a tokio runtime.
    pub fn listen(&self) -> Result<mpsc::Receiver<Msg>> {
        let mut raw = self.backend.listen()?;
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        tokio::spawn(async move {
            while let Some(datagram) = raw.recv().await {
                match Msg::decode(&datagram) {
                    Ok(msg) => {
                        if tx.send(msg).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(len = datagram.len(), error = %e, "undecodable control message");
                    }
                }
            }
            tracing::debug!("control channel closed");
        });
        Ok(rx)
    }

    pub fn close(&self) -> Result<()> {
        self.backend.close()
    }
}

impl OutboundSink for Channel {
    fn send_window_update(&self, sid: u32, window_bytes: u32) -> Result<()> {
        self.send_msg(&Msg::Cwnd {
            sid,
            cwnd: window_bytes,
        })
    }
}
