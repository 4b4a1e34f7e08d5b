//! In-process backend.
//!
//! Endpoints register a bounded queue in a shared [`MemoryHub`] under their
//! endpoint name; senders look the peer up by name on every send.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::config::IpcConfig;
use crate::error::{CcpError, Result};
use crate::ipc::{endpoint_name, Backend, BackendBuilder};

/// Shared namespace of in-process endpoints.
#[derive(Debug, Clone, Default)]
pub struct MemoryHub {
    endpoints: Arc<Mutex<HashMap<String, mpsc::Sender<Bytes>>>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder(&self, config: &IpcConfig) -> MemoryBuilder {
        MemoryBuilder {
            hub: self.clone(),
            queue_capacity: config.queue_capacity.max(1),
            listen: None,
            send: None,
            err: None,
        }
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.endpoints.lock().contains_key(name)
    }

    fn register(&self, name: &str, tx: mpsc::Sender<Bytes>) -> Result<()> {
        let mut endpoints = self.endpoints.lock();
        if endpoints.contains_key(name) {
            return Err(CcpError::InvalidAddress(format!(
                "endpoint {name} already in use"
            )));
        }
        endpoints.insert(name.to_string(), tx);
        Ok(())
    }

    fn lookup(&self, name: &str) -> Option<mpsc::Sender<Bytes>> {
        self.endpoints.lock().get(name).cloned()
    }

    fn unregister(&self, name: &str) {
        self.endpoints.lock().remove(name);
    }
}

pub struct MemoryBuilder {
    hub: MemoryHub,
    queue_capacity: usize,
    listen: Option<String>,
    send: Option<String>,
    err: Option<CcpError>,
}

impl BackendBuilder for MemoryBuilder {
    type Backend = MemoryBackend;

    fn prepare_listen(mut self, location: &str, id: u32) -> Self {
        if self.err.is_none() {
            match endpoint_name(location, id) {
                Ok(name) => self.listen = Some(name),
                Err(e) => self.err = Some(e),
            }
        }
        self
    }

    fn prepare_send(mut self, location: &str, id: u32) -> Self {
        if self.err.is_none() {
            match endpoint_name(location, id) {
                Ok(name) => self.send = Some(name),
                Err(e) => self.err = Some(e),
            }
        }
        self
    }

    fn finish_setup(self) -> Result<MemoryBackend> {
        if let Some(e) = self.err {
            tracing::error!(error = %e, "error setting up IPC");
            return Err(e);
        }

        let mut inbound = None;
        if let Some(name) = &self.listen {
            let (tx, rx) = mpsc::channel(self.queue_capacity);
            self.hub.register(name, tx)?;
            inbound = Some(rx);
        }

        Ok(MemoryBackend {
            hub: self.hub,
            listen: Mutex::new(self.listen),
            inbound: Mutex::new(inbound),
            peer: self.send,
        })
    }
}

pub struct MemoryBackend {
    hub: MemoryHub,
    listen: Mutex<Option<String>>,
    inbound: Mutex<Option<mpsc::Receiver<Bytes>>>,
    peer: Option<String>,
}

impl Backend for MemoryBackend {
    fn send(&self, buf: &[u8]) -> Result<()> {
        let peer = self.peer.as_deref().ok_or(CcpError::NotConfigured("send"))?;
        let tx = self.hub.lookup(peer).ok_or_else(|| {
            CcpError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no endpoint named {peer}"),
            ))
        })?;
        match tx.try_send(Bytes::copy_from_slice(buf)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(CcpError::Io(io::Error::new(
                io::ErrorKind::WouldBlock,
                format!("endpoint {peer} queue full"),
            ))),
            Err(TrySendError::Closed(_)) => Err(CcpError::ConnectionClosed),
        }
    }

    fn listen(&self) -> Result<mpsc::Receiver<Bytes>> {
        let mut inbound = self.inbound.lock();
        if let Some(rx) = inbound.take() {
            return Ok(rx);
        }
        if self.listen.lock().is_some() {
            Err(CcpError::AlreadyListening)
        } else {
            Err(CcpError::NotConfigured("listen"))
        }
    }

    fn close(&self) -> Result<()> {
        if let Some(name) = self.listen.lock().take() {
            self.hub.unregister(&name);
            tracing::debug!(endpoint = %name, "closed in-process endpoint");
        }
        self.inbound.lock().take();
        Ok(())
    }
}

impl Drop for MemoryBackend {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
