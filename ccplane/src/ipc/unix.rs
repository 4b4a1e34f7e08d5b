//! Unix datagram socket backend.
//!
//! The listening side binds `<dir>/<location>-<id>` and runs a background
//! task that forwards every datagram into a bounded queue. The sending side
//! is a plain non-blocking socket that addresses the peer's endpoint path on
//! every send, so the two ends may be set up in either order and a send never
//! waits on the runtime's readiness tracking.

use std::fs;
use std::io;
use std::os::unix::net::UnixDatagram as StdUnixDatagram;
use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::UnixDatagram;
use tokio::sync::{mpsc, watch};

use crate::config::IpcConfig;
use crate::error::{CcpError, Result};
use crate::ipc::{endpoint_path, Backend, BackendBuilder};

/// First pause after a failed read on the listening socket.
const READ_RETRY_MIN: Duration = Duration::from_millis(10);
/// Longest pause between failed reads.
const READ_RETRY_MAX: Duration = Duration::from_secs(1);

pub struct UnixBuilder {
    config: IpcConfig,
    listen: Option<PathBuf>,
    send: Option<PathBuf>,
    err: Option<CcpError>,
}

impl UnixBuilder {
    pub fn new(config: IpcConfig) -> Self {
        Self {
            config,
            listen: None,
            send: None,
            err: None,
        }
    }
}

impl BackendBuilder for UnixBuilder {
    type Backend = UnixBackend;

    fn prepare_listen(mut self, location: &str, id: u32) -> Self {
        if self.err.is_none() {
            match endpoint_path(&self.config.dir, location, id) {
                Ok(path) => self.listen = Some(path),
                Err(e) => self.err = Some(e),
            }
        }
        self
    }

    fn prepare_send(mut self, location: &str, id: u32) -> Self {
        if self.err.is_none() {
            match endpoint_path(&self.config.dir, location, id) {
                Ok(path) => self.send = Some(path),
                Err(e) => self.err = Some(e),
            }
        }
        self
    }

    /// Bind the listener and open the sender. Must be called from within a
    /// tokio runtime when a listener is prepared.
    fn finish_setup(self) -> Result<UnixBackend> {
        if let Some(e) = self.err {
            tracing::error!(error = %e, "error setting up IPC");
            return Err(e);
        }

        let (kill, _) = watch::channel(false);
        let mut backend = UnixBackend {
            inbound: Mutex::new(None),
            kill,
            out: None,
            open_files: Mutex::new(Vec::new()),
        };

        if let Some(path) = self.listen {
            if let Err(e) = backend.bind(path, &self.config) {
                tracing::error!(error = %e, "error setting up IPC listener");
                let _ = backend.close();
                return Err(e);
            }
        }

        if let Some(path) = self.send {
            let socket = StdUnixDatagram::unbound().and_then(|s| {
                s.set_nonblocking(true)?;
                Ok(s)
            });
            match socket {
                Ok(socket) => backend.out = Some((socket, path)),
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "error creating IPC sender");
                    let _ = backend.close();
                    return Err(e.into());
                }
            }
        }

        Ok(backend)
    }
}

pub struct UnixBackend {
    inbound: Mutex<Option<mpsc::Receiver<Bytes>>>,
    kill: watch::Sender<bool>,
    out: Option<(StdUnixDatagram, PathBuf)>,
    open_files: Mutex<Vec<PathBuf>>,
}

impl UnixBackend {
    fn bind(&mut self, path: PathBuf, config: &IpcConfig) -> Result<()> {
        fs::create_dir_all(&config.dir)?;
        match fs::remove_file(&path) {
            Ok(()) => tracing::debug!(path = %path.display(), "removed stale endpoint"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let socket = UnixDatagram::bind(&path)?;
        self.open_files.lock().push(path);

        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        *self.inbound.lock() = Some(rx);
        tokio::spawn(listen_loop(
            socket,
            tx,
            self.kill.subscribe(),
            config.max_message_size,
        ));
        Ok(())
    }
}

impl Backend for UnixBackend {
    /// Fails with `WouldBlock` when the peer's receive queue is full.
    fn send(&self, buf: &[u8]) -> Result<()> {
        let (socket, peer) = self.out.as_ref().ok_or(CcpError::NotConfigured("send"))?;
        socket.send_to(buf, peer)?;
        Ok(())
    }

    fn listen(&self) -> Result<mpsc::Receiver<Bytes>> {
        let mut inbound = self.inbound.lock();
        if self.open_files.lock().is_empty() && inbound.is_none() {
            return Err(CcpError::NotConfigured("listen"));
        }
        inbound.take().ok_or(CcpError::AlreadyListening)
    }

    fn close(&self) -> Result<()> {
        self.kill.send_replace(true);
        for path in self.open_files.lock().drain(..) {
            if let Err(e) = fs::remove_file(&path) {
                if e.kind() != io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %e, "could not remove endpoint");
                }
            }
        }
        Ok(())
    }
}

impl Drop for UnixBackend {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

async fn listen_loop(
    socket: UnixDatagram,
    tx: mpsc::Sender<Bytes>,
    mut killed: watch::Receiver<bool>,
    max_message_size: usize,
) {
    let mut buf = vec![0u8; max_message_size.max(1)];
    let mut backoff = Duration::ZERO;
    loop {
        if *killed.borrow_and_update() {
            break;
        }

        let n = tokio::select! {
            _ = killed.changed() => continue,
            r = socket.recv(&mut buf) => match r {
                Ok(n) => n,
                Err(e) if is_transient(e.kind()) => continue,
                Err(e) => {
                    backoff = next_backoff(backoff);
                    tracing::warn!(
                        error = %e,
                        retry_in_ms = backoff.as_millis() as u64,
                        "IPC read failed"
                    );
                    tokio::select! {
                        _ = killed.changed() => {}
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    continue;
                }
            },
        };
        backoff = Duration::ZERO;

        tokio::select! {
            _ = killed.changed() => continue,
            r = tx.send(Bytes::copy_from_slice(&buf[..n])) => {
                if r.is_err() {
                    break;
                }
            }
        }
    }
    tracing::info!("IPC listener killed, closing");
}

fn is_transient(kind: io::ErrorKind) -> bool {
    matches!(kind, io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted)
}

/// Pause before the next read after a failure, doubling from
/// `READ_RETRY_MIN` up to `READ_RETRY_MAX`.
fn next_backoff(current: Duration) -> Duration {
    (current * 2).clamp(READ_RETRY_MIN, READ_RETRY_MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_backoff_doubles_up_to_cap() {
        let mut b = Duration::ZERO;
        let mut seen = Vec::new();
        for _ in 0..10 {
            b = next_backoff(b);
            seen.push(b.as_millis());
        }
        assert_eq!(
            seen,
            vec![10, 20, 40, 80, 160, 320, 640, 1000, 1000, 1000]
        );
    }

    #[test]
    fn only_interrupts_retry_without_pause() {
        assert!(is_transient(io::ErrorKind::Interrupted));
        assert!(is_transient(io::ErrorKind::WouldBlock));
        assert!(!is_transient(io::ErrorKind::ConnectionRefused));
        assert!(!is_transient(io::ErrorKind::InvalidInput));
        assert!(!is_transient(io::ErrorKind::Other));
    }

    #[tokio::test]
    async fn sender_is_usable_immediately() {
        let dir = std::env::temp_dir().join(format!("ccplane-unit-{}-now", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        let config = IpcConfig {
            dir,
            ..IpcConfig::default()
        };
        let rx_side = UnixBuilder::new(config.clone())
            .prepare_listen("now", 1)
            .finish_setup()
            .unwrap();
        let mut rx = rx_side.listen().unwrap();

        let tx_side = UnixBuilder::new(config)
            .prepare_send("now", 1)
            .finish_setup()
            .unwrap();
        tx_side.send(b"first").unwrap();
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"first"));
    }
}
