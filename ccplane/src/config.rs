//! Configuration for sockets and control-message transports.

use std::path::PathBuf;
use std::sync::Arc;

use crate::clock::{Clock, MonotonicClock};

/// Configuration for a reliable-delivery socket.
#[derive(Debug, Clone)]
pub struct SockConfig {
    /// Initial sequence number of data we send.
    pub local_isn: u32,
    /// Initial sequence number of data the peer sends; offset zero of the
    /// delivery buffer.
    pub peer_isn: u32,
    /// Consecutive duplicate acks that declare a loss.
    pub dup_ack_threshold: u32,
    /// Capacity of the queue between the receive task and the processing
    /// task.
    pub handoff_capacity: usize,
    /// Largest datagram the receive task will read.
    pub max_datagram_size: usize,
    /// Upper bound on the delivery buffer, in bytes past `peer_isn`.
    pub max_read_buffer: usize,
    /// Time source for RTT samples.
    pub clock: Arc<dyn Clock>,
}

impl Default for SockConfig {
    fn default() -> Self {
        Self {
            local_isn: 0,
            peer_isn: 0,
            dup_ack_threshold: 3,
            handoff_capacity: 64,
            max_datagram_size: 2048,
            max_read_buffer: 16 * 1024 * 1024,
            clock: Arc::new(MonotonicClock::new()),
        }
    }
}

/// Configuration for control-message transport backends.
#[derive(Debug, Clone)]
pub struct IpcConfig {
    /// Rendezvous directory shared by all endpoints.
    pub dir: PathBuf,
    /// Capacity of the inbound message queue.
    pub queue_capacity: usize,
    /// Largest control message the listener will read.
    pub max_message_size: usize,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("/tmp/ccp"),
            queue_capacity: 64,
            max_message_size: 1024,
        }
    }
}
