//! Congestion control module.
//!
//! Defines the `Controller` trait every algorithm implements, the
//! `OutboundSink` controllers publish window updates through, and the
//! registry algorithms are discovered by name. CUBIC is the reference
//! algorithm.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;

pub mod cubic;
pub mod registry;

pub use registry::AlgorithmRegistry;

/// Loss or completion signal delivered to a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropEvent {
    /// A single, locally detected loss (e.g. three duplicate acks).
    Isolated,
    /// The connection ended or asked for a reset.
    Complete,
    /// A value this build does not know about. Controllers ignore it.
    Unknown(u8),
}

impl DropEvent {
    pub fn to_u8(self) -> u8 {
        match self {
            DropEvent::Isolated => 0,
            DropEvent::Complete => 1,
            DropEvent::Unknown(v) => v,
        }
    }
}

impl From<u8> for DropEvent {
    fn from(v: u8) -> Self {
        match v {
            0 => DropEvent::Isolated,
            1 => DropEvent::Complete,
            other => DropEvent::Unknown(other),
        }
    }
}

impl fmt::Display for DropEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropEvent::Isolated => write!(f, "isolated"),
            DropEvent::Complete => write!(f, "complete"),
            DropEvent::Unknown(v) => write!(f, "unknown({v})"),
        }
    }
}

/// Where controllers publish window updates.
pub trait OutboundSink: Send + Sync {
    /// Publish the permitted in-flight byte count for connection `sid`.
    fn send_window_update(&self, sid: u32, window_bytes: u32) -> Result<()>;
}

/// Trait for pluggable congestion control algorithms.
///
/// No method may block: each is invoked from the connection's event path and
/// must return after bounded work.
pub trait Controller: Send {
    /// Registered name of the algorithm.
    fn name(&self) -> &str;

    /// Bind to connection `sid`. Called once, before any other callback.
    fn on_create(&mut self, sid: u32, sink: Arc<dyn OutboundSink>);

    /// Bytes up to `ack` were acknowledged; `rtt` is the latest sample
    /// (zero when none was taken).
    ///
    /// `ack` counts bytes from the start of the stream, not from the wire
    /// sequence space: the first acknowledged segment of a connection
    /// arrives as its length whatever the ISN was. It wraps at 2^32.
    fn on_ack(&mut self, ack: u32, rtt: Duration);

    /// A loss or completion was observed.
    fn on_drop(&mut self, event: DropEvent);
}

impl fmt::Debug for dyn Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "controller({})", self.name())
    }
}
