//! ccplane -- reliable datagram delivery with a decoupled congestion control
//! plane.
//!
//! - **socket**: per-connection sequencing, loss detection and reassembly
//!   over any datagram source
//! - **congestion**: the `Controller` trait, a name-keyed algorithm
//!   registry and CUBIC
//! - **ipc**: a binary control-message codec and the transports that carry
//!   it (unix datagram sockets, in-process queues)
//! - **agent**: hosting controllers out of process

pub mod agent;
pub mod clock;
pub mod config;
pub mod congestion;
pub mod error;
pub mod ipc;
pub mod segment;
pub mod socket;

// Re-export key public types at crate root.
pub use agent::{route_window_updates, ControlPlane, RemoteController};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{IpcConfig, SockConfig};
pub use congestion::cubic::{Cubic, CubicConfig};
pub use congestion::{AlgorithmRegistry, Controller, DropEvent, OutboundSink};
pub use error::{CcpError, Result};
pub use ipc::{Backend, BackendBuilder, Channel, Msg};
pub use segment::{Flag, Segment};
pub use socket::{Sock, SockStatus, SockTasks};
