use thiserror::Error;

use crate::segment::Flag;

/// All errors produced by the congestion-control plane.
#[derive(Debug, Error)]
pub enum CcpError {
    #[error("algorithm {0:?} already registered")]
    DuplicateAlgorithm(String),

    #[error("unknown algorithm {0:?}")]
    UnknownAlgorithm(String),

    #[error("invalid endpoint address: {0}")]
    InvalidAddress(String),

    #[error("backend is already listening")]
    AlreadyListening,

    #[error("backend has no {0} side configured")]
    NotConfigured(&'static str),

    #[error("segment too short: expected at least {expected} bytes, got {actual}")]
    SegmentTooShort { expected: usize, actual: usize },

    #[error("unknown segment flag: 0x{0:02x}")]
    UnknownFlag(u8),

    #[error("message too short: expected at least {expected} bytes, got {actual}")]
    MessageTooShort { expected: usize, actual: usize },

    #[error("unknown message type: 0x{0:02x}")]
    UnknownMessageType(u8),

    #[error("algorithm name is not valid utf-8")]
    InvalidAlgorithmName,

    #[error("unexpected {0:?} segment on an established connection")]
    UnexpectedFlag(Flag),

    #[error("ack at offset {ack} covers data that was never sent")]
    NothingOutstanding { ack: u64 },

    #[error("no contiguous progress past offset {ack}")]
    NoProgress { ack: u64 },

    #[error("connection is closed")]
    ConnectionClosed,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CcpError {
    /// Whether this error leaves the connection unusable.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            CcpError::UnexpectedFlag(_) | CcpError::NothingOutstanding { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, CcpError>;
