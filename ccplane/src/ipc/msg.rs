//! Control messages exchanged between the dataplane and the control plane.
//!
//! Binary layout (all fields big-endian), one message per datagram:
//!
//! ```text
//! CREATE  (0x01): sid(4) + alg_len(2) + alg(alg_len, utf-8)
//! MEASURE (0x02): sid(4) + ack(4) + rtt_us(8)
//! DROP    (0x03): sid(4) + event(1)
//! CWND    (0x04): sid(4) + cwnd(4)
//! ```

use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::congestion::DropEvent;
use crate::error::{CcpError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MsgType {
    Create = 0x01,
    Measure = 0x02,
    Drop = 0x03,
    Cwnd = 0x04,
}

impl TryFrom<u8> for MsgType {
    type Error = CcpError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(MsgType::Create),
            0x02 => Ok(MsgType::Measure),
            0x03 => Ok(MsgType::Drop),
            0x04 => Ok(MsgType::Cwnd),
            other => Err(CcpError::UnknownMessageType(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Msg {
    /// Bind a new connection to the named algorithm.
    Create { sid: u32, alg: String },
    /// An acknowledgment and its RTT sample.
    Measure { sid: u32, ack: u32, rtt_us: u64 },
    /// A loss or completion signal.
    Drop { sid: u32, event: DropEvent },
    /// A window update, in bytes.
    Cwnd { sid: u32, cwnd: u32 },
}

impl Msg {
    pub fn measure(sid: u32, ack: u32, rtt: Duration) -> Self {
        Msg::Measure {
            sid,
            ack,
            rtt_us: rtt.as_micros().min(u64::MAX as u128) as u64,
        }
    }

    pub fn msg_type(&self) -> MsgType {
        match self {
            Msg::Create { .. } => MsgType::Create,
            Msg::Measure { .. } => MsgType::Measure,
            Msg::Drop { .. } => MsgType::Drop,
            Msg::Cwnd { .. } => MsgType::Cwnd,
        }
    }

    /// Connection the message concerns.
    pub fn sid(&self) -> u32 {
        match self {
            Msg::Create { sid, .. }
            | Msg::Measure { sid, .. }
            | Msg::Drop { sid, .. }
            | Msg::Cwnd { sid, .. } => *sid,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u8(self.msg_type() as u8);
        buf.put_u32(self.sid());
        match self {
            Msg::Create { alg, .. } => {
                buf.put_u16(alg.len() as u16);
                buf.put_slice(alg.as_bytes());
            }
            Msg::Measure { ack, rtt_us, .. } => {
                buf.put_u32(*ack);
                buf.put_u64(*rtt_us);
            }
            Msg::Drop { event, .. } => buf.put_u8(event.to_u8()),
            Msg::Cwnd { cwnd, .. } => buf.put_u32(*cwnd),
        }
    }

    pub fn encoded_len(&self) -> usize {
        1 + 4
            + match self {
                Msg::Create { alg, .. } => 2 + alg.len(),
                Msg::Measure { .. } => 4 + 8,
                Msg::Drop { .. } => 1,
                Msg::Cwnd { .. } => 4,
            }
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        ensure_len(data, 5)?;
        let msg_type = MsgType::try_from(data[0])?;
        let sid = (&data[1..5]).get_u32();
        let mut data = &data[5..];

        match msg_type {
            MsgType::Create => {
                ensure_len(data, 2)?;
                let len = data.get_u16() as usize;
                ensure_len(data, len)?;
                let alg = std::str::from_utf8(&data[..len])
                    .map_err(|_| CcpError::InvalidAlgorithmName)?
                    .to_string();
                Ok(Msg::Create { sid, alg })
            }
            MsgType::Measure => {
                ensure_len(data, 12)?;
                let ack = data.get_u32();
                let rtt_us = data.get_u64();
                Ok(Msg::Measure { sid, ack, rtt_us })
            }
            MsgType::Drop => {
                ensure_len(data, 1)?;
                Ok(Msg::Drop {
                    sid,
                    event: DropEvent::from(data[0]),
                })
            }
            MsgType::Cwnd => {
                ensure_len(data, 4)?;
                Ok(Msg::Cwnd {
                    sid,
                    cwnd: data.get_u32(),
                })
            }
        }
    }
}

fn ensure_len(data: &[u8], needed: usize) -> Result<()> {
    if data.len() < needed {
        Err(CcpError::MessageTooShort {
            expected: needed,
            actual: data.len(),
        })
    } else {
        Ok(())
    }
}
