//! Datagram segment format.
//!
//! Binary layout (all fields big-endian):
//!
//! ```text
//! +------+---------+---------+---------+-----------+----------------------------+
//! | flag |   seq   |   ack   |   len   |  payload  | [sack_count(2) + 8*N]      |
//! | (1B) |  (4B)   |  (4B)   |  (4B)   |   (len)   | optional tail              |
//! +------+---------+---------+---------+-----------+----------------------------+
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{CcpError, Result};

/// Fixed header: flag + seq + ack + len.
pub const HEADER_LEN: usize = 1 + 4 + 4 + 4;

/// Segment flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Flag {
    Syn = 0,
    SynAck = 1,
    Ack = 2,
    Fin = 3,
}

impl TryFrom<u8> for Flag {
    type Error = CcpError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Flag::Syn),
            1 => Ok(Flag::SynAck),
            2 => Ok(Flag::Ack),
            3 => Ok(Flag::Fin),
            other => Err(CcpError::UnknownFlag(other)),
        }
    }
}

/// A selectively acknowledged byte range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SackBlock {
    pub start: u32,
    pub end: u32,
}

/// One unit of the wire protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub flag: Flag,
    pub seq: u32,
    pub ack: u32,
    pub payload: Bytes,
    pub sack: Vec<SackBlock>,
}

impl Segment {
    /// A pure acknowledgment.
    pub fn ack(ack: u32) -> Self {
        Self {
            flag: Flag::Ack,
            seq: 0,
            ack,
            payload: Bytes::new(),
            sack: Vec::new(),
        }
    }

    /// A data segment, which always carries the ACK flag once established.
    pub fn data(seq: u32, ack: u32, payload: Bytes) -> Self {
        Self {
            flag: Flag::Ack,
            seq,
            ack,
            payload,
            sack: Vec::new(),
        }
    }

    pub fn fin(seq: u32, ack: u32) -> Self {
        Self {
            flag: Flag::Fin,
            seq,
            ack,
            payload: Bytes::new(),
            sack: Vec::new(),
        }
    }

    /// Payload length in bytes.
    pub fn len(&self) -> u32 {
        self.payload.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Encode this segment into a byte buffer.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Encode into a pre-allocated `BytesMut`.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u8(self.flag as u8);
        buf.put_u32(self.seq);
        buf.put_u32(self.ack);
        buf.put_u32(self.payload.len() as u32);
        buf.put_slice(&self.payload);
        if !self.sack.is_empty() {
            buf.put_u16(self.sack.len() as u16);
            for b in &self.sack {
                buf.put_u32(b.start);
                buf.put_u32(b.end);
            }
        }
    }

    /// The total number of bytes this segment will occupy when encoded.
    pub fn encoded_len(&self) -> usize {
        let sack = if self.sack.is_empty() {
            0
        } else {
            2 + self.sack.len() * 8
        };
        HEADER_LEN + self.payload.len() + sack
    }

    /// Decode a segment from the given byte buffer.
    pub fn decode(data: &[u8]) -> Result<Self> {
        ensure_len(data, HEADER_LEN)?;
        let flag = Flag::try_from(data[0])?;
        let seq = (&data[1..5]).get_u32();
        let ack = (&data[5..9]).get_u32();
        let len = (&data[9..13]).get_u32() as usize;
        let data = &data[HEADER_LEN..];
        ensure_len(data, len)?;
        let payload = Bytes::copy_from_slice(&data[..len]);

        let mut tail = &data[len..];
        let mut sack = Vec::new();
        if !tail.is_empty() {
            ensure_len(tail, 2)?;
            let count = tail.get_u16() as usize;
            ensure_len(tail, count * 8)?;
            sack.reserve(count);
            for _ in 0..count {
                let start = tail.get_u32();
                let end = tail.get_u32();
                sack.push(SackBlock { start, end });
            }
        }

        Ok(Segment {
            flag,
            seq,
            ack,
            payload,
            sack,
        })
    }
}

/// One direction's sequence space.
///
/// Wire sequence numbers are 32 bits and wrap. Internally every position is
/// a 64-bit stream offset counted from the initial sequence number, which
/// never wraps and orders correctly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeqSpace {
    isn: u32,
}

impl SeqSpace {
    pub fn new(isn: u32) -> Self {
        Self { isn }
    }

    pub fn isn(&self) -> u32 {
        self.isn
    }

    /// Stream offset of wire number `seq`, taking the candidate within
    /// 2^31 of `reference`. `None` if that lands before the start of the
    /// stream.
    pub fn offset(&self, reference: u64, seq: u32) -> Option<u64> {
        let rel = seq.wrapping_sub(self.isn);
        let distance = rel.wrapping_sub(reference as u32) as i32;
        reference.checked_add_signed(distance as i64)
    }

    /// Wire number of stream offset `offset`.
    pub fn wire(&self, offset: u64) -> u32 {
        self.isn.wrapping_add(offset as u32)
    }
}

fn ensure_len(data: &[u8], needed: usize) -> Result<()> {
    if data.len() < needed {
        Err(CcpError::SegmentTooShort {
            expected: needed,
            actual: data.len(),
        })
    } else {
        Ok(())
    }
}
