//! Receive reassembly buffer.
//!
//! Out-of-order payloads wait here, keyed by stream offset, until the
//! cumulative ack reaches them.

use std::collections::BTreeMap;

use bytes::Bytes;

use crate::error::{CcpError, Result};

/// A contiguous run released by [`RcvWindow::cum_ack`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advance {
    /// New cumulative ack offset.
    pub ack: u64,
    /// Released payloads with their offsets, in order.
    pub segments: Vec<(u64, Bytes)>,
}

#[derive(Debug, Default)]
pub struct RcvWindow {
    pkts: BTreeMap<u64, Bytes>,
}

impl RcvWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, seq: u64) -> bool {
        self.pkts.contains_key(&seq)
    }

    pub fn add(&mut self, seq: u64, payload: Bytes) {
        self.pkts.entry(seq).or_insert(payload);
    }

    /// Advance `current` across every buffered segment that starts exactly
    /// where the previous one ended.
    ///
    /// Fails with `NoProgress` (carrying `current` unchanged) when the
    /// segment at `current` has not arrived yet.
    pub fn cum_ack(&mut self, current: u64) -> Result<Advance> {
        let mut ack = current;
        let mut segments = Vec::new();
        while let Some(payload) = self.pkts.remove(&ack) {
            let next = ack + payload.len() as u64;
            segments.push((ack, payload));
            ack = next;
        }

        if segments.is_empty() {
            return Err(CcpError::NoProgress { ack: current });
        }

        // Anything still buffered below the new ack overlaps delivered data.
        self.pkts.retain(|&seq, _| seq >= ack);
        Ok(Advance { ack, segments })
    }

    pub fn len(&self) -> usize {
        self.pkts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pkts.is_empty()
    }

    pub fn clear(&mut self) {
        self.pkts.clear();
    }
}
