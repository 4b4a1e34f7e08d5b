//! Outstanding-segment tracker: segments sent but not yet acknowledged,
//! ordered by stream offset.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{CcpError, Result};
use crate::segment::Segment;

#[derive(Debug, Clone)]
struct Outstanding {
    sent_at: Duration,
    len: u32,
    retransmits: u32,
    dropped: bool,
}

/// Result of recording an acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acked {
    /// Cumulative ack offset: every byte below this has been received by
    /// the peer.
    pub seq: u64,
    /// RTT sampled from the newest segment the ack covered. `None` when the
    /// ack covered nothing new or that segment had been retransmitted.
    pub rtt: Option<Duration>,
}

#[derive(Debug, Default)]
pub struct InFlight {
    pkts: BTreeMap<u64, Outstanding>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a transmission of `len` bytes at offset `seq`. Sending an
    /// offset that is already outstanding counts as a retransmission.
    pub fn on_sent(&mut self, now: Duration, seq: u64, len: u32) {
        self.pkts
            .entry(seq)
            .and_modify(|p| {
                p.sent_at = now;
                p.retransmits += 1;
                p.dropped = false;
            })
            .or_insert(Outstanding {
                sent_at: now,
                len,
                retransmits: 0,
                dropped: false,
            });
    }

    /// First unacknowledged offset.
    pub fn start(&self) -> Option<u64> {
        self.pkts.keys().next().copied()
    }

    /// One past the last outstanding byte.
    pub fn end(&self) -> Option<u64> {
        self.pkts
            .iter()
            .next_back()
            .map(|(seq, p)| seq + p.len as u64)
    }

    /// Remove every segment fully covered by `ack`.
    ///
    /// Fails with `NothingOutstanding` if `ack` lies beyond all outstanding
    /// data.
    pub fn record_ack(&mut self, now: Duration, ack: u64) -> Result<Acked> {
        match self.end() {
            Some(end) if ack <= end => {}
            _ => return Err(CcpError::NothingOutstanding { ack }),
        }

        let mut rtt = None;
        while let Some(entry) = self.pkts.first_entry() {
            let p = entry.get();
            if entry.key() + p.len as u64 > ack {
                break;
            }
            rtt = (p.retransmits == 0).then(|| now.saturating_sub(p.sent_at));
            entry.remove();
        }

        Ok(Acked { seq: ack, rtt })
    }

    /// Mark the segment at `seq` lost. `trigger` is the ack that revealed
    /// the loss. Returns `false` if no such segment is outstanding.
    pub fn mark_dropped(&mut self, seq: u64, trigger: &Segment) -> bool {
        match self.pkts.get_mut(&seq) {
            Some(p) => {
                p.dropped = true;
                tracing::debug!(
                    seq,
                    len = p.len,
                    trigger_ack = trigger.ack,
                    sack_blocks = trigger.sack.len(),
                    "segment marked dropped"
                );
                true
            }
            None => false,
        }
    }

    /// Offsets awaiting retransmission, lowest first.
    pub fn dropped(&self) -> Vec<u64> {
        self.pkts
            .iter()
            .filter(|(_, p)| p.dropped)
            .map(|(seq, _)| *seq)
            .collect()
    }

    pub fn bytes_outstanding(&self) -> u64 {
        self.pkts.values().map(|p| p.len as u64).sum()
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
