//! Reliable-delivery socket.
//!
//! A `Sock` owns one connection's sequencing state: the outstanding-segment
//! tracker for data we sent and the reassembly window for data we receive.
//! Every inbound segment is processed under a single lock so the two stay
//! consistent with each other.
//!
//! Wire sequence numbers are mapped to 64-bit stream offsets through a
//! [`SeqSpace`] per direction as they enter the state machine, so all
//! internal ordering is plain integer comparison.
//!
//! Three tasks serve a socket once [`Sock::spawn`] is called:
//! - **receive**: reads datagrams, decodes segments and hands them off over
//!   a bounded queue, so a slow state-machine step never stalls reception;
//! - **process**: runs the ack/data state machine;
//! - **controller**: feeds ack and drop notifications to the bound
//!   congestion controller.
//!
//! Notifications leaving the state machine go through [`Mailbox`]es: they
//! never block, and a pending notification is overwritten by a newer one.

pub mod in_flight;
pub mod mailbox;
pub mod rcv_window;

use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::SockConfig;
use crate::congestion::{Controller, DropEvent, OutboundSink};
use crate::error::{CcpError, Result};
use crate::segment::{Flag, SeqSpace, Segment};

pub use in_flight::{Acked, InFlight};
pub use mailbox::Mailbox;
pub use rcv_window::{Advance, RcvWindow};

/// Source of raw datagrams for the receive task.
pub trait DatagramSource: Send + 'static {
    /// Next datagram. `Ok(None)` means the source is exhausted.
    fn recv_datagram(&mut self) -> impl Future<Output = io::Result<Option<Bytes>>> + Send;
}

/// Reads datagrams from a UDP socket into an always-allocated buffer.
pub struct UdpSource {
    socket: UdpSocket,
    buf: Box<[u8]>,
    last_peer: Option<SocketAddr>,
}

impl UdpSource {
    pub fn new(socket: UdpSocket, max_datagram_size: usize) -> Self {
        Self {
            socket,
            buf: vec![0u8; max_datagram_size].into_boxed_slice(),
            last_peer: None,
        }
    }

    /// Address of the most recent sender.
    pub fn last_peer(&self) -> Option<SocketAddr> {
        self.last_peer
    }
}

impl DatagramSource for UdpSource {
    async fn recv_datagram(&mut self) -> io::Result<Option<Bytes>> {
        let (n, peer) = self.socket.recv_from(&mut self.buf).await?;
        self.last_peer = Some(peer);
        Ok(Some(Bytes::copy_from_slice(&self.buf[..n])))
    }
}

impl DatagramSource for mpsc::Receiver<Bytes> {
    async fn recv_datagram(&mut self) -> io::Result<Option<Bytes>> {
        Ok(self.recv().await)
    }
}

/// Socket lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SockStatus {
    Open,
    /// Closed by FIN or by the owner.
    Closed,
    /// Ended by a protocol violation.
    Failed,
}

impl fmt::Display for SockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SockStatus::Open => write!(f, "Open"),
            SockStatus::Closed => write!(f, "Closed"),
            SockStatus::Failed => write!(f, "Failed"),
        }
    }
}

/// An acknowledgment forwarded to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckEvent {
    /// Bytes acknowledged since the local ISN, modulo 2^32.
    pub ack: u32,
    pub rtt: Duration,
}

struct SockState {
    in_flight: InFlight,
    rcv_window: RcvWindow,
    /// Cumulative ack offset of data received from the peer.
    last_ack: u64,
    /// Latest cumulative ack offset the peer sent us.
    last_acked: u64,
    /// One past the highest offset we have sent.
    next_seq: u64,
    dup_acks: u32,
    /// Delivered application data, indexed by receive offset.
    read_buf: BytesMut,
}

/// One connection's reliable-delivery state.
pub struct Sock {
    id: u32,
    config: SockConfig,
    send_space: SeqSpace,
    recv_space: SeqSpace,
    state: Mutex<SockState>,
    status: watch::Sender<SockStatus>,
    /// A transmission opportunity exists.
    transmit: Mailbox<()>,
    /// A loss was detected and the dropped segment should be resent.
    retransmit: Mailbox<()>,
    /// Application data is available up to the carried sequence number.
    delivered: Mailbox<u32>,
    acks: Mailbox<AckEvent>,
    drops: Mailbox<DropEvent>,
    controller: Mutex<Box<dyn Controller>>,
}

/// Handles to the tasks serving a socket.
pub struct SockTasks {
    pub receive: JoinHandle<()>,
    pub process: JoinHandle<()>,
    pub controller: JoinHandle<()>,
}

impl SockTasks {
    /// Wait for all three tasks to exit.
    pub async fn join(self) {
        let _ = tokio::join!(self.receive, self.process, self.controller);
    }
}

impl Sock {
    /// Create connection `id` and bind `controller` to it. The controller's
    /// window updates go to `sink`.
    pub fn new(
        id: u32,
        config: SockConfig,
        mut controller: Box<dyn Controller>,
        sink: Arc<dyn OutboundSink>,
    ) -> Arc<Self> {
        controller.on_create(id, sink);
        tracing::info!(sid = id, algorithm = controller.name(), "socket created");

        let (status, _) = watch::channel(SockStatus::Open);
        Arc::new(Self {
            id,
            state: Mutex::new(SockState {
                in_flight: InFlight::new(),
                rcv_window: RcvWindow::new(),
                last_ack: 0,
                last_acked: 0,
                next_seq: 0,
                dup_acks: 0,
                read_buf: BytesMut::new(),
            }),
            send_space: SeqSpace::new(config.local_isn),
            recv_space: SeqSpace::new(config.peer_isn),
            config,
            status,
            transmit: Mailbox::new(),
            retransmit: Mailbox::new(),
            delivered: Mailbox::new(),
            acks: Mailbox::new(),
            drops: Mailbox::new(),
            controller: Mutex::new(controller),
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn status(&self) -> SockStatus {
        *self.status.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.status() == SockStatus::Open
    }

    pub fn controller_name(&self) -> String {
        self.controller.lock().name().to_string()
    }

    /// Start the receive, process and controller tasks.
    pub fn spawn<S: DatagramSource>(self: &Arc<Self>, source: S) -> SockTasks {
        let (tx, rx) = mpsc::channel(self.config.handoff_capacity);
        SockTasks {
            receive: tokio::spawn(receive_loop(self.clone(), source, tx)),
            process: tokio::spawn(process_loop(self.clone(), rx)),
            controller: tokio::spawn(drive_controller(self.clone())),
        }
    }

    /// Record that `len` bytes starting at `seq` were put on the wire.
    pub fn record_sent(&self, seq: u32, len: u32) {
        let now = self.config.clock.now();
        let mut st = self.state.lock();
        let Some(offset) = self.send_space.offset(st.next_seq, seq) else {
            tracing::warn!(sid = self.id, seq, "send recorded before the local ISN");
            return;
        };
        st.in_flight.on_sent(now, offset, len);
        st.next_seq = st.next_seq.max(offset + len as u64);
    }

    /// Run the state machine for one inbound segment.
    ///
    /// Protocol violations are returned as errors for which
    /// [`CcpError::is_protocol_violation`] holds; the caller is expected to
    /// [`fail`](Self::fail) the socket.
    pub fn process(&self, seg: Segment) -> Result<()> {
        if !self.is_open() {
            return Err(CcpError::ConnectionClosed);
        }

        match seg.flag {
            Flag::Fin => {
                self.close();
                return Ok(());
            }
            Flag::Ack => {}
            other => return Err(CcpError::UnexpectedFlag(other)),
        }

        let mut st = self.state.lock();
        self.handle_ack(&mut st, &seg)?;
        self.handle_data(&mut st, &seg);
        Ok(())
    }

    fn handle_ack(&self, st: &mut SockState, seg: &Segment) -> Result<()> {
        let Some(first_unacked) = st.in_flight.start() else {
            return Ok(());
        };
        let ack = match self.send_space.offset(first_unacked, seg.ack) {
            Some(ack) if ack >= first_unacked => ack,
            _ => {
                tracing::trace!(sid = self.id, ack = seg.ack, first_unacked, "stale ack");
                return Ok(());
            }
        };

        let acked = st
            .in_flight
            .record_ack(self.config.clock.now(), ack)
            .map_err(|e| {
                tracing::error!(
                    sid = self.id,
                    ack = seg.ack,
                    first_unacked,
                    next_seq = st.next_seq,
                    "ack for data never sent"
                );
                e
            })?;

        if acked.seq == st.last_acked && st.next_seq > acked.seq {
            st.dup_acks += 1;
            tracing::debug!(
                sid = self.id,
                last_acked = acked.seq,
                dup_acks = st.dup_acks,
                sack_blocks = seg.sack.len(),
                "dup ack"
            );

            if st.dup_acks == self.config.dup_ack_threshold {
                tracing::debug!(sid = self.id, last_acked = acked.seq, "drop detected");
                st.in_flight.mark_dropped(acked.seq, seg);
                self.drops.offer(DropEvent::Isolated);
                self.retransmit.offer(());
            }
            return Ok(());
        }

        st.dup_acks = 0;
        st.last_acked = acked.seq;
        self.transmit.offer(());

        let rtt = acked.rtt.unwrap_or_default();
        tracing::debug!(
            sid = self.id,
            last_acked = acked.seq,
            in_flight = st.in_flight.len(),
            rtt_us = rtt.as_micros() as u64,
            "new ack"
        );
        self.acks.offer(AckEvent {
            ack: acked.seq as u32,
            rtt,
        });
        Ok(())
    }

    fn handle_data(&self, st: &mut SockState, seg: &Segment) {
        if seg.is_empty() {
            return;
        }
        let seq = match self.recv_space.offset(st.last_ack, seg.seq) {
            Some(seq) if seq >= st.last_ack => seq,
            _ => return,
        };
        if st.rcv_window.contains(seq) {
            tracing::trace!(sid = self.id, seq = seg.seq, "spurious retransmission");
            return;
        }

        if seq + seg.payload.len() as u64 > self.config.max_read_buffer as u64 {
            tracing::warn!(
                sid = self.id,
                seq = seg.seq,
                len = seg.len(),
                limit = self.config.max_read_buffer,
                "segment beyond receive buffer dropped"
            );
            return;
        }

        st.rcv_window.add(seq, seg.payload.clone());
        match st.rcv_window.cum_ack(st.last_ack) {
            Ok(advance) => {
                for (offset, payload) in advance.segments {
                    let start = offset as usize;
                    let end = start + payload.len();
                    if st.read_buf.len() < end {
                        st.read_buf.resize(end, 0);
                    }
                    st.read_buf[start..end].copy_from_slice(&payload);
                }
                st.last_ack = advance.ack;
                tracing::debug!(
                    sid = self.id,
                    seq = seg.seq,
                    len = seg.len(),
                    last_ack = st.last_ack,
                    "new data"
                );
                self.delivered.offer(self.recv_space.wire(advance.ack));
            }
            Err(e) => {
                tracing::debug!(sid = self.id, seq = seg.seq, error = %e, "data buffered out of order");
            }
        }

        self.transmit.offer(());
    }

    /// Close the connection. Idempotent.
    pub fn close(&self) {
        let changed = self.status.send_if_modified(|s| {
            if *s == SockStatus::Open {
                *s = SockStatus::Closed;
                true
            } else {
                false
            }
        });
        if changed {
            tracing::info!(sid = self.id, "socket closed");
            self.teardown_signals();
        }
    }

    /// Move the connection to the terminal `Failed` state and release its
    /// buffers.
    pub fn fail(&self, err: &CcpError) {
        let changed = self.status.send_if_modified(|s| {
            if *s == SockStatus::Failed {
                false
            } else {
                *s = SockStatus::Failed;
                true
            }
        });
        if !changed {
            return;
        }
        tracing::error!(sid = self.id, error = %err, "connection failed");
        {
            let mut st = self.state.lock();
            st.in_flight.clear();
            st.rcv_window.clear();
        }
        self.teardown_signals();
    }

    fn teardown_signals(&self) {
        self.delivered.close();
        self.transmit.close();
        self.retransmit.close();
    }

    /// Resolve once the socket is no longer open.
    pub async fn wait_closed(&self) {
        let mut rx = self.status.subscribe();
        loop {
            let status = *rx.borrow_and_update();
            if status != SockStatus::Open {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Wait until new application data is available; yields the cumulative
    /// ack it extends to. `None` once the socket has closed.
    pub async fn wait_delivered(&self) -> Option<u32> {
        self.delivered.recv().await
    }

    /// Wait for a transmission opportunity. `false` once closed.
    pub async fn wait_transmit(&self) -> bool {
        self.transmit.recv().await.is_some()
    }

    /// Wait for a retransmission request. `false` once closed.
    pub async fn wait_retransmit(&self) -> bool {
        self.retransmit.recv().await.is_some()
    }

    /// Application data received contiguously so far.
    pub fn delivered(&self) -> Bytes {
        let st = self.state.lock();
        let len = st.last_ack as usize;
        Bytes::copy_from_slice(&st.read_buf[..len.min(st.read_buf.len())])
    }

    /// Cumulative ack of received data.
    pub fn cumulative_ack(&self) -> u32 {
        self.recv_space.wire(self.state.lock().last_ack)
    }

    /// Latest cumulative ack received from the peer.
    pub fn last_acked(&self) -> u32 {
        self.send_space.wire(self.state.lock().last_acked)
    }

    /// Sequence numbers marked lost and awaiting retransmission.
    pub fn dropped_segments(&self) -> Vec<u32> {
        let st = self.state.lock();
        st.in_flight
            .dropped()
            .into_iter()
            .map(|offset| self.send_space.wire(offset))
            .collect()
    }

    pub fn bytes_in_flight(&self) -> u64 {
        self.state.lock().in_flight.bytes_outstanding()
    }
}

async fn receive_loop<S: DatagramSource>(
    sock: Arc<Sock>,
    mut source: S,
    handoff: mpsc::Sender<Segment>,
) {
    loop {
        let datagram = tokio::select! {
            _ = sock.wait_closed() => return,
            r = source.recv_datagram() => r,
        };

        let bytes = match datagram {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                tracing::debug!(sid = sock.id, "datagram source exhausted");
                return;
            }
            Err(e) => {
                tracing::warn!(sid = sock.id, error = %e, "datagram receive failed");
                continue;
            }
        };

        let seg = match Segment::decode(&bytes) {
            Ok(seg) => seg,
            Err(e) => {
                tracing::warn!(sid = sock.id, len = bytes.len(), error = %e, "malformed segment dropped");
                continue;
            }
        };

        tokio::select! {
            _ = sock.wait_closed() => return,
            r = handoff.send(seg) => {
                if r.is_err() {
                    return;
                }
            }
        }
    }
}

async fn process_loop(sock: Arc<Sock>, mut handoff: mpsc::Receiver<Segment>) {
    loop {
        let seg = tokio::select! {
            _ = sock.wait_closed() => return,
            seg = handoff.recv() => match seg {
                Some(seg) => seg,
                None => return,
            },
        };

        if let Err(e) = sock.process(seg) {
            if e.is_protocol_violation() {
                sock.fail(&e);
                return;
            }
            tracing::warn!(sid = sock.id, error = %e, "segment not processed");
        }
    }
}

async fn drive_controller(sock: Arc<Sock>) {
    loop {
        tokio::select! {
            biased;
            _ = sock.wait_closed() => break,
            Some(event) = sock.drops.recv() => {
                let mut ctrl = sock.controller.lock();
                ctrl.on_drop(event);
            }
            Some(ack) = sock.acks.recv() => {
                let mut ctrl = sock.controller.lock();
                ctrl.on_ack(ack.ack, ack.rtt);
            }
        }
    }

    sock.acks.close();
    sock.drops.close();
    let mut ctrl = sock.controller.lock();
    ctrl.on_drop(DropEvent::Complete);
}

#[cfg(test)]
mod tests {
    use super::*;

    const MSS: u32 = 1460;

    #[derive(Default)]
    struct NullController;

    impl Controller for NullController {
        fn name(&self) -> &str {
            "null"
        }
        fn on_create(&mut self, _sid: u32, _sink: Arc<dyn OutboundSink>) {}
        fn on_ack(&mut self, _ack: u32, _rtt: Duration) {}
        fn on_drop(&mut self, _event: DropEvent) {}
    }

    struct NullSink;

    impl OutboundSink for NullSink {
        fn send_window_update(&self, _sid: u32, _window_bytes: u32) -> Result<()> {
            Ok(())
        }
    }

    fn sock() -> Arc<Sock> {
        Sock::new(
            1,
            SockConfig::default(),
            Box::new(NullController),
            Arc::new(NullSink),
        )
    }

    fn sock_with_isns(local_isn: u32, peer_isn: u32) -> Arc<Sock> {
        Sock::new(
            1,
            SockConfig {
                local_isn,
                peer_isn,
                ..SockConfig::default()
            },
            Box::new(NullController),
            Arc::new(NullSink),
        )
    }

    fn sent_three() -> Arc<Sock> {
        let s = sock();
        for i in 0..3 {
            s.record_sent(i * MSS, MSS);
        }
        s
    }

    fn data(seq: u32, fill: u8) -> Segment {
        Segment::data(seq, 0, Bytes::from(vec![fill; MSS as usize]))
    }

    #[test]
    fn forward_progress_signals_controller_and_transmit() {
        let s = sent_three();
        s.process(Segment::ack(MSS)).unwrap();

        assert_eq!(s.last_acked(), MSS);
        assert_eq!(s.acks.try_take().map(|a| a.ack), Some(MSS));
        assert!(s.transmit.try_take().is_some());
        assert!(s.drops.try_take().is_none());
        assert_eq!(s.bytes_in_flight(), 2 * MSS as u64);
    }

    #[test]
    fn three_dup_acks_declare_one_loss() {
        let s = sent_three();
        s.process(Segment::ack(MSS)).unwrap();
        s.transmit.try_take();
        s.acks.try_take();

        s.process(Segment::ack(MSS)).unwrap();
        s.process(Segment::ack(MSS)).unwrap();
        assert!(s.drops.try_take().is_none());
        assert!(s.retransmit.try_take().is_none());

        s.process(Segment::ack(MSS)).unwrap();
        assert_eq!(s.drops.try_take(), Some(DropEvent::Isolated));
        assert!(s.retransmit.try_take().is_some());
        assert_eq!(s.dropped_segments(), vec![MSS]);

        // A fourth duplicate does not signal again.
        s.process(Segment::ack(MSS)).unwrap();
        assert!(s.drops.try_take().is_none());
        assert!(s.retransmit.try_take().is_none());
        assert!(s.transmit.try_take().is_none());
        assert!(s.acks.try_take().is_none());
    }

    #[test]
    fn progress_resets_dup_counter() {
        let s = sent_three();
        s.process(Segment::ack(MSS)).unwrap();
        s.process(Segment::ack(MSS)).unwrap();
        s.process(Segment::ack(MSS)).unwrap();
        s.process(Segment::ack(2 * MSS)).unwrap();
        s.process(Segment::ack(2 * MSS)).unwrap();
        s.process(Segment::ack(2 * MSS)).unwrap();
        assert!(s.drops.try_take().is_none());
        assert_eq!(s.state.lock().dup_acks, 2);
    }

    #[test]
    fn stale_ack_is_ignored() {
        let s = sent_three();
        s.process(Segment::ack(2 * MSS)).unwrap();
        s.acks.try_take();
        s.transmit.try_take();

        s.process(Segment::ack(MSS)).unwrap();
        assert_eq!(s.last_acked(), 2 * MSS);
        assert_eq!(s.state.lock().dup_acks, 0);
        assert_eq!(s.state.lock().in_flight.len(), 1);
        assert!(s.acks.try_take().is_none());
        assert!(s.transmit.try_take().is_none());
    }

    #[test]
    fn ack_for_unsent_data_is_a_violation() {
        let s = sent_three();
        let err = s.process(Segment::ack(10 * MSS)).unwrap_err();
        assert!(err.is_protocol_violation());
        s.fail(&err);
        assert_eq!(s.status(), SockStatus::Failed);
        assert_eq!(s.bytes_in_flight(), 0);
        assert!(matches!(
            s.process(Segment::ack(0)),
            Err(CcpError::ConnectionClosed)
        ));
    }

    #[test]
    fn handshake_flags_are_violations() {
        let s = sock();
        let mut seg = Segment::ack(0);
        seg.flag = Flag::Syn;
        assert!(matches!(
            s.process(seg.clone()),
            Err(CcpError::UnexpectedFlag(Flag::Syn))
        ));
        seg.flag = Flag::SynAck;
        assert!(s.process(seg).unwrap_err().is_protocol_violation());
    }

    #[test]
    fn fin_closes() {
        let s = sock();
        s.process(Segment::fin(0, 0)).unwrap();
        assert_eq!(s.status(), SockStatus::Closed);
        assert!(s.delivered.is_closed());
    }

    #[test]
    fn out_of_order_data_is_reassembled() {
        let s = sock();
        s.process(data(2 * MSS, b'c')).unwrap();
        assert_eq!(s.cumulative_ack(), 0);
        assert!(s.delivered.try_take().is_none());

        s.process(data(0, b'a')).unwrap();
        s.process(data(MSS, b'b')).unwrap();
        assert_eq!(s.cumulative_ack(), 3 * MSS);
        // Only the latest cumulative ack is pending.
        assert_eq!(s.delivered.try_take(), Some(3 * MSS));
        assert!(s.delivered.try_take().is_none());

        let buf = s.delivered();
        assert_eq!(buf.len(), 3 * MSS as usize);
        assert!(buf[..MSS as usize].iter().all(|&b| b == b'a'));
        assert!(buf[MSS as usize..2 * MSS as usize].iter().all(|&b| b == b'b'));
        assert!(buf[2 * MSS as usize..].iter().all(|&b| b == b'c'));
    }

    #[test]
    fn spurious_retransmission_is_a_no_op() {
        let s = sock();
        s.process(data(0, b'a')).unwrap();
        s.process(data(2 * MSS, b'c')).unwrap();
        s.delivered.try_take();
        s.transmit.try_take();

        // Already delivered.
        s.process(data(0, b'x')).unwrap();
        // Already buffered.
        s.process(data(2 * MSS, b'y')).unwrap();

        assert_eq!(s.cumulative_ack(), MSS);
        assert!(s.delivered.try_take().is_none());
        assert!(s.transmit.try_take().is_none());
        assert!(s.delivered().iter().all(|&b| b == b'a'));
        assert_eq!(s.state.lock().rcv_window.len(), 1);
    }

    #[test]
    fn controller_sees_acks_relative_to_isn() {
        for isn in [1_000_000, 3_000_000_000] {
            let s = sock_with_isns(isn, 0);
            s.record_sent(isn, MSS);
            s.record_sent(isn.wrapping_add(MSS), MSS);
            s.process(Segment::ack(isn.wrapping_add(MSS))).unwrap();

            assert_eq!(s.last_acked(), isn.wrapping_add(MSS));
            assert_eq!(s.acks.try_take().map(|a| a.ack), Some(MSS));
            assert_eq!(s.bytes_in_flight(), MSS as u64);
        }
    }

    #[test]
    fn ack_across_sequence_wrap() {
        let isn = u32::MAX - 1000;
        let s = sock_with_isns(isn, 0);
        s.record_sent(isn, MSS);
        s.process(Segment::ack(459)).unwrap();

        assert_eq!(s.last_acked(), 459);
        assert_eq!(s.bytes_in_flight(), 0);
        assert_eq!(s.acks.try_take().map(|a| a.ack), Some(MSS));
        assert!(s.transmit.try_take().is_some());
    }

    #[test]
    fn loss_and_stale_acks_across_sequence_wrap() {
        let isn = u32::MAX - 1000;
        let s = sock_with_isns(isn, 0);
        for i in 0..3 {
            s.record_sent(isn.wrapping_add(i * MSS), MSS);
        }
        s.process(Segment::ack(459)).unwrap();
        s.acks.try_take();

        // Below the first outstanding byte, on the far side of the wrap.
        s.process(Segment::ack(isn)).unwrap();
        assert_eq!(s.state.lock().dup_acks, 0);
        assert_eq!(s.last_acked(), 459);

        for _ in 0..3 {
            s.process(Segment::ack(459)).unwrap();
        }
        assert_eq!(s.drops.try_take(), Some(DropEvent::Isolated));
        assert_eq!(s.dropped_segments(), vec![459]);
        assert!(s.acks.try_take().is_none());
    }

    #[test]
    fn data_across_sequence_wrap() {
        let isn = u32::MAX - 100;
        let s = sock_with_isns(0, isn);
        s.process(data(isn.wrapping_add(MSS), b'b')).unwrap();
        assert_eq!(s.cumulative_ack(), isn);

        s.process(data(isn, b'a')).unwrap();
        assert_eq!(s.cumulative_ack(), isn.wrapping_add(2 * MSS));
        assert_eq!(s.delivered.try_take(), Some(isn.wrapping_add(2 * MSS)));

        let buf = s.delivered();
        assert_eq!(buf.len(), 2 * MSS as usize);
        assert!(buf[..MSS as usize].iter().all(|&b| b == b'a'));
        assert!(buf[MSS as usize..].iter().all(|&b| b == b'b'));

        // Before the peer's ISN.
        s.process(data(isn.wrapping_sub(5000), b'x')).unwrap();
        assert!(s.state.lock().rcv_window.is_empty());
        assert_eq!(s.delivered().len(), 2 * MSS as usize);
    }

    #[test]
    fn data_beyond_buffer_limit_is_dropped() {
        let s = Sock::new(
            2,
            SockConfig {
                max_read_buffer: 2 * MSS as usize,
                ..SockConfig::default()
            },
            Box::new(NullController),
            Arc::new(NullSink),
        );
        s.process(data(2 * MSS, b'z')).unwrap();
        assert!(s.state.lock().rcv_window.is_empty());
    }
}
