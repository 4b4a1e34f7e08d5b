//! Control-message transport tests: unix datagram and in-process backends,
//! and a full dataplane/control-plane round trip.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use ccplane::agent::{route_window_updates, ControlPlane, RemoteController};
use ccplane::congestion::{AlgorithmRegistry, Controller, DropEvent, OutboundSink};
use ccplane::ipc::{Backend, BackendBuilder, Channel, MemoryHub, Msg, UnixBuilder};
use ccplane::segment::Segment;
use ccplane::socket::Sock;
use ccplane::{CcpError, IpcConfig, Result, SockConfig};

const MSS: u32 = 1460;

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("ccplane-{}-{name}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

fn unix_config(name: &str) -> IpcConfig {
    IpcConfig {
        dir: scratch_dir(name),
        ..IpcConfig::default()
    }
}

#[derive(Default)]
struct Recorder(Mutex<Vec<(u32, u32)>>);

impl OutboundSink for Recorder {
    fn send_window_update(&self, sid: u32, window_bytes: u32) -> Result<()> {
        self.0.lock().push((sid, window_bytes));
        Ok(())
    }
}

impl Recorder {
    fn has(&self, update: (u32, u32)) -> bool {
        self.0.lock().contains(&update)
    }
}

async fn eventually(mut cond: impl FnMut() -> bool) {
    for _ in 0..2000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached");
}

// ---------------------------------------------------------------------------
// Unix datagram backend
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unix_pair_exchanges_messages() {
    let config = unix_config("pair");
    let a = UnixBuilder::new(config.clone())
        .prepare_listen("a", 1)
        .prepare_send("b", 1)
        .finish_setup()
        .unwrap();
    let b = UnixBuilder::new(config.clone())
        .prepare_listen("b", 1)
        .prepare_send("a", 1)
        .finish_setup()
        .unwrap();
    assert!(config.dir.join("a-1").exists());
    assert!(config.dir.join("b-1").exists());

    let mut b_rx = b.listen().unwrap();
    let mut a_rx = a.listen().unwrap();
    a.send(b"ping").unwrap();
    b.send(b"pong").unwrap();
    a.send(b"again").unwrap();

    assert_eq!(b_rx.recv().await.unwrap(), Bytes::from_static(b"ping"));
    assert_eq!(b_rx.recv().await.unwrap(), Bytes::from_static(b"again"));
    assert_eq!(a_rx.recv().await.unwrap(), Bytes::from_static(b"pong"));

    a.close().unwrap();
    b.close().unwrap();
    assert!(!config.dir.join("a-1").exists());
    assert!(!config.dir.join("b-1").exists());
}

#[tokio::test]
async fn unix_sends_succeed_right_after_setup() {
    let config = unix_config("burst");
    let listener = UnixBuilder::new(config.clone())
        .prepare_listen("cp", 5)
        .finish_setup()
        .unwrap();
    let mut rx = listener.listen().unwrap();

    // Fresh senders, each used before the runtime has polled it.
    for round in 0..4u8 {
        let tx = UnixBuilder::new(config.clone())
            .prepare_send("cp", 5)
            .finish_setup()
            .unwrap();
        for i in 0..3u8 {
            tx.send(&[round, i]).unwrap();
        }
    }

    for round in 0..4u8 {
        for i in 0..3u8 {
            assert_eq!(rx.recv().await.unwrap(), Bytes::copy_from_slice(&[round, i]));
        }
    }
}

#[tokio::test]
async fn unix_listen_is_single_take() {
    let config = unix_config("single");
    let a = UnixBuilder::new(config)
        .prepare_listen("a", 2)
        .finish_setup()
        .unwrap();
    assert!(a.listen().is_ok());
    assert!(matches!(a.listen(), Err(CcpError::AlreadyListening)));
}

#[tokio::test]
async fn unix_close_ends_listen_queue_and_is_idempotent() {
    let config = unix_config("close");
    let a = UnixBuilder::new(config)
        .prepare_listen("a", 3)
        .finish_setup()
        .unwrap();
    let mut rx = a.listen().unwrap();
    a.close().unwrap();
    a.close().unwrap();
    let ended = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap();
    assert!(ended.is_none());
}

#[tokio::test]
async fn unix_stale_endpoint_is_replaced() {
    let config = unix_config("stale");
    std::fs::create_dir_all(&config.dir).unwrap();
    std::fs::write(config.dir.join("a-4"), b"left over").unwrap();

    let a = UnixBuilder::new(config.clone())
        .prepare_listen("a", 4)
        .finish_setup()
        .unwrap();
    let tx = UnixBuilder::new(config)
        .prepare_send("a", 4)
        .finish_setup()
        .unwrap();
    let mut rx = a.listen().unwrap();
    tx.send(b"fresh").unwrap();
    assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"fresh"));
}

#[tokio::test]
async fn unix_setup_errors_are_reported() {
    let config = unix_config("errors");
    let bad = UnixBuilder::new(config.clone())
        .prepare_listen("", 1)
        .prepare_send("ok", 1)
        .finish_setup();
    assert!(matches!(bad, Err(CcpError::InvalidAddress(_))));

    let send_only = UnixBuilder::new(config)
        .prepare_send("nobody", 1)
        .finish_setup()
        .unwrap();
    assert!(matches!(send_only.listen(), Err(CcpError::NotConfigured(_))));
    assert!(matches!(send_only.send(b"x"), Err(CcpError::Io(_))));
}

// ---------------------------------------------------------------------------
// Typed channel
// ---------------------------------------------------------------------------

#[tokio::test]
async fn channel_skips_undecodable_messages() {
    let hub = MemoryHub::new();
    let config = IpcConfig::default();
    let raw = hub
        .builder(&config)
        .prepare_send("typed", 1)
        .finish_setup()
        .unwrap();
    let typed = Channel::new(
        hub.builder(&config)
            .prepare_listen("typed", 1)
            .finish_setup()
            .unwrap(),
        config.queue_capacity,
    );

    let mut rx = typed.listen().unwrap();
    raw.send(&[0xee, 0, 0, 0, 1]).unwrap();
    raw.send(&Msg::Cwnd { sid: 1, cwnd: 2920 }.encode()).unwrap();
    assert_eq!(rx.recv().await.unwrap(), Msg::Cwnd { sid: 1, cwnd: 2920 });
}

#[tokio::test]
async fn channel_is_an_outbound_sink() {
    let hub = MemoryHub::new();
    let config = IpcConfig::default();
    let rx_side = Channel::new(
        hub.builder(&config)
            .prepare_listen("dp", 9)
            .finish_setup()
            .unwrap(),
        8,
    );
    let tx_side = Channel::new(
        hub.builder(&config)
            .prepare_send("dp", 9)
            .finish_setup()
            .unwrap(),
        8,
    );

    let mut rx = rx_side.listen().unwrap();
    tx_side.send_window_update(9, 4380).unwrap();
    assert_eq!(rx.recv().await.unwrap(), Msg::Cwnd { sid: 9, cwnd: 4380 });
}

// ---------------------------------------------------------------------------
// Dataplane <-> control plane
// ---------------------------------------------------------------------------

#[tokio::test]
async fn remote_cubic_round_trip() {
    let hub = MemoryHub::new();
    let config = IpcConfig::default();

    let cp_channel = Arc::new(Channel::new(
        hub.builder(&config)
            .prepare_listen("cp", 1)
            .prepare_send("dp", 1)
            .finish_setup()
            .unwrap(),
        config.queue_capacity,
    ));
    let dp_channel = Arc::new(Channel::new(
        hub.builder(&config)
            .prepare_listen("dp", 1)
            .prepare_send("cp", 1)
            .finish_setup()
            .unwrap(),
        config.queue_capacity,
    ));

    let mut plane = ControlPlane::new(
        Arc::new(AlgorithmRegistry::with_defaults()),
        cp_channel.clone(),
    );
    let cp_inbound = cp_channel.listen().unwrap();
    let plane_task = tokio::spawn(async move {
        plane.run(cp_inbound).await;
        plane
    });

    let windows = Arc::new(Recorder::default());
    let router = tokio::spawn(route_window_updates(
        dp_channel.listen().unwrap(),
        windows.clone(),
    ));

    let sock = Sock::new(
        1,
        SockConfig::default(),
        Box::new(RemoteController::new("cubic", dp_channel.clone())),
        windows.clone(),
    );
    assert_eq!(sock.controller_name(), "cubic");

    let (tx, rx) = tokio::sync::mpsc::channel(8);
    let tasks = sock.spawn(rx);
    sock.record_sent(0, MSS);
    sock.record_sent(MSS, MSS);
    tx.send(Segment::ack(MSS).encode()).await.unwrap();

    // One acked segment in slow start: 5 -> 6 segments.
    eventually(|| windows.has((1, 6 * MSS))).await;

    sock.close();
    tasks.join().await;
    // Completion resets the remote controller to its initial window.
    eventually(|| windows.has((1, 5 * MSS))).await;

    cp_channel.close().unwrap();
    dp_channel.close().unwrap();
    let plane = plane_task.await.unwrap();
    assert_eq!(plane.flow_count(), 0);
    assert!(router.await.unwrap() >= 2);
}

#[tokio::test]
async fn remote_drop_event_reaches_control_plane() {
    let hub = MemoryHub::new();
    let config = IpcConfig::default();
    let cp_rx = Channel::new(
        hub.builder(&config)
            .prepare_listen("cp", 2)
            .finish_setup()
            .unwrap(),
        8,
    );
    let dp_tx = Arc::new(Channel::new(
        hub.builder(&config)
            .prepare_send("cp", 2)
            .finish_setup()
            .unwrap(),
        8,
    ));

    let mut inbound = cp_rx.listen().unwrap();
    let mut remote = RemoteController::new("cubic", dp_tx);
    remote.on_create(2, Arc::new(Recorder::default()));
    remote.on_drop(DropEvent::Isolated);

    assert_eq!(
        inbound.recv().await.unwrap(),
        Msg::Create {
            sid: 2,
            alg: "cubic".into()
        }
    );
    assert_eq!(
        inbound.recv().await.unwrap(),
        Msg::Drop {
            sid: 2,
            event: DropEvent::Isolated
        }
    );
}
