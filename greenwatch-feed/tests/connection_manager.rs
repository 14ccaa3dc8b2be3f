use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use greenwatch_core::protocol::SYSTEM_LOG;
use greenwatch_core::{LogKind, ParameterKind, Reading};
use greenwatch_feed::{
    ConnectionHandle, ConnectionManager, ConnectionState, Link, LinkEvent, MessageRouter, Store,
    Transport,
};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy)]
enum Outcome {
    Refuse,
    Accept,
}

/// Server side of an accepted scripted connection.
struct Peer {
    events: mpsc::Sender<LinkEvent>,
    outbound: mpsc::Receiver<String>,
}

impl Peer {
    async fn push(&self, text: &str) {
        self.events
            .send(LinkEvent::Text(text.to_owned()))
            .await
            .unwrap();
    }
}

/// Transport that follows a fixed script of outcomes, refusing once the
/// script runs out.
struct ScriptedTransport {
    script: Mutex<VecDeque<Outcome>>,
    calls: Arc<AtomicUsize>,
    peers: mpsc::UnboundedSender<Peer>,
}

#[async_trait]
impl Transport for ScriptedTransport {
    type Error = std::io::Error;

    async fn open(&self) -> Result<Link, Self::Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Outcome::Refuse);

        match outcome {
            Outcome::Refuse => Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "refused",
            )),
            Outcome::Accept => {
                let (events_tx, events_rx) = mpsc::channel(16);
                let (outbound_tx, outbound_rx) = mpsc::channel(16);
                let _ = self.peers.send(Peer {
                    events: events_tx,
                    outbound: outbound_rx,
                });
                Ok(Link {
                    events: events_rx,
                    outbound: outbound_tx,
                })
            }
        }
    }

    fn endpoint(&self) -> &str {
        "scripted"
    }
}

struct Harness {
    handle: ConnectionHandle,
    task: JoinHandle<()>,
    store: Store,
    calls: Arc<AtomicUsize>,
    peers: mpsc::UnboundedReceiver<Peer>,
}

impl Harness {
    fn start(script: &[Outcome]) -> Self {
        let calls = Arc::new(AtomicUsize::new(0));
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        let transport = ScriptedTransport {
            script: Mutex::new(script.iter().copied().collect()),
            calls: Arc::clone(&calls),
            peers: peers_tx,
        };

        let store = Store::new();
        let (handle, task) = ConnectionManager::new(transport, MessageRouter::new(store.clone()))
            .spawn(CancellationToken::new());

        Self {
            handle,
            task,
            store,
            calls,
            peers: peers_rx,
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn connected(&mut self) -> Peer {
        self.handle
            .watch_state()
            .wait_for(|state| *state == ConnectionState::Connected)
            .await
            .unwrap();
        self.peers.recv().await.unwrap()
    }
}

#[tokio::test(start_paused = true)]
async fn gives_up_after_five_retries() {
    let harness = Harness::start(&[]);

    harness.handle.connect().unwrap();
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(harness.calls(), 6);
    assert_eq!(harness.handle.state(), ConnectionState::Disconnected);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(harness.calls(), 6);
}

#[tokio::test(start_paused = true)]
async fn connect_after_giving_up_starts_a_fresh_budget() {
    let harness = Harness::start(&[]);

    harness.handle.connect().unwrap();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(harness.calls(), 6);

    harness.handle.connect().unwrap();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(harness.calls(), 12);
}

#[tokio::test(start_paused = true)]
async fn retries_wait_between_attempts() {
    let harness = Harness::start(&[]);

    harness.handle.connect().unwrap();
    harness
        .handle
        .watch_state()
        .wait_for(|state| *state == ConnectionState::ReconnectWait { attempt: 1 })
        .await
        .unwrap();
    assert_eq!(harness.calls(), 1);

    tokio::time::sleep(Duration::from_millis(2900)).await;
    assert_eq!(harness.calls(), 1);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(harness.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn successful_open_resets_retry_counter() {
    let mut harness = Harness::start(&[Outcome::Refuse, Outcome::Refuse, Outcome::Accept]);

    harness.handle.connect().unwrap();
    let peer = harness.connected().await;
    assert_eq!(harness.calls(), 3);

    peer.events.send(LinkEvent::Closed).await.unwrap();
    tokio::time::sleep(Duration::from_secs(60)).await;

    // five fresh retries after the close
    assert_eq!(harness.calls(), 8);
    assert_eq!(harness.handle.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn frames_are_routed_to_the_store() {
    let mut harness = Harness::start(&[Outcome::Accept]);
    harness.handle.connect().unwrap();
    let peer = harness.connected().await;

    peer.push(
        r#"{"type":"SENSOR_DATA","env":"E1","data":{"envCode":"E1","iotSensorDataRespList":[{"envParameterType":1,"dataValue":23.5,"ex":0}]}}"#,
    )
    .await;

    harness
        .store
        .subscribe()
        .wait_for(|state| *state.sensor_data.get(ParameterKind::AirTemp) == Reading::new(23.5, 0))
        .await
        .unwrap();

    let readings = harness.store.sensor_data();
    assert_eq!(
        *readings.get(ParameterKind::AirHumidity),
        Reading::default()
    );
}

#[tokio::test(start_paused = true)]
async fn malformed_frame_is_dropped_and_connection_stays_open() {
    let mut harness = Harness::start(&[Outcome::Accept]);
    harness.handle.connect().unwrap();
    let peer = harness.connected().await;

    peer.push("this is not json").await;
    peer.push("[1, 2, 3]").await;
    peer.push(
        &json!({
            "type": SYSTEM_LOG,
            "env": "E1",
            "data": { "type": "error", "message": "valve stuck" }
        })
        .to_string(),
    )
    .await;

    harness
        .store
        .subscribe()
        .wait_for(|state| !state.system_logs.is_empty())
        .await
        .unwrap();

    let logs = harness.store.snapshot().system_logs;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].kind, LogKind::Error);
    assert_eq!(harness.handle.state(), ConnectionState::Connected);
    assert_eq!(harness.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn send_only_goes_out_while_connected() {
    let mut harness = Harness::start(&[Outcome::Accept]);

    assert!(!harness.handle.send(&json!({ "cmd": "PING" })).unwrap());

    harness.handle.connect().unwrap();
    let mut peer = harness.connected().await;

    assert!(harness.handle.send(&json!({ "cmd": "PING" })).unwrap());
    assert_eq!(peer.outbound.recv().await.unwrap(), r#"{"cmd":"PING"}"#);
}

#[tokio::test(start_paused = true)]
async fn connect_while_connected_is_a_no_op() {
    let mut harness = Harness::start(&[Outcome::Accept, Outcome::Accept]);
    harness.handle.connect().unwrap();
    let _peer = harness.connected().await;

    harness.handle.connect().unwrap();
    harness.handle.connect().unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(harness.calls(), 1);
    assert_eq!(harness.handle.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn link_failure_schedules_reconnect() {
    let mut harness = Harness::start(&[Outcome::Accept, Outcome::Accept]);
    harness.handle.connect().unwrap();
    let peer = harness.connected().await;

    peer.events
        .send(LinkEvent::Failed("reset by peer".into()))
        .await
        .unwrap();
    let _second = harness.peers.recv().await.unwrap();

    assert_eq!(harness.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_pending_retry() {
    let mut harness = Harness::start(&[]);
    harness.handle.connect().unwrap();
    harness
        .handle
        .watch_state()
        .wait_for(|state| matches!(state, ConnectionState::ReconnectWait { .. }))
        .await
        .unwrap();

    harness.handle.shutdown();
    (&mut harness.task).await.unwrap();

    assert_eq!(harness.calls(), 1);
    assert!(!harness.handle.send(&json!({})).unwrap());
}
