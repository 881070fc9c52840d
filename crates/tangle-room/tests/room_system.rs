//! Integration tests for the room system using an in-memory matchmaking
//! server and in-memory peer links.
//!
//! Every test runs on a paused clock. `settle()` lets every task run until
//! the runtime is idle, which moves the clock forward by one millisecond.

use std::collections::HashSet;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};
use tangle_protocol::{EncodedMessage, Gzip, MAX_FRAME_PAYLOAD, PeerId, Reassembler};
use tangle_room::{Room, RoomCallbacks, RoomConfig, RoomError, RoomState};
use tangle_transport::{
    Connection, ConnectionId, Connector, IceServer, PeerEvent, PeerEvents, PeerLink,
    PeerTransport, TransportError,
};
use tokio::sync::mpsc;

// =========================================================================
// In-memory matchmaking server
// =========================================================================

enum Inbound {
    Text(String),
    Close,
    Error,
}

/// The server's end of one control connection.
#[derive(Clone)]
struct ServerConn {
    to_client: mpsc::UnboundedSender<Inbound>,
    from_client: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

impl ServerConn {
    fn push(&self, text: impl Into<String>) {
        let _ = self.to_client.send(Inbound::Text(text.into()));
    }

    fn close(&self) {
        let _ = self.to_client.send(Inbound::Close);
    }

    fn fail(&self) {
        let _ = self.to_client.send(Inbound::Error);
    }

    /// Everything the client sent, keep-alives included.
    fn sent(&self) -> Vec<String> {
        self.from_client.lock().unwrap().clone()
    }

    /// Everything the client sent that was JSON.
    fn sent_json(&self) -> Vec<Value> {
        self.sent()
            .iter()
            .filter_map(|text| serde_json::from_str(text).ok())
            .collect()
    }

    fn keep_alives(&self) -> usize {
        self.sent().iter().filter(|t| *t == "keep_alive").count()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct ServerState {
    urls: Vec<String>,
    refuse: usize,
    connections: Vec<ServerConn>,
}

#[derive(Clone, Default)]
struct MockServer {
    state: Arc<Mutex<ServerState>>,
}

impl MockServer {
    fn attempts(&self) -> usize {
        self.state.lock().unwrap().urls.len()
    }

    fn refuse_next(&self, count: usize) {
        self.state.lock().unwrap().refuse = count;
    }

    fn conn(&self, index: usize) -> ServerConn {
        self.state.lock().unwrap().connections[index].clone()
    }

    fn latest(&self) -> ServerConn {
        let state = self.state.lock().unwrap();
        state.connections.last().expect("no connection yet").clone()
    }

    fn connection_count(&self) -> usize {
        self.state.lock().unwrap().connections.len()
    }
}

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

struct MockConnection {
    id: ConnectionId,
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<Inbound>>,
    from_client: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

impl Connector for MockServer {
    type Connection = MockConnection;
    type Error = TransportError;

    async fn connect(&self, url: &str) -> Result<MockConnection, TransportError> {
        let mut state = self.state.lock().unwrap();
        state.urls.push(url.to_string());
        if state.refuse > 0 {
            state.refuse -= 1;
            return Err(TransportError::ConnectFailed(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "refused",
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let from_client = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        state.connections.push(ServerConn {
            to_client: tx,
            from_client: from_client.clone(),
            closed: closed.clone(),
        });
        Ok(MockConnection {
            id: ConnectionId::new(NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed)),
            inbound: tokio::sync::Mutex::new(rx),
            from_client,
            closed,
        })
    }
}

impl Connection for MockConnection {
    type Error = TransportError;

    async fn send(&self, text: &str) -> Result<(), TransportError> {
        self.from_client.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn recv(&self) -> Result<Option<String>, TransportError> {
        match self.inbound.lock().await.recv().await {
            Some(Inbound::Text(text)) => Ok(Some(text)),
            Some(Inbound::Close) | None => Ok(None),
            Some(Inbound::Error) => Err(TransportError::ReceiveFailed(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "reset",
            ))),
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

// =========================================================================
// In-memory peer links
// =========================================================================

#[derive(Clone)]
struct MockLink {
    events: PeerEvents,
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
    calls: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

impl MockLink {
    fn emit(&self, event: PeerEvent) {
        self.events.emit(event);
    }

    fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().clone()
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl PeerLink for MockLink {
    async fn create_offer(&self) -> Result<Value, TransportError> {
        self.calls.lock().unwrap().push("create_offer".into());
        Ok(json!({"type": "offer", "sdp": "o"}))
    }

    async fn create_answer(&self, offer: Value) -> Result<Value, TransportError> {
        self.calls.lock().unwrap().push(format!("create_answer {offer}"));
        Ok(json!({"type": "answer", "sdp": "a"}))
    }

    async fn accept_answer(&self, answer: Value) -> Result<(), TransportError> {
        self.calls.lock().unwrap().push(format!("accept_answer {answer}"));
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: Value) -> Result<(), TransportError> {
        self.calls.lock().unwrap().push(format!("add_ice_candidate {candidate}"));
        Ok(())
    }

    fn send(&self, frame: &[u8]) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(frame.to_vec());
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Clone, Default)]
struct MockPeers {
    links: Arc<Mutex<Vec<MockLink>>>,
    ice_servers: Arc<Mutex<Vec<IceServer>>>,
}

impl MockPeers {
    fn link(&self, index: usize) -> MockLink {
        self.links.lock().unwrap()[index].clone()
    }

    fn count(&self) -> usize {
        self.links.lock().unwrap().len()
    }
}

impl PeerTransport for MockPeers {
    type Link = MockLink;

    fn open(
        &self,
        ice_servers: &[IceServer],
        events: PeerEvents,
    ) -> Result<MockLink, TransportError> {
        *self.ice_servers.lock().unwrap() = ice_servers.to_vec();
        let link = MockLink {
            events,
            sent: Arc::default(),
            calls: Arc::default(),
            closed: Arc::default(),
        };
        self.links.lock().unwrap().push(link.clone());
        Ok(link)
    }
}

// =========================================================================
// Harness
// =========================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Seen {
    State(RoomState),
    Joined(PeerId),
    Left(PeerId),
    Message(PeerId, Vec<u8>),
}

struct Harness {
    room: Room,
    server: MockServer,
    peers: MockPeers,
    seen: Arc<Mutex<Vec<Seen>>>,
    left_times: Arc<Mutex<Vec<u64>>>,
}

const ME: &str = "10.0.0.1:4000";
const ALICE: &str = "10.0.0.2:4000";
const BOB: &str = "10.0.0.3:4000";

fn id(address: &str) -> PeerId {
    PeerId::from_address(address)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

fn config() -> RoomConfig {
    RoomConfig {
        server_url: "ws://matchmaker.test".into(),
        room_name: "lobby".into(),
        ..RoomConfig::default()
    }
}

async fn start() -> Harness {
    start_with(config(), MockServer::default()).await
}

async fn start_with(config: RoomConfig, server: MockServer) -> Harness {
    init_tracing();
    let peers = MockPeers::default();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let left_times = Arc::new(Mutex::new(Vec::new()));

    let (s1, s2, s3, s4) = (seen.clone(), seen.clone(), seen.clone(), seen.clone());
    let times = left_times.clone();
    let callbacks = RoomCallbacks::new()
        .on_state_change(move |state| s1.lock().unwrap().push(Seen::State(state)))
        .on_peer_joined(move |peer| s2.lock().unwrap().push(Seen::Joined(peer)))
        .on_peer_left(move |peer, time| {
            s3.lock().unwrap().push(Seen::Left(peer));
            times.lock().unwrap().push(time);
        })
        .on_message(move |peer, payload| s4.lock().unwrap().push(Seen::Message(peer, payload)));

    let room = Room::setup(config, callbacks, server.clone(), peers.clone())
        .await
        .expect("room should start");
    settle().await;

    Harness {
        room,
        server,
        peers,
        seen,
        left_times,
    }
}

fn roster(members: &[&str]) -> String {
    json!({"room_name": "lobby", "peers": members, "your_ip": ME}).to_string()
}

fn from(body: Value, sender: &str) -> String {
    format!("{body}{sender}")
}

impl Harness {
    /// Everything the application has been told so far, then forgets it.
    fn take_seen(&self) -> Vec<Seen> {
        std::mem::take(&mut *self.seen.lock().unwrap())
    }

    async fn push(&self, text: impl Into<String>) {
        self.server.latest().push(text);
        settle().await;
    }

    /// Joins a room whose members each sent us an offer, in order.
    /// Link `i` belongs to `members[i]`.
    async fn join_with_offers(&self, members: &[&str]) {
        self.push(roster(members)).await;
        for member in members {
            self.push(from(json!({"offer": {"sdp": "remote"}}), member)).await;
        }
    }

    async fn open(&self, link: usize) {
        self.peers.link(link).emit(PeerEvent::ChannelOpen);
        settle().await;
    }
}

// =========================================================================
// Control connection
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_join_request_sent_on_connect() {
    let h = start().await;

    assert_eq!(h.server.attempts(), 1);
    assert_eq!(h.server.state.lock().unwrap().urls[0], "ws://matchmaker.test");
    assert_eq!(h.server.conn(0).sent(), vec![r#"{"join_room":"lobby"}"#]);
    assert_eq!(h.room.state(), RoomState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_bare_server_address_gets_secure_scheme() {
    let h = start_with(
        RoomConfig {
            server_url: "matchmaker.test".into(),
            ..config()
        },
        MockServer::default(),
    )
    .await;
    assert_eq!(h.server.state.lock().unwrap().urls[0], "wss://matchmaker.test");
}

#[tokio::test(start_paused = true)]
async fn test_keep_alive_every_ten_seconds() {
    let h = start().await;
    let conn = h.server.conn(0);

    tokio::time::sleep(Duration::from_millis(9_990)).await;
    assert_eq!(conn.keep_alives(), 0);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(conn.keep_alives(), 1);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(conn.keep_alives(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_malformed_control_messages_are_ignored() {
    let h = start().await;
    h.push("not json").await;
    h.push(r#"{"unknown_field":1}"#).await;
    h.push(r#"{"offer":{}}"#).await; // no sender address

    assert!(h.take_seen().is_empty());
    assert_eq!(h.peers.count(), 0);

    h.push(roster(&[])).await;
    assert_eq!(h.room.state(), RoomState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_oversized_addresses_do_not_stop_the_room() {
    let h = start().await;
    let huge = "99999999999999999.0.0.0:1";

    h.push(json!({"room_name": "lobby", "peers": [huge], "your_ip": huge}).to_string())
        .await;
    h.push(from(json!({"offer": {"sdp": "remote"}}), huge)).await;
    h.push(json!({"disconnected_peer_id": huge}).to_string()).await;

    let info = h.room.info().await.expect("room should still answer");
    assert_eq!(info.local_id, id(huge));
    assert!(info.peers.is_empty());
    assert_eq!(info.state, RoomState::Connected);
}

// =========================================================================
// Join state machine
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_zero_peer_room_connects_immediately() {
    let h = start().await;
    h.push(roster(&[])).await;

    assert_eq!(
        h.take_seen(),
        vec![Seen::State(RoomState::Joining), Seen::State(RoomState::Connected)]
    );
    let info = h.room.info().await.unwrap();
    assert_eq!(info.state, RoomState::Connected);
    assert_eq!(info.local_id, id(ME));
    assert!(info.pending.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_join_converges_once_every_member_opens() {
    let h = start().await;
    h.join_with_offers(&[ALICE, BOB]).await;

    assert_eq!(h.room.state(), RoomState::Joining);
    let info = h.room.info().await.unwrap();
    assert_eq!(info.peers, vec![id(ALICE), id(BOB)]);
    assert_eq!(info.pending, vec![id(ALICE), id(BOB)]);

    h.open(0).await;
    assert_eq!(h.room.state(), RoomState::Joining);
    h.open(1).await;
    assert_eq!(h.room.state(), RoomState::Connected);

    // A repeated open is not a second join.
    h.open(1).await;

    assert_eq!(
        h.take_seen(),
        vec![
            Seen::State(RoomState::Joining),
            Seen::Joined(id(ALICE)),
            Seen::Joined(id(BOB)),
            Seen::State(RoomState::Connected),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_offer_is_answered_to_its_sender() {
    let h = start().await;
    h.join_with_offers(&[ALICE]).await;

    assert_eq!(
        h.peers.link(0).calls(),
        vec![r#"create_answer {"sdp":"remote"}"#.to_string()]
    );
    assert!(h.server.latest().sent_json().contains(&json!({
        "answer": {"type": "answer", "sdp": "a"},
        "destination": ALICE,
    })));
}

#[tokio::test(start_paused = true)]
async fn test_existing_member_offers_to_newcomer() {
    let h = start().await;
    h.push(roster(&[])).await;
    h.push(from(json!({"join_room": "lobby"}), ALICE)).await;
    assert_eq!(h.peers.count(), 1);

    h.peers.link(0).emit(PeerEvent::NegotiationNeeded);
    settle().await;
    assert!(h.server.latest().sent_json().contains(&json!({
        "offer": {"type": "offer", "sdp": "o"},
        "destination": ALICE,
    })));

    h.push(from(json!({"answer": {"sdp": "back"}}), ALICE)).await;
    h.push(from(json!({"new_ice_candidate": {"candidate": "c1"}}), ALICE))
        .await;
    assert_eq!(
        h.peers.link(0).calls(),
        vec![
            "create_offer".to_string(),
            r#"accept_answer {"sdp":"back"}"#.to_string(),
            r#"add_ice_candidate {"candidate":"c1"}"#.to_string(),
        ]
    );

    // Nobody was pending, so a newcomer opening does not change the state.
    h.open(0).await;
    assert_eq!(h.room.state(), RoomState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_answer_from_unknown_peer_is_ignored() {
    let h = start().await;
    h.push(roster(&[])).await;
    h.push(from(json!({"answer": {}}), BOB)).await;
    h.push(from(json!({"new_ice_candidate": {}}), BOB)).await;
    assert_eq!(h.peers.count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_local_candidates_are_relayed_with_destination() {
    let h = start().await;
    h.join_with_offers(&[ALICE]).await;

    h.peers
        .link(0)
        .emit(PeerEvent::IceCandidate(json!({"candidate": "local"})));
    settle().await;

    assert!(h.server.latest().sent_json().contains(&json!({
        "new_ice_candidate": {"candidate": "local"},
        "destination": ALICE,
    })));
}

#[tokio::test(start_paused = true)]
async fn test_pending_member_leaving_completes_join() {
    let h = start().await;
    h.join_with_offers(&[ALICE]).await;
    h.push(roster(&[ALICE, BOB])).await;
    h.open(0).await;
    assert_eq!(h.room.state(), RoomState::Joining);

    h.push(json!({"disconnected_peer_id": BOB, "time": 1234}).to_string())
        .await;
    assert_eq!(h.room.state(), RoomState::Connected);
    // Bob never had a link, so there is nobody to announce as gone.
    assert!(!h.take_seen().iter().any(|s| matches!(s, Seen::Left(_))));
}

#[tokio::test(start_paused = true)]
async fn test_roster_skips_already_registered_members() {
    let h = start().await;
    h.push(from(json!({"offer": {}}), ALICE)).await;
    h.push(roster(&[ALICE])).await;

    assert_eq!(h.room.state(), RoomState::Connected);
    assert!(h.room.info().await.unwrap().pending.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_peer_left_notice_removes_peer() {
    let h = start().await;
    h.join_with_offers(&[ALICE]).await;
    h.open(0).await;
    h.take_seen();

    h.push(json!({"disconnected_peer_id": ALICE, "time": 42}).to_string())
        .await;

    assert_eq!(h.take_seen(), vec![Seen::Left(id(ALICE))]);
    assert_eq!(*h.left_times.lock().unwrap(), vec![42]);
    assert!(h.peers.link(0).is_closed());
    assert!(h.room.info().await.unwrap().peers.is_empty());
    assert_eq!(h.room.state(), RoomState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_events_from_removed_link_are_ignored() {
    let h = start().await;
    h.join_with_offers(&[ALICE]).await;
    h.push(json!({"disconnected_peer_id": ALICE}).to_string()).await;
    h.take_seen();

    h.open(0).await;
    h.peers
        .link(0)
        .emit(PeerEvent::ChannelMessage(vec![3, 1, 2, 3]));
    settle().await;

    assert!(h.take_seen().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_recreated_peer_gets_fresh_link() {
    let h = start().await;
    h.join_with_offers(&[ALICE]).await;
    h.push(json!({"disconnected_peer_id": ALICE}).to_string()).await;
    h.push(from(json!({"offer": {}}), ALICE)).await;
    assert_eq!(h.peers.count(), 2);
    h.take_seen();

    // The old link's open is stale; the new one counts.
    h.open(0).await;
    assert!(h.take_seen().is_empty());
    h.open(1).await;
    assert_eq!(h.take_seen(), vec![Seen::Joined(id(ALICE))]);
}

// =========================================================================
// Teardown and reconnect
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_teardown_announces_every_peer_before_disconnecting() {
    let h = start().await;
    h.join_with_offers(&[ALICE, BOB]).await;
    h.open(0).await;
    h.open(1).await;
    h.take_seen();

    h.server.conn(0).close();
    settle().await;

    let seen = h.take_seen();
    assert_eq!(seen.len(), 3);
    let left: HashSet<Seen> = seen[..2].iter().cloned().collect();
    assert_eq!(
        left,
        HashSet::from([Seen::Left(id(ALICE)), Seen::Left(id(BOB))])
    );
    assert_eq!(seen[2], Seen::State(RoomState::Disconnected));
    assert!(h.left_times.lock().unwrap().iter().all(|t| *t > 0));

    assert!(h.peers.link(0).is_closed());
    assert!(h.peers.link(1).is_closed());
    let info = h.room.info().await.unwrap();
    assert!(info.peers.is_empty());
    assert!(info.pending.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_reconnects_250ms_after_clean_close() {
    let h = start().await;
    h.server.conn(0).close();
    settle().await;
    assert_eq!(h.server.attempts(), 1);

    tokio::time::sleep(Duration::from_millis(247)).await;
    assert_eq!(h.server.attempts(), 1);

    tokio::time::sleep(Duration::from_millis(3)).await;
    assert_eq!(h.server.attempts(), 2);
    assert_eq!(h.server.conn(1).sent(), vec![r#"{"join_room":"lobby"}"#]);
}

#[tokio::test(start_paused = true)]
async fn test_reconnects_after_connection_error() {
    let h = start().await;
    h.push(roster(&[])).await;
    h.take_seen();

    h.server.conn(0).fail();
    settle().await;
    assert!(h.server.conn(0).is_closed());
    assert_eq!(h.take_seen(), vec![Seen::State(RoomState::Disconnected)]);

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(h.server.connection_count(), 2);

    // The new connection joins like the first one did.
    h.push(roster(&[])).await;
    assert_eq!(h.room.state(), RoomState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_failed_dials_retry_without_limit() {
    let server = MockServer::default();
    server.refuse_next(3);
    let h = start_with(config(), server).await;
    assert_eq!(h.server.attempts(), 1);

    tokio::time::sleep(Duration::from_millis(750)).await;
    assert_eq!(h.server.attempts(), 4);
    assert_eq!(h.server.connection_count(), 1);
    // Never left Disconnected, so nothing to announce.
    assert!(h.take_seen().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_tears_down_then_reconnects() {
    let h = start().await;
    h.join_with_offers(&[ALICE]).await;
    h.open(0).await;
    h.take_seen();

    h.room.disconnect().await.unwrap();
    settle().await;
    assert!(h.server.conn(0).is_closed());
    assert_eq!(
        h.take_seen(),
        vec![Seen::Left(id(ALICE)), Seen::State(RoomState::Disconnected)]
    );

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(h.server.attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_without_reconnecting() {
    let h = start().await;
    h.join_with_offers(&[ALICE]).await;
    h.open(0).await;
    h.take_seen();

    h.room.shutdown().await.unwrap();
    settle().await;
    assert!(h.server.conn(0).is_closed());
    assert_eq!(
        h.take_seen(),
        vec![Seen::Left(id(ALICE)), Seen::State(RoomState::Disconnected)]
    );

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(h.server.attempts(), 1);
    assert!(matches!(h.room.info().await, Err(RoomError::Unavailable)));
    assert!(matches!(
        h.room.send(b"late".to_vec(), None).await,
        Err(RoomError::Unavailable)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_dropping_every_handle_stops_the_room() {
    let h = start().await;
    let conn = h.server.conn(0);
    let server = h.server.clone();
    drop(h);
    settle().await;

    assert!(conn.is_closed());
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(server.attempts(), 1);
}

// =========================================================================
// Messaging
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_broadcast_reaches_only_ready_peers() {
    let h = start().await;
    h.join_with_offers(&[ALICE, BOB]).await;
    h.open(0).await;

    h.room.send(b"hello".to_vec(), None).await.unwrap();
    settle().await;

    assert_eq!(h.peers.link(0).sent(), vec![b"\x03hello".to_vec()]);
    assert!(h.peers.link(1).sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_targeted_send() {
    let h = start().await;
    h.join_with_offers(&[ALICE, BOB]).await;
    h.open(0).await;
    h.open(1).await;

    h.room.send(b"psst".to_vec(), Some(id(BOB))).await.unwrap();
    // Unknown targets are dropped without an error.
    h.room.send(b"lost".to_vec(), Some(PeerId(999))).await.unwrap();
    settle().await;

    assert!(h.peers.link(0).sent().is_empty());
    assert_eq!(h.peers.link(1).sent(), vec![b"\x03psst".to_vec()]);
}

#[tokio::test(start_paused = true)]
async fn test_closed_channel_is_skipped_by_broadcast() {
    let h = start().await;
    h.join_with_offers(&[ALICE]).await;
    h.open(0).await;
    h.peers.link(0).emit(PeerEvent::ChannelClosed);
    settle().await;

    h.room.send(b"anyone?".to_vec(), None).await.unwrap();
    settle().await;

    assert!(h.peers.link(0).sent().is_empty());
    let info = h.room.info().await.unwrap();
    assert_eq!(info.peers, vec![id(ALICE)]);
    assert!(info.ready_peers.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_large_message_is_fragmented_on_the_wire() {
    let h = start().await;
    h.join_with_offers(&[ALICE]).await;
    h.open(0).await;

    // Random bytes do not compress, so this needs three frames.
    let payload: Vec<u8> = (0..MAX_FRAME_PAYLOAD * 2 + 10).map(|_| rand::random()).collect();
    h.room.send(payload.clone(), None).await.unwrap();
    settle().await;

    let frames = h.peers.link(0).sent();
    assert_eq!(frames.len(), 3);
    assert_eq!(frames[0][0], 1);
    assert!(frames[1..].iter().all(|f| f[0] == 2));

    let mut reassembler = Reassembler::new();
    let mut delivered = None;
    for frame in &frames {
        if let Some(done) = reassembler.push(frame, &Gzip).unwrap() {
            delivered = Some(done);
        }
    }
    assert_eq!(delivered, Some(payload));
}

#[tokio::test(start_paused = true)]
async fn test_received_messages_are_delivered_in_order() {
    let h = start().await;
    h.join_with_offers(&[ALICE]).await;
    h.open(0).await;
    h.take_seen();

    let big: Vec<u8> = (0..MAX_FRAME_PAYLOAD * 3).map(|_| rand::random()).collect();
    let compressible = vec![7u8; MAX_FRAME_PAYLOAD * 2];
    let link = h.peers.link(0);
    link.emit(PeerEvent::ChannelMessage(vec![3, 1]));
    for frame in EncodedMessage::encode(&big, &Gzip).unwrap().to_frames() {
        link.emit(PeerEvent::ChannelMessage(frame));
    }
    for frame in EncodedMessage::encode(&compressible, &Gzip).unwrap().to_frames() {
        link.emit(PeerEvent::ChannelMessage(frame));
    }
    link.emit(PeerEvent::ChannelMessage(vec![3, 2]));
    settle().await;

    assert_eq!(
        h.take_seen(),
        vec![
            Seen::Message(id(ALICE), vec![1]),
            Seen::Message(id(ALICE), big),
            Seen::Message(id(ALICE), compressible),
            Seen::Message(id(ALICE), vec![2]),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_protocol_violation_is_not_fatal() {
    let h = start().await;
    h.join_with_offers(&[ALICE]).await;
    h.open(0).await;
    h.take_seen();

    let link = h.peers.link(0);
    link.emit(PeerEvent::ChannelMessage(vec![2, 9, 9])); // continuation, nothing in flight
    link.emit(PeerEvent::ChannelMessage(vec![42, 0])); // unknown tag
    link.emit(PeerEvent::ChannelMessage(vec![4, 1, 2, 3])); // not gzip
    link.emit(PeerEvent::ChannelMessage(Vec::new()));
    link.emit(PeerEvent::ChannelMessage(vec![3, 7]));
    settle().await;

    assert_eq!(h.take_seen(), vec![Seen::Message(id(ALICE), vec![7])]);
    assert_eq!(h.room.state(), RoomState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_message_delay_defers_delivery() {
    let h = start_with(
        RoomConfig {
            message_delay: Duration::from_millis(100),
            ..config()
        },
        MockServer::default(),
    )
    .await;
    h.join_with_offers(&[ALICE]).await;
    h.open(0).await;
    h.take_seen();

    h.peers.link(0).emit(PeerEvent::ChannelMessage(vec![3, 5]));
    settle().await;
    assert!(h.take_seen().is_empty());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.take_seen(), vec![Seen::Message(id(ALICE), vec![5])]);
}

#[tokio::test(start_paused = true)]
async fn test_ice_servers_are_handed_to_links() {
    let h = start().await;
    h.join_with_offers(&[ALICE]).await;
    assert_eq!(
        *h.peers.ice_servers.lock().unwrap(),
        RoomConfig::default().ice_servers
    );
}
