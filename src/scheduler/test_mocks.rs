//! Mock collaborators for testing the scheduler.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::clock::Clock;
use crate::network_events::{NetworkEvent, NetworkEventProducer};
use crate::stats::StatsSink;
use crate::torrent::tracker::AnnounceRequest;
use crate::torrent::{
    Bitfield, Conn, Dispatcher, DispatcherFactory, Handshaker, InfoHash, PeerId, PeerInfo,
    PendingConn, Torrent, TorrentArchive, TorrentError, TorrentInfo, TrackerClient,
};

use super::event_loop::EventSender;
use super::events::SchedulerEvent;

/// Clock that only moves when a test advances it.
#[derive(Debug)]
pub struct SimulatedClock {
    start: Instant,
    offset: Mutex<Duration>,
}

impl SimulatedClock {
    /// Creates a frozen clock at the current instant.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Advances the clock by `duration`.
    pub fn advance(&self, duration: Duration) {
        *self.offset.lock().unwrap() += duration;
    }
}

impl Default for SimulatedClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SimulatedClock {
    fn now(&self) -> Instant {
        self.start + *self.offset.lock().unwrap()
    }
}

/// In-memory torrent with a settable completion flag.
#[derive(Debug)]
pub struct MockTorrent {
    info: TorrentInfo,
    complete: AtomicBool,
}

impl MockTorrent {
    /// Creates a torrent named `name` whose info hash is `[seed; 20]`.
    pub fn new(name: &str, seed: u8) -> Self {
        Self {
            info: TorrentInfo {
                info_hash: InfoHash::new([seed; 20]),
                name: name.to_string(),
                piece_length: 32_768,
                total_length: 65_536,
            },
            complete: AtomicBool::new(false),
        }
    }

    /// Flips local completion, as finishing a download would.
    pub fn set_complete(&self, complete: bool) {
        self.complete.store(complete, Ordering::SeqCst);
    }
}

impl Torrent for MockTorrent {
    fn info_hash(&self) -> InfoHash {
        self.info.info_hash
    }

    fn name(&self) -> String {
        self.info.name.clone()
    }

    fn stat(&self) -> TorrentInfo {
        self.info.clone()
    }

    fn complete(&self) -> bool {
        self.complete.load(Ordering::SeqCst)
    }
}

/// Archive over a map of mock torrents.
#[derive(Default)]
pub struct MockTorrentArchive {
    torrents: Mutex<HashMap<String, Arc<MockTorrent>>>,
}

impl MockTorrentArchive {
    /// Creates an empty archive.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a torrent under its name.
    pub fn add(&self, torrent: Arc<MockTorrent>) {
        self.torrents
            .lock()
            .unwrap()
            .insert(torrent.name(), torrent);
    }
}

#[async_trait]
impl TorrentArchive for MockTorrentArchive {
    async fn stat(&self, name: &str) -> Result<TorrentInfo, TorrentError> {
        self.fetch(name).await.map(|t| t.stat())
    }

    async fn fetch(&self, name: &str) -> Result<Arc<dyn Torrent>, TorrentError> {
        self.torrents
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .map(|t| t as Arc<dyn Torrent>)
            .ok_or_else(|| TorrentError::TorrentNotInArchive {
                name: name.to_string(),
            })
    }
}

/// Handshaker that succeeds or fails on demand and records every attempt.
pub struct MockHandshaker {
    clock: Arc<dyn Clock>,
    fail_establish: AtomicBool,
    fail_initialize: AtomicBool,
    initialize_calls: Mutex<Vec<(PeerId, SocketAddr)>>,
    established: Mutex<Vec<Conn>>,
}

impl MockHandshaker {
    /// Creates a handshaker that stamps conns with `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            fail_establish: AtomicBool::new(false),
            fail_initialize: AtomicBool::new(false),
            initialize_calls: Mutex::new(Vec::new()),
            established: Mutex::new(Vec::new()),
        }
    }

    /// Makes inbound establishes fail.
    pub fn fail_establish(&self, fail: bool) {
        self.fail_establish.store(fail, Ordering::SeqCst);
    }

    /// Makes outbound initializes fail.
    pub fn fail_initialize(&self, fail: bool) {
        self.fail_initialize.store(fail, Ordering::SeqCst);
    }

    /// Every outbound handshake attempted so far.
    pub fn initialize_calls(&self) -> Vec<(PeerId, SocketAddr)> {
        self.initialize_calls.lock().unwrap().clone()
    }

    /// Every conn this handshaker has produced.
    pub fn established(&self) -> Vec<Conn> {
        self.established.lock().unwrap().clone()
    }

    fn make_conn(&self, peer_id: PeerId, info_hash: InfoHash) -> Conn {
        let conn = Conn::new(peer_id, info_hash, self.clock.now());
        self.established.lock().unwrap().push(conn.clone());
        conn
    }
}

#[async_trait]
impl Handshaker for MockHandshaker {
    async fn establish(
        &self,
        pc: &PendingConn,
        _info: &TorrentInfo,
    ) -> Result<Conn, TorrentError> {
        if self.fail_establish.load(Ordering::SeqCst) {
            return Err(TorrentError::HandshakeFailed {
                reason: "mock establish failure".to_string(),
            });
        }
        Ok(self.make_conn(pc.peer_id(), pc.info_hash()))
    }

    async fn initialize(
        &self,
        peer: PeerId,
        addr: SocketAddr,
        info: &TorrentInfo,
    ) -> Result<(Conn, Bitfield), TorrentError> {
        self.initialize_calls.lock().unwrap().push((peer, addr));
        if self.fail_initialize.load(Ordering::SeqCst) {
            return Err(TorrentError::HandshakeFailed {
                reason: "mock initialize failure".to_string(),
            });
        }
        Ok((self.make_conn(peer, info.info_hash), Bitfield::default()))
    }
}

/// Tracker that returns a configured peer list and records requests.
#[derive(Default)]
pub struct MockTracker {
    peers: Mutex<Vec<PeerInfo>>,
    fail_announce: AtomicBool,
    requests: Mutex<Vec<AnnounceRequest>>,
}

impl MockTracker {
    /// Creates a tracker with no peers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the candidate peers returned by announces.
    pub fn set_peers(&self, peers: Vec<PeerInfo>) {
        *self.peers.lock().unwrap() = peers;
    }

    /// Makes announces fail.
    pub fn fail_announce(&self, fail: bool) {
        self.fail_announce.store(fail, Ordering::SeqCst);
    }

    /// Number of announces received so far.
    pub fn announce_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Every announce request received so far.
    pub fn requests(&self) -> Vec<AnnounceRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl TrackerClient for MockTracker {
    async fn announce(&self, request: AnnounceRequest) -> Result<Vec<PeerInfo>, TorrentError> {
        self.requests.lock().unwrap().push(request);
        if self.fail_announce.load(Ordering::SeqCst) {
            return Err(TorrentError::AnnounceFailed {
                reason: "mock announce failure".to_string(),
            });
        }
        Ok(self.peers.lock().unwrap().clone())
    }
}

/// Dispatcher that records conns and exposes settable progress timestamps.
pub struct MockDispatcher {
    created_at: Instant,
    events: EventSender,
    info_hash: InfoHash,
    conns: Mutex<Vec<Conn>>,
    torn_down: AtomicBool,
    reject_conns: AtomicBool,
    last_good_piece_received: Mutex<HashMap<PeerId, Instant>>,
    last_piece_sent: Mutex<HashMap<PeerId, Instant>>,
    last_conn_removed: Mutex<Option<Instant>>,
}

impl MockDispatcher {
    fn new(info_hash: InfoHash, created_at: Instant, events: EventSender) -> Self {
        Self {
            created_at,
            events,
            info_hash,
            conns: Mutex::new(Vec::new()),
            torn_down: AtomicBool::new(false),
            reject_conns: AtomicBool::new(false),
            last_good_piece_received: Mutex::new(HashMap::new()),
            last_piece_sent: Mutex::new(HashMap::new()),
            last_conn_removed: Mutex::new(None),
        }
    }

    /// Reports this dispatcher's torrent as complete, as a real
    /// dispatcher does when the last piece verifies.
    pub async fn complete(&self) {
        self.events
            .send(SchedulerEvent::CompletedDispatcher {
                info_hash: self.info_hash,
            })
            .await;
    }

    /// True once the scheduler tore this dispatcher down.
    pub fn torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    /// Makes conn registration fail.
    pub fn reject_conns(&self, reject: bool) {
        self.reject_conns.store(reject, Ordering::SeqCst);
    }

    /// Conns registered with this dispatcher, including closed ones.
    pub fn conns(&self) -> Vec<Conn> {
        self.conns.lock().unwrap().clone()
    }

    /// Records piece progress received from `peer`.
    pub fn set_last_good_piece_received(&self, peer: PeerId, at: Instant) {
        self.last_good_piece_received.lock().unwrap().insert(peer, at);
    }

    /// Records a piece sent to `peer`.
    pub fn set_last_piece_sent(&self, peer: PeerId, at: Instant) {
        self.last_piece_sent.lock().unwrap().insert(peer, at);
    }

    /// Records the latest conn removal.
    pub fn set_last_conn_removed(&self, at: Instant) {
        *self.last_conn_removed.lock().unwrap() = Some(at);
    }
}

impl Dispatcher for MockDispatcher {
    fn add_conn(&self, conn: Conn, _remote_bitfield: Bitfield) -> Result<(), TorrentError> {
        if self.reject_conns.load(Ordering::SeqCst) {
            return Err(TorrentError::DispatcherRejectedConn {
                reason: "mock dispatcher rejection".to_string(),
            });
        }
        self.conns.lock().unwrap().push(conn);
        Ok(())
    }

    fn tear_down(&self) {
        self.torn_down.store(true, Ordering::SeqCst);
        for conn in self.conns.lock().unwrap().iter() {
            conn.close();
        }
    }

    fn empty(&self) -> bool {
        self.conns.lock().unwrap().iter().all(Conn::is_closed)
    }

    fn created_at(&self) -> Instant {
        self.created_at
    }

    fn last_good_piece_received(&self, peer: PeerId) -> Option<Instant> {
        self.last_good_piece_received.lock().unwrap().get(&peer).copied()
    }

    fn last_piece_sent(&self, peer: PeerId) -> Option<Instant> {
        self.last_piece_sent.lock().unwrap().get(&peer).copied()
    }

    fn last_conn_removed(&self) -> Option<Instant> {
        *self.last_conn_removed.lock().unwrap()
    }
}

/// Factory handing out [`MockDispatcher`]s and remembering them by hash.
pub struct MockDispatcherFactory {
    clock: Arc<dyn Clock>,
    built: Mutex<HashMap<InfoHash, Arc<MockDispatcher>>>,
}

impl MockDispatcherFactory {
    /// Creates a factory that stamps dispatchers with `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            built: Mutex::new(HashMap::new()),
        }
    }

    /// The dispatcher built for `info_hash`, if any.
    pub fn dispatcher(&self, info_hash: InfoHash) -> Option<Arc<MockDispatcher>> {
        self.built.lock().unwrap().get(&info_hash).cloned()
    }
}

impl DispatcherFactory for MockDispatcherFactory {
    fn build(&self, torrent: Arc<dyn Torrent>, events: EventSender) -> Arc<dyn Dispatcher> {
        let dispatcher = Arc::new(MockDispatcher::new(
            torrent.info_hash(),
            self.clock.now(),
            events,
        ));
        self.built
            .lock()
            .unwrap()
            .insert(torrent.info_hash(), Arc::clone(&dispatcher));
        dispatcher
    }
}

/// Stats sink that records every gauge update.
#[derive(Default)]
pub struct CapturingStats {
    gauges: Mutex<Vec<(&'static str, f64)>>,
}

impl CapturingStats {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every gauge update recorded so far.
    pub fn gauges(&self) -> Vec<(&'static str, f64)> {
        self.gauges.lock().unwrap().clone()
    }
}

impl StatsSink for CapturingStats {
    fn gauge(&self, name: &'static str, value: f64) {
        self.gauges.lock().unwrap().push((name, value));
    }
}

/// Network-event producer that records every event.
#[derive(Default)]
pub struct CapturingNetworkEvents {
    events: Mutex<Vec<NetworkEvent>>,
}

impl CapturingNetworkEvents {
    /// Creates an empty producer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event produced so far.
    pub fn events(&self) -> Vec<NetworkEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl NetworkEventProducer for CapturingNetworkEvents {
    fn produce(&self, event: NetworkEvent) {
        self.events.lock().unwrap().push(event);
    }
}
