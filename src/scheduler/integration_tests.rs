//! End-to-end scheduler scenarios driven with mock collaborators and a
//! frozen clock. Ticks are sent manually; the configured timers are
//! parked far out by `SchedulerConfig::for_testing`.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::clock::Clock;
use crate::config::SchedulerConfig;
use crate::network_events::NetworkEvent;
use crate::torrent::{Bitfield, PeerId, PeerInfo, PendingConn, Torrent};

use super::blacklist::BlacklistedConn;
use super::events::{SchedulerEvent, SchedulerStats};
use super::test_mocks::{
    CapturingNetworkEvents, CapturingStats, MockDispatcherFactory, MockHandshaker, MockTorrent,
    MockTorrentArchive, MockTracker, SimulatedClock,
};
use super::{PeerContext, SchedulerComponents, SchedulerError, SchedulerHandle, spawn_scheduler};

const TIMEOUT: Duration = Duration::from_secs(5);
const POLL: Duration = Duration::from_millis(10);

struct Harness {
    handle: SchedulerHandle,
    pctx: PeerContext,
    clock: Arc<SimulatedClock>,
    handshaker: Arc<MockHandshaker>,
    archive: Arc<MockTorrentArchive>,
    tracker: Arc<MockTracker>,
    dispatchers: Arc<MockDispatcherFactory>,
    stats_sink: Arc<CapturingStats>,
    network_events: Arc<CapturingNetworkEvents>,
}

fn spawn_harness(config: SchedulerConfig) -> Harness {
    let clock = Arc::new(SimulatedClock::new());
    let handshaker = Arc::new(MockHandshaker::new(clock.clone()));
    let archive = Arc::new(MockTorrentArchive::new());
    let tracker = Arc::new(MockTracker::new());
    let dispatchers = Arc::new(MockDispatcherFactory::new(clock.clone()));
    let stats_sink = Arc::new(CapturingStats::new());
    let network_events = Arc::new(CapturingNetworkEvents::new());
    let pctx = PeerContext::new(
        PeerId::new([0xee; 20]),
        IpAddr::V4(Ipv4Addr::LOCALHOST),
        6881,
    );
    let handle = spawn_scheduler(
        config,
        pctx,
        SchedulerComponents {
            handshaker: handshaker.clone(),
            archive: archive.clone(),
            tracker: tracker.clone(),
            dispatcher_factory: dispatchers.clone(),
            clock: clock.clone(),
            stats: stats_sink.clone(),
            network_events: network_events.clone(),
        },
    );
    Harness {
        handle,
        pctx,
        clock,
        handshaker,
        archive,
        tracker,
        dispatchers,
        stats_sink,
        network_events,
    }
}

impl Harness {
    async fn send(&self, event: SchedulerEvent) {
        assert!(self.handle.event_sender().send(event).await);
    }

    /// Round-trips through the loop, so every event this test sent before
    /// it has been applied when this returns.
    async fn stats(&self) -> SchedulerStats {
        self.handle.stats().await.expect("scheduler stopped")
    }

    async fn wait_for_stats(&self, pred: impl Fn(&SchedulerStats) -> bool) -> SchedulerStats {
        let deadline = tokio::time::Instant::now() + TIMEOUT;
        loop {
            let stats = self.stats().await;
            if pred(&stats) {
                return stats;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "stats condition not reached in time: {stats:?}"
            );
            tokio::time::sleep(POLL).await;
        }
    }

    async fn wait_for_blacklist_len(&self, len: usize) -> Vec<BlacklistedConn> {
        let deadline = tokio::time::Instant::now() + TIMEOUT;
        loop {
            let snapshot = self
                .handle
                .blacklist_snapshot()
                .await
                .expect("scheduler stopped");
            if snapshot.len() == len {
                return snapshot;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "blacklist never reached {len} entries: {snapshot:?}"
            );
            tokio::time::sleep(POLL).await;
        }
    }

    fn add_torrent_task(
        &self,
        torrent: &Arc<MockTorrent>,
    ) -> tokio::task::JoinHandle<Result<(), SchedulerError>> {
        let handle = self.handle.clone();
        let torrent = torrent.clone();
        tokio::spawn(async move { handle.add_torrent(torrent).await })
    }

    async fn add_torrent_and_wait(&self, torrent: &Arc<MockTorrent>) {
        let _waiter = self.add_torrent_task(torrent);
        self.wait_for_stats(|s| s.torrents == 1).await;
    }
}

async fn eventually(mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(POLL).await;
    }
}

fn remote_peer(n: u8) -> PeerInfo {
    PeerInfo {
        peer_id: PeerId::new([n; 20]).to_string(),
        ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: 7000 + u16::from(n),
    }
}

#[tokio::test]
async fn test_download_lifecycle_completes() {
    let config = SchedulerConfig {
        max_global_egress: 2,
        max_conns_per_torrent: 2,
        ..SchedulerConfig::for_testing()
    };
    let h = spawn_harness(config);
    let torrent = Arc::new(MockTorrent::new("movie.mkv", 1));

    let waiter = h.add_torrent_task(&torrent);
    h.wait_for_stats(|s| s.torrents == 1).await;

    h.tracker.set_peers(vec![remote_peer(1), remote_peer(2)]);
    h.send(SchedulerEvent::AnnounceTick).await;
    h.wait_for_stats(|s| s.active_conns == 2).await;

    // The torrent went back into the announce rotation, so a second tick
    // announces again.
    h.send(SchedulerEvent::AnnounceTick).await;
    eventually(|| h.tracker.announce_count() == 2).await;

    let dispatcher = h.dispatchers.dispatcher(torrent.info_hash()).unwrap();
    assert_eq!(dispatcher.conns().len(), 2);
    dispatcher.complete().await;

    let outcome = tokio::time::timeout(TIMEOUT, waiter).await.unwrap().unwrap();
    outcome.unwrap();
    eventually(|| {
        h.network_events
            .events()
            .contains(&NetworkEvent::torrent_complete(
                torrent.info_hash(),
                h.pctx.peer_id,
            ))
    })
    .await;

    h.handle.stop().await;
}

#[tokio::test]
async fn test_capacity_stops_candidate_loop() {
    let config = SchedulerConfig {
        max_conns_per_torrent: 1,
        ..SchedulerConfig::for_testing()
    };
    let h = spawn_harness(config);
    let torrent = Arc::new(MockTorrent::new("movie.mkv", 1));
    h.add_torrent_and_wait(&torrent).await;

    h.tracker
        .set_peers(vec![remote_peer(1), remote_peer(2), remote_peer(3)]);
    h.send(SchedulerEvent::AnnounceTick).await;
    h.wait_for_stats(|s| s.active_conns == 1).await;

    // The candidate loop broke on the first at-capacity rejection, so only
    // one outbound handshake ever started.
    assert_eq!(h.handshaker.initialize_calls().len(), 1);

    h.handle.stop().await;
}

#[tokio::test]
async fn test_own_peer_id_is_skipped() {
    let h = spawn_harness(SchedulerConfig::for_testing());
    let torrent = Arc::new(MockTorrent::new("movie.mkv", 1));
    h.add_torrent_and_wait(&torrent).await;

    let own = PeerInfo {
        peer_id: h.pctx.peer_id.to_string(),
        ip: h.pctx.ip,
        port: h.pctx.port,
    };
    h.tracker.set_peers(vec![own, remote_peer(1)]);
    h.send(SchedulerEvent::AnnounceTick).await;
    h.wait_for_stats(|s| s.active_conns == 1).await;

    let calls = h.handshaker.initialize_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, PeerId::new([1; 20]));

    h.handle.stop().await;
}

#[tokio::test]
async fn test_failed_handshake_blacklists_peer() {
    let config = SchedulerConfig::for_testing();
    let cooldown = config.blacklist_cooldown;
    let h = spawn_harness(config);
    let torrent = Arc::new(MockTorrent::new("movie.mkv", 1));
    h.add_torrent_and_wait(&torrent).await;

    h.handshaker.fail_initialize(true);
    h.tracker.set_peers(vec![remote_peer(1)]);
    h.send(SchedulerEvent::AnnounceTick).await;

    let snapshot = h.wait_for_blacklist_len(1).await;
    assert_eq!(snapshot[0].peer_id, PeerId::new([1; 20]));
    assert_eq!(snapshot[0].info_hash, torrent.info_hash());
    // The clock is frozen, so the full cooldown is still outstanding.
    assert_eq!(snapshot[0].remaining, cooldown);
    assert_eq!(h.stats().await.pending_conns, 0);

    // Re-announcing the same peer before the cooldown expires opens no new
    // outbound handshakes. A third announce happening proves the second
    // response was applied: the torrent only re-enters the rotation when
    // its response lands.
    h.handshaker.fail_initialize(false);
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while h.tracker.announce_count() < 3 {
        h.send(SchedulerEvent::AnnounceTick).await;
        assert!(tokio::time::Instant::now() < deadline, "announces stalled");
        tokio::time::sleep(POLL).await;
    }
    assert_eq!(h.handshaker.initialize_calls().len(), 1);
    assert_eq!(h.stats().await.active_conns, 0);

    h.handle.stop().await;
}

#[tokio::test]
async fn test_idle_conn_is_preempted() {
    let config = SchedulerConfig {
        max_conns_per_torrent: 2,
        idle_conn_ttl: Duration::from_secs(60),
        ..SchedulerConfig::for_testing()
    };
    let cooldown = config.blacklist_cooldown;
    let h = spawn_harness(config);
    let torrent = Arc::new(MockTorrent::new("movie.mkv", 1));
    h.add_torrent_and_wait(&torrent).await;

    h.tracker.set_peers(vec![remote_peer(1), remote_peer(2)]);
    h.send(SchedulerEvent::AnnounceTick).await;
    h.wait_for_stats(|s| s.active_conns == 2).await;

    // Peer 2 keeps making progress; peer 1 stays silent past the idle TTL.
    h.clock.advance(Duration::from_secs(120));
    let dispatcher = h.dispatchers.dispatcher(torrent.info_hash()).unwrap();
    dispatcher.set_last_good_piece_received(PeerId::new([2; 20]), h.clock.now());

    h.send(SchedulerEvent::PreemptionTick).await;
    h.wait_for_stats(|s| s.active_conns == 1).await;

    let snapshot = h.wait_for_blacklist_len(1).await;
    assert_eq!(snapshot[0].peer_id, PeerId::new([1; 20]));
    assert_eq!(snapshot[0].remaining, cooldown);

    h.handle.stop().await;
}

#[tokio::test]
async fn test_expired_conn_is_preempted_despite_progress() {
    let config = SchedulerConfig {
        idle_conn_ttl: Duration::from_secs(1000),
        conn_ttl: Duration::from_secs(100),
        ..SchedulerConfig::for_testing()
    };
    let h = spawn_harness(config);
    let torrent = Arc::new(MockTorrent::new("movie.mkv", 1));
    h.add_torrent_and_wait(&torrent).await;

    h.tracker.set_peers(vec![remote_peer(1)]);
    h.send(SchedulerEvent::AnnounceTick).await;
    h.wait_for_stats(|s| s.active_conns == 1).await;

    h.clock.advance(Duration::from_secs(150));
    let dispatcher = h.dispatchers.dispatcher(torrent.info_hash()).unwrap();
    dispatcher.set_last_good_piece_received(PeerId::new([1; 20]), h.clock.now());

    h.send(SchedulerEvent::PreemptionTick).await;
    h.wait_for_stats(|s| s.active_conns == 0).await;

    h.handle.stop().await;
}

#[tokio::test]
async fn test_cancel_tears_down_torrent() {
    let h = spawn_harness(SchedulerConfig::for_testing());
    let torrent = Arc::new(MockTorrent::new("movie.mkv", 1));

    let waiter = h.add_torrent_task(&torrent);
    h.wait_for_stats(|s| s.torrents == 1).await;

    h.tracker.set_peers(vec![remote_peer(1)]);
    h.send(SchedulerEvent::AnnounceTick).await;
    h.wait_for_stats(|s| s.active_conns == 1).await;

    h.handle.cancel_torrent("movie.mkv").await.unwrap();
    let outcome = tokio::time::timeout(TIMEOUT, waiter).await.unwrap().unwrap();
    assert!(matches!(outcome, Err(SchedulerError::TorrentCancelled)));

    let dispatcher = h.dispatchers.dispatcher(torrent.info_hash()).unwrap();
    assert!(dispatcher.torn_down());
    h.wait_for_stats(|s| s.torrents == 0 && s.active_conns == 0)
        .await;
    assert!(
        h.network_events
            .events()
            .contains(&NetworkEvent::torrent_cancelled(
                torrent.info_hash(),
                h.pctx.peer_id,
            ))
    );

    // A late announce response for the cancelled torrent is dropped
    // without side effect.
    let calls_before = h.handshaker.initialize_calls().len();
    h.send(SchedulerEvent::AnnounceResponse {
        info_hash: torrent.info_hash(),
        peers: vec![remote_peer(2)],
    })
    .await;
    let stats = h.stats().await;
    assert_eq!(stats.torrents, 0);
    assert_eq!(stats.pending_conns, 0);
    assert_eq!(h.handshaker.initialize_calls().len(), calls_before);

    h.handle.stop().await;
}

#[tokio::test]
async fn test_complete_torrent_opens_no_new_conns() {
    let h = spawn_harness(SchedulerConfig::for_testing());
    let torrent = Arc::new(MockTorrent::new("movie.mkv", 1));
    h.add_torrent_and_wait(&torrent).await;

    let dispatcher = h.dispatchers.dispatcher(torrent.info_hash()).unwrap();
    dispatcher.complete().await;

    h.send(SchedulerEvent::AnnounceResponse {
        info_hash: torrent.info_hash(),
        peers: vec![remote_peer(1), remote_peer(2)],
    })
    .await;
    let stats = h.stats().await;
    assert_eq!(stats.active_conns, 0);
    assert_eq!(stats.pending_conns, 0);
    assert!(h.handshaker.initialize_calls().is_empty());

    h.handle.stop().await;
}

#[tokio::test]
async fn test_announce_failure_returns_torrent_to_rotation() {
    let h = spawn_harness(SchedulerConfig::for_testing());
    let torrent = Arc::new(MockTorrent::new("movie.mkv", 1));
    h.add_torrent_and_wait(&torrent).await;

    h.tracker.fail_announce(true);
    h.send(SchedulerEvent::AnnounceTick).await;
    eventually(|| h.tracker.announce_count() == 1).await;

    // The failure put the torrent back in the rotation; the next tick is
    // the retry.
    h.tracker.fail_announce(false);
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while h.tracker.announce_count() < 2 {
        h.send(SchedulerEvent::AnnounceTick).await;
        assert!(tokio::time::Instant::now() < deadline, "retry never happened");
        tokio::time::sleep(POLL).await;
    }

    h.handle.stop().await;
}

#[tokio::test]
async fn test_already_complete_torrent_resolves_immediately() {
    let h = spawn_harness(SchedulerConfig::for_testing());
    let torrent = Arc::new(MockTorrent::new("movie.mkv", 1));
    torrent.set_complete(true);

    tokio::time::timeout(TIMEOUT, h.handle.add_torrent(torrent.clone()))
        .await
        .unwrap()
        .unwrap();

    // The seeder announces, but opens no outbound conns to candidates.
    h.tracker.set_peers(vec![remote_peer(1)]);
    h.send(SchedulerEvent::AnnounceTick).await;
    eventually(|| h.tracker.announce_count() == 1).await;
    assert!(h.tracker.requests()[0].complete);
    h.stats().await;
    assert!(h.handshaker.initialize_calls().is_empty());

    h.handle.stop().await;
}

#[tokio::test]
async fn test_every_subscriber_resolves_on_completion() {
    let h = spawn_harness(SchedulerConfig::for_testing());
    let torrent = Arc::new(MockTorrent::new("movie.mkv", 1));

    let first = h.add_torrent_task(&torrent);
    h.wait_for_stats(|s| s.torrents == 1).await;
    let second = h.add_torrent_task(&torrent);
    h.stats().await;

    let dispatcher = h.dispatchers.dispatcher(torrent.info_hash()).unwrap();
    dispatcher.complete().await;

    for waiter in [first, second] {
        tokio::time::timeout(TIMEOUT, waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    h.handle.stop().await;
}

#[tokio::test]
async fn test_idle_seeder_is_retired() {
    let config = SchedulerConfig::for_testing();
    let idle_seeder_ttl = config.idle_seeder_ttl;
    let h = spawn_harness(config);
    let torrent = Arc::new(MockTorrent::new("movie.mkv", 1));
    h.add_torrent_and_wait(&torrent).await;

    let dispatcher = h.dispatchers.dispatcher(torrent.info_hash()).unwrap();
    dispatcher.complete().await;
    // The control survives completion to keep seeding.
    assert_eq!(h.stats().await.torrents, 1);

    h.clock.advance(idle_seeder_ttl);
    h.send(SchedulerEvent::PreemptionTick).await;
    h.wait_for_stats(|s| s.torrents == 0).await;

    h.handle.stop().await;
}

#[tokio::test]
async fn test_incoming_handshake_establishes_conn() {
    let h = spawn_harness(SchedulerConfig::for_testing());
    let torrent = Arc::new(MockTorrent::new("movie.mkv", 1));
    h.archive.add(torrent.clone());

    let pc = PendingConn::new(
        PeerId::new([5; 20]),
        torrent.info_hash(),
        "movie.mkv".to_string(),
        Bitfield::new(Bytes::from_static(&[0xff])),
    );
    h.send(SchedulerEvent::IncomingHandshake { pc }).await;
    h.wait_for_stats(|s| s.active_conns == 1 && s.torrents == 1)
        .await;

    // The torrent control was created on demand for the incoming conn.
    let dispatcher = h.dispatchers.dispatcher(torrent.info_hash()).unwrap();
    assert_eq!(dispatcher.conns().len(), 1);
    assert_eq!(dispatcher.conns()[0].peer_id(), PeerId::new([5; 20]));

    h.handle.stop().await;
}

#[tokio::test]
async fn test_incoming_handshake_rejected_at_capacity() {
    let config = SchedulerConfig {
        max_global_egress: 0,
        ..SchedulerConfig::for_testing()
    };
    let h = spawn_harness(config);

    let pc = PendingConn::new(
        PeerId::new([5; 20]),
        MockTorrent::new("movie.mkv", 1).info_hash(),
        "movie.mkv".to_string(),
        Bitfield::default(),
    );
    let observer = pc.clone();
    h.send(SchedulerEvent::IncomingHandshake { pc }).await;
    h.stats().await;

    assert!(observer.is_closed());
    assert_eq!(h.stats().await.pending_conns, 0);

    h.handle.stop().await;
}

#[tokio::test]
async fn test_incoming_handshake_failure_blacklists_peer() {
    let h = spawn_harness(SchedulerConfig::for_testing());
    let torrent = Arc::new(MockTorrent::new("movie.mkv", 1));
    h.archive.add(torrent.clone());
    h.handshaker.fail_establish(true);

    let pc = PendingConn::new(
        PeerId::new([5; 20]),
        torrent.info_hash(),
        "movie.mkv".to_string(),
        Bitfield::default(),
    );
    let observer = pc.clone();
    h.send(SchedulerEvent::IncomingHandshake { pc }).await;

    let snapshot = h.wait_for_blacklist_len(1).await;
    assert_eq!(snapshot[0].peer_id, PeerId::new([5; 20]));
    assert!(observer.is_closed());
    assert_eq!(h.stats().await.pending_conns, 0);

    h.handle.stop().await;
}

#[tokio::test]
async fn test_stale_blacklist_entries_are_swept() {
    let config = SchedulerConfig::for_testing();
    let cooldown = config.blacklist_cooldown;
    let h = spawn_harness(config);
    let torrent = Arc::new(MockTorrent::new("movie.mkv", 1));
    h.add_torrent_and_wait(&torrent).await;

    h.handshaker.fail_initialize(true);
    h.tracker.set_peers(vec![remote_peer(1)]);
    h.send(SchedulerEvent::AnnounceTick).await;
    h.wait_for_blacklist_len(1).await;

    h.clock.advance(cooldown);
    h.send(SchedulerEvent::CleanupBlacklistTick).await;
    let snapshot = h.handle.blacklist_snapshot().await.unwrap();
    assert!(snapshot.is_empty());

    h.handle.stop().await;
}

#[tokio::test]
async fn test_stats_tick_pushes_gauges() {
    let h = spawn_harness(SchedulerConfig::for_testing());
    let torrent = Arc::new(MockTorrent::new("movie.mkv", 1));
    h.add_torrent_and_wait(&torrent).await;

    h.send(SchedulerEvent::EmitStatsTick).await;
    h.stats().await;

    let gauges = h.stats_sink.gauges();
    assert!(gauges.contains(&("torrents", 1.0)));
    assert!(gauges.contains(&("conns", 0.0)));

    h.handle.stop().await;
}

#[tokio::test]
async fn test_stop_drains_subscribers_and_rejects_later_calls() {
    let h = spawn_harness(SchedulerConfig::for_testing());
    let torrent = Arc::new(MockTorrent::new("movie.mkv", 1));

    let waiter = h.add_torrent_task(&torrent);
    h.wait_for_stats(|s| s.torrents == 1).await;
    let dispatcher = h.dispatchers.dispatcher(torrent.info_hash()).unwrap();

    h.handle.stop().await;

    let outcome = tokio::time::timeout(TIMEOUT, waiter).await.unwrap().unwrap();
    assert!(matches!(outcome, Err(SchedulerError::Stopped)));
    assert!(dispatcher.torn_down());
    assert!(!h.handle.is_running());
    assert!(matches!(
        h.handle.stats().await,
        Err(SchedulerError::Stopped)
    ));
    assert!(matches!(
        h.handle.add_torrent(torrent).await,
        Err(SchedulerError::Stopped)
    ));
}

#[tokio::test]
async fn test_conn_caps_hold_under_announce_flood() {
    let config = SchedulerConfig {
        max_global_egress: 3,
        max_conns_per_torrent: 2,
        ..SchedulerConfig::for_testing()
    };
    let h = spawn_harness(config);
    let first = Arc::new(MockTorrent::new("one.mkv", 1));
    let second = Arc::new(MockTorrent::new("two.mkv", 2));

    let _w1 = h.add_torrent_task(&first);
    h.wait_for_stats(|s| s.torrents == 1).await;
    let _w2 = h.add_torrent_task(&second);
    h.wait_for_stats(|s| s.torrents == 2).await;

    h.tracker
        .set_peers((10..20).map(remote_peer).collect());
    h.send(SchedulerEvent::AnnounceTick).await;
    h.send(SchedulerEvent::AnnounceTick).await;

    let stats = h
        .wait_for_stats(|s| s.active_conns + s.pending_conns >= 3)
        .await;
    assert!(stats.active_conns <= 3, "global cap violated: {stats:?}");
    for torrent in [&first, &second] {
        let dispatcher = h.dispatchers.dispatcher(torrent.info_hash()).unwrap();
        assert!(dispatcher.conns().len() <= 2, "per-torrent cap violated");
    }

    h.handle.stop().await;
}
