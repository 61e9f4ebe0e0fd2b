//! Scheduler state and the apply bodies for every event.
//!
//! The [`Scheduler`] value is owned by the run loop task; nothing outside
//! an apply body can reach its fields. Handlers mutate state directly and
//! spawn detached tasks for any I/O they need; those tasks report back by
//! sending a completion event.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::oneshot;

use crate::clock::Clock;
use crate::config::SchedulerConfig;
use crate::network_events::{NetworkEvent, NetworkEventProducer};
use crate::stats::StatsSink;
use crate::torrent::{
    Bitfield, Conn, Dispatcher, DispatcherFactory, Handshaker, InfoHash, PeerId, PeerInfo,
    PendingConn, Torrent, TorrentArchive, TorrentError, TorrentInfo, TrackerClient,
    tracker::AnnounceRequest,
};

use super::announce_queue::AnnounceQueue;
use super::blacklist::BlacklistedConn;
use super::conn_state::{ConnState, ConnStateError};
use super::event_loop::EventSender;
use super::events::{SchedulerEvent, SchedulerStats};
use super::{PeerContext, SchedulerError};

/// External collaborators the scheduler drives.
///
/// Every seam is a trait object so embedders and tests swap in their own
/// implementations.
pub struct SchedulerComponents {
    /// Completes inbound and performs outbound handshakes.
    pub handshaker: Arc<dyn Handshaker>,
    /// Local torrent lookup.
    pub archive: Arc<dyn TorrentArchive>,
    /// Tracker announces.
    pub tracker: Arc<dyn TrackerClient>,
    /// Builds the per-torrent dispatcher.
    pub dispatcher_factory: Arc<dyn DispatcherFactory>,
    /// Time source for all policy decisions.
    pub clock: Arc<dyn Clock>,
    /// Gauge sink for the stats tick.
    pub stats: Arc<dyn StatsSink>,
    /// Sink for torrent lifecycle events.
    pub network_events: Arc<dyn NetworkEventProducer>,
}

/// Per-torrent control block.
struct TorrentControl {
    torrent: Arc<dyn Torrent>,
    dispatcher: Arc<dyn Dispatcher>,
    complete: bool,
    subscribers: Vec<oneshot::Sender<Result<(), SchedulerError>>>,
}

/// Single-writer coordinator of all torrent transfers on this peer.
///
/// Owns the connection book, the announce rotation, and the per-torrent
/// controls. Mutated exclusively through [`super::events::apply`].
pub(crate) struct Scheduler {
    pctx: PeerContext,
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
    handshaker: Arc<dyn Handshaker>,
    archive: Arc<dyn TorrentArchive>,
    tracker: Arc<dyn TrackerClient>,
    dispatcher_factory: Arc<dyn DispatcherFactory>,
    stats: Arc<dyn StatsSink>,
    network_events: Arc<dyn NetworkEventProducer>,
    conn_state: ConnState,
    announce_queue: AnnounceQueue,
    torrent_controls: HashMap<InfoHash, TorrentControl>,
    events: EventSender,
}

impl Scheduler {
    pub(crate) fn new(
        config: SchedulerConfig,
        pctx: PeerContext,
        components: SchedulerComponents,
        events: EventSender,
    ) -> Self {
        let conn_state = ConnState::new(&config, Arc::clone(&components.clock));
        Self {
            pctx,
            config,
            clock: components.clock,
            handshaker: components.handshaker,
            archive: components.archive,
            tracker: components.tracker,
            dispatcher_factory: components.dispatcher_factory,
            stats: components.stats,
            network_events: components.network_events,
            conn_state,
            announce_queue: AnnounceQueue::new(),
            torrent_controls: HashMap::new(),
            events,
        }
    }

    /// Admits an inbound half-handshake and finishes it off-loop.
    pub(crate) fn handle_incoming_handshake(&mut self, pc: PendingConn) {
        if let Err(e) = self.conn_state.add_pending(pc.peer_id(), pc.info_hash()) {
            tracing::info!(
                "Rejecting incoming handshake from {} for {}: {}",
                pc.peer_id(),
                pc.info_hash(),
                e
            );
            pc.close();
            return;
        }
        let archive = Arc::clone(&self.archive);
        let handshaker = Arc::clone(&self.handshaker);
        let events = self.events.clone();
        tokio::spawn(async move {
            let torrent = match archive.fetch(pc.name()).await {
                Ok(torrent) => torrent,
                Err(e) => {
                    tracing::warn!("Archive lookup for {} failed: {}", pc.name(), e);
                    pc.close();
                    events
                        .send(SchedulerEvent::FailedHandshake {
                            peer_id: pc.peer_id(),
                            info_hash: pc.info_hash(),
                        })
                        .await;
                    return;
                }
            };
            let info = torrent.stat();
            match handshaker.establish(&pc, &info).await {
                Ok(conn) => {
                    events
                        .send(SchedulerEvent::IncomingConn {
                            conn,
                            bitfield: pc.bitfield(),
                            torrent,
                        })
                        .await;
                }
                Err(e) => {
                    tracing::info!("Error establishing conn to {}: {}", pc.peer_id(), e);
                    pc.close();
                    events
                        .send(SchedulerEvent::FailedHandshake {
                            peer_id: pc.peer_id(),
                            info_hash: pc.info_hash(),
                        })
                        .await;
                }
            }
        });
    }

    /// Transitions a fully-handshaked incoming conn from pending to active.
    pub(crate) fn handle_incoming_conn(
        &mut self,
        conn: Conn,
        bitfield: Bitfield,
        torrent: Arc<dyn Torrent>,
    ) {
        tracing::debug!("Applying incoming conn event for {}", conn);

        match self.add_incoming_conn(&conn, bitfield, &torrent) {
            Ok(()) => tracing::info!("Added incoming conn {}", conn),
            Err(e) => {
                tracing::error!("Error adding incoming conn {}: {}", conn, e);
                conn.close();
            }
        }
    }

    /// Transitions a fully-handshaked outgoing conn from pending to active.
    pub(crate) fn handle_outgoing_conn(&mut self, conn: Conn, bitfield: Bitfield, info: TorrentInfo) {
        tracing::debug!("Applying outgoing conn event for {}", conn);

        match self.add_outgoing_conn(&conn, bitfield, &info) {
            Ok(()) => tracing::info!("Added outgoing conn {}", conn),
            Err(e) => {
                tracing::error!("Error adding outgoing conn {}: {}", conn, e);
                conn.close();
            }
        }
    }

    /// Releases the pending slot of a failed handshake and blacklists the pair.
    pub(crate) fn handle_failed_handshake(&mut self, peer_id: PeerId, info_hash: InfoHash) {
        tracing::debug!("Applying failed handshake event for {}@{}", peer_id, info_hash);

        self.conn_state.delete_pending(peer_id, info_hash);
        if let Err(e) = self.conn_state.blacklist(peer_id, info_hash) {
            tracing::info!("Error blacklisting pending conn {}@{}: {}", peer_id, info_hash, e);
        }
    }

    /// Ejects a closed conn from the active set and blacklists the pair.
    ///
    /// Clean closes blacklist too: the entry is a reconnect cooldown, not
    /// a verdict on the peer.
    pub(crate) fn handle_closed_conn(&mut self, conn: Conn) {
        tracing::debug!("Applying closed conn event for {}", conn);

        self.conn_state.delete_active(&conn);
        if let Err(e) = self.conn_state.blacklist(conn.peer_id(), conn.info_hash()) {
            tracing::info!("Error blacklisting active conn {}: {}", conn, e);
        }
    }

    /// Pulls the next torrent from the announce rotation and announces
    /// off-loop.
    pub(crate) fn handle_announce_tick(&mut self) {
        tracing::debug!("Applying announce tick event");

        let Some(info_hash) = self.announce_queue.next() else {
            tracing::debug!("No torrents in announce queue");
            return;
        };
        let Some(ctrl) = self.torrent_controls.get(&info_hash) else {
            tracing::error!("Announce queue entry {} has no torrent control", info_hash);
            self.announce_queue.eject(info_hash);
            return;
        };
        let request = AnnounceRequest {
            name: ctrl.torrent.name(),
            info_hash,
            peer_id: self.pctx.peer_id,
            ip: self.pctx.ip,
            port: self.pctx.port,
            complete: ctrl.complete,
        };
        let tracker = Arc::clone(&self.tracker);
        let events = self.events.clone();
        tokio::spawn(async move {
            match tracker.announce(request).await {
                Ok(peers) => {
                    events
                        .send(SchedulerEvent::AnnounceResponse { info_hash, peers })
                        .await;
                }
                Err(e) => {
                    tracing::warn!("Announce for {} failed: {}", info_hash, e);
                    events
                        .send(SchedulerEvent::AnnounceFailure { info_hash })
                        .await;
                }
            }
        });
    }

    /// Opens outbound conns to announce candidates while capacity lasts.
    ///
    /// Also returns the torrent to the announce rotation. Responses for
    /// torrents that are gone (cancelled or retired) are dropped.
    pub(crate) fn handle_announce_response(&mut self, info_hash: InfoHash, peers: Vec<PeerInfo>) {
        tracing::debug!(
            "Applying announce response event for {} with {} peers",
            info_hash,
            peers.len()
        );

        let Some(ctrl) = self.torrent_controls.get(&info_hash) else {
            tracing::info!("Torrent {} removed after announce response received", info_hash);
            return;
        };
        self.announce_queue.ready(info_hash);
        if ctrl.complete {
            // Seeding; open no new conns.
            return;
        }
        let info = ctrl.torrent.stat();
        for peer in peers {
            let peer_id = match PeerId::from_hex(&peer.peer_id) {
                Ok(peer_id) => peer_id,
                Err(e) => {
                    tracing::error!("Invalid peer id in announce for {}: {}", info_hash, e);
                    continue;
                }
            };
            if peer_id == self.pctx.peer_id {
                // Tracker may return ourselves.
                continue;
            }
            match self.conn_state.add_pending(peer_id, info_hash) {
                Ok(()) => {}
                Err(ConnStateError::TorrentAtCapacity) => {
                    tracing::info!(
                        "Cannot open any more conns, torrent {} is at capacity",
                        info_hash
                    );
                    break;
                }
                Err(e) => {
                    tracing::info!("Skipping peer {} from announce: {}", peer_id, e);
                    continue;
                }
            }
            let addr = SocketAddr::new(peer.ip, peer.port);
            let handshaker = Arc::clone(&self.handshaker);
            let events = self.events.clone();
            let info = info.clone();
            tokio::spawn(async move {
                match handshaker.initialize(peer_id, addr, &info).await {
                    Ok((conn, bitfield)) => {
                        events
                            .send(SchedulerEvent::OutgoingConn {
                                conn,
                                bitfield,
                                info,
                            })
                            .await;
                    }
                    Err(e) => {
                        tracing::info!("Failed handshake to {} at {}: {}", peer_id, addr, e);
                        events
                            .send(SchedulerEvent::FailedHandshake { peer_id, info_hash })
                            .await;
                    }
                }
            });
        }
    }

    /// Returns a torrent whose announce failed to the rotation.
    ///
    /// The next announce tick is the retry cooldown.
    pub(crate) fn handle_announce_failure(&mut self, info_hash: InfoHash) {
        tracing::debug!("Applying announce failure event for {}", info_hash);

        self.announce_queue.ready(info_hash);
    }

    /// Begins seeding or leeching a new torrent.
    pub(crate) fn handle_new_torrent(
        &mut self,
        torrent: Arc<dyn Torrent>,
        responder: oneshot::Sender<Result<(), SchedulerError>>,
    ) {
        let info_hash = torrent.info_hash();
        tracing::debug!("Applying new torrent event for {}", info_hash);

        if !self.torrent_controls.contains_key(&info_hash) {
            self.init_torrent_control(torrent);
            tracing::info!("Initialized new torrent {}", info_hash);
        }
        let Some(ctrl) = self.torrent_controls.get_mut(&info_hash) else {
            return;
        };
        if ctrl.complete {
            let _ = responder.send(Ok(()));
            return;
        }
        ctrl.subscribers.push(responder);
    }

    /// Retires a completed torrent from the announce rotation and resolves
    /// its subscribers.
    ///
    /// The control itself stays resident as a seeder until preemption
    /// decides it is idle.
    pub(crate) fn handle_completed_dispatcher(&mut self, info_hash: InfoHash) {
        tracing::debug!("Applying completed dispatcher event for {}", info_hash);

        self.announce_queue.done(info_hash);
        let Some(ctrl) = self.torrent_controls.get_mut(&info_hash) else {
            tracing::error!("Completed dispatcher for unknown torrent {}", info_hash);
            return;
        };
        for responder in ctrl.subscribers.drain(..) {
            let _ = responder.send(Ok(()));
        }
        ctrl.complete = true;

        tracing::info!("Torrent {} complete", info_hash);
        self.network_events
            .produce(NetworkEvent::torrent_complete(info_hash, self.pctx.peer_id));
    }

    /// Closes idle and expired conns, and retires idle seeder controls.
    ///
    /// Closing a conn only cancels it here; the watcher task reports the
    /// closure back as a closed-conn event, which is where the books are
    /// updated.
    pub(crate) fn handle_preemption_tick(&mut self) {
        tracing::debug!("Applying preemption tick event");

        let now = self.clock.now();
        for conn in self.conn_state.active_conns() {
            let Some(ctrl) = self.torrent_controls.get(&conn.info_hash()) else {
                tracing::error!(
                    "Invariant violation: active conn {} not assigned to a torrent control",
                    conn
                );
                conn.close();
                continue;
            };
            let last_progress = most_recent(
                conn.created_at(),
                &[
                    ctrl.dispatcher.last_good_piece_received(conn.peer_id()),
                    ctrl.dispatcher.last_piece_sent(conn.peer_id()),
                ],
            );
            if now.saturating_duration_since(last_progress) > self.config.idle_conn_ttl {
                tracing::info!("Closing idle conn {}", conn);
                conn.close();
                continue;
            }
            if now.saturating_duration_since(conn.created_at()) > self.config.conn_ttl {
                tracing::info!("Closing expired conn {}", conn);
                conn.close();
            }
        }

        let idle_seeder_ttl = self.config.idle_seeder_ttl;
        let retired: Vec<InfoHash> = self
            .torrent_controls
            .iter()
            .filter(|(_, ctrl)| ctrl.complete && ctrl.dispatcher.empty())
            .filter(|(_, ctrl)| {
                let became_idle = most_recent(
                    ctrl.dispatcher.created_at(),
                    &[ctrl.dispatcher.last_conn_removed()],
                );
                now.saturating_duration_since(became_idle) >= idle_seeder_ttl
            })
            .map(|(info_hash, _)| *info_hash)
            .collect();
        for info_hash in retired {
            tracing::info!("Removing idle torrent {}", info_hash);
            self.torrent_controls.remove(&info_hash);
            self.announce_queue.eject(info_hash);
        }
    }

    /// Sweeps expired blacklist entries.
    pub(crate) fn handle_cleanup_blacklist_tick(&mut self) {
        tracing::debug!("Applying cleanup blacklist event");

        self.conn_state.delete_stale_blacklist_entries();
    }

    /// Pushes the torrent and conn gauges.
    pub(crate) fn handle_emit_stats_tick(&mut self) {
        self.stats
            .gauge("torrents", self.torrent_controls.len() as f64);
        self.stats
            .gauge("conns", self.conn_state.num_active_conns() as f64);
    }

    /// Cancels the first torrent whose name matches.
    ///
    /// Names are not guaranteed unique; when two torrents collide the
    /// winner is map iteration order, and only one control is torn down.
    pub(crate) fn handle_cancel_torrent(&mut self, name: &str) {
        tracing::debug!("Applying cancel torrent event for {}", name);

        let found = self
            .torrent_controls
            .iter()
            .find_map(|(info_hash, ctrl)| (ctrl.torrent.name() == name).then_some(*info_hash));
        let Some(info_hash) = found else {
            return;
        };
        if let Some(ctrl) = self.torrent_controls.remove(&info_hash) {
            ctrl.dispatcher.tear_down();
            self.announce_queue.eject(info_hash);
            for responder in ctrl.subscribers {
                let _ = responder.send(Err(SchedulerError::TorrentCancelled));
            }

            tracing::info!("Torrent {} cancelled", info_hash);
            self.network_events
                .produce(NetworkEvent::torrent_cancelled(info_hash, self.pctx.peer_id));
        }
    }

    /// Replies with an ordered point-in-time blacklist view.
    pub(crate) fn handle_blacklist_snapshot(
        &mut self,
        responder: oneshot::Sender<Vec<BlacklistedConn>>,
    ) {
        let _ = responder.send(self.conn_state.blacklist_snapshot());
    }

    /// Replies with the current scheduler counters.
    pub(crate) fn handle_stats_snapshot(&mut self, responder: oneshot::Sender<SchedulerStats>) {
        let _ = responder.send(SchedulerStats {
            torrents: self.torrent_controls.len(),
            active_conns: self.conn_state.num_active_conns(),
            pending_conns: self.conn_state.num_pending_conns(),
        });
    }

    /// Releases everything on shutdown: conns closed, dispatchers torn
    /// down, outstanding subscribers resolved with a stop error.
    pub(crate) fn shut_down(mut self) {
        tracing::debug!("Scheduler shutting down");

        for conn in self.conn_state.active_conns() {
            conn.close();
        }
        for (_, ctrl) in self.torrent_controls.drain() {
            ctrl.dispatcher.tear_down();
            for responder in ctrl.subscribers {
                let _ = responder.send(Err(SchedulerError::Stopped));
            }
        }
    }

    fn add_incoming_conn(
        &mut self,
        conn: &Conn,
        bitfield: Bitfield,
        torrent: &Arc<dyn Torrent>,
    ) -> Result<(), SchedulerError> {
        let info_hash = torrent.info_hash();
        if !self.torrent_controls.contains_key(&info_hash) {
            self.init_torrent_control(Arc::clone(torrent));
        }
        self.register_conn(conn, bitfield, info_hash)
    }

    fn add_outgoing_conn(
        &mut self,
        conn: &Conn,
        bitfield: Bitfield,
        info: &TorrentInfo,
    ) -> Result<(), SchedulerError> {
        // Outgoing conns only exist for torrents the scheduler already
        // announces, so the control must be present.
        if !self.torrent_controls.contains_key(&info.info_hash) {
            return Err(TorrentError::TorrentNotFound {
                info_hash: info.info_hash,
            }
            .into());
        }
        self.register_conn(conn, bitfield, info.info_hash)
    }

    fn register_conn(
        &mut self,
        conn: &Conn,
        bitfield: Bitfield,
        info_hash: InfoHash,
    ) -> Result<(), SchedulerError> {
        self.conn_state.add_active(conn)?;
        let Some(ctrl) = self.torrent_controls.get(&info_hash) else {
            self.conn_state.delete_active(conn);
            return Err(TorrentError::TorrentNotFound { info_hash }.into());
        };
        if let Err(e) = ctrl.dispatcher.add_conn(conn.clone(), bitfield) {
            self.conn_state.delete_active(conn);
            return Err(e.into());
        }
        self.spawn_conn_watcher(conn.clone());
        Ok(())
    }

    /// Watches for the conn's closure, from whichever side initiates it,
    /// and reports it back into the loop.
    fn spawn_conn_watcher(&self, conn: Conn) {
        let events = self.events.clone();
        tokio::spawn(async move {
            conn.closed().await;
            events.send(SchedulerEvent::ClosedConn { conn }).await;
        });
    }

    fn init_torrent_control(&mut self, torrent: Arc<dyn Torrent>) {
        let info_hash = torrent.info_hash();
        let dispatcher = self
            .dispatcher_factory
            .build(Arc::clone(&torrent), self.events.clone());
        self.announce_queue.add(info_hash);
        let complete = torrent.complete();
        self.torrent_controls.insert(
            info_hash,
            TorrentControl {
                torrent,
                dispatcher,
                complete,
                subscribers: Vec::new(),
            },
        );
    }
}

/// Latest of a base instant and any recorded timestamps.
fn most_recent(base: Instant, candidates: &[Option<Instant>]) -> Instant {
    candidates
        .iter()
        .flatten()
        .fold(base, |acc, t| acc.max(*t))
}
