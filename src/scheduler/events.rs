//! The closed set of events that move the scheduler between states.
//!
//! While an event is being applied it is guaranteed to be the only
//! accessor of scheduler state: the run loop applies events one at a time
//! and apply bodies are plain functions that never suspend.

use std::sync::Arc;

use tokio::sync::oneshot;

use crate::torrent::{Bitfield, Conn, InfoHash, PeerId, PeerInfo, PendingConn, Torrent, TorrentInfo};

use super::SchedulerError;
use super::blacklist::BlacklistedConn;
use super::core::Scheduler;

/// Events applied by the scheduler's run loop.
///
/// External triggers (listener, tracker, timers, public API) and the
/// completion halves of spawned I/O tasks all enter the scheduler as one
/// of these.
pub enum SchedulerEvent {
    /// A handshake arrived on a new inbound connection.
    IncomingHandshake {
        /// The half-handshaked link.
        pc: PendingConn,
    },
    /// A pending inbound connection finished handshaking.
    IncomingConn {
        /// The established link.
        conn: Conn,
        /// Remote's piece bitfield.
        bitfield: Bitfield,
        /// Torrent handle fetched from the archive during the handshake.
        torrent: Arc<dyn Torrent>,
    },
    /// A pending outbound connection finished handshaking.
    OutgoingConn {
        /// The established link.
        conn: Conn,
        /// Remote's piece bitfield.
        bitfield: Bitfield,
        /// Metadata of the torrent being exchanged.
        info: TorrentInfo,
    },
    /// A pending connection failed to handshake.
    FailedHandshake {
        /// Remote peer.
        peer_id: PeerId,
        /// Torrent the handshake was for.
        info_hash: InfoHash,
    },
    /// An active connection closed, for any reason including cleanly.
    ClosedConn {
        /// The closed link.
        conn: Conn,
    },
    /// Time to announce the next torrent in the rotation.
    AnnounceTick,
    /// A tracker announce returned candidate peers.
    AnnounceResponse {
        /// Torrent that was announced.
        info_hash: InfoHash,
        /// Candidates in tracker order.
        peers: Vec<PeerInfo>,
    },
    /// A tracker announce failed; retry on the next tick.
    AnnounceFailure {
        /// Torrent that was announced.
        info_hash: InfoHash,
    },
    /// A torrent was requested for download or seeding.
    NewTorrent {
        /// The torrent to schedule.
        torrent: Arc<dyn Torrent>,
        /// Resolved with the torrent's final outcome.
        responder: oneshot::Sender<Result<(), SchedulerError>>,
    },
    /// A dispatcher finished downloading its torrent.
    CompletedDispatcher {
        /// The completed torrent.
        info_hash: InfoHash,
    },
    /// Time to sweep idle/expired conns and retire idle seeders.
    PreemptionTick,
    /// Time to sweep expired blacklist entries.
    CleanupBlacklistTick,
    /// Time to push stats gauges.
    EmitStatsTick,
    /// A client cancelled a torrent by name.
    CancelTorrent {
        /// Name to cancel; first matching torrent wins.
        name: String,
    },
    /// A client asked for a blacklist snapshot.
    BlacklistSnapshot {
        /// Receives the ordered point-in-time view.
        responder: oneshot::Sender<Vec<BlacklistedConn>>,
    },
    /// A client asked for the current scheduler counters.
    StatsSnapshot {
        /// Receives the counters.
        responder: oneshot::Sender<SchedulerStats>,
    },
}

/// Point-in-time scheduler counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SchedulerStats {
    /// Resident torrent controls.
    pub torrents: usize,
    /// Established connections.
    pub active_conns: usize,
    /// Connections still handshaking.
    pub pending_conns: usize,
}

/// Applies one event to the scheduler.
pub(crate) fn apply(scheduler: &mut Scheduler, event: SchedulerEvent) {
    match event {
        SchedulerEvent::IncomingHandshake { pc } => scheduler.handle_incoming_handshake(pc),
        SchedulerEvent::IncomingConn {
            conn,
            bitfield,
            torrent,
        } => scheduler.handle_incoming_conn(conn, bitfield, torrent),
        SchedulerEvent::OutgoingConn {
            conn,
            bitfield,
            info,
        } => scheduler.handle_outgoing_conn(conn, bitfield, info),
        SchedulerEvent::FailedHandshake { peer_id, info_hash } => {
            scheduler.handle_failed_handshake(peer_id, info_hash);
        }
        SchedulerEvent::ClosedConn { conn } => scheduler.handle_closed_conn(conn),
        SchedulerEvent::AnnounceTick => scheduler.handle_announce_tick(),
        SchedulerEvent::AnnounceResponse { info_hash, peers } => {
            scheduler.handle_announce_response(info_hash, peers);
        }
        SchedulerEvent::AnnounceFailure { info_hash } => {
            scheduler.handle_announce_failure(info_hash);
        }
        SchedulerEvent::NewTorrent { torrent, responder } => {
            scheduler.handle_new_torrent(torrent, responder);
        }
        SchedulerEvent::CompletedDispatcher { info_hash } => {
            scheduler.handle_completed_dispatcher(info_hash);
        }
        SchedulerEvent::PreemptionTick => scheduler.handle_preemption_tick(),
        SchedulerEvent::CleanupBlacklistTick => scheduler.handle_cleanup_blacklist_tick(),
        SchedulerEvent::EmitStatsTick => scheduler.handle_emit_stats_tick(),
        SchedulerEvent::CancelTorrent { name } => scheduler.handle_cancel_torrent(&name),
        SchedulerEvent::BlacklistSnapshot { responder } => {
            scheduler.handle_blacklist_snapshot(responder);
        }
        SchedulerEvent::StatsSnapshot { responder } => {
            scheduler.handle_stats_snapshot(responder);
        }
    }
}
