//! Per-torrent piece-transfer dispatcher seam.

use std::sync::Arc;
use std::time::Instant;

use crate::scheduler::EventSender;

use super::{Bitfield, Conn, PeerId, Torrent, TorrentError};

/// Per-torrent component deciding which pieces to request and send.
///
/// The scheduler registers conns with the dispatcher and reads its
/// progress timestamps for preemption; everything else about piece
/// selection is the dispatcher's business. A dispatcher reports torrent
/// completion (and conn closures it initiates) back through the event
/// sender it was built with.
pub trait Dispatcher: Send + Sync {
    /// Registers an established conn and the remote's bitfield.
    ///
    /// # Errors
    /// - `TorrentError::DispatcherRejectedConn` - The dispatcher cannot take
    ///   the conn (e.g. it is tearing down)
    fn add_conn(&self, conn: Conn, remote_bitfield: Bitfield) -> Result<(), TorrentError>;

    /// Tears the dispatcher down, asynchronously releasing its conns.
    fn tear_down(&self);

    /// True when no conns are registered.
    fn empty(&self) -> bool;

    /// When the dispatcher was created.
    fn created_at(&self) -> Instant;

    /// Last time a verified piece arrived from `peer`, if ever.
    fn last_good_piece_received(&self, peer: PeerId) -> Option<Instant>;

    /// Last time a piece was sent to `peer`, if ever.
    fn last_piece_sent(&self, peer: PeerId) -> Option<Instant>;

    /// Last time any conn was removed, if ever.
    fn last_conn_removed(&self) -> Option<Instant>;
}

/// Builds a dispatcher for a torrent, wired to the scheduler's event loop.
pub trait DispatcherFactory: Send + Sync {
    /// Creates the dispatcher for `torrent`.
    ///
    /// `events` is the channel the dispatcher uses to report completion
    /// back into the scheduler.
    fn build(&self, torrent: Arc<dyn Torrent>, events: EventSender) -> Arc<dyn Dispatcher>;
}
