//! Established and half-handshaked peer links.

use std::fmt;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use super::{Bitfield, InfoHash, PeerId};

/// An established peer link for one torrent.
///
/// Created by the `Handshaker` once the wire handshake completes. The
/// scheduler closes conns on preemption; the dispatcher closes them on
/// protocol errors; the transport closes them when the remote hangs up.
/// All three paths funnel through [`Conn::close`], and whoever watches
/// [`Conn::closed`] reports the closure back into the scheduler.
#[derive(Clone)]
pub struct Conn {
    peer_id: PeerId,
    info_hash: InfoHash,
    created_at: Instant,
    shutdown: CancellationToken,
}

impl Conn {
    /// Creates a conn for the given peer and torrent.
    ///
    /// `created_at` should come from the scheduler's clock so preemption
    /// age checks stay consistent under a simulated clock.
    pub fn new(peer_id: PeerId, info_hash: InfoHash, created_at: Instant) -> Self {
        Self {
            peer_id,
            info_hash,
            created_at,
            shutdown: CancellationToken::new(),
        }
    }

    /// The remote peer's ID.
    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// The torrent this conn transfers pieces for.
    pub fn info_hash(&self) -> InfoHash {
        self.info_hash
    }

    /// When the conn was established.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Closes the conn. Idempotent.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    /// Returns true once the conn has been closed.
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Resolves once the conn is closed, from any of the close paths.
    pub async fn closed(&self) {
        self.shutdown.cancelled().await;
    }
}

impl fmt::Debug for Conn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conn")
            .field("peer_id", &self.peer_id.to_string())
            .field("info_hash", &self.info_hash.to_string())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl fmt::Display for Conn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.peer_id, self.info_hash)
    }
}

/// A half-handshaked inbound peer link.
///
/// Produced by the listener when a remote handshake arrives; carries the
/// remote's claimed identity and bitfield. The scheduler either admits it
/// (and asks the `Handshaker` to complete the exchange) or closes it.
#[derive(Debug, Clone)]
pub struct PendingConn {
    peer_id: PeerId,
    info_hash: InfoHash,
    name: String,
    bitfield: Bitfield,
    shutdown: CancellationToken,
}

impl PendingConn {
    /// Creates a pending conn from a received handshake.
    pub fn new(peer_id: PeerId, info_hash: InfoHash, name: String, bitfield: Bitfield) -> Self {
        Self {
            peer_id,
            info_hash,
            name,
            bitfield,
            shutdown: CancellationToken::new(),
        }
    }

    /// The remote peer's claimed ID.
    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// The torrent the remote wants to exchange.
    pub fn info_hash(&self) -> InfoHash {
        self.info_hash
    }

    /// The torrent name the remote announced, used for archive lookup.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The remote's piece bitfield.
    pub fn bitfield(&self) -> Bitfield {
        self.bitfield.clone()
    }

    /// Rejects the pending conn. Idempotent.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    /// Returns true once the pending conn has been rejected.
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
