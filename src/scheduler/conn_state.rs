//! The book of pending and active connections.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::config::SchedulerConfig;
use crate::torrent::{Conn, InfoHash, PeerId};

use super::blacklist::{Blacklist, BlacklistedConn};

/// Admission failures for pending/active connection transitions.
///
/// `TorrentAtCapacity` must stay distinguishable: the announce-response
/// handler breaks out of its candidate loop on it instead of skipping one
/// peer.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConnStateError {
    /// The pair is excluded for the remaining cooldown.
    #[error("Conn is blacklisted for {remaining:?}")]
    Blacklisted {
        /// Cooldown left on the entry.
        remaining: Duration,
    },

    /// The pair already has a pending conn.
    #[error("Conn is already pending")]
    AlreadyPending,

    /// The pair already has an active conn.
    #[error("Conn is already active")]
    AlreadyActive,

    /// The torrent has no room for another conn.
    #[error("Torrent is at capacity")]
    TorrentAtCapacity,

    /// No room for another conn on this peer at all.
    #[error("Global conn limit reached")]
    GlobalCapacityReached,

    /// Activation for a pair that was never admitted as pending.
    #[error("Conn was not pending")]
    NotPending,

    /// Blacklisting a pair whose previous entry has not expired.
    #[error("Conn is already blacklisted")]
    AlreadyBlacklisted,
}

/// Tracks which (peer, torrent) pairs are handshaking or transferring,
/// enforcing per-torrent and global capacity. Owns the blacklist.
///
/// Capacity admission counts pending and active conns together, so a
/// successful pending reservation guarantees the later activation cannot
/// overshoot either cap.
pub(crate) struct ConnState {
    clock: Arc<dyn Clock>,
    max_global_egress: usize,
    max_conns_per_torrent: usize,
    pending: HashSet<(PeerId, InfoHash)>,
    active: HashMap<(PeerId, InfoHash), Conn>,
    blacklist: Blacklist,
}

impl ConnState {
    pub(crate) fn new(config: &SchedulerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            max_global_egress: config.max_global_egress,
            max_conns_per_torrent: config.max_conns_per_torrent,
            pending: HashSet::new(),
            active: HashMap::new(),
            blacklist: Blacklist::new(config.blacklist_cooldown),
        }
    }

    /// Reserves a pending slot for (peer, hash).
    pub(crate) fn add_pending(
        &mut self,
        peer_id: PeerId,
        info_hash: InfoHash,
    ) -> Result<(), ConnStateError> {
        let now = self.clock.now();
        if let Some(remaining) = self.blacklist.remaining(peer_id, info_hash, now) {
            return Err(ConnStateError::Blacklisted { remaining });
        }
        let key = (peer_id, info_hash);
        if self.pending.contains(&key) {
            return Err(ConnStateError::AlreadyPending);
        }
        if self.active.contains_key(&key) {
            return Err(ConnStateError::AlreadyActive);
        }
        if self.torrent_conns(info_hash) >= self.max_conns_per_torrent {
            return Err(ConnStateError::TorrentAtCapacity);
        }
        if self.total_conns() >= self.max_global_egress {
            return Err(ConnStateError::GlobalCapacityReached);
        }
        self.pending.insert(key);
        Ok(())
    }

    /// Releases a pending slot. No-op if absent.
    pub(crate) fn delete_pending(&mut self, peer_id: PeerId, info_hash: InfoHash) {
        self.pending.remove(&(peer_id, info_hash));
    }

    /// Moves an established conn from pending to active.
    ///
    /// The pair must hold a pending reservation; anything else is a
    /// programmer error the caller logs and recovers from.
    pub(crate) fn add_active(&mut self, conn: &Conn) -> Result<(), ConnStateError> {
        let key = (conn.peer_id(), conn.info_hash());
        if self.active.contains_key(&key) {
            return Err(ConnStateError::AlreadyActive);
        }
        if !self.pending.remove(&key) {
            return Err(ConnStateError::NotPending);
        }
        self.active.insert(key, conn.clone());
        Ok(())
    }

    /// Removes a conn from the active set. No-op if absent.
    pub(crate) fn delete_active(&mut self, conn: &Conn) {
        self.active.remove(&(conn.peer_id(), conn.info_hash()));
    }

    /// Blacklists (peer, hash) for the configured cooldown.
    pub(crate) fn blacklist(
        &mut self,
        peer_id: PeerId,
        info_hash: InfoHash,
    ) -> Result<(), ConnStateError> {
        if !self.blacklist.add(peer_id, info_hash, self.clock.now()) {
            return Err(ConnStateError::AlreadyBlacklisted);
        }
        Ok(())
    }

    /// Sweeps expired blacklist entries.
    pub(crate) fn delete_stale_blacklist_entries(&mut self) {
        self.blacklist.delete_stale(self.clock.now());
    }

    /// Ordered point-in-time view of the live blacklist entries.
    pub(crate) fn blacklist_snapshot(&self) -> Vec<BlacklistedConn> {
        self.blacklist.snapshot(self.clock.now())
    }

    /// Snapshot of the active conns.
    pub(crate) fn active_conns(&self) -> Vec<Conn> {
        self.active.values().cloned().collect()
    }

    pub(crate) fn num_active_conns(&self) -> usize {
        self.active.len()
    }

    pub(crate) fn num_pending_conns(&self) -> usize {
        self.pending.len()
    }

    fn torrent_conns(&self, info_hash: InfoHash) -> usize {
        let pending = self.pending.iter().filter(|(_, h)| *h == info_hash).count();
        let active = self.active.keys().filter(|(_, h)| *h == info_hash).count();
        pending + active
    }

    fn total_conns(&self) -> usize {
        self.pending.len() + self.active.len()
    }
}
