//! Time-bounded exclusion set for (peer, torrent) pairs.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::torrent::{InfoHash, PeerId};

/// One blacklist entry as returned by a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlacklistedConn {
    /// Excluded peer.
    pub peer_id: PeerId,
    /// Torrent the exclusion applies to.
    pub info_hash: InfoHash,
    /// Cooldown left at snapshot time.
    pub remaining: Duration,
}

/// Exclusion set for (peer, torrent) pairs recently associated with a
/// failure or closure.
///
/// Entries expire after a fixed cooldown; this is a reconnect throttle,
/// not a reputation score. Expired entries linger until the cleanup tick
/// sweeps them but are never reported as live.
pub(crate) struct Blacklist {
    cooldown: Duration,
    entries: HashMap<(PeerId, InfoHash), Instant>,
}

impl Blacklist {
    pub(crate) fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            entries: HashMap::new(),
        }
    }

    /// Inserts (peer, hash) with expiry `now + cooldown`.
    ///
    /// Returns false if an unexpired entry already exists; an expired entry
    /// is overwritten.
    pub(crate) fn add(&mut self, peer_id: PeerId, info_hash: InfoHash, now: Instant) -> bool {
        let key = (peer_id, info_hash);
        if let Some(expiry) = self.entries.get(&key) {
            if now < *expiry {
                return false;
            }
        }
        self.entries.insert(key, now + self.cooldown);
        true
    }

    /// Cooldown left for (peer, hash), if an unexpired entry exists.
    pub(crate) fn remaining(
        &self,
        peer_id: PeerId,
        info_hash: InfoHash,
        now: Instant,
    ) -> Option<Duration> {
        let expiry = self.entries.get(&(peer_id, info_hash))?;
        if now < *expiry {
            Some(*expiry - now)
        } else {
            None
        }
    }

    /// Drops every expired entry.
    pub(crate) fn delete_stale(&mut self, now: Instant) {
        self.entries.retain(|_, expiry| now < *expiry);
    }

    /// Ordered copy of the unexpired entries.
    pub(crate) fn snapshot(&self, now: Instant) -> Vec<BlacklistedConn> {
        let mut entries: Vec<BlacklistedConn> = self
            .entries
            .iter()
            .filter(|(_, expiry)| now < **expiry)
            .map(|((peer_id, info_hash), expiry)| BlacklistedConn {
                peer_id: *peer_id,
                info_hash: *info_hash,
                remaining: *expiry - now,
            })
            .collect();
        entries.sort_by_key(|e| (e.peer_id, e.info_hash));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COOLDOWN: Duration = Duration::from_secs(30);

    fn pair(n: u8) -> (PeerId, InfoHash) {
        (PeerId::new([n; 20]), InfoHash::new([n; 20]))
    }

    #[test]
    fn test_add_sets_full_cooldown() {
        let mut bl = Blacklist::new(COOLDOWN);
        let now = Instant::now();
        let (peer, hash) = pair(1);

        assert!(bl.add(peer, hash, now));
        assert_eq!(bl.remaining(peer, hash, now), Some(COOLDOWN));
    }

    #[test]
    fn test_add_rejects_unexpired_entry() {
        let mut bl = Blacklist::new(COOLDOWN);
        let now = Instant::now();
        let (peer, hash) = pair(1);

        assert!(bl.add(peer, hash, now));
        assert!(!bl.add(peer, hash, now + Duration::from_secs(10)));
        // Past expiry the pair can be blacklisted again.
        assert!(bl.add(peer, hash, now + COOLDOWN));
    }

    #[test]
    fn test_entries_expire() {
        let mut bl = Blacklist::new(COOLDOWN);
        let now = Instant::now();
        let (peer, hash) = pair(1);

        bl.add(peer, hash, now);
        assert!(bl.remaining(peer, hash, now + COOLDOWN).is_none());
    }

    #[test]
    fn test_delete_stale_keeps_live_entries() {
        let mut bl = Blacklist::new(COOLDOWN);
        let now = Instant::now();
        let (p1, h1) = pair(1);
        let (p2, h2) = pair(2);

        bl.add(p1, h1, now);
        bl.add(p2, h2, now + Duration::from_secs(20));
        bl.delete_stale(now + COOLDOWN);

        assert!(bl.remaining(p1, h1, now + COOLDOWN).is_none());
        assert!(bl.remaining(p2, h2, now + COOLDOWN).is_some());
    }

    #[test]
    fn test_snapshot_is_ordered_and_live_only() {
        let mut bl = Blacklist::new(COOLDOWN);
        let now = Instant::now();
        let (p1, h1) = pair(1);
        let (p2, h2) = pair(2);
        let (p3, h3) = pair(3);

        bl.add(p3, h3, now);
        bl.add(p1, h1, now);
        bl.add(p2, h2, now - COOLDOWN);

        let snapshot = bl.snapshot(now);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].peer_id, p1);
        assert_eq!(snapshot[1].peer_id, p3);
        assert!(snapshot.iter().all(|e| e.remaining > Duration::ZERO));
    }
}
