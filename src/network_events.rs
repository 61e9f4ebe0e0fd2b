//! Structured network lifecycle events.

use serde::Serialize;

use crate::torrent::{InfoHash, PeerId};

/// Torrent lifecycle event emitted by the scheduler.
///
/// Hashes and peer ids are hex-encoded so events serialize cleanly for
/// whatever transport the producer ships them over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NetworkEvent {
    /// A torrent finished downloading on this peer.
    TorrentComplete {
        /// Hex-encoded info hash.
        info_hash: String,
        /// Hex-encoded ID of this peer.
        peer_id: String,
    },
    /// A torrent was cancelled on this peer.
    TorrentCancelled {
        /// Hex-encoded info hash.
        info_hash: String,
        /// Hex-encoded ID of this peer.
        peer_id: String,
    },
}

impl NetworkEvent {
    /// Builds a torrent-complete event.
    pub fn torrent_complete(info_hash: InfoHash, peer_id: PeerId) -> Self {
        Self::TorrentComplete {
            info_hash: info_hash.to_string(),
            peer_id: peer_id.to_string(),
        }
    }

    /// Builds a torrent-cancelled event.
    pub fn torrent_cancelled(info_hash: InfoHash, peer_id: PeerId) -> Self {
        Self::TorrentCancelled {
            info_hash: info_hash.to_string(),
            peer_id: peer_id.to_string(),
        }
    }
}

/// Consumes scheduler network events.
pub trait NetworkEventProducer: Send + Sync {
    /// Ships one event.
    fn produce(&self, event: NetworkEvent);
}

/// Producer that logs events at info level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNetworkEvents;

impl NetworkEventProducer for LogNetworkEvents {
    fn produce(&self, event: NetworkEvent) {
        tracing::info!("network event: {event:?}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_carry_hex_identities() {
        let event = NetworkEvent::torrent_complete(InfoHash::new([0xab; 20]), PeerId::new([1; 20]));
        match event {
            NetworkEvent::TorrentComplete { info_hash, peer_id } => {
                assert_eq!(info_hash, "ab".repeat(20));
                assert_eq!(peer_id, "01".repeat(20));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
