//! Tracker announce seam.

use std::net::IpAddr;

use async_trait::async_trait;

use super::{InfoHash, PeerId, TorrentError};

/// Tracker announce request.
///
/// Identity and progress this peer reports when asking the tracker for
/// candidate peers.
#[derive(Debug, Clone)]
pub struct AnnounceRequest {
    /// Torrent name.
    pub name: String,
    /// Torrent info hash.
    pub info_hash: InfoHash,
    /// This peer's ID.
    pub peer_id: PeerId,
    /// Address this peer accepts connections on.
    pub ip: IpAddr,
    /// Port this peer accepts connections on.
    pub port: u16,
    /// Whether this peer already holds the complete torrent.
    pub complete: bool,
}

/// Candidate peer returned by a tracker announce.
///
/// The peer id arrives as untrusted hex; decoding it is the caller's
/// problem and a decode failure skips only that candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    /// Hex-encoded peer ID as the tracker reported it.
    pub peer_id: String,
    /// Candidate address.
    pub ip: IpAddr,
    /// Candidate port.
    pub port: u16,
}

/// Announces to the tracker and returns candidate peers.
///
/// Protocol details (HTTP/UDP, retries, per-request timeouts) live behind
/// this seam.
#[async_trait]
pub trait TrackerClient: Send + Sync {
    /// Announces this peer and returns the tracker's candidate peers.
    ///
    /// # Errors
    /// - `TorrentError::AnnounceFailed` - Network or protocol failure
    async fn announce(&self, request: AnnounceRequest) -> Result<Vec<PeerInfo>, TorrentError>;
}
