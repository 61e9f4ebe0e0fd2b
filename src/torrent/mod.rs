//! Torrent domain types and the collaborator seams the scheduler drives.

pub mod conn;
pub mod dispatch;
pub mod handshake;
pub mod storage;
pub mod tracker;

use std::fmt;

use bytes::Bytes;

pub use conn::{Conn, PendingConn};
pub use dispatch::{Dispatcher, DispatcherFactory};
pub use handshake::Handshaker;
pub use storage::{Torrent, TorrentArchive, TorrentInfo};
pub use tracker::{AnnounceRequest, PeerInfo, TrackerClient};

/// SHA-1 hash identifying a unique torrent.
///
/// 20-byte hash of the torrent's info dictionary. Stable identifier of a
/// torrent's content across the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InfoHash([u8; 20]);

impl InfoHash {
    /// Creates an InfoHash from a 20-byte hash.
    pub fn new(hash: [u8; 20]) -> Self {
        Self(hash)
    }

    /// Parses an InfoHash from a 40-character hex string.
    ///
    /// # Errors
    /// - `TorrentError::InvalidInfoHash` - Not valid hex or not 20 bytes
    pub fn from_hex(s: &str) -> Result<Self, TorrentError> {
        let bytes = hex::decode(s).map_err(|e| TorrentError::InvalidInfoHash {
            reason: e.to_string(),
        })?;
        let hash: [u8; 20] = bytes
            .try_into()
            .map_err(|_| TorrentError::InvalidInfoHash {
                reason: format!("expected 20 bytes, got {}", s.len() / 2),
            })?;
        Ok(Self(hash))
    }

    /// Returns reference to the underlying 20-byte hash.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Stable identifier of a peer process.
///
/// 20-byte identifier exchanged in handshakes and tracker announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId([u8; 20]);

impl PeerId {
    /// Creates a peer ID from a 20-byte array.
    pub fn new(id: [u8; 20]) -> Self {
        Self(id)
    }

    /// Parses a peer ID from a 40-character hex string.
    ///
    /// Tracker announce responses carry peer ids as hex; a malformed id from
    /// a tracker is a per-candidate error, not a fatal one.
    ///
    /// # Errors
    /// - `TorrentError::InvalidPeerId` - Not valid hex or not 20 bytes
    pub fn from_hex(s: &str) -> Result<Self, TorrentError> {
        let bytes = hex::decode(s).map_err(|e| TorrentError::InvalidPeerId {
            reason: e.to_string(),
        })?;
        let id: [u8; 20] = bytes.try_into().map_err(|_| TorrentError::InvalidPeerId {
            reason: format!("expected 20 bytes, got {}", s.len() / 2),
        })?;
        Ok(Self(id))
    }

    /// Returns the peer ID as a byte array reference.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Generates a random peer ID with the given client identifier prefix.
    pub fn generate(client_id: &str) -> Self {
        let mut id = [0u8; 20];
        let prefix = client_id.as_bytes();
        let n = prefix.len().min(8);
        id[..n].copy_from_slice(&prefix[..n]);
        for byte in &mut id[n..] {
            *byte = rand::random();
        }
        Self(id)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Per-torrent bitmap of the pieces a peer holds.
///
/// Big-endian bit order within each byte, as on the wire. The scheduler
/// treats bitfields as opaque and hands them to the dispatcher.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bitfield(Bytes);

impl Bitfield {
    /// Creates a bitfield from raw wire bytes.
    pub fn new(bytes: Bytes) -> Self {
        Self(bytes)
    }

    /// Returns true if the piece at `index` is set.
    ///
    /// Out-of-range indices read as unset.
    pub fn has_piece(&self, index: u32) -> bool {
        let byte = (index / 8) as usize;
        let bit = 7 - (index % 8);
        self.0
            .get(byte)
            .is_some_and(|b| (b >> bit) & 1 == 1)
    }

    /// Returns the raw wire bytes.
    pub fn as_bytes(&self) -> &Bytes {
        &self.0
    }
}

/// Errors that can occur during torrent operations.
///
/// Covers the failure modes of the collaborators the scheduler drives:
/// metadata lookup, handshaking, tracker announces, and dispatcher
/// registration.
#[derive(Debug, thiserror::Error)]
pub enum TorrentError {
    /// A 40-character hex info hash failed to decode.
    #[error("Invalid info hash: {reason}")]
    InvalidInfoHash {
        /// What was wrong with the input.
        reason: String,
    },

    /// A peer id from a tracker response failed to decode.
    #[error("Invalid peer id: {reason}")]
    InvalidPeerId {
        /// What was wrong with the input.
        reason: String,
    },

    /// Archive lookup by name found nothing.
    #[error("Torrent {name} not in archive")]
    TorrentNotInArchive {
        /// Name that was looked up.
        name: String,
    },

    /// No resident torrent with this hash.
    #[error("Torrent {info_hash} not found")]
    TorrentNotFound {
        /// Hash that was looked up.
        info_hash: InfoHash,
    },

    /// A peer handshake failed or timed out.
    #[error("Handshake failed: {reason}")]
    HandshakeFailed {
        /// What went wrong on the wire.
        reason: String,
    },

    /// A tracker announce failed.
    #[error("Tracker announce failed: {reason}")]
    AnnounceFailed {
        /// What went wrong talking to the tracker.
        reason: String,
    },

    /// The dispatcher would not take a conn.
    #[error("Dispatcher rejected conn: {reason}")]
    DispatcherRejectedConn {
        /// Why the conn was refused.
        reason: String,
    },

    /// Filesystem failure in the storage layer.
    #[error("I/O error")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_info_hash_hex_round_trip() {
        let hash = InfoHash::new([0xab; 20]);
        let parsed = InfoHash::from_hex(&hash.to_string()).unwrap();
        assert_eq!(hash, parsed);
    }

    #[test]
    fn test_info_hash_display() {
        let hash = [
            0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef, 0x01, 0x23, 0x45, 0x67, 0x89, 0xab,
            0xcd, 0xef, 0x01, 0x23, 0x45, 0x67,
        ];
        assert_eq!(
            InfoHash::new(hash).to_string(),
            "0123456789abcdef0123456789abcdef01234567"
        );
    }

    #[test]
    fn test_peer_id_rejects_short_hex() {
        assert!(matches!(
            PeerId::from_hex("abcd"),
            Err(TorrentError::InvalidPeerId { .. })
        ));
    }

    #[test]
    fn test_peer_id_rejects_non_hex() {
        assert!(PeerId::from_hex("zz".repeat(20).as_str()).is_err());
    }

    #[test]
    fn test_peer_id_generate_keeps_client_prefix() {
        let id = PeerId::generate("-EB0001-");
        assert_eq!(&id.as_bytes()[..8], b"-EB0001-");
    }

    #[test]
    fn test_bitfield_bit_order() {
        // 0b1010_0000: pieces 0 and 2 set.
        let bf = Bitfield::new(Bytes::from_static(&[0xa0]));
        assert!(bf.has_piece(0));
        assert!(!bf.has_piece(1));
        assert!(bf.has_piece(2));
        assert!(!bf.has_piece(7));
    }

    #[test]
    fn test_bitfield_out_of_range_reads_unset() {
        let bf = Bitfield::new(Bytes::from_static(&[0xff]));
        assert!(bf.has_piece(7));
        assert!(!bf.has_piece(8));
    }
}
