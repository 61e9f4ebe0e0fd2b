//! Torrent metadata and archive lookup seams.

use std::sync::Arc;

use async_trait::async_trait;

use super::{InfoHash, TorrentError};

/// Metadata snapshot for a torrent.
///
/// Everything the scheduler and handshaker need to identify a torrent on
/// the wire; piece-level layout stays behind the [`Torrent`] seam.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentInfo {
    /// Torrent info hash.
    pub info_hash: InfoHash,
    /// Torrent name, the archive lookup key.
    pub name: String,
    /// Size of each piece in bytes.
    pub piece_length: u32,
    /// Total content size in bytes.
    pub total_length: u64,
}

/// A torrent open in local storage.
///
/// The scheduler reads identity and completion; piece-level reads and
/// writes belong to the dispatcher and are opaque here.
pub trait Torrent: Send + Sync {
    /// Stable identifier of this torrent's content.
    fn info_hash(&self) -> InfoHash;

    /// Torrent name.
    fn name(&self) -> String;

    /// Metadata snapshot.
    fn stat(&self) -> TorrentInfo;

    /// True when every piece is present locally.
    fn complete(&self) -> bool;
}

/// Lookup of torrents in the local archive by name.
#[async_trait]
pub trait TorrentArchive: Send + Sync {
    /// Looks up torrent metadata by name.
    ///
    /// # Errors
    /// - `TorrentError::TorrentNotInArchive` - Name unknown to the archive
    async fn stat(&self, name: &str) -> Result<TorrentInfo, TorrentError>;

    /// Opens the torrent by name, creating local storage for it if needed.
    ///
    /// Incoming connections reach the scheduler before the torrent was ever
    /// added locally; the handle returned here backs the torrent control
    /// created for them.
    ///
    /// # Errors
    /// - `TorrentError::TorrentNotInArchive` - Name unknown to the archive
    /// - `TorrentError::Io` - Local storage could not be opened
    async fn fetch(&self, name: &str) -> Result<Arc<dyn Torrent>, TorrentError>;
}
