//! Peer handshake seam.

use std::net::SocketAddr;

use async_trait::async_trait;

use super::{Bitfield, Conn, PeerId, PendingConn, TorrentError};

/// Completes inbound and performs outbound peer handshakes.
///
/// Wire format and per-operation timeouts live behind this seam; the
/// scheduler only sees success (a [`Conn`]) or failure.
#[async_trait]
pub trait Handshaker: Send + Sync {
    /// Completes an inbound half-handshake.
    ///
    /// # Errors
    /// - `TorrentError::HandshakeFailed` - The exchange failed or timed out
    async fn establish(
        &self,
        pc: &PendingConn,
        info: &crate::torrent::TorrentInfo,
    ) -> Result<Conn, TorrentError>;

    /// Performs an outbound handshake to `addr`.
    ///
    /// Returns the established conn and the remote's bitfield.
    ///
    /// # Errors
    /// - `TorrentError::HandshakeFailed` - Connect or exchange failed
    async fn initialize(
        &self,
        peer: PeerId,
        addr: SocketAddr,
        info: &crate::torrent::TorrentInfo,
    ) -> Result<(Conn, Bitfield), TorrentError>;
}
