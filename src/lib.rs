//! Ebbtide - peer-to-peer content distribution agent core

#![deny(missing_docs)]
#![deny(clippy::missing_errors_doc)]
#![deny(clippy::missing_panics_doc)]
#![warn(clippy::too_many_lines)]
//!
//! This crate provides the coordination core of a peer-to-peer content
//! distribution agent: a single-writer scheduler that drives torrent
//! downloads and uploads across many concurrent peer connections, with
//! announce scheduling, connection preemption, and a peer blacklist.
//! Storage, wire transport, tracker protocol, and piece dispatch plug in
//! through trait seams.

pub mod clock;
pub mod config;
pub mod network_events;
pub mod scheduler;
pub mod stats;
pub mod torrent;
pub mod tracing_setup;

// Re-export main types for convenient access
pub use clock::{Clock, SystemClock};
pub use config::SchedulerConfig;
pub use network_events::{NetworkEvent, NetworkEventProducer};
pub use scheduler::{
    BlacklistedConn, PeerContext, SchedulerComponents, SchedulerError, SchedulerHandle,
    SchedulerStats, spawn_scheduler,
};
pub use stats::StatsSink;
pub use torrent::{Bitfield, Conn, InfoHash, PeerId, PendingConn, TorrentError};
pub use tracing_setup::init_tracing;

/// Core errors that can bubble up from any subsystem.
#[derive(Debug, thiserror::Error)]
pub enum EbbtideError {
    /// Torrent collaborator errors (archive, handshake, tracker, dispatch)
    #[error("Torrent error: {0}")]
    Torrent(#[from] TorrentError),

    /// Scheduler lifecycle errors (cancellation, shutdown, admission)
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// Configuration parsing or validation errors
    #[error("Configuration error: {reason}")]
    Configuration {
        /// Human-readable description of the configuration error
        reason: String,
    },

    /// Standard I/O errors from filesystem operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type using EbbtideError as the error type
pub type Result<T> = std::result::Result<T, EbbtideError>;
