//! Single-writer torrent scheduler built on a serialized event loop.
//!
//! All mutation of scheduler state funnels through one stream of events
//! applied by a single run-loop task, while handshakes, announces, and
//! piece transfers run on detached tasks that feed results back as
//! further events. This gives lock-free state transitions with
//! well-defined ordering and many in-flight network operations.
//!
//! # Architecture
//!
//! - **Events**: closed set of state transitions; applying one is the
//!   only way scheduler state changes
//! - **Core**: the scheduler state owned by the run-loop task
//! - **Actor**: the run loop plus the timer tasks driving periodic events
//! - **Handle**: clonable public API; each call is one event send plus,
//!   where a reply is needed, a one-shot await
//!
//! # Usage
//!
//! ```ignore
//! use std::net::{IpAddr, Ipv4Addr};
//! use std::sync::Arc;
//!
//! use ebbtide::clock::SystemClock;
//! use ebbtide::config::SchedulerConfig;
//! use ebbtide::network_events::LogNetworkEvents;
//! use ebbtide::scheduler::{PeerContext, SchedulerComponents, spawn_scheduler};
//! use ebbtide::stats::TracingStats;
//! use ebbtide::torrent::PeerId;
//!
//! let config = SchedulerConfig::from_env();
//! let pctx = PeerContext::new(
//!     PeerId::generate(config.client_id),
//!     IpAddr::V4(Ipv4Addr::LOCALHOST),
//!     6881,
//! );
//! let handle = spawn_scheduler(
//!     config,
//!     pctx,
//!     SchedulerComponents {
//!         handshaker,           // your wire transport
//!         archive,              // your torrent storage
//!         tracker,              // your tracker client
//!         dispatcher_factory,   // your piece dispatcher
//!         clock: Arc::new(SystemClock),
//!         stats: Arc::new(TracingStats),
//!         network_events: Arc::new(LogNetworkEvents),
//!     },
//! );
//!
//! handle.add_torrent(torrent).await?;  // resolves when the torrent completes
//! handle.stop().await;
//! ```

mod actor;
mod announce_queue;
mod blacklist;
mod conn_state;
mod core;
mod event_loop;
mod events;
mod handle;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_mocks;

#[cfg(test)]
mod integration_tests;

use std::net::IpAddr;

pub use actor::spawn_scheduler;
pub use blacklist::BlacklistedConn;
pub use conn_state::ConnStateError;
pub use event_loop::EventSender;
pub use events::{SchedulerEvent, SchedulerStats};
pub use handle::SchedulerHandle;
pub use self::core::SchedulerComponents;

use crate::torrent::{PeerId, TorrentError};

/// This peer's stable identity as advertised to trackers and peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerContext {
    /// This peer's ID.
    pub peer_id: PeerId,
    /// Address this peer accepts connections on.
    pub ip: IpAddr,
    /// Port this peer accepts connections on.
    pub port: u16,
}

impl PeerContext {
    /// Creates a peer context.
    pub fn new(peer_id: PeerId, ip: IpAddr, port: u16) -> Self {
        Self { peer_id, ip, port }
    }
}

/// Scheduler-level failures.
///
/// The first two variants are the only outcomes a torrent subscriber can
/// observe; the rest wrap collaborator failures inside apply bodies.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// The torrent was cancelled before completing.
    #[error("Torrent cancelled")]
    TorrentCancelled,

    /// The scheduler stopped before the operation resolved.
    #[error("Scheduler stopped")]
    Stopped,

    /// Connection admission failed.
    #[error(transparent)]
    ConnState(#[from] ConnStateError),

    /// A torrent collaborator failed.
    #[error(transparent)]
    Torrent(#[from] TorrentError),
}
