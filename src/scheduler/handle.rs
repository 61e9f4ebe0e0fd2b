//! Handle for communicating with the scheduler.

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::torrent::Torrent;

use super::SchedulerError;
use super::blacklist::BlacklistedConn;
use super::event_loop::EventSender;
use super::events::{SchedulerEvent, SchedulerStats};

/// Clonable public API of a running scheduler.
///
/// Every operation is one event sent into the loop plus, where a reply is
/// needed, a one-shot await. State is never read or written outside the
/// loop.
#[derive(Clone)]
pub struct SchedulerHandle {
    sender: EventSender,
    done: CancellationToken,
    terminated: CancellationToken,
}

impl SchedulerHandle {
    pub(crate) fn new(
        sender: EventSender,
        done: CancellationToken,
        terminated: CancellationToken,
    ) -> Self {
        Self {
            sender,
            done,
            terminated,
        }
    }

    /// Schedules a torrent for download, resolving when it completes.
    ///
    /// Returns immediately with success for a torrent that is already
    /// complete locally; otherwise parks until the dispatcher reports
    /// completion, the torrent is cancelled, or the scheduler stops.
    ///
    /// # Errors
    /// - `SchedulerError::TorrentCancelled` - Cancelled before completing
    /// - `SchedulerError::Stopped` - Scheduler stopped first
    pub async fn add_torrent(&self, torrent: Arc<dyn Torrent>) -> Result<(), SchedulerError> {
        let (responder, rx) = oneshot::channel();
        if !self
            .sender
            .send(SchedulerEvent::NewTorrent { torrent, responder })
            .await
        {
            return Err(SchedulerError::Stopped);
        }
        rx.await.map_err(|_| SchedulerError::Stopped)?
    }

    /// Cancels the first torrent whose name matches.
    ///
    /// Torrent names are not guaranteed unique; if two torrents share a
    /// name, exactly one of them (unspecified which) is cancelled. Its
    /// subscribers resolve with `SchedulerError::TorrentCancelled`.
    ///
    /// # Errors
    /// - `SchedulerError::Stopped` - Scheduler stopped
    pub async fn cancel_torrent(&self, name: &str) -> Result<(), SchedulerError> {
        if !self
            .sender
            .send(SchedulerEvent::CancelTorrent {
                name: name.to_string(),
            })
            .await
        {
            return Err(SchedulerError::Stopped);
        }
        Ok(())
    }

    /// Returns an ordered point-in-time view of the blacklist.
    ///
    /// # Errors
    /// - `SchedulerError::Stopped` - Scheduler stopped
    pub async fn blacklist_snapshot(&self) -> Result<Vec<BlacklistedConn>, SchedulerError> {
        let (responder, rx) = oneshot::channel();
        if !self
            .sender
            .send(SchedulerEvent::BlacklistSnapshot { responder })
            .await
        {
            return Err(SchedulerError::Stopped);
        }
        rx.await.map_err(|_| SchedulerError::Stopped)
    }

    /// Returns the current scheduler counters.
    ///
    /// # Errors
    /// - `SchedulerError::Stopped` - Scheduler stopped
    pub async fn stats(&self) -> Result<SchedulerStats, SchedulerError> {
        let (responder, rx) = oneshot::channel();
        if !self
            .sender
            .send(SchedulerEvent::StatsSnapshot { responder })
            .await
        {
            return Err(SchedulerError::Stopped);
        }
        rx.await.map_err(|_| SchedulerError::Stopped)
    }

    /// Stops the scheduler and waits for teardown to finish.
    ///
    /// All active conns are closed, dispatchers torn down, and
    /// outstanding torrent subscribers resolved with
    /// `SchedulerError::Stopped`. Every later operation on any clone of
    /// this handle fails.
    pub async fn stop(&self) {
        self.done.cancel();
        self.terminated.cancelled().await;
    }

    /// True while the scheduler is accepting events.
    pub fn is_running(&self) -> bool {
        self.sender.is_running()
    }

    /// The sender external event sources feed.
    ///
    /// The inbound listener sends `IncomingHandshake` events here;
    /// dispatchers get their own sender when they are built.
    pub fn event_sender(&self) -> EventSender {
        self.sender.clone()
    }
}
