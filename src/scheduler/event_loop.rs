//! Serialized event channel feeding the scheduler.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::events::SchedulerEvent;

/// Sending half of the scheduler's event loop.
///
/// Cloned into every spawned I/O task and into each dispatcher; the
/// completion events sent here are the only way concurrent work affects
/// scheduler state. Must never be used from inside an event's apply body:
/// the loop is busy applying, so the send would deadlock. Apply bodies
/// spawn a task when they need to produce a follow-up event.
#[derive(Clone)]
pub struct EventSender {
    events: mpsc::Sender<SchedulerEvent>,
    done: CancellationToken,
}

impl EventSender {
    /// Sends an event into the loop, parking until the loop accepts it.
    ///
    /// Returns false if the loop has stopped; the event is dropped, which
    /// is the correct fate for a completion event that outlived the
    /// scheduler.
    pub async fn send(&self, event: SchedulerEvent) -> bool {
        tokio::select! {
            _ = self.done.cancelled() => false,
            result = self.events.send(event) => result.is_ok(),
        }
    }

    /// True while the loop is accepting events.
    pub fn is_running(&self) -> bool {
        !self.done.is_cancelled() && !self.events.is_closed()
    }
}

/// Channel ends for one scheduler event loop.
pub(crate) struct EventLoop {
    pub(crate) sender: EventSender,
    pub(crate) receiver: mpsc::Receiver<SchedulerEvent>,
    pub(crate) done: CancellationToken,
}

/// Creates the event channel and its stop token.
///
/// Capacity 1 keeps the channel rendezvous-like: senders park until the
/// loop drains their event, which is the back-pressure that bounds a
/// burst of incoming handshakes.
pub(crate) fn new_event_loop() -> EventLoop {
    let (tx, rx) = mpsc::channel(1);
    let done = CancellationToken::new();
    EventLoop {
        sender: EventSender {
            events: tx,
            done: done.clone(),
        },
        receiver: rx,
        done,
    }
}
