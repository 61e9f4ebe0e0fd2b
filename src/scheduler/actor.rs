//! Run loop and timer tasks for the scheduler.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::SchedulerConfig;

use super::PeerContext;
use super::core::{Scheduler, SchedulerComponents};
use super::event_loop::{EventSender, new_event_loop};
use super::events::{self, SchedulerEvent};
use super::handle::SchedulerHandle;

/// Spawns the scheduler and returns its handle.
///
/// Starts the run loop that owns all scheduler state, plus the four timer
/// tasks feeding it announce, preemption, blacklist-cleanup, and stats
/// ticks. The run loop processes events strictly one at a time, which is
/// what makes every state transition race-free without locks.
pub fn spawn_scheduler(
    config: SchedulerConfig,
    pctx: PeerContext,
    components: SchedulerComponents,
) -> SchedulerHandle {
    let event_loop = new_event_loop();
    let terminated = CancellationToken::new();
    let scheduler = Scheduler::new(config.clone(), pctx, components, event_loop.sender.clone());

    spawn_tick(event_loop.sender.clone(), config.announce_interval, || {
        SchedulerEvent::AnnounceTick
    });
    spawn_tick(event_loop.sender.clone(), config.preemption_interval, || {
        SchedulerEvent::PreemptionTick
    });
    spawn_tick(
        event_loop.sender.clone(),
        config.blacklist_cleanup_interval,
        || SchedulerEvent::CleanupBlacklistTick,
    );
    spawn_tick(
        event_loop.sender.clone(),
        config.emit_stats_interval,
        || SchedulerEvent::EmitStatsTick,
    );

    tokio::spawn(run_event_loop(
        scheduler,
        event_loop.receiver,
        event_loop.done.clone(),
        terminated.clone(),
    ));

    SchedulerHandle::new(event_loop.sender, event_loop.done, terminated)
}

/// Processes events until stopped.
///
/// While an event is being applied it is the sole accessor of scheduler
/// state; no two applies overlap. On exit the scheduler releases its
/// conns, dispatchers, and subscribers before termination is signalled.
async fn run_event_loop(
    mut scheduler: Scheduler,
    mut receiver: mpsc::Receiver<SchedulerEvent>,
    done: CancellationToken,
    terminated: CancellationToken,
) {
    tracing::debug!("Scheduler event loop started");

    loop {
        tokio::select! {
            _ = done.cancelled() => break,
            maybe_event = receiver.recv() => match maybe_event {
                Some(event) => events::apply(&mut scheduler, event),
                None => break,
            },
        }
    }

    scheduler.shut_down();
    terminated.cancel();
    tracing::debug!("Scheduler event loop stopped");
}

/// Sends `event()` into the loop every `period` until the loop stops.
fn spawn_tick(sender: EventSender, period: Duration, event: fn() -> SchedulerEvent) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick of a tokio interval fires immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            if !sender.send(event()).await {
                return;
            }
        }
    });
}
