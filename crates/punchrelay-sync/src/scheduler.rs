//! # Scheduler
//!
//! Owns every timer of the engine. No business logic lives here: each timer
//! just calls into the poller, the reconciler or the connection manager.
//!
//! ## Timer Slots
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Slot        Kind        Restart behavior                              │
//! │  ─────────   ─────────   ──────────────────────────────────────────────│
//! │  poll        interval    start_polling() aborts the previous loop      │
//! │  sync        interval    start_periodic_sync() aborts the previous loop│
//! │  reconnect   one-shot    schedule_reconnect() aborts a pending one;    │
//! │                          the slot is cleared when the timer fires      │
//! │  settle      one-shot    post-connect initialization                   │
//! │  heartbeat   interval    device status rebroadcast; survives link      │
//! │                          teardown, stopped by stop_heartbeat()         │
//! │                                                                         │
//! │  cancel_all() aborts the four link timers.                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Interval timers fire first one full interval after they start, and
//! delay (rather than burst) when a pass overruns its interval.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::poller::IncrementalPoller;
use crate::reconciler::OfflineReconciler;

// =============================================================================
// Timer Slot
// =============================================================================

#[derive(Debug, Default)]
struct Slot {
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

/// Holds at most one running task.
#[derive(Debug, Default, Clone)]
struct TimerSlot {
    inner: Arc<Mutex<Slot>>,
}

impl TimerSlot {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawns `task`, aborting whatever the slot held.
    fn replace<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut slot = self.lock();
        if let Some(old) = slot.handle.take() {
            old.abort();
        }
        slot.generation += 1;
        slot.handle = Some(tokio::spawn(task));
    }

    /// Spawns a one-shot task that frees the slot before running `task`,
    /// so `task` may schedule its own successor.
    fn replace_one_shot<F>(&self, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut slot = self.lock();
        if let Some(old) = slot.handle.take() {
            old.abort();
        }
        slot.generation += 1;

        let generation = slot.generation;
        let this = self.clone();
        slot.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut slot = this.lock();
                if slot.generation == generation {
                    slot.handle = None;
                }
            }
            task.await;
        }));
    }

    fn cancel(&self) -> bool {
        match self.lock().handle.take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    fn is_active(&self) -> bool {
        self.lock().handle.as_ref().map_or(false, |h| !h.is_finished())
    }
}

// =============================================================================
// Scheduler
// =============================================================================

/// The engine's timers.
#[derive(Debug, Default)]
pub struct Scheduler {
    poll: TimerSlot,
    sync: TimerSlot,
    reconnect: TimerSlot,
    settle: TimerSlot,
    heartbeat: TimerSlot,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts (or restarts) the incremental poll loop.
    pub fn start_polling(&self, poller: Arc<IncrementalPoller>, interval: Duration) {
        debug!(interval_ms = interval.as_millis() as u64, "Starting record polling");
        self.poll.replace(every(interval, move || {
            let poller = poller.clone();
            async move {
                poller.poll_once().await;
            }
        }));
    }

    /// Starts (or restarts) the periodic reconciliation loop.
    pub fn start_periodic_sync(&self, reconciler: Arc<OfflineReconciler>, interval: Duration) {
        debug!(interval_ms = interval.as_millis() as u64, "Starting periodic sync");
        self.sync.replace(every(interval, move || {
            let reconciler = reconciler.clone();
            async move {
                reconciler.reconcile().await;
            }
        }));
    }

    /// Runs `task` once after `delay`, replacing any pending reconnect.
    pub fn schedule_reconnect<F>(&self, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.reconnect.replace_one_shot(delay, task);
    }

    /// Runs post-connect initialization once after `delay`.
    pub fn schedule_settle<F>(&self, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.settle.replace_one_shot(delay, task);
    }

    /// Starts (or restarts) a loop calling `tick` once per `interval`,
    /// independent of the device link.
    pub fn start_heartbeat<F, Fut>(&self, interval: Duration, tick: F)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        debug!(interval_ms = interval.as_millis() as u64, "Starting status heartbeat");
        self.heartbeat.replace(every(interval, tick));
    }

    pub fn stop_heartbeat(&self) {
        self.heartbeat.cancel();
    }

    /// Stops the poll and periodic-sync loops and any pending
    /// initialization. The reconnect timer is left alone.
    pub fn stop_link_timers(&self) {
        self.poll.cancel();
        self.sync.cancel();
        self.settle.cancel();
    }

    /// Stops every link timer. The heartbeat keeps running.
    pub fn cancel_all(&self) {
        self.stop_link_timers();
        if self.reconnect.cancel() {
            debug!("Cancelled pending reconnect");
        }
    }

    pub fn is_polling(&self) -> bool {
        self.poll.is_active()
    }

    pub fn is_syncing(&self) -> bool {
        self.sync.is_active()
    }

    pub fn has_pending_reconnect(&self) -> bool {
        self.reconnect.is_active()
    }

    pub fn has_heartbeat(&self) -> bool {
        self.heartbeat.is_active()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.cancel_all();
        self.stop_heartbeat();
    }
}

/// Loop calling `tick` once per `interval`, first after one interval.
async fn every<F, Fut>(interval: Duration, tick: F)
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        tick().await;
    }
}
