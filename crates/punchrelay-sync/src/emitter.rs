//! # Notification Sink
//!
//! The engine pushes three kinds of events outward: device status changes,
//! delivered attendance punches and reconciliation summaries. Emitting is
//! fire-and-forget; the engine never waits on a consumer.
//!
//! ```text
//! ConnectionManager ──► emit_device_status(DeviceStatus)
//! RecordProcessor   ──► emit_attendance(AttendanceEvent)
//! OfflineReconciler ──► emit_reconcile(ReconcileSummary)
//!                              │
//!                              ▼
//!               RelayEventEmitter (NoOp | Broadcast | host-provided)
//! ```

use tokio::sync::broadcast;
use tracing::trace;

use punchrelay_core::{AttendanceEvent, DeviceStatus, ReconcileSummary};

/// Receiver of engine notifications.
///
/// Implementations must not block.
pub trait RelayEventEmitter: Send + Sync {
    /// Device connection status changed.
    fn emit_device_status(&self, status: &DeviceStatus);

    /// A punch was delivered to the remote API.
    fn emit_attendance(&self, event: &AttendanceEvent);

    /// A reconciliation run finished.
    fn emit_reconcile(&self, summary: &ReconcileSummary);
}

/// Emitter that drops everything.
pub struct NoOpEmitter;

impl RelayEventEmitter for NoOpEmitter {
    fn emit_device_status(&self, _status: &DeviceStatus) {}
    fn emit_attendance(&self, _event: &AttendanceEvent) {}
    fn emit_reconcile(&self, _summary: &ReconcileSummary) {}
}

// =============================================================================
// Broadcast Emitter
// =============================================================================

/// A notification as delivered to broadcast subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    DeviceStatus(DeviceStatus),
    Attendance(AttendanceEvent),
    Reconciled(ReconcileSummary),
}

/// Fans notifications out to any number of subscribers.
///
/// Slow subscribers lag and lose events rather than blocking the engine.
#[derive(Debug, Clone)]
pub struct BroadcastEmitter {
    tx: broadcast::Sender<RelayEvent>,
}

impl BroadcastEmitter {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        BroadcastEmitter { tx }
    }

    /// Subscribes to future events.
    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.tx.subscribe()
    }

    fn send(&self, event: RelayEvent) {
        // No subscribers is not an error.
        if self.tx.send(event).is_err() {
            trace!("No event subscribers");
        }
    }
}

impl Default for BroadcastEmitter {
    fn default() -> Self {
        BroadcastEmitter::new(256)
    }
}

impl RelayEventEmitter for BroadcastEmitter {
    fn emit_device_status(&self, status: &DeviceStatus) {
        self.send(RelayEvent::DeviceStatus(status.clone()));
    }

    fn emit_attendance(&self, event: &AttendanceEvent) {
        self.send(RelayEvent::Attendance(event.clone()));
    }

    fn emit_reconcile(&self, summary: &ReconcileSummary) {
        self.send(RelayEvent::Reconciled(summary.clone()));
    }
}
