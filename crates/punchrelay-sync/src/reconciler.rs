//! # Offline Reconciler
//!
//! Full catch-up pass: diffs the terminal's complete record list against
//! what has been delivered and replays the gaps, oldest first.
//!
//! ## Reconciliation Run
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  connected? ──no──► no-op                                              │
//! │      │                                                                  │
//! │      ▼                                                                  │
//! │  list_records ──err──► summary { error } ──► emit                      │
//! │      │                                                                  │
//! │      ▼                                                                  │
//! │  drop malformed, already synced, blacklisted                           │
//! │      │                                                                  │
//! │      ▼                                                                  │
//! │  sort ascending by record time                                         │
//! │      │                                                                  │
//! │      ▼                                                                  │
//! │  for each: process(OfflineSync), pause replay_delay                    │
//! │      │                                                                  │
//! │      ▼                                                                  │
//! │  summary { synced, skipped, invalid, failed } ──► emit                 │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use punchrelay_core::{AttendanceRecord, ReconcileSummary, RecordSource};

use crate::driver::DeviceDriver;
use crate::emitter::RelayEventEmitter;
use crate::processor::RecordProcessor;
use crate::state::StateView;

/// Replays device records the relay has not delivered yet.
pub struct OfflineReconciler {
    processor: Arc<RecordProcessor>,
    driver: Arc<dyn DeviceDriver>,
    emitter: Arc<dyn RelayEventEmitter>,
    state: StateView,
    replay_delay: Duration,
}

impl OfflineReconciler {
    pub fn new(
        processor: Arc<RecordProcessor>,
        driver: Arc<dyn DeviceDriver>,
        emitter: Arc<dyn RelayEventEmitter>,
        state: StateView,
        replay_delay: Duration,
    ) -> Self {
        OfflineReconciler {
            processor,
            driver,
            emitter,
            state,
            replay_delay,
        }
    }

    /// Runs one reconciliation pass. Never fails; a list error is reported
    /// in [`ReconcileSummary::error`].
    pub async fn reconcile(&self) -> ReconcileSummary {
        if !self.state.is_connected().await {
            debug!("Device not connected, skipping reconciliation");
            return ReconcileSummary::default();
        }

        let records = match self.driver.list_records().await {
            Ok(records) => records,
            Err(e) => {
                error!(error = %e, "Failed to read records for reconciliation");
                let summary = ReconcileSummary::aborted(e.to_string());
                self.emitter.emit_reconcile(&summary);
                return summary;
            }
        };

        let listed = records.len();
        let pending = self.pending(records);
        debug!(listed, pending = pending.len(), "Reconciling offline records");

        let mut summary = ReconcileSummary::default();
        for (i, record) in pending.iter().enumerate() {
            if i > 0 && !self.replay_delay.is_zero() {
                tokio::time::sleep(self.replay_delay).await;
            }
            let outcome = self.processor.process(record, RecordSource::OfflineSync).await;
            summary.record(&outcome);
        }

        if summary.has_activity() {
            info!(
                synced = summary.synced,
                skipped = summary.skipped,
                invalid = summary.invalid,
                failed = summary.failed,
                "Offline sync complete"
            );
        } else {
            debug!(skipped = summary.skipped, failed = summary.failed, "Nothing new to reconcile");
        }

        self.emitter.emit_reconcile(&summary);
        summary
    }

    /// Records still owed to the remote API, oldest first.
    fn pending(&self, records: Vec<AttendanceRecord>) -> Vec<AttendanceRecord> {
        let mut pending: Vec<AttendanceRecord> = records
            .into_iter()
            .filter(|record| match (record.user_id(), record.sync_key()) {
                (Some(user_id), Some(key)) => {
                    !self.processor.synced().contains(&key) && !self.processor.registry().contains(user_id)
                }
                _ => false,
            })
            .collect();

        pending.sort_by_key(|record| record.record_time);
        pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InvalidUserRegistry;
    use crate::state::{ConnectionPhase, ConnectionState};
    use crate::testing::{at, FakeDriver, FakeLedger, RecordingEmitter};
    use punchrelay_core::TerminalProfile;
    use punchrelay_store::MemoryStore;

    struct Harness {
        reconciler: OfflineReconciler,
        processor: Arc<RecordProcessor>,
        driver: Arc<FakeDriver>,
        ledger: Arc<FakeLedger>,
        emitter: Arc<RecordingEmitter>,
    }

    async fn harness(ledger: FakeLedger, phase: ConnectionPhase) -> Harness {
        let registry = Arc::new(InvalidUserRegistry::load(Arc::new(MemoryStore::new())).await);
        let driver = Arc::new(FakeDriver::new());
        let ledger = Arc::new(ledger);
        let emitter = RecordingEmitter::new();
        let processor = Arc::new(RecordProcessor::new(
            registry,
            driver.clone(),
            ledger.clone(),
            emitter.clone(),
            TerminalProfile::default(),
        ));
        let state = StateView::detached(ConnectionState {
            phase,
            ..Default::default()
        });
        let reconciler = OfflineReconciler::new(
            processor.clone(),
            driver.clone(),
            emitter.clone(),
            state,
            Duration::ZERO,
        );
        Harness {
            reconciler,
            processor,
            driver,
            ledger,
            emitter,
        }
    }

    #[tokio::test]
    async fn test_replays_in_chronological_order() {
        let h = harness(FakeLedger::new(), ConnectionPhase::Connected).await;
        h.driver.set_records(vec![
            AttendanceRecord::new("1", at(300)),
            AttendanceRecord::new("2", at(100)),
            AttendanceRecord::new("3", at(200)),
        ]);

        let summary = h.reconciler.reconcile().await;

        assert_eq!(summary.synced, 3);
        assert_eq!(
            h.ledger.submitted_times(),
            vec!["2025-01-10 09:01:40", "2025-01-10 09:03:20", "2025-01-10 09:05:00"]
        );
    }

    #[tokio::test]
    async fn test_counts_cover_every_pending_record() {
        let h = harness(FakeLedger::rejecting(&["ghost"]), ConnectionPhase::Connected).await;

        // One punch delivered earlier, one user already blacklisted.
        let delivered = AttendanceRecord::new("1", at(0));
        h.processor.process(&delivered, RecordSource::Realtime).await;
        h.processor.registry().add("banned").await.unwrap();
        let calls_before = h.ledger.call_count();

        h.driver.set_records(vec![
            delivered.clone(),
            AttendanceRecord::new("banned", at(5)),
            AttendanceRecord::new("2", at(10)),
            AttendanceRecord::new("ghost", at(20)),
            AttendanceRecord::new("3", at(30)),
        ]);

        let summary = h.reconciler.reconcile().await;

        assert_eq!(summary.synced, 2);
        assert_eq!(summary.invalid, 1);
        assert_eq!(summary.skipped, 0);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.synced + summary.skipped + summary.invalid, 3);
        assert_eq!(h.ledger.call_count() - calls_before, 3);

        let resubmitted = h.ledger.calls()[calls_before..]
            .iter()
            .any(|p| p.user_id == "1" || p.user_id == "banned");
        assert!(!resubmitted);
    }

    #[tokio::test]
    async fn test_second_run_finds_nothing() {
        let h = harness(FakeLedger::new(), ConnectionPhase::Connected).await;
        h.driver.set_records(vec![AttendanceRecord::new("1", at(0))]);

        h.reconciler.reconcile().await;
        let summary = h.reconciler.reconcile().await;

        assert_eq!(summary.total(), 0);
        assert_eq!(h.ledger.call_count(), 1);
        assert_eq!(h.emitter.summaries().len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_records_are_filtered() {
        let h = harness(FakeLedger::new(), ConnectionPhase::Connected).await;
        let mut broken = AttendanceRecord::new("9", at(0));
        broken.record_time = None;
        h.driver.set_records(vec![broken, AttendanceRecord::new("", at(1))]);

        let summary = h.reconciler.reconcile().await;
        assert_eq!(summary.total(), 0);
        assert_eq!(h.ledger.call_count(), 0);
    }

    #[tokio::test]
    async fn test_api_errors_are_counted_as_failed() {
        let h = harness(FakeLedger::new(), ConnectionPhase::Connected).await;
        h.ledger.set_failing(true);
        h.driver.set_records(vec![AttendanceRecord::new("1", at(0))]);

        let summary = h.reconciler.reconcile().await;
        assert_eq!(summary.failed, 1);
        assert!(summary.error.is_none());
    }

    #[tokio::test]
    async fn test_list_failure_is_reported() {
        let h = harness(FakeLedger::new(), ConnectionPhase::Connected).await;
        h.driver.set_list_fails(true);

        let summary = h.reconciler.reconcile().await;

        assert_eq!(summary.total(), 0);
        assert!(summary.error.as_deref().unwrap().contains("read timeout"));
        assert_eq!(h.emitter.summaries(), vec![summary]);
    }

    #[tokio::test]
    async fn test_noop_when_disconnected() {
        let h = harness(FakeLedger::new(), ConnectionPhase::Disconnected).await;
        h.driver.set_records(vec![AttendanceRecord::new("1", at(0))]);

        let summary = h.reconciler.reconcile().await;

        assert_eq!(summary, ReconcileSummary::default());
        assert_eq!(h.driver.list_calls(), 0);
        assert!(h.emitter.summaries().is_empty());
        assert!(h.processor.synced().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_paces_replayed_records() {
        let mut h = harness(FakeLedger::new(), ConnectionPhase::Connected).await;
        h.reconciler.replay_delay = Duration::from_millis(100);
        h.driver.set_records(vec![
            AttendanceRecord::new("1", at(0)),
            AttendanceRecord::new("2", at(1)),
            AttendanceRecord::new("3", at(2)),
        ]);

        let started = tokio::time::Instant::now();
        h.reconciler.reconcile().await;

        assert_eq!(started.elapsed(), Duration::from_millis(200));
    }
}
