//! # Incremental Poller
//!
//! Cheap cursor-based pass: replays only records newer than the last
//! processed time. The periodic reconciler catches anything this misses
//! (backfilled records with older timestamps).

use std::sync::Arc;

use tracing::{debug, warn};

use punchrelay_core::{AttendanceRecord, PollSummary, RecordSource};

use crate::driver::DeviceDriver;
use crate::processor::RecordProcessor;
use crate::state::StateView;

/// Replays records past the processed cursor.
pub struct IncrementalPoller {
    processor: Arc<RecordProcessor>,
    driver: Arc<dyn DeviceDriver>,
    state: StateView,
}

impl IncrementalPoller {
    pub fn new(processor: Arc<RecordProcessor>, driver: Arc<dyn DeviceDriver>, state: StateView) -> Self {
        IncrementalPoller {
            processor,
            driver,
            state,
        }
    }

    /// Runs one poll pass. A no-op while disconnected.
    pub async fn poll_once(&self) -> PollSummary {
        if !self.state.is_connected().await {
            return PollSummary::default();
        }

        let records = match self.driver.list_records().await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "Polling failed to read records");
                return PollSummary::default();
            }
        };

        let mut summary = PollSummary {
            examined: records.len(),
            ..Default::default()
        };

        let fresh = self.fresh(records);
        if fresh.is_empty() {
            return summary;
        }
        debug!(count = fresh.len(), "New records found by polling");

        for record in &fresh {
            let outcome = self.processor.process(record, RecordSource::Polling).await;
            summary.processed += 1;
            if outcome.is_synced() {
                summary.synced += 1;
            }
            if let Some(at) = record.record_time {
                self.processor.cursor().advance(at);
            }
        }

        summary
    }

    /// Well-formed records newer than the cursor, oldest first.
    fn fresh(&self, records: Vec<AttendanceRecord>) -> Vec<AttendanceRecord> {
        let cursor = self.processor.cursor();
        let registry = self.processor.registry();

        let mut fresh: Vec<AttendanceRecord> = records
            .into_iter()
            .filter(|record| match (record.user_id(), record.record_time) {
                (Some(user_id), Some(at)) => cursor.is_newer(at) && !registry.contains(user_id),
                _ => false,
            })
            .collect();

        fresh.sort_by_key(|record| record.record_time);
        fresh
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

    async fn poller(phase: ConnectionPhase) -> (IncrementalPoller, Arc<FakeDriver>, Arc<FakeLedger>) {
        let registry = Arc::new(InvalidUserRegistry::load(Arc::new(MemoryStore::new())).await);
        let driver = Arc::new(FakeDriver::new());
        let ledger = Arc::new(FakeLedger::new());
        let processor = Arc::new(RecordProcessor::new(
            registry,
            driver.clone(),
            ledger.clone(),
            RecordingEmitter::new(),
            TerminalProfile::default(),
        ));
        let state = StateView::detached(ConnectionState {
            phase,
            ..Default::default()
        });
        (IncrementalPoller::new(processor, driver.clone(), state), driver, ledger)
    }

    #[tokio::test]
    async fn test_only_records_past_cursor_are_replayed() {
        let (poller, driver, ledger) = poller(ConnectionPhase::Connected).await;
        poller.processor.cursor().advance(at(100));

        driver.set_records(vec![
            AttendanceRecord::new("1", at(50)),
            AttendanceRecord::new("2", at(100)),
            AttendanceRecord::new("3", at(300)),
            AttendanceRecord::new("4", at(200)),
        ]);

        let summary = poller.poll_once().await;

        assert_eq!(summary.examined, 4);
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.synced, 2);
        let users: Vec<String> = ledger.calls().into_iter().map(|p| p.user_id).collect();
        assert_eq!(users, vec!["4", "3"]);
        assert_eq!(poller.processor.cursor().get(), Some(at(300)));
    }

    #[tokio::test]
    async fn test_cursor_advances_even_when_already_synced() {
        let (poller, driver, ledger) = poller(ConnectionPhase::Connected).await;
        poller.processor.cursor().advance(at(0));

        let record = AttendanceRecord::new("1", at(10));
        driver.set_records(vec![record.clone()]);
        poller.poll_once().await;
        assert_eq!(ledger.call_count(), 1);

        // A second pass sees nothing new.
        let summary = poller.poll_once().await;
        assert_eq!(summary.processed, 0);
        assert_eq!(ledger.call_count(), 1);
    }

    #[tokio::test]
    async fn test_blacklisted_users_are_filtered() {
        let (poller, driver, ledger) = poller(ConnectionPhase::Connected).await;
        poller.processor.registry().add("ghost").await.unwrap();
        driver.set_records(vec![AttendanceRecord::new("ghost", at(10))]);

        let summary = poller.poll_once().await;
        assert_eq!(summary.processed, 0);
        assert_eq!(ledger.call_count(), 0);
    }

    #[tokio::test]
    async fn test_noop_when_disconnected() {
        let (poller, driver, _) = poller(ConnectionPhase::Connecting).await;
        driver.set_records(vec![AttendanceRecord::new("1", at(10))]);

        assert_eq!(poller.poll_once().await, PollSummary::default());
        assert_eq!(driver.list_calls(), 0);
    }

    #[tokio::test]
    async fn test_list_failure_is_absorbed() {
        let (poller, driver, _) = poller(ConnectionPhase::Connected).await;
        driver.set_list_fails(true);

        assert_eq!(poller.poll_once().await, PollSummary::default());
    }
}
