//! # Record Processor
//!
//! Validates, deduplicates, enriches and submits a single attendance
//! record. Every path into the remote API (realtime push, incremental poll,
//! offline reconciliation) goes through [`RecordProcessor::process`].
//!
//! ## Pipeline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  record ──► user id + time? ──no──► FAILED(INVALID_ENTRY)              │
//! │                 │                                                       │
//! │                 ▼                                                       │
//! │            blacklisted? ──yes──► SKIPPED(INVALID_USER)   (no network)  │
//! │                 │                                                       │
//! │                 ▼                                                       │
//! │            claim SyncKey ──synced──► SKIPPED(ALREADY_SYNCED)           │
//! │                 │        ──in flight─► SKIPPED(IN_FLIGHT)              │
//! │                 ▼                                                       │
//! │            advance cursor, resolve name, build payload                 │
//! │                 │                                                       │
//! │                 ▼                                                       │
//! │            RemoteLedger::submit                                        │
//! │             ├── Ok ─────────────► mark synced, emit ──► SUCCESS        │
//! │             ├── UserNotFound ───► blacklist (durable) ► FAILED(...)    │
//! │             ├── ApiError ───────► release claim ─────► FAILED(...)     │
//! │             └── panic ──────────► release claim ─────► FAILED(EXC.)    │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Nothing escapes as `Err`: every per-record failure is a
//! [`ProcessOutcome`].

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use rand::Rng;
use tracing::{debug, error, info, warn};

use punchrelay_core::payload::derive_record_id;
use punchrelay_core::{
    AttendanceEvent, AttendancePayload, AttendanceRecord, FailureReason, ProcessOutcome,
    RecordSource, SkipReason, SyncKey, TerminalProfile,
};

use crate::driver::DeviceDriver;
use crate::emitter::RelayEventEmitter;
use crate::ledger::{LedgerAck, LedgerRejection, RejectionKind, RemoteLedger};
use crate::registry::InvalidUserRegistry;
use crate::synced::{Claim, ProcessedCursor, SyncedSet};

/// Upper bound (exclusive) of fallback record ids.
const FALLBACK_ID_MAX: u64 = 1_000_000_000;

/// The per-record delivery pipeline.
pub struct RecordProcessor {
    registry: Arc<InvalidUserRegistry>,
    synced: Arc<SyncedSet>,
    cursor: Arc<ProcessedCursor>,
    driver: Arc<dyn DeviceDriver>,
    ledger: Arc<dyn RemoteLedger>,
    emitter: Arc<dyn RelayEventEmitter>,
    profile: TerminalProfile,
    last_sync: Mutex<Option<DateTime<Utc>>>,
}

impl RecordProcessor {
    pub fn new(
        registry: Arc<InvalidUserRegistry>,
        driver: Arc<dyn DeviceDriver>,
        ledger: Arc<dyn RemoteLedger>,
        emitter: Arc<dyn RelayEventEmitter>,
        profile: TerminalProfile,
    ) -> Self {
        RecordProcessor {
            registry,
            synced: Arc::new(SyncedSet::new()),
            cursor: Arc::new(ProcessedCursor::new()),
            driver,
            ledger,
            emitter,
            profile,
            last_sync: Mutex::new(None),
        }
    }

    /// Processes one record.
    pub async fn process(&self, record: &AttendanceRecord, source: RecordSource) -> ProcessOutcome {
        self.process_with(record, source, false).await
    }

    /// Processes one record, optionally bypassing the ALREADY_SYNCED check.
    ///
    /// The blacklist and the in-flight guard always apply.
    pub async fn process_with(
        &self,
        record: &AttendanceRecord,
        source: RecordSource,
        resubmit: bool,
    ) -> ProcessOutcome {
        let (user_id, at) = match (record.user_id(), record.record_time) {
            (Some(user_id), Some(at)) => (user_id, at),
            (None, _) => {
                warn!(%source, "Dropping record without user id");
                return ProcessOutcome::failed(FailureReason::InvalidEntry);
            }
            (Some(user_id), None) => {
                warn!(%source, %user_id, "Dropping record with unusable timestamp");
                return ProcessOutcome::failed(FailureReason::InvalidEntry);
            }
        };

        if self.registry.contains(user_id) {
            debug!(%source, %user_id, "Skipping blacklisted user");
            return ProcessOutcome::skipped(SkipReason::InvalidUser);
        }

        let key = SyncKey::new(user_id, at);
        let claim = match self.synced.try_claim(&key, resubmit) {
            Claim::Claimed(claim) => claim,
            Claim::AlreadySynced => {
                debug!(%source, key = %key, "Already synced");
                return ProcessOutcome::skipped(SkipReason::AlreadySynced);
            }
            Claim::InFlight => {
                debug!(%source, key = %key, "Submission already in flight");
                return ProcessOutcome::skipped(SkipReason::InFlight);
            }
        };

        if source.is_device() {
            self.cursor.advance(at);
        }

        let submission = AssertUnwindSafe(self.submit(user_id, record.display_name(), at))
            .catch_unwind()
            .await;

        match submission {
            Ok(Ok(_ack)) => {
                claim.complete();
                self.mark_synced();
                self.emitter
                    .emit_attendance(&AttendanceEvent::delivered(user_id, at, &self.profile, Utc::now()));
                info!(%source, key = %key, "Attendance synced");
                ProcessOutcome::Synced
            }
            Ok(Err(rejection)) => {
                drop(claim);
                self.on_rejection(user_id, source, rejection).await
            }
            Err(panic) => {
                drop(claim);
                let message = panic_message(panic.as_ref());
                error!(%source, key = %key, error = %message, "Attendance submission panicked");
                ProcessOutcome::failed(FailureReason::Exception(message))
            }
        }
    }

    async fn submit(
        &self,
        user_id: &str,
        name: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<LedgerAck, LedgerRejection> {
        let user_name = match name {
            Some(name) => name.to_string(),
            None => self.lookup_name(user_id).await,
        };

        let payload = AttendancePayload::build(record_id(user_id), user_id, &user_name, at, &self.profile);
        debug!(user_id = %payload.user_id, att_time = %payload.att_time, id = payload.id, "Submitting attendance");
        self.ledger.submit(&payload).await
    }

    /// Best-effort name lookup; falls back to the raw id.
    async fn lookup_name(&self, user_id: &str) -> String {
        match self.driver.lookup_user_name(user_id).await {
            Ok(Some(name)) if !name.trim().is_empty() => name.trim().to_string(),
            Ok(_) => user_id.to_string(),
            Err(e) => {
                debug!(%user_id, error = %e, "User name lookup failed");
                user_id.to_string()
            }
        }
    }

    async fn on_rejection(
        &self,
        user_id: &str,
        source: RecordSource,
        rejection: LedgerRejection,
    ) -> ProcessOutcome {
        match rejection.kind {
            RejectionKind::UserNotFound => {
                warn!(%source, %user_id, message = %rejection.message, "User not found, blacklisting");
                if let Err(e) = self.registry.add(user_id).await {
                    error!(%user_id, error = %e, "Failed to persist invalid user id");
                }
                ProcessOutcome::failed(FailureReason::UserNotFound)
            }
            RejectionKind::ApiError => {
                error!(%source, %user_id, message = %rejection.message, "Attendance API error");
                ProcessOutcome::failed(FailureReason::ApiError(rejection.message))
            }
        }
    }

    fn mark_synced(&self) {
        *self.last_sync.lock().unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn registry(&self) -> &InvalidUserRegistry {
        &self.registry
    }

    pub fn synced(&self) -> &SyncedSet {
        &self.synced
    }

    pub fn cursor(&self) -> &ProcessedCursor {
        &self.cursor
    }

    /// When the last punch was delivered.
    pub fn last_sync_time(&self) -> Option<DateTime<Utc>> {
        *self.last_sync.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Correlation id for one submission.
fn record_id(user_id: &str) -> u64 {
    derive_record_id(Utc::now().timestamp_millis(), user_id)
        .unwrap_or_else(|| rand::thread_rng().gen_range(1..FALLBACK_ID_MAX))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{at, FakeDriver, FakeLedger, RecordingEmitter};
    use punchrelay_store::{load_json, MemoryStore};
    use std::time::Duration;

    struct Harness {
        processor: Arc<RecordProcessor>,
        ledger: Arc<FakeLedger>,
        driver: Arc<FakeDriver>,
        emitter: Arc<RecordingEmitter>,
        store: Arc<MemoryStore>,
    }

    async fn harness(ledger: FakeLedger) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(InvalidUserRegistry::load(store.clone()).await);
        let ledger = Arc::new(ledger);
        let driver = Arc::new(FakeDriver::new());
        let emitter = RecordingEmitter::new();
        let processor = Arc::new(RecordProcessor::new(
            registry,
            driver.clone(),
            ledger.clone(),
            emitter.clone(),
            TerminalProfile::default(),
        ));
        Harness {
            processor,
            ledger,
            driver,
            emitter,
            store,
        }
    }

    #[tokio::test]
    async fn test_second_submission_is_already_synced() {
        let h = harness(FakeLedger::new()).await;
        let record = AttendanceRecord::new("2025004", at(0));

        let first = h.processor.process(&record, RecordSource::Realtime).await;
        let second = h.processor.process(&record, RecordSource::Polling).await;

        assert_eq!(first, ProcessOutcome::Synced);
        assert_eq!(second, ProcessOutcome::skipped(SkipReason::AlreadySynced));
        assert_eq!(h.ledger.call_count(), 1);

        let key = SyncKey::new("2025004", at(0));
        assert_eq!(key.as_str(), "2025004|2025-01-10|09:00:00");
        assert!(h.processor.synced().contains(&key));
        assert!(h.processor.last_sync_time().is_some());
    }

    #[tokio::test]
    async fn test_success_emits_attendance_event() {
        let h = harness(FakeLedger::new()).await;
        h.processor
            .process(&AttendanceRecord::new("2025004", at(0)), RecordSource::Realtime)
            .await;

        let events = h.emitter.attendance();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].student_id, "2025004");
        assert_eq!(events[0].date, "2025-01-10");
        assert_eq!(events[0].in_time, "2025-01-10 09:00:00");
    }

    #[tokio::test]
    async fn test_unknown_user_is_blacklisted_permanently() {
        let h = harness(FakeLedger::rejecting(&["ghost"])).await;

        let first = h
            .processor
            .process(&AttendanceRecord::new("ghost", at(0)), RecordSource::Realtime)
            .await;
        assert_eq!(first, ProcessOutcome::failed(FailureReason::UserNotFound));
        assert_eq!(h.ledger.call_count(), 1);

        let doc: crate::registry::InvalidUserDoc =
            load_json(h.store.as_ref(), crate::registry::INVALID_USERS_KEY)
                .await
                .unwrap()
                .unwrap();
        assert_eq!(doc.user_ids, vec!["ghost".to_string()]);

        let second = h
            .processor
            .process(&AttendanceRecord::new("ghost", at(60)), RecordSource::Polling)
            .await;
        assert_eq!(second, ProcessOutcome::skipped(SkipReason::InvalidUser));
        assert_eq!(h.ledger.call_count(), 1);
        assert!(h.emitter.attendance().is_empty());
    }

    #[tokio::test]
    async fn test_api_error_leaves_key_retryable() {
        let h = harness(FakeLedger::new()).await;
        let record = AttendanceRecord::new("7", at(0));

        h.ledger.set_failing(true);
        let outcome = h.processor.process(&record, RecordSource::Polling).await;
        assert_eq!(outcome, ProcessOutcome::failed(FailureReason::ApiError("HTTP 500".into())));
        assert!(!h.processor.synced().contains(&SyncKey::new("7", at(0))));

        h.ledger.set_failing(false);
        let outcome = h.processor.process(&record, RecordSource::Polling).await;
        assert_eq!(outcome, ProcessOutcome::Synced);
        assert_eq!(h.ledger.call_count(), 2);
    }

    #[tokio::test]
    async fn test_malformed_records_are_invalid_entries() {
        let h = harness(FakeLedger::new()).await;

        let mut no_user = AttendanceRecord::new("  ", at(0));
        let outcome = h.processor.process(&no_user, RecordSource::Realtime).await;
        assert_eq!(outcome, ProcessOutcome::failed(FailureReason::InvalidEntry));

        no_user.device_user_id = Some("7".into());
        no_user.record_time = None;
        let outcome = h.processor.process(&no_user, RecordSource::Realtime).await;
        assert_eq!(outcome, ProcessOutcome::failed(FailureReason::InvalidEntry));

        assert_eq!(h.ledger.call_count(), 0);
    }

    #[tokio::test]
    async fn test_panicking_ledger_is_exception() {
        let h = harness(FakeLedger::new()).await;
        h.ledger.set_panicking(true);

        let record = AttendanceRecord::new("7", at(0));
        let outcome = h.processor.process(&record, RecordSource::Realtime).await;

        assert_eq!(
            outcome,
            ProcessOutcome::failed(FailureReason::Exception("ledger exploded".into()))
        );
        let key = SyncKey::new("7", at(0));
        assert!(!h.processor.synced().contains(&key));
        assert!(!h.processor.synced().is_in_flight(&key));
    }

    #[tokio::test]
    async fn test_resubmit_overrides_dedup() {
        let h = harness(FakeLedger::new()).await;
        let record = AttendanceRecord::new("7", at(0));

        h.processor.process(&record, RecordSource::Realtime).await;
        let outcome = h.processor.process_with(&record, RecordSource::Realtime, true).await;

        assert_eq!(outcome, ProcessOutcome::Synced);
        assert_eq!(h.ledger.call_count(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_pass_sees_in_flight() {
        let h = harness(FakeLedger::new()).await;
        h.ledger.set_delay(Duration::from_millis(50));
        let record = AttendanceRecord::new("7", at(0));

        let (a, b) = tokio::join!(
            h.processor.process(&record, RecordSource::Polling),
            h.processor.process(&record, RecordSource::OfflineSync),
        );

        let mut outcomes = vec![a, b];
        outcomes.sort_by_key(|o| o.is_skipped());
        assert_eq!(outcomes[0], ProcessOutcome::Synced);
        assert_eq!(outcomes[1], ProcessOutcome::skipped(SkipReason::InFlight));
        assert_eq!(h.ledger.call_count(), 1);
    }

    #[tokio::test]
    async fn test_name_resolution_order() {
        let h = harness(FakeLedger::new()).await;
        h.driver.set_name("2", "Rahim");

        let named = AttendanceRecord::new("1", at(0)).with_user_name("Karim");
        h.processor.process(&named, RecordSource::Realtime).await;
        h.processor
            .process(&AttendanceRecord::new("2", at(0)), RecordSource::Realtime)
            .await;
        h.processor
            .process(&AttendanceRecord::new("3", at(0)), RecordSource::Realtime)
            .await;

        let names: Vec<String> = h.ledger.calls().into_iter().map(|p| p.user_name).collect();
        assert_eq!(names, vec!["Karim", "Rahim", "3"]);
    }

    #[tokio::test]
    async fn test_cursor_advances_past_dedup_check() {
        let h = harness(FakeLedger::new()).await;
        h.ledger.set_failing(true);

        h.processor
            .process(&AttendanceRecord::new("7", at(30)), RecordSource::Polling)
            .await;
        h.processor
            .process(&AttendanceRecord::new("7", at(10)), RecordSource::Polling)
            .await;

        assert_eq!(h.processor.cursor().get(), Some(at(30)));
    }

    #[tokio::test]
    async fn test_manual_records_leave_cursor_alone() {
        let h = harness(FakeLedger::new()).await;

        let outcome = h
            .processor
            .process(&AttendanceRecord::new("2025004", at(90)), RecordSource::Manual)
            .await;

        assert_eq!(outcome, ProcessOutcome::Synced);
        assert_eq!(h.processor.cursor().get(), None);
        assert_eq!(h.processor.synced().len(), 1);
    }

    #[tokio::test]
    async fn test_payload_fields() {
        let h = harness(FakeLedger::new()).await;
        h.processor
            .process(&AttendanceRecord::new("2025004", at(0)), RecordSource::Realtime)
            .await;

        let payload = &h.ledger.calls()[0];
        assert_eq!(payload.user_id, "2025004");
        assert_eq!(payload.terminal_sn, "TERM-12345");
        assert_eq!(payload.record_type, "Check-in");
        assert_eq!(payload.school_id, 1);
        assert!(payload.id > 0);
    }

    #[test]
    fn test_record_id_is_positive() {
        assert!(record_id("2025004") > 0);
        assert!(record_id("abcd") > 0);
        assert!(record_id("") > 0);
    }
}
