//! Scripted collaborators for engine tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::mpsc;
use tokio::time::Instant;

use punchrelay_core::{
    AttendanceEvent, AttendancePayload, AttendanceRecord, ConnectionType, DeviceConfig,
    DeviceStatus, ReconcileSummary,
};
use punchrelay_store::{KeyValueStore, StoreError, StoreResult};

use crate::driver::{DeviceDriver, LinkEvent};
use crate::emitter::RelayEventEmitter;
use crate::error::{SyncError, SyncResult};
use crate::ledger::{LedgerAck, LedgerRejection, RemoteLedger};

/// 2025-01-10 09:00:00 UTC plus `secs`.
pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 10, 9, 0, 0).unwrap() + chrono::Duration::seconds(secs)
}

// =============================================================================
// Store
// =============================================================================

/// Store whose writes always fail.
pub struct FailingStore;

#[async_trait]
impl KeyValueStore for FailingStore {
    async fn get(&self, _key: &str) -> StoreResult<Option<String>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: &str) -> StoreResult<()> {
        Err(StoreError::Internal("disk full".into()))
    }
}

// =============================================================================
// Device Driver
// =============================================================================

#[derive(Default)]
pub struct FakeDriver {
    records: Mutex<Vec<AttendanceRecord>>,
    names: Mutex<HashMap<String, String>>,
    connect_script: Mutex<VecDeque<Result<ConnectionType, String>>>,
    connect_delays: Mutex<VecDeque<Duration>>,
    connect_calls: Mutex<Vec<Instant>>,
    link: Mutex<Option<mpsc::UnboundedSender<LinkEvent>>>,
    realtime: Mutex<Option<mpsc::Sender<serde_json::Value>>>,
    list_fails: AtomicBool,
    list_calls: AtomicUsize,
    disconnects: AtomicUsize,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_records(&self, records: Vec<AttendanceRecord>) {
        *self.records.lock().unwrap() = records;
    }

    pub fn push_record(&self, record: AttendanceRecord) {
        self.records.lock().unwrap().push(record);
    }

    pub fn set_name(&self, user_id: &str, name: &str) {
        self.names
            .lock()
            .unwrap()
            .insert(user_id.to_string(), name.to_string());
    }

    /// Queues connect results; once drained every connect succeeds over TCP.
    pub fn script_connects(&self, results: Vec<Result<ConnectionType, String>>) {
        self.connect_script.lock().unwrap().extend(results);
    }

    /// Makes the next handshakes take the given times, one per call.
    pub fn delay_connects(&self, delays: Vec<Duration>) {
        self.connect_delays.lock().unwrap().extend(delays);
    }

    pub fn fail_connects(&self, n: usize) {
        self.script_connects((0..n).map(|i| Err(format!("handshake failed #{}", i + 1))).collect());
    }

    pub fn set_list_fails(&self, fails: bool) {
        self.list_fails.store(fails, Ordering::SeqCst);
    }

    pub fn connect_calls(&self) -> Vec<Instant> {
        self.connect_calls.lock().unwrap().clone()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Reports a link event on the most recent connection.
    pub fn emit_link(&self, event: LinkEvent) -> bool {
        match self.link.lock().unwrap().as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Pushes a realtime punch on the most recent subscription.
    pub async fn push_realtime(&self, value: serde_json::Value) -> bool {
        let tx = self.realtime.lock().unwrap().clone();
        match tx {
            Some(tx) => tx.send(value).await.is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl DeviceDriver for FakeDriver {
    async fn connect(
        &self,
        _config: &DeviceConfig,
        link: mpsc::UnboundedSender<LinkEvent>,
    ) -> SyncResult<ConnectionType> {
        self.connect_calls.lock().unwrap().push(Instant::now());
        let delay = self.connect_delays.lock().unwrap().pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let next = self
            .connect_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(ConnectionType::Tcp));

        match next {
            Ok(kind) => {
                *self.link.lock().unwrap() = Some(link);
                Ok(kind)
            }
            Err(msg) => Err(SyncError::DeviceError(msg)),
        }
    }

    async fn disconnect(&self) -> SyncResult<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list_records(&self) -> SyncResult<Vec<AttendanceRecord>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.list_fails.load(Ordering::SeqCst) {
            return Err(SyncError::DeviceError("read timeout".into()));
        }
        Ok(self.records.lock().unwrap().clone())
    }

    async fn subscribe_realtime(&self, sink: mpsc::Sender<serde_json::Value>) -> SyncResult<()> {
        *self.realtime.lock().unwrap() = Some(sink);
        Ok(())
    }

    async fn lookup_user_name(&self, user_id: &str) -> SyncResult<Option<String>> {
        Ok(self.names.lock().unwrap().get(user_id).cloned())
    }
}

// =============================================================================
// Remote Ledger
// =============================================================================

#[derive(Default)]
pub struct FakeLedger {
    unknown_users: Mutex<HashSet<String>>,
    failing: AtomicBool,
    panicking: AtomicBool,
    delay: Mutex<Option<Duration>>,
    calls: Mutex<Vec<AttendancePayload>>,
}

impl FakeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger that answers USER_NOT_FOUND for the given users.
    pub fn rejecting(users: &[&str]) -> Self {
        let ledger = Self::default();
        ledger
            .unknown_users
            .lock()
            .unwrap()
            .extend(users.iter().map(|u| u.to_string()));
        ledger
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_panicking(&self, panicking: bool) {
        self.panicking.store(panicking, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> Vec<AttendancePayload> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// `att_time` of every call, in submission order.
    pub fn submitted_times(&self) -> Vec<String> {
        self.calls().into_iter().map(|p| p.att_time).collect()
    }
}

#[async_trait]
impl RemoteLedger for FakeLedger {
    async fn submit(&self, payload: &AttendancePayload) -> Result<LedgerAck, LedgerRejection> {
        self.calls.lock().unwrap().push(payload.clone());

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.panicking.load(Ordering::SeqCst) {
            panic!("ledger exploded");
        }
        if self.unknown_users.lock().unwrap().contains(&payload.user_id) {
            return Err(LedgerRejection::user_not_found(format!(
                "User ID {} not found in students or staffs",
                payload.user_id
            )));
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(LedgerRejection::api_error("HTTP 500"));
        }
        Ok(LedgerAck::default())
    }
}

// =============================================================================
// Emitter
// =============================================================================

#[derive(Default)]
pub struct RecordingEmitter {
    statuses: Mutex<Vec<DeviceStatus>>,
    attendance: Mutex<Vec<AttendanceEvent>>,
    summaries: Mutex<Vec<ReconcileSummary>>,
}

impl RecordingEmitter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn statuses(&self) -> Vec<DeviceStatus> {
        self.statuses.lock().unwrap().clone()
    }

    pub fn last_status(&self) -> Option<DeviceStatus> {
        self.statuses.lock().unwrap().last().cloned()
    }

    pub fn attendance(&self) -> Vec<AttendanceEvent> {
        self.attendance.lock().unwrap().clone()
    }

    pub fn summaries(&self) -> Vec<ReconcileSummary> {
        self.summaries.lock().unwrap().clone()
    }
}

impl RelayEventEmitter for RecordingEmitter {
    fn emit_device_status(&self, status: &DeviceStatus) {
        self.statuses.lock().unwrap().push(status.clone());
    }

    fn emit_attendance(&self, event: &AttendanceEvent) {
        self.attendance.lock().unwrap().push(event.clone());
    }

    fn emit_reconcile(&self, summary: &ReconcileSummary) {
        self.summaries.lock().unwrap().push(summary.clone());
    }
}
