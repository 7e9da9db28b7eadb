//! # Attendance Relay
//!
//! Facade that wires the engine together and exposes the operations a host
//! application needs.
//!
//! ## Relay Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        AttendanceRelay                                  │
//! │                                                                         │
//! │  KeyValueStore ──► device_config ──┐                                   │
//! │        │                            ▼                                   │
//! │        └──► InvalidUserRegistry   ConnectionManager ◄── DeviceDriver   │
//! │                     │               │       │                           │
//! │                     ▼               ▼       ▼                           │
//! │               RecordProcessor ◄── Poller  Reconciler                   │
//! │                     │                                                   │
//! │                     ▼                                                   │
//! │               RemoteLedger (HTTP)                                      │
//! │                                                                         │
//! │  NOTIFICATIONS (RelayEventEmitter):                                    │
//! │  ──────────────────────────────────                                    │
//! │  device status  - { connected, ip, type?, error? }                     │
//! │  attendance     - { student_id, in_time, date, ... }                   │
//! │  reconcile      - { synced, skipped, invalid, failed }                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! When `[device] enabled = false` the relay runs in virtual mode: it never
//! dials the terminal, but configuration, status and manual punches
//! ([`AttendanceRelay::submit_manual`]) still work.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use punchrelay_core::validation::normalize_device_config;
use punchrelay_core::{
    AttendanceRecord, ConnectionType, DeviceConfig, ProcessOutcome, ReconcileSummary, RecordSource,
    ValidationError,
};
use punchrelay_store::{load_json, save_json, Database, KeyValueStore, StoreConfig};

use crate::config::RelayConfig;
use crate::connection::{ConnectOutcome, ConnectionManager};
use crate::driver::DeviceDriver;
use crate::emitter::{NoOpEmitter, RelayEventEmitter};
use crate::error::{SyncError, SyncResult};
use crate::ledger::{HttpLedger, RemoteLedger};
use crate::processor::RecordProcessor;
use crate::registry::InvalidUserRegistry;
use crate::state::ConnectionPhase;

/// Store key of the device settings document.
pub const DEVICE_CONFIG_KEY: &str = "device_config";

// =============================================================================
// Relay Status
// =============================================================================

/// Snapshot of the relay for status queries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelayStatus {
    pub state: ConnectionPhase,
    pub is_connected: bool,
    pub device_ip: Option<String>,
    pub device_configured: bool,
    pub device_enabled: bool,
    pub connection_type: Option<ConnectionType>,
    pub reconnect_attempts: u32,
    /// True once the reconnect budget is exhausted.
    pub gave_up: bool,
    pub last_processed_time: Option<DateTime<Utc>>,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub synced_count: usize,
    pub invalid_user_count: usize,
}

// =============================================================================
// Attendance Relay
// =============================================================================

/// The attendance synchronization engine.
pub struct AttendanceRelay {
    config: Arc<RelayConfig>,
    store: Arc<dyn KeyValueStore>,
    driver: Arc<dyn DeviceDriver>,
    processor: Arc<RecordProcessor>,
    connection: Arc<ConnectionManager>,
}

impl AttendanceRelay {
    pub fn builder() -> AttendanceRelayBuilder {
        AttendanceRelayBuilder::default()
    }

    /// Starts the status heartbeat and connects to the terminal unless the
    /// device link is disabled.
    ///
    /// Returns `None` in virtual mode.
    pub async fn start(&self) -> Option<ConnectOutcome> {
        if let Some(interval) = self.config.status_interval() {
            self.connection.start_status_heartbeat(interval);
        }
        if !self.config.device.enabled {
            info!("Device link disabled, running in virtual mode");
            return None;
        }
        Some(self.connection.connect().await)
    }

    /// Cancels every timer and closes the device link.
    pub async fn shutdown(&self) {
        self.connection.stop_status_heartbeat();
        self.connection.disconnect().await;
        info!("Attendance relay stopped");
    }

    /// Current status snapshot.
    pub async fn status(&self) -> RelayStatus {
        let state = self.connection.view().snapshot().await;
        let device = self.connection.device_config().await;

        RelayStatus {
            state: state.phase,
            is_connected: state.is_connected(),
            device_configured: device.is_configured(),
            device_ip: device.ip,
            device_enabled: self.config.device.enabled,
            connection_type: state.connection_type,
            reconnect_attempts: state.reconnect_attempts,
            gave_up: state.gave_up,
            last_processed_time: self.processor.cursor().get(),
            last_sync_time: self.processor.last_sync_time(),
            synced_count: self.processor.synced().len(),
            invalid_user_count: self.processor.registry().len(),
        }
    }

    /// Current device settings.
    pub async fn device_config(&self) -> DeviceConfig {
        self.connection.device_config().await
    }

    /// Validates, persists and applies new device settings.
    ///
    /// The link is torn down and, after the reconfigure delay, reopened
    /// with the new settings when the device link is enabled.
    pub async fn update_device_config(&self, config: DeviceConfig) -> SyncResult<DeviceConfig> {
        let config = normalize_device_config(config)?;
        save_json(self.store.as_ref(), DEVICE_CONFIG_KEY, &config).await?;
        info!(ip = ?config.ip, port = config.port, "Device configuration updated");

        self.connection.disconnect().await;
        self.connection.set_device_config(config.clone()).await;

        if self.config.device.enabled {
            tokio::time::sleep(self.config.reconfigure_delay()).await;
            self.connection.connect().await;
        }

        Ok(config)
    }

    /// Submits an operator-entered punch.
    ///
    /// Goes through the same blacklist and dedup checks as terminal records
    /// and is accepted in virtual mode too. Without a name the user id is
    /// sent as the display name.
    pub async fn submit_manual(
        &self,
        user_id: &str,
        at: DateTime<Utc>,
        user_name: Option<&str>,
    ) -> SyncResult<ProcessOutcome> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(ValidationError::required("user_id").into());
        }

        let name = user_name.map(str::trim).filter(|n| !n.is_empty()).unwrap_or(user_id);
        let mut record = AttendanceRecord::new(user_id, at).with_user_name(name);
        if let Some(ip) = self.connection.device_config().await.ip {
            record = record.with_device_id(ip);
        }

        info!(%user_id, %at, "Submitting manual attendance");
        Ok(self.processor.process(&record, RecordSource::Manual).await)
    }

    /// Runs one reconciliation pass now.
    pub async fn reconcile_now(&self) -> SyncResult<ReconcileSummary> {
        self.ensure_connected().await?;
        Ok(self.connection.reconciler().reconcile().await)
    }

    /// Every record stored on the terminal.
    pub async fn device_records(&self) -> SyncResult<Vec<AttendanceRecord>> {
        self.ensure_connected().await?;
        self.driver.list_records().await
    }

    pub fn processor(&self) -> &Arc<RecordProcessor> {
        &self.processor
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    async fn ensure_connected(&self) -> SyncResult<()> {
        if !self.config.device.enabled {
            return Err(SyncError::DeviceDisabled);
        }
        if !self.connection.device_config().await.is_configured() {
            return Err(SyncError::NotConfigured);
        }
        if !self.connection.view().is_connected().await {
            return Err(SyncError::NotConnected);
        }
        Ok(())
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`AttendanceRelay`].
///
/// Only the device driver is mandatory. Without a store the SQLite database
/// at [`RelayConfig::database_path`] is opened; without a ledger an
/// [`HttpLedger`] is built from the configuration.
#[derive(Default)]
pub struct AttendanceRelayBuilder {
    config: Option<RelayConfig>,
    store: Option<Arc<dyn KeyValueStore>>,
    driver: Option<Arc<dyn DeviceDriver>>,
    ledger: Option<Arc<dyn RemoteLedger>>,
    emitter: Option<Arc<dyn RelayEventEmitter>>,
}

impl AttendanceRelayBuilder {
    pub fn config(mut self, config: RelayConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn driver(mut self, driver: Arc<dyn DeviceDriver>) -> Self {
        self.driver = Some(driver);
        self
    }

    pub fn ledger(mut self, ledger: Arc<dyn RemoteLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn emitter(mut self, emitter: Arc<dyn RelayEventEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    pub async fn build(self) -> SyncResult<AttendanceRelay> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let driver = self
            .driver
            .ok_or_else(|| SyncError::InvalidConfig("a device driver is required".into()))?;

        let store: Arc<dyn KeyValueStore> = match self.store {
            Some(store) => store,
            None => Arc::new(Database::open(StoreConfig::new(config.database_path())).await?),
        };

        let ledger: Arc<dyn RemoteLedger> = match self.ledger {
            Some(ledger) => ledger,
            None => Arc::new(HttpLedger::from_config(&config)?),
        };

        let emitter = self.emitter.unwrap_or_else(|| Arc::new(NoOpEmitter));

        let registry = Arc::new(InvalidUserRegistry::load(store.clone()).await);
        let device = load_device_config(store.as_ref()).await;

        let processor = Arc::new(RecordProcessor::new(
            registry,
            driver.clone(),
            ledger,
            emitter.clone(),
            config.terminal_profile(),
        ));
        let connection = ConnectionManager::new(&config, device, driver.clone(), processor.clone(), emitter);

        Ok(AttendanceRelay {
            config: Arc::new(config),
            store,
            driver,
            processor,
            connection,
        })
    }
}

/// Loads the saved device settings, falling back to defaults.
async fn load_device_config(store: &dyn KeyValueStore) -> DeviceConfig {
    match load_json::<DeviceConfig>(store, DEVICE_CONFIG_KEY).await {
        Ok(Some(config)) => {
            info!(ip = ?config.ip, port = config.port, "Loaded device configuration");
            config
        }
        Ok(None) => DeviceConfig::default(),
        Err(e) => {
            warn!(error = %e, "Device configuration unreadable, using defaults");
            DeviceConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{at, FakeDriver, FakeLedger, RecordingEmitter};
    use punchrelay_core::{DeviceStatus, FailureReason, SkipReason};
    use punchrelay_store::MemoryStore;
    use std::time::Duration;

    fn enabled_config() -> RelayConfig {
        let mut config = RelayConfig::default();
        config.device.enabled = true;
        config.device.probe_reachability = false;
        config.sync.replay_delay_ms = 0;
        config
    }

    async fn relay(
        config: RelayConfig,
        store: Arc<MemoryStore>,
        driver: Arc<FakeDriver>,
        ledger: Arc<FakeLedger>,
    ) -> AttendanceRelay {
        AttendanceRelay::builder()
            .config(config)
            .store(store)
            .driver(driver)
            .ledger(ledger)
            .build()
            .await
            .unwrap()
    }

    fn saved_device(ip: &str) -> Arc<MemoryStore> {
        let doc = serde_json::to_string(&DeviceConfig::for_ip(ip)).unwrap();
        Arc::new(MemoryStore::with_entries([(DEVICE_CONFIG_KEY, doc.as_str())]))
    }

    #[tokio::test]
    async fn test_builder_requires_driver() {
        let result = AttendanceRelay::builder()
            .store(Arc::new(MemoryStore::new()))
            .ledger(Arc::new(FakeLedger::new()))
            .build()
            .await;
        assert!(matches!(result, Err(SyncError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_virtual_mode_never_dials() {
        let driver = Arc::new(FakeDriver::new());
        let relay = relay(
            RelayConfig::default(),
            saved_device("10.0.0.5"),
            driver.clone(),
            Arc::new(FakeLedger::new()),
        )
        .await;

        assert_eq!(relay.start().await, None);
        assert!(driver.connect_calls().is_empty());

        let status = relay.status().await;
        assert!(!status.device_enabled);
        assert!(status.device_configured);
        assert!(matches!(relay.device_records().await, Err(SyncError::DeviceDisabled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_uses_saved_device_config() {
        let driver = Arc::new(FakeDriver::new());
        driver.set_records(vec![AttendanceRecord::new("1", at(0))]);
        let relay = relay(
            enabled_config(),
            saved_device("10.0.0.5"),
            driver.clone(),
            Arc::new(FakeLedger::new()),
        )
        .await;

        assert_eq!(relay.start().await, Some(ConnectOutcome::Connected(ConnectionType::Tcp)));
        assert_eq!(relay.device_config().await.ip.as_deref(), Some("10.0.0.5"));
        assert_eq!(relay.device_records().await.unwrap().len(), 1);

        tokio::time::sleep(Duration::from_millis(2100)).await;
        let status = relay.status().await;
        assert!(status.is_connected);
        assert_eq!(status.state, ConnectionPhase::Connected);
        assert_eq!(status.connection_type, Some(ConnectionType::Tcp));
        assert_eq!(status.synced_count, 1);
        assert_eq!(status.last_processed_time, Some(at(0)));
        assert!(status.last_sync_time.is_some());

        relay.shutdown().await;
        assert!(!relay.status().await.is_connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_device_config_persists_and_reconnects() {
        let store = Arc::new(MemoryStore::new());
        let driver = Arc::new(FakeDriver::new());
        let relay = relay(enabled_config(), store.clone(), driver.clone(), Arc::new(FakeLedger::new())).await;

        assert_eq!(relay.start().await, Some(ConnectOutcome::NotConfigured));

        let mut update = DeviceConfig::for_ip(" 192.168.1.201 ");
        update.port = 0;
        let applied = relay.update_device_config(update).await.unwrap();

        assert_eq!(applied.ip.as_deref(), Some("192.168.1.201"));
        assert_eq!(applied.port, 4370);
        let saved: DeviceConfig = load_json(store.as_ref(), DEVICE_CONFIG_KEY).await.unwrap().unwrap();
        assert_eq!(saved, applied);
        assert_eq!(driver.connect_calls().len(), 1);
        assert!(relay.status().await.is_connected);
    }

    #[tokio::test]
    async fn test_update_rejects_blank_ip() {
        let store = Arc::new(MemoryStore::new());
        let relay = relay(
            RelayConfig::default(),
            store.clone(),
            Arc::new(FakeDriver::new()),
            Arc::new(FakeLedger::new()),
        )
        .await;

        let err = relay.update_device_config(DeviceConfig::for_ip("   ")).await.unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
        assert!(store.get(DEVICE_CONFIG_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_device_records_requires_connection() {
        let unconfigured = relay(
            enabled_config(),
            Arc::new(MemoryStore::new()),
            Arc::new(FakeDriver::new()),
            Arc::new(FakeLedger::new()),
        )
        .await;
        assert!(matches!(unconfigured.device_records().await, Err(SyncError::NotConfigured)));

        let idle = relay(
            enabled_config(),
            saved_device("10.0.0.5"),
            Arc::new(FakeDriver::new()),
            Arc::new(FakeLedger::new()),
        )
        .await;
        assert!(matches!(idle.device_records().await, Err(SyncError::NotConnected)));
        assert!(matches!(idle.reconcile_now().await, Err(SyncError::NotConnected)));
    }

    async fn virtual_relay(ledger: Arc<FakeLedger>) -> (AttendanceRelay, Arc<FakeDriver>, Arc<RecordingEmitter>) {
        let driver = Arc::new(FakeDriver::new());
        let emitter = RecordingEmitter::new();
        let relay = AttendanceRelay::builder()
            .config(RelayConfig::default())
            .store(saved_device("10.0.0.5"))
            .driver(driver.clone())
            .ledger(ledger)
            .emitter(emitter.clone())
            .build()
            .await
            .unwrap();
        (relay, driver, emitter)
    }

    #[tokio::test]
    async fn test_manual_punch_in_virtual_mode() {
        let ledger = Arc::new(FakeLedger::new());
        let (relay, driver, emitter) = virtual_relay(ledger.clone()).await;
        assert_eq!(relay.start().await, None);

        let outcome = relay.submit_manual(" 2025004 ", at(0), Some("Rahim")).await.unwrap();
        assert_eq!(outcome, ProcessOutcome::Synced);

        let calls = ledger.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].user_id, "2025004");
        assert_eq!(calls[0].user_name, "Rahim");
        assert_eq!(emitter.attendance().len(), 1);
        assert!(driver.connect_calls().is_empty());

        let again = relay.submit_manual("2025004", at(0), None).await.unwrap();
        assert_eq!(again, ProcessOutcome::skipped(SkipReason::AlreadySynced));
        assert_eq!(relay.status().await.last_processed_time, None);
        relay.shutdown().await;
    }

    #[tokio::test]
    async fn test_manual_punch_for_unknown_user() {
        let ledger = Arc::new(FakeLedger::rejecting(&["ghost"]));
        let (relay, _driver, emitter) = virtual_relay(ledger.clone()).await;

        let first = relay.submit_manual("ghost", at(0), None).await.unwrap();
        assert_eq!(first, ProcessOutcome::failed(FailureReason::UserNotFound));
        assert_eq!(ledger.calls()[0].user_name, "ghost");

        let second = relay.submit_manual("ghost", at(60), None).await.unwrap();
        assert_eq!(second, ProcessOutcome::skipped(SkipReason::InvalidUser));
        assert_eq!(ledger.call_count(), 1);
        assert_eq!(relay.status().await.invalid_user_count, 1);
        assert!(emitter.attendance().is_empty());
    }

    #[tokio::test]
    async fn test_manual_punch_requires_user() {
        let ledger = Arc::new(FakeLedger::new());
        let (relay, _driver, _emitter) = virtual_relay(ledger.clone()).await;

        let err = relay.submit_manual("  ", at(0), None).await.unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
        assert_eq!(ledger.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_heartbeat_runs_until_shutdown() {
        let (relay, _driver, emitter) = virtual_relay(Arc::new(FakeLedger::new())).await;
        relay.start().await;

        tokio::time::sleep(Duration::from_millis(10_100)).await;
        let expected = DeviceStatus::disconnected(Some("10.0.0.5".into()), "Not connected");
        assert_eq!(emitter.statuses(), vec![expected.clone(), expected]);

        relay.shutdown().await;
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(emitter.statuses().len(), 2);
    }

    #[tokio::test]
    async fn test_blacklist_survives_relay_restart() {
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(FakeLedger::rejecting(&["ghost"]));

        let first = relay(RelayConfig::default(), store.clone(), Arc::new(FakeDriver::new()), ledger.clone()).await;
        first
            .processor()
            .process(&AttendanceRecord::new("ghost", at(0)), RecordSource::Realtime)
            .await;
        assert_eq!(ledger.call_count(), 1);

        let second = relay(RelayConfig::default(), store, Arc::new(FakeDriver::new()), ledger.clone()).await;
        let outcome = second
            .processor()
            .process(&AttendanceRecord::new("ghost", at(60)), RecordSource::Realtime)
            .await;

        assert_eq!(outcome, ProcessOutcome::skipped(SkipReason::InvalidUser));
        assert_eq!(ledger.call_count(), 1);
        assert_eq!(second.status().await.invalid_user_count, 1);
    }

    #[tokio::test]
    async fn test_corrupt_device_config_falls_back_to_default() {
        let store = Arc::new(MemoryStore::with_entries([(DEVICE_CONFIG_KEY, "not json")]));
        let emitter = RecordingEmitter::new();
        let relay = AttendanceRelay::builder()
            .config(enabled_config())
            .store(store)
            .driver(Arc::new(FakeDriver::new()))
            .ledger(Arc::new(FakeLedger::new()))
            .emitter(emitter.clone())
            .build()
            .await
            .unwrap();

        assert_eq!(relay.device_config().await, DeviceConfig::default());
        assert_eq!(relay.start().await, Some(ConnectOutcome::NotConfigured));
        assert_eq!(emitter.statuses(), vec![DeviceStatus::not_configured()]);
    }
}
