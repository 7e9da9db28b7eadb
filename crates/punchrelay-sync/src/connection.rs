//! # Connection Manager
//!
//! Owns the device link: the connection state machine, the reconnect
//! policy and the realtime subscription.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  connect()                                                             │
//! │    ├── Connecting/Connected? ─────────────────────► AlreadyActive      │
//! │    ├── no IP? ──► emit "Device IP not configured" ► NotConfigured      │
//! │    ├── probe (warn only)                                               │
//! │    └── driver.connect                                                  │
//! │          ├── ok ──► Connected, attempts = 0, emit connected            │
//! │          │           ├── link watcher   (error/close ─► link lost)     │
//! │          │           ├── realtime pump  (push ─► RecordProcessor)      │
//! │          │           └── settle delay ─► seed cursor ─► reconcile      │
//! │          │                              ─► start poll + sync timers    │
//! │          └── err ─► Disconnected, emit error ─► schedule_reconnect()   │
//! │                                                                         │
//! │  link lost ─► Disconnected, stop timers, emit ─► schedule_reconnect()  │
//! │                                                                         │
//! │  schedule_reconnect()                                                  │
//! │    attempts < max ─► attempts += 1, connect() after base·2^(n-1)       │
//! │    attempts = max ─► gave up, emit "Max reconnection attempts reached" │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Sessions
//!
//! Every connect attempt and every teardown bumps the session epoch. Link
//! events, realtime pushes and initialization work carry the epoch they
//! were started under and do nothing once it is stale.

use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use chrono::Utc;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use punchrelay_core::realtime::normalize_realtime;
use punchrelay_core::{ConnectionType, DeviceConfig, DeviceStatus, RecordSource};

use crate::config::RelayConfig;
use crate::driver::{probe_reachability, DeviceDriver, LinkEvent};
use crate::emitter::RelayEventEmitter;
use crate::poller::IncrementalPoller;
use crate::processor::RecordProcessor;
use crate::reconciler::OfflineReconciler;
use crate::scheduler::Scheduler;
use crate::state::{ConnectionPhase, ConnectionState, StateView};

/// Status message once the reconnect budget is spent.
pub const GAVE_UP_MESSAGE: &str = "Max reconnection attempts reached";

/// Buffered realtime pushes per session. The pump drains at the pace of
/// the remote API, so a driver awaiting `send` is held back instead of
/// losing punches.
const REALTIME_BUFFER: usize = 64;

/// Heartbeat error text while the link is down.
const NOT_CONNECTED_MESSAGE: &str = "Not connected";

// =============================================================================
// Reconnect Policy
// =============================================================================

/// Exponential reconnect backoff with a hard attempt cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(base_delay: Duration, max_attempts: u32) -> Self {
        ReconnectPolicy {
            base_delay,
            max_attempts,
        }
    }

    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(
            Duration::from_millis(config.sync.reconnect_base_delay_ms),
            config.sync.max_reconnect_attempts,
        )
    }

    /// Delay before reconnect attempt `n` (1-based): `base * 2^(n-1)`.
    ///
    /// `None` once `n` exceeds the cap.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let factor = 1u32.checked_shl(attempt - 1)?;
        self.base_delay.checked_mul(factor)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(5000), 3)
    }
}

/// Link timings taken from the relay configuration.
#[derive(Debug, Clone, Copy)]
struct LinkTimings {
    probe: bool,
    probe_timeout: Duration,
    settle_delay: Duration,
    poll_interval: Duration,
    sync_interval: Duration,
}

impl LinkTimings {
    fn from_config(config: &RelayConfig) -> Self {
        LinkTimings {
            probe: config.device.probe_reachability,
            probe_timeout: config.probe_timeout(),
            settle_delay: config.settle_delay(),
            poll_interval: config.poll_interval(),
            sync_interval: config.sync_interval(),
        }
    }
}

/// Result of [`ConnectionManager::connect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// A connect is in progress or the link is already up.
    AlreadyActive,
    /// No device IP is configured.
    NotConfigured,
    Connected(ConnectionType),
    /// The handshake failed; a reconnect may be scheduled.
    Failed(String),
    /// A teardown happened while the handshake was running.
    Superseded,
}

// =============================================================================
// Connection Manager
// =============================================================================

/// Owner of the device link.
pub struct ConnectionManager {
    state: Arc<RwLock<ConnectionState>>,
    device: RwLock<DeviceConfig>,
    driver: Arc<dyn DeviceDriver>,
    processor: Arc<RecordProcessor>,
    reconciler: Arc<OfflineReconciler>,
    poller: Arc<IncrementalPoller>,
    emitter: Arc<dyn RelayEventEmitter>,
    scheduler: Scheduler,
    policy: ReconnectPolicy,
    timings: LinkTimings,
    listeners: Mutex<Vec<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(
        config: &RelayConfig,
        device: DeviceConfig,
        driver: Arc<dyn DeviceDriver>,
        processor: Arc<RecordProcessor>,
        emitter: Arc<dyn RelayEventEmitter>,
    ) -> Arc<Self> {
        let state = Arc::new(RwLock::new(ConnectionState::default()));
        let view = StateView::new(state.clone());

        let reconciler = Arc::new(OfflineReconciler::new(
            processor.clone(),
            driver.clone(),
            emitter.clone(),
            view.clone(),
            config.replay_delay(),
        ));
        let poller = Arc::new(IncrementalPoller::new(processor.clone(), driver.clone(), view));

        Arc::new(ConnectionManager {
            state,
            device: RwLock::new(device),
            driver,
            processor,
            reconciler,
            poller,
            emitter,
            scheduler: Scheduler::new(),
            policy: ReconnectPolicy::from_config(config),
            timings: LinkTimings::from_config(config),
            listeners: Mutex::new(Vec::new()),
        })
    }

    /// Opens the device link. A no-op while a link is up or being opened.
    pub async fn connect(self: &Arc<Self>) -> ConnectOutcome {
        let config = self.device.read().await.clone();

        let epoch = {
            let mut state = self.state.write().await;
            if state.phase != ConnectionPhase::Disconnected {
                debug!(phase = %state.phase, "Connect ignored, link already active");
                return ConnectOutcome::AlreadyActive;
            }
            if !config.is_configured() {
                None
            } else {
                state.phase = ConnectionPhase::Connecting;
                state.epoch += 1;
                Some(state.epoch)
            }
        };

        let Some(epoch) = epoch else {
            warn!("Device IP not configured");
            self.emitter.emit_device_status(&DeviceStatus::not_configured());
            return ConnectOutcome::NotConfigured;
        };

        if self.timings.probe {
            if let Some(address) = config.address() {
                if let Err(e) = probe_reachability(&address, self.timings.probe_timeout).await {
                    warn!(%address, error = %e, "Device not reachable, attempting handshake anyway");
                }
            }
        }

        info!(ip = ?config.ip, port = config.port, "Connecting to device");
        let (link_tx, link_rx) = mpsc::unbounded_channel();

        match self.driver.connect(&config, link_tx).await {
            Ok(kind) => {
                {
                    let mut state = self.state.write().await;
                    if state.epoch != epoch || state.phase != ConnectionPhase::Connecting {
                        if state.phase == ConnectionPhase::Disconnected {
                            // Lock held so no newer session can open while the
                            // abandoned link is closed.
                            debug!(epoch, "Connect superseded by teardown, closing its link");
                            if let Err(e) = self.driver.disconnect().await {
                                debug!(error = %e, "Disconnect after superseded connect failed");
                            }
                        } else {
                            debug!(
                                epoch,
                                current = state.epoch,
                                phase = %state.phase,
                                "Connect superseded by a newer session, leaving the driver alone"
                            );
                        }
                        return ConnectOutcome::Superseded;
                    }
                    state.phase = ConnectionPhase::Connected;
                    state.reconnect_attempts = 0;
                    state.connection_type = Some(kind);
                    state.gave_up = false;
                    state.last_error = None;
                }

                info!(ip = ?config.ip, connection_type = %kind, "Device connected");
                self.emitter
                    .emit_device_status(&DeviceStatus::connected(config.ip.clone(), kind));

                self.start_listeners(epoch, link_rx).await;
                self.schedule_initialization(epoch);
                ConnectOutcome::Connected(kind)
            }
            Err(e) => {
                let message = e.to_string();
                {
                    let mut state = self.state.write().await;
                    if state.epoch != epoch {
                        return ConnectOutcome::Superseded;
                    }
                    state.phase = ConnectionPhase::Disconnected;
                    state.connection_type = None;
                    state.last_error = Some(message.clone());
                }

                error!(ip = ?config.ip, error = %message, "Device connection failed");
                self.emitter
                    .emit_device_status(&DeviceStatus::disconnected(config.ip.clone(), message.clone()));
                self.schedule_reconnect().await;
                ConnectOutcome::Failed(message)
            }
        }
    }

    /// Tears the link down without scheduling a reconnect.
    pub async fn disconnect(&self) {
        self.scheduler.cancel_all();
        self.stop_listeners();

        let was_connected = {
            let mut state = self.state.write().await;
            let was_connected = state.is_connected();
            state.epoch += 1;
            state.phase = ConnectionPhase::Disconnected;
            state.connection_type = None;
            state.reconnect_attempts = 0;
            state.gave_up = false;
            was_connected
        };

        if let Err(e) = self.driver.disconnect().await {
            warn!(error = %e, "Device disconnect failed");
        }
        if was_connected {
            info!("Device disconnected");
        }
    }

    /// Device status as the periodic heartbeat reports it.
    pub async fn current_status(&self) -> DeviceStatus {
        let device = self.device.read().await.clone();
        let link = self.state.read().await.connection_type;
        match link {
            Some(kind) => DeviceStatus::connected(device.ip, kind),
            None if !device.is_configured() => DeviceStatus::not_configured(),
            None => DeviceStatus::disconnected(device.ip, NOT_CONNECTED_MESSAGE),
        }
    }

    /// Rebroadcasts [`current_status`](Self::current_status) every `interval`
    /// until [`stop_status_heartbeat`](Self::stop_status_heartbeat).
    pub fn start_status_heartbeat(self: &Arc<Self>, interval: Duration) {
        let weak = Arc::downgrade(self);
        self.scheduler.start_heartbeat(interval, move || {
            let weak = weak.clone();
            async move {
                if let Some(manager) = weak.upgrade() {
                    let status = manager.current_status().await;
                    manager.emitter.emit_device_status(&status);
                }
            }
        });
    }

    pub fn stop_status_heartbeat(&self) {
        self.scheduler.stop_heartbeat();
    }

    /// Replaces the device settings used by the next connect.
    pub async fn set_device_config(&self, config: DeviceConfig) {
        *self.device.write().await = config;
    }

    pub async fn device_config(&self) -> DeviceConfig {
        self.device.read().await.clone()
    }

    pub fn view(&self) -> StateView {
        StateView::new(self.state.clone())
    }

    pub fn reconciler(&self) -> &Arc<OfflineReconciler> {
        &self.reconciler
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.policy
    }

    // =========================================================================
    // Link Loss and Reconnect
    // =========================================================================

    async fn on_link_lost(self: &Arc<Self>, epoch: u64, event: LinkEvent) {
        {
            let mut state = self.state.write().await;
            if state.epoch != epoch || !state.is_connected() {
                debug!(epoch, "Ignoring link event from stale session");
                return;
            }
            state.phase = ConnectionPhase::Disconnected;
            state.connection_type = None;
            state.last_error = Some(event.message().to_string());
        }

        self.scheduler.stop_link_timers();

        let ip = self.device.read().await.ip.clone();
        match &event {
            LinkEvent::Error(msg) => error!(error = %msg, "Device link error"),
            LinkEvent::Closed => warn!("Device connection closed"),
        }
        self.emitter
            .emit_device_status(&DeviceStatus::disconnected(ip, event.message()));
        self.schedule_reconnect().await;
    }

    async fn schedule_reconnect(self: &Arc<Self>) {
        let next = {
            let mut state = self.state.write().await;
            if state.reconnect_attempts >= self.policy.max_attempts {
                state.gave_up = true;
                None
            } else {
                state.reconnect_attempts += 1;
                Some(state.reconnect_attempts)
            }
        };

        let Some((attempt, delay)) =
            next.and_then(|n| self.policy.delay_for_attempt(n).map(|delay| (n, delay)))
        else {
            error!(max_attempts = self.policy.max_attempts, "{}", GAVE_UP_MESSAGE);
            let ip = self.device.read().await.ip.clone();
            self.emitter
                .emit_device_status(&DeviceStatus::disconnected(ip, GAVE_UP_MESSAGE));
            return;
        };

        info!(
            attempt,
            max_attempts = self.policy.max_attempts,
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnect"
        );
        self.scheduler
            .schedule_reconnect(delay, reconnect_task(Arc::downgrade(self)));
    }

    // =========================================================================
    // Session Tasks
    // =========================================================================

    async fn start_listeners(self: &Arc<Self>, epoch: u64, mut link_rx: mpsc::UnboundedReceiver<LinkEvent>) {
        let (realtime_tx, mut realtime_rx) = mpsc::channel(REALTIME_BUFFER);
        if let Err(e) = self.driver.subscribe_realtime(realtime_tx).await {
            warn!(error = %e, "Realtime subscription failed, relying on polling");
        }

        let weak = Arc::downgrade(self);
        let link_watcher = tokio::spawn(async move {
            while let Some(event) = link_rx.recv().await {
                let Some(manager) = weak.upgrade() else { break };
                manager.on_link_lost(epoch, event).await;
            }
        });

        let processor = self.processor.clone();
        let view = self.view();
        let realtime_pump = tokio::spawn(async move {
            while let Some(raw) = realtime_rx.recv().await {
                if !view.is_current(epoch).await {
                    debug!("Dropping realtime push from stale session");
                    continue;
                }
                if raw.is_null() {
                    warn!("Ignoring empty realtime payload");
                    continue;
                }
                match normalize_realtime(&raw, Utc::now()) {
                    Ok(punch) => {
                        if punch.stamped_now {
                            warn!("Realtime record without timestamp, using current time");
                        }
                        let outcome = processor.process(&punch.record, RecordSource::Realtime).await;
                        debug!(%outcome, "Realtime record processed");
                    }
                    Err(e) => error!(error = %e, payload = %raw, "Dropping realtime record"),
                }
            }
        });

        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        for old in listeners.drain(..) {
            old.abort();
        }
        listeners.push(link_watcher);
        listeners.push(realtime_pump);
    }

    fn stop_listeners(&self) {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        for handle in listeners.drain(..) {
            handle.abort();
        }
    }

    fn schedule_initialization(self: &Arc<Self>, epoch: u64) {
        let weak = Arc::downgrade(self);
        self.scheduler.schedule_settle(self.timings.settle_delay, async move {
            if let Some(manager) = weak.upgrade() {
                manager.initialize(epoch).await;
            }
        });
    }

    /// Post-connect catch-up: seed the cursor, reconcile, start timers.
    async fn initialize(self: &Arc<Self>, epoch: u64) {
        let view = self.view();
        if !view.is_current(epoch).await {
            return;
        }

        match self.driver.list_records().await {
            Ok(records) => {
                if let Some(newest) = records.iter().filter_map(|r| r.record_time).max() {
                    self.processor.cursor().advance(newest);
                }
                info!(
                    count = records.len(),
                    cursor = ?self.processor.cursor().get(),
                    "Seeded processed cursor from device records"
                );
            }
            Err(e) => warn!(error = %e, "Failed to read initial records"),
        }

        self.reconciler.reconcile().await;

        if !view.is_current(epoch).await {
            return;
        }
        self.scheduler
            .start_periodic_sync(self.reconciler.clone(), self.timings.sync_interval);
        self.scheduler
            .start_polling(self.poller.clone(), self.timings.poll_interval);
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.stop_listeners();
    }
}

/// The reconnect timer body, boxed so `connect` can schedule itself.
fn reconnect_task(manager: Weak<ConnectionManager>) -> BoxFuture<'static, ()> {
    async move {
        if let Some(manager) = manager.upgrade() {
            manager.connect().await;
        }
    }
    .boxed()
}
