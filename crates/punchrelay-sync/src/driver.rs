//! # Device Driver Seam
//!
//! The terminal's binary protocol lives outside this crate. The engine talks
//! to it only through [`DeviceDriver`].
//!
//! ## Link Events
//! ```text
//! ┌──────────────┐  connect(config, link_tx)  ┌──────────────────────────┐
//! │ Connection   │ ─────────────────────────► │ DeviceDriver             │
//! │ Manager      │                            │                          │
//! │              │ ◄───── LinkEvent::Error ── │ socket error             │
//! │              │ ◄───── LinkEvent::Closed ─ │ peer closed              │
//! │              │                            │                          │
//! │              │  subscribe_realtime(tx)    │                          │
//! │              │ ─────────────────────────► │                          │
//! │              │ ◄──── serde_json::Value ── │ punch pushed by terminal │
//! └──────────────┘                            └──────────────────────────┘
//! ```
//!
//! Realtime pushes are raw JSON because firmware versions disagree on field
//! names; [`punchrelay_core::realtime::normalize_realtime`] folds them into
//! records.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::debug;

use punchrelay_core::{AttendanceRecord, ConnectionType, DeviceConfig};

use crate::error::{SyncError, SyncResult};

/// Asynchronous notification from a live device link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The link failed.
    Error(String),
    /// The peer closed the link.
    Closed,
}

impl LinkEvent {
    /// Message reported on the status notification.
    pub fn message(&self) -> &str {
        match self {
            LinkEvent::Error(msg) => msg,
            LinkEvent::Closed => "Connection closed",
        }
    }
}

/// Capability to talk to the biometric terminal.
///
/// Every method may fail; the engine logs failures and never lets them
/// escape a timer or callback.
#[async_trait]
pub trait DeviceDriver: Send + Sync {
    /// Performs the device handshake.
    ///
    /// Link errors and closes after a successful connect are reported on
    /// `link`. Returns the transport the driver settled on.
    async fn connect(
        &self,
        config: &DeviceConfig,
        link: mpsc::UnboundedSender<LinkEvent>,
    ) -> SyncResult<ConnectionType>;

    /// Closes the current link.
    ///
    /// The engine never calls this for a handshake it abandoned while a
    /// newer connect was already running, so implementations may close
    /// whatever link they hold.
    async fn disconnect(&self) -> SyncResult<()>;

    /// Lists every attendance record stored on the terminal.
    async fn list_records(&self) -> SyncResult<Vec<AttendanceRecord>>;

    /// Starts forwarding realtime pushes to `sink`.
    ///
    /// `sink` is bounded and drains at the pace of the remote API. Deliver
    /// with `sink.send(..).await`; `try_send` loses punches whenever a
    /// submission is slow.
    async fn subscribe_realtime(&self, sink: mpsc::Sender<serde_json::Value>) -> SyncResult<()>;

    /// Looks up a user's display name on the terminal.
    async fn lookup_user_name(&self, user_id: &str) -> SyncResult<Option<String>>;
}

/// Opens and drops a plain TCP connection to `address`.
///
/// Fails with [`SyncError::Timeout`] when nothing answers within `timeout`.
pub async fn probe_reachability(address: &str, timeout: Duration) -> SyncResult<()> {
    match tokio::time::timeout(timeout, TcpStream::connect(address)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => {
            debug!(%address, error = %e, "Reachability probe failed");
            Err(SyncError::DeviceError(format!("{} unreachable: {}", address, e)))
        }
        Err(_) => {
            debug!(%address, ?timeout, "Reachability probe timed out");
            Err(SyncError::Timeout(timeout.as_millis() as u64))
        }
    }
}
