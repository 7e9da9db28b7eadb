//! # Domain Types
//!
//! Core types used throughout PunchRelay.
//!
//! ## Type Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌──────────────────┐   ┌──────────────────┐   ┌──────────────────┐    │
//! │  │ AttendanceRecord │   │     SyncKey      │   │   DeviceConfig   │    │
//! │  │ ──────────────── │   │ ──────────────── │   │ ──────────────── │    │
//! │  │ device_user_id   │──►│ user|date|time   │   │ ip               │    │
//! │  │ record_time      │   │ dedup identity   │   │ port (4370)      │    │
//! │  │ user_name        │   └──────────────────┘   │ timeout (5200)   │    │
//! │  │ device_id        │                          │ udp_port (5000)  │    │
//! │  └──────────────────┘                          └──────────────────┘    │
//! │                                                                         │
//! │  ┌──────────────────┐   ┌──────────────────┐                           │
//! │  │  RecordSource    │   │  ConnectionType  │                           │
//! │  │  realtime        │   │  tcp | udp       │                           │
//! │  │  polling         │   └──────────────────┘                           │
//! │  │  offline-sync    │                                                   │
//! │  │  manual          │                                                   │
//! │  └──────────────────┘                                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Attendance Record
// =============================================================================

/// A single punch as read from the terminal (realtime push or bulk list).
///
/// Records are immutable once read. Both `device_user_id` and
/// `record_time` are optional because the terminal occasionally reports
/// records without a user or with a timestamp that cannot be parsed; the
/// pipeline rejects those instead of guessing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    /// User id as enrolled on the terminal.
    pub device_user_id: Option<String>,

    /// When the punch happened. `None` when unparseable.
    pub record_time: Option<DateTime<Utc>>,

    /// Display name, if the terminal reported one.
    pub user_name: Option<String>,

    /// Terminal identifier (usually its IP).
    pub device_id: Option<String>,
}

impl AttendanceRecord {
    /// Creates a record for a user punching at `at`.
    pub fn new(user_id: impl Into<String>, at: DateTime<Utc>) -> Self {
        AttendanceRecord {
            device_user_id: Some(user_id.into()),
            record_time: Some(at),
            user_name: None,
            device_id: None,
        }
    }

    /// Sets the display name.
    pub fn with_user_name(mut self, name: impl Into<String>) -> Self {
        self.user_name = Some(name.into());
        self
    }

    /// Sets the terminal identifier.
    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    /// Returns the trimmed user id, or `None` when absent or blank.
    pub fn user_id(&self) -> Option<&str> {
        self.device_user_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    /// Returns the display name if it is present and non-blank.
    pub fn display_name(&self) -> Option<&str> {
        self.user_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }

    /// Computes the deduplication key, if the record has both a user and a
    /// valid timestamp.
    pub fn sync_key(&self) -> Option<SyncKey> {
        match (self.user_id(), self.record_time) {
            (Some(user_id), Some(at)) => Some(SyncKey::new(user_id, at)),
            _ => None,
        }
    }

    /// Returns true if the record has what the pipeline needs.
    pub fn is_well_formed(&self) -> bool {
        self.sync_key().is_some()
    }
}

// =============================================================================
// Sync Key
// =============================================================================

/// Deterministic identity of one physical punch: `userId|date|time`.
///
/// Date and time are rendered in UTC with one-second resolution, so two
/// reads of the same punch always produce the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncKey(String);

impl SyncKey {
    /// Builds the key for a user punching at `at`.
    pub fn new(user_id: &str, at: DateTime<Utc>) -> Self {
        SyncKey(format!(
            "{}|{}|{}",
            user_id,
            at.format("%Y-%m-%d"),
            at.format("%H:%M:%S")
        ))
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SyncKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Record Source
// =============================================================================

/// Which path delivered a record to the processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordSource {
    /// Pushed by the terminal the moment the user punched.
    Realtime,
    /// Found by the incremental poll timer.
    Polling,
    /// Replayed by the offline reconciler.
    OfflineSync,
    /// Entered by an operator rather than read from the terminal.
    Manual,
}

impl RecordSource {
    /// Returns true for records read from the terminal itself.
    pub fn is_device(&self) -> bool {
        !matches!(self, RecordSource::Manual)
    }
}

impl std::fmt::Display for RecordSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordSource::Realtime => write!(f, "realtime"),
            RecordSource::Polling => write!(f, "polling"),
            RecordSource::OfflineSync => write!(f, "offline-sync"),
            RecordSource::Manual => write!(f, "manual"),
        }
    }
}

// =============================================================================
// Connection Type
// =============================================================================

/// Transport the device driver ended up using.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    Tcp,
    Udp,
}

impl std::fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionType::Tcp => write!(f, "tcp"),
            ConnectionType::Udp => write!(f, "udp"),
        }
    }
}

// =============================================================================
// Device Configuration
// =============================================================================

/// Default TCP port of the terminal.
pub const DEFAULT_DEVICE_PORT: u16 = 4370;

/// Default handshake timeout in milliseconds.
pub const DEFAULT_DEVICE_TIMEOUT_MS: u64 = 5200;

/// Default local UDP port used by the driver.
pub const DEFAULT_DEVICE_UDP_PORT: u16 = 5000;

/// Network settings of the terminal.
///
/// Persisted as JSON in the key-value store; changing it tears the device
/// connection down and rebuilds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
    /// Terminal IP address. `None` until an administrator configures it.
    #[serde(default)]
    pub ip: Option<String>,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Handshake timeout (milliseconds).
    #[serde(rename = "timeout", default = "default_timeout")]
    pub timeout_ms: u64,

    #[serde(default = "default_udp_port")]
    pub udp_port: u16,
}

fn default_port() -> u16 {
    DEFAULT_DEVICE_PORT
}

fn default_timeout() -> u64 {
    DEFAULT_DEVICE_TIMEOUT_MS
}

fn default_udp_port() -> u16 {
    DEFAULT_DEVICE_UDP_PORT
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            ip: None,
            port: DEFAULT_DEVICE_PORT,
            timeout_ms: DEFAULT_DEVICE_TIMEOUT_MS,
            udp_port: DEFAULT_DEVICE_UDP_PORT,
        }
    }
}

impl DeviceConfig {
    /// Creates a config for the given IP with default ports.
    pub fn for_ip(ip: impl Into<String>) -> Self {
        DeviceConfig {
            ip: Some(ip.into()),
            ..Default::default()
        }
    }

    /// Returns true if an IP has been configured.
    pub fn is_configured(&self) -> bool {
        self.ip.as_deref().is_some_and(|ip| !ip.trim().is_empty())
    }

    /// Returns `ip:port`, if configured.
    pub fn address(&self) -> Option<String> {
        self.ip
            .as_deref()
            .filter(|ip| !ip.trim().is_empty())
            .map(|ip| format!("{}:{}", ip.trim(), self.port))
    }
}
