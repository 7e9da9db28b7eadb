//! # Relay Configuration
//!
//! Static configuration of the relay process.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  1. Defaults (compiled in)                                             │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  2. relay.toml (explicit path or platform config dir)                  │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  3. PUNCHRELAY_* environment variables                                 │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  validate()                                                            │
//! │                                                                         │
//! │  The terminal's network settings (DeviceConfig) are NOT here: they     │
//! │  live in the key-value store and change at runtime.                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # relay.toml
//! [device]
//! enabled = true
//! probe_reachability = true
//! probe_timeout_ms = 3000
//! settle_delay_ms = 2000
//!
//! [ledger]
//! base_url = "https://backend.academichelperbd.xyz"
//! api_version = "v1"
//! school_id = 1
//! school_code = "10106"
//! terminal_sn = "TERM-12345"
//! request_timeout_secs = 30
//! utc_offset_minutes = 360
//!
//! [sync]
//! poll_interval_ms = 5000
//! sync_interval_ms = 5000
//! reconnect_base_delay_ms = 5000
//! max_reconnect_attempts = 3
//! replay_delay_ms = 100
//! reconfigure_delay_ms = 1000
//! status_interval_ms = 5000
//!
//! [storage]
//! database_path = "/var/lib/punchrelay/relay.db"
//! ```

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use punchrelay_core::TerminalProfile;

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Device Link Settings
// =============================================================================

/// How the relay treats the device link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceLinkSettings {
    /// When false the relay never dials the terminal (virtual mode).
    #[serde(default)]
    pub enabled: bool,

    /// Run a plain TCP reachability probe before the handshake.
    #[serde(default = "default_true")]
    pub probe_reachability: bool,

    /// Probe timeout (milliseconds).
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,

    /// Delay between a successful connect and the initial catch-up
    /// (milliseconds).
    #[serde(default = "default_settle_delay")]
    pub settle_delay_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_probe_timeout() -> u64 {
    3000
}

fn default_settle_delay() -> u64 {
    2000
}

impl Default for DeviceLinkSettings {
    fn default() -> Self {
        DeviceLinkSettings {
            enabled: false,
            probe_reachability: true,
            probe_timeout_ms: default_probe_timeout(),
            settle_delay_ms: default_settle_delay(),
        }
    }
}

// =============================================================================
// Ledger Settings
// =============================================================================

/// Remote attendance API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_api_version")]
    pub api_version: String,

    #[serde(default = "default_school_id")]
    pub school_id: i64,

    /// School code reported on attendance notifications.
    #[serde(default = "default_school_code")]
    pub school_code: String,

    /// Serial number sent as `terminal_sn`.
    #[serde(default = "default_terminal_sn")]
    pub terminal_sn: String,

    /// Per-request timeout (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Offset used to render `att_time` and dates (minutes east of UTC).
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

fn default_base_url() -> String {
    "https://backend.academichelperbd.xyz".to_string()
}

fn default_api_version() -> String {
    "v1".to_string()
}

fn default_school_id() -> i64 {
    1
}

fn default_school_code() -> String {
    "10106".to_string()
}

fn default_terminal_sn() -> String {
    "TERM-12345".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for LedgerSettings {
    fn default() -> Self {
        LedgerSettings {
            base_url: default_base_url(),
            api_version: default_api_version(),
            school_id: default_school_id(),
            school_code: default_school_code(),
            terminal_sn: default_terminal_sn(),
            request_timeout_secs: default_request_timeout(),
            utc_offset_minutes: 0,
        }
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Timer and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Incremental poll interval (milliseconds).
    #[serde(default = "default_interval")]
    pub poll_interval_ms: u64,

    /// Periodic reconciliation interval (milliseconds).
    #[serde(default = "default_interval")]
    pub sync_interval_ms: u64,

    /// First reconnect delay; doubles per attempt (milliseconds).
    #[serde(default = "default_interval")]
    pub reconnect_base_delay_ms: u64,

    /// Reconnect attempts before giving up.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Pause between replayed records during reconciliation (milliseconds).
    #[serde(default = "default_replay_delay")]
    pub replay_delay_ms: u64,

    /// Pause between teardown and reconnect on reconfiguration (milliseconds).
    #[serde(default = "default_reconfigure_delay")]
    pub reconfigure_delay_ms: u64,

    /// Device status rebroadcast interval (milliseconds); 0 disables it.
    #[serde(default = "default_interval")]
    pub status_interval_ms: u64,
}

fn default_interval() -> u64 {
    5000
}

fn default_max_reconnect_attempts() -> u32 {
    3
}

fn default_replay_delay() -> u64 {
    100
}

fn default_reconfigure_delay() -> u64 {
    1000
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            poll_interval_ms: default_interval(),
            sync_interval_ms: default_interval(),
            reconnect_base_delay_ms: default_interval(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            replay_delay_ms: default_replay_delay(),
            reconfigure_delay_ms: default_reconfigure_delay(),
            status_interval_ms: default_interval(),
        }
    }
}

// =============================================================================
// Storage Settings
// =============================================================================

/// Where the key-value store lives.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Database file. Defaults to the platform data directory.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

// =============================================================================
// Main Relay Configuration
// =============================================================================

/// Complete relay configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub device: DeviceLinkSettings,

    #[serde(default)]
    pub ledger: LedgerSettings,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub storage: StorageSettings,
}

impl RelayConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (relay.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading relay config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load relay config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        let url = url::Url::parse(&self.ledger.base_url)?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(SyncError::InvalidUrl(format!(
                "API base URL must start with http:// or https://, got: {}",
                self.ledger.base_url
            )));
        }

        if self.ledger.api_version.trim().is_empty() {
            return Err(SyncError::InvalidConfig("api_version must not be empty".into()));
        }

        if self.ledger.terminal_sn.trim().is_empty() {
            return Err(SyncError::InvalidConfig("terminal_sn must not be empty".into()));
        }

        if self.utc_offset().is_none() {
            return Err(SyncError::InvalidConfig(format!(
                "utc_offset_minutes out of range: {}",
                self.ledger.utc_offset_minutes
            )));
        }

        if self.sync.poll_interval_ms == 0 || self.sync.sync_interval_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "poll and sync intervals must be greater than 0".into(),
            ));
        }

        if self.sync.reconnect_base_delay_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "reconnect_base_delay_ms must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("PUNCHRELAY_API_BASE_URL") {
            debug!(url = %url, "Overriding API base URL from environment");
            self.ledger.base_url = url;
        }

        if let Ok(version) = std::env::var("PUNCHRELAY_API_VERSION") {
            self.ledger.api_version = version;
        }

        if let Ok(id) = std::env::var("PUNCHRELAY_SCHOOL_ID") {
            match id.parse::<i64>() {
                Ok(id) => self.ledger.school_id = id,
                Err(_) => warn!(value = %id, "Ignoring non-numeric PUNCHRELAY_SCHOOL_ID"),
            }
        }

        if let Ok(sn) = std::env::var("PUNCHRELAY_TERMINAL_SN") {
            self.ledger.terminal_sn = sn;
        }

        if let Ok(enabled) = std::env::var("PUNCHRELAY_DEVICE_ENABLED") {
            debug!(enabled = %enabled, "Overriding device link switch from environment");
            self.device.enabled = enabled.eq_ignore_ascii_case("true");
        }

        if let Ok(path) = std::env::var("PUNCHRELAY_DB_PATH") {
            self.storage.database_path = Some(PathBuf::from(path));
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "punchrelay", "punchrelay")
            .map(|dirs| dirs.config_dir().join("relay.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Returns the database path, falling back to the platform data dir.
    pub fn database_path(&self) -> PathBuf {
        self.storage.database_path.clone().unwrap_or_else(|| {
            directories::ProjectDirs::from("com", "punchrelay", "punchrelay")
                .map(|dirs| dirs.data_dir().join("relay.db"))
                .unwrap_or_else(|| PathBuf::from("relay.db"))
        })
    }

    /// Returns the submission endpoint.
    pub fn attendance_endpoint(&self) -> SyncResult<url::Url> {
        let base = self.ledger.base_url.trim_end_matches('/');
        let endpoint = format!("{}/api/{}/machine-attendance", base, self.ledger.api_version);
        Ok(url::Url::parse(&endpoint)?)
    }

    /// Returns the configured UTC offset, if in range.
    pub fn utc_offset(&self) -> Option<FixedOffset> {
        self.ledger
            .utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
    }

    /// Builds the terminal profile stamped onto every payload.
    pub fn terminal_profile(&self) -> TerminalProfile {
        let defaults = TerminalProfile::default();
        TerminalProfile {
            terminal_sn: self.ledger.terminal_sn.clone(),
            school_id: self.ledger.school_id,
            school_code: self.ledger.school_code.clone(),
            utc_offset: self.utc_offset().unwrap_or(defaults.utc_offset),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.sync.poll_interval_ms)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync.sync_interval_ms)
    }

    pub fn replay_delay(&self) -> Duration {
        Duration::from_millis(self.sync.replay_delay_ms)
    }

    pub fn reconfigure_delay(&self) -> Duration {
        Duration::from_millis(self.sync.reconfigure_delay_ms)
    }

    /// Status heartbeat interval, `None` when disabled.
    pub fn status_interval(&self) -> Option<Duration> {
        (self.sync.status_interval_ms > 0).then(|| Duration::from_millis(self.sync.status_interval_ms))
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.device.settle_delay_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.device.probe_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.ledger.request_timeout_secs)
    }
}
