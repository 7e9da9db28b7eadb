//! # Sync Error Types
//!
//! Error types for engine-level operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        SyncError Categories                             │
//! │                                                                         │
//! │  Configuration   InvalidConfig, InvalidUrl, ConfigLoadFailed, ...      │
//! │  Device          NotConfigured, NotConnected, DeviceError, Timeout     │
//! │  Ledger          LedgerUnavailable                                     │
//! │  Storage         Store                                                  │
//! │                                                                         │
//! │  Per-record failures are NOT SyncErrors: the processor reports them    │
//! │  as ProcessOutcome values and never returns Err.                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use punchrelay_core::ValidationError;
use punchrelay_store::StoreError;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Engine error type.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid relay configuration.
    #[error("Invalid relay configuration: {0}")]
    InvalidConfig(String),

    /// Invalid remote API URL.
    #[error("Invalid API URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Rejected device settings.
    #[error("Invalid device settings: {0}")]
    Validation(#[from] ValidationError),

    // =========================================================================
    // Device Errors
    // =========================================================================
    /// No device IP has been configured.
    #[error("Device IP not configured")]
    NotConfigured,

    /// The operation needs a live device connection.
    #[error("Device not connected")]
    NotConnected,

    /// The device link is disabled in configuration.
    #[error("Device link is disabled")]
    DeviceDisabled,

    /// The device driver reported a failure.
    #[error("Device error: {0}")]
    DeviceError(String),

    /// The device did not answer in time.
    #[error("Connection timeout after {0} ms")]
    Timeout(u64),

    // =========================================================================
    // Ledger Errors
    // =========================================================================
    /// The HTTP client could not be built.
    #[error("Remote API unavailable: {0}")]
    LedgerUnavailable(String),

    // =========================================================================
    // Storage Errors
    // =========================================================================
    /// Persistent store failure.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::LedgerUnavailable(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(SyncError::NotConfigured.to_string(), "Device IP not configured");
        assert_eq!(SyncError::Timeout(3000).to_string(), "Connection timeout after 3000 ms");
    }

    #[test]
    fn test_validation_errors_convert() {
        let err = SyncError::from(ValidationError::required("ip"));
        assert!(matches!(err, SyncError::Validation(_)));
        assert!(err.to_string().contains("ip is required"));
    }

    #[test]
    fn test_store_errors_convert() {
        let err = SyncError::from(StoreError::corrupt("invalid_users", "bad json"));
        assert!(matches!(err, SyncError::Store(_)));
    }
}
