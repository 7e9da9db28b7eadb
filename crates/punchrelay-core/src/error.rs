//! # Error Types
//!
//! Domain-specific error types for punchrelay-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  punchrelay-core errors (this file)                                    │
//! │  ├── CoreError        - General domain errors                          │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  punchrelay-store errors (separate crate)                              │
//! │  └── StoreError       - Persistence failures                           │
//! │                                                                         │
//! │  punchrelay-sync errors (separate crate)                               │
//! │  └── SyncError        - Device, ledger and configuration failures      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core domain errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A record timestamp could not be interpreted.
    ///
    /// ## When This Occurs
    /// - The terminal reported a date string in an unknown format
    /// - An epoch value is outside chrono's representable range
    #[error("Invalid record timestamp: {0}")]
    InvalidTimestamp(String),

    /// The outbound payload could not be built.
    #[error("Cannot build payload: {0}")]
    Payload(String),

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Used for early validation before any record reaches the remote API.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// A field has an invalid format.
    #[error("Invalid {field}: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// A field exceeds its maximum length.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },
}

impl ValidationError {
    /// Creates a `Required` error for the given field.
    pub fn required(field: impl Into<String>) -> Self {
        ValidationError::Required {
            field: field.into(),
        }
    }

    /// Creates an `InvalidFormat` error.
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ValidationError::InvalidFormat {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
