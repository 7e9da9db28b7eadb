//! # punchrelay-core: Pure Attendance Model for PunchRelay
//!
//! This crate holds the data model shared by the storage layer and the
//! synchronization engine. Everything here is a pure function or a plain
//! type; there is no I/O.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        PunchRelay Architecture                          │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │              punchrelay-sync (Synchronization Engine)           │   │
//! │  │   ConnectionManager ──► RecordProcessor ──► RemoteLedger        │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │             ★ punchrelay-core (THIS CRATE) ★                    │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │  outcome  │  │  payload  │  │ realtime  │  │   │
//! │  │   │  Record   │  │  Skipped  │  │  Payload  │  │ normalize │  │   │
//! │  │   │  SyncKey  │  │  Failed   │  │  Events   │  │ parse ts  │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Records, SyncKey, sources, device configuration
//! - [`outcome`] - Per-record outcome taxonomy and batch summaries
//! - [`payload`] - Outbound API payload and notification events
//! - [`realtime`] - Timestamp parsing and realtime push normalization
//! - [`validation`] - Input validation
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use punchrelay_core::{AttendanceRecord, SyncKey};
//!
//! let at = Utc.with_ymd_and_hms(2025, 1, 10, 9, 0, 0).unwrap();
//! let record = AttendanceRecord::new("2025004", at);
//!
//! assert_eq!(
//!     record.sync_key().map(|k| k.to_string()),
//!     Some("2025004|2025-01-10|09:00:00".to_string())
//! );
//! assert_eq!(SyncKey::new("2025004", at).as_str(), "2025004|2025-01-10|09:00:00");
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod outcome;
pub mod payload;
pub mod realtime;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, ValidationError};
pub use outcome::{FailureReason, PollSummary, ProcessOutcome, ReconcileSummary, SkipReason};
pub use payload::{AttendanceEvent, AttendancePayload, DeviceStatus, TerminalProfile};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Record type sent with every punch.
///
/// The terminal does not distinguish check-in from check-out; the remote
/// API pairs punches itself.
pub const DEFAULT_RECORD_TYPE: &str = "Check-in";

/// Attendance type reported to dashboard consumers.
pub const ATTENDANCE_TYPE_MACHINE: &str = "machine";
