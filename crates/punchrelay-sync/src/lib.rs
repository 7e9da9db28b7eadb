//! # punchrelay-sync: Attendance Synchronization Engine
//!
//! Relays punches captured by a biometric terminal to the remote attendance
//! API, forwarding each physical punch exactly once despite an unreliable
//! device link.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Synchronization Engine                             │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                AttendanceRelay (facade + builder)                │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │                               ▼                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │ ConnectionManager                                                │  │
//! │  │ state machine • exponential backoff • realtime pump • sessions   │  │
//! │  └───────┬──────────────────────┬──────────────────────┬────────────┘  │
//! │          │                      │                      │               │
//! │          ▼                      ▼                      ▼               │
//! │  ┌──────────────┐     ┌──────────────────┐    ┌──────────────────┐    │
//! │  │  Scheduler   │────►│ IncrementalPoller│    │ OfflineReconciler│    │
//! │  │ poll / sync  │────►│ cursor-based     │    │ full catch-up    │    │
//! │  │ reconnect    │     └────────┬─────────┘    └────────┬─────────┘    │
//! │  └──────────────┘              │                       │               │
//! │                                ▼                       ▼               │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │ RecordProcessor                                                  │  │
//! │  │ validate • blacklist • dedup (SyncedSet) • enrich • submit       │  │
//! │  └───────┬──────────────────────────────────────────┬───────────────┘  │
//! │          ▼                                          ▼                  │
//! │  ┌──────────────────┐                     ┌──────────────────────┐    │
//! │  │ RemoteLedger     │                     │ InvalidUserRegistry  │    │
//! │  │ (HttpLedger)     │                     │ (KeyValueStore)      │    │
//! │  └──────────────────┘                     └──────────────────────┘    │
//! │                                                                         │
//! │  NOTIFICATIONS: device status • attendance • reconcile summaries       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! ### Engine
//! - [`agent`] - `AttendanceRelay` facade and builder
//! - [`connection`] - Device link state machine and reconnect policy
//! - [`processor`] - Per-record delivery pipeline
//! - [`reconciler`] - Offline catch-up
//! - [`poller`] - Incremental cursor-based polling
//! - [`scheduler`] - Timers
//! - [`registry`] - Durable invalid-user blacklist
//! - [`synced`] - Delivered-key set and processed cursor
//! - [`state`] - Connection state
//!
//! ### Collaborators
//! - [`driver`] - `DeviceDriver` seam
//! - [`ledger`] - `RemoteLedger` seam and HTTP implementation
//! - [`emitter`] - Notification sink
//!
//! ### Ambient
//! - [`config`] - Relay configuration
//! - [`error`] - Engine error types
//! - [`runtime`] - Tracing setup and shutdown handling
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use punchrelay_sync::{AttendanceRelay, RelayConfig, runtime};
//!
//! runtime::init_tracing();
//!
//! let relay = AttendanceRelay::builder()
//!     .config(RelayConfig::load_or_default(None))
//!     .driver(Arc::new(my_terminal_driver))
//!     .build()
//!     .await?;
//!
//! runtime::run_until_shutdown(&relay).await;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod agent;
pub mod config;
pub mod connection;
pub mod driver;
pub mod emitter;
pub mod error;
pub mod ledger;
pub mod poller;
pub mod processor;
pub mod reconciler;
pub mod registry;
pub mod runtime;
pub mod scheduler;
pub mod state;
pub mod synced;

#[cfg(test)]
mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use agent::{AttendanceRelay, AttendanceRelayBuilder, RelayStatus, DEVICE_CONFIG_KEY};
pub use config::RelayConfig;
pub use connection::{ConnectOutcome, ConnectionManager, ReconnectPolicy};
pub use driver::{DeviceDriver, LinkEvent};
pub use emitter::{BroadcastEmitter, NoOpEmitter, RelayEvent, RelayEventEmitter};
pub use error::{SyncError, SyncResult};
pub use ledger::{HttpLedger, LedgerAck, LedgerRejection, RejectionKind, RemoteLedger};
pub use poller::IncrementalPoller;
pub use processor::RecordProcessor;
pub use reconciler::OfflineReconciler;
pub use registry::InvalidUserRegistry;
pub use scheduler::Scheduler;
pub use state::{ConnectionPhase, ConnectionState, StateView};
pub use synced::{ProcessedCursor, SyncedSet};
