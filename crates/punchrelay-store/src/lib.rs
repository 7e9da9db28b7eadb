//! # punchrelay-store: Durable Key-Value Storage for PunchRelay
//!
//! This crate persists the handful of documents the relay must keep across
//! restarts: the device network settings and the invalid-user blacklist.
//! Everything else (the synced set, the processed cursor) is rebuilt from
//! the terminal on every start.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        PunchRelay Data Flow                             │
//! │                                                                         │
//! │  punchrelay-sync (InvalidUserRegistry, device config)                  │
//! │       │                                                                 │
//! │       │  Arc<dyn KeyValueStore>                                         │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                punchrelay-store (THIS CRATE)                    │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  KvRepository │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │◄───│  (kv.rs)      │    │  (embedded)  │  │   │
//! │  │   │ SqlitePool    │    │  get / set    │    │ 001_kv.sql   │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  │   MemoryStore: same trait, no disk (tests, ephemeral runs)      │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database                             │   │
//! │  │   <data dir>/punchrelay/relay.db                               │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`store`] - The `KeyValueStore` trait, JSON helpers and `MemoryStore`
//! - [`repository`] - SQLite-backed key-value repository
//! - [`error`] - Storage error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use punchrelay_store::{Database, KeyValueStore, StoreConfig};
//!
//! let db = Database::open(StoreConfig::new("relay.db")).await?;
//! db.set("device_config", r#"{"ip":"192.168.1.201"}"#).await?;
//! let raw = db.get("device_config").await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;
pub mod store;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{StoreError, StoreResult};
pub use pool::{Database, StoreConfig};
pub use repository::kv::KvRepository;
pub use store::{load_json, save_json, KeyValueStore, MemoryStore};
