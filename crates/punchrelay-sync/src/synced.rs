//! # Synced Set and Processed Cursor
//!
//! In-memory delivery bookkeeping. Both structures live for the process
//! lifetime only; on restart they are rebuilt from the terminal.
//!
//! ## Claim Protocol
//! ```text
//!             try_claim(key)
//!                  │
//!      ┌───────────┼─────────────────┐
//!      ▼           ▼                 ▼
//!  AlreadySynced  InFlight        Claimed(SyncClaim)
//!  (in synced)    (claimed by         │
//!                  another pass)      ├── complete() ──► moved to synced
//!                                     └── dropped    ──► released
//! ```
//!
//! A claim that is dropped without `complete()` (API error, panic, task
//! cancellation) frees the key so a later pass can retry it.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use punchrelay_core::SyncKey;

// =============================================================================
// Synced Set
// =============================================================================

#[derive(Debug, Default)]
struct Keys {
    synced: HashSet<SyncKey>,
    in_flight: HashSet<SyncKey>,
}

/// Keys confirmed delivered, plus keys currently being submitted.
///
/// Grows monotonically; there is no eviction.
#[derive(Debug, Default)]
pub struct SyncedSet {
    keys: Mutex<Keys>,
}

/// Result of [`SyncedSet::try_claim`].
#[derive(Debug)]
pub enum Claim<'a> {
    Claimed(SyncClaim<'a>),
    AlreadySynced,
    InFlight,
}

impl SyncedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the key was delivered.
    pub fn contains(&self, key: &SyncKey) -> bool {
        self.lock().synced.contains(key)
    }

    /// Returns true if another pass is submitting the key.
    pub fn is_in_flight(&self, key: &SyncKey) -> bool {
        self.lock().in_flight.contains(key)
    }

    /// Claims a key for submission.
    ///
    /// With `resubmit` set, a delivered key may be claimed again; a key in
    /// flight never can.
    pub fn try_claim(&self, key: &SyncKey, resubmit: bool) -> Claim<'_> {
        let mut keys = self.lock();
        if keys.in_flight.contains(key) {
            return Claim::InFlight;
        }
        if !resubmit && keys.synced.contains(key) {
            return Claim::AlreadySynced;
        }
        keys.in_flight.insert(key.clone());
        Claim::Claimed(SyncClaim {
            set: self,
            key: Some(key.clone()),
        })
    }

    /// Number of delivered keys.
    pub fn len(&self) -> usize {
        self.lock().synced.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().synced.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Keys> {
        self.keys.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Exclusive right to submit one key.
#[derive(Debug)]
pub struct SyncClaim<'a> {
    set: &'a SyncedSet,
    key: Option<SyncKey>,
}

impl SyncClaim<'_> {
    /// Marks the key delivered.
    pub fn complete(mut self) {
        if let Some(key) = self.key.take() {
            let mut keys = self.set.lock();
            keys.in_flight.remove(&key);
            keys.synced.insert(key);
        }
    }
}

impl Drop for SyncClaim<'_> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.set.lock().in_flight.remove(&key);
        }
    }
}

// =============================================================================
// Processed Cursor
// =============================================================================

/// Newest record time handed to the processor (`lastProcessedTime`).
///
/// Only ever moves forward.
#[derive(Debug, Default)]
pub struct ProcessedCursor {
    at: Mutex<Option<DateTime<Utc>>>,
}

impl ProcessedCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current cursor value.
    pub fn get(&self) -> Option<DateTime<Utc>> {
        *self.lock()
    }

    /// Moves the cursor to `at` if that is later. Returns true if it moved.
    pub fn advance(&self, at: DateTime<Utc>) -> bool {
        let mut current = self.lock();
        match *current {
            Some(existing) if existing >= at => false,
            _ => {
                *current = Some(at);
                true
            }
        }
    }

    /// Returns true if `at` is strictly newer than the cursor (or no cursor
    /// is set yet).
    pub fn is_newer(&self, at: DateTime<Utc>) -> bool {
        self.get().map_or(true, |cursor| at > cursor)
    }

    fn lock(&self) -> MutexGuard<'_, Option<DateTime<Utc>>> {
        self.at.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
