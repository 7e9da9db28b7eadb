//! # Invalid-User Registry
//!
//! Durable blacklist of user ids the remote API rejected as unknown. Once a
//! user is here, no record of theirs is submitted again, in this process or
//! any later one.
//!
//! ## Write-Through Persistence
//! ```text
//! add("ghost")
//!    │
//!    ├── insert into in-memory set (visible to other passes immediately)
//!    │
//!    └── persist lock ─► snapshot set ─► save_json("invalid_user_ids")
//!                                              │
//!                                              └── returns once durable
//! ```
//!
//! Snapshots are taken under the persist lock, so a slower writer can never
//! overwrite a newer snapshot with an older one.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use punchrelay_store::{load_json, save_json, KeyValueStore};

use crate::error::SyncResult;

/// Store key of the blacklist document.
pub const INVALID_USERS_KEY: &str = "invalid_user_ids";

/// Persisted form of the blacklist.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidUserDoc {
    pub user_ids: Vec<String>,
    #[serde(default)]
    pub last_updated: String,
    #[serde(default)]
    pub count: usize,
}

impl InvalidUserDoc {
    fn from_ids(ids: &BTreeSet<String>) -> Self {
        InvalidUserDoc {
            user_ids: ids.iter().cloned().collect(),
            last_updated: Utc::now().to_rfc3339(),
            count: ids.len(),
        }
    }
}

/// The blacklist.
pub struct InvalidUserRegistry {
    store: Arc<dyn KeyValueStore>,
    ids: Mutex<BTreeSet<String>>,
    persist_lock: tokio::sync::Mutex<()>,
}

impl InvalidUserRegistry {
    /// Loads the blacklist from `store`.
    ///
    /// A missing document is created empty. A corrupt or unreadable one is
    /// logged and treated as empty.
    pub async fn load(store: Arc<dyn KeyValueStore>) -> Self {
        let ids: BTreeSet<String> = match load_json::<InvalidUserDoc>(store.as_ref(), INVALID_USERS_KEY).await {
            Ok(Some(doc)) => doc.user_ids.into_iter().collect(),
            Ok(None) => {
                let empty = InvalidUserDoc::from_ids(&BTreeSet::new());
                if let Err(e) = save_json(store.as_ref(), INVALID_USERS_KEY, &empty).await {
                    warn!(error = %e, "Failed to create invalid-user document");
                }
                BTreeSet::new()
            }
            Err(e) if e.is_corrupt() => {
                error!(error = %e, "Invalid-user document corrupted, starting empty");
                BTreeSet::new()
            }
            Err(e) => {
                warn!(error = %e, "Invalid-user document unreadable, starting empty");
                BTreeSet::new()
            }
        };

        info!(count = ids.len(), "Loaded invalid user ids");

        InvalidUserRegistry {
            store,
            ids: Mutex::new(ids),
            persist_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Returns true if the user is blacklisted.
    pub fn contains(&self, user_id: &str) -> bool {
        self.lock().contains(user_id)
    }

    /// Blacklists a user and persists the registry before returning.
    ///
    /// Returns `Ok(true)` if the user was newly added. On a persistence
    /// failure the user stays blacklisted in memory and the error is
    /// returned for logging.
    pub async fn add(&self, user_id: &str) -> SyncResult<bool> {
        let user_id = user_id.trim();
        if user_id.is_empty() || !self.lock().insert(user_id.to_string()) {
            return Ok(false);
        }

        let _guard = self.persist_lock.lock().await;
        let doc = InvalidUserDoc::from_ids(&self.lock());
        save_json(self.store.as_ref(), INVALID_USERS_KEY, &doc).await?;

        info!(user_id = %user_id, total = doc.count, "Added invalid user id");
        Ok(true)
    }

    /// Number of blacklisted users.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Blacklisted ids in sorted order.
    pub fn ids(&self) -> Vec<String> {
        self.lock().iter().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeSet<String>> {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for InvalidUserRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvalidUserRegistry")
            .field("count", &self.len())
            .finish()
    }
}
