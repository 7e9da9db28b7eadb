//! # Connection State
//!
//! The single process-wide record of the device link. Only
//! [`crate::connection::ConnectionManager`] mutates it; everything else reads
//! it through a [`StateView`].
//!
//! ```text
//!                   connect()
//!  Disconnected ─────────────────► Connecting
//!       ▲                              │
//!       │ error / close / failure      │ handshake ok
//!       │                              ▼
//!       └──────────────────────── Connected
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use punchrelay_core::ConnectionType;

/// Lifecycle phase of the device link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionPhase {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionPhase::Disconnected => write!(f, "disconnected"),
            ConnectionPhase::Connecting => write!(f, "connecting"),
            ConnectionPhase::Connected => write!(f, "connected"),
        }
    }
}

/// Device link state.
#[derive(Debug, Clone, Default)]
pub struct ConnectionState {
    pub phase: ConnectionPhase,

    /// Reconnect attempts since the last successful connect.
    pub reconnect_attempts: u32,

    /// Session counter; bumped on every connect attempt and teardown.
    pub epoch: u64,

    /// Transport of the live link.
    pub connection_type: Option<ConnectionType>,

    /// Set once the reconnect budget is exhausted.
    pub gave_up: bool,

    /// Most recent link or handshake error.
    pub last_error: Option<String>,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        self.phase == ConnectionPhase::Connected
    }
}

/// Read-only handle to the connection state.
#[derive(Debug, Clone)]
pub struct StateView {
    inner: Arc<RwLock<ConnectionState>>,
}

impl StateView {
    pub(crate) fn new(inner: Arc<RwLock<ConnectionState>>) -> Self {
        StateView { inner }
    }

    /// Returns true if the link is up.
    pub async fn is_connected(&self) -> bool {
        self.inner.read().await.is_connected()
    }

    /// Returns true if `epoch` is still the live connected session.
    pub async fn is_current(&self, epoch: u64) -> bool {
        let state = self.inner.read().await;
        state.epoch == epoch && state.is_connected()
    }

    pub async fn snapshot(&self) -> ConnectionState {
        self.inner.read().await.clone()
    }

    /// A view over a standalone state, for driving components directly.
    pub fn detached(state: ConnectionState) -> Self {
        StateView::new(Arc::new(RwLock::new(state)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_view_reads_shared_state() {
        let shared = Arc::new(RwLock::new(ConnectionState::default()));
        let view = StateView::new(shared.clone());
        assert!(!view.is_connected().await);

        {
            let mut state = shared.write().await;
            state.phase = ConnectionPhase::Connected;
            state.epoch = 3;
        }

        assert!(view.is_connected().await);
        assert!(view.is_current(3).await);
        assert!(!view.is_current(2).await);
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(ConnectionPhase::Connecting.to_string(), "connecting");
        assert_eq!(
            serde_json::to_string(&ConnectionPhase::Connected).unwrap(),
            "\"connected\""
        );
    }
}
