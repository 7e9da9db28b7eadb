//! # Remote Ledger
//!
//! The remote attendance API is the system of record. It accepts one punch
//! per request and is authoritative on whether a user exists.
//!
//! ## Outcome Classification
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Response                                         │ Classification      │
//! │  ─────────────────────────────────────────────────┼──────────────────── │
//! │  2xx                                              │ Ok(LedgerAck)       │
//! │  404                                              │ UserNotFound        │
//! │  success:false and message contains "not found"   │ UserNotFound        │
//! │  any other status, transport error, timeout       │ ApiError            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use tracing::{debug, warn};

use punchrelay_core::AttendancePayload;

use crate::config::RelayConfig;
use crate::error::SyncResult;

// =============================================================================
// Ledger Contract
// =============================================================================

/// Accepted submission.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedgerAck {
    /// Response body, if it was JSON.
    pub data: Option<Value>,
}

/// Rejection category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    /// The remote API does not know the user. Permanent.
    UserNotFound,
    /// Anything else. Transient.
    ApiError,
}

/// Rejected submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerRejection {
    pub kind: RejectionKind,
    pub message: String,
}

impl LedgerRejection {
    pub fn user_not_found(message: impl Into<String>) -> Self {
        LedgerRejection {
            kind: RejectionKind::UserNotFound,
            message: message.into(),
        }
    }

    pub fn api_error(message: impl Into<String>) -> Self {
        LedgerRejection {
            kind: RejectionKind::ApiError,
            message: message.into(),
        }
    }
}

/// Capability to submit a punch to the remote API.
#[async_trait]
pub trait RemoteLedger: Send + Sync {
    async fn submit(&self, payload: &AttendancePayload) -> Result<LedgerAck, LedgerRejection>;
}

// =============================================================================
// Classification
// =============================================================================

/// Classifies an HTTP response.
pub fn classify_response(status: u16, body: &str) -> Result<LedgerAck, LedgerRejection> {
    let json: Option<Value> = serde_json::from_str(body).ok();

    if (200..300).contains(&status) {
        return Ok(LedgerAck { data: json });
    }

    let message = json
        .as_ref()
        .and_then(|v| v.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {}", status));

    let explicit_failure = json
        .as_ref()
        .and_then(|v| v.get("success"))
        .and_then(Value::as_bool)
        == Some(false);

    if status == StatusCode::NOT_FOUND.as_u16() || (explicit_failure && message.contains("not found")) {
        Err(LedgerRejection::user_not_found(message))
    } else {
        Err(LedgerRejection::api_error(message))
    }
}

// =============================================================================
// HTTP Ledger
// =============================================================================

/// `RemoteLedger` over HTTP.
#[derive(Debug, Clone)]
pub struct HttpLedger {
    client: reqwest::Client,
    endpoint: url::Url,
}

impl HttpLedger {
    /// Creates a ledger posting to `endpoint`.
    pub fn new(endpoint: url::Url, timeout: Duration) -> SyncResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(HttpLedger { client, endpoint })
    }

    /// Creates a ledger from the relay configuration.
    pub fn from_config(config: &RelayConfig) -> SyncResult<Self> {
        Self::new(config.attendance_endpoint()?, config.request_timeout())
    }

    pub fn endpoint(&self) -> &url::Url {
        &self.endpoint
    }
}

#[async_trait]
impl RemoteLedger for HttpLedger {
    async fn submit(&self, payload: &AttendancePayload) -> Result<LedgerAck, LedgerRejection> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, user_id = %payload.user_id, "Attendance request failed");
                LedgerRejection::api_error(e.to_string())
            })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| LedgerRejection::api_error(e.to_string()))?;

        debug!(status, user_id = %payload.user_id, "Attendance API responded");
        classify_response(status, &body)
    }
}
