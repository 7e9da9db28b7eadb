//! # Record Outcomes
//!
//! Structured results of pushing a record through the pipeline. Nothing in
//! the per-record path raises an error to its caller; every decision ends up
//! as one of these values.
//!
//! ## Taxonomy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Outcome                  │ Side effects          │ Retried later?      │
//! │  ─────────────────────────┼───────────────────────┼──────────────────── │
//! │  Synced                   │ SyncedSet + event     │ never               │
//! │  Skipped(InvalidUser)     │ none                  │ never               │
//! │  Skipped(AlreadySynced)   │ none                  │ never               │
//! │  Skipped(InFlight)        │ none                  │ if the owner fails  │
//! │  Failed(InvalidEntry)     │ none                  │ never               │
//! │  Failed(UserNotFound)     │ registry + persist    │ never               │
//! │  Failed(ApiError)         │ none                  │ next pass           │
//! │  Failed(Exception)        │ none                  │ next pass           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use ts_rs::TS;

// =============================================================================
// Skip / Failure Reasons
// =============================================================================

/// Why a record was dropped without contacting the remote API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SkipReason {
    /// The user is on the invalid-user blacklist.
    InvalidUser,
    /// The punch was already delivered in this process lifetime.
    AlreadySynced,
    /// Another pass is submitting the same punch right now.
    InFlight,
}

impl SkipReason {
    /// Stable code used in logs.
    pub fn code(&self) -> &'static str {
        match self {
            SkipReason::InvalidUser => "INVALID_USER",
            SkipReason::AlreadySynced => "ALREADY_SYNCED",
            SkipReason::InFlight => "IN_FLIGHT",
        }
    }
}

/// Why a record could not be delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "message", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
    /// Missing user id or unusable timestamp.
    InvalidEntry,
    /// The remote API does not know this user. Permanent.
    UserNotFound,
    /// Transient remote or network failure.
    ApiError(String),
    /// Unexpected local fault while processing.
    Exception(String),
}

impl FailureReason {
    /// Stable code used in logs.
    pub fn code(&self) -> &'static str {
        match self {
            FailureReason::InvalidEntry => "INVALID_ENTRY",
            FailureReason::UserNotFound => "USER_NOT_FOUND",
            FailureReason::ApiError(_) => "API_ERROR",
            FailureReason::Exception(_) => "EXCEPTION",
        }
    }
}

// =============================================================================
// Process Outcome
// =============================================================================

/// Result of processing one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProcessOutcome {
    Synced,
    Skipped { reason: SkipReason },
    Failed { reason: FailureReason },
}

impl ProcessOutcome {
    pub fn skipped(reason: SkipReason) -> Self {
        ProcessOutcome::Skipped { reason }
    }

    pub fn failed(reason: FailureReason) -> Self {
        ProcessOutcome::Failed { reason }
    }

    pub fn is_synced(&self) -> bool {
        matches!(self, ProcessOutcome::Synced)
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, ProcessOutcome::Skipped { .. })
    }

    /// Returns the skip reason, if skipped.
    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            ProcessOutcome::Skipped { reason } => Some(*reason),
            _ => None,
        }
    }

    /// Returns the failure reason, if failed.
    pub fn failure(&self) -> Option<&FailureReason> {
        match self {
            ProcessOutcome::Failed { reason } => Some(reason),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProcessOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessOutcome::Synced => write!(f, "SUCCESS"),
            ProcessOutcome::Skipped { reason } => write!(f, "SKIPPED({})", reason.code()),
            ProcessOutcome::Failed { reason } => match reason {
                FailureReason::ApiError(msg) | FailureReason::Exception(msg) => {
                    write!(f, "FAILED({}: {})", reason.code(), msg)
                }
                _ => write!(f, "FAILED({})", reason.code()),
            },
        }
    }
}

// =============================================================================
// Batch Summaries
// =============================================================================

/// Aggregate counts of one reconciliation run.
///
/// Emitted to dashboard consumers after every run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ReconcileSummary {
    /// Records delivered in this run.
    pub synced: u32,
    /// Records dropped as blacklisted, already synced or in flight.
    pub skipped: u32,
    /// Records whose user the remote API rejected.
    pub invalid: u32,
    /// Records that hit a transient or local failure.
    pub failed: u32,
    /// Set when the run was cut short.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub error: Option<String>,
}

impl ReconcileSummary {
    /// Folds one outcome into the counts.
    pub fn record(&mut self, outcome: &ProcessOutcome) {
        match outcome {
            ProcessOutcome::Synced => self.synced += 1,
            ProcessOutcome::Skipped { .. } => self.skipped += 1,
            ProcessOutcome::Failed {
                reason: FailureReason::UserNotFound,
            } => self.invalid += 1,
            ProcessOutcome::Failed { .. } => self.failed += 1,
        }
    }

    /// Summary of a run that could not start.
    pub fn aborted(error: impl Into<String>) -> Self {
        ReconcileSummary {
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Total number of records that went through the processor.
    pub fn total(&self) -> u32 {
        self.synced + self.skipped + self.invalid + self.failed
    }

    /// Returns true if the run changed anything worth reporting.
    pub fn has_activity(&self) -> bool {
        self.synced > 0 || self.invalid > 0
    }
}

/// Counts of one incremental poll pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    /// Records listed by the device.
    pub examined: usize,
    /// Records newer than the cursor that were replayed.
    pub processed: usize,
    /// Records that were delivered.
    pub synced: usize,
}
