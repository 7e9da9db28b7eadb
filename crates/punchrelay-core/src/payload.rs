//! # Payloads and Events
//!
//! The outbound API payload and the notification events the engine emits.
//!
//! ## Field Mapping
//! ```text
//! AttendanceRecord                AttendancePayload (POST body)
//! ────────────────                ─────────────────────────────
//! device_user_id ───────────────► user_id
//! display name / lookup / id ───► user_name
//! record_time (terminal tz) ────► att_time  "YYYY-MM-DD HH:MM:SS"
//! (submission clock + user) ────► id        correlation token
//! TerminalProfile ──────────────► terminal_sn, school_id
//! constant ─────────────────────► record_type "Check-in"
//! ```
//!
//! The numeric `id` is an opaque correlation token, not a unique key. The
//! remote API deduplicates on its side; collisions are tolerated.

use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::types::ConnectionType;
use crate::{ATTENDANCE_TYPE_MACHINE, DEFAULT_RECORD_TYPE};

// =============================================================================
// Terminal Profile
// =============================================================================

/// Static facts about this terminal that every payload carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalProfile {
    /// Serial number reported to the API.
    pub terminal_sn: String,
    /// School the terminal belongs to.
    pub school_id: i64,
    /// School code shown on dashboard events.
    pub school_code: String,
    /// Offset used to render wall-clock times for the API.
    pub utc_offset: FixedOffset,
}

impl Default for TerminalProfile {
    fn default() -> Self {
        TerminalProfile {
            terminal_sn: "TERM-12345".to_string(),
            school_id: 1,
            school_code: "10106".to_string(),
            utc_offset: Utc.fix(),
        }
    }
}

impl TerminalProfile {
    /// Renders a timestamp as `YYYY-MM-DD HH:MM:SS` in the terminal's offset.
    pub fn format_att_time(&self, at: DateTime<Utc>) -> String {
        at.with_timezone(&self.utc_offset)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
    }

    /// Renders the calendar date of a timestamp in the terminal's offset.
    pub fn format_date(&self, at: DateTime<Utc>) -> String {
        at.with_timezone(&self.utc_offset)
            .format("%Y-%m-%d")
            .to_string()
    }
}

// =============================================================================
// Outbound Payload
// =============================================================================

/// Body of `POST /api/{version}/machine-attendance`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendancePayload {
    pub id: u64,
    pub user_id: String,
    pub terminal_sn: String,
    pub user_name: String,
    pub att_time: String,
    pub record_type: String,
    pub school_id: i64,
}

impl AttendancePayload {
    /// Builds the payload for one punch.
    pub fn build(
        id: u64,
        user_id: &str,
        user_name: &str,
        at: DateTime<Utc>,
        profile: &TerminalProfile,
    ) -> Self {
        AttendancePayload {
            id,
            user_id: user_id.to_string(),
            terminal_sn: profile.terminal_sn.clone(),
            user_name: user_name.to_string(),
            att_time: profile.format_att_time(at),
            record_type: DEFAULT_RECORD_TYPE.to_string(),
            school_id: profile.school_id,
        }
    }
}

/// Derives the numeric correlation id from the submission clock and the
/// user id.
///
/// Takes the last 8 digits of `now_millis`, appends the last 4 characters
/// of the user id, truncates to 10 characters and reads the leading digits.
/// Returns `None` when that does not yield a positive integer; callers fall
/// back to a random id.
pub fn derive_record_id(now_millis: i64, user_id: &str) -> Option<u64> {
    let clock = now_millis.max(0).to_string();
    let candidate: String = tail(&clock, 8)
        .chain(tail(user_id, 4))
        .take(10)
        .collect();

    let digits: String = candidate.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse::<u64>().ok().filter(|id| *id > 0)
}

fn tail(s: &str, n: usize) -> impl Iterator<Item = char> + '_ {
    let len = s.chars().count();
    s.chars().skip(len.saturating_sub(n))
}

// =============================================================================
// Notification Events
// =============================================================================

/// Attendance notification emitted after a punch is delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct AttendanceEvent {
    pub student_id: String,
    pub in_time: String,
    pub out_time: Option<String>,
    pub machine_no: Option<String>,
    pub date: String,
    pub attendance_type: String,
    pub school_code: String,
    pub created_at: String,
    pub updated_at: String,
}

impl AttendanceEvent {
    /// Builds the event for a delivered punch.
    pub fn delivered(
        user_id: &str,
        at: DateTime<Utc>,
        profile: &TerminalProfile,
        now: DateTime<Utc>,
    ) -> Self {
        let time = profile.format_att_time(at);
        let stamp = now.to_rfc3339();
        AttendanceEvent {
            student_id: user_id.to_string(),
            in_time: time.clone(),
            out_time: Some(time),
            machine_no: None,
            date: profile.format_date(at),
            attendance_type: ATTENDANCE_TYPE_MACHINE.to_string(),
            school_code: profile.school_code.clone(),
            created_at: stamp.clone(),
            updated_at: stamp,
        }
    }
}

/// Device connection notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DeviceStatus {
    pub connected: bool,
    pub ip: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub connection_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub error: Option<String>,
}

impl DeviceStatus {
    /// The device link is up.
    pub fn connected(ip: Option<String>, kind: ConnectionType) -> Self {
        DeviceStatus {
            connected: true,
            ip,
            connection_type: Some(kind.to_string()),
            error: None,
        }
    }

    /// The device link is down for the given reason.
    pub fn disconnected(ip: Option<String>, error: impl Into<String>) -> Self {
        DeviceStatus {
            connected: false,
            ip,
            connection_type: None,
            error: Some(error.into()),
        }
    }

    /// No device IP has been configured yet.
    pub fn not_configured() -> Self {
        DeviceStatus::disconnected(None, "Device IP not configured")
    }
}
