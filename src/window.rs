// Join-window and countdown helpers for scheduled calls.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

/// Minutes before the scheduled start that a call may be joined.
pub const JOIN_LEAD_MINUTES: i64 = 5;

pub fn join_lead() -> Duration {
    Duration::minutes(JOIN_LEAD_MINUTES)
}

/// True from [`JOIN_LEAD_MINUTES`] before `scheduled_at` until the nominal end of the
/// session. Status is not consulted; an elapsed window stays closed.
pub fn is_joinable(now: DateTime<Utc>, scheduled_at: DateTime<Utc>, duration_minutes: i32) -> bool {
    let until_start = scheduled_at - now;
    let since_start = now - scheduled_at;
    until_start <= join_lead() && since_start <= Duration::minutes(i64::from(duration_minutes))
}

pub fn minutes_until(now: DateTime<Utc>, scheduled_at: DateTime<Utc>) -> f64 {
    (scheduled_at - now).num_milliseconds() as f64 / 60_000.0
}

pub fn time_until_label(now: DateTime<Utc>, scheduled_at: DateTime<Utc>) -> String {
    let minutes = minutes_until(now, scheduled_at).floor() as i64;
    if minutes < 0 {
        return "In progress".into();
    }
    if minutes == 0 {
        return "Starting now".into();
    }
    if minutes < 60 {
        return format!("In {minutes} minutes");
    }
    let hours = minutes / 60;
    format!("In {} {}", hours, if hours == 1 { "hour" } else { "hours" })
}

pub fn room_id(session_id: Uuid, now: DateTime<Utc>) -> String {
    format!("room-{}-{}", session_id, now.timestamp_millis())
}
