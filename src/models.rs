use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub const DEFAULT_DURATION_MINUTES: i32 = 60;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Scheduled,
    Completed,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Scheduled => "scheduled",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(SessionStatus::Scheduled),
            "completed" => Ok(SessionStatus::Completed),
            "cancelled" => Ok(SessionStatus::Cancelled),
            other => Err(format!("unknown session status: {other}")),
        }
    }
}

/// A one-on-one video call slot between a teacher and a student.
#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ScheduledSession {
    pub id: Uuid,
    pub teacher_id: Uuid,
    pub student_id: Uuid,
    pub course_id: Option<Uuid>,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: i32,
    pub status: SessionStatus,
    pub meeting_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ScheduledSession {
    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.teacher_id == user_id || self.student_id == user_id
    }
}

/// Row shape of `video_call_schedules`; status is TEXT in the table.
#[derive(sqlx::FromRow, Debug, Clone)]
pub struct SessionRow {
    pub id: Uuid,
    pub teacher_id: Uuid,
    pub student_id: Uuid,
    pub course_id: Option<Uuid>,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: Option<i32>,
    pub status: Option<String>,
    pub meeting_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<SessionRow> for ScheduledSession {
    fn from(row: SessionRow) -> Self {
        let status = row
            .status
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(SessionStatus::Scheduled);
        ScheduledSession {
            id: row.id,
            teacher_id: row.teacher_id,
            student_id: row.student_id,
            course_id: row.course_id,
            scheduled_at: row.scheduled_at,
            duration_minutes: row.duration_minutes.unwrap_or(DEFAULT_DURATION_MINUTES),
            status,
            meeting_url: row.meeting_url,
            created_at: row.created_at,
        }
    }
}

/// Incoming schedule request. Every field is optional on the wire so that
/// missing values surface as validation errors rather than 422s.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct CreateSessionReq {
    pub teacher_id: Option<Uuid>,
    pub student_id: Option<Uuid>,
    pub course_id: Option<Uuid>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub duration_minutes: Option<i32>,
}

/// A validated session ready to be inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSession {
    pub teacher_id: Uuid,
    pub student_id: Uuid,
    pub course_id: Option<Uuid>,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: i32,
}

impl TryFrom<CreateSessionReq> for NewSession {
    type Error = String;

    fn try_from(req: CreateSessionReq) -> Result<Self, Self::Error> {
        let teacher_id = req.teacher_id.ok_or("teacher is required")?;
        let student_id = req.student_id.ok_or("student is required")?;
        let scheduled_at = req.scheduled_at.ok_or("scheduled time is required")?;
        let duration_minutes = req.duration_minutes.unwrap_or(DEFAULT_DURATION_MINUTES);
        if duration_minutes <= 0 {
            return Err("duration must be positive".into());
        }
        Ok(NewSession {
            teacher_id,
            student_id,
            course_id: req.course_id,
            scheduled_at,
            duration_minutes,
        })
    }
}

/// The only mutable fields of a session. `scheduled_at` is fixed at creation.
#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SessionPatch {
    pub meeting_url: Option<String>,
    pub status: Option<SessionStatus>,
}

impl SessionPatch {
    pub fn is_empty(&self) -> bool {
        self.meeting_url.is_none() && self.status.is_none()
    }

    pub fn apply(&self, session: &mut ScheduledSession) {
        if let Some(url) = &self.meeting_url {
            session.meeting_url = Some(url.clone());
        }
        if let Some(status) = self.status {
            session.status = status;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionFilter {
    ByTeacher(Uuid),
    ByStudent(Uuid),
    /// Every session; used by the server-side reminder worker.
    All,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListQuery {
    pub filter: SessionFilter,
    pub only_future: bool,
    pub status: Option<SessionStatus>,
    pub limit: Option<i64>,
}

impl ListQuery {
    pub fn new(filter: SessionFilter) -> Self {
        Self {
            filter,
            only_future: false,
            status: None,
            limit: None,
        }
    }

    pub fn upcoming(filter: SessionFilter) -> Self {
        Self {
            only_future: true,
            status: Some(SessionStatus::Scheduled),
            ..Self::new(filter)
        }
    }

    pub fn matches(&self, session: &ScheduledSession, now: DateTime<Utc>) -> bool {
        let owner = match self.filter {
            SessionFilter::ByTeacher(id) => session.teacher_id == id,
            SessionFilter::ByStudent(id) => session.student_id == id,
            SessionFilter::All => true,
        };
        owner
            && (!self.only_future || session.scheduled_at >= now)
            && self.status.map_or(true, |s| session.status == s)
    }
}

// --- proctoring ---

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    TabSwitch,
    WindowBlur,
    CopyAttempt,
    PasteAttempt,
    RightClick,
    FullscreenExit,
    FullscreenDenied,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::TabSwitch => "tab_switch",
            ViolationKind::WindowBlur => "window_blur",
            ViolationKind::CopyAttempt => "copy_attempt",
            ViolationKind::PasteAttempt => "paste_attempt",
            ViolationKind::RightClick => "right_click",
            ViolationKind::FullscreenExit => "fullscreen_exit",
            ViolationKind::FullscreenDenied => "fullscreen_denied",
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One captured proctoring event as posted by the test client.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProctoringEvent {
    pub submission_id: Uuid,
    pub assignment_id: Option<Uuid>,
    pub event_type: ViolationKind,
    #[serde(default)]
    pub event_data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProctoringLog {
    pub id: Uuid,
    pub submission_id: Uuid,
    pub student_id: Uuid,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProctoringViolation {
    pub id: Uuid,
    pub student_id: Uuid,
    pub submission_id: Uuid,
    pub assignment_id: Option<Uuid>,
    pub violation_count: i32,
    pub blocked_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProctoringViolation {
    pub fn is_blocked(&self, now: DateTime<Utc>) -> bool {
        self.blocked_until.map_or(false, |until| until > now)
    }
}

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AccessDecision {
    pub allowed: bool,
    pub blocked_until: Option<DateTime<Utc>>,
}
