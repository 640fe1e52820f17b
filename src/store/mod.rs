//! Persistence seams for schedules and proctoring records.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::ProctorConfig;
use crate::error::AppResult;
use crate::feed::{ChangeEvent, ChangeKind, SCHEDULES_TABLE};
use crate::models::{
    AccessDecision, ListQuery, NewSession, ProctoringEvent, ProctoringLog, ProctoringViolation,
    ScheduledSession, SessionPatch,
};

#[async_trait]
pub trait ScheduleStore: Send + Sync {
    fn backend_tag(&self) -> &'static str;

    async fn create(&self, new: NewSession, now: DateTime<Utc>) -> AppResult<ScheduledSession>;

    async fn get(&self, id: Uuid) -> AppResult<ScheduledSession>;

    /// Sessions matching `query`, ascending by `scheduled_at`.
    async fn list(&self, query: &ListQuery, now: DateTime<Utc>) -> AppResult<Vec<ScheduledSession>>;

    async fn update(&self, id: Uuid, patch: &SessionPatch) -> AppResult<ScheduledSession>;

    /// Stores `url` only if the session has no meeting URL yet. Returns the
    /// session as stored and whether this call wrote the URL.
    async fn assign_meeting_url(&self, id: Uuid, url: &str) -> AppResult<(ScheduledSession, bool)>;

    async fn delete(&self, id: Uuid) -> AppResult<()>;
}

#[async_trait]
pub trait ProctoringStore: Send + Sync {
    /// Appends the log row and bumps the violation counter for the
    /// (student, submission) pair, returning the updated counter.
    async fn record(
        &self,
        student_id: Uuid,
        event: &ProctoringEvent,
        policy: &ProctorConfig,
        now: DateTime<Utc>,
    ) -> AppResult<ProctoringViolation>;

    async fn logs(&self, submission_id: Uuid) -> AppResult<Vec<ProctoringLog>>;

    async fn violation(
        &self,
        student_id: Uuid,
        submission_id: Uuid,
    ) -> AppResult<Option<ProctoringViolation>>;

    /// Rows for any of the student's submissions under `assignment_id`.
    async fn violations_for_assignment(
        &self,
        student_id: Uuid,
        assignment_id: Uuid,
    ) -> AppResult<Vec<ProctoringViolation>>;

    async fn access(
        &self,
        student_id: Uuid,
        assignment_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<AccessDecision> {
        let rows = self.violations_for_assignment(student_id, assignment_id).await?;
        Ok(access_from(&rows, now))
    }
}

/// `blocked_until` after a counter reaches `count`. Set once, on the first
/// crossing of the threshold; never moved afterwards.
pub fn blocked_until_after(
    current: Option<DateTime<Utc>>,
    count: i32,
    policy: &ProctorConfig,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if current.is_some() {
        return current;
    }
    match policy.block_threshold {
        Some(threshold) if count >= threshold => Some(now + policy.block_duration),
        _ => None,
    }
}

pub fn access_from(rows: &[ProctoringViolation], now: DateTime<Utc>) -> AccessDecision {
    let blocked_until = rows
        .iter()
        .filter(|v| v.is_blocked(now))
        .filter_map(|v| v.blocked_until)
        .max();
    AccessDecision {
        allowed: blocked_until.is_none(),
        blocked_until,
    }
}

fn change(kind: ChangeKind, session: &ScheduledSession) -> ChangeEvent {
    ChangeEvent {
        table: SCHEDULES_TABLE,
        kind,
        row_id: session.id,
        teacher_id: session.teacher_id,
        student_id: session.student_id,
    }
}
