use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{blocked_until_after, change, ProctoringStore, ScheduleStore};
use crate::config::ProctorConfig;
use crate::error::{AppError, AppResult};
use crate::feed::{ChangeFeed, ChangeKind};
use crate::models::{
    ListQuery, NewSession, ProctoringEvent, ProctoringLog, ProctoringViolation, ScheduledSession,
    SessionPatch, SessionStatus,
};

/// Process-local store used by tests and `STORE_BACKEND=memory`.
pub struct MemoryStore {
    sessions: Mutex<HashMap<Uuid, ScheduledSession>>,
    logs: Mutex<Vec<ProctoringLog>>,
    violations: Mutex<HashMap<(Uuid, Uuid), ProctoringViolation>>,
    feed: ChangeFeed,
}

impl MemoryStore {
    pub fn new(feed: ChangeFeed) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            logs: Mutex::new(Vec::new()),
            violations: Mutex::new(HashMap::new()),
            feed,
        }
    }
}

#[async_trait]
impl ScheduleStore for MemoryStore {
    fn backend_tag(&self) -> &'static str {
        "memory"
    }

    async fn create(&self, new: NewSession, now: DateTime<Utc>) -> AppResult<ScheduledSession> {
        let session = ScheduledSession {
            id: Uuid::new_v4(),
            teacher_id: new.teacher_id,
            student_id: new.student_id,
            course_id: new.course_id,
            scheduled_at: new.scheduled_at,
            duration_minutes: new.duration_minutes,
            status: SessionStatus::Scheduled,
            meeting_url: None,
            created_at: now,
        };
        self.sessions.lock().await.insert(session.id, session.clone());
        self.feed.publish(change(ChangeKind::Insert, &session));
        Ok(session)
    }

    async fn get(&self, id: Uuid) -> AppResult<ScheduledSession> {
        self.sessions
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or(AppError::NotFound("session"))
    }

    async fn list(&self, query: &ListQuery, now: DateTime<Utc>) -> AppResult<Vec<ScheduledSession>> {
        let mut out: Vec<ScheduledSession> = self
            .sessions
            .lock()
            .await
            .values()
            .filter(|s| query.matches(s, now))
            .cloned()
            .collect();
        out.sort_by_key(|s| (s.scheduled_at, s.created_at));
        if let Some(limit) = query.limit {
            out.truncate(usize::try_from(limit).unwrap_or(0));
        }
        Ok(out)
    }

    async fn update(&self, id: Uuid, patch: &SessionPatch) -> AppResult<ScheduledSession> {
        let updated = {
            let mut sessions = self.sessions.lock().await;
            let session = sessions.get_mut(&id).ok_or(AppError::NotFound("session"))?;
            patch.apply(session);
            session.clone()
        };
        self.feed.publish(change(ChangeKind::Update, &updated));
        Ok(updated)
    }

    async fn assign_meeting_url(&self, id: Uuid, url: &str) -> AppResult<(ScheduledSession, bool)> {
        let (session, created) = {
            let mut sessions = self.sessions.lock().await;
            let session = sessions.get_mut(&id).ok_or(AppError::NotFound("session"))?;
            let created = session.meeting_url.is_none();
            if created {
                session.meeting_url = Some(url.to_string());
            }
            (session.clone(), created)
        };
        if created {
            self.feed.publish(change(ChangeKind::Update, &session));
        }
        Ok((session, created))
    }

    async fn delete(&self, id: Uuid) -> AppResult<()> {
        let removed = self
            .sessions
            .lock()
            .await
            .remove(&id)
            .ok_or(AppError::NotFound("session"))?;
        self.feed.publish(change(ChangeKind::Delete, &removed));
        Ok(())
    }
}

#[async_trait]
impl ProctoringStore for MemoryStore {
    async fn record(
        &self,
        student_id: Uuid,
        event: &ProctoringEvent,
        policy: &ProctorConfig,
        now: DateTime<Utc>,
    ) -> AppResult<ProctoringViolation> {
        self.logs.lock().await.push(ProctoringLog {
            id: Uuid::new_v4(),
            submission_id: event.submission_id,
            student_id,
            event_type: event.event_type.as_str().to_string(),
            event_data: event.event_data.clone(),
            timestamp: event.timestamp,
        });

        let mut violations = self.violations.lock().await;
        let row = violations
            .entry((student_id, event.submission_id))
            .or_insert_with(|| ProctoringViolation {
                id: Uuid::new_v4(),
                student_id,
                submission_id: event.submission_id,
                assignment_id: event.assignment_id,
                violation_count: 0,
                blocked_until: None,
                created_at: now,
                updated_at: now,
            });
        row.violation_count += 1;
        row.updated_at = now;
        if row.assignment_id.is_none() {
            row.assignment_id = event.assignment_id;
        }
        row.blocked_until = blocked_until_after(row.blocked_until, row.violation_count, policy, now);
        Ok(row.clone())
    }

    async fn logs(&self, submission_id: Uuid) -> AppResult<Vec<ProctoringLog>> {
        let mut out: Vec<ProctoringLog> = self
            .logs
            .lock()
            .await
            .iter()
            .filter(|l| l.submission_id == submission_id)
            .cloned()
            .collect();
        out.sort_by_key(|l| l.timestamp);
        Ok(out)
    }

    async fn violation(
        &self,
        student_id: Uuid,
        submission_id: Uuid,
    ) -> AppResult<Option<ProctoringViolation>> {
        Ok(self
            .violations
            .lock()
            .await
            .get(&(student_id, submission_id))
            .cloned())
    }

    async fn violations_for_assignment(
        &self,
        student_id: Uuid,
        assignment_id: Uuid,
    ) -> AppResult<Vec<ProctoringViolation>> {
        Ok(self
            .violations
            .lock()
            .await
            .values()
            .filter(|v| v.student_id == student_id && v.assignment_id == Some(assignment_id))
            .cloned()
            .collect())
    }
}
