use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{query, query_as, Postgres, QueryBuilder};
use uuid::Uuid;

use super::{change, ProctoringStore, ScheduleStore};
use crate::config::ProctorConfig;
use crate::db::Db;
use crate::error::{AppError, AppResult};
use crate::feed::{ChangeFeed, ChangeKind};
use crate::models::{
    ListQuery, NewSession, ProctoringEvent, ProctoringLog, ProctoringViolation, ScheduledSession,
    SessionFilter, SessionPatch, SessionRow, SessionStatus,
};

const SESSION_COLUMNS: &str = "id, teacher_id, student_id, course_id, scheduled_at, \
     duration_minutes, status, meeting_url, created_at";

pub struct PgStore {
    db: Db,
    feed: ChangeFeed,
}

impl PgStore {
    pub fn new(db: Db, feed: ChangeFeed) -> Self {
        Self { db, feed }
    }
}

#[async_trait]
impl ScheduleStore for PgStore {
    fn backend_tag(&self) -> &'static str {
        "postgres"
    }

    async fn create(&self, new: NewSession, now: DateTime<Utc>) -> AppResult<ScheduledSession> {
        let row: SessionRow = query_as(&format!(
            r#"
            INSERT INTO video_call_schedules
                (id, teacher_id, student_id, course_id, scheduled_at, duration_minutes, status, created_at)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8)
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(new.teacher_id)
        .bind(new.student_id)
        .bind(new.course_id)
        .bind(new.scheduled_at)
        .bind(new.duration_minutes)
        .bind(SessionStatus::Scheduled.as_str())
        .bind(now)
        .fetch_one(&self.db)
        .await?;

        let session = ScheduledSession::from(row);
        self.feed.publish(change(ChangeKind::Insert, &session));
        Ok(session)
    }

    async fn get(&self, id: Uuid) -> AppResult<ScheduledSession> {
        let row: Option<SessionRow> = query_as(&format!(
            "SELECT {SESSION_COLUMNS} FROM video_call_schedules WHERE id=$1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        row.map(ScheduledSession::from)
            .ok_or(AppError::NotFound("session"))
    }

    async fn list(&self, q: &ListQuery, now: DateTime<Utc>) -> AppResult<Vec<ScheduledSession>> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT {SESSION_COLUMNS} FROM video_call_schedules WHERE "
        ));
        match q.filter {
            SessionFilter::ByTeacher(id) => qb.push("teacher_id = ").push_bind(id),
            SessionFilter::ByStudent(id) => qb.push("student_id = ").push_bind(id),
            SessionFilter::All => qb.push("TRUE"),
        };
        if q.only_future {
            qb.push(" AND scheduled_at >= ").push_bind(now);
        }
        if let Some(status) = q.status {
            qb.push(" AND COALESCE(status, 'scheduled') = ")
                .push_bind(status.as_str());
        }
        qb.push(" ORDER BY scheduled_at ASC, created_at ASC");
        if let Some(limit) = q.limit {
            qb.push(" LIMIT ").push_bind(limit.max(0));
        }

        let rows = qb
            .build_query_as::<SessionRow>()
            .fetch_all(&self.db)
            .await?;
        Ok(rows.into_iter().map(ScheduledSession::from).collect())
    }

    async fn update(&self, id: Uuid, patch: &SessionPatch) -> AppResult<ScheduledSession> {
        let row: Option<SessionRow> = query_as(&format!(
            r#"
            UPDATE video_call_schedules
            SET meeting_url = COALESCE($2, meeting_url),
                status = COALESCE($3, status)
            WHERE id = $1
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(patch.meeting_url.as_deref())
        .bind(patch.status.map(|s| s.as_str()))
        .fetch_optional(&self.db)
        .await?;

        let session = row
            .map(ScheduledSession::from)
            .ok_or(AppError::NotFound("session"))?;
        self.feed.publish(change(ChangeKind::Update, &session));
        Ok(session)
    }

    async fn assign_meeting_url(&self, id: Uuid, url: &str) -> AppResult<(ScheduledSession, bool)> {
        let row: Option<SessionRow> = query_as(&format!(
            r#"
            UPDATE video_call_schedules
            SET meeting_url = $2
            WHERE id = $1 AND meeting_url IS NULL
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(url)
        .fetch_optional(&self.db)
        .await?;

        match row {
            Some(row) => {
                let session = ScheduledSession::from(row);
                self.feed.publish(change(ChangeKind::Update, &session));
                Ok((session, true))
            }
            // already assigned, or gone
            None => Ok((self.get(id).await?, false)),
        }
    }

    async fn delete(&self, id: Uuid) -> AppResult<()> {
        let row: Option<SessionRow> = query_as(&format!(
            "DELETE FROM video_call_schedules WHERE id=$1 RETURNING {SESSION_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        let session = row
            .map(ScheduledSession::from)
            .ok_or(AppError::NotFound("session"))?;
        self.feed.publish(change(ChangeKind::Delete, &session));
        Ok(())
    }
}

#[async_trait]
impl ProctoringStore for PgStore {
    async fn record(
        &self,
        student_id: Uuid,
        event: &ProctoringEvent,
        policy: &ProctorConfig,
        now: DateTime<Utc>,
    ) -> AppResult<ProctoringViolation> {
        let mut tx = self.db.begin().await?;

        query(
            r#"
            INSERT INTO proctoring_logs (id, submission_id, student_id, event_type, event_data, timestamp)
            VALUES ($1,$2,$3,$4,$5,$6)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(event.submission_id)
        .bind(student_id)
        .bind(event.event_type.as_str())
        .bind(&event.event_data)
        .bind(event.timestamp)
        .execute(&mut *tx)
        .await?;

        // single statement so concurrent events cannot lose an increment
        let row: ProctoringViolation = query_as(
            r#"
            INSERT INTO proctoring_violations
                (id, student_id, submission_id, assignment_id, violation_count, blocked_until, created_at, updated_at)
            VALUES ($1, $2, $3, $4, 1,
                    CASE WHEN $5::int4 IS NOT NULL AND 1 >= $5::int4 THEN $6::timestamptz END,
                    $7, $7)
            ON CONFLICT (student_id, submission_id) DO UPDATE SET
                violation_count = proctoring_violations.violation_count + 1,
                assignment_id = COALESCE(proctoring_violations.assignment_id, EXCLUDED.assignment_id),
                blocked_until = CASE
                    WHEN proctoring_violations.blocked_until IS NULL
                         AND $5::int4 IS NOT NULL
                         AND proctoring_violations.violation_count + 1 >= $5::int4
                    THEN $6::timestamptz
                    ELSE proctoring_violations.blocked_until
                END,
                updated_at = EXCLUDED.updated_at
            RETURNING id, student_id, submission_id, assignment_id, violation_count,
                      blocked_until, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(student_id)
        .bind(event.submission_id)
        .bind(event.assignment_id)
        .bind(policy.block_threshold)
        .bind(now + policy.block_duration)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(row)
    }

    async fn logs(&self, submission_id: Uuid) -> AppResult<Vec<ProctoringLog>> {
        let rows = query_as::<_, ProctoringLog>(
            r#"
            SELECT id, submission_id, student_id, event_type, event_data, timestamp
            FROM proctoring_logs WHERE submission_id=$1 ORDER BY timestamp ASC
            "#,
        )
        .bind(submission_id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    async fn violation(
        &self,
        student_id: Uuid,
        submission_id: Uuid,
    ) -> AppResult<Option<ProctoringViolation>> {
        let row = query_as::<_, ProctoringViolation>(
            r#"
            SELECT id, student_id, submission_id, assignment_id, violation_count,
                   blocked_until, created_at, updated_at
            FROM proctoring_violations WHERE student_id=$1 AND submission_id=$2
            "#,
        )
        .bind(student_id)
        .bind(submission_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row)
    }

    async fn violations_for_assignment(
        &self,
        student_id: Uuid,
        assignment_id: Uuid,
    ) -> AppResult<Vec<ProctoringViolation>> {
        let rows = query_as::<_, ProctoringViolation>(
            r#"
            SELECT id, student_id, submission_id, assignment_id, violation_count,
                   blocked_until, created_at, updated_at
            FROM proctoring_violations WHERE student_id=$1 AND assignment_id=$2
            "#,
        )
        .bind(student_id)
        .bind(assignment_id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }
}
