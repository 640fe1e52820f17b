use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::{Identity, Role},
    error::{AppError, AppResult},
    meeting::JoinToken,
    models::*,
    notify::{due_notifications, Notification, ReminderTracker},
    window, AppState,
};

pub fn router(state: AppState) -> Router {
    Router::new()
        // scheduling
        .route("/api/sessions", post(create_session).get(list_sessions))
        .route(
            "/api/sessions/:id",
            get(get_session).patch(patch_session).delete(delete_session),
        )
        .route("/api/sessions/:id/window", get(session_window))
        .route("/api/sessions/:id/join", post(join_session))
        .route("/api/sessions/:id/meeting-link", post(assign_meeting_link))
        .route("/api/notifications", get(notifications))
        // proctoring
        .route("/api/proctoring/events", post(record_event))
        .route("/api/proctoring/submissions/:id", get(submission_report))
        .route("/api/proctoring/access", get(test_access))
        .with_state(state)
}

// --- sessions ---

async fn create_session(
    State(st): State<AppState>,
    ident: Identity,
    Json(mut req): Json<CreateSessionReq>,
) -> AppResult<(StatusCode, Json<ScheduledSession>)> {
    ident.require(Role::Teacher)?;
    match req.teacher_id {
        Some(id) if id != ident.user_id => {
            return Err(AppError::Forbidden(
                "teachers can only schedule their own sessions".into(),
            ))
        }
        Some(_) => {}
        None => req.teacher_id = Some(ident.user_id),
    }
    let new = NewSession::try_from(req).map_err(AppError::Validation)?;

    let session = st.schedules.create(new, st.clock.now()).await?;
    tracing::info!(
        session_id = %session.id,
        teacher_id = %session.teacher_id,
        student_id = %session.student_id,
        scheduled_at = %session.scheduled_at,
        "session scheduled"
    );
    Ok((StatusCode::CREATED, Json(session)))
}

#[derive(Deserialize, Debug, Default)]
struct ListParams {
    upcoming: Option<bool>,
    status: Option<SessionStatus>,
    limit: Option<i64>,
}

async fn list_sessions(
    State(st): State<AppState>,
    ident: Identity,
    Query(p): Query<ListParams>,
) -> AppResult<Json<Vec<ScheduledSession>>> {
    let query = ListQuery {
        filter: ident.schedule_filter()?,
        only_future: p.upcoming.unwrap_or(false),
        status: p.status,
        limit: p.limit,
    };
    Ok(Json(st.schedules.list(&query, st.clock.now()).await?))
}

async fn get_session(
    State(st): State<AppState>,
    ident: Identity,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ScheduledSession>> {
    Ok(Json(load_visible(&st, ident, id).await?))
}

async fn patch_session(
    State(st): State<AppState>,
    ident: Identity,
    Path(id): Path<Uuid>,
    Json(patch): Json<SessionPatch>,
) -> AppResult<Json<ScheduledSession>> {
    if patch.is_empty() {
        return Err(AppError::Validation("nothing to update".into()));
    }
    load_owned(&st, ident, id).await?;
    let session = st.schedules.update(id, &patch).await?;
    tracing::info!(session_id = %id, status = %session.status, "session updated");
    Ok(Json(session))
}

async fn delete_session(
    State(st): State<AppState>,
    ident: Identity,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    load_owned(&st, ident, id).await?;
    st.schedules.delete(id).await?;
    tracing::info!(session_id = %id, "session deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize, Debug)]
struct WindowView {
    session_id: Uuid,
    joinable: bool,
    minutes_until: f64,
    label: String,
    opens_at: DateTime<Utc>,
    closes_at: DateTime<Utc>,
}

async fn session_window(
    State(st): State<AppState>,
    ident: Identity,
    Path(id): Path<Uuid>,
) -> AppResult<Json<WindowView>> {
    let s = load_visible(&st, ident, id).await?;
    let now = st.clock.now();
    Ok(Json(WindowView {
        session_id: s.id,
        joinable: window::is_joinable(now, s.scheduled_at, s.duration_minutes),
        minutes_until: window::minutes_until(now, s.scheduled_at),
        label: window::time_until_label(now, s.scheduled_at),
        opens_at: s.scheduled_at - window::join_lead(),
        closes_at: s.scheduled_at + Duration::minutes(i64::from(s.duration_minutes)),
    }))
}

#[derive(Deserialize, Debug, Default)]
struct JoinReq {
    room_id: Option<String>,
}

async fn join_session(
    State(st): State<AppState>,
    ident: Identity,
    Path(id): Path<Uuid>,
    body: Option<Json<JoinReq>>,
) -> AppResult<Json<JoinToken>> {
    let s = load_participant(&st, ident, id).await?;
    let now = st.clock.now();
    if s.status == SessionStatus::Cancelled
        || !window::is_joinable(now, s.scheduled_at, s.duration_minutes)
    {
        return Err(AppError::NotJoinable);
    }
    let room_id = body
        .and_then(|Json(b)| b.room_id)
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| window::room_id(s.id, now));

    let token = st.meetings.join_token(s.id, &room_id, ident.user_id).await?;
    tracing::info!(session_id = %s.id, user_id = %ident.user_id, room_id = %room_id, "joined session");
    Ok(Json(token))
}

#[derive(Serialize, Debug)]
struct MeetingLinkView {
    session_id: Uuid,
    meeting_url: String,
    created: bool,
}

async fn assign_meeting_link(
    State(st): State<AppState>,
    ident: Identity,
    Path(id): Path<Uuid>,
) -> AppResult<Json<MeetingLinkView>> {
    let s = load_owned(&st, ident, id).await?;
    if let Some(url) = &s.meeting_url {
        return Ok(Json(MeetingLinkView {
            session_id: id,
            meeting_url: url.clone(),
            created: false,
        }));
    }
    if s.status == SessionStatus::Cancelled {
        return Err(AppError::Validation("session is cancelled".into()));
    }

    let url = st.meetings.meeting_link(&s).await?;
    let (stored, created) = st.schedules.assign_meeting_url(id, &url).await?;
    if created {
        tracing::info!(session_id = %id, "meeting link assigned");
    } else {
        tracing::debug!(session_id = %id, "meeting link already assigned, discarding new one");
    }
    Ok(Json(MeetingLinkView {
        session_id: id,
        meeting_url: stored.meeting_url.unwrap_or(url),
        created,
    }))
}

async fn notifications(
    State(st): State<AppState>,
    ident: Identity,
) -> AppResult<Json<Vec<Notification>>> {
    let now = st.clock.now();
    let upcoming = st
        .schedules
        .list(&ListQuery::upcoming(ident.schedule_filter()?), now)
        .await?;

    if !st.config.reminders.dedupe {
        return Ok(Json(due_notifications(&upcoming, now)));
    }

    let mut trackers = st.reminders.lock().await;
    let tracker = trackers
        .entry(ident.user_id)
        .or_insert_with(|| ReminderTracker::new(true));
    let due = tracker.evaluate(&upcoming, now);
    if tracker.is_idle() {
        trackers.remove(&ident.user_id);
    }
    Ok(Json(due))
}

// --- proctoring ---

async fn record_event(
    State(st): State<AppState>,
    ident: Identity,
    Json(event): Json<ProctoringEvent>,
) -> AppResult<(StatusCode, Json<ProctoringViolation>)> {
    ident.require(Role::Student)?;
    let now = st.clock.now();
    let violation = st
        .proctoring
        .record(ident.user_id, &event, &st.config.proctor, now)
        .await?;
    tracing::info!(
        submission_id = %event.submission_id,
        student_id = %ident.user_id,
        event_type = %event.event_type,
        count = violation.violation_count,
        "proctoring event recorded"
    );
    if violation.is_blocked(now) {
        tracing::warn!(student_id = %ident.user_id, submission_id = %event.submission_id, "student blocked");
    }
    Ok((StatusCode::CREATED, Json(violation)))
}

#[derive(Deserialize, Debug, Default)]
struct ReportParams {
    student_id: Option<Uuid>,
}

#[derive(Serialize, Debug)]
struct SubmissionReport {
    violation: Option<ProctoringViolation>,
    logs: Vec<ProctoringLog>,
}

async fn submission_report(
    State(st): State<AppState>,
    ident: Identity,
    Path(submission_id): Path<Uuid>,
    Query(p): Query<ReportParams>,
) -> AppResult<Json<SubmissionReport>> {
    let student_id = match ident.role {
        Role::Student => ident.user_id,
        Role::Teacher | Role::Admin => p
            .student_id
            .ok_or_else(|| AppError::Validation("student_id is required".into()))?,
    };
    let violation = st.proctoring.violation(student_id, submission_id).await?;
    let logs = st
        .proctoring
        .logs(submission_id)
        .await?
        .into_iter()
        .filter(|l| l.student_id == student_id)
        .collect();
    Ok(Json(SubmissionReport { violation, logs }))
}

#[derive(Deserialize, Debug)]
struct AccessParams {
    assignment_id: Uuid,
}

async fn test_access(
    State(st): State<AppState>,
    ident: Identity,
    Query(p): Query<AccessParams>,
) -> AppResult<Json<AccessDecision>> {
    ident.require(Role::Student)?;
    let decision = st
        .proctoring
        .access(ident.user_id, p.assignment_id, st.clock.now())
        .await?;
    Ok(Json(decision))
}

// --- helpers ---

/// Participants and admins may read a session.
async fn load_visible(st: &AppState, ident: Identity, id: Uuid) -> AppResult<ScheduledSession> {
    let s = st.schedules.get(id).await?;
    if ident.role == Role::Admin || s.is_participant(ident.user_id) {
        Ok(s)
    } else {
        Err(not_authorized())
    }
}

async fn load_participant(st: &AppState, ident: Identity, id: Uuid) -> AppResult<ScheduledSession> {
    let s = st.schedules.get(id).await?;
    if s.is_participant(ident.user_id) {
        Ok(s)
    } else {
        Err(not_authorized())
    }
}

/// Only the session's teacher may change it.
async fn load_owned(st: &AppState, ident: Identity, id: Uuid) -> AppResult<ScheduledSession> {
    let s = st.schedules.get(id).await?;
    if s.teacher_id == ident.user_id {
        Ok(s)
    } else {
        Err(not_authorized())
    }
}

fn not_authorized() -> AppError {
    AppError::Forbidden("not authorized to access this session".into())
}
