#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

use learnify_runtime::{
    auth::{USER_ID_HEADER, USER_ROLE_HEADER},
    clock::FixedClock,
    config::Config,
    error::AppResult,
    feed::ChangeFeed,
    meeting::{JoinToken, MeetingProvider},
    models::ScheduledSession,
    store::MemoryStore,
    AppState,
};

#[derive(Default)]
pub struct FakeMeetings {
    pub token_calls: AtomicUsize,
    pub link_calls: AtomicUsize,
}

#[async_trait]
impl MeetingProvider for FakeMeetings {
    async fn join_token(&self, _session_id: Uuid, room_id: &str, user_id: Uuid) -> AppResult<JoinToken> {
        self.token_calls.fetch_add(1, Ordering::SeqCst);
        Ok(JoinToken {
            token: format!("tok-{room_id}"),
            app_id: Some(42),
            room_id: room_id.to_string(),
            user_id,
        })
    }

    async fn meeting_link(&self, session: &ScheduledSession) -> AppResult<String> {
        self.link_calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("https://meet.example/{}", session.id))
    }
}

pub struct Harness {
    pub app: Router,
    pub state: AppState,
    pub clock: Arc<FixedClock>,
    pub store: Arc<MemoryStore>,
    pub feed: ChangeFeed,
    pub meetings: Arc<FakeMeetings>,
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 14, 0, 0).unwrap()
}

pub fn harness() -> Harness {
    harness_with(Config::default())
}

pub fn harness_with(config: Config) -> Harness {
    let feed = ChangeFeed::default();
    let store = Arc::new(MemoryStore::new(feed.clone()));
    let clock = Arc::new(FixedClock::new(t0()));
    let meetings = Arc::new(FakeMeetings::default());
    let state = AppState::new(
        store.clone(),
        meetings.clone(),
        clock.clone(),
        feed.clone(),
        config,
    );
    Harness {
        app: learnify_runtime::app(state.clone()),
        state,
        clock,
        store,
        feed,
        meetings,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct As {
    pub id: Uuid,
    pub role: &'static str,
}

pub fn teacher() -> As {
    As { id: Uuid::new_v4(), role: "teacher" }
}

pub fn student() -> As {
    As { id: Uuid::new_v4(), role: "student" }
}

pub async fn call(
    app: &Router,
    method: Method,
    uri: &str,
    who: Option<As>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(who) = who {
        req = req
            .header(USER_ID_HEADER, who.id.to_string())
            .header(USER_ROLE_HEADER, who.role);
    }
    let req = match body {
        Some(v) => req
            .header("content-type", "application/json")
            .body(Body::from(v.to_string()))
            .unwrap(),
        None => req.body(Body::empty()).unwrap(),
    };

    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into()))
    };
    (status, json)
}

/// Schedules a session through the API and returns its id.
pub async fn schedule(app: &Router, by: As, student: As, at: DateTime<Utc>, minutes: i32) -> Uuid {
    let (status, body) = call(
        app,
        Method::POST,
        "/api/sessions",
        Some(by),
        Some(serde_json::json!({
            "student_id": student.id,
            "scheduled_at": at,
            "duration_minutes": minutes,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    Uuid::parse_str(body["id"].as_str().unwrap()).unwrap()
}
