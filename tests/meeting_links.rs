mod support;

use async_trait::async_trait;
use axum::http::{Method, StatusCode};
use chrono::Duration;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Barrier;
use uuid::Uuid;

use learnify_runtime::{
    clock::FixedClock,
    config::Config,
    error::AppResult,
    feed::ChangeFeed,
    meeting::{JoinToken, MeetingProvider},
    models::ScheduledSession,
    store::MemoryStore,
    AppState,
};
use support::{call, schedule, student, t0, teacher};

/// Hands out a distinct link per call, holding every caller until two have
/// asked so that both requests see an unassigned session.
struct GatedLinks {
    gate: Barrier,
    issued: AtomicUsize,
}

#[async_trait]
impl MeetingProvider for GatedLinks {
    async fn join_token(&self, _session_id: Uuid, room_id: &str, user_id: Uuid) -> AppResult<JoinToken> {
        Ok(JoinToken {
            token: "unused".into(),
            app_id: None,
            room_id: room_id.to_string(),
            user_id,
        })
    }

    async fn meeting_link(&self, session: &ScheduledSession) -> AppResult<String> {
        let n = self.issued.fetch_add(1, Ordering::SeqCst);
        self.gate.wait().await;
        Ok(format!("https://meet.example/{}/{n}", session.id))
    }
}

#[tokio::test]
async fn concurrent_link_requests_agree_on_one_url() {
    let feed = ChangeFeed::default();
    let state = AppState::new(
        Arc::new(MemoryStore::new(feed.clone())),
        Arc::new(GatedLinks {
            gate: Barrier::new(2),
            issued: AtomicUsize::new(0),
        }),
        Arc::new(FixedClock::new(t0())),
        feed,
        Config::default(),
    );
    let app = learnify_runtime::app(state);
    let t = teacher();
    let s = student();
    let id = schedule(&app, t, s, t0() + Duration::hours(1), 60).await;
    let uri = format!("/api/sessions/{id}/meeting-link");

    let (a, b) = tokio::join!(
        call(&app, Method::POST, &uri, Some(t), None),
        call(&app, Method::POST, &uri, Some(t), None),
    );
    assert_eq!(a.0, StatusCode::OK, "{}", a.1);
    assert_eq!(b.0, StatusCode::OK, "{}", b.1);

    let created: Vec<bool> = [&a.1, &b.1]
        .iter()
        .map(|v| v["created"].as_bool().unwrap())
        .collect();
    assert_eq!(created.iter().filter(|c| **c).count(), 1, "{created:?}");

    let (_, stored) = call(&app, Method::GET, &format!("/api/sessions/{id}"), Some(t), None).await;
    assert_eq!(a.1["meeting_url"], stored["meeting_url"]);
    assert_eq!(b.1["meeting_url"], stored["meeting_url"]);
}
