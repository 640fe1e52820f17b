mod support;

use axum::http::{Method, StatusCode};
use chrono::Duration;
use learnify_runtime::config::Config;
use serde_json::{json, Value};
use support::{call, harness, harness_with, student, t0, teacher, As};
use uuid::Uuid;

fn event(submission: Uuid, assignment: Uuid, kind: &str) -> Value {
    json!({
        "submission_id": submission,
        "assignment_id": assignment,
        "event_type": kind,
        "event_data": { "timestamp": t0() },
        "timestamp": t0(),
    })
}

async fn post_event(app: &axum::Router, who: As, body: Value) -> (StatusCode, Value) {
    call(app, Method::POST, "/api/proctoring/events", Some(who), Some(body)).await
}

#[tokio::test]
async fn each_event_increments_the_counter_by_one() {
    let h = harness();
    let s = student();
    let submission = Uuid::new_v4();
    let assignment = Uuid::new_v4();

    for expected in 1..=3 {
        let (status, body) = post_event(&h.app, s, event(submission, assignment, "tab_switch")).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["violation_count"], expected);
        assert_eq!(body["blocked_until"], Value::Null);
    }

    let (status, report) = call(
        &h.app,
        Method::GET,
        &format!("/api/proctoring/submissions/{submission}"),
        Some(s),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["violation"]["violation_count"], 3);
    assert_eq!(report["logs"].as_array().unwrap().len(), 3);
    assert_eq!(report["logs"][0]["event_type"], "tab_switch");
}

#[tokio::test]
async fn unknown_event_types_are_rejected() {
    let h = harness();
    let (status, _) = post_event(&h.app, student(), event(Uuid::new_v4(), Uuid::new_v4(), "sneeze")).await;
    assert!(status.is_client_error());
}

#[tokio::test]
async fn only_students_report_events() {
    let h = harness();
    let (status, _) = post_event(&h.app, teacher(), event(Uuid::new_v4(), Uuid::new_v4(), "paste_attempt")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn crossing_the_threshold_blocks_future_attempts() {
    let mut config = Config::default();
    config.proctor.block_threshold = Some(2);
    config.proctor.block_duration = Duration::hours(12);
    let h = harness_with(config);
    let s = student();
    let assignment = Uuid::new_v4();
    let access = format!("/api/proctoring/access?assignment_id={assignment}");

    let (_, decision) = call(&h.app, Method::GET, &access, Some(s), None).await;
    assert_eq!(decision["allowed"], true);

    let submission = Uuid::new_v4();
    post_event(&h.app, s, event(submission, assignment, "window_blur")).await;
    let (_, second) = post_event(&h.app, s, event(submission, assignment, "copy_attempt")).await;
    let blocked_until = second["blocked_until"].clone();
    assert_eq!(blocked_until, json!(t0() + Duration::hours(12)));

    // later events do not move the block
    h.clock.advance(Duration::minutes(30));
    let (_, third) = post_event(&h.app, s, event(submission, assignment, "right_click")).await;
    assert_eq!(third["violation_count"], 3);
    assert_eq!(third["blocked_until"], blocked_until);

    let (_, decision) = call(&h.app, Method::GET, &access, Some(s), None).await;
    assert_eq!(decision["allowed"], false);
    assert_eq!(decision["blocked_until"], blocked_until);

    // another student on the same assignment is unaffected
    let (_, other) = call(&h.app, Method::GET, &access, Some(student()), None).await;
    assert_eq!(other["allowed"], true);

    h.clock.advance(Duration::hours(12));
    let (_, decision) = call(&h.app, Method::GET, &access, Some(s), None).await;
    assert_eq!(decision["allowed"], true);
}

#[tokio::test]
async fn teachers_need_a_student_id_for_reports() {
    let h = harness();
    let s = student();
    let submission = Uuid::new_v4();
    post_event(&h.app, s, event(submission, Uuid::new_v4(), "fullscreen_exit")).await;

    let uri = format!("/api/proctoring/submissions/{submission}");
    let (status, _) = call(&h.app, Method::GET, &uri, Some(teacher()), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, report) = call(
        &h.app,
        Method::GET,
        &format!("{uri}?student_id={}", s.id),
        Some(teacher()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["violation"]["violation_count"], 1);
}
