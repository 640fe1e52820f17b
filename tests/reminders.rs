mod support;

use axum::http::Method;
use chrono::Duration;
use learnify_runtime::{
    clock::Clock,
    config::Config,
    models::SessionFilter,
    notify::{ReminderTracker, ReminderWatcher},
    store::ScheduleStore,
};
use serde_json::Value;
use std::sync::Arc;
use support::{call, harness, harness_with, schedule, student, t0, teacher};
use tokio::sync::{mpsc, watch};

#[tokio::test]
async fn polling_repeats_reminders_by_default() {
    let h = harness();
    let t = teacher();
    let s = student();
    let soon = schedule(&h.app, t, s, t0() + Duration::minutes(4), 60).await;
    schedule(&h.app, t, s, t0() + Duration::minutes(30), 60).await;

    for _ in 0..2 {
        let (_, body) = call(&h.app, Method::GET, "/api/notifications", Some(s), None).await;
        let due = body.as_array().unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0]["session_id"], soon.to_string());
    }
}

#[tokio::test]
async fn dedupe_reminds_each_viewer_once() {
    let mut config = Config::default();
    config.reminders.dedupe = true;
    let h = harness_with(config);
    let t = teacher();
    let s = student();
    schedule(&h.app, t, s, t0() + Duration::minutes(2), 60).await;

    let (_, first) = call(&h.app, Method::GET, "/api/notifications", Some(s), None).await;
    assert_eq!(first.as_array().unwrap().len(), 1);
    let (_, again) = call(&h.app, Method::GET, "/api/notifications", Some(s), None).await;
    assert_eq!(again, Value::Array(vec![]));

    // the teacher has an independent tracker
    let (_, teacher_view) = call(&h.app, Method::GET, "/api/notifications", Some(t), None).await;
    assert_eq!(teacher_view.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn reminder_state_is_not_kept_per_caller() {
    let h = harness();
    for _ in 0..50 {
        let (_, body) = call(&h.app, Method::GET, "/api/notifications", Some(student()), None).await;
        assert_eq!(body, Value::Array(vec![]));
    }
    assert!(h.state.reminders.lock().await.is_empty());
}

#[tokio::test]
async fn dedupe_drops_trackers_once_sessions_start() {
    let mut config = Config::default();
    config.reminders.dedupe = true;
    let h = harness_with(config);
    let s = student();
    schedule(&h.app, teacher(), s, t0() + Duration::minutes(2), 60).await;

    call(&h.app, Method::GET, "/api/notifications", Some(s), None).await;
    assert_eq!(h.state.reminders.lock().await.len(), 1);

    h.clock.advance(Duration::minutes(3));
    let (_, body) = call(&h.app, Method::GET, "/api/notifications", Some(s), None).await;
    assert_eq!(body, Value::Array(vec![]));
    assert!(h.state.reminders.lock().await.is_empty());

    // strangers with nothing due leave no trace
    call(&h.app, Method::GET, "/api/notifications", Some(student()), None).await;
    assert!(h.state.reminders.lock().await.is_empty());
}

#[tokio::test]
async fn watcher_refetches_on_change() {
    let h = harness();
    let t = teacher();
    let s = student();
    let (tx, mut rx) = mpsc::channel(8);
    let (stop_tx, stop_rx) = watch::channel(false);

    let store: Arc<dyn ScheduleStore> = h.store.clone();
    let clock: Arc<dyn Clock> = h.clock.clone();
    let watcher = ReminderWatcher {
        store,
        clock,
        feed: h.feed.clone(),
        viewer: SessionFilter::ByStudent(s.id),
        poll_interval: std::time::Duration::from_secs(3600),
        tracker: ReminderTracker::new(true),
    };
    let task = tokio::spawn(watcher.run(tx, stop_rx));

    let id = schedule(&h.app, t, s, t0() + Duration::minutes(3), 60).await;
    let n = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
        .await
        .expect("reminder in time")
        .expect("channel open");
    assert_eq!(n.session_id, id);

    stop_tx.send(true).unwrap();
    tokio::time::timeout(std::time::Duration::from_secs(2), task)
        .await
        .expect("watcher stops")
        .unwrap();
}

#[tokio::test]
async fn server_wide_watcher_sees_every_pair() {
    let h = harness();
    let (tx, mut rx) = mpsc::channel(8);
    let (stop_tx, stop_rx) = watch::channel(false);

    let watcher = ReminderWatcher {
        store: h.state.schedules.clone(),
        clock: h.state.clock.clone(),
        feed: h.feed.clone(),
        viewer: SessionFilter::All,
        poll_interval: std::time::Duration::from_secs(3600),
        tracker: ReminderTracker::new(true),
    };
    let task = tokio::spawn(watcher.run(tx, stop_rx));

    let first = schedule(&h.app, teacher(), student(), t0() + Duration::minutes(2), 60).await;
    let second = schedule(&h.app, teacher(), student(), t0() + Duration::minutes(4), 60).await;

    let mut seen = Vec::new();
    while seen.len() < 2 {
        let n = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
            .await
            .expect("reminder in time")
            .expect("channel open");
        seen.push(n.session_id);
    }
    seen.sort();
    let mut expected = vec![first, second];
    expected.sort();
    assert_eq!(seen, expected);

    stop_tx.send(true).unwrap();
    tokio::time::timeout(std::time::Duration::from_secs(2), task)
        .await
        .expect("watcher stops")
        .unwrap();
}
