//! Scheduling, join-window, reminder and proctoring service for the Learnify
//! learning platform.

pub mod auth;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod feed;
pub mod meeting;
pub mod models;
pub mod notify;
pub mod proctor;
pub mod routes;
pub mod store;
pub mod window;

use axum::{routing::get, Router};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use uuid::Uuid;

use crate::{
    clock::Clock,
    config::Config,
    feed::ChangeFeed,
    meeting::MeetingProvider,
    notify::ReminderTracker,
    store::{ProctoringStore, ScheduleStore},
};

/// Everything a request handler needs, passed explicitly through axum state.
#[derive(Clone)]
pub struct AppState {
    pub schedules: Arc<dyn ScheduleStore>,
    pub proctoring: Arc<dyn ProctoringStore>,
    pub meetings: Arc<dyn MeetingProvider>,
    pub clock: Arc<dyn Clock>,
    pub feed: ChangeFeed,
    pub config: Arc<Config>,
    pub reminders: Arc<Mutex<HashMap<Uuid, ReminderTracker>>>,
}

impl AppState {
    pub fn new<S>(
        store: Arc<S>,
        meetings: Arc<dyn MeetingProvider>,
        clock: Arc<dyn Clock>,
        feed: ChangeFeed,
        config: Config,
    ) -> Self
    where
        S: ScheduleStore + ProctoringStore + 'static,
    {
        Self {
            schedules: store.clone(),
            proctoring: store,
            meetings,
            clock,
            feed,
            config: Arc::new(config),
            reminders: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .merge(routes::router(state))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}
