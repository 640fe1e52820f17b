use std::env;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal::ctrl_c;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use learnify_runtime::{
    clock::SystemClock,
    config::{Config, StoreBackend},
    db,
    feed::ChangeFeed,
    meeting::HttpMeetingProvider,
    models::SessionFilter,
    notify::{ReminderTracker, ReminderWatcher},
    store::{MemoryStore, PgStore},
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            env::var("RUST_LOG").unwrap_or_else(|_| "learnify_runtime=info,axum=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let feed = ChangeFeed::default();
    let meetings = Arc::new(HttpMeetingProvider::new(config.meeting.clone()));
    let clock = Arc::new(SystemClock);

    let state = match (config.store, config.database_url.clone()) {
        (StoreBackend::Postgres, Some(url)) => {
            let pool = db::connect(&url).await?;
            db::migrate(&pool).await?;
            let store = Arc::new(PgStore::new(pool, feed.clone()));
            AppState::new(store, meetings, clock, feed, config)
        }
        (StoreBackend::Postgres, None) => anyhow::bail!("DATABASE_URL not set"),
        (StoreBackend::Memory, _) => {
            tracing::warn!("using in-memory store; data is lost on restart");
            let store = Arc::new(MemoryStore::new(feed.clone()));
            AppState::new(store, meetings, clock, feed, config)
        }
    };
    tracing::info!(backend = state.schedules.backend_tag(), "store ready");

    let (stop_tx, stop_rx) = watch::channel(false);
    let (reminder_tx, mut reminder_rx) = mpsc::channel(64);
    let watcher = ReminderWatcher {
        store: state.schedules.clone(),
        clock: state.clock.clone(),
        feed: state.feed.clone(),
        viewer: SessionFilter::All,
        poll_interval: state.config.reminders.poll_interval,
        tracker: ReminderTracker::new(state.config.reminders.dedupe),
    };
    let reminders = tokio::spawn(watcher.run(reminder_tx, stop_rx));
    // the watcher logs each reminder; nothing else consumes them yet
    let drain = tokio::spawn(async move { while reminder_rx.recv().await.is_some() {} });

    let port = state.config.port;
    let app = learnify_runtime::app(state);
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("listening on http://0.0.0.0:{}", port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("stopping reminder worker");
    let _ = stop_tx.send(true);
    let _ = reminders.await;
    let _ = drain.await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
        tracing::info!("received ctrl-c, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
                tracing::info!("received terminate signal, shutting down");
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install terminate handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
