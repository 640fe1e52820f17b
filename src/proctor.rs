//! Client-side proctoring for a timed test attempt.
//!
//! A [`Proctor`] owns the page surface (listeners and fullscreen) while a test
//! is running. Captured events become [`ViolationKind`]s, each written once
//! to an [`EventSink`]. Teardown runs on `stop` and again from `Drop`, so
//! listeners and fullscreen are released on every exit path.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{ProctoringEvent, ViolationKind};

const COPY_PREVIEW_CHARS: usize = 100;

#[derive(Error, Debug)]
pub enum ProctorError {
    #[error("fullscreen request rejected: {0}")]
    FullscreenRejected(String),
    #[error("event sink failed: {0}")]
    Sink(String),
}

impl From<reqwest::Error> for ProctorError {
    fn from(e: reqwest::Error) -> Self {
        ProctorError::Sink(e.to_string())
    }
}

/// Browser-level notifications the surface delivers while listening.
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceEvent {
    VisibilityChanged { hidden: bool },
    WindowBlur,
    Copy { selection: Option<String> },
    Paste,
    ContextMenu,
    FullscreenChanged { active: bool },
}

/// Whether the surface should let the default action through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Pass,
    Suppress,
}

/// Handle for a registered listener set; returned to `detach`.
#[derive(Debug, PartialEq, Eq)]
pub struct ListenerHandle(pub u64);

pub trait Surface: Send {
    fn attach(&mut self) -> ListenerHandle;
    fn detach(&mut self, handle: ListenerHandle);
    fn request_fullscreen(&mut self) -> Result<(), ProctorError>;
    fn exit_fullscreen(&mut self);
    fn is_fullscreen(&self) -> bool;
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn append(&self, event: &ProctoringEvent) -> Result<(), ProctorError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProctorState {
    Inactive,
    Active,
}

pub struct Proctor<S: Surface, K: EventSink> {
    surface: S,
    sink: K,
    submission_id: Uuid,
    assignment_id: Option<Uuid>,
    listeners: Option<ListenerHandle>,
    violations: u32,
}

impl<S: Surface, K: EventSink> Proctor<S, K> {
    pub fn new(surface: S, sink: K, submission_id: Uuid, assignment_id: Option<Uuid>) -> Self {
        Self {
            surface,
            sink,
            submission_id,
            assignment_id,
            listeners: None,
            violations: 0,
        }
    }

    pub fn state(&self) -> ProctorState {
        if self.listeners.is_some() {
            ProctorState::Active
        } else {
            ProctorState::Inactive
        }
    }

    pub fn violations(&self) -> u32 {
        self.violations
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    /// Inactive -> Active. A second call while active is a no-op.
    pub async fn start(&mut self, now: DateTime<Utc>) {
        if self.listeners.is_some() {
            tracing::debug!(submission_id = %self.submission_id, "proctoring already active");
            return;
        }
        self.listeners = Some(self.surface.attach());
        self.violations = 0;
        tracing::info!(submission_id = %self.submission_id, "proctoring started");

        if let Err(e) = self.surface.request_fullscreen() {
            tracing::warn!(error = %e, "fullscreen unavailable");
            self.record(ViolationKind::FullscreenDenied, json!({}), now).await;
        }
    }

    /// Active -> Inactive. Safe to call at any time.
    pub fn stop(&mut self) {
        if let Some(handle) = self.listeners.take() {
            self.surface.detach(handle);
            tracing::info!(
                submission_id = %self.submission_id,
                violations = self.violations,
                "proctoring stopped"
            );
        }
        if self.surface.is_fullscreen() {
            self.surface.exit_fullscreen();
        }
    }

    /// Feeds one surface event through the logger.
    pub async fn observe(&mut self, event: SurfaceEvent, now: DateTime<Utc>) -> Disposition {
        if self.listeners.is_none() {
            return Disposition::Pass;
        }
        let (kind, data, disposition) = match event {
            SurfaceEvent::VisibilityChanged { hidden: false } => return Disposition::Pass,
            SurfaceEvent::VisibilityChanged { hidden: true } => {
                (ViolationKind::TabSwitch, json!({}), Disposition::Pass)
            }
            SurfaceEvent::WindowBlur => (ViolationKind::WindowBlur, json!({}), Disposition::Pass),
            SurfaceEvent::Copy { selection } => {
                let text: Option<String> =
                    selection.map(|s| s.chars().take(COPY_PREVIEW_CHARS).collect());
                (ViolationKind::CopyAttempt, json!({ "text": text }), Disposition::Pass)
            }
            SurfaceEvent::Paste => (ViolationKind::PasteAttempt, json!({}), Disposition::Pass),
            SurfaceEvent::ContextMenu => (ViolationKind::RightClick, json!({}), Disposition::Suppress),
            SurfaceEvent::FullscreenChanged { active: true } => return Disposition::Pass,
            SurfaceEvent::FullscreenChanged { active: false } => {
                (ViolationKind::FullscreenExit, json!({}), Disposition::Pass)
            }
        };
        self.record(kind, data, now).await;
        disposition
    }

    async fn record(&mut self, kind: ViolationKind, mut data: serde_json::Value, now: DateTime<Utc>) {
        if let Some(obj) = data.as_object_mut() {
            obj.insert("timestamp".into(), json!(now.to_rfc3339()));
        }
        self.violations += 1;
        let event = ProctoringEvent {
            submission_id: self.submission_id,
            assignment_id: self.assignment_id,
            event_type: kind,
            event_data: data,
            timestamp: now,
        };
        // best effort: a lost row must not interrupt the test
        if let Err(e) = self.sink.append(&event).await {
            tracing::error!(error = %e, event_type = %kind, "failed to log proctoring event");
        }
    }
}

impl<S: Surface, K: EventSink> Drop for Proctor<S, K> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Posts events to the service's `/api/proctoring/events` endpoint.
pub struct HttpEventSink {
    http: reqwest::Client,
    endpoint: String,
    student_id: Uuid,
}

impl HttpEventSink {
    pub fn new(base_url: &str, student_id: Uuid) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: format!("{}/api/proctoring/events", base_url.trim_end_matches('/')),
            student_id,
        }
    }
}

#[async_trait]
impl EventSink for HttpEventSink {
    async fn append(&self, event: &ProctoringEvent) -> Result<(), ProctorError> {
        self.http
            .post(&self.endpoint)
            .header("x-user-id", self.student_id.to_string())
            .header("x-user-role", "student")
            .json(event)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
