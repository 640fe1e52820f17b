//! Client for the serverless endpoints that mint video-call join tokens and
//! meeting links. Both are treated as opaque capabilities.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::MeetingConfig;
use crate::error::{AppError, AppResult};
use crate::models::ScheduledSession;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JoinToken {
    pub token: String,
    pub app_id: Option<i64>,
    pub room_id: String,
    pub user_id: Uuid,
}

#[derive(Serialize, Debug)]
struct TokenRequest<'a> {
    session_id: Uuid,
    room_id: &'a str,
    user_id: Uuid,
}

#[derive(Serialize, Debug)]
struct LinkRequest<'a> {
    session_id: Uuid,
    summary: &'a str,
    start_time: chrono::DateTime<chrono::Utc>,
    duration_minutes: i32,
}

#[derive(Deserialize, Debug)]
struct LinkResponse {
    meeting_url: String,
}

#[async_trait]
pub trait MeetingProvider: Send + Sync {
    async fn join_token(&self, session_id: Uuid, room_id: &str, user_id: Uuid) -> AppResult<JoinToken>;

    async fn meeting_link(&self, session: &ScheduledSession) -> AppResult<String>;
}

pub struct HttpMeetingProvider {
    http: reqwest::Client,
    cfg: MeetingConfig,
}

impl HttpMeetingProvider {
    pub fn new(cfg: MeetingConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            cfg,
        }
    }

    fn post(&self, url: &str) -> reqwest::RequestBuilder {
        let req = self.http.post(url);
        match &self.cfg.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }
}

#[async_trait]
impl MeetingProvider for HttpMeetingProvider {
    async fn join_token(&self, session_id: Uuid, room_id: &str, user_id: Uuid) -> AppResult<JoinToken> {
        let url = self
            .cfg
            .token_url
            .as_deref()
            .ok_or_else(|| AppError::ProviderUnavailable("video call service not configured".into()))?;

        let token = self
            .post(url)
            .json(&TokenRequest {
                session_id,
                room_id,
                user_id,
            })
            .send()
            .await?
            .error_for_status()?
            .json::<JoinToken>()
            .await?;
        tracing::info!(session_id = %session_id, room_id, "issued join token");
        Ok(token)
    }

    async fn meeting_link(&self, session: &ScheduledSession) -> AppResult<String> {
        let url = self
            .cfg
            .link_url
            .as_deref()
            .ok_or_else(|| AppError::ProviderUnavailable("meeting link service not configured".into()))?;

        let summary = format!("Video call session {}", session.id);
        let resp = self
            .post(url)
            .json(&LinkRequest {
                session_id: session.id,
                summary: &summary,
                start_time: session.scheduled_at,
                duration_minutes: session.duration_minutes,
            })
            .send()
            .await?
            .error_for_status()?
            .json::<LinkResponse>()
            .await?;

        if resp.meeting_url.trim().is_empty() {
            return Err(AppError::ProviderUnavailable(
                "provider returned an empty meeting link".into(),
            ));
        }
        Ok(resp.meeting_url)
    }
}
