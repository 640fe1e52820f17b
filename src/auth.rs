use async_trait::async_trait;
use axum::extract::FromRequestParts;
use http::request::Parts;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::SessionFilter;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Teacher,
    Admin,
}

impl FromStr for Role {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "student" => Ok(Role::Student),
            "teacher" => Ok(Role::Teacher),
            "admin" => Ok(Role::Admin),
            _ => Err(()),
        }
    }
}

/// The caller, as asserted by the auth gateway in front of this service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub role: Role,
}

impl Identity {
    /// Which side of the schedule this caller sees.
    pub fn schedule_filter(&self) -> Result<SessionFilter, AppError> {
        match self.role {
            Role::Teacher => Ok(SessionFilter::ByTeacher(self.user_id)),
            Role::Student => Ok(SessionFilter::ByStudent(self.user_id)),
            Role::Admin => Err(AppError::Forbidden(
                "admins have no personal schedule".into(),
            )),
        }
    }

    pub fn require(&self, role: Role) -> Result<(), AppError> {
        if self.role == role {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!("{role:?} role required").to_lowercase()))
        }
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Identity {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned)
        };
        let user_id = header(USER_ID_HEADER)
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .ok_or(AppError::Unauthorized)?;
        let role = header(USER_ROLE_HEADER)
            .and_then(|v| v.parse().ok())
            .ok_or(AppError::Unauthorized)?;
        Ok(Identity { user_id, role })
    }
}
