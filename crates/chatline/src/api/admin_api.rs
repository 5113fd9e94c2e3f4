//! Admin-only endpoints and the role guard.
//!
//! Authentication happens in the front-end proxy, which forwards the
//! signed-in user's roles in `x-user-roles` (comma-separated).

use axum::{
    async_trait,
    extract::{FromRequestParts, State},
    http::request::Parts,
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};

use super::{ApiError, ApiResult};
use crate::chat_db::DatabaseStats;
use crate::shared_state::AppState;

pub const ROLES_HEADER: &str = "x-user-roles";
pub const ADMIN_ROLE: &str = "admin";

pub fn is_admin_role(roles: &str) -> bool {
    roles.split(',').map(str::trim).any(|role| role == ADMIN_ROLE)
}

/// Extractor that admits only requests carrying the admin role.
/// No roles: 401. Roles without admin: 403.
#[derive(Debug, Clone)]
pub struct AdminUser {
    pub roles: Vec<String>,
}

#[async_trait]
impl<S> FromRequestParts<S> for AdminUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(ROLES_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(ApiError::unauthorized)?;

        if !is_admin_role(raw) {
            return Err(ApiError::forbidden());
        }

        Ok(AdminUser {
            roles: raw
                .split(',')
                .map(|role| role.trim().to_string())
                .filter(|role| !role.is_empty())
                .collect(),
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminStatsResponse {
    pub database: DatabaseStats,
    pub total_requests: usize,
    pub streams_started: usize,
    pub uptime_seconds: u64,
    pub version: String,
}

pub async fn admin_index(_admin: AdminUser) -> Json<Value> {
    Json(json!({ "ok": true }))
}

pub async fn admin_stats(
    _admin: AdminUser,
    State(state): State<AppState>,
) -> ApiResult<Json<AdminStatsResponse>> {
    let database = state
        .service
        .stats()
        .map_err(|e| ApiError::from_chat(e, "Failed to collect stats"))?;
    let (total_requests, streams_started) = state.counters.snapshot();

    Ok(Json(AdminStatsResponse {
        database,
        total_requests,
        streams_started,
        uptime_seconds: state.started_at.elapsed().as_secs(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }))
}
