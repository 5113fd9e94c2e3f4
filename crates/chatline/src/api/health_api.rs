//! Liveness and greeting endpoints

use axum::{extract::State, Json};
use serde::Serialize;

use crate::shared_state::AppState;

const GREETING: &str = "Hello from chatline!";

#[derive(Debug, Serialize)]
pub struct HelloResponse {
    pub message: String,
    pub success: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
}

pub async fn root() -> &'static str {
    GREETING
}

pub async fn hello() -> Json<HelloResponse> {
    Json(HelloResponse {
        message: GREETING.to_string(),
        success: true,
    })
}

pub async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    })
}
