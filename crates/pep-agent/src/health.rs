//! Local health endpoint — spec.md §4.1/§6.
//!
//! A minimal axum router exposing `GET /health`, mirroring the shape
//! `pep-server`'s `/health/summary` uses for its component buckets, scaled
//! down to the agent's single concern: is polling keeping up, and when did
//! it last succeed.

use axum::{extract::State, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Default)]
pub struct AgentHealthState {
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub total_processed: u64,
    pub alert_threshold: Duration,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Ok,
    Degraded,
    Down,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: HealthStatus,
    last_success_at: Option<DateTime<Utc>>,
    seconds_since_last_success: Option<i64>,
    last_error: Option<String>,
    total_processed: u64,
}

pub type SharedHealth = Arc<RwLock<AgentHealthState>>;

pub fn new_shared(alert_threshold: Duration) -> SharedHealth {
    Arc::new(RwLock::new(AgentHealthState {
        alert_threshold,
        ..Default::default()
    }))
}

pub fn router(health: SharedHealth) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .with_state(health)
}

async fn get_health(State(health): State<SharedHealth>) -> Json<HealthResponse> {
    let h = health.read().await;
    let now = Utc::now();
    let seconds_since = h.last_success_at.map(|t| (now - t).num_seconds().max(0));

    let status = match (seconds_since, &h.last_error) {
        (None, _) => HealthStatus::Down,
        (Some(s), _) if s as u64 > h.alert_threshold.as_secs() * 3 => HealthStatus::Down,
        (Some(s), _) if s as u64 > h.alert_threshold.as_secs() => HealthStatus::Degraded,
        (_, Some(_)) => HealthStatus::Degraded,
        _ => HealthStatus::Ok,
    };

    Json(HealthResponse {
        status,
        last_success_at: h.last_success_at,
        seconds_since_last_success: seconds_since,
        last_error: h.last_error.clone(),
        total_processed: h.total_processed,
    })
}
