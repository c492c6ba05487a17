//! Request and response types for every pep-server HTTP endpoint — spec.md §6.
//!
//! These types are `Serialize`/`Deserialize` so Axum can encode/decode them
//! directly; no business logic lives here, matching the teacher's
//! `api_types.rs` split (request/response shapes separate from handlers).

use chrono::{DateTime, Utc};
use pep_db::OccurrenceRow;
use pep_schemas::{DeathEventId, HospitalId, OccurrenceId, TenantId};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// /health/summary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Up,
    Degraded,
    Down,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    pub latency_ms: u64,
    pub last_check: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthComponents {
    pub db: ComponentHealth,
    pub hub: ComponentHealth,
    pub ingress: ComponentHealth,
    pub sweeper: ComponentHealth,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSummaryResponse {
    pub status: OverallStatus,
    pub components: HealthComponents,
}

// ---------------------------------------------------------------------------
// POST /api/v1/pep/events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct IngressResponse {
    pub duplicate: bool,
    pub occurrence_id: Option<OccurrenceId>,
}

// ---------------------------------------------------------------------------
// GET /api/v1/occurrences
// ---------------------------------------------------------------------------

/// Query params for the paginated snapshot endpoint. `status` is a
/// comma-separated list (`PENDING,IN_PROGRESS`) to match the wire example in
/// spec.md §6 verbatim rather than repeated `status=` params.
#[derive(Debug, Clone, Deserialize)]
pub struct OccurrencesQuery {
    pub status: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

#[derive(Debug, Clone, Serialize)]
pub struct OccurrenceResponse {
    pub occurrence_id: OccurrenceId,
    pub tenant_id: TenantId,
    pub hospital_id: HospitalId,
    pub death_event_id: DeathEventId,
    pub status: String,
    pub expires_at: DateTime<Utc>,
    pub outcome: Option<String>,
    pub first_response_at: Option<DateTime<Utc>>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<OccurrenceRow> for OccurrenceResponse {
    fn from(row: OccurrenceRow) -> Self {
        Self {
            occurrence_id: row.occurrence_id,
            tenant_id: row.tenant_id,
            hospital_id: row.hospital_id,
            death_event_id: row.death_event_id,
            status: row.status,
            expires_at: row.expires_at,
            outcome: row.outcome,
            first_response_at: row.first_response_at,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OccurrencesPage {
    pub items: Vec<OccurrenceResponse>,
    pub limit: i64,
    pub offset: i64,
}

// ---------------------------------------------------------------------------
// POST /api/v1/occurrences/:id/{accept|confirm|refuse|conclude|cancel}
// ---------------------------------------------------------------------------

/// Body shared by all five transition routes — spec.md §6 ("optional
/// `{outcome, reason}`"). `expected_version` is the optimistic-concurrency
/// token the client observed on its last read; omitted, the transition is
/// applied unconditionally (last writer wins).
#[derive(Debug, Clone, Deserialize)]
pub struct TransitionRequest {
    pub outcome: Option<String>,
    pub reason: Option<String>,
    pub expected_version: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransitionResponse {
    pub occurrence: OccurrenceResponse,
    pub first_response: bool,
}
