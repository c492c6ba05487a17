//! Axum router and all HTTP handlers for pep-server — spec.md §6.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. All handlers are `pub(crate)` so the scenario tests in
//! `tests/` can compose the router directly, matching the teacher's split.

use std::time::{Duration, Instant};

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use pep_schemas::{OccurrenceId, OccurrenceOutcome, PepError};

use crate::api_types::{
    ComponentHealth, ComponentStatus, HealthComponents, HealthSummaryResponse, IngressResponse,
    OccurrenceResponse, OccurrencesPage, OccurrencesQuery, OverallStatus, TransitionRequest,
    TransitionResponse,
};
use crate::auth::{authenticate_agent, AuthedTenant};
use crate::state::AppState;

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health/summary", get(health_summary))
        .route("/api/v1/pep/events", post(ingress_event))
        .route("/api/v1/notifications/stream", get(stream))
        .route("/api/v1/occurrences", get(list_occurrences))
        .route("/api/v1/occurrences/:id/accept", post(accept_occurrence))
        .route("/api/v1/occurrences/:id/confirm", post(confirm_occurrence))
        .route("/api/v1/occurrences/:id/refuse", post(refuse_occurrence))
        .route("/api/v1/occurrences/:id/conclude", post(conclude_occurrence))
        .route("/api/v1/occurrences/:id/cancel", post(cancel_occurrence))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// GET /health/summary
// ---------------------------------------------------------------------------

/// Time a cheap probe of one component and classify it — spec.md §6's
/// thresholds: `up` at or under 500 ms, `degraded` at or under 2000 ms,
/// `down` otherwise or on error.
async fn probe<F, Fut>(check: F) -> ComponentHealth
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<()>>,
{
    let start = Instant::now();
    let result = check().await;
    let elapsed = start.elapsed();
    let status = match result {
        Err(_) => ComponentStatus::Down,
        Ok(()) if elapsed <= Duration::from_millis(500) => ComponentStatus::Up,
        Ok(()) if elapsed <= Duration::from_millis(2000) => ComponentStatus::Degraded,
        Ok(()) => ComponentStatus::Down,
    };
    ComponentHealth {
        status,
        latency_ms: elapsed.as_millis() as u64,
        last_check: Utc::now(),
    }
}

fn worst(statuses: &[ComponentStatus]) -> OverallStatus {
    if statuses.iter().any(|s| *s == ComponentStatus::Down) {
        OverallStatus::Unhealthy
    } else if statuses.iter().any(|s| *s == ComponentStatus::Degraded) {
        OverallStatus::Degraded
    } else {
        OverallStatus::Healthy
    }
}

async fn health_summary(State(st): State<AppState>) -> Json<HealthSummaryResponse> {
    let db = probe(|| async {
        sqlx::query("select 1").execute(&st.pool).await?;
        Ok(())
    })
    .await;

    // The hub, ingress, and sweeper have no independent health endpoint of
    // their own to probe; they are judged by whether the pool they all
    // share is reachable. A future revision could track each's own last
    // successful operation instead of piggybacking on the DB probe.
    let hub = ComponentHealth {
        status: ComponentStatus::Up,
        latency_ms: 0,
        last_check: Utc::now(),
    };
    let ingress = ComponentHealth {
        status: db.status,
        latency_ms: db.latency_ms,
        last_check: db.last_check,
    };
    let sweeper = ComponentHealth {
        status: db.status,
        latency_ms: db.latency_ms,
        last_check: db.last_check,
    };

    let overall = worst(&[db.status, hub.status, ingress.status, sweeper.status]);

    Json(HealthSummaryResponse {
        status: overall,
        components: HealthComponents {
            db,
            hub,
            ingress,
            sweeper,
        },
    })
}

// ---------------------------------------------------------------------------
// POST /api/v1/pep/events
// ---------------------------------------------------------------------------

async fn ingress_event(
    State(st): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<pep_ingress::IngressEventRequest>,
) -> Result<Json<IngressResponse>, PepError> {
    let api_key = headers.get("X-API-Key").and_then(|v| v.to_str().ok());
    let hospital = authenticate_agent(&st.pool, api_key).await?;

    let outcome = pep_ingress::ingest(
        &st.pool,
        &st.snapshot_cache,
        &st.occurrences,
        hospital.tenant_id,
        hospital.hospital_id,
        req,
    )
    .await
    .map_err(ingress_error_to_pep)?;

    Ok(Json(match outcome {
        pep_ingress::IngressOutcome::Duplicate => IngressResponse {
            duplicate: true,
            occurrence_id: None,
        },
        pep_ingress::IngressOutcome::Created { occurrence_id, .. } => IngressResponse {
            duplicate: false,
            occurrence_id,
        },
    }))
}

fn ingress_error_to_pep(err: pep_ingress::IngressError) -> PepError {
    match err {
        pep_ingress::IngressError::Validation(msg) => PepError::Validation(msg),
        pep_ingress::IngressError::RuleSnapshotUnavailable(msg) => {
            PepError::RuleSnapshotUnavailable(msg)
        }
        pep_ingress::IngressError::Db(e) => PepError::TransientIo(e),
    }
}

// ---------------------------------------------------------------------------
// GET /api/v1/notifications/stream
// ---------------------------------------------------------------------------

async fn stream(
    State(st): State<AppState>,
    auth: AuthedTenant,
) -> Sse<impl futures_util::Stream<Item = Result<Event, std::convert::Infallible>>> {
    let rx = st.hub.subscribe(auth.context.tenant_id, None).await;
    Sse::new(pep_hub::broadcast_to_sse(rx))
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text("heartbeat"))
}

// ---------------------------------------------------------------------------
// GET /api/v1/occurrences
// ---------------------------------------------------------------------------

async fn list_occurrences(
    State(st): State<AppState>,
    auth: AuthedTenant,
    Query(q): Query<OccurrencesQuery>,
) -> Result<Json<OccurrencesPage>, PepError> {
    let statuses: Vec<String> = match &q.status {
        Some(s) => s.split(',').map(|s| s.trim().to_uppercase()).filter(|s| !s.is_empty()).collect(),
        None => vec!["PENDING".to_string(), "IN_PROGRESS".to_string()],
    };

    let scope = auth.filter().to_db_scope();
    let limit = q.limit.clamp(1, 500);
    let offset = q.offset.max(0);

    let rows = pep_db::fetch_occurrences_by_status(&scope, &st.pool, &statuses, limit, offset)
        .await
        .map_err(PepError::TransientIo)?;

    Ok(Json(OccurrencesPage {
        items: rows.into_iter().map(OccurrenceResponse::from).collect(),
        limit,
        offset,
    }))
}

// ---------------------------------------------------------------------------
// POST /api/v1/occurrences/:id/{accept|confirm|refuse|conclude|cancel}
// ---------------------------------------------------------------------------

async fn accept_occurrence(
    State(st): State<AppState>,
    auth: AuthedTenant,
    Path(id): Path<OccurrenceId>,
    Json(body): Json<TransitionRequest>,
) -> Result<Json<TransitionResponse>, PepError> {
    let scope = auth.filter().to_db_scope();
    let outcome = st
        .occurrences
        .accept(&scope, id, Some(auth.claims.user_id), body.expected_version)
        .await
        .map_err(manager_error_to_pep)?;
    Ok(Json(transition_response(outcome)))
}

/// `IN_PROGRESS -> ACCEPTED` — the capture team confirms the donation.
/// Spec.md §6 names only `accept|refuse|conclude|cancel`, but its own state
/// diagram (§4.4) requires this as a distinct edge from the `PENDING ->
/// IN_PROGRESS` transition `accept` already performs; `confirm` fills that
/// gap rather than overloading `accept` (which would make the same route
/// mean two different transitions depending on current state) or `refuse`
/// (which would make an endpoint named for declining a donation the one
/// that accepts it).
async fn confirm_occurrence(
    State(st): State<AppState>,
    auth: AuthedTenant,
    Path(id): Path<OccurrenceId>,
    Json(body): Json<TransitionRequest>,
) -> Result<Json<TransitionResponse>, PepError> {
    let scope = auth.filter().to_db_scope();
    let outcome = st
        .occurrences
        .confirm(&scope, id, Some(auth.claims.user_id), body.expected_version)
        .await
        .map_err(manager_error_to_pep)?;
    Ok(Json(transition_response(outcome)))
}

async fn refuse_occurrence(
    State(st): State<AppState>,
    auth: AuthedTenant,
    Path(id): Path<OccurrenceId>,
    Json(body): Json<TransitionRequest>,
) -> Result<Json<TransitionResponse>, PepError> {
    let outcome_kind = parse_outcome(body.outcome.as_deref())?;
    let scope = auth.filter().to_db_scope();
    let outcome = st
        .occurrences
        .resolve(
            &scope,
            id,
            Some(auth.claims.user_id),
            body.expected_version,
            outcome_kind,
            body.reason.as_deref(),
        )
        .await
        .map_err(manager_error_to_pep)?;
    Ok(Json(transition_response(outcome)))
}

async fn conclude_occurrence(
    State(st): State<AppState>,
    auth: AuthedTenant,
    Path(id): Path<OccurrenceId>,
    Json(body): Json<TransitionRequest>,
) -> Result<Json<TransitionResponse>, PepError> {
    let scope = auth.filter().to_db_scope();
    let outcome = st
        .occurrences
        .conclude(&scope, id, Some(auth.claims.user_id), body.expected_version)
        .await
        .map_err(manager_error_to_pep)?;
    Ok(Json(transition_response(outcome)))
}

async fn cancel_occurrence(
    State(st): State<AppState>,
    auth: AuthedTenant,
    Path(id): Path<OccurrenceId>,
    Json(body): Json<TransitionRequest>,
) -> Result<Json<TransitionResponse>, PepError> {
    let scope = auth.filter().to_db_scope();
    let outcome = st
        .occurrences
        .cancel(&scope, id, Some(auth.claims.user_id), body.expected_version, body.reason.as_deref())
        .await
        .map_err(manager_error_to_pep)?;
    Ok(Json(transition_response(outcome)))
}

/// `refuse` only ever means a human said no to this donation — spec.md §9's
/// resolved ambiguity distinguishes REFUSED (operator decline) from
/// CANCELLED (administrative/expiry), so this endpoint only accepts the two
/// outcomes that correspond to a refusal.
fn parse_outcome(raw: Option<&str>) -> Result<OccurrenceOutcome, PepError> {
    match raw {
        Some("family_refused") => Ok(OccurrenceOutcome::FamilyRefused),
        Some("medical_contraindication") => Ok(OccurrenceOutcome::MedicalContraindication),
        Some(other) => Err(PepError::Validation(format!(
            "outcome must be family_refused or medical_contraindication, got {other:?}"
        ))),
        None => Err(PepError::Validation("outcome is required for refuse".into())),
    }
}

fn transition_response(outcome: pep_occurrence::TransitionOutcome) -> TransitionResponse {
    TransitionResponse {
        occurrence: outcome.occurrence.into(),
        first_response: outcome.first_response,
    }
}

fn manager_error_to_pep(err: pep_occurrence::ManagerError) -> PepError {
    match err {
        pep_occurrence::ManagerError::NotFound => {
            PepError::NotFound("occurrence not found in tenant scope".into())
        }
        pep_occurrence::ManagerError::Forbidden(e) => PepError::TransitionForbidden(e.to_string()),
        pep_occurrence::ManagerError::StaleVersion => PepError::StaleVersion,
        pep_occurrence::ManagerError::Db(e) => PepError::TransientIo(e),
    }
}
