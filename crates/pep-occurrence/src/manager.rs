//! The persistence layer around the pure state machine — spec.md §4.4.
//!
//! Grounded on `mqk-db`'s `arm_run`/`begin_run`/`halt_run` functions: fetch
//! the current row (with its optimistic `version`), validate the transition
//! against [`crate::transition`], apply it in one DB transaction alongside
//! its history row, commit, and only then publish to the hub — spec.md §4.4
//! ("the delivery event is emitted after commit").

use chrono::{DateTime, Utc};
use pep_audit::{AuditEntry, Severity};
use pep_db::{OccurrenceRow, OccurrenceUpdate, TenantScope};
use pep_hub::{Hub, HubEvent};
use pep_schemas::{HospitalId, OccurrenceId, OccurrenceOutcome, OccurrenceStatus, TenantId};
use serde_json::json;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::transition::{self, TransitionError};

fn actor_label(actor_id: Option<Uuid>) -> String {
    actor_id.map(|id| id.to_string()).unwrap_or_else(|| "system".to_string())
}

/// Best-effort audit append: a write failure here never unwinds an already
/// committed occurrence transition, it only gets logged. The hash chain
/// still shows a gap investigators can notice, which is preferable to
/// blocking clinical workflow on the audit store being reachable.
async fn record_audit(pool: &PgPool, entry: AuditEntry) {
    if let Err(e) = pep_audit::append(pool, entry).await {
        tracing::error!(error = %e, "failed to append audit log entry");
    }
}

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("occurrence not found in tenant scope")]
    NotFound,
    #[error(transparent)]
    Forbidden(#[from] TransitionError),
    #[error("stale version: occurrence was modified concurrently")]
    StaleVersion,
    #[error(transparent)]
    Db(#[from] anyhow::Error),
}

/// What a successful transition call hands back to its caller (an HTTP
/// handler, the sweeper, or a test).
#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    pub occurrence: OccurrenceRow,
    /// `true` only the first time an occurrence left `PENDING` — callers use
    /// this to decide whether to report a freshly stamped reaction latency.
    pub first_response: bool,
}

fn reaction_latency_ms(occurrence: &OccurrenceRow) -> Option<i64> {
    occurrence
        .first_response_at
        .map(|t| (t - occurrence.created_at).num_milliseconds())
}

fn parse_status(s: &str) -> OccurrenceStatus {
    match s {
        "PENDING" => OccurrenceStatus::Pending,
        "IN_PROGRESS" => OccurrenceStatus::InProgress,
        "ACCEPTED" => OccurrenceStatus::Accepted,
        "REFUSED" => OccurrenceStatus::Refused,
        "CANCELLED" => OccurrenceStatus::Cancelled,
        "CONCLUDED" => OccurrenceStatus::Concluded,
        other => unreachable!("occurrences.status check constraint admits no value {other:?}"),
    }
}

/// Owns the DB pool and the hub handle needed to turn a requested
/// transition into a persisted row plus a fanned-out event.
#[derive(Clone)]
pub struct OccurrenceManager {
    pool: PgPool,
    hub: Hub,
}

impl OccurrenceManager {
    pub fn new(pool: PgPool, hub: Hub) -> Self {
        Self { pool, hub }
    }

    /// Create the occurrence spawned by an eligible Screening verdict —
    /// spec.md §4.4 ("if verdict is eligible, creates an occurrence with
    /// expiry = death_time + window").
    pub async fn create_occurrence(
        &self,
        tenant_id: TenantId,
        hospital_id: HospitalId,
        death_event_id: Uuid,
        death_time: DateTime<Utc>,
        window_hours: i64,
    ) -> anyhow::Result<OccurrenceRow> {
        let expires_at = death_time + chrono::Duration::hours(window_hours);
        let row =
            pep_db::insert_occurrence(&self.pool, tenant_id, hospital_id, death_event_id, expires_at)
                .await?;

        // Best-effort: an occurrence with no on-duty shift covering "now" is
        // still created unassigned (spec.md §3 leaves this undefined, not an
        // error) and can be claimed manually via `accept`.
        if let Some(on_duty) = pep_db::fetch_on_duty_user(&self.pool, hospital_id, Utc::now()).await? {
            pep_db::assign_occurrence(&self.pool, row.occurrence_id, on_duty).await?;
        }

        record_audit(
            &self.pool,
            AuditEntry {
                tenant_id,
                actor: "system".to_string(),
                action: "occurrence.create".to_string(),
                entity_type: "occurrence".to_string(),
                entity_id: Some(row.occurrence_id.to_string()),
                severity: Severity::Info,
                details: json!({
                    "hospital_id": hospital_id,
                    "death_event_id": death_event_id,
                    "status": row.status,
                    "expires_at": row.expires_at,
                }),
                ip: None,
                user_agent: None,
                occurred_at: Utc::now(),
                hash_prev: None,
                hash_self: None,
            },
        )
        .await;

        self.hub
            .publish(
                tenant_id,
                HubEvent::Created {
                    tenant_id,
                    occurrence_id: row.occurrence_id,
                    hospital_id,
                    status: row.status.clone(),
                    expires_at: row.expires_at,
                    produced_at: Utc::now(),
                },
            )
            .await;

        Ok(row)
    }

    pub async fn accept(
        &self,
        scope: &TenantScope,
        occurrence_id: OccurrenceId,
        actor_id: Option<Uuid>,
        expected_version: Option<i64>,
    ) -> Result<TransitionOutcome, ManagerError> {
        self.run_transition(
            scope,
            occurrence_id,
            actor_id,
            expected_version,
            None,
            "occurrence.accept",
            |current| transition::accept(current).map(|to| (to, None)),
        )
        .await
    }

    /// `IN_PROGRESS -> ACCEPTED` — the capture team has confirmed the
    /// donation, as distinct from [`Self::accept`] (`PENDING -> IN_PROGRESS`,
    /// an operator merely starting to handle the alert) and from
    /// [`Self::conclude`] (`ACCEPTED -> CONCLUDED`, the process running to
    /// completion afterward). This is the `resolve{outcome=Captured}` edge of
    /// spec.md §4.4's state diagram — the one outcome of `resolve` that
    /// doesn't correspond to a refusal, so it gets its own route
    /// (`POST .../confirm`) rather than overloading `refuse`'s outcome set.
    pub async fn confirm(
        &self,
        scope: &TenantScope,
        occurrence_id: OccurrenceId,
        actor_id: Option<Uuid>,
        expected_version: Option<i64>,
    ) -> Result<TransitionOutcome, ManagerError> {
        self.run_transition(
            scope,
            occurrence_id,
            actor_id,
            expected_version,
            None,
            "occurrence.confirm",
            |current| {
                transition::resolve(current, OccurrenceOutcome::Captured)
                    .map(|(to, outcome)| (to, Some(outcome)))
            },
        )
        .await
    }

    pub async fn resolve(
        &self,
        scope: &TenantScope,
        occurrence_id: OccurrenceId,
        actor_id: Option<Uuid>,
        expected_version: Option<i64>,
        outcome: OccurrenceOutcome,
        reason: Option<&str>,
    ) -> Result<TransitionOutcome, ManagerError> {
        self.run_transition(
            scope,
            occurrence_id,
            actor_id,
            expected_version,
            reason,
            "occurrence.resolve",
            move |current| transition::resolve(current, outcome).map(|(to, outcome)| (to, Some(outcome))),
        )
        .await
    }

    pub async fn conclude(
        &self,
        scope: &TenantScope,
        occurrence_id: OccurrenceId,
        actor_id: Option<Uuid>,
        expected_version: Option<i64>,
    ) -> Result<TransitionOutcome, ManagerError> {
        self.run_transition(
            scope,
            occurrence_id,
            actor_id,
            expected_version,
            None,
            "occurrence.conclude",
            |current| transition::conclude(current).map(|to| (to, Some(OccurrenceOutcome::Captured))),
        )
        .await
    }

    pub async fn cancel(
        &self,
        scope: &TenantScope,
        occurrence_id: OccurrenceId,
        actor_id: Option<Uuid>,
        expected_version: Option<i64>,
        reason: Option<&str>,
    ) -> Result<TransitionOutcome, ManagerError> {
        self.run_transition(
            scope,
            occurrence_id,
            actor_id,
            expected_version,
            reason,
            "occurrence.cancel",
            |current| transition::cancel(current).map(|to| (to, None)),
        )
        .await
    }

    /// The shared machinery behind every public transition method: fetch,
    /// validate against the pure state machine, apply with an optimistic
    /// version check, publish. `step` is one of `transition::{accept,
    /// resolve, conclude, cancel}` already bound to its outcome.
    #[allow(clippy::too_many_arguments)]
    async fn run_transition(
        &self,
        scope: &TenantScope,
        occurrence_id: OccurrenceId,
        actor_id: Option<Uuid>,
        expected_version: Option<i64>,
        reason: Option<&str>,
        action: &str,
        step: impl FnOnce(OccurrenceStatus) -> Result<(OccurrenceStatus, Option<OccurrenceOutcome>), TransitionError>,
    ) -> Result<TransitionOutcome, ManagerError> {
        let current = pep_db::fetch_occurrence(scope, &self.pool, occurrence_id)
            .await
            .map_err(ManagerError::Db)?
            .ok_or(ManagerError::NotFound)?;

        let current_status = parse_status(&current.status);

        if let Some(expected) = expected_version {
            if expected != current.version {
                // A retry of an already-applied request observes the state
                // its own prior call produced: treat as idempotent success
                // rather than a conflict. Anything else is a real race.
                if expected + 1 == current.version {
                    return Ok(TransitionOutcome {
                        first_response: false,
                        occurrence: current,
                    });
                }
                return Err(ManagerError::StaleVersion);
            }
        }

        let (new_status, outcome) = step(current_status)?;
        let stamp_first_response = current_status == OccurrenceStatus::Pending;

        let update = OccurrenceUpdate {
            new_status: new_status.as_str().to_string(),
            outcome: outcome.map(outcome_as_str).map(str::to_string),
            assignee_id: None,
            stamp_first_response,
        };

        let applied = pep_db::apply_occurrence_transition(
            &self.pool,
            occurrence_id,
            current.version,
            &update,
            actor_id,
            &current.status,
            reason,
        )
        .await
        .map_err(ManagerError::Db)?;

        let Some(row) = applied else {
            return Err(ManagerError::StaleVersion);
        };

        record_audit(
            &self.pool,
            AuditEntry {
                tenant_id: row.tenant_id,
                actor: actor_label(actor_id),
                action: action.to_string(),
                entity_type: "occurrence".to_string(),
                entity_id: Some(row.occurrence_id.to_string()),
                severity: Severity::Info,
                details: json!({
                    "from_status": current.status,
                    "to_status": row.status,
                    "outcome": row.outcome,
                    "reason": reason,
                }),
                ip: None,
                user_agent: None,
                occurred_at: Utc::now(),
                hash_prev: None,
                hash_self: None,
            },
        )
        .await;

        self.hub
            .publish(
                row.tenant_id,
                HubEvent::StatusChanged {
                    tenant_id: row.tenant_id,
                    occurrence_id: row.occurrence_id,
                    hospital_id: row.hospital_id,
                    status: row.status.clone(),
                    expires_at: row.expires_at,
                    reaction_latency_ms: if stamp_first_response {
                        reaction_latency_ms(&row)
                    } else {
                        None
                    },
                    produced_at: Utc::now(),
                },
            )
            .await;

        Ok(TransitionOutcome {
            occurrence: row,
            first_response: stamp_first_response,
        })
    }
}

fn outcome_as_str(outcome: OccurrenceOutcome) -> &'static str {
    match outcome {
        OccurrenceOutcome::Captured => "captured",
        OccurrenceOutcome::FamilyRefused => "family_refused",
        OccurrenceOutcome::MedicalContraindication => "medical_contraindication",
        OccurrenceOutcome::TimeExceeded => "time_exceeded",
    }
}
