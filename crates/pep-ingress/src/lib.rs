//! Ingress & Deduplication — spec.md §4.2.
//!
//! Grounded on `mqk-db`'s `ON CONFLICT DO NOTHING RETURNING …` idempotency
//! pattern (`inbox_insert_deduped`): a duplicate `(hospital_id, source_id)`
//! delivery is a no-op, not an error, and screening is only ever invoked on
//! the row that actually got inserted.

use chrono::{DateTime, Utc};
use pep_db::{NewDeathEvent, TenantScope};
use pep_occurrence::OccurrenceManager;
use pep_schemas::{DeathEventId, DeathEventView, HospitalId, OccurrenceId, TenantId, Verdict};
use pep_screening::SnapshotCache;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use thiserror::Error;

/// The wire payload spec.md §6 defines for `POST /api/v1/pep/events`. Field
/// names match the contract verbatim (Portuguese field names are the
/// hospital-facing wire format; everything downstream of [`validate`] uses
/// the English-named [`pep_db::NewDeathEvent`]). Serialized by the Detection
/// Agent when it delivers a record; deserialized by `pep-server`'s ingress
/// handler when it receives one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngressEventRequest {
    pub hospital_id_origem: String,
    pub hospital_id: uuid::Uuid,
    pub timestamp_deteccao: DateTime<Utc>,
    pub nome_paciente: String,
    pub data_obito: DateTime<Utc>,
    pub causa_mortis: String,
    pub causa_cid: Option<String>,
    pub idade: Option<i32>,
    pub data_nascimento: Option<DateTime<Utc>>,
    pub cns: Option<String>,
    pub cpf_masked: Option<String>,
    pub setor: Option<String>,
    pub leito: Option<String>,
    pub prontuario: Option<String>,
    #[serde(default)]
    pub identificacao_desconhecida: bool,
}

#[derive(Debug, Error)]
pub enum IngressError {
    #[error("validation: {0}")]
    Validation(String),
    #[error("rule snapshot unavailable: {0}")]
    RuleSnapshotUnavailable(String),
    #[error(transparent)]
    Db(#[from] anyhow::Error),
}

#[derive(Debug, Clone)]
pub enum IngressOutcome {
    /// First delivery of this `(hospital_id, source_id)` — screening ran.
    Created {
        death_event_id: DeathEventId,
        verdict: Verdict,
        occurrence_id: Option<OccurrenceId>,
    },
    /// Already seen; screening was not re-run. spec.md §4.2/§8 ("exactly
    /// one DeathEvent and at most one Occurrence").
    Duplicate,
}

/// Required-field validation — spec.md §4.3's `data_validity` category
/// overlaps here deliberately: a payload missing these fields never reaches
/// a DeathEvent row at all, rather than being stored and then rejected by
/// screening's own (implicit, always-active) `data_validity` guard.
///
/// `hospital_id` is the value resolved server-side from the caller's API key
/// (spec.md §4.2: "tenant inferred from API key → hospital → tenant"), never
/// `req.hospital_id` — the body is agent-supplied and untrusted; trusting it
/// would let an agent authenticated as one hospital assert an arbitrary
/// `hospital_id`, breaking the `(hospital_id, source_id)` dedupe key's
/// tenant-isolation guarantee.
pub fn validate(
    tenant_id: TenantId,
    hospital_id: HospitalId,
    req: &IngressEventRequest,
) -> Result<NewDeathEvent, IngressError> {
    if req.hospital_id_origem.trim().is_empty() {
        return Err(IngressError::Validation("missing hospital_id_origem".into()));
    }
    if req.nome_paciente.trim().is_empty() {
        return Err(IngressError::Validation("missing nome_paciente".into()));
    }
    if req.causa_mortis.trim().is_empty() {
        return Err(IngressError::Validation("missing causa_mortis".into()));
    }
    if req.idade.is_none() && req.data_nascimento.is_none() {
        return Err(IngressError::Validation(
            "one of idade or data_nascimento is required".into(),
        ));
    }

    Ok(NewDeathEvent {
        tenant_id,
        hospital_id,
        source_id: req.hospital_id_origem.clone(),
        patient_name: req.nome_paciente.clone(),
        death_time: req.data_obito,
        cause_text: req.causa_mortis.clone(),
        cause_code: req.causa_cid.clone(),
        age_years: req.idade,
        birth_date: req.data_nascimento,
        sector: req.setor.clone(),
        bed: req.leito.clone(),
        medical_record: req.prontuario.clone(),
        unknown_identity: req.identificacao_desconhecida,
    })
}

fn as_view(id: DeathEventId, ev: &NewDeathEvent, received_at: DateTime<Utc>) -> DeathEventView {
    DeathEventView {
        id,
        tenant_id: ev.tenant_id,
        hospital_id: ev.hospital_id,
        source_id: ev.source_id.clone(),
        patient_name: ev.patient_name.clone(),
        death_time: ev.death_time,
        cause_text: ev.cause_text.clone(),
        cause_code: ev.cause_code.clone(),
        age_years: ev.age_years,
        birth_date: ev.birth_date,
        unknown_identity: ev.unknown_identity,
        received_at,
    }
}

/// Validate, dedupe-insert, and — on first delivery only — run screening
/// and (if eligible) spawn an occurrence. spec.md §4.2/§4.3/§4.4's handoff
/// chain in one call, matching how `pep-server`'s ingress handler is meant
/// to use it (one async call per inbound event).
#[allow(clippy::too_many_arguments)]
pub async fn ingest(
    pool: &PgPool,
    cache: &SnapshotCache,
    occurrences: &OccurrenceManager,
    tenant_id: TenantId,
    hospital_id: HospitalId,
    req: IngressEventRequest,
) -> Result<IngressOutcome, IngressError> {
    let new_event = validate(tenant_id, hospital_id, &req)?;
    let received_at = Utc::now();

    let Some(death_event_id) = pep_db::insert_death_event_deduped(pool, &new_event)
        .await
        .map_err(IngressError::Db)?
    else {
        tracing::info!(hospital_id = %hospital_id, "duplicate death event ignored");
        return Ok(IngressOutcome::Duplicate);
    };

    let scope = TenantScope { tenant_id };
    let snapshot = cache
        .get_or_fetch(tenant_id, || async {
            pep_screening::fetch_snapshot(pool, &scope).await
        })
        .await
        .map_err(|e| IngressError::RuleSnapshotUnavailable(e.to_string()))?;

    let view = as_view(death_event_id, &new_event, received_at);
    let verdict = pep_screening::evaluate(&snapshot, &view, received_at);

    let occurrence_id = if verdict.eligible {
        let window_hours = pep_screening::effective_window_hours(&snapshot);
        let occ = occurrences
            .create_occurrence(
                tenant_id,
                hospital_id,
                death_event_id,
                new_event.death_time,
                window_hours,
            )
            .await
            .map_err(IngressError::Db)?;
        Some(occ.occurrence_id)
    } else {
        None
    };

    Ok(IngressOutcome::Created {
        death_event_id,
        verdict,
        occurrence_id,
    })
}
