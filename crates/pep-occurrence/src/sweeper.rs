//! The expiry sweeper — spec.md §4.4.
//!
//! Grounded on `mqk-db::outbox_claim_batch`'s `FOR UPDATE SKIP LOCKED`
//! claim-batch pattern (see `pep_db::claim_expired_occurrences`): every 30 s,
//! claim every occurrence whose window has elapsed and is still open, flip
//! it to `CANCELLED`/`time_exceeded`/`system` in one statement, then publish
//! one `status_changed` event per claimed row.

use std::time::Duration;

use chrono::Utc;
use pep_audit::{AuditEntry, Severity};
use pep_hub::{Hub, HubEvent};
use serde_json::json;
use sqlx::PgPool;
use tracing::{info, warn};

/// Sweep interval — spec.md §4.4 ("every 30 s").
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Upper bound on a single sweep's claim — keeps one slow tick from holding
/// the `occurrences` table's expiry index under a long-running transaction.
const SWEEP_BATCH_SIZE: i64 = 500;

/// Spawn the sweeper as a background task. The returned handle is cooperatively
/// cancelled by dropping or aborting it; a clean shutdown should abort it
/// before (or alongside) `Hub::shutdown`.
pub fn spawn_sweeper(pool: PgPool, hub: Hub) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            if let Err(err) = sweep_once(&pool, &hub).await {
                warn!(error = %err, "expiry sweep failed; will retry next tick");
            }
        }
    })
}

/// One sweep pass, exposed separately from [`spawn_sweeper`] so tests (and a
/// future manual "sweep now" admin endpoint) can drive it synchronously.
pub async fn sweep_once(pool: &PgPool, hub: &Hub) -> anyhow::Result<usize> {
    let expired = pep_db::claim_expired_occurrences(pool, SWEEP_BATCH_SIZE).await?;

    for row in &expired {
        info!(
            occurrence_id = %row.occurrence_id,
            tenant_id = %row.tenant_id,
            "occurrence auto-cancelled: ischemia window elapsed"
        );

        if let Err(e) = pep_audit::append(
            pool,
            AuditEntry {
                tenant_id: row.tenant_id,
                actor: "system".to_string(),
                action: "occurrence.expire".to_string(),
                entity_type: "occurrence".to_string(),
                entity_id: Some(row.occurrence_id.to_string()),
                severity: Severity::Warn,
                details: json!({
                    "to_status": row.status,
                    "outcome": row.outcome,
                    "expires_at": row.expires_at,
                }),
                ip: None,
                user_agent: None,
                occurred_at: Utc::now(),
                hash_prev: None,
                hash_self: None,
            },
        )
        .await
        {
            warn!(error = %e, occurrence_id = %row.occurrence_id, "failed to append audit log entry for auto-expiry");
        }

        hub.publish(
            row.tenant_id,
            HubEvent::StatusChanged {
                tenant_id: row.tenant_id,
                occurrence_id: row.occurrence_id,
                hospital_id: row.hospital_id,
                status: row.status.clone(),
                expires_at: row.expires_at,
                reaction_latency_ms: None,
                produced_at: Utc::now(),
            },
        )
        .await;
    }

    Ok(expired.len())
}
