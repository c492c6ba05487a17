//! The Screening Engine — spec.md §4.3.
//!
//! Pure rule evaluation ([`evaluate`]) plus the per-tenant snapshot cache
//! ([`cache::SnapshotCache`]) that keeps the hot path (every ingested death
//! event) off the rules table on all but the first request per TTL window.

pub mod cache;
pub mod evaluate;
pub mod types;

pub use cache::SnapshotCache;
pub use evaluate::{effective_window_hours, evaluate};
pub use types::{RuleSnapshot, RuleView, DEFAULT_MAX_AGE_YEARS, DEFAULT_WINDOW_HOURS};

use pep_db::TenantScope;
use sqlx::PgPool;

/// Fetch the current snapshot straight from the database, bypassing the
/// cache — what [`cache::SnapshotCache::get_or_fetch`] calls on a miss.
pub async fn fetch_snapshot(pool: &PgPool, scope: &TenantScope) -> anyhow::Result<RuleSnapshot> {
    let rows = pep_db::fetch_enabled_rules(scope, pool).await?;
    let mut rules = Vec::with_capacity(rows.len());
    for r in rows {
        let category = pep_schemas::RuleCategory::parse(&r.category)
            .ok_or_else(|| anyhow::anyhow!("unknown rule category {:?} for rule {}", r.category, r.rule_id))?;
        rules.push(RuleView {
            rule_id: r.rule_id,
            category,
            priority: r.priority,
            params: r.params,
        });
    }
    Ok(RuleSnapshot {
        tenant_id: scope.tenant_id,
        fetched_at: chrono::Utc::now(),
        rules,
    })
}
