//! Pure value types for the screening pipeline — spec.md §3 (Rule), §4.3.

use chrono::{DateTime, Utc};
use pep_schemas::{RuleCategory, RuleId, TenantId};
use serde_json::Value;

/// Global default applied when a tenant has no active rule of the given
/// category — spec.md §4.3, §9 (open question, resolved: tenant-scoped with
/// a global default).
pub const DEFAULT_WINDOW_HOURS: i64 = 6;
pub const DEFAULT_MAX_AGE_YEARS: i32 = 70;

/// One active rule, as seen by the evaluator. Dumb data — the evaluator
/// interprets `params` per its category.
#[derive(Debug, Clone)]
pub struct RuleView {
    pub rule_id: RuleId,
    pub category: RuleCategory,
    pub priority: i32,
    pub params: Value,
}

/// An immutable, per-tenant snapshot of active rules grouped by category and
/// sorted by priority within each category — the unit the snapshot cache
/// hands out and invalidates as a whole.
#[derive(Debug, Clone)]
pub struct RuleSnapshot {
    pub tenant_id: TenantId,
    pub fetched_at: DateTime<Utc>,
    pub rules: Vec<RuleView>,
}

impl RuleSnapshot {
    pub fn empty(tenant_id: TenantId, fetched_at: DateTime<Utc>) -> Self {
        Self {
            tenant_id,
            fetched_at,
            rules: Vec::new(),
        }
    }

    /// Active rules of `category`, already sorted ascending by `priority`
    /// (the fetch query orders by `category, priority`; this just filters).
    pub fn rules_in(&self, category: RuleCategory) -> impl Iterator<Item = &RuleView> {
        self.rules.iter().filter(move |r| r.category == category)
    }

    pub fn has_active(&self, category: RuleCategory) -> bool {
        self.rules_in(category).next().is_some()
    }
}
