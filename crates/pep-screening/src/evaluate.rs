//! The Screening Engine's pure evaluator — spec.md §4.3.
//!
//! Grounded on `mqk_risk::engine::evaluate`'s shape: a sequence of ordered
//! guards, each either falls through (push a pass reason, keep going) or
//! returns the rejecting verdict immediately. No IO, no clock of its own —
//! `now` is always supplied by the caller, matching `mqk-integrity`'s
//! "caller supplies `now`" discipline.

use crate::types::{RuleSnapshot, DEFAULT_MAX_AGE_YEARS, DEFAULT_WINDOW_HOURS};
use chrono::{DateTime, Utc};
use pep_schemas::{DeathEventView, RuleCategory, RuleId, Verdict};
use serde_json::Value;

/// A category's rejection: the human-readable reason plus, when the category
/// is rule-backed, the specific `Rule` row that triggered it. `data_validity`
/// and the default (no active rule) `time_window`/`age_limit` paths carry no
/// `rule_id` — there is no row to blame, only the built-in default.
struct Reject {
    reason: String,
    rule_id: Option<RuleId>,
}

impl Reject {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            rule_id: None,
        }
    }

    fn with_rule(reason: impl Into<String>, rule_id: RuleId) -> Self {
        Self {
            reason: reason.into(),
            rule_id: Some(rule_id),
        }
    }
}

/// `data_validity` is implicit and non-configurable — spec.md §9 (open
/// question, resolved: always active). It is the only guard not backed by a
/// `Rule` row.
fn check_data_validity(event: &DeathEventView) -> Result<(), Reject> {
    if event.patient_name.trim().is_empty() {
        return Err(Reject::new("missing_required_field:patient_name"));
    }
    if event.cause_text.trim().is_empty() {
        return Err(Reject::new("missing_required_field:cause_text"));
    }
    if event.age_years.is_none() && event.birth_date.is_none() {
        return Err(Reject::new("missing_required_field:age_or_birthdate"));
    }
    Ok(())
}

fn time_window_rule(snapshot: &RuleSnapshot) -> Option<&crate::types::RuleView> {
    snapshot.rules_in(RuleCategory::TimeWindow).next()
}

fn window_hours_param(snapshot: &RuleSnapshot) -> i64 {
    time_window_rule(snapshot)
        .and_then(|r| r.params.get("window_hours"))
        .and_then(Value::as_i64)
        .unwrap_or(DEFAULT_WINDOW_HOURS)
}

/// The ischemia window this tenant's snapshot implies — tenant-scoped
/// override if a `time_window` rule is active, the global default
/// otherwise (spec.md §9, open question resolved). Exposed so the
/// Occurrence Manager can compute `expires_at` using the same window the
/// evaluator just checked against, rather than re-deriving it.
pub fn effective_window_hours(snapshot: &RuleSnapshot) -> i64 {
    window_hours_param(snapshot)
}

fn check_time_window(
    snapshot: &RuleSnapshot,
    event: &DeathEventView,
    now: DateTime<Utc>,
) -> Result<(), Reject> {
    let window_hours = window_hours_param(snapshot);
    let elapsed = now.signed_duration_since(event.death_time);
    if elapsed > chrono::Duration::hours(window_hours) {
        return Err(match time_window_rule(snapshot) {
            Some(rule) => Reject::with_rule("window_exceeded", rule.rule_id),
            None => Reject::new("window_exceeded"),
        });
    }
    Ok(())
}

fn age_at_death(event: &DeathEventView) -> Option<i32> {
    if let Some(age) = event.age_years {
        return Some(age);
    }
    let birth = event.birth_date?;
    let years = event.death_time.years_since(birth)? as i32;
    Some(years.max(0))
}

fn age_limit_rule(snapshot: &RuleSnapshot) -> Option<&crate::types::RuleView> {
    snapshot.rules_in(RuleCategory::AgeLimit).next()
}

fn max_age_param(snapshot: &RuleSnapshot) -> i32 {
    age_limit_rule(snapshot)
        .and_then(|r| r.params.get("max_age"))
        .and_then(Value::as_i64)
        .map(|v| v as i32)
        .unwrap_or(DEFAULT_MAX_AGE_YEARS)
}

/// Tie-break: age == limit is eligible (spec.md §8 boundary behavior).
fn check_age_limit(snapshot: &RuleSnapshot, event: &DeathEventView) -> Result<(), Reject> {
    let max_age = max_age_param(snapshot);
    match age_at_death(event) {
        Some(age) if age > max_age => Err(match age_limit_rule(snapshot) {
            Some(rule) => Reject::with_rule(format!("age_exceeded:{age}>{max_age}"), rule.rule_id),
            None => Reject::new(format!("age_exceeded:{age}>{max_age}")),
        }),
        _ => Ok(()),
    }
}

fn check_excluded_cause(snapshot: &RuleSnapshot, event: &DeathEventView) -> Result<(), Reject> {
    let cause_text_lower = event.cause_text.to_ascii_lowercase();
    let cause_code_lower = event.cause_code.as_deref().map(str::to_ascii_lowercase);

    for rule in snapshot.rules_in(RuleCategory::ExcludedCause) {
        let causes = rule
            .params
            .get("causes")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        for entry in &causes {
            let Some(pattern) = entry.as_str() else {
                continue;
            };
            let pattern_lower = pattern.to_ascii_lowercase();

            let code_prefix_match = cause_code_lower
                .as_deref()
                .is_some_and(|code| code.starts_with(&pattern_lower));
            let text_substring_match = cause_text_lower.contains(&pattern_lower);

            if code_prefix_match || text_substring_match {
                return Err(Reject::with_rule(
                    format!("excluded_cause:{pattern}"),
                    rule.rule_id,
                ));
            }
        }
    }
    Ok(())
}

fn check_unknown_identity(snapshot: &RuleSnapshot, event: &DeathEventView) -> Result<(), Reject> {
    if !event.unknown_identity {
        return Ok(());
    }
    if let Some(rule) = snapshot.rules_in(RuleCategory::UnknownIdentity).next() {
        return Err(Reject::with_rule("unknown_identity", rule.rule_id));
    }
    Ok(())
}

/// Evaluate every category in spec.md §4.3's fixed order. Each category
/// contributes exactly one entry to `reasons[]` — its rejection reason, or a
/// `"<category>:ok"` pass marker — and the pipeline stops at the first
/// rejecting category: categories after it are not evaluated, so they do not
/// appear in `reasons[]`. Within the category that rejects, the triggering
/// rule (ascending priority, first hit) becomes `rejected_by`.
pub fn evaluate(snapshot: &RuleSnapshot, event: &DeathEventView, now: DateTime<Utc>) -> Verdict {
    let mut reasons = Vec::new();

    macro_rules! run_guard {
        ($category:literal, $result:expr) => {
            match $result {
                Ok(()) => reasons.push(format!("{}:ok", $category)),
                Err(reject) => {
                    reasons.push(reject.reason);
                    return Verdict {
                        eligible: false,
                        rejected_by: reject.rule_id,
                        reasons,
                    };
                }
            }
        };
    }

    run_guard!("data_validity", check_data_validity(event));
    run_guard!("time_window", check_time_window(snapshot, event, now));
    run_guard!("age_limit", check_age_limit(snapshot, event));
    run_guard!("excluded_cause", check_excluded_cause(snapshot, event));
    run_guard!("unknown_identity", check_unknown_identity(snapshot, event));

    Verdict {
        eligible: true,
        rejected_by: None,
        reasons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RuleView;
    use chrono::Duration;
    use serde_json::json;
    use uuid::Uuid;

    fn base_event(now: DateTime<Utc>) -> DeathEventView {
        DeathEventView {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            hospital_id: Uuid::new_v4(),
            source_id: "OBITO-1".to_string(),
            patient_name: "Maria Silva".to_string(),
            death_time: now,
            cause_text: "cardiac arrest".to_string(),
            cause_code: Some("I46".to_string()),
            age_years: Some(40),
            birth_date: None,
            unknown_identity: false,
            received_at: now,
        }
    }

    fn rule(category: RuleCategory, params: Value) -> RuleView {
        RuleView {
            rule_id: Uuid::new_v4(),
            category,
            priority: 0,
            params,
        }
    }

    #[test]
    fn fully_eligible_event_passes_every_category() {
        let now = Utc::now();
        let event = base_event(now);
        let snapshot = RuleSnapshot::empty(event.tenant_id, now);

        let verdict = evaluate(&snapshot, &event, now);

        assert!(verdict.eligible);
        assert!(verdict.rejected_by.is_none());
        assert_eq!(verdict.reasons.len(), 5);
        assert!(verdict.reasons.iter().all(|r| r.ends_with(":ok")));
    }

    #[test]
    fn missing_patient_name_fails_data_validity_first() {
        let now = Utc::now();
        let mut event = base_event(now);
        event.patient_name = "   ".to_string();
        let snapshot = RuleSnapshot::empty(event.tenant_id, now);

        let verdict = evaluate(&snapshot, &event, now);

        assert!(!verdict.eligible);
        assert!(verdict.rejected_by.is_none());
        assert_eq!(verdict.reasons, vec!["missing_required_field:patient_name"]);
    }

    #[test]
    fn window_exactly_at_default_limit_is_eligible() {
        let now = Utc::now();
        let mut event = base_event(now);
        event.death_time = now - Duration::hours(DEFAULT_WINDOW_HOURS);
        let snapshot = RuleSnapshot::empty(event.tenant_id, now);

        let verdict = evaluate(&snapshot, &event, now);
        assert!(verdict.eligible);
    }

    #[test]
    fn window_one_second_past_default_limit_is_rejected_with_no_rule_id() {
        let now = Utc::now();
        let mut event = base_event(now);
        event.death_time = now - Duration::hours(DEFAULT_WINDOW_HOURS) - Duration::seconds(1);
        let snapshot = RuleSnapshot::empty(event.tenant_id, now);

        let verdict = evaluate(&snapshot, &event, now);
        assert!(!verdict.eligible);
        assert!(verdict.rejected_by.is_none());
        assert_eq!(verdict.reasons, vec!["window_exceeded"]);
    }

    #[test]
    fn tenant_overridden_window_rejection_carries_the_rule_id() {
        let now = Utc::now();
        let mut event = base_event(now);
        event.death_time = now - Duration::hours(3);
        let window_rule = rule(RuleCategory::TimeWindow, json!({ "window_hours": 2 }));
        let rule_id = window_rule.rule_id;
        let snapshot = RuleSnapshot {
            tenant_id: event.tenant_id,
            fetched_at: now,
            rules: vec![window_rule],
        };

        let verdict = evaluate(&snapshot, &event, now);
        assert!(!verdict.eligible);
        assert_eq!(verdict.rejected_by, Some(rule_id));
    }

    #[test]
    fn age_exactly_at_max_is_eligible() {
        let now = Utc::now();
        let mut event = base_event(now);
        event.age_years = Some(DEFAULT_MAX_AGE_YEARS);
        let snapshot = RuleSnapshot::empty(event.tenant_id, now);

        let verdict = evaluate(&snapshot, &event, now);
        assert!(verdict.eligible);
    }

    #[test]
    fn age_one_year_over_max_is_rejected() {
        let now = Utc::now();
        let mut event = base_event(now);
        event.age_years = Some(DEFAULT_MAX_AGE_YEARS + 1);
        let snapshot = RuleSnapshot::empty(event.tenant_id, now);

        let verdict = evaluate(&snapshot, &event, now);
        assert!(!verdict.eligible);
        assert!(verdict.rejected_by.is_none());
    }

    #[test]
    fn age_limit_rejection_against_active_rule_carries_its_id() {
        let now = Utc::now();
        let mut event = base_event(now);
        event.age_years = Some(80);
        let age_rule = rule(RuleCategory::AgeLimit, json!({ "max_age": 65 }));
        let rule_id = age_rule.rule_id;
        let snapshot = RuleSnapshot {
            tenant_id: event.tenant_id,
            fetched_at: now,
            rules: vec![age_rule],
        };

        let verdict = evaluate(&snapshot, &event, now);
        assert!(!verdict.eligible);
        assert_eq!(verdict.rejected_by, Some(rule_id));
    }

    #[test]
    fn excluded_cause_matches_by_code_prefix() {
        let now = Utc::now();
        let mut event = base_event(now);
        event.cause_code = Some("C50.9".to_string());
        let excl_rule = rule(RuleCategory::ExcludedCause, json!({ "causes": ["C50"] }));
        let rule_id = excl_rule.rule_id;
        let snapshot = RuleSnapshot {
            tenant_id: event.tenant_id,
            fetched_at: now,
            rules: vec![excl_rule],
        };

        let verdict = evaluate(&snapshot, &event, now);
        assert!(!verdict.eligible);
        assert_eq!(verdict.rejected_by, Some(rule_id));
    }

    #[test]
    fn excluded_cause_matches_by_text_substring_case_insensitively() {
        let now = Utc::now();
        let mut event = base_event(now);
        event.cause_text = "Suspected SEPSIS following surgery".to_string();
        event.cause_code = None;
        let excl_rule = rule(RuleCategory::ExcludedCause, json!({ "causes": ["sepsis"] }));
        let rule_id = excl_rule.rule_id;
        let snapshot = RuleSnapshot {
            tenant_id: event.tenant_id,
            fetched_at: now,
            rules: vec![excl_rule],
        };

        let verdict = evaluate(&snapshot, &event, now);
        assert!(!verdict.eligible);
        assert_eq!(verdict.rejected_by, Some(rule_id));
    }

    #[test]
    fn unknown_identity_flag_without_active_rule_is_eligible() {
        let now = Utc::now();
        let mut event = base_event(now);
        event.unknown_identity = true;
        let snapshot = RuleSnapshot::empty(event.tenant_id, now);

        let verdict = evaluate(&snapshot, &event, now);
        assert!(verdict.eligible);
    }

    #[test]
    fn active_rule_without_the_flag_is_eligible() {
        let now = Utc::now();
        let event = base_event(now);
        let id_rule = rule(RuleCategory::UnknownIdentity, json!({}));
        let snapshot = RuleSnapshot {
            tenant_id: event.tenant_id,
            fetched_at: now,
            rules: vec![id_rule],
        };

        let verdict = evaluate(&snapshot, &event, now);
        assert!(verdict.eligible);
    }

    #[test]
    fn unknown_identity_requires_both_flag_and_active_rule() {
        let now = Utc::now();
        let mut event = base_event(now);
        event.unknown_identity = true;
        let id_rule = rule(RuleCategory::UnknownIdentity, json!({}));
        let rule_id = id_rule.rule_id;
        let snapshot = RuleSnapshot {
            tenant_id: event.tenant_id,
            fetched_at: now,
            rules: vec![id_rule],
        };

        let verdict = evaluate(&snapshot, &event, now);
        assert!(!verdict.eligible);
        assert_eq!(verdict.rejected_by, Some(rule_id));
        assert_eq!(verdict.reasons.last().unwrap(), "unknown_identity");
    }

    #[test]
    fn age_computed_from_birth_date_when_age_years_absent() {
        let now = Utc::now();
        let mut event = base_event(now);
        event.age_years = None;
        event.birth_date = Some(now - Duration::days(365 * 90));

        let snapshot = RuleSnapshot::empty(event.tenant_id, now);
        let verdict = evaluate(&snapshot, &event, now);

        assert!(!verdict.eligible);
        assert!(verdict.rejected_by.is_none());
    }
}
