//! Shared DTOs, identifiers, and the boundary error type used across the
//! workspace. Kept dependency-light so every crate can pull it in without
//! dragging along sqlx-specific machinery (axum is only needed for the
//! `IntoResponse` impl on [`PepError`]).

pub mod error;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use error::PepError;

pub type TenantId = Uuid;
pub type HospitalId = Uuid;
pub type RuleId = Uuid;
pub type DeathEventId = Uuid;
pub type OccurrenceId = Uuid;
pub type UserId = Uuid;

/// Evaluation order is fixed by category, not by the `priority` field — see
/// `pep-screening`. `priority` only orders rules *within* a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCategory {
    DataValidity,
    TimeWindow,
    AgeLimit,
    ExcludedCause,
    UnknownIdentity,
}

impl RuleCategory {
    /// Fixed evaluation order, spec.md §4.3.
    pub const ORDER: [RuleCategory; 5] = [
        RuleCategory::DataValidity,
        RuleCategory::TimeWindow,
        RuleCategory::AgeLimit,
        RuleCategory::ExcludedCause,
        RuleCategory::UnknownIdentity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleCategory::DataValidity => "data_validity",
            RuleCategory::TimeWindow => "time_window",
            RuleCategory::AgeLimit => "age_limit",
            RuleCategory::ExcludedCause => "excluded_cause",
            RuleCategory::UnknownIdentity => "unknown_identity",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "data_validity" => Some(RuleCategory::DataValidity),
            "time_window" => Some(RuleCategory::TimeWindow),
            "age_limit" => Some(RuleCategory::AgeLimit),
            "excluded_cause" => Some(RuleCategory::ExcludedCause),
            "unknown_identity" => Some(RuleCategory::UnknownIdentity),
            _ => None,
        }
    }
}

/// Occurrence lifecycle status — spec.md §3/§4.4. The allowed-transition
/// table lives in `pep_occurrence::transition`; this enum is intentionally
/// dumb (no behavior) so every crate can depend on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OccurrenceStatus {
    Pending,
    InProgress,
    Accepted,
    Refused,
    Cancelled,
    Concluded,
}

impl OccurrenceStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OccurrenceStatus::Refused | OccurrenceStatus::Cancelled | OccurrenceStatus::Concluded
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OccurrenceStatus::Pending => "PENDING",
            OccurrenceStatus::InProgress => "IN_PROGRESS",
            OccurrenceStatus::Accepted => "ACCEPTED",
            OccurrenceStatus::Refused => "REFUSED",
            OccurrenceStatus::Cancelled => "CANCELLED",
            OccurrenceStatus::Concluded => "CONCLUDED",
        }
    }
}

/// Outcome recorded on an occurrence once it leaves `PENDING`/`IN_PROGRESS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OccurrenceOutcome {
    Captured,
    FamilyRefused,
    MedicalContraindication,
    TimeExceeded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditSeverity {
    Info,
    Warn,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Operator,
    Manager,
    Admin,
}

/// Claims consumed from an upstream-verified bearer token — spec.md §6.
/// Issuance and signature verification are out of scope for this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthClaims {
    pub user_id: UserId,
    pub email: String,
    pub role: Role,
    pub hospital_id: Option<HospitalId>,
    pub tenant_id: TenantId,
    pub is_super_admin: bool,
}

/// Screening Engine output — spec.md §4.3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub eligible: bool,
    pub rejected_by: Option<RuleId>,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeathEventView {
    pub id: DeathEventId,
    pub tenant_id: TenantId,
    pub hospital_id: HospitalId,
    pub source_id: String,
    pub patient_name: String,
    pub death_time: DateTime<Utc>,
    pub cause_text: String,
    pub cause_code: Option<String>,
    pub age_years: Option<i32>,
    pub birth_date: Option<DateTime<Utc>>,
    pub unknown_identity: bool,
    pub received_at: DateTime<Utc>,
}
