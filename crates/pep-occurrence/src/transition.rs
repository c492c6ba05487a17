//! The pure occurrence state machine — spec.md §4.4.
//!
//! Grounded on `mqk_integrity::arm_state::ArmState`'s pattern: a closed enum
//! plus standalone functions that return the new state or an error, backed
//! by a single static transition table so `is_legal` and the persistence
//! layer's debug assertion share one source of truth.

use pep_schemas::{OccurrenceOutcome, OccurrenceStatus};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("transition forbidden: {from:?} has no outgoing transition to {to:?}")]
    Forbidden {
        from: OccurrenceStatus,
        to: OccurrenceStatus,
    },
}

/// Every legal `(from, to)` edge — spec.md §4.4's state diagram, reproduced
/// as data so it can be asserted against instead of re-derived per call
/// site.
pub const ALLOWED: &[(OccurrenceStatus, OccurrenceStatus)] = &[
    (OccurrenceStatus::Pending, OccurrenceStatus::InProgress),
    (OccurrenceStatus::Pending, OccurrenceStatus::Cancelled),
    (OccurrenceStatus::InProgress, OccurrenceStatus::Accepted),
    (OccurrenceStatus::InProgress, OccurrenceStatus::Refused),
    (OccurrenceStatus::InProgress, OccurrenceStatus::Cancelled),
    (OccurrenceStatus::Accepted, OccurrenceStatus::Concluded),
];

pub fn is_legal(from: OccurrenceStatus, to: OccurrenceStatus) -> bool {
    ALLOWED.iter().any(|&(f, t)| f == from && t == to)
}

fn step(from: OccurrenceStatus, to: OccurrenceStatus) -> Result<OccurrenceStatus, TransitionError> {
    if is_legal(from, to) {
        Ok(to)
    } else {
        Err(TransitionError::Forbidden { from, to })
    }
}

/// `PENDING -> IN_PROGRESS` — an operator has begun handling the alert.
pub fn accept(current: OccurrenceStatus) -> Result<OccurrenceStatus, TransitionError> {
    step(current, OccurrenceStatus::InProgress)
}

/// `IN_PROGRESS -> {ACCEPTED, REFUSED}`, recording which outcome applies.
/// `ACCEPTED` here means the donation was accepted for screening purposes,
/// not the terminal lifecycle state — spec.md's state diagram has no
/// standalone ACCEPTED-as-terminal edge; `resolve` is what a caller invokes
/// for the operator's accept/refuse decision on an in-progress occurrence.
pub fn resolve(
    current: OccurrenceStatus,
    outcome: OccurrenceOutcome,
) -> Result<(OccurrenceStatus, OccurrenceOutcome), TransitionError> {
    let to = match outcome {
        OccurrenceOutcome::Captured => OccurrenceStatus::Accepted,
        OccurrenceOutcome::FamilyRefused | OccurrenceOutcome::MedicalContraindication => {
            OccurrenceStatus::Refused
        }
        OccurrenceOutcome::TimeExceeded => OccurrenceStatus::Cancelled,
    };
    step(current, to).map(|status| (status, outcome))
}

/// `ACCEPTED -> CONCLUDED` — the final outcome is recorded once the
/// donation process itself has run its course.
pub fn conclude(current: OccurrenceStatus) -> Result<OccurrenceStatus, TransitionError> {
    step(current, OccurrenceStatus::Concluded)
}

/// `{PENDING, IN_PROGRESS} -> CANCELLED` — an administrative cancellation
/// (operator-initiated, not expiry).
pub fn cancel(current: OccurrenceStatus) -> Result<OccurrenceStatus, TransitionError> {
    step(current, OccurrenceStatus::Cancelled)
}

/// `{PENDING, IN_PROGRESS} -> CANCELLED`, `outcome=time_exceeded`,
/// `actor=system` — the sweeper's transition, kept distinct from [`cancel`]
/// only in the outcome/actor it is paired with by the caller.
pub fn expire(current: OccurrenceStatus) -> Result<OccurrenceStatus, TransitionError> {
    step(current, OccurrenceStatus::Cancelled)
}
