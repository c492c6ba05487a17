//! The boundary error type — spec.md §7.
//!
//! Internal crates mostly propagate `anyhow::Error` (pure-logic crates) or
//! `sqlx::Error` (the DB layer); `PepError` is where those get translated
//! into one of the machine codes spec.md names, at the one seam that
//! actually talks HTTP. Modeled on `mqk-daemon::api_types::GateRefusedResponse`
//! — a small serializable error payload returned straight from a handler.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PepError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("auth: {0}")]
    Auth(String),

    /// Same machine code as [`PepError::Auth`] (spec.md §7 names one AUTH
    /// kind covering both), but a distinct HTTP status: a caller who is
    /// authenticated but not entitled to the tenant they asked for gets 403,
    /// not 401 — spec.md §6 ("rejected with 403 otherwise").
    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("transition forbidden: {0}")]
    TransitionForbidden(String),

    #[error("stale version")]
    StaleVersion,

    #[error("rule snapshot unavailable: {0}")]
    RuleSnapshotUnavailable(String),

    #[error("transient io: {0}")]
    TransientIo(#[from] anyhow::Error),

    #[error("lgpd violation: attempted to log a sensitive field")]
    LgpdViolation,
}

impl PepError {
    pub fn code(&self) -> &'static str {
        match self {
            PepError::Validation(_) => "VALIDATION",
            PepError::Auth(_) => "AUTH",
            PepError::Forbidden(_) => "AUTH",
            PepError::NotFound(_) => "NOT_FOUND",
            PepError::TransitionForbidden(_) => "TRANSITION_FORBIDDEN",
            PepError::StaleVersion => "STALE_VERSION",
            PepError::RuleSnapshotUnavailable(_) => "RULE_SNAPSHOT_UNAVAILABLE",
            PepError::TransientIo(_) => "TRANSIENT_IO",
            PepError::LgpdViolation => "LGPD_VIOLATION",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            PepError::Validation(_) => StatusCode::BAD_REQUEST,
            PepError::Auth(_) => StatusCode::UNAUTHORIZED,
            PepError::Forbidden(_) => StatusCode::FORBIDDEN,
            PepError::NotFound(_) => StatusCode::NOT_FOUND,
            PepError::TransitionForbidden(_) => StatusCode::CONFLICT,
            PepError::StaleVersion => StatusCode::CONFLICT,
            PepError::RuleSnapshotUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            PepError::TransientIo(_) => StatusCode::BAD_GATEWAY,
            PepError::LgpdViolation => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// User-safe message. Never includes patient plaintext — callers must
    /// not interpolate raw request fields into the `Validation`/`NotFound`
    /// variants' string payload.
    fn user_message(&self) -> String {
        self.to_string()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

impl IntoResponse for PepError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            code: self.code(),
            message: self.user_message(),
        };
        (status, Json(body)).into_response()
    }
}
