//! Auth & tenant-context extraction — spec.md §6.
//!
//! Two distinct credentials cross this boundary:
//!
//! - **Agent API keys** (`X-API-Key`) authenticate a Detection Agent to the
//!   ingress route. They identify a hospital, not a user — hashed with
//!   SHA-256 before the lookup, the same way `pep-audit` and `pep-config`
//!   hash things that must never be compared in plaintext.
//! - **Bearer claims** authenticate a human operator/manager/admin client.
//!   Token verification is explicitly out of scope here (spec.md §6: "Auth
//!   claims (consumed, not issued here)") — an upstream gateway is assumed
//!   to have already checked the signature. This crate only base64url-decodes
//!   the claims payload, either from a bare encoded claims blob or from the
//!   middle segment of a JWT-shaped `header.payload.signature` token.

use axum::extract::{FromRef, FromRequestParts, State};
use axum::http::request::Parts;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use pep_db::HospitalRow;
use pep_schemas::{AuthClaims, PepError, TenantId};
use pep_tenant::TenantContext;
use sha2::{Digest, Sha256};
use sqlx::PgPool;

use crate::state::AppState;

pub fn hash_api_key(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}

/// Look up and authenticate a Detection Agent by its `X-API-Key` header
/// value — spec.md §6. Returns `PepError::Auth` on a missing header, an
/// unknown key, or a key belonging to a deactivated hospital (the lookup
/// itself already filters on `active`).
pub async fn authenticate_agent(pool: &PgPool, api_key: Option<&str>) -> Result<HospitalRow, PepError> {
    let api_key = api_key.ok_or_else(|| PepError::Auth("missing X-API-Key".into()))?;
    let hash = hash_api_key(api_key);
    pep_db::fetch_hospital_by_api_key_hash(pool, &hash)
        .await
        .map_err(PepError::TransientIo)?
        .ok_or_else(|| PepError::Auth("unknown or inactive agent API key".into()))
}

fn decode_claims(token: &str) -> Result<AuthClaims, PepError> {
    let payload_segment = match token.splitn(3, '.').collect::<Vec<_>>().as_slice() {
        [_, payload, _] => payload.to_string(),
        _ => token.to_string(),
    };
    let bytes = URL_SAFE_NO_PAD
        .decode(payload_segment)
        .map_err(|e| PepError::Auth(format!("malformed bearer claims: {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| PepError::Auth(format!("malformed bearer claims: {e}")))
}

/// A resolved, tenant-scoped request identity: the caller's claims plus the
/// tenant context their `X-Tenant-Context` header (if any) resolved to.
/// Extracting this is what every privileged route does first.
pub struct AuthedTenant {
    pub claims: AuthClaims,
    pub context: TenantContext,
}

impl AuthedTenant {
    pub fn filter(&self) -> pep_tenant::TenantFilter {
        pep_tenant::TenantFilter::new(&self.context)
    }
}

impl<S> FromRequestParts<S> for AuthedTenant
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = PepError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| PepError::Auth("missing Authorization header".into()))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or_else(|| PepError::Auth("Authorization header must be a Bearer token".into()))?;

        let claims = decode_claims(token)?;

        let requested: Option<TenantId> = parts
            .headers
            .get("X-Tenant-Context")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.parse())
            .transpose()
            .map_err(|_| PepError::Auth("X-Tenant-Context is not a valid tenant id".into()))?;

        let context = pep_tenant::resolve_tenant_context(&claims, requested)
            .map_err(|_| PepError::Forbidden("cross-tenant context switch requires super-admin".into()))?;

        if let Some(entry) = pep_tenant::switch_audit_entry(&context, claims.user_id) {
            let app_state = State::<AppState>::from_request_parts(parts, state)
                .await
                .map_err(|_| PepError::Auth("missing app state".into()))?
                .0;
            if let Err(e) = pep_audit::append(&app_state.pool, entry).await {
                tracing::error!(error = %e, "failed to append tenant-switch audit entry");
            }
        }

        Ok(AuthedTenant { claims, context })
    }
}
