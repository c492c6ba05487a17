//! Tenant isolation — spec.md §1 (cross-cutting), §6 (`X-Tenant-Context`), §9.
//!
//! Two responsibilities live here:
//!
//! 1. Resolving the effective tenant for a request from the caller's
//!    [`AuthClaims`] plus an optional `X-Tenant-Context` override — only a
//!    `is_super_admin` claim may switch tenants, and every switch must be
//!    logged at CRITICAL (spec.md §6).
//! 2. [`TenantFilter`], the single query-builder helper spec.md §9 asks for:
//!    a type that can only be constructed from a resolved tenant context and
//!    that bakes `tenant_id = $1` into every `WHERE` clause it produces, so a
//!    repository function cannot accidentally emit unscoped SQL. Modeled on
//!    `mqk-isolation::EngineIsolation::from_config_json`'s validated
//!    construction (an invariant enforced once, at the type's only
//!    constructor, rather than re-checked by every caller).

use pep_schemas::{AuthClaims, TenantId};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum TenantError {
    #[error("cross-tenant context switch requires super-admin capability")]
    SwitchForbidden,
}

/// The tenant a request is scoped to, after resolving any `X-Tenant-Context`
/// override against the caller's claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TenantContext {
    pub tenant_id: TenantId,
    pub claims_tenant_id: TenantId,
    pub switched: bool,
}

impl TenantContext {
    /// `true` if this request is operating outside the caller's home tenant.
    pub fn is_cross_tenant(&self) -> bool {
        self.switched
    }
}

/// Resolve the effective tenant for a request — spec.md §6.
///
/// `requested` is the parsed `X-Tenant-Context` header, if present. Absent a
/// header, the caller's own `tenant_id` claim is authoritative. A header
/// naming a *different* tenant is only honored when `claims.is_super_admin`;
/// otherwise the switch is rejected with [`TenantError::SwitchForbidden`]
/// (surfaced as 403 by the caller, per spec.md §6).
pub fn resolve_tenant_context(
    claims: &AuthClaims,
    requested: Option<TenantId>,
) -> Result<TenantContext, TenantError> {
    match requested {
        None => Ok(TenantContext {
            tenant_id: claims.tenant_id,
            claims_tenant_id: claims.tenant_id,
            switched: false,
        }),
        Some(t) if t == claims.tenant_id => Ok(TenantContext {
            tenant_id: t,
            claims_tenant_id: claims.tenant_id,
            switched: false,
        }),
        Some(t) => {
            if claims.is_super_admin {
                Ok(TenantContext {
                    tenant_id: t,
                    claims_tenant_id: claims.tenant_id,
                    switched: true,
                })
            } else {
                Err(TenantError::SwitchForbidden)
            }
        }
    }
}

/// Build the CRITICAL audit entry for a successful cross-tenant switch.
/// The caller (the server's auth middleware) appends it via
/// `pep_audit::append` once a pool is in scope — this function only knows
/// how to shape the entry, not how to persist it.
pub fn switch_audit_entry(ctx: &TenantContext, actor_user_id: Uuid) -> Option<pep_audit::AuditEntry> {
    if !ctx.switched {
        return None;
    }
    Some(pep_audit::AuditEntry {
        tenant_id: ctx.tenant_id,
        actor: actor_user_id.to_string(),
        action: "tenant.context_switch".to_string(),
        entity_type: "tenant".to_string(),
        entity_id: Some(ctx.tenant_id.to_string()),
        severity: pep_audit::Severity::Critical,
        details: serde_json::json!({ "from_tenant_id": ctx.claims_tenant_id }),
        ip: None,
        user_agent: None,
        occurred_at: chrono::Utc::now(),
        hash_prev: None,
        hash_self: None,
    })
}

/// The query-builder guard spec.md §9 calls for: constructible only from a
/// resolved [`TenantContext`], and every `WHERE` fragment it produces keeps
/// `tenant_id = $1` as the leading, non-optional predicate.
#[derive(Debug, Clone, Copy)]
pub struct TenantFilter {
    tenant_id: TenantId,
}

impl TenantFilter {
    pub fn new(ctx: &TenantContext) -> Self {
        Self {
            tenant_id: ctx.tenant_id,
        }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    /// `tenant_id = $1` alone, or `tenant_id = $1 AND (<extra>)` when a
    /// caller needs additional predicates. There is no way to obtain a
    /// `WHERE` fragment from this type that omits the tenant predicate.
    pub fn where_clause(&self, extra: Option<&str>) -> String {
        match extra {
            None | Some("") => "tenant_id = $1".to_string(),
            Some(extra) => format!("tenant_id = $1 AND ({extra})"),
        }
    }

    pub fn to_db_scope(&self) -> pep_db::TenantScope {
        pep_db::TenantScope {
            tenant_id: self.tenant_id,
        }
    }
}
