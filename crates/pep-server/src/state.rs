//! Shared runtime state for pep-server.
//!
//! All types here are `Clone`-able (via `Arc` or copy, or because the thing
//! itself — `Hub`, `SnapshotCache`, `OccurrenceManager`, `PgPool` — is
//! already a cheap-clone handle). Handlers receive `State<AppState>` from
//! Axum; this module owns nothing async itself.

use pep_occurrence::OccurrenceManager;
use pep_screening::SnapshotCache;
use sqlx::PgPool;

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

/// Static build metadata included in health responses.
#[derive(Clone, Debug, serde::Serialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

/// Cloneable handle shared across all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Tenant-scoped DB pool. Every query a handler issues goes through a
    /// `pep_tenant::TenantFilter` derived from the request's resolved
    /// context, never straight off this field.
    pub pool: PgPool,
    /// Per-tenant SSE fan-out registry.
    pub hub: pep_hub::Hub,
    /// Persistence + state-machine layer behind the transition endpoints.
    pub occurrences: OccurrenceManager,
    /// Single-flight, TTL'd rule snapshot cache shared by every ingress call.
    pub snapshot_cache: SnapshotCache,
    /// Static build metadata.
    pub build: BuildInfo,
}

impl AppState {
    pub fn new(pool: PgPool) -> Self {
        let hub = pep_hub::Hub::new();
        let occurrences = OccurrenceManager::new(pool.clone(), hub.clone());
        Self {
            pool,
            hub,
            occurrences,
            snapshot_cache: SnapshotCache::new(),
            build: BuildInfo {
                service: "pep-server",
                version: env!("CARGO_PKG_VERSION"),
            },
        }
    }
}
