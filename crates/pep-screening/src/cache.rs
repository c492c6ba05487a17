//! Per-tenant rule snapshot cache — spec.md §4.3, §9.
//!
//! Single-flight per tenant with a 5-minute TTL: concurrent callers for the
//! same tenant during a miss share one fetch instead of stampeding the
//! database, and an explicit [`SnapshotCache::invalidate`] lets rule writes
//! force an immediate refetch. Grounded on the teacher's `OnceCell`-per-key
//! pattern for lazily-populated, explicitly-invalidated state.
//!
//! The lock is two-level: a short-lived outer lock only ever guards the
//! `HashMap<TenantId, _>` itself (inserting or looking up a tenant's own
//! `Mutex`), never a DB round-trip. The per-tenant `Mutex` is what's held for
//! the duration of a miss's `fetch`, so a cache miss for tenant A never
//! blocks a cache hit — or a concurrent miss — for tenant B, matching
//! spec.md's "single-flight per tenant key," not one single-flight for the
//! whole cache.

use crate::types::RuleSnapshot;
use chrono::Utc;
use pep_schemas::TenantId;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

const TTL: Duration = Duration::from_secs(5 * 60);

struct Entry {
    snapshot: Arc<RuleSnapshot>,
    fetched_at: std::time::Instant,
}

type TenantSlot = Arc<Mutex<Option<Entry>>>;

/// Shared across requests; cheap to clone (it's an `Arc` internally).
#[derive(Clone)]
pub struct SnapshotCache {
    tenants: Arc<Mutex<HashMap<TenantId, TenantSlot>>>,
}

impl Default for SnapshotCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self {
            tenants: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Get (or lazily create) the per-tenant slot, holding the map lock only
    /// long enough to do that.
    async fn slot_for(&self, tenant_id: TenantId) -> TenantSlot {
        let mut map = self.tenants.lock().await;
        map.entry(tenant_id)
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    /// Return the cached snapshot for `tenant_id` if it is still within TTL;
    /// otherwise call `fetch` to populate it. Only this tenant's slot is
    /// locked across the `fetch` await, so a miss here never stalls lookups
    /// for any other tenant.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        tenant_id: TenantId,
        fetch: F,
    ) -> anyhow::Result<Arc<RuleSnapshot>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<RuleSnapshot>>,
    {
        let slot = self.slot_for(tenant_id).await;
        let mut guard = slot.lock().await;

        if let Some(entry) = guard.as_ref() {
            if entry.fetched_at.elapsed() < TTL {
                return Ok(entry.snapshot.clone());
            }
        }

        let snapshot = Arc::new(fetch().await?);
        *guard = Some(Entry {
            snapshot: snapshot.clone(),
            fetched_at: std::time::Instant::now(),
        });
        Ok(snapshot)
    }

    /// Drop the cached entry for `tenant_id` — called after any rule write
    /// so the next screening decision sees the change immediately rather
    /// than waiting out the TTL. Leaves the (now-empty) slot in place; the
    /// next `get_or_fetch` just repopulates it.
    pub async fn invalidate(&self, tenant_id: TenantId) {
        let slot = self.slot_for(tenant_id).await;
        *slot.lock().await = None;
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        let map = self.tenants.lock().await;
        let mut populated = 0;
        for slot in map.values() {
            if slot.lock().await.is_some() {
                populated += 1;
            }
        }
        populated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    fn empty_snapshot(tenant_id: TenantId) -> RuleSnapshot {
        RuleSnapshot::empty(tenant_id, Utc::now())
    }

    #[tokio::test]
    async fn repeated_get_within_ttl_does_not_refetch() {
        let cache = SnapshotCache::new();
        let tenant = Uuid::new_v4();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            cache
                .get_or_fetch(tenant, || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(empty_snapshot(tenant))
                })
                .await
                .unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn invalidate_forces_refetch() {
        let cache = SnapshotCache::new();
        let tenant = Uuid::new_v4();
        let calls = Arc::new(AtomicUsize::new(0));

        let fetch = |calls: Arc<AtomicUsize>| {
            let tenant = tenant;
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(empty_snapshot(tenant))
            }
        };

        cache.get_or_fetch(tenant, || fetch(calls.clone())).await.unwrap();
        cache.invalidate(tenant).await;
        cache.get_or_fetch(tenant, || fetch(calls.clone())).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn distinct_tenants_cache_independently() {
        let cache = SnapshotCache::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        cache
            .get_or_fetch(a, || async move { Ok(empty_snapshot(a)) })
            .await
            .unwrap();
        cache
            .get_or_fetch(b, || async move { Ok(empty_snapshot(b)) })
            .await
            .unwrap();

        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test]
    async fn fetch_error_does_not_poison_the_cache() {
        let cache = SnapshotCache::new();
        let tenant = Uuid::new_v4();

        let err = cache
            .get_or_fetch(tenant, || async move { Err(anyhow::anyhow!("db down")) })
            .await;
        assert!(err.is_err());
        assert_eq!(cache.len().await, 0);

        cache
            .get_or_fetch(tenant, || async move { Ok(empty_snapshot(tenant)) })
            .await
            .unwrap();
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn a_slow_miss_for_one_tenant_does_not_block_another_tenants_hit() {
        use tokio::sync::oneshot;

        let cache = SnapshotCache::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        // Prime b's cache so the second get_or_fetch below is a hit, not a fetch.
        cache
            .get_or_fetch(b, || async move { Ok(empty_snapshot(b)) })
            .await
            .unwrap();

        let (release_tx, release_rx) = oneshot::channel::<()>();
        let (started_tx, started_rx) = oneshot::channel::<()>();

        let cache_for_a = cache.clone();
        let miss_for_a = tokio::spawn(async move {
            cache_for_a
                .get_or_fetch(a, || async move {
                    started_tx.send(()).ok();
                    release_rx.await.ok();
                    Ok(empty_snapshot(a))
                })
                .await
                .unwrap();
        });

        started_rx.await.expect("a's fetch to have started");

        // While a's fetch is still blocked, b's cache hit must complete
        // immediately rather than wait on a's unrelated in-flight miss.
        let hit = tokio::time::timeout(
            Duration::from_millis(200),
            cache.get_or_fetch(b, || async move { panic!("b should be a cache hit") }),
        )
        .await;
        assert!(hit.is_ok(), "tenant b's cache hit was blocked by tenant a's in-flight miss");

        release_tx.send(()).ok();
        miss_for_a.await.unwrap();
    }
}
