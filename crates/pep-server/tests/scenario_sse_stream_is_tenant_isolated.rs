//! The notification stream only ever carries the subscribing tenant's
//! events — spec.md §4.5/§5. Subscribes directly through `pep_hub::Hub`
//! (the same hub the `/api/v1/notifications/stream` route wires up) rather
//! than driving the SSE wire format, since the isolation guarantee lives in
//! the hub's per-tenant channel map, not in the HTTP framing around it.

use chrono::Utc;
use pep_hub::{Hub, HubEvent};
use pep_testkit::{db::testkit_pool, HospitalFixture, TenantFixture};
use uuid::Uuid;

#[tokio::test]
#[ignore = "requires PEP_DATABASE_URL"]
async fn a_subscriber_never_observes_another_tenants_event() {
    let pool = testkit_pool().await.expect("connect + migrate");
    let tenant_a = TenantFixture::create(&pool).await.expect("tenant a");
    let _hospital_a = HospitalFixture::create(&pool, tenant_a.tenant_id).await.expect("hospital a");
    let tenant_b = TenantFixture::create(&pool).await.expect("tenant b");
    let hospital_b = HospitalFixture::create(&pool, tenant_b.tenant_id).await.expect("hospital b");

    let hub = Hub::default();
    let mut rx_a = hub.subscribe(tenant_a.tenant_id, None).await;

    hub.publish(
        tenant_b.tenant_id,
        HubEvent::Created {
            tenant_id: tenant_b.tenant_id,
            occurrence_id: Uuid::new_v4(),
            hospital_id: hospital_b.hospital_id,
            status: "PENDING".to_string(),
            expires_at: Utc::now(),
            produced_at: Utc::now(),
        },
    )
    .await;

    let result = tokio::time::timeout(std::time::Duration::from_millis(200), rx_a.recv()).await;
    assert!(result.is_err(), "tenant a's subscriber must not receive tenant b's event");
}
