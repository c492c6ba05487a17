//! A freshly created occurrence is stamped with whichever operator's shift
//! covers the moment it's created — spec.md §3's "Shift" entity, wired into
//! `OccurrenceManager::create_occurrence`.

use pep_hub::Hub;
use pep_occurrence::manager::OccurrenceManager;
use pep_testkit::db::testkit_pool;
use pep_testkit::{HospitalFixture, ShiftFixture, TenantFixture};
use uuid::Uuid;

#[tokio::test]
#[ignore = "requires PEP_DATABASE_URL"]
async fn occurrence_is_assigned_to_the_shift_covering_its_creation() {
    let pool = testkit_pool().await.expect("connect + migrate");
    let tenant = TenantFixture::create(&pool).await.expect("tenant fixture");
    let hospital = HospitalFixture::create(&pool, tenant.tenant_id)
        .await
        .expect("hospital fixture");

    let now = chrono::Utc::now();
    let shift = ShiftFixture::create_covering(
        &pool,
        tenant.tenant_id,
        hospital.hospital_id,
        now - chrono::Duration::hours(1),
        now + chrono::Duration::hours(7),
    )
    .await
    .expect("shift fixture covering now");

    let manager = OccurrenceManager::new(pool.clone(), Hub::new());
    let occurrence = manager
        .create_occurrence(
            tenant.tenant_id,
            hospital.hospital_id,
            Uuid::new_v4(),
            now,
            6,
        )
        .await
        .expect("create occurrence");

    let scope = pep_db::TenantScope {
        tenant_id: tenant.tenant_id,
    };
    let stored = pep_db::fetch_occurrence(&scope, &pool, occurrence.occurrence_id)
        .await
        .expect("fetch occurrence")
        .expect("occurrence exists");

    assert_eq!(stored.assignee_id, Some(shift.user_id));
}

#[tokio::test]
#[ignore = "requires PEP_DATABASE_URL"]
async fn occurrence_is_unassigned_when_no_shift_covers_its_creation() {
    let pool = testkit_pool().await.expect("connect + migrate");
    let tenant = TenantFixture::create(&pool).await.expect("tenant fixture");
    let hospital = HospitalFixture::create(&pool, tenant.tenant_id)
        .await
        .expect("hospital fixture");

    let manager = OccurrenceManager::new(pool.clone(), Hub::new());
    let occurrence = manager
        .create_occurrence(
            tenant.tenant_id,
            hospital.hospital_id,
            Uuid::new_v4(),
            chrono::Utc::now(),
            6,
        )
        .await
        .expect("create occurrence");

    assert_eq!(occurrence.assignee_id, None);
}
