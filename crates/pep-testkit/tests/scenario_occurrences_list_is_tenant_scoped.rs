//! `GET /api/v1/occurrences` only ever returns the caller's own tenant's
//! rows — spec.md §5's tenant-isolation invariant, exercised at the HTTP
//! boundary rather than just `pep-tenant`'s unit tests.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use pep_schemas::{AuthClaims, Role};
use pep_server::{routes::build_router, state::AppState};
use pep_testkit::{bearer_token, db::testkit_pool, HospitalFixture, TenantFixture};
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

fn operator_claims(tenant_id: Uuid) -> AuthClaims {
    AuthClaims {
        user_id: Uuid::new_v4(),
        email: "operator@example.org".to_string(),
        role: Role::Operator,
        hospital_id: None,
        tenant_id,
        is_super_admin: false,
    }
}

#[tokio::test]
#[ignore = "requires PEP_DATABASE_URL"]
async fn a_tenants_listing_never_includes_another_tenants_occurrence() {
    let pool = testkit_pool().await.expect("connect + migrate");

    let tenant_a = TenantFixture::create(&pool).await.expect("tenant a");
    let hospital_a = HospitalFixture::create(&pool, tenant_a.tenant_id).await.expect("hospital a");
    let tenant_b = TenantFixture::create(&pool).await.expect("tenant b");
    let hospital_b = HospitalFixture::create(&pool, tenant_b.tenant_id).await.expect("hospital b");

    let occ_a = pep_db::insert_occurrence(
        &pool,
        tenant_a.tenant_id,
        hospital_a.hospital_id,
        Uuid::new_v4(),
        chrono::Utc::now() + chrono::Duration::hours(6),
    )
    .await
    .expect("insert occurrence for tenant a");

    let _occ_b = pep_db::insert_occurrence(
        &pool,
        tenant_b.tenant_id,
        hospital_b.hospital_id,
        Uuid::new_v4(),
        chrono::Utc::now() + chrono::Duration::hours(6),
    )
    .await
    .expect("insert occurrence for tenant b");

    let app = build_router(AppState::new(pool));
    let token_a = bearer_token(&operator_claims(tenant_a.tenant_id));

    let res = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/api/v1/occurrences?status=PENDING")
                .header("Authorization", format!("Bearer {token_a}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let json: Value = serde_json::from_slice(&res.into_body().collect().await.unwrap().to_bytes()).unwrap();
    let ids: Vec<String> = json["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|item| item["occurrence_id"].as_str().unwrap().to_string())
        .collect();

    assert!(ids.contains(&occ_a.occurrence_id.to_string()));
    assert_eq!(ids.len(), 1, "tenant b's occurrence must not leak into tenant a's listing");
}
