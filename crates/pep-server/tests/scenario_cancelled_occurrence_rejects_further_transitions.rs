//! Once an occurrence is CANCELLED it is terminal — spec.md §4.4's state
//! diagram admits no outgoing edge from CANCELLED, so any further
//! transition call must come back as a 409 naming the forbidden edge rather
//! than silently succeeding or 404ing.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use pep_schemas::{AuthClaims, Role};
use pep_server::{routes::build_router, state::AppState};
use pep_testkit::{bearer_token, db::testkit_pool, HospitalFixture, TenantFixture};
use serde_json::json;
use tower::ServiceExt;
use uuid::Uuid;

fn manager_claims(tenant_id: Uuid) -> AuthClaims {
    AuthClaims {
        user_id: Uuid::new_v4(),
        email: "manager@example.org".to_string(),
        role: Role::Manager,
        hospital_id: None,
        tenant_id,
        is_super_admin: false,
    }
}

#[tokio::test]
#[ignore = "requires PEP_DATABASE_URL"]
async fn accepting_a_cancelled_occurrence_is_a_409() {
    let pool = testkit_pool().await.expect("connect + migrate");
    let tenant = TenantFixture::create(&pool).await.expect("tenant fixture");
    let hospital = HospitalFixture::create(&pool, tenant.tenant_id).await.expect("hospital fixture");

    let occurrence = pep_db::insert_occurrence(
        &pool,
        tenant.tenant_id,
        hospital.hospital_id,
        Uuid::new_v4(),
        chrono::Utc::now() + chrono::Duration::hours(6),
    )
    .await
    .expect("insert occurrence");

    let app = build_router(AppState::new(pool));
    let token = bearer_token(&manager_claims(tenant.tenant_id));

    let cancel_res = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/v1/occurrences/{}/cancel", occurrence.occurrence_id))
                .header("content-type", "application/json")
                .header("Authorization", format!("Bearer {token}"))
                .body(Body::from(json!({"reason": "test cancellation"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(cancel_res.status(), StatusCode::OK);

    let accept_res = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/v1/occurrences/{}/accept", occurrence.occurrence_id))
                .header("content-type", "application/json")
                .header("Authorization", format!("Bearer {token}"))
                .body(Body::from(json!({}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(accept_res.status(), StatusCode::CONFLICT);
}
