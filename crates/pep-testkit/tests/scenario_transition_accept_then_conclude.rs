//! The happy path through the occurrence state machine over HTTP — spec.md
//! §4.4/§6: PENDING -> IN_PROGRESS -> ACCEPTED -> CONCLUDED, each step
//! returning the new `version` the next call must supply as
//! `expected_version`.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use pep_schemas::{AuthClaims, Role};
use pep_server::{routes::build_router, state::AppState};
use pep_testkit::{bearer_token, db::testkit_pool, HospitalFixture, TenantFixture};
use serde_json::{json, Value};
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

async fn body_json(res: axum::response::Response) -> Value {
    serde_json::from_slice(&res.into_body().collect().await.unwrap().to_bytes()).unwrap()
}

#[tokio::test]
#[ignore = "requires PEP_DATABASE_URL"]
async fn accept_then_conclude_walks_pending_to_concluded() {
    let pool = testkit_pool().await.expect("connect + migrate");
    let tenant = TenantFixture::create(&pool).await.expect("tenant fixture");
    let hospital = HospitalFixture::create(&pool, tenant.tenant_id)
        .await
        .expect("hospital fixture");

    let occurrence = pep_db::insert_occurrence(
        &pool,
        tenant.tenant_id,
        hospital.hospital_id,
        Uuid::new_v4(),
        chrono::Utc::now() + chrono::Duration::hours(6),
    )
    .await
    .expect("insert occurrence directly for this scenario");

    let state = AppState::new(pool);
    let app = build_router(state);
    let token = bearer_token(&manager_claims(tenant.tenant_id));

    let accept_res = app
        .clone()
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
    assert_eq!(accept_res.status(), StatusCode::OK);
    let accept_json = body_json(accept_res).await;
    assert_eq!(accept_json["occurrence"]["status"], json!("IN_PROGRESS"));
    assert_eq!(accept_json["first_response"], json!(true));
    let version_after_accept = accept_json["occurrence"]["version"].as_i64().unwrap();

    let refuse_res = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/v1/occurrences/{}/refuse", occurrence.occurrence_id))
                .header("content-type", "application/json")
                .header("Authorization", format!("Bearer {token}"))
                .body(Body::from(
                    json!({"outcome": "captured", "expected_version": version_after_accept}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(refuse_res.status(), StatusCode::BAD_REQUEST, "captured is not a valid refuse outcome");

    let conclude_res = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/v1/occurrences/{}/conclude", occurrence.occurrence_id))
                .header("content-type", "application/json")
                .header("Authorization", format!("Bearer {token}"))
                .body(Body::from(json!({}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(conclude_res.status(), StatusCode::CONFLICT, "conclude is only legal from ACCEPTED, not IN_PROGRESS");

    let confirm_res = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/v1/occurrences/{}/confirm", occurrence.occurrence_id))
                .header("content-type", "application/json")
                .header("Authorization", format!("Bearer {token}"))
                .body(Body::from(json!({"expected_version": version_after_accept}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(confirm_res.status(), StatusCode::OK);
    let confirm_json = body_json(confirm_res).await;
    assert_eq!(confirm_json["occurrence"]["status"], json!("ACCEPTED"));
    let version_after_confirm = confirm_json["occurrence"]["version"].as_i64().unwrap();

    let conclude_after_confirm_res = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/v1/occurrences/{}/conclude", occurrence.occurrence_id))
                .header("content-type", "application/json")
                .header("Authorization", format!("Bearer {token}"))
                .body(Body::from(
                    json!({"expected_version": version_after_confirm}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(conclude_after_confirm_res.status(), StatusCode::OK, "conclude is legal from ACCEPTED");
    let conclude_json = body_json(conclude_after_confirm_res).await;
    assert_eq!(conclude_json["occurrence"]["status"], json!("CONCLUDED"));
}

#[tokio::test]
#[ignore = "requires PEP_DATABASE_URL"]
async fn stale_expected_version_is_rejected_as_conflict() {
    let pool = testkit_pool().await.expect("connect + migrate");
    let tenant = TenantFixture::create(&pool).await.expect("tenant fixture");
    let hospital = HospitalFixture::create(&pool, tenant.tenant_id)
        .await
        .expect("hospital fixture");

    let occurrence = pep_db::insert_occurrence(
        &pool,
        tenant.tenant_id,
        hospital.hospital_id,
        Uuid::new_v4(),
        chrono::Utc::now() + chrono::Duration::hours(6),
    )
    .await
    .expect("insert occurrence");

    let state = AppState::new(pool);
    let app = build_router(state);
    let token = bearer_token(&manager_claims(tenant.tenant_id));

    let res = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/v1/occurrences/{}/accept", occurrence.occurrence_id))
                .header("content-type", "application/json")
                .header("Authorization", format!("Bearer {token}"))
                .body(Body::from(json!({"expected_version": 999}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
}

#[tokio::test]
#[ignore = "requires PEP_DATABASE_URL"]
async fn cross_tenant_context_switch_is_forbidden_for_a_non_super_admin() {
    let pool = testkit_pool().await.expect("connect + migrate");
    let tenant_a = TenantFixture::create(&pool).await.expect("tenant a");
    let tenant_b = TenantFixture::create(&pool).await.expect("tenant b");

    let state = AppState::new(pool);
    let app = build_router(state);
    let token = bearer_token(&manager_claims(tenant_a.tenant_id));

    let res = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/api/v1/occurrences")
                .header("Authorization", format!("Bearer {token}"))
                .header("X-Tenant-Context", tenant_b.tenant_id.to_string())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}
