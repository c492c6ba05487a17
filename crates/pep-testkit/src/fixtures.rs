//! Tenant/hospital fixtures — spec.md §8.4.
//!
//! Every scenario test needs a tenant and at least one hospital before it
//! can insert anything else; these builders insert the minimal rows and hand
//! back their ids so tests read as "given a tenant and a hospital" rather
//! than repeating the same three inserts everywhere.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use uuid::Uuid;

pub struct TenantFixture {
    pub tenant_id: Uuid,
    pub slug: String,
}

impl TenantFixture {
    /// Inserts a tenant with a unique slug derived from a fresh UUID, so
    /// concurrently running tests never collide on `tenants.slug`'s unique
    /// constraint.
    pub async fn create(pool: &PgPool) -> Result<Self> {
        let slug = format!("testkit-{}", Uuid::new_v4());
        let (tenant_id,): (Uuid,) =
            sqlx::query_as("insert into tenants (slug, name) values ($1, $2) returning tenant_id")
                .bind(&slug)
                .bind("Testkit Tenant")
                .fetch_one(pool)
                .await
                .context("insert tenant fixture")?;
        Ok(Self { tenant_id, slug })
    }
}

pub struct HospitalFixture {
    pub hospital_id: Uuid,
    pub tenant_id: Uuid,
    /// The raw (unhashed) agent API key, for tests that exercise
    /// `POST /api/v1/pep/events` via `X-API-Key`. `None` unless
    /// [`HospitalFixture::create_with_api_key`] was used.
    pub raw_api_key: Option<String>,
}

impl HospitalFixture {
    pub async fn create(pool: &PgPool, tenant_id: Uuid) -> Result<Self> {
        let code = format!("H-{}", Uuid::new_v4());
        let (hospital_id,): (Uuid,) = sqlx::query_as(
            "insert into hospitals (tenant_id, code, name) values ($1, $2, 'Testkit Hospital') returning hospital_id",
        )
        .bind(tenant_id)
        .bind(&code)
        .fetch_one(pool)
        .await
        .context("insert hospital fixture")?;
        Ok(Self {
            hospital_id,
            tenant_id,
            raw_api_key: None,
        })
    }

    /// Same as [`HospitalFixture::create`] but also sets `agent_api_key_hash`
    /// so the returned hospital can authenticate an ingress call.
    pub async fn create_with_api_key(pool: &PgPool, tenant_id: Uuid) -> Result<Self> {
        let code = format!("H-{}", Uuid::new_v4());
        let raw_key = format!("testkit-key-{}", Uuid::new_v4());
        let hash = hex::encode(Sha256::digest(raw_key.as_bytes()));

        let (hospital_id,): (Uuid,) = sqlx::query_as(
            "insert into hospitals (tenant_id, code, name, agent_api_key_hash) values ($1, $2, 'Testkit Hospital', $3) returning hospital_id",
        )
        .bind(tenant_id)
        .bind(&code)
        .bind(&hash)
        .fetch_one(pool)
        .await
        .context("insert hospital fixture with api key")?;

        Ok(Self {
            hospital_id,
            tenant_id,
            raw_api_key: Some(raw_key),
        })
    }
}

pub struct ShiftFixture {
    pub shift_id: Uuid,
    pub user_id: Uuid,
}

impl ShiftFixture {
    /// Inserts a user plus the shift covering `[start_at, end_at)` that puts
    /// them on duty at that hospital — the fixture behind on-duty-assignment
    /// tests (spec.md §3's "Shift" entity).
    pub async fn create_covering(
        pool: &PgPool,
        tenant_id: Uuid,
        hospital_id: Uuid,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
    ) -> Result<Self> {
        let email = format!("oncall-{}@testkit.local", Uuid::new_v4());
        let (user_id,): (Uuid,) = sqlx::query_as(
            "insert into users (tenant_id, email, role) values ($1, $2, 'OPERATOR') returning user_id",
        )
        .bind(tenant_id)
        .bind(&email)
        .fetch_one(pool)
        .await
        .context("insert shift-owner user fixture")?;

        let (shift_id,): (Uuid,) = sqlx::query_as(
            "insert into shifts (tenant_id, hospital_id, user_id, start_at, end_at) \
             values ($1, $2, $3, $4, $5) returning shift_id",
        )
        .bind(tenant_id)
        .bind(hospital_id)
        .bind(user_id)
        .bind(start_at)
        .bind(end_at)
        .fetch_one(pool)
        .await
        .context("insert shift fixture")?;

        Ok(Self { shift_id, user_id })
    }
}
