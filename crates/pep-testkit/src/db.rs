//! Temp Postgres bootstrap — spec.md §8.4.
//!
//! Mirrors `mqk_db::testkit_db_pool`: connect against `PEP_DATABASE_URL` and
//! run migrations, so every scenario test starts from a known-clean schema
//! without hand-rolling its own pool setup.

use anyhow::Result;
use sqlx::PgPool;

/// Connects via [`pep_db::ENV_DB_URL`] and applies migrations. Tests that use
/// this call it once per test (not shared across tests) since each test
/// creates its own tenant/hospital rows and never truncates tables.
pub async fn testkit_pool() -> Result<PgPool> {
    pep_db::testkit_db_pool().await
}
