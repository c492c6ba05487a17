// crates/pep-db/src/lib.rs
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::Row;
use sqlx::{postgres::PgPoolOptions, PgPool};
use uuid::Uuid;

pub const ENV_DB_URL: &str = "PEP_DATABASE_URL";

/// Connect to Postgres using PEP_DATABASE_URL. Pool is bounded at 10
/// connections on the server side (spec.md §5); the agent uses its own
/// smaller pool via `connect_with_max`.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    connect_with_max(&url, 10).await
}

pub async fn connect_with_max(url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .max_lifetime(std::time::Duration::from_secs(300))
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;
    Ok(pool)
}

/// Test helper: connect using PEP_DATABASE_URL and ensure migrations are applied.
pub async fn testkit_db_pool() -> Result<PgPool> {
    let pool = connect_from_env().await?;
    migrate(&pool).await?;
    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// Simple status query (connectivity + schema presence).
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;
    let ok = one == 1;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='occurrences'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok,
        has_core_tables: exists,
    })
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_core_tables: bool,
}

/// Tenant-scoped query guard — every repository function below takes an
/// explicit `tenant_id` and binds it into the `where` clause, never trusting
/// a caller-supplied filter alone. See `pep-tenant` for the request-side half
/// of this invariant.
pub struct TenantScope {
    pub tenant_id: Uuid,
}

// -----------------------------
// Hospitals
// -----------------------------

#[derive(Debug, Clone)]
pub struct HospitalRow {
    pub hospital_id: Uuid,
    pub tenant_id: Uuid,
    pub code: String,
    pub name: String,
    pub active: bool,
}

pub async fn fetch_hospital_by_api_key_hash(
    pool: &PgPool,
    api_key_hash: &str,
) -> Result<Option<HospitalRow>> {
    let row = sqlx::query(
        r#"
        select hospital_id, tenant_id, code, name, active
        from hospitals
        where agent_api_key_hash = $1 and active
        "#,
    )
    .bind(api_key_hash)
    .fetch_optional(pool)
    .await
    .context("fetch_hospital_by_api_key_hash failed")?;

    let Some(row) = row else { return Ok(None) };
    Ok(Some(HospitalRow {
        hospital_id: row.try_get("hospital_id")?,
        tenant_id: row.try_get("tenant_id")?,
        code: row.try_get("code")?,
        name: row.try_get("name")?,
        active: row.try_get("active")?,
    }))
}

// -----------------------------
// Shifts
// -----------------------------

/// The on-duty operator for a hospital at time T is the shift covering T
/// (spec.md §3); undefined (`None`) if no shift covers it. Ties broken by
/// `start_at` ascending — the earliest-starting covering shift wins, since
/// overlapping shifts are a scheduling error, not a feature to pick from.
pub async fn fetch_on_duty_user(
    pool: &PgPool,
    hospital_id: Uuid,
    at: DateTime<Utc>,
) -> Result<Option<Uuid>> {
    let row: Option<(Uuid,)> = sqlx::query_as(
        r#"
        select user_id
        from shifts
        where hospital_id = $1 and start_at <= $2 and end_at > $2
        order by start_at asc
        limit 1
        "#,
    )
    .bind(hospital_id)
    .bind(at)
    .fetch_optional(pool)
    .await
    .context("fetch_on_duty_user failed")?;

    Ok(row.map(|(user_id,)| user_id))
}

// -----------------------------
// Rules & rule snapshot
// -----------------------------

#[derive(Debug, Clone)]
pub struct RuleRow {
    pub rule_id: Uuid,
    pub tenant_id: Uuid,
    pub category: String,
    pub priority: i32,
    pub enabled: bool,
    pub params: Value,
    pub updated_at: DateTime<Utc>,
}

/// All enabled rules for a tenant, ordered by category (fixed evaluation
/// order is applied by the caller, `pep-screening`) then priority. This is
/// the query behind the per-tenant rule snapshot cache.
pub async fn fetch_enabled_rules(scope: &TenantScope, pool: &PgPool) -> Result<Vec<RuleRow>> {
    let rows = sqlx::query(
        r#"
        select rule_id, tenant_id, category, priority, enabled, params, updated_at
        from rules
        where tenant_id = $1 and enabled
        order by category, priority
        "#,
    )
    .bind(scope.tenant_id)
    .fetch_all(pool)
    .await
    .context("fetch_enabled_rules failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(RuleRow {
            rule_id: row.try_get("rule_id")?,
            tenant_id: row.try_get("tenant_id")?,
            category: row.try_get("category")?,
            priority: row.try_get("priority")?,
            enabled: row.try_get("enabled")?,
            params: row.try_get("params")?,
            updated_at: row.try_get("updated_at")?,
        });
    }
    Ok(out)
}

/// The fingerprint used to invalidate the in-process snapshot cache: the
/// most recent `updated_at` across any of the tenant's rules (enabled or
/// not, since disabling a rule is itself a cache-relevant write).
pub async fn fetch_rules_fingerprint(scope: &TenantScope, pool: &PgPool) -> Result<Option<DateTime<Utc>>> {
    let row: Option<(Option<DateTime<Utc>>,)> = sqlx::query_as(
        r#"select max(updated_at) from rules where tenant_id = $1"#,
    )
    .bind(scope.tenant_id)
    .fetch_optional(pool)
    .await
    .context("fetch_rules_fingerprint failed")?;

    Ok(row.and_then(|(t,)| t))
}

// -----------------------------
// Death events (ingress dedup)
// -----------------------------

#[derive(Debug, Clone)]
pub struct NewDeathEvent {
    pub tenant_id: Uuid,
    pub hospital_id: Uuid,
    pub source_id: String,
    pub patient_name: String,
    pub death_time: DateTime<Utc>,
    pub cause_text: String,
    pub cause_code: Option<String>,
    pub age_years: Option<i32>,
    pub birth_date: Option<DateTime<Utc>>,
    pub sector: Option<String>,
    pub bed: Option<String>,
    pub medical_record: Option<String>,
    pub unknown_identity: bool,
}

/// Idempotent insert keyed on `(hospital_id, source_id)`. Returns the
/// inserted row's id on first delivery, `None` on a duplicate — the caller
/// (pep-ingress) must treat `None` as a no-op, not an error.
pub async fn insert_death_event_deduped(pool: &PgPool, ev: &NewDeathEvent) -> Result<Option<Uuid>> {
    let row: Option<(Uuid,)> = sqlx::query_as(
        r#"
        insert into death_events (
            tenant_id, hospital_id, source_id, patient_name, death_time,
            cause_text, cause_code, age_years, birth_date, sector, bed,
            medical_record, unknown_identity
        ) values (
            $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13
        )
        on conflict (hospital_id, source_id) do nothing
        returning death_event_id
        "#,
    )
    .bind(ev.tenant_id)
    .bind(ev.hospital_id)
    .bind(&ev.source_id)
    .bind(&ev.patient_name)
    .bind(ev.death_time)
    .bind(&ev.cause_text)
    .bind(&ev.cause_code)
    .bind(ev.age_years)
    .bind(ev.birth_date.map(|d| d.date_naive()))
    .bind(&ev.sector)
    .bind(&ev.bed)
    .bind(&ev.medical_record)
    .bind(ev.unknown_identity)
    .fetch_optional(pool)
    .await
    .context("insert_death_event_deduped failed")?;

    Ok(row.map(|(id,)| id))
}

#[derive(Debug, Clone)]
pub struct DeathEventRow {
    pub death_event_id: Uuid,
    pub tenant_id: Uuid,
    pub hospital_id: Uuid,
    pub source_id: String,
    pub patient_name: String,
    pub death_time: DateTime<Utc>,
    pub cause_text: String,
    pub cause_code: Option<String>,
    pub age_years: Option<i32>,
    pub unknown_identity: bool,
}

pub async fn fetch_death_event(pool: &PgPool, death_event_id: Uuid) -> Result<DeathEventRow> {
    let row = sqlx::query(
        r#"
        select death_event_id, tenant_id, hospital_id, source_id, patient_name,
               death_time, cause_text, cause_code, age_years, unknown_identity
        from death_events
        where death_event_id = $1
        "#,
    )
    .bind(death_event_id)
    .fetch_one(pool)
    .await
    .context("fetch_death_event failed")?;

    Ok(DeathEventRow {
        death_event_id: row.try_get("death_event_id")?,
        tenant_id: row.try_get("tenant_id")?,
        hospital_id: row.try_get("hospital_id")?,
        source_id: row.try_get("source_id")?,
        patient_name: row.try_get("patient_name")?,
        death_time: row.try_get("death_time")?,
        cause_text: row.try_get("cause_text")?,
        cause_code: row.try_get("cause_code")?,
        age_years: row.try_get("age_years")?,
        unknown_identity: row.try_get("unknown_identity")?,
    })
}

// -----------------------------
// Occurrences
// -----------------------------

#[derive(Debug, Clone)]
pub struct OccurrenceRow {
    pub occurrence_id: Uuid,
    pub tenant_id: Uuid,
    pub hospital_id: Uuid,
    pub death_event_id: Uuid,
    pub status: String,
    pub expires_at: DateTime<Utc>,
    pub outcome: Option<String>,
    pub first_response_at: Option<DateTime<Utc>>,
    pub assignee_id: Option<Uuid>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn row_to_occurrence(row: sqlx::postgres::PgRow) -> Result<OccurrenceRow> {
    Ok(OccurrenceRow {
        occurrence_id: row.try_get("occurrence_id")?,
        tenant_id: row.try_get("tenant_id")?,
        hospital_id: row.try_get("hospital_id")?,
        death_event_id: row.try_get("death_event_id")?,
        status: row.try_get("status")?,
        expires_at: row.try_get("expires_at")?,
        outcome: row.try_get("outcome")?,
        first_response_at: row.try_get("first_response_at")?,
        assignee_id: row.try_get("assignee_id")?,
        version: row.try_get("version")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Create the occurrence produced by an eligible Screening verdict. Not
/// idempotent by itself — `death_event_id` is unique, so a second attempt on
/// the same death event is rejected at the DB layer and the caller should
/// treat a unique-violation here as "already exists, fetch instead".
pub async fn insert_occurrence(
    pool: &PgPool,
    tenant_id: Uuid,
    hospital_id: Uuid,
    death_event_id: Uuid,
    expires_at: DateTime<Utc>,
) -> Result<OccurrenceRow> {
    let row = sqlx::query(
        r#"
        insert into occurrences (tenant_id, hospital_id, death_event_id, expires_at)
        values ($1, $2, $3, $4)
        returning occurrence_id, tenant_id, hospital_id, death_event_id, status,
                  expires_at, outcome, first_response_at, assignee_id, version,
                  created_at, updated_at
        "#,
    )
    .bind(tenant_id)
    .bind(hospital_id)
    .bind(death_event_id)
    .bind(expires_at)
    .fetch_one(pool)
    .await
    .context("insert_occurrence failed")?;

    row_to_occurrence(row)
}

pub async fn fetch_occurrence(scope: &TenantScope, pool: &PgPool, occurrence_id: Uuid) -> Result<Option<OccurrenceRow>> {
    let row = sqlx::query(
        r#"
        select occurrence_id, tenant_id, hospital_id, death_event_id, status,
               expires_at, outcome, first_response_at, assignee_id, version,
               created_at, updated_at
        from occurrences
        where occurrence_id = $1 and tenant_id = $2
        "#,
    )
    .bind(occurrence_id)
    .bind(scope.tenant_id)
    .fetch_optional(pool)
    .await
    .context("fetch_occurrence failed")?;

    row.map(row_to_occurrence).transpose()
}

pub async fn fetch_occurrences_by_status(
    scope: &TenantScope,
    pool: &PgPool,
    statuses: &[String],
    limit: i64,
    offset: i64,
) -> Result<Vec<OccurrenceRow>> {
    let rows = sqlx::query(
        r#"
        select occurrence_id, tenant_id, hospital_id, death_event_id, status,
               expires_at, outcome, first_response_at, assignee_id, version,
               created_at, updated_at
        from occurrences
        where tenant_id = $1 and status = any($2)
        order by created_at desc
        limit $3 offset $4
        "#,
    )
    .bind(scope.tenant_id)
    .bind(statuses)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
    .context("fetch_occurrences_by_status failed")?;

    rows.into_iter().map(row_to_occurrence).collect()
}

/// One applied transition: the optimistic-concurrency read-modify-write plus
/// its history row, in a single DB transaction. Returns `Ok(None)` on a
/// version mismatch (STALE_VERSION) — the caller retries or surfaces the
/// error; it does not return `Err` for that case because losing a race is
/// expected, routine behavior, not a failure.
pub struct OccurrenceUpdate {
    pub new_status: String,
    pub outcome: Option<String>,
    pub assignee_id: Option<Uuid>,
    pub stamp_first_response: bool,
}

pub async fn apply_occurrence_transition(
    pool: &PgPool,
    occurrence_id: Uuid,
    expected_version: i64,
    update: &OccurrenceUpdate,
    actor_id: Option<Uuid>,
    from_status: &str,
    reason: Option<&str>,
) -> Result<Option<OccurrenceRow>> {
    let mut tx = pool.begin().await.context("begin transition tx")?;

    let row = sqlx::query(
        r#"
        update occurrences
           set status = $1,
               outcome = coalesce($2, outcome),
               assignee_id = coalesce($3, assignee_id),
               first_response_at = case when $4 and first_response_at is null then now() else first_response_at end,
               version = version + 1,
               updated_at = now()
         where occurrence_id = $5 and version = $6
        returning occurrence_id, tenant_id, hospital_id, death_event_id, status,
                  expires_at, outcome, first_response_at, assignee_id, version,
                  created_at, updated_at
        "#,
    )
    .bind(&update.new_status)
    .bind(&update.outcome)
    .bind(update.assignee_id)
    .bind(update.stamp_first_response)
    .bind(occurrence_id)
    .bind(expected_version)
    .fetch_optional(&mut *tx)
    .await
    .context("apply_occurrence_transition update failed")?;

    let Some(row) = row else {
        tx.rollback().await.ok();
        return Ok(None);
    };

    sqlx::query(
        r#"
        insert into occurrence_history (occurrence_id, from_status, to_status, actor_id, reason)
        values ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(occurrence_id)
    .bind(from_status)
    .bind(&update.new_status)
    .bind(actor_id)
    .bind(reason)
    .execute(&mut *tx)
    .await
    .context("insert_occurrence_history failed")?;

    tx.commit().await.context("commit transition tx")?;

    Ok(Some(row_to_occurrence(row)?))
}

/// Stamp the on-duty operator onto a freshly created occurrence. Separate
/// from `insert_occurrence` (rather than an extra bind parameter there)
/// because assignment is optional and failure-tolerant at the call site,
/// while the insert itself must not be.
pub async fn assign_occurrence(pool: &PgPool, occurrence_id: Uuid, user_id: Uuid) -> Result<()> {
    sqlx::query("update occurrences set assignee_id = $1 where occurrence_id = $2")
        .bind(user_id)
        .bind(occurrence_id)
        .execute(pool)
        .await
        .context("assign_occurrence failed")?;
    Ok(())
}

/// The sweeper's claim query: occurrences still open whose window has
/// elapsed. `FOR UPDATE SKIP LOCKED` so a concurrently-running sweeper
/// instance (or a manual transition racing the sweep) never double-claims.
pub async fn claim_expired_occurrences(pool: &PgPool, batch_size: i64) -> Result<Vec<OccurrenceRow>> {
    let mut tx = pool.begin().await.context("begin sweep tx")?;

    let rows = sqlx::query(
        r#"
        with to_expire as (
            select occurrence_id
            from occurrences
            where status in ('PENDING', 'IN_PROGRESS') and expires_at <= now()
            order by expires_at asc
            limit $1
            for update skip locked
        )
        update occurrences
           set status = 'CANCELLED',
               outcome = 'time_exceeded',
               version = version + 1,
               updated_at = now()
         where occurrence_id in (select occurrence_id from to_expire)
        returning occurrence_id, tenant_id, hospital_id, death_event_id, status,
                  expires_at, outcome, first_response_at, assignee_id, version,
                  created_at, updated_at
        "#,
    )
    .bind(batch_size)
    .fetch_all(&mut *tx)
    .await
    .context("claim_expired_occurrences failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
        let occurrence_id: Uuid = row.try_get("occurrence_id")?;
        sqlx::query(
            r#"
            insert into occurrence_history (occurrence_id, from_status, to_status, actor_id, reason)
            values ($1, null, 'CANCELLED', null, 'time window elapsed')
            "#,
        )
        .bind(occurrence_id)
        .execute(&mut *tx)
        .await
        .context("insert sweep history failed")?;
    }

    tx.commit().await.context("commit sweep tx")?;

    for row in rows {
        out.push(row_to_occurrence(row)?);
    }
    Ok(out)
}

// -----------------------------
// Audit log
// -----------------------------

#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub tenant_id: Uuid,
    pub actor: String,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub severity: String,
    pub details: Value,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub hash_prev: Option<String>,
    pub hash_self: String,
}

/// Raw append; `pep-audit` computes the hash chain before calling this so
/// the DB layer stays a dumb writer and the chaining logic stays testable
/// without a database.
pub async fn insert_audit_entry(pool: &PgPool, ev: &NewAuditEntry) -> Result<i64> {
    let (audit_id,): (i64,) = sqlx::query_as(
        r#"
        insert into audit_log (
            tenant_id, actor, action, entity_type, entity_id, severity,
            details, ip, user_agent, hash_prev, hash_self
        ) values (
            $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11
        )
        returning audit_id
        "#,
    )
    .bind(ev.tenant_id)
    .bind(&ev.actor)
    .bind(&ev.action)
    .bind(&ev.entity_type)
    .bind(&ev.entity_id)
    .bind(&ev.severity)
    .bind(&ev.details)
    .bind(&ev.ip)
    .bind(&ev.user_agent)
    .bind(&ev.hash_prev)
    .bind(&ev.hash_self)
    .fetch_one(pool)
    .await
    .context("insert_audit_entry failed")?;

    Ok(audit_id)
}

/// The most recent entry's `hash_self` for a tenant, i.e. the next entry's
/// `hash_prev`. `None` means this tenant has no audit history yet.
pub async fn fetch_latest_audit_hash(pool: &PgPool, tenant_id: Uuid) -> Result<Option<String>> {
    let row: Option<(String,)> = sqlx::query_as(
        r#"
        select hash_self
        from audit_log
        where tenant_id = $1
        order by audit_id desc
        limit 1
        "#,
    )
    .bind(tenant_id)
    .fetch_optional(pool)
    .await
    .context("fetch_latest_audit_hash failed")?;

    Ok(row.map(|(h,)| h))
}

/// Detect a Postgres unique constraint violation by name.
pub fn is_unique_constraint_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.code().as_deref() == Some("23505") && db_err.constraint() == Some(constraint)
        }
        _ => false,
    }
}

pub fn map_db_err(err: sqlx::Error, context: &'static str) -> anyhow::Error {
    anyhow!("{context}: {err}")
}
