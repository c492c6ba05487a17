//! Hash-chained, append-only audit trail — spec.md §3 (AuditLog), §7.
//!
//! Writes land in Postgres's `audit_log` table (the migration's trigger
//! rejects UPDATE/DELETE outright), not a JSONL file, but the chaining
//! discipline is unchanged from `mqk-audit::AuditWriter`: every entry's
//! `hash_self` covers its own canonical JSON plus the previous entry's hash,
//! so any edit downstream of a row breaks every hash after it.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// Recursively checked against every key in a `details` payload. An entry
/// whose details tree contains any of these keys is rejected before it ever
/// reaches the database — audit entries describe actions, not patients.
const FORBIDDEN_DETAIL_KEYS: &[&str] = &[
    "patient_name",
    "cpf",
    "cns",
    "birth_date",
    "medical_record",
    "cause_text",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub tenant_id: Uuid,
    pub actor: String,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub severity: Severity,
    pub details: Value,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub hash_prev: Option<String>,
    pub hash_self: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warn,
    Critical,
}

impl Severity {
    fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Critical => "CRITICAL",
        }
    }
}

/// Fails if `details` contains a forbidden key at any nesting depth.
pub fn reject_sensitive_details(details: &Value) -> Result<(), LgpdViolation> {
    if contains_forbidden_key(details) {
        return Err(LgpdViolation);
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
pub struct LgpdViolation;

impl std::fmt::Display for LgpdViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("audit details contain a forbidden plaintext identifier field")
    }
}

impl std::error::Error for LgpdViolation {}

fn contains_forbidden_key(v: &Value) -> bool {
    match v {
        Value::Object(map) => map.iter().any(|(k, val)| {
            FORBIDDEN_DETAIL_KEYS.contains(&k.as_str()) || contains_forbidden_key(val)
        }),
        Value::Array(arr) => arr.iter().any(contains_forbidden_key),
        _ => false,
    }
}

/// Hash is computed from the canonical JSON of the entry with `hash_self`
/// cleared, so the hash never references itself.
pub fn compute_entry_hash(entry: &AuditEntry) -> Result<String> {
    let mut clone = entry.clone();
    clone.hash_self = None;
    let canonical = canonical_json(&clone)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

fn canonical_json<T: Serialize>(v: &T) -> Result<String> {
    let raw = serde_json::to_value(v).context("serialize audit entry failed")?;
    let sorted = sort_keys(&raw);
    serde_json::to_string(&sorted).context("json stringify failed")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

/// Append one entry, chained to the tenant's most recent entry.
///
/// Takes an advisory lock on the tenant for the duration of the transaction
/// so two concurrent writers for the same tenant can't both read the same
/// "latest hash" and produce two entries claiming the same `hash_prev`.
pub async fn append(pool: &PgPool, mut entry: AuditEntry) -> Result<i64> {
    if let Err(e) = reject_sensitive_details(&entry.details) {
        anyhow::bail!(e);
    }

    let mut tx = pool.begin().await.context("begin audit tx")?;

    sqlx::query("select pg_advisory_xact_lock(hashtextextended($1::text, 0))")
        .bind(entry.tenant_id)
        .execute(&mut *tx)
        .await
        .context("acquire tenant audit lock failed")?;

    let prev: Option<(String,)> = sqlx::query_as(
        r#"select hash_self from audit_log where tenant_id = $1 order by audit_id desc limit 1"#,
    )
    .bind(entry.tenant_id)
    .fetch_optional(&mut *tx)
    .await
    .context("fetch latest audit hash failed")?;

    entry.hash_prev = prev.map(|(h,)| h);
    let hash_self = compute_entry_hash(&entry)?;
    entry.hash_self = Some(hash_self.clone());

    let row = sqlx::query(
        r#"
        insert into audit_log (
            tenant_id, actor, action, entity_type, entity_id, severity,
            details, occurred_at, ip, user_agent, hash_prev, hash_self
        ) values (
            $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12
        )
        returning audit_id
        "#,
    )
    .bind(entry.tenant_id)
    .bind(&entry.actor)
    .bind(&entry.action)
    .bind(&entry.entity_type)
    .bind(&entry.entity_id)
    .bind(entry.severity.as_str())
    .bind(&entry.details)
    .bind(entry.occurred_at)
    .bind(&entry.ip)
    .bind(&entry.user_agent)
    .bind(&entry.hash_prev)
    .bind(&hash_self)
    .fetch_one(&mut *tx)
    .await
    .context("insert audit_log row failed")?;

    tx.commit().await.context("commit audit tx")?;

    Ok(row.try_get("audit_id")?)
}

/// Verify the hash chain of a tenant's audit log, oldest first.
pub async fn verify_chain(pool: &PgPool, tenant_id: Uuid) -> Result<VerifyResult> {
    let rows = sqlx::query(
        r#"
        select actor, action, entity_type, entity_id, severity, details,
               occurred_at, ip, user_agent, hash_prev, hash_self
        from audit_log
        where tenant_id = $1
        order by audit_id asc
        "#,
    )
    .bind(tenant_id)
    .fetch_all(pool)
    .await
    .context("fetch audit chain failed")?;

    let mut prev_hash: Option<String> = None;
    let mut count = 0usize;

    for row in rows {
        let severity_str: String = row.try_get("severity")?;
        let severity = match severity_str.as_str() {
            "INFO" => Severity::Info,
            "WARN" => Severity::Warn,
            "CRITICAL" => Severity::Critical,
            other => anyhow::bail!("unknown severity in audit_log: {other}"),
        };

        let entry = AuditEntry {
            tenant_id,
            actor: row.try_get("actor")?,
            action: row.try_get("action")?,
            entity_type: row.try_get("entity_type")?,
            entity_id: row.try_get("entity_id")?,
            severity,
            details: row.try_get("details")?,
            ip: row.try_get("ip")?,
            user_agent: row.try_get("user_agent")?,
            occurred_at: row.try_get("occurred_at")?,
            hash_prev: row.try_get("hash_prev")?,
            hash_self: row.try_get("hash_self")?,
        };

        count += 1;

        if entry.hash_prev != prev_hash {
            return Ok(VerifyResult::Broken {
                entry_index: count,
                reason: format!(
                    "hash_prev mismatch: expected {:?}, got {:?}",
                    prev_hash, entry.hash_prev
                ),
            });
        }

        if let Some(claimed) = entry.hash_self.clone() {
            let recomputed = compute_entry_hash(&entry)?;
            if claimed != recomputed {
                return Ok(VerifyResult::Broken {
                    entry_index: count,
                    reason: format!(
                        "hash_self mismatch: claimed {claimed}, recomputed {recomputed}"
                    ),
                });
            }
        }

        prev_hash = entry.hash_self;
    }

    Ok(VerifyResult::Valid { entries: count })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyResult {
    Valid { entries: usize },
    Broken { entry_index: usize, reason: String },
}
