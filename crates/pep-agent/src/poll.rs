//! The EHR polling loop — spec.md §4.1/§6.
//!
//! Grounded on `mqk-reconcile`'s reconciliation tick: poll a source on a
//! fixed interval, compare against a persisted watermark, process only what
//! is new, and never let one bad record wedge the loop. Every mapped column
//! is selected with an explicit `::text` cast so the agent can speak to any
//! hospital's schema through nothing but the column names in its config,
//! without needing a compiled decoder per column type. The tradeoff: the
//! watermark compare (`filter_column::text > $1`) is a lexicographic string
//! compare, so a non-zero-padded numeric id column would compare wrong
//! across a power-of-ten boundary (`"9" > "10"`) — hospitals configuring a
//! numeric `filter_column` are expected to use a monotonically increasing,
//! fixed-width id or a timestamp column instead.

use crate::client::CentralClient;
use crate::health::SharedHealth;
use crate::masking::mask_cpf;
use crate::watermark::{AgentState, WatermarkStore};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use pep_config::agent::{mapped_optional_columns, AgentConfig, FieldMapping};
use pep_ingress::IngressEventRequest;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tokio::sync::Notify;
use uuid::Uuid;

const POLL_BATCH_SIZE: i64 = 200;

pub struct PollLoop {
    pool: PgPool,
    config: AgentConfig,
    client: CentralClient,
    watermark: WatermarkStore,
    health: SharedHealth,
    hospital_id: Uuid,
}

impl PollLoop {
    pub fn new(
        pool: PgPool,
        config: AgentConfig,
        client: CentralClient,
        health: SharedHealth,
    ) -> Result<Self> {
        let hospital_id =
            Uuid::parse_str(&config.hospital_id).context("agent.hospital_id is not a valid UUID")?;
        let watermark = WatermarkStore::new(config.state_file.clone());
        Ok(Self {
            pool,
            config,
            client,
            watermark,
            health,
            hospital_id,
        })
    }

    /// Runs until `shutdown` is notified. Each tick polls once, logging (and
    /// recording into `health`) any error instead of propagating it — a
    /// single bad tick should never take the agent process down.
    pub async fn run(&self, shutdown: Arc<Notify>) -> Result<()> {
        let mut state = self.watermark.load().unwrap_or_default();
        let mut ticker = tokio::time::interval(self.config.poll_interval_clamped());

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.notified() => return Ok(()),
            }

            match self.poll_once(&mut state, &shutdown).await {
                Ok(delivered) if delivered > 0 => {
                    tracing::info!(delivered, "poll tick delivered events");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(error = %e, "poll tick failed");
                    state.record_error(e.to_string(), Utc::now());
                    self.watermark.save(&state).ok();
                    let mut h = self.health.write().await;
                    h.last_error = Some(e.to_string());
                }
            }
        }
    }

    /// One poll: fetch new rows past the watermark, mask and deliver each,
    /// advance the watermark after every row that either succeeds or is
    /// terminally rejected (so one malformed row can't wedge the loop
    /// forever). Returns the count of rows delivered.
    async fn poll_once(&self, state: &mut AgentState, shutdown: &Arc<Notify>) -> Result<u64> {
        let rows = fetch_new_rows(&self.pool, &self.config.mapping, state.last_processed_id.as_deref(), POLL_BATCH_SIZE)
            .await
            .context("query EHR source table")?;

        let mut delivered = 0u64;
        for row in rows {
            let record_id = row.id.clone();
            let event = match to_event(self.hospital_id, &row) {
                Ok(ev) => ev,
                Err(e) => {
                    tracing::warn!(id = %record_id, error = %e, "skipping malformed EHR record");
                    state.record_success(record_id, Utc::now(), 0);
                    self.watermark.save(state).ok();
                    continue;
                }
            };

            match self.client.send_with_retry(&event, shutdown).await {
                Ok(true) => {
                    delivered += 1;
                    state.record_success(record_id, Utc::now(), 1);
                    self.watermark.save(state).ok();
                    let mut h = self.health.write().await;
                    h.last_success_at = state.last_processed_at;
                    h.total_processed = state.total_processed;
                    h.last_error = None;
                }
                Ok(false) => return Ok(delivered), // shutdown requested mid-retry
                Err(e) => {
                    tracing::error!(id = %record_id, error = %e, "central rejected event, advancing past it");
                    state.record_success(record_id, Utc::now(), 0);
                    self.watermark.save(state).ok();
                }
            }
        }

        Ok(delivered)
    }
}

#[derive(Debug, Clone, Default)]
struct RawRecord {
    id: String,
    name: Option<String>,
    death_time: Option<String>,
    cause: Option<String>,
    birth_date: Option<String>,
    age: Option<String>,
    cns: Option<String>,
    cpf: Option<String>,
    sector: Option<String>,
    bed: Option<String>,
    record: Option<String>,
    unknown_flag: Option<String>,
}

fn build_select(mapping: &FieldMapping) -> String {
    if let Some(custom) = &mapping.custom_query {
        return custom.clone();
    }
    let optional = mapped_optional_columns(&mapping.fields);
    let mut select_cols = vec![
        format!("{}::text AS id", mapping.fields.id),
        format!("{}::text AS name", mapping.fields.name),
        format!("{}::text AS death_time", mapping.fields.death_time),
        format!("{}::text AS cause", mapping.fields.cause),
    ];
    for key in ["birth_date", "age", "cns", "cpf", "sector", "bed", "record", "unknown_flag"] {
        if let Some(col) = optional.get(key) {
            select_cols.push(format!("{col}::text AS {key}"));
        }
    }

    format!(
        "SELECT {} FROM {} WHERE {}::text > $1 ORDER BY {} ASC LIMIT $2",
        select_cols.join(", "),
        mapping.source_table,
        mapping.filter_column,
        mapping.filter_column,
    )
}

async fn fetch_new_rows(
    pool: &PgPool,
    mapping: &FieldMapping,
    watermark: Option<&str>,
    limit: i64,
) -> Result<Vec<RawRecord>> {
    let sql = build_select(mapping);
    let rows = sqlx::query(&sql)
        .bind(watermark.unwrap_or(""))
        .bind(limit)
        .fetch_all(pool)
        .await?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let get = |name: &str| -> Option<String> { row.try_get::<Option<String>, _>(name).ok().flatten() };
        out.push(RawRecord {
            id: get("id").unwrap_or_default(),
            name: get("name"),
            death_time: get("death_time"),
            cause: get("cause"),
            birth_date: get("birth_date"),
            age: get("age"),
            cns: get("cns"),
            cpf: get("cpf"),
            sector: get("sector"),
            bed: get("bed"),
            record: get("record"),
            unknown_flag: get("unknown_flag"),
        });
    }
    Ok(out)
}

/// Parses a Postgres `::text`-cast timestamp, tolerating both the
/// with-timezone and without-timezone renderings Postgres produces
/// depending on the source column's type.
fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(DateTime::from_naive_utc_and_offset(naive, Utc));
        }
        if let Ok(date) = chrono::NaiveDate::parse_from_str(raw, fmt) {
            return Ok(DateTime::from_naive_utc_and_offset(date.and_hms_opt(0, 0, 0).unwrap(), Utc));
        }
    }
    Err(anyhow::anyhow!("unrecognized timestamp format: {raw:?}"))
}

fn parse_bool(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "t" | "true" | "1" | "yes")
}

fn to_event(hospital_id: Uuid, row: &RawRecord) -> Result<IngressEventRequest> {
    let death_time = row
        .death_time
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("missing death_time"))
        .and_then(parse_timestamp)?;

    let birth_date = row.birth_date.as_deref().and_then(|s| parse_timestamp(s).ok());
    let age = row.age.as_deref().and_then(|s| s.trim().parse::<i32>().ok());

    if age.is_none() && birth_date.is_none() {
        anyhow::bail!("missing both age and birth_date");
    }

    Ok(IngressEventRequest {
        hospital_id_origem: row.id.clone(),
        hospital_id,
        timestamp_deteccao: Utc::now(),
        nome_paciente: row
            .name
            .clone()
            .ok_or_else(|| anyhow::anyhow!("missing patient name"))?,
        data_obito: death_time,
        causa_mortis: row
            .cause
            .clone()
            .ok_or_else(|| anyhow::anyhow!("missing cause of death"))?,
        causa_cid: None,
        idade: age,
        data_nascimento: birth_date,
        cns: row.cns.clone(),
        cpf_masked: row.cpf.as_deref().map(mask_cpf),
        setor: row.sector.clone(),
        leito: row.bed.clone(),
        prontuario: row.record.clone(),
        identificacao_desconhecida: row
            .unknown_flag
            .as_deref()
            .map(parse_bool)
            .unwrap_or(false),
    })
}
