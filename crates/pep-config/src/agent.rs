//! Detection Agent configuration — spec.md §6.
//!
//! The agent's YAML has four sections: `database`, `mapping`, `central`,
//! `agent`. `${VAR}` placeholders anywhere in the file are substituted from
//! the process environment before parsing (see [`crate::substitute_env_vars`]).

use crate::secrets::Secret;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub driver: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub db: String,
    #[serde(default = "default_ssl_mode")]
    pub ssl_mode: String,
}

fn default_ssl_mode() -> String {
    "disable".to_string()
}

/// Column names for the standard fields. Optional columns are omitted from
/// the generated `SELECT` when unmapped.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FieldMapping {
    pub source_table: String,
    pub filter_column: String,
    pub fields: FieldColumns,
    pub custom_query: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FieldColumns {
    pub id: String,
    pub name: String,
    pub death_time: String,
    pub cause: String,
    pub birth_date: Option<String>,
    pub age: Option<String>,
    pub cns: Option<String>,
    pub cpf: Option<String>,
    pub sector: Option<String>,
    pub bed: Option<String>,
    pub record: Option<String>,
    pub unknown_flag: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CentralConfig {
    pub url: String,
    pub api_key: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout: u64,
    #[serde(default)]
    pub insecure: bool,
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    pub hospital_id: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
    #[serde(default = "default_state_file")]
    pub state_file: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_alert_threshold")]
    pub alert_threshold: u64,
}

fn default_poll_interval() -> u64 {
    3
}

fn default_state_file() -> String {
    "/var/lib/pep-agent/state.json".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_alert_threshold() -> u64 {
    600 // 10 minutes, spec.md §6 default
}

/// Parsed agent config, pre-`${VAR}`-substitution structure.
#[derive(Debug, Clone, Deserialize)]
pub struct RawAgentConfig {
    pub database: DatabaseConfig,
    pub mapping: FieldMapping,
    pub central: CentralConfig,
    pub agent: AgentSection,
}

/// Agent config after env substitution, with secrets wrapped so a stray
/// `{:?}` never leaks a password or API key into logs.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub database: DatabaseConfig,
    pub database_password: Secret,
    pub mapping: FieldMapping,
    pub central_url: String,
    pub central_api_key: Secret,
    pub central_timeout: Duration,
    pub central_insecure: bool,
    pub hospital_id: String,
    pub poll_interval: Duration,
    pub state_file: String,
    pub log_level: String,
    pub alert_threshold: Duration,
}

impl AgentConfig {
    /// Clamp to the documented 1-10s range (spec.md §4.1).
    pub fn poll_interval_clamped(&self) -> Duration {
        let secs = self.poll_interval.as_secs().clamp(1, 10);
        Duration::from_secs(secs)
    }
}

pub fn load_agent_config(path: &str) -> Result<AgentConfig> {
    let raw_text = fs::read_to_string(path).with_context(|| format!("read agent config: {path}"))?;
    load_agent_config_from_str(&raw_text)
}

pub fn load_agent_config_from_str(raw_text: &str) -> Result<AgentConfig> {
    let substituted = crate::substitute_env_vars(raw_text);
    let raw: RawAgentConfig =
        serde_yaml::from_str(&substituted).context("parse agent config yaml")?;

    Ok(AgentConfig {
        database_password: Secret::new(raw.database.password.clone()),
        database: raw.database,
        mapping: raw.mapping,
        central_url: raw.central.url,
        central_api_key: Secret::new(raw.central.api_key),
        central_timeout: Duration::from_secs(raw.central.timeout),
        central_insecure: raw.central.insecure,
        hospital_id: raw.agent.hospital_id,
        poll_interval: Duration::from_secs(raw.agent.poll_interval),
        state_file: raw.agent.state_file,
        log_level: raw.agent.log_level,
        alert_threshold: Duration::from_secs(raw.agent.alert_threshold),
    })
}

/// Map of standard field name -> configured source column, skipping any
/// field the hospital's schema doesn't carry. Used by the agent's SELECT
/// builder so optional columns never appear in the generated query.
pub fn mapped_optional_columns(m: &FieldColumns) -> HashMap<&'static str, String> {
    let mut out = HashMap::new();
    if let Some(v) = &m.birth_date {
        out.insert("birth_date", v.clone());
    }
    if let Some(v) = &m.age {
        out.insert("age", v.clone());
    }
    if let Some(v) = &m.cns {
        out.insert("cns", v.clone());
    }
    if let Some(v) = &m.cpf {
        out.insert("cpf", v.clone());
    }
    if let Some(v) = &m.sector {
        out.insert("sector", v.clone());
    }
    if let Some(v) = &m.bed {
        out.insert("bed", v.clone());
    }
    if let Some(v) = &m.record {
        out.insert("record", v.clone());
    }
    if let Some(v) = &m.unknown_flag {
        out.insert("unknown_flag", v.clone());
    }
    out
}
