//! Polling watermark persistence — spec.md §4.1/§6.
//!
//! Grounded on `mqk-reconcile::watermark::SnapshotWatermark`'s
//! check-then-accept shape, adapted from an in-memory i64 millis watermark
//! to a JSON file the agent can survive a restart against: the state file
//! spec.md §6 requires at `agent.state_file` (`last_processed_id`,
//! `last_processed_at`, `total_processed`, `last_error`, `last_error_at`).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentState {
    /// The filter-column value (cast to text, per the generic mapping) of
    /// the last row successfully delivered to central. `None` before the
    /// first successful poll — the agent starts from the beginning of the
    /// table, not "now", so it never silently skips a backlog.
    pub last_processed_id: Option<String>,
    pub last_processed_at: Option<DateTime<Utc>>,
    pub total_processed: u64,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
}

impl AgentState {
    pub fn record_success(&mut self, id: String, now: DateTime<Utc>, delivered: u64) {
        self.last_processed_id = Some(id);
        self.last_processed_at = Some(now);
        self.total_processed += delivered;
        self.last_error = None;
        self.last_error_at = None;
    }

    pub fn record_error(&mut self, message: String, now: DateTime<Utc>) {
        self.last_error = Some(message);
        self.last_error_at = Some(now);
    }

    /// Seconds since the last successful poll, or `None` if nothing has
    /// ever succeeded. The alert threshold (spec.md §6, default 600s) is
    /// compared against this.
    pub fn seconds_since_last_success(&self, now: DateTime<Utc>) -> Option<i64> {
        self.last_processed_at
            .map(|t| (now - t).num_seconds().max(0))
    }
}

pub struct WatermarkStore {
    path: PathBuf,
}

impl WatermarkStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> Result<AgentState> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => serde_json::from_str(&raw)
                .with_context(|| format!("parse agent state file {}", self.path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AgentState::default()),
            Err(e) => Err(e).with_context(|| format!("read agent state file {}", self.path.display())),
        }
    }

    /// Write via a sibling temp file + rename so a crash mid-write never
    /// leaves a truncated or half-written state file behind.
    pub fn save(&self, state: &AgentState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create state dir {}", parent.display()))?;
            }
        }
        let tmp_path = tmp_path_for(&self.path);
        let body = serde_json::to_string_pretty(state).context("serialize agent state")?;
        std::fs::write(&tmp_path, body)
            .with_context(|| format!("write agent state tmp file {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("rename agent state file into place {}", self.path.display()))?;
        Ok(())
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".tmp");
    PathBuf::from(os)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_of_a_missing_file_returns_the_default_state() {
        let store = WatermarkStore::new("/tmp/pep-agent-test-does-not-exist-12345.json");
        let state = store.load().unwrap();
        assert!(state.last_processed_id.is_none());
        assert_eq!(state.total_processed, 0);
    }

    #[test]
    fn round_trips_through_save_and_load() {
        let dir = std::env::temp_dir().join(format!("pep-agent-wm-test-{}", uuid::Uuid::new_v4()));
        let path = dir.join("state.json");
        let store = WatermarkStore::new(&path);

        let mut state = AgentState::default();
        state.record_success("42".to_string(), Utc::now(), 3);
        store.save(&state).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.last_processed_id.as_deref(), Some("42"));
        assert_eq!(loaded.total_processed, 3);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn record_error_sets_and_record_success_clears_it() {
        let mut state = AgentState::default();
        let now = Utc::now();
        state.record_error("db unreachable".to_string(), now);
        assert!(state.last_error.is_some());
        state.record_success("1".to_string(), now, 1);
        assert!(state.last_error.is_none());
    }
}
