//! Append-only JSONL store of per-task outcomes.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sidecar::truncate_tail;
use crate::verify::LoopOutcome;

const STORED_OUTPUT_LIMIT: usize = 20_000;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("result store I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed record in {path} (line {line}): {source}")]
    Malformed {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot encode record: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub task_id: String,
    pub resolved: bool,
    pub reason: String,
    pub attempts: u32,
    pub duration_ms: u64,
    pub patch_sha256: String,
    #[serde(default)]
    pub output: String,
    pub recorded_at: DateTime<Utc>,
}

impl ResultRecord {
    pub fn from_outcome(task_id: &str, outcome: &LoopOutcome) -> Self {
        Self {
            task_id: task_id.to_string(),
            resolved: outcome.resolved,
            reason: outcome.reason.to_string(),
            attempts: outcome.attempts,
            duration_ms: outcome.duration.as_millis() as u64,
            patch_sha256: outcome.patch.sha256.clone(),
            output: truncate_tail(&outcome.last_output, STORED_OUTPUT_LIMIT),
            recorded_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub resolved: usize,
    pub rate: f64,
}

pub struct ResultStore {
    path: PathBuf,
}

impl ResultStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }

    pub fn record(&self, record: &ResultRecord) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
        }

        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_err(e))?;
        file.write_all(line.as_bytes()).map_err(|e| self.io_err(e))
    }

    /// Latest record per task id. A missing store is empty.
    pub fn load(&self) -> Result<BTreeMap<String, ResultRecord>, StoreError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(self.io_err(e)),
        };

        let mut latest = BTreeMap::new();
        for (idx, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record: ResultRecord =
                serde_json::from_str(line).map_err(|source| StoreError::Malformed {
                    path: self.path.clone(),
                    line: idx + 1,
                    source,
                })?;
            latest.insert(record.task_id.clone(), record);
        }
        Ok(latest)
    }

    pub fn get(&self, task_id: &str) -> Result<Option<ResultRecord>, StoreError> {
        Ok(self.load()?.remove(task_id))
    }

    pub fn summary(&self) -> Result<Summary, StoreError> {
        let records = self.load()?;
        let total = records.len();
        let resolved = records.values().filter(|r| r.resolved).count();
        let rate = if total == 0 {
            0.0
        } else {
            resolved as f64 / total as f64
        };
        Ok(Summary {
            total,
            resolved,
            rate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(task_id: &str, resolved: bool) -> ResultRecord {
        ResultRecord {
            task_id: task_id.into(),
            resolved,
            reason: if resolved { "resolved" } else { "unresolved" }.into(),
            attempts: 1,
            duration_ms: 10,
            patch_sha256: String::new(),
            output: String::new(),
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn missing_store_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path().join("none.jsonl"));
        assert!(store.load().unwrap().is_empty());
        assert_eq!(store.summary().unwrap().total, 0);
    }

    #[test]
    fn last_record_per_task_wins() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path().join("nested/results.jsonl"));

        store.record(&record("a", false)).unwrap();
        store.record(&record("b", true)).unwrap();
        store.record(&record("a", true)).unwrap();

        assert!(store.get("a").unwrap().unwrap().resolved);
        let s = store.summary().unwrap();
        assert_eq!((s.total, s.resolved), (2, 2));
        assert!((s.rate - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn malformed_line_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.jsonl");
        fs::write(&path, "{\"task_id\": 1}\n").unwrap();

        match ResultStore::new(&path).load() {
            Err(StoreError::Malformed { line, .. }) => assert_eq!(line, 1),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
