//! Benchmark task records and the JSONL task loader.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("task {instance_id} not found in split {split}")]
    NotFound { instance_id: String, split: String },

    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed task in {path} (line {line}): {source}")]
    Malformed {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// One benchmark instance. Loaded once per run and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub instance_id: String,

    #[serde(default)]
    pub repo: String,

    #[serde(default)]
    pub base_commit: Option<String>,

    #[serde(default)]
    pub problem_statement: String,

    #[serde(default)]
    pub hints_text: String,

    /// Fixed patch that adds or modifies test files; independent of the candidate.
    #[serde(default)]
    pub test_patch: Option<String>,

    #[serde(default, alias = "test_cmd", deserialize_with = "loose_list")]
    pub test_cmds: Vec<String>,

    #[serde(default, alias = "FAIL_TO_PASS", deserialize_with = "loose_list")]
    pub fail_to_pass: Vec<String>,

    #[serde(default, alias = "PASS_TO_PASS", deserialize_with = "loose_list")]
    pub pass_to_pass: Vec<String>,
}

impl Task {
    pub fn from_file(path: &Path) -> Result<Self, TaskError> {
        let raw = fs::read_to_string(path).map_err(|source| TaskError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        serde_json::from_str(&raw).map_err(|source| TaskError::Malformed {
            path: path.to_path_buf(),
            line: 1,
            source,
        })
    }
}

/// Source of task records, keyed by instance id and split name.
pub trait TaskLoader {
    fn load(&self, instance_id: &str, split: &str) -> Result<Task, TaskError>;
}

/// Reads `<dir>/<split>.jsonl`, one task object per line.
pub struct JsonlTaskLoader {
    dir: PathBuf,
}

impl JsonlTaskLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn split_path(&self, split: &str) -> PathBuf {
        self.dir.join(format!("{split}.jsonl"))
    }
}

impl TaskLoader for JsonlTaskLoader {
    fn load(&self, instance_id: &str, split: &str) -> Result<Task, TaskError> {
        let path = self.split_path(split);
        let raw = fs::read_to_string(&path).map_err(|source| TaskError::Io {
            path: path.clone(),
            source,
        })?;

        for (idx, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let task: Task = serde_json::from_str(line).map_err(|source| TaskError::Malformed {
                path: path.clone(),
                line: idx + 1,
                source,
            })?;

            if task.instance_id == instance_id {
                return Ok(task);
            }
        }

        Err(TaskError::NotFound {
            instance_id: instance_id.to_string(),
            split: split.to_string(),
        })
    }
}

/// Datasets ship list fields either as arrays or as JSON-encoded strings.
fn loose_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(list_from_value(value))
}

fn list_from_value(value: Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.into_iter().map(scalar_to_string).collect(),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return Vec::new();
            }
            match serde_json::from_str::<Value>(s) {
                Ok(Value::Array(items)) => items.into_iter().map(scalar_to_string).collect(),
                _ => vec![s.to_string()],
            }
        }
        _ => Vec::new(),
    }
}

fn scalar_to_string(v: Value) -> String {
    match v {
        Value::String(s) => s,
        other => other.to_string(),
    }
}
