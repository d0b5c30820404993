//! Layered configuration: built-in defaults, then a TOML file, then
//! `PATCHBENCH_*` environment variables. CLI flags are applied by the binary.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::patch::DEFAULT_FUZZY_THRESHOLD;
use crate::sidecar::EvaluatorSettings;
use crate::verify::VerifySettings;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {key}: `{value}`")]
    InvalidEnv { key: String, value: String },

    #[error("invalid log level `{0}`")]
    LogLevel(String),

    #[error("cannot install logger: {0}")]
    Logger(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub verify: VerifyConfig,
    pub sidecar: SidecarConfig,
    pub patch: PatchConfig,
    pub evaluator: EvaluatorConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    pub budget: u32,
    pub max_actions_per_turn: usize,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            budget: 3,
            max_actions_per_turn: 25,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SidecarConfig {
    pub dir: PathBuf,
    pub poll_interval_ms: u64,
    pub deadline_secs: u64,
    /// 0 waits for `agent-done` forever.
    pub evaluator_idle_secs: u64,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            dir: env::temp_dir().join("patchbench-sidecar"),
            poll_interval_ms: 250,
            deadline_secs: 600,
            evaluator_idle_secs: 0,
        }
    }
}

impl SidecarConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchConfig {
    pub fuzzy_threshold: f32,
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    pub command_timeout_secs: u64,
    pub output_limit: usize,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: 1800,
            output_limit: 200_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

impl Config {
    /// An explicit path must exist; the default location is optional.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut cfg = match explicit {
            Some(path) => Self::from_file(path)?,
            None => {
                let path = config_path();
                if path.is_file() {
                    Self::from_file(&path)?
                } else {
                    Self::default()
                }
            }
        };

        cfg.apply_env(|key| env::var(key).ok())?;
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("PATCHBENCH_BUDGET") {
            self.verify.budget = parse_env("PATCHBENCH_BUDGET", &v)?;
        }
        if let Some(v) = lookup("PATCHBENCH_SIDECAR_DIR") {
            self.sidecar.dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("PATCHBENCH_DEADLINE_SECS") {
            self.sidecar.deadline_secs = parse_env("PATCHBENCH_DEADLINE_SECS", &v)?;
        }
        if let Some(v) = lookup("PATCHBENCH_POLL_MS") {
            self.sidecar.poll_interval_ms = parse_env("PATCHBENCH_POLL_MS", &v)?;
        }
        if let Some(v) = lookup("PATCHBENCH_FUZZY_THRESHOLD") {
            let t: f32 = parse_env("PATCHBENCH_FUZZY_THRESHOLD", &v)?;
            if !(0.0..=1.0).contains(&t) {
                return Err(ConfigError::InvalidEnv {
                    key: "PATCHBENCH_FUZZY_THRESHOLD".into(),
                    value: v,
                });
            }
            self.patch.fuzzy_threshold = t;
        }
        if let Some(v) = lookup("PATCHBENCH_LOG") {
            self.log.level = v;
        }
        if let Some(v) = lookup("PATCHBENCH_LOG_JSON") {
            self.log.json = truthy(&v);
        }
        Ok(())
    }

    pub fn verify_settings(&self) -> VerifySettings {
        VerifySettings {
            budget: self.verify.budget,
            max_actions_per_turn: self.verify.max_actions_per_turn,
            fuzzy_threshold: self.patch.fuzzy_threshold,
        }
    }

    pub fn evaluator_settings(&self) -> EvaluatorSettings {
        EvaluatorSettings {
            poll_interval: self.sidecar.poll_interval(),
            idle_limit: match self.sidecar.evaluator_idle_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            command_timeout: Duration::from_secs(self.evaluator.command_timeout_secs),
            output_limit: self.evaluator.output_limit,
        }
    }
}

pub fn config_path() -> PathBuf {
    let mut dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    dir.push("patchbench");
    dir.push("config.toml");
    dir
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn truthy(val: &str) -> bool {
    matches!(val.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
