//! The evaluator's view of an isolated checkout: reset it, apply a diff,
//! run a shell command.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

const APPLY_TIMEOUT: Duration = Duration::from_secs(60);
const RESET_TIMEOUT: Duration = Duration::from_secs(120);
const WAIT_POLL: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum EnvError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("checkout reset failed: {0}")]
    Reset(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyStrategy {
    GitApply,
    GitApplyReject,
    PatchFuzz,
}

impl ApplyStrategy {
    /// Candidate patches: strict first, fuzzy last.
    pub const ALL: [ApplyStrategy; 3] = [
        ApplyStrategy::GitApply,
        ApplyStrategy::GitApplyReject,
        ApplyStrategy::PatchFuzz,
    ];

    /// The fixed test patch never goes through `patch --fuzz`.
    pub const TEST_PATCH: [ApplyStrategy; 2] = [ApplyStrategy::GitApply, ApplyStrategy::GitApplyReject];

    pub fn as_str(self) -> &'static str {
        match self {
            ApplyStrategy::GitApply => "git_apply",
            ApplyStrategy::GitApplyReject => "git_apply_reject",
            ApplyStrategy::PatchFuzz => "patch_fuzz",
        }
    }

    pub fn command(self, diff_file: &Path) -> String {
        let file = diff_file.display();
        match self {
            ApplyStrategy::GitApply => format!("git apply --verbose '{file}'"),
            ApplyStrategy::GitApplyReject => format!("git apply --verbose --reject '{file}'"),
            ApplyStrategy::PatchFuzz => format!("patch --batch --fuzz=5 -p1 -i '{file}'"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when killed by a signal or the timeout.
    pub exit_code: Option<i32>,
    /// stdout and stderr interleaved.
    pub output: String,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

pub trait ExecutionEnvironment {
    /// Back to the pristine base commit, untracked files removed.
    fn reset(&mut self) -> Result<(), EnvError>;

    fn apply(&mut self, diff: &str, strategy: ApplyStrategy) -> Result<CommandOutput, EnvError>;

    fn run(&mut self, command: &str, timeout: Duration) -> Result<CommandOutput, EnvError>;
}

/// A git checkout on the local filesystem, driven through `sh -c`.
pub struct LocalCheckout {
    root: PathBuf,
    scratch: PathBuf,
}

impl LocalCheckout {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, EnvError> {
        let root = root.into();
        let scratch = std::env::temp_dir().join(format!("patchbench-eval-{}", Uuid::new_v4()));
        fs::create_dir_all(&scratch).map_err(|source| EnvError::Io {
            path: scratch.clone(),
            source,
        })?;
        Ok(Self { root, scratch })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn shell(&self, command: &str, timeout: Duration) -> Result<CommandOutput, EnvError> {
        let log_path = self.scratch.join(format!("{}.log", Uuid::new_v4()));
        let io_err = |source| EnvError::Io {
            path: log_path.clone(),
            source,
        };

        let log = File::create(&log_path).map_err(io_err)?;
        let log_err = log.try_clone().map_err(io_err)?;

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .spawn()
            .map_err(|source| EnvError::Spawn {
                command: command.to_string(),
                source,
            })?;

        let started = Instant::now();
        let mut timed_out = false;

        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break Some(status),
                Ok(None) if started.elapsed() >= timeout => {
                    warn!(command, timeout_secs = timeout.as_secs(), "command timed out; killing");
                    let _ = child.kill();
                    let _ = child.wait();
                    timed_out = true;
                    break None;
                }
                Ok(None) => thread::sleep(WAIT_POLL),
                Err(source) => {
                    return Err(EnvError::Spawn {
                        command: command.to_string(),
                        source,
                    })
                }
            }
        };

        let bytes = fs::read(&log_path).map_err(io_err)?;
        let _ = fs::remove_file(&log_path);

        Ok(CommandOutput {
            exit_code: status.and_then(|s| s.code()),
            output: String::from_utf8_lossy(&bytes).into_owned(),
            timed_out,
        })
    }
}

impl ExecutionEnvironment for LocalCheckout {
    fn reset(&mut self) -> Result<(), EnvError> {
        let out = self.shell("git reset --hard -q && git clean -fdq", RESET_TIMEOUT)?;
        if !out.success() {
            return Err(EnvError::Reset(out.output));
        }
        debug!(root = %self.root.display(), "checkout reset");
        Ok(())
    }

    fn apply(&mut self, diff: &str, strategy: ApplyStrategy) -> Result<CommandOutput, EnvError> {
        let diff_file = self.scratch.join("patch.diff");
        fs::write(&diff_file, diff).map_err(|source| EnvError::Io {
            path: diff_file.clone(),
            source,
        })?;

        let out = self.shell(&strategy.command(&diff_file), APPLY_TIMEOUT)?;
        debug!(strategy = strategy.as_str(), ok = out.success(), "apply attempt");
        Ok(out)
    }

    fn run(&mut self, command: &str, timeout: Duration) -> Result<CommandOutput, EnvError> {
        self.shell(command, timeout)
    }
}

impl Drop for LocalCheckout {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.scratch);
    }
}
