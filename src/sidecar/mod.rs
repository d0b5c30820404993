//! Request/response channel between the agent executor and an isolated test
//! evaluator. The two sides share a directory and nothing else.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod environment;
mod evaluator;
mod executor;
mod mailbox;
pub mod signal;

pub use environment::{ApplyStrategy, CommandOutput, EnvError, ExecutionEnvironment, LocalCheckout};
pub use evaluator::{truncate_tail, Evaluator, EvaluatorSettings};
pub use executor::{ExecutorState, SidecarClient};
pub use mailbox::{mailbox, MailboxChannel, MailboxEvaluator};
pub use signal::SignalDir;

use crate::patch::CandidatePatch;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("signal I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed message in {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("an evaluation request is already outstanding")]
    Busy,

    #[error("no evaluation request is outstanding")]
    NoOutstandingRequest,

    #[error("evaluator channel closed")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationRequest {
    pub request_id: String,
    pub patch: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub request_id: String,
    /// Candidate patch applied by one of the strategies.
    pub applied: bool,
    #[serde(default)]
    pub strategy: Option<ApplyStrategy>,
    #[serde(default = "yes")]
    pub test_patch_applied: bool,
    pub output: String,
    #[serde(default)]
    pub patch_sha256: String,
    #[serde(default)]
    pub runtime_ms: u64,
    /// Synthesised by the executor when the evaluator missed the deadline.
    #[serde(default)]
    pub timed_out: bool,
}

fn yes() -> bool {
    true
}

impl EvaluationResult {
    pub fn timeout(request_id: &str, patch_sha256: &str, deadline: Duration) -> Self {
        Self {
            request_id: request_id.to_string(),
            applied: false,
            strategy: None,
            test_patch_applied: false,
            output: format!(
                "TIMEOUT: evaluator did not respond within {}s",
                deadline.as_secs()
            ),
            patch_sha256: patch_sha256.to_string(),
            runtime_ms: deadline.as_millis() as u64,
            timed_out: true,
        }
    }
}

/// One request in flight at a time; `evaluate` blocks until a result or the
/// deadline.
pub trait EvaluationChannel {
    fn evaluate(&mut self, patch: &CandidatePatch) -> Result<EvaluationResult, ProtocolError>;

    /// No further requests will follow.
    fn finish(&mut self) -> Result<(), ProtocolError> {
        Ok(())
    }
}
