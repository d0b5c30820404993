//! Agentic patch generation with sidecar test verification for
//! repository-level bug-fix benchmarks.

pub mod agent;
pub mod config;
pub mod error;
pub mod grading;
pub mod logger;
pub mod patch;
pub mod results;
pub mod sidecar;
pub mod task;
pub mod tools;
pub mod verify;
pub mod workspace;

pub use agent::{Agent, AgentError, ScriptedAgent, TurnContext, TurnEnd};
pub use config::Config;
pub use error::{Error, Result};
pub use grading::{classify, grade, parse_test_output, TestStatus, Verdict};
pub use patch::{edits_to_patch, CandidatePatch, Edit};
pub use sidecar::{EvaluationChannel, EvaluationRequest, EvaluationResult, SidecarClient, SignalDir};
pub use task::{JsonlTaskLoader, Task, TaskLoader};
pub use verify::{run_loop, verify_task, LoopOutcome, StopReason, VerifySettings};
pub use workspace::WorkingCopy;
