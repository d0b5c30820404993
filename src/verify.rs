//! verify.rs
//!
//! Per-task verification loop: agent turn, evaluate, decide.

use std::fmt;
use std::path::Path;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::agent::{Agent, TurnContext, TurnEnd};
use crate::config::Config;
use crate::grading::{grade, Verdict};
use crate::patch::CandidatePatch;
use crate::results::{ResultRecord, ResultStore};
use crate::sidecar::{truncate_tail, EvaluationChannel, EvaluationResult, SidecarClient, SignalDir};
use crate::task::Task;
use crate::tools::ToolSession;
use crate::workspace::WorkingCopy;

/// Evaluator output handed back to the agent is cut to this many characters.
pub const FEEDBACK_LIMIT: usize = 4000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VerifySettings {
    pub budget: u32,
    pub max_actions_per_turn: usize,
    pub fuzzy_threshold: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "message", rename_all = "snake_case")]
pub enum StopReason {
    Resolved,
    Unresolved,
    ApplyFailed,
    Timeout,
    AgentError(String),
    EvaluationError(String),
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Resolved => "resolved",
            StopReason::Unresolved => "unresolved",
            StopReason::ApplyFailed => "apply_failed",
            StopReason::Timeout => "timeout",
            StopReason::AgentError(_) => "agent_error",
            StopReason::EvaluationError(_) => "evaluation_error",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::AgentError(msg) | StopReason::EvaluationError(msg) => {
                write!(f, "{}: {}", self.as_str(), msg)
            }
            _ => f.write_str(self.as_str()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoopOutcome {
    pub patch: CandidatePatch,
    pub resolved: bool,
    /// Evaluation requests issued, including timed-out ones.
    pub attempts: u32,
    pub verdict: Option<Verdict>,
    pub reason: StopReason,
    pub last_output: String,
    #[serde(serialize_with = "as_millis")]
    pub duration: Duration,
}

fn as_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AgentTurn,
    Evaluate,
    Decide,
    Done,
}

struct LoopState {
    phase: Phase,
    remaining: u32,
    attempt: u32,
    feedback: Option<String>,
    last_patch: CandidatePatch,
    last_result: Option<EvaluationResult>,
    verdict: Option<Verdict>,
    reason: StopReason,
}

fn transition(state: &mut LoopState, next: Phase) {
    state.phase = next;
}

/// Drives `agent` against `wc` until the candidate patch resolves the task or
/// the attempt budget runs out. Never fails: every ending is an outcome.
pub fn run_loop<A, C>(
    task: &Task,
    wc: &mut WorkingCopy,
    agent: &mut A,
    channel: &mut C,
    settings: &VerifySettings,
) -> LoopOutcome
where
    A: Agent + ?Sized,
    C: EvaluationChannel + ?Sized,
{
    let started = Instant::now();
    let budget = settings.budget.max(1);

    let mut state = LoopState {
        phase: Phase::AgentTurn,
        remaining: budget,
        attempt: 0,
        feedback: None,
        last_patch: CandidatePatch::empty(),
        last_result: None,
        verdict: None,
        reason: StopReason::Unresolved,
    };

    info!(task_id = %task.instance_id, budget, "verification started");

    while state.phase != Phase::Done {
        match state.phase {
            Phase::AgentTurn => agent_turn(&mut state, task, wc, agent, settings, budget),
            Phase::Evaluate => evaluate(&mut state, task, wc, channel),
            Phase::Decide => decide(&mut state, task),
            Phase::Done => {}
        }
    }

    if let Err(e) = channel.finish() {
        warn!(task_id = %task.instance_id, error = %e, "could not signal agent-done");
    }

    let resolved = state.reason == StopReason::Resolved;
    let last_output = match (&state.reason, &state.last_result) {
        (StopReason::AgentError(msg), None) | (StopReason::EvaluationError(msg), None) => msg.clone(),
        (_, Some(r)) => r.output.clone(),
        _ => String::new(),
    };

    info!(
        task_id = %task.instance_id,
        resolved,
        attempts = state.attempt,
        reason = %state.reason,
        "verification finished"
    );

    LoopOutcome {
        patch: state.last_patch,
        resolved,
        attempts: state.attempt,
        verdict: state.verdict,
        reason: state.reason,
        last_output,
        duration: started.elapsed(),
    }
}

/// Runs one task against an evaluator listening on `sidecar_dir` and
/// records the outcome in `store` when given. Only setup and recording can
/// fail; the loop itself always produces an outcome.
pub fn verify_task<A: Agent + ?Sized>(
    config: &Config,
    settings: &VerifySettings,
    task: &Task,
    repo: &Path,
    sidecar_dir: &Path,
    agent: &mut A,
    store: Option<&ResultStore>,
) -> crate::Result<LoopOutcome> {
    let mut wc = WorkingCopy::open(repo)?;
    let dir = SignalDir::create(sidecar_dir)?;
    let mut channel = SidecarClient::new(dir, config.sidecar.poll_interval(), config.sidecar.deadline());

    let outcome = run_loop(task, &mut wc, agent, &mut channel, settings);

    if let Some(store) = store {
        store.record(&ResultRecord::from_outcome(&task.instance_id, &outcome))?;
    }
    Ok(outcome)
}

fn agent_turn<A: Agent + ?Sized>(
    state: &mut LoopState,
    task: &Task,
    wc: &mut WorkingCopy,
    agent: &mut A,
    settings: &VerifySettings,
    budget: u32,
) {
    let ctx = TurnContext {
        task,
        attempt: state.attempt + 1,
        budget,
        feedback: state.feedback.as_deref(),
    };

    let mut tools = ToolSession::new(wc, settings.max_actions_per_turn, settings.fuzzy_threshold);
    match agent.turn(&ctx, &mut tools) {
        Ok(TurnEnd::Completed) => transition(state, Phase::Evaluate),
        Ok(TurnEnd::ActionBudgetExhausted) => {
            info!(task_id = %task.instance_id, attempt = ctx.attempt, "turn ended on action budget");
            transition(state, Phase::Evaluate);
        }
        Err(e) => {
            error!(task_id = %task.instance_id, attempt = ctx.attempt, error = %e, "agent failed; aborting");
            state.reason = StopReason::AgentError(e.to_string());
            transition(state, Phase::Done);
        }
    }
}

fn evaluate<C: EvaluationChannel + ?Sized>(
    state: &mut LoopState,
    task: &Task,
    wc: &WorkingCopy,
    channel: &mut C,
) {
    let patch = wc.candidate_patch();
    state.attempt += 1;

    info!(
        task_id = %task.instance_id,
        attempt = state.attempt,
        sha256 = %patch.sha256,
        files = wc.touched().len(),
        "evaluating candidate"
    );

    match channel.evaluate(&patch) {
        Ok(result) => {
            state.last_patch = patch;
            state.last_result = Some(result);
            transition(state, Phase::Decide);
        }
        Err(e) => {
            warn!(task_id = %task.instance_id, attempt = state.attempt, error = %e, "evaluation failed");
            state.last_patch = patch;
            state.last_result = None;
            state.verdict = None;
            state.reason = StopReason::EvaluationError(e.to_string());
            spend_attempt(state, Some(format!("Evaluation failed: {e}")));
        }
    }
}

fn decide(state: &mut LoopState, task: &Task) {
    let Some(result) = state.last_result.as_ref() else {
        transition(state, Phase::Done);
        return;
    };

    let verdict = grade(&result.output, task);
    let counts = state.last_patch.is_empty() || result.applied;

    let reason = if verdict.resolved && counts {
        StopReason::Resolved
    } else if result.timed_out {
        StopReason::Timeout
    } else if !counts {
        StopReason::ApplyFailed
    } else {
        StopReason::Unresolved
    };

    info!(
        task_id = %task.instance_id,
        attempt = state.attempt,
        applied = result.applied,
        strategy = result.strategy.map(|s| s.as_str()).unwrap_or("none"),
        reason = %reason,
        "attempt graded"
    );

    let feedback = render_feedback(result, &verdict);
    state.verdict = Some(verdict);
    state.reason = reason;

    if state.reason == StopReason::Resolved {
        transition(state, Phase::Done);
        return;
    }
    spend_attempt(state, Some(feedback));
}

fn spend_attempt(state: &mut LoopState, feedback: Option<String>) {
    state.remaining = state.remaining.saturating_sub(1);
    if state.remaining == 0 {
        transition(state, Phase::Done);
    } else {
        state.feedback = feedback;
        transition(state, Phase::AgentTurn);
    }
}

/// Tail of the evaluator output plus a one-line verdict summary.
pub fn render_feedback(result: &EvaluationResult, verdict: &Verdict) -> String {
    let mut out = String::new();
    if !result.applied && !result.timed_out {
        out.push_str("Note: the candidate patch was not applied by the evaluator.\n");
    }
    out.push_str(&truncate_tail(&result.output, FEEDBACK_LIMIT));
    if !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(&verdict.summary());
    out
}
