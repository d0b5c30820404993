//! The agent seam. Model backends live outside this crate; anything that can
//! drive a `ToolSession` for one turn is an agent.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::patch::Edit;
use crate::task::Task;
use crate::tools::{ToolError, ToolSession};

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("agent backend failed: {0}")]
    Backend(String),

    #[error("cannot load agent script {path}: {reason}")]
    Script { path: PathBuf, reason: String },
}

pub struct TurnContext<'t> {
    pub task: &'t Task,
    /// 1-based.
    pub attempt: u32,
    pub budget: u32,
    /// Evaluator feedback from the previous attempt.
    pub feedback: Option<&'t str>,
}

impl TurnContext<'_> {
    /// What a backend sends at the start of this turn: the task goal on the
    /// first attempt, evaluator feedback afterwards.
    pub fn prompt(&self) -> String {
        match self.feedback {
            None => render_goal(self.task),
            Some(feedback) => format!(
                "Attempt {} of {} did not resolve the issue. Evaluator output:\n{}\n\nKeep editing until the failing tests pass.\n",
                self.attempt.saturating_sub(1),
                self.budget,
                feedback.trim_end()
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnEnd {
    Completed,
    ActionBudgetExhausted,
}

pub trait Agent {
    /// Any error is unrecoverable for the current task.
    fn turn(&mut self, ctx: &TurnContext<'_>, tools: &mut ToolSession<'_>) -> Result<TurnEnd, AgentError>;
}

/// Opening instructions for a model-backed agent.
pub fn render_goal(task: &Task) -> String {
    let mut out = String::new();
    out.push_str(&format!("Repository: {}\n\n", task.repo));
    out.push_str("Issue:\n");
    out.push_str(task.problem_statement.trim());
    out.push('\n');

    if !task.hints_text.trim().is_empty() {
        out.push_str("\nHints:\n");
        out.push_str(task.hints_text.trim());
        out.push('\n');
    }

    out.push_str(
        "\nUse search_code to find relevant code, read_file to inspect it, and apply_edit \
         to change it. Edits that break syntax are rejected. End your turn when the fix \
         is in place; the hidden tests will be run against your changes.\n",
    );
    out
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptCall {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptTurn {
    #[serde(default)]
    pub calls: Vec<ScriptCall>,
    #[serde(default)]
    pub edits: Vec<Edit>,
    /// Ends the script after this turn.
    #[serde(default)]
    pub done: bool,
    /// Simulates a backend failure at the start of the turn.
    #[serde(default)]
    pub error: Option<String>,
}

/// Replays a fixed list of turns. Turns past the end do nothing.
#[derive(Debug, Default)]
pub struct ScriptedAgent {
    turns: VecDeque<ScriptTurn>,
    transcript: Vec<String>,
    feedback_seen: Vec<Option<String>>,
    prompts: Vec<String>,
}

impl ScriptedAgent {
    pub fn new(turns: Vec<ScriptTurn>) -> Self {
        Self {
            turns: turns.into(),
            ..Default::default()
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, AgentError> {
        let script_err = |reason: String| AgentError::Script {
            path: path.to_path_buf(),
            reason,
        };

        let raw = fs::read_to_string(path).map_err(|e| script_err(e.to_string()))?;
        let turns: Vec<ScriptTurn> = serde_json::from_str(&raw).map_err(|e| script_err(e.to_string()))?;
        Ok(Self::new(turns))
    }

    /// `tool -> feedback` lines, in call order.
    pub fn transcript(&self) -> &[String] {
        &self.transcript
    }

    /// Feedback handed to each turn so far.
    pub fn feedback_seen(&self) -> &[Option<String>] {
        &self.feedback_seen
    }

    /// The prompt each turn would have sent to a model.
    pub fn prompts(&self) -> &[String] {
        &self.prompts
    }
}

impl Agent for ScriptedAgent {
    fn turn(&mut self, ctx: &TurnContext<'_>, tools: &mut ToolSession<'_>) -> Result<TurnEnd, AgentError> {
        self.feedback_seen.push(ctx.feedback.map(str::to_string));
        self.prompts.push(ctx.prompt());

        let Some(turn) = self.turns.pop_front() else {
            return Ok(TurnEnd::Completed);
        };

        if let Some(msg) = turn.error {
            return Err(AgentError::Backend(msg));
        }

        for call in turn.calls {
            if tools.is_exhausted() {
                return Ok(TurnEnd::ActionBudgetExhausted);
            }
            let feedback = tools.call_raw(&call.name, call.args);
            debug!(tool = %call.name, attempt = ctx.attempt, "scripted call");
            self.transcript.push(format!("{} -> {}", call.name, feedback));
        }

        if !turn.edits.is_empty() {
            match tools.submit_edits(&turn.edits) {
                Ok(files) => self.transcript.push(format!("edits -> {files} file(s) written")),
                Err(ToolError::ActionBudgetExhausted) => return Ok(TurnEnd::ActionBudgetExhausted),
                Err(e) => self.transcript.push(format!("edits -> Error: {e}")),
            }
        }

        if turn.done {
            self.turns.clear();
        }
        Ok(TurnEnd::Completed)
    }
}
