use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

mod edit;
mod read;
mod search;
pub mod syntax;

pub use edit::{ApplyEdit, EditArgs};
pub use read::{ReadArgs, ReadFile, MAX_WINDOW};
pub use search::{SearchArgs, SearchCode, MAX_MATCHES, NO_MATCHES};

use crate::patch::{self, Edit};
use crate::workspace::WorkingCopy;

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("file not found: {0}")]
    NotFound(String),

    #[error("invalid line range {start}-{end} (file has {len} lines)")]
    InvalidRange { start: i64, end: i64, len: usize },

    #[error("SyntaxError in {path} line {line}: {message}. Edit rejected, file unchanged.")]
    Syntax {
        path: String,
        line: usize,
        column: usize,
        message: String,
    },

    #[error("invalid search pattern: {0}")]
    InvalidPattern(String),

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("action budget exhausted for this turn")]
    ActionBudgetExhausted,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A repository tool with a typed payload.
pub trait Tool {
    const NAME: &'static str;
    type Args: DeserializeOwned;

    fn schema() -> Value;
    fn call(wc: &mut WorkingCopy, args: Self::Args) -> Result<String, ToolError>;
}

/// Tool invocation as agents send it: `{"name": ..., "args": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", content = "args")]
pub enum ToolCall {
    #[serde(rename = "search_code")]
    Search(SearchArgs),
    #[serde(rename = "read_file")]
    Read(ReadArgs),
    #[serde(rename = "apply_edit")]
    Edit(EditArgs),
}

impl ToolCall {
    /// Validates a loosely-typed call before anything touches the working copy.
    pub fn parse(name: &str, args: Value) -> Result<Self, ToolError> {
        if !TOOL_NAMES.contains(&name) {
            return Err(ToolError::UnknownTool(name.to_string()));
        }

        serde_json::from_value(json!({ "name": name, "args": args })).map_err(|e| {
            ToolError::InvalidArguments {
                tool: name.to_string(),
                reason: e.to_string(),
            }
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            ToolCall::Search(_) => SearchCode::NAME,
            ToolCall::Read(_) => ReadFile::NAME,
            ToolCall::Edit(_) => ApplyEdit::NAME,
        }
    }

    fn run(self, wc: &mut WorkingCopy) -> Result<String, ToolError> {
        match self {
            ToolCall::Search(args) => SearchCode::call(wc, args),
            ToolCall::Read(args) => ReadFile::call(wc, args),
            ToolCall::Edit(args) => ApplyEdit::call(wc, args),
        }
    }
}

pub const TOOL_NAMES: &[&str] = &[SearchCode::NAME, ReadFile::NAME, ApplyEdit::NAME];

/// Function schemas for every tool, in the shape model backends expect.
pub fn schemas() -> Vec<Value> {
    vec![SearchCode::schema(), ReadFile::schema(), ApplyEdit::schema()]
}

/// Borrowed access to the working copy for one agent turn, with a cap on
/// the number of actions.
pub struct ToolSession<'a> {
    wc: &'a mut WorkingCopy,
    actions_left: usize,
    fuzzy_threshold: f32,
}

impl<'a> ToolSession<'a> {
    pub fn new(wc: &'a mut WorkingCopy, max_actions: usize, fuzzy_threshold: f32) -> Self {
        Self {
            wc,
            actions_left: max_actions,
            fuzzy_threshold,
        }
    }

    pub fn actions_left(&self) -> usize {
        self.actions_left
    }

    pub fn is_exhausted(&self) -> bool {
        self.actions_left == 0
    }

    pub fn working_copy(&self) -> &WorkingCopy {
        &*self.wc
    }

    fn spend(&mut self) -> Result<(), ToolError> {
        if self.actions_left == 0 {
            return Err(ToolError::ActionBudgetExhausted);
        }
        self.actions_left -= 1;
        Ok(())
    }

    pub fn dispatch(&mut self, call: ToolCall) -> Result<String, ToolError> {
        self.spend()?;
        debug!(tool = call.name(), left = self.actions_left, "tool call");
        call.run(self.wc)
    }

    /// Runs a call and renders any failure as feedback text for the agent.
    pub fn call(&mut self, call: ToolCall) -> String {
        self.dispatch(call).unwrap_or_else(|e| format!("Error: {e}"))
    }

    pub fn call_raw(&mut self, name: &str, args: Value) -> String {
        match ToolCall::parse(name, args) {
            Ok(call) => self.call(call),
            Err(e) => match self.spend() {
                Ok(()) => format!("Error: {e}"),
                Err(exhausted) => format!("Error: {exhausted}"),
            },
        }
    }

    /// Applies search/replace edits through the patch engine and writes the
    /// result into the working copy. Counts as one action.
    pub fn submit_edits(&mut self, edits: &[Edit]) -> Result<usize, ToolError> {
        self.spend()?;
        let set = patch::extract(&*self.wc, edits, self.fuzzy_threshold);
        let written = self.wc.apply(&set)?;
        debug!(edits = edits.len(), files = written, "edits applied");
        Ok(written)
    }
}
