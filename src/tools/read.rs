// src/tools/read.rs

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{Tool, ToolError};
use crate::workspace::WorkingCopy;

pub const MAX_WINDOW: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadArgs {
    pub path: String,
    #[serde(default = "first_line")]
    pub start_line: i64,
    #[serde(default)]
    pub end_line: Option<i64>,
}

fn first_line() -> i64 {
    1
}

pub struct ReadFile;

impl Tool for ReadFile {
    const NAME: &'static str = "read_file";
    type Args = ReadArgs;

    fn schema() -> Value {
        json!({
            "type": "function",
            "name": Self::NAME,
            "description": "Read a 1-indexed inclusive line range of a file, with line numbers (at most 200 lines)",
            "parameters": {
                "type": "object",
                "properties": {
                    "path":       { "type": "string" },
                    "start_line": { "type": "integer" },
                    "end_line":   { "type": "integer" }
                },
                "required": ["path"],
                "additionalProperties": false
            }
        })
    }

    fn call(wc: &mut WorkingCopy, args: ReadArgs) -> Result<String, ToolError> {
        let (rel, _) = wc.locate(&args.path)?;
        let text = wc.read_text(&rel)?;
        let lines: Vec<&str> = text.lines().collect();
        let total = lines.len();

        let start = args.start_line.max(1) as usize;
        let mut end = args.end_line.unwrap_or(i64::MAX).clamp(0, total as i64) as usize;
        if end >= start && end - start + 1 > MAX_WINDOW {
            end = start + MAX_WINDOW - 1;
        }

        let selected: &[&str] = if start <= end { &lines[start - 1..end] } else { &[] };

        let mut out = format!("--- {rel} (lines {start}-{end} of {total}) ---");
        for (i, line) in selected.iter().enumerate() {
            out.push('\n');
            out.push_str(&format!("{}: {}", start + i, line));
        }
        Ok(out)
    }
}
