// src/tools/search.rs

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{Tool, ToolError};
use crate::workspace::{SourceTree, WorkingCopy};

pub const MAX_MATCHES: usize = 20;
pub const NO_MATCHES: &str = "No matches found.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchArgs {
    pub query: String,
}

pub struct SearchCode;

impl Tool for SearchCode {
    const NAME: &'static str = "search_code";
    type Args = SearchArgs;

    fn schema() -> Value {
        json!({
            "type": "function",
            "name": Self::NAME,
            "description": "Case-insensitive search over the repository's source files. Returns up to 20 `path:line: text` matches",
            "parameters": {
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Regex or literal text" }
                },
                "required": ["query"],
                "additionalProperties": false
            }
        })
    }

    fn call(wc: &mut WorkingCopy, args: SearchArgs) -> Result<String, ToolError> {
        let re = compile(&args.query)?;
        let mut hits = Vec::new();

        'files: for rel in wc.source_files() {
            let Some(text) = wc.read(&rel) else {
                continue;
            };

            for (idx, line) in text.lines().enumerate() {
                if re.is_match(line) {
                    hits.push(format!("{}:{}: {}", rel, idx + 1, line.trim()));
                    if hits.len() >= MAX_MATCHES {
                        break 'files;
                    }
                }
            }
        }

        if hits.is_empty() {
            return Ok(NO_MATCHES.to_string());
        }
        Ok(hits.join("\n"))
    }
}

/// Invalid regexes are retried as literal text.
fn compile(query: &str) -> Result<Regex, ToolError> {
    let build = |pat: &str| {
        RegexBuilder::new(pat)
            .case_insensitive(true)
            .size_limit(1 << 20)
            .build()
    };

    build(query)
        .or_else(|_| build(&regex::escape(query)))
        .map_err(|e| ToolError::InvalidPattern(e.to_string()))
}
