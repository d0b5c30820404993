// src/tools/edit.rs

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use super::{syntax, Tool, ToolError};
use crate::patch::replace_line_range;
use crate::workspace::WorkingCopy;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditArgs {
    pub path: String,
    pub start_line: i64,
    pub end_line: i64,
    pub replacement: String,
}

pub struct ApplyEdit;

impl Tool for ApplyEdit {
    const NAME: &'static str = "apply_edit";
    type Args = EditArgs;

    fn schema() -> Value {
        json!({
            "type": "function",
            "name": Self::NAME,
            "description": "Replace an inclusive 1-indexed line range with new text. Edits that break the file's syntax are rejected",
            "parameters": {
                "type": "object",
                "properties": {
                    "path":        { "type": "string" },
                    "start_line":  { "type": "integer" },
                    "end_line":    { "type": "integer" },
                    "replacement": { "type": "string" }
                },
                "required": ["path", "start_line", "end_line", "replacement"],
                "additionalProperties": false
            }
        })
    }

    fn call(wc: &mut WorkingCopy, args: EditArgs) -> Result<String, ToolError> {
        let (rel, _) = wc.locate(&args.path)?;
        let original = wc.read_text(&rel)?;

        let splice = replace_line_range(&original, args.start_line, args.end_line, &args.replacement)?;

        if let Err(issue) = syntax::check(&rel, &splice.content) {
            debug!(path = %rel, line = issue.line, "edit rejected by syntax gate");
            return Err(ToolError::Syntax {
                path: rel,
                line: issue.line,
                column: issue.column,
                message: issue.message,
            });
        }

        wc.write_text(&rel, &splice.content)?;

        Ok(format!(
            "OK: replaced lines {}-{} in {} ({} new lines)",
            splice.start, splice.end, rel, splice.inserted
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn edit(path: &str, start: i64, end: i64, replacement: &str) -> EditArgs {
        EditArgs {
            path: path.into(),
            start_line: start,
            end_line: end,
            replacement: replacement.into(),
        }
    }

    fn repo(content: &str) -> (tempfile::TempDir, WorkingCopy) {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("m.py"), content).unwrap();
        let wc = WorkingCopy::open(dir.path()).unwrap();
        (dir, wc)
    }

    #[test]
    fn replaces_range() {
        let (dir, mut wc) = repo("a = 1\nb = 2\nc = 3\n");
        let out = ApplyEdit::call(&mut wc, edit("m.py", 2, 2, "b = 42")).unwrap();
        assert_eq!(out, "OK: replaced lines 2-2 in m.py (1 new lines)");
        assert_eq!(
            fs::read_to_string(dir.path().join("m.py")).unwrap(),
            "a = 1\nb = 42\nc = 3\n"
        );
    }

    #[test]
    fn syntax_error_leaves_file_unchanged() {
        let (dir, mut wc) = repo("def f():\n    return 1\n");
        let err = ApplyEdit::call(&mut wc, edit("m.py", 1, 1, "def f(:")).unwrap_err();

        match &err {
            ToolError::Syntax { path, line, .. } => {
                assert_eq!(path, "m.py");
                assert!(*line <= 2);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(err.to_string().contains("Edit rejected, file unchanged"));
        assert_eq!(
            fs::read_to_string(dir.path().join("m.py")).unwrap(),
            "def f():\n    return 1\n"
        );
        assert!(wc.candidate_patch().is_empty());
    }

    #[test]
    fn already_broken_file_is_still_gated() {
        let broken = "def f():\n    return 1\nx = (\n";
        let (dir, mut wc) = repo(broken);

        let err = ApplyEdit::call(&mut wc, edit("m.py", 1, 1, "def f(:")).unwrap_err();
        assert!(matches!(err, ToolError::Syntax { .. }));
        assert_eq!(fs::read_to_string(dir.path().join("m.py")).unwrap(), broken);

        let out = ApplyEdit::call(&mut wc, edit("m.py", 3, 3, "x = (1)")).unwrap();
        assert!(out.starts_with("OK: replaced lines 3-3"));
        assert_eq!(
            fs::read_to_string(dir.path().join("m.py")).unwrap(),
            "def f():\n    return 1\nx = (1)\n"
        );
    }

    #[test]
    fn invalid_ranges_do_not_mutate() {
        let (dir, mut wc) = repo("a = 1\n");
        for (s, e) in [(0, 1), (2, 1), (5, 6)] {
            assert!(matches!(
                ApplyEdit::call(&mut wc, edit("m.py", s, e, "x = 2")),
                Err(ToolError::InvalidRange { .. })
            ));
        }
        assert_eq!(fs::read_to_string(dir.path().join("m.py")).unwrap(), "a = 1\n");
    }

    #[test]
    fn non_source_files_skip_the_gate() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("notes.md"), "# title\n").unwrap();
        let mut wc = WorkingCopy::open(dir.path()).unwrap();
        assert!(ApplyEdit::call(&mut wc, edit("notes.md", 1, 1, "def f(:")).is_ok());
    }
}
