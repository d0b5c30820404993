//! Patch extraction: turns agent edits into one unified diff against the
//! original file contents.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

mod fuzzy;
mod payload;
mod resolve;
mod unified;

pub use fuzzy::{locate as fuzzy_locate, similarity, FuzzyMatch};
pub use payload::{parse_payload, payload_to_patch, Payload};
pub use resolve::PathResolver;
pub use unified::{file_diff, CONTEXT_RADIUS};

use crate::tools::ToolError;
use crate::workspace::{normalize_rel, SourceTree};

/// Minimum similarity for a fuzzy match to be accepted.
pub const DEFAULT_FUZZY_THRESHOLD: f32 = 0.6;

/// One search/replace change proposed by the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edit {
    pub file: String,
    pub search: String,
    pub replace: String,
}

/// Inclusive 1-based line-range replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineEdit {
    pub file: String,
    pub start_line: i64,
    pub end_line: i64,
    pub replace: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidatePatch {
    pub text: String,
    pub sha256: String,
}

/// Hex SHA-256 of a diff text.
pub fn digest(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

impl CandidatePatch {
    pub fn new(text: String) -> Self {
        let sha256 = digest(&text);
        Self { text, sha256 }
    }

    pub fn empty() -> Self {
        Self::new(String::new())
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }

    pub fn from_changes(changes: &[FileChange]) -> Self {
        let mut text = String::new();
        for change in changes {
            text.push_str(&file_diff(&change.path, &change.original, &change.modified));
        }
        Self::new(text)
    }
}

impl Default for CandidatePatch {
    fn default() -> Self {
        Self::empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub path: String,
    pub original: String,
    pub modified: String,
}

impl FileChange {
    pub fn is_noop(&self) -> bool {
        self.original == self.modified
    }
}

/// Per-file original/modified pairs in first-touch order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchSet {
    changes: Vec<FileChange>,
}

impl PatchSet {
    pub fn changes(&self) -> &[FileChange] {
        &self.changes
    }

    pub fn is_empty(&self) -> bool {
        self.changes.iter().all(FileChange::is_noop)
    }

    pub fn to_patch(&self) -> CandidatePatch {
        CandidatePatch::from_changes(&self.changes)
    }

    fn current(&self, path: &str) -> Option<&str> {
        self.changes
            .iter()
            .find(|c| c.path == path)
            .map(|c| c.modified.as_str())
    }

    fn track(&mut self, path: &str, original: String) {
        self.changes.push(FileChange {
            path: path.to_string(),
            modified: original.clone(),
            original,
        });
    }

    fn update(&mut self, path: &str, modified: String) {
        if let Some(change) = self.changes.iter_mut().find(|c| c.path == path) {
            change.modified = modified;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatchKind {
    Exact,
    Fuzzy { ratio: f32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Replacement {
    pub content: String,
    pub kind: MatchKind,
}

/// Replaces the first verbatim occurrence of `search`, falling back to the
/// most similar line window. `None` means the edit is dropped.
pub fn replace_once(content: &str, search: &str, replace: &str, threshold: f32) -> Option<Replacement> {
    if search.is_empty() {
        return None;
    }

    if let Some(pos) = content.find(search) {
        let mut out = String::with_capacity(content.len() + replace.len());
        out.push_str(&content[..pos]);
        out.push_str(replace);
        out.push_str(&content[pos + search.len()..]);
        return Some(Replacement {
            content: out,
            kind: MatchKind::Exact,
        });
    }

    let m = fuzzy_locate(content, search, threshold)?;
    let window = &content[m.start..m.end];

    let mut replacement = replace.to_string();
    if window.ends_with('\n') && !replacement.is_empty() && !replacement.ends_with('\n') {
        replacement.push('\n');
    }

    let mut out = String::with_capacity(content.len() + replacement.len());
    out.push_str(&content[..m.start]);
    out.push_str(&replacement);
    out.push_str(&content[m.end..]);

    Some(Replacement {
        content: out,
        kind: MatchKind::Fuzzy { ratio: m.ratio },
    })
}

/// Applies `edits` in order against `tree` and collects the resulting files.
/// Reads `tree` but never writes it.
pub fn extract<T: SourceTree + ?Sized>(tree: &T, edits: &[Edit], threshold: f32) -> PatchSet {
    let resolver = PathResolver::new(tree);
    let mut set = PatchSet::default();

    for edit in edits {
        let Some(path) = resolver.resolve(&edit.file) else {
            debug!(file = %edit.file, "edit skipped: unresolvable path");
            continue;
        };

        let current = match set.current(&path) {
            Some(c) => c.to_string(),
            None => match tree.read(&path) {
                Some(original) => {
                    set.track(&path, original.clone());
                    original
                }
                None => continue,
            },
        };

        match replace_once(&current, &edit.search, &edit.replace, threshold) {
            Some(r) => {
                if let MatchKind::Fuzzy { ratio } = r.kind {
                    debug!(path = %path, ratio, "fuzzy match accepted");
                }
                set.update(&path, r.content);
            }
            None => debug!(path = %path, "edit dropped: no match above threshold"),
        }
    }

    set
}

pub fn edits_to_patch<T: SourceTree + ?Sized>(tree: &T, edits: &[Edit]) -> CandidatePatch {
    extract(tree, edits, DEFAULT_FUZZY_THRESHOLD).to_patch()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineSplice {
    pub content: String,
    pub start: usize,
    pub end: usize,
    pub inserted: usize,
}

/// Replaces lines `start..=end` (1-based). `end` past EOF is clamped; a
/// replacement without a trailing newline gets one.
pub fn replace_line_range(
    content: &str,
    start: i64,
    end: i64,
    replacement: &str,
) -> Result<LineSplice, ToolError> {
    let lines: Vec<&str> = content.split_inclusive('\n').collect();
    let len = lines.len();

    if start < 1 || end < start || start as usize > len {
        return Err(ToolError::InvalidRange { start, end, len });
    }

    let start = start as usize;
    let end = (end as usize).min(len);

    let mut inserted: Vec<String> = replacement
        .split_inclusive('\n')
        .map(str::to_string)
        .collect();
    if let Some(last) = inserted.last_mut() {
        if !last.ends_with('\n') {
            last.push('\n');
        }
    }

    let mut out = String::with_capacity(content.len() + replacement.len() + 1);
    for line in &lines[..start - 1] {
        out.push_str(line);
    }
    for line in &inserted {
        out.push_str(line);
    }
    for line in &lines[end..] {
        out.push_str(line);
    }

    Ok(LineSplice {
        content: out,
        start,
        end,
        inserted: inserted.len(),
    })
}

/// Line-range variant: applies edits to in-memory copies and reports the
/// ones that were rejected.
pub fn line_edits_to_patch<T: SourceTree + ?Sized>(
    tree: &T,
    edits: &[LineEdit],
) -> (CandidatePatch, Vec<String>) {
    let mut set = PatchSet::default();
    let mut errors = Vec::new();

    for edit in edits {
        let Some(path) = normalize_rel(&edit.file).filter(|p| tree.exists(p)) else {
            errors.push(format!("File not found: {}", edit.file));
            continue;
        };

        let current = match set.current(&path) {
            Some(c) => c.to_string(),
            None => {
                let Some(original) = tree.read(&path) else {
                    errors.push(format!("File not found: {}", edit.file));
                    continue;
                };
                set.track(&path, original.clone());
                original
            }
        };

        match replace_line_range(&current, edit.start_line, edit.end_line, &edit.replace) {
            Ok(splice) => set.update(&path, splice.content),
            Err(ToolError::InvalidRange { start, end, len }) => errors.push(format!(
                "Invalid line range {start}-{end} in {} (file has {len} lines)",
                edit.file
            )),
            Err(e) => errors.push(e.to_string()),
        }
    }

    (set.to_patch(), errors)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn tree(files: &[(&str, &str)]) -> BTreeMap<String, String> {
        files
            .iter()
            .map(|(p, c)| (p.to_string(), c.to_string()))
            .collect()
    }

    fn edit(file: &str, search: &str, replace: &str) -> Edit {
        Edit {
            file: file.into(),
            search: search.into(),
            replace: replace.into(),
        }
    }

    /// Applies a unified diff to in-memory originals, checking every context
    /// and removed line against the source.
    fn apply_unified(originals: &BTreeMap<String, String>, diff: &str) -> BTreeMap<String, String> {
        struct Target {
            path: String,
            src: Vec<String>,
            cursor: usize,
            out: Vec<String>,
            last_kind: char,
        }

        fn finish(result: &mut BTreeMap<String, String>, target: Option<Target>) {
            if let Some(mut t) = target {
                t.out.extend(t.src[t.cursor..].iter().cloned());
                result.insert(t.path, t.out.concat());
            }
        }

        let mut result = originals.clone();
        let mut current: Option<Target> = None;

        for line in diff.split_inclusive('\n') {
            if let Some(rest) = line.strip_prefix("--- a/") {
                finish(&mut result, current.take());
                let path = rest.trim_end_matches('\n').to_string();
                let src = originals[&path].split_inclusive('\n').map(String::from).collect();
                current = Some(Target {
                    path,
                    src,
                    cursor: 0,
                    out: Vec::new(),
                    last_kind: ' ',
                });
                continue;
            }
            if line.starts_with("+++ b/") {
                continue;
            }

            let t = current.as_mut().expect("hunk outside a file section");
            if let Some(header) = line.strip_prefix("@@ -") {
                let old_start: usize = header
                    .split(|c: char| c == ',' || c == ' ')
                    .next()
                    .unwrap()
                    .parse()
                    .unwrap();
                while t.cursor + 1 < old_start {
                    t.out.push(t.src[t.cursor].clone());
                    t.cursor += 1;
                }
                continue;
            }
            if line.starts_with('\\') {
                if t.last_kind != '-' {
                    let last = t.out.last_mut().unwrap();
                    *last = last.trim_end_matches('\n').to_string();
                }
                continue;
            }

            let (kind, text) = line.split_at(1);
            let kind = kind.chars().next().unwrap();
            match kind {
                ' ' | '-' => {
                    assert_eq!(
                        t.src[t.cursor].trim_end_matches('\n'),
                        text.trim_end_matches('\n'),
                        "context mismatch in {}",
                        t.path
                    );
                    if kind == ' ' {
                        t.out.push(t.src[t.cursor].clone());
                    }
                    t.cursor += 1;
                }
                '+' => t.out.push(text.to_string()),
                other => panic!("unexpected diff line kind {other:?}"),
            }
            t.last_kind = kind;
        }

        finish(&mut result, current.take());
        result
    }

    /// Extracts `edits`, applies the diff to fresh originals and checks the
    /// result matches the extracted contents byte for byte.
    fn round_trip(files: &[(&str, &str)], edits: &[Edit]) -> BTreeMap<String, String> {
        let originals = tree(files);
        let set = extract(&originals, edits, DEFAULT_FUZZY_THRESHOLD);
        let patch = set.to_patch();

        let mut expected = originals.clone();
        for change in set.changes() {
            expected.insert(change.path.clone(), change.modified.clone());
        }

        let applied = apply_unified(&originals, &patch.text);
        assert_eq!(applied, expected);
        applied
    }

    #[test]
    fn diff_reproduces_exact_edit() {
        let body: String = (1..=20).map(|i| format!("v{i} = {i}\n")).collect();
        let out = round_trip(
            &[("m.py", &body)],
            &[edit("m.py", "v3 = 3", "v3 = 33"), edit("m.py", "v17 = 17\n", "v17 = 17\nv17b = 0\n")],
        );
        assert!(out["m.py"].contains("v3 = 33\n"));
        assert!(out["m.py"].contains("v17b = 0\nv18 = 18\n"));
    }

    #[test]
    fn diff_reproduces_fuzzy_edit() {
        let out = round_trip(
            &[("foo.py", "def hello():\n    x = 1\n    y = 2\n    return x + y\n")],
            &[edit(
                "foo.py",
                "def hello():\n    x = 1\n    y = 3\n    return x + y\n",
                "def hello():\n    x = 10\n    y = 20\n    return x + y\n",
            )],
        );
        assert_eq!(out["foo.py"], "def hello():\n    x = 10\n    y = 20\n    return x + y\n");
    }

    #[test]
    fn diff_reproduces_missing_trailing_newline() {
        let out = round_trip(&[("m.py", "a = 1\nb = 2\nc = 3")], &[edit("m.py", "c = 3", "c = 4")]);
        assert_eq!(out["m.py"], "a = 1\nb = 2\nc = 4");

        let out = round_trip(&[("n.py", "a = 1\nb = 2")], &[edit("n.py", "a = 1", "a = 0")]);
        assert_eq!(out["n.py"], "a = 0\nb = 2");
    }

    #[test]
    fn diff_reproduces_multi_file_edits() {
        let out = round_trip(
            &[("pkg/a.py", "x = 1\n"), ("pkg/b.py", "y = 2\nz = 3\n"), ("pkg/c.py", "w = 0\n")],
            &[
                edit("pkg/b.py", "z = 3", "z = 30"),
                edit("pkg/a.py", "x = 1", "x = 10"),
                edit("pkg/b.py", "y = 2", "y = 20"),
            ],
        );
        assert_eq!(out["pkg/a.py"], "x = 10\n");
        assert_eq!(out["pkg/b.py"], "y = 20\nz = 30\n");
        assert_eq!(out["pkg/c.py"], "w = 0\n");
    }

    #[test]
    fn exact_single_line_fix() {
        let t = tree(&[("m.py", "a = 1\nb = 2\nc = 3\n")]);
        let patch = edits_to_patch(&t, &[edit("m.py", "b = 2", "b = 42")]);

        assert!(patch.text.contains("--- a/m.py"));
        assert!(patch.text.contains("+++ b/m.py"));
        assert!(patch.text.contains("-b = 2\n"));
        assert!(patch.text.contains("+b = 42\n"));
        assert_eq!(patch.text.matches("@@ ").count(), 1);
        assert_eq!(patch.text.lines().filter(|l| l.starts_with('-')).count(), 2);
        assert_eq!(patch.text.lines().filter(|l| l.starts_with('+')).count(), 2);
    }

    #[test]
    fn empty_edit_list_is_empty_patch() {
        let t = tree(&[("m.py", "a = 1\n")]);
        let patch = edits_to_patch(&t, &[]);
        assert!(patch.is_empty());
        assert_eq!(patch, CandidatePatch::empty());
    }

    #[test]
    fn replaces_first_occurrence_only() {
        let t = tree(&[("m.py", "x = 1\nx = 1\n")]);
        let patch = edits_to_patch(&t, &[edit("m.py", "x = 1", "x = 2")]);
        assert_eq!(patch.text.matches("+x = 2").count(), 1);
        assert_eq!(patch.text.matches("-x = 1").count(), 1);
    }

    #[test]
    fn exact_match_takes_precedence_over_near_match() {
        let content = "def area(w, h):\n    return w * h\n\ndef volume(w, h, d):\n    return w * h * d\n";
        let t = tree(&[("geo.py", content)]);

        let set = extract(
            &t,
            &[edit("geo.py", "    return w * h * d\n", "    return w * h * d * 1\n")],
            DEFAULT_FUZZY_THRESHOLD,
        );
        let modified = &set.changes()[0].modified;
        assert!(modified.contains("    return w * h\n\ndef volume"));
        assert!(modified.contains("return w * h * d * 1\n"));

        let r = replace_once(content, "return w * h * d", "return 0", 0.6).unwrap();
        assert_eq!(r.kind, MatchKind::Exact);
    }

    #[test]
    fn fuzzy_recovers_misremembered_search_text() {
        let t = tree(&[("foo.py", "def hello():\n    x = 1\n    y = 2\n    return x + y\n")]);
        let patch = edits_to_patch(
            &t,
            &[edit(
                "foo.py",
                "def hello():\n    x = 1\n    y = 3\n    return x + y\n",
                "def hello():\n    x = 10\n    y = 20\n    return x + y\n",
            )],
        );
        assert!(patch.text.contains("--- a/foo.py"));
        assert!(patch.text.contains("+    x = 10"));
        assert!(patch.text.contains("-    y = 2"));
    }

    #[test]
    fn fuzzy_threshold_boundary() {
        let line = |keep: usize, tail: char| {
            let mut s = "a".repeat(keep);
            s.push_str(&tail.to_string().repeat(100 - keep));
            s
        };

        // 59 of 100 characters shared on each side: ratio 0.59
        let below = tree(&[("f.txt", &format!("{}\n", line(59, 'b')))]);
        let patch = edits_to_patch(&below, &[edit("f.txt", &line(59, 'c'), "REPLACED")]);
        assert!(patch.is_empty());

        // 61 shared: ratio 0.61
        let above = tree(&[("f.txt", &format!("{}\n", line(61, 'b')))]);
        let patch = edits_to_patch(&above, &[edit("f.txt", &line(61, 'c'), "REPLACED")]);
        assert!(patch.text.contains("+REPLACED\n"));
        assert!(patch.text.contains(&format!("-{}", line(61, 'b'))));
    }

    #[test]
    fn unrelated_search_text_is_dropped() {
        let t = tree(&[("foo.py", "def hello():\n    pass\n")]);
        let patch = edits_to_patch(
            &t,
            &[edit("foo.py", "completely unrelated gibberish text that matches nothing", "x = 1")],
        );
        assert!(patch.is_empty());
    }

    #[test]
    fn missing_file_is_skipped() {
        let t = tree(&[("a.py", "x = 1\n")]);
        let patch = edits_to_patch(&t, &[edit("missing.py", "x", "y"), edit("a.py", "x = 1", "x = 10")]);
        assert!(!patch.text.contains("missing.py"));
        assert!(patch.text.contains("+x = 10"));
    }

    #[test]
    fn multiple_files_keep_touch_order() {
        let t = tree(&[("a.py", "x = 1\n"), ("b.py", "y = 2\n")]);
        let patch = edits_to_patch(&t, &[edit("b.py", "y = 2", "y = 20"), edit("a.py", "x = 1", "x = 10")]);
        let b = patch.text.find("--- a/b.py").unwrap();
        let a = patch.text.find("--- a/a.py").unwrap();
        assert!(b < a);
    }

    #[test]
    fn extraction_is_deterministic() {
        let t = tree(&[("m.py", "a = 1\nb = 2\n")]);
        let edits = vec![edit("m.py", "a = 1", "a = 5"), edit("m.py", "b = 3", "b = 6")];
        assert_eq!(edits_to_patch(&t, &edits), edits_to_patch(&t, &edits));
    }

    #[test]
    fn line_range_replacement() {
        let splice = replace_line_range("a\nb\nc\nd\n", 2, 3, "x\ny\nz").unwrap();
        assert_eq!(splice.content, "a\nx\ny\nz\nd\n");
        assert_eq!(splice.inserted, 3);

        let clamped = replace_line_range("a\nb\n", 2, 99, "B\n").unwrap();
        assert_eq!(clamped.content, "a\nB\n");
        assert_eq!(clamped.end, 2);

        assert!(matches!(
            replace_line_range("a\nb\n", 0, 1, "x"),
            Err(ToolError::InvalidRange { .. })
        ));
        assert!(matches!(
            replace_line_range("a\nb\n", 2, 1, "x"),
            Err(ToolError::InvalidRange { .. })
        ));
        assert!(matches!(
            replace_line_range("a\nb\n", 3, 3, "x"),
            Err(ToolError::InvalidRange { .. })
        ));
    }

    #[test]
    fn line_edits_report_errors() {
        let t = tree(&[("foo.py", "a\nb\n")]);
        let edits = vec![
            LineEdit {
                file: "./foo.py".into(),
                start_line: 2,
                end_line: 2,
                replace: "B\n".into(),
            },
            LineEdit {
                file: "nope.py".into(),
                start_line: 1,
                end_line: 1,
                replace: "x\n".into(),
            },
            LineEdit {
                file: "foo.py".into(),
                start_line: 5,
                end_line: 6,
                replace: "x\n".into(),
            },
        ];

        let (patch, errors) = line_edits_to_patch(&t, &edits);
        assert!(patch.text.contains("+B"));
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("File not found"));
        assert!(errors[1].contains("Invalid line range"));
    }
}
