//! workspace.rs
//!
//! The agent's mutable checkout. Every path handed in by an agent is
//! confined to the root; the first write to a file snapshots its original
//! content so the candidate patch can always be re-derived from history.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use walkdir::{DirEntry, WalkDir};

use crate::patch::{CandidatePatch, FileChange, PatchSet};
use crate::tools::ToolError;

const SKIP_DIRS: &[&str] = &[
    ".git",
    "__pycache__",
    "node_modules",
    ".tox",
    "build",
    "dist",
    ".venv",
    "venv",
    "target",
];

const SOURCE_SUFFIXES: &[&str] = &[
    "py", "js", "ts", "java", "go", "rs", "c", "h", "yaml", "yml", "json", "toml", "cfg", "ini",
    "txt", "md", "rst",
];

/// Read-only view over a file tree, keyed by root-relative `/`-separated paths.
pub trait SourceTree {
    fn read(&self, path: &str) -> Option<String>;

    fn exists(&self, path: &str) -> bool {
        self.read(path).is_some()
    }

    /// Eligible text files, sorted.
    fn source_files(&self) -> Vec<String>;
}

pub struct WorkingCopy {
    root: PathBuf,
    originals: BTreeMap<String, String>,
    touched: Vec<String>,
}

impl WorkingCopy {
    pub fn open(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = root.as_ref().canonicalize()?;
        if !root.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("not a directory: {}", root.display()),
            ));
        }

        Ok(Self {
            root,
            originals: BTreeMap::new(),
            touched: Vec::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Files written so far, in first-touch order.
    pub fn touched(&self) -> &[String] {
        &self.touched
    }

    /// Resolves an agent-supplied path to an existing file under the root.
    pub fn locate(&self, path: &str) -> Result<(String, PathBuf), ToolError> {
        let rel = normalize_rel(path).ok_or_else(|| ToolError::NotFound(path.to_string()))?;
        let full = self.root.join(&rel);

        if !full.is_file() {
            return Err(ToolError::NotFound(path.to_string()));
        }

        let canon = full
            .canonicalize()
            .map_err(|_| ToolError::NotFound(path.to_string()))?;
        if !canon.starts_with(&self.root) {
            return Err(ToolError::NotFound(path.to_string()));
        }

        Ok((rel, canon))
    }

    pub fn read_text(&self, path: &str) -> Result<String, ToolError> {
        let (_, full) = self.locate(path)?;
        read_lossy(&full).map_err(ToolError::Io)
    }

    pub fn write_text(&mut self, path: &str, content: &str) -> Result<(), ToolError> {
        let (rel, full) = self.locate(path)?;

        if !self.originals.contains_key(&rel) {
            let before = read_lossy(&full).map_err(ToolError::Io)?;
            self.originals.insert(rel.clone(), before);
            self.touched.push(rel);
        }

        fs::write(&full, content).map_err(ToolError::Io)
    }

    /// Writes every modified file of `set` into the checkout.
    pub fn apply(&mut self, set: &PatchSet) -> Result<usize, ToolError> {
        let mut written = 0;
        for change in set.changes() {
            if change.is_noop() {
                continue;
            }
            self.write_text(&change.path, &change.modified)?;
            written += 1;
        }
        Ok(written)
    }

    /// Unified diff of every touched file against its original content.
    pub fn candidate_patch(&self) -> CandidatePatch {
        let changes: Vec<FileChange> = self
            .touched
            .iter()
            .map(|rel| FileChange {
                path: rel.clone(),
                original: self.originals.get(rel).cloned().unwrap_or_default(),
                modified: read_lossy(&self.root.join(rel)).unwrap_or_default(),
            })
            .collect();

        CandidatePatch::from_changes(&changes)
    }
}

impl SourceTree for WorkingCopy {
    fn read(&self, path: &str) -> Option<String> {
        self.read_text(path).ok()
    }

    fn exists(&self, path: &str) -> bool {
        self.locate(path).is_ok()
    }

    fn source_files(&self) -> Vec<String> {
        WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_skipped_dir(e))
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| {
                let rel = e.path().strip_prefix(&self.root).ok()?;
                let rel = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                is_source_file(&rel).then_some(rel)
            })
            .collect()
    }
}

impl SourceTree for BTreeMap<String, String> {
    fn read(&self, path: &str) -> Option<String> {
        self.get(&normalize_rel(path)?).cloned()
    }

    fn exists(&self, path: &str) -> bool {
        normalize_rel(path).is_some_and(|p| self.contains_key(&p))
    }

    fn source_files(&self) -> Vec<String> {
        self.keys()
            .filter(|k| is_source_file(k) && !is_ignored(k))
            .cloned()
            .collect()
    }
}

/// Collapses `./`, leading `/` and `..` segments; `None` if the path escapes
/// the root or is empty.
pub fn normalize_rel(path: &str) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();

    for part in path.trim().split(['/', '\\']) {
        match part {
            "" | "." => continue,
            ".." => {
                parts.pop()?;
            }
            p => parts.push(p),
        }
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

pub fn is_source_file(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|ext| SOURCE_SUFFIXES.contains(&ext))
        .unwrap_or(false)
}

fn is_ignored(path: &str) -> bool {
    path.split('/').any(|seg| SKIP_DIRS.contains(&seg))
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|name| SKIP_DIRS.contains(&name))
            .unwrap_or(false)
}

fn read_lossy(path: &Path) -> io::Result<String> {
    let bytes = fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
