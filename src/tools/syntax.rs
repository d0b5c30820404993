//! Parse gate for edits to source files with a known grammar.

use std::path::Path;

use tree_sitter::{Node, Parser};
use tree_sitter_python as python;
use tree_sitter_rust as rust;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grammar {
    Python,
    Rust,
}

impl Grammar {
    pub fn for_path(path: &str) -> Option<Self> {
        match Path::new(path).extension().and_then(|s| s.to_str()) {
            Some("py") => Some(Grammar::Python),
            Some("rs") => Some(Grammar::Rust),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxIssue {
    /// 1-based.
    pub line: usize,
    /// 1-based.
    pub column: usize,
    pub message: String,
}

/// Files without a grammar always pass.
pub fn check(path: &str, source: &str) -> Result<(), SyntaxIssue> {
    let Some(grammar) = Grammar::for_path(path) else {
        return Ok(());
    };

    let mut parser = Parser::new();
    let language = match grammar {
        Grammar::Python => python::language(),
        Grammar::Rust => rust::language(),
    };
    if parser.set_language(&language).is_err() {
        return Ok(());
    }

    let Some(tree) = parser.parse(source, None) else {
        return Ok(());
    };

    let root = tree.root_node();
    if !root.has_error() {
        return Ok(());
    }

    let node = first_error(root).unwrap_or(root);
    let pos = node.start_position();

    Err(SyntaxIssue {
        line: pos.row + 1,
        column: pos.column + 1,
        message: describe(node, source),
    })
}

fn first_error(node: Node) -> Option<Node> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    if !node.has_error() {
        return None;
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if let Some(found) = first_error(child) {
            return Some(found);
        }
    }
    None
}

fn describe(node: Node, source: &str) -> String {
    if node.is_missing() {
        return format!("missing `{}`", node.kind());
    }

    let snippet = node
        .utf8_text(source.as_bytes())
        .unwrap_or("")
        .lines()
        .next()
        .unwrap_or("")
        .trim();

    if snippet.is_empty() {
        "invalid syntax".to_string()
    } else {
        let short: String = snippet.chars().take(40).collect();
        format!("invalid syntax near `{short}`")
    }
}
