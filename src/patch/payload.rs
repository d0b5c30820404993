use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{extract, CandidatePatch, Edit};
use crate::workspace::SourceTree;

/// What an agent submitted as its final answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Edits(Vec<Edit>),
    /// Unified diff passed through untouched.
    RawDiff(String),
    Empty,
}

#[derive(Deserialize)]
struct RawPayload {
    #[serde(default)]
    edits: Vec<Value>,
    #[serde(default)]
    patch: Option<String>,
}

/// Accepts `{"edits": [...]}` or `{"patch": "..."}`. Malformed edit entries
/// are skipped; anything unparseable is `Empty`.
pub fn parse_payload(raw: &str) -> Payload {
    let parsed: RawPayload = match serde_json::from_str(raw) {
        Ok(p) => p,
        Err(e) => {
            debug!(error = %e, "payload is not valid JSON");
            return Payload::Empty;
        }
    };

    let edits: Vec<Edit> = parsed
        .edits
        .into_iter()
        .filter_map(|v| serde_json::from_value(v).ok())
        .collect();

    if !edits.is_empty() {
        return Payload::Edits(edits);
    }

    match parsed.patch {
        Some(p) if !p.trim().is_empty() => Payload::RawDiff(p),
        _ => Payload::Empty,
    }
}

pub fn payload_to_patch<T: SourceTree + ?Sized>(tree: &T, raw: &str, threshold: f32) -> CandidatePatch {
    match parse_payload(raw) {
        Payload::Edits(edits) => extract(tree, &edits, threshold).to_patch(),
        Payload::RawDiff(diff) => CandidatePatch::new(diff),
        Payload::Empty => CandidatePatch::empty(),
    }
}
