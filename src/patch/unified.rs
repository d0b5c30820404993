use similar::TextDiff;

pub const CONTEXT_RADIUS: usize = 3;

/// `git apply`-compatible diff for one file. Empty when nothing changed.
pub fn file_diff(path: &str, original: &str, modified: &str) -> String {
    if original == modified {
        return String::new();
    }

    let diff = TextDiff::from_lines(original, modified);
    let mut text = diff
        .unified_diff()
        .context_radius(CONTEXT_RADIUS)
        .header(&format!("a/{path}"), &format!("b/{path}"))
        .to_string();

    if !text.ends_with('\n') {
        text.push('\n');
    }
    text
}
