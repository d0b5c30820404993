//! Approximate location of search text the agent misremembered.
//!
//! The longest common substring between the search text and the file picks
//! an anchor line. Line windows around the anchor, of roughly the search
//! text's height, are scored by character similarity and the best one wins.
//! Inputs too large for a byte-level search anchor on shared lines instead.

use std::collections::HashSet;

use similar::TextDiff;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FuzzyMatch {
    /// Byte offset of the first matched line.
    pub start: usize,
    /// Byte offset just past the last matched line, including its newline.
    pub end: usize,
    pub ratio: f32,
}

/// `2 * matches / (len(a) + len(b))` over characters.
pub fn similarity(a: &str, b: &str) -> f32 {
    TextDiff::from_chars(a, b).ratio()
}

pub fn locate(content: &str, search: &str, threshold: f32) -> Option<FuzzyMatch> {
    let target = search.trim_end_matches('\n');
    if target.is_empty() || content.is_empty() {
        return None;
    }

    let anchor_byte = anchor(target, content)?;

    let starts = line_starts(content);
    let line_count = starts.len();
    let anchor = starts.partition_point(|&s| s <= anchor_byte) - 1;

    let height = target.lines().count().max(1);
    let min_len = (height - height / 2).max(1);
    let max_len = height + height / 2;

    let lo = anchor.saturating_sub(height);
    let hi = (anchor + height + 1).min(line_count);

    let line_end = |idx: usize| {
        if idx + 1 < line_count {
            starts[idx + 1]
        } else {
            content.len()
        }
    };

    let mut best: Option<FuzzyMatch> = None;

    for first in lo..hi {
        for len in min_len..=max_len {
            let last = first + len;
            if last > hi {
                break;
            }

            let (start, end) = (starts[first], line_end(last - 1));
            let window = content[start..end].trim_end_matches('\n');

            let best_ratio = best.map(|b| b.ratio).unwrap_or(-1.0);
            if upper_bound(window.len(), target.len()) <= best_ratio {
                continue;
            }

            let ratio = similarity(window, target);
            if ratio > best_ratio {
                best = Some(FuzzyMatch { start, end, ratio });
            }
        }
    }

    best.filter(|m| m.ratio >= threshold)
}

/// Ratio ceiling from lengths alone.
fn upper_bound(a: usize, b: usize) -> f32 {
    if a + b == 0 {
        return 1.0;
    }
    (2 * a.min(b)) as f32 / (a + b) as f32
}

fn line_starts(content: &str) -> Vec<usize> {
    let mut starts = vec![0];
    for (i, b) in content.bytes().enumerate() {
        if b == b'\n' && i + 1 < content.len() {
            starts.push(i + 1);
        }
    }
    starts
}

/// Byte-level LCS past this many cells is too slow; large inputs anchor on
/// lines instead.
const LCS_CELL_BUDGET: usize = 16_000_000;

fn anchor(target: &str, content: &str) -> Option<usize> {
    if target.len().saturating_mul(content.len()) <= LCS_CELL_BUDGET {
        return longest_common_substring(target.as_bytes(), content.as_bytes()).map(|(pos, _)| pos);
    }
    longest_line_run(target, content)
}

/// Byte offset of the longest run of consecutive content lines that also
/// appear in `target`, compared with surrounding whitespace trimmed.
fn longest_line_run(target: &str, content: &str) -> Option<usize> {
    let wanted: HashSet<&str> = target
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    let mut best: Option<(usize, usize)> = None;
    let mut run = 0;
    let mut run_start = 0;
    let mut offset = 0;

    for line in content.split_inclusive('\n') {
        let trimmed = line.trim();
        if !trimmed.is_empty() && wanted.contains(trimmed) {
            if run == 0 {
                run_start = offset;
            }
            run += 1;
            if best.map_or(true, |(len, _)| run > len) {
                best = Some((run, run_start));
            }
        } else {
            run = 0;
        }
        offset += line.len();
    }

    best.map(|(_, start)| start)
}

/// Returns `(offset in haystack, length)` of the earliest longest run shared
/// with `needle`.
fn longest_common_substring(needle: &[u8], haystack: &[u8]) -> Option<(usize, usize)> {
    let n = needle.len();
    let mut prev = vec![0u32; n + 1];
    let mut cur = vec![0u32; n + 1];
    let mut best_len = 0u32;
    let mut best_end = 0usize;

    for (j, &h) in haystack.iter().enumerate() {
        for i in 0..n {
            cur[i + 1] = if needle[i] == h { prev[i] + 1 } else { 0 };
            if cur[i + 1] > best_len {
                best_len = cur[i + 1];
                best_end = j + 1;
            }
        }
        std::mem::swap(&mut prev, &mut cur);
    }

    if best_len == 0 {
        None
    } else {
        Some((best_end - best_len as usize, best_len as usize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lcs_prefers_earliest_longest_run() {
        let (pos, len) = longest_common_substring(b"xabcx", b"abc--abc").unwrap();
        assert_eq!((pos, len), (0, 3));
        assert!(longest_common_substring(b"zzz", b"abc").is_none());
    }

    #[test]
    fn large_files_anchor_on_shared_lines() {
        let block = "def compute_total(items):\n    total = 0\n    for item in items:\n        total += item.price\n    return total\n";
        let mut content = String::new();
        for i in 0..12_000 {
            content.push_str(&format!("filler_{i} = {i}\n"));
        }
        let offset = content.len();
        content.push_str(block);
        for i in 12_000..20_000 {
            content.push_str(&format!("filler_{i} = {i}\n"));
        }

        let search = block.replace("item.price", "item.cost");
        assert!(search.len() * content.len() > LCS_CELL_BUDGET);

        let m = locate(&content, &search, 0.6).unwrap();
        assert_eq!(m.start, offset);
        assert_eq!(&content[m.start..m.end], block);
        assert!(m.ratio > 0.9);
    }

    #[test]
    fn line_run_needs_a_shared_line() {
        assert_eq!(longest_line_run("x = 1\n", "a = 1\nb = 2\n"), None);
        assert_eq!(longest_line_run("  b = 2\nc = 3", "a = 1\nb = 2\nc = 3\n"), Some(6));
    }

    #[test]
    fn line_starts_ignore_trailing_newline() {
        assert_eq!(line_starts("a\nb\n"), vec![0, 2]);
        assert_eq!(line_starts("a\nb"), vec![0, 2]);
        assert_eq!(line_starts("a"), vec![0]);
    }

    #[test]
    fn locates_window_with_one_wrong_line() {
        let content = "import os\n\ndef f():\n    a = 1\n    b = 2\n    return a\n\nprint(f())\n";
        let m = locate(content, "def f():\n    a = 1\n    b = 3\n    return a\n", 0.6).unwrap();
        assert_eq!(
            &content[m.start..m.end],
            "def f():\n    a = 1\n    b = 2\n    return a\n"
        );
        assert!(m.ratio > 0.9);
    }

    #[test]
    fn similarity_matches_difflib_formula() {
        assert!((similarity("abcd", "abcd") - 1.0).abs() < f32::EPSILON);
        assert!((similarity("ab", "cd")).abs() < f32::EPSILON);
        assert!((similarity("abcd", "abxy") - 0.5).abs() < 1e-6);
    }
}
