use std::cell::OnceCell;
use std::collections::BTreeMap;

use crate::workspace::{normalize_rel, SourceTree};

/// Maps the paths an agent writes (often with bogus prefixes) onto files
/// that actually exist in the tree.
pub struct PathResolver<'a, T: SourceTree + ?Sized> {
    tree: &'a T,
    by_basename: OnceCell<BTreeMap<String, Vec<String>>>,
}

impl<'a, T: SourceTree + ?Sized> PathResolver<'a, T> {
    pub fn new(tree: &'a T) -> Self {
        Self {
            tree,
            by_basename: OnceCell::new(),
        }
    }

    /// Tries the path as given, then with leading segments stripped one at a
    /// time, then by basename. Ambiguous basenames go to the candidate sharing
    /// the most trailing segments, lexicographically first on ties.
    pub fn resolve(&self, path: &str) -> Option<String> {
        let rel = normalize_rel(path)?;
        if self.tree.exists(&rel) {
            return Some(rel);
        }

        let segments: Vec<&str> = rel.split('/').collect();
        for skip in 1..segments.len() {
            let candidate = segments[skip..].join("/");
            if self.tree.exists(&candidate) {
                return Some(candidate);
            }
        }

        let basename = segments.last()?;
        let candidates = self.index().get(*basename)?;

        candidates
            .iter()
            .max_by(|a, b| {
                shared_suffix(a, &segments)
                    .cmp(&shared_suffix(b, &segments))
                    .then_with(|| b.cmp(a))
            })
            .cloned()
    }

    fn index(&self) -> &BTreeMap<String, Vec<String>> {
        self.by_basename.get_or_init(|| {
            let mut index: BTreeMap<String, Vec<String>> = BTreeMap::new();
            for file in self.tree.source_files() {
                let base = file.rsplit('/').next().unwrap_or(&file).to_string();
                index.entry(base).or_default().push(file);
            }
            index
        })
    }
}

fn shared_suffix(candidate: &str, wanted: &[&str]) -> usize {
    candidate
        .rsplit('/')
        .zip(wanted.iter().rev())
        .take_while(|(a, b)| a == *b)
        .count()
}
