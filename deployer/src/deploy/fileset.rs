//! Include/exclude path patterns
//!
//! Patterns are `/`-separated. `*` and `?` match inside one segment, `**`
//! matches any number of segments. A path matches a set when it matches some
//! include (or there are none) and no exclude.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSet {
    #[serde(default)]
    pub includes: Vec<String>,
    #[serde(default)]
    pub excludes: Vec<String>,
}

impl FileSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn include(mut self, pattern: impl Into<String>) -> Self {
        self.includes.push(pattern.into());
        self
    }

    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.excludes.push(pattern.into());
        self
    }

    /// `relative` uses `/` separators and no leading slash
    pub fn matches(&self, relative: &str) -> bool {
        let included = self.includes.is_empty()
            || self.includes.iter().any(|pattern| glob_match(pattern, relative));
        included && !self.excludes.iter().any(|pattern| glob_match(pattern, relative))
    }

    /// Merge another set in, keeping the existing patterns first
    pub fn extend(&mut self, other: &FileSet) {
        for pattern in &other.includes {
            if !self.includes.contains(pattern) {
                self.includes.push(pattern.clone());
            }
        }
        for pattern in &other.excludes {
            if !self.excludes.contains(pattern) {
                self.excludes.push(pattern.clone());
            }
        }
    }
}

fn glob_match(pattern: &str, path: &str) -> bool {
    let pattern: Vec<&str> = pattern.trim_matches('/').split('/').collect();
    let path: Vec<&str> = path.trim_matches('/').split('/').collect();
    match_segments(&pattern, &path)
}

fn match_segments(pattern: &[&str], path: &[&str]) -> bool {
    match pattern.split_first() {
        None => path.is_empty(),
        Some((&"**", rest)) => (0..=path.len()).any(|skip| match_segments(rest, &path[skip..])),
        Some((first, rest)) => match path.split_first() {
            Some((segment, path_rest)) => {
                match_segment(first.as_bytes(), segment.as_bytes()) && match_segments(rest, path_rest)
            }
            None => false,
        },
    }
}

fn match_segment(pattern: &[u8], text: &[u8]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some((b'*', rest)) => (0..=text.len()).any(|skip| match_segment(rest, &text[skip..])),
        Some((b'?', rest)) => !text.is_empty() && match_segment(rest, &text[1..]),
        Some((c, rest)) => text.first() == Some(c) && match_segment(rest, &text[1..]),
    }
}
