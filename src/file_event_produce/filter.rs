use std::path::Path;

use globset::{Glob, GlobSet, GlobSetBuilder};
use regex::Regex;

/// Ignore patterns of assets the watcher must not emit.
///
/// A pattern is a regex searched anywhere in the key. Patterns that are not
/// valid regexes, such as `*.swp`, are globs matched against the key and
/// its file name.
#[derive(Debug, Clone)]
pub struct EventFilter {
    regexes: Vec<Regex>,
    globs: GlobSet,
}

impl Default for EventFilter {
    fn default() -> Self {
        Self {
            regexes: vec![],
            globs: GlobSet::empty(),
        }
    }
}

impl EventFilter {
    pub fn new<I, S>(patterns: I) -> Result<Self, globset::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut regexes = vec![];
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let pattern = pattern.as_ref().trim();
            if pattern.is_empty() {
                continue;
            }

            match Regex::new(pattern) {
                Ok(regex) => regexes.push(regex),
                Err(_) => {
                    builder.add(Glob::new(pattern)?);
                }
            }
        }

        Ok(Self {
            regexes,
            globs: builder.build()?,
        })
    }

    /// Builds a filter from newline separated patterns, as found in an
    /// ignore file.
    pub fn from_pattern_text(text: &str) -> Result<Self, globset::Error> {
        Self::new(text.lines())
    }

    pub fn is_empty(&self) -> bool {
        self.regexes.is_empty() && self.globs.is_empty()
    }

    pub fn matches(&self, key: &str) -> bool {
        if self.regexes.iter().any(|regex| regex.is_match(key)) {
            return true;
        }

        if self.globs.is_match(key) {
            return true;
        }

        Path::new(key)
            .file_name()
            .map(|name| self.globs.is_match(name))
            .unwrap_or(false)
    }
}
