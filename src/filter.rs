//! Glob-style file selection.
//!
//! A filter is a list of alternatives separated by `,` or `;`.  Within an
//! alternative `*` matches any run of characters, `?` matches exactly one,
//! and `{}` stands for "any path segment" (expanded to `*`).  Everything else
//! is matched literally and case-insensitively.  A pattern matches when it
//! occurs anywhere in the path, so `Textures` selects every file below a
//! `Textures` directory.
//!
//! An empty alternative (including an empty or blank filter) matches every
//! path, so `"*.uasset,"` selects everything.

use regex::{Regex, RegexBuilder};
use tracing::warn;

use crate::toc::{FileEntry, DEP_FILE_NAME};

/// Compiled form of a filter string.
#[derive(Debug, Clone)]
pub struct FilterMatcher {
    patterns:  Vec<Regex>,
    match_all: bool,
}

impl FilterMatcher {
    pub fn new(filter: &str) -> Self {
        let expanded = filter.replace("{}", "*");
        let mut patterns = Vec::new();
        let mut match_all = false;
        for p in expanded.split([',', ';']).map(str::trim) {
            if p.is_empty() {
                match_all = true;
                continue;
            }
            match compile(p) {
                Ok(re) => patterns.push(re),
                Err(e) => warn!(pattern = p, error = %e, "ignoring unusable filter pattern"),
            }
        }
        if match_all && !filter.trim().is_empty() {
            warn!(filter, "empty filter alternative selects every file");
        }
        Self { patterns, match_all }
    }

    pub fn is_match(&self, path: &str) -> bool {
        path != DEP_FILE_NAME
            && (self.match_all || self.patterns.iter().any(|re| re.is_match(path)))
    }

    /// Entries whose path matches, in their original order.
    pub fn select<'a>(&self, files: &'a [FileEntry]) -> Vec<&'a FileEntry> {
        files.iter().filter(|f| self.is_match(&f.file_path)).collect()
    }
}

fn compile(pattern: &str) -> Result<Regex, regex::Error> {
    let source = regex::escape(pattern)
        .replace(r"\*", ".*")
        .replace(r"\?", ".");
    RegexBuilder::new(&source).case_insensitive(true).build()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str) -> FileEntry {
        FileEntry {
            file_path: path.into(),
            total_length: 0,
            compression_blocks: Vec::new(),
        }
    }

    #[test]
    fn extension_filter() {
        let m = FilterMatcher::new("*.uasset");
        assert!(m.is_match("Game/Textures/Foo.uasset"));
        assert!(!m.is_match("Game/Textures/Foo.uexp"));
    }

    #[test]
    fn segment_placeholder() {
        let m = FilterMatcher::new("{}/Foo.uasset");
        assert!(m.is_match("Any/Path/Foo.uasset"));
        assert!(!m.is_match("Any/Path/Bar.uasset"));
    }

    #[test]
    fn alternatives() {
        let m = FilterMatcher::new("*.uasset,*.uexp");
        assert!(m.is_match("a/b.uasset"));
        assert!(m.is_match("a/b.uexp"));
        assert!(!m.is_match("a/b.ubulk"));

        let m = FilterMatcher::new("*.uasset; *.ubulk");
        assert!(m.is_match("a/b.ubulk"));
    }

    #[test]
    fn case_insensitive() {
        let m = FilterMatcher::new("*.UASSET");
        assert!(m.is_match("game/foo.uasset"));
    }

    #[test]
    fn single_char_wildcard() {
        let m = FilterMatcher::new("Foo?.uasset");
        assert!(m.is_match("Game/Foo1.uasset"));
        assert!(!m.is_match("Game/Foo.uasset"));
    }

    #[test]
    fn regex_metacharacters_are_literal() {
        let m = FilterMatcher::new("Foo(1)+.uasset");
        assert!(m.is_match("Game/Foo(1)+.uasset"));
        assert!(!m.is_match("Game/Foo11.uasset"));
    }

    #[test]
    fn manifest_always_excluded() {
        let m = FilterMatcher::new("*");
        assert!(!m.is_match(DEP_FILE_NAME));
        assert!(m.is_match("dependencies.txt"));
    }

    #[test]
    fn empty_filter_selects_everything() {
        for filter in ["", "   "] {
            let m = FilterMatcher::new(filter);
            assert!(m.is_match("Game/Foo.uasset"), "filter {filter:?}");
            assert!(!m.is_match(DEP_FILE_NAME));
        }
    }

    #[test]
    fn empty_alternative_selects_everything() {
        let m = FilterMatcher::new("*.uasset,");
        assert!(m.is_match("Game/Foo.uasset"));
        assert!(m.is_match("Game/Foo.uexp"));

        let m = FilterMatcher::new("*.uasset; ;*.uexp");
        assert!(m.is_match("Game/Foo.ubulk"));
    }

    #[test]
    fn select_preserves_order() {
        let files = vec![
            entry("c.uasset"),
            entry("b.uexp"),
            entry(DEP_FILE_NAME),
            entry("a.uasset"),
        ];
        let picked: Vec<&str> = FilterMatcher::new("*.uasset")
            .select(&files)
            .iter()
            .map(|f| f.file_path.as_str())
            .collect();
        assert_eq!(picked, vec!["c.uasset", "a.uasset"]);
    }
}
