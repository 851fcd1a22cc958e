//! Glob-style rule matching shared by domain, URL and branch gating
//!
//! `*` expands to any run of characters and `?` to exactly one. Everything else
//! is literal. Patterns are compiled once and cached per matcher.

use regex::{Regex, RegexBuilder};
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::constants::pattern;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PatternError {
    #[error("pattern is {len} characters long (max {max})")]
    TooLong { len: usize, max: usize },

    #[error("pattern '{pattern}' failed to compile: {reason}")]
    Compile { pattern: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Anchor {
    Full,
    Start,
}

/// Wildcard matcher with a compiled-pattern cache
#[derive(Debug, Default)]
pub struct RuleMatcher {
    cache: Mutex<HashMap<(String, Anchor), Regex>>,
}

impl RuleMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full-string match. Invalid patterns never match.
    pub fn matches(&self, text: &str, pattern: &str) -> bool {
        self.try_matches(text, pattern).unwrap_or_else(|e| {
            warn!(pattern = %pattern, error = %e, "Rejected wildcard pattern");
            false
        })
    }

    /// Prefix match (anchored only at the start), used for IP ranges
    pub fn matches_prefix(&self, text: &str, pattern: &str) -> bool {
        self.try_matches_prefix(text, pattern).unwrap_or_else(|e| {
            warn!(pattern = %pattern, error = %e, "Rejected prefix pattern");
            false
        })
    }

    pub fn try_matches(&self, text: &str, pattern: &str) -> Result<bool, PatternError> {
        if pattern == pattern::MATCH_ALL {
            return Ok(true);
        }
        self.is_match(text, pattern, Anchor::Full)
    }

    pub fn try_matches_prefix(&self, text: &str, pattern: &str) -> Result<bool, PatternError> {
        self.is_match(text, pattern, Anchor::Start)
    }

    fn is_match(&self, text: &str, pattern: &str, anchor: Anchor) -> Result<bool, PatternError> {
        let cache_key = (pattern.to_string(), anchor);
        let mut cache = self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(regex) = cache.get(&cache_key) {
            return Ok(regex.is_match(text));
        }

        let regex = compile(pattern, anchor)?;
        let matched = regex.is_match(text);
        cache.insert(cache_key, regex);
        Ok(matched)
    }
}

/// True if the pattern uses `*` or `?`
pub fn has_wildcard(pattern: &str) -> bool {
    pattern.contains(['*', '?'])
}

/// Translate a glob pattern into an anchored regex source string
fn to_regex_source(pattern: &str, anchor: Anchor) -> String {
    let mut source = String::with_capacity(pattern.len() * 2 + 3);
    source.push('^');
    let mut literal = [0u8; 4];
    for ch in pattern.chars() {
        match ch {
            '*' => source.push_str(".*"),
            '?' => source.push('.'),
            other => source.push_str(&regex::escape(other.encode_utf8(&mut literal))),
        }
    }
    if anchor == Anchor::Full {
        source.push('$');
    }
    source
}

fn compile(pattern: &str, anchor: Anchor) -> Result<Regex, PatternError> {
    let len = pattern.chars().count();
    if len > pattern::MAX_LEN {
        return Err(PatternError::TooLong { len, max: pattern::MAX_LEN });
    }

    let source = to_regex_source(pattern, anchor);
    debug!(pattern = %pattern, regex = %source, "Compiling wildcard pattern");
    RegexBuilder::new(&source)
        .size_limit(pattern::REGEX_SIZE_LIMIT)
        .dfa_size_limit(pattern::REGEX_SIZE_LIMIT)
        .build()
        .map_err(|e| PatternError::Compile {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_star_matches_everything() {
        let m = RuleMatcher::new();
        assert!(m.matches("", "*"));
        assert!(m.matches("/any/path", "*"));
    }

    #[test]
    fn test_star_expands_inside_pattern() {
        let m = RuleMatcher::new();
        assert!(m.matches("release/v2", "release/*"));
        assert!(m.matches("release/", "release/*"));
        assert!(!m.matches("hotfix/1", "release/*"));
    }

    #[test]
    fn test_question_mark_is_single_char() {
        let m = RuleMatcher::new();
        assert!(m.matches("v1", "v?"));
        assert!(!m.matches("v10", "v?"));
        assert!(!m.matches("v", "v?"));
    }

    #[test]
    fn test_dot_is_literal() {
        let m = RuleMatcher::new();
        assert!(m.matches("/index.html", "/index.html"));
        assert!(!m.matches("/indexXhtml", "/index.html"));
    }

    #[test]
    fn test_full_anchoring() {
        let m = RuleMatcher::new();
        assert!(!m.matches("/admin/users", "/admin"));
        assert!(!m.matches("x/admin", "/admin*"));
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        let m = RuleMatcher::new();
        assert!(m.matches("/a+b/(c)", "/a+b/(c)"));
        assert!(!m.matches("/aab/c", "/a+b/(c)"));
    }

    #[test]
    fn test_prefix_anchor_only_at_start() {
        let m = RuleMatcher::new();
        assert!(m.matches_prefix("192.168.0.12", "192.168."));
        assert!(!m.matches_prefix("10.192.168.1", "192.168."));
        assert!(!m.matches_prefix("192x168.0.1", "192.168."));
    }

    #[test]
    fn test_overlong_pattern_rejected() {
        let m = RuleMatcher::new();
        let long = "a".repeat(pattern::MAX_LEN + 1);
        assert!(matches!(m.try_matches("a", &long), Err(PatternError::TooLong { .. })));
        assert!(!m.matches(&long, &long));
    }

    #[test]
    fn test_cache_reuses_compiled_pattern() {
        let m = RuleMatcher::new();
        assert!(m.matches("feature/a", "feature/*"));
        assert!(m.matches("feature/b", "feature/*"));
        assert_eq!(m.cache.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_has_wildcard() {
        assert!(has_wildcard("release/*"));
        assert!(has_wildcard("v?"));
        assert!(!has_wildcard("master"));
    }
}
