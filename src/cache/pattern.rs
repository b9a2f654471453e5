//! Key Pattern Module
//!
//! Matching rules for bulk cache invalidation.

use regex::Regex;

// == Key Pattern ==
/// Selects cache keys for invalidation.
#[derive(Debug, Clone)]
pub enum KeyPattern {
    /// Literal key, with `*` matching any (possibly empty) run of characters
    Glob(String),
    /// Regular expression applied to the whole key via `is_match`
    Regex(Regex),
}

impl KeyPattern {
    pub fn glob(pattern: impl Into<String>) -> Self {
        KeyPattern::Glob(pattern.into())
    }

    /// Compiles a regular expression. Invalid expressions are rejected up front
    /// so invalidation itself cannot fail.
    pub fn regex(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(KeyPattern::Regex)
    }

    pub fn matches(&self, key: &str) -> bool {
        match self {
            KeyPattern::Glob(pattern) => glob_match(pattern, key),
            KeyPattern::Regex(re) => re.is_match(key),
        }
    }
}

impl From<&str> for KeyPattern {
    fn from(pattern: &str) -> Self {
        KeyPattern::Glob(pattern.to_string())
    }
}

impl From<String> for KeyPattern {
    fn from(pattern: String) -> Self {
        KeyPattern::Glob(pattern)
    }
}

impl From<Regex> for KeyPattern {
    fn from(re: Regex) -> Self {
        KeyPattern::Regex(re)
    }
}

/// Whole-string wildcard match. Greedy with single backtrack point, linear in
/// practice for the short keys the cache holds.
fn glob_match(pattern: &str, key: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let k: Vec<char> = key.chars().collect();

    let (mut pi, mut ki) = (0, 0);
    let mut star: Option<usize> = None;
    let mut resume = 0;

    while ki < k.len() {
        if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            pi += 1;
            resume = ki;
        } else if pi < p.len() && p[pi] == k[ki] {
            pi += 1;
            ki += 1;
        } else if let Some(s) = star {
            pi = s + 1;
            resume += 1;
            ki = resume;
        } else {
            return false;
        }
    }

    p[pi..].iter().all(|c| *c == '*')
}
