// SPDX-License-Identifier: PMPL-1.0-or-later

//! Ordered pattern lists matched against console output

use regex::Regex;
use std::fmt;

/// One expected token: a literal substring or a regular expression.
#[derive(Clone)]
pub enum Pattern {
    Literal(String),
    Regex(Regex),
}

impl Pattern {
    pub fn literal(text: impl Into<String>) -> Self {
        Pattern::Literal(text.into())
    }

    /// Compile a regular expression pattern.
    pub fn regex(expr: &str) -> Result<Self, regex::Error> {
        Regex::new(expr).map(Pattern::Regex)
    }

    /// Byte span of the first occurrence in `haystack`.
    pub fn find(&self, haystack: &str) -> Option<(usize, usize)> {
        match self {
            Pattern::Literal(text) if text.is_empty() => None,
            Pattern::Literal(text) => haystack.find(text.as_str()).map(|s| (s, s + text.len())),
            Pattern::Regex(re) => re.find(haystack).map(|m| (m.start(), m.end())),
        }
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Literal(text) => write!(f, "Literal({:?})", text),
            Pattern::Regex(re) => write!(f, "Regex({:?})", re.as_str()),
        }
    }
}

/// Where a pattern list first matched inside a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternMatch {
    pub index: usize,
    pub start: usize,
    pub end: usize,
}

/// Find the earliest match of any pattern. When two patterns match at the same
/// position the one listed first wins.
pub fn earliest_match(patterns: &[Pattern], haystack: &str) -> Option<PatternMatch> {
    let mut best: Option<PatternMatch> = None;
    for (index, pattern) in patterns.iter().enumerate() {
        if let Some((start, end)) = pattern.find(haystack) {
            let better = match best {
                Some(current) => start < current.start,
                None => true,
            };
            if better {
                best = Some(PatternMatch { index, start, end });
            }
        }
    }
    best
}

/// Compile user-supplied regular expressions, appending them after `base`.
pub fn extend_with(base: Vec<Pattern>, extra: &[String]) -> Result<Vec<Pattern>, regex::Error> {
    let mut patterns = base;
    for expr in extra {
        patterns.push(Pattern::regex(expr)?);
    }
    Ok(patterns)
}
