//! Index, action, and field name patterns.
//!
//! A pattern is one of:
//! - an exact name (`logs-2024`)
//! - a glob using `*` (any run of characters) and `?` (one character)
//! - a regular expression wrapped in slashes (`/logs-\d+/`), matched against
//!   the whole name
//!
//! A [`PatternSet`] combines patterns; entries prefixed with `-` exclude names
//! that the other entries would match.

use regex::Regex;

use super::error::{SecurityError, SecurityResult};

/// `*` matches system indices (names starting with `.`) too.
///
/// A role that must not see system indices has to exclude them explicitly,
/// e.g. `["*", "-.*"]`.
pub const WILDCARD_INCLUDES_SYSTEM_INDICES: bool = true;

/// Glob match supporting `*` and `?`.
pub fn wildcard_match(pattern: &str, value: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    let (mut p_idx, mut v_idx) = (0usize, 0usize);
    let (mut star_idx, mut match_idx) = (None, 0usize);
    let pattern_bytes = pattern.as_bytes();
    let value_bytes = value.as_bytes();

    while v_idx < value_bytes.len() {
        if p_idx < pattern_bytes.len() && pattern_bytes[p_idx] == b'*' {
            star_idx = Some(p_idx);
            match_idx = v_idx;
            p_idx += 1;
            continue;
        }

        if p_idx < pattern_bytes.len()
            && (pattern_bytes[p_idx] == b'?' || pattern_bytes[p_idx] == value_bytes[v_idx])
        {
            p_idx += 1;
            v_idx += 1;
            continue;
        }

        if let Some(star) = star_idx {
            p_idx = star + 1;
            match_idx += 1;
            v_idx = match_idx;
            continue;
        }

        return false;
    }

    while p_idx < pattern_bytes.len() && pattern_bytes[p_idx] == b'*' {
        p_idx += 1;
    }

    p_idx == pattern_bytes.len()
}

/// A single compiled pattern.
#[derive(Debug, Clone)]
pub enum Pattern {
    /// `*`
    Any,
    /// Literal name.
    Exact(String),
    /// Glob with `*` or `?`.
    Wildcard(String),
    /// Anchored regular expression, with its source.
    Regex(Regex, String),
}

impl Pattern {
    /// Compile a pattern from its source form.
    pub fn parse(source: &str) -> SecurityResult<Self> {
        if source == "*" {
            return Ok(Pattern::Any);
        }
        if source.len() > 2 && source.starts_with('/') && source.ends_with('/') {
            let body = &source[1..source.len() - 1];
            let regex = Regex::new(&format!("^(?:{})$", body)).map_err(|e| {
                SecurityError::InvalidPattern {
                    pattern: source.to_string(),
                    reason: e.to_string(),
                }
            })?;
            return Ok(Pattern::Regex(regex, source.to_string()));
        }
        if source.contains('*') || source.contains('?') {
            return Ok(Pattern::Wildcard(source.to_string()));
        }
        Ok(Pattern::Exact(source.to_string()))
    }

    /// Whether the pattern matches the whole of `value`.
    pub fn matches(&self, value: &str) -> bool {
        match self {
            Pattern::Any => WILDCARD_INCLUDES_SYSTEM_INDICES || !value.starts_with('.'),
            Pattern::Exact(name) => name == value,
            Pattern::Wildcard(glob) => wildcard_match(glob, value),
            Pattern::Regex(regex, _) => regex.is_match(value),
        }
    }

    /// The source text.
    pub fn source(&self) -> &str {
        match self {
            Pattern::Any => "*",
            Pattern::Exact(s) | Pattern::Wildcard(s) | Pattern::Regex(_, s) => s,
        }
    }
}

/// Include and exclude patterns evaluated together.
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

impl PatternSet {
    /// Compile a set. Entries starting with `-` become exclusions.
    pub fn parse<I, S>(sources: I) -> SecurityResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::default();
        for source in sources {
            let source = source.as_ref().trim();
            if source.is_empty() {
                continue;
            }
            match source.strip_prefix('-') {
                Some(excluded) if !excluded.is_empty() => {
                    set.exclude.push(Pattern::parse(excluded)?)
                }
                _ => set.include.push(Pattern::parse(source)?),
            }
        }
        Ok(set)
    }

    /// A name matches if any include matches and no exclusion does.
    pub fn matches(&self, value: &str) -> bool {
        self.include.iter().any(|p| p.matches(value)) && !self.exclude.iter().any(|p| p.matches(value))
    }

    /// Whether the set has no include patterns (and so matches nothing).
    pub fn is_empty(&self) -> bool {
        self.include.is_empty()
    }

    /// Include patterns.
    pub fn includes(&self) -> &[Pattern] {
        &self.include
    }

    /// Exclude patterns.
    pub fn excludes(&self) -> &[Pattern] {
        &self.exclude
    }
}
