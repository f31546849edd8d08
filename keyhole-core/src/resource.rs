//! Resource patterns and first-match-wins credential selection.
//!
//! A resource is a short plugin-defined string naming the target of a
//! command (`owner/repo` for the code-forge plugin, an account tag for the
//! productivity plugin). Patterns come in exactly three forms:
//!
//! 1. exact literal (`owner/repo`)
//! 2. owner wildcard (`owner/*`)
//! 3. global wildcard (`*`)
//!
//! Matching is anchored on the whole resource and folds ASCII case only.

use crate::error::ConfigError;

/// A validated resource pattern. Built at config load; matching never fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourcePattern {
    /// `*` matches any resource.
    Any,
    /// `owner/*` matches any resource whose first segment is `owner` and
    /// whose remainder after the slash is non-empty.
    Prefix(String),
    /// Exact literal match.
    Exact(String),
}

impl ResourcePattern {
    /// Parse and validate one pattern string. Any `*` placement other than
    /// the two wildcard forms is rejected.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        if raw.is_empty() {
            return Err(ConfigError::Malformed("empty resource pattern".into()));
        }
        if raw == "*" {
            return Ok(ResourcePattern::Any);
        }
        if let Some(owner) = raw.strip_suffix("/*") {
            if owner.is_empty() || owner.contains('*') {
                return Err(ConfigError::Malformed(format!(
                    "invalid resource pattern {raw:?}: wildcard must be \"*\" or \"owner/*\""
                )));
            }
            return Ok(ResourcePattern::Prefix(owner.to_ascii_lowercase()));
        }
        if raw.contains('*') {
            return Err(ConfigError::Malformed(format!(
                "invalid resource pattern {raw:?}: wildcard must be \"*\" or \"owner/*\""
            )));
        }
        Ok(ResourcePattern::Exact(raw.to_ascii_lowercase()))
    }

    /// Anchored, ASCII-case-insensitive match against a whole resource.
    pub fn matches(&self, resource: &str) -> bool {
        let folded = resource.to_ascii_lowercase();
        match self {
            ResourcePattern::Any => true,
            ResourcePattern::Exact(literal) => folded == *literal,
            ResourcePattern::Prefix(owner) => match folded.split_once('/') {
                Some((first, rest)) => first == owner && !rest.is_empty(),
                // A slash-less resource has fewer segments than the
                // pattern demands and never matches.
                None => false,
            },
        }
    }
}

impl std::fmt::Display for ResourcePattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourcePattern::Any => write!(f, "*"),
            ResourcePattern::Prefix(owner) => write!(f, "{owner}/*"),
            ResourcePattern::Exact(literal) => write!(f, "{literal}"),
        }
    }
}

/// Walk `entries` in configuration order, and each entry's pattern list in
/// order; return the index of the first entry with a matching pattern.
///
/// This is the single selection routine behind every plugin selector, so
/// selection is deterministic by construction.
pub fn select_first_match<'a, E>(
    entries: impl IntoIterator<Item = (usize, &'a E)>,
    patterns_of: impl Fn(&'a E) -> &'a [ResourcePattern],
    resource: &str,
) -> Option<usize>
where
    E: 'a,
{
    for (index, entry) in entries {
        if patterns_of(entry).iter().any(|p| p.matches(resource)) {
            return Some(index);
        }
    }
    None
}
