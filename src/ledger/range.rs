//! Version-range compatibility rule for shared dependencies.
//!
//! Ranges are written the way remote manifests declare them (npm style) and
//! evaluated with [`semver::VersionReq`]:
//!
//! - `^18.2.0`, `~1.2`, `>=1.0.0 <2.0.0`, `*` behave as in npm
//! - a bare version is exact: `1.2.3` matches only `1.2.3`, `1.2` matches `1.2.x`
//! - `1.2.3 - 2.0.0` is an inclusive hyphen range
//! - `||` separates alternatives, any of which may match

use std::fmt;
use std::str::FromStr;

use semver::{Version, VersionReq};

use super::LedgerError;

/// A parsed version range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    raw: String,
    alternatives: Vec<VersionReq>,
}

impl VersionRange {
    /// Parses a range string.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidRange`] when any alternative is not a
    /// valid requirement.
    pub fn parse(raw: &str) -> Result<Self, LedgerError> {
        let raw = raw.trim();
        let mut alternatives = Vec::new();
        for alternative in raw.split("||") {
            let normalized = normalize_alternative(alternative)
                .map_err(|reason| LedgerError::invalid_range(raw, reason))?;
            let req = VersionReq::parse(&normalized)
                .map_err(|error| LedgerError::invalid_range(raw, &error.to_string()))?;
            alternatives.push(req);
        }
        Ok(Self {
            raw: raw.to_string(),
            alternatives,
        })
    }

    /// Builds the caret range implied by a bare declared version (`^x.y.z`).
    #[must_use]
    pub fn caret(version: &Version) -> Self {
        let raw = format!("^{version}");
        let alternatives = VersionReq::parse(&raw).map_or_else(|_| Vec::new(), |req| vec![req]);
        Self { raw, alternatives }
    }

    /// Returns true when `version` satisfies any alternative.
    #[must_use]
    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives.iter().any(|req| req.matches(version))
    }

    /// Returns the range as originally written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for VersionRange {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Rewrites one npm-style alternative into `semver` requirement syntax.
fn normalize_alternative(alternative: &str) -> Result<String, &'static str> {
    let tokens: Vec<&str> = alternative
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|token| !token.is_empty())
        .collect();

    if tokens.is_empty() {
        return Ok("*".to_string());
    }
    if let [low, "-", high] = tokens.as_slice() {
        return Ok(format!(">={low}, <={high}"));
    }

    let mut comparators = Vec::with_capacity(tokens.len());
    let mut pending_op: Option<&str> = None;
    for token in tokens {
        if token.chars().all(is_operator_char) {
            if pending_op.replace(token).is_some() {
                return Err("operator is not followed by a version");
            }
            continue;
        }
        let comparator = match pending_op.take() {
            Some(op) => format!("{op}{token}"),
            None => token.to_string(),
        };
        comparators.push(exact_if_bare(comparator));
    }
    if pending_op.is_some() {
        return Err("operator is not followed by a version");
    }
    Ok(comparators.join(", "))
}

fn is_operator_char(c: char) -> bool {
    matches!(c, '<' | '>' | '=' | '^' | '~')
}

/// npm reads an operator-less version as exact; `semver` would read it as caret.
fn exact_if_bare(comparator: String) -> String {
    let starts_bare = comparator
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_digit());
    let has_wildcard = comparator.contains(['x', 'X', '*']);
    if starts_bare && !has_wildcard {
        format!("={comparator}")
    } else {
        comparator
    }
}
