//! Semantic-version constraints for dependency specs.
//!
//! A dependency may pin a provider version three ways: not at all, exactly
//! (`1.2.3`), or with a comma-separated comparator range (`>=1.0,<2.0`).
//! A bare version is an exact match, not a caret requirement.

use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::MeshError;

/// A parsed version constraint from a dependency spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum VersionConstraint {
    /// No constraint; any provider version matches.
    Any,
    /// Exact equality with a single version.
    Exact(Version),
    /// Comparator range, e.g. `>=1.0,<2.0`.
    Range(VersionReq),
}

/// Parse a version string leniently: missing minor/patch components are
/// padded with zeros, so `1.0` parses as `1.0.0`.
pub fn parse_version(s: &str) -> Result<Version, MeshError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(MeshError::validation("empty version string"));
    }
    if let Ok(v) = Version::parse(s) {
        return Ok(v);
    }
    let parts = s.split('.').count();
    let padded = match parts {
        1 => format!("{}.0.0", s),
        2 => format!("{}.0", s),
        _ => s.to_string(),
    };
    Version::parse(&padded)
        .map_err(|e| MeshError::validation(format!("invalid version {:?}: {}", s, e)))
}

impl VersionConstraint {
    /// Parse a constraint string. Empty input means unconstrained.
    pub fn parse(s: &str) -> Result<Self, MeshError> {
        let s = s.trim();
        if s.is_empty() || s == "*" {
            return Ok(Self::Any);
        }
        let has_operators = s.contains(['<', '>', '=', '^', '~', ',']);
        if !has_operators {
            return Ok(Self::Exact(parse_version(s)?));
        }
        let req = VersionReq::parse(s)
            .map_err(|e| MeshError::validation(format!("invalid version constraint {:?}: {}", s, e)))?;
        Ok(Self::Range(req))
    }

    /// Whether a provider version satisfies this constraint.
    pub fn matches(&self, version: &Version) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(expected) => version == expected,
            Self::Range(req) => req.matches(version),
        }
    }

    /// Convenience: match a provider version given as a raw string.
    ///
    /// An unparsable provider version only satisfies the unconstrained case.
    pub fn matches_str(&self, version: &str) -> bool {
        match parse_version(version) {
            Ok(v) => self.matches(&v),
            Err(_) => matches!(self, Self::Any),
        }
    }
}

impl FromStr for VersionConstraint {
    type Err = MeshError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for VersionConstraint {
    type Error = MeshError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<VersionConstraint> for String {
    fn from(c: VersionConstraint) -> String {
        c.to_string()
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "*"),
            Self::Exact(v) => write!(f, "{}", v),
            Self::Range(req) => write!(f, "{}", req),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_any() {
        let c = VersionConstraint::parse("").unwrap();
        assert!(c.matches_str("0.0.1"));
        assert!(c.matches_str("99.9.9"));
    }

    #[test]
    fn test_exact_match() {
        let c = VersionConstraint::parse("1.2.3").unwrap();
        assert!(c.matches_str("1.2.3"));
        assert!(!c.matches_str("1.2.4"));
        // A bare version is exact, not caret.
        assert!(!c.matches_str("1.9.0"));
    }

    #[test]
    fn test_exact_match_padded() {
        let c = VersionConstraint::parse("1.0").unwrap();
        assert!(c.matches_str("1.0.0"));
        assert!(!c.matches_str("1.0.1"));
    }

    #[test]
    fn test_range_boundaries() {
        let c = VersionConstraint::parse(">=1.0,<2.0").unwrap();
        assert!(c.matches_str("1.0.0"));
        assert!(c.matches_str("1.99.0"));
        assert!(!c.matches_str("2.0.0"));
        assert!(!c.matches_str("0.9.9"));
    }

    #[test]
    fn test_range_single_bound() {
        let c = VersionConstraint::parse(">=1.5").unwrap();
        assert!(c.matches_str("1.5.0"));
        assert!(c.matches_str("3.0.0"));
        assert!(!c.matches_str("1.4.9"));
    }

    #[test]
    fn test_invalid_constraint_rejected() {
        assert!(VersionConstraint::parse(">=not.a.version").is_err());
    }

    #[test]
    fn test_unparsable_provider_version() {
        let any = VersionConstraint::parse("").unwrap();
        let pinned = VersionConstraint::parse("1.0.0").unwrap();
        assert!(any.matches_str("weird"));
        assert!(!pinned.matches_str("weird"));
    }

    #[test]
    fn test_parse_version_lenient() {
        assert_eq!(parse_version("1").unwrap(), Version::new(1, 0, 0));
        assert_eq!(parse_version("1.2").unwrap(), Version::new(1, 2, 0));
        assert_eq!(parse_version("1.2.3").unwrap(), Version::new(1, 2, 3));
        assert!(parse_version("").is_err());
    }
}
