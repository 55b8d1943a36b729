//! Tag matching primitives for dependency resolution.
//!
//! Tags are free-form labels on capabilities. On the dependency side a
//! leading `+` marks a tag as a preference: it contributes to scoring but
//! is never required. All other tags are hard requirements that the
//! provider's tag set must cover.

use std::collections::BTreeSet;

/// Prefix marking a tag as a scored preference rather than a requirement.
pub const PREFERENCE_PREFIX: char = '+';

/// A dependency spec's tags split into requirements and preferences.
///
/// Tag names are compared with any leading `+` stripped on both sides, so
/// a capability advertising `+fast` satisfies a preference for `+fast` and
/// a requirement for `fast` alike.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagSet {
    requirements: BTreeSet<String>,
    preferences: BTreeSet<String>,
}

/// Strip the preference marker off a tag, yielding its bare name.
fn tag_name(tag: &str) -> &str {
    tag.strip_prefix(PREFERENCE_PREFIX).unwrap_or(tag)
}

impl TagSet {
    /// Split a raw tag list into requirements and preferences.
    pub fn parse(tags: &[String]) -> Self {
        let mut requirements = BTreeSet::new();
        let mut preferences = BTreeSet::new();
        for tag in tags {
            let trimmed = tag.trim();
            if trimmed.is_empty() {
                continue;
            }
            if let Some(name) = trimmed.strip_prefix(PREFERENCE_PREFIX) {
                if !name.is_empty() {
                    preferences.insert(name.to_string());
                }
            } else {
                requirements.insert(trimmed.to_string());
            }
        }
        Self {
            requirements,
            preferences,
        }
    }

    /// Bare names of a capability's advertised tags.
    pub fn names(tags: &[String]) -> BTreeSet<String> {
        tags.iter()
            .map(|t| tag_name(t.trim()).to_string())
            .filter(|t| !t.is_empty())
            .collect()
    }

    /// Whether a capability's tag names cover every requirement.
    pub fn covered_by(&self, capability_tags: &BTreeSet<String>) -> bool {
        self.requirements.is_subset(capability_tags)
    }

    /// How many preferences the capability's tag names satisfy.
    pub fn preference_hits(&self, capability_tags: &BTreeSet<String>) -> usize {
        self.preferences
            .iter()
            .filter(|p| capability_tags.contains(*p))
            .count()
    }

    pub fn requirements(&self) -> &BTreeSet<String> {
        &self.requirements
    }

    pub fn preferences(&self) -> &BTreeSet<String> {
        &self.preferences
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty() && self.preferences.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_splits_preferences() {
        let set = TagSet::parse(&tags(&["system", "time", "+fast"]));
        assert_eq!(set.requirements().len(), 2);
        assert_eq!(set.preferences().len(), 1);
        assert!(set.preferences().contains("fast"));
    }

    #[test]
    fn test_empty_requirements_match_anything() {
        let set = TagSet::parse(&[]);
        assert!(set.covered_by(&TagSet::names(&tags(&["system", "disk"]))));
        assert!(set.covered_by(&TagSet::names(&[])));
    }

    #[test]
    fn test_requirement_never_matches_missing_tag() {
        let set = TagSet::parse(&tags(&["disk"]));
        assert!(!set.covered_by(&TagSet::names(&tags(&["system", "general"]))));
        assert!(set.covered_by(&TagSet::names(&tags(&["system", "disk"]))));
    }

    #[test]
    fn test_capability_with_empty_tags_fails_any_requirement() {
        let set = TagSet::parse(&tags(&["system"]));
        assert!(!set.covered_by(&TagSet::names(&[])));
    }

    #[test]
    fn test_preference_hits_count() {
        let set = TagSet::parse(&tags(&["system", "+fast", "+local"]));
        let cap = TagSet::names(&tags(&["system", "+fast"]));
        assert_eq!(set.preference_hits(&cap), 1);
        let cap = TagSet::names(&tags(&["system", "fast", "local"]));
        assert_eq!(set.preference_hits(&cap), 2);
    }

    #[test]
    fn test_preference_marker_stripped_on_capability_side() {
        let set = TagSet::parse(&tags(&["fast"]));
        assert!(set.covered_by(&TagSet::names(&tags(&["+fast"]))));
    }

    #[test]
    fn test_blank_tags_ignored() {
        let set = TagSet::parse(&tags(&["", "  ", "+"]));
        assert!(set.is_empty());
    }
}
