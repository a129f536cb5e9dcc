//! Policy filtering: static exclusion rules and external-drift tracking.
//!
//! Both halves answer the same question from different directions: may the
//! engine act on this entity? Exclusion rules are loaded once per engine
//! lifetime and bar specific revisions from ever being selected. Drift
//! markers are earned at runtime, when an instance the engine applied turns
//! out to have been modified by someone else, and are sticky until a
//! declaration with a genuinely new digest supersedes them.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use anneal_schema::{Digest, EntityId, EntityKey, Version};

/// Errors that can occur when loading an exclusion list.
#[derive(thiserror::Error, Debug)]
pub enum ExclusionError {
    /// The configuration file could not be read.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration was not valid TOML or had the wrong shape.
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

/// One exclusion rule: an entity plus an optional version and/or digest
/// narrowing which revisions it bars.
///
/// A rule with neither version nor digest excludes every revision of the
/// entity.
#[derive(Debug, Clone, Deserialize)]
pub struct ExclusionRule {
    /// Entity the rule applies to.
    pub entity: EntityId,

    /// Bar only revisions declaring exactly this version.
    #[serde(default)]
    pub version: Option<Version>,

    /// Bar only revisions carrying exactly this content digest.
    #[serde(default)]
    pub digest: Option<Digest>,
}

impl ExclusionRule {
    fn matches(&self, entity: &EntityId, version: &Version, digest: &Digest) -> bool {
        if self.entity != *entity {
            return false;
        }
        if self.version.as_ref().is_some_and(|v| v != version) {
            return false;
        }
        if self.digest.as_ref().is_some_and(|d| d != digest) {
            return false;
        }
        true
    }
}

#[derive(Debug, Deserialize)]
struct ExclusionFile {
    #[serde(default, rename = "exclude")]
    rules: Vec<ExclusionRule>,
}

/// The static exclusion list, fixed for the lifetime of an engine.
#[derive(Debug, Clone, Default)]
pub struct ExclusionList {
    rules: Vec<ExclusionRule>,
}

impl ExclusionList {
    /// Build a list from rules assembled in code.
    pub fn new(rules: Vec<ExclusionRule>) -> Self {
        Self { rules }
    }

    /// Parse a TOML document of `[[exclude]]` tables.
    ///
    /// ```toml
    /// [[exclude]]
    /// entity = "bundle:my-feature"
    /// version = "1.1"
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`ExclusionError::Parse`] if the document is not valid TOML
    /// of this shape.
    pub fn from_toml_str(s: &str) -> Result<Self, ExclusionError> {
        let file: ExclusionFile = toml::from_str(s)?;
        Ok(Self { rules: file.rules })
    }

    /// Load the TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ExclusionError::Io`] if the file cannot be read, or
    /// [`ExclusionError::Parse`] if its content does not parse.
    pub fn from_path(path: &Path) -> Result<Self, ExclusionError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Whether any rule bars the given revision.
    pub fn matches(&self, entity: &EntityId, version: &Version, digest: &Digest) -> bool {
        self.rules.iter().any(|r| r.matches(entity, version, digest))
    }

    /// Whether the list has no rules at all.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// A sticky drift marker for one activation key.
///
/// `declared` records the winning declared digest at the time drift was
/// detected; the marker clears only when a later declaration carries a
/// different digest. `observed` is what the runtime actually reported,
/// kept for diagnostics.
#[derive(Debug, Clone)]
pub(crate) struct DriftMarker {
    /// Winning declared digest when the drift was detected.
    pub declared: Digest,
    /// Runtime content digest at detection time; `None` means the instance
    /// was removed externally.
    pub observed: Option<Digest>,
}

/// Per-key drift markers, owned by the worker.
#[derive(Debug, Default)]
pub(crate) struct DriftTracker {
    markers: BTreeMap<EntityKey, DriftMarker>,
}

impl DriftTracker {
    pub(crate) fn is_marked(&self, key: &EntityKey) -> bool {
        self.markers.contains_key(key)
    }

    pub(crate) fn marker(&self, key: &EntityKey) -> Option<&DriftMarker> {
        self.markers.get(key)
    }

    pub(crate) fn mark(&mut self, key: EntityKey, marker: DriftMarker) {
        self.markers.insert(key, marker);
    }

    pub(crate) fn clear(&mut self, key: &EntityKey) -> Option<DriftMarker> {
        self.markers.remove(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest(content: &str) -> Digest {
        Digest::of_bytes(content.as_bytes())
    }

    #[test]
    fn version_rule_matches_only_that_version() {
        let list = ExclusionList::new(vec![ExclusionRule {
            entity: EntityId::new("bundle:f"),
            version: Some(Version::new("1.1")),
            digest: None,
        }]);
        let e = EntityId::new("bundle:f");
        assert!(list.matches(&e, &Version::new("1.1"), &digest("a")));
        assert!(!list.matches(&e, &Version::new("1.2"), &digest("a")));
        assert!(!list.matches(&EntityId::new("bundle:g"), &Version::new("1.1"), &digest("a")));
    }

    #[test]
    fn digest_rule_matches_only_that_digest() {
        let list = ExclusionList::new(vec![ExclusionRule {
            entity: EntityId::new("config:c"),
            version: None,
            digest: Some(digest("bad")),
        }]);
        let e = EntityId::new("config:c");
        assert!(list.matches(&e, &Version::new("1"), &digest("bad")));
        assert!(!list.matches(&e, &Version::new("1"), &digest("good")));
    }

    #[test]
    fn bare_entity_rule_excludes_every_revision() {
        let list = ExclusionList::new(vec![ExclusionRule {
            entity: EntityId::new("bundle:f"),
            version: None,
            digest: None,
        }]);
        let e = EntityId::new("bundle:f");
        assert!(list.matches(&e, &Version::new("0.1"), &digest("x")));
        assert!(list.matches(&e, &Version::new("9.9"), &digest("y")));
    }

    #[test]
    fn toml_round_trip() {
        let list = ExclusionList::from_toml_str(
            r#"
            [[exclude]]
            entity = "bundle:my-feature"
            version = "1.1"

            [[exclude]]
            entity = "config:org.example.settings"
            "#,
        )
        .unwrap();
        assert!(list.matches(
            &EntityId::new("bundle:my-feature"),
            &Version::new("1.1"),
            &digest("anything")
        ));
        assert!(list.matches(
            &EntityId::new("config:org.example.settings"),
            &Version::new("2"),
            &digest("anything")
        ));
        assert!(!list.matches(
            &EntityId::new("bundle:my-feature"),
            &Version::new("1.2"),
            &digest("anything")
        ));
    }

    #[test]
    fn empty_document_parses_to_empty_list() {
        let list = ExclusionList::from_toml_str("").unwrap();
        assert!(list.is_empty());
    }

    #[test]
    fn drift_markers_are_sticky_until_cleared() {
        let mut tracker = DriftTracker::default();
        let key = EntityKey::single(EntityId::new("config:c"));
        assert!(!tracker.is_marked(&key));
        tracker.mark(
            key.clone(),
            DriftMarker {
                declared: digest("declared"),
                observed: Some(digest("manual")),
            },
        );
        assert!(tracker.is_marked(&key));
        assert_eq!(tracker.marker(&key).unwrap().declared, digest("declared"));
        assert!(tracker.clear(&key).is_some());
        assert!(!tracker.is_marked(&key));
        assert!(tracker.clear(&key).is_none());
    }
}
