//! Declared resource revisions and the activation identity they resolve to.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::digest::Digest;
use crate::types::{EntityId, Version};

/// Opaque key-value payload carried by a declared resource (manifest
/// headers, configuration dictionaries). Stored as a `BTreeMap` so the
/// serialized form, and therefore [`Digest::of_attributes`], is stable.
pub type Attributes = BTreeMap<String, serde_json::Value>;

/// Errors that can occur when validating an [`InstallableResource`].
#[derive(thiserror::Error, Debug)]
pub enum ResourceError {
    /// A required field (url or version) is empty.
    #[error("Empty field: {0}")]
    EmptyField(String),
}

/// One declared revision of an installable entity.
///
/// Resource providers hand these to the engine under a scheme; the `url` is
/// the provider's own stable location for the revision and must be unique
/// within the scheme. The content digest may be supplied explicitly (for
/// example from an artifact checksum) or left to be computed from the
/// attribute payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallableResource {
    /// Scheme-relative location, e.g. `bundles/feature-1.2.jar`.
    pub url: String,

    /// Revision version, the primary ordering key during resolution.
    pub version: Version,

    /// Explicit content digest; when `None` the digest is derived from
    /// `attributes`.
    pub digest: Option<Digest>,

    /// Opaque payload interpreted only by the runtime adapter.
    #[serde(default)]
    pub attributes: Attributes,
}

impl InstallableResource {
    /// Create a new resource declaration with an empty attribute payload.
    pub fn new(url: impl Into<String>, version: impl Into<Version>) -> Self {
        Self {
            url: url.into(),
            version: version.into(),
            digest: None,
            attributes: Attributes::new(),
        }
    }

    /// Attach an explicit content digest.
    pub fn with_digest(mut self, digest: Digest) -> Self {
        self.digest = Some(digest);
        self
    }

    /// Replace the attribute payload.
    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    /// Insert a single attribute.
    pub fn with_attribute(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// The digest that identifies this revision's content: the explicit
    /// digest when one was declared, otherwise the digest of the attribute
    /// payload.
    pub fn effective_digest(&self) -> Digest {
        self.digest
            .clone()
            .unwrap_or_else(|| Digest::of_attributes(&self.attributes))
    }

    /// Validates the declaration by checking all required fields.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::EmptyField`] if `url` or `version` is empty.
    pub fn validate(&self) -> Result<(), ResourceError> {
        if self.url.is_empty() {
            return Err(ResourceError::EmptyField("url".to_string()));
        }
        if self.version.as_str().is_empty() {
            return Err(ResourceError::EmptyField("version".to_string()));
        }
        Ok(())
    }
}

/// The identity an entity is activated under.
///
/// In single-version operation the key is the entity id alone and revisions
/// compete for one activation slot. In multi-version operation the version
/// participates in the key, so each `(entity, version)` pair is an
/// independently activatable sub-entity with its own stable identity in the
/// managed runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    /// The logical entity.
    pub entity: EntityId,

    /// The activated version, present only in multi-version operation.
    pub version: Option<Version>,
}

impl EntityKey {
    /// Key for single-version operation: all revisions of the entity
    /// compete for one slot.
    pub fn single(entity: EntityId) -> Self {
        Self {
            entity,
            version: None,
        }
    }

    /// Key for multi-version operation: the version is part of the
    /// activation identity.
    pub fn versioned(entity: EntityId, version: Version) -> Self {
        Self {
            entity,
            version: Some(version),
        }
    }
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.version {
            Some(v) => write!(f, "{}/{v}", self.entity),
            None => write!(f, "{}", self.entity),
        }
    }
}
