//! Immutable per-cycle view of everything the engine knows.

use serde::{Deserialize, Serialize};

use crate::digest::Digest;
use crate::resource::Attributes;
use crate::state::ResourceState;
use crate::types::{EntityId, Version};

/// One declared revision as reported in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceInfo {
    /// Scheme the resource was registered under.
    pub scheme: String,
    /// Scheme-relative location as declared by the provider.
    pub url: String,
    /// Entity id the revision resolved to in this cycle.
    pub entity_id: EntityId,
    /// Declared version.
    pub version: Version,
    /// Effective content digest.
    pub digest: Digest,
    /// Reported lifecycle state.
    pub state: ResourceState,
    /// Declared attribute payload.
    pub attributes: Attributes,
}

impl ResourceInfo {
    /// The scheme-qualified URL, `"{scheme}:{url}"`.
    pub fn qualified_url(&self) -> String {
        format!("{}:{}", self.scheme, self.url)
    }
}

/// All known revisions of one activation identity, ordered by descending
/// precedence. The leading revision is the one the entity's reported state
/// is read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceGroup {
    /// Entity id shared by every revision in the group.
    pub entity_id: EntityId,
    /// Revisions, highest precedence first.
    pub resources: Vec<ResourceInfo>,
}

impl ResourceGroup {
    /// The highest-precedence revision, if any.
    pub fn leading(&self) -> Option<&ResourceInfo> {
        self.resources.first()
    }
}

/// Snapshot of the engine's installation state, rebuilt after every
/// processing cycle.
///
/// Snapshots are plain values: reading one never blocks the engine, and a
/// held snapshot stays internally consistent while the engine moves on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationState {
    /// Every known entity group.
    pub groups: Vec<ResourceGroup>,
}

impl InstallationState {
    /// Groups whose leading revision has been processed (installed,
    /// ignored, or uninstalled).
    pub fn installed_resources(&self) -> impl Iterator<Item = &ResourceGroup> {
        self.groups
            .iter()
            .filter(|g| g.leading().is_some_and(|r| r.state.is_processed()))
    }

    /// Groups whose leading revision still awaits a runtime operation.
    pub fn active_resources(&self) -> impl Iterator<Item = &ResourceGroup> {
        self.groups
            .iter()
            .filter(|g| g.leading().is_some_and(|r| r.state.is_pending()))
    }

    /// Look up the group for an entity id, if the engine knows it.
    pub fn find_entity(&self, entity: &EntityId) -> Option<&ResourceGroup> {
        self.groups.iter().find(|g| g.entity_id == *entity)
    }

    /// Look up a single revision by scheme and declared URL.
    pub fn find_resource(&self, scheme: &str, url: &str) -> Option<&ResourceInfo> {
        self.groups
            .iter()
            .flat_map(|g| g.resources.iter())
            .find(|r| r.scheme == scheme && r.url == url)
    }
}
