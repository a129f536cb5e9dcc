//! Grouping of declared revisions into entities and winner selection.
//!
//! Resolution is a pure function of the revision list: group by activation
//! key, order by precedence, pick the best eligible revision. Re-running it
//! with the same input always yields the same output, which is what lets
//! the worker rebuild the world from scratch on every cycle.

use std::collections::BTreeMap;

use anneal_schema::{Digest, EntityId, EntityKey, InstallableResource};

/// One declared revision, resolved to its entity for this cycle.
#[derive(Debug, Clone)]
pub(crate) struct Revision {
    /// Scheme the revision was registered under.
    pub scheme: String,
    /// Entity the revision belongs to, as derived by the runtime adapter.
    pub entity: EntityId,
    /// Effective content digest.
    pub digest: Digest,
    /// Registration recency, used to break version ties.
    pub seq: u64,
    /// Whether exclusion policy bars this revision from activation.
    pub excluded: bool,
    /// The declaration itself (url, version, attributes).
    pub resource: InstallableResource,
}

impl Revision {
    /// The activation key this revision competes under.
    pub(crate) fn key(&self, multi_version: bool) -> EntityKey {
        if multi_version {
            EntityKey::versioned(self.entity.clone(), self.resource.version.clone())
        } else {
            EntityKey::single(self.entity.clone())
        }
    }
}

/// All revisions competing for one activation key, ordered by descending
/// precedence.
#[derive(Debug)]
pub(crate) struct EntityGroup {
    /// The activation key.
    pub key: EntityKey,
    /// Competing revisions, best first.
    pub revisions: Vec<Revision>,
}

impl EntityGroup {
    /// The winning revision: the highest-precedence revision not barred by
    /// exclusion policy. `None` when every revision is excluded, in which
    /// case the entity resolves as absent.
    pub(crate) fn winner(&self) -> Option<&Revision> {
        self.revisions.iter().find(|r| !r.excluded)
    }
}

/// Group revisions by activation key and order each group by precedence:
/// version descending, then registration recency descending.
pub(crate) fn resolve(revisions: Vec<Revision>, multi_version: bool) -> Vec<EntityGroup> {
    let mut groups: BTreeMap<EntityKey, Vec<Revision>> = BTreeMap::new();
    for revision in revisions {
        groups
            .entry(revision.key(multi_version))
            .or_default()
            .push(revision);
    }

    groups
        .into_iter()
        .map(|(key, mut revisions)| {
            revisions.sort_by(|a, b| {
                b.resource
                    .version
                    .cmp(&a.resource.version)
                    .then(b.seq.cmp(&a.seq))
            });
            EntityGroup { key, revisions }
        })
        .collect()
}
