//! Building the published [`InstallationState`] from worker state.

use std::collections::{BTreeMap, BTreeSet};

use anneal_schema::{
    EntityId, EntityKey, InstallationState, ResourceGroup, ResourceInfo, ResourceState, Version,
};

use crate::planner::AppliedRecord;
use crate::policy::DriftTracker;
use crate::resolver::{EntityGroup, Revision};

/// Assemble the snapshot for one completed cycle.
///
/// Rows are grouped by entity (versioned activation keys of one entity
/// share a group) and sorted by descending version, then by descending
/// registration recency. Applied instances whose declarations are gone
/// appear as pending `Uninstall` rows until the removal lands.
pub(crate) fn build_snapshot(
    groups: &[EntityGroup],
    applied: &BTreeMap<EntityKey, AppliedRecord>,
    drift: &DriftTracker,
    multi_version: bool,
) -> InstallationState {
    let mut rows: BTreeMap<EntityId, Vec<(Version, u64, ResourceInfo)>> = BTreeMap::new();

    for group in groups {
        let marked = drift.is_marked(&group.key);
        let winner_seq = group.winner().map(|w| w.seq);
        let record = applied.get(&group.key);
        for revision in &group.revisions {
            let state = state_of(revision, marked, winner_seq, record, multi_version);
            rows.entry(revision.entity.clone()).or_default().push((
                revision.resource.version.clone(),
                revision.seq,
                info_from_revision(revision, state),
            ));
        }
    }

    // Applied keys with no surviving declaration are on their way out.
    let group_keys: BTreeSet<&EntityKey> = groups.iter().map(|g| &g.key).collect();
    for (key, record) in applied {
        if group_keys.contains(key) {
            continue;
        }
        rows.entry(record.entity.clone()).or_default().push((
            record.version.clone(),
            0,
            info_from_record(record, ResourceState::Uninstall),
        ));
    }

    let groups = rows
        .into_iter()
        .map(|(entity_id, mut entries)| {
            entries.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)));
            ResourceGroup {
                entity_id,
                resources: entries.into_iter().map(|(_, _, info)| info).collect(),
            }
        })
        .collect();
    InstallationState { groups }
}

fn state_of(
    revision: &Revision,
    marked: bool,
    winner_seq: Option<u64>,
    record: Option<&AppliedRecord>,
    multi_version: bool,
) -> ResourceState {
    if marked || revision.excluded {
        return ResourceState::Ignored;
    }
    if winner_seq == Some(revision.seq) {
        return match record {
            Some(r) if multi_version || r.digest == revision.digest => ResourceState::Installed,
            _ => ResourceState::Install,
        };
    }
    // A superseded revision still shows as installed while its content is
    // the one actually in the runtime (a pending update has not landed).
    match record {
        Some(r) if r.digest == revision.digest && r.url == revision.resource.url => {
            ResourceState::Installed
        }
        _ => ResourceState::Ignored,
    }
}

fn info_from_revision(revision: &Revision, state: ResourceState) -> ResourceInfo {
    ResourceInfo {
        scheme: revision.scheme.clone(),
        url: revision.resource.url.clone(),
        entity_id: revision.entity.clone(),
        version: revision.resource.version.clone(),
        digest: revision.digest.clone(),
        state,
        attributes: revision.resource.attributes.clone(),
    }
}

fn info_from_record(record: &AppliedRecord, state: ResourceState) -> ResourceInfo {
    ResourceInfo {
        scheme: record.scheme.clone(),
        url: record.url.clone(),
        entity_id: record.entity.clone(),
        version: record.version.clone(),
        digest: record.digest.clone(),
        state,
        attributes: record.attributes.clone(),
    }
}

/// Observation targets for one cycle: everything applied plus every
/// winning key, deduplicated.
pub(crate) fn observation_targets(
    groups: &[EntityGroup],
    applied: &BTreeMap<EntityKey, AppliedRecord>,
) -> BTreeSet<EntityKey> {
    let mut targets: BTreeSet<EntityKey> = applied.keys().cloned().collect();
    for group in groups {
        if group.winner().is_some() {
            targets.insert(group.key.clone());
        }
    }
    targets
}
