//! Task planning: diffing desired state against applied state.
//!
//! Planning is a pure function of one cycle's inputs (resolved groups,
//! applied records, drift markers, runtime observations). It emits at most
//! one runtime task per activation key, plus local bookkeeping actions the
//! worker applies before anything touches the runtime. Keeping it pure is
//! what makes every transition in the state machine unit-testable without
//! an adapter.

use std::collections::{BTreeMap, BTreeSet};

use anneal_schema::{Attributes, Digest, EntityId, EntityKey, Version};

use crate::policy::DriftTracker;
use crate::resolver::{EntityGroup, Revision};

/// What the engine knows it has applied for one activation key.
#[derive(Debug, Clone)]
pub(crate) struct AppliedRecord {
    /// Scheme of the declaration that produced the instance.
    pub scheme: String,
    /// URL of the declaration that produced the instance.
    pub url: String,
    /// Entity the key resolved to when the instance was applied.
    pub entity: EntityId,
    /// Version that was applied.
    pub version: Version,
    /// Declared digest that was applied.
    pub digest: Digest,
    /// Attribute payload that was applied.
    pub attributes: Attributes,
}

impl AppliedRecord {
    pub(crate) fn from_revision(revision: &Revision) -> Self {
        Self {
            scheme: revision.scheme.clone(),
            url: revision.resource.url.clone(),
            entity: revision.entity.clone(),
            version: revision.resource.version.clone(),
            digest: revision.digest.clone(),
            attributes: revision.resource.attributes.clone(),
        }
    }
}

/// Bookkeeping decisions applied by the worker without touching the
/// runtime.
#[derive(Debug)]
pub(crate) enum LocalAction {
    /// The runtime already holds exactly the winning content; record it as
    /// applied without issuing an operation (engine restart, identity
    /// migration).
    Adopt {
        /// Key being adopted.
        key: EntityKey,
        /// Record to store for the key.
        record: AppliedRecord,
    },

    /// The declaration behind an applied instance now resolves to a
    /// different activation key; move the record, leave the runtime alone.
    /// A record already present at the destination wins.
    Migrate {
        /// Previous activation key.
        from: EntityKey,
        /// Key the declaration resolves to now.
        to: EntityKey,
    },

    /// External modification detected; park the key as ignored.
    MarkDrift {
        /// Key being parked.
        key: EntityKey,
        /// Winning declared digest at detection time.
        declared: Digest,
        /// What the runtime reported; `None` means the instance is gone.
        observed: Option<Digest>,
    },

    /// A declaration with a new digest superseded a drift marker; the key
    /// rejoins normal reconciliation this cycle.
    ClearDrift {
        /// Key being released.
        key: EntityKey,
    },
}

/// A runtime operation to execute through the adapter.
#[derive(Debug)]
pub(crate) enum Task {
    /// Bring a new instance into the runtime.
    Install {
        /// Target activation key.
        key: EntityKey,
        /// Winning revision to apply.
        revision: Revision,
    },

    /// Replace the content of an existing instance (upgrade, content
    /// change, or downgrade after a retraction).
    Update {
        /// Target activation key.
        key: EntityKey,
        /// Winning revision to apply.
        revision: Revision,
    },

    /// Remove an instance whose declaration was retracted.
    Uninstall {
        /// Target activation key.
        key: EntityKey,
        /// Record of what had been applied.
        record: AppliedRecord,
    },
}

impl Task {
    pub(crate) fn key(&self) -> &EntityKey {
        match self {
            Self::Install { key, .. } | Self::Update { key, .. } | Self::Uninstall { key, .. } => {
                key
            }
        }
    }
}

/// Everything one planning run needs to see.
#[derive(Debug)]
pub(crate) struct PlanInput<'a> {
    /// Resolved groups for this cycle.
    pub groups: &'a [EntityGroup],
    /// Applied records keyed by activation key.
    pub applied: &'a BTreeMap<EntityKey, AppliedRecord>,
    /// Sticky drift markers.
    pub drift: &'a DriftTracker,
    /// Runtime observations gathered this cycle; a missing key means the
    /// observation failed and drift is not evaluated for it.
    pub observations: &'a BTreeMap<EntityKey, Option<Digest>>,
    /// Whether versions participate in activation identity.
    pub multi_version: bool,
}

/// The planner's output for one cycle.
#[derive(Debug, Default)]
pub(crate) struct Plan {
    /// Bookkeeping applied before runtime execution.
    pub local: Vec<LocalAction>,
    /// Runtime operations, at most one per activation key.
    pub runtime: Vec<Task>,
}

/// Compute the cycle's plan.
pub(crate) fn plan(input: &PlanInput<'_>) -> Plan {
    let mut plan = Plan::default();
    let mut applied_view = input.applied.clone();

    let group_keys: BTreeSet<&EntityKey> = input.groups.iter().map(|g| &g.key).collect();
    let mut location_key: BTreeMap<(String, String), &EntityKey> = BTreeMap::new();
    for group in input.groups {
        for revision in &group.revisions {
            location_key.insert(
                (revision.scheme.clone(), revision.resource.url.clone()),
                &group.key,
            );
        }
    }

    // Applied keys that no longer resolve: the declaration either moved to
    // a new identity or was retracted outright.
    let orphaned: Vec<EntityKey> = applied_view
        .keys()
        .filter(|k| !group_keys.contains(*k))
        .cloned()
        .collect();
    for key in orphaned {
        let Some(record) = applied_view.remove(&key) else {
            continue;
        };
        match location_key.get(&(record.scheme.clone(), record.url.clone())) {
            Some(new_key) => {
                tracing::debug!("migrating applied record {key} -> {new_key}");
                // A record already present at the destination wins; the
                // orphan is stale bookkeeping then.
                if !applied_view.contains_key(*new_key) {
                    let mut migrated = record;
                    migrated.entity = new_key.entity.clone();
                    applied_view.insert((*new_key).clone(), migrated);
                }
                plan.local.push(LocalAction::Migrate {
                    from: key,
                    to: (*new_key).clone(),
                });
            }
            None => plan.runtime.push(Task::Uninstall { key, record }),
        }
    }

    for group in input.groups {
        let key = &group.key;
        let winner = group.winner();
        debug_assert!(
            winner.is_none_or(|w| !w.excluded),
            "resolution produced an excluded winner for {key}"
        );
        let observation = input.observations.get(key);

        if input.drift.is_marked(key) {
            let superseded = match (winner, input.drift.marker(key)) {
                (Some(w), Some(marker)) => w.digest != marker.declared,
                _ => false,
            };
            if !superseded {
                continue;
            }
            // A new digest supersedes the marker; re-sync below. Drift is
            // not re-evaluated on the cycle that clears it.
            plan.local.push(LocalAction::ClearDrift { key: key.clone() });
        } else if let Some(record) = applied_view.get(key) {
            if let Some(observed) = observation {
                if observed.as_ref() != Some(&record.digest) {
                    if let Some(w) = winner.filter(|w| observed.as_ref() == Some(&w.digest)) {
                        // Someone put exactly the desired content there;
                        // take ownership quietly.
                        plan.local.push(LocalAction::Adopt {
                            key: key.clone(),
                            record: AppliedRecord::from_revision(w),
                        });
                    } else {
                        let declared =
                            winner.map_or_else(|| record.digest.clone(), |w| w.digest.clone());
                        plan.local.push(LocalAction::MarkDrift {
                            key: key.clone(),
                            declared,
                            observed: observed.clone(),
                        });
                    }
                    continue;
                }
            }
        }

        match (applied_view.get(key), winner) {
            (None, Some(w)) => {
                if observation.is_some_and(|o| o.as_ref() == Some(&w.digest)) {
                    plan.local.push(LocalAction::Adopt {
                        key: key.clone(),
                        record: AppliedRecord::from_revision(w),
                    });
                } else {
                    plan.runtime.push(Task::Install {
                        key: key.clone(),
                        revision: w.clone(),
                    });
                }
            }
            (Some(record), Some(w)) => {
                if !input.multi_version && record.digest != w.digest {
                    plan.runtime.push(Task::Update {
                        key: key.clone(),
                        revision: w.clone(),
                    });
                }
                // In multi-version operation the version is the identity;
                // content changes within one version are ignored.
            }
            (Some(record), None) => {
                // Every revision is excluded. Exclusion never removes an
                // instance; only an actual retraction does.
                if !location_key.contains_key(&(record.scheme.clone(), record.url.clone())) {
                    plan.runtime.push(Task::Uninstall {
                        key: key.clone(),
                        record: record.clone(),
                    });
                }
            }
            (None, None) => {}
        }
    }

    plan
}
