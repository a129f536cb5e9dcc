//! The reconciliation worker.
//!
//! One task owns all mutable engine state: the declaration registry, the
//! applied records, drift markers, and retry bookkeeping. Commands arrive
//! over an unbounded channel and are coalesced, so a burst of
//! registrations triggers a single reconciliation pass. Between commands
//! the worker wakes on its own to retry failed operations and to poll the
//! runtime for external drift.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anneal_schema::{
    Digest, EntityKey, InstallableResource, InstallationEvent, InstallationState, ResourceState,
};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;

use crate::engine::InstallerConfig;
use crate::executor::{self, Outcome, TaskKind};
use crate::planner::{self, LocalAction, PlanInput};
use crate::policy::{DriftMarker, DriftTracker};
use crate::registry::ResourceRegistry;
use crate::resolver::{self, EntityGroup, Revision};
use crate::runtime::RuntimeAdapter;
use crate::snapshot;

/// Commands accepted by the worker.
#[derive(Debug)]
pub(crate) enum Command {
    /// Full replacement of one scheme's declarations.
    Replace {
        /// Scheme being replaced.
        scheme: String,
        /// The scheme's complete new declaration set.
        resources: Vec<InstallableResource>,
        /// Submission sequence number, for idle tracking.
        seq: u64,
    },

    /// Incremental change to one scheme's declarations.
    Delta {
        /// Scheme being changed.
        scheme: String,
        /// Declarations added or replaced.
        upserts: Vec<InstallableResource>,
        /// URLs retracted.
        retracts: Vec<String>,
        /// Submission sequence number, for idle tracking.
        seq: u64,
    },

    /// Stop the worker.
    Shutdown,
}

/// Published after every pass: the snapshot plus idle bookkeeping.
#[derive(Debug, Clone, Default)]
pub(crate) struct EngineStatus {
    /// Snapshot of the last completed pass.
    pub snapshot: InstallationState,
    /// Highest command sequence number absorbed so far.
    pub command_seq: u64,
    /// Activation keys with a failed operation awaiting retry.
    pub pending: usize,
}

#[derive(Debug)]
struct RetryState {
    attempts: u32,
    next_attempt: Instant,
}

pub(crate) struct Worker {
    adapter: Arc<dyn RuntimeAdapter>,
    config: InstallerConfig,
    rx: mpsc::UnboundedReceiver<Command>,
    events: broadcast::Sender<InstallationEvent>,
    status: watch::Sender<EngineStatus>,
    registry: ResourceRegistry,
    applied: BTreeMap<EntityKey, planner::AppliedRecord>,
    drift: DriftTracker,
    retries: BTreeMap<EntityKey, RetryState>,
    command_seq: u64,
}

impl Worker {
    pub(crate) fn new(
        adapter: Arc<dyn RuntimeAdapter>,
        config: InstallerConfig,
        rx: mpsc::UnboundedReceiver<Command>,
        events: broadcast::Sender<InstallationEvent>,
        status: watch::Sender<EngineStatus>,
    ) -> Self {
        Self {
            adapter,
            config,
            rx,
            events,
            status,
            registry: ResourceRegistry::new(),
            applied: BTreeMap::new(),
            drift: DriftTracker::default(),
            retries: BTreeMap::new(),
            command_seq: 0,
        }
    }

    pub(crate) async fn run(mut self) {
        tracing::debug!("reconciliation worker started");
        'run: loop {
            let wake = self.next_wake();
            let mut dirty = false;
            tokio::select! {
                command = self.rx.recv() => match command {
                    Some(Command::Shutdown) | None => break 'run,
                    Some(command) => dirty |= self.apply_command(command),
                },
                () = tokio::time::sleep_until(wake) => {}
            }
            // Coalesce whatever else is already queued into this pass.
            loop {
                match self.rx.try_recv() {
                    Ok(Command::Shutdown) => break 'run,
                    Ok(command) => dirty |= self.apply_command(command),
                    Err(_) => break,
                }
            }
            self.run_pass(dirty).await;
        }
        tracing::debug!("reconciliation worker stopped");
    }

    /// Earliest moment the worker must wake without input: the nearest
    /// retry, bounded by the drift poll interval.
    fn next_wake(&self) -> Instant {
        let poll = Instant::now() + self.config.drift_poll;
        self.retries
            .values()
            .map(|r| r.next_attempt)
            .min()
            .map_or(poll, |due| due.min(poll))
    }

    fn apply_command(&mut self, command: Command) -> bool {
        match command {
            Command::Replace {
                scheme,
                resources,
                seq,
            } => {
                self.command_seq = self.command_seq.max(seq);
                self.registry.replace(&scheme, resources)
            }
            Command::Delta {
                scheme,
                upserts,
                retracts,
                seq,
            } => {
                self.command_seq = self.command_seq.max(seq);
                self.registry.apply_delta(&scheme, upserts, retracts)
            }
            // Shutdown never reaches here; the loop intercepts it.
            Command::Shutdown => false,
        }
    }

    async fn run_pass(&mut self, commands_changed_registry: bool) {
        let revisions = self.collect_revisions();
        let groups = resolver::resolve(revisions, self.config.multi_version);
        let observations = self.gather_observations(&groups).await;

        let plan = planner::plan(&PlanInput {
            groups: &groups,
            applied: &self.applied,
            drift: &self.drift,
            observations: &observations,
            multi_version: self.config.multi_version,
        });

        let mut worked = commands_changed_registry;
        for action in plan.local {
            worked = true;
            self.apply_local(action);
        }

        // Keys the plan no longer targets have nothing left to retry.
        let planned: BTreeSet<EntityKey> =
            plan.runtime.iter().map(|task| task.key().clone()).collect();
        self.retries.retain(|key, _| planned.contains(key));

        let now = Instant::now();
        let mut due = Vec::new();
        for task in plan.runtime {
            if self
                .retries
                .get(task.key())
                .is_none_or(|r| r.next_attempt <= now)
            {
                due.push(task);
            }
        }

        worked |= !due.is_empty();
        for outcome in executor::execute_all(&self.adapter, due).await {
            self.absorb(outcome);
        }

        let snapshot = snapshot::build_snapshot(
            &groups,
            &self.applied,
            &self.drift,
            self.config.multi_version,
        );
        let pending = self.retries.len();
        self.status.send_replace(EngineStatus {
            snapshot,
            command_seq: self.command_seq,
            pending,
        });

        if worked && pending == 0 {
            let _ = self.events.send(InstallationEvent::Suspended);
        }
    }

    /// Resolve every registered declaration to its entity and exclusion
    /// status. A declaration the adapter cannot identify is skipped for
    /// the cycle and reported, never dropped from the registry.
    fn collect_revisions(&self) -> Vec<Revision> {
        let mut revisions = Vec::new();
        for declared in self.registry.iter() {
            match self.adapter.entity_of(&declared.resource) {
                Ok(entity) => {
                    let excluded = self.config.exclusions.matches(
                        &entity,
                        &declared.resource.version,
                        &declared.digest,
                    );
                    revisions.push(Revision {
                        scheme: declared.scheme.clone(),
                        entity,
                        digest: declared.digest.clone(),
                        seq: declared.seq,
                        excluded,
                        resource: declared.resource.clone(),
                    });
                }
                Err(err) => tracing::warn!(
                    "cannot derive entity for {}:{}: {err:#}",
                    declared.scheme,
                    declared.resource.url
                ),
            }
        }
        revisions
    }

    /// Ask the runtime what it currently holds for every key of interest.
    /// A failed observation leaves the key out, which disables drift
    /// evaluation for it this cycle.
    async fn gather_observations(
        &self,
        groups: &[EntityGroup],
    ) -> BTreeMap<EntityKey, Option<Digest>> {
        let mut observations = BTreeMap::new();
        for key in snapshot::observation_targets(groups, &self.applied) {
            match self.adapter.observe(&key).await {
                Ok(observed) => {
                    observations.insert(key, observed);
                }
                Err(err) => tracing::warn!("cannot observe {key}: {err:#}"),
            }
        }
        observations
    }

    fn apply_local(&mut self, action: LocalAction) {
        match action {
            LocalAction::Adopt { key, record } => {
                tracing::info!(
                    "adopted {key} from {}:{}, runtime content already matches",
                    record.scheme,
                    record.url
                );
                self.applied.insert(key, record);
            }
            LocalAction::Migrate { from, to } => {
                tracing::info!("applied record {from} now resolves as {to}");
                if let Some(mut record) = self.applied.remove(&from) {
                    record.entity = to.entity.clone();
                    self.applied.entry(to.clone()).or_insert(record);
                }
                if let Some(marker) = self.drift.clear(&from) {
                    self.drift.mark(to, marker);
                }
            }
            LocalAction::MarkDrift {
                key,
                declared,
                observed,
            } => {
                match &observed {
                    Some(digest) => tracing::warn!(
                        "external modification of {key} detected (runtime digest {digest}), holding as ignored"
                    ),
                    None => tracing::warn!(
                        "external removal of {key} detected, holding as ignored"
                    ),
                }
                if let Some(record) = self.applied.get(&key) {
                    let _ = self.events.send(InstallationEvent::Processed {
                        scheme: record.scheme.clone(),
                        url: record.url.clone(),
                        entity: record.entity.clone(),
                        state: ResourceState::Ignored,
                    });
                }
                self.drift.mark(key, DriftMarker { declared, observed });
            }
            LocalAction::ClearDrift { key } => {
                tracing::info!("new declaration for {key} supersedes recorded drift");
                self.drift.clear(&key);
            }
        }
    }

    fn absorb(&mut self, outcome: Outcome) {
        let Outcome {
            key,
            kind,
            scheme,
            url,
            entity,
            record,
            result,
        } = outcome;
        match result {
            Ok(()) => {
                self.retries.remove(&key);
                let state = match kind {
                    TaskKind::Install | TaskKind::Update => ResourceState::Installed,
                    TaskKind::Uninstall => ResourceState::Uninstalled,
                };
                match record {
                    Some(record) => {
                        self.applied.insert(key.clone(), record);
                    }
                    None => {
                        self.applied.remove(&key);
                        self.drift.clear(&key);
                    }
                }
                tracing::info!("{kind} of {key} from {scheme}:{url} complete");
                let _ = self.events.send(InstallationEvent::Processed {
                    scheme,
                    url,
                    entity,
                    state,
                });
            }
            Err(err) => {
                let entry = self.retries.entry(key.clone()).or_insert(RetryState {
                    attempts: 0,
                    next_attempt: Instant::now(),
                });
                entry.attempts = entry.attempts.saturating_add(1);
                let exponent = entry.attempts.saturating_sub(1).min(16);
                let delay = self
                    .config
                    .retry_backoff
                    .saturating_mul(2u32.saturating_pow(exponent))
                    .min(self.config.retry_backoff_cap);
                entry.next_attempt = Instant::now() + delay;
                tracing::warn!(
                    "{kind} of {key} from {scheme}:{url} failed (attempt {}): {err:#}, next try in {delay:?}",
                    entry.attempts
                );
            }
        }
    }
}
