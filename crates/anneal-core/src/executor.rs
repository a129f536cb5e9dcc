//! Runtime task execution.
//!
//! Tasks run in parallel on a [`JoinSet`], one task per activation key.
//! The planner never emits two tasks for the same key in one cycle and
//! cycles never overlap, so operations on any single key are naturally
//! serialized while distinct keys proceed concurrently.

use std::sync::Arc;

use anneal_schema::{EntityId, EntityKey};
use tokio::task::JoinSet;

use crate::planner::{AppliedRecord, Task};
use crate::runtime::RuntimeAdapter;

/// Which operation a task performed, for logs and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskKind {
    /// `RuntimeAdapter::install`.
    Install,
    /// `RuntimeAdapter::update`.
    Update,
    /// `RuntimeAdapter::uninstall`.
    Uninstall,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Install => f.write_str("install"),
            Self::Update => f.write_str("update"),
            Self::Uninstall => f.write_str("uninstall"),
        }
    }
}

/// Result of one executed task, with enough context to report it.
#[derive(Debug)]
pub(crate) struct Outcome {
    /// Activation key the task targeted.
    pub key: EntityKey,
    /// Operation that ran.
    pub kind: TaskKind,
    /// Scheme of the declaration behind the task.
    pub scheme: String,
    /// URL of the declaration behind the task.
    pub url: String,
    /// Entity the key belongs to.
    pub entity: EntityId,
    /// Record to store on success; `None` for uninstalls.
    pub record: Option<AppliedRecord>,
    /// What the adapter said.
    pub result: anyhow::Result<()>,
}

/// Run every task to completion and collect the outcomes.
///
/// A panicking task is logged and dropped; the next cycle re-plans the key
/// from scratch, so nothing is lost beyond the attempt.
pub(crate) async fn execute_all(
    adapter: &Arc<dyn RuntimeAdapter>,
    tasks: Vec<Task>,
) -> Vec<Outcome> {
    let mut set = JoinSet::new();
    for task in tasks {
        let adapter = Arc::clone(adapter);
        set.spawn(async move { execute_one(adapter.as_ref(), task).await });
    }

    let mut outcomes = Vec::with_capacity(set.len());
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(outcome) => outcomes.push(outcome),
            Err(err) => tracing::error!("runtime task panicked: {err}"),
        }
    }
    outcomes
}

async fn execute_one(adapter: &dyn RuntimeAdapter, task: Task) -> Outcome {
    match task {
        Task::Install { key, revision } => {
            tracing::debug!("installing {key} from {}:{}", revision.scheme, revision.resource.url);
            let result = adapter.install(&key, &revision.resource).await;
            let record = AppliedRecord::from_revision(&revision);
            Outcome {
                key,
                kind: TaskKind::Install,
                scheme: record.scheme.clone(),
                url: record.url.clone(),
                entity: record.entity.clone(),
                record: Some(record),
                result,
            }
        }
        Task::Update { key, revision } => {
            tracing::debug!("updating {key} from {}:{}", revision.scheme, revision.resource.url);
            let result = adapter.update(&key, &revision.resource).await;
            let record = AppliedRecord::from_revision(&revision);
            Outcome {
                key,
                kind: TaskKind::Update,
                scheme: record.scheme.clone(),
                url: record.url.clone(),
                entity: record.entity.clone(),
                record: Some(record),
                result,
            }
        }
        Task::Uninstall { key, record } => {
            tracing::debug!("uninstalling {key}");
            let result = adapter.uninstall(&key).await;
            Outcome {
                key,
                kind: TaskKind::Uninstall,
                scheme: record.scheme,
                url: record.url,
                entity: record.entity,
                record: None,
                result,
            }
        }
    }
}
