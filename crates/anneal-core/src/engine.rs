//! The public engine handle.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anneal_schema::{InstallableResource, InstallationEvent, InstallationState};
use tokio::sync::{broadcast, mpsc, watch};

use crate::error::InstallerError;
use crate::policy::ExclusionList;
use crate::runtime::RuntimeAdapter;
use crate::worker::{Command, EngineStatus, Worker};

/// Tunables for one engine instance.
#[derive(Debug, Clone)]
pub struct InstallerConfig {
    /// Treat each version of an entity as its own activation identity,
    /// so several versions can be active side by side.
    pub multi_version: bool,
    /// Static exclusion rules consulted on every pass.
    pub exclusions: ExclusionList,
    /// How often the runtime is polled for external drift when no
    /// commands arrive.
    pub drift_poll: Duration,
    /// Base delay before a failed runtime operation is retried. The delay
    /// doubles per consecutive failure of the same key.
    pub retry_backoff: Duration,
    /// Upper bound for the retry delay.
    pub retry_backoff_cap: Duration,
    /// Event channel capacity; a subscriber that falls behind loses the
    /// oldest events first.
    pub event_capacity: usize,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            multi_version: false,
            exclusions: ExclusionList::default(),
            drift_poll: Duration::from_millis(200),
            retry_backoff: Duration::from_millis(500),
            retry_backoff_cap: Duration::from_secs(10),
            event_capacity: 256,
        }
    }
}

impl InstallerConfig {
    /// Enable or disable side-by-side versions.
    #[must_use]
    pub fn with_multi_version(mut self, enabled: bool) -> Self {
        self.multi_version = enabled;
        self
    }

    /// Install a static exclusion list.
    #[must_use]
    pub fn with_exclusions(mut self, exclusions: ExclusionList) -> Self {
        self.exclusions = exclusions;
        self
    }

    /// Change the drift poll interval.
    #[must_use]
    pub fn with_drift_poll(mut self, interval: Duration) -> Self {
        self.drift_poll = interval;
        self
    }

    /// Change the retry backoff base and cap.
    #[must_use]
    pub fn with_retry_backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.retry_backoff = base;
        self.retry_backoff_cap = cap;
        self
    }
}

struct Shared {
    tx: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<EngineStatus>,
    events: broadcast::Sender<InstallationEvent>,
    submitted: AtomicU64,
}

/// Handle to a running reconciliation engine.
///
/// Clones share the same engine. The background worker stops when
/// [`shutdown`](Installer::shutdown) is called or when the last handle is
/// dropped.
#[derive(Clone)]
pub struct Installer {
    shared: Arc<Shared>,
}

impl fmt::Debug for Installer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Installer").finish_non_exhaustive()
    }
}

impl Installer {
    /// Start an engine over the given runtime adapter.
    ///
    /// Must be called from within a tokio runtime; the worker is spawned
    /// onto it.
    pub fn spawn(adapter: Arc<dyn RuntimeAdapter>, config: InstallerConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(EngineStatus::default());
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let worker = Worker::new(adapter, config, rx, events.clone(), status_tx);
        tokio::spawn(worker.run());
        Self {
            shared: Arc::new(Shared {
                tx,
                status: status_rx,
                events,
                submitted: AtomicU64::new(0),
            }),
        }
    }

    /// Replace every declaration registered under `scheme` with the given
    /// set. Declarations previously registered under the scheme but absent
    /// from `resources` are retracted.
    ///
    /// # Errors
    ///
    /// Returns [`InstallerError::InvalidScheme`] for an empty scheme or
    /// one containing `:`, and [`InstallerError::Closed`] once the engine
    /// has shut down.
    pub fn register_resources(
        &self,
        scheme: impl Into<String>,
        resources: Vec<InstallableResource>,
    ) -> Result<(), InstallerError> {
        let scheme = valid_scheme(scheme.into())?;
        let seq = self.next_seq();
        self.shared
            .tx
            .send(Command::Replace {
                scheme,
                resources,
                seq,
            })
            .map_err(|_| InstallerError::Closed)
    }

    /// Apply an incremental change to `scheme`: `upserts` are added or
    /// replaced, `retracts` names URLs to drop. Declarations not named
    /// are left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`InstallerError::InvalidScheme`] for an empty scheme or
    /// one containing `:`, and [`InstallerError::Closed`] once the engine
    /// has shut down.
    pub fn update_resources(
        &self,
        scheme: impl Into<String>,
        upserts: Vec<InstallableResource>,
        retracts: Vec<String>,
    ) -> Result<(), InstallerError> {
        let scheme = valid_scheme(scheme.into())?;
        let seq = self.next_seq();
        self.shared
            .tx
            .send(Command::Delta {
                scheme,
                upserts,
                retracts,
                seq,
            })
            .map_err(|_| InstallerError::Closed)
    }

    /// The most recently published installation snapshot.
    ///
    /// The snapshot trails command submission; use
    /// [`wait_until_idle`](Installer::wait_until_idle) to observe the
    /// settled outcome of prior registrations.
    pub fn installation_state(&self) -> InstallationState {
        self.shared.status.borrow().snapshot.clone()
    }

    /// Subscribe to processing events.
    ///
    /// Delivery is best-effort; see [`InstallationEvent`].
    pub fn subscribe(&self) -> broadcast::Receiver<InstallationEvent> {
        self.shared.events.subscribe()
    }

    /// Wait until every command submitted through this handle so far has
    /// been absorbed and no runtime operation is pending or awaiting
    /// retry.
    ///
    /// # Errors
    ///
    /// Returns [`InstallerError::IdleTimeout`] when the engine is still
    /// busy after `timeout` (a persistently failing operation keeps the
    /// engine busy indefinitely) and [`InstallerError::Closed`] when the
    /// worker stopped before going idle.
    pub async fn wait_until_idle(&self, timeout: Duration) -> Result<(), InstallerError> {
        let target = self.shared.submitted.load(Ordering::SeqCst);
        let mut status = self.shared.status.clone();
        let settled = async move {
            loop {
                {
                    let current = status.borrow_and_update();
                    if current.command_seq >= target && current.pending == 0 {
                        return Ok(());
                    }
                }
                if status.changed().await.is_err() {
                    return Err(InstallerError::Closed);
                }
            }
        };
        match tokio::time::timeout(timeout, settled).await {
            Ok(result) => result,
            Err(_) => Err(InstallerError::IdleTimeout(timeout)),
        }
    }

    /// Stop the background worker. Idempotent; outstanding handles keep
    /// serving the last published snapshot, while new commands fail with
    /// [`InstallerError::Closed`].
    pub fn shutdown(&self) {
        let _ = self.shared.tx.send(Command::Shutdown);
    }

    fn next_seq(&self) -> u64 {
        self.shared.submitted.fetch_add(1, Ordering::SeqCst) + 1
    }
}

fn valid_scheme(scheme: String) -> Result<String, InstallerError> {
    if scheme.is_empty() || scheme.contains(':') {
        return Err(InstallerError::InvalidScheme(scheme));
    }
    Ok(scheme)
}
