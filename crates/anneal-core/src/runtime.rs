//! The seam between the engine and the managed runtime.
//!
//! The engine never talks to the runtime directly; everything goes through
//! a [`RuntimeAdapter`]. Adapters own entity identity (how a declared
//! resource maps to a logical entity), content observation (what the
//! runtime currently holds), and the three apply primitives. All
//! primitives must be idempotent: the engine may re-issue an operation
//! after a failure or a restart, and an adapter asked to install something
//! that already exists should converge rather than fail.

use anyhow::Result;
use async_trait::async_trait;

use anneal_schema::{Digest, EntityId, EntityKey, InstallableResource};

/// Adapter to the managed runtime the engine reconciles against.
///
/// Implementations are shared across concurrently executing operations, so
/// interior state needs its own synchronization. The engine serializes
/// operations per [`EntityKey`]; operations for distinct keys may run in
/// parallel.
#[async_trait]
pub trait RuntimeAdapter: Send + Sync + 'static {
    /// Derive the logical entity identity of a declared resource.
    ///
    /// Called on every processing cycle, never cached by the engine: if
    /// the runtime's identity convention changes (for example after a
    /// runtime upgrade), re-derivation re-groups the declared resources
    /// and the engine migrates its bookkeeping to the new identities
    /// without touching the runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the resource carries no recognizable identity;
    /// such resources are skipped with a warning.
    fn entity_of(&self, resource: &InstallableResource) -> Result<EntityId>;

    /// Report the content digest of the runtime instance for `key`, or
    /// `None` if no instance exists.
    ///
    /// This is the engine's source of truth for external drift: a digest
    /// that differs from what the engine last applied means some other
    /// party modified (or removed) the instance. It is polled every cycle,
    /// so it should be cheap.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime cannot be queried right now; the
    /// engine then skips drift evaluation for `key` this cycle.
    async fn observe(&self, key: &EntityKey) -> Result<Option<Digest>>;

    /// Bring a new instance of `key` into the runtime with the given
    /// revision's content.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime rejects the operation; the engine
    /// keeps its previous state for `key` and retries with backoff.
    async fn install(&self, key: &EntityKey, resource: &InstallableResource) -> Result<()>;

    /// Replace the content of the existing instance of `key` with the
    /// given revision, preserving the instance's runtime identity.
    ///
    /// Downgrades arrive through this primitive too: when a higher
    /// revision is retracted, the engine updates to the best remaining
    /// revision rather than uninstalling.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime rejects the operation; the engine
    /// keeps its previous state for `key` and retries with backoff.
    async fn update(&self, key: &EntityKey, resource: &InstallableResource) -> Result<()>;

    /// Remove the instance of `key` from the runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime rejects the operation; the engine
    /// keeps its previous state for `key` and retries with backoff.
    async fn uninstall(&self, key: &EntityKey) -> Result<()>;
}
