//! Shared types for the anneal reconciliation engine.
//!
//! This crate defines the vocabulary spoken on both sides of the engine:
//! resource providers declare [`InstallableResource`]s, the engine reports
//! back through [`InstallationState`] snapshots and [`InstallationEvent`]s,
//! and runtime adapters are addressed by [`EntityKey`]. It is deliberately
//! free of engine logic so adapters and callers can depend on it without
//! pulling in the engine itself.

pub mod digest;
pub mod event;
pub mod resource;
pub mod snapshot;
pub mod state;
pub mod types;

// Re-exports
pub use digest::{Digest, DigestError};
pub use event::InstallationEvent;
pub use resource::{Attributes, EntityKey, InstallableResource, ResourceError};
pub use snapshot::{InstallationState, ResourceGroup, ResourceInfo};
pub use state::ResourceState;
pub use types::{EntityId, Version};
