//! Reconciliation engine resolving declared resources against a managed
//! runtime.
//!
//! Resource providers declare revisions of installable entities under
//! schemes; the engine groups competing revisions per entity, picks one
//! winner, filters it through exclusion policy and drift detection, and
//! drives the managed runtime toward the winning revision with idempotent
//! install/update/uninstall operations. External modifications of runtime
//! instances are detected by polling and park the affected entity in an
//! ignored state instead of being overwritten.
//!
//! All processing happens on a single background worker task owned by an
//! [`Installer`] handle. Registrations are fire-and-forget; results are
//! observed through [`Installer::installation_state`] snapshots and the
//! [`Installer::subscribe`] event channel.

mod engine;
mod error;
mod executor;
mod planner;
mod policy;
mod registry;
mod resolver;
mod snapshot;
mod worker;

pub mod runtime;

// Re-exports
pub use engine::{Installer, InstallerConfig};
pub use error::InstallerError;
pub use policy::{ExclusionError, ExclusionList, ExclusionRule};
pub use runtime::RuntimeAdapter;
