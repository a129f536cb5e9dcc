//! Domain-specific errors for the engine API surface.
//!
//! Nothing the engine encounters while processing is fatal: registration
//! conflicts resolve last-write-wins, failed runtime operations are retried
//! with backoff, and drift parks an entity instead of erroring. The
//! variants here cover only what a *caller* can get wrong or needs to
//! handle.

use std::time::Duration;
use thiserror::Error;

use crate::policy::ExclusionError;

/// Errors surfaced by [`Installer`](crate::Installer) methods.
#[derive(Error, Debug)]
pub enum InstallerError {
    /// The background worker is gone (the engine was shut down).
    #[error("Engine is shut down")]
    Closed,

    /// The engine did not become idle within the allowed time.
    #[error("Engine did not reach idle within {0:?}")]
    IdleTimeout(Duration),

    /// A scheme name was empty or contained a `:` separator.
    #[error("Invalid scheme name: '{0}'")]
    InvalidScheme(String),

    /// The exclusion-list configuration could not be loaded.
    #[error("Failed to load exclusion list: {0}")]
    Exclusions(#[from] ExclusionError),
}
