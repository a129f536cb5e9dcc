//! Engine lifecycle notifications.

use serde::{Deserialize, Serialize};

use crate::state::ResourceState;
use crate::types::EntityId;

/// A notification published on the engine's event channel.
///
/// Delivery is best-effort and at-least-once: rapid state changes may
/// coalesce, and a subscriber that falls behind loses the oldest events.
/// Consumers that need certainty poll the installation-state snapshot
/// instead and treat events as a wakeup hint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstallationEvent {
    /// A declared resource finished a processing step and now reports the
    /// given state.
    Processed {
        /// Scheme the resource was registered under.
        scheme: String,
        /// Scheme-relative location of the revision that was processed.
        url: String,
        /// Entity the revision resolved to.
        entity: EntityId,
        /// State the revision reports after processing.
        state: ResourceState,
    },

    /// A processing cycle completed with no pending work; the engine is
    /// idle until new declarations, a due retry, or observed drift wake it.
    Suspended,
}
