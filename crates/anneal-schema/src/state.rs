//! Reported lifecycle states for declared resources.

use serde::{Deserialize, Serialize};

/// The lifecycle state of one declared revision, as reported in snapshots
/// and events.
///
/// `Install` and `Uninstall` are pending states: the engine has decided
/// what should happen but the runtime operation has not completed yet.
/// The remaining states are the processed outcomes of a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceState {
    /// Selected for activation; runtime operation pending.
    Install,
    /// Applied to the runtime by this engine.
    Installed,
    /// Not acted on: superseded by a higher revision, excluded by policy,
    /// or held back because the runtime instance drifted externally.
    Ignored,
    /// Scheduled for removal; runtime operation pending.
    Uninstall,
    /// Removed from the runtime.
    Uninstalled,
}

impl ResourceState {
    /// Whether the state still awaits a runtime operation.
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Install | Self::Uninstall)
    }

    /// Whether the state is a processed outcome.
    pub fn is_processed(self) -> bool {
        !self.is_pending()
    }
}

impl std::fmt::Display for ResourceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Install => "install",
            Self::Installed => "installed",
            Self::Ignored => "ignored",
            Self::Uninstall => "uninstall",
            Self::Uninstalled => "uninstalled",
        };
        write!(f, "{s}")
    }
}
