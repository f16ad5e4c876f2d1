//! Host-side lifecycle status of a plugin

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status tracked by the plugin manager
///
/// `Unknown → Discovered → Loading → Loaded → Initializing → Running`,
/// `Running ⇄ Paused`, then `Stopping → Stopped → Unloading`. `Error` is
/// reachable from every active status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginStatus {
    Unknown,
    Discovered,
    Loading,
    Loaded,
    Initializing,
    Running,
    Paused,
    Stopping,
    Stopped,
    Unloading,
    Error,
}

impl PluginStatus {
    pub fn can_transition_to(self, next: PluginStatus) -> bool {
        use PluginStatus::*;

        if next == Error {
            return self != Error;
        }
        matches!(
            (self, next),
            (Unknown, Discovered)
                | (Unknown, Loading)
                | (Discovered, Loading)
                | (Loading, Loaded)
                | (Loading, Unloading)
                | (Loaded, Initializing)
                | (Loaded, Unloading)
                | (Initializing, Running)
                | (Running, Paused)
                | (Running, Stopping)
                | (Running, Unloading)
                | (Paused, Running)
                | (Paused, Stopping)
                | (Paused, Unloading)
                | (Stopping, Stopped)
                | (Stopped, Initializing)
                | (Stopped, Unloading)
                | (Error, Initializing)
                | (Error, Unloading)
        )
    }

    /// Statuses in which the record holds a live instance
    pub fn has_instance(self) -> bool {
        matches!(
            self,
            PluginStatus::Loaded
                | PluginStatus::Initializing
                | PluginStatus::Running
                | PluginStatus::Paused
                | PluginStatus::Stopping
                | PluginStatus::Stopped
        )
    }
}

impl fmt::Display for PluginStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PluginStatus::Unknown => "unknown",
            PluginStatus::Discovered => "discovered",
            PluginStatus::Loading => "loading",
            PluginStatus::Loaded => "loaded",
            PluginStatus::Initializing => "initializing",
            PluginStatus::Running => "running",
            PluginStatus::Paused => "paused",
            PluginStatus::Stopping => "stopping",
            PluginStatus::Stopped => "stopped",
            PluginStatus::Unloading => "unloading",
            PluginStatus::Error => "error",
        };
        f.write_str(name)
    }
}
