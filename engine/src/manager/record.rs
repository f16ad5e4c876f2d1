//! Plugin table entries and the handles given out to callers

use crate::loader::LoadedModule;
use crate::manager::PluginStatus;
use crate::security::SecurityLevel;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sdk::{Capabilities, Plugin, PluginMetadata};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// Shared access to a plugin instance
///
/// Keeps the plugin's module open while it exists. Fields drop in
/// declaration order, so the instance is always released before the module
/// that contains its code.
#[derive(Clone)]
pub struct PluginHandle {
    instance: Arc<Mutex<Box<dyn Plugin>>>,
    module: Arc<dyn LoadedModule>,
}

impl PluginHandle {
    pub(crate) fn new(instance: Box<dyn Plugin>, module: Arc<dyn LoadedModule>) -> Self {
        Self {
            instance: Arc::new(Mutex::new(instance)),
            module,
        }
    }

    /// Run `f` with exclusive access to the instance
    pub fn with<R>(&self, f: impl FnOnce(&mut dyn Plugin) -> R) -> R {
        let mut guard = self.instance.lock();
        f(guard.as_mut())
    }

    pub fn metadata(&self) -> PluginMetadata {
        self.instance.lock().metadata().clone()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.instance.lock().capabilities()
    }

    pub fn module_path(&self) -> &Path {
        self.module.path()
    }

    /// Whether both handles refer to the same instance
    pub fn same_instance(&self, other: &PluginHandle) -> bool {
        Arc::ptr_eq(&self.instance, &other.instance)
    }
}

impl std::fmt::Debug for PluginHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginHandle")
            .field("module", &self.module.path())
            .finish()
    }
}

/// How a plugin is loaded
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Require the plugin's mandatory dependencies to be loaded
    pub check_dependencies: bool,
    /// Gate the load on the security manager's verdict
    pub validate_signature: bool,
    /// Verify before the binary is opened; otherwise after dependencies
    pub security_first: bool,
    /// Capabilities the instance must declare
    pub required_capabilities: Capabilities,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            check_dependencies: true,
            validate_signature: false,
            security_first: true,
            required_capabilities: Capabilities::NONE,
        }
    }
}

/// A loaded plugin in the manager's table
pub struct PluginRecord {
    pub id: String,
    pub file_path: PathBuf,
    pub uuid: Uuid,
    /// `None` once the record is in `Error` or being unloaded
    pub instance: Option<PluginHandle>,
    pub module: Arc<dyn LoadedModule>,
    pub load_time: DateTime<Utc>,
    pub status: PluginStatus,
    /// Status to return to on resume
    pub previous_status: Option<PluginStatus>,
    pub metadata: PluginMetadata,
    pub capabilities: Capabilities,
    pub security_level: Option<SecurityLevel>,
    pub options: LoadOptions,
    pub reload_count: u32,
}

impl PluginRecord {
    pub fn info(&self) -> PluginInfo {
        PluginInfo {
            id: self.id.clone(),
            name: self.metadata.name.clone(),
            version: self.metadata.version.clone(),
            description: self.metadata.description.clone(),
            author: self.metadata.author.clone(),
            file_path: self.file_path.clone(),
            uuid: self.uuid,
            load_time: self.load_time,
            status: self.status,
            capabilities: self
                .capabilities
                .names()
                .into_iter()
                .map(str::to_string)
                .collect(),
            security_level: self.security_level,
            reload_count: self.reload_count,
        }
    }
}

/// Snapshot of a plugin record for display
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginInfo {
    pub id: String,
    pub name: String,
    pub version: String,
    pub description: String,
    pub author: String,
    pub file_path: PathBuf,
    pub uuid: Uuid,
    pub load_time: DateTime<Utc>,
    pub status: PluginStatus,
    pub capabilities: Vec<String>,
    pub security_level: Option<SecurityLevel>,
    pub reload_count: u32,
}

/// Outcome of a directory scan
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub loaded: Vec<String>,
    pub failed: Vec<(PathBuf, String)>,
}

impl ScanReport {
    pub fn total(&self) -> usize {
        self.loaded.len() + self.failed.len()
    }
}
