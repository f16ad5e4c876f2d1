//! Plugin manager
//!
//! Owns the plugin table and drives every plugin through its lifecycle.
//!
//! # Locking
//!
//! The table sits behind a `parking_lot::RwLock`. Queries take the read
//! lock; inserts, removals and status changes take the write lock. Plugin
//! code (opening the binary, `initialize`, `shutdown`, `pause`, ...) never
//! runs while the table lock is held. A load first reserves its id under the
//! write lock, so a concurrent load of the same id fails fast with
//! `AlreadyLoaded`; the reservation is dropped again if the load fails, and
//! nothing is ever partially registered.

pub mod record;
pub mod status;
pub mod watcher;

pub use record::{LoadOptions, PluginHandle, PluginInfo, PluginRecord, ScanReport};
pub use status::PluginStatus;

use crate::deps::DependencyGraph;
use crate::events::{Event, EventBus};
use crate::loader::{LoadedModule, ModuleLoader};
use crate::platform;
use crate::security::{SecurityLevel, SecurityManager};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use sdk::errors::EngineError;
use sdk::{Capabilities, Plugin, PluginMetadata};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use walkdir::WalkDir;
use watcher::HotReloadWatcher;

enum TableEntry {
    /// A load for this id is in flight
    Reserved,
    Loaded(PluginRecord),
}

type PluginTable = HashMap<String, TableEntry>;

/// Holds a `Reserved` slot until the load commits; releases it on drop
struct Reservation<'a> {
    table: &'a RwLock<PluginTable>,
    id: String,
    armed: bool,
}

impl<'a> Reservation<'a> {
    fn acquire(table: &'a RwLock<PluginTable>, id: &str) -> Result<Self, EngineError> {
        let mut guard = table.write();
        if guard.contains_key(id) {
            return Err(EngineError::AlreadyLoaded(id.to_string()));
        }
        guard.insert(id.to_string(), TableEntry::Reserved);
        Ok(Self {
            table,
            id: id.to_string(),
            armed: true,
        })
    }

    fn commit(mut self, record: PluginRecord) {
        self.table
            .write()
            .insert(self.id.clone(), TableEntry::Loaded(record));
        self.armed = false;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut guard = self.table.write();
        if matches!(guard.get(&self.id), Some(TableEntry::Reserved)) {
            guard.remove(&self.id);
        }
    }
}

/// Run plugin teardown code, containing panics
fn guarded<F: FnOnce()>(plugin_id: &str, stage: &str, f: F) -> Result<(), String> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        tracing::error!("Plugin '{}' panicked during {}: {}", plugin_id, stage, message);
        message
    })
}

pub struct PluginManager {
    table: RwLock<PluginTable>,
    loader: Arc<dyn ModuleLoader>,
    security: Option<Arc<SecurityManager>>,
    events: Arc<EventBus>,
    watcher: Mutex<Option<HotReloadWatcher>>,
}

impl PluginManager {
    pub fn new(loader: Arc<dyn ModuleLoader>, events: Arc<EventBus>) -> Self {
        tracing::info!("Initializing PluginManager");
        Self {
            table: RwLock::new(HashMap::new()),
            loader,
            security: None,
            events,
            watcher: Mutex::new(None),
        }
    }

    /// Consult `security` for signatures, permissions and sandboxing
    pub fn with_security(mut self, security: Arc<SecurityManager>) -> Self {
        self.security = Some(security);
        self
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn security(&self) -> Option<&Arc<SecurityManager>> {
        self.security.as_ref()
    }

    /// Load, verify and initialize the plugin at `path`
    ///
    /// Returns the plugin id, derived from the file name. Either every step
    /// succeeds and the plugin is registered as `Running`, or nothing is
    /// registered.
    pub fn load_plugin(&self, path: &Path, options: &LoadOptions) -> Result<String, EngineError> {
        if !path.exists() {
            return Err(EngineError::FileNotFound(path.to_path_buf()));
        }
        let id = platform::plugin_id_from_path(path).ok_or_else(|| {
            EngineError::InvalidFormat(format!("cannot derive plugin id from {}", path.display()))
        })?;

        tracing::info!("Loading plugin: {}", id);
        let reservation = Reservation::acquire(&self.table, &id)?;

        let result = self.load_reserved(&id, path, options);
        match result {
            Ok(record) => {
                reservation.commit(record);
                tracing::info!("Plugin '{}' loaded from {}", id, path.display());
                self.events.emit(Event::PluginLoaded {
                    plugin_id: id.clone(),
                    path: path.to_path_buf(),
                });
                Ok(id)
            }
            Err(e) => {
                tracing::error!("Failed to load plugin '{}': {}", id, e);
                drop(reservation);
                Err(e)
            }
        }
    }

    /// Everything between reserving the id and committing the record
    fn load_reserved(
        &self,
        id: &str,
        path: &Path,
        options: &LoadOptions,
    ) -> Result<PluginRecord, EngineError> {
        let mut verdict = None;
        if options.validate_signature && options.security_first {
            verdict = Some(self.validate_signature(path)?);
        }

        let module: Arc<dyn LoadedModule> = self.loader.open(path)?;
        let mut instance: Box<dyn Plugin> = module.create_instance()?;

        let metadata = instance.metadata().clone();
        if metadata.id.trim().is_empty() {
            return Err(EngineError::InvalidPlugin(format!(
                "{} reports an empty plugin id",
                path.display()
            )));
        }
        if metadata.id != id {
            tracing::warn!(
                "Plugin file {} declares id '{}', registering it as '{}'",
                path.display(),
                metadata.id,
                id
            );
        }

        let capabilities = instance.capabilities();
        if !capabilities.contains(options.required_capabilities) {
            return Err(EngineError::InvalidPlugin(format!(
                "'{}' declares [{}], required [{}]",
                id, capabilities, options.required_capabilities
            )));
        }

        if options.check_dependencies {
            self.check_dependencies(id, &metadata)?;
        }

        if options.validate_signature && !options.security_first {
            verdict = Some(self.validate_signature(path)?);
        }

        let security_level = match &self.security {
            Some(security) => {
                let denied = security.denied_permissions(id, &metadata.permissions);
                if !denied.is_empty() {
                    return Err(EngineError::SecurityViolation(format!(
                        "'{}' requests denied permissions: {}",
                        id,
                        denied.join(", ")
                    )));
                }
                Some(match &verdict {
                    Some(info) => security.level_for(info),
                    None => security.evaluate_security_level(path),
                })
            }
            None => None,
        };

        instance.initialize().map_err(|e| {
            tracing::error!("Plugin '{}' failed to initialize: {}", id, e);
            EngineError::InitializationFailed(format!("{}: {}", id, e))
        })?;

        if let (Some(security), Some(level)) = (&self.security, security_level) {
            security.apply_sandbox(id, level);
        }

        let handle = PluginHandle::new(instance, Arc::clone(&module));
        Ok(PluginRecord {
            id: id.to_string(),
            file_path: path.to_path_buf(),
            uuid: Uuid::new_v4(),
            instance: Some(handle),
            module,
            load_time: Utc::now(),
            status: PluginStatus::Running,
            previous_status: None,
            metadata,
            capabilities,
            security_level,
            options: options.clone(),
            reload_count: 0,
        })
    }

    fn validate_signature(&self, path: &Path) -> Result<crate::security::SignatureInfo, EngineError> {
        let security = self.security.as_ref().ok_or_else(|| {
            EngineError::SecurityViolation(
                "signature validation requested without a security manager".to_string(),
            )
        })?;
        security.validate_plugin(path)
    }

    /// Mandatory dependencies must be loaded at a compatible version
    fn check_dependencies(&self, id: &str, metadata: &PluginMetadata) -> Result<(), EngineError> {
        let table = self.table.read();
        for dependency in &metadata.dependencies {
            if !dependency.dep_type.is_mandatory()
                || !dependency.is_platform_compatible()
                || !dependency.is_architecture_compatible()
                || dependency.name == id
            {
                continue;
            }
            match table.get(&dependency.name) {
                Some(TableEntry::Loaded(record)) => {
                    if !dependency.is_compatible(&record.metadata.version) {
                        return Err(EngineError::DependencyConflict(format!(
                            "'{}' requires {} {}, loaded version is {}",
                            id,
                            dependency.name,
                            dependency.requirement(),
                            record.metadata.version
                        )));
                    }
                }
                _ => {
                    return Err(EngineError::DependencyMissing(format!(
                        "'{}' requires {} {}",
                        id,
                        dependency.name,
                        dependency.requirement()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Loaded plugins with a mandatory dependency on `id`
    fn dependents_of(table: &PluginTable, id: &str) -> Vec<String> {
        let mut dependents: Vec<String> = table
            .iter()
            .filter_map(|(other, entry)| match entry {
                TableEntry::Loaded(record) if other != id => Some(record),
                _ => None,
            })
            .filter(|record| {
                record
                    .metadata
                    .dependencies
                    .iter()
                    .any(|d| d.name == id && d.dep_type.is_mandatory())
            })
            .map(|record| record.id.clone())
            .collect();
        dependents.sort();
        dependents
    }

    /// Shut down and remove a plugin
    ///
    /// Unless `force` is set, a plugin that other loaded plugins require is
    /// left in place and `DependencyConflict` is returned.
    pub fn unload_plugin(&self, id: &str, force: bool) -> Result<(), EngineError> {
        let handle = {
            let mut table = self.table.write();
            let dependents = Self::dependents_of(&table, id);
            let record = match table.get_mut(id) {
                Some(TableEntry::Loaded(record)) => record,
                Some(TableEntry::Reserved) => {
                    return Err(EngineError::InvalidState(format!("'{}' is still loading", id)))
                }
                None => return Err(EngineError::PluginNotFound(id.to_string())),
            };
            if record.status == PluginStatus::Unloading {
                return Err(EngineError::InvalidState(format!("'{}' is already unloading", id)));
            }
            if !force && !dependents.is_empty() {
                return Err(EngineError::DependencyConflict(format!(
                    "'{}' is required by {}",
                    id,
                    dependents.join(", ")
                )));
            }
            record.status = PluginStatus::Unloading;
            record.instance.take()
        };

        tracing::info!("Unloading plugin: {}", id);
        let mut teardown_failed = None;
        if let Some(handle) = handle {
            if let Err(e) = guarded(id, "shutdown", || handle.with(|p| p.shutdown())) {
                teardown_failed = Some(e);
            }
            if let Err(e) = guarded(id, "cleanup", || handle.with(|p| p.cleanup())) {
                teardown_failed = Some(e);
            }
            drop(handle);
        }

        let removed = self.table.write().remove(id);
        drop(removed);

        if let Some(security) = &self.security {
            security.release_sandbox(id);
        }
        if let Some(error) = teardown_failed {
            self.events.emit(Event::PluginError {
                plugin_id: id.to_string(),
                error,
            });
        }
        tracing::info!("Plugin '{}' unloaded", id);
        self.events.emit(Event::PluginUnloaded {
            plugin_id: id.to_string(),
        });
        Ok(())
    }

    /// Unload every plugin, dependents first
    pub fn unload_all(&self) {
        let graph = self.dependency_graph();
        let order = graph.topological_sort().unwrap_or_else(|e| {
            tracing::warn!("Unloading in id order: {}", e);
            graph.node_ids().map(str::to_string).collect()
        });
        for id in order {
            if let Err(e) = self.unload_plugin(&id, true) {
                tracing::warn!("Failed to unload '{}': {}", id, e);
            }
        }
    }

    /// Unload and load again from the same file with the same options
    ///
    /// With `preserve_state` the old instance's `save_state` snapshot is
    /// handed to the new instance; a failed restore is only logged.
    pub fn reload_plugin(&self, id: &str, preserve_state: bool) -> Result<String, EngineError> {
        let (path, options, handle, reload_count) = {
            let table = self.table.read();
            match table.get(id) {
                Some(TableEntry::Loaded(record)) => (
                    record.file_path.clone(),
                    record.options.clone(),
                    record.instance.clone(),
                    record.reload_count,
                ),
                _ => return Err(EngineError::PluginNotFound(id.to_string())),
            }
        };

        tracing::info!("Reloading plugin: {}", id);
        let snapshot = match (&handle, preserve_state) {
            (Some(handle), true) => handle.with(|p| p.save_state()),
            _ => None,
        };
        drop(handle);

        self.unload_plugin(id, true)?;
        let new_id = self.load_plugin(&path, &options)?;

        if let Some(state) = snapshot {
            if let Some(handle) = self.get_plugin(&new_id) {
                if let Err(e) = handle.with(|p| p.restore_state(state)) {
                    tracing::warn!("Plugin '{}' could not restore its state: {}", new_id, e);
                }
            }
        }

        if let Some(TableEntry::Loaded(record)) = self.table.write().get_mut(&new_id) {
            record.reload_count = reload_count + 1;
        }
        self.events.emit(Event::PluginReloaded {
            plugin_id: new_id.clone(),
        });
        Ok(new_id)
    }

    pub fn get_plugin(&self, id: &str) -> Option<PluginHandle> {
        match self.table.read().get(id) {
            Some(TableEntry::Loaded(record)) => record.instance.clone(),
            _ => None,
        }
    }

    /// Ids of loaded plugins, sorted
    pub fn loaded_plugins(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .table
            .read()
            .iter()
            .filter(|(_, entry)| matches!(entry, TableEntry::Loaded(_)))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn is_plugin_loaded(&self, id: &str) -> bool {
        matches!(self.table.read().get(id), Some(TableEntry::Loaded(_)))
    }

    pub fn plugin_status(&self, id: &str) -> Option<PluginStatus> {
        match self.table.read().get(id) {
            Some(TableEntry::Loaded(record)) => Some(record.status),
            _ => None,
        }
    }

    pub fn plugin_info(&self, id: &str) -> Option<PluginInfo> {
        match self.table.read().get(id) {
            Some(TableEntry::Loaded(record)) => Some(record.info()),
            _ => None,
        }
    }

    /// Snapshot of every loaded plugin, sorted by id
    pub fn all_plugin_info(&self) -> Vec<PluginInfo> {
        let mut infos: Vec<PluginInfo> = self
            .table
            .read()
            .values()
            .filter_map(|entry| match entry {
                TableEntry::Loaded(record) => Some(record.info()),
                TableEntry::Reserved => None,
            })
            .collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    pub fn plugins_with_capability(&self, capability: Capabilities) -> Vec<String> {
        let mut ids: Vec<String> = self
            .table
            .read()
            .values()
            .filter_map(|entry| match entry {
                TableEntry::Loaded(record) if record.capabilities.contains(capability) => {
                    Some(record.id.clone())
                }
                _ => None,
            })
            .collect();
        ids.sort();
        ids
    }

    /// Id of the loaded plugin whose library is `path`
    pub fn plugin_for_path(&self, path: &Path) -> Option<String> {
        let candidates: Vec<(String, PathBuf)> = self
            .table
            .read()
            .values()
            .filter_map(|entry| match entry {
                TableEntry::Loaded(record) => Some((record.id.clone(), record.file_path.clone())),
                TableEntry::Reserved => None,
            })
            .collect();
        if let Some((id, _)) = candidates.iter().find(|(_, file)| file == path) {
            return Some(id.clone());
        }

        // Watchers may report canonical paths
        let canonical = path.canonicalize().ok()?;
        candidates
            .into_iter()
            .find(|(_, file)| file.canonicalize().ok().as_deref() == Some(canonical.as_path()))
            .map(|(id, _)| id)
    }

    /// Handle and status of a loaded plugin
    fn live_handle(&self, id: &str) -> Result<(PluginHandle, PluginStatus), EngineError> {
        match self.table.read().get(id) {
            Some(TableEntry::Loaded(record)) => match &record.instance {
                Some(handle) => Ok((handle.clone(), record.status)),
                None => Err(EngineError::InvalidState(format!(
                    "'{}' has no live instance ({})",
                    id, record.status
                ))),
            },
            _ => Err(EngineError::PluginNotFound(id.to_string())),
        }
    }

    /// Move a record to `next`, emitting a status change
    fn set_status(&self, id: &str, next: PluginStatus) {
        let old = {
            let mut table = self.table.write();
            let Some(TableEntry::Loaded(record)) = table.get_mut(id) else {
                return;
            };
            let old = record.status;
            if old == next {
                return;
            }
            if !old.can_transition_to(next) {
                tracing::warn!("Unexpected status change for '{}': {} -> {}", id, old, next);
            }
            if next == PluginStatus::Paused {
                record.previous_status = Some(old);
            }
            if next == PluginStatus::Error {
                record.instance = None;
            }
            record.status = next;
            old
        };
        tracing::debug!("Plugin '{}' status: {} -> {}", id, old, next);
        self.events.emit(Event::PluginStatusChanged {
            plugin_id: id.to_string(),
            old,
            new: next,
        });
    }

    pub fn pause_plugin(&self, id: &str) -> Result<(), EngineError> {
        let (handle, status) = self.live_handle(id)?;
        if status != PluginStatus::Running {
            return Err(EngineError::InvalidState(format!(
                "cannot pause '{}' while {}",
                id, status
            )));
        }
        handle.with(|p| p.pause()).map_err(|e| {
            tracing::warn!("Plugin '{}' failed to pause: {}", id, e);
            e
        })?;
        self.set_status(id, PluginStatus::Paused);
        Ok(())
    }

    pub fn resume_plugin(&self, id: &str) -> Result<(), EngineError> {
        let (handle, status) = self.live_handle(id)?;
        if status != PluginStatus::Paused {
            return Err(EngineError::InvalidState(format!(
                "cannot resume '{}' while {}",
                id, status
            )));
        }
        handle.with(|p| p.resume()).map_err(|e| {
            tracing::warn!("Plugin '{}' failed to resume: {}", id, e);
            e
        })?;
        let previous = match self.table.read().get(id) {
            Some(TableEntry::Loaded(record)) => record.previous_status,
            _ => None,
        };
        self.set_status(id, previous.unwrap_or(PluginStatus::Running));
        Ok(())
    }

    /// `shutdown()` then `initialize()` on the same instance
    ///
    /// A failed initialization leaves the plugin in `Error` without an
    /// instance; it stays in the table until unloaded.
    pub fn restart_plugin(&self, id: &str) -> Result<(), EngineError> {
        let (handle, status) = self.live_handle(id)?;
        if !matches!(
            status,
            PluginStatus::Running | PluginStatus::Paused | PluginStatus::Stopped
        ) {
            return Err(EngineError::InvalidState(format!(
                "cannot restart '{}' while {}",
                id, status
            )));
        }

        tracing::info!("Restarting plugin: {}", id);
        if status != PluginStatus::Stopped {
            self.set_status(id, PluginStatus::Stopping);
            if let Err(e) = guarded(id, "shutdown", || handle.with(|p| p.shutdown())) {
                self.set_status(id, PluginStatus::Error);
                self.events.emit(Event::PluginError {
                    plugin_id: id.to_string(),
                    error: e.clone(),
                });
                return Err(EngineError::Plugin(format!("'{}' panicked during shutdown: {}", id, e)));
            }
            self.set_status(id, PluginStatus::Stopped);
        }

        self.set_status(id, PluginStatus::Initializing);
        match handle.with(|p| p.initialize()) {
            Ok(()) => {
                self.set_status(id, PluginStatus::Running);
                Ok(())
            }
            Err(e) => {
                tracing::error!("Plugin '{}' failed to reinitialize: {}", id, e);
                self.set_status(id, PluginStatus::Error);
                self.events.emit(Event::PluginError {
                    plugin_id: id.to_string(),
                    error: e.to_string(),
                });
                Err(EngineError::InitializationFailed(format!("{}: {}", id, e)))
            }
        }
    }

    pub fn configure_plugin(&self, id: &str, config: &Value) -> Result<(), EngineError> {
        let (handle, _) = self.live_handle(id)?;
        handle.with(|p| p.configure(config))
    }

    pub fn execute_command(
        &self,
        id: &str,
        command: &str,
        params: &Value,
    ) -> Result<Value, EngineError> {
        let (handle, status) = self.live_handle(id)?;
        if status != PluginStatus::Running {
            return Err(EngineError::InvalidState(format!(
                "'{}' is {}, commands need a running plugin",
                id, status
            )));
        }
        tracing::debug!("Executing '{}' on plugin '{}'", command, id);
        handle.with(|p| p.execute_command(command, params))
    }

    /// Load every plugin library in `dir`
    ///
    /// Failures are collected per file. Plugins whose dependencies are
    /// loaded later in the same scan are retried until no more progress is
    /// made.
    pub fn scan_directory(
        &self,
        dir: &Path,
        recursive: bool,
        options: &LoadOptions,
    ) -> Result<ScanReport, EngineError> {
        if !dir.is_dir() {
            return Err(EngineError::FileNotFound(dir.to_path_buf()));
        }

        let mut walker = WalkDir::new(dir).sort_by_file_name().min_depth(1);
        if !recursive {
            walker = walker.max_depth(1);
        }
        let mut pending: Vec<PathBuf> = Vec::new();
        let mut report = ScanReport::default();
        for entry in walker {
            match entry {
                Ok(entry) if entry.file_type().is_file() && platform::is_plugin_library(entry.path()) => {
                    pending.push(entry.into_path());
                }
                Ok(_) => {}
                Err(e) => {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| dir.to_path_buf());
                    tracing::warn!("Cannot read {}: {}", path.display(), e);
                    report.failed.push((path, e.to_string()));
                }
            }
        }
        tracing::info!("Scanning {}: {} candidate(s)", dir.display(), pending.len());

        loop {
            let mut deferred = Vec::new();
            let mut progressed = false;
            let mut last_errors: HashMap<PathBuf, String> = HashMap::new();
            for path in pending {
                match self.load_plugin(&path, options) {
                    Ok(id) => {
                        progressed = true;
                        report.loaded.push(id);
                    }
                    Err(e @ EngineError::DependencyMissing(_)) => {
                        last_errors.insert(path.clone(), e.to_string());
                        deferred.push(path);
                    }
                    Err(e) => {
                        tracing::warn!("Skipping {}: {}", path.display(), e);
                        report.failed.push((path, e.to_string()));
                    }
                }
            }
            if deferred.is_empty() {
                break;
            }
            if !progressed {
                for path in deferred {
                    let reason = last_errors.remove(&path).unwrap_or_default();
                    tracing::warn!("Skipping {}: {}", path.display(), reason);
                    report.failed.push((path, reason));
                }
                break;
            }
            pending = deferred;
        }

        tracing::info!(
            "Scan of {} finished: {} loaded, {} failed",
            dir.display(),
            report.loaded.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Reload plugins when their library changes inside `dirs`
    pub fn enable_hot_reload(
        self: &Arc<Self>,
        dirs: &[PathBuf],
        debounce: Duration,
    ) -> Result<(), EngineError> {
        let watcher = HotReloadWatcher::start(Arc::downgrade(self), dirs, debounce)?;
        *self.watcher.lock() = Some(watcher);
        Ok(())
    }

    pub fn disable_hot_reload(&self) {
        if self.watcher.lock().take().is_some() {
            tracing::info!("Hot reload disabled");
        }
    }

    pub fn is_hot_reload_enabled(&self) -> bool {
        self.watcher.lock().is_some()
    }

    /// Ids of the plugins with a loaded record, including those in `Error`
    pub fn failed_plugins(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .table
            .read()
            .values()
            .filter_map(|entry| match entry {
                TableEntry::Loaded(record) if record.status == PluginStatus::Error => {
                    Some(record.id.clone())
                }
                _ => None,
            })
            .collect();
        ids.sort();
        ids
    }

    /// Security level recorded for a loaded plugin
    pub fn security_level(&self, id: &str) -> Option<SecurityLevel> {
        match self.table.read().get(id) {
            Some(TableEntry::Loaded(record)) => record.security_level,
            _ => None,
        }
    }

    /// Dependency edges between the loaded plugins
    pub fn dependency_graph(&self) -> DependencyGraph {
        let table = self.table.read();
        let mut graph = DependencyGraph::new();
        let loaded: HashSet<&String> = table
            .iter()
            .filter(|(_, entry)| matches!(entry, TableEntry::Loaded(_)))
            .map(|(id, _)| id)
            .collect();
        for entry in table.values() {
            if let TableEntry::Loaded(record) = entry {
                graph.add_node(&record.id);
                for dependency in &record.metadata.dependencies {
                    if loaded.contains(&dependency.name) {
                        graph.add_edge(&record.id, &dependency.name);
                    }
                }
            }
        }
        graph
    }
}

impl Drop for PluginManager {
    fn drop(&mut self) {
        self.disable_hot_reload();
        self.unload_all();
    }
}
