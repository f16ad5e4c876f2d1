//! Loader for plugins linked into the host
//!
//! Hosts that ship some plugins statically register a factory per plugin id.
//! Opening a library file whose id has a factory yields a module backed by
//! that factory; the file itself is still what gets verified and watched.

use crate::loader::{LoadedModule, ModuleLoader};
use crate::platform;
use parking_lot::RwLock;
use sdk::errors::EngineError;
use sdk::Plugin;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Builds a plugin instance; `None` models an entry point returning null
pub type PluginFactory = Arc<dyn Fn() -> Option<Box<dyn Plugin>> + Send + Sync>;

#[derive(Default)]
pub struct StaticRegistry {
    factories: RwLock<HashMap<String, PluginFactory>>,
    open_modules: Arc<AtomicUsize>,
    opened_total: AtomicUsize,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, plugin_id: &str, factory: F)
    where
        F: Fn() -> Option<Box<dyn Plugin>> + Send + Sync + 'static,
    {
        self.factories
            .write()
            .insert(plugin_id.to_string(), Arc::new(factory));
    }

    pub fn unregister(&self, plugin_id: &str) -> bool {
        self.factories.write().remove(plugin_id).is_some()
    }

    /// Modules currently open
    pub fn open_modules(&self) -> usize {
        self.open_modules.load(Ordering::SeqCst)
    }

    /// Modules opened since creation
    pub fn opened_total(&self) -> usize {
        self.opened_total.load(Ordering::SeqCst)
    }
}

impl ModuleLoader for StaticRegistry {
    fn open(&self, path: &Path) -> Result<Arc<dyn LoadedModule>, EngineError> {
        if !path.exists() {
            return Err(EngineError::FileNotFound(path.to_path_buf()));
        }
        if !platform::is_plugin_library(path) {
            return Err(EngineError::InvalidFormat(format!(
                "{} is not a .{} library",
                path.display(),
                platform::library_extension()
            )));
        }
        let id = platform::plugin_id_from_path(path).ok_or_else(|| {
            EngineError::InvalidFormat(format!("cannot derive plugin id from {}", path.display()))
        })?;
        let factory = self.factories.read().get(&id).cloned().ok_or_else(|| {
            EngineError::SymbolNotFound(format!("no plugin entry point registered for '{}'", id))
        })?;

        self.open_modules.fetch_add(1, Ordering::SeqCst);
        self.opened_total.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(StaticModule {
            path: path.to_path_buf(),
            factory,
            open_modules: Arc::clone(&self.open_modules),
        }))
    }
}

struct StaticModule {
    path: PathBuf,
    factory: PluginFactory,
    open_modules: Arc<AtomicUsize>,
}

impl LoadedModule for StaticModule {
    fn path(&self) -> &Path {
        &self.path
    }

    fn create_instance(&self) -> Result<Box<dyn Plugin>, EngineError> {
        (self.factory)().ok_or_else(|| {
            EngineError::InvalidPlugin(format!(
                "entry point of {} returned no instance",
                self.path.display()
            ))
        })
    }
}

impl Drop for StaticModule {
    fn drop(&mut self) {
        self.open_modules.fetch_sub(1, Ordering::SeqCst);
    }
}
