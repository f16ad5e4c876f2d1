//! Module loading
//!
//! The plugin manager never touches `libloading` directly. It opens binaries
//! through a [`ModuleLoader`] and instantiates plugins from the resulting
//! [`LoadedModule`]. The module stays open for as long as any `Arc` to it is
//! alive and is closed exactly once, when the last one drops.

pub mod native;
pub mod static_registry;

pub use native::NativeLoader;
pub use static_registry::{PluginFactory, StaticRegistry};

use sdk::errors::EngineError;
use sdk::Plugin;
use std::path::Path;
use std::sync::Arc;

/// Opens plugin binaries
pub trait ModuleLoader: Send + Sync {
    /// Open the binary at `path` and check its entry points
    fn open(&self, path: &Path) -> Result<Arc<dyn LoadedModule>, EngineError>;
}

/// An opened plugin binary
pub trait LoadedModule: Send + Sync {
    fn path(&self) -> &Path;

    /// Construct a fresh plugin instance
    ///
    /// Fails with `SymbolNotFound` if the entry point is missing and with
    /// `InvalidPlugin` if it returns no instance.
    fn create_instance(&self) -> Result<Box<dyn Plugin>, EngineError>;
}
