//! Native shared-library loader
//!
//! Loads plugins from `.so`/`.dylib`/`.dll` files exporting the entry points
//! generated by `sdk::declare_plugin!`:
//!
//! - `plexus_plugin_api_version() -> u32`, checked against
//!   [`PLUGIN_API_VERSION`] when the library is opened
//! - `plexus_create_plugin() -> *mut dyn Plugin`, called per instance

use crate::loader::{LoadedModule, ModuleLoader};
use crate::platform;
use sdk::errors::EngineError;
use sdk::plugin::{API_VERSION_SYMBOL, CREATE_PLUGIN_SYMBOL, PLUGIN_API_VERSION};
use sdk::Plugin;
use std::path::{Path, PathBuf};
use std::sync::Arc;

type ApiVersionFn = unsafe extern "C" fn() -> u32;
#[allow(improper_ctypes_definitions)]
type CreatePluginFn = unsafe extern "C" fn() -> *mut dyn Plugin;

/// Loads plugins with `libloading`
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeLoader;

impl NativeLoader {
    pub fn new() -> Self {
        Self
    }
}

impl ModuleLoader for NativeLoader {
    fn open(&self, path: &Path) -> Result<Arc<dyn LoadedModule>, EngineError> {
        if !platform::is_plugin_library(path) {
            return Err(EngineError::InvalidFormat(format!(
                "{} is not a .{} library",
                path.display(),
                platform::library_extension()
            )));
        }

        tracing::debug!("Opening library {}", path.display());
        // SAFETY: loading a library runs its initialisers; the file passed
        // the security gate before reaching this point
        let library = unsafe {
            libloading::Library::new(path).map_err(|e| {
                tracing::error!("Failed to load library {}: {}", path.display(), e);
                EngineError::LibraryLoadFailed(e.to_string())
            })?
        };

        let found = unsafe {
            let version: libloading::Symbol<ApiVersionFn> =
                library.get(API_VERSION_SYMBOL).map_err(|e| {
                    tracing::error!(
                        "Symbol 'plexus_plugin_api_version' not found in {}: {}",
                        path.display(),
                        e
                    );
                    EngineError::SymbolNotFound(e.to_string())
                })?;
            version()
        };
        if found != PLUGIN_API_VERSION {
            return Err(EngineError::ApiVersionMismatch {
                expected: PLUGIN_API_VERSION,
                found,
            });
        }

        unsafe {
            library
                .get::<CreatePluginFn>(CREATE_PLUGIN_SYMBOL)
                .map_err(|e| EngineError::SymbolNotFound(e.to_string()))?;
        }

        Ok(Arc::new(NativeModule {
            path: path.to_path_buf(),
            library,
        }))
    }
}

struct NativeModule {
    path: PathBuf,
    library: libloading::Library,
}

impl LoadedModule for NativeModule {
    fn path(&self) -> &Path {
        &self.path
    }

    fn create_instance(&self) -> Result<Box<dyn Plugin>, EngineError> {
        unsafe {
            let create: libloading::Symbol<CreatePluginFn> =
                self.library.get(CREATE_PLUGIN_SYMBOL).map_err(|e| {
                    tracing::error!(
                        "Symbol 'plexus_create_plugin' not found in {}: {}",
                        self.path.display(),
                        e
                    );
                    EngineError::SymbolNotFound(e.to_string())
                })?;

            let ptr = create();
            if ptr.is_null() {
                tracing::error!("plexus_create_plugin returned null for {}", self.path.display());
                return Err(EngineError::InvalidPlugin(
                    "plexus_create_plugin returned null".to_string(),
                ));
            }
            Ok(Box::from_raw(ptr))
        }
    }
}

impl Drop for NativeModule {
    fn drop(&mut self) {
        tracing::debug!("Closing library {}", self.path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_rejects_wrong_extension() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"text").unwrap();
        assert!(matches!(
            NativeLoader::new().open(&path),
            Err(EngineError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_garbage_library_fails_to_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(platform::library_filename("garbage"));
        std::fs::write(&path, b"definitely not an object file").unwrap();
        assert!(matches!(
            NativeLoader::new().open(&path),
            Err(EngineError::LibraryLoadFailed(_))
        ));
    }
}
