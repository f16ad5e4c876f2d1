//! Plexus SDK
//!
//! Shared library providing the plugin contract, error types, and package
//! metadata. This crate is used by the host engine, the package registry,
//! and by every plugin.

/// Plugin trait, capability bitset, and native entry points
pub mod plugin;

/// Error types and handling
pub mod errors;

/// Package and dependency metadata
pub mod manifest;

// Re-export commonly used types
pub use errors::{EngineError, ErrorKind, PlexusErrorExt};
pub use manifest::{DependencyConstraint, DependencyType, PackageState, PluginPackage};
pub use plugin::{Capabilities, Plugin, PluginMetadata, PluginState, PLUGIN_API_VERSION};
