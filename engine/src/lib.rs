//! Plexus Engine Library
//!
//! The plugin host: loading and lifecycle of native plugins, dependency
//! resolution, signature verification and security policy.
//! It is used by both the main binary and integration tests.

/// Configuration management module
pub mod config;

/// Signing keys and hashing
pub mod crypto;

/// Dependency graph and resolution
pub mod deps;

/// Host event bus
pub mod events;

/// Opening plugin modules
pub mod loader;

/// Plugin table and lifecycle
pub mod manager;

/// Package install, removal and update checks
pub mod packages;

/// Trust store, signature verification and policy
pub mod security;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;

/// Platform-specific utilities module
pub mod platform;

pub use events::{Event, EventBus, EventType};
pub use loader::{LoadedModule, ModuleLoader, NativeLoader, StaticRegistry};
pub use manager::{LoadOptions, PluginHandle, PluginInfo, PluginManager, PluginStatus};
pub use packages::PackageService;
pub use security::{SecurityManager, TrustLevel, VerificationStatus};
