//! Error types and handling
//!
//! This module provides the error type used throughout the Plexus host and by
//! plugins. Every variant maps onto a coarse [`ErrorKind`] so callers can branch
//! on the category of failure without matching every variant, and all errors
//! implement [`PlexusErrorExt`] for user-facing hints.

use std::path::PathBuf;
use thiserror::Error;

/// Trait for Plexus error extensions
///
/// Provides additional context for errors: a user-friendly hint and whether
/// the failure is worth retrying.
pub trait PlexusErrorExt {
    /// Returns a user-friendly hint for the error
    ///
    /// The hint is safe to display to end users and does not contain paths
    /// or internal implementation details.
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors can be retried or worked around. Non-recoverable
    /// errors typically require replacing the plugin binary or fixing trust.
    fn is_recoverable(&self) -> bool;
}

/// Machine-checkable category of an [`EngineError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    InvalidFormat,
    StateError,
    DependencyMissing,
    DependencyConflict,
    SecurityViolation,
    InitializationFailed,
    IoError,
    NetworkError,
    Configuration,
    PluginFailure,
}

/// Main engine error type
///
/// # Examples
///
/// ```
/// use sdk::errors::{EngineError, ErrorKind, PlexusErrorExt};
///
/// let error = EngineError::PluginNotFound("audio".to_string());
/// assert_eq!(error.kind(), ErrorKind::NotFound);
/// assert!(error.is_recoverable());
///
/// let fatal = EngineError::InvalidSignature("bad chain".to_string());
/// assert_eq!(fatal.kind(), ErrorKind::SecurityViolation);
/// assert!(!fatal.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Lookup errors
    #[error("File not found: {0:?}")]
    FileNotFound(PathBuf),

    #[error("Plugin not found: {0}")]
    PluginNotFound(String),

    #[error("Package not found: {0}")]
    PackageNotFound(String),

    #[error("Certificate not found: {0}")]
    CertificateNotFound(String),

    // Duplicate errors
    #[error("Plugin already loaded: {0}")]
    AlreadyLoaded(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    // Binary and metadata format errors
    #[error("Invalid plugin: {0}")]
    InvalidPlugin(String),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Library load failed: {0}")]
    LibraryLoadFailed(String),

    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("Incompatible plugin API version: expected {expected}, found {found}")]
    ApiVersionMismatch { expected: u32, found: u32 },

    // Lifecycle errors
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    // Dependency errors
    #[error("Missing dependency: {0}")]
    DependencyMissing(String),

    #[error("Dependency conflict: {0}")]
    DependencyConflict(String),

    #[error("Circular dependency: {}", .0.join(" -> "))]
    CircularDependency(Vec<String>),

    // Security errors
    #[error("Security violation: {0}")]
    SecurityViolation(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Hash mismatch for {0}")]
    HashMismatch(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    // Plugin command errors
    #[error("Plugin error: {0}")]
    Plugin(String),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    // Persistence errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::FileNotFound(_)
            | Self::PluginNotFound(_)
            | Self::PackageNotFound(_)
            | Self::CertificateNotFound(_) => ErrorKind::NotFound,

            Self::AlreadyLoaded(_) | Self::AlreadyExists(_) => ErrorKind::AlreadyExists,

            Self::InvalidPlugin(_)
            | Self::InvalidFormat(_)
            | Self::LibraryLoadFailed(_)
            | Self::SymbolNotFound(_)
            | Self::ApiVersionMismatch { .. }
            | Self::Serialization(_) => ErrorKind::InvalidFormat,

            Self::InvalidState(_) | Self::Cancelled(_) => ErrorKind::StateError,
            Self::InitializationFailed(_) => ErrorKind::InitializationFailed,

            Self::DependencyMissing(_) => ErrorKind::DependencyMissing,
            Self::DependencyConflict(_) | Self::CircularDependency(_) => {
                ErrorKind::DependencyConflict
            }

            Self::SecurityViolation(_)
            | Self::InvalidSignature(_)
            | Self::HashMismatch(_)
            | Self::PermissionDenied(_) => ErrorKind::SecurityViolation,

            Self::Plugin(_) | Self::UnknownCommand(_) => ErrorKind::PluginFailure,
            Self::Config(_) => ErrorKind::Configuration,
            Self::Network(_) | Self::Timeout(_) => ErrorKind::NetworkError,
            Self::Io(_) => ErrorKind::IoError,
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl PlexusErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::FileNotFound(_) => "The plugin file does not exist",
            Self::PluginNotFound(_) => "No plugin with that id is loaded",
            Self::PackageNotFound(_) => "Package not found. Try refreshing the repository",
            Self::CertificateNotFound(_) => "Certificate is not in the trust store",

            Self::AlreadyLoaded(_) => "Unload the plugin before loading it again",
            Self::AlreadyExists(_) => "The item already exists",

            Self::InvalidPlugin(_) => "The file is not a compatible plugin",
            Self::InvalidFormat(_) => "The file is corrupted or in an unknown format",
            Self::LibraryLoadFailed(_) => "Failed to load the plugin library",
            Self::SymbolNotFound(_) => "The library does not export a plugin entry point",
            Self::ApiVersionMismatch { .. } => "Rebuild the plugin against the current SDK",

            Self::InvalidState(_) => "Operation not valid in the plugin's current state",
            Self::InitializationFailed(_) => "Plugin failed to start. Check plugin logs",

            Self::DependencyMissing(_) => "Install the missing dependencies first",
            Self::DependencyConflict(_) => "Conflicting dependency requirements",
            Self::CircularDependency(_) => "Packages depend on each other in a cycle",

            Self::SecurityViolation(_) => "Blocked by the security policy",
            Self::InvalidSignature(_) => "Security verification failed. File may be tampered",
            Self::HashMismatch(_) => "Security verification failed. File may be corrupted",
            Self::PermissionDenied(_) => "The plugin requested a permission that is not allowed",

            Self::Plugin(_) => "Plugin operation failed",
            Self::UnknownCommand(_) => "The plugin does not support that command",

            Self::Config(_) => "Check your config.toml file for errors",

            Self::Network(_) => "Network operation failed. Check your connection",
            Self::Timeout(_) => "The operation took too long. Try again",
            Self::Cancelled(_) => "The operation was cancelled",

            Self::Serialization(_) => "Stored data could not be read or written",
            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            // Non-recoverable errors
            Self::InvalidSignature(_)
            | Self::HashMismatch(_)
            | Self::SecurityViolation(_)
            | Self::CircularDependency(_)
            | Self::ApiVersionMismatch { .. }
            | Self::LibraryLoadFailed(_)
            | Self::SymbolNotFound(_) => false,

            // All other errors are potentially recoverable
            _ => true,
        }
    }
}
