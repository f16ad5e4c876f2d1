//! Plexus package registry
//!
//! This crate handles the package side of the plugin host: the catalog of
//! installed and available packages, remote package sources, queued
//! downloads, checksum verification, installation and scheduled updates.
//! Loading installed binaries is the engine's job.

pub mod catalog;
pub mod downloader;
pub mod installer;
pub mod source;
pub mod updates;
pub mod verifier;

pub use catalog::PackageCatalog;
pub use downloader::{DownloadConfig, DownloadEvent, DownloadManager};
pub use installer::Installer;
pub use source::{HttpSource, PackageSource, UpdateInfo, UpdateType};
pub use updates::{UpdateCheckReport, UpdateScheduler};

use sdk::errors::EngineError;
use std::path::PathBuf;

/// Default install location: `~/.plexus/plugins`
pub fn default_install_dir() -> Result<PathBuf, EngineError> {
    let home = dirs::home_dir()
        .ok_or_else(|| EngineError::Config("Cannot find home directory".to_string()))?;
    Ok(home.join(".plexus").join("plugins"))
}

/// Default registry file: `~/.plexus/installed.json`
pub fn default_registry_file() -> Result<PathBuf, EngineError> {
    let home = dirs::home_dir()
        .ok_or_else(|| EngineError::Config("Cannot find home directory".to_string()))?;
    Ok(home.join(".plexus").join("installed.json"))
}
