//! Configuration management
//!
//! This module handles loading, validation, and management of the Plexus
//! configuration. Configuration is stored in TOML format at
//! ~/.plexus/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Log level, data directory
//! - **plugins**: Plugin directories, scanning and load checks
//! - **resolver**: Dependency resolution strategy
//! - **security**: Policy file, trust store, revocation
//! - **repository**: Package sources, downloads and installation
//!
//! # Path Expansion
//!
//! Every path setting may start with `~`, which is expanded to the user's
//! home directory during validation.
//!
//! # Examples
//!
//! ```no_run
//! use plexus_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//! println!("Plugin directories: {:?}", config.plugins.directories);
//! # Ok(())
//! # }
//! ```

use crate::deps::ResolutionStrategy;
use crate::manager::LoadOptions;
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Core engine settings
    pub core: CoreConfig,

    /// Plugin loading
    #[serde(default)]
    pub plugins: PluginsConfig,

    /// Dependency resolution
    #[serde(default)]
    pub resolver: ResolverConfig,

    /// Signature verification and policy
    #[serde(default)]
    pub security: SecurityConfig,

    /// Package sources and installation
    #[serde(default)]
    pub repository: RepositoryConfig,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Data directory path (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Plugin loading configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginsConfig {
    /// Directories scanned for plugin libraries
    #[serde(default = "default_plugin_dirs")]
    pub directories: Vec<PathBuf>,

    /// Descend into subdirectories when scanning
    #[serde(default)]
    pub recursive_scan: bool,

    /// Reload plugins whose library changes on disk
    #[serde(default)]
    pub hot_reload: bool,

    /// Quiet period before a changed library is reloaded
    #[serde(default = "default_watch_debounce_ms")]
    pub watch_debounce_ms: u64,

    #[serde(default = "default_true")]
    pub check_dependencies: bool,

    #[serde(default = "default_true")]
    pub validate_signature: bool,

    /// Verify the signature before the library is opened
    #[serde(default = "default_true")]
    pub security_first: bool,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            directories: default_plugin_dirs(),
            recursive_scan: false,
            hot_reload: false,
            watch_debounce_ms: default_watch_debounce_ms(),
            check_dependencies: true,
            validate_signature: true,
            security_first: true,
        }
    }
}

impl PluginsConfig {
    /// Load options derived from these settings
    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            check_dependencies: self.check_dependencies,
            validate_signature: self.validate_signature,
            security_first: self.security_first,
            ..LoadOptions::default()
        }
    }

    pub fn watch_debounce(&self) -> Duration {
        Duration::from_millis(self.watch_debounce_ms)
    }
}

/// Dependency resolution configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolverConfig {
    #[serde(default)]
    pub strategy: ResolutionStrategy,

    /// Resolve development and build dependencies too
    #[serde(default)]
    pub include_dev_dependencies: bool,
}

/// Security configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// JSON policy overrides (supports ~ expansion)
    #[serde(default = "default_policy_file")]
    pub policy_file: PathBuf,

    /// Trust store file (supports ~ expansion)
    #[serde(default = "default_trust_store")]
    pub trust_store: PathBuf,

    /// Revoked serials and fingerprints (supports ~ expansion)
    #[serde(default = "default_revocation_list")]
    pub revocation_list: PathBuf,

    #[serde(default)]
    pub check_revocation: bool,

    /// Record an error for unsigned plugins even when policy allows them
    #[serde(default)]
    pub require_signatures: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            policy_file: default_policy_file(),
            trust_store: default_trust_store(),
            revocation_list: default_revocation_list(),
            check_revocation: false,
            require_signatures: false,
        }
    }
}

/// Package repository configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Base URLs of package sources
    #[serde(default)]
    pub sources: Vec<String>,

    #[serde(default = "default_max_concurrent_downloads")]
    pub max_concurrent_downloads: usize,

    /// Per-request timeout (seconds)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Update channel (stable, beta, ...)
    #[serde(default = "default_channel")]
    pub channel: String,

    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    #[serde(default = "default_install_dir")]
    pub install_dir: PathBuf,

    /// Installed-package registry file
    #[serde(default = "default_registry_file")]
    pub registry_file: PathBuf,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            max_concurrent_downloads: default_max_concurrent_downloads(),
            timeout_secs: default_timeout_secs(),
            channel: default_channel(),
            download_dir: default_download_dir(),
            install_dir: default_install_dir(),
            registry_file: default_registry_file(),
        }
    }
}

impl RepositoryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn download_config(&self) -> plexus_registry::DownloadConfig {
        plexus_registry::DownloadConfig {
            max_concurrent: self.max_concurrent_downloads,
            timeout: self.timeout(),
            download_dir: self.download_dir.clone(),
        }
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.plexus")
}

fn default_plugin_dirs() -> Vec<PathBuf> {
    vec![PathBuf::from("~/.plexus/plugins")]
}

fn default_watch_debounce_ms() -> u64 {
    500
}

fn default_policy_file() -> PathBuf {
    PathBuf::from("~/.plexus/security_policy.json")
}

fn default_trust_store() -> PathBuf {
    PathBuf::from("~/.plexus/trust_store.json")
}

fn default_revocation_list() -> PathBuf {
    PathBuf::from("~/.plexus/revoked.json")
}

fn default_max_concurrent_downloads() -> usize {
    3
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_channel() -> String {
    "stable".to_string()
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("~/.plexus/downloads")
}

fn default_install_dir() -> PathBuf {
    PathBuf::from("~/.plexus/plugins")
}

fn default_registry_file() -> PathBuf {
    PathBuf::from("~/.plexus/installed.json")
}

impl Config {
    /// Load configuration from the default location (~/.plexus/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml(&contents)
    }

    /// Parse and validate configuration text
    pub fn from_toml(contents: &str) -> Result<Self, EngineError> {
        let mut config: Config = toml::from_str(contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate_and_process()?;
        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        // Written before path expansion so the file stays portable
        let config = Self::default_config();
        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;
        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        let mut config = config;
        config.validate_and_process()?;
        Ok(config)
    }

    /// Get the default configuration file path (~/.plexus/config.toml)
    pub fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".plexus").join("config.toml"))
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            core: CoreConfig {
                log_level: default_log_level(),
                data_dir: default_data_dir(),
            },
            plugins: PluginsConfig::default(),
            resolver: ResolverConfig::default(),
            security: SecurityConfig::default(),
            repository: RepositoryConfig::default(),
        }
    }

    /// Validate values and expand ~ in every path
    fn validate_and_process(&mut self) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        if self.repository.max_concurrent_downloads == 0 {
            return Err(EngineError::Config(
                "max_concurrent_downloads must be at least 1".to_string(),
            ));
        }
        if self.repository.timeout_secs == 0 {
            return Err(EngineError::Config(
                "timeout_secs must be at least 1".to_string(),
            ));
        }
        for source in &self.repository.sources {
            if !(source.starts_with("http://") || source.starts_with("https://")) {
                return Err(EngineError::Config(format!(
                    "Invalid package source '{}': must be an http(s) URL",
                    source
                )));
            }
        }

        self.core.data_dir = expand_path(&self.core.data_dir)?;
        self.plugins.directories = self
            .plugins
            .directories
            .iter()
            .map(|dir| expand_path(dir))
            .collect::<Result<_, _>>()?;

        self.security.policy_file = expand_path(&self.security.policy_file)?;
        self.security.trust_store = expand_path(&self.security.trust_store)?;
        self.security.revocation_list = expand_path(&self.security.revocation_list)?;

        self.repository.download_dir = expand_path(&self.repository.download_dir)?;
        self.repository.install_dir = expand_path(&self.repository.install_dir)?;
        self.repository.registry_file = expand_path(&self.repository.registry_file)?;

        Ok(())
    }
}

/// Expand ~ in path to user's home directory
pub fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_creation() {
        let config = Config::default_config();

        assert_eq!(config.core.log_level, "info");
        assert!(config.plugins.check_dependencies);
        assert!(config.plugins.security_first);
        assert_eq!(config.repository.max_concurrent_downloads, 3);
        assert_eq!(config.resolver.strategy, ResolutionStrategy::Latest);
    }

    #[test]
    fn test_expand_path_with_tilde() {
        let path = PathBuf::from("~/test");
        let expanded = expand_path(&path).unwrap();

        let home = dirs::home_dir().unwrap();
        assert_eq!(expanded, home.join("test"));
    }

    #[test]
    fn test_expand_path_without_tilde() {
        let path = PathBuf::from("/absolute/path");
        let expanded = expand_path(&path).unwrap();

        assert_eq!(expanded, path);
    }

    #[test]
    fn test_minimal_config_fills_sections() {
        let config = Config::from_toml("[core]\nlog_level = \"debug\"\n").unwrap();
        assert_eq!(config.core.log_level, "debug");
        assert_eq!(config.repository.channel, "stable");
        assert!(config.security.trust_store.is_absolute());
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(Config::from_toml("[core]\nlog_level = \"loud\"\n").is_err());
        assert!(Config::from_toml(
            "[core]\n[repository]\nmax_concurrent_downloads = 0\n"
        )
        .is_err());
        assert!(Config::from_toml("[core]\n[repository]\nsources = [\"ftp://x\"]\n").is_err());
    }

    #[test]
    fn test_resolver_strategy_parsing() {
        let config =
            Config::from_toml("[core]\n[resolver]\nstrategy = \"conservative\"\n").unwrap();
        assert_eq!(config.resolver.strategy, ResolutionStrategy::Conservative);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default_config();
        let toml_string = toml::to_string(&config).unwrap();

        let deserialized: Config = toml::from_str(&toml_string).unwrap();
        assert_eq!(config.core.log_level, deserialized.core.log_level);
        assert_eq!(
            config.plugins.watch_debounce_ms,
            deserialized.plugins.watch_debounce_ms
        );
    }
}
