//! CLI interface for Plexus
//!
//! This module provides the command-line interface using clap's derive API.
//! It defines all commands and global flags for inspecting plugins, the trust
//! store, installed packages and the security policy.

use crate::deps::ResolutionStrategy;
use crate::security::TrustLevel;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Plexus native plugin host
///
/// Discovers, verifies and loads native plugin libraries, manages the
/// certificate trust store and resolves package dependencies.
#[derive(Parser, Debug)]
#[command(name = "plexus")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Discover, load, verify and sign plugin libraries
    Plugins {
        #[command(subcommand)]
        action: PluginAction,
    },

    /// Manage the certificate trust store
    Trust {
        #[command(subcommand)]
        action: TrustAction,
    },

    /// Inspect installed packages and resolve dependencies
    Packages {
        #[command(subcommand)]
        action: PackageAction,
    },

    /// Inspect the security policy
    Policy {
        #[command(subcommand)]
        action: PolicyAction,
    },
}

/// Plugin subcommands
#[derive(Subcommand, Debug)]
pub enum PluginAction {
    /// Load every plugin found in a directory and report the outcome
    Scan {
        /// Directory to scan (default: configured plugin directories)
        dir: Option<PathBuf>,

        /// Descend into subdirectories
        #[arg(short, long)]
        recursive: bool,
    },

    /// List plugin libraries in the configured directories
    List,

    /// Verify the signature of a plugin library
    Verify {
        /// Plugin library path
        path: PathBuf,
    },

    /// Sign a plugin library
    Sign {
        /// Plugin library path
        path: PathBuf,

        /// Secret key file (hex)
        #[arg(long, value_name = "PATH")]
        key: PathBuf,

        /// Certificate chain (PEM), signer certificate first
        #[arg(long, value_name = "PATH")]
        cert: PathBuf,

        /// Append the signature to the binary instead of writing a sidecar
        #[arg(long)]
        embedded: bool,
    },

    /// Generate a signing key and a self-signed certificate
    Keygen {
        /// Certificate subject
        subject: String,

        /// Output directory for `<subject>.key` and `<subject>.pem`
        #[arg(short, long, value_name = "DIR", default_value = ".")]
        out: PathBuf,

        /// Certificate validity in days
        #[arg(long, default_value = "365")]
        days: i64,
    },
}

/// Trust store subcommands
#[derive(Subcommand, Debug)]
pub enum TrustAction {
    /// List trust store entries
    List,

    /// Add the first certificate of a PEM file
    Add {
        /// Certificate file (PEM)
        pem: PathBuf,

        /// Trust level (trusted, conditional, untrusted)
        #[arg(short, long, default_value = "trusted")]
        level: TrustLevel,

        /// Free-form note stored with the entry
        #[arg(short, long, default_value = "")]
        description: String,
    },

    /// Import every certificate of a PEM bundle
    Import {
        /// Certificate bundle (PEM)
        pem: PathBuf,

        /// Trust level (trusted, conditional, untrusted)
        #[arg(short, long, default_value = "trusted")]
        level: TrustLevel,
    },

    /// Block a certificate by fingerprint
    Block {
        fingerprint: String,

        /// Reason recorded with the block
        #[arg(short, long, default_value = "blocked by administrator")]
        reason: String,
    },

    /// Lift a block
    Unblock { fingerprint: String },

    /// Remove an entry
    Remove { fingerprint: String },

    /// Drop expired certificates
    Cleanup,
}

/// Package subcommands
#[derive(Subcommand, Debug)]
pub enum PackageAction {
    /// List installed packages
    List {
        /// Also list packages offered by the configured sources
        #[arg(short, long)]
        available: bool,
    },

    /// Plan the installation of one or more packages
    Resolve {
        /// Requirements such as `json-tools`, `json-tools@1.2.0` or `json-tools>=1.0`
        #[arg(required = true)]
        requirements: Vec<String>,

        /// Resolution strategy (default: from configuration)
        #[arg(short, long)]
        strategy: Option<ResolutionStrategy>,
    },

    /// Resolve, download and install one or more packages
    Install {
        /// Requirements such as `json-tools`, `json-tools@1.2.0` or `json-tools>=1.0`
        #[arg(required = true)]
        requirements: Vec<String>,

        /// Resolution strategy (default: from configuration)
        #[arg(short, long)]
        strategy: Option<ResolutionStrategy>,
    },

    /// Uninstall packages
    Remove {
        #[arg(required = true)]
        ids: Vec<String>,

        /// Also remove installed packages that depend on them
        #[arg(short, long)]
        force: bool,
    },

    /// Fetch the package index of every configured source
    Refresh,

    /// Check installed packages for updates
    Updates,
}

/// Policy subcommands
#[derive(Subcommand, Debug)]
pub enum PolicyAction {
    /// Print the effective security policy
    Show,

    /// Evaluate a plugin library against the policy
    Check {
        /// Plugin library path
        path: PathBuf,

        /// Permissions the plugin would request
        #[arg(short, long, value_delimiter = ',')]
        permissions: Vec<String>,
    },
}
