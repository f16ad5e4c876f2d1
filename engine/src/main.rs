// Plexus native plugin host
// Main entry point for the plexus binary

use clap::Parser;
use plexus_engine::cli::{Cli, Command};
use plexus_engine::config::Config;
use plexus_engine::handlers::{
    handle_packages, handle_plugins, handle_policy, handle_trust, OutputFormat,
};
use plexus_engine::telemetry::init_telemetry_with_level;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration (or use custom path if provided)
    let config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };

    // Priority: RUST_LOG > --log > config
    init_telemetry_with_level(cli.log.as_deref().unwrap_or(&config.core.log_level));

    let version = env!("CARGO_PKG_VERSION");
    let commit = env!("GIT_COMMIT_HASH");
    let timestamp = env!("BUILD_TIMESTAMP");

    tracing::debug!("Plexus v{} ({} - {})", version, commit, timestamp);

    // Determine output format
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    match cli.command {
        Command::Plugins { action } => handle_plugins(action, &config, format).await,
        Command::Trust { action } => handle_trust(action, &config, format),
        Command::Packages { action } => handle_packages(action, &config, format).await,
        Command::Policy { action } => handle_policy(action, &config, format),
    }
}
