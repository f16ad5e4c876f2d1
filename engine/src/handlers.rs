//! Command handlers for CLI operations
//!
//! Each handler builds the components it needs from the configuration,
//! performs one operation and prints the result as text or JSON.

use anyhow::{bail, Context, Result};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cli::{PackageAction, PluginAction, PolicyAction, TrustAction};
use crate::config::Config;
use crate::crypto::KeyPair;
use crate::deps::{DependencyResolver, ResolutionResult, ResolutionStrategy};
use crate::events::{Event, EventBus, EventType};
use crate::loader::NativeLoader;
use crate::manager::PluginManager;
use crate::platform;
use crate::security::{
    PluginCertificate, PluginSigner, SecurityManager, SignatureInfo, TrustStore, VerificationStatus,
};
use crate::packages::PackageService;
use sdk::manifest::DependencyConstraint;

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn security_manager(config: &Config, events: Option<Arc<EventBus>>) -> Result<Arc<SecurityManager>> {
    let manager = SecurityManager::from_config(&config.security, events)
        .context("Failed to initialize security manager")?;
    Ok(Arc::new(manager))
}

fn plugin_manager(config: &Config) -> Result<Arc<PluginManager>> {
    let events = Arc::new(EventBus::new());
    let security = security_manager(config, Some(Arc::clone(&events)))?;
    let manager = PluginManager::new(Arc::new(NativeLoader::new()), events).with_security(security);
    Ok(Arc::new(manager))
}

fn trust_store(config: &Config) -> Result<TrustStore> {
    TrustStore::open(&config.security.trust_store, None).with_context(|| {
        format!(
            "Failed to open trust store {}",
            config.security.trust_store.display()
        )
    })
}

fn plugin_files(dir: &Path, recursive: bool) -> Vec<PathBuf> {
    let mut walker = walkdir::WalkDir::new(dir).min_depth(1).sort_by_file_name();
    if !recursive {
        walker = walker.max_depth(1);
    }
    walker
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file() && platform::is_plugin_library(entry.path()))
        .map(|entry| entry.into_path())
        .collect()
}

fn print_signature(info: &SignatureInfo) {
    println!("{}: {:?}", info.path.display(), info.status);
    if let Some(signer) = &info.signer {
        println!("  Signer:      {}", signer);
    }
    if let Some(issuer) = &info.issuer {
        println!("  Issuer:      {}", issuer);
    }
    if let Some(fingerprint) = &info.fingerprint {
        println!("  Fingerprint: {}", fingerprint);
    }
    if let Some(level) = info.trust_level {
        println!("  Trust:       {:?}", level);
    }
    if let Some(signed_at) = info.signed_at {
        println!("  Signed at:   {}", signed_at.to_rfc3339());
    }
    if info.status != VerificationStatus::NotSigned {
        println!(
            "  Location:    {}",
            if info.embedded { "embedded" } else { "sidecar" }
        );
    }
    for error in &info.errors {
        println!("  Error:       {}", error);
    }
}

/// Dispatch a `plugins` subcommand
pub async fn handle_plugins(action: PluginAction, config: &Config, format: OutputFormat) -> Result<()> {
    match action {
        PluginAction::Scan { dir, recursive } => {
            handle_plugins_scan(dir, recursive || config.plugins.recursive_scan, config, format)
        }
        PluginAction::List => handle_plugins_list(config, format),
        PluginAction::Verify { path } => handle_plugins_verify(&path, config, format),
        PluginAction::Sign {
            path,
            key,
            cert,
            embedded,
        } => handle_plugins_sign(&path, &key, &cert, embedded, format),
        PluginAction::Keygen { subject, out, days } => {
            handle_plugins_keygen(&subject, &out, days, format)
        }
    }
}

/// Load every plugin in the given (or configured) directories, report, then unload
pub fn handle_plugins_scan(
    dir: Option<PathBuf>,
    recursive: bool,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let dirs = match dir {
        Some(dir) => vec![dir],
        None => config.plugins.directories.clone(),
    };
    if dirs.is_empty() {
        bail!("No plugin directories configured; pass a directory to scan");
    }

    let manager = plugin_manager(config)?;
    let options = config.plugins.load_options();
    let mut reports = Vec::new();
    for dir in &dirs {
        let report = manager
            .scan_directory(dir, recursive, &options)
            .with_context(|| format!("Failed to scan {}", dir.display()))?;
        reports.push((dir.clone(), report));
    }
    let plugins = manager.all_plugin_info();

    match format {
        OutputFormat::Text => {
            for (dir, report) in &reports {
                println!(
                    "{}: {} loaded, {} failed",
                    dir.display(),
                    report.loaded.len(),
                    report.failed.len()
                );
                for (path, error) in &report.failed {
                    println!("  FAILED {}: {}", path.display(), error);
                }
            }
            if !plugins.is_empty() {
                println!();
                println!("Loaded plugins:");
                for info in &plugins {
                    println!(
                        "  {} v{} [{}] security: {}",
                        info.id,
                        info.version,
                        info.status,
                        info.security_level
                            .map(|level| format!("{:?}", level))
                            .unwrap_or_else(|| "-".to_string())
                    );
                }
            }
        }
        OutputFormat::Json => {
            let scans: Vec<_> = reports
                .iter()
                .map(|(dir, report)| json!({ "directory": dir, "report": report }))
                .collect();
            print_json(&json!({ "scans": scans, "plugins": plugins }))?;
        }
    }

    manager.unload_all();
    Ok(())
}

/// List plugin libraries in the configured directories with their signature status
pub fn handle_plugins_list(config: &Config, format: OutputFormat) -> Result<()> {
    let security = security_manager(config, None)?;
    let mut entries = Vec::new();
    for dir in &config.plugins.directories {
        if !dir.is_dir() {
            tracing::debug!("Skipping missing plugin directory {}", dir.display());
            continue;
        }
        for path in plugin_files(dir, config.plugins.recursive_scan) {
            let info = security.verify_plugin(&path);
            let level = security.level_for(&info);
            entries.push((path, info, level));
        }
    }

    match format {
        OutputFormat::Text => {
            if entries.is_empty() {
                println!("No plugin libraries found.");
                return Ok(());
            }
            println!("Plugin libraries:");
            println!();
            for (path, info, level) in &entries {
                println!(
                    "  {} ({:?}, {:?})",
                    platform::plugin_id_from_path(path).unwrap_or_default(),
                    info.status,
                    level
                );
                println!("    {}", path.display());
            }
        }
        OutputFormat::Json => {
            let plugins: Vec<_> = entries
                .iter()
                .map(|(path, info, level)| {
                    json!({
                        "id": platform::plugin_id_from_path(path),
                        "path": path,
                        "signature": info,
                        "securityLevel": level,
                    })
                })
                .collect();
            print_json(&json!({ "plugins": plugins }))?;
        }
    }
    Ok(())
}

pub fn handle_plugins_verify(path: &Path, config: &Config, format: OutputFormat) -> Result<()> {
    if !path.exists() {
        bail!("File not found: {}", path.display());
    }
    let security = security_manager(config, None)?;
    let info = security.verify_plugin(path);
    let level = security.level_for(&info);

    match format {
        OutputFormat::Text => {
            print_signature(&info);
            println!("  Security:    {:?}", level);
        }
        OutputFormat::Json => print_json(&json!({ "signature": info, "securityLevel": level }))?,
    }
    Ok(())
}

pub fn handle_plugins_sign(
    path: &Path,
    key: &Path,
    cert: &Path,
    embedded: bool,
    format: OutputFormat,
) -> Result<()> {
    let keys = KeyPair::load(key).with_context(|| format!("Failed to read key {}", key.display()))?;
    let pem = std::fs::read_to_string(cert)
        .with_context(|| format!("Failed to read certificate {}", cert.display()))?;
    let chain = PluginCertificate::parse_pem_bundle(&pem)?;
    let signer = PluginSigner::new(keys, chain)?;

    let written = if embedded {
        signer.sign_embedded(path)?;
        path.to_path_buf()
    } else {
        signer.sign_sidecar(path)?
    };

    match format {
        OutputFormat::Text => println!(
            "Signed {} as '{}' -> {}",
            path.display(),
            signer.certificate().subject,
            written.display()
        ),
        OutputFormat::Json => print_json(&json!({
            "path": path,
            "signer": signer.certificate().subject,
            "fingerprint": signer.certificate().fingerprint(),
            "embedded": embedded,
            "output": written,
        }))?,
    }
    Ok(())
}

pub fn handle_plugins_keygen(subject: &str, out: &Path, days: i64, format: OutputFormat) -> Result<()> {
    if days <= 0 {
        bail!("Validity must be at least one day");
    }
    std::fs::create_dir_all(out)
        .with_context(|| format!("Failed to create {}", out.display()))?;

    let keys = KeyPair::generate();
    let certificate = PluginCertificate::self_signed(subject, &keys, chrono::Duration::days(days));
    let key_path = out.join(format!("{}.key", subject));
    let cert_path = out.join(format!("{}.pem", subject));
    keys.save(&key_path)?;
    std::fs::write(&cert_path, certificate.to_pem())?;

    match format {
        OutputFormat::Text => {
            println!("Key:         {}", key_path.display());
            println!("Certificate: {}", cert_path.display());
            println!("Fingerprint: {}", certificate.fingerprint());
        }
        OutputFormat::Json => print_json(&json!({
            "key": key_path,
            "certificate": cert_path,
            "fingerprint": certificate.fingerprint(),
            "notAfter": certificate.not_after,
        }))?,
    }
    Ok(())
}

/// Dispatch a `trust` subcommand
pub fn handle_trust(action: TrustAction, config: &Config, format: OutputFormat) -> Result<()> {
    let store = trust_store(config)?;

    let outcome = match action {
        TrustAction::List => {
            let entries = store.entries();
            match format {
                OutputFormat::Text => {
                    if entries.is_empty() {
                        println!("Trust store is empty.");
                    }
                    for entry in &entries {
                        println!(
                            "  {} {:?}{} '{}'",
                            entry.fingerprint,
                            entry.trust_level,
                            if entry.is_enabled { "" } else { " (disabled)" },
                            entry.subject
                        );
                        if let Some(reason) = &entry.block_reason {
                            println!("    blocked: {}", reason);
                        }
                    }
                }
                OutputFormat::Json => print_json(&json!({ "entries": entries }))?,
            }
            return Ok(());
        }
        TrustAction::Add {
            pem,
            level,
            description,
        } => {
            let contents = std::fs::read_to_string(&pem)
                .with_context(|| format!("Failed to read {}", pem.display()))?;
            let certificate = PluginCertificate::from_pem(&contents)?;
            let fingerprint = store.add_certificate(&certificate, level, &description)?;
            json!({ "added": [fingerprint] })
        }
        TrustAction::Import { pem, level } => {
            let added = store.import_certificate(&pem, level)?;
            json!({ "added": added })
        }
        TrustAction::Block {
            fingerprint,
            reason,
        } => {
            store.block_certificate(&fingerprint, &reason);
            json!({ "blocked": fingerprint })
        }
        TrustAction::Unblock { fingerprint } => {
            store.unblock_certificate(&fingerprint)?;
            json!({ "unblocked": fingerprint })
        }
        TrustAction::Remove { fingerprint } => {
            store.remove_certificate(&fingerprint)?;
            json!({ "removed": fingerprint })
        }
        TrustAction::Cleanup => {
            let removed = store.cleanup_expired();
            json!({ "removed": removed })
        }
    };

    store.save().context("Failed to save trust store")?;
    match format {
        OutputFormat::Text => {
            for (action, value) in outcome.as_object().into_iter().flatten() {
                match value {
                    serde_json::Value::Array(items) => {
                        println!("{} {} certificate(s)", capitalize(action), items.len());
                        for item in items {
                            println!("  {}", item.as_str().unwrap_or_default());
                        }
                    }
                    other => println!("{} {}", capitalize(action), other.as_str().unwrap_or_default()),
                }
            }
        }
        OutputFormat::Json => print_json(&outcome)?,
    }
    Ok(())
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn package_service(config: &Config, events: Arc<EventBus>) -> Result<PackageService> {
    PackageService::from_config(config, events).with_context(|| {
        format!(
            "Failed to open package registry {}",
            config.repository.registry_file.display()
        )
    })
}

fn parse_requirements(requirements: &[String]) -> Result<Vec<DependencyConstraint>> {
    requirements
        .iter()
        .map(|requirement| {
            DependencyConstraint::parse(requirement)
                .with_context(|| format!("Invalid requirement '{}'", requirement))
        })
        .collect()
}

/// Print download and install progress as it is published
fn report_progress(events: &EventBus) {
    events.subscribe(EventType::All, |event| match event {
        Event::DownloadStarted { package_id } => println!("Downloading {}...", package_id),
        Event::DownloadFailed { package_id, error } => {
            println!("  FAILED {}: {}", package_id, error)
        }
        Event::PackageInstalled {
            package_id,
            version,
        } => println!("Installed {} v{}", package_id, version),
        Event::PackageRemoved { package_id } => println!("Removed {}", package_id),
        _ => {}
    });
}

fn bail_unresolved(result: ResolutionResult) -> Result<()> {
    bail!(
        "{}",
        result
            .error_message
            .unwrap_or_else(|| "dependency resolution failed".to_string())
    )
}

/// Dispatch a `packages` subcommand
pub async fn handle_packages(action: PackageAction, config: &Config, format: OutputFormat) -> Result<()> {
    match action {
        PackageAction::List { available } => handle_packages_list(available, config, format).await,
        PackageAction::Resolve {
            requirements,
            strategy,
        } => {
            let strategy = strategy.unwrap_or(config.resolver.strategy);
            handle_packages_resolve(&requirements, strategy, config, format).await
        }
        PackageAction::Install {
            requirements,
            strategy,
        } => {
            let strategy = strategy.unwrap_or(config.resolver.strategy);
            handle_packages_install(&requirements, strategy, config, format).await
        }
        PackageAction::Remove { ids, force } => handle_packages_remove(&ids, force, config, format).await,
        PackageAction::Refresh => handle_packages_refresh(config, format).await,
        PackageAction::Updates => handle_packages_updates(config, format).await,
    }
}

pub async fn handle_packages_list(available: bool, config: &Config, format: OutputFormat) -> Result<()> {
    let service = package_service(config, Arc::new(EventBus::new()))?;
    if available {
        service.refresh().await;
    }
    let installed = service.catalog().installed();
    let offered = service.catalog().available();

    match format {
        OutputFormat::Text => {
            println!("Installed packages ({}):", installed.len());
            for package in &installed {
                println!("  {} v{} [{:?}]", package.id, package.version, package.state);
                if let Some(path) = &package.install_path {
                    println!("    {}", path.display());
                }
            }
            if available {
                println!();
                println!("Available packages ({}):", offered.len());
                for package in &offered {
                    println!("  {} v{} {}", package.id, package.version, package.description);
                }
            }
        }
        OutputFormat::Json => {
            print_json(&json!({ "installed": installed, "available": offered }))?;
        }
    }
    Ok(())
}

async fn resolve_requirements(
    service: &PackageService,
    requirements: &[String],
    strategy: ResolutionStrategy,
    config: &Config,
) -> Result<ResolutionResult> {
    let constraints = parse_requirements(requirements)?;
    service.refresh().await;
    let resolver = DependencyResolver::new(strategy)
        .with_dev_dependencies(config.resolver.include_dev_dependencies);
    Ok(resolver.resolve(
        &constraints,
        &service.catalog().available(),
        &service.catalog().installed(),
    ))
}

pub async fn handle_packages_resolve(
    requirements: &[String],
    strategy: ResolutionStrategy,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let service = package_service(config, Arc::new(EventBus::new()))?;
    let result = resolve_requirements(&service, requirements, strategy, config).await?;

    match format {
        OutputFormat::Text => print_resolution(&result),
        OutputFormat::Json => print_json(&serde_json::to_value(&result)?)?,
    }
    if !result.success {
        return bail_unresolved(result);
    }
    Ok(())
}

pub async fn handle_packages_install(
    requirements: &[String],
    strategy: ResolutionStrategy,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let events = Arc::new(EventBus::new());
    if matches!(format, OutputFormat::Text) {
        report_progress(&events);
    }
    let service = package_service(config, Arc::clone(&events))?;
    let result = resolve_requirements(&service, requirements, strategy, config).await?;
    if !result.success {
        if matches!(format, OutputFormat::Text) {
            print_resolution(&result);
        }
        return bail_unresolved(result);
    }

    let installed = service
        .install(&result)
        .await
        .context("Package installation failed")?;

    match format {
        OutputFormat::Text => {
            if installed.is_empty() {
                println!("Nothing to install.");
            }
        }
        OutputFormat::Json => print_json(&json!({ "installed": installed }))?,
    }
    Ok(())
}

pub async fn handle_packages_remove(
    ids: &[String],
    force: bool,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let events = Arc::new(EventBus::new());
    if matches!(format, OutputFormat::Text) {
        report_progress(&events);
    }
    let service = package_service(config, Arc::clone(&events))?;
    let resolver = DependencyResolver::new(config.resolver.strategy);
    let result = resolver.resolve_removal(ids, &service.catalog().installed(), force);
    if !result.success {
        if matches!(format, OutputFormat::Text) {
            print_resolution(&result);
        }
        return bail_unresolved(result);
    }

    let removed = service
        .remove(&result)
        .await
        .context("Package removal failed")?;
    if let OutputFormat::Json = format {
        print_json(&json!({ "removed": removed }))?;
    }
    Ok(())
}

fn print_resolution(result: &ResolutionResult) {
    if result.success {
        println!("Resolution succeeded.");
    } else {
        println!("Resolution failed.");
    }
    if !result.to_install.is_empty() {
        println!("Install (in order):");
        for package in &result.to_install {
            println!("  {} v{}", package.id, package.version);
        }
    }
    if !result.to_update.is_empty() {
        println!("Update:");
        for package in &result.to_update {
            println!("  {} -> v{}", package.id, package.version);
        }
    }
    if !result.to_remove.is_empty() {
        println!("Remove:");
        for package in &result.to_remove {
            println!("  {} v{}", package.id, package.version);
        }
    }
    if !result.conflicts.is_empty() {
        println!("Conflicts:");
        for conflict in &result.conflicts {
            println!("  [{:?}] {}", conflict.kind, conflict.description);
        }
    }
}

pub async fn handle_packages_refresh(config: &Config, format: OutputFormat) -> Result<()> {
    let service = package_service(config, Arc::new(EventBus::new()))?;
    if service.sources().is_empty() {
        bail!("No package sources configured");
    }
    let failed = service.refresh().await;
    let packages = service.catalog().available();

    match format {
        OutputFormat::Text => {
            println!(
                "Fetched {} package(s) from {} source(s)",
                packages.len(),
                service.sources().len() - failed.len()
            );
            for (source, error) in &failed {
                println!("  FAILED {}: {}", source, error);
            }
        }
        OutputFormat::Json => print_json(&json!({
            "packages": packages.len(),
            "failed": failed
                .iter()
                .map(|(source, error)| json!({ "source": source, "error": error }))
                .collect::<Vec<_>>(),
        }))?,
    }
    Ok(())
}

pub async fn handle_packages_updates(config: &Config, format: OutputFormat) -> Result<()> {
    let service = package_service(config, Arc::new(EventBus::new()))?;
    let report = service.check_for_updates().await;

    match format {
        OutputFormat::Text => {
            if report.available.is_empty() {
                println!("All packages are up to date.");
            }
            for (id, info) in &report.available {
                println!(
                    "  {} -> v{} ({:?}{})",
                    id,
                    info.version,
                    info.update_type,
                    if info.is_security_update { ", security" } else { "" }
                );
            }
            for (id, error) in &report.failed {
                println!("  FAILED {}: {}", id, error);
            }
        }
        OutputFormat::Json => print_json(&json!({
            "updates": report
                .available
                .iter()
                .map(|(id, info)| json!({ "id": id, "update": info }))
                .collect::<Vec<_>>(),
            "failed": report
                .failed
                .iter()
                .map(|(id, error)| json!({ "id": id, "error": error }))
                .collect::<Vec<_>>(),
        }))?,
    }
    Ok(())
}

/// Dispatch a `policy` subcommand
pub fn handle_policy(action: PolicyAction, config: &Config, format: OutputFormat) -> Result<()> {
    let security = security_manager(config, None)?;
    match action {
        PolicyAction::Show => {
            let policy = security.policy();
            match format {
                OutputFormat::Text => {
                    println!("Security policy ({}):", config.security.policy_file.display());
                    println!("  Allow unsigned plugins:    {}", policy.allow_unsigned_plugins);
                    println!("  Require trusted publisher: {}", policy.require_trusted_publisher);
                    println!("  Sandbox mode:              {}", policy.sandbox_mode);
                    println!("  Max memory (MB):           {}", policy.max_memory_usage);
                    println!("  Max CPU (%):               {}", policy.max_cpu_usage);
                    println!("  Network access:            {}", policy.allow_network_access);
                    println!("  File system access:        {}", policy.allow_file_system_access);
                    println!("  Registry access:           {}", policy.allow_registry_access);
                }
                OutputFormat::Json => print_json(&serde_json::to_value(&policy)?)?,
            }
            Ok(())
        }
        PolicyAction::Check { path, permissions } => {
            if !path.exists() {
                bail!("File not found: {}", path.display());
            }
            let id = platform::plugin_id_from_path(&path).unwrap_or_default();
            let verdict = security.validate_plugin(&path);
            let info = match &verdict {
                Ok(info) => info.clone(),
                Err(_) => security.verify_plugin(&path),
            };
            let level = security.level_for(&info);
            let denied = security.denied_permissions(&id, &permissions);
            let allowed = verdict.is_ok() && denied.is_empty();

            match format {
                OutputFormat::Text => {
                    print_signature(&info);
                    println!("  Security:    {:?}", level);
                    if let Err(e) = &verdict {
                        println!("  Rejected:    {}", e);
                    }
                    if !denied.is_empty() {
                        println!("  Denied:      {}", denied.join(", "));
                    }
                    println!("  Verdict:     {}", if allowed { "allowed" } else { "denied" });
                }
                OutputFormat::Json => print_json(&json!({
                    "plugin": id,
                    "signature": info,
                    "securityLevel": level,
                    "rejection": verdict.as_ref().err().map(|e| e.to_string()),
                    "deniedPermissions": denied,
                    "allowed": allowed,
                }))?,
            }
            if !allowed {
                bail!("Plugin {} is not allowed by the security policy", id);
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("added"), "Added");
        assert_eq!(capitalize(""), "");
    }

    #[test]
    fn test_plugin_files_respects_depth() {
        let dir = tempfile::tempdir().unwrap();
        let top = dir.path().join(platform::library_filename("top"));
        let nested_dir = dir.path().join("nested");
        std::fs::create_dir(&nested_dir).unwrap();
        let nested = nested_dir.join(platform::library_filename("deep"));
        std::fs::write(&top, b"x").unwrap();
        std::fs::write(&nested, b"x").unwrap();
        std::fs::write(dir.path().join("readme.txt"), b"x").unwrap();

        assert_eq!(plugin_files(dir.path(), false), vec![top.clone()]);
        assert_eq!(plugin_files(dir.path(), true).len(), 2);
    }

    #[test]
    fn test_keygen_then_sign_and_verify() {
        let dir = tempfile::tempdir().unwrap();
        handle_plugins_keygen("acme", dir.path(), 30, OutputFormat::Json).unwrap();

        let plugin = dir.path().join(platform::library_filename("demo"));
        std::fs::write(&plugin, b"plugin bytes").unwrap();
        handle_plugins_sign(
            &plugin,
            &dir.path().join("acme.key"),
            &dir.path().join("acme.pem"),
            false,
            OutputFormat::Json,
        )
        .unwrap();
        assert!(crate::security::signature::sidecar_path(&plugin).exists());
    }
}
