//! Package operations on top of the registry
//!
//! `PackageService` ties the catalog, the configured sources, the download
//! queue and the installer together. Every download step, installation,
//! removal and discovered update is reported on the event bus.

use crate::config::Config;
use crate::deps::ResolutionResult;
use crate::events::{Event, EventBus};
use parking_lot::Mutex;
use plexus_registry::{
    DownloadConfig, DownloadEvent, DownloadManager, HttpSource, Installer, PackageCatalog,
    PackageSource, UpdateCheckReport, UpdateScheduler,
};
use sdk::errors::EngineError;
use sdk::PluginPackage;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

pub struct PackageService {
    catalog: Arc<PackageCatalog>,
    sources: Vec<Arc<dyn PackageSource>>,
    events: Arc<EventBus>,
    install_dir: PathBuf,
    downloads: DownloadConfig,
    channel: String,
    /// `(source index, package)` for everything the last refresh found
    offers: Mutex<Vec<(usize, PluginPackage)>>,
}

impl PackageService {
    pub fn new(
        catalog: Arc<PackageCatalog>,
        sources: Vec<Arc<dyn PackageSource>>,
        install_dir: impl Into<PathBuf>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            catalog,
            sources,
            events,
            install_dir: install_dir.into(),
            downloads: DownloadConfig::default(),
            channel: "stable".to_string(),
            offers: Mutex::new(Vec::new()),
        }
    }

    /// Build the service from the `[repository]` section, one HTTP source per URL
    pub fn from_config(config: &Config, events: Arc<EventBus>) -> Result<Self, EngineError> {
        let repository = &config.repository;
        let catalog = Arc::new(PackageCatalog::open(&repository.registry_file)?);
        let sources = repository
            .sources
            .iter()
            .map(|url| {
                HttpSource::new(url.as_str(), repository.timeout())
                    .map(|source| Arc::new(source) as Arc<dyn PackageSource>)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::new(catalog, sources, &repository.install_dir, events)
            .with_downloads(repository.download_config())
            .with_channel(repository.channel.as_str()))
    }

    pub fn with_downloads(mut self, downloads: DownloadConfig) -> Self {
        self.downloads = downloads;
        self
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    pub fn catalog(&self) -> &Arc<PackageCatalog> {
        &self.catalog
    }

    pub fn sources(&self) -> &[Arc<dyn PackageSource>] {
        &self.sources
    }

    /// Fetch every source's index into the catalog's available set
    ///
    /// A failing source is logged and skipped; its `(name, error)` is returned.
    pub async fn refresh(&self) -> Vec<(String, String)> {
        let mut offers = Vec::new();
        let mut failed = Vec::new();
        for (index, source) in self.sources.iter().enumerate() {
            match source.fetch_index().await {
                Ok(packages) => {
                    tracing::info!("{} offers {} package(s)", source.name(), packages.len());
                    offers.extend(packages.into_iter().map(|p| (index, p)));
                }
                Err(e) => {
                    tracing::warn!("Failed to fetch index from {}: {}", source.name(), e);
                    failed.push((source.name().to_string(), e.to_string()));
                }
            }
        }

        self.catalog
            .set_available(offers.iter().map(|(_, p)| p.clone()).collect());
        *self.offers.lock() = offers;
        failed
    }

    /// Download and install everything a resolution plan adds or replaces
    ///
    /// Packages must come from the last `refresh`. All downloads finish before
    /// anything is installed, so a failed download installs nothing.
    pub async fn install(&self, plan: &ResolutionResult) -> Result<Vec<PluginPackage>, EngineError> {
        let wanted: Vec<&PluginPackage> = plan.to_install.iter().chain(&plan.to_update).collect();
        if wanted.is_empty() {
            return Ok(Vec::new());
        }

        let mut by_source: BTreeMap<usize, Vec<PluginPackage>> = BTreeMap::new();
        {
            let offers = self.offers.lock();
            for package in &wanted {
                let origin = offers
                    .iter()
                    .find(|(_, offered)| offered == *package)
                    .map(|(index, _)| *index)
                    .ok_or_else(|| EngineError::PackageNotFound(package.key()))?;
                by_source.entry(origin).or_default().push((*package).clone());
            }
        }

        let mut artifacts = HashMap::new();
        for (origin, packages) in by_source {
            let source = Arc::clone(&self.sources[origin]);
            artifacts.extend(self.download_all(source, packages).await?);
        }

        let installer = Installer::local(Arc::clone(&self.catalog), &self.install_dir);
        let mut installed = Vec::new();
        for package in wanted {
            let Some(artifact) = artifacts.get(&package.id) else {
                continue;
            };
            installer.install_from_file(package, artifact).await?;
            if let Err(e) = tokio::fs::remove_file(artifact).await {
                tracing::debug!("Could not remove artifact {}: {}", artifact.display(), e);
            }
            self.events.emit(Event::PackageInstalled {
                package_id: package.id.clone(),
                version: package.version.clone(),
            });
            installed.push(package.clone());
        }
        Ok(installed)
    }

    /// Queue `packages` on one source and wait for every download to end
    async fn download_all(
        &self,
        source: Arc<dyn PackageSource>,
        packages: Vec<PluginPackage>,
    ) -> Result<HashMap<String, PathBuf>, EngineError> {
        let (downloads, mut events) = DownloadManager::new(source, self.downloads.clone());
        let mut remaining = packages.len();
        for package in packages {
            downloads.enqueue(package)?;
        }

        let mut artifacts = HashMap::new();
        let mut failures = Vec::new();
        while remaining > 0 {
            let Some(event) = events.recv().await else {
                break;
            };
            if let Some(forwarded) = Event::from_download(&event) {
                self.events.emit(forwarded);
            }
            if event.is_terminal() {
                remaining -= 1;
            }
            match event {
                DownloadEvent::Completed { package_id, path } => {
                    artifacts.insert(package_id, path);
                }
                DownloadEvent::Failed { package_id, error } => {
                    failures.push(format!("{}: {}", package_id, error));
                }
                DownloadEvent::Cancelled { package_id } => {
                    failures.push(format!("{}: cancelled", package_id));
                }
                _ => {}
            }
        }

        if !failures.is_empty() {
            return Err(EngineError::Network(format!(
                "download failed: {}",
                failures.join("; ")
            )));
        }
        Ok(artifacts)
    }

    /// Uninstall the packages of a removal plan, in plan order
    pub async fn remove(&self, plan: &ResolutionResult) -> Result<Vec<String>, EngineError> {
        let installer = Installer::local(Arc::clone(&self.catalog), &self.install_dir);
        let mut removed = Vec::new();
        for package in &plan.to_remove {
            installer.uninstall_package(&package.id).await?;
            self.events.emit(Event::PackageRemoved {
                package_id: package.id.clone(),
            });
            removed.push(package.id.clone());
        }
        Ok(removed)
    }

    /// Ask every source about the installed packages
    ///
    /// For each package the first source reporting an update wins. Failures
    /// are collected per source and package.
    pub async fn check_for_updates(&self) -> UpdateCheckReport {
        let mut merged = UpdateCheckReport::default();
        for source in &self.sources {
            let installer = Arc::new(Installer::new(
                Arc::clone(&self.catalog),
                Arc::clone(source),
                &self.install_dir,
            ));
            let scheduler = UpdateScheduler::new(Arc::clone(source), installer, self.channel.as_str());
            let report = scheduler.check_for_updates().await;

            for (id, info) in report.available {
                if merged.available.iter().any(|(known, _)| *known == id) {
                    continue;
                }
                let current = self
                    .catalog
                    .find_installed(&id)
                    .map(|p| p.version)
                    .unwrap_or_default();
                self.events.emit(Event::UpdateAvailable {
                    package_id: id.clone(),
                    current,
                    available: info.version.clone(),
                });
                merged.available.push((id, info));
            }
            merged.failed.extend(report.failed);
        }
        merged
    }
}
