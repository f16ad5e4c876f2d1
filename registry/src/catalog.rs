//! Package catalog: installed and available package sets
//!
//! Both lists sit behind their own mutex. The installed list is persisted as
//! a JSON array in the registry file, and serialisation happens while the
//! lock is held so a concurrent mutation can never be half-written.

use parking_lot::Mutex;
use sdk::errors::EngineError;
use sdk::manifest::{compare_versions, PackageState, PluginPackage};
use std::path::{Path, PathBuf};

/// Installed ∪ available package sets
pub struct PackageCatalog {
    installed: Mutex<Vec<PluginPackage>>,
    available: Mutex<Vec<PluginPackage>>,
    registry_path: PathBuf,
}

impl PackageCatalog {
    /// Create an empty catalog persisted at `registry_path`
    pub fn new(registry_path: impl Into<PathBuf>) -> Self {
        Self {
            installed: Mutex::new(Vec::new()),
            available: Mutex::new(Vec::new()),
            registry_path: registry_path.into(),
        }
    }

    /// Create a catalog and load the registry file if it exists
    pub fn open(registry_path: impl Into<PathBuf>) -> Result<Self, EngineError> {
        let catalog = Self::new(registry_path);
        catalog.load_installed()?;
        Ok(catalog)
    }

    pub fn registry_path(&self) -> &Path {
        &self.registry_path
    }

    /// Replace the installed set with the contents of the registry file
    ///
    /// A missing file is an empty registry. A corrupt file is an error and
    /// leaves the in-memory set untouched. Entries without an install path,
    /// or whose artifact is gone, load as `Corrupted`.
    pub fn load_installed(&self) -> Result<usize, EngineError> {
        if !self.registry_path.exists() {
            tracing::debug!(
                "No package registry at {}, starting empty",
                self.registry_path.display()
            );
            return Ok(0);
        }

        let contents = std::fs::read_to_string(&self.registry_path)?;
        let mut packages: Vec<PluginPackage> = serde_json::from_str(&contents).map_err(|e| {
            tracing::error!(
                "Corrupt package registry {}: {}",
                self.registry_path.display(),
                e
            );
            EngineError::InvalidFormat(format!("package registry: {}", e))
        })?;

        for package in &mut packages {
            package.state = match package.install_path.as_deref() {
                Some(path) if path.exists() => PackageState::Installed,
                Some(path) => {
                    tracing::warn!(
                        "Installed package {} is missing its artifact {}",
                        package.key(),
                        path.display()
                    );
                    PackageState::Corrupted
                }
                None => {
                    tracing::warn!("Installed package {} has no install path", package.key());
                    PackageState::Corrupted
                }
            };
        }

        let count = packages.len();
        *self.installed.lock() = packages;
        tracing::info!("Loaded {} installed packages", count);
        Ok(count)
    }

    /// Write the installed set to the registry file
    pub fn save_installed(&self) -> Result<(), EngineError> {
        let installed = self.installed.lock();
        let json = serde_json::to_string_pretty(&*installed)?;

        if let Some(parent) = self.registry_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.registry_path, json)?;

        tracing::debug!(
            "Saved {} installed packages to {}",
            installed.len(),
            self.registry_path.display()
        );
        Ok(())
    }

    /// Snapshot of the installed set
    pub fn installed(&self) -> Vec<PluginPackage> {
        self.installed.lock().clone()
    }

    /// Snapshot of the available set
    pub fn available(&self) -> Vec<PluginPackage> {
        self.available.lock().clone()
    }

    /// Replace the available set after a repository refresh
    pub fn set_available(&self, packages: Vec<PluginPackage>) {
        let mut available = self.available.lock();
        *available = packages
            .into_iter()
            .map(|mut p| {
                p.state = PackageState::NotInstalled;
                p
            })
            .collect();
        tracing::info!("Repository refresh: {} packages available", available.len());
    }

    /// Add or replace one available package
    pub fn add_available(&self, package: PluginPackage) {
        let mut available = self.available.lock();
        available.retain(|p| p != &package);
        available.push(package);
    }

    /// Record a package as installed at `install_path`
    ///
    /// Any other installed version of the same id is replaced.
    pub fn mark_installed(&self, mut package: PluginPackage, install_path: PathBuf) {
        package.install_path = Some(install_path);
        package.state = PackageState::Installed;

        let mut installed = self.installed.lock();
        installed.retain(|p| p.id != package.id);
        tracing::info!("Package installed: {}", package.key());
        installed.push(package);
    }

    /// Remove a package from the installed set
    pub fn remove_installed(&self, id: &str) -> Result<PluginPackage, EngineError> {
        let mut installed = self.installed.lock();
        let index = installed
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| EngineError::PackageNotFound(id.to_string()))?;
        let removed = installed.remove(index);
        tracing::info!("Package removed: {}", removed.key());
        Ok(removed)
    }

    /// Update the state of an installed package, or of the available entries for `id`
    pub fn set_state(&self, id: &str, state: PackageState) -> bool {
        {
            let mut installed = self.installed.lock();
            if let Some(package) = installed.iter_mut().find(|p| p.id == id) {
                package.state = state;
                return true;
            }
        }
        let mut available = self.available.lock();
        let mut found = false;
        for package in available.iter_mut().filter(|p| p.id == id) {
            package.state = state;
            found = true;
        }
        found
    }

    /// Update the state of one available version, leaving the installed entry alone
    pub fn set_available_state(&self, id: &str, version: &str, state: PackageState) -> bool {
        let mut available = self.available.lock();
        let mut found = false;
        for package in available.iter_mut().filter(|p| p.id == id && p.version == version) {
            package.state = state;
            found = true;
        }
        found
    }

    pub fn find_installed(&self, id: &str) -> Option<PluginPackage> {
        self.installed.lock().iter().find(|p| p.id == id).cloned()
    }

    pub fn is_installed(&self, id: &str) -> bool {
        self.installed.lock().iter().any(|p| p.id == id)
    }

    /// Find an available package, the newest one when `version` is `None`
    pub fn find_available(&self, id: &str, version: Option<&str>) -> Option<PluginPackage> {
        let available = self.available.lock();
        match version {
            Some(version) => available
                .iter()
                .find(|p| p.id == id && p.version == version)
                .cloned(),
            None => available
                .iter()
                .filter(|p| p.id == id)
                .max_by(|a, b| compare_versions(&a.version, &b.version))
                .cloned(),
        }
    }

    /// All available versions of `id`, newest first
    pub fn versions_of(&self, id: &str) -> Vec<String> {
        let mut versions: Vec<String> = self
            .available
            .lock()
            .iter()
            .filter(|p| p.id == id)
            .map(|p| p.version.clone())
            .collect();
        versions.sort_by(|a, b| compare_versions(b, a));
        versions.dedup();
        versions
    }

    /// Installed packages with a newer available version
    ///
    /// Returns `(installed, newest available)` pairs. Marks the installed
    /// entries `UpdateAvailable`.
    pub fn updates_available(&self) -> Vec<(PluginPackage, PluginPackage)> {
        let available = self.available.lock().clone();
        let mut installed = self.installed.lock();
        let mut updates = Vec::new();

        for package in installed.iter_mut() {
            let newest = available
                .iter()
                .filter(|p| p.id == package.id)
                .max_by(|a, b| compare_versions(&a.version, &b.version));
            if let Some(newest) = newest {
                if compare_versions(&newest.version, &package.version).is_gt() {
                    package.state = PackageState::UpdateAvailable;
                    updates.push((package.clone(), newest.clone()));
                }
            }
        }

        updates
    }
}
