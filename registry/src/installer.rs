//! Package installer: download, verify, install plugin binaries

use crate::catalog::PackageCatalog;
use crate::source::PackageSource;
use crate::verifier;
use sdk::errors::EngineError;
use sdk::manifest::{PackageState, PluginPackage};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Platform file name of a plugin library, e.g. `libaudio.so`
pub fn library_filename(id: &str) -> String {
    format!(
        "{}{}{}",
        std::env::consts::DLL_PREFIX,
        id,
        std::env::consts::DLL_SUFFIX
    )
}

/// Installs packages into `install_dir/<id>/` and records them in the catalog
pub struct Installer {
    catalog: Arc<PackageCatalog>,
    source: Option<Arc<dyn PackageSource>>,
    install_dir: PathBuf,
}

impl Installer {
    pub fn new(
        catalog: Arc<PackageCatalog>,
        source: Arc<dyn PackageSource>,
        install_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            catalog,
            source: Some(source),
            install_dir: install_dir.into(),
        }
    }

    /// Installer without a source: installs already downloaded artifacts and
    /// uninstalls, but cannot download
    pub fn local(catalog: Arc<PackageCatalog>, install_dir: impl Into<PathBuf>) -> Self {
        Self {
            catalog,
            source: None,
            install_dir: install_dir.into(),
        }
    }

    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }

    pub fn catalog(&self) -> &Arc<PackageCatalog> {
        &self.catalog
    }

    /// Where the binary of `id` lives once installed
    pub fn binary_path(&self, id: &str) -> PathBuf {
        self.install_dir.join(id).join(library_filename(id))
    }

    /// Download and install a package
    ///
    /// The state moves `Downloading → Installing → Installed`. A checksum
    /// mismatch leaves it `Corrupted`; any other failure leaves it `Failed`.
    /// When another version is already installed, only the available entry
    /// being installed tracks these states until the swap succeeds, so a
    /// failed update leaves the installed version as it was.
    pub async fn install_package(&self, package: &PluginPackage) -> Result<PathBuf, EngineError> {
        let source = self.source.as_ref().ok_or_else(|| {
            EngineError::InvalidState(format!("no source to download {} from", package.key()))
        })?;
        tracing::info!("Installing package: {}", package.key());
        self.track(package, PackageState::Downloading);

        let noop = |_: u64, _: Option<u64>| {};
        let bytes = match source.download(package, &noop).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!("Download of {} failed: {}", package.key(), e);
                self.track(package, PackageState::Failed);
                return Err(e);
            }
        };

        self.install_bytes(package, &bytes).await
    }

    /// Install a package from an already downloaded artifact
    pub async fn install_from_file(
        &self,
        package: &PluginPackage,
        artifact: &Path,
    ) -> Result<PathBuf, EngineError> {
        if !artifact.exists() {
            return Err(EngineError::FileNotFound(artifact.to_path_buf()));
        }
        let bytes = tokio::fs::read(artifact).await?;
        self.install_bytes(package, &bytes).await
    }

    async fn install_bytes(
        &self,
        package: &PluginPackage,
        bytes: &[u8],
    ) -> Result<PathBuf, EngineError> {
        self.track(package, PackageState::Installing);

        // Verify before anything touches the install directory
        if let Err(e) = verifier::verify_hash(bytes, &package.checksum, &package.key()) {
            tracing::error!("Refusing to install {}: {}", package.key(), e);
            self.track(package, PackageState::Corrupted);
            return Err(e);
        }

        let dest = self.binary_path(&package.id);
        if let Err(e) = Self::write_binary(&dest, bytes).await {
            tracing::error!("Failed to write {}: {}", dest.display(), e);
            self.track(package, PackageState::Failed);
            return Err(e);
        }

        self.catalog.mark_installed(package.clone(), dest.clone());
        self.catalog.save_installed()?;

        tracing::info!("  Installed to: {}", dest.display());
        Ok(dest)
    }

    /// Record progress for `package` without touching a different installed version
    fn track(&self, package: &PluginPackage, state: PackageState) {
        let replacing = self
            .catalog
            .find_installed(&package.id)
            .is_some_and(|installed| installed.version != package.version);
        if replacing {
            self.catalog.set_available_state(&package.id, &package.version, state);
        } else {
            self.catalog.set_state(&package.id, state);
        }
    }

    async fn write_binary(dest: &Path, bytes: &[u8]) -> Result<(), EngineError> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Write next to the target and rename so a loaded binary is never half-replaced
        let staging = dest.with_extension("partial");
        tokio::fs::write(&staging, bytes).await?;
        tokio::fs::rename(&staging, dest).await?;
        Ok(())
    }

    /// Remove an installed package and its files
    pub async fn uninstall_package(&self, id: &str) -> Result<PluginPackage, EngineError> {
        let package = self
            .catalog
            .find_installed(id)
            .ok_or_else(|| EngineError::PackageNotFound(id.to_string()))?;

        let dir = package
            .install_path
            .as_deref()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.install_dir.join(id));

        // Only ever delete inside our own install directory
        if dir.starts_with(&self.install_dir) && dir.exists() {
            tokio::fs::remove_dir_all(&dir).await?;
        } else if let Some(path) = package.install_path.as_deref() {
            if path.exists() {
                tokio::fs::remove_file(path).await?;
            }
        }

        let removed = self.catalog.remove_installed(id)?;
        self.catalog.save_installed()?;
        tracing::info!("Uninstalled package: {}", removed.key());
        Ok(removed)
    }
}
