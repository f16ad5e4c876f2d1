//! Update checks and delayed update installation

use crate::catalog::PackageCatalog;
use crate::installer::Installer;
use crate::source::{PackageSource, UpdateInfo};
use parking_lot::Mutex;
use sdk::errors::EngineError;
use sdk::manifest::{compare_versions, PackageState};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Outcome of one update check pass
#[derive(Debug, Default)]
pub struct UpdateCheckReport {
    /// `(package id, update)` for every installed package with a newer release
    pub available: Vec<(String, UpdateInfo)>,
    /// `(package id, error)` for packages whose check failed
    pub failed: Vec<(String, String)>,
}

/// Checks sources for updates and installs them on a schedule
pub struct UpdateScheduler {
    catalog: Arc<PackageCatalog>,
    source: Arc<dyn PackageSource>,
    installer: Arc<Installer>,
    channel: String,
    pending: Mutex<HashMap<String, UpdateInfo>>,
    scheduled: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
}

impl UpdateScheduler {
    pub fn new(
        source: Arc<dyn PackageSource>,
        installer: Arc<Installer>,
        channel: impl Into<String>,
    ) -> Self {
        Self {
            catalog: Arc::clone(installer.catalog()),
            source,
            installer,
            channel: channel.into(),
            pending: Mutex::new(HashMap::new()),
            scheduled: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Ask the source about every installed package
    ///
    /// A failing check for one package is recorded and does not stop the rest.
    pub async fn check_for_updates(&self) -> UpdateCheckReport {
        let mut report = UpdateCheckReport::default();

        for package in self.catalog.installed() {
            match self.source.check_update(&package.id, &self.channel).await {
                Ok(Some(info)) if compare_versions(&info.version, &package.version).is_gt() => {
                    tracing::info!(
                        "Update available: {} {} -> {}",
                        package.id,
                        package.version,
                        info.version
                    );
                    self.catalog.set_state(&package.id, PackageState::UpdateAvailable);
                    self.pending.lock().insert(package.id.clone(), info.clone());
                    report.available.push((package.id, info));
                }
                Ok(_) => {
                    tracing::debug!("No update for {}", package.id);
                }
                Err(e) => {
                    tracing::warn!("Update check failed for {}: {}", package.id, e);
                    report.failed.push((package.id, e.to_string()));
                }
            }
        }

        report
    }

    /// Update found by the last check for `id`, if any
    pub fn pending_update(&self, id: &str) -> Option<UpdateInfo> {
        self.pending.lock().get(id).cloned()
    }

    pub fn is_scheduled(&self, id: &str) -> bool {
        self.scheduled.lock().contains_key(id)
    }

    /// Install the pending update for `id` after `delay`
    pub fn schedule_update(&self, id: &str, delay: Duration) -> Result<(), EngineError> {
        let info = self.pending_update(id).ok_or_else(|| {
            EngineError::InvalidState(format!("no pending update for package '{}'", id))
        })?;
        let installed = self
            .catalog
            .find_installed(id)
            .ok_or_else(|| EngineError::PackageNotFound(id.to_string()))?;

        let mut scheduled = self.scheduled.lock();
        if scheduled.contains_key(id) {
            return Err(EngineError::AlreadyExists(format!(
                "update for '{}' already scheduled",
                id
            )));
        }

        let target = info.to_package(&installed);
        let installer = Arc::clone(&self.installer);
        let registry = Arc::clone(&self.scheduled);
        let package_id = id.to_string();

        tracing::info!(
            "Scheduled update of {} to {} in {:?}",
            id,
            target.version,
            delay
        );

        // The task cannot deregister before its handle is stored: it needs
        // the `scheduled` lock, which is held until the insert below
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match installer.install_package(&target).await {
                Ok(path) => {
                    tracing::info!("Updated {} to {} at {}", package_id, target.version, path.display())
                }
                Err(e) => tracing::error!("Update of {} failed: {}", package_id, e),
            }
            registry.lock().remove(&package_id);
        });
        scheduled.insert(id.to_string(), handle);
        Ok(())
    }

    /// Cancel a scheduled update
    ///
    /// A package caught mid-download or mid-install returns to `UpdateAvailable`.
    pub fn cancel_update(&self, id: &str) -> bool {
        let Some(handle) = self.scheduled.lock().remove(id) else {
            return false;
        };
        handle.abort();

        if let Some(package) = self.catalog.find_installed(id) {
            if matches!(
                package.state,
                PackageState::Downloading | PackageState::Installing
            ) {
                self.catalog.set_state(id, PackageState::UpdateAvailable);
            }
        }
        tracing::info!("Cancelled scheduled update of {}", id);
        true
    }

    /// Abort every scheduled update
    pub fn cancel_all(&self) {
        let ids: Vec<String> = self.scheduled.lock().keys().cloned().collect();
        for id in ids {
            self.cancel_update(&id);
        }
    }
}

impl Drop for UpdateScheduler {
    fn drop(&mut self) {
        for (_, handle) in self.scheduled.lock().drain() {
            handle.abort();
        }
    }
}
