//! Asynchronous package downloads
//!
//! At most `max_concurrent` downloads run at once; further requests wait in a
//! FIFO queue and start as slots free up. Every request ends with exactly one
//! terminal event: `Completed`, `Failed` or `Cancelled`.

use crate::source::PackageSource;
use crate::verifier;
use parking_lot::Mutex;
use sdk::errors::EngineError;
use sdk::manifest::PluginPackage;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Download settings
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub max_concurrent: usize,
    pub timeout: Duration,
    pub download_dir: PathBuf,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            timeout: Duration::from_secs(300),
            download_dir: std::env::temp_dir().join("plexus-downloads"),
        }
    }
}

/// Download lifecycle notifications
#[derive(Debug, Clone)]
pub enum DownloadEvent {
    Queued {
        package_id: String,
        position: usize,
    },
    Started {
        package_id: String,
    },
    Progress {
        package_id: String,
        bytes_received: u64,
        bytes_total: Option<u64>,
    },
    Completed {
        package_id: String,
        path: PathBuf,
    },
    Failed {
        package_id: String,
        error: String,
    },
    Cancelled {
        package_id: String,
    },
}

impl DownloadEvent {
    pub fn package_id(&self) -> &str {
        match self {
            Self::Queued { package_id, .. }
            | Self::Started { package_id }
            | Self::Progress { package_id, .. }
            | Self::Completed { package_id, .. }
            | Self::Failed { package_id, .. }
            | Self::Cancelled { package_id } => package_id,
        }
    }

    /// Whether this event ends the request
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Failed { .. } | Self::Cancelled { .. }
        )
    }
}

struct ActiveDownload {
    handle: Option<JoinHandle<()>>,
}

struct Inner {
    source: Arc<dyn PackageSource>,
    config: DownloadConfig,
    queue: Mutex<VecDeque<PluginPackage>>,
    active: Mutex<HashMap<String, ActiveDownload>>,
    events: mpsc::UnboundedSender<DownloadEvent>,
}

/// Bounded, queued download manager
///
/// Must be used from within a tokio runtime.
#[derive(Clone)]
pub struct DownloadManager {
    inner: Arc<Inner>,
}

impl DownloadManager {
    /// Create a manager and the receiver for its events
    pub fn new(
        source: Arc<dyn PackageSource>,
        config: DownloadConfig,
    ) -> (Self, mpsc::UnboundedReceiver<DownloadEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let config = DownloadConfig {
            max_concurrent: config.max_concurrent.max(1),
            ..config
        };
        let manager = Self {
            inner: Arc::new(Inner {
                source,
                config,
                queue: Mutex::new(VecDeque::new()),
                active: Mutex::new(HashMap::new()),
                events: tx,
            }),
        };
        (manager, rx)
    }

    /// Request a download
    ///
    /// Fails with `AlreadyExists` if the package is already queued or active.
    pub fn enqueue(&self, package: PluginPackage) -> Result<(), EngineError> {
        {
            let active = self.inner.active.lock();
            let mut queue = self.inner.queue.lock();
            if active.contains_key(&package.id) || queue.iter().any(|p| p.id == package.id) {
                return Err(EngineError::AlreadyExists(format!(
                    "download for {} already requested",
                    package.id
                )));
            }
            tracing::debug!("Queued download: {}", package.key());
            queue.push_back(package.clone());
            self.inner.emit(DownloadEvent::Queued {
                package_id: package.id.clone(),
                position: queue.len(),
            });
        }
        Inner::pump(&self.inner);
        Ok(())
    }

    /// Cancel a queued or active download
    ///
    /// Returns `false` if nothing was pending for `package_id`.
    pub fn cancel(&self, package_id: &str) -> bool {
        let removed_from_queue = {
            let mut queue = self.inner.queue.lock();
            let before = queue.len();
            queue.retain(|p| p.id != package_id);
            queue.len() != before
        };

        let cancelled = if removed_from_queue {
            true
        } else if let Some(active) = self.inner.active.lock().remove(package_id) {
            if let Some(handle) = active.handle {
                handle.abort();
            }
            true
        } else {
            false
        };

        if cancelled {
            tracing::info!("Download cancelled: {}", package_id);
            self.inner.emit(DownloadEvent::Cancelled {
                package_id: package_id.to_string(),
            });
            Inner::pump(&self.inner);
        }
        cancelled
    }

    /// Cancel everything that is queued or running
    pub fn cancel_all(&self) {
        let queued: Vec<String> = self.inner.queue.lock().iter().map(|p| p.id.clone()).collect();
        let active: Vec<String> = self.inner.active.lock().keys().cloned().collect();
        for id in queued.into_iter().chain(active) {
            self.cancel(&id);
        }
    }

    pub fn active_count(&self) -> usize {
        self.inner.active.lock().len()
    }

    pub fn queued_count(&self) -> usize {
        self.inner.queue.lock().len()
    }

    pub fn is_pending(&self, package_id: &str) -> bool {
        self.inner.active.lock().contains_key(package_id)
            || self.inner.queue.lock().iter().any(|p| p.id == package_id)
    }

    /// Where a downloaded artifact for `package` is written
    pub fn artifact_path(&self, package: &PluginPackage) -> PathBuf {
        self.inner.artifact_path(package)
    }
}

impl Inner {
    fn emit(&self, event: DownloadEvent) {
        // Receiver may have been dropped; downloads still proceed
        let _ = self.events.send(event);
    }

    fn artifact_path(&self, package: &PluginPackage) -> PathBuf {
        self.config
            .download_dir
            .join(format!("{}-{}.pkg", package.id, package.version))
    }

    /// Start queued downloads while slots are free
    fn pump(inner: &Arc<Inner>) {
        let mut active = inner.active.lock();
        while active.len() < inner.config.max_concurrent {
            let Some(package) = inner.queue.lock().pop_front() else {
                break;
            };
            let id = package.id.clone();

            // Spawned while holding the lock: the task cannot deregister
            // itself before its handle is recorded
            let task_inner = Arc::clone(inner);
            let handle = tokio::spawn(async move {
                Inner::run(task_inner, package).await;
            });
            active.insert(id.clone(), ActiveDownload {
                handle: Some(handle),
            });
            inner.emit(DownloadEvent::Started { package_id: id });
        }
    }

    async fn run(inner: Arc<Inner>, package: PluginPackage) {
        let id = package.id.clone();
        let result =
            match tokio::time::timeout(inner.config.timeout, Inner::fetch(&inner, &package)).await
            {
                Ok(result) => result,
                Err(_) => Err(EngineError::Timeout(format!("download of {}", package.key()))),
            };

        // Only the party that removes the active entry reports the outcome
        let still_active = inner.active.lock().remove(&id).is_some();
        if still_active {
            match result {
                Ok(path) => {
                    tracing::info!("Download completed: {} -> {}", package.key(), path.display());
                    inner.emit(DownloadEvent::Completed {
                        package_id: id,
                        path,
                    });
                }
                Err(e) => {
                    tracing::warn!("Download failed: {}: {}", package.key(), e);
                    inner.emit(DownloadEvent::Failed {
                        package_id: id,
                        error: e.to_string(),
                    });
                }
            }
        }

        Inner::pump(&inner);
    }

    async fn fetch(inner: &Arc<Inner>, package: &PluginPackage) -> Result<PathBuf, EngineError> {
        let events = inner.events.clone();
        let id = package.id.clone();
        let progress = move |received: u64, total: Option<u64>| {
            let _ = events.send(DownloadEvent::Progress {
                package_id: id.clone(),
                bytes_received: received,
                bytes_total: total,
            });
        };

        let bytes = inner.source.download(package, &progress).await?;

        // Never write unverified bytes to disk
        verifier::verify_hash(&bytes, &package.checksum, &package.key())?;

        let dest = inner.artifact_path(package);
        tokio::fs::create_dir_all(&inner.config.download_dir).await?;
        tokio::fs::write(&dest, &bytes).await?;
        Ok(dest)
    }
}
