//! Hot reload on library changes
//!
//! A `notify` watcher feeds file events into a worker thread. The worker
//! waits until a path has been quiet for the debounce period, then reloads
//! the plugin loaded from that path with its state preserved. Watch and
//! reload errors are logged; they never reach the manager's callers.

use crate::manager::PluginManager;
use crate::platform;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use sdk::errors::EngineError;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Weak;
use std::time::{Duration, Instant};

pub struct HotReloadWatcher {
    // Dropping the watcher closes the channel and ends the worker
    _watcher: RecommendedWatcher,
    dirs: Vec<PathBuf>,
}

impl HotReloadWatcher {
    pub(crate) fn start(
        manager: Weak<PluginManager>,
        dirs: &[PathBuf],
        debounce: Duration,
    ) -> Result<Self, EngineError> {
        let (tx, rx) = mpsc::channel::<PathBuf>();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => {
                    if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                        for path in event.paths {
                            if platform::is_plugin_library(&path) {
                                let _ = tx.send(path);
                            }
                        }
                    }
                }
                Err(e) => tracing::warn!("File watch error: {}", e),
            }
        })
        .map_err(|e| EngineError::Config(format!("Failed to create file watcher: {}", e)))?;

        let mut watched = Vec::new();
        for dir in dirs {
            if !dir.is_dir() {
                tracing::warn!("Not watching {}: not a directory", dir.display());
                continue;
            }
            match watcher.watch(dir, RecursiveMode::Recursive) {
                Ok(()) => watched.push(dir.clone()),
                Err(e) => tracing::warn!("Failed to watch {}: {}", dir.display(), e),
            }
        }

        std::thread::Builder::new()
            .name("plexus-hot-reload".to_string())
            .spawn(move || run_worker(manager, rx, debounce))
            .map_err(|e| EngineError::Config(format!("Failed to start watcher thread: {}", e)))?;

        tracing::info!("Hot reload enabled for {} director(ies)", watched.len());
        Ok(Self {
            _watcher: watcher,
            dirs: watched,
        })
    }

    pub fn watched_dirs(&self) -> &[PathBuf] {
        &self.dirs
    }
}

fn run_worker(manager: Weak<PluginManager>, rx: mpsc::Receiver<PathBuf>, debounce: Duration) {
    let mut pending: HashMap<PathBuf, Instant> = HashMap::new();
    loop {
        match rx.recv_timeout(debounce) {
            Ok(path) => {
                pending.insert(path, Instant::now());
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        let now = Instant::now();
        let ready: Vec<PathBuf> = pending
            .iter()
            .filter(|(_, last)| now.duration_since(**last) >= debounce)
            .map(|(path, _)| path.clone())
            .collect();
        if ready.is_empty() {
            continue;
        }

        let Some(manager) = manager.upgrade() else {
            break;
        };
        for path in ready {
            pending.remove(&path);
            let Some(id) = manager.plugin_for_path(&path) else {
                continue;
            };
            tracing::info!("Hot reloading plugin {} due to file change", id);
            if let Err(e) = manager.reload_plugin(&id, true) {
                tracing::error!("Hot reload failed for plugin {}: {}", id, e);
            }
        }
    }
    tracing::debug!("Hot reload worker stopped");
}
