//! Event bus for plugin host notifications
//!
//! Components publish lifecycle, trust and package events without knowing
//! who listens. Handlers are plain callbacks run synchronously on the
//! emitting thread, in subscription order. The handler list is snapshotted
//! before delivery, so a handler may subscribe, unsubscribe or emit again
//! without deadlocking.

use crate::manager::PluginStatus;
use crate::security::TrustLevel;
use parking_lot::RwLock;
use plexus_registry::DownloadEvent;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Event types that can be subscribed to
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum EventType {
    PluginLoaded,
    PluginUnloaded,
    PluginStatusChanged,
    PluginError,
    PluginReloaded,
    TrustLevelChanged,
    SecurityViolation,
    DownloadStarted,
    DownloadProgress,
    DownloadCompleted,
    DownloadFailed,
    UpdateAvailable,
    PackageInstalled,
    PackageRemoved,
    /// Subscribe to all event types
    All,
}

/// Events published on the bus
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    PluginLoaded {
        plugin_id: String,
        path: PathBuf,
    },
    PluginUnloaded {
        plugin_id: String,
    },
    PluginStatusChanged {
        plugin_id: String,
        old: PluginStatus,
        new: PluginStatus,
    },
    PluginError {
        plugin_id: String,
        error: String,
    },
    PluginReloaded {
        plugin_id: String,
    },
    TrustLevelChanged {
        fingerprint: String,
        old: TrustLevel,
        new: TrustLevel,
    },
    /// `subject` is a plugin id or, before one is known, a file path
    SecurityViolation {
        subject: String,
        reason: String,
    },
    DownloadStarted {
        package_id: String,
    },
    DownloadProgress {
        package_id: String,
        received: u64,
        total: Option<u64>,
    },
    DownloadCompleted {
        package_id: String,
        path: PathBuf,
    },
    DownloadFailed {
        package_id: String,
        error: String,
    },
    UpdateAvailable {
        package_id: String,
        current: String,
        available: String,
    },
    PackageInstalled {
        package_id: String,
        version: String,
    },
    PackageRemoved {
        package_id: String,
    },
}

impl Event {
    /// Get the event type for this event
    pub fn event_type(&self) -> EventType {
        match self {
            Event::PluginLoaded { .. } => EventType::PluginLoaded,
            Event::PluginUnloaded { .. } => EventType::PluginUnloaded,
            Event::PluginStatusChanged { .. } => EventType::PluginStatusChanged,
            Event::PluginError { .. } => EventType::PluginError,
            Event::PluginReloaded { .. } => EventType::PluginReloaded,
            Event::TrustLevelChanged { .. } => EventType::TrustLevelChanged,
            Event::SecurityViolation { .. } => EventType::SecurityViolation,
            Event::DownloadStarted { .. } => EventType::DownloadStarted,
            Event::DownloadProgress { .. } => EventType::DownloadProgress,
            Event::DownloadCompleted { .. } => EventType::DownloadCompleted,
            Event::DownloadFailed { .. } => EventType::DownloadFailed,
            Event::UpdateAvailable { .. } => EventType::UpdateAvailable,
            Event::PackageInstalled { .. } => EventType::PackageInstalled,
            Event::PackageRemoved { .. } => EventType::PackageRemoved,
        }
    }

    /// Translate a download queue notification
    ///
    /// Queue bookkeeping (`Queued`) has no bus counterpart. A cancellation is
    /// reported as a failed download.
    pub fn from_download(event: &DownloadEvent) -> Option<Event> {
        match event {
            DownloadEvent::Queued { .. } => None,
            DownloadEvent::Started { package_id } => Some(Event::DownloadStarted {
                package_id: package_id.clone(),
            }),
            DownloadEvent::Progress {
                package_id,
                bytes_received,
                bytes_total,
            } => Some(Event::DownloadProgress {
                package_id: package_id.clone(),
                received: *bytes_received,
                total: *bytes_total,
            }),
            DownloadEvent::Completed { package_id, path } => Some(Event::DownloadCompleted {
                package_id: package_id.clone(),
                path: path.clone(),
            }),
            DownloadEvent::Failed { package_id, error } => Some(Event::DownloadFailed {
                package_id: package_id.clone(),
                error: error.clone(),
            }),
            DownloadEvent::Cancelled { package_id } => Some(Event::DownloadFailed {
                package_id: package_id.clone(),
                error: "cancelled".to_string(),
            }),
        }
    }
}

/// Callback invoked for each matching event
pub type EventHandler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Handle returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Synchronous pub/sub bus
pub struct EventBus {
    handlers: RwLock<HashMap<EventType, Vec<(SubscriptionId, EventHandler)>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register `handler` for `event_type` (or `EventType::All`)
    pub fn subscribe<F>(&self, event_type: EventType, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .entry(event_type)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let mut removed = false;
        for list in handlers.values_mut() {
            let before = list.len();
            list.retain(|(sub, _)| *sub != id);
            removed |= list.len() != before;
        }
        removed
    }

    /// Deliver `event` to subscribers of its type, then to `All` subscribers
    pub fn emit(&self, event: Event) {
        let snapshot: Vec<EventHandler> = {
            let handlers = self.handlers.read();
            let event_type = event.event_type();
            handlers
                .get(&event_type)
                .into_iter()
                .chain(handlers.get(&EventType::All))
                .flatten()
                .map(|(_, handler)| Arc::clone(handler))
                .collect()
        };

        for handler in snapshot {
            handler(&event);
        }
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.handlers.read().values().map(Vec::len).sum()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
