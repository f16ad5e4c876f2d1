//! Shared fixtures for engine integration tests
//!
//! Plugins are linked into the test binary and served through a
//! `StaticRegistry`; the library files on disk are placeholders that get
//! verified, scanned and watched like real ones.

#![allow(dead_code)]

use chrono::Duration;
use plexus_engine::crypto::KeyPair;
use plexus_engine::events::EventBus;
use plexus_engine::loader::StaticRegistry;
use plexus_engine::manager::PluginManager;
use plexus_engine::platform;
use plexus_engine::security::policy::SecurityPolicy;
use plexus_engine::security::{
    PluginCertificate, PluginSigner, SecurityManager, SignatureVerifier, TrustStore,
};
use sdk::errors::EngineError;
use sdk::{Capabilities, DependencyConstraint, Plugin, PluginMetadata, PluginState};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Knobs shared between a test and every instance its factory creates
#[derive(Clone, Default)]
pub struct Behavior {
    pub fail_init: Arc<AtomicBool>,
    pub panic_on_shutdown: Arc<AtomicBool>,
    pub inits: Arc<AtomicUsize>,
    pub shutdowns: Arc<AtomicUsize>,
    pub instances: Arc<AtomicUsize>,
}

pub struct TestPlugin {
    metadata: PluginMetadata,
    capabilities: Capabilities,
    state: PluginState,
    counter: i64,
    behavior: Behavior,
}

impl TestPlugin {
    pub fn new(metadata: PluginMetadata, capabilities: Capabilities, behavior: Behavior) -> Self {
        behavior.instances.fetch_add(1, Ordering::SeqCst);
        Self {
            metadata,
            capabilities,
            state: PluginState::Unloaded,
            counter: 0,
            behavior,
        }
    }
}

impl Plugin for TestPlugin {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn initialize(&mut self) -> Result<(), EngineError> {
        self.behavior.inits.fetch_add(1, Ordering::SeqCst);
        if self.behavior.fail_init.load(Ordering::SeqCst) {
            self.state = PluginState::Error;
            return Err(EngineError::Plugin("refusing to start".to_string()));
        }
        self.state = PluginState::Running;
        Ok(())
    }

    fn shutdown(&mut self) {
        self.behavior.shutdowns.fetch_add(1, Ordering::SeqCst);
        if self.behavior.panic_on_shutdown.load(Ordering::SeqCst) {
            panic!("shutdown exploded");
        }
        self.state = PluginState::Stopped;
    }

    fn state(&self) -> PluginState {
        self.state
    }

    fn execute_command(&mut self, name: &str, _params: &Value) -> Result<Value, EngineError> {
        match name {
            "increment" => {
                self.counter += 1;
                Ok(json!(self.counter))
            }
            "get" => Ok(json!(self.counter)),
            other => Err(EngineError::UnknownCommand(other.to_string())),
        }
    }

    fn available_commands(&self) -> Vec<String> {
        vec!["increment".to_string(), "get".to_string()]
    }

    fn pause(&mut self) -> Result<(), EngineError> {
        self.state = PluginState::Paused;
        Ok(())
    }

    fn resume(&mut self) -> Result<(), EngineError> {
        self.state = PluginState::Running;
        Ok(())
    }

    fn save_state(&self) -> Option<Value> {
        Some(json!({ "counter": self.counter }))
    }

    fn restore_state(&mut self, state: Value) -> Result<(), EngineError> {
        self.counter = state["counter"]
            .as_i64()
            .ok_or_else(|| EngineError::InvalidFormat("missing counter".to_string()))?;
        Ok(())
    }
}

/// Registers plugins and writes their placeholder libraries
pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub registry: Arc<StaticRegistry>,
    pub events: Arc<EventBus>,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            registry: Arc::new(StaticRegistry::new()),
            events: Arc::new(EventBus::new()),
        }
    }

    pub fn manager(&self) -> PluginManager {
        PluginManager::new(
            Arc::clone(&self.registry) as Arc<dyn plexus_engine::loader::ModuleLoader>,
            Arc::clone(&self.events),
        )
    }

    pub fn secured_manager(&self, security: Arc<SecurityManager>) -> PluginManager {
        self.manager().with_security(security)
    }

    /// Register `id` with the given metadata and write its library file
    pub fn add_plugin(&self, metadata: PluginMetadata, behavior: Behavior) -> PathBuf {
        self.add_plugin_with(metadata, Capabilities::SERVICE, behavior)
    }

    pub fn add_plugin_with(
        &self,
        metadata: PluginMetadata,
        capabilities: Capabilities,
        behavior: Behavior,
    ) -> PathBuf {
        let id = metadata.id.clone();
        self.registry.register(&id, move || {
            Some(Box::new(TestPlugin::new(
                metadata.clone(),
                capabilities,
                behavior.clone(),
            )) as Box<dyn Plugin>)
        });
        write_library(self.dir.path(), &id)
    }

    pub fn add_simple(&self, id: &str) -> PathBuf {
        self.add_plugin(PluginMetadata::new(id, "1.0.0"), Behavior::default())
    }

    pub fn add_dependent(&self, id: &str, dependency: &str, range: &str) -> PathBuf {
        let metadata = PluginMetadata::new(id, "1.0.0")
            .with_dependency(DependencyConstraint::new(dependency).with_range(range));
        self.add_plugin(metadata, Behavior::default())
    }
}

pub fn write_library(dir: &Path, id: &str) -> PathBuf {
    let path = dir.join(platform::library_filename(id));
    std::fs::write(&path, format!("plugin body of {}", id)).unwrap();
    path
}

/// A self-signed publisher
pub fn publisher(subject: &str) -> (PluginSigner, PluginCertificate) {
    let keys = KeyPair::generate();
    let cert = PluginCertificate::self_signed(subject, &keys, Duration::days(30));
    let signer = PluginSigner::new(keys, vec![cert.clone()]).unwrap();
    (signer, cert)
}

/// Security manager over a fresh trust store in `dir`
pub fn security_manager(
    dir: &Path,
    policy: SecurityPolicy,
    events: Option<Arc<EventBus>>,
) -> (Arc<SecurityManager>, Arc<TrustStore>) {
    let store = Arc::new(TrustStore::new(dir.join("trust.json"), events.clone()));
    let verifier = SignatureVerifier::new(Arc::clone(&store));
    verifier.set_require_signatures(!policy.allow_unsigned_plugins);
    let manager = Arc::new(SecurityManager::new(policy, verifier, events));
    (manager, store)
}
