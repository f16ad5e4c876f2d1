//! Plugin capability interface
//!
//! Every plugin implements the flat [`Plugin`] trait. Specialised behaviour
//! (services, UI views, network endpoints, data sources, scripting) is exposed
//! through optional accessors such as [`Plugin::as_service`] that return
//! `None` unless the plugin opts in. The host never downcasts: it checks the
//! declared [`Capabilities`] bitmask and calls the accessor.

use crate::errors::EngineError;
use crate::manifest::DependencyConstraint;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// ABI version of the plugin interface. Bumped on any breaking trait change.
pub const PLUGIN_API_VERSION: u32 = 1;

/// Exported symbol returning the plugin's API version
pub const API_VERSION_SYMBOL: &[u8] = b"plexus_plugin_api_version";

/// Exported symbol constructing the plugin instance
pub const CREATE_PLUGIN_SYMBOL: &[u8] = b"plexus_create_plugin";

/// Bitset of capabilities a plugin declares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capabilities(u32);

impl Capabilities {
    pub const NONE: Capabilities = Capabilities(0);
    pub const UI: Capabilities = Capabilities(1 << 0);
    pub const SERVICE: Capabilities = Capabilities(1 << 1);
    pub const FILTER: Capabilities = Capabilities(1 << 2);
    pub const NETWORK: Capabilities = Capabilities(1 << 3);
    pub const DATABASE: Capabilities = Capabilities(1 << 4);
    pub const FILE_SYSTEM: Capabilities = Capabilities(1 << 5);
    pub const SCRIPTING: Capabilities = Capabilities(1 << 6);
    pub const HOT_RELOAD: Capabilities = Capabilities(1 << 7);
    pub const ASYNC_INIT: Capabilities = Capabilities(1 << 8);
    pub const CONFIGURATION: Capabilities = Capabilities(1 << 9);
    pub const LOGGING: Capabilities = Capabilities(1 << 10);
    pub const SECURITY: Capabilities = Capabilities(1 << 11);
    pub const THREADING: Capabilities = Capabilities(1 << 12);

    const NAMES: [(Capabilities, &'static str); 13] = [
        (Self::UI, "ui"),
        (Self::SERVICE, "service"),
        (Self::FILTER, "filter"),
        (Self::NETWORK, "network"),
        (Self::DATABASE, "database"),
        (Self::FILE_SYSTEM, "filesystem"),
        (Self::SCRIPTING, "scripting"),
        (Self::HOT_RELOAD, "hot_reload"),
        (Self::ASYNC_INIT, "async_init"),
        (Self::CONFIGURATION, "configuration"),
        (Self::LOGGING, "logging"),
        (Self::SECURITY, "security"),
        (Self::THREADING, "threading"),
    ];

    /// Build from raw bits, dropping unknown bits
    pub fn from_bits_truncate(bits: u32) -> Self {
        let known = Self::NAMES.iter().fold(0, |acc, (cap, _)| acc | cap.0);
        Capabilities(bits & known)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True if every bit of `other` is set in `self`
    pub fn contains(self, other: Capabilities) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Capabilities) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Capabilities) {
        self.0 &= !other.0;
    }

    /// Parse a single capability name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        Self::NAMES
            .iter()
            .find(|(_, n)| *n == lower)
            .map(|(cap, _)| *cap)
    }

    /// Names of the set capabilities, in bit order
    pub fn names(self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(cap, _)| self.contains(*cap))
            .map(|(_, n)| *n)
            .collect()
    }
}

impl BitOr for Capabilities {
    type Output = Capabilities;

    fn bitor(self, rhs: Self) -> Self::Output {
        Capabilities(self.0 | rhs.0)
    }
}

impl BitOrAssign for Capabilities {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "none");
        }
        write!(f, "{}", self.names().join("|"))
    }
}

/// Lifecycle state reported by a plugin instance itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginState {
    Unloaded,
    Initializing,
    Running,
    Paused,
    Stopping,
    Stopped,
    Error,
}

/// Static description a plugin reports about itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginMetadata {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub version: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub license: String,
    #[serde(default)]
    pub dependencies: Vec<DependencyConstraint>,
    /// Permission names requested from the host (e.g. "network")
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl PluginMetadata {
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: String::new(),
            version: version.into(),
            author: String::new(),
            license: String::new(),
            dependencies: Vec::new(),
            permissions: Vec::new(),
        }
    }

    pub fn with_dependency(mut self, dependency: DependencyConstraint) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.permissions.push(permission.into());
        self
    }
}

/// Trait that every plugin must implement
///
/// `shutdown` and `cleanup` must not fail; the host still guards them
/// against panics.
pub trait Plugin: Send + Sync {
    /// Identity and declared requirements
    fn metadata(&self) -> &PluginMetadata;

    /// Declared capability mask
    fn capabilities(&self) -> Capabilities;

    /// Called once after the plugin is loaded
    fn initialize(&mut self) -> Result<(), EngineError>;

    /// Stop any running work. Must be safe to call more than once.
    fn shutdown(&mut self);

    /// Release resources before the library is closed
    fn cleanup(&mut self) {}

    /// Current self-reported state
    fn state(&self) -> PluginState;

    /// Apply a JSON configuration object
    fn configure(&mut self, _config: &Value) -> Result<(), EngineError> {
        Ok(())
    }

    /// Run a named command
    fn execute_command(&mut self, name: &str, _params: &Value) -> Result<Value, EngineError> {
        Err(EngineError::UnknownCommand(name.to_string()))
    }

    /// Names accepted by `execute_command`
    fn available_commands(&self) -> Vec<String> {
        Vec::new()
    }

    fn pause(&mut self) -> Result<(), EngineError> {
        Err(EngineError::InvalidState(format!(
            "plugin '{}' does not support pause",
            self.metadata().id
        )))
    }

    fn resume(&mut self) -> Result<(), EngineError> {
        Err(EngineError::InvalidState(format!(
            "plugin '{}' does not support resume",
            self.metadata().id
        )))
    }

    /// Snapshot taken before a hot reload
    fn save_state(&self) -> Option<Value> {
        None
    }

    /// Restore a snapshot produced by `save_state` of a previous instance
    fn restore_state(&mut self, _state: Value) -> Result<(), EngineError> {
        Ok(())
    }

    fn as_service(&mut self) -> Option<&mut dyn ServicePlugin> {
        None
    }

    fn as_ui(&mut self) -> Option<&mut dyn UiPlugin> {
        None
    }

    fn as_network(&mut self) -> Option<&mut dyn NetworkPlugin> {
        None
    }

    fn as_data_provider(&mut self) -> Option<&mut dyn DataProviderPlugin> {
        None
    }

    fn as_scripting(&mut self) -> Option<&mut dyn ScriptingPlugin> {
        None
    }
}

/// Long-running background service
pub trait ServicePlugin {
    fn start_service(&mut self) -> Result<(), EngineError>;
    fn stop_service(&mut self) -> Result<(), EngineError>;
    fn is_service_running(&self) -> bool;
}

/// Contributes views to the host UI. Rendering belongs to the host.
pub trait UiPlugin {
    fn view_ids(&self) -> Vec<String>;
    fn view_title(&self, view_id: &str) -> Option<String>;
}

/// Exposes network endpoints or protocol handlers
pub trait NetworkPlugin {
    fn supported_protocols(&self) -> Vec<String>;
    fn handle_request(&mut self, protocol: &str, payload: &Value) -> Result<Value, EngineError>;
}

/// Serves records from a named data source
pub trait DataProviderPlugin {
    fn data_sources(&self) -> Vec<String>;
    fn query(&mut self, source: &str, query: &Value) -> Result<Vec<Value>, EngineError>;
}

/// Evaluates scripts in one or more languages
pub trait ScriptingPlugin {
    fn languages(&self) -> Vec<String>;
    fn evaluate(&mut self, language: &str, source: &str) -> Result<Value, EngineError>;
}

/// Export the native entry points for a plugin type
///
/// The type must implement [`Plugin`] and `Default`.
///
/// ```ignore
/// #[derive(Default)]
/// struct Echo { /* ... */ }
/// impl sdk::Plugin for Echo { /* ... */ }
/// sdk::declare_plugin!(Echo);
/// ```
#[macro_export]
macro_rules! declare_plugin {
    ($plugin_type:ty) => {
        #[no_mangle]
        pub extern "C" fn plexus_plugin_api_version() -> u32 {
            $crate::plugin::PLUGIN_API_VERSION
        }

        #[no_mangle]
        #[allow(improper_ctypes_definitions)]
        pub extern "C" fn plexus_create_plugin() -> *mut dyn $crate::plugin::Plugin {
            let plugin: Box<dyn $crate::plugin::Plugin> =
                Box::new(<$plugin_type as ::std::default::Default>::default());
            Box::into_raw(plugin)
        }
    };
}
