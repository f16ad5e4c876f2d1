//! Security policy and sandbox profiles
//!
//! The policy starts from built-in defaults. An optional JSON file overrides
//! them key by key; keys missing from the file keep their default value.

use crate::security::SecurityLevel;
use chrono::{DateTime, Utc};
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityPolicy {
    pub allow_unsigned_plugins: bool,
    pub require_trusted_publisher: bool,
    /// Run every signed plugin at `Strict`
    pub sandbox_mode: bool,
    /// Megabytes
    pub max_memory_usage: u64,
    /// Percent of one core
    pub max_cpu_usage: u32,
    pub allow_network_access: bool,
    pub allow_file_system_access: bool,
    pub allow_registry_access: bool,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            allow_unsigned_plugins: false,
            require_trusted_publisher: true,
            sandbox_mode: false,
            max_memory_usage: 512,
            max_cpu_usage: 80,
            allow_network_access: true,
            allow_file_system_access: true,
            allow_registry_access: false,
        }
    }
}

impl SecurityPolicy {
    /// Defaults merged with the JSON object at `path`, if the file exists
    pub fn load_merged(path: &Path) -> Result<Self, EngineError> {
        if !path.exists() {
            tracing::debug!("No policy file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let overrides: serde_json::Value = serde_json::from_str(&contents)
            .map_err(|e| EngineError::InvalidFormat(format!("security policy: {}", e)))?;
        let policy = Self::default().merged_with(&overrides)?;
        tracing::info!("Loaded security policy from {}", path.display());
        Ok(policy)
    }

    /// Apply the keys present in `overrides` on top of `self`
    pub fn merged_with(&self, overrides: &serde_json::Value) -> Result<Self, EngineError> {
        let overrides = overrides.as_object().ok_or_else(|| {
            EngineError::InvalidFormat("security policy must be a JSON object".to_string())
        })?;

        let mut merged = serde_json::to_value(self)?;
        if let Some(base) = merged.as_object_mut() {
            for (key, value) in overrides {
                if base.contains_key(key) {
                    base.insert(key.clone(), value.clone());
                } else {
                    tracing::warn!("Ignoring unknown security policy key '{}'", key);
                }
            }
        }

        serde_json::from_value(merged)
            .map_err(|e| EngineError::InvalidFormat(format!("security policy: {}", e)))
    }

    pub fn save(&self, path: &Path) -> Result<(), EngineError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Restrictions recorded for a loaded plugin
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxProfile {
    pub plugin_id: String,
    pub level: SecurityLevel,
    pub max_memory_mb: u64,
    pub max_cpu_percent: u32,
    pub network: bool,
    pub file_system: bool,
    pub registry: bool,
    pub applied_at: DateTime<Utc>,
}

impl SandboxProfile {
    /// Derive the restrictions for `level` from `policy`
    ///
    /// `Basic` plugins get no network or registry access and half the
    /// resource budget; `Strict` plugins get a quarter and no registry.
    pub fn for_level(plugin_id: &str, level: SecurityLevel, policy: &SecurityPolicy) -> Self {
        let (memory, cpu, network, file_system, registry) = match level {
            SecurityLevel::Basic => (
                policy.max_memory_usage / 2,
                policy.max_cpu_usage / 2,
                false,
                policy.allow_file_system_access,
                false,
            ),
            SecurityLevel::Standard => (
                policy.max_memory_usage,
                policy.max_cpu_usage,
                policy.allow_network_access,
                policy.allow_file_system_access,
                policy.allow_registry_access,
            ),
            SecurityLevel::Strict => (
                policy.max_memory_usage / 4,
                policy.max_cpu_usage / 4,
                policy.allow_network_access,
                false,
                false,
            ),
        };

        Self {
            plugin_id: plugin_id.to_string(),
            level,
            max_memory_mb: memory,
            max_cpu_percent: cpu,
            network,
            file_system,
            registry,
            applied_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_merge_overrides_only_present_keys() {
        let base = SecurityPolicy::default();
        let merged = base
            .merged_with(&serde_json::json!({
                "sandboxMode": true,
                "maxMemoryUsage": 128,
                "somethingElse": 1
            }))
            .unwrap();

        assert!(merged.sandbox_mode);
        assert_eq!(merged.max_memory_usage, 128);
        assert_eq!(merged.max_cpu_usage, base.max_cpu_usage);
        assert_eq!(merged.allow_unsigned_plugins, base.allow_unsigned_plugins);
    }

    #[test]
    fn test_merge_rejects_bad_values() {
        let base = SecurityPolicy::default();
        assert!(base.merged_with(&serde_json::json!([1, 2])).is_err());
        assert!(base
            .merged_with(&serde_json::json!({"sandboxMode": "yes"}))
            .is_err());
    }

    #[test]
    fn test_load_merged_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("policy.json");
        assert_eq!(
            SecurityPolicy::load_merged(&path).unwrap(),
            SecurityPolicy::default()
        );

        std::fs::write(&path, r#"{"allowUnsignedPlugins": true}"#).unwrap();
        let policy = SecurityPolicy::load_merged(&path).unwrap();
        assert!(policy.allow_unsigned_plugins);
        assert!(policy.require_trusted_publisher);
    }

    #[test]
    fn test_sandbox_levels() {
        let policy = SecurityPolicy::default();
        let basic = SandboxProfile::for_level("p", SecurityLevel::Basic, &policy);
        assert!(!basic.network);
        assert_eq!(basic.max_memory_mb, policy.max_memory_usage / 2);

        let strict = SandboxProfile::for_level("p", SecurityLevel::Strict, &policy);
        assert!(!strict.file_system);
        assert!(!strict.registry);
    }
}
