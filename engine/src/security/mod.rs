//! Plugin security: signatures, trust and policy
//!
//! - [`certificate`]: publisher certificates and PEM encoding
//! - [`signature`]: sidecar / embedded signature containers and signing
//! - [`trust_store`]: fingerprint → trust level, persisted as JSON
//! - [`revocation`]: revocation checking
//! - [`verifier`]: the verification verdict for a plugin file
//! - [`policy`]: security policy and sandbox profiles
//!
//! [`SecurityManager`] ties these together and is the gate the plugin
//! manager consults before a binary is instantiated.

pub mod certificate;
pub mod policy;
pub mod revocation;
pub mod signature;
pub mod trust_store;
pub mod verifier;

pub use certificate::PluginCertificate;
pub use policy::{SandboxProfile, SecurityPolicy};
pub use revocation::{RevocationChecker, RevocationList};
pub use signature::{PluginSignature, PluginSigner};
pub use trust_store::{TrustStore, TrustStoreEntry};
pub use verifier::SignatureVerifier;

use crate::config::SecurityConfig;
use crate::events::{Event, EventBus};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Trust assigned to a certificate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustLevel {
    Trusted,
    /// Accepted with reservations; verifies as `Untrusted`
    Conditional,
    Untrusted,
    Blocked,
}

impl std::str::FromStr for TrustLevel {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trusted" => Ok(TrustLevel::Trusted),
            "conditional" => Ok(TrustLevel::Conditional),
            "untrusted" => Ok(TrustLevel::Untrusted),
            "blocked" => Ok(TrustLevel::Blocked),
            other => Err(EngineError::InvalidFormat(format!(
                "unknown trust level '{}'",
                other
            ))),
        }
    }
}

/// Verdict of a signature verification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum VerificationStatus {
    Valid,
    Invalid,
    Untrusted,
    Expired,
    Revoked,
    Unknown,
    NotSigned,
}

/// Result of verifying one plugin file
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureInfo {
    pub path: PathBuf,
    pub status: VerificationStatus,
    /// Subject of the signing certificate
    pub signer: Option<String>,
    pub issuer: Option<String>,
    /// Fingerprint of the signing certificate
    pub fingerprint: Option<String>,
    /// Fingerprints of the verified chain, signer first
    pub chain: Vec<String>,
    pub trust_level: Option<TrustLevel>,
    pub signed_at: Option<DateTime<Utc>>,
    pub embedded: bool,
    pub errors: Vec<String>,
}

impl SignatureInfo {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            status: VerificationStatus::Unknown,
            signer: None,
            issuer: None,
            fingerprint: None,
            chain: Vec::new(),
            trust_level: None,
            signed_at: None,
            embedded: false,
            errors: Vec::new(),
        }
    }

    pub(crate) fn invalid(mut self, reason: String) -> Self {
        self.status = VerificationStatus::Invalid;
        self.errors.push(reason);
        self
    }

    pub fn is_valid(&self) -> bool {
        self.status == VerificationStatus::Valid
    }
}

/// Isolation level a plugin runs at
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    Basic,
    Standard,
    Strict,
}

/// Permissions that are only granted per plugin, never by policy
const GRANT_ONLY_PERMISSIONS: [&str; 3] = ["process", "ipc", "system"];

fn normalize_permission(permission: &str) -> String {
    match permission.trim().to_ascii_lowercase().as_str() {
        "file_system" | "filesystem" => "filesystem".to_string(),
        other => other.to_string(),
    }
}

fn is_known_permission(permission: &str) -> bool {
    matches!(permission, "network" | "filesystem" | "registry")
        || GRANT_ONLY_PERMISSIONS.contains(&permission)
}

/// Central security gate
pub struct SecurityManager {
    policy: RwLock<SecurityPolicy>,
    policy_path: Option<PathBuf>,
    /// Signatures required regardless of policy (`security.require_signatures`)
    signatures_required: bool,
    verifier: SignatureVerifier,
    grants: RwLock<HashMap<String, BTreeSet<String>>>,
    sandboxes: RwLock<HashMap<String, SandboxProfile>>,
    events: Option<Arc<EventBus>>,
}

impl SecurityManager {
    pub fn new(
        policy: SecurityPolicy,
        verifier: SignatureVerifier,
        events: Option<Arc<EventBus>>,
    ) -> Self {
        Self {
            policy: RwLock::new(policy),
            policy_path: None,
            signatures_required: false,
            verifier,
            grants: RwLock::new(HashMap::new()),
            sandboxes: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Build from configuration: policy file, trust store and revocation list
    pub fn from_config(
        config: &SecurityConfig,
        events: Option<Arc<EventBus>>,
    ) -> Result<Self, EngineError> {
        let policy = SecurityPolicy::load_merged(&config.policy_file)?;
        let trust_store = Arc::new(TrustStore::open(&config.trust_store, events.clone())?);

        let mut verifier = SignatureVerifier::new(trust_store);
        if config.check_revocation {
            let list = RevocationList::open(&config.revocation_list)?;
            verifier = verifier.with_revocation(Arc::new(list));
        }
        verifier.set_require_signatures(config.require_signatures || !policy.allow_unsigned_plugins);

        let mut manager = Self::new(policy, verifier, events);
        manager.policy_path = Some(config.policy_file.clone());
        manager.signatures_required = config.require_signatures;
        Ok(manager)
    }

    pub fn policy(&self) -> SecurityPolicy {
        self.policy.read().clone()
    }

    /// Swap the policy; unsigned plugins become flagged by the verifier
    /// when the new policy disallows them
    pub fn set_policy(&self, policy: SecurityPolicy) {
        let mut current = self.policy.write();
        self.verifier
            .set_require_signatures(self.signatures_required || !policy.allow_unsigned_plugins);
        *current = policy;
    }

    /// Persist the policy to the file it was loaded from
    pub fn save_policy(&self) -> Result<(), EngineError> {
        let path = self
            .policy_path
            .as_deref()
            .ok_or_else(|| EngineError::Config("no policy file configured".to_string()))?;
        self.policy.read().save(path)
    }

    pub fn trust_store(&self) -> &Arc<TrustStore> {
        self.verifier.trust_store()
    }

    pub fn verifier(&self) -> &SignatureVerifier {
        &self.verifier
    }

    pub fn verify_plugin(&self, path: &Path) -> SignatureInfo {
        self.verifier.verify_plugin(path)
    }

    /// Security level a plugin at `path` should run at
    pub fn evaluate_security_level(&self, path: &Path) -> SecurityLevel {
        let info = self.verify_plugin(path);
        self.level_for(&info)
    }

    /// Security level for an existing verification result
    pub fn level_for(&self, info: &SignatureInfo) -> SecurityLevel {
        match info.status {
            VerificationStatus::NotSigned
            | VerificationStatus::Invalid
            | VerificationStatus::Unknown => SecurityLevel::Basic,
            _ if self.policy.read().sandbox_mode => SecurityLevel::Strict,
            _ => SecurityLevel::Standard,
        }
    }

    /// Load gate: verify `path` and decide whether it may be loaded
    pub fn validate_plugin(&self, path: &Path) -> Result<SignatureInfo, EngineError> {
        let info = self.verify_plugin(path);
        let policy = self.policy.read().clone();

        let allowed = match info.status {
            VerificationStatus::Valid => true,
            VerificationStatus::NotSigned => policy.allow_unsigned_plugins,
            VerificationStatus::Untrusted => !policy.require_trusted_publisher,
            _ => false,
        };

        if allowed {
            tracing::debug!("Security check passed for {}: {:?}", path.display(), info.status);
            return Ok(info);
        }

        let reason = match info.errors.first() {
            Some(detail) => format!("signature status {:?}: {}", info.status, detail),
            None => format!("signature status {:?}", info.status),
        };
        tracing::warn!("Security check failed for {}: {}", path.display(), reason);
        self.report_violation(&path.display().to_string(), &reason);
        Err(EngineError::SecurityViolation(format!(
            "{}: {}",
            path.display(),
            reason
        )))
    }

    fn report_violation(&self, subject: &str, reason: &str) {
        if let Some(events) = &self.events {
            events.emit(Event::SecurityViolation {
                subject: subject.to_string(),
                reason: reason.to_string(),
            });
        }
    }

    /// True if every requested permission is allowed for `plugin`
    pub fn check_permissions(&self, plugin: &str, requested: &[String]) -> bool {
        self.denied_permissions(plugin, requested).is_empty()
    }

    /// The requested permissions that are not allowed
    ///
    /// Allow-list semantics: names the policy does not know are denied.
    pub fn denied_permissions(&self, plugin: &str, requested: &[String]) -> Vec<String> {
        let policy = self.policy.read();
        let grants = self.grants.read();
        let granted = grants.get(plugin);

        let denied: Vec<String> = requested
            .iter()
            .filter(|permission| {
                let name = normalize_permission(permission);
                let explicitly_granted = granted.map(|g| g.contains(&name)).unwrap_or(false);
                let allowed = match name.as_str() {
                    "network" => policy.allow_network_access || explicitly_granted,
                    "filesystem" => policy.allow_file_system_access || explicitly_granted,
                    "registry" => policy.allow_registry_access || explicitly_granted,
                    other if GRANT_ONLY_PERMISSIONS.contains(&other) => explicitly_granted,
                    _ => false,
                };
                !allowed
            })
            .cloned()
            .collect();

        if !denied.is_empty() {
            tracing::warn!("Permissions denied for {}: {}", plugin, denied.join(", "));
            self.report_violation(plugin, &format!("permissions denied: {}", denied.join(", ")));
        }
        denied
    }

    pub fn grant_permission(&self, plugin: &str, permission: &str) -> Result<(), EngineError> {
        let name = normalize_permission(permission);
        if !is_known_permission(&name) {
            return Err(EngineError::PermissionDenied(format!(
                "unknown permission '{}'",
                permission
            )));
        }
        tracing::info!("Granted '{}' to {}", name, plugin);
        self.grants
            .write()
            .entry(plugin.to_string())
            .or_default()
            .insert(name);
        Ok(())
    }

    pub fn revoke_permission(&self, plugin: &str, permission: &str) -> bool {
        let name = normalize_permission(permission);
        self.grants
            .write()
            .get_mut(plugin)
            .map(|set| set.remove(&name))
            .unwrap_or(false)
    }

    /// Record the sandbox for a plugin about to run
    pub fn apply_sandbox(&self, plugin: &str, level: SecurityLevel) -> SandboxProfile {
        let profile = SandboxProfile::for_level(plugin, level, &self.policy.read());
        tracing::info!(
            "Sandbox for {}: {:?} (memory {} MB, cpu {}%)",
            plugin,
            level,
            profile.max_memory_mb,
            profile.max_cpu_percent
        );
        self.sandboxes
            .write()
            .insert(plugin.to_string(), profile.clone());
        profile
    }

    pub fn sandbox_profile(&self, plugin: &str) -> Option<SandboxProfile> {
        self.sandboxes.read().get(plugin).cloned()
    }

    pub fn release_sandbox(&self, plugin: &str) -> Option<SandboxProfile> {
        self.sandboxes.write().remove(plugin)
    }
}
