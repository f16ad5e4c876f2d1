//! Trust store: certificate fingerprint → trust level
//!
//! Persisted as a JSON object keyed by fingerprint. Every change of the
//! effective trust level of a fingerprint is published on the event bus as
//! `TrustLevelChanged`, after the store lock is released.

use crate::events::{Event, EventBus};
use crate::security::certificate::PluginCertificate;
use crate::security::TrustLevel;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustStoreEntry {
    /// Map key in the file, repeated here for convenience
    #[serde(skip)]
    pub fingerprint: String,
    /// PEM certificate; empty for fingerprints blocked without a certificate
    #[serde(default)]
    pub certificate: String,
    #[serde(default)]
    pub subject: String,
    pub trust_level: TrustLevel,
    #[serde(default)]
    pub description: String,
    pub added_date: DateTime<Utc>,
    #[serde(default = "default_enabled")]
    pub is_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

fn default_enabled() -> bool {
    true
}

impl TrustStoreEntry {
    /// Level used for verification decisions
    ///
    /// Blocking survives disabling; any other disabled entry counts as untrusted.
    pub fn effective_level(&self) -> TrustLevel {
        match self.trust_level {
            TrustLevel::Blocked => TrustLevel::Blocked,
            _ if !self.is_enabled => TrustLevel::Untrusted,
            level => level,
        }
    }

    pub fn parsed_certificate(&self) -> Option<PluginCertificate> {
        if self.certificate.is_empty() {
            return None;
        }
        PluginCertificate::from_pem(&self.certificate).ok()
    }

    fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at < now).unwrap_or(false)
    }
}

pub struct TrustStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, TrustStoreEntry>>,
    events: Option<Arc<EventBus>>,
}

impl TrustStore {
    /// Empty store persisted at `path`
    pub fn new(path: impl Into<PathBuf>, events: Option<Arc<EventBus>>) -> Self {
        Self {
            path: path.into(),
            entries: RwLock::new(BTreeMap::new()),
            events,
        }
    }

    /// Create a store and load `path` if it exists
    pub fn open(path: impl Into<PathBuf>, events: Option<Arc<EventBus>>) -> Result<Self, EngineError> {
        let store = Self::new(path, events);
        store.load()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the in-memory entries with the file contents
    ///
    /// A missing file is an empty store; a corrupt one is an error and leaves
    /// the current entries untouched.
    pub fn load(&self) -> Result<usize, EngineError> {
        if !self.path.exists() {
            tracing::debug!("No trust store at {}, starting empty", self.path.display());
            return Ok(0);
        }

        let contents = std::fs::read_to_string(&self.path)?;
        let mut entries: BTreeMap<String, TrustStoreEntry> = serde_json::from_str(&contents)
            .map_err(|e| {
                tracing::error!("Corrupt trust store {}: {}", self.path.display(), e);
                EngineError::InvalidFormat(format!("trust store: {}", e))
            })?;
        for (fingerprint, entry) in entries.iter_mut() {
            entry.fingerprint = fingerprint.clone();
        }

        let count = entries.len();
        *self.entries.write() = entries;
        tracing::info!("Loaded {} trust store entries", count);
        Ok(count)
    }

    /// Write the store to disk
    pub fn save(&self) -> Result<(), EngineError> {
        let entries = self.entries.read();
        let json = serde_json::to_string_pretty(&*entries)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, json)?;
        tracing::debug!("Saved {} trust store entries", entries.len());
        Ok(())
    }

    fn notify(&self, fingerprint: &str, old: TrustLevel, new: TrustLevel) {
        if old == new {
            return;
        }
        tracing::info!("Trust level of {}: {:?} -> {:?}", fingerprint, old, new);
        if let Some(events) = &self.events {
            events.emit(Event::TrustLevelChanged {
                fingerprint: fingerprint.to_string(),
                old,
                new,
            });
        }
    }

    /// Add a certificate at `level`; returns its fingerprint
    pub fn add_certificate(
        &self,
        certificate: &PluginCertificate,
        level: TrustLevel,
        description: &str,
    ) -> Result<String, EngineError> {
        let fingerprint = certificate.fingerprint();
        let entry = TrustStoreEntry {
            fingerprint: fingerprint.clone(),
            certificate: certificate.to_pem(),
            subject: certificate.subject.clone(),
            trust_level: level,
            description: description.to_string(),
            added_date: Utc::now(),
            is_enabled: true,
            block_reason: None,
            expires_at: Some(certificate.not_after),
        };

        {
            let mut entries = self.entries.write();
            if entries.contains_key(&fingerprint) {
                return Err(EngineError::AlreadyExists(format!(
                    "certificate {} is already in the trust store",
                    fingerprint
                )));
            }
            entries.insert(fingerprint.clone(), entry);
        }

        tracing::info!("Added certificate '{}' ({})", certificate.subject, fingerprint);
        self.notify(&fingerprint, TrustLevel::Untrusted, level);
        Ok(fingerprint)
    }

    /// Import every certificate of a PEM file at `level`
    ///
    /// Certificates already present are skipped. Returns the new fingerprints.
    pub fn import_certificate(&self, pem_path: &Path, level: TrustLevel) -> Result<Vec<String>, EngineError> {
        if !pem_path.exists() {
            return Err(EngineError::FileNotFound(pem_path.to_path_buf()));
        }
        let pem = std::fs::read_to_string(pem_path)?;
        let certificates = PluginCertificate::parse_pem_bundle(&pem)?;
        if certificates.is_empty() {
            return Err(EngineError::InvalidFormat(format!(
                "no certificate in {}",
                pem_path.display()
            )));
        }

        let description = format!("Imported from {}", pem_path.display());
        let mut added = Vec::new();
        for certificate in &certificates {
            match self.add_certificate(certificate, level, &description) {
                Ok(fingerprint) => added.push(fingerprint),
                Err(EngineError::AlreadyExists(_)) => {
                    tracing::debug!("Skipping known certificate '{}'", certificate.subject)
                }
                Err(e) => return Err(e),
            }
        }
        Ok(added)
    }

    pub fn remove_certificate(&self, fingerprint: &str) -> Result<TrustStoreEntry, EngineError> {
        let removed = self
            .entries
            .write()
            .remove(fingerprint)
            .ok_or_else(|| EngineError::CertificateNotFound(fingerprint.to_string()))?;

        self.notify(fingerprint, removed.effective_level(), TrustLevel::Untrusted);
        Ok(removed)
    }

    /// Effective trust level; unknown fingerprints are `Untrusted`
    pub fn trust_level(&self, fingerprint: &str) -> TrustLevel {
        self.entries
            .read()
            .get(fingerprint)
            .map(TrustStoreEntry::effective_level)
            .unwrap_or(TrustLevel::Untrusted)
    }

    pub fn entry(&self, fingerprint: &str) -> Option<TrustStoreEntry> {
        self.entries.read().get(fingerprint).cloned()
    }

    pub fn entries(&self) -> Vec<TrustStoreEntry> {
        self.entries.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Stored certificates whose subject is `subject`
    pub fn certificates_for_subject(&self, subject: &str) -> Vec<PluginCertificate> {
        self.entries
            .read()
            .values()
            .filter(|entry| entry.subject == subject)
            .filter_map(TrustStoreEntry::parsed_certificate)
            .collect()
    }

    pub fn set_trust_level(&self, fingerprint: &str, level: TrustLevel) -> Result<(), EngineError> {
        let (old, new) = {
            let mut entries = self.entries.write();
            let entry = entries
                .get_mut(fingerprint)
                .ok_or_else(|| EngineError::CertificateNotFound(fingerprint.to_string()))?;
            let old = entry.effective_level();
            entry.trust_level = level;
            if level != TrustLevel::Blocked {
                entry.block_reason = None;
            }
            (old, entry.effective_level())
        };

        self.notify(fingerprint, old, new);
        Ok(())
    }

    /// Block a fingerprint, known or not
    pub fn block_certificate(&self, fingerprint: &str, reason: &str) {
        let old = {
            let mut entries = self.entries.write();
            let entry = entries
                .entry(fingerprint.to_string())
                .or_insert_with(|| TrustStoreEntry {
                    fingerprint: fingerprint.to_string(),
                    certificate: String::new(),
                    subject: String::new(),
                    trust_level: TrustLevel::Untrusted,
                    description: String::new(),
                    added_date: Utc::now(),
                    is_enabled: true,
                    block_reason: None,
                    expires_at: None,
                });
            let old = entry.effective_level();
            entry.trust_level = TrustLevel::Blocked;
            entry.block_reason = Some(reason.to_string());
            old
        };

        tracing::warn!("Blocked certificate {}: {}", fingerprint, reason);
        self.notify(fingerprint, old, TrustLevel::Blocked);
    }

    /// Move a blocked entry to `Untrusted`
    pub fn unblock_certificate(&self, fingerprint: &str) -> Result<(), EngineError> {
        let new = {
            let mut entries = self.entries.write();
            let entry = entries
                .get_mut(fingerprint)
                .ok_or_else(|| EngineError::CertificateNotFound(fingerprint.to_string()))?;
            if entry.trust_level != TrustLevel::Blocked {
                return Err(EngineError::InvalidState(format!(
                    "certificate {} is not blocked",
                    fingerprint
                )));
            }
            entry.trust_level = TrustLevel::Untrusted;
            entry.block_reason = None;
            entry.effective_level()
        };

        self.notify(fingerprint, TrustLevel::Blocked, new);
        Ok(())
    }

    pub fn set_enabled(&self, fingerprint: &str, enabled: bool) -> Result<(), EngineError> {
        let (old, new) = {
            let mut entries = self.entries.write();
            let entry = entries
                .get_mut(fingerprint)
                .ok_or_else(|| EngineError::CertificateNotFound(fingerprint.to_string()))?;
            let old = entry.effective_level();
            entry.is_enabled = enabled;
            (old, entry.effective_level())
        };

        self.notify(fingerprint, old, new);
        Ok(())
    }

    /// Drop entries whose certificate has expired
    ///
    /// Blocked entries are kept so the block outlives the certificate.
    pub fn cleanup_expired(&self) -> Vec<String> {
        let now = Utc::now();
        let removed: Vec<TrustStoreEntry> = {
            let mut entries = self.entries.write();
            let expired: Vec<String> = entries
                .values()
                .filter(|e| e.trust_level != TrustLevel::Blocked && e.is_expired_at(now))
                .map(|e| e.fingerprint.clone())
                .collect();
            expired
                .iter()
                .filter_map(|fingerprint| entries.remove(fingerprint))
                .collect()
        };

        for entry in &removed {
            tracing::info!("Removed expired certificate '{}'", entry.subject);
            self.notify(&entry.fingerprint, entry.effective_level(), TrustLevel::Untrusted);
        }
        removed.into_iter().map(|e| e.fingerprint).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::events::EventType;
    use chrono::Duration;
    use parking_lot::Mutex;
    use tempfile::TempDir;

    fn cert(subject: &str) -> PluginCertificate {
        PluginCertificate::self_signed(subject, &KeyPair::generate(), Duration::days(30))
    }

    fn store_with_events() -> (TrustStore, Arc<Mutex<Vec<(TrustLevel, TrustLevel)>>>) {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.subscribe(EventType::TrustLevelChanged, move |event| {
            if let Event::TrustLevelChanged { old, new, .. } = event {
                sink.lock().push((*old, *new));
            }
        });
        (TrustStore::new("/tmp/unused-trust.json", Some(bus)), seen)
    }

    #[test]
    fn test_unknown_fingerprint_is_untrusted() {
        let store = TrustStore::new("/tmp/unused-trust.json", None);
        assert_eq!(store.trust_level("deadbeef"), TrustLevel::Untrusted);
    }

    #[test]
    fn test_level_transitions_emit_events() {
        let (store, seen) = store_with_events();
        let fp = store
            .add_certificate(&cert("Publisher"), TrustLevel::Trusted, "test")
            .unwrap();

        store.block_certificate(&fp, "compromised key");
        assert_eq!(store.trust_level(&fp), TrustLevel::Blocked);
        assert_eq!(store.entry(&fp).unwrap().block_reason.as_deref(), Some("compromised key"));

        store.unblock_certificate(&fp).unwrap();
        assert_eq!(store.trust_level(&fp), TrustLevel::Untrusted);

        store.set_trust_level(&fp, TrustLevel::Conditional).unwrap();

        assert_eq!(
            *seen.lock(),
            vec![
                (TrustLevel::Untrusted, TrustLevel::Trusted),
                (TrustLevel::Trusted, TrustLevel::Blocked),
                (TrustLevel::Blocked, TrustLevel::Untrusted),
                (TrustLevel::Untrusted, TrustLevel::Conditional),
            ]
        );
    }

    #[test]
    fn test_unblock_requires_blocked() {
        let store = TrustStore::new("/tmp/unused-trust.json", None);
        let fp = store.add_certificate(&cert("P"), TrustLevel::Trusted, "").unwrap();
        assert!(matches!(
            store.unblock_certificate(&fp),
            Err(EngineError::InvalidState(_))
        ));
        assert!(matches!(
            store.unblock_certificate("missing"),
            Err(EngineError::CertificateNotFound(_))
        ));
    }

    #[test]
    fn test_disabled_entries() {
        let store = TrustStore::new("/tmp/unused-trust.json", None);
        let fp = store.add_certificate(&cert("P"), TrustLevel::Trusted, "").unwrap();
        store.set_enabled(&fp, false).unwrap();
        assert_eq!(store.trust_level(&fp), TrustLevel::Untrusted);

        store.block_certificate(&fp, "bad");
        assert_eq!(store.trust_level(&fp), TrustLevel::Blocked);
    }

    #[test]
    fn test_block_unknown_fingerprint() {
        let store = TrustStore::new("/tmp/unused-trust.json", None);
        store.block_certificate("cafebabe", "known bad");
        assert_eq!(store.trust_level("cafebabe"), TrustLevel::Blocked);
    }

    #[test]
    fn test_persistence_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trust.json");
        let store = TrustStore::new(&path, None);
        let fp = store.add_certificate(&cert("Persisted"), TrustLevel::Trusted, "root").unwrap();
        store.save().unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw[&fp]["trustLevel"], "trusted");
        assert_eq!(raw[&fp]["isEnabled"], true);
        assert!(raw[&fp]["certificate"].as_str().unwrap().contains("BEGIN PLEXUS CERTIFICATE"));

        let reloaded = TrustStore::open(&path, None).unwrap();
        let entry = reloaded.entry(&fp).unwrap();
        assert_eq!(entry.fingerprint, fp);
        assert_eq!(entry.subject, "Persisted");
        assert_eq!(reloaded.trust_level(&fp), TrustLevel::Trusted);
    }

    #[test]
    fn test_corrupt_store() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trust.json");
        std::fs::write(&path, "[1, 2").unwrap();
        assert!(matches!(
            TrustStore::open(&path, None),
            Err(EngineError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_import_and_cleanup() {
        let dir = TempDir::new().unwrap();
        let pem_path = dir.path().join("bundle.pem");
        let mut expired = cert("Old");
        expired.not_after = Utc::now() - Duration::days(1);
        let fresh = cert("Fresh");
        std::fs::write(&pem_path, format!("{}{}", expired.to_pem(), fresh.to_pem())).unwrap();

        let store = TrustStore::new(dir.path().join("trust.json"), None);
        let added = store.import_certificate(&pem_path, TrustLevel::Trusted).unwrap();
        assert_eq!(added.len(), 2);
        assert!(store.import_certificate(&pem_path, TrustLevel::Trusted).unwrap().is_empty());

        let removed = store.cleanup_expired();
        assert_eq!(removed, vec![expired.fingerprint()]);
        assert_eq!(store.len(), 1);
        assert_eq!(store.certificates_for_subject("Fresh"), vec![fresh]);
    }
}
