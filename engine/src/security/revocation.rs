//! Certificate revocation

use crate::security::certificate::PluginCertificate;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Answers whether a certificate has been revoked by its issuer
pub trait RevocationChecker: Send + Sync {
    fn is_revoked(&self, certificate: &PluginCertificate) -> bool;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RevocationFile {
    #[serde(default)]
    serials: BTreeSet<String>,
    #[serde(default)]
    fingerprints: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<DateTime<Utc>>,
}

/// Revocation list stored as JSON: `{serials: [...], fingerprints: [...]}`
pub struct RevocationList {
    path: Option<PathBuf>,
    data: RwLock<RevocationFile>,
}

impl RevocationList {
    /// In-memory list
    pub fn new() -> Self {
        Self {
            path: None,
            data: RwLock::new(RevocationFile::default()),
        }
    }

    /// Load a list from disk; a missing file is an empty list
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, EngineError> {
        let path = path.into();
        let data = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            serde_json::from_str(&contents)
                .map_err(|e| EngineError::InvalidFormat(format!("revocation list: {}", e)))?
        } else {
            RevocationFile::default()
        };
        Ok(Self {
            path: Some(path),
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn revoke_serial(&self, serial: &str) {
        let mut data = self.data.write();
        data.serials.insert(serial.to_string());
        data.updated_at = Some(Utc::now());
    }

    pub fn revoke_fingerprint(&self, fingerprint: &str) {
        let mut data = self.data.write();
        data.fingerprints.insert(fingerprint.to_ascii_lowercase());
        data.updated_at = Some(Utc::now());
    }

    pub fn len(&self) -> usize {
        let data = self.data.read();
        data.serials.len() + data.fingerprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn save(&self) -> Result<(), EngineError> {
        let Some(path) = &self.path else {
            return Err(EngineError::Config(
                "revocation list has no backing file".to_string(),
            ));
        };
        let json = serde_json::to_string_pretty(&*self.data.read())?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)?;
        Ok(())
    }
}

impl Default for RevocationList {
    fn default() -> Self {
        Self::new()
    }
}

impl RevocationChecker for RevocationList {
    fn is_revoked(&self, certificate: &PluginCertificate) -> bool {
        let data = self.data.read();
        data.serials.contains(&certificate.serial)
            || data.fingerprints.contains(&certificate.fingerprint())
    }
}
