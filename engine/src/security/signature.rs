//! Plugin signature containers
//!
//! A signature is stored either next to the binary in `<file>.sig`, or
//! appended to the binary itself as a trailer:
//!
//! ```text
//! [payload][signature json][u32 LE json length]["PLXSIG01"]
//! ```
//!
//! The embedded form wins when both exist. The signed message is the BLAKE3
//! hex digest of the payload, i.e. the file without its trailer.

use crate::crypto::{self, KeyPair};
use crate::security::certificate::PluginCertificate;
use chrono::{DateTime, Utc};
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Trailer magic closing an embedded signature
pub const EMBEDDED_MAGIC: &[u8; 8] = b"PLXSIG01";

/// Extension of sidecar signature files
pub const SIDECAR_EXTENSION: &str = "sig";

pub const ALGORITHM_ED25519: &str = "ed25519";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginSignature {
    pub algorithm: String,
    /// "ed25519:hex" signature over the payload digest
    pub signature: String,
    /// Signer certificate first, then its issuers, PEM-armoured
    pub certificate_chain: Vec<String>,
    pub signed_at: DateTime<Utc>,
}

impl PluginSignature {
    /// Decode the PEM chain
    pub fn certificates(&self) -> Result<Vec<PluginCertificate>, EngineError> {
        self.certificate_chain
            .iter()
            .map(|pem| PluginCertificate::from_pem(pem))
            .collect()
    }
}

/// A signature found for a plugin file, with the bytes it covers
#[derive(Debug)]
pub struct SignedPayload {
    pub signature: PluginSignature,
    pub payload: Vec<u8>,
    pub embedded: bool,
}

/// Path of the sidecar signature for `path`
pub fn sidecar_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(SIDECAR_EXTENSION);
    path.with_file_name(name)
}

/// Split an embedded trailer off `bytes`
///
/// `Ok(None)` when the file carries no trailer; an error when a trailer is
/// present but damaged.
pub fn split_embedded(bytes: &[u8]) -> Result<Option<(&[u8], PluginSignature)>, EngineError> {
    let magic_len = EMBEDDED_MAGIC.len();
    if bytes.len() < magic_len + 4 || &bytes[bytes.len() - magic_len..] != EMBEDDED_MAGIC {
        return Ok(None);
    }

    let len_end = bytes.len() - magic_len;
    let len_start = len_end - 4;
    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&bytes[len_start..len_end]);
    let json_len = u32::from_le_bytes(len_bytes) as usize;

    if json_len > len_start {
        return Err(EngineError::InvalidFormat(
            "embedded signature length exceeds file size".to_string(),
        ));
    }

    let json_start = len_start - json_len;
    let signature: PluginSignature = serde_json::from_slice(&bytes[json_start..len_start])
        .map_err(|e| EngineError::InvalidFormat(format!("embedded signature: {}", e)))?;
    Ok(Some((&bytes[..json_start], signature)))
}

/// Find the signature of a plugin file, embedded or sidecar
///
/// `Ok(None)` means the file is unsigned. Damaged signature data is an error.
pub fn read_signature(path: &Path) -> Result<Option<SignedPayload>, EngineError> {
    let bytes = std::fs::read(path)?;

    if let Some((payload, signature)) = split_embedded(&bytes)? {
        return Ok(Some(SignedPayload {
            signature,
            payload: payload.to_vec(),
            embedded: true,
        }));
    }

    let sidecar = sidecar_path(path);
    if !sidecar.exists() {
        return Ok(None);
    }

    let json = std::fs::read(&sidecar)?;
    let signature: PluginSignature = serde_json::from_slice(&json)
        .map_err(|e| EngineError::InvalidFormat(format!("signature file: {}", e)))?;
    Ok(Some(SignedPayload {
        signature,
        payload: bytes,
        embedded: false,
    }))
}

/// Produces signatures for plugin binaries
pub struct PluginSigner {
    keys: KeyPair,
    chain: Vec<PluginCertificate>,
}

impl PluginSigner {
    /// `chain[0]` must be the certificate of `keys`
    pub fn new(keys: KeyPair, chain: Vec<PluginCertificate>) -> Result<Self, EngineError> {
        let leaf = chain.first().ok_or_else(|| {
            EngineError::InvalidFormat("signer needs at least one certificate".to_string())
        })?;
        if leaf.public_key != keys.public_key_hex() {
            return Err(EngineError::InvalidSignature(format!(
                "signing key does not match certificate '{}'",
                leaf.subject
            )));
        }
        Ok(Self { keys, chain })
    }

    pub fn certificate(&self) -> &PluginCertificate {
        // new() guarantees a non-empty chain
        &self.chain[0]
    }

    /// Sign a payload
    pub fn sign_bytes(&self, payload: &[u8]) -> PluginSignature {
        let digest = crypto::hash_bytes(payload);
        let signature = self.keys.sign(digest.as_bytes());
        PluginSignature {
            algorithm: ALGORITHM_ED25519.to_string(),
            signature: crypto::format_signature(&signature),
            certificate_chain: self.chain.iter().map(PluginCertificate::to_pem).collect(),
            signed_at: Utc::now(),
        }
    }

    /// Write `<path>.sig` next to the plugin; returns the sidecar path
    pub fn sign_sidecar(&self, path: &Path) -> Result<PathBuf, EngineError> {
        let bytes = std::fs::read(path)?;
        let payload = match split_embedded(&bytes)? {
            Some((payload, _)) => payload,
            None => &bytes[..],
        };
        let signature = self.sign_bytes(payload);

        let sidecar = sidecar_path(path);
        std::fs::write(&sidecar, serde_json::to_vec_pretty(&signature)?)?;
        tracing::info!("Signed {} -> {}", path.display(), sidecar.display());
        Ok(sidecar)
    }

    /// Append (or replace) an embedded signature trailer
    pub fn sign_embedded(&self, path: &Path) -> Result<(), EngineError> {
        let bytes = std::fs::read(path)?;
        let payload = match split_embedded(&bytes)? {
            Some((payload, _)) => payload.to_vec(),
            None => bytes,
        };
        let signature = self.sign_bytes(&payload);
        let json = serde_json::to_vec(&signature)?;
        let json_len = u32::try_from(json.len())
            .map_err(|_| EngineError::InvalidFormat("signature too large".to_string()))?;

        let mut out = payload;
        out.extend_from_slice(&json);
        out.extend_from_slice(&json_len.to_le_bytes());
        out.extend_from_slice(EMBEDDED_MAGIC);
        std::fs::write(path, out)?;

        tracing::info!("Embedded signature into {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn signer() -> PluginSigner {
        let keys = KeyPair::generate();
        let cert = PluginCertificate::self_signed("Publisher", &keys, Duration::days(30));
        PluginSigner::new(keys, vec![cert]).unwrap()
    }

    #[test]
    fn test_sidecar_path() {
        assert_eq!(
            sidecar_path(Path::new("/p/libecho.so")),
            PathBuf::from("/p/libecho.so.sig")
        );
    }

    #[test]
    fn test_unsigned_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("libplain.so");
        std::fs::write(&path, b"binary").unwrap();
        assert!(read_signature(&path).unwrap().is_none());
    }

    #[test]
    fn test_embedded_trailer_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("libecho.so");
        std::fs::write(&path, b"binary payload").unwrap();

        let signer = signer();
        signer.sign_embedded(&path).unwrap();
        // Re-signing replaces the trailer instead of stacking one
        signer.sign_embedded(&path).unwrap();

        let found = read_signature(&path).unwrap().unwrap();
        assert!(found.embedded);
        assert_eq!(found.payload, b"binary payload");
        assert_eq!(found.signature.certificates().unwrap()[0], *signer.certificate());
    }

    #[test]
    fn test_sidecar_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("libecho.so");
        std::fs::write(&path, b"binary payload").unwrap();

        signer().sign_sidecar(&path).unwrap();
        let found = read_signature(&path).unwrap().unwrap();
        assert!(!found.embedded);
        assert_eq!(found.payload, b"binary payload");
        assert_eq!(found.signature.algorithm, ALGORITHM_ED25519);
    }

    #[test]
    fn test_damaged_trailer() {
        let mut bytes = b"payload".to_vec();
        bytes.extend_from_slice(&1000u32.to_le_bytes());
        bytes.extend_from_slice(EMBEDDED_MAGIC);
        assert!(split_embedded(&bytes).is_err());

        let mut bytes = b"payload{not json".to_vec();
        bytes.extend_from_slice(&9u32.to_le_bytes());
        bytes.extend_from_slice(EMBEDDED_MAGIC);
        assert!(split_embedded(&bytes).is_err());
    }

    #[test]
    fn test_signer_rejects_foreign_certificate() {
        let cert = PluginCertificate::self_signed("X", &KeyPair::generate(), Duration::days(1));
        assert!(PluginSigner::new(KeyPair::generate(), vec![cert]).is_err());
        assert!(PluginSigner::new(KeyPair::generate(), Vec::new()).is_err());
    }
}
