//! Publisher certificates
//!
//! A certificate binds a subject name to an Ed25519 public key and is signed
//! by its issuer. Root certificates are self-signed. On disk they are
//! PEM-armoured base64 JSON.

use crate::crypto::{self, KeyPair};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::VerifyingKey;
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};

const PEM_BEGIN: &str = "-----BEGIN PLEXUS CERTIFICATE-----";
const PEM_END: &str = "-----END PLEXUS CERTIFICATE-----";
const PEM_LINE_WIDTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginCertificate {
    pub subject: String,
    pub issuer: String,
    pub serial: String,
    /// Hex-encoded Ed25519 public key of the subject
    pub public_key: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    /// Issuer's signature over the canonical body
    #[serde(default)]
    pub signature: String,
}

/// Everything except the signature, in a fixed field order
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CertificateBody<'a> {
    subject: &'a str,
    issuer: &'a str,
    serial: &'a str,
    public_key: &'a str,
    not_before: &'a DateTime<Utc>,
    not_after: &'a DateTime<Utc>,
}

impl PluginCertificate {
    fn unsigned(
        subject: &str,
        issuer: &str,
        public_key: String,
        validity: Duration,
    ) -> PluginCertificate {
        let now = Utc::now();
        PluginCertificate {
            subject: subject.to_string(),
            issuer: issuer.to_string(),
            serial: uuid::Uuid::new_v4().simple().to_string(),
            public_key,
            not_before: now,
            not_after: now + validity,
            signature: String::new(),
        }
    }

    /// Create a root certificate signed by its own key
    pub fn self_signed(subject: &str, keys: &KeyPair, validity: Duration) -> Self {
        let mut cert = Self::unsigned(subject, subject, keys.public_key_hex(), validity);
        cert.sign_with(keys);
        cert
    }

    /// Issue a certificate for `public_key` signed by `issuer`
    pub fn issue(
        subject: &str,
        public_key: &str,
        issuer: &PluginCertificate,
        issuer_keys: &KeyPair,
        validity: Duration,
    ) -> Result<Self, EngineError> {
        if issuer.public_key != issuer_keys.public_key_hex() {
            return Err(EngineError::InvalidSignature(format!(
                "key does not belong to issuer '{}'",
                issuer.subject
            )));
        }
        crypto::parse_public_key(public_key)?;

        let mut cert = Self::unsigned(subject, &issuer.subject, public_key.to_string(), validity);
        cert.sign_with(issuer_keys);
        Ok(cert)
    }

    fn sign_with(&mut self, keys: &KeyPair) {
        let signature = keys.sign(&self.body_bytes());
        self.signature = crypto::format_signature(&signature);
    }

    /// Canonical bytes covered by the issuer signature
    pub fn body_bytes(&self) -> Vec<u8> {
        let body = CertificateBody {
            subject: &self.subject,
            issuer: &self.issuer,
            serial: &self.serial,
            public_key: &self.public_key,
            not_before: &self.not_before,
            not_after: &self.not_after,
        };
        // Serialising a struct of strings and timestamps cannot fail
        serde_json::to_vec(&body).unwrap_or_default()
    }

    /// SHA-256 of the public key bytes
    ///
    /// A key that is not valid hex is fingerprinted over its text, so even
    /// malformed certificates have a stable identity that can be blocked.
    pub fn fingerprint(&self) -> String {
        let key = self.public_key.trim().to_ascii_lowercase();
        match hex::decode(&key) {
            Ok(bytes) => crypto::fingerprint(&bytes),
            Err(_) => crypto::fingerprint(key.as_bytes()),
        }
    }

    pub fn verifying_key(&self) -> Result<VerifyingKey, EngineError> {
        crypto::parse_public_key(&self.public_key)
    }

    /// Check the issuer signature against `issuer_key`
    pub fn verify_signed_by(&self, issuer_key: &VerifyingKey) -> Result<(), EngineError> {
        let signature = crypto::parse_signature(&self.signature)?;
        crypto::verify(issuer_key, &self.body_bytes(), &signature)
    }

    /// Check that `issuer` names and signed this certificate
    pub fn verify_issued_by(&self, issuer: &PluginCertificate) -> Result<(), EngineError> {
        if self.issuer != issuer.subject {
            return Err(EngineError::InvalidSignature(format!(
                "certificate '{}' names issuer '{}', not '{}'",
                self.subject, self.issuer, issuer.subject
            )));
        }
        self.verify_signed_by(&issuer.verifying_key()?)
    }

    /// Issuer equals subject and the signature verifies with the own key
    pub fn is_self_signed(&self) -> bool {
        self.issuer == self.subject
            && self
                .verifying_key()
                .and_then(|key| self.verify_signed_by(&key))
                .is_ok()
    }

    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        self.not_before <= at && at <= self.not_after
    }

    pub fn is_expired(&self) -> bool {
        !self.is_valid_at(Utc::now())
    }

    /// PEM-armoured form
    pub fn to_pem(&self) -> String {
        // Serialising a struct of strings and timestamps cannot fail
        let json = serde_json::to_vec(self).unwrap_or_default();
        let encoded = BASE64.encode(json);

        let mut pem = String::with_capacity(encoded.len() + 80);
        pem.push_str(PEM_BEGIN);
        pem.push('\n');
        for chunk in encoded.as_bytes().chunks(PEM_LINE_WIDTH) {
            pem.push_str(&String::from_utf8_lossy(chunk));
            pem.push('\n');
        }
        pem.push_str(PEM_END);
        pem.push('\n');
        pem
    }

    /// Parse a single PEM-armoured certificate
    pub fn from_pem(pem: &str) -> Result<Self, EngineError> {
        let mut certs = Self::parse_pem_bundle(pem)?;
        match certs.len() {
            1 => Ok(certs.remove(0)),
            0 => Err(EngineError::InvalidFormat("no certificate found".to_string())),
            n => Err(EngineError::InvalidFormat(format!(
                "expected one certificate, found {}",
                n
            ))),
        }
    }

    /// Parse every certificate in a PEM bundle, in order
    pub fn parse_pem_bundle(pem: &str) -> Result<Vec<Self>, EngineError> {
        let mut certs = Vec::new();
        let mut body: Option<String> = None;

        for line in pem.lines().map(str::trim) {
            if line == PEM_BEGIN {
                if body.is_some() {
                    return Err(EngineError::InvalidFormat(
                        "nested certificate block".to_string(),
                    ));
                }
                body = Some(String::new());
            } else if line == PEM_END {
                let encoded = body.take().ok_or_else(|| {
                    EngineError::InvalidFormat("certificate end without begin".to_string())
                })?;
                certs.push(Self::decode_body(&encoded)?);
            } else if let Some(encoded) = body.as_mut() {
                encoded.push_str(line);
            }
        }

        if body.is_some() {
            return Err(EngineError::InvalidFormat(
                "unterminated certificate block".to_string(),
            ));
        }
        Ok(certs)
    }

    fn decode_body(encoded: &str) -> Result<Self, EngineError> {
        let json = BASE64
            .decode(encoded)
            .map_err(|e| EngineError::InvalidFormat(format!("certificate base64: {}", e)))?;
        serde_json::from_slice(&json)
            .map_err(|e| EngineError::InvalidFormat(format!("certificate body: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_signed_root() {
        let keys = KeyPair::generate();
        let cert = PluginCertificate::self_signed("Plexus Root", &keys, Duration::days(365));
        assert!(cert.is_self_signed());
        assert!(!cert.is_expired());
        assert_eq!(cert.fingerprint(), crypto::fingerprint(&keys.verifying_key().to_bytes()));
    }

    #[test]
    fn test_issued_certificate_chain() {
        let root_keys = KeyPair::generate();
        let root = PluginCertificate::self_signed("Root", &root_keys, Duration::days(365));
        let leaf_keys = KeyPair::generate();
        let leaf = PluginCertificate::issue(
            "Publisher",
            &leaf_keys.public_key_hex(),
            &root,
            &root_keys,
            Duration::days(30),
        )
        .unwrap();

        assert!(!leaf.is_self_signed());
        assert!(leaf.verify_issued_by(&root).is_ok());

        let mut forged = leaf.clone();
        forged.subject = "Someone Else".to_string();
        assert!(forged.verify_issued_by(&root).is_err());
    }

    #[test]
    fn test_issue_requires_matching_key() {
        let root_keys = KeyPair::generate();
        let root = PluginCertificate::self_signed("Root", &root_keys, Duration::days(1));
        let other = KeyPair::generate();
        let result = PluginCertificate::issue(
            "Leaf",
            &other.public_key_hex(),
            &root,
            &other,
            Duration::days(1),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_pem_roundtrip_and_bundle() {
        let a = PluginCertificate::self_signed("A", &KeyPair::generate(), Duration::days(1));
        let b = PluginCertificate::self_signed("B", &KeyPair::generate(), Duration::days(1));

        let pem = a.to_pem();
        assert!(pem.starts_with(PEM_BEGIN));
        assert_eq!(PluginCertificate::from_pem(&pem).unwrap(), a);

        let bundle = format!("{}{}", a.to_pem(), b.to_pem());
        let parsed = PluginCertificate::parse_pem_bundle(&bundle).unwrap();
        assert_eq!(parsed, vec![a, b]);
        assert!(PluginCertificate::from_pem(&bundle).is_err());
    }

    #[test]
    fn test_malformed_pem() {
        assert!(PluginCertificate::from_pem("garbage").is_err());
        assert!(PluginCertificate::from_pem(&format!("{}\n!!!\n{}", PEM_BEGIN, PEM_END)).is_err());
        assert!(PluginCertificate::parse_pem_bundle(PEM_BEGIN).is_err());
    }

    #[test]
    fn test_validity_window() {
        let mut cert = PluginCertificate::self_signed("X", &KeyPair::generate(), Duration::days(1));
        cert.not_after = Utc::now() - Duration::hours(1);
        assert!(cert.is_expired());
    }
}
