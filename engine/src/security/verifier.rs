//! Plugin signature verification
//!
//! Produces a [`SignatureInfo`] verdict for a plugin file. The order of the
//! checks matters:
//!
//! 1. cryptographic validity of the signature and the certificate chain
//! 2. trust mapping: any `Blocked` certificate makes the verdict `Invalid`,
//!    otherwise any `Trusted` certificate makes it `Valid`, else `Untrusted`
//! 3. expiry, then revocation; both may downgrade `Valid`/`Untrusted` but
//!    never `Invalid`

use crate::crypto;
use crate::security::certificate::PluginCertificate;
use crate::security::revocation::RevocationChecker;
use crate::security::signature::{self, ALGORITHM_ED25519};
use crate::security::trust_store::TrustStore;
use crate::security::{SignatureInfo, TrustLevel, VerificationStatus};
use chrono::Utc;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Longest certificate chain accepted, including trust-store completion
const MAX_CHAIN_LENGTH: usize = 8;

pub struct SignatureVerifier {
    trust_store: Arc<TrustStore>,
    revocation: Option<Arc<dyn RevocationChecker>>,
    check_revocation: bool,
    require_signatures: AtomicBool,
}

impl SignatureVerifier {
    pub fn new(trust_store: Arc<TrustStore>) -> Self {
        Self {
            trust_store,
            revocation: None,
            check_revocation: false,
            require_signatures: AtomicBool::new(false),
        }
    }

    /// Attach a revocation checker and enable revocation checking
    pub fn with_revocation(mut self, checker: Arc<dyn RevocationChecker>) -> Self {
        self.revocation = Some(checker);
        self.check_revocation = true;
        self
    }

    pub fn set_check_revocation(&mut self, enabled: bool) {
        self.check_revocation = enabled;
    }

    pub fn set_require_signatures(&self, required: bool) {
        self.require_signatures.store(required, Ordering::Relaxed);
    }

    pub fn requires_signatures(&self) -> bool {
        self.require_signatures.load(Ordering::Relaxed)
    }

    pub fn trust_store(&self) -> &Arc<TrustStore> {
        &self.trust_store
    }

    /// Verify the signature of the plugin at `path`
    pub fn verify_plugin(&self, path: &Path) -> SignatureInfo {
        let mut info = SignatureInfo::new(path);

        if !path.exists() {
            info.status = VerificationStatus::Unknown;
            info.errors.push("file not found".to_string());
            return info;
        }

        let signed = match signature::read_signature(path) {
            Ok(Some(signed)) => signed,
            Ok(None) => {
                info.status = VerificationStatus::NotSigned;
                if self.requires_signatures() {
                    info.errors.push("signature required by policy".to_string());
                }
                return info;
            }
            Err(e) => return info.invalid(format!("unreadable signature: {}", e)),
        };

        info.embedded = signed.embedded;
        info.signed_at = Some(signed.signature.signed_at);

        if !signed.signature.algorithm.eq_ignore_ascii_case(ALGORITHM_ED25519) {
            let algorithm = signed.signature.algorithm.clone();
            return info.invalid(format!("unsupported algorithm '{}'", algorithm));
        }

        let chain = match signed.signature.certificates() {
            Ok(chain) if !chain.is_empty() => chain,
            Ok(_) => return info.invalid("signature carries no certificate".to_string()),
            Err(e) => return info.invalid(format!("bad certificate: {}", e)),
        };

        let leaf = &chain[0];
        info.signer = Some(leaf.subject.clone());
        info.issuer = Some(leaf.issuer.clone());
        info.fingerprint = Some(leaf.fingerprint());

        // Payload signature against the leaf key
        let digest = crypto::hash_bytes(&signed.payload);
        let verified = leaf.verifying_key().and_then(|key| {
            let sig = crypto::parse_signature(&signed.signature.signature)?;
            crypto::verify(&key, digest.as_bytes(), &sig)
        });
        if let Err(e) = verified {
            tracing::warn!("Signature check failed for {}: {}", path.display(), e);
            return info.invalid(e.to_string());
        }

        let chain = match self.complete_chain(chain) {
            Ok(chain) => chain,
            Err(reason) => return info.invalid(reason),
        };
        info.chain = chain.iter().map(PluginCertificate::fingerprint).collect();

        // Trust mapping over the whole chain
        let levels: Vec<TrustLevel> = info
            .chain
            .iter()
            .map(|fp| self.trust_store.trust_level(fp))
            .collect();
        if levels.contains(&TrustLevel::Blocked) {
            info.trust_level = Some(TrustLevel::Blocked);
            tracing::warn!("Blocked certificate in chain of {}", path.display());
            return info.invalid("certificate is blocked".to_string());
        }
        if levels.contains(&TrustLevel::Trusted) {
            info.trust_level = Some(TrustLevel::Trusted);
            info.status = VerificationStatus::Valid;
        } else {
            info.trust_level = Some(
                levels
                    .iter()
                    .copied()
                    .find(|level| *level == TrustLevel::Conditional)
                    .unwrap_or(TrustLevel::Untrusted),
            );
            info.status = VerificationStatus::Untrusted;
        }

        let now = Utc::now();
        if let Some(expired) = chain.iter().find(|cert| !cert.is_valid_at(now)) {
            info.status = VerificationStatus::Expired;
            info.errors
                .push(format!("certificate '{}' is outside its validity period", expired.subject));
        }

        if self.check_revocation {
            if let Some(checker) = &self.revocation {
                if let Some(revoked) = chain.iter().find(|cert| checker.is_revoked(cert)) {
                    info.status = VerificationStatus::Revoked;
                    info.errors
                        .push(format!("certificate '{}' has been revoked", revoked.subject));
                }
            }
        }

        tracing::debug!("Verified {}: {:?}", path.display(), info.status);
        info
    }

    /// Check each link of the chain and extend it from the trust store up
    /// to a self-signed root
    fn complete_chain(
        &self,
        mut chain: Vec<PluginCertificate>,
    ) -> Result<Vec<PluginCertificate>, String> {
        for pair in chain.windows(2) {
            pair[0]
                .verify_issued_by(&pair[1])
                .map_err(|e| format!("broken certificate chain: {}", e))?;
        }

        loop {
            let last = chain.last().ok_or_else(|| "empty certificate chain".to_string())?;
            if last.is_self_signed() {
                return Ok(chain);
            }
            if chain.len() >= MAX_CHAIN_LENGTH {
                return Err("certificate chain too long".to_string());
            }

            let issuer = self
                .trust_store
                .certificates_for_subject(&last.issuer)
                .into_iter()
                .find(|candidate| last.verify_issued_by(candidate).is_ok())
                .ok_or_else(|| format!("issuer '{}' of '{}' is unknown", last.issuer, last.subject))?;

            if chain.iter().any(|cert| cert == &issuer) {
                return Err("certificate chain loops".to_string());
            }
            chain.push(issuer);
        }
    }
}
