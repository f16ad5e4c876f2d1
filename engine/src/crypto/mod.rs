//! Cryptographic primitives
//!
//! This module provides the building blocks for plugin signing:
//! - Ed25519 key pairs, signing and verification
//! - BLAKE3 file and payload digests (the signed message)
//! - SHA-256 public key fingerprints
//!
//! A plugin signature is an Ed25519 signature over the lowercase hex BLAKE3
//! digest of the plugin payload, never over the raw bytes.

use ed25519_dalek::{
    Signature, Signer, SigningKey, Verifier, VerifyingKey, PUBLIC_KEY_LENGTH, SECRET_KEY_LENGTH,
    SIGNATURE_LENGTH,
};
use rand::rngs::OsRng;
use rand::RngCore;
use sdk::errors::EngineError;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Prefix used when rendering signatures as text
pub const SIGNATURE_PREFIX: &str = "ed25519:";

/// An Ed25519 signing key with its public half
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    /// Generate a fresh key pair from the OS random source
    pub fn generate() -> Self {
        let mut secret = [0u8; SECRET_KEY_LENGTH];
        OsRng.fill_bytes(&mut secret);
        Self {
            signing_key: SigningKey::from_bytes(&secret),
        }
    }

    /// Rebuild a key pair from a hex-encoded 32-byte secret
    pub fn from_secret_hex(secret_hex: &str) -> Result<Self, EngineError> {
        let bytes = hex::decode(secret_hex.trim())
            .map_err(|e| EngineError::InvalidFormat(format!("secret key hex: {}", e)))?;
        let secret: [u8; SECRET_KEY_LENGTH] = bytes.try_into().map_err(|_| {
            EngineError::InvalidFormat(format!("secret key must be {} bytes", SECRET_KEY_LENGTH))
        })?;
        Ok(Self {
            signing_key: SigningKey::from_bytes(&secret),
        })
    }

    /// Load a key pair from a file holding the hex secret
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        if !path.exists() {
            return Err(EngineError::FileNotFound(path.to_path_buf()));
        }
        Self::from_secret_hex(&std::fs::read_to_string(path)?)
    }

    /// Write the hex secret to `path`
    pub fn save(&self, path: &Path) -> Result<(), EngineError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.secret_hex())?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.verifying_key().to_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }
}

/// BLAKE3 digest of `data` as lowercase hex
pub fn hash_bytes(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// BLAKE3 digest of a file, read in chunks
pub fn hash_file(path: &Path) -> Result<String, EngineError> {
    let mut file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();

    let mut buffer = [0u8; 8192];
    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.finalize().to_hex().to_string())
}

/// SHA-256 fingerprint of raw bytes as lowercase hex
pub fn fingerprint(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Parse a hex-encoded Ed25519 public key
pub fn parse_public_key(key_hex: &str) -> Result<VerifyingKey, EngineError> {
    let bytes = hex::decode(key_hex.trim())
        .map_err(|e| EngineError::InvalidFormat(format!("public key hex: {}", e)))?;
    let bytes: [u8; PUBLIC_KEY_LENGTH] = bytes.try_into().map_err(|_| {
        EngineError::InvalidFormat(format!("public key must be {} bytes", PUBLIC_KEY_LENGTH))
    })?;
    VerifyingKey::from_bytes(&bytes)
        .map_err(|e| EngineError::InvalidFormat(format!("public key: {}", e)))
}

/// Parse a signature string in format "ed25519:hex_string" (prefix optional)
pub fn parse_signature(sig_str: &str) -> Result<Signature, EngineError> {
    let hex = sig_str.trim();
    let hex = hex.strip_prefix(SIGNATURE_PREFIX).unwrap_or(hex);

    let bytes = hex::decode(hex).map_err(|e| {
        tracing::error!("Failed to decode signature hex: {}", e);
        EngineError::InvalidSignature("signature is not valid hex".to_string())
    })?;

    let sig_bytes: [u8; SIGNATURE_LENGTH] = bytes.try_into().map_err(|bytes: Vec<u8>| {
        tracing::error!(
            "Invalid signature length: expected {}, got {}",
            SIGNATURE_LENGTH,
            bytes.len()
        );
        EngineError::InvalidSignature(format!("signature must be {} bytes", SIGNATURE_LENGTH))
    })?;

    Ok(Signature::from_bytes(&sig_bytes))
}

/// Render a signature as "ed25519:hex"
pub fn format_signature(signature: &Signature) -> String {
    format!("{}{}", SIGNATURE_PREFIX, hex::encode(signature.to_bytes()))
}

/// Verify `signature` over `message` with `key`
pub fn verify(key: &VerifyingKey, message: &[u8], signature: &Signature) -> Result<(), EngineError> {
    key.verify(message, signature).map_err(|e| {
        tracing::debug!("Signature verification failed: {}", e);
        EngineError::InvalidSignature("signature does not match".to_string())
    })
}
