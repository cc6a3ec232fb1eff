//! Secret cipher
//!
//! AES-256-GCM sealing for credential payloads at rest. The master key is loaded
//! once at startup and shared read-only; retired keys stay available for unsealing
//! payloads written before a key rotation.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::RngCore;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tenantflow_core::SealedSecret;
use thiserror::Error;

pub const MASTER_KEY_ENV: &str = "TENANTFLOW_MASTER_KEY";
pub const KEY_VERSION_ENV: &str = "TENANTFLOW_KEY_VERSION";
/// Comma separated `version:hex` pairs of retired keys
pub const PREVIOUS_KEYS_ENV: &str = "TENANTFLOW_PREVIOUS_KEYS";

const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("master key not configured: {0} is not set")]
    MissingKey(&'static str),

    #[error("malformed master key: {0}")]
    MalformedKey(String),

    #[error("no key registered for key version {0}")]
    UnknownKeyVersion(u32),

    #[error("malformed sealed payload: {0}")]
    MalformedPayload(String),

    #[error("sealed payload failed integrity verification")]
    IntegrityFailure,

    #[error("sealing failed")]
    SealFailure,
}

/// Process-wide sealing service. Cloning shares the key material.
#[derive(Clone)]
pub struct SecretCipher {
    current_version: u32,
    keys: Arc<BTreeMap<u32, Aes256Gcm>>,
}

impl SecretCipher {
    /// Create a cipher from a 32 byte master key
    pub fn new(master_key: &[u8], key_version: u32) -> Result<Self, CipherError> {
        let mut keys = BTreeMap::new();
        keys.insert(key_version, build_key(master_key)?);
        Ok(Self { current_version: key_version, keys: Arc::new(keys) })
    }

    /// Create a cipher from a 64 character hex master key
    pub fn from_hex(master_key_hex: &str, key_version: u32) -> Result<Self, CipherError> {
        Self::new(&decode_hex_key(master_key_hex)?, key_version)
    }

    /// Add a retired key so payloads sealed under `key_version` can still be unsealed
    pub fn with_previous_key(mut self, key_version: u32, key: &[u8]) -> Result<Self, CipherError> {
        if key_version == self.current_version {
            return Err(CipherError::MalformedKey(format!(
                "key version {} is already the current version",
                key_version
            )));
        }
        let mut keys = (*self.keys).clone();
        keys.insert(key_version, build_key(key)?);
        self.keys = Arc::new(keys);
        Ok(self)
    }

    /// Load the key ring from the environment
    pub fn from_env() -> Result<Self, CipherError> {
        let master_key_hex =
            std::env::var(MASTER_KEY_ENV).map_err(|_| CipherError::MissingKey(MASTER_KEY_ENV))?;

        let key_version = match std::env::var(KEY_VERSION_ENV) {
            Ok(raw) => raw.trim().parse::<u32>().map_err(|_| {
                CipherError::MalformedKey(format!("{} must be a positive integer", KEY_VERSION_ENV))
            })?,
            Err(_) => 1,
        };

        let mut cipher = Self::from_hex(master_key_hex.trim(), key_version)?;

        if let Ok(previous) = std::env::var(PREVIOUS_KEYS_ENV) {
            for entry in previous.split(',').map(str::trim).filter(|e| !e.is_empty()) {
                let (version, hex_key) = entry.split_once(':').ok_or_else(|| {
                    CipherError::MalformedKey(format!("{} entries must be version:hex", PREVIOUS_KEYS_ENV))
                })?;
                let version = version.trim().parse::<u32>().map_err(|_| {
                    CipherError::MalformedKey(format!("invalid key version '{}'", version))
                })?;
                cipher = cipher.with_previous_key(version, &decode_hex_key(hex_key.trim())?)?;
            }
        }

        tracing::debug!(
            key_version = cipher.current_version,
            retired_keys = cipher.keys.len() - 1,
            "secret cipher initialised"
        );
        Ok(cipher)
    }

    pub fn current_key_version(&self) -> u32 {
        self.current_version
    }

    /// Seal a plaintext under the current key
    pub fn seal(&self, plaintext: &[u8]) -> Result<SealedSecret, CipherError> {
        self.seal_bound(plaintext, &[])
    }

    /// Unseal a payload produced by [`SecretCipher::seal`]
    pub fn unseal(&self, sealed: &SealedSecret) -> Result<Vec<u8>, CipherError> {
        self.unseal_bound(sealed, &[])
    }

    /// Seal with associated data; the same bytes must be supplied to unseal.
    pub fn seal_bound(&self, plaintext: &[u8], associated_data: &[u8]) -> Result<SealedSecret, CipherError> {
        let cipher = self
            .keys
            .get(&self.current_version)
            .ok_or(CipherError::UnknownKeyVersion(self.current_version))?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, Payload { msg: plaintext, aad: associated_data })
            .map_err(|_| CipherError::SealFailure)?;

        Ok(SealedSecret {
            data: STANDARD.encode(ciphertext),
            nonce: STANDARD.encode(nonce.as_slice()),
            key_version: self.current_version,
        })
    }

    pub fn unseal_bound(&self, sealed: &SealedSecret, associated_data: &[u8]) -> Result<Vec<u8>, CipherError> {
        let cipher = self
            .keys
            .get(&sealed.key_version)
            .ok_or(CipherError::UnknownKeyVersion(sealed.key_version))?;

        let nonce_bytes = STANDARD
            .decode(&sealed.nonce)
            .map_err(|e| CipherError::MalformedPayload(format!("nonce: {}", e)))?;
        if nonce_bytes.len() != NONCE_LEN {
            return Err(CipherError::MalformedPayload(format!(
                "nonce must be {} bytes, got {}",
                NONCE_LEN,
                nonce_bytes.len()
            )));
        }
        let ciphertext = STANDARD
            .decode(&sealed.data)
            .map_err(|e| CipherError::MalformedPayload(format!("data: {}", e)))?;

        cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), Payload { msg: &ciphertext, aad: associated_data })
            .map_err(|_| CipherError::IntegrityFailure)
    }

    /// Generate a fresh random master key
    pub fn generate_master_key() -> [u8; 32] {
        let mut key = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut key);
        key
    }

    /// Hex representation of a fresh master key
    pub fn generate_master_key_hex() -> String {
        hex::encode(Self::generate_master_key())
    }
}

impl fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretCipher")
            .field("current_version", &self.current_version)
            .field("key_versions", &self.keys.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

fn build_key(key: &[u8]) -> Result<Aes256Gcm, CipherError> {
    if key.len() != 32 {
        return Err(CipherError::MalformedKey(format!(
            "master key must be 32 bytes, got {}",
            key.len()
        )));
    }
    Aes256Gcm::new_from_slice(key).map_err(|e| CipherError::MalformedKey(e.to_string()))
}

fn decode_hex_key(master_key_hex: &str) -> Result<Vec<u8>, CipherError> {
    let key = hex::decode(master_key_hex)
        .map_err(|_| CipherError::MalformedKey("expected a hex string".to_string()))?;
    if key.len() != 32 {
        return Err(CipherError::MalformedKey(
            "master key must be 32 bytes (64 hex characters)".to_string(),
        ));
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> SecretCipher {
        SecretCipher::new(&SecretCipher::generate_master_key(), 1).unwrap()
    }

    #[test]
    fn seal_unseal_roundtrip() {
        let cipher = cipher();
        for plaintext in [&b""[..], b"x", b"1//0gRefreshTokenValue", &[0u8, 255, 7, 0][..]] {
            let sealed = cipher.seal(plaintext).unwrap();
            assert_eq!(cipher.unseal(&sealed).unwrap(), plaintext);
        }
    }

    #[test]
    fn sealed_payload_is_not_plaintext() {
        let sealed = cipher().seal(b"developer-token").unwrap();
        assert_ne!(sealed.data, STANDARD.encode(b"developer-token"));
        assert_eq!(sealed.key_version, 1);
    }

    #[test]
    fn nonces_differ_between_seals() {
        let cipher = cipher();
        let a = cipher.seal(b"same").unwrap();
        let b = cipher.seal(b"same").unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.data, b.data);
    }

    #[test]
    fn tampered_ciphertext_fails_integrity() {
        let cipher = cipher();
        let mut sealed = cipher.seal(b"secret").unwrap();
        let mut raw = STANDARD.decode(&sealed.data).unwrap();
        raw[0] ^= 0x01;
        sealed.data = STANDARD.encode(raw);
        assert!(matches!(cipher.unseal(&sealed), Err(CipherError::IntegrityFailure)));
    }

    #[test]
    fn tampered_nonce_fails_integrity() {
        let cipher = cipher();
        let mut sealed = cipher.seal(b"secret").unwrap();
        let mut nonce = STANDARD.decode(&sealed.nonce).unwrap();
        nonce[11] ^= 0x80;
        sealed.nonce = STANDARD.encode(nonce);
        assert!(matches!(cipher.unseal(&sealed), Err(CipherError::IntegrityFailure)));
    }

    #[test]
    fn wrong_key_fails_integrity() {
        let sealed = cipher().seal(b"secret").unwrap();
        assert!(matches!(cipher().unseal(&sealed), Err(CipherError::IntegrityFailure)));
    }

    #[test]
    fn associated_data_must_match() {
        let cipher = cipher();
        let sealed = cipher.seal_bound(b"secret", b"acme/google_ads").unwrap();
        assert_eq!(cipher.unseal_bound(&sealed, b"acme/google_ads").unwrap(), b"secret");
        assert!(matches!(
            cipher.unseal_bound(&sealed, b"globex/google_ads"),
            Err(CipherError::IntegrityFailure)
        ));
    }

    #[test]
    fn truncated_blob_is_rejected() {
        let cipher = cipher();
        let mut sealed = cipher.seal(b"secret").unwrap();
        sealed.nonce = STANDARD.encode([0u8; 4]);
        assert!(matches!(cipher.unseal(&sealed), Err(CipherError::MalformedPayload(_))));

        let mut sealed = cipher.seal(b"secret").unwrap();
        sealed.data = "not base64 !!".to_string();
        assert!(matches!(cipher.unseal(&sealed), Err(CipherError::MalformedPayload(_))));
    }

    #[test]
    fn unknown_key_version_is_rejected() {
        let cipher = cipher();
        let mut sealed = cipher.seal(b"secret").unwrap();
        sealed.key_version = 9;
        assert!(matches!(cipher.unseal(&sealed), Err(CipherError::UnknownKeyVersion(9))));
    }

    #[test]
    fn previous_keys_unseal_old_payloads() {
        let old_key = SecretCipher::generate_master_key();
        let old = SecretCipher::new(&old_key, 1).unwrap();
        let sealed = old.seal(b"legacy").unwrap();

        let rotated = SecretCipher::new(&SecretCipher::generate_master_key(), 2)
            .unwrap()
            .with_previous_key(1, &old_key)
            .unwrap();
        assert_eq!(rotated.unseal(&sealed).unwrap(), b"legacy");
        assert_eq!(rotated.seal(b"new").unwrap().key_version, 2);
    }

    #[test]
    fn malformed_keys_are_rejected() {
        assert!(matches!(SecretCipher::new(&[0u8; 16], 1), Err(CipherError::MalformedKey(_))));
        assert!(matches!(SecretCipher::from_hex("zz", 1), Err(CipherError::MalformedKey(_))));
        assert!(matches!(SecretCipher::from_hex("abcd", 1), Err(CipherError::MalformedKey(_))));
    }

    #[test]
    fn debug_output_hides_key_material() {
        let key_hex = SecretCipher::generate_master_key_hex();
        let cipher = SecretCipher::from_hex(&key_hex, 3).unwrap();
        let debug = format!("{:?}", cipher);
        assert!(debug.contains("current_version: 3"));
        assert!(!debug.contains(&key_hex));
    }

    #[test]
    fn test_key_generation() {
        let key_hex = SecretCipher::generate_master_key_hex();
        assert_eq!(key_hex.len(), 64);
        hex::decode(&key_hex).unwrap();
    }
}
