//! Per-line authenticated encryption for capture files.
//!
//! An encrypted line is `ENC:` followed by base64(nonce || ciphertext), sealed
//! with ChaCha20-Poly1305 under a 256-bit key.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use sessionjar_core::{Error, Result};
use sha2::{Digest, Sha256};

pub const ENCRYPTED_PREFIX: &str = "ENC:";

const NONCE_LEN: usize = 12;

/// A 256-bit line-encryption key.
#[derive(Clone)]
pub struct EncryptionKey([u8; 32]);

impl EncryptionKey {
    /// Parse key material: base64 of exactly 32 bytes is used as-is, anything
    /// else is treated as a passphrase and hashed with SHA-256.
    pub fn parse(material: &str) -> Result<Self> {
        let material = material.trim();
        if material.is_empty() {
            return Err(Error::Encryption("encryption key is empty".into()));
        }
        if let Ok(bytes) = STANDARD.decode(material) {
            if bytes.len() == 32 {
                let mut key = [0u8; 32];
                key.copy_from_slice(&bytes);
                return Ok(Self(key));
            }
        }
        let digest = Sha256::digest(material.as_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        Ok(Self(key))
    }

    /// Generate a random 256-bit key.
    pub fn generate() -> Self {
        let mut key = [0u8; 32];
        chacha20poly1305::aead::rand_core::RngCore::fill_bytes(&mut OsRng, &mut key);
        Self(key)
    }

    /// Base64 form accepted by [`EncryptionKey::parse`].
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new((&self.0).into())
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey(***)")
    }
}

pub fn is_encrypted(line: &str) -> bool {
    line.starts_with(ENCRYPTED_PREFIX)
}

/// Encrypt one line. The result carries the `ENC:` prefix.
pub fn encrypt_line(plaintext: &str, key: &EncryptionKey) -> Result<String> {
    let mut nonce_bytes = [0u8; NONCE_LEN];
    chacha20poly1305::aead::rand_core::RngCore::fill_bytes(&mut OsRng, &mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = key
        .cipher()
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|_| Error::Encryption("encryption failed".into()))?;

    let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    combined.extend_from_slice(&nonce_bytes);
    combined.extend_from_slice(&ciphertext);

    Ok(format!("{}{}", ENCRYPTED_PREFIX, STANDARD.encode(&combined)))
}

/// Decrypt one line. Lines without the prefix are returned unchanged.
pub fn decrypt_line(line: &str, key: &EncryptionKey) -> Result<String> {
    let Some(encoded) = line.strip_prefix(ENCRYPTED_PREFIX) else {
        return Ok(line.to_string());
    };

    let invalid_key =
        || Error::Encryption("Invalid encryption key for encrypted capture file".into());

    let combined = STANDARD.decode(encoded).map_err(|_| invalid_key())?;
    if combined.len() < NONCE_LEN {
        return Err(invalid_key());
    }
    let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
    let plaintext = key
        .cipher()
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| invalid_key())?;

    String::from_utf8(plaintext).map_err(|_| invalid_key())
}
