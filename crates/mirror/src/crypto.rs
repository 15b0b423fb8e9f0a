//! AES-256-GCM sealing for OAuth tokens and secret config values
//!
//! Ciphertext layout: `base64(iv) ":" base64(tag) ":" base64(ct)` with a
//! 12-byte iv. The key is 32 bytes, accepted as 64-char hex, base64, or the
//! raw bytes themselves.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use ring::aead::{AES_256_GCM, Aad, LessSafeKey, NONCE_LEN, Nonce, UnboundKey};
use ring::rand::{SecureRandom, SystemRandom};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption key must be 32 bytes (hex, base64, or raw)")]
    BadKey,
    #[error("ciphertext is not in iv:tag:ct form")]
    BadFormat,
    #[error("decryption failed")]
    OpenFailed,
    #[error("encryption failed")]
    SealFailed,
}

/// Seals and opens secrets with a process-wide 32-byte key
pub struct SecretBox {
    key: LessSafeKey,
    rng: SystemRandom,
}

impl SecretBox {
    /// Build from key material in any accepted form
    pub fn new(material: &str) -> Result<Self, CryptoError> {
        let bytes = parse_key(material)?;
        let unbound = UnboundKey::new(&AES_256_GCM, &bytes).map_err(|_| CryptoError::BadKey)?;
        Ok(Self {
            key: LessSafeKey::new(unbound),
            rng: SystemRandom::new(),
        })
    }

    /// Encrypt a plaintext string into the iv:tag:ct layout
    pub fn seal(&self, plaintext: &str) -> Result<String, CryptoError> {
        let mut iv = [0u8; NONCE_LEN];
        self.rng.fill(&mut iv).map_err(|_| CryptoError::SealFailed)?;
        let nonce = Nonce::assume_unique_for_key(iv);

        let mut in_out = plaintext.as_bytes().to_vec();
        let tag = self
            .key
            .seal_in_place_separate_tag(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| CryptoError::SealFailed)?;

        Ok(format!(
            "{}:{}:{}",
            BASE64.encode(iv),
            BASE64.encode(tag.as_ref()),
            BASE64.encode(&in_out)
        ))
    }

    /// Decrypt a sealed string
    pub fn open(&self, sealed: &str) -> Result<String, CryptoError> {
        let mut parts = sealed.splitn(3, ':');
        let iv = parts.next().ok_or(CryptoError::BadFormat)?;
        let tag = parts.next().ok_or(CryptoError::BadFormat)?;
        let ct = parts.next().ok_or(CryptoError::BadFormat)?;

        let iv: [u8; NONCE_LEN] = BASE64
            .decode(iv)
            .map_err(|_| CryptoError::BadFormat)?
            .try_into()
            .map_err(|_| CryptoError::BadFormat)?;
        let tag = BASE64.decode(tag).map_err(|_| CryptoError::BadFormat)?;
        let ct = BASE64.decode(ct).map_err(|_| CryptoError::BadFormat)?;

        // ring expects ct || tag in one buffer
        let mut in_out = ct;
        in_out.extend_from_slice(&tag);

        let nonce = Nonce::assume_unique_for_key(iv);
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| CryptoError::OpenFailed)?;

        String::from_utf8(plaintext.to_vec()).map_err(|_| CryptoError::OpenFailed)
    }
}

/// Accept a 32-byte key as hex, base64, or raw bytes
fn parse_key(material: &str) -> Result<[u8; 32], CryptoError> {
    if material.len() == 64
        && let Ok(bytes) = hex::decode(material)
        && let Ok(key) = <[u8; 32]>::try_from(bytes.as_slice())
    {
        return Ok(key);
    }
    if let Ok(bytes) = BASE64.decode(material)
        && let Ok(key) = <[u8; 32]>::try_from(bytes.as_slice())
    {
        return Ok(key);
    }
    if let Ok(key) = <[u8; 32]>::try_from(material.as_bytes()) {
        return Ok(key);
    }
    Err(CryptoError::BadKey)
}
