//! Card vault: AES-256-GCM encryption of card payloads at rest.
//!
//! Stored form is `nonce:authTag:ciphertext`, each part hex encoded. Errors are
//! always one of two generic messages and never carry payload or key material.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use argon2::Argon2;
use serde::Deserialize;
use std::sync::Arc;

use crate::supplier::CardDetails;
use crate::{CoreError, CoreResult};

const ENCRYPT_FAILED: &str = "failed to encrypt data";
const DECRYPT_FAILED: &str = "failed to decrypt data";

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;

// Non-production only. Startup refuses this in production.
const DEV_PASSPHRASE: &[u8] = b"ebt-development-only-vault-key";
const DEV_SALT: &[u8] = b"ebt-dev-salt-v1";

/// Operator-supplied key material.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct VaultSettings {
    /// 64 hex characters (32 bytes).
    pub key: Option<String>,
    pub passphrase: Option<String>,
    /// Fixed per-deployment salt for passphrase derivation.
    pub salt: Option<String>,
}

#[derive(Clone)]
pub struct CardVault {
    cipher: Arc<Aes256Gcm>,
}

impl CardVault {
    /// Derive the key once at startup.
    pub fn from_settings(settings: &VaultSettings, production: bool) -> CoreResult<Self> {
        if let Some(hex_key) = settings.key.as_deref().filter(|k| !k.is_empty()) {
            let key = hex::decode(hex_key)
                .map_err(|_| CoreError::Configuration("vault.key must be hex encoded".to_string()))?;
            if key.len() != KEY_LEN {
                return Err(CoreError::Configuration(
                    "vault.key must be exactly 32 bytes (256 bits)".to_string(),
                ));
            }
            return Self::from_key(&key);
        }

        if let Some(passphrase) = settings.passphrase.as_deref().filter(|p| !p.is_empty()) {
            let salt = settings
                .salt
                .as_deref()
                .filter(|s| s.len() >= 8)
                .ok_or_else(|| {
                    CoreError::Configuration(
                        "vault.salt of at least 8 bytes is required with vault.passphrase".to_string(),
                    )
                })?;
            let key = derive_key(passphrase.as_bytes(), salt.as_bytes())?;
            return Self::from_key(&key);
        }

        if production {
            return Err(CoreError::Configuration(
                "no vault key configured; refusing to start in production".to_string(),
            ));
        }

        tracing::warn!("!!! CARD VAULT IS USING THE BUILT-IN DEVELOPMENT KEY - NEVER USE THIS IN PRODUCTION !!!");
        let key = derive_key(DEV_PASSPHRASE, DEV_SALT)?;
        Self::from_key(&key)
    }

    pub fn from_key(key: &[u8]) -> CoreResult<Self> {
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|_| CoreError::Configuration("invalid vault key length".to_string()))?;
        Ok(Self { cipher: Arc::new(cipher) })
    }

    pub fn encrypt(&self, plaintext: &str) -> CoreResult<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CoreError::Crypto(ENCRYPT_FAILED))?;

        // aes-gcm appends the tag to the ciphertext
        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);
        Ok(format!(
            "{}:{}:{}",
            hex::encode(nonce),
            hex::encode(tag),
            hex::encode(ciphertext)
        ))
    }

    pub fn decrypt(&self, stored: &str) -> CoreResult<String> {
        let plaintext = self.open(stored).map_err(|e| {
            tracing::warn!("Card vault decryption failed");
            e
        })?;
        String::from_utf8(plaintext).map_err(|_| CoreError::Crypto(DECRYPT_FAILED))
    }

    fn open(&self, stored: &str) -> CoreResult<Vec<u8>> {
        let mut parts = stored.split(':');
        let (nonce_hex, tag_hex, ct_hex) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(n), Some(t), Some(c), None) => (n, t, c),
            _ => return Err(CoreError::Crypto(DECRYPT_FAILED)),
        };
        let nonce = hex::decode(nonce_hex).map_err(|_| CoreError::Crypto(DECRYPT_FAILED))?;
        let tag = hex::decode(tag_hex).map_err(|_| CoreError::Crypto(DECRYPT_FAILED))?;
        let mut sealed = hex::decode(ct_hex).map_err(|_| CoreError::Crypto(DECRYPT_FAILED))?;
        if nonce.len() != NONCE_LEN || tag.len() != TAG_LEN {
            return Err(CoreError::Crypto(DECRYPT_FAILED));
        }
        sealed.extend_from_slice(&tag);
        self.cipher
            .decrypt(Nonce::from_slice(&nonce), sealed.as_ref())
            .map_err(|_| CoreError::Crypto(DECRYPT_FAILED))
    }

    pub fn encrypt_card(&self, card: &CardDetails) -> CoreResult<String> {
        let json = serde_json::to_string(card).map_err(|_| CoreError::Crypto(ENCRYPT_FAILED))?;
        self.encrypt(&json)
    }

    pub fn decrypt_card(&self, stored: &str) -> CoreResult<CardDetails> {
        let json = self.decrypt(stored)?;
        serde_json::from_str(&json).map_err(|_| CoreError::Crypto(DECRYPT_FAILED))
    }
}

fn derive_key(passphrase: &[u8], salt: &[u8]) -> CoreResult<[u8; KEY_LEN]> {
    let mut key = [0u8; KEY_LEN];
    Argon2::default()
        .hash_password_into(passphrase, salt, &mut key)
        .map_err(|_| CoreError::Configuration("vault key derivation failed".to_string()))?;
    Ok(key)
}
