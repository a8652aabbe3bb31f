// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::Path;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const PBKDF2_ITERATIONS: u32 = 150_000;
const KEY_LEN: usize = 32;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum KeystoreError {
    #[error("keystore encoding error: {0}")]
    Encoding(#[from] base64::DecodeError),
    #[error("keystore decryption failed: wrong passphrase or corrupted blob")]
    Decryption,
    #[error("keystore io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("keystore parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// The in-memory signer.  Chain semantics live behind the messaging and
/// provider interfaces; here a signer is a 32-byte secret plus the address
/// derived from it.
#[derive(Clone)]
pub struct Signer {
    secret: [u8; KEY_LEN],
    address: String,
}

impl Signer {
    pub fn generate() -> Self {
        let mut secret = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut secret);
        Self::from_secret(secret)
    }

    pub fn from_secret(secret: [u8; KEY_LEN]) -> Self {
        let digest = Sha256::digest(secret);
        let address = format!("0x{}", hex::encode(&digest[..20]));
        Self { secret, address }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn secret(&self) -> &[u8; KEY_LEN] {
        &self.secret
    }
}

// Deliberately omits the secret.
impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// On-disk keystore blob (`wallet.enc.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedKeystore {
    pub ciphertext: String,
    pub salt: String,
    pub iv: String,
    pub kdf: String,
    pub iterations: u32,
}

fn derive_key(passphrase: &str, salt: &[u8], iterations: u32) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, iterations, &mut key);
    key
}

impl EncryptedKeystore {
    /// Encrypt a signer secret under a passphrase-derived key.
    pub fn encrypt(secret: &[u8; KEY_LEN], passphrase: &str) -> Result<Self, KeystoreError> {
        let mut salt = [0u8; SALT_LEN];
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        rand::thread_rng().fill_bytes(&mut nonce_bytes);

        let key_bytes = derive_key(passphrase, &salt, PBKDF2_ITERATIONS);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), secret.as_slice())
            .map_err(|_| KeystoreError::Decryption)?;

        Ok(Self {
            ciphertext: BASE64.encode(ciphertext),
            salt: BASE64.encode(salt),
            iv: BASE64.encode(nonce_bytes),
            kdf: "pbkdf2-sha256".into(),
            iterations: PBKDF2_ITERATIONS,
        })
    }

    /// Decrypt with a passphrase.  The GCM tag doubles as the integrity and
    /// wrong-passphrase check.
    pub fn decrypt(&self, passphrase: &str) -> Result<Signer, KeystoreError> {
        let ciphertext = BASE64.decode(&self.ciphertext)?;
        let salt = BASE64.decode(&self.salt)?;
        let nonce_bytes = BASE64.decode(&self.iv)?;
        if nonce_bytes.len() != NONCE_LEN {
            return Err(KeystoreError::Decryption);
        }

        let key_bytes = derive_key(passphrase, &salt, self.iterations.max(1));
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
            .map_err(|_| KeystoreError::Decryption)?;

        let secret: [u8; KEY_LEN] = plaintext
            .as_slice()
            .try_into()
            .map_err(|_| KeystoreError::Decryption)?;
        Ok(Signer::from_secret(secret))
    }

    pub fn load(path: &Path) -> Result<Self, KeystoreError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Write the blob with owner-only permissions.
    pub fn save(&self, path: &Path) -> Result<(), KeystoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_round_trip() {
        let signer = Signer::generate();
        let ks = EncryptedKeystore::encrypt(signer.secret(), "correct horse battery").unwrap();
        let back = ks.decrypt("correct horse battery").unwrap();
        assert_eq!(back.address(), signer.address());
        assert_eq!(back.secret(), signer.secret());
    }

    #[test]
    fn wrong_passphrase_fails_cleanly() {
        let signer = Signer::generate();
        let ks = EncryptedKeystore::encrypt(signer.secret(), "right-passphrase-1").unwrap();
        match ks.decrypt("wrong-passphrase-1") {
            Err(KeystoreError::Decryption) => {}
            other => panic!("expected Decryption error, got {other:?}"),
        }
    }

    #[test]
    fn address_is_deterministic_and_prefixed() {
        let signer = Signer::from_secret([7u8; 32]);
        let again = Signer::from_secret([7u8; 32]);
        assert_eq!(signer.address(), again.address());
        assert!(signer.address().starts_with("0x"));
        assert_eq!(signer.address().len(), 42);
    }

    #[test]
    fn fresh_salts_produce_distinct_blobs() {
        let signer = Signer::generate();
        let a = EncryptedKeystore::encrypt(signer.secret(), "p@ssphrase-abc").unwrap();
        let b = EncryptedKeystore::encrypt(signer.secret(), "p@ssphrase-abc").unwrap();
        assert_ne!(a.ciphertext, b.ciphertext);
        assert_ne!(a.salt, b.salt);
    }

    #[test]
    fn save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet.enc.json");
        let signer = Signer::generate();
        let ks = EncryptedKeystore::encrypt(signer.secret(), "p@ssphrase-abc").unwrap();
        ks.save(&path).unwrap();
        let loaded = EncryptedKeystore::load(&path).unwrap();
        assert_eq!(
            loaded.decrypt("p@ssphrase-abc").unwrap().address(),
            signer.address()
        );
    }

    #[cfg(unix)]
    #[test]
    fn saved_keystore_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet.enc.json");
        let signer = Signer::generate();
        EncryptedKeystore::encrypt(signer.secret(), "p@ssphrase-abc")
            .unwrap()
            .save(&path)
            .unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn debug_never_prints_secret() {
        let signer = Signer::from_secret([0xAB; 32]);
        let dbg = format!("{signer:?}");
        assert!(!dbg.contains("abab"));
        assert!(dbg.contains("address"));
    }
}
