// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::info;

use aethernet_store::{StateStore, StoreError, UnlockSession};

use crate::keystore::{EncryptedKeystore, KeystoreError, Signer};

#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    #[error(transparent)]
    Keystore(#[from] KeystoreError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Wallet is locked")]
    Locked,
    #[error("new passphrase must differ from the old one")]
    SamePassphrase,
    #[error("weak passphrase: {0}")]
    WeakPassphrase(String),
}

/// Minimum passphrase quality for `rotate`: length and character-class mix.
pub fn check_passphrase_strength(passphrase: &str) -> Result<(), WalletError> {
    if passphrase.chars().count() < 12 {
        return Err(WalletError::WeakPassphrase(
            "must be at least 12 characters".into(),
        ));
    }
    let classes = [
        passphrase.chars().any(|c| c.is_ascii_lowercase()),
        passphrase.chars().any(|c| c.is_ascii_uppercase()),
        passphrase.chars().any(|c| c.is_ascii_digit()),
        passphrase
            .chars()
            .any(|c| !c.is_ascii_alphanumeric() && !c.is_whitespace()),
    ]
    .iter()
    .filter(|present| **present)
    .count();
    if classes < 3 {
        return Err(WalletError::WeakPassphrase(
            "must mix at least 3 of: lowercase, uppercase, digits, symbols".into(),
        ));
    }
    Ok(())
}

/// Single-owner wallet session.  The runtime holds exactly one; the HTTP
/// surface and executor reach it through the runtime.
pub struct WalletSession {
    store: Arc<StateStore>,
    keystore_path: PathBuf,
    signer: Option<Signer>,
    unlocked_until: Option<DateTime<Utc>>,
}

impl WalletSession {
    pub fn new(store: Arc<StateStore>, keystore_path: PathBuf) -> Self {
        Self {
            store,
            keystore_path,
            signer: None,
            unlocked_until: None,
        }
    }

    /// Decrypt the keystore and open a TTL-bounded unlock session.
    pub fn unlock(&mut self, passphrase: &str, ttl_sec: u64) -> Result<UnlockSession, WalletError> {
        let keystore = EncryptedKeystore::load(&self.keystore_path)?;
        let signer = keystore.decrypt(passphrase)?;
        let expires_at = Utc::now() + Duration::seconds(ttl_sec as i64);
        let session = self.store.insert_unlock_session(signer.address(), expires_at)?;
        self.store
            .append_audit("wallet:unlock", &format!("ttl={ttl_sec}s"))?;
        info!(address = %signer.address(), ttl_sec, "wallet unlocked");
        self.signer = Some(signer);
        self.unlocked_until = Some(expires_at);
        Ok(session)
    }

    /// Discard the signer and revoke any active session rows.
    pub fn lock(&mut self) -> Result<(), WalletError> {
        self.signer = None;
        self.unlocked_until = None;
        let revoked = self.store.revoke_unlock_sessions()?;
        self.store
            .append_audit("wallet:lock", &format!("revoked={revoked}"))?;
        info!(revoked, "wallet locked");
        Ok(())
    }

    /// Signer present and the TTL not yet elapsed.  Expiry also drops the
    /// signer so the secret does not outlive its session.
    pub fn is_unlocked(&mut self) -> bool {
        match self.unlocked_until {
            Some(until) if Utc::now() < until => self.signer.is_some(),
            Some(_) => {
                self.signer = None;
                self.unlocked_until = None;
                false
            }
            None => false,
        }
    }

    /// Fetch the signer by value for one action.  Callers must not cache it.
    pub fn account(&mut self) -> Result<Signer, WalletError> {
        if !self.is_unlocked() {
            return Err(WalletError::Locked);
        }
        self.signer.clone().ok_or(WalletError::Locked)
    }

    pub fn address(&mut self) -> Option<String> {
        if self.is_unlocked() {
            self.signer.as_ref().map(|s| s.address().to_string())
        } else {
            None
        }
    }

    /// Re-encrypt the keystore under a new passphrase and lock.
    pub fn rotate(&mut self, old: &str, new: &str) -> Result<(), WalletError> {
        if old == new {
            return Err(WalletError::SamePassphrase);
        }
        check_passphrase_strength(new)?;
        let keystore = EncryptedKeystore::load(&self.keystore_path)?;
        let signer = keystore.decrypt(old)?;
        EncryptedKeystore::encrypt(signer.secret(), new)?.save(&self.keystore_path)?;
        self.store.append_audit("wallet:rotate", "passphrase rotated")?;
        self.lock()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const PASS: &str = "Correct-Horse-7";
    const PASS2: &str = "Battery-Staple-9";

    fn session() -> (WalletSession, Arc<StateStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        let path = dir.path().join("wallet.enc.json");
        let signer = Signer::generate();
        EncryptedKeystore::encrypt(signer.secret(), PASS)
            .unwrap()
            .save(&path)
            .unwrap();
        (WalletSession::new(store.clone(), path), store, dir)
    }

    // ── Passphrase strength ───────────────────────────────────────────────────

    #[test]
    fn short_passphrase_rejected() {
        assert!(matches!(
            check_passphrase_strength("Ab1!"),
            Err(WalletError::WeakPassphrase(_))
        ));
    }

    #[test]
    fn two_classes_rejected() {
        assert!(check_passphrase_strength("abcdefgh12345").is_err());
    }

    #[test]
    fn three_classes_accepted() {
        assert!(check_passphrase_strength("abcdefgh12345X").is_ok());
        assert!(check_passphrase_strength("Correct-Horse-7").is_ok());
    }

    // ── Unlock / lock ─────────────────────────────────────────────────────────

    #[test]
    fn unlock_creates_session_and_exposes_signer() {
        let (mut w, store, _dir) = session();
        assert!(!w.is_unlocked());
        w.unlock(PASS, 300).unwrap();
        assert!(w.is_unlocked());
        assert!(w.account().is_ok());
        assert!(store.active_unlock_session().unwrap().is_some());
    }

    #[test]
    fn wrong_passphrase_does_not_unlock() {
        let (mut w, store, _dir) = session();
        assert!(w.unlock("Wrong-Passphrase-1", 300).is_err());
        assert!(!w.is_unlocked());
        assert!(store.active_unlock_session().unwrap().is_none());
    }

    #[test]
    fn lock_revokes_and_drops_signer() {
        let (mut w, store, _dir) = session();
        w.unlock(PASS, 300).unwrap();
        w.lock().unwrap();
        assert!(!w.is_unlocked());
        assert!(matches!(w.account(), Err(WalletError::Locked)));
        assert!(store.active_unlock_session().unwrap().is_none());
    }

    #[test]
    fn zero_ttl_is_immediately_expired() {
        let (mut w, _store, _dir) = session();
        w.unlock(PASS, 0).unwrap();
        assert!(!w.is_unlocked());
        assert!(matches!(w.account(), Err(WalletError::Locked)));
    }

    // ── Rotate ────────────────────────────────────────────────────────────────

    #[test]
    fn rotate_reencrypts_and_locks() {
        let (mut w, _store, _dir) = session();
        w.unlock(PASS, 300).unwrap();
        w.rotate(PASS, PASS2).unwrap();
        assert!(!w.is_unlocked(), "rotate must lock");
        assert!(w.unlock(PASS, 300).is_err(), "old passphrase must be dead");
        w.unlock(PASS2, 300).unwrap();
        assert!(w.is_unlocked());
    }

    #[test]
    fn rotate_rejects_same_passphrase() {
        let (mut w, _store, _dir) = session();
        assert!(matches!(
            w.rotate(PASS, PASS),
            Err(WalletError::SamePassphrase)
        ));
    }

    #[test]
    fn rotate_rejects_weak_passphrase() {
        let (mut w, _store, _dir) = session();
        assert!(matches!(
            w.rotate(PASS, "weakpass"),
            Err(WalletError::WeakPassphrase(_))
        ));
    }

    #[test]
    fn rotate_address_is_stable() {
        let (mut w, _store, _dir) = session();
        w.unlock(PASS, 300).unwrap();
        let before = w.address().unwrap();
        w.rotate(PASS, PASS2).unwrap();
        w.unlock(PASS2, 300).unwrap();
        assert_eq!(w.address().unwrap(), before);
    }
}
