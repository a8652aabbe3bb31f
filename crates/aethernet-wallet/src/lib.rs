// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Wallet session: passphrase-gated access to the agent's signer.
//!
//! The keystore on disk is an AES-256-GCM blob; the decrypted signer lives
//! only in process memory, only while an unlock session is active.  Every
//! mutating action that needs the signer fetches it by value at action
//! start, so a lock between actions takes effect immediately.

mod keystore;
mod session;

pub use keystore::{EncryptedKeystore, KeystoreError, Signer};
pub use session::{check_passphrase_strength, WalletError, WalletSession};
