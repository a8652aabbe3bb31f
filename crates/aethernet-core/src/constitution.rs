// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Governance file verification.  The constitution and laws are hash-pinned
//! and forced read-only at startup; their paths are also the backbone of
//! the self-mod protected list.

use std::path::{Path, PathBuf};

use anyhow::Context;
use sha2::{Digest, Sha256};
use tracing::info;

use aethernet_config::ConstitutionPolicy;

#[derive(Debug, Clone)]
pub struct GovernanceReport {
    pub constitution_path: PathBuf,
    pub constitution_hash: String,
    pub laws_path: PathBuf,
    pub laws_hash: String,
}

fn resolve(home: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        home.join(path)
    }
}

fn hash_and_pin(path: &Path) -> anyhow::Result<String> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("reading governance file {}", path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o444))
            .with_context(|| format!("pinning permissions on {}", path.display()))?;
    }
    Ok(hex::encode(Sha256::digest(bytes)))
}

/// Verify both governance files exist, hash them and force `0444`.
/// A missing file is a startup error: an agent without its constitution
/// must not run.
pub fn verify_governance(home: &Path, policy: &ConstitutionPolicy) -> anyhow::Result<GovernanceReport> {
    anyhow::ensure!(
        policy.hash_algorithm == "sha256",
        "unsupported governance hash algorithm {:?}",
        policy.hash_algorithm
    );
    let constitution_path = resolve(home, &policy.constitution_path);
    let laws_path = resolve(home, &policy.laws_path);
    let constitution_hash = hash_and_pin(&constitution_path)?;
    let laws_hash = hash_and_pin(&laws_path)?;
    info!(
        constitution = %constitution_hash,
        laws = %laws_hash,
        "governance files verified"
    );
    Ok(GovernanceReport {
        constitution_path,
        constitution_hash,
        laws_path,
        laws_hash,
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_home() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("constitution.md"), "# Constitution\n").unwrap();
        std::fs::write(dir.path().join("laws.md"), "# Laws\n").unwrap();
        dir
    }

    #[test]
    fn verification_hashes_both_files() {
        let home = seeded_home();
        let report = verify_governance(home.path(), &ConstitutionPolicy::default()).unwrap();
        assert_eq!(report.constitution_hash.len(), 64);
        assert_eq!(report.laws_hash.len(), 64);
        assert_ne!(report.constitution_hash, report.laws_hash);
    }

    #[cfg(unix)]
    #[test]
    fn governance_files_are_forced_read_only() {
        use std::os::unix::fs::PermissionsExt;
        let home = seeded_home();
        verify_governance(home.path(), &ConstitutionPolicy::default()).unwrap();
        let mode = std::fs::metadata(home.path().join("constitution.md"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o444);
    }

    #[test]
    fn missing_constitution_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("laws.md"), "# Laws\n").unwrap();
        assert!(verify_governance(dir.path(), &ConstitutionPolicy::default()).is_err());
    }

    #[test]
    fn unknown_hash_algorithm_is_fatal() {
        let home = seeded_home();
        let mut policy = ConstitutionPolicy::default();
        policy.hash_algorithm = "md5".into();
        assert!(verify_governance(home.path(), &policy).is_err());
    }

    #[test]
    fn hash_is_stable_across_runs() {
        let home = seeded_home();
        let a = verify_governance(home.path(), &ConstitutionPolicy::default()).unwrap();
        // Second run reads the now read-only file.
        let b = verify_governance(home.path(), &ConstitutionPolicy::default()).unwrap();
        assert_eq!(a.constitution_hash, b.constitution_hash);
    }
}
