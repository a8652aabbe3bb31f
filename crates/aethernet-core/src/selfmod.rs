// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Bounded self-modification: rate-limited file writes with path
//! protection and deterministic rollback.
//!
//! Every write leaves a [`aethernet_store::SelfModMutation`] row, a matching
//! rollback point and a backup blob under `<data>/rollbacks/`, so any
//! mutation can be reversed without trusting the mutated code.

use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use aethernet_brain::SurvivalTier;
use aethernet_config::Config;
use aethernet_store::{kv_keys, SelfModMutation, StateStore, StoreError};

const MAX_WRITES_PER_HOUR: usize = 6;
const WINDOW_MS: i64 = 3_600_000;

/// Sentinel stored instead of a backup path when the pre-image did not
/// exist: rollback then deletes the file.
const DELETE_SENTINEL: &str = "__DELETE__";

#[derive(Debug, thiserror::Error)]
pub enum SelfModError {
    #[error("Self-modification denied: emergency stop is enabled")]
    EmergencyStop,
    #[error("Self-modification denied: survival tier is dead")]
    SurvivalDead,
    #[error("Self-modification denied: disabled by config")]
    Disabled,
    #[error("Self-modification denied: {MAX_WRITES_PER_HOUR} writes/hour limit exceeded")]
    RateLimited,
    #[error("Self-modification denied: {0} is a protected path")]
    Protected(PathBuf),
    #[error("Self-modification denied: {0} is outside the agent scope")]
    OutOfScope(PathBuf),
    #[error("rollback data missing for mutation {0}")]
    MissingBackup(String),
    #[error("no rollback point recorded for {0}")]
    NoRollbackPoint(PathBuf),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("self-mod io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SelfModError {
    /// True for refusals by a policy gate (as opposed to I/O or storage
    /// trouble).  The executor maps these to `SECURITY_POLICY_VIOLATION`.
    pub fn is_policy_refusal(&self) -> bool {
        matches!(
            self,
            SelfModError::EmergencyStop
                | SelfModError::SurvivalDead
                | SelfModError::Disabled
                | SelfModError::RateLimited
                | SelfModError::Protected(_)
                | SelfModError::OutOfScope(_)
        )
    }
}

pub struct SelfModEngine {
    store: Arc<StateStore>,
    config: Arc<Config>,
}

/// Lexically normalize a path: make it absolute against the working
/// directory and resolve `.`/`..` components without touching the
/// filesystem (the target may not exist yet).
fn normalize(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("/"))
            .join(path)
    };
    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn sanitize_basename(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".into());
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(unix)]
fn restrict_file(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_file(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn restrict_dir(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
}

#[cfg(not(unix))]
fn restrict_dir(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

impl SelfModEngine {
    pub fn new(store: Arc<StateStore>, config: Arc<Config>) -> Self {
        Self { store, config }
    }

    fn protected_paths(&self) -> Vec<PathBuf> {
        let home = self.config.home();
        self.config
            .constitution_policy
            .protected_paths
            .iter()
            .map(|p| {
                if p.is_absolute() {
                    normalize(p)
                } else {
                    normalize(&home.join(p))
                }
            })
            .collect()
    }

    /// Gate order: emergency, survival, config switch, rate limit, protected
    /// paths, scope.  The first refusal wins; nothing is written on refusal.
    fn check_gates(&self, target: &Path) -> Result<(), SelfModError> {
        if self.store.emergency_state()?.enabled {
            return Err(SelfModError::EmergencyStop);
        }
        if let Some(snapshot) = self.store.latest_survival_snapshot()? {
            if SurvivalTier::parse(&snapshot.tier) == Some(SurvivalTier::Dead) {
                return Err(SelfModError::SurvivalDead);
            }
        }
        if !self.config.autonomy.allow_self_modify_action {
            return Err(SelfModError::Disabled);
        }
        self.check_rate_limit()?;
        for protected in self.protected_paths() {
            if target == protected || target.starts_with(&protected) {
                return Err(SelfModError::Protected(target.to_path_buf()));
            }
        }
        let home = normalize(&self.config.home());
        let cwd = normalize(&std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/")));
        if !(target.starts_with(&home) || target.starts_with(&cwd)) {
            return Err(SelfModError::OutOfScope(target.to_path_buf()));
        }
        Ok(())
    }

    /// Prune the rolling-hour timestamp list and refuse at the cap.  The
    /// prune is persisted inside the same transaction it is read in.
    fn check_rate_limit(&self) -> Result<(), SelfModError> {
        let now_ms = Utc::now().timestamp_millis();
        let mut remaining = 0usize;
        self.store.kv_update(kv_keys::SELF_MOD_TIMESTAMPS, |cur| {
            let stamps: Vec<i64> = cur
                .and_then(|raw| serde_json::from_str(&raw).ok())
                .unwrap_or_default();
            let kept: Vec<i64> = stamps
                .into_iter()
                .filter(|t| now_ms - *t < WINDOW_MS)
                .collect();
            remaining = kept.len();
            Some(serde_json::to_string(&kept).unwrap_or_else(|_| "[]".into()))
        })?;
        if remaining >= MAX_WRITES_PER_HOUR {
            return Err(SelfModError::RateLimited);
        }
        Ok(())
    }

    fn record_write_timestamp(&self) -> Result<(), SelfModError> {
        let now_ms = Utc::now().timestamp_millis();
        self.store.kv_update(kv_keys::SELF_MOD_TIMESTAMPS, |cur| {
            let mut stamps: Vec<i64> = cur
                .and_then(|raw| serde_json::from_str(&raw).ok())
                .unwrap_or_default();
            stamps.push(now_ms);
            Some(serde_json::to_string(&stamps).unwrap_or_else(|_| "[]".into()))
        })?;
        Ok(())
    }

    /// Apply one self-modification: gate, back up, write atomically, record
    /// the mutation and its rollback point.
    pub fn apply(
        &self,
        target_path: &Path,
        content: &str,
        reason: Option<&str>,
    ) -> Result<SelfModMutation, SelfModError> {
        let target = normalize(target_path);
        self.check_gates(&target)?;

        let before = match std::fs::read(&target) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        let before_hash = before.as_deref().map(sha256_hex);

        // Back up the pre-image before anything touches the target.
        let backup_locator = match &before {
            Some(bytes) => {
                let dir = self.config.data().join("rollbacks");
                std::fs::create_dir_all(&dir)?;
                restrict_dir(&dir)?;
                let name = format!(
                    "{}.{}.bak",
                    sanitize_basename(&target),
                    Utc::now().timestamp_millis()
                );
                let backup_path = dir.join(name);
                std::fs::write(&backup_path, bytes)?;
                restrict_file(&backup_path)?;
                backup_path.to_string_lossy().to_string()
            }
            None => DELETE_SENTINEL.to_string(),
        };

        if let Some(parent) = target.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
                restrict_dir(parent)?;
            }
        }

        // Atomic replace: write a sibling temp file, then rename over.
        let parent = target.parent().map(Path::to_path_buf).unwrap_or_default();
        let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
        tmp.write_all(content.as_bytes())?;
        tmp.flush()?;
        tmp.persist(&target).map_err(|e| e.error)?;
        restrict_file(&target)?;

        let after_hash = sha256_hex(content.as_bytes());
        self.record_write_timestamp()?;

        let mutation = self.store.insert_mutation(
            &target.to_string_lossy(),
            before_hash.as_deref(),
            &after_hash,
            reason,
        )?;
        self.store.kv_set(
            &format!("{}{}", kv_keys::SELF_MOD_BACKUP_PREFIX, mutation.id),
            &backup_locator,
        )?;
        let rollback_hash = before_hash.as_deref().unwrap_or(&after_hash);
        self.store
            .insert_rollback_point(&mutation.id, &target.to_string_lossy(), rollback_hash)?;

        info!(path = %target.display(), mutation = %mutation.id, "self-modification applied");
        Ok(mutation)
    }

    /// Restore the most recent rollback point for `path`.  Missing backup
    /// data is fatal: a rollback that silently does nothing is worse than
    /// one that fails loudly.
    pub fn rollback(&self, path: &Path) -> Result<(), SelfModError> {
        let target = normalize(path);
        let point = self
            .store
            .latest_rollback_for_path(&target.to_string_lossy())?
            .ok_or_else(|| SelfModError::NoRollbackPoint(target.clone()))?;
        let key = format!("{}{}", kv_keys::SELF_MOD_BACKUP_PREFIX, point.mutation_id);
        let locator = self
            .store
            .kv_get(&key)?
            .ok_or_else(|| SelfModError::MissingBackup(point.mutation_id.clone()))?;

        if locator == DELETE_SENTINEL {
            match std::fs::remove_file(&target) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            info!(path = %target.display(), "rollback removed file (no pre-image)");
            return Ok(());
        }

        let backup = PathBuf::from(&locator);
        if !backup.is_file() {
            warn!(backup = %backup.display(), "backup blob missing on disk");
            return Err(SelfModError::MissingBackup(point.mutation_id));
        }
        if let Some(parent) = target.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::copy(&backup, &target)?;
        restrict_file(&target)?;
        info!(path = %target.display(), mutation = %point.mutation_id, "rollback restored pre-image");
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
