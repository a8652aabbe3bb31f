// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Skill discovery.  Skills live under `<home>/skills/<id>/` with a
//! `manifest.json` and a `SKILL.md`; the runtime consumes them read-only
//! and tracks the enabled set in KV so the HTTP surface can toggle skills
//! without a restart.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, warn};

use aethernet_store::{kv_keys, StateStore};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillManifest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Skill {
    pub id: String,
    pub path: PathBuf,
    pub manifest: SkillManifest,
    pub enabled: bool,
}

/// Scan the skills directory.  Directories without a parsable manifest are
/// skipped with a warning rather than failing startup.
pub fn load_skills(
    skills_dir: &Path,
    store: &StateStore,
    config_enabled: &[String],
) -> Vec<Skill> {
    let enabled: HashSet<String> = store
        .kv_get_json::<Vec<String>>(kv_keys::ENABLED_SKILL_IDS)
        .ok()
        .flatten()
        .unwrap_or_else(|| config_enabled.to_vec())
        .into_iter()
        .collect();

    let Ok(entries) = std::fs::read_dir(skills_dir) else {
        debug!(dir = %skills_dir.display(), "no skills directory");
        return vec![];
    };

    let mut skills = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let id = entry.file_name().to_string_lossy().to_string();
        let manifest_path = path.join("manifest.json");
        let manifest: SkillManifest = match std::fs::read_to_string(&manifest_path)
            .map_err(anyhow::Error::from)
            .and_then(|text| serde_json::from_str(&text).map_err(Into::into))
        {
            Ok(m) => m,
            Err(e) => {
                warn!(skill = %id, error = %e, "skipping skill with unreadable manifest");
                continue;
            }
        };
        skills.push(Skill {
            enabled: enabled.contains(&id),
            id,
            path,
            manifest,
        });
    }
    skills.sort_by(|a, b| a.id.cmp(&b.id));
    skills
}

/// Persist the enabled set so later ticks and the HTTP surface agree.
pub fn store_enabled_ids(store: &StateStore, ids: &[String]) -> aethernet_store::Result<()> {
    store.kv_set_json(kv_keys::ENABLED_SKILL_IDS, &ids.to_vec())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
