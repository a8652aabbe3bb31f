// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::Config;

/// Load configuration from the default location (`~/.aethernet/config.json`).
///
/// A missing file yields `Config::default()` with base defaults applied; a
/// present but malformed file is an error — silently running with defaults
/// when the operator wrote a broken config would hide the mistake.
pub fn load() -> anyhow::Result<Config> {
    let home = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".aethernet");
    load_from(&home.join("config.json"))
}

/// Load configuration from an explicit path (`--config` CLI flag or a
/// resolved `<home>/config.json`).
pub fn load_from(path: &Path) -> anyhow::Result<Config> {
    let mut config = if path.is_file() {
        debug!(path = %path.display(), "loading config");
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let parsed: Config = serde_json::from_str(&text)
            .with_context(|| format!("parsing {}", path.display()))?;
        parsed
    } else {
        debug!(path = %path.display(), "no config file, using defaults");
        Config::default()
    };
    config.config_path = Some(path.to_path_buf());
    // When the config file lives inside an agent home, that home wins over
    // the compiled-in default unless the file names one explicitly.
    if config.home_dir.is_none() {
        if let Some(parent) = path.parent() {
            if parent.as_os_str().is_empty() {
                config.home_dir = Some(PathBuf::from("."));
            } else {
                config.home_dir = Some(parent.to_path_buf());
            }
        }
    }
    Ok(config.base_defaults())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_from(&dir.path().join("config.json")).unwrap();
        assert_eq!(cfg.chain_default, "eip155:8453");
        assert_eq!(cfg.home_dir.as_deref(), Some(dir.path()));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(load_from(&path).is_err());
    }

    #[test]
    fn explicit_file_overrides_defaults() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            f,
            r#"{{"chainDefault":"eip155:1","autonomy":{{"maxConsecutiveErrors":9}}}}"#
        )
        .unwrap();
        let cfg = load_from(f.path()).unwrap();
        assert_eq!(cfg.chain_default, "eip155:1");
        assert_eq!(cfg.autonomy.max_consecutive_errors, 9);
    }

    #[test]
    fn home_dir_inferred_from_config_location() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{}").unwrap();
        let cfg = load_from(&path).unwrap();
        assert_eq!(cfg.home(), dir.path());
        assert_eq!(cfg.db(), dir.path().join("data/state.db"));
    }

    #[test]
    fn explicit_home_dir_in_file_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"homeDir":"/srv/agent"}"#).unwrap();
        let cfg = load_from(&path).unwrap();
        assert_eq!(cfg.home(), PathBuf::from("/srv/agent"));
    }

    #[test]
    fn internal_runtime_source_always_present() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"toolSources":[{"id":"ext.api","name":"Ext","type":"api"}]}"#,
        )
        .unwrap();
        let cfg = load_from(&path).unwrap();
        assert!(cfg.tool_sources.iter().any(|s| s.id == "internal.runtime"));
        assert!(cfg.tool_sources.iter().any(|s| s.id == "ext.api"));
    }
}
