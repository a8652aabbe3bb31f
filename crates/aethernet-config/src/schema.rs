// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
///
/// `#[serde(default)]` on a `bool` always falls back to `bool::default()`
/// (i.e. `false`), so fields that should be enabled unless the operator
/// explicitly turns them off need a named function.
fn default_true() -> bool {
    true
}

/// Top-level agent configuration, persisted as `<home>/config.json`.
///
/// Every section has serde defaults so a partial file (or none at all)
/// yields a runnable configuration.  Field names are camelCase on disk to
/// stay compatible with configs written by the onboarding wizard.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Agent home directory.  Defaults to `~/.aethernet` when unset.
    pub home_dir: Option<PathBuf>,
    /// Data directory override.  Defaults to `<home>/data`.
    pub data_dir: Option<PathBuf>,
    /// State database override.  Defaults to `<data>/state.db`.
    pub db_path: Option<PathBuf>,
    /// Path this config was loaded from (informational, not serialized back).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_path: Option<PathBuf>,

    /// CAIP-2 id of the chain used when an action names none.
    pub chain_default: String,
    /// Chains the agent may touch, with their capability sets.
    pub chain_profiles: Vec<ChainProfile>,

    pub brain: BrainConfig,
    pub autonomy: AutonomyConfig,
    pub alerting: AlertingConfig,
    pub survival: SurvivalConfig,
    pub tooling: ToolingConfig,

    /// Tool sources the registry may dispatch to.  The built-in
    /// `internal.runtime` source is injected by the loader when absent.
    pub tool_sources: Vec<ToolSource>,

    /// Skill ids enabled at startup (mirrored into the `enabled_skill_ids`
    /// KV key so the HTTP surface can toggle them at runtime).
    pub enabled_skill_ids: Vec<String>,

    pub constitution_policy: ConstitutionPolicy,

    /// Seconds an unlock session stays valid.  Minimum 60.
    pub wallet_session_ttl_sec: u64,
    /// Daemon heartbeat interval in milliseconds.  Minimum 5000.
    pub heartbeat_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            home_dir: None,
            data_dir: None,
            db_path: None,
            config_path: None,
            chain_default: default_chain().into(),
            chain_profiles: default_chain_profiles(),
            brain: BrainConfig::default(),
            autonomy: AutonomyConfig::default(),
            alerting: AlertingConfig::default(),
            survival: SurvivalConfig::default(),
            tooling: ToolingConfig::default(),
            tool_sources: vec![ToolSource::internal_runtime()],
            enabled_skill_ids: vec![],
            constitution_policy: ConstitutionPolicy::default(),
            wallet_session_ttl_sec: 900,
            heartbeat_interval_ms: 60_000,
        }
    }
}

impl Config {
    /// Resolved home directory (`homeDir` or `~/.aethernet`).
    pub fn home(&self) -> PathBuf {
        self.home_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".aethernet")
        })
    }

    /// Resolved data directory (`dataDir` or `<home>/data`).
    pub fn data(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| self.home().join("data"))
    }

    /// Resolved state database path (`dbPath` or `<data>/state.db`).
    pub fn db(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| self.data().join("state.db"))
    }

    /// Resolved keystore path (`<home>/wallet.enc.json`).
    pub fn keystore(&self) -> PathBuf {
        self.home().join("wallet.enc.json")
    }

    /// Resolved skills directory (`<home>/skills`).
    pub fn skills_dir(&self) -> PathBuf {
        self.home().join("skills")
    }

    /// Look up a chain profile by CAIP-2 id.
    pub fn chain_profile(&self, caip2: &str) -> Option<&ChainProfile> {
        self.chain_profiles.iter().find(|p| p.caip2 == caip2)
    }
}

/// One chain the agent knows about and what it supports there.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainProfile {
    /// CAIP-2 chain id, e.g. `eip155:8453`.
    pub caip2: String,
    /// Numeric chain id forwarded to RPC adapters.
    pub chain_id: u64,
    /// Human-readable name for status display.
    pub name: String,
    pub supports: ChainSupports,
}

/// Capability flags for a chain profile.  Closed struct — unknown capability
/// names in a config file are a parse error rather than silently ignored.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct ChainSupports {
    pub identity: bool,
    pub reputation: bool,
    pub payments: bool,
    pub auth: bool,
    pub messaging: bool,
}

impl ChainSupports {
    pub fn all() -> Self {
        Self {
            identity: true,
            reputation: true,
            payments: true,
            auth: true,
            messaging: true,
        }
    }
}

fn default_chain_profiles() -> Vec<ChainProfile> {
    vec![ChainProfile {
        caip2: default_chain().into(),
        chain_id: 8453,
        name: "Base".into(),
        supports: ChainSupports::all(),
    }]
}

fn default_chain() -> &'static str {
    "eip155:8453"
}

/// Brain (language-model endpoint) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrainConfig {
    /// Model name forwarded to the endpoint.
    pub model: String,
    /// Responses-style endpoint URL.
    pub api_url: String,
    /// Environment variable holding the API key, read at request time.
    /// When the variable is unset the client short-circuits to a malformed
    /// turn instead of making a network call.
    pub api_key_env: String,
    /// Sampling temperature (0.0–2.0).
    pub temperature: f32,
    /// Maximum tokens requested per turn.
    pub max_output_tokens: u32,
    /// Per-attempt request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Retries on retryable statuses / transport errors (total attempts =
    /// maxRetries + 1).
    pub max_retries: u32,
    /// Base backoff in milliseconds, doubled per attempt, capped at 30 s.
    pub retry_backoff_ms: u64,
}

impl Default for BrainConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4.1-mini".into(),
            api_url: "https://api.openai.com/v1/responses".into(),
            api_key_env: "OPENAI_API_KEY".into(),
            temperature: 0.3,
            max_output_tokens: 2048,
            timeout_ms: 60_000,
            max_retries: 2,
            retry_backoff_ms: 500,
        }
    }
}

/// Autonomy loop limits and policy switches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AutonomyConfig {
    /// Sleep between ticks when the brain does not request one.
    pub default_interval_ms: u64,
    /// Hard cap on actions executed per turn.
    pub max_actions_per_turn: usize,
    /// Consecutive fatal ticks before the daemon stops.
    pub max_consecutive_errors: u32,
    /// Upper clamp for requested sleep (brain `sleepMs` and `sleep` actions).
    pub max_sleep_ms: u64,
    /// Brain failure streak that escalates to a fatal tick error.
    pub max_brain_failures_before_stop: u32,
    /// When true, any disallowed action marks the whole turn malformed.
    /// When false, disallowed actions are dropped and the rest executes.
    pub strict_action_allowlist: bool,
    /// Master switch for the `self_modify` action.
    pub allow_self_modify_action: bool,
}

impl Default for AutonomyConfig {
    fn default() -> Self {
        Self {
            default_interval_ms: 60_000,
            max_actions_per_turn: 5,
            max_consecutive_errors: 3,
            max_sleep_ms: 3_600_000,
            max_brain_failures_before_stop: 5,
            strict_action_allowlist: true,
            allow_self_modify_action: false,
        }
    }
}

/// Where non-suppressed alerts go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AlertRoute {
    /// Persist only.
    #[default]
    Db,
    /// Persist and print (stderr for critical, stdout otherwise).
    Stdout,
    /// Persist and POST a JSON envelope to `webhookUrl`.
    Webhook,
}

impl std::fmt::Display for AlertRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertRoute::Db => write!(f, "db"),
            AlertRoute::Stdout => write!(f, "stdout"),
            AlertRoute::Webhook => write!(f, "webhook"),
        }
    }
}

/// Alert thresholds and routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlertingConfig {
    pub enabled: bool,
    pub route: AlertRoute,
    /// Required when route = webhook.
    pub webhook_url: Option<String>,
    /// Critical incidents inside the evaluation window that trigger an alert.
    pub critical_incident_threshold: u32,
    /// Brain failure streak that triggers a critical alert.
    pub brain_failure_threshold: u32,
    /// Unprocessed-message depth that triggers a warning alert.
    pub queue_depth_threshold: u32,
    pub evaluation_window_minutes: u32,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            route: AlertRoute::Db,
            webhook_url: None,
            critical_incident_threshold: 1,
            brain_failure_threshold: 3,
            queue_depth_threshold: 20,
            evaluation_window_minutes: 10,
        }
    }
}

/// Liquidity thresholds for the survival tiers, in whole USD.
/// Invariant (checked by the validator): lowCompute ≥ critical ≥ dead.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SurvivalConfig {
    pub low_compute_usd: i64,
    pub critical_usd: i64,
    pub dead_usd: i64,
}

impl Default for SurvivalConfig {
    fn default() -> Self {
        Self {
            low_compute_usd: 25,
            critical_usd: 10,
            dead_usd: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolingConfig {
    /// When false, only sources of type `internal` may be invoked.
    pub allow_external_sources: bool,
}

impl Default for ToolingConfig {
    fn default() -> Self {
        Self {
            allow_external_sources: false,
        }
    }
}

/// Kind of tool source, which also selects the default adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolSourceType {
    Internal,
    Api,
    Mcp,
}

impl std::fmt::Display for ToolSourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolSourceType::Internal => write!(f, "internal"),
            ToolSourceType::Api => write!(f, "api"),
            ToolSourceType::Mcp => write!(f, "mcp"),
        }
    }
}

/// One registered tool source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSource {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub source_type: ToolSourceType,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Base URL for `api` sources.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Environment variable holding the bearer token for `api` sources.
    #[serde(default)]
    pub auth_env: Option<String>,
    /// Free-form per-source settings; `metadata.adapter` overrides adapter
    /// selection.
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl ToolSource {
    /// The always-present built-in source backed by the runtime itself.
    pub fn internal_runtime() -> Self {
        Self {
            id: "internal.runtime".into(),
            name: "Runtime introspection".into(),
            source_type: ToolSourceType::Internal,
            enabled: true,
            base_url: None,
            auth_env: None,
            metadata: serde_json::Map::new(),
        }
    }
}

/// Governance file policy: hash-verified files and paths the self-mod
/// engine must never touch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConstitutionPolicy {
    /// Relative to home unless absolute.
    pub constitution_path: PathBuf,
    pub laws_path: PathBuf,
    pub protected_paths: Vec<PathBuf>,
    /// Only `sha256` is recognised.
    pub hash_algorithm: String,
}

impl Default for ConstitutionPolicy {
    fn default() -> Self {
        Self {
            constitution_path: PathBuf::from("constitution.md"),
            laws_path: PathBuf::from("laws.md"),
            protected_paths: vec![
                PathBuf::from("constitution.md"),
                PathBuf::from("laws.md"),
                PathBuf::from("wallet.enc.json"),
                PathBuf::from("config.json"),
            ],
            hash_algorithm: "sha256".into(),
        }
    }
}

// Serde defaults for the scalar Config fields live on the struct itself via
// `#[serde(default)]`; the ones below need concrete values.

impl Config {
    pub(crate) fn base_defaults(mut self) -> Self {
        if self.chain_default.is_empty() {
            self.chain_default = default_chain().into();
        }
        if self.chain_profiles.is_empty() {
            self.chain_profiles = default_chain_profiles();
        }
        if self.wallet_session_ttl_sec == 0 {
            self.wallet_session_ttl_sec = 900;
        }
        if self.heartbeat_interval_ms == 0 {
            self.heartbeat_interval_ms = 60_000;
        }
        if !self
            .tool_sources
            .iter()
            .any(|s| s.id == "internal.runtime")
        {
            self.tool_sources.insert(0, ToolSource::internal_runtime());
        }
        self
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
