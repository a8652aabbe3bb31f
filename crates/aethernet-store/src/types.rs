// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Persisted entity types.  All ids are uuid-v4 strings assigned at creation;
//! timestamps are UTC and stored as RFC 3339 text.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome classification attached to incidents and alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "info" => Some(Severity::Info),
            "warning" => Some(Severity::Warning),
            "error" => Some(Severity::Error),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of incident codes.  Stored as text; anything outside this set
/// is a programming error, not operator input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentCode {
    ConfigInvalid,
    BrainRequestFailed,
    BrainOutputMalformed,
    ActionBlocked,
    ActionFailed,
    ChainCapabilityBlocked,
    WalletLocked,
    DaemonFailure,
    AlertTriggered,
    SecurityPolicyViolation,
    ProviderFailure,
}

impl IncidentCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentCode::ConfigInvalid => "CONFIG_INVALID",
            IncidentCode::BrainRequestFailed => "BRAIN_REQUEST_FAILED",
            IncidentCode::BrainOutputMalformed => "BRAIN_OUTPUT_MALFORMED",
            IncidentCode::ActionBlocked => "ACTION_BLOCKED",
            IncidentCode::ActionFailed => "ACTION_FAILED",
            IncidentCode::ChainCapabilityBlocked => "CHAIN_CAPABILITY_BLOCKED",
            IncidentCode::WalletLocked => "WALLET_LOCKED",
            IncidentCode::DaemonFailure => "DAEMON_FAILURE",
            IncidentCode::AlertTriggered => "ALERT_TRIGGERED",
            IncidentCode::SecurityPolicyViolation => "SECURITY_POLICY_VIOLATION",
            IncidentCode::ProviderFailure => "PROVIDER_FAILURE",
        }
    }
}

impl std::fmt::Display for IncidentCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One completed (or refused) orchestrator tick.  Immutable after insertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    /// `completed`, `dry_run` or `failed`.
    pub state: String,
    pub input: Option<serde_json::Value>,
    pub output: Option<serde_json::Value>,
    /// Attribute bag: action log, summary, queue depth snapshot, brain
    /// duration.  Redacted on insert.
    pub metadata: serde_json::Value,
}

/// One telemetry row per turn, keyed by the turn id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnTelemetry {
    pub turn_id: String,
    pub survival_tier: String,
    pub estimated_usd: i64,
    pub queue_depth: u32,
    pub spend_proxy_usd: f64,
    pub actions_total: u32,
    pub action_failures: u32,
    pub brain_duration_ms: u64,
    pub brain_failures: u32,
}

/// An inbound or outbound message.  `processed_at` is set exactly once, when
/// a turn claims the message for its input bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub from: String,
    pub to: String,
    pub thread_id: Option<String>,
    pub content: String,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Key-unique memory fact; newer write wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryFact {
    pub id: String,
    pub key: String,
    pub value: String,
    pub confidence: f64,
    pub source: String,
    pub updated_at: DateTime<Utc>,
}

/// Append-only episodic memory entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEpisode {
    pub id: String,
    pub summary: String,
    pub outcome: Option<String>,
    pub action_type: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Append-only structured record of a non-success event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub code: IncidentCode,
    pub severity: Severity,
    pub category: String,
    pub message: String,
    pub metadata: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// An incident promoted to an operator-routed notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub code: String,
    pub severity: Severity,
    pub route: String,
    pub message: String,
    pub metadata: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Record of one self-modification write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelfModMutation {
    pub id: String,
    pub path: String,
    pub before_hash: Option<String>,
    pub after_hash: String,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Reversible record paired with a mutation.  The backup blob locator lives
/// in KV under `self_mod_backup_v1:<mutation_id>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackPoint {
    pub id: String,
    pub mutation_id: String,
    pub path: String,
    pub rollback_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Sticky emergency-stop state.  Singleton row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergencyState {
    pub enabled: bool,
    pub reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Time-bounded authorization to use the signer.  At most one active.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnlockSession {
    pub id: String,
    pub address: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

/// One survival-tier evaluation, appended every tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurvivalSnapshot {
    pub id: String,
    pub tier: String,
    pub estimated_usd: i64,
    pub created_at: DateTime<Utc>,
}

/// Append-only payment trace (facilitator settlements, child funding).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub id: String,
    pub kind: String,
    pub amount_usdc: String,
    pub counterparty: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
