// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Startup validation.  Produces structured diagnostics rather than a single
//! error so the CLI can print every problem at once; any error-severity
//! diagnostic prevents startup (`CONFIG_INVALID`).

use std::collections::HashSet;

use crate::{AlertRoute, Config};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DiagnosticSeverity {
    Warning,
    Error,
}

impl std::fmt::Display for DiagnosticSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiagnosticSeverity::Warning => write!(f, "warning"),
            DiagnosticSeverity::Error => write!(f, "error"),
        }
    }
}

/// One validation finding, keyed to the config field that caused it.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub field: String,
    pub code: String,
    pub severity: DiagnosticSeverity,
    pub message: String,
}

impl Diagnostic {
    fn error(field: &str, code: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            code: code.into(),
            severity: DiagnosticSeverity::Error,
            message: message.into(),
        }
    }

    fn warning(field: &str, code: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            code: code.into(),
            severity: DiagnosticSeverity::Warning,
            message: message.into(),
        }
    }
}

/// Validate a loaded config.  Call after `load`; reject startup when any
/// returned diagnostic has `severity == Error`.
pub fn validate(config: &Config) -> Vec<Diagnostic> {
    let mut out = Vec::new();

    // ── Survival ordering ────────────────────────────────────────────────────
    let s = &config.survival;
    if !(s.low_compute_usd >= s.critical_usd && s.critical_usd >= s.dead_usd) {
        out.push(Diagnostic::error(
            "survival",
            "survival_threshold_order",
            format!(
                "thresholds must satisfy lowComputeUsd >= criticalUsd >= deadUsd \
                 (got {} / {} / {})",
                s.low_compute_usd, s.critical_usd, s.dead_usd
            ),
        ));
    }

    // ── Timing floors ─────────────────────────────────────────────────────────
    if config.wallet_session_ttl_sec < 60 {
        out.push(Diagnostic::error(
            "walletSessionTtlSec",
            "ttl_too_short",
            "wallet session TTL must be at least 60 seconds",
        ));
    }
    if config.heartbeat_interval_ms < 5000 {
        out.push(Diagnostic::error(
            "heartbeatIntervalMs",
            "heartbeat_too_fast",
            "heartbeat interval must be at least 5000 ms",
        ));
    }

    // ── Chains ────────────────────────────────────────────────────────────────
    if config.chain_profiles.is_empty() {
        out.push(Diagnostic::error(
            "chainProfiles",
            "no_chains",
            "at least one chain profile is required",
        ));
    } else if config.chain_profile(&config.chain_default).is_none() {
        out.push(Diagnostic::error(
            "chainDefault",
            "default_chain_unknown",
            format!(
                "chainDefault {:?} has no matching entry in chainProfiles",
                config.chain_default
            ),
        ));
    }

    // ── Brain ─────────────────────────────────────────────────────────────────
    if config.brain.timeout_ms == 0 {
        out.push(Diagnostic::error(
            "brain.timeoutMs",
            "zero_timeout",
            "brain request timeout must be non-zero",
        ));
    }
    if config.brain.api_key_env.trim().is_empty() {
        out.push(Diagnostic::error(
            "brain.apiKeyEnv",
            "missing_key_env",
            "brain.apiKeyEnv must name an environment variable",
        ));
    }
    if config.brain.max_retries > 10 {
        out.push(Diagnostic::warning(
            "brain.maxRetries",
            "excessive_retries",
            "more than 10 retries per turn will stall the tick loop",
        ));
    }

    // ── Autonomy ──────────────────────────────────────────────────────────────
    if config.autonomy.max_actions_per_turn == 0 {
        out.push(Diagnostic::warning(
            "autonomy.maxActionsPerTurn",
            "zero_actions",
            "maxActionsPerTurn of 0 is treated as 1",
        ));
    }
    if config.autonomy.max_consecutive_errors == 0 {
        out.push(Diagnostic::error(
            "autonomy.maxConsecutiveErrors",
            "zero_error_budget",
            "maxConsecutiveErrors must be at least 1",
        ));
    }

    // ── Alerting ──────────────────────────────────────────────────────────────
    if config.alerting.route == AlertRoute::Webhook
        && config
            .alerting
            .webhook_url
            .as_deref()
            .map(str::trim)
            .unwrap_or("")
            .is_empty()
    {
        out.push(Diagnostic::error(
            "alerting.webhookUrl",
            "webhook_url_missing",
            "alert route is webhook but no webhookUrl is configured",
        ));
    }

    // ── Tool sources ──────────────────────────────────────────────────────────
    let mut seen = HashSet::new();
    for source in &config.tool_sources {
        if !seen.insert(source.id.as_str()) {
            out.push(Diagnostic::error(
                "toolSources",
                "duplicate_source_id",
                format!("tool source id {:?} appears more than once", source.id),
            ));
        }
    }

    // ── Governance ────────────────────────────────────────────────────────────
    if config.constitution_policy.hash_algorithm != "sha256" {
        out.push(Diagnostic::error(
            "constitutionPolicy.hashAlgorithm",
            "unsupported_hash",
            format!(
                "unsupported hash algorithm {:?} (only sha256)",
                config.constitution_policy.hash_algorithm
            ),
        ));
    }

    out
}

/// True when no diagnostic blocks startup.
pub fn is_startable(diagnostics: &[Diagnostic]) -> bool {
    diagnostics
        .iter()
        .all(|d| d.severity != DiagnosticSeverity::Error)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
