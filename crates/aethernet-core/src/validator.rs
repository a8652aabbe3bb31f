// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Turn validation: the last line between the brain's plan and the
//! executor.  Bounds the action count, drops disallowed types, clamps the
//! requested sleep and decides whether the turn counts as malformed.

use std::collections::HashSet;

use aethernet_brain::{Action, ActionType, Integrity, TurnOutput};

const FALLBACK_SUMMARY: &str = "Autonomous turn completed.";

#[derive(Debug, Clone, Copy)]
pub struct ValidationLimits {
    pub max_actions: usize,
    pub max_sleep_ms: u64,
}

#[derive(Debug, Clone)]
pub struct ValidationPolicy {
    /// When true any validation error marks the turn malformed; when false
    /// only structural errors do and disallowed actions are silently
    /// dropped.
    pub strict_allowlist: bool,
    pub allowlist: HashSet<ActionType>,
}

impl ValidationPolicy {
    /// The standard policy: every action type allowed, minus `self_modify`
    /// when the config disables it.
    pub fn from_autonomy(strict_allowlist: bool, allow_self_modify: bool) -> Self {
        let mut allowlist: HashSet<ActionType> = ActionType::ALL.into_iter().collect();
        if !allow_self_modify {
            allowlist.remove(&ActionType::SelfModify);
        }
        Self {
            strict_allowlist,
            allowlist,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidatedTurn {
    pub malformed: bool,
    pub errors: Vec<String>,
    pub output: TurnOutput,
}

/// Errors that mean the turn itself was broken, as opposed to the plan
/// containing an action we refuse.
fn is_structural(error: &str) -> bool {
    matches!(
        error,
        "missing_summary" | "missing_actions" | "provider_marked_malformed"
    )
}

pub fn validate_turn(
    output: &TurnOutput,
    limits: ValidationLimits,
    policy: &ValidationPolicy,
) -> ValidatedTurn {
    let mut errors = Vec::new();

    if output.summary.trim().is_empty() {
        errors.push("missing_summary".to_string());
    }
    if output.next_actions.is_empty() {
        errors.push("missing_actions".to_string());
    }
    if output.integrity == Integrity::Malformed {
        errors.push("provider_marked_malformed".to_string());
    }

    // Unknown types the sanitizer already removed still count against the
    // plan: a brain that asked for `exec` should not pass a strict policy.
    for dropped in &output.dropped_types {
        errors.push(format!("action_not_allowed:{dropped}"));
    }

    let mut actions: Vec<Action> = Vec::new();
    for action in output.next_actions.iter().take(limits.max_actions.max(1)) {
        if policy.allowlist.contains(&action.kind) {
            actions.push(action.clone());
        } else {
            errors.push(format!("action_not_allowed:{}", action.kind));
        }
    }

    let sleep_ms = output.sleep_ms.map(|ms| ms.min(limits.max_sleep_ms));

    let malformed = if policy.strict_allowlist {
        !errors.is_empty()
    } else {
        errors.iter().any(|e| is_structural(e))
    };

    if actions.is_empty() {
        actions.push(Action::noop("no_actions"));
    }

    let summary = {
        let trimmed = output.summary.trim();
        if trimmed.is_empty() {
            FALLBACK_SUMMARY.to_string()
        } else {
            trimmed.to_string()
        }
    };

    ValidatedTurn {
        malformed,
        errors,
        output: TurnOutput {
            summary,
            next_actions: actions,
            memory_writes: output.memory_writes.clone(),
            sleep_ms,
            integrity: Integrity::Ok,
            dropped_types: vec![],
        },
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
