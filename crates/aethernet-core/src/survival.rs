// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Survival tier evaluation.  The liquidity estimate itself is external:
//! an integer read from the environment (set by the treasury sidecar) with
//! a safe fallback for fresh installs.

use aethernet_brain::SurvivalTier;
use aethernet_config::SurvivalConfig;

/// Environment variable the treasury estimator writes, in whole USD.
pub const ESTIMATE_ENV: &str = "AETHERNET_ESTIMATED_USD";

const DEFAULT_ESTIMATE_USD: i64 = 100;

/// Current liquidity estimate.  Unparsable or missing values fall back to a
/// default comfortably inside the `normal` band so a missing sidecar does
/// not kill a fresh agent.
pub fn estimated_usd() -> i64 {
    std::env::var(ESTIMATE_ENV)
        .ok()
        .and_then(|v| v.trim().parse::<i64>().ok())
        .unwrap_or(DEFAULT_ESTIMATE_USD)
}

/// Map an estimate onto a tier.  Thresholds are inclusive on the low side:
/// an estimate exactly at `deadUsd` is dead.
pub fn evaluate_tier(estimated_usd: i64, config: &SurvivalConfig) -> SurvivalTier {
    if estimated_usd <= config.dead_usd {
        SurvivalTier::Dead
    } else if estimated_usd <= config.critical_usd {
        SurvivalTier::Critical
    } else if estimated_usd <= config.low_compute_usd {
        SurvivalTier::LowCompute
    } else {
        SurvivalTier::Normal
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
