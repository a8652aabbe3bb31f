// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Chain-capability gate: every action resolves to a chain profile and, for
//! some action types, a capability that profile must carry.

use aethernet_brain::{Action, ActionType};
use aethernet_config::{ChainProfile, Config};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Identity,
    Reputation,
    Payments,
    Auth,
    Messaging,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Identity => "identity",
            Capability::Reputation => "reputation",
            Capability::Payments => "payments",
            Capability::Auth => "auth",
            Capability::Messaging => "messaging",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChainGateError {
    #[error("unsupported chain: {0}")]
    UnknownChain(String),
    #[error("chain {chain} does not support {capability}")]
    MissingCapability { chain: String, capability: String },
}

/// The chain an action targets: `chain` | `network` | `caip2` param, falling
/// back to the configured default.
fn chain_selection<'a>(action: &'a Action, config: &'a Config) -> &'a str {
    action
        .str_param("chain")
        .or_else(|| action.str_param("network"))
        .or_else(|| action.str_param("caip2"))
        .unwrap_or(&config.chain_default)
}

/// Capability an action needs on its chain, if any.  `replicate` only needs
/// payments when it actually moves funds.
pub fn required_capability(action: &Action) -> Option<Capability> {
    match action.kind {
        ActionType::SendMessage => Some(Capability::Messaging),
        ActionType::Replicate => {
            let funding = action
                .str_param("initialFundingUsdc")
                .and_then(|s| s.parse::<f64>().ok())
                .or_else(|| action.num_param("initialFundingUsdc"))
                .unwrap_or(0.0);
            if funding > 0.0 {
                Some(Capability::Payments)
            } else {
                None
            }
        }
        _ => None,
    }
}

fn has_capability(profile: &ChainProfile, capability: Capability) -> bool {
    let s = &profile.supports;
    match capability {
        Capability::Identity => s.identity,
        Capability::Reputation => s.reputation,
        Capability::Payments => s.payments,
        Capability::Auth => s.auth,
        Capability::Messaging => s.messaging,
    }
}

/// Resolve the action's chain and check the required capability.
/// `self_modify` never reaches this gate; everything else must at least name
/// a known chain.
pub fn resolve_chain<'a>(
    action: &Action,
    config: &'a Config,
) -> Result<&'a ChainProfile, ChainGateError> {
    let selection = chain_selection(action, config);
    let profile = config
        .chain_profile(selection)
        .ok_or_else(|| ChainGateError::UnknownChain(selection.to_string()))?;
    if let Some(capability) = required_capability(action) {
        if !has_capability(profile, capability) {
            return Err(ChainGateError::MissingCapability {
                chain: profile.caip2.clone(),
                capability: capability.as_str().to_string(),
            });
        }
    }
    Ok(profile)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
