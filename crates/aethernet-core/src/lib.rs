// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The autonomous runtime core: validation, gating, execution, persistence,
//! survival evaluation, alerting and the daemon loop around one
//! [`runtime::AgentRuntime`] per process.

mod alerting;
mod chain;
mod commands;
mod constitution;
mod daemon;
mod executor;
mod orchestrator;
mod replicate;
mod selfmod;
mod skills;
mod survival;
mod transport;
mod validator;

pub mod runtime;

pub use alerting::AlertEvaluator;
pub use chain::{required_capability, resolve_chain, Capability, ChainGateError};
pub use commands::{parse_inbound_command, InboundCommand};
pub use constitution::{verify_governance, GovernanceReport};
pub use daemon::{Daemon, DaemonOutcome};
pub use executor::{ActionExecutor, ActionFailure, ActionOutcome};
pub use orchestrator::{TickReport, TurnOrchestrator};
pub use replicate::{ReplicationPlan, ReplicationRecord};
pub use selfmod::{SelfModEngine, SelfModError};
pub use skills::{load_skills, Skill};
pub use survival::{estimated_usd, evaluate_tier};
pub use transport::{
    ComputeProvider, InboundEnvelope, LocalCompute, MockCompute, MockTransport, NullTransport,
    Sandbox, SentReceipt, Transport,
};
pub use validator::{validate_turn, ValidatedTurn, ValidationLimits, ValidationPolicy};

/// Fatal tick errors.  Everything recoverable is converted to an incident
/// inside the tick; these are the cases the daemon counts and acts on.
#[derive(Debug, thiserror::Error)]
pub enum TickError {
    #[error("tick refused: emergency stop is enabled")]
    EmergencyStop,
    #[error("survival tier is dead (estimated {0} USD)")]
    SurvivalDead(i64),
    #[error("brain failure streak {streak}/{limit} reached")]
    BrainFailureStreak { streak: u32, limit: u32 },
    #[error(transparent)]
    Store(#[from] aethernet_store::StoreError),
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dead_tier_error_message_names_the_tier() {
        // The daemon decides dead-vs-stopped from this variant; the message
        // keeps the historical phrasing for log scrapers.
        let e = TickError::SurvivalDead(1);
        assert!(e.to_string().contains("survival tier is dead"));
    }

    #[test]
    fn streak_error_message_contains_ratio() {
        let e = TickError::BrainFailureStreak { streak: 5, limit: 5 };
        assert!(e.to_string().contains("5/5"));
    }
}
