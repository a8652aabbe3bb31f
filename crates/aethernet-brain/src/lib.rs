// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Brain client: the bridge between the turn orchestrator and the external
//! language-model endpoint.  A brain never raises — every transport or
//! parsing failure comes back as a `malformed` [`TurnOutput`] so the
//! orchestrator has exactly one code path.

mod client;
mod mock;
mod sanitize;
mod types;

use async_trait::async_trait;

pub use client::HttpBrain;
pub use mock::{test_input, RepeatingBrain, ScriptedBrain};
pub use sanitize::{parse_loose_json, sanitize_turn_output};
pub use types::*;

/// A plan generator.  Implemented by [`HttpBrain`] for production and
/// [`ScriptedBrain`] for tests.
#[async_trait]
pub trait Brain: Send + Sync {
    /// Human-readable name for status display.
    fn name(&self) -> &str;

    /// Produce a plan for one tick.  Infallible by contract: failures are
    /// encoded as `integrity == Malformed` with a single `noop` action.
    async fn generate_turn(&self, input: &TurnInput) -> TurnOutput;
}
