// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::types::{
    Action, AgentIdentity, Integrity, MemorySnapshot, MemoryWrites, SurvivalTier, TurnInput,
    TurnOutput,
};
use crate::Brain;

/// A pre-scripted brain.  Each call to `generate_turn` pops the next output
/// from the front of the queue; an empty queue yields an idle plan.  Lets
/// tests drive the orchestrator through exact plans without network access.
pub struct ScriptedBrain {
    outputs: Mutex<VecDeque<TurnOutput>>,
    /// The last `TurnInput` seen by this brain.  Written on each call so
    /// tests can inspect what the orchestrator assembled.
    pub last_input: Arc<Mutex<Option<TurnInput>>>,
}

impl ScriptedBrain {
    pub fn new(outputs: Vec<TurnOutput>) -> Self {
        Self {
            outputs: Mutex::new(outputs.into()),
            last_input: Arc::new(Mutex::new(None)),
        }
    }

    /// A brain that always answers with the same output.
    pub fn repeating(output: TurnOutput) -> RepeatingBrain {
        RepeatingBrain {
            output,
            last_input: Arc::new(Mutex::new(None)),
        }
    }

    fn idle() -> TurnOutput {
        TurnOutput {
            summary: "Idle.".into(),
            next_actions: vec![Action::noop("script_exhausted")],
            memory_writes: MemoryWrites::default(),
            sleep_ms: None,
            integrity: Integrity::Ok,
            dropped_types: vec![],
        }
    }
}

#[async_trait]
impl Brain for ScriptedBrain {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate_turn(&self, input: &TurnInput) -> TurnOutput {
        if let Ok(mut last) = self.last_input.lock() {
            *last = Some(input.clone());
        }
        self.outputs
            .lock()
            .ok()
            .and_then(|mut q| q.pop_front())
            .unwrap_or_else(Self::idle)
    }
}

/// Companion to [`ScriptedBrain`]: replays one output forever.
pub struct RepeatingBrain {
    output: TurnOutput,
    pub last_input: Arc<Mutex<Option<TurnInput>>>,
}

#[async_trait]
impl Brain for RepeatingBrain {
    fn name(&self) -> &str {
        "repeating"
    }

    async fn generate_turn(&self, input: &TurnInput) -> TurnOutput {
        if let Ok(mut last) = self.last_input.lock() {
            *last = Some(input.clone());
        }
        self.output.clone()
    }
}

/// Minimal turn input for unit tests.
pub fn test_input() -> TurnInput {
    TurnInput {
        agent: AgentIdentity {
            address: "0x0000000000000000000000000000000000000000".into(),
            name: "test-agent".into(),
            state: "running".into(),
        },
        survival_tier: SurvivalTier::Normal,
        estimated_usd: 100,
        operator_prompt: None,
        inbox_messages: vec![],
        recent_turns: vec![],
        memory: MemorySnapshot::default(),
        skills: vec![],
        tool_sources: vec![],
        available_actions: crate::types::ActionType::ALL
            .iter()
            .map(|a| a.as_str().to_string())
            .collect(),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_brain_pops_in_order() {
        let brain = ScriptedBrain::new(vec![
            TurnOutput::malformed("first"),
            TurnOutput::malformed("second"),
        ]);
        let input = test_input();
        let a = brain.generate_turn(&input).await;
        let b = brain.generate_turn(&input).await;
        assert_eq!(a.next_actions[0].str_param("reason"), Some("first"));
        assert_eq!(b.next_actions[0].str_param("reason"), Some("second"));
    }

    #[tokio::test]
    async fn exhausted_script_goes_idle() {
        let brain = ScriptedBrain::new(vec![]);
        let out = brain.generate_turn(&test_input()).await;
        assert_eq!(out.integrity, Integrity::Ok);
        assert_eq!(out.next_actions[0].kind, crate::ActionType::Noop);
    }

    #[tokio::test]
    async fn last_input_is_recorded() {
        let brain = ScriptedBrain::new(vec![]);
        brain.generate_turn(&test_input()).await;
        let seen = brain.last_input.lock().unwrap();
        assert_eq!(seen.as_ref().unwrap().agent.name, "test-agent");
    }
}
