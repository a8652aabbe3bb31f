// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Turn-input and turn-output types: the wire contract between the runtime
//! and the brain.  Serialized as JSON into the user message of each request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse liquidity classification driving gating and alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurvivalTier {
    Normal,
    LowCompute,
    Critical,
    Dead,
}

impl SurvivalTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SurvivalTier::Normal => "normal",
            SurvivalTier::LowCompute => "low_compute",
            SurvivalTier::Critical => "critical",
            SurvivalTier::Dead => "dead",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "normal" => Some(SurvivalTier::Normal),
            "low_compute" => Some(SurvivalTier::LowCompute),
            "critical" => Some(SurvivalTier::Critical),
            "dead" => Some(SurvivalTier::Dead),
            _ => None,
        }
    }
}

impl std::fmt::Display for SurvivalTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The eight action kinds the brain may plan.  Closed set: the sanitizer
/// drops anything else before validation even sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    SendMessage,
    Replicate,
    SelfModify,
    RecordFact,
    RecordEpisode,
    InvokeTool,
    Sleep,
    Noop,
}

impl ActionType {
    pub const ALL: [ActionType; 8] = [
        ActionType::SendMessage,
        ActionType::Replicate,
        ActionType::SelfModify,
        ActionType::RecordFact,
        ActionType::RecordEpisode,
        ActionType::InvokeTool,
        ActionType::Sleep,
        ActionType::Noop,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::SendMessage => "send_message",
            ActionType::Replicate => "replicate",
            ActionType::SelfModify => "self_modify",
            ActionType::RecordFact => "record_fact",
            ActionType::RecordEpisode => "record_episode",
            ActionType::InvokeTool => "invoke_tool",
            ActionType::Sleep => "sleep",
            ActionType::Noop => "noop",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|a| a.as_str() == s)
    }

    /// Mutating actions are gated by emergency stop, survival tier and (for
    /// message/replicate) the wallet session.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            ActionType::SendMessage | ActionType::Replicate | ActionType::SelfModify
        )
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One element of the brain's plan.  All type-specific fields live in the
/// free-form `params` bag and are typed at each action handler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: ActionType,
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl Action {
    pub fn noop(reason: &str) -> Self {
        let mut params = serde_json::Map::new();
        params.insert("reason".into(), serde_json::Value::String(reason.into()));
        Self {
            kind: ActionType::Noop,
            params,
        }
    }

    /// A string parameter, trimmed; `None` when missing or empty.
    pub fn str_param(&self, key: &str) -> Option<&str> {
        self.params
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn num_param(&self, key: &str) -> Option<f64> {
        self.params.get(key).and_then(|v| v.as_f64())
    }
}

/// Agent self-description included in every turn input.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentIdentity {
    pub address: String,
    pub name: String,
    pub state: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxMessageView {
    pub id: String,
    pub from: String,
    pub thread_id: Option<String>,
    pub content: String,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentTurnView {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub state: String,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactView {
    pub key: String,
    pub value: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeView {
    pub summary: String,
    pub outcome: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySnapshot {
    pub facts: Vec<FactView>,
    pub episodes: Vec<EpisodeView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillView {
    pub id: String,
    pub name: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSourceView {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub source_type: String,
}

/// Everything the brain sees for one tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnInput {
    pub agent: AgentIdentity,
    pub survival_tier: SurvivalTier,
    pub estimated_usd: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator_prompt: Option<String>,
    pub inbox_messages: Vec<InboxMessageView>,
    pub recent_turns: Vec<RecentTurnView>,
    pub memory: MemorySnapshot,
    pub skills: Vec<SkillView>,
    pub tool_sources: Vec<ToolSourceView>,
    pub available_actions: Vec<String>,
}

/// Whether the brain's output survived transport and sanitization intact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Integrity {
    Ok,
    Malformed,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct MemoryWrites {
    pub facts: Vec<FactWrite>,
    pub episodes: Vec<EpisodeWrite>,
}

impl MemoryWrites {
    pub fn is_empty(&self) -> bool {
        self.facts.is_empty() && self.episodes.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FactWrite {
    pub key: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeWrite {
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_type: Option<String>,
}

/// The brain's structured plan for one tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TurnOutput {
    pub summary: String,
    pub next_actions: Vec<Action>,
    #[serde(default, skip_serializing_if = "MemoryWrites::is_empty")]
    pub memory_writes: MemoryWrites,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sleep_ms: Option<u64>,
    pub integrity: Integrity,
    /// Action type names the sanitizer removed (not wire data).  The
    /// validator turns these into `action_not_allowed` errors so a plan
    /// that tried to smuggle an unknown action is visible downstream.
    #[serde(skip)]
    pub dropped_types: Vec<String>,
}

impl TurnOutput {
    /// The degenerate output used for every failure path: a single `noop`
    /// carrying the failure reason, marked malformed.
    pub fn malformed(reason: &str) -> Self {
        Self {
            summary: String::new(),
            next_actions: vec![Action::noop(reason)],
            memory_writes: MemoryWrites::default(),
            sleep_ms: None,
            integrity: Integrity::Malformed,
            dropped_types: vec![],
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn action_type_round_trips() {
        for a in ActionType::ALL {
            assert_eq!(ActionType::parse(a.as_str()), Some(a));
        }
        assert_eq!(ActionType::parse("exec"), None);
    }

    #[test]
    fn mutating_set_is_exactly_three() {
        let mutating: Vec<_> = ActionType::ALL.iter().filter(|a| a.is_mutating()).collect();
        assert_eq!(mutating.len(), 3);
        assert!(ActionType::RecordFact.is_mutating() == false);
    }

    #[test]
    fn action_deserializes_with_type_tag() {
        let a: Action =
            serde_json::from_value(json!({"type":"send_message","params":{"to":"0xabc"}}))
                .unwrap();
        assert_eq!(a.kind, ActionType::SendMessage);
        assert_eq!(a.str_param("to"), Some("0xabc"));
    }

    #[test]
    fn action_params_default_to_empty() {
        let a: Action = serde_json::from_value(json!({"type":"noop"})).unwrap();
        assert!(a.params.is_empty());
    }

    #[test]
    fn str_param_trims_and_rejects_empty() {
        let a: Action =
            serde_json::from_value(json!({"type":"noop","params":{"x":"  ","y":" hi "}}))
                .unwrap();
        assert_eq!(a.str_param("x"), None);
        assert_eq!(a.str_param("y"), Some("hi"));
    }

    #[test]
    fn malformed_output_carries_reason() {
        let o = TurnOutput::malformed("invalid_json");
        assert_eq!(o.integrity, Integrity::Malformed);
        assert_eq!(o.next_actions.len(), 1);
        assert_eq!(o.next_actions[0].str_param("reason"), Some("invalid_json"));
    }

    #[test]
    fn survival_tier_serde_is_snake_case() {
        assert_eq!(
            serde_json::to_string(&SurvivalTier::LowCompute).unwrap(),
            "\"low_compute\""
        );
    }

    #[test]
    fn turn_input_serializes_camel_case() {
        let input = TurnInput {
            agent: AgentIdentity {
                address: "0xabc".into(),
                name: "aethernet".into(),
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
            available_actions: vec!["noop".into()],
        };
        let s = serde_json::to_string(&input).unwrap();
        assert!(s.contains("survivalTier"));
        assert!(s.contains("availableActions"));
        assert!(!s.contains("operatorPrompt"), "None fields are omitted");
    }
}
