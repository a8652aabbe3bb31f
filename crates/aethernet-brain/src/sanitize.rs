// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Coercion of arbitrary model JSON into a [`TurnOutput`].
//!
//! Models return almost-right JSON often enough that a strict parse alone
//! would mark half the fleet malformed.  The sanitizer accepts anything
//! object-shaped, keeps what fits the contract, drops what doesn't, and
//! computes integrity from what survived.

use serde_json::Value;

use crate::types::{
    Action, ActionType, EpisodeWrite, FactWrite, Integrity, MemoryWrites, TurnOutput,
};

/// Parse model text as JSON; when the whole string fails, extract the first
/// balanced `{...}` block and try that.  Models love to wrap JSON in prose
/// or markdown fences.
pub fn parse_loose_json(text: &str) -> Option<Value> {
    if let Ok(v) = serde_json::from_str::<Value>(text) {
        if v.is_object() {
            return Some(v);
        }
    }
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let candidate = &text[start..start + i + 1];
                    return serde_json::from_str::<Value>(candidate)
                        .ok()
                        .filter(Value::is_object);
                }
            }
            _ => {}
        }
    }
    None
}

/// Coerce an arbitrary JSON value into a [`TurnOutput`].
///
/// Unknown action types are dropped.  Integrity is `Ok` only when a
/// non-empty summary and at least one action survived and the provider did
/// not already flag the payload.
pub fn sanitize_turn_output(value: &Value) -> TurnOutput {
    let summary = value
        .get("summary")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or("")
        .to_string();

    let mut actions = Vec::new();
    let mut dropped_types = Vec::new();
    if let Some(raw) = value.get("nextActions").and_then(Value::as_array) {
        for entry in raw {
            let Some(type_name) = entry.get("type").and_then(Value::as_str) else {
                continue;
            };
            let Some(kind) = ActionType::parse(type_name) else {
                dropped_types.push(type_name.to_string());
                continue;
            };
            let params = entry
                .get("params")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            actions.push(Action { kind, params });
        }
    }

    let memory_writes = sanitize_memory_writes(value.get("memoryWrites"));

    let sleep_ms = value
        .get("sleepMs")
        .and_then(Value::as_f64)
        .filter(|n| n.is_finite() && *n >= 0.0)
        .map(|n| n as u64);

    let provider_flagged = value
        .get("integrity")
        .and_then(Value::as_str)
        .map(|s| s == "malformed")
        .unwrap_or(false);

    let integrity = if !provider_flagged && !summary.is_empty() && !actions.is_empty() {
        Integrity::Ok
    } else {
        Integrity::Malformed
    };

    TurnOutput {
        summary,
        next_actions: actions,
        memory_writes,
        sleep_ms,
        integrity,
        dropped_types,
    }
}

fn sanitize_memory_writes(value: Option<&Value>) -> MemoryWrites {
    let mut writes = MemoryWrites::default();
    let Some(value) = value else {
        return writes;
    };
    if let Some(facts) = value.get("facts").and_then(Value::as_array) {
        for f in facts {
            let (Some(key), Some(val)) = (
                f.get("key").and_then(Value::as_str).map(str::trim),
                f.get("value").and_then(Value::as_str),
            ) else {
                continue;
            };
            if key.is_empty() {
                continue;
            }
            writes.facts.push(FactWrite {
                key: key.to_string(),
                value: val.to_string(),
                confidence: f.get("confidence").and_then(Value::as_f64),
                source: f
                    .get("source")
                    .and_then(Value::as_str)
                    .map(ToString::to_string),
            });
        }
    }
    if let Some(episodes) = value.get("episodes").and_then(Value::as_array) {
        for e in episodes {
            let Some(summary) = e
                .get("summary")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
            else {
                continue;
            };
            writes.episodes.push(EpisodeWrite {
                summary: summary.to_string(),
                outcome: e
                    .get("outcome")
                    .and_then(Value::as_str)
                    .map(ToString::to_string),
                action_type: e
                    .get("actionType")
                    .and_then(Value::as_str)
                    .map(ToString::to_string),
            });
        }
    }
    writes
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ── parse_loose_json ──────────────────────────────────────────────────────

    #[test]
    fn strict_json_parses() {
        let v = parse_loose_json(r#"{"summary":"x"}"#).unwrap();
        assert_eq!(v["summary"], "x");
    }

    #[test]
    fn fenced_json_is_extracted() {
        let text = "Here is the plan:\n```json\n{\"summary\":\"go\"}\n```\nDone.";
        let v = parse_loose_json(text).unwrap();
        assert_eq!(v["summary"], "go");
    }

    #[test]
    fn nested_braces_stay_balanced() {
        let text = "x {\"a\":{\"b\":1}} trailing {\"c\":2}";
        let v = parse_loose_json(text).unwrap();
        assert_eq!(v["a"]["b"], 1);
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_extraction() {
        let text = "note {\"msg\":\"look: } and { are fine\",\"n\":1}";
        let v = parse_loose_json(text).unwrap();
        assert_eq!(v["n"], 1);
    }

    #[test]
    fn non_object_json_is_rejected() {
        assert!(parse_loose_json("[1,2,3]").is_none());
        assert!(parse_loose_json("plain prose").is_none());
    }

    // ── sanitize_turn_output ──────────────────────────────────────────────────

    #[test]
    fn well_formed_output_is_ok() {
        let out = sanitize_turn_output(&json!({
            "summary": "reply to operator",
            "nextActions": [{"type":"send_message","params":{"to":"0xabc","content":"hi"}}],
            "sleepMs": 30000
        }));
        assert_eq!(out.integrity, Integrity::Ok);
        assert_eq!(out.next_actions.len(), 1);
        assert_eq!(out.sleep_ms, Some(30000));
    }

    #[test]
    fn unknown_action_types_are_dropped() {
        let out = sanitize_turn_output(&json!({
            "summary": "go",
            "nextActions": [
                {"type":"exec","params":{"cmd":"rm -rf /"}},
                {"type":"noop"}
            ]
        }));
        assert_eq!(out.next_actions.len(), 1);
        assert_eq!(out.next_actions[0].kind, ActionType::Noop);
        assert_eq!(out.integrity, Integrity::Ok);
        assert_eq!(out.dropped_types, vec!["exec".to_string()]);
    }

    #[test]
    fn empty_summary_is_malformed() {
        let out = sanitize_turn_output(&json!({
            "summary": "  ",
            "nextActions": [{"type":"noop"}]
        }));
        assert_eq!(out.integrity, Integrity::Malformed);
    }

    #[test]
    fn no_surviving_actions_is_malformed() {
        let out = sanitize_turn_output(&json!({
            "summary": "plan",
            "nextActions": [{"type":"launch_missiles"}]
        }));
        assert!(out.next_actions.is_empty());
        assert_eq!(out.integrity, Integrity::Malformed);
    }

    #[test]
    fn provider_flag_forces_malformed() {
        let out = sanitize_turn_output(&json!({
            "summary": "fine",
            "nextActions": [{"type":"noop"}],
            "integrity": "malformed"
        }));
        assert_eq!(out.integrity, Integrity::Malformed);
    }

    #[test]
    fn negative_sleep_is_discarded() {
        let out = sanitize_turn_output(&json!({
            "summary": "s",
            "nextActions": [{"type":"noop"}],
            "sleepMs": -5
        }));
        assert_eq!(out.sleep_ms, None);
    }

    #[test]
    fn memory_writes_drop_incomplete_entries() {
        let out = sanitize_turn_output(&json!({
            "summary": "s",
            "nextActions": [{"type":"noop"}],
            "memoryWrites": {
                "facts": [
                    {"key":"goal","value":"persist"},
                    {"key":"","value":"dropped"},
                    {"value":"no key"}
                ],
                "episodes": [
                    {"summary":"did a thing","outcome":"ok"},
                    {"outcome":"no summary"}
                ]
            }
        }));
        assert_eq!(out.memory_writes.facts.len(), 1);
        assert_eq!(out.memory_writes.facts[0].key, "goal");
        assert_eq!(out.memory_writes.episodes.len(), 1);
    }

    #[test]
    fn missing_fields_coerce_to_defaults() {
        let out = sanitize_turn_output(&json!({}));
        assert_eq!(out.summary, "");
        assert!(out.next_actions.is_empty());
        assert!(out.memory_writes.is_empty());
        assert_eq!(out.integrity, Integrity::Malformed);
    }
}
