// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Operator command protocol over message content.  Used by the CLI
//! `command` path for operator-injected actions; autonomy ticks hand
//! inbound messages to the brain instead of parsing them here.

use std::path::PathBuf;

use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum InboundCommand {
    SelfMod { target_path: PathBuf, content: String },
    Replicate { plan: Value },
    Noop,
}

/// Parse message content as a command envelope.  Anything unrecognized —
/// non-JSON, missing type, unknown type, missing fields — is `None` and is
/// simply ignored by callers.
pub fn parse_inbound_command(content: &str) -> Option<InboundCommand> {
    let value: Value = serde_json::from_str(content).ok()?;
    match value.get("type").and_then(Value::as_str)? {
        "self_mod" => {
            let target_path = value.get("targetPath").and_then(Value::as_str)?;
            let content = value.get("content").and_then(Value::as_str)?;
            Some(InboundCommand::SelfMod {
                target_path: PathBuf::from(target_path),
                content: content.to_string(),
            })
        }
        "replicate" => Some(InboundCommand::Replicate {
            plan: value.get("plan").cloned().unwrap_or(Value::Null),
        }),
        "noop" => Some(InboundCommand::Noop),
        _ => None,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_mod_command_parses() {
        let cmd = parse_inbound_command(
            r#"{"type":"self_mod","targetPath":"notes.md","content":"v2"}"#,
        )
        .unwrap();
        assert_eq!(
            cmd,
            InboundCommand::SelfMod {
                target_path: PathBuf::from("notes.md"),
                content: "v2".into()
            }
        );
    }

    #[test]
    fn self_mod_without_fields_is_ignored() {
        assert_eq!(parse_inbound_command(r#"{"type":"self_mod"}"#), None);
    }

    #[test]
    fn replicate_command_carries_plan() {
        let cmd =
            parse_inbound_command(r#"{"type":"replicate","plan":{"name":"scout"}}"#).unwrap();
        match cmd {
            InboundCommand::Replicate { plan } => assert_eq!(plan["name"], "scout"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn noop_command_parses() {
        assert_eq!(parse_inbound_command(r#"{"type":"noop"}"#), Some(InboundCommand::Noop));
    }

    #[test]
    fn unrecognized_content_is_ignored() {
        assert_eq!(parse_inbound_command("just a chat message"), None);
        assert_eq!(parse_inbound_command(r#"{"type":"detonate"}"#), None);
        assert_eq!(parse_inbound_command(r#"{"no":"type"}"#), None);
    }
}
