// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Secret redaction applied on every insert of free-text or metadata that
//! can reach an operator surface (incidents, alerts, turn metadata, payment
//! events).  Redaction happens in the store, not at call sites, so a caller
//! cannot forget it.

use std::sync::OnceLock;

use regex::Regex;

const REPLACEMENT: &str = "[REDACTED]";

/// Keys whose values are always replaced wholesale, regardless of content.
fn secret_key_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^(api[_-]?key|private[_-]?key|passphrase|authorization|secret|token|ciphertext|salt|iv|tag|signature)$",
        )
        .expect("static regex")
    })
}

/// Substring patterns scrubbed out of free text.
fn text_patterns() -> &'static [Regex; 3] {
    static RES: OnceLock<[Regex; 3]> = OnceLock::new();
    RES.get_or_init(|| {
        [
            // Bearer tokens in header-ish text.
            Regex::new(r"(?i)bearer\s+[a-z0-9._~+/=-]+").expect("static regex"),
            // 32-byte hex blobs (private keys, tx hashes carrying key material).
            Regex::new(r"0x[0-9a-fA-F]{64}").expect("static regex"),
            // Named nonce/signature headers, e.g. `x-nonce: abc123`.
            Regex::new(r"(?i)\b(x-)?(nonce|signature)\s*[:=]\s*[^\s,;]+").expect("static regex"),
        ]
    })
}

/// Scrub secret-shaped substrings from a free-text field.
pub fn redact_text(text: &str) -> String {
    let mut out = text.to_string();
    for re in text_patterns() {
        out = re.replace_all(&out, REPLACEMENT).into_owned();
    }
    out
}

/// Recursively scrub a metadata value: secret-named keys lose their values
/// entirely, string leaves are pattern-scrubbed.
pub fn redact_value(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                if secret_key_re().is_match(k) {
                    out.insert(k.clone(), serde_json::Value::String(REPLACEMENT.into()));
                } else {
                    out.insert(k.clone(), redact_value(v));
                }
            }
            serde_json::Value::Object(out)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(redact_value).collect())
        }
        serde_json::Value::String(s) => serde_json::Value::String(redact_text(s)),
        other => other.clone(),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ── Text patterns ─────────────────────────────────────────────────────────

    #[test]
    fn bearer_token_is_scrubbed() {
        let out = redact_text("sent Authorization: Bearer sk-abc123.def");
        assert!(!out.contains("sk-abc123"));
        assert!(out.contains("[REDACTED]"));
    }

    #[test]
    fn hex_private_key_is_scrubbed() {
        let key = format!("0x{}", "ab".repeat(32));
        let out = redact_text(&format!("leaked {key} in message"));
        assert!(!out.contains(&key));
    }

    #[test]
    fn short_hex_is_left_alone() {
        let tx = format!("0x{}", "ab".repeat(16));
        assert_eq!(redact_text(&format!("tx {tx}")), format!("tx {tx}"));
    }

    #[test]
    fn nonce_and_signature_headers_scrubbed() {
        let out = redact_text("x-nonce: 12345 x-signature: deadbeef");
        assert!(!out.contains("12345"));
        assert!(!out.contains("deadbeef"));
    }

    #[test]
    fn plain_text_unchanged() {
        assert_eq!(redact_text("all quiet"), "all quiet");
    }

    // ── Metadata keys ─────────────────────────────────────────────────────────

    #[test]
    fn secret_named_keys_lose_values() {
        let v = json!({
            "api_key": "sk-xyz",
            "apiKey": "sk-xyz",
            "passphrase": "hunter2hunter2",
            "note": "fine"
        });
        let r = redact_value(&v);
        assert_eq!(r["api_key"], "[REDACTED]");
        assert_eq!(r["apiKey"], "[REDACTED]");
        assert_eq!(r["passphrase"], "[REDACTED]");
        assert_eq!(r["note"], "fine");
    }

    #[test]
    fn nested_objects_and_arrays_are_walked() {
        let v = json!({"outer": {"token": "t0"}, "list": [{"secret": "s0"}]});
        let r = redact_value(&v);
        assert_eq!(r["outer"]["token"], "[REDACTED]");
        assert_eq!(r["list"][0]["secret"], "[REDACTED]");
    }

    #[test]
    fn string_leaves_are_pattern_scrubbed() {
        let v = json!({"detail": "auth used Bearer tok_abc"});
        let r = redact_value(&v);
        assert!(!r["detail"].as_str().unwrap().contains("tok_abc"));
    }

    #[test]
    fn non_secret_keys_keep_numbers() {
        let v = json!({"count": 7, "ok": true});
        assert_eq!(redact_value(&v), v);
    }
}
