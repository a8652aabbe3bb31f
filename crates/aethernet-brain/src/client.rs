// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! HTTP brain driver for responses-style endpoints.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use aethernet_config::BrainConfig;

use crate::sanitize::{parse_loose_json, sanitize_turn_output};
use crate::types::{ActionType, TurnInput, TurnOutput};
use crate::Brain;

/// Statuses worth retrying; everything else fails the attempt loop at once.
const RETRYABLE: [u16; 8] = [408, 409, 425, 429, 500, 502, 503, 504];

const BACKOFF_CAP_MS: u64 = 30_000;

pub struct HttpBrain {
    config: BrainConfig,
    http: reqwest::Client,
}

impl HttpBrain {
    pub fn new(config: BrainConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    fn system_prompt() -> String {
        let allowed = ActionType::ALL
            .iter()
            .map(|a| a.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "You are the autonomous planner of a wallet-native agent. \
             Respond with a single JSON object: \
             {{\"summary\", \"nextActions\", \"memoryWrites\"?, \"sleepMs\"?}}. \
             Each action is {{\"type\", \"params\"}} where type is one of: {allowed}. \
             Never emit shell commands, scripts, or any action type outside that list."
        )
    }

    fn request_body(&self, input: &TurnInput) -> Value {
        let user_text = serde_json::to_string(input).unwrap_or_else(|_| "{}".into());
        json!({
            "model": self.config.model,
            "temperature": self.config.temperature,
            "max_output_tokens": self.config.max_output_tokens,
            "input": [
                {
                    "role": "system",
                    "content": [{"type": "input_text", "text": Self::system_prompt()}]
                },
                {
                    "role": "user",
                    "content": [{"type": "input_text", "text": user_text}]
                }
            ]
        })
    }

    /// Pull the response text out of either wire shape: a top-level
    /// `output_text`, or `output[].content[].text` segments concatenated.
    fn extract_text(body: &Value) -> Option<String> {
        if let Some(text) = body.get("output_text").and_then(Value::as_str) {
            return Some(text.to_string());
        }
        let items = body.get("output")?.as_array()?;
        let mut out = String::new();
        for item in items {
            if let Some(parts) = item.get("content").and_then(Value::as_array) {
                for part in parts {
                    if let Some(text) = part.get("text").and_then(Value::as_str) {
                        out.push_str(text);
                    }
                }
            }
        }
        if out.is_empty() {
            None
        } else {
            Some(out)
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.config.retry_backoff_ms.max(100);
        let ms = base.saturating_mul(1u64 << (attempt.saturating_sub(1)).min(16));
        Duration::from_millis(ms.min(BACKOFF_CAP_MS))
    }

    /// Run the attempt loop and return the decoded response body.
    async fn request(&self, api_key: &str, body: &Value) -> Result<Value, String> {
        let attempts = self.config.max_retries + 1;
        let mut last_error = String::from("no attempts made");
        for attempt in 1..=attempts {
            let result = self
                .http
                .post(&self.config.api_url)
                .bearer_auth(api_key)
                .timeout(Duration::from_millis(self.config.timeout_ms))
                .json(body)
                .send()
                .await;
            match result {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if resp.status().is_success() {
                        return resp
                            .json::<Value>()
                            .await
                            .map_err(|e| format!("response decode failed: {e}"));
                    }
                    last_error = format!("brain endpoint returned status {status}");
                    if !RETRYABLE.contains(&status) {
                        return Err(last_error);
                    }
                }
                Err(e) => {
                    last_error = format!("brain transport error: {e}");
                }
            }
            if attempt < attempts {
                let delay = self.backoff(attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying brain request");
                tokio::time::sleep(delay).await;
            }
        }
        Err(last_error)
    }
}

#[async_trait]
impl Brain for HttpBrain {
    fn name(&self) -> &str {
        "http"
    }

    async fn generate_turn(&self, input: &TurnInput) -> TurnOutput {
        let Ok(api_key) = std::env::var(&self.config.api_key_env) else {
            warn!(env = %self.config.api_key_env, "brain API key env var not set");
            return TurnOutput::malformed("missing_api_key");
        };
        if api_key.trim().is_empty() {
            return TurnOutput::malformed("missing_api_key");
        }

        let body = self.request_body(input);
        let response = match self.request(&api_key, &body).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "brain request failed");
                return TurnOutput::malformed("request_failed");
            }
        };

        let Some(text) = Self::extract_text(&response) else {
            return TurnOutput::malformed("empty_output");
        };
        let Some(parsed) = parse_loose_json(&text) else {
            return TurnOutput::malformed("invalid_json");
        };
        sanitize_turn_output(&parsed)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn brain_with(backoff_ms: u64) -> HttpBrain {
        HttpBrain::new(BrainConfig {
            retry_backoff_ms: backoff_ms,
            ..BrainConfig::default()
        })
    }

    // ── Backoff ───────────────────────────────────────────────────────────────

    #[test]
    fn backoff_doubles_per_attempt() {
        let b = brain_with(500);
        assert_eq!(b.backoff(1).as_millis(), 500);
        assert_eq!(b.backoff(2).as_millis(), 1000);
        assert_eq!(b.backoff(3).as_millis(), 2000);
    }

    #[test]
    fn backoff_has_a_floor_of_100ms() {
        let b = brain_with(0);
        assert_eq!(b.backoff(1).as_millis(), 100);
    }

    #[test]
    fn backoff_caps_at_30s() {
        let b = brain_with(10_000);
        assert_eq!(b.backoff(10).as_millis(), 30_000);
    }

    // ── Text extraction ───────────────────────────────────────────────────────

    #[test]
    fn extracts_top_level_output_text() {
        let body = json!({"output_text": "{\"summary\":\"x\"}"});
        assert_eq!(
            HttpBrain::extract_text(&body).as_deref(),
            Some("{\"summary\":\"x\"}")
        );
    }

    #[test]
    fn extracts_and_concatenates_segments() {
        let body = json!({"output": [
            {"content": [{"text": "{\"summ"}, {"text": "ary\":\"x\"}"}]},
        ]});
        assert_eq!(
            HttpBrain::extract_text(&body).as_deref(),
            Some("{\"summary\":\"x\"}")
        );
    }

    #[test]
    fn empty_body_yields_none() {
        assert_eq!(HttpBrain::extract_text(&json!({})), None);
        assert_eq!(HttpBrain::extract_text(&json!({"output": []})), None);
    }

    // ── Missing key short-circuit ─────────────────────────────────────────────

    #[tokio::test]
    async fn missing_api_key_returns_malformed_without_network() {
        let mut cfg = BrainConfig::default();
        cfg.api_key_env = "AETHERNET_TEST_KEY_THAT_DOES_NOT_EXIST".into();
        // Unroutable URL: a network attempt would error differently than the
        // missing-key reason we assert on.
        cfg.api_url = "http://127.0.0.1:1/unreachable".into();
        let brain = HttpBrain::new(cfg);
        let input = crate::mock::test_input();
        let out = brain.generate_turn(&input).await;
        assert_eq!(out.integrity, crate::Integrity::Malformed);
        assert_eq!(out.next_actions[0].str_param("reason"), Some("missing_api_key"));
    }

    // ── Request body shape ────────────────────────────────────────────────────

    #[test]
    fn request_body_has_system_and_user_messages() {
        let brain = brain_with(500);
        let body = brain.request_body(&crate::mock::test_input());
        let input = body["input"].as_array().unwrap();
        assert_eq!(input.len(), 2);
        assert_eq!(input[0]["role"], "system");
        assert_eq!(input[1]["role"], "user");
        let system_text = input[0]["content"][0]["text"].as_str().unwrap();
        assert!(system_text.contains("send_message"));
        assert!(system_text.to_lowercase().contains("shell"));
        // The user message is the JSON-serialized turn input.
        let user_text = input[1]["content"][0]["text"].as_str().unwrap();
        assert!(user_text.contains("survivalTier"));
    }
}
