// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Read-only HTTP adapter for `api` sources.  Strictly GET: any other
//! requested method is refused before a connection is opened.

use async_trait::async_trait;
use tracing::debug;

use aethernet_config::ToolSource;

use crate::{ToolAdapter, ToolInvocation, ToolResponse};

pub struct ReadonlyApiAdapter {
    http: reqwest::Client,
}

impl ReadonlyApiAdapter {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    /// `<baseUrl>/v1/tools/<toolName>?<query>` with query pairs taken from
    /// `input.query`.
    fn build_url(base_url: &str, invocation: &ToolInvocation) -> String {
        let mut url = format!(
            "{}/v1/tools/{}",
            base_url.trim_end_matches('/'),
            invocation.tool_name
        );
        if let Some(query) = invocation.input.get("query").and_then(|v| v.as_object()) {
            let mut pairs = Vec::with_capacity(query.len());
            for (k, v) in query {
                let value = match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                pairs.push(format!("{}={}", urlencode(k), urlencode(&value)));
            }
            if !pairs.is_empty() {
                url.push('?');
                url.push_str(&pairs.join("&"));
            }
        }
        url
    }
}

impl Default for ReadonlyApiAdapter {
    fn default() -> Self {
        Self::new()
    }
}

/// Minimal percent-encoding for query components.
fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

#[async_trait]
impl ToolAdapter for ReadonlyApiAdapter {
    fn name(&self) -> &str {
        "readonly_api"
    }

    async fn invoke(&self, source: &ToolSource, invocation: &ToolInvocation) -> ToolResponse {
        if let Some(method) = invocation.input.get("method").and_then(|v| v.as_str()) {
            if !method.eq_ignore_ascii_case("GET") {
                return ToolResponse::failure(format!(
                    "read-only API adapter refuses method {method}"
                ));
            }
        }
        let Some(base_url) = source.base_url.as_deref().map(str::trim).filter(|s| !s.is_empty())
        else {
            return ToolResponse::failure(format!("source {} has no baseUrl", source.id));
        };

        let url = Self::build_url(base_url, invocation);
        debug!(url = %url, source = %source.id, "read-only API request");

        let mut request = self.http.get(&url);
        if let Some(env_name) = source.auth_env.as_deref() {
            if let Ok(token) = std::env::var(env_name) {
                request = request.bearer_auth(token);
            }
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => return ToolResponse::failure(format!("request failed: {e}")),
        };
        let status = response.status().as_u16();
        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("json"))
            .unwrap_or(false);
        let body = response.text().await.unwrap_or_default();

        if !(200..300).contains(&status) {
            return ToolResponse::failure(format!("tool endpoint returned status {status}"))
                .with_metadata("status", serde_json::Value::from(status))
                .with_metadata("body", serde_json::Value::String(body));
        }

        let output = if is_json {
            serde_json::from_str(&body)
                .unwrap_or(serde_json::Value::String(body))
        } else {
            serde_json::Value::String(body)
        };
        ToolResponse::success(output).with_metadata("status", serde_json::Value::from(status))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use aethernet_config::ToolSourceType;
    use serde_json::json;

    fn source() -> ToolSource {
        ToolSource {
            id: "ext.api".into(),
            name: "Ext".into(),
            source_type: ToolSourceType::Api,
            enabled: true,
            base_url: Some("https://tools.example/".into()),
            auth_env: None,
            metadata: serde_json::Map::new(),
        }
    }

    fn invocation(input: serde_json::Value) -> ToolInvocation {
        ToolInvocation {
            source_id: "ext.api".into(),
            tool_name: "price_feed".into(),
            input,
            context: serde_json::Map::new(),
        }
    }

    // ── URL construction ──────────────────────────────────────────────────────

    #[test]
    fn url_joins_base_and_tool_name() {
        let url = ReadonlyApiAdapter::build_url("https://tools.example/", &invocation(json!({})));
        assert_eq!(url, "https://tools.example/v1/tools/price_feed");
    }

    #[test]
    fn query_pairs_are_encoded() {
        let url = ReadonlyApiAdapter::build_url(
            "https://tools.example",
            &invocation(json!({"query": {"symbol": "ETH/USD", "limit": 5}})),
        );
        assert!(url.starts_with("https://tools.example/v1/tools/price_feed?"));
        assert!(url.contains("symbol=ETH%2FUSD"));
        assert!(url.contains("limit=5"));
    }

    #[test]
    fn urlencode_leaves_unreserved_alone() {
        assert_eq!(urlencode("abc-123_.~"), "abc-123_.~");
        assert_eq!(urlencode("a b"), "a%20b");
    }

    // ── Method and config refusals ────────────────────────────────────────────

    #[tokio::test]
    async fn non_get_method_is_refused() {
        let adapter = ReadonlyApiAdapter::new();
        let r = adapter
            .invoke(&source(), &invocation(json!({"method": "POST"})))
            .await;
        assert!(!r.ok);
        assert!(r.error.unwrap().contains("refuses method POST"));
    }

    #[tokio::test]
    async fn explicit_get_is_accepted_shapewise() {
        // No server behind the URL: the refusal we test for must NOT be the
        // method refusal.
        let adapter = ReadonlyApiAdapter::new();
        let mut src = source();
        src.base_url = Some("http://127.0.0.1:1".into());
        let r = adapter
            .invoke(&src, &invocation(json!({"method": "get"})))
            .await;
        assert!(!r.ok);
        assert!(r.error.unwrap().contains("request failed"));
    }

    #[tokio::test]
    async fn missing_base_url_is_refused() {
        let adapter = ReadonlyApiAdapter::new();
        let mut src = source();
        src.base_url = None;
        let r = adapter.invoke(&src, &invocation(json!({}))).await;
        assert!(!r.ok);
        assert!(r.error.unwrap().contains("no baseUrl"));
    }
}
