// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The built-in `internal` adapter: a fixed, read-only window into the
//! runtime.  Performs no writes by construction — it only ever calls
//! [`RuntimeView`] getters.

use async_trait::async_trait;
use std::sync::Arc;

use aethernet_config::ToolSource;

use crate::{ToolAdapter, ToolInvocation, ToolResponse};

/// Narrow read-only view the internal adapter sees.  Implemented by the
/// runtime over the state store; kept as a trait so this crate does not
/// depend on the core crate.
pub trait RuntimeView: Send + Sync {
    fn agent_status(&self) -> anyhow::Result<serde_json::Value>;
    fn memory_facts(&self, limit: u32) -> anyhow::Result<serde_json::Value>;
    fn memory_episodes(&self, limit: u32) -> anyhow::Result<serde_json::Value>;
    fn message_threads(&self, limit: u32) -> anyhow::Result<serde_json::Value>;
    fn survival_snapshot(&self) -> anyhow::Result<serde_json::Value>;
    fn queue_depth(&self) -> anyhow::Result<u32>;
}

pub struct InternalAdapter {
    view: Arc<dyn RuntimeView>,
}

impl InternalAdapter {
    pub fn new(view: Arc<dyn RuntimeView>) -> Self {
        Self { view }
    }

    fn limit(invocation: &ToolInvocation) -> u32 {
        invocation
            .input
            .get("limit")
            .and_then(|v| v.as_u64())
            .map(|n| n.min(500) as u32)
            .unwrap_or(50)
    }
}

#[async_trait]
impl ToolAdapter for InternalAdapter {
    fn name(&self) -> &str {
        "internal"
    }

    async fn invoke(&self, _source: &ToolSource, invocation: &ToolInvocation) -> ToolResponse {
        let limit = Self::limit(invocation);
        let result = match invocation.tool_name.as_str() {
            "agent_status" => self.view.agent_status(),
            "memory_facts" => self.view.memory_facts(limit),
            "memory_episodes" => self.view.memory_episodes(limit),
            "message_threads" => self.view.message_threads(limit),
            "survival_snapshot" => self.view.survival_snapshot(),
            "queue_depth" => self
                .view
                .queue_depth()
                .map(|n| serde_json::Value::from(n)),
            other => return ToolResponse::failure(format!("unknown internal tool: {other}")),
        };
        match result {
            Ok(output) => ToolResponse::success(output),
            Err(e) => ToolResponse::failure(format!("internal tool failed: {e}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FakeView;

    impl RuntimeView for FakeView {
        fn agent_status(&self) -> anyhow::Result<serde_json::Value> {
            Ok(json!({"state": "sleeping"}))
        }
        fn memory_facts(&self, limit: u32) -> anyhow::Result<serde_json::Value> {
            Ok(json!({"limit": limit}))
        }
        fn memory_episodes(&self, _limit: u32) -> anyhow::Result<serde_json::Value> {
            Ok(json!([]))
        }
        fn message_threads(&self, _limit: u32) -> anyhow::Result<serde_json::Value> {
            Ok(json!([]))
        }
        fn survival_snapshot(&self) -> anyhow::Result<serde_json::Value> {
            Err(anyhow::anyhow!("no snapshot yet"))
        }
        fn queue_depth(&self) -> anyhow::Result<u32> {
            Ok(3)
        }
    }

    fn invoke_tool(name: &str, input: serde_json::Value) -> ToolInvocation {
        ToolInvocation {
            source_id: "internal.runtime".into(),
            tool_name: name.into(),
            input,
            context: serde_json::Map::new(),
        }
    }

    fn adapter() -> InternalAdapter {
        InternalAdapter::new(Arc::new(FakeView))
    }

    #[tokio::test]
    async fn agent_status_is_exposed() {
        let r = adapter()
            .invoke(&ToolSource::internal_runtime(), &invoke_tool("agent_status", json!({})))
            .await;
        assert!(r.ok);
        assert_eq!(r.output.unwrap()["state"], "sleeping");
    }

    #[tokio::test]
    async fn queue_depth_is_a_number() {
        let r = adapter()
            .invoke(&ToolSource::internal_runtime(), &invoke_tool("queue_depth", json!({})))
            .await;
        assert_eq!(r.output.unwrap(), json!(3));
    }

    #[tokio::test]
    async fn limit_is_clamped() {
        let r = adapter()
            .invoke(
                &ToolSource::internal_runtime(),
                &invoke_tool("memory_facts", json!({"limit": 100_000})),
            )
            .await;
        assert_eq!(r.output.unwrap()["limit"], 500);
    }

    #[tokio::test]
    async fn unknown_tool_is_refused() {
        let r = adapter()
            .invoke(&ToolSource::internal_runtime(), &invoke_tool("write_file", json!({})))
            .await;
        assert!(!r.ok);
        assert!(r.error.unwrap().contains("unknown internal tool"));
    }

    #[tokio::test]
    async fn view_errors_become_failures() {
        let r = adapter()
            .invoke(
                &ToolSource::internal_runtime(),
                &invoke_tool("survival_snapshot", json!({})),
            )
            .await;
        assert!(!r.ok);
        assert!(r.error.unwrap().contains("no snapshot yet"));
    }
}
