// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Tool registry: dispatches `invoke_tool` actions to adapters under the
//! external-source policy.  Adapters never raise — a refused or failed
//! invocation is an `ok = false` response the executor turns into an action
//! failure.

mod internal;
mod readonly_api;
mod registry;

use async_trait::async_trait;

use aethernet_config::ToolSource;

pub use internal::{InternalAdapter, RuntimeView};
pub use readonly_api::ReadonlyApiAdapter;
pub use registry::ToolRegistry;

/// One tool call as planned by the brain.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub source_id: String,
    pub tool_name: String,
    pub input: serde_json::Value,
    /// Caller-supplied context (turn id, agent address) forwarded to
    /// adapters for tracing.
    pub context: serde_json::Map<String, serde_json::Value>,
}

/// Adapter result.  `ok = false` carries a reason in `error` and optional
/// transport detail in `metadata`.
#[derive(Debug, Clone)]
pub struct ToolResponse {
    pub ok: bool,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl ToolResponse {
    pub fn success(output: serde_json::Value) -> Self {
        Self {
            ok: true,
            output: Some(output),
            error: None,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            output: None,
            error: Some(error.into()),
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// A tool backend.  Registered in the [`ToolRegistry`] by name and selected
/// per source.
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    /// Registry key, e.g. `internal` or `readonly_api`.
    fn name(&self) -> &str;

    async fn invoke(&self, source: &ToolSource, invocation: &ToolInvocation) -> ToolResponse;
}
