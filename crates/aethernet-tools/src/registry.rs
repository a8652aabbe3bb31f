// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use aethernet_config::{ToolSource, ToolSourceType};

use crate::{ToolAdapter, ToolInvocation, ToolResponse};

/// Central registry holding all tool sources and adapters.
pub struct ToolRegistry {
    sources: HashMap<String, ToolSource>,
    adapters: HashMap<String, Arc<dyn ToolAdapter>>,
    /// Runtime policy switch: when false, only `internal` sources dispatch.
    allow_external_sources: bool,
}

impl ToolRegistry {
    pub fn new(allow_external_sources: bool) -> Self {
        Self {
            sources: HashMap::new(),
            adapters: HashMap::new(),
            allow_external_sources,
        }
    }

    pub fn register_source(&mut self, source: ToolSource) {
        self.sources.insert(source.id.clone(), source);
    }

    pub fn register_adapter(&mut self, adapter: impl ToolAdapter + 'static) {
        self.adapters
            .insert(adapter.name().to_string(), Arc::new(adapter));
    }

    pub fn sources(&self) -> Vec<&ToolSource> {
        let mut out: Vec<&ToolSource> = self.sources.values().collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Which adapter a source dispatches to: an explicit
    /// `metadata.adapter` wins, then the type-based default.
    fn adapter_name(source: &ToolSource) -> String {
        if let Some(name) = source.metadata.get("adapter").and_then(|v| v.as_str()) {
            return name.to_string();
        }
        match source.source_type {
            ToolSourceType::Internal => "internal".into(),
            ToolSourceType::Api => "readonly_api".into(),
            other => other.to_string(),
        }
    }

    /// Apply the source policy and dispatch.  Policy order: unknown source,
    /// disabled source, external-source switch, adapter resolution.
    pub async fn invoke(&self, invocation: &ToolInvocation) -> ToolResponse {
        let Some(source) = self.sources.get(&invocation.source_id) else {
            return ToolResponse::failure(format!(
                "unknown tool source: {}",
                invocation.source_id
            ));
        };
        if !source.enabled {
            return ToolResponse::failure(format!("tool source {} is disabled", source.id));
        }
        if source.source_type != ToolSourceType::Internal && !self.allow_external_sources {
            return ToolResponse::failure(
                "external tool sources are disabled by runtime policy",
            );
        }
        let adapter_name = Self::adapter_name(source);
        let Some(adapter) = self.adapters.get(&adapter_name) else {
            return ToolResponse::failure(format!("no adapter named {adapter_name}"));
        };
        debug!(
            source = %source.id,
            tool = %invocation.tool_name,
            adapter = %adapter_name,
            "dispatching tool invocation"
        );
        adapter.invoke(source, invocation).await
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    struct EchoAdapter {
        name: &'static str,
    }

    #[async_trait]
    impl ToolAdapter for EchoAdapter {
        fn name(&self) -> &str {
            self.name
        }
        async fn invoke(&self, source: &ToolSource, inv: &ToolInvocation) -> ToolResponse {
            ToolResponse::success(json!({
                "adapter": self.name,
                "source": source.id,
                "tool": inv.tool_name,
            }))
        }
    }

    fn invocation(source_id: &str) -> ToolInvocation {
        ToolInvocation {
            source_id: source_id.into(),
            tool_name: "agent_status".into(),
            input: json!({}),
            context: serde_json::Map::new(),
        }
    }

    fn api_source(id: &str) -> ToolSource {
        ToolSource {
            id: id.into(),
            name: "Ext".into(),
            source_type: ToolSourceType::Api,
            enabled: true,
            base_url: Some("https://tools.example".into()),
            auth_env: None,
            metadata: serde_json::Map::new(),
        }
    }

    // ── Policy ────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn unknown_source_refused() {
        let reg = ToolRegistry::new(true);
        let r = reg.invoke(&invocation("ghost")).await;
        assert!(!r.ok);
        assert!(r.error.unwrap().contains("unknown tool source"));
    }

    #[tokio::test]
    async fn disabled_source_refused() {
        let mut reg = ToolRegistry::new(true);
        let mut src = ToolSource::internal_runtime();
        src.enabled = false;
        reg.register_source(src);
        let r = reg.invoke(&invocation("internal.runtime")).await;
        assert!(!r.ok);
        assert!(r.error.unwrap().contains("disabled"));
    }

    #[tokio::test]
    async fn external_sources_blocked_by_policy() {
        let mut reg = ToolRegistry::new(false);
        reg.register_source(api_source("ext.api"));
        reg.register_adapter(EchoAdapter { name: "readonly_api" });
        let r = reg.invoke(&invocation("ext.api")).await;
        assert!(!r.ok);
        assert!(r.error.unwrap().contains("runtime policy"));
    }

    #[tokio::test]
    async fn internal_source_allowed_even_when_external_disabled() {
        let mut reg = ToolRegistry::new(false);
        reg.register_source(ToolSource::internal_runtime());
        reg.register_adapter(EchoAdapter { name: "internal" });
        let r = reg.invoke(&invocation("internal.runtime")).await;
        assert!(r.ok);
    }

    #[tokio::test]
    async fn missing_adapter_refused() {
        let mut reg = ToolRegistry::new(true);
        reg.register_source(api_source("ext.api"));
        let r = reg.invoke(&invocation("ext.api")).await;
        assert!(!r.ok);
        assert!(r.error.unwrap().contains("no adapter"));
    }

    // ── Adapter selection ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn api_source_defaults_to_readonly_api_adapter() {
        let mut reg = ToolRegistry::new(true);
        reg.register_source(api_source("ext.api"));
        reg.register_adapter(EchoAdapter { name: "readonly_api" });
        let r = reg.invoke(&invocation("ext.api")).await;
        assert_eq!(r.output.unwrap()["adapter"], "readonly_api");
    }

    #[tokio::test]
    async fn metadata_adapter_overrides_default() {
        let mut reg = ToolRegistry::new(true);
        let mut src = api_source("ext.api");
        src.metadata
            .insert("adapter".into(), serde_json::Value::String("custom".into()));
        reg.register_source(src);
        reg.register_adapter(EchoAdapter { name: "custom" });
        let r = reg.invoke(&invocation("ext.api")).await;
        assert_eq!(r.output.unwrap()["adapter"], "custom");
    }

    #[tokio::test]
    async fn mcp_source_selects_adapter_named_after_type() {
        let mut reg = ToolRegistry::new(true);
        let mut src = api_source("bridge.mcp");
        src.source_type = ToolSourceType::Mcp;
        reg.register_source(src);
        reg.register_adapter(EchoAdapter { name: "mcp" });
        let r = reg.invoke(&invocation("bridge.mcp")).await;
        assert_eq!(r.output.unwrap()["adapter"], "mcp");
    }
}
