// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Collaborator seams: the messaging transport and the compute provider.
//!
//! The core only ever talks to these traits.  Production wiring plugs in
//! the XMTP transport and the sandbox provisioner; tests and dry runs use
//! the in-memory doubles below.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// One message as delivered by the transport.
#[derive(Debug, Clone)]
pub struct InboundEnvelope {
    pub id: String,
    pub from: String,
    pub to: String,
    pub thread_id: Option<String>,
    pub content: String,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SentReceipt {
    pub message_id: String,
    pub thread_id: Option<String>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Messages received since `since`, oldest first, bounded by `limit`.
    async fn poll(
        &self,
        since: Option<DateTime<Utc>>,
        limit: u32,
    ) -> anyhow::Result<Vec<InboundEnvelope>>;

    async fn send(
        &self,
        to: &str,
        content: &str,
        thread_id: Option<&str>,
    ) -> anyhow::Result<SentReceipt>;
}

/// A provisioned sandbox for a replicated child.
#[derive(Debug, Clone)]
pub struct Sandbox {
    pub id: String,
    pub root: PathBuf,
}

#[async_trait]
pub trait ComputeProvider: Send + Sync {
    /// Allocate an isolated home for a child agent.
    async fn allocate_sandbox(&self, name: &str) -> anyhow::Result<Sandbox>;

    /// Ask the facilitator to move funds to a child address.
    async fn request_funding(&self, address: &str, amount_usdc: &str) -> anyhow::Result<()>;
}

// ─── Test doubles ────────────────────────────────────────────────────────────

/// Transport that never has messages and refuses to send.  Used when the
/// agent runs without a messaging identity.
pub struct NullTransport;

#[async_trait]
impl Transport for NullTransport {
    async fn poll(
        &self,
        _since: Option<DateTime<Utc>>,
        _limit: u32,
    ) -> anyhow::Result<Vec<InboundEnvelope>> {
        Ok(vec![])
    }

    async fn send(
        &self,
        _to: &str,
        _content: &str,
        _thread_id: Option<&str>,
    ) -> anyhow::Result<SentReceipt> {
        anyhow::bail!("no messaging transport configured")
    }
}

/// In-memory transport: tests queue inbound envelopes and inspect sends.
#[derive(Default)]
pub struct MockTransport {
    inbound: Mutex<VecDeque<InboundEnvelope>>,
    pub sent: Mutex<Vec<(String, String, Option<String>)>>,
    /// When true, `send` fails — for exercising failure classification.
    pub fail_sends: std::sync::atomic::AtomicBool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_inbound(&self, envelope: InboundEnvelope) {
        if let Ok(mut q) = self.inbound.lock() {
            q.push_back(envelope);
        }
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn poll(
        &self,
        _since: Option<DateTime<Utc>>,
        limit: u32,
    ) -> anyhow::Result<Vec<InboundEnvelope>> {
        let mut q = self
            .inbound
            .lock()
            .map_err(|_| anyhow::anyhow!("mock transport poisoned"))?;
        let take = (limit as usize).min(q.len());
        Ok(q.drain(..take).collect())
    }

    async fn send(
        &self,
        to: &str,
        content: &str,
        thread_id: Option<&str>,
    ) -> anyhow::Result<SentReceipt> {
        if self.fail_sends.load(std::sync::atomic::Ordering::Relaxed) {
            anyhow::bail!("transport send failed (mock)");
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((to.into(), content.into(), thread_id.map(Into::into)));
        }
        Ok(SentReceipt {
            message_id: uuid::Uuid::new_v4().to_string(),
            thread_id: thread_id.map(Into::into),
        })
    }
}

/// Production-default compute provider: children get directories under the
/// agent's data dir.  Funding needs a facilitator, which this provider does
/// not have.
pub struct LocalCompute {
    base: PathBuf,
}

impl LocalCompute {
    pub fn new(base: PathBuf) -> Self {
        Self { base }
    }
}

#[async_trait]
impl ComputeProvider for LocalCompute {
    async fn allocate_sandbox(&self, name: &str) -> anyhow::Result<Sandbox> {
        let id = format!("{}-{}", name, &uuid::Uuid::new_v4().to_string()[..8]);
        let root = self.base.join(&id);
        std::fs::create_dir_all(&root)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&root, std::fs::Permissions::from_mode(0o700))?;
        }
        Ok(Sandbox { id, root })
    }

    async fn request_funding(&self, _address: &str, _amount_usdc: &str) -> anyhow::Result<()> {
        anyhow::bail!("no payment facilitator configured")
    }
}

/// Compute provider that provisions sandboxes under a base directory.
pub struct MockCompute {
    base: PathBuf,
    pub funded: Mutex<Vec<(String, String)>>,
}

impl MockCompute {
    pub fn new(base: PathBuf) -> Self {
        Self {
            base,
            funded: Mutex::new(vec![]),
        }
    }
}

#[async_trait]
impl ComputeProvider for MockCompute {
    async fn allocate_sandbox(&self, name: &str) -> anyhow::Result<Sandbox> {
        let id = format!("{}-{}", name, &uuid::Uuid::new_v4().to_string()[..8]);
        let root = self.base.join(&id);
        std::fs::create_dir_all(&root)?;
        Ok(Sandbox { id, root })
    }

    async fn request_funding(&self, address: &str, amount_usdc: &str) -> anyhow::Result<()> {
        self.funded
            .lock()
            .map_err(|_| anyhow::anyhow!("mock compute poisoned"))?
            .push((address.into(), amount_usdc.into()));
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
