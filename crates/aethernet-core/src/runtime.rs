// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The single-owner runtime: construct with config and collaborators, call
//! [`AgentRuntime::initialize`] once, drive it with
//! [`AgentRuntime::run_daemon`] (or single ticks), then
//! [`AgentRuntime::close`].  The CLI and the HTTP surface share one
//! instance; there are no process-wide globals beyond it.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::Utc;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::info;

use aethernet_brain::Brain;
use aethernet_config::Config;
use aethernet_store::{kv_keys, StateStore};
use aethernet_tools::{InternalAdapter, ReadonlyApiAdapter, RuntimeView, ToolRegistry};
use aethernet_wallet::WalletSession;

use crate::alerting::AlertEvaluator;
use crate::commands::{parse_inbound_command, InboundCommand};
use crate::constitution::{verify_governance, GovernanceReport};
use crate::daemon::{Daemon, DaemonOutcome};
use crate::executor::ActionExecutor;
use crate::orchestrator::{TickReport, TurnOrchestrator};
use crate::replicate::{replicate, ReplicationPlan};
use crate::selfmod::SelfModEngine;
use crate::transport::{ComputeProvider, Transport};
use crate::TickError;

fn ensure_private_dir(path: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(path)
        .with_context(|| format!("creating {}", path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
            .with_context(|| format!("restricting {}", path.display()))?;
    }
    Ok(())
}

/// Read-only window over the store for the internal tool adapter.
struct StoreView {
    store: Arc<StateStore>,
}

impl RuntimeView for StoreView {
    fn agent_status(&self) -> anyhow::Result<serde_json::Value> {
        Ok(json!({
            "state": self.store.kv_get(kv_keys::AGENT_STATE)?,
            "startedAt": self.store.kv_get(kv_keys::STARTED_AT)?,
            "address": self.store.kv_get(kv_keys::AGENT_ADDRESS)?,
            "emergency": self.store.emergency_state()?.enabled,
        }))
    }

    fn memory_facts(&self, limit: u32) -> anyhow::Result<serde_json::Value> {
        Ok(serde_json::to_value(self.store.facts(limit)?)?)
    }

    fn memory_episodes(&self, limit: u32) -> anyhow::Result<serde_json::Value> {
        Ok(serde_json::to_value(self.store.episodes(limit)?)?)
    }

    fn message_threads(&self, limit: u32) -> anyhow::Result<serde_json::Value> {
        Ok(serde_json::to_value(self.store.recent_threads(limit)?)?)
    }

    fn survival_snapshot(&self) -> anyhow::Result<serde_json::Value> {
        Ok(serde_json::to_value(self.store.latest_survival_snapshot()?)?)
    }

    fn queue_depth(&self) -> anyhow::Result<u32> {
        Ok(self.store.count_messages()?)
    }
}

pub struct AgentRuntime {
    config: Arc<Config>,
    store: Arc<StateStore>,
    wallet: Arc<Mutex<WalletSession>>,
    selfmod: Arc<SelfModEngine>,
    orchestrator: Arc<TurnOrchestrator>,
    daemon: Daemon,
    transport: Arc<dyn Transport>,
    compute: Arc<dyn ComputeProvider>,
    governance: Option<GovernanceReport>,
}

impl AgentRuntime {
    /// Wire the runtime from config and collaborators.  No side effects
    /// beyond opening the state database; call `initialize` before use.
    pub fn new(
        config: Config,
        brain: Arc<dyn Brain>,
        transport: Arc<dyn Transport>,
        compute: Arc<dyn ComputeProvider>,
    ) -> anyhow::Result<Self> {
        let config = Arc::new(config);
        let store = Arc::new(StateStore::open(&config.db())?);
        let wallet = Arc::new(Mutex::new(WalletSession::new(
            store.clone(),
            config.keystore(),
        )));
        let selfmod = Arc::new(SelfModEngine::new(store.clone(), config.clone()));

        let mut tools = ToolRegistry::new(config.tooling.allow_external_sources);
        for source in &config.tool_sources {
            tools.register_source(source.clone());
        }
        tools.register_adapter(InternalAdapter::new(Arc::new(StoreView {
            store: store.clone(),
        })));
        tools.register_adapter(ReadonlyApiAdapter::new());
        let tools = Arc::new(tools);

        let executor = Arc::new(ActionExecutor::new(
            store.clone(),
            config.clone(),
            tools,
            wallet.clone(),
            transport.clone(),
            compute.clone(),
            selfmod.clone(),
        ));
        let alerting = Arc::new(AlertEvaluator::new(store.clone(), config.alerting.clone()));
        let orchestrator = Arc::new(TurnOrchestrator::new(
            store.clone(),
            config.clone(),
            brain,
            transport.clone(),
            executor,
            alerting,
        ));
        let daemon = Daemon::new(store.clone(), config.clone(), orchestrator.clone());

        Ok(Self {
            config,
            store,
            wallet,
            selfmod,
            orchestrator,
            daemon,
            transport,
            compute,
            governance: None,
        })
    }

    /// One-time startup: private directories, governance verification,
    /// first-run KV stamps.
    pub fn initialize(&mut self) -> anyhow::Result<()> {
        ensure_private_dir(&self.config.home())?;
        ensure_private_dir(&self.config.data())?;
        ensure_private_dir(&self.config.data().join("rollbacks"))?;

        let report = verify_governance(&self.config.home(), &self.config.constitution_policy)?;
        self.governance = Some(report);

        if self.store.kv_get(kv_keys::STARTED_AT)?.is_none() {
            self.store
                .kv_set(kv_keys::STARTED_AT, &Utc::now().to_rfc3339())?;
        }
        if self.store.kv_get(kv_keys::ENABLED_SKILL_IDS)?.is_none() {
            crate::skills::store_enabled_ids(&self.store, &self.config.enabled_skill_ids)?;
        }
        self.store.kv_set(kv_keys::AGENT_STATE, "initialized")?;
        info!(home = %self.config.home().display(), "runtime initialized");
        Ok(())
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn governance(&self) -> Option<&GovernanceReport> {
        self.governance.as_ref()
    }

    /// Run one tick by hand (CLI `tick`).
    pub async fn tick(
        &self,
        operator_prompt: Option<&str>,
        dry_run: bool,
    ) -> Result<TickReport, TickError> {
        self.orchestrator.run_tick(operator_prompt, dry_run).await
    }

    /// Run the scheduler until cancellation or a stop condition.
    pub async fn run_daemon(&self, cancel: CancellationToken) -> DaemonOutcome {
        self.daemon.run(cancel).await
    }

    // ── Wallet passthrough ────────────────────────────────────────────────────

    pub fn unlock_wallet(&self, passphrase: &str, ttl_sec: u64) -> anyhow::Result<String> {
        let mut wallet = self
            .wallet
            .lock()
            .map_err(|_| anyhow::anyhow!("wallet mutex poisoned"))?;
        let session = wallet.unlock(passphrase, ttl_sec)?;
        self.store
            .kv_set(kv_keys::AGENT_ADDRESS, &session.address)?;
        Ok(session.address)
    }

    pub fn lock_wallet(&self) -> anyhow::Result<()> {
        let mut wallet = self
            .wallet
            .lock()
            .map_err(|_| anyhow::anyhow!("wallet mutex poisoned"))?;
        wallet.lock()?;
        Ok(())
    }

    pub fn rotate_wallet(&self, old: &str, new: &str) -> anyhow::Result<()> {
        let mut wallet = self
            .wallet
            .lock()
            .map_err(|_| anyhow::anyhow!("wallet mutex poisoned"))?;
        wallet.rotate(old, new)?;
        Ok(())
    }

    // ── Operator surface ──────────────────────────────────────────────────────

    pub fn set_emergency_stop(&self, enabled: bool, reason: Option<&str>) -> anyhow::Result<()> {
        self.store.set_emergency_stop(enabled, reason)?;
        info!(enabled, "emergency stop updated");
        Ok(())
    }

    pub fn rollback(&self, path: &Path) -> anyhow::Result<()> {
        self.selfmod.rollback(path)?;
        Ok(())
    }

    /// Status snapshot for the CLI and HTTP surface.  Read outside ticks;
    /// during a tick the state field lags by design.
    pub fn status(&self) -> anyhow::Result<serde_json::Value> {
        let survival = self.store.latest_survival_snapshot()?;
        Ok(json!({
            "state": self.store.kv_get(kv_keys::AGENT_STATE)?,
            "startedAt": self.store.kv_get(kv_keys::STARTED_AT)?,
            "address": self.store.kv_get(kv_keys::AGENT_ADDRESS)?,
            "emergency": self.store.emergency_state()?,
            "survival": survival,
            "queueDepth": self.store.count_messages()?,
            "childId": self.store.kv_get(kv_keys::SELF_CHILD_ID)?,
            "governance": self.governance.as_ref().map(|g| json!({
                "constitution": g.constitution_hash,
                "laws": g.laws_hash,
            })),
        }))
    }

    /// Execute an operator-injected command (`aethernet command '<json>'`).
    /// Uses the same engines and gates as brain-planned actions.
    pub async fn handle_operator_command(&self, content: &str) -> anyhow::Result<String> {
        match parse_inbound_command(content) {
            Some(InboundCommand::SelfMod {
                target_path,
                content,
            }) => {
                let mutation = self
                    .selfmod
                    .apply(&target_path, &content, Some("operator command"))?;
                Ok(format!("self_mod applied: mutation {}", mutation.id))
            }
            Some(InboundCommand::Replicate { plan }) => {
                let action: aethernet_brain::Action = serde_json::from_value(json!({
                    "type": "replicate",
                    "params": plan,
                }))
                .unwrap_or_else(|_| aethernet_brain::Action::noop("bad_plan"));
                let parent = self
                    .store
                    .kv_get(kv_keys::AGENT_ADDRESS)?
                    .unwrap_or_else(|| "unknown".into());
                let plan = ReplicationPlan::from_action(&action, &parent);
                let record = replicate(
                    &plan,
                    &self.store,
                    self.compute.as_ref(),
                    self.transport.as_ref(),
                )
                .await?;
                Ok(format!(
                    "replicated child {} at {}",
                    record.child_id, record.child_address
                ))
            }
            Some(InboundCommand::Noop) => Ok("noop".into()),
            None => anyhow::bail!("unrecognized command payload"),
        }
    }

    /// Orderly shutdown: audit trail only; the store closes with the
    /// process.
    pub fn close(&self) -> anyhow::Result<()> {
        self.store.append_audit("runtime:close", "shutdown requested")?;
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
