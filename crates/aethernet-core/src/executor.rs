// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Action execution.  Each action passes the gate chain (allowlist,
//! emergency/survival, wallet session, chain capability, self-mod policy)
//! before its handler runs; the result is a data-carrying
//! [`ActionOutcome`] — incidents are written by the orchestrator loop, not
//! here.

use std::path::Path;
use std::sync::{Arc, Mutex};

use serde_json::json;
use tracing::debug;

use aethernet_brain::{Action, ActionType, SurvivalTier};
use aethernet_config::Config;
use aethernet_store::{kv_keys, IncidentCode, StateStore};
use aethernet_tools::{ToolInvocation, ToolRegistry};
use aethernet_wallet::WalletSession;

use crate::chain::resolve_chain;
use crate::replicate::{replicate, ReplicationPlan};
use crate::selfmod::SelfModEngine;
use crate::transport::{ComputeProvider, Transport};

#[derive(Debug, Clone)]
pub struct ActionFailure {
    pub code: IncidentCode,
    pub message: String,
}

impl ActionFailure {
    fn new(code: IncidentCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// What one action did.  `label` is the `<type>:<target>` form used in the
/// turn's action log.
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub kind: ActionType,
    pub label: String,
    pub ok: bool,
    pub failure: Option<ActionFailure>,
    /// Non-fatal problems the orchestrator records as warning incidents.
    pub warnings: Vec<String>,
    pub detail: serde_json::Value,
    /// Contribution to this turn's spend proxy.
    pub spend_usd: f64,
}

impl ActionOutcome {
    fn success(kind: ActionType, target: &str, detail: serde_json::Value) -> Self {
        Self {
            kind,
            label: format!("{kind}:{target}"),
            ok: true,
            failure: None,
            warnings: vec![],
            detail,
            spend_usd: 0.0,
        }
    }

    fn refused(kind: ActionType, target: &str, failure: ActionFailure) -> Self {
        Self {
            kind,
            label: format!("{kind}:{target}"),
            ok: false,
            failure: Some(failure),
            warnings: vec![],
            detail: serde_json::Value::Null,
            spend_usd: 0.0,
        }
    }
}

pub struct ActionExecutor {
    store: Arc<StateStore>,
    config: Arc<Config>,
    tools: Arc<ToolRegistry>,
    wallet: Arc<Mutex<WalletSession>>,
    transport: Arc<dyn Transport>,
    compute: Arc<dyn ComputeProvider>,
    selfmod: Arc<SelfModEngine>,
}

impl ActionExecutor {
    pub fn new(
        store: Arc<StateStore>,
        config: Arc<Config>,
        tools: Arc<ToolRegistry>,
        wallet: Arc<Mutex<WalletSession>>,
        transport: Arc<dyn Transport>,
        compute: Arc<dyn ComputeProvider>,
        selfmod: Arc<SelfModEngine>,
    ) -> Self {
        Self {
            store,
            config,
            tools,
            wallet,
            transport,
            compute,
            selfmod,
        }
    }

    fn target_of(action: &Action) -> String {
        match action.kind {
            ActionType::SendMessage => action.str_param("to").unwrap_or("none").to_string(),
            ActionType::Replicate => action
                .str_param("name")
                .unwrap_or("aethernet-child")
                .to_string(),
            ActionType::SelfModify => action.str_param("targetPath").unwrap_or("none").to_string(),
            ActionType::RecordFact => action.str_param("key").unwrap_or("none").to_string(),
            ActionType::InvokeTool => action.str_param("toolName").unwrap_or("none").to_string(),
            ActionType::Sleep => action
                .num_param("sleepMs")
                .or_else(|| action.num_param("durationMs"))
                .map(|n| format!("{}", n as u64))
                .unwrap_or_else(|| "none".into()),
            ActionType::RecordEpisode | ActionType::Noop => "none".to_string(),
        }
    }

    /// Snapshot the signer for this action, or fail with `WALLET_LOCKED`.
    fn signer_snapshot(&self) -> Result<aethernet_wallet::Signer, ActionFailure> {
        let mut wallet = self
            .wallet
            .lock()
            .map_err(|_| ActionFailure::new(IncidentCode::ActionFailed, "wallet mutex poisoned"))?;
        wallet
            .account()
            .map_err(|_| ActionFailure::new(IncidentCode::WalletLocked, "Wallet is locked"))
    }

    /// The gate chain, in order.  First refusal wins.
    ///
    /// The allowlist gate is carried by the type system here: `Action.kind`
    /// is the closed enum and the validator has already dropped anything the
    /// policy disallows.  `self_modify` keeps its dedicated gate below.
    fn check_gates(&self, action: &Action) -> Result<(), ActionFailure> {
        // Emergency / survival gate for mutating actions.
        if action.kind.is_mutating() {
            let emergency = self
                .store
                .emergency_state()
                .map_err(|e| ActionFailure::new(IncidentCode::ActionFailed, e.to_string()))?;
            if emergency.enabled {
                return Err(ActionFailure::new(
                    IncidentCode::ActionBlocked,
                    "mutating actions are disabled by autonomy policy: emergency stop is enabled",
                ));
            }
            let snapshot = self
                .store
                .latest_survival_snapshot()
                .map_err(|e| ActionFailure::new(IncidentCode::ActionFailed, e.to_string()))?;
            if let Some(snapshot) = snapshot {
                if SurvivalTier::parse(&snapshot.tier) == Some(SurvivalTier::Dead) {
                    return Err(ActionFailure::new(
                        IncidentCode::ActionBlocked,
                        "mutating actions are disabled by autonomy policy: survival tier is dead",
                    ));
                }
            }
        }

        // Wallet-session gate.
        if matches!(action.kind, ActionType::SendMessage | ActionType::Replicate) {
            let unlocked = self
                .wallet
                .lock()
                .map(|mut w| w.is_unlocked())
                .unwrap_or(false);
            if !unlocked {
                return Err(ActionFailure::new(
                    IncidentCode::WalletLocked,
                    "Wallet is locked",
                ));
            }
        }

        // Chain-capability gate (self_modify is chain-less).
        if action.kind != ActionType::SelfModify {
            if let Err(e) = resolve_chain(action, &self.config) {
                return Err(ActionFailure::new(
                    IncidentCode::ChainCapabilityBlocked,
                    e.to_string(),
                ));
            }
        }

        // Self-modify policy gate.
        if action.kind == ActionType::SelfModify && !self.config.autonomy.allow_self_modify_action
        {
            return Err(ActionFailure::new(
                IncidentCode::SecurityPolicyViolation,
                "Self-modification denied: disabled by autonomy policy",
            ));
        }

        Ok(())
    }

    pub async fn execute(&self, action: &Action) -> ActionOutcome {
        let target = Self::target_of(action);
        debug!(action = %action.kind, target = %target, "executing action");
        if let Err(failure) = self.check_gates(action) {
            return ActionOutcome::refused(action.kind, &target, failure);
        }
        match action.kind {
            ActionType::SendMessage => self.run_send_message(action, &target).await,
            ActionType::Replicate => self.run_replicate(action, &target).await,
            ActionType::SelfModify => self.run_self_modify(action, &target),
            ActionType::RecordFact => self.run_record_fact(action, &target),
            ActionType::RecordEpisode => self.run_record_episode(action, &target),
            ActionType::InvokeTool => self.run_invoke_tool(action, &target).await,
            ActionType::Sleep => self.run_sleep(action),
            ActionType::Noop => {
                ActionOutcome::success(ActionType::Noop, "none", serde_json::Value::Null)
            }
        }
    }

    async fn run_send_message(&self, action: &Action, target: &str) -> ActionOutcome {
        let (Some(to), Some(content)) = (action.str_param("to"), action.str_param("content"))
        else {
            return ActionOutcome::refused(
                action.kind,
                target,
                ActionFailure::new(
                    IncidentCode::ActionFailed,
                    "send_message requires non-empty params.to and params.content",
                ),
            );
        };
        let thread_id = action.str_param("threadId");
        let signer = match self.signer_snapshot() {
            Ok(s) => s,
            Err(failure) => return ActionOutcome::refused(action.kind, target, failure),
        };
        match self.transport.send(to, content, thread_id).await {
            Ok(receipt) => {
                let persisted = self.store.insert_outbound_message(
                    signer.address(),
                    to,
                    receipt.thread_id.as_deref().or(thread_id),
                    content,
                );
                match persisted {
                    Ok(msg) => ActionOutcome::success(
                        action.kind,
                        target,
                        json!({"messageId": msg.id, "threadId": msg.thread_id}),
                    ),
                    Err(e) => ActionOutcome::refused(
                        action.kind,
                        target,
                        ActionFailure::new(IncidentCode::ActionFailed, e.to_string()),
                    ),
                }
            }
            Err(e) => ActionOutcome::refused(
                action.kind,
                target,
                ActionFailure::new(
                    IncidentCode::ActionFailed,
                    format!("message send failed: {e}"),
                ),
            ),
        }
    }

    async fn run_replicate(&self, action: &Action, target: &str) -> ActionOutcome {
        let signer = match self.signer_snapshot() {
            Ok(s) => s,
            Err(failure) => return ActionOutcome::refused(action.kind, target, failure),
        };
        let plan = ReplicationPlan::from_action(action, signer.address());
        match replicate(&plan, &self.store, self.compute.as_ref(), self.transport.as_ref()).await
        {
            Ok(record) => {
                let mut outcome = ActionOutcome::success(
                    action.kind,
                    target,
                    json!({
                        "childId": record.child_id,
                        "childAddress": record.child_address,
                    }),
                );
                outcome.spend_usd = record.funded_usd;
                outcome.warnings = record.warnings;
                outcome
            }
            Err(e) => ActionOutcome::refused(
                action.kind,
                target,
                ActionFailure::new(IncidentCode::ActionFailed, format!("replication failed: {e}")),
            ),
        }
    }

    fn run_self_modify(&self, action: &Action, target: &str) -> ActionOutcome {
        let (Some(path), Some(content)) =
            (action.str_param("targetPath"), action.params.get("content").and_then(|v| v.as_str()))
        else {
            return ActionOutcome::refused(
                action.kind,
                target,
                ActionFailure::new(
                    IncidentCode::ActionFailed,
                    "self_modify requires params.targetPath and params.content",
                ),
            );
        };
        let reason = action.str_param("reason");
        match self.selfmod.apply(Path::new(path), content, reason) {
            Ok(mutation) => ActionOutcome::success(
                action.kind,
                target,
                json!({"mutationId": mutation.id, "afterHash": mutation.after_hash}),
            ),
            Err(e) => {
                // Classification pinned to the refusing gate, not the text.
                let code = if e.is_policy_refusal() {
                    IncidentCode::SecurityPolicyViolation
                } else {
                    IncidentCode::ActionFailed
                };
                ActionOutcome::refused(
                    action.kind,
                    target,
                    ActionFailure::new(code, e.to_string()),
                )
            }
        }
    }

    fn run_record_fact(&self, action: &Action, target: &str) -> ActionOutcome {
        let (Some(key), Some(value)) = (
            action.str_param("key"),
            action.params.get("value").and_then(|v| v.as_str()),
        ) else {
            return ActionOutcome::refused(
                action.kind,
                target,
                ActionFailure::new(
                    IncidentCode::ActionFailed,
                    "record_fact requires params.key and params.value",
                ),
            );
        };
        let confidence = action.num_param("confidence");
        let source = action.str_param("source").unwrap_or("brain");
        match self.store.upsert_fact(key, value, confidence, source) {
            Ok(fact) => ActionOutcome::success(action.kind, target, json!({"key": fact.key})),
            Err(e) => ActionOutcome::refused(
                action.kind,
                target,
                ActionFailure::new(IncidentCode::ActionFailed, e.to_string()),
            ),
        }
    }

    fn run_record_episode(&self, action: &Action, target: &str) -> ActionOutcome {
        let Some(summary) = action.str_param("summary") else {
            return ActionOutcome::refused(
                action.kind,
                target,
                ActionFailure::new(
                    IncidentCode::ActionFailed,
                    "record_episode requires params.summary",
                ),
            );
        };
        let outcome = action.str_param("outcome");
        let action_type = action.str_param("actionType");
        match self.store.append_episode(
            summary,
            outcome,
            action_type,
            json!({"source": "brain"}),
        ) {
            Ok(ep) => ActionOutcome::success(action.kind, target, json!({"episodeId": ep.id})),
            Err(e) => ActionOutcome::refused(
                action.kind,
                target,
                ActionFailure::new(IncidentCode::ActionFailed, e.to_string()),
            ),
        }
    }

    async fn run_invoke_tool(&self, action: &Action, target: &str) -> ActionOutcome {
        let Some(tool_name) = action.str_param("toolName") else {
            return ActionOutcome::refused(
                action.kind,
                target,
                ActionFailure::new(
                    IncidentCode::ActionFailed,
                    "invoke_tool requires params.toolName",
                ),
            );
        };
        let source_id = action.str_param("sourceId").unwrap_or("internal.runtime");
        let invocation = ToolInvocation {
            source_id: source_id.to_string(),
            tool_name: tool_name.to_string(),
            input: action
                .params
                .get("input")
                .cloned()
                .unwrap_or(serde_json::Value::Object(Default::default())),
            context: serde_json::Map::new(),
        };
        let response = self.tools.invoke(&invocation).await;
        if response.ok {
            ActionOutcome::success(
                action.kind,
                target,
                json!({"output": response.output, "metadata": response.metadata}),
            )
        } else {
            ActionOutcome::refused(
                action.kind,
                target,
                ActionFailure::new(
                    IncidentCode::ActionFailed,
                    response
                        .error
                        .unwrap_or_else(|| "tool invocation failed".into()),
                ),
            )
        }
    }

    fn run_sleep(&self, action: &Action) -> ActionOutcome {
        let requested = action
            .num_param("sleepMs")
            .or_else(|| action.num_param("durationMs"))
            .unwrap_or(0.0)
            .max(0.0) as u64;
        let clamped = requested.min(self.config.autonomy.max_sleep_ms);
        match self.store.kv_set(kv_keys::NEXT_SLEEP_MS, &clamped.to_string()) {
            Ok(()) => ActionOutcome::success(
                ActionType::Sleep,
                &clamped.to_string(),
                json!({"sleepMs": clamped}),
            ),
            Err(e) => ActionOutcome::refused(
                ActionType::Sleep,
                &clamped.to_string(),
                ActionFailure::new(IncidentCode::ActionFailed, e.to_string()),
            ),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockCompute, MockTransport};
    use aethernet_wallet::{EncryptedKeystore, Signer};

    const PASS: &str = "Correct-Horse-7";

    struct Fixture {
        executor: ActionExecutor,
        store: Arc<StateStore>,
        transport: Arc<MockTransport>,
        wallet: Arc<Mutex<WalletSession>>,
        _home: tempfile::TempDir,
    }

    fn fixture_with(configure: impl FnOnce(&mut Config)) -> Fixture {
        let home = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.home_dir = Some(home.path().to_path_buf());
        config.autonomy.allow_self_modify_action = true;
        configure(&mut config);
        let config = Arc::new(config.clone());

        let store = Arc::new(StateStore::open_in_memory().unwrap());
        let keystore_path = home.path().join("wallet.enc.json");
        let signer = Signer::generate();
        EncryptedKeystore::encrypt(signer.secret(), PASS)
            .unwrap()
            .save(&keystore_path)
            .unwrap();
        let wallet = Arc::new(Mutex::new(WalletSession::new(
            store.clone(),
            keystore_path,
        )));

        let mut tools = ToolRegistry::new(config.tooling.allow_external_sources);
        tools.register_source(aethernet_config::ToolSource::internal_runtime());
        tools.register_adapter(EchoAdapter);
        let transport = Arc::new(MockTransport::new());
        let compute = Arc::new(MockCompute::new(home.path().join("sandboxes")));
        let selfmod = Arc::new(SelfModEngine::new(store.clone(), config.clone()));

        Fixture {
            executor: ActionExecutor::new(
                store.clone(),
                config,
                Arc::new(tools),
                wallet.clone(),
                transport.clone(),
                compute,
                selfmod,
            ),
            store,
            transport,
            wallet,
            _home: home,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(|_| {})
    }

    struct EchoAdapter;

    #[async_trait::async_trait]
    impl aethernet_tools::ToolAdapter for EchoAdapter {
        fn name(&self) -> &str {
            "internal"
        }
        async fn invoke(
            &self,
            _source: &aethernet_config::ToolSource,
            inv: &ToolInvocation,
        ) -> aethernet_tools::ToolResponse {
            if inv.tool_name == "broken" {
                aethernet_tools::ToolResponse::failure("tool exploded")
            } else {
                aethernet_tools::ToolResponse::success(json!({"tool": inv.tool_name}))
            }
        }
    }

    fn action(kind: &str, params: serde_json::Value) -> Action {
        serde_json::from_value(json!({"type": kind, "params": params})).unwrap()
    }

    fn unlock(f: &Fixture) {
        f.wallet.lock().unwrap().unlock(PASS, 300).unwrap();
    }

    // ── Wallet gate ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn send_message_locked_wallet_is_wallet_locked() {
        let f = fixture();
        let out = f
            .executor
            .execute(&action("send_message", json!({"to":"0xabc","content":"hi"})))
            .await;
        assert!(!out.ok);
        let failure = out.failure.unwrap();
        assert_eq!(failure.code, IncidentCode::WalletLocked);
        assert!(failure.message.contains("Wallet is locked"));
        assert_eq!(f.transport.sent_count(), 0);
    }

    #[tokio::test]
    async fn send_message_unlocked_succeeds_and_persists() {
        let f = fixture();
        unlock(&f);
        let out = f
            .executor
            .execute(&action(
                "send_message",
                json!({"to":"0xabc","content":"hi","threadId":"t9"}),
            ))
            .await;
        assert!(out.ok, "failure: {:?}", out.failure);
        assert_eq!(out.label, "send_message:0xabc");
        assert_eq!(f.transport.sent_count(), 1);
        assert_eq!(f.store.thread_messages("t9", 10).unwrap().len(), 1);
    }

    // ── Emergency / survival gates ────────────────────────────────────────────

    #[tokio::test]
    async fn emergency_stop_refuses_mutating_actions() {
        let f = fixture();
        unlock(&f);
        f.store.set_emergency_stop(true, None).unwrap();
        for (kind, params) in [
            ("send_message", json!({"to":"0xabc","content":"hi"})),
            ("replicate", json!({})),
            ("self_modify", json!({"targetPath":"x","content":"y"})),
        ] {
            let out = f.executor.execute(&action(kind, params)).await;
            assert!(!out.ok, "{kind} must refuse under emergency stop");
            assert_eq!(out.failure.unwrap().code, IncidentCode::ActionBlocked);
        }
        // Non-mutating actions still run.
        let out = f
            .executor
            .execute(&action("record_fact", json!({"key":"k","value":"v"})))
            .await;
        assert!(out.ok);
    }

    #[tokio::test]
    async fn dead_tier_refuses_mutating_actions() {
        let f = fixture();
        unlock(&f);
        f.store.append_survival_snapshot("dead", 0).unwrap();
        let out = f
            .executor
            .execute(&action("send_message", json!({"to":"0xabc","content":"hi"})))
            .await;
        assert_eq!(out.failure.unwrap().code, IncidentCode::ActionBlocked);
    }

    // ── Chain gate ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn unknown_chain_is_capability_blocked() {
        let f = fixture();
        unlock(&f);
        let out = f
            .executor
            .execute(&action(
                "send_message",
                json!({"to":"0xabc","content":"hi","chain":"eip155:999"}),
            ))
            .await;
        let failure = out.failure.unwrap();
        assert_eq!(failure.code, IncidentCode::ChainCapabilityBlocked);
        assert!(failure.message.contains("unsupported chain"));
    }

    // ── Self-modify policy gate ───────────────────────────────────────────────

    #[tokio::test]
    async fn self_modify_disabled_is_security_policy_violation() {
        let f = fixture_with(|c| c.autonomy.allow_self_modify_action = false);
        let out = f
            .executor
            .execute(&action("self_modify", json!({"targetPath":"x","content":"y"})))
            .await;
        assert_eq!(
            out.failure.unwrap().code,
            IncidentCode::SecurityPolicyViolation
        );
    }

    #[tokio::test]
    async fn self_modify_protected_path_is_security_policy_violation() {
        let f = fixture();
        let target = f._home.path().join("constitution.md");
        let out = f
            .executor
            .execute(&action(
                "self_modify",
                json!({"targetPath": target.to_string_lossy(), "content": "evil"}),
            ))
            .await;
        assert_eq!(
            out.failure.unwrap().code,
            IncidentCode::SecurityPolicyViolation
        );
    }

    #[tokio::test]
    async fn self_modify_in_scope_succeeds() {
        let f = fixture();
        let target = f._home.path().join("notes.md");
        let out = f
            .executor
            .execute(&action(
                "self_modify",
                json!({"targetPath": target.to_string_lossy(), "content": "v1"}),
            ))
            .await;
        assert!(out.ok, "failure: {:?}", out.failure);
        assert_eq!(std::fs::read_to_string(target).unwrap(), "v1");
    }

    // ── Memory actions ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn record_fact_requires_key_and_value() {
        let f = fixture();
        let out = f
            .executor
            .execute(&action("record_fact", json!({"key":"k"})))
            .await;
        assert_eq!(out.failure.unwrap().code, IncidentCode::ActionFailed);
        let out = f
            .executor
            .execute(&action("record_fact", json!({"key":"k","value":"v"})))
            .await;
        assert!(out.ok);
        assert_eq!(out.label, "record_fact:k");
        assert!(f.store.fact_by_key("k").unwrap().is_some());
    }

    #[tokio::test]
    async fn record_episode_appends() {
        let f = fixture();
        let out = f
            .executor
            .execute(&action("record_episode", json!({"summary":"met a peer"})))
            .await;
        assert!(out.ok);
        assert_eq!(f.store.episodes(5).unwrap()[0].summary, "met a peer");
    }

    // ── Tools ─────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn invoke_tool_routes_through_registry() {
        let f = fixture();
        let out = f
            .executor
            .execute(&action("invoke_tool", json!({"toolName":"agent_status"})))
            .await;
        assert!(out.ok);
        assert_eq!(out.label, "invoke_tool:agent_status");
    }

    #[tokio::test]
    async fn failing_tool_is_action_failed() {
        let f = fixture();
        let out = f
            .executor
            .execute(&action("invoke_tool", json!({"toolName":"broken"})))
            .await;
        let failure = out.failure.unwrap();
        assert_eq!(failure.code, IncidentCode::ActionFailed);
        assert!(failure.message.contains("tool exploded"));
    }

    // ── Sleep & noop ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn sleep_clamps_and_writes_kv() {
        let f = fixture_with(|c| c.autonomy.max_sleep_ms = 60_000);
        let out = f
            .executor
            .execute(&action("sleep", json!({"sleepMs": 999_999_999})))
            .await;
        assert!(out.ok);
        assert_eq!(
            f.store.kv_get(kv_keys::NEXT_SLEEP_MS).unwrap().as_deref(),
            Some("60000")
        );
    }

    #[tokio::test]
    async fn sleep_accepts_duration_ms_alias() {
        let f = fixture();
        let out = f
            .executor
            .execute(&action("sleep", json!({"durationMs": 1500})))
            .await;
        assert!(out.ok);
        assert_eq!(
            f.store.kv_get(kv_keys::NEXT_SLEEP_MS).unwrap().as_deref(),
            Some("1500")
        );
    }

    #[tokio::test]
    async fn noop_succeeds_with_none_target() {
        let f = fixture();
        let out = f.executor.execute(&action("noop", json!({}))).await;
        assert!(out.ok);
        assert_eq!(out.label, "noop:none");
    }

    // ── Replicate ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn replicate_locked_wallet_is_wallet_locked() {
        let f = fixture();
        let out = f.executor.execute(&action("replicate", json!({}))).await;
        assert_eq!(out.failure.unwrap().code, IncidentCode::WalletLocked);
    }

    #[tokio::test]
    async fn replicate_provisions_child() {
        let f = fixture();
        unlock(&f);
        let out = f.executor.execute(&action("replicate", json!({}))).await;
        assert!(out.ok, "failure: {:?}", out.failure);
        assert!(out.detail["childId"].as_str().is_some());
        assert_eq!(
            f.store.kv_get(kv_keys::SELF_CHILD_ID).unwrap().unwrap(),
            out.detail["childId"].as_str().unwrap()
        );
    }
}
