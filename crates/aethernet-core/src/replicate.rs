// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Child replication: provision a sandbox, mint a child identity, seed its
//! home, optionally fund it and record the lineage edge.

use std::path::PathBuf;
use std::sync::Arc;

use rand::RngCore;
use serde_json::json;
use tracing::info;

use aethernet_brain::Action;
use aethernet_store::{kv_keys, StateStore};
use aethernet_wallet::{EncryptedKeystore, Signer};

use crate::transport::{ComputeProvider, Transport};

const DEFAULT_CHILD_NAME: &str = "aethernet-child";
const DEFAULT_GENESIS_PROMPT: &str =
    "You are a newly replicated aethernet agent. Establish contact with your parent, \
     conserve funds, and build a survival plan before taking any other action.";

/// Normalized replication parameters with defaults applied.
#[derive(Debug, Clone)]
pub struct ReplicationPlan {
    pub name: String,
    pub genesis_prompt: String,
    pub parent: String,
    pub creator: String,
    pub initial_funding_usdc: String,
}

impl ReplicationPlan {
    pub fn from_action(action: &Action, parent_address: &str) -> Self {
        Self {
            name: action
                .str_param("name")
                .unwrap_or(DEFAULT_CHILD_NAME)
                .to_string(),
            genesis_prompt: action
                .str_param("genesisPrompt")
                .unwrap_or(DEFAULT_GENESIS_PROMPT)
                .to_string(),
            parent: parent_address.to_string(),
            creator: parent_address.to_string(),
            initial_funding_usdc: action
                .str_param("initialFundingUsdc")
                .unwrap_or("0")
                .to_string(),
        }
    }

    fn funding_amount(&self) -> f64 {
        self.initial_funding_usdc.parse::<f64>().unwrap_or(0.0)
    }
}

#[derive(Debug, Clone)]
pub struct ReplicationRecord {
    pub child_id: String,
    pub child_address: String,
    pub sandbox_root: PathBuf,
    /// USD actually requested from the facilitator (spend proxy input).
    pub funded_usd: f64,
    /// Non-fatal problems (lineage message, funding) for the orchestrator to
    /// record as warning incidents.
    pub warnings: Vec<String>,
}

fn child_passphrase() -> String {
    let mut bytes = [0u8; 18];
    rand::thread_rng().fill_bytes(&mut bytes);
    // Mixed-case hex plus separators keeps the generated value above the
    // rotate-time strength floor.
    format!("Child-{}-7x", hex::encode(bytes))
}

/// Execute a replication plan.  Hard failures (sandbox, keystore) abort;
/// funding and lineage-message problems degrade to warnings.
pub async fn replicate(
    plan: &ReplicationPlan,
    store: &Arc<StateStore>,
    compute: &dyn ComputeProvider,
    transport: &dyn Transport,
) -> anyhow::Result<ReplicationRecord> {
    let sandbox = compute.allocate_sandbox(&plan.name).await?;
    let child_signer = Signer::generate();
    let mut warnings = Vec::new();

    let genesis = format!(
        "# Genesis\n\n{}\n\n- name: {}\n- parent: {}\n- creator: {}\n",
        plan.genesis_prompt, plan.name, plan.parent, plan.creator
    );
    std::fs::write(sandbox.root.join("genesis.md"), genesis)?;

    let passphrase = child_passphrase();
    EncryptedKeystore::encrypt(child_signer.secret(), &passphrase)?
        .save(&sandbox.root.join("wallet.enc.json"))?;
    let pass_path = sandbox.root.join("wallet.pass");
    std::fs::write(&pass_path, &passphrase)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&pass_path, std::fs::Permissions::from_mode(0o600))?;
    }

    let mut funded_usd = 0.0;
    if plan.funding_amount() > 0.0 {
        match compute
            .request_funding(child_signer.address(), &plan.initial_funding_usdc)
            .await
        {
            Ok(()) => {
                funded_usd = plan.funding_amount();
                store.append_payment_event(
                    "child_funding",
                    &plan.initial_funding_usdc,
                    Some(child_signer.address()),
                    json!({"child": sandbox.id}),
                )?;
            }
            Err(e) => warnings.push(format!("child funding failed: {e}")),
        }
    }

    store.kv_set(kv_keys::SELF_CHILD_ID, &sandbox.id)?;
    store.append_episode(
        &format!("replicated child {} at {}", plan.name, child_signer.address()),
        Some("ok"),
        Some("replicate"),
        json!({
            "child": sandbox.id,
            "childAddress": child_signer.address(),
            "parent": plan.parent,
        }),
    )?;

    let lineage = json!({
        "type": "lineage_init",
        "parent": plan.parent,
        "child": sandbox.id,
        "name": plan.name,
    })
    .to_string();
    if let Err(e) = transport.send(child_signer.address(), &lineage, None).await {
        warnings.push(format!("lineage-init message failed: {e}"));
    }

    info!(child = %sandbox.id, address = %child_signer.address(), "replication complete");
    Ok(ReplicationRecord {
        child_id: sandbox.id,
        child_address: child_signer.address().to_string(),
        sandbox_root: sandbox.root,
        funded_usd,
        warnings,
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockCompute, MockTransport};
    use serde_json::json as j;

    fn action(params: serde_json::Value) -> Action {
        serde_json::from_value(j!({"type": "replicate", "params": params})).unwrap()
    }

    #[test]
    fn plan_defaults_are_applied() {
        let plan = ReplicationPlan::from_action(&action(j!({})), "0xparent");
        assert_eq!(plan.name, "aethernet-child");
        assert_eq!(plan.initial_funding_usdc, "0");
        assert_eq!(plan.parent, "0xparent");
        assert_eq!(plan.creator, "0xparent");
        assert!(!plan.genesis_prompt.is_empty());
    }

    #[test]
    fn plan_params_override_defaults() {
        let plan = ReplicationPlan::from_action(
            &action(j!({"name":"scout","genesisPrompt":"explore","initialFundingUsdc":"10"})),
            "0xparent",
        );
        assert_eq!(plan.name, "scout");
        assert_eq!(plan.genesis_prompt, "explore");
        assert_eq!(plan.funding_amount(), 10.0);
    }

    #[tokio::test]
    async fn replicate_seeds_sandbox_and_records_lineage() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        let compute = MockCompute::new(dir.path().to_path_buf());
        let transport = MockTransport::new();
        let plan = ReplicationPlan::from_action(&action(j!({})), "0xparent");

        let record = replicate(&plan, &store, &compute, &transport).await.unwrap();
        assert!(record.warnings.is_empty());
        assert!(record.sandbox_root.join("genesis.md").is_file());
        assert!(record.sandbox_root.join("wallet.enc.json").is_file());
        assert!(record.sandbox_root.join("wallet.pass").is_file());

        // The child keystore opens with the sandboxed passphrase.
        let pass = std::fs::read_to_string(record.sandbox_root.join("wallet.pass")).unwrap();
        let ks = EncryptedKeystore::load(&record.sandbox_root.join("wallet.enc.json")).unwrap();
        assert_eq!(ks.decrypt(&pass).unwrap().address(), record.child_address);

        assert_eq!(
            store.kv_get(kv_keys::SELF_CHILD_ID).unwrap().unwrap(),
            record.child_id
        );
        let eps = store.episodes(5).unwrap();
        assert_eq!(eps[0].action_type.as_deref(), Some("replicate"));
        assert_eq!(transport.sent_count(), 1, "lineage-init message sent");
    }

    #[tokio::test]
    async fn funding_is_requested_and_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        let compute = MockCompute::new(dir.path().to_path_buf());
        let transport = MockTransport::new();
        let plan =
            ReplicationPlan::from_action(&action(j!({"initialFundingUsdc":"25"})), "0xparent");

        let record = replicate(&plan, &store, &compute, &transport).await.unwrap();
        let funded = compute.funded.lock().unwrap();
        assert_eq!(funded.len(), 1);
        assert_eq!(funded[0].0, record.child_address);
        assert_eq!(funded[0].1, "25");
    }

    #[tokio::test]
    async fn lineage_message_failure_is_a_warning_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        let compute = MockCompute::new(dir.path().to_path_buf());
        let transport = MockTransport::new();
        transport
            .fail_sends
            .store(true, std::sync::atomic::Ordering::Relaxed);
        let plan = ReplicationPlan::from_action(&action(j!({})), "0xparent");

        let record = replicate(&plan, &store, &compute, &transport).await.unwrap();
        assert_eq!(record.warnings.len(), 1);
        assert!(record.warnings[0].contains("lineage-init"));
    }

    #[test]
    fn generated_child_passphrase_clears_strength_floor() {
        let p = child_passphrase();
        assert!(aethernet_wallet::check_passphrase_strength(&p).is_ok());
    }
}
