// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! One tick of the think→decide→act loop: ingest, brain, validate, execute,
//! persist, alert.  Recoverable problems become incidents inside the tick;
//! only the cases in [`TickError`] escape to the daemon.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, info, warn};

use aethernet_brain::{
    Action, AgentIdentity, Brain, EpisodeView, FactView, InboxMessageView, MemorySnapshot,
    RecentTurnView, SkillView, SurvivalTier, ToolSourceView, TurnInput,
};
use aethernet_config::Config;
use aethernet_store::{kv_keys, IncidentCode, Severity, StateStore, TurnTelemetry};

use crate::alerting::{AlertContext, AlertEvaluator};
use crate::executor::ActionExecutor;
use crate::skills::load_skills;
use crate::survival::{estimated_usd, evaluate_tier};
use crate::transport::Transport;
use crate::validator::{validate_turn, ValidationLimits, ValidationPolicy};
use crate::TickError;

const INBOX_SYNC_LIMIT: u32 = 50;
const INBOX_CLAIM_LIMIT: u32 = 25;
const RECENT_TURNS: u32 = 20;
const MEMORY_LIMIT: u32 = 150;

const AGENT_NAME: &str = "aethernet";

/// What one tick did, for the daemon and the CLI.
#[derive(Debug, Clone)]
pub struct TickReport {
    pub turn_id: String,
    pub tier: SurvivalTier,
    pub estimated_usd: i64,
    pub actions_total: u32,
    pub action_failures: u32,
    pub malformed: bool,
    pub next_sleep_ms: u64,
    pub dry_run: bool,
}

pub struct TurnOrchestrator {
    store: Arc<StateStore>,
    config: Arc<Config>,
    brain: Arc<dyn Brain>,
    transport: Arc<dyn Transport>,
    executor: Arc<ActionExecutor>,
    alerting: Arc<AlertEvaluator>,
}

impl TurnOrchestrator {
    pub fn new(
        store: Arc<StateStore>,
        config: Arc<Config>,
        brain: Arc<dyn Brain>,
        transport: Arc<dyn Transport>,
        executor: Arc<ActionExecutor>,
        alerting: Arc<AlertEvaluator>,
    ) -> Self {
        Self {
            store,
            config,
            brain,
            transport,
            executor,
            alerting,
        }
    }

    /// Pull new messages from the transport into the store.  Transport
    /// trouble degrades to a `PROVIDER_FAILURE` incident; the tick goes on
    /// with whatever is already queued.
    async fn sync_inbox(&self) -> Result<(), TickError> {
        let since = self
            .store
            .kv_get(kv_keys::LAST_POLL_AT)?
            .and_then(|raw| raw.parse::<DateTime<Utc>>().ok());
        match self.transport.poll(since, INBOX_SYNC_LIMIT).await {
            Ok(envelopes) => {
                for envelope in envelopes {
                    self.store.upsert_message(
                        &envelope.id,
                        &envelope.from,
                        &envelope.to,
                        envelope.thread_id.as_deref(),
                        &envelope.content,
                        envelope.received_at,
                    )?;
                }
                self.store
                    .kv_set(kv_keys::LAST_POLL_AT, &Utc::now().to_rfc3339())?;
            }
            Err(e) => {
                warn!(error = %e, "inbox sync failed");
                self.store.insert_incident(
                    IncidentCode::ProviderFailure,
                    Severity::Warning,
                    "transport",
                    &format!("inbox sync failed: {e}"),
                    json!({}),
                )?;
            }
        }
        Ok(())
    }

    fn assemble_input(
        &self,
        tier: SurvivalTier,
        estimated: i64,
        operator_prompt: Option<&str>,
        inbox: Vec<InboxMessageView>,
    ) -> Result<TurnInput, TickError> {
        let address = self
            .store
            .kv_get(kv_keys::AGENT_ADDRESS)?
            .unwrap_or_else(|| "unknown".into());
        let state = if tier == SurvivalTier::Normal {
            "running".to_string()
        } else {
            tier.as_str().to_string()
        };

        let recent_turns = self
            .store
            .recent_turns(RECENT_TURNS)?
            .into_iter()
            .map(|t| RecentTurnView {
                id: t.id,
                timestamp: t.timestamp,
                state: t.state,
                summary: t
                    .metadata
                    .get("summary")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string(),
            })
            .collect();

        let memory = MemorySnapshot {
            facts: self
                .store
                .facts(MEMORY_LIMIT)?
                .into_iter()
                .map(|f| FactView {
                    key: f.key,
                    value: f.value,
                    confidence: f.confidence,
                })
                .collect(),
            episodes: self
                .store
                .episodes(MEMORY_LIMIT)?
                .into_iter()
                .map(|e| EpisodeView {
                    summary: e.summary,
                    outcome: e.outcome,
                    created_at: e.created_at,
                })
                .collect(),
        };

        let skills = load_skills(
            &self.config.skills_dir(),
            &self.store,
            &self.config.enabled_skill_ids,
        )
        .into_iter()
        .map(|s| SkillView {
            id: s.id,
            name: s.manifest.name,
            enabled: s.enabled,
        })
        .collect();

        let tool_sources = self
            .config
            .tool_sources
            .iter()
            .filter(|s| s.enabled)
            .map(|s| ToolSourceView {
                id: s.id.clone(),
                name: s.name.clone(),
                source_type: s.source_type.to_string(),
            })
            .collect();

        let policy = self.validation_policy();
        let mut available_actions: Vec<String> =
            policy.allowlist.iter().map(|a| a.as_str().to_string()).collect();
        available_actions.sort();

        Ok(TurnInput {
            agent: AgentIdentity {
                address,
                name: AGENT_NAME.into(),
                state,
            },
            survival_tier: tier,
            estimated_usd: estimated,
            operator_prompt: operator_prompt.map(ToString::to_string),
            inbox_messages: inbox,
            recent_turns,
            memory,
            skills,
            tool_sources,
            available_actions,
        })
    }

    fn validation_policy(&self) -> ValidationPolicy {
        ValidationPolicy::from_autonomy(
            self.config.autonomy.strict_action_allowlist,
            self.config.autonomy.allow_self_modify_action,
        )
    }

    fn bump_brain_streak(&self, malformed: bool) -> Result<u32, TickError> {
        let streak = if malformed {
            self.store
                .kv_get(kv_keys::BRAIN_FAILURE_STREAK)?
                .and_then(|raw| raw.parse::<u32>().ok())
                .unwrap_or(0)
                + 1
        } else {
            0
        };
        self.store
            .kv_set(kv_keys::BRAIN_FAILURE_STREAK, &streak.to_string())?;
        Ok(streak)
    }

    /// Run one tick.  `operator_prompt` rides along in the turn input;
    /// `dry_run` stops after the survival snapshot.
    pub async fn run_tick(
        &self,
        operator_prompt: Option<&str>,
        dry_run: bool,
    ) -> Result<TickReport, TickError> {
        // Gate: emergency stop refuses the whole tick.
        if self.store.emergency_state()?.enabled {
            return Err(TickError::EmergencyStop);
        }

        // Survival tier; dead is fatal before anything else happens.
        let estimated = estimated_usd();
        let tier = evaluate_tier(estimated, &self.config.survival);
        self.store.append_survival_snapshot(tier.as_str(), estimated)?;
        if tier == SurvivalTier::Dead {
            return Err(TickError::SurvivalDead(estimated));
        }

        if dry_run {
            let turn = self.store.insert_turn(
                "dry_run",
                None,
                None,
                json!({"summary": "dry run", "dryRun": true, "actionCount": 0}),
            )?;
            info!(turn = %turn.id, "dry-run tick recorded");
            return Ok(TickReport {
                turn_id: turn.id,
                tier,
                estimated_usd: estimated,
                actions_total: 0,
                action_failures: 0,
                malformed: false,
                next_sleep_ms: self.config.autonomy.default_interval_ms,
                dry_run: true,
            });
        }

        // Inbox: sync from transport, then claim a bounded batch for this
        // turn.  Claimed messages go to the brain; acting on them is its
        // decision, not ours.
        self.sync_inbox().await?;
        let queue_depth = self.store.count_messages()?;
        let claimed = self.store.poll_messages(INBOX_CLAIM_LIMIT)?;
        let mut inbox = Vec::with_capacity(claimed.len());
        for message in &claimed {
            self.store.mark_message_processed(&message.id)?;
            inbox.push(InboxMessageView {
                id: message.id.clone(),
                from: message.from.clone(),
                thread_id: message.thread_id.clone(),
                content: message.content.clone(),
                received_at: message.received_at,
            });
        }

        let input = self.assemble_input(tier, estimated, operator_prompt, inbox)?;

        // Brain.
        let started = Instant::now();
        let raw_output = self.brain.generate_turn(&input).await;
        let brain_duration_ms = started.elapsed().as_millis() as u64;
        debug!(duration_ms = brain_duration_ms, "brain responded");

        // Validate.
        let limits = ValidationLimits {
            max_actions: self.config.autonomy.max_actions_per_turn,
            max_sleep_ms: self.config.autonomy.max_sleep_ms,
        };
        let validated = validate_turn(&raw_output, limits, &self.validation_policy());
        if validated.malformed {
            self.store.insert_incident(
                IncidentCode::BrainOutputMalformed,
                Severity::Error,
                "brain",
                &format!("brain output malformed: {}", validated.errors.join(", ")),
                json!({"errors": validated.errors}),
            )?;
        }

        // Failure streak; at the limit the tick dies so the daemon can act.
        let streak = self.bump_brain_streak(validated.malformed)?;
        let streak_limit = self.config.autonomy.max_brain_failures_before_stop;
        if validated.malformed && streak >= streak_limit {
            self.store.insert_incident(
                IncidentCode::BrainRequestFailed,
                Severity::Critical,
                "brain",
                &format!("brain failure streak {streak}/{streak_limit} reached, stopping"),
                json!({"streak": streak}),
            )?;
            return Err(TickError::BrainFailureStreak {
                streak,
                limit: streak_limit,
            });
        }

        // Execute.  A malformed turn degrades to a single noop.
        let executable: Vec<Action> = if validated.malformed {
            vec![Action::noop("brain_malformed")]
        } else {
            validated.output.next_actions.clone()
        };
        let mut action_labels = Vec::with_capacity(executable.len());
        let mut actions_total = 0u32;
        let mut action_failures = 0u32;
        let mut spend_proxy_usd = 0.0f64;
        for action in &executable {
            let outcome = self.executor.execute(action).await;
            action_labels.push(outcome.label.clone());
            if outcome.kind != aethernet_brain::ActionType::Noop {
                actions_total += 1;
            }
            spend_proxy_usd += outcome.spend_usd;
            for warning in &outcome.warnings {
                self.store.insert_incident(
                    IncidentCode::ProviderFailure,
                    Severity::Warning,
                    "action",
                    warning,
                    json!({"action": outcome.label}),
                )?;
            }
            if let Some(failure) = &outcome.failure {
                warn!(action = %outcome.label, code = %failure.code, "action failed");
                action_failures += 1;
                self.store.insert_incident(
                    failure.code,
                    Severity::Warning,
                    "action",
                    &failure.message,
                    json!({"action": outcome.label}),
                )?;
            }
        }

        // Memory writes planned by the brain.
        if !validated.malformed {
            for fact in &validated.output.memory_writes.facts {
                self.store.upsert_fact(
                    &fact.key,
                    &fact.value,
                    fact.confidence,
                    fact.source.as_deref().unwrap_or("brain"),
                )?;
            }
            for episode in &validated.output.memory_writes.episodes {
                self.store.append_episode(
                    &episode.summary,
                    episode.outcome.as_deref(),
                    episode.action_type.as_deref(),
                    json!({"source": "brain"}),
                )?;
            }
        }

        // The turn's own episode, always.
        self.store.append_episode(
            &validated.output.summary,
            Some(if validated.malformed { "malformed" } else { "ok" }),
            Some(if actions_total > 0 {
                "autonomy_turn"
            } else {
                "autonomy_idle"
            }),
            json!({"actions": action_labels}),
        )?;

        // Sleep plan for the scheduler.
        let next_sleep_ms = validated
            .output
            .sleep_ms
            .unwrap_or(self.config.autonomy.default_interval_ms);
        self.store
            .kv_set(kv_keys::NEXT_SLEEP_MS, &next_sleep_ms.to_string())?;

        // Turn + telemetry rows.
        let turn = self.store.insert_turn(
            "completed",
            Some(serde_json::to_value(&input).unwrap_or(serde_json::Value::Null)),
            Some(serde_json::to_value(&validated.output).unwrap_or(serde_json::Value::Null)),
            json!({
                "summary": validated.output.summary,
                "actions": action_labels,
                "actionCount": actions_total,
                "queueDepth": queue_depth,
                "brainDurationMs": brain_duration_ms,
                "malformed": validated.malformed,
                "errors": validated.errors,
            }),
        )?;
        self.store.insert_turn_telemetry(&TurnTelemetry {
            turn_id: turn.id.clone(),
            survival_tier: tier.as_str().into(),
            estimated_usd: estimated,
            queue_depth,
            spend_proxy_usd,
            actions_total,
            action_failures,
            brain_duration_ms,
            brain_failures: if validated.malformed { 1 } else { 0 },
        })?;

        // Alerts, then to sleep.
        self.alerting
            .evaluate(&AlertContext {
                survival_tier: tier,
                queue_depth,
                brain_failure_streak: streak,
            })
            .await;
        self.store.kv_set(kv_keys::AGENT_STATE, "sleeping")?;

        info!(
            turn = %turn.id,
            actions = actions_total,
            failures = action_failures,
            malformed = validated.malformed,
            sleep_ms = next_sleep_ms,
            "tick complete"
        );
        Ok(TickReport {
            turn_id: turn.id,
            tier,
            estimated_usd: estimated,
            actions_total,
            action_failures,
            malformed: validated.malformed,
            next_sleep_ms,
            dry_run: false,
        })
    }
}
