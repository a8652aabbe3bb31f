// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The daemon scheduler: runs ticks serially, sleeps the brain-requested
//! interval between them, and stops on cancellation, a dead survival tier,
//! an exhausted brain, or too many consecutive fatal ticks.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use aethernet_config::Config;
use aethernet_store::{kv_keys, IncidentCode, Severity, StateStore};

use crate::orchestrator::TurnOrchestrator;
use crate::TickError;

/// Why the loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonOutcome {
    /// Host asked us to stop between ticks.
    Cancelled,
    /// Consecutive-error budget or brain failure streak exhausted.
    Stopped,
    /// Survival tier went dead.
    Dead,
}

pub struct Daemon {
    store: Arc<StateStore>,
    config: Arc<Config>,
    orchestrator: Arc<TurnOrchestrator>,
}

impl Daemon {
    pub fn new(
        store: Arc<StateStore>,
        config: Arc<Config>,
        orchestrator: Arc<TurnOrchestrator>,
    ) -> Self {
        Self {
            store,
            config,
            orchestrator,
        }
    }

    fn interval_ms(&self) -> u64 {
        let configured = self.config.autonomy.default_interval_ms;
        if configured > 0 {
            configured
        } else {
            self.config.heartbeat_interval_ms
        }
    }

    /// Sleep requested by the last tick, clamped; falls back to the
    /// configured interval when unset or unparsable.
    fn next_sleep(&self) -> Duration {
        let ms = self
            .store
            .kv_get(kv_keys::NEXT_SLEEP_MS)
            .ok()
            .flatten()
            .and_then(|raw| raw.parse::<u64>().ok())
            .map(|ms| ms.min(self.config.autonomy.max_sleep_ms))
            .unwrap_or_else(|| self.interval_ms());
        Duration::from_millis(ms)
    }

    fn record_failure(&self, error: &TickError, consecutive: u32, severity: Severity) {
        let max = self.config.autonomy.max_consecutive_errors;
        let result = self.store.insert_incident(
            IncidentCode::DaemonFailure,
            severity,
            "daemon",
            &format!("daemon tick failed ({consecutive}/{max}): {error}"),
            json!({"consecutiveErrors": consecutive}),
        );
        if let Err(e) = result {
            error!(error = %e, "failed to record daemon incident");
        }
    }

    fn set_state(&self, state: &str) {
        if let Err(e) = self.store.kv_set(kv_keys::AGENT_STATE, state) {
            error!(error = %e, state, "failed to persist agent state");
        }
    }

    /// Run until cancellation or a stop condition.  One tick at a time; the
    /// cancellation token is only honoured between ticks.
    pub async fn run(&self, cancel: CancellationToken) -> DaemonOutcome {
        let mut consecutive_errors = 0u32;
        info!(interval_ms = self.interval_ms(), "daemon started");
        loop {
            if cancel.is_cancelled() {
                self.set_state("stopped");
                return DaemonOutcome::Cancelled;
            }

            debug!("heartbeat: tick starting");
            match self.orchestrator.run_tick(None, false).await {
                Ok(report) => {
                    consecutive_errors = 0;
                    debug!(
                        turn = %report.turn_id,
                        actions = report.actions_total,
                        "heartbeat: tick complete"
                    );
                }
                Err(TickError::SurvivalDead(usd)) => {
                    error!(estimated_usd = usd, "survival tier is dead, stopping daemon");
                    self.record_failure(
                        &TickError::SurvivalDead(usd),
                        consecutive_errors + 1,
                        Severity::Critical,
                    );
                    self.set_state("dead");
                    return DaemonOutcome::Dead;
                }
                Err(TickError::BrainFailureStreak { streak, limit }) => {
                    error!(streak, limit, "brain failure streak exhausted, stopping daemon");
                    self.record_failure(
                        &TickError::BrainFailureStreak { streak, limit },
                        consecutive_errors + 1,
                        Severity::Warning,
                    );
                    self.set_state("stopped");
                    return DaemonOutcome::Stopped;
                }
                Err(e) => {
                    consecutive_errors += 1;
                    warn!(
                        error = %e,
                        consecutive_errors,
                        "tick failed"
                    );
                    self.record_failure(&e, consecutive_errors, Severity::Warning);
                    if consecutive_errors >= self.config.autonomy.max_consecutive_errors {
                        error!(consecutive_errors, "consecutive-error budget exhausted");
                        self.set_state("stopped");
                        return DaemonOutcome::Stopped;
                    }
                }
            }

            let sleep = self.next_sleep();
            debug!(sleep_ms = sleep.as_millis() as u64, "sleeping until next tick");
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.set_state("stopped");
                    return DaemonOutcome::Cancelled;
                }
                _ = tokio::time::sleep(sleep) => {}
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
