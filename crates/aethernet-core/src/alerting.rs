// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Alert evaluation and routing.  Runs after action execution each tick;
//! candidates that clear their threshold are de-duplicated against a 60 s
//! KV marker, persisted, mirrored as `ALERT_TRIGGERED` incidents and routed.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use aethernet_brain::SurvivalTier;
use aethernet_config::{AlertRoute, AlertingConfig};
use aethernet_store::{kv_keys, Alert, IncidentCode, Severity, StateStore};

const DEDUP_WINDOW_SECS: i64 = 60;

/// Everything the evaluator needs from the tick that just ran.
#[derive(Debug, Clone, Copy)]
pub struct AlertContext {
    pub survival_tier: SurvivalTier,
    pub queue_depth: u32,
    pub brain_failure_streak: u32,
}

struct Candidate {
    code: &'static str,
    severity: Severity,
    message: String,
    metadata: serde_json::Value,
}

pub struct AlertEvaluator {
    store: Arc<StateStore>,
    config: AlertingConfig,
    http: reqwest::Client,
}

impl AlertEvaluator {
    pub fn new(store: Arc<StateStore>, config: AlertingConfig) -> Self {
        Self {
            store,
            config,
            http: reqwest::Client::new(),
        }
    }

    fn candidates(&self, ctx: &AlertContext) -> Result<Vec<Candidate>, aethernet_store::StoreError> {
        let mut out = Vec::new();

        if ctx.survival_tier == SurvivalTier::Dead {
            out.push(Candidate {
                code: "survival_dead",
                severity: Severity::Critical,
                message: "Survival tier is dead: agent can no longer fund operation".into(),
                metadata: json!({"tier": "dead"}),
            });
        }

        let window = Utc::now() - Duration::minutes(self.config.evaluation_window_minutes as i64);
        let criticals = self.store.count_incidents_since_excluding(
            Severity::Critical,
            window,
            IncidentCode::AlertTriggered,
        )?;
        if criticals >= self.config.critical_incident_threshold {
            out.push(Candidate {
                code: "critical_incidents",
                severity: Severity::Critical,
                message: format!(
                    "{criticals} critical incidents in the last {} minutes",
                    self.config.evaluation_window_minutes
                ),
                metadata: json!({"count": criticals}),
            });
        }

        if ctx.brain_failure_streak >= self.config.brain_failure_threshold {
            out.push(Candidate {
                code: "brain_failures",
                severity: Severity::Critical,
                message: format!(
                    "brain has failed {} consecutive turns",
                    ctx.brain_failure_streak
                ),
                metadata: json!({"streak": ctx.brain_failure_streak}),
            });
        }

        if ctx.queue_depth >= self.config.queue_depth_threshold {
            out.push(Candidate {
                code: "queue_depth",
                severity: Severity::Warning,
                message: format!("inbox queue depth at {}", ctx.queue_depth),
                metadata: json!({"depth": ctx.queue_depth}),
            });
        }

        Ok(out)
    }

    /// Suppress a `(severity, message)` pair fired within the last minute.
    /// Returns true when the candidate should fire, and stamps the marker.
    fn passes_dedup(&self, candidate: &Candidate) -> Result<bool, aethernet_store::StoreError> {
        let digest = hex::encode(&Sha256::digest(candidate.message.as_bytes())[..8]);
        let key = format!(
            "{}{}:{}",
            kv_keys::ALERT_DEDUP_PREFIX,
            candidate.severity.as_str(),
            digest
        );
        let now = Utc::now();
        if let Some(last) = self.store.kv_get(&key)? {
            if let Ok(last_at) = last.parse::<chrono::DateTime<Utc>>() {
                if now - last_at < Duration::seconds(DEDUP_WINDOW_SECS) {
                    debug!(code = candidate.code, "alert suppressed by de-dup window");
                    return Ok(false);
                }
            }
        }
        self.store.kv_set(&key, &now.to_rfc3339())?;
        Ok(true)
    }

    async fn route(&self, alert: &Alert) {
        match self.config.route {
            AlertRoute::Db => {}
            AlertRoute::Stdout => {
                if alert.severity >= Severity::Critical {
                    eprintln!("[ALERT:{}] {}", alert.severity, alert.message);
                } else {
                    println!("[ALERT:{}] {}", alert.severity, alert.message);
                }
            }
            AlertRoute::Webhook => {
                let Some(url) = self.config.webhook_url.as_deref() else {
                    return;
                };
                let envelope = json!({
                    "code": alert.code,
                    "severity": alert.severity.as_str(),
                    "message": alert.message,
                    "metadata": alert.metadata,
                    "timestamp": alert.timestamp.to_rfc3339(),
                });
                // One shot, no retry: a flaky webhook must not stall ticks.
                let result = self.http.post(url).json(&envelope).send().await;
                let failed = match result {
                    Ok(resp) if resp.status().is_success() => None,
                    Ok(resp) => Some(format!("webhook returned status {}", resp.status())),
                    Err(e) => Some(format!("webhook request failed: {e}")),
                };
                if let Some(message) = failed {
                    warn!(error = %message, "alert webhook delivery failed");
                    let _ = self.store.insert_incident(
                        IncidentCode::ProviderFailure,
                        Severity::Warning,
                        "alerting",
                        &message,
                        json!({"alert": alert.code}),
                    );
                }
            }
        }
    }

    /// Evaluate all candidates for this tick.  Returns the alerts that
    /// actually fired (post de-dup).
    pub async fn evaluate(&self, ctx: &AlertContext) -> Vec<Alert> {
        if !self.config.enabled {
            return vec![];
        }
        let candidates = match self.candidates(ctx) {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "alert candidate evaluation failed");
                return vec![];
            }
        };
        let mut fired = Vec::new();
        for candidate in candidates {
            match self.passes_dedup(&candidate) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    warn!(error = %e, "alert de-dup check failed");
                    continue;
                }
            }
            let route = self.config.route.to_string();
            let alert = match self.store.insert_alert(
                candidate.code,
                candidate.severity,
                &route,
                &candidate.message,
                candidate.metadata.clone(),
            ) {
                Ok(a) => a,
                Err(e) => {
                    warn!(error = %e, "alert persistence failed");
                    continue;
                }
            };
            let _ = self.store.insert_incident(
                IncidentCode::AlertTriggered,
                candidate.severity,
                "alert",
                &candidate.message,
                candidate.metadata,
            );
            self.route(&alert).await;
            fired.push(alert);
        }
        fired
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn evaluator(config: AlertingConfig) -> (AlertEvaluator, Arc<StateStore>) {
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        (AlertEvaluator::new(store.clone(), config), store)
    }

    fn quiet() -> AlertContext {
        AlertContext {
            survival_tier: SurvivalTier::Normal,
            queue_depth: 0,
            brain_failure_streak: 0,
        }
    }

    #[tokio::test]
    async fn quiet_tick_fires_nothing() {
        let (eval, store) = evaluator(AlertingConfig::default());
        let fired = eval.evaluate(&quiet()).await;
        assert!(fired.is_empty());
        assert!(store.recent_alerts(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn dead_tier_fires_critical() {
        let (eval, store) = evaluator(AlertingConfig::default());
        let fired = eval
            .evaluate(&AlertContext {
                survival_tier: SurvivalTier::Dead,
                ..quiet()
            })
            .await;
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].severity, Severity::Critical);
        // Mirrored as ALERT_TRIGGERED.
        let incidents = store.recent_incidents(10).unwrap();
        assert_eq!(incidents[0].code, IncidentCode::AlertTriggered);
    }

    #[tokio::test]
    async fn critical_incident_threshold_fires_once_with_dedup() {
        let (eval, store) = evaluator(AlertingConfig::default());
        for _ in 0..10 {
            store
                .insert_incident(
                    IncidentCode::DaemonFailure,
                    Severity::Critical,
                    "daemon",
                    "boom",
                    json!({}),
                )
                .unwrap();
        }
        let first = eval.evaluate(&quiet()).await;
        assert_eq!(first.len(), 1, "one alert per window, not per incident");
        // Second evaluation inside the 60 s window is suppressed, even
        // though the incident count still clears the threshold.
        let second = eval.evaluate(&quiet()).await;
        assert!(second.is_empty());
        assert_eq!(store.recent_alerts(10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stale_dedup_marker_does_not_suppress() {
        let (eval, store) = evaluator(AlertingConfig::default());
        let ctx = AlertContext {
            queue_depth: 50,
            ..quiet()
        };
        assert_eq!(eval.evaluate(&ctx).await.len(), 1);
        // Age the marker past the window by hand.
        let digest = hex::encode(
            &Sha256::digest(format!("inbox queue depth at {}", 50).as_bytes())[..8],
        );
        let key = format!("{}warning:{}", kv_keys::ALERT_DEDUP_PREFIX, digest);
        let old = (Utc::now() - Duration::seconds(DEDUP_WINDOW_SECS + 5)).to_rfc3339();
        store.kv_set(&key, &old).unwrap();
        assert_eq!(eval.evaluate(&ctx).await.len(), 1);
    }

    #[tokio::test]
    async fn queue_depth_is_warning_severity() {
        let (eval, _store) = evaluator(AlertingConfig::default());
        let fired = eval
            .evaluate(&AlertContext {
                queue_depth: 100,
                ..quiet()
            })
            .await;
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].severity, Severity::Warning);
    }

    #[tokio::test]
    async fn brain_streak_below_threshold_is_silent() {
        let (eval, _store) = evaluator(AlertingConfig::default());
        let fired = eval
            .evaluate(&AlertContext {
                brain_failure_streak: 2,
                ..quiet()
            })
            .await;
        assert!(fired.is_empty());
    }

    #[tokio::test]
    async fn brain_streak_at_threshold_fires() {
        let (eval, _store) = evaluator(AlertingConfig::default());
        let fired = eval
            .evaluate(&AlertContext {
                brain_failure_streak: 3,
                ..quiet()
            })
            .await;
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].code, "brain_failures");
    }

    #[tokio::test]
    async fn disabled_alerting_is_inert() {
        let (eval, store) = evaluator(AlertingConfig {
            enabled: false,
            ..AlertingConfig::default()
        });
        let fired = eval
            .evaluate(&AlertContext {
                survival_tier: SurvivalTier::Dead,
                ..quiet()
            })
            .await;
        assert!(fired.is_empty());
        assert!(store.recent_alerts(10).unwrap().is_empty());
    }
}
