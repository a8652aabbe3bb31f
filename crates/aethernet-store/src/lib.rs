// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Durable state store backed by SQLite.
//!
//! This is the single mutation point of the runtime: turns, telemetry,
//! messages, memory, incidents, alerts, self-mod records, survival
//! snapshots, unlock sessions and the KV bag all live here.  Writes are
//! per-statement atomic; the handful of read-modify-write spots (the
//! self-mod rate-limit list) go through [`StateStore::kv_update`] which runs
//! inside one transaction.

mod redact;
mod types;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;
use uuid::Uuid;

pub use redact::{redact_text, redact_value};
pub use types::*;

/// Schema version written to `PRAGMA user_version`.  A database stamped with
/// a newer version than this refuses to open.
const SCHEMA_VERSION: i64 = 1;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("database schema version {found} is newer than supported {supported}")]
    SchemaTooNew { found: i64, supported: i64 },
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store mutex poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug)]
pub struct StateStore {
    conn: Mutex<Connection>,
}

fn now() -> DateTime<Utc> {
    Utc::now()
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Convert a stored RFC 3339 string back into a timestamp inside a rusqlite
/// row closure.
fn ts(s: String) -> rusqlite::Result<DateTime<Utc>> {
    s.parse().map_err(|e: chrono::ParseError| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn json(s: String) -> rusqlite::Result<serde_json::Value> {
    serde_json::from_str(&s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn opt_ts(s: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    s.map(ts).transpose()
}

impl StateStore {
    /// Open (creating and migrating as needed) the store at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// In-memory store for tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn()?;
        let version: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
        if version > SCHEMA_VERSION {
            return Err(StoreError::SchemaTooNew {
                found: version,
                supported: SCHEMA_VERSION,
            });
        }
        if version < 1 {
            debug!(from = version, to = SCHEMA_VERSION, "migrating schema");
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS turns (
                    id        TEXT PRIMARY KEY,
                    timestamp TEXT NOT NULL,
                    state     TEXT NOT NULL,
                    input     TEXT,
                    output    TEXT,
                    metadata  TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS turn_telemetry (
                    turn_id          TEXT PRIMARY KEY REFERENCES turns(id),
                    survival_tier    TEXT NOT NULL,
                    estimated_usd    INTEGER NOT NULL,
                    queue_depth      INTEGER NOT NULL,
                    spend_proxy_usd  REAL NOT NULL,
                    actions_total    INTEGER NOT NULL,
                    action_failures  INTEGER NOT NULL,
                    brain_duration_ms INTEGER NOT NULL,
                    brain_failures   INTEGER NOT NULL
                );
                CREATE TABLE IF NOT EXISTS messages (
                    id           TEXT PRIMARY KEY,
                    sender       TEXT NOT NULL,
                    recipient    TEXT NOT NULL,
                    thread_id    TEXT,
                    content      TEXT NOT NULL,
                    received_at  TEXT NOT NULL,
                    processed_at TEXT
                );
                CREATE INDEX IF NOT EXISTS idx_messages_unprocessed
                    ON messages(received_at) WHERE processed_at IS NULL;
                CREATE TABLE IF NOT EXISTS memory_facts (
                    id         TEXT NOT NULL,
                    key        TEXT PRIMARY KEY,
                    value      TEXT NOT NULL,
                    confidence REAL NOT NULL,
                    source     TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS memory_episodes (
                    id          TEXT PRIMARY KEY,
                    summary     TEXT NOT NULL,
                    outcome     TEXT,
                    action_type TEXT,
                    metadata    TEXT NOT NULL,
                    created_at  TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS incidents (
                    id        TEXT PRIMARY KEY,
                    code      TEXT NOT NULL,
                    severity  TEXT NOT NULL,
                    category  TEXT NOT NULL,
                    message   TEXT NOT NULL,
                    metadata  TEXT NOT NULL,
                    timestamp TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS alerts (
                    id        TEXT PRIMARY KEY,
                    code      TEXT NOT NULL,
                    severity  TEXT NOT NULL,
                    route     TEXT NOT NULL,
                    message   TEXT NOT NULL,
                    metadata  TEXT NOT NULL,
                    timestamp TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS self_mod_mutations (
                    id          TEXT PRIMARY KEY,
                    path        TEXT NOT NULL,
                    before_hash TEXT,
                    after_hash  TEXT NOT NULL,
                    reason      TEXT,
                    created_at  TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS rollback_points (
                    id            TEXT PRIMARY KEY,
                    mutation_id   TEXT NOT NULL REFERENCES self_mod_mutations(id),
                    path          TEXT NOT NULL,
                    rollback_hash TEXT NOT NULL,
                    created_at    TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS survival_snapshots (
                    id            TEXT PRIMARY KEY,
                    tier          TEXT NOT NULL,
                    estimated_usd INTEGER NOT NULL,
                    created_at    TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS unlock_sessions (
                    id         TEXT PRIMARY KEY,
                    address    TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    expires_at TEXT NOT NULL,
                    revoked_at TEXT
                );
                CREATE TABLE IF NOT EXISTS audit_log (
                    id         TEXT PRIMARY KEY,
                    event      TEXT NOT NULL,
                    detail     TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS payment_events (
                    id           TEXT PRIMARY KEY,
                    kind         TEXT NOT NULL,
                    amount_usdc  TEXT NOT NULL,
                    counterparty TEXT,
                    metadata     TEXT NOT NULL,
                    created_at   TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS emergency_state (
                    id         INTEGER PRIMARY KEY CHECK (id = 1),
                    enabled    INTEGER NOT NULL,
                    reason     TEXT,
                    updated_at TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS kv (
                    key   TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );
                "#,
            )?;
            conn.execute(
                "INSERT OR IGNORE INTO emergency_state (id, enabled, reason, updated_at)
                 VALUES (1, 0, NULL, ?1)",
                params![now().to_rfc3339()],
            )?;
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        }
        Ok(())
    }

    // ── Turns ─────────────────────────────────────────────────────────────────

    /// Insert a turn row.  Metadata is redacted; the row is immutable after
    /// this call.
    pub fn insert_turn(
        &self,
        state: &str,
        input: Option<serde_json::Value>,
        output: Option<serde_json::Value>,
        metadata: serde_json::Value,
    ) -> Result<Turn> {
        let turn = Turn {
            id: new_id(),
            timestamp: now(),
            state: state.to_string(),
            input,
            output,
            metadata: redact_value(&metadata),
        };
        self.conn()?.execute(
            "INSERT INTO turns (id, timestamp, state, input, output, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                turn.id,
                turn.timestamp.to_rfc3339(),
                turn.state,
                turn.input.as_ref().map(|v| v.to_string()),
                turn.output.as_ref().map(|v| v.to_string()),
                turn.metadata.to_string(),
            ],
        )?;
        Ok(turn)
    }

    /// Most recent turns, newest first.
    pub fn recent_turns(&self, limit: u32) -> Result<Vec<Turn>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, state, input, output, metadata
             FROM turns ORDER BY timestamp DESC, rowid DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |r| {
            Ok(Turn {
                id: r.get(0)?,
                timestamp: ts(r.get(1)?)?,
                state: r.get(2)?,
                input: r.get::<_, Option<String>>(3)?.map(json).transpose()?,
                output: r.get::<_, Option<String>>(4)?.map(json).transpose()?,
                metadata: json(r.get(5)?)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    pub fn insert_turn_telemetry(&self, t: &TurnTelemetry) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO turn_telemetry
             (turn_id, survival_tier, estimated_usd, queue_depth, spend_proxy_usd,
              actions_total, action_failures, brain_duration_ms, brain_failures)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                t.turn_id,
                t.survival_tier,
                t.estimated_usd,
                t.queue_depth,
                t.spend_proxy_usd,
                t.actions_total,
                t.action_failures,
                t.brain_duration_ms as i64,
                t.brain_failures,
            ],
        )?;
        Ok(())
    }

    pub fn telemetry_for_turn(&self, turn_id: &str) -> Result<Option<TurnTelemetry>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT turn_id, survival_tier, estimated_usd, queue_depth, spend_proxy_usd,
                        actions_total, action_failures, brain_duration_ms, brain_failures
                 FROM turn_telemetry WHERE turn_id = ?1",
                params![turn_id],
                |r| {
                    Ok(TurnTelemetry {
                        turn_id: r.get(0)?,
                        survival_tier: r.get(1)?,
                        estimated_usd: r.get(2)?,
                        queue_depth: r.get(3)?,
                        spend_proxy_usd: r.get(4)?,
                        actions_total: r.get(5)?,
                        action_failures: r.get(6)?,
                        brain_duration_ms: r.get::<_, i64>(7)? as u64,
                        brain_failures: r.get(8)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    // ── Messages ──────────────────────────────────────────────────────────────

    /// Insert an inbound message if its id is unseen.  Returns `true` when a
    /// row was inserted.  Transport ids are stable, so re-polling the same
    /// window is harmless.
    pub fn upsert_message(
        &self,
        id: &str,
        from: &str,
        to: &str,
        thread_id: Option<&str>,
        content: &str,
        received_at: DateTime<Utc>,
    ) -> Result<bool> {
        let n = self.conn()?.execute(
            "INSERT OR IGNORE INTO messages
             (id, sender, recipient, thread_id, content, received_at, processed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL)",
            params![id, from, to, thread_id, content, received_at.to_rfc3339()],
        )?;
        Ok(n > 0)
    }

    /// Record an outbound message as already processed.
    pub fn insert_outbound_message(
        &self,
        from: &str,
        to: &str,
        thread_id: Option<&str>,
        content: &str,
    ) -> Result<Message> {
        let msg = Message {
            id: new_id(),
            from: from.into(),
            to: to.into(),
            thread_id: thread_id.map(Into::into),
            content: content.into(),
            received_at: now(),
            processed_at: Some(now()),
        };
        self.conn()?.execute(
            "INSERT INTO messages
             (id, sender, recipient, thread_id, content, received_at, processed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                msg.id,
                msg.from,
                msg.to,
                msg.thread_id,
                msg.content,
                msg.received_at.to_rfc3339(),
                msg.processed_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(msg)
    }

    /// Unprocessed messages, oldest first.
    pub fn poll_messages(&self, limit: u32) -> Result<Vec<Message>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, sender, recipient, thread_id, content, received_at, processed_at
             FROM messages WHERE processed_at IS NULL
             ORDER BY received_at ASC, rowid ASC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |r| {
            Ok(Message {
                id: r.get(0)?,
                from: r.get(1)?,
                to: r.get(2)?,
                thread_id: r.get(3)?,
                content: r.get(4)?,
                received_at: ts(r.get(5)?)?,
                processed_at: opt_ts(r.get(6)?)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// Claim a message for a turn.  The transition happens at most once:
    /// a second call is a no-op and returns `false`.
    pub fn mark_message_processed(&self, id: &str) -> Result<bool> {
        let n = self.conn()?.execute(
            "UPDATE messages SET processed_at = ?1
             WHERE id = ?2 AND processed_at IS NULL",
            params![now().to_rfc3339(), id],
        )?;
        Ok(n > 0)
    }

    /// Queue depth: messages no turn has claimed yet.
    pub fn count_messages(&self) -> Result<u32> {
        let n: u32 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM messages WHERE processed_at IS NULL",
            [],
            |r| r.get(0),
        )?;
        Ok(n)
    }

    /// Messages in a thread, oldest first.
    pub fn thread_messages(&self, thread_id: &str, limit: u32) -> Result<Vec<Message>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, sender, recipient, thread_id, content, received_at, processed_at
             FROM messages WHERE thread_id = ?1
             ORDER BY received_at ASC, rowid ASC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![thread_id, limit], |r| {
            Ok(Message {
                id: r.get(0)?,
                from: r.get(1)?,
                to: r.get(2)?,
                thread_id: r.get(3)?,
                content: r.get(4)?,
                received_at: ts(r.get(5)?)?,
                processed_at: opt_ts(r.get(6)?)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// Distinct thread ids touched recently, newest first.
    pub fn recent_threads(&self, limit: u32) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT thread_id, MAX(received_at) AS latest FROM messages
             WHERE thread_id IS NOT NULL
             GROUP BY thread_id ORDER BY latest DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |r| r.get::<_, String>(0))?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    // ── Memory ────────────────────────────────────────────────────────────────

    /// Upsert a fact by key; newer write wins.  Confidence is clamped to
    /// [0, 1].
    pub fn upsert_fact(
        &self,
        key: &str,
        value: &str,
        confidence: Option<f64>,
        source: &str,
    ) -> Result<MemoryFact> {
        let fact = MemoryFact {
            id: new_id(),
            key: key.into(),
            value: value.into(),
            confidence: confidence.unwrap_or(0.5).clamp(0.0, 1.0),
            source: source.into(),
            updated_at: now(),
        };
        self.conn()?.execute(
            "INSERT INTO memory_facts (id, key, value, confidence, source, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(key) DO UPDATE SET
               value = excluded.value,
               confidence = excluded.confidence,
               source = excluded.source,
               updated_at = excluded.updated_at",
            params![
                fact.id,
                fact.key,
                fact.value,
                fact.confidence,
                fact.source,
                fact.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(fact)
    }

    /// Facts, most recently updated first.
    pub fn facts(&self, limit: u32) -> Result<Vec<MemoryFact>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, key, value, confidence, source, updated_at
             FROM memory_facts ORDER BY updated_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |r| {
            Ok(MemoryFact {
                id: r.get(0)?,
                key: r.get(1)?,
                value: r.get(2)?,
                confidence: r.get(3)?,
                source: r.get(4)?,
                updated_at: ts(r.get(5)?)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    pub fn fact_by_key(&self, key: &str) -> Result<Option<MemoryFact>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT id, key, value, confidence, source, updated_at
                 FROM memory_facts WHERE key = ?1",
                params![key],
                |r| {
                    Ok(MemoryFact {
                        id: r.get(0)?,
                        key: r.get(1)?,
                        value: r.get(2)?,
                        confidence: r.get(3)?,
                        source: r.get(4)?,
                        updated_at: ts(r.get(5)?)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn append_episode(
        &self,
        summary: &str,
        outcome: Option<&str>,
        action_type: Option<&str>,
        metadata: serde_json::Value,
    ) -> Result<MemoryEpisode> {
        let ep = MemoryEpisode {
            id: new_id(),
            summary: summary.into(),
            outcome: outcome.map(Into::into),
            action_type: action_type.map(Into::into),
            metadata: redact_value(&metadata),
            created_at: now(),
        };
        self.conn()?.execute(
            "INSERT INTO memory_episodes (id, summary, outcome, action_type, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                ep.id,
                ep.summary,
                ep.outcome,
                ep.action_type,
                ep.metadata.to_string(),
                ep.created_at.to_rfc3339(),
            ],
        )?;
        Ok(ep)
    }

    /// Episodes, newest first.
    pub fn episodes(&self, limit: u32) -> Result<Vec<MemoryEpisode>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, summary, outcome, action_type, metadata, created_at
             FROM memory_episodes ORDER BY created_at DESC, rowid DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |r| {
            Ok(MemoryEpisode {
                id: r.get(0)?,
                summary: r.get(1)?,
                outcome: r.get(2)?,
                action_type: r.get(3)?,
                metadata: json(r.get(4)?)?,
                created_at: ts(r.get(5)?)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    // ── Incidents & alerts ────────────────────────────────────────────────────

    /// Append an incident.  Message and metadata are redacted here so no
    /// caller can persist secret material.
    pub fn insert_incident(
        &self,
        code: IncidentCode,
        severity: Severity,
        category: &str,
        message: &str,
        metadata: serde_json::Value,
    ) -> Result<Incident> {
        let incident = Incident {
            id: new_id(),
            code,
            severity,
            category: category.into(),
            message: redact_text(message),
            metadata: redact_value(&metadata),
            timestamp: now(),
        };
        self.conn()?.execute(
            "INSERT INTO incidents (id, code, severity, category, message, metadata, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                incident.id,
                incident.code.as_str(),
                incident.severity.as_str(),
                incident.category,
                incident.message,
                incident.metadata.to_string(),
                incident.timestamp.to_rfc3339(),
            ],
        )?;
        Ok(incident)
    }

    /// Incidents newer than `since` with exactly `severity`.
    pub fn count_incidents_since(&self, severity: Severity, since: DateTime<Utc>) -> Result<u32> {
        let n: u32 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM incidents WHERE severity = ?1 AND timestamp >= ?2",
            params![severity.as_str(), since.to_rfc3339()],
            |r| r.get(0),
        )?;
        Ok(n)
    }

    /// Like [`Self::count_incidents_since`] but ignoring one code.  The alert
    /// evaluator uses this so its own `ALERT_TRIGGERED` mirrors do not feed
    /// back into the threshold they fired from.
    pub fn count_incidents_since_excluding(
        &self,
        severity: Severity,
        since: DateTime<Utc>,
        exclude: IncidentCode,
    ) -> Result<u32> {
        let n: u32 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM incidents
             WHERE severity = ?1 AND timestamp >= ?2 AND code != ?3",
            params![severity.as_str(), since.to_rfc3339(), exclude.as_str()],
            |r| r.get(0),
        )?;
        Ok(n)
    }

    /// Most recent incidents, newest first.
    pub fn recent_incidents(&self, limit: u32) -> Result<Vec<Incident>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, code, severity, category, message, metadata, timestamp
             FROM incidents ORDER BY timestamp DESC, rowid DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |r| {
            let code_text: String = r.get(1)?;
            let sev_text: String = r.get(2)?;
            Ok(Incident {
                id: r.get(0)?,
                code: serde_json::from_value(serde_json::Value::String(code_text.clone()))
                    .unwrap_or(IncidentCode::ProviderFailure),
                severity: Severity::parse(&sev_text).unwrap_or(Severity::Info),
                category: r.get(3)?,
                message: r.get(4)?,
                metadata: json(r.get(5)?)?,
                timestamp: ts(r.get(6)?)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    pub fn insert_alert(
        &self,
        code: &str,
        severity: Severity,
        route: &str,
        message: &str,
        metadata: serde_json::Value,
    ) -> Result<Alert> {
        let alert = Alert {
            id: new_id(),
            code: code.into(),
            severity,
            route: route.into(),
            message: redact_text(message),
            metadata: redact_value(&metadata),
            timestamp: now(),
        };
        self.conn()?.execute(
            "INSERT INTO alerts (id, code, severity, route, message, metadata, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                alert.id,
                alert.code,
                alert.severity.as_str(),
                alert.route,
                alert.message,
                alert.metadata.to_string(),
                alert.timestamp.to_rfc3339(),
            ],
        )?;
        Ok(alert)
    }

    pub fn recent_alerts(&self, limit: u32) -> Result<Vec<Alert>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, code, severity, route, message, metadata, timestamp
             FROM alerts ORDER BY timestamp DESC, rowid DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |r| {
            let sev_text: String = r.get(2)?;
            Ok(Alert {
                id: r.get(0)?,
                code: r.get(1)?,
                severity: Severity::parse(&sev_text).unwrap_or(Severity::Info),
                route: r.get(3)?,
                message: r.get(4)?,
                metadata: json(r.get(5)?)?,
                timestamp: ts(r.get(6)?)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    // ── Self-modification records ─────────────────────────────────────────────

    pub fn insert_mutation(
        &self,
        path: &str,
        before_hash: Option<&str>,
        after_hash: &str,
        reason: Option<&str>,
    ) -> Result<SelfModMutation> {
        let m = SelfModMutation {
            id: new_id(),
            path: path.into(),
            before_hash: before_hash.map(Into::into),
            after_hash: after_hash.into(),
            reason: reason.map(Into::into),
            created_at: now(),
        };
        self.conn()?.execute(
            "INSERT INTO self_mod_mutations (id, path, before_hash, after_hash, reason, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                m.id,
                m.path,
                m.before_hash,
                m.after_hash,
                m.reason,
                m.created_at.to_rfc3339(),
            ],
        )?;
        Ok(m)
    }

    pub fn insert_rollback_point(
        &self,
        mutation_id: &str,
        path: &str,
        rollback_hash: &str,
    ) -> Result<RollbackPoint> {
        let r = RollbackPoint {
            id: new_id(),
            mutation_id: mutation_id.into(),
            path: path.into(),
            rollback_hash: rollback_hash.into(),
            created_at: now(),
        };
        self.conn()?.execute(
            "INSERT INTO rollback_points (id, mutation_id, path, rollback_hash, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                r.id,
                r.mutation_id,
                r.path,
                r.rollback_hash,
                r.created_at.to_rfc3339(),
            ],
        )?;
        Ok(r)
    }

    /// Most recent rollback point for a normalized path.
    pub fn latest_rollback_for_path(&self, path: &str) -> Result<Option<RollbackPoint>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT id, mutation_id, path, rollback_hash, created_at
                 FROM rollback_points WHERE path = ?1
                 ORDER BY created_at DESC, rowid DESC LIMIT 1",
                params![path],
                |r| {
                    Ok(RollbackPoint {
                        id: r.get(0)?,
                        mutation_id: r.get(1)?,
                        path: r.get(2)?,
                        rollback_hash: r.get(3)?,
                        created_at: ts(r.get(4)?)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn count_mutations(&self) -> Result<u32> {
        let n: u32 =
            self.conn()?
                .query_row("SELECT COUNT(*) FROM self_mod_mutations", [], |r| r.get(0))?;
        Ok(n)
    }

    // ── Survival snapshots ────────────────────────────────────────────────────

    pub fn append_survival_snapshot(&self, tier: &str, estimated_usd: i64) -> Result<SurvivalSnapshot> {
        let s = SurvivalSnapshot {
            id: new_id(),
            tier: tier.into(),
            estimated_usd,
            created_at: now(),
        };
        self.conn()?.execute(
            "INSERT INTO survival_snapshots (id, tier, estimated_usd, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![s.id, s.tier, s.estimated_usd, s.created_at.to_rfc3339()],
        )?;
        Ok(s)
    }

    pub fn latest_survival_snapshot(&self) -> Result<Option<SurvivalSnapshot>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT id, tier, estimated_usd, created_at FROM survival_snapshots
                 ORDER BY created_at DESC, rowid DESC LIMIT 1",
                [],
                |r| {
                    Ok(SurvivalSnapshot {
                        id: r.get(0)?,
                        tier: r.get(1)?,
                        estimated_usd: r.get(2)?,
                        created_at: ts(r.get(3)?)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    // ── Emergency stop ────────────────────────────────────────────────────────

    pub fn emergency_state(&self) -> Result<EmergencyState> {
        let state = self.conn()?.query_row(
            "SELECT enabled, reason, updated_at FROM emergency_state WHERE id = 1",
            [],
            |r| {
                Ok(EmergencyState {
                    enabled: r.get::<_, i64>(0)? != 0,
                    reason: r.get(1)?,
                    updated_at: ts(r.get(2)?)?,
                })
            },
        )?;
        Ok(state)
    }

    pub fn set_emergency_stop(&self, enabled: bool, reason: Option<&str>) -> Result<EmergencyState> {
        let updated_at = now();
        self.conn()?.execute(
            "UPDATE emergency_state SET enabled = ?1, reason = ?2, updated_at = ?3 WHERE id = 1",
            params![enabled as i64, reason, updated_at.to_rfc3339()],
        )?;
        Ok(EmergencyState {
            enabled,
            reason: reason.map(Into::into),
            updated_at,
        })
    }

    // ── Unlock sessions & audit ───────────────────────────────────────────────

    /// Create an unlock session, revoking any session still active.  The "at
    /// most one active" invariant is enforced here rather than trusted to
    /// callers.
    pub fn insert_unlock_session(
        &self,
        address: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<UnlockSession> {
        self.revoke_unlock_sessions()?;
        let s = UnlockSession {
            id: new_id(),
            address: address.into(),
            created_at: now(),
            expires_at,
            revoked_at: None,
        };
        self.conn()?.execute(
            "INSERT INTO unlock_sessions (id, address, created_at, expires_at, revoked_at)
             VALUES (?1, ?2, ?3, ?4, NULL)",
            params![
                s.id,
                s.address,
                s.created_at.to_rfc3339(),
                s.expires_at.to_rfc3339(),
            ],
        )?;
        Ok(s)
    }

    /// Revoke every unrevoked session.  Returns the number revoked.
    pub fn revoke_unlock_sessions(&self) -> Result<u32> {
        let n = self.conn()?.execute(
            "UPDATE unlock_sessions SET revoked_at = ?1 WHERE revoked_at IS NULL",
            params![now().to_rfc3339()],
        )?;
        Ok(n as u32)
    }

    /// The active (unrevoked, unexpired) session, if any.
    pub fn active_unlock_session(&self) -> Result<Option<UnlockSession>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT id, address, created_at, expires_at, revoked_at FROM unlock_sessions
                 WHERE revoked_at IS NULL AND expires_at > ?1
                 ORDER BY created_at DESC LIMIT 1",
                params![now().to_rfc3339()],
                |r| {
                    Ok(UnlockSession {
                        id: r.get(0)?,
                        address: r.get(1)?,
                        created_at: ts(r.get(2)?)?,
                        expires_at: ts(r.get(3)?)?,
                        revoked_at: opt_ts(r.get(4)?)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn append_audit(&self, event: &str, detail: &str) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO audit_log (id, event, detail, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![new_id(), event, redact_text(detail), now().to_rfc3339()],
        )?;
        Ok(())
    }

    // ── Payments ──────────────────────────────────────────────────────────────

    pub fn append_payment_event(
        &self,
        kind: &str,
        amount_usdc: &str,
        counterparty: Option<&str>,
        metadata: serde_json::Value,
    ) -> Result<PaymentEvent> {
        let p = PaymentEvent {
            id: new_id(),
            kind: kind.into(),
            amount_usdc: amount_usdc.into(),
            counterparty: counterparty.map(Into::into),
            metadata: redact_value(&metadata),
            created_at: now(),
        };
        self.conn()?.execute(
            "INSERT INTO payment_events (id, kind, amount_usdc, counterparty, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                p.id,
                p.kind,
                p.amount_usdc,
                p.counterparty,
                p.metadata.to_string(),
                p.created_at.to_rfc3339(),
            ],
        )?;
        Ok(p)
    }

    // ── KV ────────────────────────────────────────────────────────────────────

    pub fn kv_get(&self, key: &str) -> Result<Option<String>> {
        let v = self
            .conn()?
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |r| {
                r.get(0)
            })
            .optional()?;
        Ok(v)
    }

    pub fn kv_set(&self, key: &str, value: &str) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn kv_delete(&self, key: &str) -> Result<()> {
        self.conn()?
            .execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }

    pub fn kv_get_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.kv_get(key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn kv_set_json<T: serde::Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.kv_set(key, &serde_json::to_string(value)?)
    }

    /// Atomic read-modify-write of one KV entry inside a transaction.
    /// Returning `None` from the closure deletes the key.
    pub fn kv_update<F>(&self, key: &str, f: F) -> Result<Option<String>>
    where
        F: FnOnce(Option<String>) -> Option<String>,
    {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let current: Option<String> = tx
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |r| {
                r.get(0)
            })
            .optional()?;
        let next = f(current);
        match &next {
            Some(value) => {
                tx.execute(
                    "INSERT INTO kv (key, value) VALUES (?1, ?2)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                    params![key, value],
                )?;
            }
            None => {
                tx.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
            }
        }
        tx.commit()?;
        Ok(next)
    }
}

// Well-known KV keys.  Kept here so every crate spells them identically.
pub mod kv_keys {
    pub const STARTED_AT: &str = "started_at";
    pub const AGENT_STATE: &str = "agent_state";
    pub const AGENT_ADDRESS: &str = "agent_address";
    pub const SELF_CHILD_ID: &str = "self_child_id";
    pub const ENABLED_SKILL_IDS: &str = "enabled_skill_ids";
    pub const BRAIN_FAILURE_STREAK: &str = "brain_failure_streak_v1";
    pub const SELF_MOD_TIMESTAMPS: &str = "self_mod_timestamps_v1";
    pub const SELF_MOD_BACKUP_PREFIX: &str = "self_mod_backup_v1:";
    pub const NEXT_SLEEP_MS: &str = "autonomy_next_sleep_ms";
    pub const LAST_POLL_AT: &str = "xmtp_last_poll_at";
    pub const ALERT_DEDUP_PREFIX: &str = "alert_dedup_v1:";
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
