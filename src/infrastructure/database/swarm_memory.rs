//! The durable swarm memory store.
//!
//! Thread-safe, append-only where the data model demands it, backed by a
//! single SQLite file. One process-wide handle exists per storage root;
//! `open` returns the shared handle and `close` retires it.
//!
//! Concurrency: a single writer mutex serializes every mutating statement,
//! which makes `event_id` strictly monotonic, gap-free, and equal to commit
//! order. Readers go straight to the pool.

use chrono::{DateTime, Duration, Utc};
use sqlx::Row;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, OnceLock};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, instrument, warn};

use crate::domain::error::{CoordinationError, CoordinationResult, StorageError};
use crate::domain::models::agent::{AgentRecord, AgentState};
use crate::domain::models::config::DatabaseConfig;
use crate::domain::models::event::{EventKind, EventQuery, SwarmEvent};
use crate::domain::models::proposal::ConsensusResult;

use super::connection::DatabaseConnection;
use super::migrations::{all_embedded_migrations, Migrator};

/// Process-wide handle registry, keyed by canonical storage root.
fn registry() -> &'static StdMutex<HashMap<PathBuf, Arc<SwarmMemory>>> {
    static REGISTRY: OnceLock<StdMutex<HashMap<PathBuf, Arc<SwarmMemory>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| StdMutex::new(HashMap::new()))
}

/// Row counts per table, for diagnostics.
#[derive(Debug, Clone, Default)]
pub struct MemoryStats {
    pub events: u64,
    pub agents: u64,
    pub sessions: u64,
    pub task_metrics: u64,
    pub episodes: u64,
    pub knowledge_entries: u64,
    pub proposals: u64,
}

/// Scoped exclusive write access.
///
/// Holds the writer lock and an open SQL transaction. Dropping the guard
/// rolls the transaction back; [`commit`](Self::commit) is the only path
/// that persists. Concurrent `transaction()` calls serialize on the writer
/// lock; do not nest within one task.
pub struct MemoryTransaction {
    tx: Option<sqlx::Transaction<'static, sqlx::Sqlite>>,
    _guard: OwnedMutexGuard<()>,
}

impl MemoryTransaction {
    /// The connection to run statements against.
    pub fn executor(&mut self) -> &mut sqlx::SqliteConnection {
        self.tx
            .as_deref_mut()
            .expect("transaction used after completion")
    }

    /// Persist everything executed in this scope.
    pub async fn commit(mut self) -> CoordinationResult<()> {
        if let Some(tx) = self.tx.take() {
            tx.commit().await?;
        }
        Ok(())
    }

    /// Discard everything executed in this scope.
    pub async fn rollback(mut self) -> CoordinationResult<()> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await?;
        }
        Ok(())
    }
}

/// Durable event log, agent registry, session state, metrics, and proposal
/// tallies for one swarm.
pub struct SwarmMemory {
    connection: DatabaseConnection,
    write_lock: Arc<Mutex<()>>,
    root: Option<PathBuf>,
}

impl SwarmMemory {
    /// Open (or reuse) the store rooted at `storage_root`.
    ///
    /// The first call per root creates directories, opens the pool, and runs
    /// migrations; later calls return the same shared handle.
    pub async fn open(
        storage_root: &Path,
        config: &DatabaseConfig,
    ) -> CoordinationResult<Arc<Self>> {
        std::fs::create_dir_all(storage_root).map_err(|e| {
            StorageError::ConnectionFailed(format!("create {}: {e}", storage_root.display()))
        })?;
        let canonical = storage_root.canonicalize().map_err(|e| {
            StorageError::ConnectionFailed(format!("canonicalize {}: {e}", storage_root.display()))
        })?;

        if let Some(existing) = registry()
            .lock()
            .expect("memory registry poisoned")
            .get(&canonical)
        {
            return Ok(Arc::clone(existing));
        }

        let db_path = canonical.join("swarm.db");
        let memory = Self::build(
            DatabaseConnection::open(&db_path, config.max_connections, config.busy_timeout_ms)
                .await?,
            Some(canonical.clone()),
        )
        .await?;
        let memory = Arc::new(memory);

        let mut map = registry().lock().expect("memory registry poisoned");
        // Another task may have raced us past the first check; keep theirs.
        let entry = map
            .entry(canonical)
            .or_insert_with(|| Arc::clone(&memory));
        Ok(Arc::clone(entry))
    }

    /// Connect to an explicit database URL, bypassing the handle registry.
    /// Intended for tests (`sqlite::memory:`).
    pub async fn connect(database_url: &str, config: &DatabaseConfig) -> CoordinationResult<Self> {
        let connection =
            DatabaseConnection::connect(database_url, config.max_connections, config.busy_timeout_ms)
                .await?;
        Self::build(connection, None).await
    }

    async fn build(
        connection: DatabaseConnection,
        root: Option<PathBuf>,
    ) -> CoordinationResult<Self> {
        let migrator = Migrator::new(connection.pool().clone());
        let applied = migrator
            .run_embedded_migrations(all_embedded_migrations())
            .await?;
        if applied > 0 {
            debug!(applied, "applied swarm memory migrations");
        }
        Ok(Self {
            connection,
            write_lock: Arc::new(Mutex::new(())),
            root,
        })
    }

    fn pool(&self) -> &sqlx::SqlitePool {
        self.connection.pool()
    }

    /// Close the pool and retire this handle from the process registry.
    pub async fn close(&self) {
        if let Some(root) = &self.root {
            registry()
                .lock()
                .expect("memory registry poisoned")
                .remove(root);
        }
        self.connection.close().await;
    }

    // -------------------------------------------------------------------------
    // Event log
    // -------------------------------------------------------------------------

    /// Append an event; returns the store-assigned `event_id`.
    #[instrument(skip(self, event), fields(kind = event.kind.as_str()))]
    pub async fn insert_event(&self, event: &SwarmEvent) -> CoordinationResult<i64> {
        let payload = serde_json::to_string(&event.payload)?;
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query(
            "INSERT INTO agent_events (kind, agent_id, ts, payload) VALUES (?, ?, ?, ?)",
        )
        .bind(event.kind.as_str())
        .bind(event.agent_id.as_deref())
        .bind(event.ts.to_rfc3339())
        .bind(payload)
        .execute(self.pool())
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Query stored events with optional filters.
    pub async fn query_events(&self, query: EventQuery) -> CoordinationResult<Vec<SwarmEvent>> {
        let mut sql = String::from(
            "SELECT event_id, kind, agent_id, ts, payload FROM agent_events WHERE 1=1",
        );
        if query.since_id.is_some() {
            sql.push_str(" AND event_id >= ?");
        }
        if query.agent_id.is_some() {
            sql.push_str(" AND agent_id = ?");
        }
        if query.kind.is_some() {
            sql.push_str(" AND kind = ?");
        }
        if query.since_time.is_some() {
            sql.push_str(" AND ts >= ?");
        }
        sql.push_str(if query.ascending {
            " ORDER BY event_id ASC"
        } else {
            " ORDER BY event_id DESC"
        });
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut q = sqlx::query(&sql);
        if let Some(id) = query.since_id {
            q = q.bind(id);
        }
        if let Some(agent_id) = &query.agent_id {
            q = q.bind(agent_id.clone());
        }
        if let Some(kind) = &query.kind {
            q = q.bind(kind.as_str().to_string());
        }
        if let Some(since) = query.since_time {
            q = q.bind(since.to_rfc3339());
        }

        let rows = q.fetch_all(self.pool()).await?;
        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            events.push(Self::row_to_event(&row)?);
        }
        Ok(events)
    }

    /// Highest assigned event id, if any events exist.
    pub async fn latest_event_id(&self) -> CoordinationResult<Option<i64>> {
        let row: Option<(Option<i64>,)> =
            sqlx::query_as("SELECT MAX(event_id) FROM agent_events")
                .fetch_optional(self.pool())
                .await?;
        Ok(row.and_then(|(id,)| id))
    }

    /// Delete events older than `max_age_days`; returns the count pruned.
    pub async fn cleanup_old_events(&self, max_age_days: u32) -> CoordinationResult<u64> {
        let cutoff = Utc::now() - Duration::days(i64::from(max_age_days));
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query("DELETE FROM agent_events WHERE ts < ?")
            .bind(cutoff.to_rfc3339())
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected())
    }

    fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> CoordinationResult<SwarmEvent> {
        let ts: String = row.get("ts");
        let payload: String = row.get("payload");
        Ok(SwarmEvent {
            event_id: row.get("event_id"),
            kind: EventKind::parse_str(&row.get::<String, _>("kind")),
            agent_id: row.get("agent_id"),
            ts: Self::parse_ts(&ts, "agent_events")?,
            payload: serde_json::from_str(&payload)?,
        })
    }

    // -------------------------------------------------------------------------
    // Agent registry
    // -------------------------------------------------------------------------

    /// Upsert an agent registration keyed by `agent_id`.
    #[instrument(skip(self, record), fields(agent_id = %record.agent_id))]
    pub async fn register_agent(&self, record: &AgentRecord) -> CoordinationResult<()> {
        let capabilities = serde_json::to_string(&record.capabilities)?;
        let metadata = serde_json::to_string(&record.metadata)?;
        let _guard = self.write_lock.lock().await;
        sqlx::query(
            r"
            INSERT INTO agent_registry
                (agent_id, agent_type, status, capabilities, metadata, last_heartbeat, registered_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(agent_id) DO UPDATE SET
                agent_type = excluded.agent_type,
                status = excluded.status,
                capabilities = excluded.capabilities,
                metadata = excluded.metadata,
                last_heartbeat = excluded.last_heartbeat,
                updated_at = excluded.updated_at
            ",
        )
        .bind(&record.agent_id)
        .bind(&record.agent_type)
        .bind(record.state.as_str())
        .bind(capabilities)
        .bind(metadata)
        .bind(record.last_heartbeat.to_rfc3339())
        .bind(record.registered_at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Fetch one agent registration.
    pub async fn get_agent(&self, agent_id: &str) -> CoordinationResult<Option<AgentRecord>> {
        let row = sqlx::query(
            "SELECT agent_id, agent_type, status, capabilities, metadata, last_heartbeat, registered_at
             FROM agent_registry WHERE agent_id = ?",
        )
        .bind(agent_id)
        .fetch_optional(self.pool())
        .await?;
        row.map(|r| Self::row_to_agent(&r)).transpose()
    }

    /// All registered agents, ordered by id.
    pub async fn list_agents(&self) -> CoordinationResult<Vec<AgentRecord>> {
        let rows = sqlx::query(
            "SELECT agent_id, agent_type, status, capabilities, metadata, last_heartbeat, registered_at
             FROM agent_registry ORDER BY agent_id",
        )
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(Self::row_to_agent).collect()
    }

    /// Update an agent's status, accumulating optional task duration.
    ///
    /// Fails with `NotFound` when the agent was never registered.
    pub async fn update_agent_status(
        &self,
        agent_id: &str,
        state: AgentState,
        duration_ms: Option<u64>,
    ) -> CoordinationResult<()> {
        let _guard = self.write_lock.lock().await;
        #[allow(clippy::cast_possible_wrap)]
        let result = sqlx::query(
            "UPDATE agent_registry
             SET status = ?, updated_at = ?, total_duration_ms = total_duration_ms + ?
             WHERE agent_id = ?",
        )
        .bind(state.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(duration_ms.unwrap_or(0) as i64)
        .bind(agent_id)
        .execute(self.pool())
        .await?;
        if result.rows_affected() == 0 {
            return Err(CoordinationError::NotFound(format!("agent {agent_id}")));
        }
        Ok(())
    }

    /// Refresh an agent's heartbeat timestamp.
    pub async fn touch_heartbeat(&self, agent_id: &str, at: DateTime<Utc>) -> CoordinationResult<()> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query(
            "UPDATE agent_registry SET last_heartbeat = ?, updated_at = ? WHERE agent_id = ?",
        )
        .bind(at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .bind(agent_id)
        .execute(self.pool())
        .await?;
        if result.rows_affected() == 0 {
            return Err(CoordinationError::NotFound(format!("agent {agent_id}")));
        }
        Ok(())
    }

    fn row_to_agent(row: &sqlx::sqlite::SqliteRow) -> CoordinationResult<AgentRecord> {
        let status: String = row.get("status");
        let state = AgentState::parse_str(&status).ok_or_else(|| StorageError::CorruptRow {
            table: "agent_registry".to_string(),
            message: format!("unknown status '{status}'"),
        })?;
        let capabilities: String = row.get("capabilities");
        let metadata: String = row.get("metadata");
        let heartbeat: String = row.get("last_heartbeat");
        let registered: String = row.get("registered_at");
        Ok(AgentRecord {
            agent_id: row.get("agent_id"),
            agent_type: row.get("agent_type"),
            state,
            capabilities: serde_json::from_str(&capabilities)?,
            metadata: serde_json::from_str(&metadata)?,
            last_heartbeat: Self::parse_ts(&heartbeat, "agent_registry")?,
            registered_at: Self::parse_ts(&registered, "agent_registry")?,
        })
    }

    // -------------------------------------------------------------------------
    // Session state
    // -------------------------------------------------------------------------

    /// Store (replacing) a session's state blob.
    pub async fn persist_session_state(
        &self,
        session_id: &str,
        state: &serde_json::Value,
    ) -> CoordinationResult<()> {
        let blob = serde_json::to_string(state)?;
        let _guard = self.write_lock.lock().await;
        sqlx::query(
            "INSERT INTO session_memory (session_id, state, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(session_id) DO UPDATE SET state = excluded.state, updated_at = excluded.updated_at",
        )
        .bind(session_id)
        .bind(blob)
        .bind(Utc::now().to_rfc3339())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Load a session's state blob, if present.
    pub async fn load_session_state(
        &self,
        session_id: &str,
    ) -> CoordinationResult<Option<serde_json::Value>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT state FROM session_memory WHERE session_id = ?")
                .bind(session_id)
                .fetch_optional(self.pool())
                .await?;
        match row {
            Some((blob,)) => Ok(Some(serde_json::from_str(&blob)?)),
            None => Ok(None),
        }
    }

    // -------------------------------------------------------------------------
    // Metrics
    // -------------------------------------------------------------------------

    /// Record a completed task observation.
    #[allow(clippy::cast_possible_wrap)]
    pub async fn record_task_metric(
        &self,
        task_type: &str,
        agent_id: Option<&str>,
        duration_ms: u64,
        success: bool,
        details: &serde_json::Value,
    ) -> CoordinationResult<()> {
        let details = serde_json::to_string(details)?;
        let _guard = self.write_lock.lock().await;
        sqlx::query(
            "INSERT INTO task_metrics (task_type, agent_id, duration_ms, success, ts, details)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(task_type)
        .bind(agent_id)
        .bind(duration_ms as i64)
        .bind(i32::from(success))
        .bind(Utc::now().to_rfc3339())
        .bind(details)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Record a per-agent gauge sample.
    pub async fn record_agent_metric(
        &self,
        agent_id: &str,
        metric: &str,
        value: f64,
    ) -> CoordinationResult<()> {
        let _guard = self.write_lock.lock().await;
        sqlx::query("INSERT INTO agent_metrics (agent_id, metric, value, ts) VALUES (?, ?, ?, ?)")
            .bind(agent_id)
            .bind(metric)
            .bind(value)
            .bind(Utc::now().to_rfc3339())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Record a swarm-wide gauge sample.
    pub async fn record_swarm_metric(&self, metric: &str, value: f64) -> CoordinationResult<()> {
        let _guard = self.write_lock.lock().await;
        sqlx::query("INSERT INTO swarm_metrics (metric, value, ts) VALUES (?, ?, ?)")
            .bind(metric)
            .bind(value)
            .bind(Utc::now().to_rfc3339())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Knowledge and episodes
    // -------------------------------------------------------------------------

    /// Upsert a semantic knowledge entry under `(namespace, key)`.
    pub async fn store_knowledge(
        &self,
        namespace: &str,
        key: &str,
        content: &serde_json::Value,
    ) -> CoordinationResult<()> {
        let content = serde_json::to_string(content)?;
        let _guard = self.write_lock.lock().await;
        sqlx::query(
            "INSERT INTO semantic_knowledge (namespace, key, content, updated_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(namespace, key) DO UPDATE SET content = excluded.content, updated_at = excluded.updated_at",
        )
        .bind(namespace)
        .bind(key)
        .bind(content)
        .bind(Utc::now().to_rfc3339())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Fetch one knowledge entry.
    pub async fn recall_knowledge(
        &self,
        namespace: &str,
        key: &str,
    ) -> CoordinationResult<Option<serde_json::Value>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT content FROM semantic_knowledge WHERE namespace = ? AND key = ?",
        )
        .bind(namespace)
        .bind(key)
        .fetch_optional(self.pool())
        .await?;
        match row {
            Some((content,)) => Ok(Some(serde_json::from_str(&content)?)),
            None => Ok(None),
        }
    }

    /// List knowledge keys within a namespace.
    pub async fn list_knowledge(&self, namespace: &str) -> CoordinationResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT key FROM semantic_knowledge WHERE namespace = ? ORDER BY key",
        )
        .bind(namespace)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(|(k,)| k).collect())
    }

    /// Append an episodic memory row.
    pub async fn record_episode(
        &self,
        session_id: Option<&str>,
        summary: &str,
        detail: &serde_json::Value,
    ) -> CoordinationResult<()> {
        let detail = serde_json::to_string(detail)?;
        let _guard = self.write_lock.lock().await;
        sqlx::query("INSERT INTO episodes (session_id, summary, detail, ts) VALUES (?, ?, ?, ?)")
            .bind(session_id)
            .bind(summary)
            .bind(detail)
            .bind(Utc::now().to_rfc3339())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Most recent episode summaries, newest first.
    pub async fn recent_episodes(&self, limit: u32) -> CoordinationResult<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT summary FROM episodes ORDER BY id DESC LIMIT ?")
                .bind(i64::from(limit))
                .fetch_all(self.pool())
                .await?;
        Ok(rows.into_iter().map(|(s,)| s).collect())
    }

    // -------------------------------------------------------------------------
    // Proposal archive
    // -------------------------------------------------------------------------

    /// Archive the tally of a decided proposal.
    #[allow(clippy::cast_possible_wrap)]
    pub async fn log_proposal(
        &self,
        proposal_id: u64,
        result: &ConsensusResult,
    ) -> CoordinationResult<()> {
        let detail = serde_json::to_string(&result.metadata)?;
        let _guard = self.write_lock.lock().await;
        sqlx::query(
            "INSERT INTO proposal_log
                (proposal_id, algorithm, decision, votes_for, votes_against, votes_abstain, duration_ms, detail, ts)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(proposal_id as i64)
        .bind(&result.algorithm_used)
        .bind(result.decision.as_str())
        .bind(i64::from(result.votes_for))
        .bind(i64::from(result.votes_against))
        .bind(i64::from(result.votes_abstain))
        .bind(result.duration_ms as i64)
        .bind(detail)
        .bind(Utc::now().to_rfc3339())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Recent proposal outcomes as `(proposal_id, algorithm, decision)`,
    /// newest first.
    #[allow(clippy::cast_sign_loss)]
    pub async fn proposal_history(
        &self,
        limit: u32,
    ) -> CoordinationResult<Vec<(u64, String, String)>> {
        let rows: Vec<(i64, String, String)> = sqlx::query_as(
            "SELECT proposal_id, algorithm, decision FROM proposal_log ORDER BY id DESC LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(self.pool())
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, algorithm, decision)| (id as u64, algorithm, decision))
            .collect())
    }

    // -------------------------------------------------------------------------
    // Maintenance
    // -------------------------------------------------------------------------

    /// Compact the database file.
    pub async fn vacuum(&self) -> CoordinationResult<()> {
        let _guard = self.write_lock.lock().await;
        sqlx::query("VACUUM").execute(self.pool()).await?;
        Ok(())
    }

    /// Begin an exclusive write transaction.
    ///
    /// Blocks while another writer (statement or transaction) is active.
    pub async fn transaction(&self) -> CoordinationResult<MemoryTransaction> {
        let guard = Arc::clone(&self.write_lock).lock_owned().await;
        let tx = self.pool().begin().await?;
        Ok(MemoryTransaction {
            tx: Some(tx),
            _guard: guard,
        })
    }

    /// Row counts per table.
    pub async fn stats(&self) -> CoordinationResult<MemoryStats> {
        Ok(MemoryStats {
            events: self.count("agent_events").await?,
            agents: self.count("agent_registry").await?,
            sessions: self.count("session_memory").await?,
            task_metrics: self.count("task_metrics").await?,
            episodes: self.count("episodes").await?,
            knowledge_entries: self.count("semantic_knowledge").await?,
            proposals: self.count("proposal_log").await?,
        })
    }

    #[allow(clippy::cast_sign_loss)]
    async fn count(&self, table: &str) -> CoordinationResult<u64> {
        // Table names come from the fixed list in `stats`, never from callers.
        let row: (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(self.pool())
            .await?;
        Ok(row.0 as u64)
    }

    fn parse_ts(raw: &str, table: &str) -> CoordinationResult<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                warn!(table, raw, "unparseable timestamp in store");
                CoordinationError::Storage(StorageError::CorruptRow {
                    table: table.to_string(),
                    message: format!("bad timestamp '{raw}': {e}"),
                })
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::event::EventKind;
    use serde_json::json;

    async fn memory() -> SwarmMemory {
        SwarmMemory::connect("sqlite::memory:", &DatabaseConfig::default())
            .await
            .expect("in-memory store")
    }

    #[tokio::test]
    async fn test_event_ids_are_monotonic_and_gap_free() {
        let memory = memory().await;
        let mut last = 0;
        for i in 0..5 {
            let event = SwarmEvent::new(EventKind::AgentHeartbeat, Some(format!("a{i}")), json!({}));
            let id = memory.insert_event(&event).await.unwrap();
            assert_eq!(id, last + 1, "ids must be gap-free");
            last = id;
        }
        assert_eq!(memory.latest_event_id().await.unwrap(), Some(5));
    }

    #[tokio::test]
    async fn test_register_agent_upsert_is_single_row() {
        let memory = memory().await;
        let record = AgentRecord::new("a1", "researcher");
        memory.register_agent(&record).await.unwrap();

        let mut updated = record.clone();
        updated.agent_type = "builder".to_string();
        memory.register_agent(&updated).await.unwrap();

        let agents = memory.list_agents().await.unwrap();
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].agent_type, "builder");
    }

    #[tokio::test]
    async fn test_update_status_unknown_agent_is_not_found() {
        let memory = memory().await;
        let err = memory
            .update_agent_status("ghost", AgentState::Active, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinationError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_session_state_round_trip() {
        let memory = memory().await;
        let state = json!({"phase": "build", "step": 3});
        memory.persist_session_state("s1", &state).await.unwrap();
        assert_eq!(memory.load_session_state("s1").await.unwrap(), Some(state));
        assert_eq!(memory.load_session_state("s2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_transaction_rolls_back_on_drop() {
        let memory = memory().await;
        {
            let mut tx = memory.transaction().await.unwrap();
            sqlx::query("INSERT INTO swarm_metrics (metric, value, ts) VALUES ('x', 1.0, 'now')")
                .execute(tx.executor())
                .await
                .unwrap();
            // Dropped without commit.
        }
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM swarm_metrics")
            .fetch_one(memory.pool())
            .await
            .unwrap();
        assert_eq!(row.0, 0);
    }

    #[tokio::test]
    async fn test_transaction_commit_persists() {
        let memory = memory().await;
        let mut tx = memory.transaction().await.unwrap();
        sqlx::query("INSERT INTO swarm_metrics (metric, value, ts) VALUES ('x', 1.0, 'now')")
            .execute(tx.executor())
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM swarm_metrics")
            .fetch_one(memory.pool())
            .await
            .unwrap();
        assert_eq!(row.0, 1);
    }

    #[tokio::test]
    async fn test_knowledge_upsert_and_recall() {
        let memory = memory().await;
        memory
            .store_knowledge("conventions", "branch_naming", &json!("task/<id>"))
            .await
            .unwrap();
        memory
            .store_knowledge("conventions", "branch_naming", &json!("feature/<id>"))
            .await
            .unwrap();
        assert_eq!(
            memory
                .recall_knowledge("conventions", "branch_naming")
                .await
                .unwrap(),
            Some(json!("feature/<id>"))
        );
        assert_eq!(
            memory.list_knowledge("conventions").await.unwrap(),
            vec!["branch_naming".to_string()]
        );
    }
}
