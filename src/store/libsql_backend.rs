//! libSQL backend — async `Database` trait implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, Row, params};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::llm::ProviderKind;
use crate::model::{
    AgentConfig, AgentId, Conversation, ConversationId, ConversationStatus,
    DEFAULT_MAX_AUTO_REPLIES, NewAgentConfig, Queue, QueueId, Turn, TurnOrigin,
};
use crate::store::migrations;
use crate::store::traits::Database;

const AGENT_COLUMNS: &str = "id, name, provider, credential, model, system_prompt, temperature, \
     max_output_tokens, max_auto_replies, active, owner_queue_id, escalation_queue_id";

const CONVERSATION_COLUMNS: &str = "id, queue_id, status, updated_at";

const TURN_COLUMNS: &str = "id, conversation_id, text, origin, created_at";

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
/// Writes hold `write_lock` so no other write lands inside an open
/// transaction on the shared connection.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    write_lock: Mutex<()>,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
            write_lock: Mutex::new(()),
        };
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
            write_lock: Mutex::new(()),
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run raw SQL (triggers, fault injection) against the shared connection.
    #[cfg(test)]
    pub(crate) async fn execute_batch(&self, sql: &str) {
        self.conn.execute_batch(sql).await.unwrap();
    }

    /// Run a query expected to yield at most one row and map it.
    async fn query_one<T>(
        &self,
        op: &str,
        sql: &str,
        params: impl libsql::params::IntoParams,
        map: fn(&Row) -> Result<T, DatabaseError>,
    ) -> Result<Option<T>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;
        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?
        {
            Some(row) => Ok(Some(map(&row)?)),
            None => Ok(None),
        }
    }

    /// Run a query and map every row.
    async fn query_all<T>(
        &self,
        op: &str,
        sql: &str,
        params: impl libsql::params::IntoParams,
        map: fn(&Row) -> Result<T, DatabaseError>,
    ) -> Result<Vec<T>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;
        let mut out = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?
        {
            out.push(map(&row)?);
        }
        Ok(out)
    }
}

// ── Helper functions ────────────────────────────────────────────────

fn now_str() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn read_err(op: &str, e: libsql::Error) -> DatabaseError {
    DatabaseError::Query(format!("{op}: {e}"))
}

/// Unique-index and check violations become `Constraint`, everything else `Query`.
fn write_err(op: &str, e: libsql::Error) -> DatabaseError {
    let msg = e.to_string();
    if msg.contains("UNIQUE constraint failed") || msg.contains("CHECK constraint failed") {
        DatabaseError::Constraint(format!("{op}: {msg}"))
    } else {
        DatabaseError::Query(format!("{op}: {msg}"))
    }
}

fn new_turn(conversation_id: ConversationId, text: &str, origin: TurnOrigin) -> Turn {
    Turn {
        id: Uuid::new_v4(),
        conversation_id,
        text: text.to_string(),
        origin,
        created_at: Utc::now(),
    }
}

/// Insert a turn and bump the conversation's `updated_at`.
async fn insert_turn(conn: &Connection, turn: &Turn) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO turns (id, conversation_id, text, origin, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            turn.id.to_string(),
            turn.conversation_id,
            turn.text.as_str(),
            turn.origin.as_str(),
            turn.created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
        ],
    )
    .await
    .map_err(|e| write_err("append_turn", e))?;
    conn.execute(
        "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
        params![now_str(), turn.conversation_id],
    )
    .await
    .map_err(|e| write_err("append_turn", e))?;
    Ok(())
}

/// Guarded queue move: writes nothing unless both rows exist.
async fn move_conversation(
    conn: &Connection,
    id: ConversationId,
    queue_id: QueueId,
) -> Result<Option<Conversation>, DatabaseError> {
    let sql = format!(
        "UPDATE conversations
         SET queue_id = ?2, status = 'pending', updated_at = ?3
         WHERE id = ?1 AND EXISTS (SELECT 1 FROM queues WHERE id = ?2)
         RETURNING {CONVERSATION_COLUMNS}"
    );
    let mut rows = conn
        .query(&sql, params![id, queue_id, now_str()])
        .await
        .map_err(|e| write_err("update_conversation_queue", e))?;
    match rows
        .next()
        .await
        .map_err(|e| write_err("update_conversation_queue", e))?
    {
        Some(row) => Ok(Some(row_to_conversation(&row)?)),
        None => Ok(None),
    }
}

fn row_to_queue(row: &Row) -> Result<Queue, DatabaseError> {
    Ok(Queue {
        id: row.get(0).map_err(|e| read_err("queue.id", e))?,
        name: row.get(1).map_err(|e| read_err("queue.name", e))?,
    })
}

fn row_to_agent(row: &Row) -> Result<AgentConfig, DatabaseError> {
    let provider_str: String = row.get(2).map_err(|e| read_err("agent.provider", e))?;
    let provider: ProviderKind = provider_str
        .parse()
        .map_err(|e| DatabaseError::Query(format!("agent.provider: {e}")))?;
    let credential: String = row.get(3).map_err(|e| read_err("agent.credential", e))?;
    let active: i64 = row.get(9).map_err(|e| read_err("agent.active", e))?;

    Ok(AgentConfig {
        id: row.get(0).map_err(|e| read_err("agent.id", e))?,
        name: row.get(1).map_err(|e| read_err("agent.name", e))?,
        provider,
        credential: SecretString::from(credential),
        model: row.get(4).map_err(|e| read_err("agent.model", e))?,
        system_prompt: row.get(5).ok(),
        temperature: row.get::<f64>(6).ok(),
        max_output_tokens: row.get::<i64>(7).ok(),
        max_auto_replies: row
            .get::<i64>(8)
            .unwrap_or(DEFAULT_MAX_AUTO_REPLIES),
        active: active != 0,
        owner_queue_id: row.get(10).map_err(|e| read_err("agent.owner_queue_id", e))?,
        escalation_queue_id: row
            .get(11)
            .map_err(|e| read_err("agent.escalation_queue_id", e))?,
    })
}

fn row_to_conversation(row: &Row) -> Result<Conversation, DatabaseError> {
    let status_str: String = row.get(2).map_err(|e| read_err("conversation.status", e))?;
    let updated_at: String = row.get(3).map_err(|e| read_err("conversation.updated_at", e))?;
    Ok(Conversation {
        id: row.get(0).map_err(|e| read_err("conversation.id", e))?,
        queue_id: row.get::<i64>(1).ok(),
        status: status_str
            .parse::<ConversationStatus>()
            .map_err(DatabaseError::Query)?,
        updated_at: parse_datetime(&updated_at),
    })
}

fn row_to_turn(row: &Row) -> Result<Turn, DatabaseError> {
    let id_str: String = row.get(0).map_err(|e| read_err("turn.id", e))?;
    let origin_str: String = row.get(3).map_err(|e| read_err("turn.origin", e))?;
    let created_at: String = row.get(4).map_err(|e| read_err("turn.created_at", e))?;
    Ok(Turn {
        id: Uuid::parse_str(&id_str)
            .map_err(|e| DatabaseError::Query(format!("turn.id: {e}")))?,
        conversation_id: row.get(1).map_err(|e| read_err("turn.conversation_id", e))?,
        text: row.get(2).map_err(|e| read_err("turn.text", e))?,
        origin: origin_str.parse().map_err(DatabaseError::Query)?,
        created_at: parse_datetime(&created_at),
    })
}

#[async_trait]
impl Database for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Queues ──────────────────────────────────────────────────────

    async fn create_queue(&self, name: &str) -> Result<Queue, DatabaseError> {
        let _write = self.write_lock.lock().await;
        let queue = self
            .query_one(
                "create_queue",
                "INSERT INTO queues (name) VALUES (?1) RETURNING id, name",
                params![name],
                row_to_queue,
            )
            .await?
            .ok_or_else(|| DatabaseError::Query("create_queue: no row returned".into()))?;
        debug!(queue_id = queue.id, name, "Queue created");
        Ok(queue)
    }

    async fn get_queue(&self, id: QueueId) -> Result<Option<Queue>, DatabaseError> {
        self.query_one(
            "get_queue",
            "SELECT id, name FROM queues WHERE id = ?1",
            params![id],
            row_to_queue,
        )
        .await
    }

    async fn list_queues(&self) -> Result<Vec<Queue>, DatabaseError> {
        self.query_all(
            "list_queues",
            "SELECT id, name FROM queues ORDER BY id ASC",
            (),
            row_to_queue,
        )
        .await
    }

    async fn queues_without_active_agent(&self) -> Result<Vec<Queue>, DatabaseError> {
        self.query_all(
            "queues_without_active_agent",
            "SELECT q.id, q.name FROM queues q
             WHERE NOT EXISTS (
                 SELECT 1 FROM agent_configs a
                 WHERE a.owner_queue_id = q.id AND a.active = 1
             )
             ORDER BY q.id ASC",
            (),
            row_to_queue,
        )
        .await
    }

    // ── Agent configurations ────────────────────────────────────────

    async fn create_agent_config(
        &self,
        config: &NewAgentConfig,
    ) -> Result<AgentConfig, DatabaseError> {
        let _write = self.write_lock.lock().await;
        let sql = format!(
            "INSERT INTO agent_configs (
                name, provider, credential, model, system_prompt, temperature,
                max_output_tokens, max_auto_replies, active, owner_queue_id,
                escalation_queue_id, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)
             RETURNING {AGENT_COLUMNS}"
        );
        let mut rows = self
            .conn()
            .query(
                &sql,
                params![
                    config.name.as_str(),
                    config.provider.as_str(),
                    config.credential.expose_secret(),
                    config.model.as_str(),
                    config.system_prompt.clone(),
                    config.temperature,
                    config.max_output_tokens,
                    config.max_auto_replies.unwrap_or(DEFAULT_MAX_AUTO_REPLIES),
                    config.active as i64,
                    config.owner_queue_id,
                    config.escalation_queue_id,
                    now_str(),
                ],
            )
            .await
            .map_err(|e| write_err("create_agent_config", e))?;
        let row = rows
            .next()
            .await
            .map_err(|e| write_err("create_agent_config", e))?
            .ok_or_else(|| DatabaseError::Query("create_agent_config: no row returned".into()))?;
        let agent = row_to_agent(&row)?;
        info!(
            agent_id = agent.id,
            queue_id = agent.owner_queue_id,
            provider = %agent.provider,
            "Agent configuration created"
        );
        Ok(agent)
    }

    async fn agent_config_for_queue(
        &self,
        queue_id: QueueId,
    ) -> Result<Option<AgentConfig>, DatabaseError> {
        let sql = format!(
            "SELECT {AGENT_COLUMNS} FROM agent_configs
             WHERE owner_queue_id = ?1
             ORDER BY active DESC, id ASC
             LIMIT 1"
        );
        self.query_one("agent_config_for_queue", &sql, params![queue_id], row_to_agent)
            .await
    }

    async fn list_active_agent_configs(&self) -> Result<Vec<AgentConfig>, DatabaseError> {
        let sql = format!(
            "SELECT {AGENT_COLUMNS} FROM agent_configs WHERE active = 1 ORDER BY id ASC"
        );
        self.query_all("list_active_agent_configs", &sql, (), row_to_agent)
            .await
    }

    async fn set_agent_active(&self, id: AgentId, active: bool) -> Result<(), DatabaseError> {
        let _write = self.write_lock.lock().await;
        let count = self
            .conn()
            .execute(
                "UPDATE agent_configs SET active = ?1, updated_at = ?2 WHERE id = ?3",
                params![active as i64, now_str(), id],
            )
            .await
            .map_err(|e| write_err("set_agent_active", e))?;
        if count == 0 {
            return Err(DatabaseError::NotFound {
                entity: "agent_config".into(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    // ── Conversations ───────────────────────────────────────────────

    async fn create_conversation(
        &self,
        queue_id: Option<QueueId>,
    ) -> Result<Conversation, DatabaseError> {
        let _write = self.write_lock.lock().await;
        let sql = format!(
            "INSERT INTO conversations (queue_id, status, created_at, updated_at)
             VALUES (?1, 'pending', ?2, ?2)
             RETURNING {CONVERSATION_COLUMNS}"
        );
        self.query_one(
            "create_conversation",
            &sql,
            params![queue_id, now_str()],
            row_to_conversation,
        )
        .await?
        .ok_or_else(|| DatabaseError::Query("create_conversation: no row returned".into()))
    }

    async fn get_conversation(
        &self,
        id: ConversationId,
    ) -> Result<Option<Conversation>, DatabaseError> {
        let sql = format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1");
        self.query_one("get_conversation", &sql, params![id], row_to_conversation)
            .await
    }

    async fn update_conversation_queue(
        &self,
        id: ConversationId,
        queue_id: QueueId,
    ) -> Result<Option<Conversation>, DatabaseError> {
        let _write = self.write_lock.lock().await;
        move_conversation(self.conn(), id, queue_id).await
    }

    async fn hand_off(
        &self,
        id: ConversationId,
        queue_id: QueueId,
        notice: &str,
    ) -> Result<Option<(Turn, Conversation)>, DatabaseError> {
        let _write = self.write_lock.lock().await;
        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(|e| write_err("hand_off: begin", e))?;

        let turn = new_turn(id, notice, TurnOrigin::Automated);
        let moved = match insert_turn(&tx, &turn).await {
            Ok(()) => move_conversation(&tx, id, queue_id).await,
            Err(e) => Err(e),
        };

        match moved {
            Ok(Some(conversation)) => {
                tx.commit()
                    .await
                    .map_err(|e| write_err("hand_off: commit", e))?;
                debug!(conversation_id = id, queue_id, "Hand-off committed");
                Ok(Some((turn, conversation)))
            }
            Ok(None) => {
                tx.rollback()
                    .await
                    .map_err(|e| write_err("hand_off: rollback", e))?;
                Ok(None)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(conversation_id = id, error = %rollback, "Hand-off rollback failed");
                }
                Err(e)
            }
        }
    }

    // ── Turns ───────────────────────────────────────────────────────

    async fn append_turn(
        &self,
        conversation_id: ConversationId,
        text: &str,
        origin: TurnOrigin,
    ) -> Result<Turn, DatabaseError> {
        let _write = self.write_lock.lock().await;
        let turn = new_turn(conversation_id, text, origin);
        insert_turn(self.conn(), &turn).await?;
        debug!(conversation_id, origin = origin.as_str(), "Turn appended");
        Ok(turn)
    }

    async fn recent_turns(
        &self,
        conversation_id: ConversationId,
        limit: usize,
    ) -> Result<Vec<Turn>, DatabaseError> {
        let sql = format!(
            "SELECT {TURN_COLUMNS} FROM turns
             WHERE conversation_id = ?1
             ORDER BY seq DESC
             LIMIT ?2"
        );
        self.query_all(
            "recent_turns",
            &sql,
            params![conversation_id, limit as i64],
            row_to_turn,
        )
        .await
    }

    async fn count_turns(
        &self,
        conversation_id: ConversationId,
        origin: TurnOrigin,
    ) -> Result<u64, DatabaseError> {
        let count = self
            .query_one(
                "count_turns",
                "SELECT COUNT(*) FROM turns WHERE conversation_id = ?1 AND origin = ?2",
                params![conversation_id, origin.as_str()],
                |row| row.get::<i64>(0).map_err(|e| read_err("count_turns", e)),
            )
            .await?
            .unwrap_or(0);
        Ok(count.max(0) as u64)
    }
}
