use super::{ConversationStore, expand_tilde, new_id, next_timestamp, validate_confidence};
use crate::error::{Result, StoreError};
use crate::memory::types::{
    Conversation, MessageKind, MessageRole, NewMessage, StoredMessage, UserFact,
    encode_tool_calls,
};
use async_trait::async_trait;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS conversations (
    id TEXT PRIMARY KEY,
    title TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    archived INTEGER NOT NULL DEFAULT 0,
    title_locked INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS messages (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
    role TEXT NOT NULL CHECK(role IN ('user', 'assistant', 'tool', 'system')),
    content TEXT NOT NULL,
    message_type TEXT NOT NULL DEFAULT 'text',
    tool_name TEXT,
    tool_args TEXT,
    tool_call_id TEXT,
    metadata TEXT,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS user_facts (
    id TEXT PRIMARY KEY,
    fact_type TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    confidence REAL NOT NULL DEFAULT 1.0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    UNIQUE(fact_type, key)
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id, created_at);
CREATE INDEX IF NOT EXISTS idx_conversations_updated ON conversations(updated_at);
CREATE INDEX IF NOT EXISTS idx_user_facts_type ON user_facts(fact_type);
"#;

const CONVERSATION_COLUMNS: &str = "id, title, created_at, updated_at, archived, title_locked";
const MESSAGE_COLUMNS: &str = "id, conversation_id, role, content, message_type, \
     tool_name, tool_args, tool_call_id, metadata, created_at";
const FACT_COLUMNS: &str = "id, fact_type, key, value, confidence, created_at, updated_at";

struct SqliteInner {
    conn: Connection,
    /// 最近一次发出的时间戳
    clock: u64,
}

/// 基于 SQLite 的持久化 Store
///
/// 单连接、互斥访问；每次调用在 `spawn_blocking` 中执行并各自提交，
/// 不跨调用持有事务。
pub struct SqliteConversationStore {
    inner: Arc<Mutex<SqliteInner>>,
}

impl SqliteConversationStore {
    /// 打开或创建数据库文件，自动建父目录和表结构
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = expand_tilde(path.as_ref());
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Io(format!("创建目录失败: {e}")))?;
        }
        let conn = Connection::open(&path)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(journal_mode = %mode, "SQLite journal mode");
        let store = Self::init(conn)?;
        info!(path = %path.display(), "🗄️ SqliteConversationStore 初始化");
        Ok(store)
    }

    /// 内存数据库，进程退出即丢失
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        let clock: Option<i64> = conn.query_row(
            "SELECT MAX(ts) FROM (
                SELECT MAX(updated_at) AS ts FROM conversations
                UNION ALL SELECT MAX(created_at) FROM messages
                UNION ALL SELECT MAX(updated_at) FROM user_facts
            )",
            [],
            |row| row.get(0),
        )?;
        Ok(Self {
            inner: Arc::new(Mutex::new(SqliteInner {
                conn,
                clock: clock.unwrap_or(0).max(0) as u64,
            })),
        })
    }

    async fn call<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut SqliteInner) -> Result<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let mut guard = inner
                .lock()
                .map_err(|_| StoreError::Backend("sqlite connection mutex poisoned".to_string()))?;
            f(&mut guard)
        })
        .await?
    }
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn row_to_conversation(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        title: row.get(1)?,
        created_at: row.get::<_, i64>(2)? as u64,
        updated_at: row.get::<_, i64>(3)? as u64,
        archived: row.get(4)?,
        title_locked: row.get(5)?,
    })
}

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<StoredMessage> {
    let role: String = row.get(2)?;
    let role: MessageRole = role.parse().map_err(|e: StoreError| {
        rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e))
    })?;
    let metadata: Option<String> = row.get(8)?;
    Ok(StoredMessage {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        content: row.get(3)?,
        message_type: row.get(4)?,
        kind: MessageKind::from_columns(
            role,
            row.get(5)?,
            row.get(6)?,
            row.get(7)?,
            metadata.as_deref(),
        ),
        created_at: row.get::<_, i64>(9)? as u64,
    })
}

fn row_to_fact(row: &Row<'_>) -> rusqlite::Result<UserFact> {
    Ok(UserFact {
        id: row.get(0)?,
        fact_type: row.get(1)?,
        key: row.get(2)?,
        value: row.get(3)?,
        confidence: row.get(4)?,
        created_at: row.get::<_, i64>(5)? as u64,
        updated_at: row.get::<_, i64>(6)? as u64,
    })
}

/// 对单个会话执行 UPDATE，未命中任何行时报告会话不存在
fn update_conversation(
    conn: &Connection,
    sql: &str,
    id: &str,
    value: &dyn rusqlite::ToSql,
) -> Result<()> {
    let changed = conn.execute(sql, params![value, id])?;
    if changed == 0 {
        return Err(StoreError::ConversationNotFound(id.to_string()).into());
    }
    Ok(())
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn create_conversation(&self, title: Option<&str>) -> Result<String> {
        let title = title.map(String::from);
        self.call(move |inner| {
            let now = next_timestamp(&mut inner.clock) as i64;
            let id = new_id();
            inner.conn.execute(
                "INSERT INTO conversations
                 (id, title, created_at, updated_at, archived, title_locked)
                 VALUES (?1, ?2, ?3, ?3, 0, ?4)",
                params![id, title, now, title.is_some()],
            )?;
            debug!(conversation_id = %id, "🆕 新建会话");
            Ok(id)
        })
        .await
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        let id = id.to_string();
        self.call(move |inner| {
            let conv = inner
                .conn
                .query_row(
                    &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"),
                    params![id],
                    row_to_conversation,
                )
                .optional()?;
            Ok(conv)
        })
        .await
    }

    async fn list_conversations(
        &self,
        limit: usize,
        include_archived: bool,
    ) -> Result<Vec<Conversation>> {
        self.call(move |inner| {
            let filter = if include_archived {
                ""
            } else {
                "WHERE archived = 0"
            };
            let mut stmt = inner.conn.prepare(&format!(
                "SELECT {CONVERSATION_COLUMNS} FROM conversations {filter}
                 ORDER BY updated_at DESC, created_at DESC LIMIT ?1"
            ))?;
            let rows = stmt
                .query_map(params![sql_limit(limit)], row_to_conversation)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn update_conversation_title(&self, id: &str, title: &str) -> Result<()> {
        let id = id.to_string();
        let title = title.to_string();
        self.call(move |inner| {
            update_conversation(
                &inner.conn,
                "UPDATE conversations SET title = ?1 WHERE id = ?2",
                &id,
                &title,
            )
        })
        .await
    }

    async fn lock_conversation_title(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.call(move |inner| {
            update_conversation(
                &inner.conn,
                "UPDATE conversations SET title_locked = ?1 WHERE id = ?2",
                &id,
                &true,
            )
        })
        .await
    }

    async fn archive_conversation(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.call(move |inner| {
            update_conversation(
                &inner.conn,
                "UPDATE conversations SET archived = ?1 WHERE id = ?2",
                &id,
                &true,
            )
        })
        .await
    }

    async fn add_message(&self, conversation_id: &str, message: NewMessage) -> Result<String> {
        let conversation_id = conversation_id.to_string();
        self.call(move |inner| {
            let (tool_name, tool_args, tool_call_id, metadata) = match &message.kind {
                MessageKind::Tool {
                    tool_call_id,
                    tool_name,
                    tool_args,
                } => (tool_name.clone(), tool_args.clone(), tool_call_id.clone(), None),
                MessageKind::Assistant { tool_calls } => {
                    (None, None, None, encode_tool_calls(tool_calls)?)
                }
                MessageKind::User | MessageKind::System => (None, None, None, None),
            };

            let now = next_timestamp(&mut inner.clock) as i64;
            let id = new_id();
            let tx = inner.conn.transaction()?;
            let touched = tx.execute(
                "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
                params![now, conversation_id],
            )?;
            if touched == 0 {
                return Err(StoreError::ConversationNotFound(conversation_id).into());
            }
            tx.execute(
                "INSERT INTO messages
                 (id, conversation_id, role, content, message_type,
                  tool_name, tool_args, tool_call_id, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    id,
                    conversation_id,
                    message.kind.role().as_str(),
                    message.content,
                    message.message_type,
                    tool_name,
                    tool_args,
                    tool_call_id,
                    metadata,
                    now
                ],
            )?;
            tx.commit()?;
            Ok(id)
        })
        .await
    }

    async fn get_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>> {
        let conversation_id = conversation_id.to_string();
        self.call(move |inner| {
            let mut stmt = inner.conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE conversation_id = ?1
                 ORDER BY created_at ASC, seq ASC LIMIT ?2"
            ))?;
            let rows = stmt
                .query_map(params![conversation_id, sql_limit(limit)], row_to_message)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn get_recent_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>> {
        let conversation_id = conversation_id.to_string();
        self.call(move |inner| {
            let mut stmt = inner.conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM (
                    SELECT seq, {MESSAGE_COLUMNS} FROM messages
                    WHERE conversation_id = ?1
                    ORDER BY created_at DESC, seq DESC LIMIT ?2
                 ) ORDER BY created_at ASC, seq ASC"
            ))?;
            let rows = stmt
                .query_map(params![conversation_id, sql_limit(limit)], row_to_message)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn set_user_fact(
        &self,
        fact_type: &str,
        key: &str,
        value: &str,
        confidence: f64,
    ) -> Result<()> {
        validate_confidence(confidence)?;
        let (fact_type, key, value) = (fact_type.to_string(), key.to_string(), value.to_string());
        self.call(move |inner| {
            let now = next_timestamp(&mut inner.clock) as i64;
            inner.conn.execute(
                "INSERT INTO user_facts
                 (id, fact_type, key, value, confidence, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                 ON CONFLICT(fact_type, key) DO UPDATE SET
                    value = excluded.value,
                    confidence = excluded.confidence,
                    updated_at = excluded.updated_at",
                params![new_id(), fact_type, key, value, confidence, now],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_user_facts(&self, fact_type: Option<&str>) -> Result<Vec<UserFact>> {
        let fact_type = fact_type.map(String::from);
        self.call(move |inner| {
            let rows = match fact_type {
                Some(t) => {
                    let mut stmt = inner.conn.prepare(&format!(
                        "SELECT {FACT_COLUMNS} FROM user_facts WHERE fact_type = ?1
                         ORDER BY updated_at DESC"
                    ))?;
                    let facts = stmt
                        .query_map(params![t], row_to_fact)?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    facts
                }
                None => {
                    let mut stmt = inner.conn.prepare(&format!(
                        "SELECT {FACT_COLUMNS} FROM user_facts ORDER BY fact_type, key"
                    ))?;
                    let facts = stmt
                        .query_map([], row_to_fact)?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    facts
                }
            };
            Ok(rows)
        })
        .await
    }
}
