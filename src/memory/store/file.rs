use super::tables::StoreTables;
use super::{ConversationStore, expand_tilde};
use crate::error::{Result, StoreError};
use crate::memory::types::{Conversation, NewMessage, StoredMessage, UserFact};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// 基于 JSON 文件的持久化 Store
///
/// 写时立即落盘（先写临时文件再原子替换），读时从内存缓存返回。
/// 写操作在表的副本上执行，落盘成功后才替换内存状态；落盘失败时调用方看不到任何改动。
///
/// 存储格式：
/// ```json
/// {
///   "conversations": { "<id>": { "id": "...", "title": "...", "created_at": 123, ... } },
///   "messages": { "<conversation_id>": [ { "id": "...", "kind": { "role": "user" }, ... } ] },
///   "facts": [ { "fact_type": "pref", "key": "color", "value": "blue", ... } ],
///   "clock": 123
/// }
/// ```
pub struct FileConversationStore {
    path: PathBuf,
    tables: RwLock<StoreTables>,
}

impl FileConversationStore {
    /// 打开或创建 Store 文件，自动建父目录
    ///
    /// 已存在但无法解析的文件会返回错误，而不是被空状态覆盖。
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = expand_tilde(path.as_ref());
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Io(format!("创建目录失败: {e}")))?;
        }
        let tables: StoreTables = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| StoreError::Io(format!("读取 store 文件失败: {e}")))?;
            if raw.trim().is_empty() {
                StoreTables::default()
            } else {
                serde_json::from_str(&raw).map_err(|e| {
                    StoreError::Serialization(format!("解析 store 文件失败: {e}"))
                })?
            }
        } else {
            StoreTables::default()
        };
        info!(
            path = %path.display(),
            conversations = tables.conversation_count(),
            messages = tables.message_count(),
            "🗄️ FileConversationStore 初始化"
        );
        Ok(Self {
            path,
            tables: RwLock::new(tables),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn flush(&self, tables: &StoreTables) -> Result<()> {
        let json = serde_json::to_string_pretty(tables)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| StoreError::Io(format!("写入 store 文件失败: {e}")))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| StoreError::Io(format!("替换 store 文件失败: {e}")))?;
        debug!(path = %self.path.display(), "💾 Store 已持久化");
        Ok(())
    }

    /// 在副本上执行写操作并落盘，成功后再替换内存中的表
    async fn commit<T>(&self, op: impl FnOnce(&mut StoreTables) -> Result<T>) -> Result<T> {
        let mut tables = self.tables.write().await;
        let mut staged = tables.clone();
        let out = op(&mut staged)?;
        self.flush(&staged).await?;
        *tables = staged;
        Ok(out)
    }
}

#[async_trait]
impl ConversationStore for FileConversationStore {
    async fn create_conversation(&self, title: Option<&str>) -> Result<String> {
        self.commit(|tables| Ok(tables.create_conversation(title))).await
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        Ok(self.tables.read().await.get_conversation(id))
    }

    async fn list_conversations(
        &self,
        limit: usize,
        include_archived: bool,
    ) -> Result<Vec<Conversation>> {
        Ok(self
            .tables
            .read()
            .await
            .list_conversations(limit, include_archived))
    }

    async fn update_conversation_title(&self, id: &str, title: &str) -> Result<()> {
        self.commit(|tables| tables.update_conversation_title(id, title)).await
    }

    async fn lock_conversation_title(&self, id: &str) -> Result<()> {
        self.commit(|tables| tables.lock_conversation_title(id)).await
    }

    async fn archive_conversation(&self, id: &str) -> Result<()> {
        self.commit(|tables| tables.archive_conversation(id)).await
    }

    async fn add_message(&self, conversation_id: &str, message: NewMessage) -> Result<String> {
        self.commit(|tables| tables.add_message(conversation_id, message)).await
    }

    async fn get_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>> {
        Ok(self.tables.read().await.get_messages(conversation_id, limit))
    }

    async fn get_recent_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>> {
        Ok(self
            .tables
            .read()
            .await
            .get_recent_messages(conversation_id, limit))
    }

    async fn set_user_fact(
        &self,
        fact_type: &str,
        key: &str,
        value: &str,
        confidence: f64,
    ) -> Result<()> {
        self.commit(|tables| tables.set_user_fact(fact_type, key, value, confidence)).await
    }

    async fn get_user_facts(&self, fact_type: Option<&str>) -> Result<Vec<UserFact>> {
        Ok(self.tables.read().await.get_user_facts(fact_type))
    }
}
