//! 持久化存储
//!
//! 会话、消息和用户长期事实的增/查/改原语，不含业务逻辑。
//!
//! ## 内置实现
//!
//! | 类型 | 说明 |
//! |------|------|
//! | [`InMemoryConversationStore`] | 进程内存，重启即清空，适合测试 |
//! | [`FileConversationStore`] | JSON 文件持久化，适合本地单机场景 |
//! | [`SqliteConversationStore`] | SQLite 持久化，每次调用一个事务 |
//!
//! ## 快速上手
//!
//! ```rust,no_run
//! use jarvis_memory::memory::store::{ConversationStore, SqliteConversationStore};
//! use jarvis_memory::memory::NewMessage;
//! use std::sync::Arc;
//!
//! # async fn example() -> jarvis_memory::error::Result<()> {
//! let store = Arc::new(SqliteConversationStore::open("~/.jarvis/jarvis.db")?);
//! let id = store.create_conversation(None).await?;
//! store.add_message(&id, NewMessage::user("明天提醒我交房租")).await?;
//! let recent = store.get_recent_messages(&id, 10).await?;
//! # Ok(())
//! # }
//! ```

#[cfg(test)]
pub(crate) mod contract;
mod file;
mod in_memory;
mod sqlite;
mod tables;

pub use file::FileConversationStore;
pub use in_memory::InMemoryConversationStore;
pub use sqlite::SqliteConversationStore;

use crate::error::{Result, StoreError};
use crate::memory::types::{Conversation, NewMessage, StoredMessage, UserFact};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

// ── ConversationStore trait ──────────────────────────────────────────────────

/// 会话记忆的统一存储接口
///
/// 每个操作都是原子的；读不到的会话返回 `None`，
/// 写操作引用不存在的会话返回 [`StoreError::ConversationNotFound`]。
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// 新建会话，返回其 ID；给定标题时标题同时被锁定
    async fn create_conversation(&self, title: Option<&str>) -> Result<String>;

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>>;

    /// 按 `updated_at` 倒序列出会话
    async fn list_conversations(
        &self,
        limit: usize,
        include_archived: bool,
    ) -> Result<Vec<Conversation>>;

    /// 修改标题，不改变 `updated_at`
    async fn update_conversation_title(&self, id: &str, title: &str) -> Result<()>;

    /// 锁定标题，之后自动生成不再覆盖
    async fn lock_conversation_title(&self, id: &str) -> Result<()>;

    /// 软删除（归档）
    async fn archive_conversation(&self, id: &str) -> Result<()>;

    /// 追加消息并前移会话的 `updated_at`，返回消息 ID
    async fn add_message(&self, conversation_id: &str, message: NewMessage) -> Result<String>;

    /// 最早的 `limit` 条消息，按时间正序
    async fn get_messages(&self, conversation_id: &str, limit: usize)
    -> Result<Vec<StoredMessage>>;

    /// 最新的 `limit` 条消息，按时间正序返回
    ///
    /// 这是朴素的尾部截断，可能把一对工具调用/结果切开，
    /// 不能直接作为模型输入。
    async fn get_recent_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>>;

    /// 按 `(fact_type, key)` 写入或更新长期事实
    async fn set_user_fact(
        &self,
        fact_type: &str,
        key: &str,
        value: &str,
        confidence: f64,
    ) -> Result<()>;

    /// 不过滤时按 `(fact_type, key)` 排序；按类型过滤时按 `updated_at` 倒序
    async fn get_user_facts(&self, fact_type: Option<&str>) -> Result<Vec<UserFact>>;
}

// ── 工具函数 ─────────────────────────────────────────────────────────────────

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// 严格递增的时钟：同一毫秒内多次写入也能区分先后
pub(crate) fn next_timestamp(last: &mut u64) -> u64 {
    let ts = now_millis().max(*last + 1);
    *last = ts;
    ts
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub(crate) fn validate_confidence(confidence: f64) -> Result<()> {
    if (0.0..=1.0).contains(&confidence) {
        Ok(())
    } else {
        Err(StoreError::InvalidRecord(format!(
            "confidence must be within 0..=1, got {}",
            confidence
        ))
        .into())
    }
}

pub(crate) fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/")
        && let Some(home) = std::env::var("HOME")
            .ok()
            .or_else(|| std::env::var("USERPROFILE").ok())
    {
        return PathBuf::from(home).join(rest);
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_timestamp_strictly_increases() {
        let mut last = 0;
        let a = next_timestamp(&mut last);
        let b = next_timestamp(&mut last);
        let c = next_timestamp(&mut last);
        assert!(a < b && b < c);
    }

    #[test]
    fn test_validate_confidence() {
        assert!(validate_confidence(0.0).is_ok());
        assert!(validate_confidence(1.0).is_ok());
        assert!(validate_confidence(1.5).is_err());
        assert!(validate_confidence(f64::NAN).is_err());
    }

    #[test]
    fn test_expand_tilde_leaves_plain_paths() {
        assert_eq!(
            expand_tilde(Path::new("/tmp/jarvis.db")),
            PathBuf::from("/tmp/jarvis.db")
        );
    }
}
