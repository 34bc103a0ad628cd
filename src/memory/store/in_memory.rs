use super::ConversationStore;
use super::tables::StoreTables;
use crate::error::Result;
use crate::memory::types::{Conversation, NewMessage, StoredMessage, UserFact};
use async_trait::async_trait;
use tokio::sync::RwLock;

/// 进程内存 Store，不持久化，适合测试和短生命周期使用
///
/// # 示例
///
/// ```rust
/// use jarvis_memory::memory::store::{ConversationStore, InMemoryConversationStore};
/// use jarvis_memory::memory::NewMessage;
///
/// # #[tokio::main]
/// # async fn main() -> jarvis_memory::error::Result<()> {
/// let store = InMemoryConversationStore::new();
/// let id = store.create_conversation(None).await?;
/// store.add_message(&id, NewMessage::user("hello")).await?;
/// assert_eq!(store.get_messages(&id, 10).await?.len(), 1);
/// # Ok(())
/// # }
/// ```
pub struct InMemoryConversationStore {
    tables: RwLock<StoreTables>,
}

impl Default for InMemoryConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(StoreTables::default()),
        }
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn create_conversation(&self, title: Option<&str>) -> Result<String> {
        Ok(self.tables.write().await.create_conversation(title))
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
        self.tables
            .write()
            .await
            .update_conversation_title(id, title)
    }

    async fn lock_conversation_title(&self, id: &str) -> Result<()> {
        self.tables.write().await.lock_conversation_title(id)
    }

    async fn archive_conversation(&self, id: &str) -> Result<()> {
        self.tables.write().await.archive_conversation(id)
    }

    async fn add_message(&self, conversation_id: &str, message: NewMessage) -> Result<String> {
        self.tables
            .write()
            .await
            .add_message(conversation_id, message)
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
        self.tables
            .write()
            .await
            .set_user_fact(fact_type, key, value, confidence)
    }

    async fn get_user_facts(&self, fact_type: Option<&str>) -> Result<Vec<UserFact>> {
        Ok(self.tables.read().await.get_user_facts(fact_type))
    }
}
