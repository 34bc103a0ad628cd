//! 内存表：[`InMemoryConversationStore`](super::InMemoryConversationStore) 与
//! [`FileConversationStore`](super::FileConversationStore) 共用的数据和操作

use super::{new_id, next_timestamp, validate_confidence};
use crate::error::{Result, StoreError};
use crate::memory::types::{Conversation, NewMessage, StoredMessage, UserFact};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct StoreTables {
    #[serde(default)]
    conversations: HashMap<String, Conversation>,
    /// conversation_id → 按写入顺序排列的消息
    #[serde(default)]
    messages: HashMap<String, Vec<StoredMessage>>,
    #[serde(default)]
    facts: Vec<UserFact>,
    /// 最近一次发出的时间戳
    #[serde(default)]
    clock: u64,
}

impl StoreTables {
    pub(crate) fn conversation_count(&self) -> usize {
        self.conversations.len()
    }

    pub(crate) fn message_count(&self) -> usize {
        self.messages.values().map(Vec::len).sum()
    }

    pub(crate) fn create_conversation(&mut self, title: Option<&str>) -> String {
        let now = next_timestamp(&mut self.clock);
        let id = new_id();
        self.conversations.insert(
            id.clone(),
            Conversation {
                id: id.clone(),
                title: title.map(String::from),
                created_at: now,
                updated_at: now,
                archived: false,
                title_locked: title.is_some(),
            },
        );
        id
    }

    pub(crate) fn get_conversation(&self, id: &str) -> Option<Conversation> {
        self.conversations.get(id).cloned()
    }

    pub(crate) fn list_conversations(
        &self,
        limit: usize,
        include_archived: bool,
    ) -> Vec<Conversation> {
        let mut list: Vec<Conversation> = self
            .conversations
            .values()
            .filter(|c| include_archived || !c.archived)
            .cloned()
            .collect();
        list.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        list.truncate(limit);
        list
    }

    fn conversation_mut(&mut self, id: &str) -> Result<&mut Conversation> {
        self.conversations
            .get_mut(id)
            .ok_or_else(|| StoreError::ConversationNotFound(id.to_string()).into())
    }

    pub(crate) fn update_conversation_title(&mut self, id: &str, title: &str) -> Result<()> {
        self.conversation_mut(id)?.title = Some(title.to_string());
        Ok(())
    }

    pub(crate) fn lock_conversation_title(&mut self, id: &str) -> Result<()> {
        self.conversation_mut(id)?.title_locked = true;
        Ok(())
    }

    pub(crate) fn archive_conversation(&mut self, id: &str) -> Result<()> {
        self.conversation_mut(id)?.archived = true;
        Ok(())
    }

    pub(crate) fn add_message(
        &mut self,
        conversation_id: &str,
        message: NewMessage,
    ) -> Result<String> {
        if !self.conversations.contains_key(conversation_id) {
            return Err(StoreError::ConversationNotFound(conversation_id.to_string()).into());
        }
        let now = next_timestamp(&mut self.clock);
        self.conversation_mut(conversation_id)?.updated_at = now;

        let id = new_id();
        self.messages
            .entry(conversation_id.to_string())
            .or_default()
            .push(StoredMessage {
                id: id.clone(),
                conversation_id: conversation_id.to_string(),
                kind: message.kind,
                content: message.content,
                message_type: message.message_type,
                created_at: now,
            });
        Ok(id)
    }

    pub(crate) fn get_messages(&self, conversation_id: &str, limit: usize) -> Vec<StoredMessage> {
        self.messages
            .get(conversation_id)
            .map(|msgs| msgs.iter().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn get_recent_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Vec<StoredMessage> {
        self.messages
            .get(conversation_id)
            .map(|msgs| msgs[msgs.len().saturating_sub(limit)..].to_vec())
            .unwrap_or_default()
    }

    pub(crate) fn set_user_fact(
        &mut self,
        fact_type: &str,
        key: &str,
        value: &str,
        confidence: f64,
    ) -> Result<()> {
        validate_confidence(confidence)?;
        let now = next_timestamp(&mut self.clock);
        match self
            .facts
            .iter_mut()
            .find(|f| f.fact_type == fact_type && f.key == key)
        {
            Some(fact) => {
                fact.value = value.to_string();
                fact.confidence = confidence;
                fact.updated_at = now;
            }
            None => self.facts.push(UserFact {
                id: new_id(),
                fact_type: fact_type.to_string(),
                key: key.to_string(),
                value: value.to_string(),
                confidence,
                created_at: now,
                updated_at: now,
            }),
        }
        Ok(())
    }

    pub(crate) fn get_user_facts(&self, fact_type: Option<&str>) -> Vec<UserFact> {
        match fact_type {
            Some(t) => {
                let mut facts: Vec<UserFact> = self
                    .facts
                    .iter()
                    .filter(|f| f.fact_type == t)
                    .cloned()
                    .collect();
                facts.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
                facts
            }
            None => {
                let mut facts = self.facts.clone();
                facts.sort_by(|a, b| {
                    a.fact_type
                        .cmp(&b.fact_type)
                        .then_with(|| a.key.cmp(&b.key))
                });
                facts
            }
        }
    }
}
