//! 会话记忆管理器
//!
//! 每个 [`SessionMemory`] 绑定一个会话：追加消息、重建工具调用安全的上下文窗口、
//! 自动生成标题。存储通过 `Arc<dyn ConversationStore>` 注入，
//! 不存在进程级的全局会话状态。

use crate::error::Result;
use crate::llm::types::Message;
use crate::memory::facts::format_user_facts;
use crate::memory::store::ConversationStore;
use crate::memory::types::{MessageRole, NewMessage, StoredMessage, ToolCallRecord};
use crate::memory::window::{ContextWindow, safe_sliding_window};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 自动标题的最大字符数
pub const TITLE_MAX_CHARS: usize = 50;
/// 标题被截断时追加的省略号
pub const TITLE_ELLIPSIS: &str = "…";
/// 窗口之外额外读取的最少消息数，用于覆盖一次工具往返
pub const MIN_FETCH_BUFFER: usize = 10;

// ── 配置 ─────────────────────────────────────────────────────────────────────

/// 自动标题策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TitlePolicy {
    /// 每个会话只生成一次：生成后持久化锁定，恢复会话不会重写标题
    #[default]
    PerConversation,
    /// 每个管理器实例生成一次：用新实例恢复同一会话会覆盖之前生成的标题
    PerSession,
}

/// 会话记忆配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// 上下文窗口的目标消息数 `L`
    pub context_window: usize,
    /// 窗口之外额外读取的消息数（不小于 [`MIN_FETCH_BUFFER`]）
    pub fetch_buffer: usize,
    /// 读取批次不足以解析工具调用时是否成倍扩大读取范围
    pub adaptive_fetch: bool,
    pub title_policy: TitlePolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            context_window: 20,
            fetch_buffer: MIN_FETCH_BUFFER,
            adaptive_fetch: true,
            title_policy: TitlePolicy::default(),
        }
    }
}

impl SessionConfig {
    pub fn new(context_window: usize) -> Self {
        Self {
            context_window,
            ..Self::default()
        }
    }

    pub fn fetch_buffer(mut self, buffer: usize) -> Self {
        self.fetch_buffer = buffer;
        self
    }

    pub fn adaptive_fetch(mut self, enabled: bool) -> Self {
        self.adaptive_fetch = enabled;
        self
    }

    pub fn title_policy(mut self, policy: TitlePolicy) -> Self {
        self.title_policy = policy;
        self
    }

    fn initial_fetch(&self) -> usize {
        self.context_window
            .saturating_add(self.fetch_buffer.max(MIN_FETCH_BUFFER))
    }
}

// ── SessionMemory ────────────────────────────────────────────────────────────

/// 单个会话的记忆管理器
///
/// # 示例
///
/// ```rust
/// use jarvis_memory::memory::store::InMemoryConversationStore;
/// use jarvis_memory::memory::{SessionConfig, SessionMemory, ToolCallRecord};
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> jarvis_memory::error::Result<()> {
/// let store = Arc::new(InMemoryConversationStore::new());
/// let mut session = SessionMemory::open(store, None, SessionConfig::new(10)).await?;
///
/// session.add_user_message("2 + 2 等于几？").await?;
/// session
///     .add_assistant_message(
///         "",
///         vec![ToolCallRecord::new("a1", "calc", serde_json::json!({"expr": "2+2"}))],
///     )
///     .await?;
/// session.add_tool_message("calc", "4", "a1", None).await?;
///
/// let messages = session.context_messages().await?;
/// assert_eq!(messages.len(), 3);
/// # Ok(())
/// # }
/// ```
pub struct SessionMemory {
    store: Arc<dyn ConversationStore>,
    conversation_id: String,
    config: SessionConfig,
    /// 本实例是否已经尝试过自动标题
    title_generated: bool,
}

impl SessionMemory {
    /// 绑定会话：给定 ID 存在则恢复，不存在则静默新建；不给 ID 总是新建
    pub async fn open(
        store: Arc<dyn ConversationStore>,
        conversation_id: Option<&str>,
        config: SessionConfig,
    ) -> Result<Self> {
        let conversation_id = match conversation_id {
            Some(id) => match store.get_conversation(id).await? {
                Some(conv) => {
                    info!(conversation_id = %conv.id, "🔁 恢复会话");
                    conv.id
                }
                None => {
                    let new_id = store.create_conversation(None).await?;
                    info!(requested = %id, conversation_id = %new_id, "🆕 会话不存在，已新建");
                    new_id
                }
            },
            None => {
                let new_id = store.create_conversation(None).await?;
                info!(conversation_id = %new_id, "🆕 新建会话");
                new_id
            }
        };
        Ok(Self {
            store,
            conversation_id,
            config,
            title_generated: false,
        })
    }

    /// 恢复最近更新的未归档会话；没有任何会话时新建
    pub async fn resume_latest(
        store: Arc<dyn ConversationStore>,
        config: SessionConfig,
    ) -> Result<Self> {
        let latest = store
            .list_conversations(1, false)
            .await?
            .into_iter()
            .next()
            .map(|c| c.id);
        Self::open(store, latest.as_deref(), config).await
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    // ── 写入 ─────────────────────────────────────────────────────────────────

    /// 追加用户消息；本实例第一次调用时触发自动标题
    ///
    /// 消息写入成功即返回 `Ok`。标题写入失败只记 `warn!`，下一条用户消息会重试，
    /// 调用方不会因为标题失败而重复写入同一条消息。
    pub async fn add_user_message(&mut self, content: &str) -> Result<String> {
        let id = self
            .store
            .add_message(&self.conversation_id, NewMessage::user(content))
            .await?;
        if !self.title_generated
            && let Err(e) = self.generate_title(content).await
        {
            warn!(conversation_id = %self.conversation_id, error = %e, "⚠️ 自动标题写入失败");
        }
        Ok(id)
    }

    /// 追加 assistant 消息；`tool_calls` 为空时不写 metadata
    pub async fn add_assistant_message(
        &self,
        content: &str,
        tool_calls: Vec<ToolCallRecord>,
    ) -> Result<String> {
        self.store
            .add_message(
                &self.conversation_id,
                NewMessage::assistant(content, tool_calls),
            )
            .await
    }

    pub async fn add_tool_message(
        &self,
        tool_name: &str,
        content: &str,
        tool_call_id: &str,
        tool_args: Option<&str>,
    ) -> Result<String> {
        self.store
            .add_message(
                &self.conversation_id,
                NewMessage::tool(tool_name, content, tool_call_id, tool_args.map(String::from)),
            )
            .await
    }

    // ── 上下文 ───────────────────────────────────────────────────────────────

    /// 重建工具调用安全的上下文窗口
    ///
    /// 先读取最近 `L + buffer` 条消息；开启 `adaptive_fetch` 时，若批次已满且仍有
    /// 未解析的工具结果，读取范围加倍重试，直到解析完毕或读到会话开头。
    /// 仍未解析的 ID 通过 [`ContextWindow::unresolved`] 返回，不报错。
    pub async fn context_window(&self) -> Result<ContextWindow> {
        let limit = self.config.context_window;
        if limit == 0 {
            return Ok(ContextWindow {
                messages: Vec::new(),
                unresolved: Vec::new(),
                fetched: 0,
            });
        }

        let mut fetch = self.config.initial_fetch();
        loop {
            let batch = self
                .store
                .get_recent_messages(&self.conversation_id, fetch)
                .await?;
            let fetched = batch.len();
            let reached_start = fetched < fetch;
            let selection = safe_sliding_window(batch, limit);

            if selection.unresolved.is_empty() || reached_start || !self.config.adaptive_fetch {
                if !selection.unresolved.is_empty() {
                    warn!(
                        conversation_id = %self.conversation_id,
                        unresolved = ?selection.unresolved,
                        fetched,
                        "⚠️ 上下文窗口中存在找不到声明方的工具结果"
                    );
                }
                debug!(
                    conversation_id = %self.conversation_id,
                    limit,
                    fetched,
                    window = selection.messages.len(),
                    "🪟 上下文窗口已重建"
                );
                return Ok(ContextWindow {
                    messages: selection.messages,
                    unresolved: selection.unresolved,
                    fetched,
                });
            }

            debug!(
                conversation_id = %self.conversation_id,
                fetch,
                pending = selection.unresolved.len(),
                "🔍 工具调用未解析，扩大读取范围"
            );
            fetch = fetch.saturating_mul(2);
        }
    }

    /// 上下文窗口的运行时原生消息
    pub async fn context_messages(&self) -> Result<Vec<Message>> {
        Ok(self.context_window().await?.to_llm_messages())
    }

    // ── 查询 ─────────────────────────────────────────────────────────────────

    pub async fn title(&self) -> Result<Option<String>> {
        Ok(self
            .store
            .get_conversation(&self.conversation_id)
            .await?
            .and_then(|c| c.title))
    }

    /// 用户长期事实的提示词文本；没有事实时为空字符串
    pub async fn user_facts_formatted(&self) -> Result<String> {
        let facts = self.store.get_user_facts(None).await?;
        Ok(format_user_facts(&facts))
    }

    pub async fn is_new_conversation(&self) -> Result<bool> {
        Ok(self
            .store
            .get_recent_messages(&self.conversation_id, 1)
            .await?
            .is_empty())
    }

    /// 最新一条消息是用户消息时返回它（上一轮调用中断后留下的未应答轮次）
    pub async fn unanswered_user_message(&self) -> Result<Option<StoredMessage>> {
        Ok(self
            .store
            .get_recent_messages(&self.conversation_id, 1)
            .await?
            .into_iter()
            .next()
            .filter(|m| m.role() == MessageRole::User))
    }

    // ── 标题 ─────────────────────────────────────────────────────────────────

    async fn generate_title(&mut self, first_message: &str) -> Result<()> {
        if self.config.title_policy == TitlePolicy::PerConversation {
            let locked = self
                .store
                .get_conversation(&self.conversation_id)
                .await?
                .is_none_or(|c| c.title_locked);
            if locked {
                self.title_generated = true;
                return Ok(());
            }
        }

        let title = truncate_title(first_message);
        self.store
            .update_conversation_title(&self.conversation_id, &title)
            .await?;
        if self.config.title_policy == TitlePolicy::PerConversation {
            self.store
                .lock_conversation_title(&self.conversation_id)
                .await?;
        }
        self.title_generated = true;
        info!(conversation_id = %self.conversation_id, title = %title, "🏷️ 会话标题已生成");
        Ok(())
    }
}

/// 取前 [`TITLE_MAX_CHARS`] 个字符，超长时追加省略号
pub fn truncate_title(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(TITLE_MAX_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}{TITLE_ELLIPSIS}")
    } else {
        head
    }
}
