//! 会话记忆系统
//!
//! | 层次 | 实现 | 作用 |
//! |------|------|------|
//! | 持久化 | [`ConversationStore`]（SQLite / 文件 / 内存） | 会话、消息、用户事实 |
//! | 上下文窗口 | [`safe_sliding_window`] | 截取最近消息，不拆开工具调用与其结果 |
//! | 会话管理 | [`SessionMemory`] | 追加消息、重建窗口、自动标题 |
//! | 事实注入 | [`format_user_facts`] | 用户事实渲染为系统提示词文本 |
//!
//! ```rust,no_run
//! use jarvis_memory::memory::store::SqliteConversationStore;
//! use jarvis_memory::memory::{SessionConfig, SessionMemory};
//! use std::sync::Arc;
//!
//! # async fn example() -> jarvis_memory::error::Result<()> {
//! let store = Arc::new(SqliteConversationStore::open("~/.jarvis/jarvis.db")?);
//! let mut session = SessionMemory::resume_latest(store, SessionConfig::new(20)).await?;
//! session.add_user_message("提醒我明天开会").await?;
//! let history = session.context_messages().await?;
//! # Ok(())
//! # }
//! ```

pub mod facts;
pub mod session;
pub mod store;
pub mod types;
pub mod window;

pub use facts::format_user_facts;
pub use session::{SessionConfig, SessionMemory, TitlePolicy};
pub use store::{
    ConversationStore, FileConversationStore, InMemoryConversationStore,
    SqliteConversationStore,
};
pub use types::{
    Conversation, MessageKind, MessageRole, NewMessage, StoredMessage, ToolCallRecord,
    ToolResultRecord, UserFact,
};
pub use window::{ContextWindow, WindowSelection, safe_sliding_window};
