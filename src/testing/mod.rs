//! 测试基础设施
//!
//! | 类型 | 用途 |
//! |------|------|
//! | [`MockRuntime`] | 替代真实模型运行时，用于测试 [`ConversationAgent`](crate::agent::ConversationAgent) 的轮次编排 |
//!
//! 存储层测试直接使用 [`InMemoryConversationStore`](crate::memory::store::InMemoryConversationStore)
//! 或基于 `tempfile` 的 SQLite / 文件存储，不需要额外的 Mock。

mod mock_runtime;

pub use mock_runtime::MockRuntime;
