//! Mock 模型运行时，用于在不接入真实 LLM 的情况下测试 [`ConversationAgent`](crate::agent::ConversationAgent)。
//!
//! # 示例
//!
//! ```rust
//! use jarvis_memory::testing::MockRuntime;
//! use jarvis_memory::llm::ModelRuntime;
//! use jarvis_memory::llm::types::Message;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let mock = MockRuntime::new()
//!     .with_text("第一次回复")
//!     .with_text("第二次回复");
//!
//! let r1 = mock.invoke(vec![Message::user("hi".to_string())]).await.unwrap();
//! assert_eq!(r1.content, "第一次回复");
//! assert_eq!(mock.call_count(), 1);
//! # }
//! ```

use crate::error::{JarvisError, LlmError, Result};
use crate::llm::types::Message;
use crate::llm::{ModelRuntime, RuntimeReply};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

enum MockReply {
    Reply(RuntimeReply),
    Err(JarvisError),
}

/// 可脚本化的 Mock 运行时。
///
/// 按顺序返回预设的回复；队列耗尽后返回 `EmptyResponse` 错误。
/// 每次调用收到的完整消息列表都会被记录。
pub struct MockRuntime {
    replies: Arc<Mutex<VecDeque<MockReply>>>,
    calls: Arc<Mutex<Vec<Vec<Message>>>>,
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRuntime {
    pub fn new() -> Self {
        Self {
            replies: Arc::new(Mutex::new(VecDeque::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// 追加一条纯文本回复
    pub fn with_text(self, text: impl Into<String>) -> Self {
        self.with_reply(RuntimeReply::text(text))
    }

    /// 追加一条完整回复（可带工具调用与结果）
    pub fn with_reply(self, reply: RuntimeReply) -> Self {
        self.replies
            .lock()
            .unwrap()
            .push_back(MockReply::Reply(reply));
        self
    }

    pub fn with_error(self, err: JarvisError) -> Self {
        self.replies.lock().unwrap().push_back(MockReply::Err(err));
        self
    }

    /// 追加一条网络错误
    pub fn with_network_error(self, msg: impl Into<String>) -> Self {
        self.with_error(JarvisError::Llm(LlmError::NetworkError(msg.into())))
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// 最后一次调用时传入的 messages
    pub fn last_messages(&self) -> Option<Vec<Message>> {
        self.calls.lock().unwrap().last().cloned()
    }

    /// 剩余未消费的预设回复数量
    pub fn remaining(&self) -> usize {
        self.replies.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelRuntime for MockRuntime {
    async fn invoke(&self, messages: Vec<Message>) -> Result<RuntimeReply> {
        self.calls.lock().unwrap().push(messages);

        match self.replies.lock().unwrap().pop_front() {
            Some(MockReply::Reply(reply)) => Ok(reply),
            Some(MockReply::Err(e)) => Err(e),
            None => Err(JarvisError::Llm(LlmError::EmptyResponse)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_exhausted_queue_returns_empty_response() {
        let mock = MockRuntime::new().with_network_error("超时");
        assert!(matches!(
            mock.invoke(vec![]).await,
            Err(JarvisError::Llm(LlmError::NetworkError(_)))
        ));
        assert!(matches!(
            mock.invoke(vec![]).await,
            Err(JarvisError::Llm(LlmError::EmptyResponse))
        ));
        assert_eq!(mock.call_count(), 2);
        assert_eq!(mock.remaining(), 0);
    }
}
