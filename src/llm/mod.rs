//! 模型运行时接口
//!
//! 记忆层只关心模型运行时的一次调用：给定完整的消息列表，返回回复文本、
//! 本轮发起的工具调用以及已执行的工具结果。具体的 LLM / 工具执行由实现方负责。

pub mod types;

use crate::error::Result;
use crate::llm::types::Message;
use crate::memory::types::{ToolCallRecord, ToolResultRecord};
use async_trait::async_trait;

/// 一次运行时调用的产出
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuntimeReply {
    /// 最终回复文本
    pub content: String,
    /// assistant 在本轮声明的工具调用
    pub tool_calls: Vec<ToolCallRecord>,
    /// 工具执行结果，按执行顺序
    pub tool_results: Vec<ToolResultRecord>,
}

impl RuntimeReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn with_tool_call(mut self, call: ToolCallRecord, result: impl Into<String>) -> Self {
        self.tool_results.push(ToolResultRecord {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            content: result.into(),
        });
        self.tool_calls.push(call);
        self
    }
}

/// 对话模型运行时
#[async_trait]
pub trait ModelRuntime: Send + Sync {
    /// 以完整上下文调用模型（可能在内部执行若干工具）
    async fn invoke(&self, messages: Vec<Message>) -> Result<RuntimeReply>;
}
