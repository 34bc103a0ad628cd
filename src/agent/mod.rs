//! 对话轮次驱动
//!
//! [`ConversationAgent`] 把一次用户输入编排为完整的一轮：注入用户事实、
//! 读取工具调用安全的历史、调用模型运行时、再把本轮产出写回会话。
//! Agent 本身不持有会话；每次调用由调用方传入对应的 [`SessionMemory`]。

use crate::error::Result;
use crate::llm::types::Message;
use crate::llm::{ModelRuntime, RuntimeReply};
use crate::memory::session::SessionMemory;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 默认系统提示词
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are JARVIS, a voice assistant. Rules:
- Answer in 1-2 sentences max
- No preamble (\"Sure!\", \"Of course!\")
- Use tools when needed, report results directly

If unsure, ask one clarifying question.";

/// 在基础提示词后追加用户事实块；没有事实时原样返回
pub fn build_system_prompt(base: &str, user_facts: &str) -> String {
    if user_facts.is_empty() {
        base.to_string()
    } else {
        format!("{base}\n\nUSER CONTEXT:\n{user_facts}")
    }
}

pub struct ConversationAgent {
    runtime: Arc<dyn ModelRuntime>,
    system_prompt: String,
}

impl ConversationAgent {
    pub fn new(runtime: Arc<dyn ModelRuntime>) -> Self {
        Self {
            runtime,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// 在会话中执行一轮对话，返回回复文本
    ///
    /// 用户消息在调用运行时之前写入；运行时出错时错误直接返回，
    /// 该用户消息保持未应答状态（见 [`SessionMemory::unanswered_user_message`]）。
    pub async fn run_turn(&self, session: &mut SessionMemory, query: &str) -> Result<String> {
        let facts = session.user_facts_formatted().await?;
        let history = session.context_messages().await?;

        let mut request = Vec::with_capacity(history.len() + 2);
        request.push(Message::system(build_system_prompt(
            &self.system_prompt,
            &facts,
        )));
        request.extend(history);
        request.push(Message::user(query.to_string()));

        session.add_user_message(query).await?;
        debug!(
            conversation_id = %session.conversation_id(),
            messages = request.len(),
            "📨 调用模型运行时"
        );

        let reply = match self.runtime.invoke(request).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(conversation_id = %session.conversation_id(), error = %e, "❌ 模型运行时调用失败");
                return Err(e);
            }
        };

        self.persist_reply(session, &reply).await?;
        info!(
            conversation_id = %session.conversation_id(),
            tool_calls = reply.tool_calls.len(),
            "✅ 本轮对话完成"
        );
        Ok(reply.content)
    }

    /// 不带会话的单轮调用：只有系统提示词和当前问题，不写任何记录
    pub async fn ask(&self, query: &str) -> Result<String> {
        let request = vec![
            Message::system(self.system_prompt.clone()),
            Message::user(query.to_string()),
        ];
        Ok(self.runtime.invoke(request).await?.content)
    }

    async fn persist_reply(&self, session: &SessionMemory, reply: &RuntimeReply) -> Result<()> {
        session
            .add_assistant_message(&reply.content, reply.tool_calls.clone())
            .await?;
        for result in &reply.tool_results {
            session
                .add_tool_message(&result.tool_name, &result.content, &result.tool_call_id, None)
                .await?;
        }
        Ok(())
    }
}
