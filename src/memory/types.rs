//! 会话记忆的持久化数据模型
//!
//! 所有时间戳均为 Unix 毫秒。

use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// 消息的默认类型标记
pub const DEFAULT_MESSAGE_TYPE: &str = "text";

// ── Conversation ─────────────────────────────────────────────────────────────

/// 一段持久化会话
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: Option<String>,
    pub created_at: u64,
    /// 每次追加消息时前移，读操作和改标题都不会改变它
    pub updated_at: u64,
    /// 软删除标记
    #[serde(default)]
    pub archived: bool,
    /// 标题已锁定，自动生成不再覆盖
    #[serde(default)]
    pub title_locked: bool,
}

// ── 工具调用描述 ─────────────────────────────────────────────────────────────

/// assistant 消息声明的一次工具调用 `{id, name, args}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

impl ToolCallRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>, args: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            args,
        }
    }
}

/// 工具执行结果，由模型运行时回传，随后写回会话
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultRecord {
    pub tool_call_id: String,
    pub tool_name: String,
    pub content: String,
}

// ── 角色 ─────────────────────────────────────────────────────────────────────

/// 消息角色（存储列的取值）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    Tool,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
            MessageRole::System => "system",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageRole {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            "tool" => Ok(MessageRole::Tool),
            "system" => Ok(MessageRole::System),
            other => Err(StoreError::InvalidRecord(format!("unknown role '{}'", other))),
        }
    }
}

/// 按角色区分的消息负载：只有 tool 变体携带 `tool_call_id`，
/// 只有 assistant 变体携带工具调用列表
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum MessageKind {
    User,
    Assistant {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCallRecord>,
    },
    Tool {
        #[serde(default)]
        tool_call_id: Option<String>,
        #[serde(default)]
        tool_name: Option<String>,
        #[serde(default)]
        tool_args: Option<String>,
    },
    System,
}

impl MessageKind {
    pub fn role(&self) -> MessageRole {
        match self {
            MessageKind::User => MessageRole::User,
            MessageKind::Assistant { .. } => MessageRole::Assistant,
            MessageKind::Tool { .. } => MessageRole::Tool,
            MessageKind::System => MessageRole::System,
        }
    }

    /// assistant 声明的工具调用；其他角色为空
    pub fn tool_calls(&self) -> &[ToolCallRecord] {
        match self {
            MessageKind::Assistant { tool_calls } => tool_calls,
            _ => &[],
        }
    }

    /// tool 消息关联的调用 ID（空字符串视为缺失）
    pub fn tool_call_id(&self) -> Option<&str> {
        match self {
            MessageKind::Tool {
                tool_call_id: Some(id),
                ..
            } if !id.is_empty() => Some(id.as_str()),
            _ => None,
        }
    }

    pub fn tool_name(&self) -> Option<&str> {
        match self {
            MessageKind::Tool { tool_name, .. } => tool_name.as_deref(),
            _ => None,
        }
    }

    pub fn tool_args(&self) -> Option<&str> {
        match self {
            MessageKind::Tool { tool_args, .. } => tool_args.as_deref(),
            _ => None,
        }
    }

    /// 由存储行的扁平列重建变体；角色与列不一致时多余的列被忽略
    pub(crate) fn from_columns(
        role: MessageRole,
        tool_name: Option<String>,
        tool_args: Option<String>,
        tool_call_id: Option<String>,
        metadata: Option<&str>,
    ) -> Self {
        match role {
            MessageRole::User => MessageKind::User,
            MessageRole::System => MessageKind::System,
            MessageRole::Assistant => MessageKind::Assistant {
                tool_calls: decode_tool_calls(metadata),
            },
            MessageRole::Tool => MessageKind::Tool {
                tool_call_id,
                tool_name,
                tool_args,
            },
        }
    }
}

// ── 消息 ─────────────────────────────────────────────────────────────────────

/// 待写入的消息
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub kind: MessageKind,
    pub content: String,
    pub message_type: String,
}

impl NewMessage {
    fn with_kind(kind: MessageKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            message_type: DEFAULT_MESSAGE_TYPE.to_string(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_kind(MessageKind::User, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_kind(MessageKind::System, content)
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCallRecord>) -> Self {
        Self::with_kind(MessageKind::Assistant { tool_calls }, content)
    }

    pub fn tool(
        tool_name: impl Into<String>,
        content: impl Into<String>,
        tool_call_id: impl Into<String>,
        tool_args: Option<String>,
    ) -> Self {
        Self::with_kind(
            MessageKind::Tool {
                tool_call_id: Some(tool_call_id.into()),
                tool_name: Some(tool_name.into()),
                tool_args,
            },
            content,
        )
    }

    pub fn with_message_type(mut self, message_type: impl Into<String>) -> Self {
        self.message_type = message_type.into();
        self
    }
}

/// 已持久化的消息，只追加不修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub conversation_id: String,
    pub kind: MessageKind,
    pub content: String,
    #[serde(default = "default_message_type")]
    pub message_type: String,
    pub created_at: u64,
}

impl StoredMessage {
    pub fn role(&self) -> MessageRole {
        self.kind.role()
    }
}

fn default_message_type() -> String {
    DEFAULT_MESSAGE_TYPE.to_string()
}

// ── 长期事实 ─────────────────────────────────────────────────────────────────

/// 用户长期事实，`(fact_type, key)` 唯一
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserFact {
    pub id: String,
    pub fact_type: String,
    pub key: String,
    pub value: String,
    /// 0.0 ~ 1.0
    pub confidence: f64,
    pub created_at: u64,
    pub updated_at: u64,
}

// ── metadata 编解码 ──────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
struct ToolCallMetadata {
    tool_calls: Vec<ToolCallRecord>,
}

/// 把工具调用列表编码为 metadata 文本，空列表不产生 metadata
pub(crate) fn encode_tool_calls(
    tool_calls: &[ToolCallRecord],
) -> std::result::Result<Option<String>, serde_json::Error> {
    if tool_calls.is_empty() {
        return Ok(None);
    }
    serde_json::to_string(&ToolCallMetadata {
        tool_calls: tool_calls.to_vec(),
    })
    .map(Some)
}

/// 解析 metadata 中的工具调用；格式损坏时按“无工具调用”处理，不向上报错
pub(crate) fn decode_tool_calls(metadata: Option<&str>) -> Vec<ToolCallRecord> {
    let Some(raw) = metadata.filter(|s| !s.trim().is_empty()) else {
        return Vec::new();
    };
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) if !map.contains_key("tool_calls") => Vec::new(),
        Ok(value) => match serde_json::from_value::<ToolCallMetadata>(value) {
            Ok(meta) => meta.tool_calls,
            Err(e) => {
                warn!(error = %e, "⚠️ 消息 metadata 中的 tool_calls 无法解析，按无工具调用处理");
                Vec::new()
            }
        },
        Err(e) => {
            warn!(error = %e, "⚠️ 消息 metadata 不是合法 JSON，按无工具调用处理");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_call_metadata_roundtrip() {
        let calls = vec![ToolCallRecord::new("a1", "calc", json!({"x": 1}))];
        let raw = encode_tool_calls(&calls).unwrap().unwrap();
        assert_eq!(decode_tool_calls(Some(&raw)), calls);
    }

    #[test]
    fn test_empty_tool_calls_have_no_metadata() {
        assert_eq!(encode_tool_calls(&[]).unwrap(), None);
    }

    #[test]
    fn test_malformed_metadata_is_tool_call_free() {
        assert!(decode_tool_calls(Some("{not json")).is_empty());
        assert!(decode_tool_calls(Some(r#"{"tool_calls": "oops"}"#)).is_empty());
        assert!(decode_tool_calls(Some(r#"{"source": "voice"}"#)).is_empty());
        assert!(decode_tool_calls(None).is_empty());
    }

    #[test]
    fn test_tool_call_id_ignores_empty_string() {
        let kind = MessageKind::Tool {
            tool_call_id: Some(String::new()),
            tool_name: None,
            tool_args: None,
        };
        assert_eq!(kind.tool_call_id(), None);
        assert_eq!(MessageKind::User.tool_call_id(), None);
    }

    #[test]
    fn test_role_parse() {
        assert_eq!("tool".parse::<MessageRole>().unwrap(), MessageRole::Tool);
        assert!("robot".parse::<MessageRole>().is_err());
    }
}
