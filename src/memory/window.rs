//! 工具调用安全的滑动窗口
//!
//! 朴素的尾部截断可能只保留工具结果、丢掉声明它的 assistant 消息，
//! 这样的请求会被工具调用型运行时直接拒绝。这里从最新消息往回走，
//! 用一个待解析集合记录“已看到结果、还没看到声明”的 `tool_call_id`：
//!
//! 1. tool 消息：把它的 `tool_call_id` 加入待解析集合
//! 2. 带工具调用的 assistant 消息：从集合中移除它声明的 ID
//! 3. 结果数达到 `limit` 且集合为空时停止；集合不空就继续向前，
//!    窗口因此可以超过 `limit`
//! 4. 批次走完集合仍不空时，在未访问的部分里单独寻找能解析剩余 ID 的
//!    assistant 消息
//!
//! 第 3 步只在集合为空时提前停止，集合不空时第一遍总会走完整个批次，
//! 所以第 4 步在这里找不到未访问的消息；只有第一遍另设上限时它才有作用。
//! 批次本身不够长时剩余的 ID 进入 [`WindowSelection::unresolved`]，
//! 由调用方扩大读取范围（见 [`SessionMemory::context_window`](crate::memory::SessionMemory::context_window)）。
//!
//! 反过来的情况（assistant 声明了调用但结果还没写入）是允许的，代表一轮仍在进行。

use crate::llm::types::{Message, ToolCall};
use crate::memory::types::{MessageKind, StoredMessage};
use std::collections::BTreeSet;

/// tool 消息缺少工具名时使用的占位名
pub const UNKNOWN_TOOL_NAME: &str = "unknown";

// ── 窗口选择 ─────────────────────────────────────────────────────────────────

/// 一次窗口选择的结果
#[derive(Debug, Clone, PartialEq)]
pub struct WindowSelection {
    /// 按时间正序排列的窗口消息
    pub messages: Vec<StoredMessage>,
    /// 批次内找不到声明方的 `tool_call_id`（升序）
    pub unresolved: Vec<String>,
}

/// 在一批按时间正序排列的消息上执行工具调用安全的滑动窗口
///
/// `limit == 0` 时总是返回空窗口。
pub fn safe_sliding_window(batch: Vec<StoredMessage>, limit: usize) -> WindowSelection {
    let mut older = batch;
    let mut picked: Vec<StoredMessage> = Vec::new();
    let mut pending: BTreeSet<String> = BTreeSet::new();

    // 第一遍：从新到旧收集，直到满足数量且没有悬空的工具结果
    loop {
        if picked.len() >= limit && pending.is_empty() {
            break;
        }
        let Some(msg) = older.pop() else {
            break;
        };
        if let Some(id) = msg.kind.tool_call_id() {
            pending.insert(id.to_string());
        }
        for call in msg.kind.tool_calls() {
            pending.remove(&call.id);
        }
        picked.push(msg);
    }

    // 第二遍：只在尚未访问的更早消息里补齐声明方（第一遍走完批次时为空操作）
    while !pending.is_empty() {
        let Some(msg) = older.pop() else {
            break;
        };
        let resolves = msg
            .kind
            .tool_calls()
            .iter()
            .any(|call| pending.contains(&call.id));
        if resolves {
            for call in msg.kind.tool_calls() {
                pending.remove(&call.id);
            }
            picked.push(msg);
        }
    }

    picked.reverse();
    WindowSelection {
        messages: picked,
        unresolved: pending.into_iter().collect(),
    }
}

// ── ContextWindow ────────────────────────────────────────────────────────────

/// 交给模型运行时的上下文窗口
#[derive(Debug, Clone, PartialEq)]
pub struct ContextWindow {
    /// 按时间正序排列的窗口消息
    pub messages: Vec<StoredMessage>,
    /// 仍未找到声明方的 `tool_call_id`；非空时窗口结构不完整，
    /// 运行时可能拒绝该请求
    pub unresolved: Vec<String>,
    /// 最后一次从存储读取的原始消息数
    pub fetched: usize,
}

impl ContextWindow {
    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// 转换为运行时原生消息
    pub fn to_llm_messages(&self) -> Vec<Message> {
        to_llm_messages(&self.messages)
    }
}

// ── 运行时消息转换 ───────────────────────────────────────────────────────────

/// 把一条存储消息映射为运行时原生消息（纯函数）
pub fn to_llm_message(msg: &StoredMessage) -> Message {
    match &msg.kind {
        MessageKind::User => Message::user(msg.content.clone()),
        MessageKind::System => Message::system(msg.content.clone()),
        MessageKind::Assistant { tool_calls } if tool_calls.is_empty() => {
            Message::assistant(msg.content.clone())
        }
        MessageKind::Assistant { tool_calls } => Message::assistant_with_tools(
            Some(msg.content.clone()),
            tool_calls
                .iter()
                .map(|call| {
                    ToolCall::function(call.id.clone(), call.name.clone(), call.args.to_string())
                })
                .collect(),
        ),
        MessageKind::Tool {
            tool_call_id,
            tool_name,
            ..
        } => Message::tool_result(
            tool_call_id.clone().unwrap_or_default(),
            tool_name
                .clone()
                .unwrap_or_else(|| UNKNOWN_TOOL_NAME.to_string()),
            msg.content.clone(),
        ),
    }
}

pub fn to_llm_messages(messages: &[StoredMessage]) -> Vec<Message> {
    messages.iter().map(to_llm_message).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::{MessageRole, ToolCallRecord};
    use serde_json::json;

    fn msg(n: u64, kind: MessageKind) -> StoredMessage {
        StoredMessage {
            id: format!("m{n}"),
            conversation_id: "c1".to_string(),
            kind,
            content: format!("content {n}"),
            message_type: "text".to_string(),
            created_at: n,
        }
    }

    fn user(n: u64) -> StoredMessage {
        msg(n, MessageKind::User)
    }

    fn assistant(n: u64, call_ids: &[&str]) -> StoredMessage {
        msg(
            n,
            MessageKind::Assistant {
                tool_calls: call_ids
                    .iter()
                    .map(|id| ToolCallRecord::new(*id, "calc", json!({"x": 1})))
                    .collect(),
            },
        )
    }

    fn tool(n: u64, call_id: &str) -> StoredMessage {
        msg(
            n,
            MessageKind::Tool {
                tool_call_id: Some(call_id.to_string()),
                tool_name: Some("calc".to_string()),
                tool_args: None,
            },
        )
    }

    fn ids(selection: &WindowSelection) -> Vec<&str> {
        selection.messages.iter().map(|m| m.id.as_str()).collect()
    }

    /// 1..=10 的对话，5 号 assistant 声明 a1，6 号是 a1 的结果
    fn anchor_history() -> Vec<StoredMessage> {
        (1..=10)
            .map(|n| match n {
                5 => assistant(5, &["a1"]),
                6 => tool(6, "a1"),
                n if n % 2 == 1 => user(n),
                n => assistant(n, &[]),
            })
            .collect()
    }

    #[test]
    fn test_zero_limit_is_empty() {
        let selection = safe_sliding_window(anchor_history(), 0);
        assert!(selection.messages.is_empty());
        assert!(selection.unresolved.is_empty());
    }

    #[test]
    fn test_short_history_is_kept_whole() {
        let batch = vec![user(1), assistant(2, &[])];
        let selection = safe_sliding_window(batch.clone(), 20);
        assert_eq!(selection.messages, batch);
    }

    #[test]
    fn test_plain_history_is_cut_to_limit() {
        let batch: Vec<_> = (1..=10)
            .map(|n| if n % 2 == 1 { user(n) } else { assistant(n, &[]) })
            .collect();
        let selection = safe_sliding_window(batch, 4);
        assert_eq!(ids(&selection), vec!["m7", "m8", "m9", "m10"]);
    }

    #[test]
    fn test_tool_result_pulls_in_its_declaring_assistant() {
        // 最后 5 条是 6..=10，包含 6 号工具结果，5 号必须被一起带上
        let selection = safe_sliding_window(anchor_history(), 5);
        assert_eq!(ids(&selection), vec!["m5", "m6", "m7", "m8", "m9", "m10"]);
        assert!(selection.unresolved.is_empty());
    }

    #[test]
    fn test_pair_outside_cut_is_not_pulled_in() {
        let selection = safe_sliding_window(anchor_history(), 2);
        assert_eq!(ids(&selection), vec!["m9", "m10"]);
    }

    #[test]
    fn test_pair_at_the_edge_of_the_window() {
        let batch = vec![user(1), assistant(2, &["a1"]), tool(3, "a1")];
        let selection = safe_sliding_window(batch, 1);
        assert_eq!(ids(&selection), vec!["m2", "m3"]);
    }

    #[test]
    fn test_parallel_tool_calls_stay_together() {
        let batch = vec![
            user(1),
            assistant(2, &["a1", "a2"]),
            tool(3, "a1"),
            tool(4, "a2"),
            assistant(5, &[]),
        ];
        let selection = safe_sliding_window(batch, 2);
        assert_eq!(ids(&selection), vec!["m2", "m3", "m4", "m5"]);
    }

    #[test]
    fn test_in_flight_assistant_is_allowed_alone() {
        let batch = vec![user(1), assistant(2, &[]), assistant(3, &["a9"])];
        let selection = safe_sliding_window(batch, 1);
        assert_eq!(ids(&selection), vec!["m3"]);
        assert!(selection.unresolved.is_empty());
    }

    #[test]
    fn test_missing_declaration_is_reported() {
        // 批次从工具结果开始，声明它的 assistant 不在批次内
        let batch = vec![tool(1, "a0"), user(2), assistant(3, &[])];
        let selection = safe_sliding_window(batch, 1);
        assert_eq!(ids(&selection), vec!["m3"]);

        let batch = vec![user(1), tool(2, "a0"), assistant(3, &[])];
        let selection = safe_sliding_window(batch, 2);
        assert_eq!(ids(&selection), vec!["m1", "m2", "m3"]);
        assert_eq!(selection.unresolved, vec!["a0".to_string()]);
    }

    #[test]
    fn test_unresolved_result_consumes_the_whole_batch() {
        // 待解析集合不空时第一遍一直走到批次开头，不留下未访问的消息
        let batch = vec![user(1), assistant(2, &[]), user(3), tool(4, "a0")];
        let selection = safe_sliding_window(batch.clone(), 1);
        assert_eq!(selection.messages, batch);
        assert_eq!(selection.unresolved, vec!["a0".to_string()]);
    }

    #[test]
    fn test_malformed_metadata_counts_as_no_tool_calls() {
        let broken = msg(
            2,
            MessageKind::from_columns(MessageRole::Assistant, None, None, None, Some("{oops")),
        );
        let batch = vec![user(1), broken, tool(3, "a1")];
        let selection = safe_sliding_window(batch, 1);
        assert_eq!(ids(&selection), vec!["m1", "m2", "m3"]);
        assert_eq!(selection.unresolved, vec!["a1".to_string()]);
    }

    #[test]
    fn test_pairing_and_size_hold_for_generated_histories() {
        // 线性同余生成的确定性对话：普通轮次与多次工具调用轮次交错
        let mut seed: u64 = 0x5eed;
        let mut next = move |bound: u64| {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (seed >> 33) % bound
        };

        for round in 0..40 {
            let mut history = Vec::new();
            let mut n = 0;
            let mut call = 0;
            while history.len() < 30 + round {
                n += 1;
                history.push(user(n));
                let calls = next(3);
                if calls > 0 {
                    let ids: Vec<String> = (0..calls)
                        .map(|_| {
                            call += 1;
                            format!("c{call}")
                        })
                        .collect();
                    let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
                    n += 1;
                    history.push(assistant(n, &refs));
                    for id in &ids {
                        n += 1;
                        history.push(tool(n, id));
                    }
                }
                n += 1;
                history.push(assistant(n, &[]));
            }

            for limit in [0usize, 1, 2, 3, 5, 8, 13, 50] {
                let selection = safe_sliding_window(history.clone(), limit);
                let declared: BTreeSet<&str> = selection
                    .messages
                    .iter()
                    .flat_map(|m| m.kind.tool_calls().iter().map(|c| c.id.as_str()))
                    .collect();
                for m in &selection.messages {
                    if let Some(id) = m.kind.tool_call_id() {
                        assert!(declared.contains(id), "工具结果 {id} 缺少声明方");
                    }
                }
                assert!(selection.unresolved.is_empty());
                assert!(selection.messages.len() >= limit.min(history.len()));
                assert!(
                    selection
                        .messages
                        .windows(2)
                        .all(|w| w[0].created_at < w[1].created_at)
                );
                // 超出 limit 的部分只能来自被工具结果拖入的连续前缀
                let tail = &history[history.len() - selection.messages.len()..];
                assert_eq!(selection.messages.as_slice(), tail);
            }
        }
    }

    #[test]
    fn test_conversion_by_role() {
        let calls = vec![ToolCallRecord::new("a1", "calc", json!({"x": 1}))];
        let messages = vec![
            msg(1, MessageKind::System),
            user(2),
            msg(3, MessageKind::Assistant { tool_calls: calls }),
            tool(4, "a1"),
            msg(
                5,
                MessageKind::Tool {
                    tool_call_id: None,
                    tool_name: None,
                    tool_args: None,
                },
            ),
            assistant(6, &[]),
        ];
        let converted = to_llm_messages(&messages);

        assert_eq!(converted[0], Message::system("content 1".to_string()));
        assert_eq!(converted[1], Message::user("content 2".to_string()));

        let tool_calls = converted[2].tool_calls.as_ref().unwrap();
        assert_eq!(converted[2].role, "assistant");
        assert_eq!(tool_calls[0].id, "a1");
        assert_eq!(tool_calls[0].function.name, "calc");
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&tool_calls[0].function.arguments).unwrap(),
            json!({"x": 1})
        );

        assert_eq!(converted[3].role, "tool");
        assert_eq!(converted[3].tool_call_id.as_deref(), Some("a1"));
        assert_eq!(converted[3].name.as_deref(), Some("calc"));

        assert_eq!(converted[4].name.as_deref(), Some(UNKNOWN_TOOL_NAME));
        assert_eq!(converted[4].tool_call_id.as_deref(), Some(""));

        assert_eq!(converted[5], Message::assistant("content 6".to_string()));
        assert!(converted[5].tool_calls.is_none());
    }
}
