//! 所有 [`ConversationStore`] 实现共用的行为测试

use super::ConversationStore;
use crate::error::{JarvisError, StoreError};
use crate::memory::types::{MessageKind, MessageRole, NewMessage, ToolCallRecord};
use serde_json::json;

pub(crate) async fn run_all(store: &dyn ConversationStore) {
    conversation_lifecycle(store).await;
    updated_at_only_moves_on_append(store).await;
    listing_order_and_archive(store).await;
    unknown_conversation(store).await;
    message_order_and_tail_cut(store).await;
    message_payload_roundtrip(store).await;
    user_fact_upsert(store).await;
}

async fn conversation_lifecycle(store: &dyn ConversationStore) {
    let id = store.create_conversation(None).await.unwrap();
    let conv = store.get_conversation(&id).await.unwrap().unwrap();
    assert_eq!(conv.id, id);
    assert_eq!(conv.title, None);
    assert!(!conv.archived);
    assert!(!conv.title_locked);
    assert_eq!(conv.created_at, conv.updated_at);

    let titled = store.create_conversation(Some("周末计划")).await.unwrap();
    let conv = store.get_conversation(&titled).await.unwrap().unwrap();
    assert_eq!(conv.title.as_deref(), Some("周末计划"));
    assert!(conv.title_locked, "显式标题应锁定");

    store.update_conversation_title(&id, "新标题").await.unwrap();
    store.lock_conversation_title(&id).await.unwrap();
    let conv = store.get_conversation(&id).await.unwrap().unwrap();
    assert_eq!(conv.title.as_deref(), Some("新标题"));
    assert!(conv.title_locked);
}

async fn updated_at_only_moves_on_append(store: &dyn ConversationStore) {
    let id = store.create_conversation(None).await.unwrap();
    let before = store.get_conversation(&id).await.unwrap().unwrap();

    store.update_conversation_title(&id, "标题").await.unwrap();
    store.get_messages(&id, 10).await.unwrap();
    let after_title = store.get_conversation(&id).await.unwrap().unwrap();
    assert_eq!(after_title.updated_at, before.updated_at, "改标题和读取不应前移 updated_at");

    store.add_message(&id, NewMessage::user("hi")).await.unwrap();
    let after_one = store.get_conversation(&id).await.unwrap().unwrap();
    assert!(after_one.updated_at > before.updated_at);

    store.add_message(&id, NewMessage::assistant("hello", vec![])).await.unwrap();
    let after_two = store.get_conversation(&id).await.unwrap().unwrap();
    assert!(after_two.updated_at > after_one.updated_at);
    assert_eq!(after_two.created_at, before.created_at);
}

async fn listing_order_and_archive(store: &dyn ConversationStore) {
    let first = store.create_conversation(None).await.unwrap();
    let second = store.create_conversation(None).await.unwrap();
    let third = store.create_conversation(None).await.unwrap();

    // first 最近有消息，应排在最前
    store.add_message(&first, NewMessage::user("ping")).await.unwrap();

    let listed = store.list_conversations(3, false).await.unwrap();
    let ids: Vec<&str> = listed.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec![first.as_str(), third.as_str(), second.as_str()]);

    store.archive_conversation(&third).await.unwrap();
    let listed = store.list_conversations(100, false).await.unwrap();
    assert!(listed.iter().all(|c| c.id != third));
    let listed = store.list_conversations(100, true).await.unwrap();
    assert!(listed.iter().any(|c| c.id == third && c.archived));

    // 归档后仍可按 ID 读取
    assert!(store.get_conversation(&third).await.unwrap().unwrap().archived);

    assert_eq!(store.list_conversations(1, true).await.unwrap().len(), 1);
    assert!(store.list_conversations(0, true).await.unwrap().is_empty());
}

async fn unknown_conversation(store: &dyn ConversationStore) {
    assert!(store.get_conversation("missing").await.unwrap().is_none());

    let err = store
        .add_message("missing", NewMessage::user("hi"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        JarvisError::Store(StoreError::ConversationNotFound(ref id)) if id == "missing"
    ));
    assert!(matches!(
        store.update_conversation_title("missing", "t").await,
        Err(JarvisError::Store(StoreError::ConversationNotFound(_)))
    ));
    assert!(matches!(
        store.archive_conversation("missing").await,
        Err(JarvisError::Store(StoreError::ConversationNotFound(_)))
    ));
    assert!(matches!(
        store.lock_conversation_title("missing").await,
        Err(JarvisError::Store(StoreError::ConversationNotFound(_)))
    ));
    assert!(store.get_messages("missing", 10).await.unwrap().is_empty());
    assert!(store.get_recent_messages("missing", 10).await.unwrap().is_empty());
}

async fn message_order_and_tail_cut(store: &dyn ConversationStore) {
    let id = store.create_conversation(None).await.unwrap();
    let other = store.create_conversation(None).await.unwrap();
    for i in 1..=5 {
        store
            .add_message(&id, NewMessage::user(format!("m{i}")))
            .await
            .unwrap();
        store
            .add_message(&other, NewMessage::user(format!("other{i}")))
            .await
            .unwrap();
    }

    let contents = |msgs: Vec<crate::memory::types::StoredMessage>| {
        msgs.into_iter().map(|m| m.content).collect::<Vec<_>>()
    };

    let head = store.get_messages(&id, 2).await.unwrap();
    assert_eq!(contents(head), vec!["m1", "m2"]);

    let tail = store.get_recent_messages(&id, 3).await.unwrap();
    assert!(tail.windows(2).all(|w| w[0].created_at < w[1].created_at));
    assert_eq!(contents(tail), vec!["m3", "m4", "m5"]);

    let all = store.get_recent_messages(&id, 50).await.unwrap();
    assert_eq!(all.len(), 5);
    assert!(all.iter().all(|m| m.conversation_id == id));

    assert!(store.get_recent_messages(&id, 0).await.unwrap().is_empty());
}

async fn message_payload_roundtrip(store: &dyn ConversationStore) {
    let id = store.create_conversation(None).await.unwrap();
    let calls = vec![
        ToolCallRecord::new("a1", "calc", json!({"x": 1})),
        ToolCallRecord::new("a2", "weather", json!({"city": "Pune"})),
    ];
    store
        .add_message(&id, NewMessage::system("你是 JARVIS"))
        .await
        .unwrap();
    store
        .add_message(&id, NewMessage::assistant("", calls.clone()))
        .await
        .unwrap();
    let tool_id = store
        .add_message(
            &id,
            NewMessage::tool("calc", "4", "a1", Some(r#"{"x":1}"#.to_string()))
                .with_message_type("tool_result"),
        )
        .await
        .unwrap();

    let msgs = store.get_messages(&id, 10).await.unwrap();
    assert_eq!(msgs.len(), 3);
    assert_eq!(msgs[0].role(), MessageRole::System);
    assert_eq!(msgs[0].message_type, "text");
    assert_eq!(msgs[1].kind.tool_calls(), calls.as_slice());
    assert_eq!(msgs[2].id, tool_id);
    assert_eq!(msgs[2].message_type, "tool_result");
    assert_eq!(msgs[2].kind.tool_args(), Some(r#"{"x":1}"#));
    assert_eq!(msgs[1].kind.tool_args(), None);
    assert_eq!(
        msgs[2].kind,
        MessageKind::Tool {
            tool_call_id: Some("a1".to_string()),
            tool_name: Some("calc".to_string()),
            tool_args: Some(r#"{"x":1}"#.to_string()),
        }
    );
}

async fn user_fact_upsert(store: &dyn ConversationStore) {
    assert!(store.get_user_facts(None).await.unwrap().is_empty());

    store.set_user_fact("pref", "drink", "coffee", 0.6).await.unwrap();
    store.set_user_fact("pref", "color", "blue", 1.0).await.unwrap();
    store.set_user_fact("bio", "city", "Pune", 0.9).await.unwrap();

    let before = store.get_user_facts(Some("pref")).await.unwrap();
    let drink_before = before.iter().find(|f| f.key == "drink").unwrap().clone();

    store.set_user_fact("pref", "drink", "tea", 0.8).await.unwrap();

    let all = store.get_user_facts(None).await.unwrap();
    assert_eq!(all.len(), 3, "upsert 不应产生重复行");
    let keys: Vec<(&str, &str)> = all
        .iter()
        .map(|f| (f.fact_type.as_str(), f.key.as_str()))
        .collect();
    assert_eq!(keys, vec![("bio", "city"), ("pref", "color"), ("pref", "drink")]);

    let prefs = store.get_user_facts(Some("pref")).await.unwrap();
    assert_eq!(prefs.len(), 2);
    // 按 updated_at 倒序：刚更新的 drink 在前
    assert_eq!(prefs[0].key, "drink");
    assert_eq!(prefs[0].value, "tea");
    assert_eq!(prefs[0].confidence, 0.8);
    assert_eq!(prefs[0].id, drink_before.id);
    assert_eq!(prefs[0].created_at, drink_before.created_at);
    assert!(prefs[0].updated_at > drink_before.updated_at);

    assert!(matches!(
        store.set_user_fact("pref", "size", "L", 1.2).await,
        Err(JarvisError::Store(StoreError::InvalidRecord(_)))
    ));
    assert!(store.get_user_facts(Some("nothing")).await.unwrap().is_empty());
}
