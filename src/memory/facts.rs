//! 用户长期事实的提示词格式化

use crate::memory::types::UserFact;

/// 把事实列表渲染为注入系统提示词的文本块
///
/// 按 `fact_type` 分组（保持传入顺序），每组一行大写标题，后接缩进的
/// `- key: value` 行，组之间空一行。没有事实时返回空字符串，调用方应省略该块。
///
/// ```text
/// PREF:
///   - color: blue
///   - drink: tea
///
/// BIO:
///   - city: Pune
/// ```
pub fn format_user_facts(facts: &[UserFact]) -> String {
    let mut groups: Vec<(&str, Vec<&UserFact>)> = Vec::new();
    for fact in facts {
        match groups.iter_mut().find(|(t, _)| *t == fact.fact_type) {
            Some((_, members)) => members.push(fact),
            None => groups.push((fact.fact_type.as_str(), vec![fact])),
        }
    }

    groups
        .iter()
        .map(|(fact_type, members)| {
            let mut block = format!("{}:", fact_type.to_uppercase());
            for fact in members {
                block.push_str(&format!("\n  - {}: {}", fact.key, fact.value));
            }
            block
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
