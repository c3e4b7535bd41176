//! chat 代理的内置动作：记住事实、查询记忆、查看对话历史、列出能力
//!
//! 这些动作需要访问用户会话，由路由层在注册表分发之前拦截，不经过处理器。

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::config::{MessageTemplates, PromptTemplates};
use crate::handlers::OperationSpec;
use crate::llm::LlmClient;
use crate::memory::{value_to_text, Message, UserSession, USER_MEMOS_KEY};
use crate::router::templates::{capitalize, render};

pub const REMEMBER_THIS: &str = "remember_this";
pub const QUERY_MEMORY: &str = "query_memory";
pub const GET_CHAT_HISTORY: &str = "get_chat_history";
pub const SHOW_CAPABILITIES: &str = "show_capabilities";

const NONE_FLAG: &str = "NONE";

/// 内置动作的声明（挂在 chat 处理器下，供目录与能力列表使用）
pub fn operations() -> Vec<OperationSpec> {
    vec![
        OperationSpec::new(REMEMBER_THIS, "Remember a fact about you.").optional("fact"),
        OperationSpec::new(QUERY_MEMORY, "Answer a question from what I remember about you.")
            .optional("query"),
        OperationSpec::new(GET_CHAT_HISTORY, "Show our recent conversation."),
        OperationSpec::new(SHOW_CAPABILITIES, "List everything I can do."),
    ]
}

pub fn is_builtin(action: &str) -> bool {
    matches!(
        action,
        REMEMBER_THIS | QUERY_MEMORY | GET_CHAT_HISTORY | SHOW_CAPABILITIES
    )
}

/// 内置动作的执行结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltinReply {
    pub text: String,
    /// 是否把本轮写入短期记忆
    pub record_turn: bool,
}

pub struct Builtins {
    llm: Option<Arc<dyn LlmClient>>,
    prompts: PromptTemplates,
    messages: MessageTemplates,
}

impl Builtins {
    pub fn new(prompts: PromptTemplates, messages: MessageTemplates) -> Self {
        Self {
            llm: None,
            prompts,
            messages,
        }
    }

    /// query_memory 用的 LLM；不设置时按关键词在事实中查找
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// 执行内置动作；action 不是内置动作时返回 None
    pub async fn run(
        &self,
        action: &str,
        params: &Map<String, Value>,
        raw_input: &str,
        session: &mut UserSession,
        capability_listing: impl FnOnce() -> String,
    ) -> Option<BuiltinReply> {
        let text_param = |key: &str| {
            params
                .get(key)
                .map(value_to_text)
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| raw_input.to_string())
        };
        let reply = match action {
            REMEMBER_THIS => {
                let fact = text_param("fact");
                session.remember_fact(&fact);
                tracing::info!(fact = %fact, "Remembered fact");
                BuiltinReply {
                    text: render(&self.messages.remember_success, &[("fact", fact.as_str())]),
                    record_turn: true,
                }
            }
            QUERY_MEMORY => {
                let query = text_param("query");
                let answer = self.query_memory(&query, session).await;
                BuiltinReply {
                    text: answer.unwrap_or_else(|| self.messages.memory_query_fail.clone()),
                    record_turn: true,
                }
            }
            GET_CHAT_HISTORY => BuiltinReply {
                text: self.chat_history(session),
                record_turn: true,
            },
            SHOW_CAPABILITIES => BuiltinReply {
                text: render(
                    &self.prompts.all_capabilities_list,
                    &[("capabilities_list", capability_listing().as_str())],
                ),
                record_turn: false,
            },
            _ => return None,
        };
        Some(reply)
    }

    fn chat_history(&self, session: &UserSession) -> String {
        let history = session.short_term();
        if history.is_empty() {
            return self.messages.no_history.clone();
        }
        let formatted = history
            .iter()
            .map(|m| format!("- {}: {}", capitalize(m.role.as_str()), m.content))
            .collect::<Vec<_>>()
            .join("\n");
        render(
            &self.messages.history_header,
            &[("formatted_history", formatted.as_str())],
        )
    }

    async fn query_memory(&self, query: &str, session: &UserSession) -> Option<String> {
        let facts = memory_facts(&session.long_term());
        if facts.is_empty() {
            return None;
        }

        let Some(llm) = &self.llm else {
            return keyword_lookup(query, &facts)
                .map(|v| render(&self.prompts.memory_value_found, &[("value", v.as_str())]));
        };

        let facts_str = facts.join("\n- ");
        let prompt = render(
            &self.prompts.memory_query,
            &[("query", query), ("facts_str", facts_str.as_str())],
        );
        match llm.complete(&[Message::user(prompt)]).await {
            Ok(answer) => {
                let answer = answer.trim();
                if answer.is_empty() || answer.eq_ignore_ascii_case(NONE_FLAG) {
                    None
                } else {
                    Some(render(&self.prompts.memory_value_found, &[("value", answer)]))
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Memory query failed");
                None
            }
        }
    }
}

/// 长期记忆转成事实列表：`<key with spaces> is <value>`，再接上 user_memos
pub fn memory_facts(ltm: &Map<String, Value>) -> Vec<String> {
    let mut facts: Vec<String> = ltm
        .iter()
        .filter(|(k, _)| k.as_str() != USER_MEMOS_KEY)
        .map(|(k, v)| format!("{} is {}", k.replace('_', " "), value_to_text(v)))
        .collect();
    if let Some(Value::Array(memos)) = ltm.get(USER_MEMOS_KEY) {
        facts.extend(memos.iter().map(value_to_text));
    }
    facts
}

/// 无 LLM 时的退化查询：返回与问题共享最多词的事实
fn keyword_lookup(query: &str, facts: &[String]) -> Option<String> {
    let words: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
        .map(str::to_lowercase)
        .collect();
    facts
        .iter()
        .map(|f| {
            let lower = f.to_lowercase();
            (words.iter().filter(|w| lower.contains(w.as_str())).count(), f)
        })
        .filter(|(score, _)| *score > 0)
        .max_by_key(|(score, _)| *score)
        .map(|(_, f)| f.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use serde_json::json;

    fn builtins() -> Builtins {
        Builtins::new(PromptTemplates::default(), MessageTemplates::default())
    }

    fn params(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_remember_defaults_to_raw_input() {
        let mut session = UserSession::new(20);
        let reply = builtins()
            .run(REMEMBER_THIS, &Map::new(), "my cat is Tom", &mut session, String::new)
            .await
            .unwrap();
        assert!(reply.record_turn);
        assert!(reply.text.contains("my cat is Tom"));
        assert_eq!(session.long_term()[USER_MEMOS_KEY], json!(["my cat is Tom"]));
    }

    #[tokio::test]
    async fn test_query_memory_none_flag() {
        let llm = Arc::new(MockLlmClient::scripted(["none", "Your cat is Tom."]));
        let b = builtins().with_llm(llm.clone());
        let mut session = UserSession::new(20);
        session.remember_fact("my cat is Tom");
        session.merge_long_term(params(json!({"favorite_color": "blue"})));

        let reply = b
            .run(QUERY_MEMORY, &params(json!({"query": "dog?"})), "dog?", &mut session, String::new)
            .await
            .unwrap();
        assert_eq!(reply.text, MessageTemplates::default().memory_query_fail);

        let reply = b
            .run(QUERY_MEMORY, &Map::new(), "cat name?", &mut session, String::new)
            .await
            .unwrap();
        assert!(reply.text.contains("Your cat is Tom."));

        let prompt = &llm.call(0).unwrap()[0].content;
        assert!(prompt.contains("favorite color is blue"));
        assert!(prompt.contains("- my cat is Tom"));
    }

    #[tokio::test]
    async fn test_query_memory_empty_ltm_skips_llm() {
        let llm = Arc::new(MockLlmClient::new());
        let mut session = UserSession::new(20);
        let reply = builtins()
            .with_llm(llm.clone())
            .run(QUERY_MEMORY, &Map::new(), "anything?", &mut session, String::new)
            .await
            .unwrap();
        assert_eq!(reply.text, MessageTemplates::default().memory_query_fail);
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_history_and_capabilities() {
        let b = builtins();
        let mut session = UserSession::new(20);
        let reply = b
            .run(GET_CHAT_HISTORY, &Map::new(), "history", &mut session, String::new)
            .await
            .unwrap();
        assert_eq!(reply.text, MessageTemplates::default().no_history);

        session.append_turn("hi", "hello");
        let reply = b
            .run(GET_CHAT_HISTORY, &Map::new(), "history", &mut session, String::new)
            .await
            .unwrap();
        assert!(reply.text.contains("- User: hi\n- Assistant: hello"));

        let reply = b
            .run(SHOW_CAPABILITIES, &Map::new(), "help", &mut session, || "- **Echo**: x".into())
            .await
            .unwrap();
        assert!(!reply.record_turn);
        assert!(reply.text.contains("- **Echo**: x"));
    }

    #[tokio::test]
    async fn test_not_builtin() {
        let mut session = UserSession::new(20);
        assert!(builtins()
            .run("chat", &Map::new(), "hi", &mut session, String::new)
            .await
            .is_none());
    }

    #[test]
    fn test_keyword_lookup_without_llm() {
        let facts = vec!["favorite color is blue".to_string(), "my cat is Tom".to_string()];
        assert_eq!(keyword_lookup("what's my cat called", &facts).unwrap(), "my cat is Tom");
        assert!(keyword_lookup("weather", &facts).is_none());
    }
}
