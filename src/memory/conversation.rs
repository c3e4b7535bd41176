//! 短期记忆：对话记录
//!
//! 按条数（不是轮数）限长的先进先出队列，超出容量时静默丢弃最旧的消息。
//! 默认 20 条，即约 10 轮 user/assistant 对话，供意图提取作上下文。

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// 短期记忆：最多保留 max_len 条消息
#[derive(Clone, Debug)]
pub struct ConversationMemory {
    messages: VecDeque<Message>,
    max_len: usize,
}

impl ConversationMemory {
    pub fn new(max_len: usize) -> Self {
        Self {
            messages: VecDeque::with_capacity(max_len),
            max_len,
        }
    }

    pub fn push(&mut self, msg: Message) {
        self.messages.push_back(msg);
        while self.messages.len() > self.max_len {
            self.messages.pop_front();
        }
    }

    /// 一轮对话：先 user 后 assistant
    pub fn push_turn(&mut self, user_text: &str, assistant_text: &str) {
        self.push(Message::user(user_text));
        self.push(Message::assistant(assistant_text));
    }

    /// 按插入顺序复制出当前全部消息
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eviction_keeps_newest() {
        let mut stm = ConversationMemory::new(3);
        for i in 0..4 {
            stm.push(Message::user(format!("m{i}")));
        }
        let contents: Vec<_> = stm.snapshot().into_iter().map(|m| m.content).collect();
        assert_eq!(contents, vec!["m1", "m2", "m3"]);
    }

    #[test]
    fn test_turn_counts_two_entries() {
        let mut stm = ConversationMemory::new(20);
        stm.push_turn("hi", "hello");
        assert_eq!(stm.len(), 2);
        let snap = stm.snapshot();
        assert_eq!(snap[0], Message::user("hi"));
        assert_eq!(snap[1], Message::assistant("hello"));
    }

    #[test]
    fn test_odd_capacity_splits_turn() {
        let mut stm = ConversationMemory::new(3);
        stm.push_turn("q1", "a1");
        stm.push_turn("q2", "a2");
        let snap = stm.snapshot();
        assert_eq!(snap.len(), 3);
        assert_eq!(snap[0], Message::assistant("a1"));
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&Message::assistant("ok")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"ok"}"#);
    }
}
