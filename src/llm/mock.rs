//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 优先按顺序返回预置的脚本回复；脚本耗尽后，带 system 提示的调用（意图提取）回显为
//! echo.say 意图 JSON，其余调用（记忆推断等）返回 `{}`，便于本地无 Key 跑通整条路由。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::LlmClient;
use crate::memory::{Message, Role};

/// Mock 客户端：脚本回复队列 + 回显兜底；记录收到的每一次调用
#[derive(Debug, Default)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<Result<String, String>>>,
    calls: Mutex<Vec<Vec<Message>>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以一组成功回复创建
    pub fn scripted<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mock = Self::new();
        for r in replies {
            mock.push_reply(r);
        }
        mock
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        if let Ok(mut q) = self.script.lock() {
            q.push_back(Ok(reply.into()));
        }
    }

    pub fn push_error(&self, err: impl Into<String>) {
        if let Ok(mut q) = self.script.lock() {
            q.push_back(Err(err.into()));
        }
    }

    /// 已收到的调用次数
    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// 第 n 次调用的消息（测试断言 prompt 内容用）
    pub fn call(&self, n: usize) -> Option<Vec<Message>> {
        self.calls.lock().ok().and_then(|c| c.get(n).cloned())
    }

    fn fallback(messages: &[Message]) -> String {
        let has_system = messages.iter().any(|m| m.role == Role::System);
        if !has_system {
            return "{}".to_string();
        }
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        serde_json::json!({
            "agent": "echo",
            "action": "say",
            "params": { "text": format!("Echo from Mock: {last_user}") },
            "needs": []
        })
        .to_string()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(messages.to_vec());
        }
        let scripted = self.script.lock().ok().and_then(|mut q| q.pop_front());
        match scripted {
            Some(reply) => reply,
            None => Ok(Self::fallback(messages)),
        }
    }
}
