//! Chat 处理器：通用问答与闲聊
//!
//! 记忆相关的内置动作也声明在这里，实际由路由层拦截执行。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::handlers::schema::str_param;
use crate::handlers::{Handler, OperationSpec};
use crate::llm::LlmClient;
use crate::memory::Message;
use crate::router::builtin;

const CHAT_SYSTEM_PROMPT: &str =
    "You are a helpful assistant. Answer the user's question directly and concisely.";

pub struct ChatHandler {
    llm: Arc<dyn LlmClient>,
    operations: Vec<OperationSpec>,
}

impl ChatHandler {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        let mut operations = vec![
            OperationSpec::new("chat", "General conversation and factual questions.").required("message"),
        ];
        operations.extend(builtin::operations());
        Self { llm, operations }
    }
}

#[async_trait]
impl Handler for ChatHandler {
    fn name(&self) -> &str {
        "chat"
    }

    fn summary(&self) -> &str {
        "I can chat, answer general questions, remember facts you tell me and recall our conversation."
    }

    fn operations(&self) -> &[OperationSpec] {
        &self.operations
    }

    async fn invoke(&self, action: &str, params: Map<String, Value>) -> Result<Value, String> {
        if builtin::is_builtin(action) {
            return Err(format!("{action} needs a user session and is handled by the router"));
        }
        if action != "chat" {
            return Err(format!("unsupported action {action}"));
        }
        let message = str_param(&params, "message")?;
        let answer = self
            .llm
            .complete(&[Message::system(CHAT_SYSTEM_PROMPT), Message::user(message)])
            .await?;
        Ok(json!({ "result": answer }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;

    #[tokio::test]
    async fn test_chat_sends_system_and_user() {
        let llm = Arc::new(MockLlmClient::scripted(["Paris."]));
        let chat = ChatHandler::new(llm.clone());
        let mut params = Map::new();
        params.insert("message".into(), json!("capital of France?"));
        assert_eq!(chat.invoke("chat", params).await.unwrap(), json!({"result": "Paris."}));
        let sent = llm.call(0).unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].content, "capital of France?");
    }

    #[test]
    fn test_declares_builtins() {
        let chat = ChatHandler::new(Arc::new(MockLlmClient::new()));
        assert!(chat.operation("remember_this").is_some());
        assert!(chat.operation("show_capabilities").is_some());
    }
}
