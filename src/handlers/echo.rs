//! Echo 处理器（测试与无 Key 本地运行用）

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::handlers::{Handler, OperationSpec};

/// Echo 处理器：回显文本
pub struct EchoHandler {
    operations: Vec<OperationSpec>,
}

impl EchoHandler {
    pub fn new() -> Self {
        Self {
            operations: vec![OperationSpec::new("say", "Repeat the given text back.").required("text")],
        }
    }
}

impl Default for EchoHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Handler for EchoHandler {
    fn name(&self) -> &str {
        "echo"
    }

    fn summary(&self) -> &str {
        "I repeat whatever you tell me (useful for testing)."
    }

    fn operations(&self) -> &[OperationSpec] {
        &self.operations
    }

    async fn invoke(&self, action: &str, params: Map<String, Value>) -> Result<Value, String> {
        match action {
            "say" => {
                let text = params
                    .get("text")
                    .and_then(|v| v.as_str())
                    .unwrap_or("(empty)");
                Ok(json!({ "result": text }))
            }
            other => Err(format!("unsupported action {other}")),
        }
    }
}
