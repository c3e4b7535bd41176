//! Developer 处理器：代码生成、解释、优化、修复与语言转换（LLM 驱动）
//!
//! generate_code 返回 `{result: code, code}`，配合记忆推断规则把代码写入长期记忆的 `code` 键，
//! 之后 push_file 之类需要 content 的操作可以直接从记忆补参。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::handlers::schema::str_param;
use crate::handlers::{Handler, OperationSpec};
use crate::llm::{strip_code_fences, LlmClient};
use crate::memory::Message;

const DEFAULT_LANGUAGE: &str = "python";

pub struct DeveloperHandler {
    llm: Arc<dyn LlmClient>,
    operations: Vec<OperationSpec>,
}

impl DeveloperHandler {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        let operations = vec![
            OperationSpec::new("generate_code", "Generate a clean code block for a given task.")
                .required("task")
                .optional("language"),
            OperationSpec::new("explain_code", "Explain what a piece of code does.").required("code"),
            OperationSpec::new("optimize_code", "Suggest an optimized version of some code.")
                .required("code"),
            OperationSpec::new("fix_bug", "Find and fix bugs in some code.").required("code"),
            OperationSpec::new("convert_code", "Translate code into another language.")
                .required("code")
                .required("to_language")
                .optional("from_language"),
        ];
        Self { llm, operations }
    }

    async fn ask(&self, prompt: String) -> Result<String, String> {
        self.llm
            .complete(&[Message::user(prompt)])
            .await
            .map_err(|e| format!("LLM call failed: {e}"))
    }

    async fn generate_code(&self, params: &Map<String, Value>) -> Result<Value, String> {
        let task = str_param(params, "task")?;
        let language = params
            .get("language")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.eq_ignore_ascii_case("unknown"))
            .unwrap_or(DEFAULT_LANGUAGE);

        let prompt = format!(
            "You are an expert code generation AI. Your only purpose is to generate a single, \
            clean, and complete code block in {language}.\n\n\
            Do NOT provide any explanations, conversational text, introductions, or apologies.\n\n\
            Generate the code for the following task:\n{task}"
        );
        let raw = self.ask(prompt).await?;
        let code = strip_code_fences(&raw).to_string();
        Ok(json!({ "result": code, "code": code }))
    }

    async fn rewrite(&self, instruction: &str, params: &Map<String, Value>) -> Result<Value, String> {
        let code = str_param(params, "code")?;
        let answer = self
            .ask(format!("{instruction}:\n```\n{code}\n```"))
            .await?;
        Ok(json!({ "result": answer }))
    }

    async fn convert_code(&self, params: &Map<String, Value>) -> Result<Value, String> {
        let code = str_param(params, "code")?;
        let to = str_param(params, "to_language")?;
        let from = params
            .get("from_language")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        let source = if from.is_empty() { "its current language" } else { from };
        let answer = self
            .ask(format!(
                "Translate this code from {source} to {to}:\n```{}\n{code}\n```",
                if from.is_empty() { "text" } else { from }
            ))
            .await?;
        Ok(json!({ "result": answer }))
    }
}

#[async_trait]
impl Handler for DeveloperHandler {
    fn name(&self) -> &str {
        "developer"
    }

    fn summary(&self) -> &str {
        "I can generate, explain, optimize, fix and translate code in various languages."
    }

    fn operations(&self) -> &[OperationSpec] {
        &self.operations
    }

    async fn invoke(&self, action: &str, params: Map<String, Value>) -> Result<Value, String> {
        match action {
            "generate_code" => self.generate_code(&params).await,
            "explain_code" => self.rewrite("Explain this code", &params).await,
            "optimize_code" => self.rewrite("Optimize this code", &params).await,
            "fix_bug" => self.rewrite("Fix bugs in this code", &params).await,
            "convert_code" => self.convert_code(&params).await,
            other => Err(format!("unsupported action {other}")),
        }
    }
}
