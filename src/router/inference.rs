//! 记忆推断：根据一次分发的 (agent, action, params, result) 决定写入长期记忆的键值
//!
//! 先查静态规则表（例如 developer.generate_code 的结果写入 `code`），命中即返回；
//! 否则交给 LLM，用 `<AGENT>` `<ACTION>` `<PARAMS_JSON>` `<RESULT_OBJ_JSON>` 占位的提示词询问。
//! 空输出或 `{}` 表示不写入；输出不是 JSON 对象时报错，由调用方忽略。

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::config::InferenceRuleEntry;
use crate::core::RouterError;
use crate::llm::{strip_code_fences, LlmClient};
use crate::memory::Message;

pub const DEFAULT_MEMORY_PROMPT: &str = "You maintain a long-term memory about the user of a multi-agent assistant.\n\
The agent <AGENT> just ran the action <ACTION> with these parameters:\n<PARAMS_JSON>\n\
It returned:\n<RESULT_OBJ_JSON>\n\n\
If something here is worth remembering for later turns (a created repository, a file path, generated code, \
a preference the user stated), reply with a flat JSON object of key/value pairs to store. \
Use short snake_case keys. If nothing is worth remembering, reply with {}.";

pub struct MemoryInference {
    rules: Vec<InferenceRuleEntry>,
    llm: Option<Arc<dyn LlmClient>>,
    prompt: String,
}

impl MemoryInference {
    pub fn new(rules: Vec<InferenceRuleEntry>) -> Self {
        Self {
            rules,
            llm: None,
            prompt: DEFAULT_MEMORY_PROMPT.to_string(),
        }
    }

    /// 规则未命中时交给 LLM
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>, prompt: impl Into<String>) -> Self {
        self.llm = Some(llm);
        self.prompt = prompt.into();
        self
    }

    /// 推断要合并进长期记忆的键值；空 Map 表示不写入
    pub async fn infer(
        &self,
        agent: &str,
        action: &str,
        params: &Map<String, Value>,
        result: &Value,
    ) -> Result<Map<String, Value>, RouterError> {
        if let Some(updates) = self.apply_rules(agent, action, result) {
            tracing::debug!(agent, action, keys = ?updates.keys().collect::<Vec<_>>(), "Memory rule matched");
            return Ok(updates);
        }
        let Some(llm) = &self.llm else {
            return Ok(Map::new());
        };

        let prompt = self
            .prompt
            .replace("<AGENT>", agent)
            .replace("<ACTION>", action)
            .replace(
                "<PARAMS_JSON>",
                &serde_json::to_string_pretty(params).unwrap_or_default(),
            )
            .replace(
                "<RESULT_OBJ_JSON>",
                &serde_json::to_string_pretty(result).unwrap_or_default(),
            );
        let output = llm
            .complete(&[Message::user(prompt)])
            .await
            .map_err(RouterError::MemoryInference)?;
        parse_updates(&output)
    }

    fn apply_rules(&self, agent: &str, action: &str, result: &Value) -> Option<Map<String, Value>> {
        let mut updates = Map::new();
        for rule in self
            .rules
            .iter()
            .filter(|r| r.agent == agent && r.action == action)
        {
            if let Some(v) = result.get(&rule.field).filter(|v| !v.is_null()) {
                updates.insert(rule.key.clone(), v.clone());
            }
        }
        (!updates.is_empty()).then_some(updates)
    }
}

fn parse_updates(output: &str) -> Result<Map<String, Value>, RouterError> {
    let body = strip_code_fences(output).trim();
    if body.is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(RouterError::MemoryInference(format!(
            "expected a JSON object, got {other}"
        ))),
        Err(e) => Err(RouterError::MemoryInference(format!("invalid JSON: {e}"))),
    }
}
