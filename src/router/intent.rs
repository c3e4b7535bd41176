//! 意图提取适配层
//!
//! 包装外部意图提取器（LLM）：输入用户文本、未完成指令上下文与近期对话，
//! 输出结构化猜测 `{agent, action, params, needs}`。无状态。
//!
//! 输出形状不对时就地纠正：缺失或类型错误的 agent/action 置为 "unknown"，
//! params 不是对象则置空，needs 不是字符串数组则置空。下游永远拿到结构合法的意图。

use std::sync::Arc;

use async_trait::async_trait;
use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::RouterError;
use crate::llm::{strip_code_fences, LlmClient};
use crate::memory::Message;
use crate::router::pending::PendingCommand;

/// agent / action 无法识别时的占位值
pub const UNKNOWN: &str = "unknown";

/// 单轮解析出的意图
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedIntent {
    pub agent: String,
    pub action: String,
    pub params: Map<String, Value>,
    pub needs: Vec<String>,
    pub raw_input: String,
}

impl ParsedIntent {
    pub fn new(agent: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            action: action.into(),
            params: Map::new(),
            needs: Vec::new(),
            raw_input: String::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_needs<I, S>(mut self, needs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for n in needs {
            push_unique(&mut self.needs, n.into());
        }
        self
    }

    pub fn with_raw_input(mut self, raw_input: impl Into<String>) -> Self {
        self.raw_input = raw_input.into();
        self
    }

    pub fn unknown(raw_input: &str) -> Self {
        Self::new(UNKNOWN, UNKNOWN).with_raw_input(raw_input)
    }

    pub fn is_unknown(&self) -> bool {
        self.agent == UNKNOWN
    }

    /// 从提取器输出的 JSON 构造；任何形状问题都纠正为默认值，不会失败
    pub fn from_value(value: Value, raw_input: &str) -> Self {
        let Value::Object(mut obj) = value else {
            tracing::warn!("Intent output is not an object, treating as unknown");
            return Self::unknown(raw_input);
        };

        let agent = take_string(&mut obj, "agent");
        let action = take_string(&mut obj, "action");

        let params = match obj.remove("params") {
            // null 视为未提供，避免占位值把 needs 误判为已满足
            Some(Value::Object(p)) => p.into_iter().filter(|(_, v)| !v.is_null()).collect(),
            _ => Map::new(),
        };

        let mut needs = Vec::new();
        if let Some(Value::Array(items)) = obj.remove("needs") {
            for item in items {
                if let Value::String(s) = item {
                    let s = s.trim().to_string();
                    if !s.is_empty() {
                        push_unique(&mut needs, s);
                    }
                }
            }
        }

        Self {
            agent,
            action,
            params,
            needs,
            raw_input: raw_input.to_string(),
        }
    }

    /// 从提取器的原始文本输出解析（容忍 ```json 围栏与前后多余文字）
    pub fn parse(output: &str, raw_input: &str) -> Result<Self, RouterError> {
        let stripped = strip_code_fences(output);
        if stripped.is_empty() {
            return Err(RouterError::Extraction("empty extractor output".into()));
        }
        let json_str = match (stripped.find('{'), stripped.rfind('}')) {
            (Some(start), Some(end)) if start < end => &stripped[start..=end],
            _ => stripped,
        };
        let value: Value = serde_json::from_str(json_str)
            .map_err(|e| RouterError::Extraction(format!("{}: {}", e, json_str)))?;
        Ok(Self::from_value(value, raw_input))
    }
}

fn take_string(obj: &mut Map<String, Value>, key: &str) -> String {
    match obj.remove(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        _ => UNKNOWN.to_string(),
    }
}

pub(crate) fn push_unique(list: &mut Vec<String>, item: String) {
    if !list.contains(&item) {
        list.push(item);
    }
}

/// 意图输出格式（仅用于生成 Schema 拼入提示词）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct IntentFormat {
    /// 处理器名，如 developer、github、chat
    pub agent: String,
    /// 处理器上的操作名，区分大小写
    pub action: String,
    /// 已从用户输入中得到的参数
    pub params: std::collections::HashMap<String, Value>,
    /// 仍缺失的必填参数名
    pub needs: Vec<String>,
}

/// 返回意图输出的 JSON Schema 字符串
pub fn intent_schema_json() -> String {
    let schema = schema_for!(IntentFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

/// 意图提取器接口：路由层只依赖它，测试中可替换为脚本实现
#[async_trait]
pub trait IntentResolver: Send + Sync {
    async fn resolve(
        &self,
        text: &str,
        pending: Option<&PendingCommand>,
        history: &[Message],
    ) -> Result<ParsedIntent, RouterError>;
}

pub const DEFAULT_INTERPRETER_PROMPT: &str = "You are the command interpreter of a multi-agent assistant. \
Map the user's message to exactly one agent and action from the catalog below. \
Put every parameter value you can find in `params` and list required parameters that are still missing in `needs`. \
General conversation goes to agent `chat` with action `chat`. \
To store a fact use chat.remember_this(fact); to answer from memory use chat.query_memory(query); \
to show past messages use chat.get_chat_history; to list abilities use chat.show_capabilities. \
Reply with a single JSON object and nothing else.";

/// 基于 LLM 的意图提取器：system 提示 = 基础提示 + 输出 Schema + 能力目录 + 近期对话 + 未完成指令
pub struct LlmIntentResolver {
    llm: Arc<dyn LlmClient>,
    base_prompt: String,
    catalog: String,
}

impl LlmIntentResolver {
    pub fn new(llm: Arc<dyn LlmClient>, base_prompt: impl Into<String>, catalog: impl Into<String>) -> Self {
        Self {
            llm,
            base_prompt: base_prompt.into(),
            catalog: catalog.into(),
        }
    }

    pub fn build_system_prompt(&self, pending: Option<&PendingCommand>, history: &[Message]) -> String {
        let mut parts = vec![
            self.base_prompt.clone(),
            format!("\n**Output JSON Schema:**\n{}", intent_schema_json()),
        ];
        if !self.catalog.is_empty() {
            parts.push(format!("\n**Available agents and actions:**\n{}", self.catalog));
        }

        if !history.is_empty() {
            let history_str = history
                .iter()
                .map(|m| format!("- {}: {}", m.role.as_str(), m.content))
                .collect::<Vec<_>>()
                .join("\n");
            parts.push(format!(
                "\n**Recent Conversation History (for context):**\n{}\n",
                history_str
            ));
        }

        if let Some(cmd) = pending {
            let ctx = serde_json::to_string_pretty(cmd).unwrap_or_default();
            parts.push(format!(
                "\n**Active Incomplete Command Context:**\n```json\n{}\n```\n\n\
                **Instruction for THIS turn:** if the user's message supplies a value for one of the `needs` above, \
                do NOT change the `agent` or `action`; fill the matching `params` entry and update `needs`. \
                Only infer a new agent/action when the message is clearly a new, distinct command.",
                ctx
            ));
        }

        parts.join("\n")
    }
}

#[async_trait]
impl IntentResolver for LlmIntentResolver {
    async fn resolve(
        &self,
        text: &str,
        pending: Option<&PendingCommand>,
        history: &[Message],
    ) -> Result<ParsedIntent, RouterError> {
        let messages = vec![
            Message::system(self.build_system_prompt(pending, history)),
            Message::user(text),
        ];
        let output = self
            .llm
            .complete(&messages)
            .await
            .map_err(RouterError::Extraction)?;
        tracing::debug!(output = %output, "interpreter output");
        ParsedIntent::parse(&output, text)
    }
}
