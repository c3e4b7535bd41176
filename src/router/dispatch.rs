//! 分发引擎
//!
//! 按 agent 查处理器、按 action 精确查操作（不做模糊匹配），参数只保留操作声明过的键，
//! 调用失败时把错误转成结果对象，保证路由层始终拿到一个 `{result: ...}`。每次调用输出 JSON 审计日志。

use std::time::Instant;

use serde_json::{json, Map, Value};

use crate::config::PromptTemplates;
use crate::core::RouterError;
use crate::handlers::HandlerRegistry;
use crate::router::pending::Command;
use crate::router::templates::render;

/// 一次分发的结果
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// 处理器成功返回，result 已规范化为对象
    Completed(Value),
    /// 处理器返回错误，result 为 `{result: <错误文案>}`
    Failed { result: Value, error: RouterError },
    /// agent 或 action 不存在
    Unsupported(RouterError),
}

impl DispatchOutcome {
    /// 回复用户的文本（结果对象里的 result 字段）
    pub fn result_text(&self, prompts: &PromptTemplates) -> String {
        match self {
            Self::Completed(v) | Self::Failed { result: v, .. } => result_field_text(v),
            Self::Unsupported(RouterError::UnknownAgent(agent)) => {
                render(&prompts.unsupported_agent, &[("agent", agent.as_str())])
            }
            Self::Unsupported(RouterError::UnknownAction { agent, action }) => render(
                &prompts.unsupported_action,
                &[("agent", agent.as_str()), ("action", action.as_str())],
            ),
            Self::Unsupported(other) => other.to_string(),
        }
    }
}

/// 结果对象的 result 字段转成文本：字符串原样输出，其余值序列化；缺失时序列化整个对象
pub fn result_field_text(result: &Value) -> String {
    match result.get("result") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => match result {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        },
    }
}

/// 把处理器的任意返回值规范为对象；非对象包进 `{result: ...}`
pub fn normalize_result(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(map),
        other => json!({ "result": other }),
    }
}

pub struct Dispatcher {
    registry: HandlerRegistry,
    prompts: PromptTemplates,
}

impl Dispatcher {
    pub fn new(registry: HandlerRegistry, prompts: PromptTemplates) -> Self {
        Self { registry, prompts }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// 分发一条参数齐全的指令
    pub async fn dispatch(&self, cmd: &Command) -> DispatchOutcome {
        let Some(handler) = self.registry.get(&cmd.agent) else {
            tracing::warn!(agent = %cmd.agent, "Unknown agent");
            return DispatchOutcome::Unsupported(RouterError::UnknownAgent(cmd.agent.clone()));
        };
        let Some(op) = handler.operation(&cmd.action).cloned() else {
            tracing::warn!(agent = %cmd.agent, action = %cmd.action, "Unknown action");
            return DispatchOutcome::Unsupported(RouterError::UnknownAction {
                agent: cmd.agent.clone(),
                action: cmd.action.clone(),
            });
        };

        let params = op.filter(&cmd.params);
        let dropped: Vec<&String> = cmd.params.keys().filter(|k| !op.accepts(k)).collect();
        if !dropped.is_empty() {
            tracing::debug!(?dropped, "Dropped undeclared params");
        }

        let start = Instant::now();
        let preview = params_preview(&params);
        let result = handler.invoke(&cmd.action, params).await;
        let audit = json!({
            "event": "dispatch_audit",
            "agent": cmd.agent,
            "action": cmd.action,
            "ok": result.is_ok(),
            "duration_ms": start.elapsed().as_millis() as u64,
            "params_preview": preview,
        });
        tracing::info!(audit = %audit.to_string(), "dispatch");

        match result {
            Ok(value) => DispatchOutcome::Completed(normalize_result(value)),
            Err(message) => {
                let text = render(
                    &self.prompts.execution_error,
                    &[
                        ("agent", cmd.agent.as_str()),
                        ("action", cmd.action.as_str()),
                        ("error", message.as_str()),
                    ],
                );
                let error = RouterError::HandlerExecution {
                    agent: cmd.agent.clone(),
                    action: cmd.action.clone(),
                    message,
                };
                tracing::warn!(error = %error, "Handler failed");
                DispatchOutcome::Failed {
                    result: json!({ "result": text }),
                    error,
                }
            }
        }
    }
}

fn params_preview(params: &Map<String, Value>) -> String {
    let s = Value::Object(params.clone()).to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
