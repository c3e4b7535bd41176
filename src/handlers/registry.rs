//! 处理器注册表
//!
//! 所有处理器实现 Handler trait（name / summary / operations / invoke），启动时由
//! HandlerRegistry 按名显式注册，之后只读。分发引擎按 agent 名查找处理器、按操作名查找声明。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::handlers::schema::OperationSpec;
use crate::router::templates::capitalize;

/// 处理器能力描述：概述 + 操作名 → 一行说明
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    pub summary: String,
    pub operations: Vec<(String, String)>,
}

/// 处理器 trait：名称、概述、操作声明、异步调用（params 已按声明过滤）
#[async_trait]
pub trait Handler: Send + Sync {
    /// 处理器名（即意图中的 agent）
    fn name(&self) -> &str;

    /// 一句话概述
    fn summary(&self) -> &str;

    /// 声明的全部操作
    fn operations(&self) -> &[OperationSpec];

    /// 调用操作；返回任意 JSON，Err 为失败原因
    async fn invoke(&self, action: &str, params: Map<String, Value>) -> Result<Value, String>;

    fn operation(&self, action: &str) -> Option<&OperationSpec> {
        self.operations().iter().find(|op| op.name == action)
    }

    fn describe(&self) -> Capabilities {
        Capabilities {
            summary: self.summary().to_string(),
            operations: self
                .operations()
                .iter()
                .map(|op| (op.name.clone(), op.description.clone()))
                .collect(),
        }
    }
}

/// 处理器注册表：按名称存储 Arc<dyn Handler>，有序遍历保证能力列表稳定
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: BTreeMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: impl Handler + 'static) {
        self.register_arc(Arc::new(handler));
    }

    pub fn register_arc(&mut self, handler: Arc<dyn Handler>) {
        let name = handler.name().to_string();
        if self.handlers.insert(name.clone(), handler).is_some() {
            tracing::warn!(agent = %name, "Handler registered twice, keeping the latest");
        } else {
            tracing::info!(agent = %name, "Registered handler");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(name).cloned()
    }

    /// 操作声明（agent 与 action 都存在时）
    pub fn operation(&self, agent: &str, action: &str) -> Option<OperationSpec> {
        self.handlers
            .get(agent)
            .and_then(|h| h.operation(action).cloned())
    }

    pub fn names(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// 所有处理器的能力，按名称排序
    pub fn capabilities(&self) -> Vec<(String, Capabilities)> {
        self.handlers
            .iter()
            .map(|(name, h)| (name.clone(), h.describe()))
            .collect()
    }

    /// 汇总能力列表（Markdown）：`- **Name**: summary` 下挂 `` - `op`: desc ``
    pub fn capability_listing(&self) -> String {
        self.capabilities()
            .into_iter()
            .map(|(name, caps)| {
                let mut line = format!("- **{}**: {}", capitalize(&name), caps.summary);
                for (op, desc) in caps.operations {
                    line.push_str(&format!("\n    - `{}`: {}", op, desc));
                }
                line
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// 供意图提取提示词使用的目录：每行 `- agent.op(a, b?): desc`
    pub fn catalog(&self) -> String {
        let mut lines = Vec::new();
        for (name, handler) in &self.handlers {
            for op in handler.operations() {
                lines.push(format!("- {}.{}: {}", name, op.signature(), op.description));
            }
        }
        lines.join("\n")
    }
}
