//! Hive - 多代理对话指令路由
//!
//! 模块划分：
//! - **agent**: 按配置组装 LLM 后端、处理器注册表与路由
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型
//! - **handlers**: 处理器 trait、操作声明与内置处理器（developer / github / research / jira / chat / echo）
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **memory**: 短期记忆、长期记忆与按用户隔离的会话存储
//! - **observability**: 日志初始化
//! - **router**: 意图提取、补参状态机、分发、记忆推断与回复润色

pub mod agent;
pub mod config;
pub mod core;
pub mod handlers;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod router;

pub use router::Router;
