//! 路由错误类型
//!
//! 每一种错误都在路由层被就地消化为给用户的文字回复，不会冒泡终止会话：
//! 意图解析失败 → 重复补参提示或「没听懂」；未知 agent/action → 模板提示；
//! 处理器失败 → 结果文本；记忆推断失败 → 记日志后忽略。

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouterError {
    /// 意图提取器调用失败或返回无法解析的内容
    #[error("Intent extraction failed: {0}")]
    Extraction(String),

    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("Unknown action: {agent}.{action}")]
    UnknownAction { agent: String, action: String },

    /// 处理器执行时报错
    #[error("{agent} {action} failed: {message}")]
    HandlerExecution {
        agent: String,
        action: String,
        message: String,
    },

    /// 委托推断返回非 JSON 对象或调用失败
    #[error("Memory inference failed: {0}")]
    MemoryInference(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl From<config::ConfigError> for RouterError {
    fn from(e: config::ConfigError) -> Self {
        RouterError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_execution_message() {
        let err = RouterError::HandlerExecution {
            agent: "github".into(),
            action: "create_repo".into(),
            message: "422".into(),
        };
        assert_eq!(err.to_string(), "github create_repo failed: 422");
    }

    #[test]
    fn test_unknown_action_names_both() {
        let err = RouterError::UnknownAction {
            agent: "repo".into(),
            action: "Create".into(),
        };
        assert!(err.to_string().contains("repo.Create"));
    }
}
