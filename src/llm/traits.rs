//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Mock）实现 LlmClient。意图提取、记忆推断、
//! 结果润色与追问建议都只依赖这个 trait，路由核心不关心具体后端。

use async_trait::async_trait;

use crate::memory::Message;

/// LLM 客户端 trait：非流式完成
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成，返回首条候选的文本
    async fn complete(&self, messages: &[Message]) -> Result<String, String>;
}

/// 去掉模型输出外层的 Markdown 代码围栏（```json ... ``` 或 ``` ... ```）
pub fn strip_code_fences(output: &str) -> &str {
    let trimmed = output.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // 跳过围栏后的语言标记（json / python 等）
    let rest = match rest.find('\n') {
        Some(nl) if !rest[..nl].trim().contains(' ') => &rest[nl + 1..],
        _ => rest,
    };
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}
