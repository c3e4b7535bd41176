//! 回复润色与追问建议
//!
//! 两者都是可选协作者：失败或输出为空时退回原始文本，不影响分发结果。

use std::sync::Arc;

use async_trait::async_trait;

use crate::llm::LlmClient;
use crate::memory::Message;

pub const DEFAULT_COMMENTARY_PROMPT: &str = "You turn raw tool output into a short, friendly reply.\n\
The user asked: <USER_INPUT>\n\
The tool returned:\n<RAW_RESULT>\n\
Relevant link: <LINK>\n\n\
Rewrite the result for the user. Keep every fact, name and link exactly, keep code blocks verbatim, \
and do not invent anything.";

pub const DEFAULT_FOLLOWUP_PROMPT: &str = "Given this exchange, suggest ONE short, useful next step \
the user might want to take, phrased as a question.\n\n<CONTEXT>\n\n\
If there is no natural follow-up, reply with exactly NONE.";

/// 把原始结果改写为面向用户的回复；None 表示沿用原文
#[async_trait]
pub trait ResponseComposer: Send + Sync {
    async fn compose(&self, user_input: &str, raw_result: &str, link: Option<&str>) -> Option<String>;
}

/// 基于本轮问答给出一个追问建议；None 表示不追加
#[async_trait]
pub trait FollowupSuggester: Send + Sync {
    async fn suggest(&self, user_input: &str, response: &str) -> Option<String>;
}

pub struct LlmCommentary {
    llm: Arc<dyn LlmClient>,
    prompt: String,
}

impl LlmCommentary {
    pub fn new(llm: Arc<dyn LlmClient>, prompt: impl Into<String>) -> Self {
        Self {
            llm,
            prompt: prompt.into(),
        }
    }
}

#[async_trait]
impl ResponseComposer for LlmCommentary {
    async fn compose(&self, user_input: &str, raw_result: &str, link: Option<&str>) -> Option<String> {
        let prompt = self
            .prompt
            .replace("<USER_INPUT>", user_input)
            .replace("<RAW_RESULT>", raw_result)
            .replace("<LINK>", link.filter(|l| !l.is_empty()).unwrap_or("N/A"));
        match self.llm.complete(&[Message::user(prompt)]).await {
            Ok(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Commentary failed, using raw result");
                None
            }
        }
    }
}

pub struct LlmFollowups {
    llm: Arc<dyn LlmClient>,
    prompt: String,
}

impl LlmFollowups {
    pub fn new(llm: Arc<dyn LlmClient>, prompt: impl Into<String>) -> Self {
        Self {
            llm,
            prompt: prompt.into(),
        }
    }
}

#[async_trait]
impl FollowupSuggester for LlmFollowups {
    async fn suggest(&self, user_input: &str, response: &str) -> Option<String> {
        let context = format!("User: {user_input}\nAssistant: {response}");
        let prompt = self.prompt.replace("<CONTEXT>", &context);
        match self.llm.complete(&[Message::system(prompt)]).await {
            Ok(text) => {
                let text = text.trim();
                (!text.is_empty() && !text.eq_ignore_ascii_case("NONE")).then(|| text.to_string())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Follow-up generation failed");
                None
            }
        }
    }
}
