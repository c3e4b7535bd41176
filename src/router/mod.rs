//! 路由：把一条自然语言消息变成一次完整的处理器调用
//!
//! 流程：意图提取 → 补参状态机（含长期记忆自动补参）→ 内置动作或分发 → 记忆推断 → 写入短期记忆 → 润色。
//! 处理一条消息期间持有该用户会话的锁，同一用户的消息严格串行。

pub mod builtin;
pub mod compose;
pub mod dispatch;
pub mod inference;
pub mod intent;
pub mod pending;
pub mod templates;

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::Instrument;
use uuid::Uuid;

use crate::config::{AutofillEntry, MessageTemplates, PromptTemplates};
use crate::handlers::HandlerRegistry;
use crate::llm::LlmClient;
use crate::memory::{MemorySessionStore, SessionSnapshot, SessionStore, UserSession};

pub use builtin::Builtins;
pub use compose::{FollowupSuggester, LlmCommentary, LlmFollowups, ResponseComposer};
pub use dispatch::{DispatchOutcome, Dispatcher};
pub use inference::MemoryInference;
pub use intent::{IntentResolver, LlmIntentResolver, ParsedIntent, UNKNOWN};
pub use pending::{advance, autofill_from_memory, humanize_needs, Command, PendingCommand, Transition};
pub use templates::render;

use intent::push_unique;

const CHAT_ACTION: &str = "chat";
const CHAT_MESSAGE_PARAM: &str = "message";

pub struct Router {
    resolver: Arc<dyn IntentResolver>,
    store: Arc<dyn SessionStore>,
    dispatcher: Dispatcher,
    builtins: Builtins,
    inference: MemoryInference,
    composer: Option<Arc<dyn ResponseComposer>>,
    followups: Option<Arc<dyn FollowupSuggester>>,
    followup_prefix: String,
    autofill: Vec<AutofillEntry>,
    chat_agent: String,
    prompts: PromptTemplates,
    messages: MessageTemplates,
}

/// Router 构建器：必需的是意图提取器与处理器注册表，其余都有默认值
pub struct RouterBuilder {
    resolver: Arc<dyn IntentResolver>,
    registry: HandlerRegistry,
    store: Option<Arc<dyn SessionStore>>,
    prompts: PromptTemplates,
    messages: MessageTemplates,
    inference: MemoryInference,
    memory_llm: Option<Arc<dyn LlmClient>>,
    composer: Option<Arc<dyn ResponseComposer>>,
    followups: Option<Arc<dyn FollowupSuggester>>,
    followup_prefix: String,
    autofill: Vec<AutofillEntry>,
    chat_agent: String,
}

impl RouterBuilder {
    pub fn new(resolver: Arc<dyn IntentResolver>, registry: HandlerRegistry) -> Self {
        Self {
            resolver,
            registry,
            store: None,
            prompts: PromptTemplates::default(),
            messages: MessageTemplates::default(),
            inference: MemoryInference::new(Vec::new()),
            memory_llm: None,
            composer: None,
            followups: None,
            followup_prefix: String::new(),
            autofill: Vec::new(),
            chat_agent: CHAT_ACTION.to_string(),
        }
    }

    /// 会话存储；默认为容量 20 的内存存储
    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_templates(mut self, prompts: PromptTemplates, messages: MessageTemplates) -> Self {
        self.prompts = prompts;
        self.messages = messages;
        self
    }

    pub fn with_inference(mut self, inference: MemoryInference) -> Self {
        self.inference = inference;
        self
    }

    /// query_memory 内置动作使用的 LLM
    pub fn with_memory_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.memory_llm = Some(llm);
        self
    }

    pub fn with_autofill(mut self, autofill: Vec<AutofillEntry>) -> Self {
        self.autofill = autofill;
        self
    }

    pub fn with_chat_agent(mut self, name: impl Into<String>) -> Self {
        self.chat_agent = name.into();
        self
    }

    pub fn with_composer(mut self, composer: Arc<dyn ResponseComposer>) -> Self {
        self.composer = Some(composer);
        self
    }

    pub fn with_followups(mut self, suggester: Arc<dyn FollowupSuggester>, prefix: impl Into<String>) -> Self {
        self.followups = Some(suggester);
        self.followup_prefix = prefix.into();
        self
    }

    pub fn build(self) -> Router {
        let mut builtins = Builtins::new(self.prompts.clone(), self.messages.clone());
        if let Some(llm) = self.memory_llm {
            builtins = builtins.with_llm(llm);
        }
        Router {
            resolver: self.resolver,
            store: self
                .store
                .unwrap_or_else(|| Arc::new(MemorySessionStore::default())),
            dispatcher: Dispatcher::new(self.registry, self.prompts.clone()),
            builtins,
            inference: self.inference,
            composer: self.composer,
            followups: self.followups,
            followup_prefix: self.followup_prefix,
            autofill: self.autofill,
            chat_agent: self.chat_agent,
            prompts: self.prompts,
            messages: self.messages,
        }
    }
}

impl Router {
    pub fn builder(resolver: Arc<dyn IntentResolver>, registry: HandlerRegistry) -> RouterBuilder {
        RouterBuilder::new(resolver, registry)
    }

    pub fn registry(&self) -> &HandlerRegistry {
        self.dispatcher.registry()
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// 用户状态快照；未出现过的用户返回 None
    pub async fn snapshot(&self, uid: &str) -> Option<SessionSnapshot> {
        let session = self.store.get(uid).await?;
        let snapshot = session.lock().await.snapshot();
        Some(snapshot)
    }

    /// 处理一条用户消息，总是返回一段回复文本
    pub async fn process(&self, uid: &str, text: &str) -> String {
        let span = tracing::info_span!("turn", uid = %uid, turn_id = %Uuid::new_v4());
        self.process_turn(uid, text).instrument(span).await
    }

    async fn process_turn(&self, uid: &str, text: &str) -> String {
        let handle = self.store.session(uid).await;
        let mut session = handle.lock().await;

        let history = session.short_term();
        let mut intent = match self
            .resolver
            .resolve(text, session.pending.as_ref(), &history)
            .await
        {
            Ok(intent) => intent,
            Err(e) => {
                tracing::warn!(error = %e, "Intent extraction failed");
                return match &session.pending {
                    Some(cmd) => self.reprompt(&cmd.needs),
                    None => self.prompts.unclear_command.clone(),
                };
            }
        };
        if intent.raw_input.is_empty() {
            intent.raw_input = text.to_string();
        }
        tracing::info!(
            agent = %intent.agent,
            action = %intent.action,
            needs = ?intent.needs,
            "Parsed intent"
        );

        if session.pending.is_none() {
            if intent.is_unknown() {
                return self.prompts.unclear_command.clone();
            }
            self.add_schema_needs(&mut intent);
        }
        autofill_from_memory(
            &mut intent,
            session.pending.as_ref(),
            &session.long_term,
            &self.autofill,
        );

        match advance(&mut session.pending, intent) {
            Transition::Reprompt(needs) => self.reprompt(&needs),
            Transition::Dispatch(cmd) => self.execute(cmd, &mut session).await,
        }
    }

    /// 空闲态下补上操作声明里缺失的必填参数（chat 代理的参数由原始输入兜底，不追问）
    fn add_schema_needs(&self, intent: &mut ParsedIntent) {
        if intent.agent == self.chat_agent {
            return;
        }
        if let Some(op) = self.registry().operation(&intent.agent, &intent.action) {
            for name in op.missing(&intent.params) {
                push_unique(&mut intent.needs, name);
            }
        }
    }

    fn reprompt(&self, needs: &[String]) -> String {
        render(
            &self.prompts.missing_params,
            &[("needs", humanize_needs(needs).as_str())],
        )
    }

    async fn execute(&self, mut cmd: Command, session: &mut UserSession) -> String {
        if cmd.agent == self.chat_agent {
            let reply = self
                .builtins
                .run(&cmd.action, &cmd.params, &cmd.raw_input, session, || {
                    self.registry().capability_listing()
                })
                .await;
            if let Some(reply) = reply {
                if reply.record_turn {
                    session.append_turn(&cmd.raw_input, &reply.text);
                }
                return reply.text;
            }
            cmd.action = CHAT_ACTION.to_string();
            let mut params = Map::new();
            params.insert(
                CHAT_MESSAGE_PARAM.to_string(),
                Value::String(cmd.raw_input.clone()),
            );
            cmd.params = params;
        }

        let result = match self.dispatcher.dispatch(&cmd).await {
            DispatchOutcome::Completed(result) => {
                self.infer_memory(&cmd, &result, session).await;
                result
            }
            DispatchOutcome::Failed { result, .. } => {
                let text = dispatch::result_field_text(&result);
                session.append_turn(&cmd.raw_input, &text);
                return text;
            }
            unsupported @ DispatchOutcome::Unsupported(_) => {
                return unsupported.result_text(&self.prompts);
            }
        };

        let raw_text = match result.get("result") {
            Some(_) => dispatch::result_field_text(&result),
            None => self.messages.action_complete.clone(),
        };
        session.append_turn(&cmd.raw_input, &raw_text);

        let link = result.get("link").and_then(|v| v.as_str());
        self.compose(&cmd.raw_input, &raw_text, link).await
    }

    async fn infer_memory(&self, cmd: &Command, result: &Value, session: &mut UserSession) {
        match self
            .inference
            .infer(&cmd.agent, &cmd.action, &cmd.params, result)
            .await
        {
            Ok(updates) if updates.is_empty() => {}
            Ok(updates) => {
                tracing::info!(keys = ?updates.keys().collect::<Vec<_>>(), "Storing inferred memory");
                session.merge_long_term(updates);
            }
            Err(e) => tracing::warn!(error = %e, "Memory inference skipped"),
        }
    }

    async fn compose(&self, user_input: &str, raw_text: &str, link: Option<&str>) -> String {
        let mut response = match &self.composer {
            Some(composer) => composer
                .compose(user_input, raw_text, link)
                .await
                .unwrap_or_else(|| raw_text.to_string()),
            None => raw_text.to_string(),
        };
        if let Some(followups) = &self.followups {
            if let Some(suggestion) = followups.suggest(user_input, raw_text).await {
                response.push_str(&format!("\n\n{}{}", self.followup_prefix, suggestion));
            }
        }
        let response = response.trim();
        if response.is_empty() {
            self.messages.error_fallback.clone()
        } else {
            response.to_string()
        }
    }
}
