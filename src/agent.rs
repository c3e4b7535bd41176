//! 组装：按配置创建 LLM 后端、处理器注册表与路由
//!
//! 前端（REPL 或其它接入方式）只需调用 `build_router`，拿到 Router 后逐条 `process(uid, text)`。

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{load_config, load_prompt, AppConfig};
use crate::core::RouterError;
use crate::handlers::{
    ChatHandler, DeveloperHandler, EchoHandler, GithubHandler, HandlerRegistry, JiraHandler,
    ResearchHandler,
};
use crate::llm::{create_deepseek_client, LlmClient, MockLlmClient, OpenAiClient};
use crate::memory::MemorySessionStore;
use crate::router::compose::{DEFAULT_COMMENTARY_PROMPT, DEFAULT_FOLLOWUP_PROMPT};
use crate::router::inference::DEFAULT_MEMORY_PROMPT;
use crate::router::intent::DEFAULT_INTERPRETER_PROMPT;
use crate::router::{LlmCommentary, LlmFollowups, LlmIntentResolver, MemoryInference, Router};

/// 选定的 LLM 后端；live 为 false 表示没有可用 Key，正在使用 Mock
pub struct LlmBackend {
    pub client: Arc<dyn LlmClient>,
    pub live: bool,
}

/// 根据配置与环境变量选择 LLM 后端（DeepSeek / OpenAI 兼容 / Mock）
pub fn create_llm_from_config(cfg: &AppConfig) -> LlmBackend {
    let provider = cfg.llm.provider.to_lowercase();
    let timeout = cfg.llm.timeouts.request;
    // 有 DeepSeek Key，或配置为 deepseek 且仅有 OpenAI Key 时也走 DeepSeek 端点
    let use_deepseek = std::env::var("DEEPSEEK_API_KEY").is_ok()
        || (provider == "deepseek" && std::env::var("OPENAI_API_KEY").is_ok());
    let use_openai = std::env::var("OPENAI_API_KEY").is_ok() && provider != "deepseek";

    if use_deepseek {
        let model = cfg
            .llm
            .deepseek
            .model
            .clone()
            .unwrap_or_else(|| cfg.llm.model.clone());
        tracing::info!("Using DeepSeek LLM ({})", model);
        LlmBackend {
            client: Arc::new(create_deepseek_client(Some(model.as_str()), timeout)),
            live: true,
        }
    } else if use_openai {
        let model = cfg
            .llm
            .openai
            .model
            .clone()
            .unwrap_or_else(|| "gpt-4o-mini".to_string());
        tracing::info!("Using OpenAI LLM ({})", model);
        let client = OpenAiClient::new(
            cfg.llm.base_url.as_deref(),
            &model,
            std::env::var("OPENAI_API_KEY").ok().as_deref(),
        )
        .with_timeout(timeout);
        LlmBackend {
            client: Arc::new(client),
            live: true,
        }
    } else {
        tracing::warn!("No API key set or provider unknown, using Mock LLM");
        LlmBackend {
            client: Arc::new(MockLlmClient::new()),
            live: false,
        }
    }
}

/// 按 [agents].enabled 显式注册处理器；未知名称记警告后跳过
pub fn build_registry(cfg: &AppConfig, llm: Arc<dyn LlmClient>) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    for name in &cfg.agents.enabled {
        match name.as_str() {
            "developer" => registry.register(DeveloperHandler::new(Arc::clone(&llm))),
            "github" => registry.register(GithubHandler::from_config(&cfg.github)),
            "research" => registry.register(ResearchHandler::from_config(&cfg.github, Arc::clone(&llm))),
            "jira" => registry.register(JiraHandler::from_config(&cfg.jira)),
            "chat" => registry.register(ChatHandler::new(Arc::clone(&llm))),
            "echo" => registry.register(EchoHandler::new()),
            other => tracing::warn!(agent = %other, "Unknown agent in config, skipping"),
        }
    }
    registry
}

/// 用给定配置与 LLM 组装路由
pub fn build_router_with(cfg: &AppConfig, backend: LlmBackend) -> Router {
    let llm = backend.client;
    let registry = build_registry(cfg, Arc::clone(&llm));
    let resolver = LlmIntentResolver::new(
        Arc::clone(&llm),
        load_prompt("interpreter", DEFAULT_INTERPRETER_PROMPT),
        registry.catalog(),
    );

    let mut inference = MemoryInference::new(cfg.memory.rules.clone());
    if backend.live {
        inference = inference.with_llm(
            Arc::clone(&llm),
            load_prompt("memory_inference", DEFAULT_MEMORY_PROMPT),
        );
    }

    let mut builder = Router::builder(Arc::new(resolver), registry)
        .with_store(Arc::new(MemorySessionStore::new(cfg.app.stm_max_len)))
        .with_templates(cfg.prompts.clone(), cfg.messages.clone())
        .with_inference(inference)
        .with_autofill(cfg.memory.autofill.clone())
        .with_chat_agent(cfg.agents.chat_agent.clone());

    if backend.live {
        builder = builder.with_memory_llm(Arc::clone(&llm));
        if cfg.compose.beautify {
            builder = builder.with_composer(Arc::new(LlmCommentary::new(
                Arc::clone(&llm),
                load_prompt("commentary", DEFAULT_COMMENTARY_PROMPT),
            )));
        }
        if cfg.compose.followups {
            builder = builder.with_followups(
                Arc::new(LlmFollowups::new(
                    Arc::clone(&llm),
                    load_prompt("followup", DEFAULT_FOLLOWUP_PROMPT),
                )),
                cfg.compose.followup_prefix.clone(),
            );
        }
    }

    builder.build()
}

/// 加载配置并组装路由
pub fn build_router(config_path: Option<PathBuf>) -> Result<Router, RouterError> {
    let cfg = load_config(config_path)?;
    let backend = create_llm_from_config(&cfg);
    Ok(build_router_with(&cfg, backend))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_follows_enabled_list() {
        let mut cfg = AppConfig::default();
        cfg.agents.enabled = vec!["echo".into(), "slack".into(), "jira".into(), "chat".into()];
        let registry = build_registry(&cfg, Arc::new(MockLlmClient::new()));
        assert_eq!(registry.names(), vec!["chat", "echo", "jira"]);
    }

    #[test]
    fn test_default_registry_has_all_handlers() {
        let registry = build_registry(&AppConfig::default(), Arc::new(MockLlmClient::new()));
        assert_eq!(
            registry.names(),
            vec!["chat", "developer", "echo", "github", "jira", "research"]
        );
        assert!(registry.operation("jira", "create_ticket").is_some());
        assert!(registry.operation("github", "merge_branch").is_some());
    }

    #[tokio::test]
    async fn test_mock_backend_router_echoes() {
        let cfg = AppConfig::default();
        let router = build_router_with(
            &cfg,
            LlmBackend {
                client: Arc::new(MockLlmClient::new()),
                live: false,
            },
        );
        assert_eq!(router.process("local", "ping").await, "Echo from Mock: ping");
    }
}
