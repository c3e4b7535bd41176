//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__LLM__PROVIDER=openai`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub agents: AgentsSection,
    pub github: GithubSection,
    pub jira: JiraSection,
    pub memory: MemorySection,
    pub compose: ComposeSection,
    pub prompts: PromptTemplates,
    pub messages: MessageTemplates,
}

/// [app] 段：应用名、短期记忆容量
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    /// 短期记忆保留的消息条数（user + assistant 各算一条）
    #[serde(default = "default_stm_max_len")]
    pub stm_max_len: usize,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            stm_max_len: default_stm_max_len(),
        }
    }
}

fn default_stm_max_len() -> usize {
    20
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：deepseek / openai；优先级由 API Key 与 provider 共同决定
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    #[serde(default)]
    pub deepseek: LlmDeepSeekSection,
    #[serde(default)]
    pub openai: LlmOpenAiSection,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            deepseek: LlmDeepSeekSection::default(),
            openai: LlmOpenAiSection::default(),
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

fn default_provider() -> String {
    "deepseek".to_string()
}

fn default_model() -> String {
    "deepseek-chat".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmDeepSeekSection {
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmOpenAiSection {
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    60
}

/// [agents] 段：启动时注册的处理器名（developer / github / research / jira / chat / echo）
#[derive(Debug, Clone, Deserialize)]
pub struct AgentsSection {
    #[serde(default = "default_enabled_agents")]
    pub enabled: Vec<String>,
    /// 内置对话动作（remember_this / query_memory 等）所属的 agent 名
    #[serde(default = "default_chat_agent")]
    pub chat_agent: String,
}

impl Default for AgentsSection {
    fn default() -> Self {
        Self {
            enabled: default_enabled_agents(),
            chat_agent: default_chat_agent(),
        }
    }
}

fn default_enabled_agents() -> Vec<String> {
    vec![
        "developer".into(),
        "github".into(),
        "research".into(),
        "jira".into(),
        "chat".into(),
        "echo".into(),
    ]
}

fn default_chat_agent() -> String {
    "chat".to_string()
}

/// [github] 段：REST API 地址、账号、默认分支；Token 只从环境变量 GITHUB_PAT 读取
#[derive(Debug, Clone, Deserialize)]
pub struct GithubSection {
    #[serde(default = "default_github_api")]
    pub api_base: String,
    pub username: Option<String>,
    #[serde(default = "default_branch")]
    pub default_branch: String,
    #[serde(default = "default_github_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GithubSection {
    fn default() -> Self {
        Self {
            api_base: default_github_api(),
            username: None,
            default_branch: default_branch(),
            timeout_secs: default_github_timeout_secs(),
        }
    }
}

fn default_github_api() -> String {
    "https://api.github.com".to_string()
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_github_timeout_secs() -> u64 {
    30
}

/// [jira] 段：站点地址与账号邮箱；API Token 只从环境变量 JIRA_API_TOKEN 读取。
/// base_url / email 未配置时回退到 JIRA_BASE_URL / JIRA_USER_EMAIL。
#[derive(Debug, Clone, Deserialize)]
pub struct JiraSection {
    pub base_url: Option<String>,
    pub email: Option<String>,
    /// create_project 使用的项目类型与模板
    #[serde(default = "default_jira_project_type")]
    pub project_type: String,
    #[serde(default = "default_jira_project_template")]
    pub project_template: String,
    #[serde(default = "default_jira_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for JiraSection {
    fn default() -> Self {
        Self {
            base_url: None,
            email: None,
            project_type: default_jira_project_type(),
            project_template: default_jira_project_template(),
            timeout_secs: default_jira_timeout_secs(),
        }
    }
}

fn default_jira_project_type() -> String {
    "software".to_string()
}

fn default_jira_project_template() -> String {
    "com.pyxis.greenhopper.jira:gh-simplified-scrum-classic".to_string()
}

fn default_jira_timeout_secs() -> u64 {
    30
}

/// [memory] 段：记忆推断规则表与自动补参映射
#[derive(Debug, Clone, Deserialize)]
pub struct MemorySection {
    #[serde(default = "default_inference_rules")]
    pub rules: Vec<InferenceRuleEntry>,
    #[serde(default = "default_autofill")]
    pub autofill: Vec<AutofillEntry>,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            rules: default_inference_rules(),
            autofill: default_autofill(),
        }
    }
}

/// [[memory.rules]]：agent.action 的结果里存在 field 时，写入长期记忆 key
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct InferenceRuleEntry {
    pub agent: String,
    pub action: String,
    #[serde(default = "default_rule_field")]
    pub field: String,
    pub key: String,
}

fn default_rule_field() -> String {
    "result".to_string()
}

fn default_inference_rules() -> Vec<InferenceRuleEntry> {
    vec![InferenceRuleEntry {
        agent: "developer".into(),
        action: "generate_code".into(),
        field: default_rule_field(),
        key: "code".into(),
    }]
}

/// [[memory.autofill]]：needs 中出现 param 且长期记忆有 memory_key 时自动填入
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct AutofillEntry {
    pub param: String,
    pub memory_key: String,
}

fn default_autofill() -> Vec<AutofillEntry> {
    vec![AutofillEntry {
        param: "content".into(),
        memory_key: "code".into(),
    }]
}

/// [compose] 段：结果润色与追问建议（都依赖真实 LLM）
#[derive(Debug, Clone, Deserialize)]
pub struct ComposeSection {
    #[serde(default = "default_true")]
    pub beautify: bool,
    #[serde(default = "default_true")]
    pub followups: bool,
    #[serde(default = "default_followup_prefix")]
    pub followup_prefix: String,
}

impl Default for ComposeSection {
    fn default() -> Self {
        Self {
            beautify: true,
            followups: true,
            followup_prefix: default_followup_prefix(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_followup_prefix() -> String {
    "💡 ".to_string()
}

/// [prompts] 段：路由层的系统回复模板，`{name}` 形式占位
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PromptTemplates {
    pub missing_params: String,
    pub unsupported_agent: String,
    pub unsupported_action: String,
    pub execution_error: String,
    pub unclear_command: String,
    pub all_capabilities_list: String,
    pub memory_value_found: String,
    pub memory_query: String,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            missing_params: "I need a bit more information to do that. Please provide: {needs}."
                .into(),
            unsupported_agent: "Sorry, I don't have an agent called '{agent}'.".into(),
            unsupported_action: "The {agent} agent can't do '{action}'.".into(),
            execution_error: "{agent} {action} failed: {error}".into(),
            unclear_command:
                "Sorry, I couldn't work out what you'd like me to do. Could you rephrase?".into(),
            all_capabilities_list: "Here is what I can do:\n{capabilities_list}".into(),
            memory_value_found: "From what I remember: {value}".into(),
            memory_query: "Answer the question using only these facts about the user.\n\
                Question: {query}\nFacts:\n- {facts_str}\n\
                If the facts don't contain the answer, reply with exactly NONE."
                .into(),
        }
    }
}

/// [messages] 段：固定提示语
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MessageTemplates {
    pub remember_success: String,
    pub memory_query_fail: String,
    pub no_history: String,
    pub history_header: String,
    pub action_complete: String,
    pub error_fallback: String,
}

impl Default for MessageTemplates {
    fn default() -> Self {
        Self {
            remember_success: "Got it, I'll remember that {fact}.".into(),
            memory_query_fail: "I don't have anything about that in memory.".into(),
            no_history: "We haven't talked about anything yet.".into(),
            history_header: "Here is our recent conversation:\n{formatted_history}".into(),
            action_complete: "Done.".into(),
            error_fallback: "Something went wrong, please try again.".into(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

/// 读取 config/prompts/<name>.txt（或上级目录），不存在时用内置默认
pub fn load_prompt(name: &str, fallback: &str) -> String {
    [
        format!("config/prompts/{name}.txt"),
        format!("../config/prompts/{name}.txt"),
    ]
    .into_iter()
    .find_map(|p| std::fs::read_to_string(p).ok())
    .map(|s| s.trim().to_string())
    .unwrap_or_else(|| fallback.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.app.stm_max_len, 20);
        assert_eq!(cfg.llm.provider, "deepseek");
        assert_eq!(cfg.llm.timeouts.request, 60);
        assert_eq!(cfg.agents.chat_agent, "chat");
        assert!(cfg.agents.enabled.iter().any(|a| a == "jira"));
        assert!(cfg.jira.base_url.is_none());
        assert_eq!(cfg.jira.project_type, "software");
        assert_eq!(cfg.memory.rules.len(), 1);
        assert_eq!(cfg.memory.rules[0].key, "code");
        assert_eq!(cfg.memory.autofill[0].param, "content");
        assert!(cfg.prompts.missing_params.contains("{needs}"));
    }

    #[test]
    fn test_load_from_file_overrides() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[app]
stm_max_len = 6

[agents]
enabled = ["echo"]

[jira]
base_url = "https://acme.atlassian.net"
email = "dev@acme.io"

[[memory.rules]]
agent = "repo"
action = "create"
key = "last_repo"

[prompts]
missing_params = "Need: {{needs}}"
"#
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.app.stm_max_len, 6);
        assert_eq!(cfg.agents.enabled, vec!["echo".to_string()]);
        assert_eq!(cfg.jira.base_url.as_deref(), Some("https://acme.atlassian.net"));
        assert_eq!(cfg.jira.timeout_secs, 30);
        assert_eq!(cfg.memory.rules[0].agent, "repo");
        assert_eq!(cfg.memory.rules[0].field, "result");
        assert_eq!(cfg.prompts.missing_params, "Need: {needs}");
        // 未覆盖的模板保持默认
        assert!(cfg.prompts.unsupported_agent.contains("{agent}"));
        // 未出现的段落保持默认
        assert_eq!(cfg.memory.autofill.len(), 1);
    }
}
