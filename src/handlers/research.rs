//! Research 处理器：仓库概览、GitHub 项目搜索、仓库内文件检索与摘要
//!
//! 复用 GitHub 处理器的鉴权与 owner 补全；doc_search 的文件摘要交给 LLM。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::config::GithubSection;
use crate::handlers::github::{decode_content, GithubApi};
use crate::handlers::schema::str_param;
use crate::handlers::{Handler, OperationSpec};
use crate::llm::LlmClient;
use crate::memory::Message;

const SEARCH_LIMIT: usize = 5;
/// doc_search 最多摘要的匹配文件数
const DOC_MATCH_LIMIT: usize = 3;
/// 送去摘要的文件内容上限（字符）
const DOC_CHAR_LIMIT: usize = 4000;

pub struct ResearchHandler {
    api: GithubApi,
    llm: Arc<dyn LlmClient>,
    operations: Vec<OperationSpec>,
}

impl ResearchHandler {
    pub fn from_config(cfg: &GithubSection, llm: Arc<dyn LlmClient>) -> Self {
        Self::with_api(GithubApi::from_config(cfg), llm)
    }

    pub fn new(cfg: &GithubSection, token: Option<String>, llm: Arc<dyn LlmClient>) -> Self {
        Self::with_api(GithubApi::new(cfg, token), llm)
    }

    fn with_api(api: GithubApi, llm: Arc<dyn LlmClient>) -> Self {
        let operations = vec![
            OperationSpec::new("summarize_repository", "Summarize a GitHub repository.")
                .required("repo_name"),
            OperationSpec::new("search_projects", "Search GitHub for projects on a topic.")
                .required("topic"),
            OperationSpec::new("doc_search", "Find a file in a repository and summarize it.")
                .required("repo_name")
                .required("file_name"),
        ];
        Self {
            api,
            llm,
            operations,
        }
    }

    async fn get(&self, path: &str) -> Result<Value, String> {
        self.api.expect_ok(self.api.client().get(self.api.url(path))).await
    }

    async fn summarize_repository(&self, params: &Map<String, Value>) -> Result<Value, String> {
        let repo = self.api.full_name(str_param(params, "repo_name")?)?;
        let details = self.get(&format!("repos/{repo}")).await?;
        let text = |key: &str| {
            details
                .get(key)
                .and_then(|v| v.as_str())
                .unwrap_or("N/A")
                .to_string()
        };
        let count = |key: &str| details.get(key).and_then(|v| v.as_u64()).unwrap_or(0);
        let visibility = if details.get("private").and_then(|v| v.as_bool()).unwrap_or(false) {
            "Private"
        } else {
            "Public"
        };

        let mut lines = vec![
            format!("Repository summary for {repo}"),
            format!("- Description: {}", text("description")),
            format!("- Visibility: {visibility}"),
            format!("- Primary language: {}", text("language")),
            format!(
                "- Stars: {} | Forks: {}",
                count("stargazers_count"),
                count("forks_count")
            ),
        ];

        // 空仓库的 contents 接口返回 404，只省略文件列表
        if let Ok(contents) = self.get(&format!("repos/{repo}/contents/")).await {
            let entries: Vec<String> = contents
                .as_array()
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|item| {
                            let name = item.get("name")?.as_str()?;
                            let icon = match item.get("type").and_then(|t| t.as_str()) {
                                Some("dir") => "📁",
                                _ => "📄",
                            };
                            Some(format!("  {icon} {name}"))
                        })
                        .collect()
                })
                .unwrap_or_default();
            if !entries.is_empty() {
                lines.push("- Files at root:".to_string());
                lines.extend(entries);
            }
        }

        Ok(json!({
            "result": lines.join("\n"),
            "link": details.get("html_url").cloned().unwrap_or(Value::Null),
        }))
    }

    async fn search_projects(&self, params: &Map<String, Value>) -> Result<Value, String> {
        let topic = str_param(params, "topic")?;
        let per_page = SEARCH_LIMIT.to_string();
        let req = self
            .api
            .client()
            .get(self.api.url("search/repositories"))
            .query(&[("q", topic), ("per_page", per_page.as_str())]);
        let body = self.api.expect_ok(req).await?;
        let hits: Vec<String> = body
            .get("items")
            .and_then(|i| i.as_array())
            .map(|items| {
                items
                    .iter()
                    .take(SEARCH_LIMIT)
                    .filter_map(|item| {
                        let name = item.get("full_name")?.as_str()?;
                        let url = item.get("html_url").and_then(|u| u.as_str()).unwrap_or_default();
                        Some(format!("- [{name}]({url})"))
                    })
                    .collect()
            })
            .unwrap_or_default();
        let result = if hits.is_empty() {
            format!("No GitHub projects found for '{topic}'.")
        } else {
            format!("Top GitHub projects on '{topic}':\n{}", hits.join("\n"))
        };
        Ok(json!({ "result": result }))
    }

    async fn doc_search(&self, params: &Map<String, Value>) -> Result<Value, String> {
        let repo = self.api.full_name(str_param(params, "repo_name")?)?;
        let file = str_param(params, "file_name")?;
        let tree = self
            .get(&format!("repos/{repo}/git/trees/HEAD?recursive=1"))
            .await?;
        let matches: Vec<String> = tree
            .get("tree")
            .and_then(|t| t.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter(|item| item.get("type").and_then(|t| t.as_str()) == Some("blob"))
                    .filter_map(|item| item.get("path").and_then(|p| p.as_str()))
                    .filter(|path| path.ends_with(file))
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        if matches.is_empty() {
            return Ok(json!({ "result": format!("No file named '{file}' found in {repo}.") }));
        }

        let mut sections = vec![format!(
            "Found {} match(es) for '{file}' in {repo}:",
            matches.len()
        )];
        for path in matches.iter().take(DOC_MATCH_LIMIT) {
            let summary = match self.summarize_file(&repo, path).await {
                Ok(summary) => summary,
                Err(e) => {
                    tracing::warn!(repo = %repo, path = %path, error = %e, "File summary failed");
                    format!("Could not summarize this file: {e}")
                }
            };
            sections.push(format!("\n{path}\n{summary}"));
        }
        Ok(json!({ "result": sections.join("\n") }))
    }

    async fn summarize_file(&self, repo: &str, path: &str) -> Result<String, String> {
        let body = self.get(&format!("repos/{repo}/contents/{path}")).await?;
        let encoded = body
            .get("content")
            .and_then(|c| c.as_str())
            .ok_or_else(|| format!("'{path}' is not a file"))?;
        let content: String = decode_content(encoded)?.chars().take(DOC_CHAR_LIMIT).collect();
        let prompt = format!(
            "Please provide a concise summary of the following content from the file '{path}':\n\n---\n{content}\n---"
        );
        self.llm
            .complete(&[Message::user(prompt)])
            .await
            .map_err(|e| format!("LLM call failed: {e}"))
    }
}

#[async_trait]
impl Handler for ResearchHandler {
    fn name(&self) -> &str {
        "research"
    }

    fn summary(&self) -> &str {
        "I can summarize repositories, search GitHub for projects, and find and summarize files."
    }

    fn operations(&self) -> &[OperationSpec] {
        &self.operations
    }

    async fn invoke(&self, action: &str, params: Map<String, Value>) -> Result<Value, String> {
        match action {
            "summarize_repository" => self.summarize_repository(&params).await,
            "search_projects" => self.search_projects(&params).await,
            "doc_search" => self.doc_search(&params).await,
            other => Err(format!("unsupported action {other}")),
        }
    }
}
