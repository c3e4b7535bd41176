//! GitHub 处理器：仓库、文件、分支、Pull Request、Issue（REST API v3）
//!
//! Token 只从环境变量 GITHUB_PAT 读取，不写入配置文件；缺失时所有操作返回错误。
//! 文件内容经 contents API 以 base64 传输。

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Map, Value};

use crate::config::GithubSection;
use crate::handlers::schema::{opt_str_param, str_param};
use crate::handlers::{Handler, OperationSpec};

const TOKEN_ENV: &str = "GITHUB_PAT";
const USER_AGENT: &str = "hive-router";

/// GitHub REST 调用的公共部分：鉴权、owner 补全、错误转换
pub(crate) struct GithubApi {
    client: reqwest::Client,
    token: Option<String>,
    api_base: String,
    username: Option<String>,
}

impl GithubApi {
    /// 从 [github] 配置与 GITHUB_PAT 构建
    pub(crate) fn from_config(cfg: &GithubSection) -> Self {
        let token = std::env::var(TOKEN_ENV).ok().filter(|t| !t.trim().is_empty());
        if token.is_none() {
            tracing::warn!("{} not set, GitHub operations will fail", TOKEN_ENV);
        }
        Self::new(cfg, token)
    }

    pub(crate) fn new(cfg: &GithubSection, token: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            token,
            api_base: cfg.api_base.trim_end_matches('/').to_string(),
            username: cfg.username.clone(),
        }
    }

    pub(crate) fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path.trim_start_matches('/'))
    }

    fn token(&self) -> Result<&str, String> {
        self.token
            .as_deref()
            .ok_or_else(|| format!("GitHub token missing, set {TOKEN_ENV}"))
    }

    /// `owner/repo`；repo_name 已带 owner 时原样使用
    pub(crate) fn full_name(&self, repo_name: &str) -> Result<String, String> {
        if repo_name.contains('/') {
            return Ok(repo_name.to_string());
        }
        self.username
            .as_deref()
            .map(|owner| format!("{owner}/{repo_name}"))
            .ok_or_else(|| "GitHub username not configured, use owner/repo".to_string())
    }

    /// 发送请求，返回状态码与 JSON 体（无体或非 JSON 时为 Null）
    pub(crate) async fn send(&self, req: reqwest::RequestBuilder) -> Result<(u16, Value), String> {
        let resp = req
            .bearer_auth(self.token()?)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| format!("GitHub request failed: {e}"))?;
        let status = resp.status().as_u16();
        let body = resp.json::<Value>().await.unwrap_or(Value::Null);
        Ok((status, body))
    }

    /// 非 2xx 转为 `GitHub API error {status}: {message}`
    pub(crate) async fn expect_ok(&self, req: reqwest::RequestBuilder) -> Result<Value, String> {
        let (status, body) = self.send(req).await?;
        if (200..300).contains(&status) {
            Ok(body)
        } else {
            Err(api_error(status, &body))
        }
    }
}

fn api_error(status: u16, body: &Value) -> String {
    let msg = body
        .get("message")
        .and_then(|m| m.as_str())
        .unwrap_or("unknown error");
    format!("GitHub API error {status}: {msg}")
}

fn html_url(body: &Value) -> String {
    body.get("html_url")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

pub struct GithubHandler {
    api: GithubApi,
    default_branch: String,
    operations: Vec<OperationSpec>,
}

impl GithubHandler {
    /// 从 [github] 配置与 GITHUB_PAT 构建
    pub fn from_config(cfg: &GithubSection) -> Self {
        Self::with_api(cfg, GithubApi::from_config(cfg))
    }

    pub fn new(cfg: &GithubSection, token: Option<String>) -> Self {
        Self::with_api(cfg, GithubApi::new(cfg, token))
    }

    fn with_api(cfg: &GithubSection, api: GithubApi) -> Self {
        let operations = vec![
            OperationSpec::new("create_repo", "Create a new repository.")
                .required("repo_name")
                .optional("private"),
            OperationSpec::new("delete_repo", "Delete a repository.").required("repo_name"),
            OperationSpec::new("list_repos", "List your repositories."),
            OperationSpec::new("get_file_content", "Read a file from a repository.")
                .required("repo_name")
                .required("file_path")
                .optional("branch"),
            OperationSpec::new("push_file", "Create or update a file in a repository.")
                .required("repo_name")
                .required("file_path")
                .required("content")
                .optional("commit_message")
                .optional("branch"),
            OperationSpec::new("create_issue", "Open an issue in a repository.")
                .required("repo_name")
                .required("title")
                .optional("body"),
            OperationSpec::new("create_pull_request", "Open a pull request.")
                .required("repo_name")
                .required("title")
                .required("head_branch")
                .optional("base_branch")
                .optional("body"),
            OperationSpec::new("create_branch", "Create a branch from a source branch.")
                .required("repo_name")
                .required("new_branch_name")
                .optional("source_branch"),
            OperationSpec::new("list_branches", "List the branches of a repository.")
                .required("repo_name"),
            OperationSpec::new("merge_branch", "Merge a head branch into a base branch.")
                .required("repo_name")
                .required("head_branch")
                .optional("base_branch")
                .optional("commit_message"),
            OperationSpec::new("delete_branch", "Delete a branch.")
                .required("repo_name")
                .required("branch_name"),
        ];
        Self {
            api,
            default_branch: cfg.default_branch.clone(),
            operations,
        }
    }

    /// 取分支参数，未给出时用默认分支
    fn branch_or_default<'a>(&'a self, params: &'a Map<String, Value>, key: &str) -> &'a str {
        opt_str_param(params, key).unwrap_or(self.default_branch.as_str())
    }

    fn repo_url(&self, repo: &str, rest: &str) -> String {
        self.api.url(&format!("repos/{repo}{rest}"))
    }

    fn contents_url(&self, repo: &str, path: &str) -> String {
        self.repo_url(repo, &format!("/contents/{}", path.trim_start_matches('/')))
    }

    async fn create_repo(&self, params: &Map<String, Value>) -> Result<Value, String> {
        let name = str_param(params, "repo_name")?;
        let private = params.get("private").map(truthy).unwrap_or(false);
        let req = self
            .api
            .client()
            .post(self.api.url("user/repos"))
            .json(&json!({ "name": name, "private": private }));
        let body = self.api.expect_ok(req).await?;
        Ok(json!({
            "result": format!("Repository '{name}' created successfully."),
            "link": html_url(&body),
        }))
    }

    async fn delete_repo(&self, params: &Map<String, Value>) -> Result<Value, String> {
        let repo = self.api.full_name(str_param(params, "repo_name")?)?;
        let req = self.api.client().delete(self.repo_url(&repo, ""));
        self.api.expect_ok(req).await?;
        Ok(json!({ "result": format!("Repository '{repo}' deleted.") }))
    }

    async fn list_repos(&self) -> Result<Value, String> {
        let req = self.api.client().get(self.api.url("user/repos?per_page=100"));
        let body = self.api.expect_ok(req).await?;
        let names = collect_names(&body, "full_name");
        let result = if names.is_empty() {
            "No repositories found.".to_string()
        } else {
            bullet_list(&names)
        };
        Ok(json!({ "result": result, "repos": names }))
    }

    async fn get_file_content(&self, params: &Map<String, Value>) -> Result<Value, String> {
        let repo = self.api.full_name(str_param(params, "repo_name")?)?;
        let path = str_param(params, "file_path")?;
        let branch = self.branch_or_default(params, "branch");
        let req = self
            .api
            .client()
            .get(self.contents_url(&repo, path))
            .query(&[("ref", branch)]);
        let body = self.api.expect_ok(req).await?;
        let encoded = body
            .get("content")
            .and_then(|c| c.as_str())
            .ok_or_else(|| format!("'{path}' is not a file"))?;
        let content = decode_content(encoded)?;
        Ok(json!({ "result": content, "content": content }))
    }

    async fn push_file(&self, params: &Map<String, Value>) -> Result<Value, String> {
        let repo = self.api.full_name(str_param(params, "repo_name")?)?;
        let path = str_param(params, "file_path")?;
        let content = match params.get("content") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => return Err("'content' parameter is missing".to_string()),
        };
        let branch = self.branch_or_default(params, "branch").to_string();
        let message = opt_str_param(params, "commit_message")
            .map(String::from)
            .unwrap_or_else(|| format!("Update {path}"));
        let url = self.contents_url(&repo, path);

        // 已存在的文件需要带上当前 sha
        let (status, existing) = self
            .api
            .send(self.api.client().get(&url).query(&[("ref", branch.as_str())]))
            .await?;
        let sha = if status == 200 {
            existing.get("sha").and_then(|s| s.as_str()).map(String::from)
        } else {
            None
        };

        let mut payload = json!({
            "message": message,
            "content": STANDARD.encode(content.as_bytes()),
            "branch": branch,
        });
        if let Some(sha) = sha {
            payload["sha"] = Value::String(sha);
        }
        let body = self.api.expect_ok(self.api.client().put(&url).json(&payload)).await?;
        let link = body
            .pointer("/content/html_url")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        Ok(json!({
            "result": format!("Pushed '{path}' to {repo} ({branch})."),
            "link": link,
        }))
    }

    async fn create_issue(&self, params: &Map<String, Value>) -> Result<Value, String> {
        let repo = self.api.full_name(str_param(params, "repo_name")?)?;
        let title = str_param(params, "title")?;
        let body_text = opt_str_param(params, "body").unwrap_or("");
        let req = self
            .api
            .client()
            .post(self.repo_url(&repo, "/issues"))
            .json(&json!({ "title": title, "body": body_text }));
        let body = self.api.expect_ok(req).await?;
        let number = body.get("number").and_then(|n| n.as_u64()).unwrap_or_default();
        Ok(json!({
            "result": format!("Issue #{number} '{title}' created in {repo}."),
            "link": html_url(&body),
        }))
    }

    async fn create_pull_request(&self, params: &Map<String, Value>) -> Result<Value, String> {
        let repo = self.api.full_name(str_param(params, "repo_name")?)?;
        let title = str_param(params, "title")?;
        let head = str_param(params, "head_branch")?;
        let base = self.branch_or_default(params, "base_branch");
        let body_text = opt_str_param(params, "body").unwrap_or("");
        let req = self
            .api
            .client()
            .post(self.repo_url(&repo, "/pulls"))
            .json(&json!({ "title": title, "head": head, "base": base, "body": body_text }));
        let body = self.api.expect_ok(req).await?;
        let number = body.get("number").and_then(|n| n.as_u64()).unwrap_or_default();
        Ok(json!({
            "result": format!("Pull request #{number} '{title}' opened ({head} -> {base})."),
            "link": html_url(&body),
        }))
    }

    async fn create_branch(&self, params: &Map<String, Value>) -> Result<Value, String> {
        let repo = self.api.full_name(str_param(params, "repo_name")?)?;
        let new_branch = str_param(params, "new_branch_name")?;
        let source = self.branch_or_default(params, "source_branch");

        let (status, source_ref) = self
            .api
            .send(
                self.api
                    .client()
                    .get(self.repo_url(&repo, &format!("/git/ref/heads/{source}"))),
            )
            .await?;
        if status == 404 {
            return Err(format!("Source branch '{source}' not found in {repo}."));
        }
        if !(200..300).contains(&status) {
            return Err(api_error(status, &source_ref));
        }
        let sha = source_ref
            .pointer("/object/sha")
            .and_then(|s| s.as_str())
            .ok_or_else(|| format!("Branch '{source}' has no commit sha"))?;

        let (status, created) = self
            .api
            .send(
                self.api
                    .client()
                    .post(self.repo_url(&repo, "/git/refs"))
                    .json(&json!({ "ref": format!("refs/heads/{new_branch}"), "sha": sha })),
            )
            .await?;
        match status {
            200..=299 => {}
            422 => return Err(format!("Branch '{new_branch}' already exists.")),
            _ => return Err(api_error(status, &created)),
        }
        Ok(json!({
            "result": format!("Created branch '{new_branch}' from '{source}'."),
            "link": format!("https://github.com/{repo}/tree/{new_branch}"),
        }))
    }

    async fn list_branches(&self, params: &Map<String, Value>) -> Result<Value, String> {
        let repo = self.api.full_name(str_param(params, "repo_name")?)?;
        let req = self.api.client().get(self.repo_url(&repo, "/branches"));
        let body = self.api.expect_ok(req).await?;
        let names = collect_names(&body, "name");
        let result = if names.is_empty() {
            format!("No branches found in {repo}.")
        } else {
            format!("Branches in {repo}:\n{}", bullet_list(&names))
        };
        Ok(json!({ "result": result, "branches": names }))
    }

    async fn merge_branch(&self, params: &Map<String, Value>) -> Result<Value, String> {
        let repo = self.api.full_name(str_param(params, "repo_name")?)?;
        let head = str_param(params, "head_branch")?;
        let base = self.branch_or_default(params, "base_branch");
        let message = opt_str_param(params, "commit_message")
            .map(String::from)
            .unwrap_or_else(|| format!("Merge branch '{head}' into '{base}'"));
        let (status, body) = self
            .api
            .send(
                self.api
                    .client()
                    .post(self.repo_url(&repo, "/merges"))
                    .json(&json!({ "base": base, "head": head, "commit_message": message })),
            )
            .await?;
        match status {
            201 => Ok(json!({
                "result": format!("Merged '{head}' into '{base}'."),
                "link": html_url(&body),
            })),
            204 => Ok(json!({
                "result": format!("Nothing to merge, '{base}' already contains '{head}'."),
            })),
            409 => Err(format!("Merge conflict between '{head}' and '{base}'.")),
            404 => Err(format!("Merge failed, branch '{head}' or '{base}' not found.")),
            _ => Err(api_error(status, &body)),
        }
    }

    async fn delete_branch(&self, params: &Map<String, Value>) -> Result<Value, String> {
        let branch = str_param(params, "branch_name")?;
        if branch == self.default_branch {
            return Err(format!("Refusing to delete the default branch '{branch}'."));
        }
        let repo = self.api.full_name(str_param(params, "repo_name")?)?;
        let (status, body) = self
            .api
            .send(
                self.api
                    .client()
                    .delete(self.repo_url(&repo, &format!("/git/refs/heads/{branch}"))),
            )
            .await?;
        match status {
            200..=299 => Ok(json!({ "result": format!("Deleted branch '{branch}' from {repo}.") })),
            404 | 422 => Err(format!("Branch '{branch}' not found in {repo}.")),
            _ => Err(api_error(status, &body)),
        }
    }
}

fn collect_names(body: &Value, field: &str) -> Vec<String> {
    body.as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|r| r.get(field).and_then(|n| n.as_str()))
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

fn bullet_list(items: &[String]) -> String {
    items.iter().map(|n| format!("- {n}")).collect::<Vec<_>>().join("\n")
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::String(s) => matches!(s.to_ascii_lowercase().as_str(), "true" | "yes" | "1"),
        Value::Number(n) => n.as_i64().is_some_and(|n| n != 0),
        _ => false,
    }
}

/// contents API 的 base64 带换行，解码前去掉空白
pub(crate) fn decode_content(encoded: &str) -> Result<String, String> {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact)
        .map_err(|e| format!("invalid base64 content: {e}"))?;
    String::from_utf8(bytes).map_err(|_| "file is not valid UTF-8".to_string())
}

#[async_trait]
impl Handler for GithubHandler {
    fn name(&self) -> &str {
        "github"
    }

    fn summary(&self) -> &str {
        "I can manage repositories, files, branches, pull requests and issues on GitHub."
    }

    fn operations(&self) -> &[OperationSpec] {
        &self.operations
    }

    async fn invoke(&self, action: &str, params: Map<String, Value>) -> Result<Value, String> {
        match action {
            "create_repo" => self.create_repo(&params).await,
            "delete_repo" => self.delete_repo(&params).await,
            "list_repos" => self.list_repos().await,
            "get_file_content" => self.get_file_content(&params).await,
            "push_file" => self.push_file(&params).await,
            "create_issue" => self.create_issue(&params).await,
            "create_pull_request" => self.create_pull_request(&params).await,
            "create_branch" => self.create_branch(&params).await,
            "list_branches" => self.list_branches(&params).await,
            "merge_branch" => self.merge_branch(&params).await,
            "delete_branch" => self.delete_branch(&params).await,
            other => Err(format!("unsupported action {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_server::TestServer;

    fn handler(username: Option<&str>) -> GithubHandler {
        let cfg = GithubSection {
            username: username.map(String::from),
            ..GithubSection::default()
        };
        GithubHandler::new(&cfg, None)
    }

    fn live(server: &TestServer) -> GithubHandler {
        let cfg = GithubSection {
            api_base: server.base_url.clone(),
            username: Some("octo".into()),
            ..GithubSection::default()
        };
        GithubHandler::new(&cfg, Some("ghp_test".into()))
    }

    fn params(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_missing_token_fails() {
        let gh = handler(Some("octo"));
        let err = gh.invoke("list_repos", Map::new()).await.unwrap_err();
        assert!(err.contains("GITHUB_PAT"));
    }

    #[test]
    fn test_full_name() {
        assert_eq!(handler(Some("octo")).api.full_name("demo").unwrap(), "octo/demo");
        assert_eq!(handler(None).api.full_name("acme/demo").unwrap(), "acme/demo");
        assert!(handler(None).api.full_name("demo").is_err());
    }

    #[test]
    fn test_decode_content_with_newlines() {
        assert_eq!(decode_content("aGVs\nbG8=\n").unwrap(), "hello");
    }

    #[test]
    fn test_push_file_declares_content_required() {
        let gh = handler(None);
        let op = gh.operation("push_file").unwrap();
        assert_eq!(op.missing(&Map::new()), vec!["repo_name", "file_path", "content"]);
    }

    #[test]
    fn test_branch_operations_declared() {
        let gh = handler(None);
        let pr = gh.operation("create_pull_request").unwrap();
        assert_eq!(pr.missing(&Map::new()), vec!["repo_name", "title", "head_branch"]);
        assert_eq!(
            gh.operation("merge_branch").unwrap().signature(),
            "merge_branch(repo_name, head_branch, base_branch?, commit_message?)"
        );
        for name in ["delete_repo", "create_branch", "list_branches", "delete_branch"] {
            assert!(gh.operation(name).is_some(), "{name}");
        }
    }

    #[tokio::test]
    async fn test_default_branch_is_never_deleted() {
        let gh = handler(Some("octo"));
        let err = gh
            .invoke("delete_branch", params(json!({"repo_name": "demo", "branch_name": "main"})))
            .await
            .unwrap_err();
        assert!(err.contains("default branch"), "{err}");
    }

    #[tokio::test]
    async fn test_create_branch_from_default_source() {
        let server = TestServer::start(vec![
            (200, json!({"ref": "refs/heads/main", "object": {"sha": "abc123"}})),
            (201, json!({"ref": "refs/heads/feature"})),
        ])
        .await;
        let out = live(&server)
            .invoke(
                "create_branch",
                params(json!({"repo_name": "demo", "new_branch_name": "feature"})),
            )
            .await
            .unwrap();
        assert_eq!(out["result"], "Created branch 'feature' from 'main'.");

        let reqs = server.requests();
        assert_eq!(reqs[0].path, "/repos/octo/demo/git/ref/heads/main");
        assert_eq!(reqs[0].header("authorization"), Some("Bearer ghp_test"));
        assert_eq!(reqs[1].method, "POST");
        assert_eq!(reqs[1].body, json!({"ref": "refs/heads/feature", "sha": "abc123"}));
    }

    #[tokio::test]
    async fn test_create_existing_branch_fails() {
        let server = TestServer::start(vec![
            (200, json!({"object": {"sha": "abc123"}})),
            (422, json!({"message": "Reference already exists"})),
        ])
        .await;
        let err = live(&server)
            .invoke(
                "create_branch",
                params(json!({"repo_name": "demo", "new_branch_name": "feature"})),
            )
            .await
            .unwrap_err();
        assert_eq!(err, "Branch 'feature' already exists.");
    }

    #[tokio::test]
    async fn test_merge_statuses() {
        let server = TestServer::start(vec![
            (201, json!({"html_url": "https://github.com/octo/demo/commit/1"})),
            (204, Value::Null),
            (409, json!({"message": "Merge conflict"})),
        ])
        .await;
        let gh = live(&server);
        let p = params(json!({"repo_name": "demo", "head_branch": "feature"}));

        let merged = gh.invoke("merge_branch", p.clone()).await.unwrap();
        assert_eq!(merged["link"], "https://github.com/octo/demo/commit/1");
        let noop = gh.invoke("merge_branch", p.clone()).await.unwrap();
        assert!(noop["result"].as_str().unwrap().starts_with("Nothing to merge"));
        let conflict = gh.invoke("merge_branch", p).await.unwrap_err();
        assert!(conflict.contains("conflict"), "{conflict}");

        let body = &server.requests()[0].body;
        assert_eq!(body["base"], "main");
        assert_eq!(body["commit_message"], "Merge branch 'feature' into 'main'");
    }

    #[tokio::test]
    async fn test_list_branches_and_api_error() {
        let server = TestServer::start(vec![
            (200, json!([{"name": "main"}, {"name": "dev"}])),
            (403, json!({"message": "Must have admin rights"})),
        ])
        .await;
        let gh = live(&server);
        let out = gh
            .invoke("list_branches", params(json!({"repo_name": "acme/site"})))
            .await
            .unwrap();
        assert_eq!(out["result"], "Branches in acme/site:\n- main\n- dev");

        let err = gh
            .invoke("delete_repo", params(json!({"repo_name": "demo"})))
            .await
            .unwrap_err();
        assert_eq!(err, "GitHub API error 403: Must have admin rights");
        assert_eq!(server.requests()[1].method, "DELETE");
    }
}
