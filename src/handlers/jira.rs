//! Jira 处理器：项目与工单（Jira Cloud REST API v3，Basic 认证）
//!
//! 站点地址与邮箱来自 [jira] 配置或 JIRA_BASE_URL / JIRA_USER_EMAIL，API Token 只读 JIRA_API_TOKEN。
//! 缺任何一项时所有操作返回错误，不会发出请求。
//! list_tickets 接受 project_key，也接受 project_name（按名称查出 key）。

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::config::JiraSection;
use crate::handlers::schema::{opt_str_param, str_param};
use crate::handlers::{Handler, OperationSpec};

const BASE_URL_ENV: &str = "JIRA_BASE_URL";
const EMAIL_ENV: &str = "JIRA_USER_EMAIL";
const TOKEN_ENV: &str = "JIRA_API_TOKEN";
const DEFAULT_ISSUE_TYPE: &str = "Task";
const DEFAULT_DESCRIPTION: &str = "Created via hive";

struct Credentials<'a> {
    base_url: &'a str,
    email: &'a str,
    token: &'a str,
}

pub struct JiraHandler {
    client: reqwest::Client,
    base_url: Option<String>,
    email: Option<String>,
    token: Option<String>,
    project_type: String,
    project_template: String,
    operations: Vec<OperationSpec>,
}

impl JiraHandler {
    /// 从 [jira] 配置与环境变量构建
    pub fn from_config(cfg: &JiraSection) -> Self {
        let env = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        let base_url = cfg.base_url.clone().or_else(|| env(BASE_URL_ENV));
        let email = cfg.email.clone().or_else(|| env(EMAIL_ENV));
        let token = env(TOKEN_ENV);
        if base_url.is_none() || email.is_none() || token.is_none() {
            tracing::warn!("Jira credentials incomplete, Jira operations will fail");
        }
        Self::new(cfg, base_url, email, token)
    }

    pub fn new(
        cfg: &JiraSection,
        base_url: Option<String>,
        email: Option<String>,
        token: Option<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .unwrap_or_default();
        let operations = vec![
            OperationSpec::new("list_projects", "List the Jira projects you can see."),
            OperationSpec::new("list_tickets", "List the tickets of a project.")
                .optional("project_key")
                .optional("project_name"),
            OperationSpec::new("create_project", "Create a Jira project.")
                .required("project_name")
                .required("project_key"),
            OperationSpec::new("create_ticket", "Create a ticket in a project.")
                .required("project_key")
                .required("title")
                .optional("description")
                .optional("issue_type"),
            OperationSpec::new("get_ticket", "Show the details of a ticket.").required("ticket_key"),
        ];
        Self {
            client,
            base_url: base_url.map(|u| u.trim_end_matches('/').to_string()),
            email,
            token,
            project_type: cfg.project_type.clone(),
            project_template: cfg.project_template.clone(),
            operations,
        }
    }

    fn credentials(&self) -> Result<Credentials<'_>, String> {
        match (&self.base_url, &self.email, &self.token) {
            (Some(base_url), Some(email), Some(token)) => Ok(Credentials {
                base_url: base_url.as_str(),
                email: email.as_str(),
                token: token.as_str(),
            }),
            _ => {
                let missing: Vec<&str> = [
                    (self.base_url.is_none(), BASE_URL_ENV),
                    (self.email.is_none(), EMAIL_ENV),
                    (self.token.is_none(), TOKEN_ENV),
                ]
                .into_iter()
                .filter_map(|(absent, name)| absent.then_some(name))
                .collect();
                Err(format!("Jira not configured, set {}", missing.join(", ")))
            }
        }
    }

    /// 发送请求（路径相对于 /rest/api/3），返回状态码与 JSON 体
    async fn send(
        &self,
        method: reqwest::Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<(u16, Value), String> {
        let creds = self.credentials()?;
        let url = format!("{}/rest/api/3/{}", creds.base_url, path.trim_start_matches('/'));
        let mut req = self
            .client
            .request(method, url)
            .basic_auth(creds.email, Some(creds.token))
            .header("Accept", "application/json")
            .query(query);
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| format!("Jira request failed: {e}"))?;
        let status = resp.status().as_u16();
        let body = resp.json::<Value>().await.unwrap_or(Value::Null);
        Ok((status, body))
    }

    async fn expect_ok(
        &self,
        method: reqwest::Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<Value, String> {
        let (status, body) = self.send(method, path, query, body).await?;
        if (200..300).contains(&status) {
            Ok(body)
        } else {
            Err(api_error(status, &body))
        }
    }

    fn browse_link(&self, key: &str) -> String {
        format!("{}/browse/{key}", self.base_url.as_deref().unwrap_or_default())
    }

    async fn projects(&self) -> Result<Vec<Value>, String> {
        let body = self.expect_ok(reqwest::Method::GET, "project", &[], None).await?;
        Ok(body.as_array().cloned().unwrap_or_default())
    }

    /// project_key 优先；只给了 project_name 时按名称（不区分大小写）查出 key
    async fn resolve_project_key(&self, params: &Map<String, Value>) -> Result<String, String> {
        if let Some(key) = opt_str_param(params, "project_key") {
            return Ok(key.to_string());
        }
        let name = opt_str_param(params, "project_name")
            .ok_or_else(|| "Provide a project key or a project name.".to_string())?;
        self.projects()
            .await?
            .iter()
            .find(|p| {
                p.get("name")
                    .and_then(|n| n.as_str())
                    .is_some_and(|n| n.eq_ignore_ascii_case(name))
            })
            .and_then(|p| p.get("key").and_then(|k| k.as_str()))
            .map(String::from)
            .ok_or_else(|| format!("No Jira project named '{name}'."))
    }

    async fn list_projects(&self) -> Result<Value, String> {
        let projects = self.projects().await?;
        let lines: Vec<String> = projects
            .iter()
            .filter_map(|p| {
                let name = p.get("name")?.as_str()?;
                let key = p.get("key").and_then(|k| k.as_str()).unwrap_or("?");
                Some(format!("- {name} ({key})"))
            })
            .collect();
        let result = if lines.is_empty() {
            "No Jira projects found.".to_string()
        } else {
            format!("Your Jira projects:\n{}", lines.join("\n"))
        };
        Ok(json!({ "result": result }))
    }

    async fn list_tickets(&self, params: &Map<String, Value>) -> Result<Value, String> {
        let key = self.resolve_project_key(params).await?;
        let jql = format!("project = \"{key}\" ORDER BY created DESC");
        let body = self
            .expect_ok(
                reqwest::Method::GET,
                "search/jql",
                &[("jql", jql.as_str()), ("fields", "summary,status")],
                None,
            )
            .await?;
        let lines: Vec<String> = body
            .get("issues")
            .and_then(|i| i.as_array())
            .map(|issues| {
                issues
                    .iter()
                    .filter_map(|issue| {
                        let ticket = issue.get("key")?.as_str()?;
                        let summary = issue
                            .pointer("/fields/summary")
                            .and_then(|s| s.as_str())
                            .unwrap_or_default();
                        Some(format!("- {ticket}: {summary}"))
                    })
                    .collect()
            })
            .unwrap_or_default();
        let result = if lines.is_empty() {
            format!("No tickets found in project {key}.")
        } else {
            format!("Tickets in project {key}:\n{}", lines.join("\n"))
        };
        Ok(json!({ "result": result }))
    }

    async fn create_project(&self, params: &Map<String, Value>) -> Result<Value, String> {
        let name = str_param(params, "project_name")?;
        let key = str_param(params, "project_key")?;
        validate_project_key(key)?;

        let me = self.expect_ok(reqwest::Method::GET, "myself", &[], None).await?;
        let lead = me
            .get("accountId")
            .and_then(|a| a.as_str())
            .ok_or_else(|| "Could not determine the Jira account id".to_string())?;
        let payload = json!({
            "key": key,
            "name": name,
            "projectTypeKey": self.project_type,
            "projectTemplateKey": self.project_template,
            "leadAccountId": lead,
        });
        self.expect_ok(reqwest::Method::POST, "project", &[], Some(&payload))
            .await?;
        Ok(json!({
            "result": format!("Project '{name}' created with key {key}."),
            "key": key,
            "link": self.browse_link(key),
        }))
    }

    async fn create_ticket(&self, params: &Map<String, Value>) -> Result<Value, String> {
        let project = str_param(params, "project_key")?;
        let title = str_param(params, "title")?;
        let description = opt_str_param(params, "description").unwrap_or(DEFAULT_DESCRIPTION);
        let issue_type = opt_str_param(params, "issue_type").unwrap_or(DEFAULT_ISSUE_TYPE);
        let payload = json!({
            "fields": {
                "project": { "key": project },
                "summary": title,
                "description": adf_paragraph(description),
                "issuetype": { "name": issue_type },
            }
        });
        let body = self
            .expect_ok(reqwest::Method::POST, "issue", &[], Some(&payload))
            .await?;
        let key = body
            .get("key")
            .and_then(|k| k.as_str())
            .ok_or_else(|| "Jira did not return a ticket key".to_string())?;
        Ok(json!({
            "result": format!("Ticket {key} '{title}' created in {project} as a {issue_type}."),
            "key": key,
            "link": self.browse_link(key),
        }))
    }

    async fn get_ticket(&self, params: &Map<String, Value>) -> Result<Value, String> {
        let key = str_param(params, "ticket_key")?;
        let (status, body) = self
            .send(reqwest::Method::GET, &format!("issue/{key}"), &[], None)
            .await?;
        if status == 404 {
            return Err(format!("Ticket '{key}' not found."));
        }
        if !(200..300).contains(&status) {
            return Err(api_error(status, &body));
        }
        let field = |pointer: &str, fallback: &'static str| -> String {
            body.pointer(pointer)
                .and_then(|v| v.as_str())
                .unwrap_or(fallback)
                .to_string()
        };
        let result = format!(
            "Ticket {key}\n- Summary: {}\n- Status: {}\n- Reporter: {}\n- Assignee: {}",
            field("/fields/summary", "N/A"),
            field("/fields/status/name", "N/A"),
            field("/fields/reporter/displayName", "N/A"),
            field("/fields/assignee/displayName", "Unassigned"),
        );
        Ok(json!({ "result": result, "link": self.browse_link(key) }))
    }
}

/// 项目 key 必须是 2 到 4 个大写字母
fn validate_project_key(key: &str) -> Result<(), String> {
    let valid = (2..=4).contains(&key.len()) && key.chars().all(|c| c.is_ascii_uppercase());
    if valid {
        Ok(())
    } else {
        Err(format!(
            "The project key '{key}' is invalid, use 2-4 uppercase letters (e.g. 'PROJ')."
        ))
    }
}

/// v3 的 description 使用 Atlassian Document Format
fn adf_paragraph(text: &str) -> Value {
    json!({
        "type": "doc",
        "version": 1,
        "content": [{
            "type": "paragraph",
            "content": [{ "type": "text", "text": text }],
        }],
    })
}

fn api_error(status: u16, body: &Value) -> String {
    let detail = body
        .get("errorMessages")
        .and_then(|m| m.as_array())
        .and_then(|m| m.first())
        .and_then(|m| m.as_str())
        .map(String::from)
        .or_else(|| {
            body.get("errors")
                .and_then(|e| e.as_object())
                .filter(|e| !e.is_empty())
                .map(|e| {
                    e.iter()
                        .map(|(k, v)| format!("{k}: {}", v.as_str().unwrap_or_default()))
                        .collect::<Vec<_>>()
                        .join("; ")
                })
        })
        .unwrap_or_else(|| "unknown error".to_string());
    format!("Jira API error {status}: {detail}")
}

#[async_trait]
impl Handler for JiraHandler {
    fn name(&self) -> &str {
        "jira"
    }

    fn summary(&self) -> &str {
        "I can create and list Jira projects, and create, list and look up tickets."
    }

    fn operations(&self) -> &[OperationSpec] {
        &self.operations
    }

    async fn invoke(&self, action: &str, params: Map<String, Value>) -> Result<Value, String> {
        match action {
            "list_projects" => self.list_projects().await,
            "list_tickets" => self.list_tickets(&params).await,
            "create_project" => self.create_project(&params).await,
            "create_ticket" => self.create_ticket(&params).await,
            "get_ticket" => self.get_ticket(&params).await,
            other => Err(format!("unsupported action {other}")),
        }
    }
}
