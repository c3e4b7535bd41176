//! 操作参数声明
//!
//! 每个操作显式声明有序参数表 `{name, has_default}`，分发时据此过滤参数，
//! 空闲态下据此推导缺失的必填参数。

use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParamSpec {
    pub name: String,
    pub has_default: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationSpec {
    pub name: String,
    /// 一行说明，用于能力列表
    pub description: String,
    pub params: Vec<ParamSpec>,
}

impl OperationSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            params: Vec::new(),
        }
    }

    /// 追加必填参数
    pub fn required(mut self, name: impl Into<String>) -> Self {
        self.params.push(ParamSpec {
            name: name.into(),
            has_default: false,
        });
        self
    }

    /// 追加带默认值的可选参数
    pub fn optional(mut self, name: impl Into<String>) -> Self {
        self.params.push(ParamSpec {
            name: name.into(),
            has_default: true,
        });
        self
    }

    pub fn accepts(&self, key: &str) -> bool {
        self.params.iter().any(|p| p.name == key)
    }

    pub fn required_names(&self) -> impl Iterator<Item = &str> {
        self.params
            .iter()
            .filter(|p| !p.has_default)
            .map(|p| p.name.as_str())
    }

    /// 按声明顺序列出 params 中缺失的必填参数
    pub fn missing(&self, params: &Map<String, Value>) -> Vec<String> {
        self.required_names()
            .filter(|n| !params.contains_key(*n))
            .map(String::from)
            .collect()
    }

    /// 只保留声明过的参数键
    pub fn filter(&self, params: &Map<String, Value>) -> Map<String, Value> {
        params
            .iter()
            .filter(|(k, _)| self.accepts(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// 目录中的一行签名：`name(a, b?)`
    pub fn signature(&self) -> String {
        let params = self
            .params
            .iter()
            .map(|p| {
                if p.has_default {
                    format!("{}?", p.name)
                } else {
                    p.name.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!("{}({})", self.name, params)
    }
}

/// 取必填字符串参数；缺失、非字符串或只有空白都算缺失
pub(crate) fn str_param<'a>(params: &'a Map<String, Value>, key: &str) -> Result<&'a str, String> {
    opt_str_param(params, key).ok_or_else(|| format!("'{key}' parameter is missing"))
}

/// 取可选字符串参数，空串视为未给出
pub(crate) fn opt_str_param<'a>(params: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn push_file() -> OperationSpec {
        OperationSpec::new("push_file", "Push a file")
            .required("repo_name")
            .required("file_path")
            .required("content")
            .optional("branch")
    }

    #[test]
    fn test_missing_in_declared_order() {
        let params = json!({"content": "x"}).as_object().cloned().unwrap();
        assert_eq!(push_file().missing(&params), vec!["repo_name", "file_path"]);
    }

    #[test]
    fn test_filter_drops_undeclared() {
        let params = json!({"repo_name": "r", "branch": "dev", "language": "py"})
            .as_object()
            .cloned()
            .unwrap();
        let filtered = push_file().filter(&params);
        assert_eq!(Value::Object(filtered), json!({"repo_name": "r", "branch": "dev"}));
    }

    #[test]
    fn test_str_param() {
        let params = json!({"task": " sort a list ", "blank": "  ", "n": 3})
            .as_object()
            .cloned()
            .unwrap();
        assert_eq!(str_param(&params, "task").unwrap(), "sort a list");
        assert_eq!(str_param(&params, "blank").unwrap_err(), "'blank' parameter is missing");
        assert!(str_param(&params, "n").is_err());
        assert_eq!(opt_str_param(&params, "absent"), None);
    }

    #[test]
    fn test_signature() {
        assert_eq!(
            push_file().signature(),
            "push_file(repo_name, file_path, content, branch?)"
        );
    }
}
