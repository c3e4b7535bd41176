//! 未完成指令状态机
//!
//! 每个用户最多一条未完成指令。两种状态：
//! - IDLE：没有未完成指令；新意图 needs 为空则直接分发，否则存为未完成指令并追问。
//! - AWAITING_PARAMS：已有指令 C；新一轮的 params 合并进 C（新值覆盖同名键），
//!   再按 C.needs 原顺序重算剩余项。剩余为空则移除 C 并分发，否则继续追问。
//!
//! 追问期间 C 的 agent/action 不随后续轮次改变：后续输入一律视为补参，而不是新指令。
//! needs 每轮都从「当前 needs − 已有参数键」重算，不信任上一轮留下的值。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::AutofillEntry;
use crate::memory::LongTermMemory;
use crate::router::intent::{push_unique, ParsedIntent};

/// 等待补参的指令
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingCommand {
    pub agent: String,
    pub action: String,
    pub params: Map<String, Value>,
    pub needs: Vec<String>,
    pub raw_input: String,
}

impl PendingCommand {
    pub fn from_intent(intent: ParsedIntent) -> Self {
        let mut needs = Vec::with_capacity(intent.needs.len());
        for n in intent.needs {
            push_unique(&mut needs, n);
        }
        let mut cmd = Self {
            agent: intent.agent,
            action: intent.action,
            params: intent.params,
            needs,
            raw_input: intent.raw_input,
        };
        cmd.recompute_needs();
        cmd
    }

    /// 合并新一轮参数并重算 needs，返回剩余项
    pub fn merge(&mut self, params: Map<String, Value>) -> &[String] {
        self.params.extend(params);
        self.recompute_needs();
        &self.needs
    }

    fn recompute_needs(&mut self) {
        let params = &self.params;
        self.needs.retain(|k| !params.contains_key(k));
    }

    pub fn is_complete(&self) -> bool {
        self.needs.is_empty()
    }

    pub fn into_command(self) -> Command {
        Command {
            agent: self.agent,
            action: self.action,
            params: self.params,
            raw_input: self.raw_input,
        }
    }
}

/// 参数齐全、可以分发的指令
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub agent: String,
    pub action: String,
    pub params: Map<String, Value>,
    pub raw_input: String,
}

impl From<ParsedIntent> for Command {
    fn from(intent: ParsedIntent) -> Self {
        Self {
            agent: intent.agent,
            action: intent.action,
            params: intent.params,
            raw_input: intent.raw_input,
        }
    }
}

/// 一次状态转移的结果
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// 参数齐全：立即分发（状态已回到 IDLE）
    Dispatch(Command),
    /// 仍缺参数：按顺序追问这些项（状态为 AWAITING_PARAMS）
    Reprompt(Vec<String>),
}

/// 根据本轮意图推进用户的未完成指令槽位
pub fn advance(slot: &mut Option<PendingCommand>, intent: ParsedIntent) -> Transition {
    match slot.take() {
        None if intent.needs.is_empty() => Transition::Dispatch(intent.into()),
        None => {
            let cmd = PendingCommand::from_intent(intent);
            if cmd.is_complete() {
                // needs 里的键其实都已在 params 中
                return Transition::Dispatch(cmd.into_command());
            }
            let needs = cmd.needs.clone();
            tracing::info!(agent = %cmd.agent, action = %cmd.action, ?needs, "Command awaiting params");
            *slot = Some(cmd);
            Transition::Reprompt(needs)
        }
        Some(mut cmd) => {
            if intent.agent != cmd.agent || intent.action != cmd.action {
                tracing::debug!(
                    pending = %format!("{}.{}", cmd.agent, cmd.action),
                    guessed = %format!("{}.{}", intent.agent, intent.action),
                    "Follow-up treated as slot value for pending command"
                );
            }
            let remaining = cmd.merge(intent.params).to_vec();
            if remaining.is_empty() {
                tracing::info!(agent = %cmd.agent, action = %cmd.action, "All parameters fulfilled");
                Transition::Dispatch(cmd.into_command())
            } else {
                tracing::info!(?remaining, "Parameters still missing");
                *slot = Some(cmd);
                Transition::Reprompt(remaining)
            }
        }
    }
}

/// 用长期记忆补齐 needs 中的参数（仅按配置的 param ← memory_key 对）。
/// 本轮 params 或未完成指令 C 的 params 中已有的键不会被写入，返回被补齐的参数名。
pub fn autofill_from_memory(
    intent: &mut ParsedIntent,
    pending: Option<&PendingCommand>,
    ltm: &LongTermMemory,
    rules: &[AutofillEntry],
) -> Vec<String> {
    let mut filled = Vec::new();
    for rule in rules {
        if !intent.needs.iter().any(|n| n == &rule.param) {
            continue;
        }
        if pending.is_some_and(|cmd| cmd.params.contains_key(&rule.param)) {
            // 合并时会覆盖用户先前给出的值
            continue;
        }
        let Some(value) = ltm.get(&rule.memory_key) else {
            continue;
        };
        if !intent.params.contains_key(&rule.param) {
            intent.params.insert(rule.param.clone(), value.clone());
        }
        intent.needs.retain(|n| n != &rule.param);
        tracing::info!(param = %rule.param, memory_key = %rule.memory_key, "Filled parameter from memory");
        filled.push(rule.param.clone());
    }
    filled
}

/// 追问用的可读参数列表：下划线换空格，逗号分隔
pub fn humanize_needs(needs: &[String]) -> String {
    needs
        .iter()
        .map(|n| n.replace('_', " "))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ticket_intent() -> ParsedIntent {
        ParsedIntent::new("repo", "create_ticket")
            .with_param("title", "Bug")
            .with_needs(["project_key"])
            .with_raw_input("open a ticket called Bug")
    }

    fn params(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_idle_complete_dispatches_directly() {
        let mut slot = None;
        let intent = ParsedIntent::new("repo", "create").with_param("name", "demo");
        let t = advance(&mut slot, intent);
        match t {
            Transition::Dispatch(cmd) => {
                assert_eq!(cmd.agent, "repo");
                assert_eq!(cmd.params["name"], "demo");
            }
            other => panic!("expected dispatch, got {other:?}"),
        }
        assert!(slot.is_none());
    }

    #[test]
    fn test_two_turn_slot_fill() {
        let mut slot = None;
        assert_eq!(
            advance(&mut slot, ticket_intent()),
            Transition::Reprompt(vec!["project_key".into()])
        );
        assert!(slot.is_some());

        let follow = ParsedIntent::new("repo", "create_ticket")
            .with_param("project_key", "ABC")
            .with_raw_input("ABC");
        match advance(&mut slot, follow) {
            Transition::Dispatch(cmd) => {
                assert_eq!(Value::Object(cmd.params), json!({"title": "Bug", "project_key": "ABC"}));
                // 分发的是原始指令的输入
                assert_eq!(cmd.raw_input, "open a ticket called Bug");
            }
            other => panic!("expected dispatch, got {other:?}"),
        }
        assert!(slot.is_none());
    }

    #[test]
    fn test_agent_action_immutable_while_pending() {
        let mut slot = None;
        advance(&mut slot, ticket_intent());
        let stray = ParsedIntent::new("chat", "chat").with_param("note", "hello");
        assert_eq!(
            advance(&mut slot, stray),
            Transition::Reprompt(vec!["project_key".into()])
        );
        let cmd = slot.as_ref().unwrap();
        assert_eq!(cmd.agent, "repo");
        assert_eq!(cmd.action, "create_ticket");
        assert_eq!(cmd.params["note"], "hello");
    }

    #[test]
    fn test_needs_shrink_monotonically_in_original_order() {
        let mut slot = None;
        let intent = ParsedIntent::new("github", "push_file")
            .with_needs(["repo_name", "file_path", "content"]);
        advance(&mut slot, intent);
        let original = slot.as_ref().unwrap().needs.clone();

        let rounds = [
            params(json!({"content": "x"})),
            params(json!({"unrelated": 1})),
            params(json!({"repo_name": "demo"})),
        ];
        let mut last_len = original.len();
        for p in rounds {
            let mut intent = ParsedIntent::new("github", "push_file");
            intent.params = p;
            match advance(&mut slot, intent) {
                Transition::Reprompt(needs) => {
                    assert!(needs.len() <= last_len);
                    assert!(needs.iter().all(|n| original.contains(n)));
                    last_len = needs.len();
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(slot.as_ref().unwrap().needs, vec!["file_path"]);
    }

    #[test]
    fn test_params_accumulate_and_last_value_wins() {
        let mut slot = None;
        advance(
            &mut slot,
            ParsedIntent::new("a", "b").with_needs(["x", "y", "z"]),
        );
        let rounds = [
            params(json!({"x": 1, "extra": "keep"})),
            params(json!({"x": 2})),
            params(json!({"y": 3})),
        ];
        for p in rounds {
            let mut i = ParsedIntent::new("a", "b");
            i.params = p;
            advance(&mut slot, i);
        }
        let cmd = slot.as_ref().unwrap();
        assert_eq!(cmd.params["x"], 2);
        assert_eq!(cmd.params["y"], 3);
        assert_eq!(cmd.params["extra"], "keep");
        assert_eq!(cmd.needs, vec!["z"]);
    }

    #[test]
    fn test_stale_needs_self_heal_on_store() {
        let mut slot = None;
        // 提取器把已提供的参数也列在 needs 中
        let intent = ParsedIntent::new("repo", "create_ticket")
            .with_param("title", "Bug")
            .with_needs(["title", "project_key", "project_key"]);
        assert_eq!(
            advance(&mut slot, intent),
            Transition::Reprompt(vec!["project_key".into()])
        );

        let mut slot = None;
        let satisfied = ParsedIntent::new("repo", "create")
            .with_param("name", "demo")
            .with_needs(["name"]);
        assert!(matches!(advance(&mut slot, satisfied), Transition::Dispatch(_)));
        assert!(slot.is_none());
    }

    #[test]
    fn test_autofill_content_from_code_memory() {
        let mut ltm = LongTermMemory::new();
        ltm.merge(params(json!({"code": "print(1)"})));
        let rules = vec![AutofillEntry {
            param: "content".into(),
            memory_key: "code".into(),
        }];
        let mut intent = ParsedIntent::new("github", "push_file")
            .with_param("repo_name", "demo")
            .with_needs(["file_path", "content"]);

        let filled = autofill_from_memory(&mut intent, None, &ltm, &rules);
        assert_eq!(filled, vec!["content"]);
        assert_eq!(intent.params["content"], "print(1)");
        assert_eq!(intent.needs, vec!["file_path"]);
    }

    #[test]
    fn test_autofill_never_overwrites_supplied_value() {
        let mut ltm = LongTermMemory::new();
        ltm.merge(params(json!({"code": "old"})));
        let rules = vec![AutofillEntry {
            param: "content".into(),
            memory_key: "code".into(),
        }];
        let mut intent = ParsedIntent::new("github", "push_file")
            .with_param("content", "new")
            .with_needs(["content"]);
        autofill_from_memory(&mut intent, None, &ltm, &rules);
        assert_eq!(intent.params["content"], "new");
        assert!(intent.needs.is_empty());
    }

    #[test]
    fn test_autofill_requires_memory_key() {
        let ltm = LongTermMemory::new();
        let rules = vec![AutofillEntry {
            param: "content".into(),
            memory_key: "code".into(),
        }];
        let mut intent = ParsedIntent::new("github", "push_file").with_needs(["content"]);
        assert!(autofill_from_memory(&mut intent, None, &ltm, &rules).is_empty());
        assert_eq!(intent.needs, vec!["content"]);
    }

    #[test]
    fn test_autofill_skips_params_already_pending() {
        let mut ltm = LongTermMemory::new();
        ltm.merge(params(json!({"code": "OLD_MEMORY_CODE"})));
        let rules = vec![AutofillEntry {
            param: "content".into(),
            memory_key: "code".into(),
        }];
        let mut slot = None;
        let first = ParsedIntent::new("github", "push_file")
            .with_param("repo_name", "demo")
            .with_param("content", "USER_CONTENT")
            .with_needs(["file_path"]);
        advance(&mut slot, first);

        // 提取器在补参轮又把 content 列进 needs
        let mut follow = ParsedIntent::new("github", "push_file")
            .with_param("file_path", "a.py")
            .with_needs(["content"]);
        assert!(autofill_from_memory(&mut follow, slot.as_ref(), &ltm, &rules).is_empty());
        assert!(!follow.params.contains_key("content"));

        match advance(&mut slot, follow) {
            Transition::Dispatch(cmd) => assert_eq!(cmd.params["content"], "USER_CONTENT"),
            other => panic!("expected dispatch, got {other:?}"),
        }
    }

    #[test]
    fn test_humanize_needs() {
        let needs = vec!["project_key".to_string(), "file_path".to_string()];
        assert_eq!(humanize_needs(&needs), "project key, file path");
    }
}
