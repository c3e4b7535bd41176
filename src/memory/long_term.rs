//! 长期记忆：每用户一张键值表
//!
//! 普通键按「后写覆盖」upsert；保留键 `user_memos` 是只追加的字符串列表，
//! 只能经 remember_fact 写入，merge 不会覆盖它。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 用户显式要求记住的事实列表所在的键
pub const USER_MEMOS_KEY: &str = "user_memos";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LongTermMemory {
    entries: Map<String, Value>,
}

impl LongTermMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// 逐键 upsert；不相关的键保持不变。对 `user_memos` 的写入改为逐条追加
    pub fn merge(&mut self, updates: Map<String, Value>) {
        for (key, value) in updates {
            if key == USER_MEMOS_KEY {
                match value {
                    Value::Array(items) => {
                        for item in items {
                            self.push_memo(item);
                        }
                    }
                    Value::Null => {}
                    other => self.push_memo(other),
                }
                continue;
            }
            self.entries.insert(key, value);
        }
    }

    pub fn remember(&mut self, fact: impl Into<String>) {
        self.push_memo(Value::String(fact.into()));
    }

    fn push_memo(&mut self, memo: Value) {
        let slot = self
            .entries
            .entry(USER_MEMOS_KEY.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        match slot {
            Value::Array(list) => list.push(memo),
            // 只有外部直接构造的数据才可能走到这里，保留旧值再追加
            other => {
                let previous = other.take();
                *other = Value::Array(vec![previous, memo]);
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn memos(&self) -> Vec<String> {
        match self.entries.get(USER_MEMOS_KEY) {
            Some(Value::Array(list)) => list.iter().map(value_to_text).collect(),
            _ => Vec::new(),
        }
    }

    /// 除 user_memos 外的 (键, 值) 事实
    pub fn facts(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter().filter(|(k, _)| k.as_str() != USER_MEMOS_KEY)
    }

    pub fn snapshot(&self) -> Map<String, Value> {
        self.entries.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// 字符串值去掉 JSON 引号，其它值按 JSON 文本输出
pub fn value_to_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
