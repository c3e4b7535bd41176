//! 会话存储：按用户 ID 隔离的短期记忆、长期记忆与未完成指令
//!
//! 每个用户一条 `UserSession`，首次引用时惰性创建，进程存活期间不销毁。
//! 会话放在 `Arc<Mutex<_>>` 里：路由处理一条消息时持有该用户的锁直到结束，
//! 同一用户的请求因此串行执行，不同用户互不阻塞。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{Mutex, RwLock};

use super::conversation::{ConversationMemory, Message};
use super::long_term::LongTermMemory;
use crate::router::pending::PendingCommand;

/// 单个用户的全部状态
#[derive(Debug, Clone)]
pub struct UserSession {
    pub conversation: ConversationMemory,
    pub long_term: LongTermMemory,
    pub pending: Option<PendingCommand>,
}

impl UserSession {
    pub fn new(stm_max_len: usize) -> Self {
        Self {
            conversation: ConversationMemory::new(stm_max_len),
            long_term: LongTermMemory::new(),
            pending: None,
        }
    }

    pub fn append_turn(&mut self, user_text: &str, assistant_text: &str) {
        self.conversation.push_turn(user_text, assistant_text);
        tracing::debug!(size = self.conversation.len(), "Added interaction to short-term memory");
    }

    pub fn short_term(&self) -> Vec<Message> {
        self.conversation.snapshot()
    }

    pub fn merge_long_term(&mut self, updates: Map<String, Value>) {
        if updates.is_empty() {
            return;
        }
        tracing::debug!(keys = ?updates.keys().collect::<Vec<_>>(), "Updating long-term memory");
        self.long_term.merge(updates);
    }

    pub fn remember_fact(&mut self, fact: &str) {
        self.long_term.remember(fact);
    }

    pub fn long_term(&self) -> Map<String, Value> {
        self.long_term.snapshot()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            short_term: self.short_term(),
            long_term: self.long_term(),
            pending_command: self.pending.clone(),
        }
    }
}

/// 单用户状态的可序列化形态：`{short_term, long_term, pending_command}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub short_term: Vec<Message>,
    pub long_term: Map<String, Value>,
    pub pending_command: Option<PendingCommand>,
}

/// 会话存储接口：由路由持有，按用户 ID 取出带锁的会话
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// 获取或创建用户会话
    async fn session(&self, uid: &str) -> Arc<Mutex<UserSession>>;

    /// 获取会话（不创建）
    async fn get(&self, uid: &str) -> Option<Arc<Mutex<UserSession>>>;
}

/// 内存会话存储
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, Arc<Mutex<UserSession>>>>,
    stm_max_len: usize,
}

impl MemorySessionStore {
    pub fn new(stm_max_len: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            stm_max_len,
        }
    }

    pub async fn append_turn(&self, uid: &str, user_text: &str, assistant_text: &str) {
        let session = self.session(uid).await;
        session.lock().await.append_turn(user_text, assistant_text);
    }

    /// 未见过的用户返回空列表，且不会为其创建会话
    pub async fn get_short_term(&self, uid: &str) -> Vec<Message> {
        match self.get(uid).await {
            Some(s) => s.lock().await.short_term(),
            None => Vec::new(),
        }
    }

    pub async fn merge_long_term(&self, uid: &str, updates: Map<String, Value>) {
        let session = self.session(uid).await;
        session.lock().await.merge_long_term(updates);
    }

    pub async fn remember_fact(&self, uid: &str, fact: &str) {
        let session = self.session(uid).await;
        session.lock().await.remember_fact(fact);
    }

    pub async fn get_long_term(&self, uid: &str) -> Map<String, Value> {
        match self.get(uid).await {
            Some(s) => s.lock().await.long_term(),
            None => Map::new(),
        }
    }

    pub async fn snapshot(&self, uid: &str) -> Option<SessionSnapshot> {
        match self.get(uid).await {
            Some(s) => Some(s.lock().await.snapshot()),
            None => None,
        }
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new(20)
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn session(&self, uid: &str) -> Arc<Mutex<UserSession>> {
        {
            let sessions = self.sessions.read().await;
            if let Some(s) = sessions.get(uid) {
                return Arc::clone(s);
            }
        }

        let mut sessions = self.sessions.write().await;
        Arc::clone(sessions.entry(uid.to_string()).or_insert_with(|| {
            tracing::debug!(uid, "Creating user session");
            Arc::new(Mutex::new(UserSession::new(self.stm_max_len)))
        }))
    }

    async fn get(&self, uid: &str) -> Option<Arc<Mutex<UserSession>>> {
        self.sessions.read().await.get(uid).cloned()
    }
}
