//! 记忆层：短期（对话记录）、长期（键值 + 备忘）、按用户隔离的会话存储

pub mod conversation;
pub mod long_term;
pub mod store;

pub use conversation::{ConversationMemory, Message, Role};
pub use long_term::{value_to_text, LongTermMemory, USER_MEMOS_KEY};
pub use store::{MemorySessionStore, SessionSnapshot, SessionStore, UserSession};
