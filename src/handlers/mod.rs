//! 处理器：注册表、操作声明与内置处理器

pub mod chat;
pub mod developer;
pub mod echo;
pub mod github;
pub mod jira;
pub mod registry;
pub mod research;
pub mod schema;
#[cfg(test)]
pub(crate) mod test_server;

pub use chat::ChatHandler;
pub use developer::DeveloperHandler;
pub use echo::EchoHandler;
pub use github::GithubHandler;
pub use jira::JiraHandler;
pub use registry::{Capabilities, Handler, HandlerRegistry};
pub use research::ResearchHandler;
pub use schema::{OperationSpec, ParamSpec};
