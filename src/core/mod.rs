//! 核心类型：路由错误

pub mod error;

pub use error::RouterError;
