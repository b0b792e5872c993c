//! 事件模块
//!
//! - `types.rs`: 上传批次事件类型定义

mod types;

pub use types::*;
