//! 公共模块
//!
//! 提供跨模块使用的通用组件

mod session_signal;

pub use session_signal::{SessionExpired, SessionSignal};
