//! 会话过期信号
//!
//! 进程级、只触发一次的发布/订阅通知，与具体上传调用解耦
//! 使用 compare_exchange 保证并发 401 只广播一次

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// 订阅通道容量
const SIGNAL_CHANNEL_CAPACITY: usize = 8;

/// 会话过期事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionExpired {
    /// 触发来源（如触发 401 的文件）
    pub source: String,
    /// 触发时间 (Unix timestamp)
    pub at: i64,
}

/// 会话过期信号
///
/// 克隆后共享同一状态，任意订阅者独立响应
#[derive(Debug, Clone)]
pub struct SessionSignal {
    /// 是否已触发
    fired: Arc<AtomicBool>,
    /// 广播发送端
    sender: broadcast::Sender<SessionExpired>,
}

impl SessionSignal {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(SIGNAL_CHANNEL_CAPACITY);
        Self {
            fired: Arc::new(AtomicBool::new(false)),
            sender,
        }
    }

    /// 订阅会话过期事件
    pub fn subscribe(&self) -> broadcast::Receiver<SessionExpired> {
        self.sender.subscribe()
    }

    /// 通知会话过期
    ///
    /// # 返回
    /// - `true`: 本次调用触发了广播
    /// - `false`: 已经触发过，忽略
    pub fn notify_expired(&self, source: &str) -> bool {
        if self
            .fired
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("会话过期信号已触发过，忽略: {}", source);
            return false;
        }

        warn!("会话已过期（401），来源: {}", source);
        let event = SessionExpired {
            source: source.to_string(),
            at: chrono::Utc::now().timestamp(),
        };
        // 没有订阅者时发送失败，忽略
        let _ = self.sender.send(event);
        true
    }

    /// 是否已过期
    pub fn is_expired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// 重新登录后复位
    pub fn reset(&self) {
        self.fired.store(false, Ordering::SeqCst);
    }
}

impl Default for SessionSignal {
    fn default() -> Self {
        Self::new()
    }
}
