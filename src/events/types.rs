//! 上传事件类型定义
//!
//! 批次状态变化以事件形式推送给界面层，界面只订阅和渲染

use crate::uploader::task::UploadItemStatus;
use serde::{Deserialize, Serialize};

/// 事件优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventPriority {
    /// 低优先级：进度更新
    Low = 0,
    /// 中优先级：状态变更
    Medium = 1,
    /// 高优先级：完成、失败、提示等关键事件
    High = 2,
}

/// 上传事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum UploadEvent {
    /// 文件加入批次
    Added {
        item_id: String,
        filename: String,
        relative_path: String,
        size: u64,
    },
    /// 进度更新
    Progress { item_id: String, progress: u8 },
    /// 状态变更
    StatusChanged {
        item_id: String,
        old_status: UploadItemStatus,
        new_status: UploadItemStatus,
    },
    /// 上传成功
    Completed {
        item_id: String,
        relative_path: String,
        object_path: String,
    },
    /// 上传失败
    Failed {
        item_id: String,
        relative_path: String,
        error: String,
    },
    /// 移出批次
    Removed { item_id: String },
    /// 一轮上传结束
    BatchFinished { succeeded: usize, failed: usize },
    /// 提示（准入拒绝、汇总结果等）
    Notice { message: String },
}

impl UploadEvent {
    /// 获取事件优先级
    pub fn priority(&self) -> EventPriority {
        match self {
            UploadEvent::Progress { .. } => EventPriority::Low,
            UploadEvent::Added { .. }
            | UploadEvent::StatusChanged { .. }
            | UploadEvent::Removed { .. } => EventPriority::Medium,
            UploadEvent::Completed { .. }
            | UploadEvent::Failed { .. }
            | UploadEvent::BatchFinished { .. }
            | UploadEvent::Notice { .. } => EventPriority::High,
        }
    }

    /// 关联的上传项 ID
    pub fn item_id(&self) -> Option<&str> {
        match self {
            UploadEvent::Added { item_id, .. }
            | UploadEvent::Progress { item_id, .. }
            | UploadEvent::StatusChanged { item_id, .. }
            | UploadEvent::Completed { item_id, .. }
            | UploadEvent::Failed { item_id, .. }
            | UploadEvent::Removed { item_id } => Some(item_id),
            UploadEvent::BatchFinished { .. } | UploadEvent::Notice { .. } => None,
        }
    }
}
