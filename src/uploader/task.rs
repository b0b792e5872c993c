// 上传项定义
//
// 状态只允许按 Pending -> Uploading -> {Success | Error}、Error -> Uploading 转换

use crate::backend::UploadError;
use crate::uploader::source::SourceFile;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// 上传项状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum UploadItemStatus {
    /// 等待中
    Pending,
    /// 上传中
    Uploading,
    /// 上传成功
    Success,
    /// 上传失败（可重试）
    Error,
}

impl UploadItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadItemStatus::Pending => "pending",
            UploadItemStatus::Uploading => "uploading",
            UploadItemStatus::Success => "success",
            UploadItemStatus::Error => "error",
        }
    }

    /// 是否允许转换到目标状态
    pub fn can_transition_to(&self, next: UploadItemStatus) -> bool {
        use UploadItemStatus::*;
        matches!(
            (self, next),
            (Pending, Uploading) | (Error, Uploading) | (Uploading, Success) | (Uploading, Error)
        )
    }
}

impl fmt::Display for UploadItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 批次中的待上传项
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingUploadItem {
    /// 批次内唯一 ID
    pub id: String,
    /// 源文件
    pub source: SourceFile,
    /// 相对路径（posix 风格，保留目录结构）
    pub relative_path: String,
    /// 状态
    pub status: UploadItemStatus,
    /// 进度 0-100
    pub progress: u8,
    /// 错误信息（面向用户）
    pub error: Option<String>,
    /// 远程对象路径（成功后设置）
    pub remote_object_path: Option<String>,
    /// 创建时间 (Unix timestamp)
    pub created_at: i64,
    /// 开始时间 (Unix timestamp)
    pub started_at: Option<i64>,
    /// 完成时间 (Unix timestamp)
    pub completed_at: Option<i64>,
}

impl PendingUploadItem {
    /// 创建新的上传项（准入时调用）
    pub fn new(source: SourceFile, relative_path: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source,
            relative_path,
            status: UploadItemStatus::Pending,
            progress: 0,
            error: None,
            remote_object_path: None,
            created_at: chrono::Utc::now().timestamp(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn filename(&self) -> &str {
        &self.source.name
    }

    fn transition(&mut self, next: UploadItemStatus) -> Result<(), UploadError> {
        if !self.status.can_transition_to(next) {
            return Err(UploadError::invalid_transition(format!(
                "{}: {} -> {}",
                self.relative_path, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }

    /// 标记为上传中（首次上传或重试）
    pub fn mark_uploading(&mut self) -> Result<(), UploadError> {
        self.transition(UploadItemStatus::Uploading)?;
        self.progress = 0;
        self.error = None;
        self.started_at = Some(chrono::Utc::now().timestamp());
        self.completed_at = None;
        Ok(())
    }

    /// 标记为成功
    pub fn mark_success(&mut self, object_path: String) -> Result<(), UploadError> {
        self.transition(UploadItemStatus::Success)?;
        self.progress = 100;
        self.remote_object_path = Some(object_path);
        self.completed_at = Some(chrono::Utc::now().timestamp());
        Ok(())
    }

    /// 标记为失败
    pub fn mark_failed(&mut self, error: String) -> Result<(), UploadError> {
        self.transition(UploadItemStatus::Error)?;
        self.error = Some(error);
        self.completed_at = Some(chrono::Utc::now().timestamp());
        Ok(())
    }

    /// 更新进度，仅上传中有效
    ///
    /// # 返回
    /// 进度是否发生变化
    pub fn set_progress(&mut self, progress: u8) -> bool {
        if self.status != UploadItemStatus::Uploading {
            return false;
        }
        let progress = progress.min(100);
        if self.progress == progress {
            return false;
        }
        self.progress = progress;
        true
    }
}

/// 成功上传的文件记录（交给调用方持久化）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFileRecord {
    pub id: String,
    pub filename: String,
    pub object_path: String,
    pub size: u64,
    pub mime_type: String,
    pub relative_path: String,
}
