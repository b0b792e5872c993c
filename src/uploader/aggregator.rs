//! 结果汇总
//!
//! 汇总一轮上传的记录，按整个批次的状态决定结束方式。
//! 部分失败不是错误，失败信息保留在各上传项的 error 字段中。

use crate::uploader::task::{PendingUploadItem, UploadItemStatus, UploadedFileRecord};
use serde::Serialize;
use std::time::Duration;

/// 批次结束方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BatchOutcome {
    /// 全部成功，延迟后自动关闭
    AllSucceeded { succeeded: usize },
    /// 部分成功，保持打开以便重试
    PartialSuccess { succeeded: usize, failed: usize },
    /// 全部失败，通知调用方
    AllFailed { failed: usize },
    /// 没有任何上传项
    Empty,
}

impl BatchOutcome {
    /// 整个批次中成功的项数
    pub fn succeeded(&self) -> usize {
        match self {
            BatchOutcome::AllSucceeded { succeeded }
            | BatchOutcome::PartialSuccess { succeeded, .. } => *succeeded,
            BatchOutcome::AllFailed { .. } | BatchOutcome::Empty => 0,
        }
    }

    /// 整个批次中失败的项数
    pub fn failed(&self) -> usize {
        match self {
            BatchOutcome::PartialSuccess { failed, .. } | BatchOutcome::AllFailed { failed } => {
                *failed
            }
            BatchOutcome::AllSucceeded { .. } | BatchOutcome::Empty => 0,
        }
    }

    /// 面向用户的汇总文本
    pub fn message(&self) -> String {
        match self {
            BatchOutcome::AllSucceeded { succeeded } => {
                format!("{} 个文件全部上传成功", succeeded)
            }
            BatchOutcome::PartialSuccess { succeeded, failed } => {
                format!("{} 个文件上传成功，{} 个失败，可重试失败项", succeeded, failed)
            }
            BatchOutcome::AllFailed { failed } => format!("{} 个文件全部上传失败", failed),
            BatchOutcome::Empty => "没有需要上传的文件".to_string(),
        }
    }
}

/// 一轮上传的汇总报告
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    /// 本轮成功的记录（按完成顺序）
    pub records: Vec<UploadedFileRecord>,
    pub outcome: BatchOutcome,
    /// 全部成功时的自动关闭延迟
    #[serde(skip)]
    pub close_after: Option<Duration>,
}

impl BatchReport {
    pub fn has_failures(&self) -> bool {
        matches!(
            self.outcome,
            BatchOutcome::PartialSuccess { .. } | BatchOutcome::AllFailed { .. }
        )
    }
}

#[derive(Debug, Clone)]
pub struct ResultAggregator {
    auto_close_delay: Duration,
}

impl ResultAggregator {
    pub fn new(auto_close_delay: Duration) -> Self {
        Self { auto_close_delay }
    }

    /// 汇总
    ///
    /// # 参数
    /// - `records`: 本轮成功的记录
    /// - `items`: 整个批次的当前快照（失败数按整个批次统计）
    pub fn summarize(&self, records: Vec<UploadedFileRecord>, items: &[PendingUploadItem]) -> BatchReport {
        let failed = count(items, UploadItemStatus::Error);
        // 之前轮次已成功的项也算在内
        let succeeded = count(items, UploadItemStatus::Success).max(records.len());

        let outcome = match (succeeded, failed) {
            (0, 0) => BatchOutcome::Empty,
            (s, 0) => BatchOutcome::AllSucceeded { succeeded: s },
            (0, f) => BatchOutcome::AllFailed { failed: f },
            (s, f) => BatchOutcome::PartialSuccess {
                succeeded: s,
                failed: f,
            },
        };

        let close_after = match outcome {
            BatchOutcome::AllSucceeded { .. } => Some(self.auto_close_delay),
            _ => None,
        };

        BatchReport {
            records,
            outcome,
            close_after,
        }
    }
}

fn count(items: &[PendingUploadItem], status: UploadItemStatus) -> usize {
    items.iter().filter(|item| item.status == status).count()
}
