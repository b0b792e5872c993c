// 有界并发执行器
//
// 并发策略：
// - VecDeque 保存尚未开始的上传项（FIFO）
// - JoinSet 管理进行中的任务，数量不超过 concurrency
// - 每完成一个任务立即从队首补充下一个
// - 队列为空且没有进行中的任务时结束
//
// 单个文件失败不影响其他文件，只是不出现在返回的记录中

use crate::backend::{UploadError, UploadErrorKind};
use crate::uploader::source::ProgressSink;
use crate::uploader::store::BatchStore;
use crate::uploader::strategy::UploadStrategy;
use crate::uploader::task::{PendingUploadItem, UploadedFileRecord};
use futures::FutureExt;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// 默认最大同时上传文件数
pub const DEFAULT_CONCURRENCY: usize = 4;

pub struct BatchExecutor {
    strategy: Arc<UploadStrategy>,
    store: BatchStore,
}

impl BatchExecutor {
    pub fn new(strategy: Arc<UploadStrategy>, store: BatchStore) -> Self {
        Self { strategy, store }
    }

    /// 上传一组文件
    ///
    /// # 参数
    /// - `items`: 待上传项（Pending 或 Error 状态）
    /// - `concurrency`: 最大同时上传数，0 按 1 处理
    ///
    /// # 返回
    /// 成功的记录，按完成顺序排列
    pub async fn run(
        &self,
        items: Vec<PendingUploadItem>,
        concurrency: usize,
    ) -> Vec<UploadedFileRecord> {
        let limit = concurrency.max(1);
        let total = items.len();
        let mut queue: VecDeque<PendingUploadItem> = items.into();
        let mut join_set: JoinSet<Option<UploadedFileRecord>> = JoinSet::new();
        let mut records = Vec::new();

        info!("[批量上传] 开始上传 {} 个文件，并发数: {}", total, limit);

        loop {
            // 补满并发槽位
            while join_set.len() < limit {
                let item = match queue.pop_front() {
                    Some(item) => item,
                    None => break,
                };

                if let Err(e) = self.store.mark_uploading(&item.id) {
                    warn!("跳过上传项 {}: {}", item.relative_path, e);
                    continue;
                }

                debug!("启动上传任务: {}", item.relative_path);
                join_set.spawn(upload_one(self.strategy.clone(), self.store.clone(), item));
            }

            match join_set.join_next().await {
                Some(Ok(Some(record))) => records.push(record),
                Some(Ok(None)) => {}
                Some(Err(e)) => error!("上传任务异常: {}", e),
                // 队列为空且没有进行中的任务
                None => break,
            }
        }

        info!(
            "[批量上传] 完成: 成功 {} 个，失败 {} 个",
            records.len(),
            total - records.len()
        );
        records
    }
}

/// 上传单个文件并把结果写回存储
async fn upload_one(
    strategy: Arc<UploadStrategy>,
    store: BatchStore,
    item: PendingUploadItem,
) -> Option<UploadedFileRecord> {
    let progress_store = store.clone();
    let progress_id = item.id.clone();
    let progress: ProgressSink =
        Arc::new(move |p: u8| progress_store.set_progress(&progress_id, p));

    let result = AssertUnwindSafe(strategy.execute(&item, progress))
        .catch_unwind()
        .await
        .unwrap_or_else(|_| {
            error!("上传任务 panic: {}", item.relative_path);
            Err(UploadError::new(
                UploadErrorKind::TransferFailed,
                "上传任务异常退出",
            ))
        });

    match result {
        Ok(record) => {
            if let Err(e) = store.mark_success(&item.id, &record.object_path) {
                // 上传项已被移除等情况，记录仍然返回
                warn!("更新上传项状态失败: {}", e);
            }
            Some(record)
        }
        Err(err) => {
            if let Err(e) = store.mark_failed(&item.id, &err.user_message()) {
                warn!("更新上传项状态失败: {}", e);
            }
            None
        }
    }
}
