// 上传批次
//
// 批次持有上传项列表（纯数据），界面层只订阅事件并渲染，不直接修改上传状态。
//
// 生命周期：
// 1. add_files(): 准入过滤后追加到列表
// 2. start() / retry_item() / retry_failed(): 运行执行器
// 3. 汇总结果，调用 on_complete / on_error
// 4. close(): 上传进行中时无效

use crate::backend::{UploadBackend, UploadError, UploadErrorKind};
use crate::common::SessionSignal;
use crate::config::UploadConfig;
use crate::events::UploadEvent;
use crate::uploader::admission::{AdmissionFilter, AdmissionNotice};
use crate::uploader::aggregator::{BatchOutcome, BatchReport, ResultAggregator};
use crate::uploader::collector::CollectedFile;
use crate::uploader::executor::BatchExecutor;
use crate::uploader::store::BatchStore;
use crate::uploader::strategy::UploadStrategy;
use crate::uploader::task::{PendingUploadItem, UploadItemStatus, UploadedFileRecord};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// 批次错误
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    /// 本批次没有任何成功的文件
    #[error("{failed} 个文件全部上传失败: {first_error}")]
    AllFailed { failed: usize, first_error: String },

    #[error("正在上传，请等待当前上传完成")]
    Busy,

    #[error(transparent)]
    Item(#[from] UploadError),
}

type CompleteCallback = Box<dyn Fn(Vec<UploadedFileRecord>) + Send + Sync>;
type ErrorCallback = Box<dyn Fn(BatchError) + Send + Sync>;

/// 调用方回调
pub struct BatchCallbacks {
    /// 有成功记录时调用（只包含本轮的记录）
    pub on_complete: CompleteCallback,
    /// 整个批次没有成功项时调用
    pub on_error: ErrorCallback,
}

impl BatchCallbacks {
    pub fn new(
        on_complete: impl Fn(Vec<UploadedFileRecord>) + Send + Sync + 'static,
        on_error: impl Fn(BatchError) + Send + Sync + 'static,
    ) -> Self {
        Self {
            on_complete: Box::new(on_complete),
            on_error: Box::new(on_error),
        }
    }

    pub fn noop() -> Self {
        Self::new(|_| {}, |_| {})
    }
}

/// 上传进行中标记，离开作用域时自动复位
struct UploadingGuard<'a>(&'a AtomicBool);

impl Drop for UploadingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct UploadBatch {
    store: BatchStore,
    admission: AdmissionFilter,
    executor: BatchExecutor,
    aggregator: ResultAggregator,
    concurrency: usize,
    callbacks: BatchCallbacks,
    uploading: AtomicBool,
}

impl UploadBatch {
    pub fn new(
        config: &UploadConfig,
        backend: Arc<dyn UploadBackend>,
        session: SessionSignal,
        callbacks: BatchCallbacks,
    ) -> Self {
        let store = BatchStore::new();
        let strategy = Arc::new(UploadStrategy::new(backend, session, config.retry_policy()));

        Self {
            executor: BatchExecutor::new(strategy, store.clone()),
            admission: AdmissionFilter::new(config.admission_config()),
            aggregator: ResultAggregator::new(config.auto_close_delay()),
            concurrency: config.concurrency.max(1),
            store,
            callbacks,
            uploading: AtomicBool::new(false),
        }
    }

    /// 订阅批次事件
    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.store.subscribe()
    }

    /// 上传项快照
    pub fn items(&self) -> Arc<Vec<PendingUploadItem>> {
        self.store.snapshot()
    }

    pub fn is_uploading(&self) -> bool {
        self.uploading.load(Ordering::SeqCst)
    }

    /// 准入并追加文件
    ///
    /// # 返回
    /// 被拒绝文件的提示，同时以 Notice 事件发布
    pub fn add_files(&self, files: Vec<CollectedFile>) -> Vec<AdmissionNotice> {
        let result = self.admission.admit(files, self.store.len());
        self.store.append(result.admitted);

        for notice in &result.notices {
            self.store.publish(UploadEvent::Notice {
                message: notice.message(),
            });
        }
        result.notices
    }

    /// 移除上传项，上传进行中时无效
    pub fn remove_item(&self, id: &str) -> bool {
        if self.is_uploading() {
            warn!("正在上传，忽略移除请求: {}", id);
            return false;
        }
        self.store.remove(id).is_ok()
    }

    /// 上传所有等待中的文件
    pub async fn start(&self) -> Result<BatchReport, BatchError> {
        let items = self.store.items_with_status(UploadItemStatus::Pending);
        self.run(items).await
    }

    /// 重试单个失败项
    pub async fn retry_item(&self, id: &str) -> Result<BatchReport, BatchError> {
        let item = self.store.get(id).ok_or_else(|| UploadError::not_found(id))?;
        if item.status != UploadItemStatus::Error {
            return Err(UploadError::new(
                UploadErrorKind::InvalidTransition,
                format!("只能重试失败的文件: {} ({})", item.relative_path, item.status),
            )
            .into());
        }
        self.run(vec![item]).await
    }

    /// 重试所有失败项
    pub async fn retry_failed(&self) -> Result<BatchReport, BatchError> {
        let items = self.store.items_with_status(UploadItemStatus::Error);
        self.run(items).await
    }

    /// 关闭批次，上传进行中时无效
    pub fn close(&self) -> bool {
        if self.is_uploading() {
            warn!("正在上传，不能关闭");
            return false;
        }
        self.store.clear();
        true
    }

    /// 全部成功时按报告中的延迟自动关闭
    pub async fn auto_close(&self, report: &BatchReport) -> bool {
        match report.close_after {
            Some(delay) => {
                tokio::time::sleep(delay).await;
                self.close()
            }
            None => false,
        }
    }

    async fn run(&self, items: Vec<PendingUploadItem>) -> Result<BatchReport, BatchError> {
        if self
            .uploading
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(BatchError::Busy);
        }
        let guard = UploadingGuard(&self.uploading);

        if items.is_empty() {
            info!("没有需要上传的文件");
            return Ok(self.aggregator.summarize(vec![], &[]));
        }

        let records = self.executor.run(items, self.concurrency).await;
        drop(guard);

        let snapshot = self.store.snapshot();
        let report = self.aggregator.summarize(records, &snapshot);

        // 两个计数都按整个批次统计
        self.store.publish(UploadEvent::BatchFinished {
            succeeded: report.outcome.succeeded(),
            failed: report.outcome.failed(),
        });
        self.store.publish(UploadEvent::Notice {
            message: report.outcome.message(),
        });
        info!("{}", report.outcome.message());

        if !report.records.is_empty() {
            (self.callbacks.on_complete)(report.records.clone());
        }

        if let BatchOutcome::AllFailed { failed } = report.outcome {
            let first_error = snapshot
                .iter()
                .find(|item| item.status == UploadItemStatus::Error)
                .and_then(|item| item.error.clone())
                .unwrap_or_default();
            error!("批次上传全部失败: {} 个文件", failed);
            (self.callbacks.on_error)(BatchError::AllFailed {
                failed,
                first_error,
            });
        }

        Ok(report)
    }
}
