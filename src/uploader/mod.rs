// 批量上传模块
//
// 数据流：收集 -> 准入 -> 队列 -> 有界并发执行 -> 单文件策略 -> 汇总 -> 回调
//
// - collector: 文件/文件夹/拖放输入统一为 (文件, 相对路径)
// - admission: 大小、类型、容量检查
// - executor: FIFO 队列 + 有界并发
// - strategy: 槽位申请 -> 直传 -> 登记，存储不可用时回退 multipart
// - aggregator: 汇总结果，决定结束方式
// - batch: 批次控制（持有上传项列表，发布事件）

pub mod admission;
pub mod aggregator;
pub mod batch;
pub mod collector;
pub mod executor;
pub mod source;
pub mod store;
pub mod strategy;
pub mod task;

#[cfg(test)]
pub(crate) mod testing;

pub use admission::{AdmissionConfig, AdmissionFilter, AdmissionNotice, AdmissionResult};
pub use aggregator::{BatchOutcome, BatchReport, ResultAggregator};
pub use batch::{BatchCallbacks, BatchError, UploadBatch};
pub use collector::{
    CollectError, CollectedFile, DirectoryEntry, DropEntry, DroppedFiles, FileCollector,
    FolderPickedFile, LocalDirectory,
};
pub use executor::{BatchExecutor, DEFAULT_CONCURRENCY};
pub use source::{FileContent, ProgressReporter, ProgressSink, SourceFile};
pub use store::BatchStore;
pub use strategy::{advance, RetryPolicy, Step, StrategyEvent, UploadState, UploadStrategy};
pub use task::{PendingUploadItem, UploadItemStatus, UploadedFileRecord};
