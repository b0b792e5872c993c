// Bulk Uploader Library
// 有界并发、可重试的批量文件上传核心库

// 后端接口模块
pub mod backend;

// 公共模块（会话过期信号）
pub mod common;

// 配置管理模块
pub mod config;

// 批次事件模块
pub mod events;

// 日志模块
pub mod logging;

// 批量上传模块
pub mod uploader;

// 导出常用类型
pub use backend::{HttpBackend, UploadBackend, UploadError, UploadErrorKind};
pub use common::{SessionExpired, SessionSignal};
pub use config::AppConfig;
pub use events::UploadEvent;
pub use uploader::{
    AdmissionConfig, AdmissionNotice, BatchCallbacks, BatchError, BatchOutcome, BatchReport,
    CollectedFile, FileCollector, PendingUploadItem, SourceFile, UploadBatch, UploadItemStatus,
    UploadedFileRecord,
};
