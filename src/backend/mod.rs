// 后端 API 模块
//
// 上传流水线只依赖 UploadBackend trait，
// HttpBackend 是基于 reqwest 的实现

pub mod client;
pub mod types;

pub use client::HttpBackend;
pub use types::*;

use crate::uploader::source::{ProgressReporter, SourceFile};
use async_trait::async_trait;

/// 上传流水线消费的后端接口
#[async_trait]
pub trait UploadBackend: Send + Sync {
    /// 申请签名直传槽位（POST /api/objects/upload）
    async fn request_upload_slot(
        &self,
        filename: &str,
        relative_path: &str,
    ) -> Result<UploadSlot, UploadError>;

    /// 直传文件字节到签名地址（PUT uploadURL）
    async fn put_object(
        &self,
        slot: &UploadSlot,
        source: &SourceFile,
        progress: ProgressReporter,
    ) -> Result<(), UploadError>;

    /// 登记已直传的对象（PUT /api/objects/confirm）
    async fn confirm_upload(&self, request: &ConfirmRequest) -> Result<UploadedObject, UploadError>;

    /// 回退路径：multipart 直接上传到应用服务器（POST /api/upload）
    async fn upload_multipart(
        &self,
        source: &SourceFile,
        relative_path: &str,
        progress: ProgressReporter,
    ) -> Result<FallbackUploadResponse, UploadError>;
}
