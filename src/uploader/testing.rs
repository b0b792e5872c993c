//! 测试用的脚本化后端
//!
//! 按文件名预设每次请求的结果，并记录调用次数和同时进行的传输数

use crate::backend::{
    ApiErrorBody, ConfirmRequest, FallbackUploadResponse, UploadBackend, UploadError,
    UploadSlot, UploadedObject,
};
use crate::uploader::source::{ProgressReporter, SourceFile};
use crate::uploader::store::BatchStore;
use crate::uploader::task::UploadItemStatus;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// 按状态码构造错误（与 HttpBackend 的分类一致）
pub fn status_error(status: u16) -> UploadError {
    UploadError::from_response(status, &ApiErrorBody::default())
}

#[derive(Default)]
pub struct ScriptedBackend {
    slot_scripts: Mutex<HashMap<String, VecDeque<Result<UploadSlot, UploadError>>>>,
    put_failures: Mutex<HashMap<String, UploadError>>,
    confirm_failures: Mutex<HashMap<String, UploadError>>,
    fallback_results: Mutex<HashMap<String, Result<FallbackUploadResponse, UploadError>>>,
    put_delay: Duration,
    observed_store: Mutex<Option<BatchStore>>,

    slot_calls: AtomicUsize,
    put_calls: AtomicUsize,
    confirm_calls: AtomicUsize,
    fallback_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    max_uploading: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// 每次 PUT 持续的时间
    pub fn with_put_delay(mut self, delay: Duration) -> Self {
        self.put_delay = delay;
        self
    }

    /// 预设槽位申请结果，用完后恢复默认成功
    pub fn script_slot(self, filename: &str, results: Vec<Result<UploadSlot, UploadError>>) -> Self {
        self.slot_scripts
            .lock()
            .insert(filename.to_string(), results.into());
        self
    }

    pub fn fail_put(self, filename: &str, err: UploadError) -> Self {
        self.put_failures.lock().insert(filename.to_string(), err);
        self
    }

    pub fn fail_confirm(self, filename: &str, err: UploadError) -> Self {
        self.confirm_failures.lock().insert(filename.to_string(), err);
        self
    }

    pub fn fallback(
        self,
        filename: &str,
        result: Result<FallbackUploadResponse, UploadError>,
    ) -> Self {
        self.fallback_results
            .lock()
            .insert(filename.to_string(), result);
        self
    }

    /// 申请槽位、传输和登记时统计存储里处于上传中的项数
    pub fn observe(&self, store: BatchStore) {
        *self.observed_store.lock() = Some(store);
    }

    /// 清除某个文件的 PUT 失败设置（模拟恢复）
    pub fn heal_put(&self, filename: &str) {
        self.put_failures.lock().remove(filename);
    }

    pub fn slot_calls(&self) -> usize {
        self.slot_calls.load(Ordering::SeqCst)
    }

    pub fn put_calls(&self) -> usize {
        self.put_calls.load(Ordering::SeqCst)
    }

    pub fn confirm_calls(&self) -> usize {
        self.confirm_calls.load(Ordering::SeqCst)
    }

    pub fn fallback_calls(&self) -> usize {
        self.fallback_calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn max_uploading(&self) -> usize {
        self.max_uploading.load(Ordering::SeqCst)
    }

    fn sample_store(&self) {
        if let Some(store) = self.observed_store.lock().as_ref() {
            let uploading = store.count_status(UploadItemStatus::Uploading);
            self.max_uploading.fetch_max(uploading, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl UploadBackend for ScriptedBackend {
    async fn request_upload_slot(
        &self,
        filename: &str,
        _relative_path: &str,
    ) -> Result<UploadSlot, UploadError> {
        self.slot_calls.fetch_add(1, Ordering::SeqCst);
        self.sample_store();
        let scripted = self
            .slot_scripts
            .lock()
            .get_mut(filename)
            .and_then(|queue| queue.pop_front());

        scripted.unwrap_or_else(|| {
            Ok(UploadSlot {
                upload_url: format!("https://storage.test/{}", filename),
                object_path: format!("/objects/uploads/{}", filename),
            })
        })
    }

    async fn put_object(
        &self,
        _slot: &UploadSlot,
        source: &SourceFile,
        progress: ProgressReporter,
    ) -> Result<(), UploadError> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        self.sample_store();

        let half = source.size / 2;
        progress.advance(half);
        if !self.put_delay.is_zero() {
            tokio::time::sleep(self.put_delay).await;
        }
        self.sample_store();

        let failure = self.put_failures.lock().get(&source.name).cloned();
        if failure.is_none() {
            progress.advance(source.size - half);
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn confirm_upload(&self, request: &ConfirmRequest) -> Result<UploadedObject, UploadError> {
        self.confirm_calls.fetch_add(1, Ordering::SeqCst);
        self.sample_store();
        if let Some(err) = self.confirm_failures.lock().get(&request.filename).cloned() {
            return Err(err);
        }
        Ok(UploadedObject {
            id: None,
            object_path: Some(request.object_path.clone()),
        })
    }

    async fn upload_multipart(
        &self,
        source: &SourceFile,
        _relative_path: &str,
        progress: ProgressReporter,
    ) -> Result<FallbackUploadResponse, UploadError> {
        self.fallback_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(result) = self.fallback_results.lock().get(&source.name).cloned() {
            return result;
        }
        progress.advance(source.size);
        Ok(FallbackUploadResponse {
            id: Some(format!("fb-{}", source.name)),
            url: Some(format!("/uploads/{}", source.name)),
            content: None,
            filename: Some(source.name.clone()),
        })
    }
}
