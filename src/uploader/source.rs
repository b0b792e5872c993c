// 上传源文件与传输进度
//
// SourceFile 统一描述磁盘文件和内存缓冲区，
// ProgressReporter 把已传输字节数折算成 0-100 的整数进度

use crate::backend::{UploadError, UploadErrorKind};
use bytes::Bytes;
use futures::TryStreamExt;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tokio_util::io::ReaderStream;

/// 未知类型时使用的 Content-Type
pub const OCTET_STREAM: &str = "application/octet-stream";

/// 内存内容切块大小（用于进度上报）
const MEMORY_CHUNK_SIZE: usize = 64 * 1024;

/// 文件内容来源
#[derive(Debug, Clone)]
pub enum FileContent {
    /// 本地磁盘文件
    Path(PathBuf),
    /// 内存缓冲区
    Memory(Bytes),
}

/// 上传源文件
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// 文件名（不含目录）
    pub name: String,
    /// 文件大小（字节）
    pub size: u64,
    /// MIME 类型，无法识别时为 None
    pub mime_type: Option<String>,
    /// 内容
    pub content: FileContent,
}

impl SourceFile {
    /// 从本地路径创建（读取元数据，按扩展名推断 MIME）
    pub async fn from_path<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());

        Ok(Self {
            mime_type: guess_mime(&name),
            name,
            size: metadata.len(),
            content: FileContent::Path(path.to_path_buf()),
        })
    }

    /// 从内存缓冲区创建
    pub fn from_bytes(name: impl Into<String>, data: impl Into<Bytes>, mime_type: Option<String>) -> Self {
        let data = data.into();
        Self {
            name: name.into(),
            size: data.len() as u64,
            mime_type,
            content: FileContent::Memory(data),
        }
    }

    /// 实际使用的 Content-Type
    pub fn effective_mime(&self) -> &str {
        self.mime_type
            .as_deref()
            .filter(|m| !m.is_empty())
            .unwrap_or(OCTET_STREAM)
    }

    /// 构造带进度上报的请求体
    pub async fn into_body(&self, reporter: ProgressReporter) -> Result<reqwest::Body, UploadError> {
        match &self.content {
            FileContent::Path(path) => {
                let file = tokio::fs::File::open(path).await.map_err(|e| {
                    UploadError::new(
                        UploadErrorKind::FileUnreadable,
                        format!("无法打开文件 {:?}: {}", path, e),
                    )
                })?;
                let stream = ReaderStream::new(file)
                    .inspect_ok(move |chunk| reporter.advance(chunk.len() as u64));
                Ok(reqwest::Body::wrap_stream(stream))
            }
            FileContent::Memory(data) => {
                let chunks: Vec<Result<Bytes, std::io::Error>> = (0..data.len())
                    .step_by(MEMORY_CHUNK_SIZE)
                    .map(|start| {
                        let end = (start + MEMORY_CHUNK_SIZE).min(data.len());
                        Ok(data.slice(start..end))
                    })
                    .collect();
                let stream = futures::stream::iter(chunks)
                    .inspect_ok(move |chunk| reporter.advance(chunk.len() as u64));
                Ok(reqwest::Body::wrap_stream(stream))
            }
        }
    }
}

/// 按文件扩展名推断 MIME
pub fn guess_mime(name: &str) -> Option<String> {
    mime_guess::from_path(name)
        .first()
        .map(|m| m.essence_str().to_string())
}

/// 计算整数百分比，总量未知（0）时返回 None
pub fn percent_of(loaded: u64, total: u64) -> Option<u8> {
    if total == 0 {
        return None;
    }
    let percent = (loaded as f64 / total as f64 * 100.0).round();
    Some(percent.clamp(0.0, 100.0) as u8)
}

/// 进度回调（参数为 0-100 的整数进度）
pub type ProgressSink = Arc<dyn Fn(u8) + Send + Sync>;

/// 传输进度上报器
///
/// 每次传输创建一个，只在整数百分比变化时回调
#[derive(Clone)]
pub struct ProgressReporter {
    total: u64,
    loaded: Arc<AtomicU64>,
    last_percent: Arc<AtomicU8>,
    sink: ProgressSink,
}

impl ProgressReporter {
    pub fn new(total: u64, sink: ProgressSink) -> Self {
        Self {
            total,
            loaded: Arc::new(AtomicU64::new(0)),
            last_percent: Arc::new(AtomicU8::new(0)),
            sink,
        }
    }

    /// 不上报进度
    pub fn noop(total: u64) -> Self {
        Self::new(total, Arc::new(|_: u8| {}))
    }

    /// 累加已传输字节数
    pub fn advance(&self, bytes: u64) {
        let loaded = self.loaded.fetch_add(bytes, Ordering::SeqCst) + bytes;
        if let Some(percent) = percent_of(loaded, self.total) {
            let previous = self.last_percent.swap(percent, Ordering::SeqCst);
            if previous != percent {
                (self.sink)(percent);
            }
        }
    }

    pub fn loaded(&self) -> u64 {
        self.loaded.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("total", &self.total)
            .field("loaded", &self.loaded())
            .finish()
    }
}

/// 序列化时只输出元数据
impl Serialize for SourceFile {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("SourceFile", 3)?;
        state.serialize_field("name", &self.name)?;
        state.serialize_field("size", &self.size)?;
        state.serialize_field("mimeType", &self.mime_type)?;
        state.end()
    }
}
