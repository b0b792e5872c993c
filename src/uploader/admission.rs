//! 文件准入过滤
//!
//! 在任何网络请求之前检查文件大小、类型和批次容量。
//! 被拒绝的文件以提示（notice）形式返回，不会产生错误。

use crate::uploader::collector::CollectedFile;
use crate::uploader::source::guess_mime;
use crate::uploader::task::PendingUploadItem;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// 准入配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// 单批最大文件数
    pub max_number_of_files: usize,
    /// 单文件最大字节数
    pub max_file_size: u64,
    /// 允许的类型，为空表示不限
    pub allowed_file_types: Vec<String>,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_number_of_files: 50,
            max_file_size: 500 * 1024 * 1024,
            allowed_file_types: vec![],
        }
    }
}

/// 准入提示
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdmissionNotice {
    /// 文件过大
    FileTooLarge { name: String, size: u64, limit: u64 },
    /// 类型不允许
    TypeNotAllowed { name: String, mime: Option<String> },
    /// 超出批次容量
    CapacityExceeded { dropped: usize, limit: usize },
}

impl AdmissionNotice {
    /// 面向用户的提示文本
    pub fn message(&self) -> String {
        match self {
            AdmissionNotice::FileTooLarge { name, size, limit } => format!(
                "文件 {} 过大（{}），单个文件不能超过 {}",
                name,
                format_bytes(*size),
                format_bytes(*limit)
            ),
            AdmissionNotice::TypeNotAllowed { name, mime } => format!(
                "不支持的文件类型: {}（{}）",
                name,
                mime.as_deref().unwrap_or("未知类型")
            ),
            AdmissionNotice::CapacityExceeded { dropped, limit } => format!(
                "每批最多上传 {} 个文件，已忽略 {} 个文件",
                limit, dropped
            ),
        }
    }
}

/// 准入结果
#[derive(Debug, Default)]
pub struct AdmissionResult {
    /// 准入的上传项（状态为 Pending）
    pub admitted: Vec<PendingUploadItem>,
    /// 拒绝提示
    pub notices: Vec<AdmissionNotice>,
}

/// 准入过滤器
#[derive(Debug, Clone)]
pub struct AdmissionFilter {
    config: AdmissionConfig,
}

impl AdmissionFilter {
    pub fn new(config: AdmissionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    /// 过滤候选文件
    ///
    /// # 参数
    /// - `candidates`: 收集到的文件
    /// - `current_len`: 批次中已有的文件数
    pub fn admit(&self, candidates: Vec<CollectedFile>, current_len: usize) -> AdmissionResult {
        let mut result = AdmissionResult::default();
        let remaining = self.config.max_number_of_files.saturating_sub(current_len);
        let mut dropped = 0usize;

        for candidate in candidates {
            let source = &candidate.source;

            if source.size > self.config.max_file_size {
                warn!(
                    "文件超过大小限制，拒绝: {} ({})",
                    candidate.relative_path,
                    format_bytes(source.size)
                );
                result.notices.push(AdmissionNotice::FileTooLarge {
                    name: source.name.clone(),
                    size: source.size,
                    limit: self.config.max_file_size,
                });
                continue;
            }

            if !self.type_allowed(&source.name, source.mime_type.as_deref()) {
                warn!(
                    "文件类型不允许，拒绝: {} ({:?})",
                    candidate.relative_path, source.mime_type
                );
                result.notices.push(AdmissionNotice::TypeNotAllowed {
                    name: source.name.clone(),
                    mime: source.mime_type.clone(),
                });
                continue;
            }

            if result.admitted.len() >= remaining {
                dropped += 1;
                continue;
            }

            debug!("准入文件: {}", candidate.relative_path);
            result
                .admitted
                .push(PendingUploadItem::new(candidate.source, candidate.relative_path));
        }

        if dropped > 0 {
            warn!(
                "超出批次容量 {}，丢弃 {} 个文件",
                self.config.max_number_of_files, dropped
            );
            result.notices.push(AdmissionNotice::CapacityExceeded {
                dropped,
                limit: self.config.max_number_of_files,
            });
        }

        info!(
            "准入完成: 接受 {} 个，拒绝提示 {} 条",
            result.admitted.len(),
            result.notices.len()
        );
        result
    }

    /// 类型白名单判断
    fn type_allowed(&self, name: &str, mime: Option<&str>) -> bool {
        if self.config.allowed_file_types.is_empty() {
            return true;
        }

        let mime = mime
            .filter(|m| !m.is_empty())
            .map(|m| m.to_ascii_lowercase())
            .or_else(|| guess_mime(name));
        let lower_name = name.to_ascii_lowercase();

        self.config.allowed_file_types.iter().any(|rule| {
            let rule = rule.trim().to_ascii_lowercase();
            if rule.starts_with('.') {
                lower_name.ends_with(&rule)
            } else if let Some(prefix) = rule.strip_suffix('*') {
                mime.as_deref().map_or(false, |m| m.starts_with(prefix))
            } else {
                mime.as_deref() == Some(rule.as_str())
            }
        })
    }
}

/// 格式化字节大小
pub(crate) fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
