// 后端接口类型定义
//
// 包含请求/响应结构体和上传错误分类

use serde::{Deserialize, Serialize};
use std::fmt;

// =====================================================
// 请求 / 响应
// =====================================================

/// 申请上传槽位请求（POST /api/objects/upload）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SlotRequest {
    pub filename: String,
    pub relative_path: String,
}

/// 上传槽位：签名直传地址 + 规范对象路径
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UploadSlot {
    /// 签名直传地址
    #[serde(rename = "uploadURL")]
    pub upload_url: String,
    /// 规范对象路径
    pub object_path: String,
}

/// 直传完成后的登记请求（PUT /api/objects/confirm）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmRequest {
    pub object_path: String,
    pub filename: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub mime_type: String,
    pub relative_path: String,
}

/// 登记响应
///
/// 后端返回内容不固定，只取可能存在的 id / objectPath
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UploadedObject {
    #[serde(default, deserialize_with = "de_opt_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub object_path: Option<String>,
}

/// 回退 multipart 上传响应（POST /api/upload）
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FallbackUploadResponse {
    #[serde(default, deserialize_with = "de_opt_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
}

impl FallbackUploadResponse {
    /// 对象位置：优先 url，其次 content
    pub fn location(&self) -> Option<&str> {
        self.url
            .as_deref()
            .or(self.content.as_deref())
            .filter(|s| !s.is_empty())
    }
}

/// 错误响应体
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

impl ApiErrorBody {
    pub fn text(&self) -> Option<&str> {
        self.message.as_deref().or(self.error.as_deref())
    }
}

/// id 既可能是字符串也可能是数字
fn de_opt_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

// =====================================================
// 错误分类
// =====================================================

/// 上传错误类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadErrorKind {
    /// 请求超时 408（可重试）
    Timeout,
    /// 限流 429（可重试）
    RateLimited,
    /// 服务器错误 5xx（可重试，耗尽后回退 multipart）
    ServerError,
    /// 存储/签名服务不可用（不可重试，直接回退 multipart）
    StorageUnavailable,
    /// 网络错误（可重试）
    Network,
    /// 会话过期 401（不可重试，不回退）
    Unauthorized,
    /// 其他 4xx（不可重试）
    Rejected,
    /// 响应格式错误
    Malformed,
    /// 直传 / 回退传输失败
    TransferFailed,
    /// 登记失败
    ConfirmFailed,
    /// 本地文件无法读取
    FileUnreadable,
    /// 任务不存在
    NotFound,
    /// 非法状态转换
    InvalidTransition,
}

impl UploadErrorKind {
    /// 是否可重试（仅用于槽位申请阶段）
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            UploadErrorKind::Timeout
                | UploadErrorKind::RateLimited
                | UploadErrorKind::ServerError
                | UploadErrorKind::Network
        )
    }

    /// 是否属于基础设施不可用（触发 multipart 回退）
    pub fn is_infra_unavailable(&self) -> bool {
        matches!(
            self,
            UploadErrorKind::ServerError | UploadErrorKind::StorageUnavailable
        )
    }

    /// 从 HTTP 状态码分类
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => UploadErrorKind::Unauthorized,
            408 => UploadErrorKind::Timeout,
            429 => UploadErrorKind::RateLimited,
            500..=599 => UploadErrorKind::ServerError,
            400..=499 => UploadErrorKind::Rejected,
            _ => UploadErrorKind::Malformed,
        }
    }

    /// 从响应体中的结构化错误码分类
    pub fn from_code(code: &str) -> Option<Self> {
        match code.to_ascii_lowercase().as_str() {
            "storage_unavailable" | "signing_failed" => Some(UploadErrorKind::StorageUnavailable),
            "unauthorized" | "session_expired" => Some(UploadErrorKind::Unauthorized),
            "rate_limited" => Some(UploadErrorKind::RateLimited),
            _ => None,
        }
    }

    /// 面向用户的提示文案
    pub fn user_message(&self) -> &'static str {
        match self {
            UploadErrorKind::Timeout => "服务器响应超时，请稍后重试",
            UploadErrorKind::RateLimited => "请求过于频繁，请稍后重试",
            UploadErrorKind::ServerError => "服务器暂时不可用，请稍后重试",
            UploadErrorKind::StorageUnavailable => "存储服务暂时不可用，请稍后重试",
            UploadErrorKind::Network => "网络连接失败，请检查网络后重试",
            UploadErrorKind::Unauthorized => "登录已过期，请重新登录后重试",
            UploadErrorKind::Rejected => "服务器拒绝了该文件，请检查文件后重试",
            UploadErrorKind::Malformed => "服务器返回了无法识别的响应",
            UploadErrorKind::TransferFailed => "文件传输失败，请重试",
            UploadErrorKind::ConfirmFailed => "文件已上传但登记失败，请重试",
            UploadErrorKind::FileUnreadable => "无法读取本地文件",
            UploadErrorKind::NotFound => "上传项不存在",
            UploadErrorKind::InvalidTransition => "上传状态异常",
        }
    }
}

impl fmt::Display for UploadErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        write!(f, "{}", name)
    }
}

/// 上传错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("[{kind}] {message}")]
pub struct UploadError {
    pub kind: UploadErrorKind,
    pub message: String,
    /// HTTP 状态码（如有）
    pub status: Option<u16>,
}

impl UploadError {
    pub fn new(kind: UploadErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }

    /// 从 HTTP 状态码和错误响应体构造
    ///
    /// 401 始终视为会话过期；5xx 保持服务器错误以保留重试次数，
    /// 其余状态码由结构化错误码优先分类
    pub fn from_response(status: u16, body: &ApiErrorBody) -> Self {
        let kind = match status {
            401 => UploadErrorKind::Unauthorized,
            500..=599 => UploadErrorKind::ServerError,
            _ => body
                .code
                .as_deref()
                .and_then(UploadErrorKind::from_code)
                .unwrap_or_else(|| UploadErrorKind::from_status(status)),
        };
        let message = match body.text() {
            Some(text) => format!("HTTP {}: {}", status, text),
            None => format!("HTTP {}", status),
        };
        Self {
            kind,
            message,
            status: Some(status),
        }
    }

    pub fn invalid_transition(detail: impl Into<String>) -> Self {
        Self::new(UploadErrorKind::InvalidTransition, detail)
    }

    pub fn not_found(id: &str) -> Self {
        Self::new(UploadErrorKind::NotFound, format!("上传项不存在: {}", id))
    }

    /// 替换错误类型（保留消息和状态码）
    pub fn with_kind(mut self, kind: UploadErrorKind) -> Self {
        self.kind = kind;
        self
    }

    /// 展示给用户的文案
    pub fn user_message(&self) -> String {
        self.kind.user_message().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(UploadErrorKind::from_status(401), UploadErrorKind::Unauthorized);
        assert_eq!(UploadErrorKind::from_status(408), UploadErrorKind::Timeout);
        assert_eq!(UploadErrorKind::from_status(429), UploadErrorKind::RateLimited);
        assert_eq!(UploadErrorKind::from_status(500), UploadErrorKind::ServerError);
        assert_eq!(UploadErrorKind::from_status(503), UploadErrorKind::ServerError);
        assert_eq!(UploadErrorKind::from_status(403), UploadErrorKind::Rejected);
        assert_eq!(UploadErrorKind::from_status(413), UploadErrorKind::Rejected);
    }

    #[test]
    fn test_retriable_kinds() {
        assert!(UploadErrorKind::Timeout.is_retriable());
        assert!(UploadErrorKind::RateLimited.is_retriable());
        assert!(UploadErrorKind::ServerError.is_retriable());
        assert!(UploadErrorKind::Network.is_retriable());

        assert!(!UploadErrorKind::Unauthorized.is_retriable());
        assert!(!UploadErrorKind::Rejected.is_retriable());
        assert!(!UploadErrorKind::StorageUnavailable.is_retriable());
        assert!(!UploadErrorKind::Malformed.is_retriable());
    }

    #[test]
    fn test_structured_code_overrides_status() {
        let body = ApiErrorBody {
            code: Some("storage_unavailable".to_string()),
            ..Default::default()
        };
        let err = UploadError::from_response(400, &body);
        assert_eq!(err.kind, UploadErrorKind::StorageUnavailable);
        assert_eq!(err.status, Some(400));

        // 5xx 仍按服务器错误重试
        let err = UploadError::from_response(503, &body);
        assert_eq!(err.kind, UploadErrorKind::ServerError);
        assert_eq!(err.status, Some(503));

        // 401 不受错误码影响
        let err = UploadError::from_response(401, &body);
        assert_eq!(err.kind, UploadErrorKind::Unauthorized);
    }

    #[test]
    fn test_slot_serialization() {
        let slot: UploadSlot = serde_json::from_str(
            r#"{"uploadURL":"https://storage/x?sig=1","objectPath":"/objects/uploads/x"}"#,
        )
        .unwrap();
        assert_eq!(slot.upload_url, "https://storage/x?sig=1");
        assert_eq!(slot.object_path, "/objects/uploads/x");

        let req = ConfirmRequest {
            object_path: "/objects/uploads/x".to_string(),
            filename: "a.pdf".to_string(),
            size: 12,
            mime_type: "application/pdf".to_string(),
            relative_path: "docs/a.pdf".to_string(),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["objectPath"], "/objects/uploads/x");
        assert_eq!(json["type"], "application/pdf");
        assert_eq!(json["relativePath"], "docs/a.pdf");
    }

    #[test]
    fn test_fallback_response_numeric_id() {
        let resp: FallbackUploadResponse =
            serde_json::from_str(r#"{"id":42,"url":"/uploads/a.txt","filename":"a.txt"}"#)
                .unwrap();
        assert_eq!(resp.id.as_deref(), Some("42"));
        assert_eq!(resp.location(), Some("/uploads/a.txt"));
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(UploadErrorKind::RateLimited.to_string(), "rate_limited");
        let err = UploadError::new(UploadErrorKind::Network, "connection refused");
        assert_eq!(err.to_string(), "[network] connection refused");
    }
}
