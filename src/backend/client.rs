// 后端 HTTP 客户端实现

use crate::backend::{
    ApiErrorBody, ConfirmRequest, FallbackUploadResponse, SlotRequest, UploadBackend, UploadError,
    UploadErrorKind, UploadSlot, UploadedObject,
};
use crate::config::BackendConfig;
use crate::uploader::source::{ProgressReporter, SourceFile};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{multipart, Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, info, warn};

/// 申请上传槽位
const API_OBJECTS_UPLOAD: &str = "/api/objects/upload";
/// 登记直传对象
const API_OBJECTS_CONFIRM: &str = "/api/objects/confirm";
/// 回退 multipart 上传
const API_UPLOAD: &str = "/api/upload";

/// 基于 reqwest 的后端客户端
#[derive(Debug, Clone)]
pub struct HttpBackend {
    /// HTTP客户端
    client: Client,
    /// 应用服务器地址（无结尾 /）
    base_url: String,
    /// Bearer 令牌
    auth_token: Option<String>,
    /// 传输超时（直传 PUT / 回退 POST）
    transfer_timeout: Duration,
}

impl HttpBackend {
    /// 创建新的后端客户端
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .context("Failed to create HTTP client")?;

        info!(
            "初始化后端客户端: base_url={}, 请求超时={}s, 传输超时={}s",
            config.base_url, config.request_timeout_secs, config.transfer_timeout_secs
        );

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth_token: config.auth_token.clone().filter(|t| !t.is_empty()),
            transfer_timeout: config.transfer_timeout(),
        })
    }

    fn build_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// 附加认证头（签名直传地址不需要）
    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// 将非 2xx 响应转换为上传错误
    async fn error_from_response(response: Response) -> UploadError {
        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        let body: ApiErrorBody = serde_json::from_str(&text).unwrap_or_else(|_| ApiErrorBody {
            message: Some(text.chars().take(200).collect()).filter(|s: &String| !s.is_empty()),
            ..Default::default()
        });
        UploadError::from_response(status, &body)
    }

    /// 将 reqwest 层错误（连接、超时）转换为上传错误
    fn error_from_transport(error: reqwest::Error, context: &str) -> UploadError {
        let kind = if error.is_timeout() {
            UploadErrorKind::Timeout
        } else {
            UploadErrorKind::Network
        };
        UploadError::new(kind, format!("{}: {}", context, error))
    }

    /// 读取 JSON 成功响应
    async fn read_json<T: DeserializeOwned>(response: Response, context: &str) -> Result<T, UploadError> {
        let text = response.text().await.map_err(|e| {
            UploadError::new(UploadErrorKind::Malformed, format!("{}: 读取响应失败: {}", context, e))
        })?;
        serde_json::from_str(&text).map_err(|e| {
            UploadError::new(
                UploadErrorKind::Malformed,
                format!("{}: 解析响应失败: {}, body={}", context, e, text),
            )
        })
    }
}

#[async_trait]
impl UploadBackend for HttpBackend {
    async fn request_upload_slot(
        &self,
        filename: &str,
        relative_path: &str,
    ) -> Result<UploadSlot, UploadError> {
        let body = SlotRequest {
            filename: filename.to_string(),
            relative_path: relative_path.to_string(),
        };

        let response = self
            .authorize(self.client.post(self.build_url(API_OBJECTS_UPLOAD)))
            .json(&body)
            .send()
            .await
            .map_err(|e| Self::error_from_transport(e, "申请上传槽位请求失败"))?;

        if !response.status().is_success() {
            let err = Self::error_from_response(response).await;
            warn!("申请上传槽位失败: file={}, error={}", relative_path, err);
            return Err(err);
        }

        let slot: UploadSlot = Self::read_json(response, "申请上传槽位").await?;
        if slot.upload_url.is_empty() || slot.object_path.is_empty() {
            return Err(UploadError::new(
                UploadErrorKind::Malformed,
                "上传槽位响应缺少 uploadURL 或 objectPath",
            ));
        }

        debug!("获取上传槽位成功: file={}, object={}", relative_path, slot.object_path);
        Ok(slot)
    }

    async fn put_object(
        &self,
        slot: &UploadSlot,
        source: &SourceFile,
        progress: ProgressReporter,
    ) -> Result<(), UploadError> {
        let body = source.into_body(progress).await?;

        let response = self
            .client
            .put(&slot.upload_url)
            .timeout(self.transfer_timeout)
            .header(CONTENT_TYPE, source.effective_mime())
            .header(CONTENT_LENGTH, source.size)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                Self::error_from_transport(e, "直传请求失败").with_kind(UploadErrorKind::TransferFailed)
            })?;

        if !response.status().is_success() {
            let err = Self::error_from_response(response).await;
            // 直传失败一律终止，401 仍需通知会话过期
            let kind = if err.kind == UploadErrorKind::Unauthorized {
                UploadErrorKind::Unauthorized
            } else {
                UploadErrorKind::TransferFailed
            };
            return Err(err.with_kind(kind));
        }

        debug!("直传完成: object={}, size={}", slot.object_path, source.size);
        Ok(())
    }

    async fn confirm_upload(&self, request: &ConfirmRequest) -> Result<UploadedObject, UploadError> {
        let response = self
            .authorize(self.client.put(self.build_url(API_OBJECTS_CONFIRM)))
            .json(request)
            .send()
            .await
            .map_err(|e| {
                Self::error_from_transport(e, "登记请求失败").with_kind(UploadErrorKind::ConfirmFailed)
            })?;

        if !response.status().is_success() {
            let err = Self::error_from_response(response).await;
            let kind = if err.kind == UploadErrorKind::Unauthorized {
                UploadErrorKind::Unauthorized
            } else {
                UploadErrorKind::ConfirmFailed
            };
            return Err(err.with_kind(kind));
        }

        // 登记响应体可为空，非空时必须是合法 JSON
        let text = response.text().await.map_err(|e| {
            UploadError::new(UploadErrorKind::Malformed, format!("登记: 读取响应失败: {}", e))
        })?;
        let object = if text.trim().is_empty() {
            UploadedObject::default()
        } else {
            serde_json::from_str::<UploadedObject>(&text).map_err(|e| {
                UploadError::new(
                    UploadErrorKind::Malformed,
                    format!("登记: 解析响应失败: {}, body={}", e, text),
                )
            })?
        };
        debug!("登记完成: object={}", request.object_path);
        Ok(object)
    }

    async fn upload_multipart(
        &self,
        source: &SourceFile,
        relative_path: &str,
        progress: ProgressReporter,
    ) -> Result<FallbackUploadResponse, UploadError> {
        let body = source.into_body(progress).await?;

        let part = multipart::Part::stream_with_length(body, source.size)
            .file_name(source.name.clone())
            .mime_str(source.effective_mime())
            .map_err(|e| {
                UploadError::new(UploadErrorKind::Malformed, format!("非法 MIME 类型: {}", e))
            })?;

        let mut form = multipart::Form::new().part("file", part);
        if !relative_path.is_empty() {
            form = form.text("relativePath", relative_path.to_string());
        }

        info!("回退 multipart 上传: file={}, size={}", relative_path, source.size);

        let response = self
            .authorize(self.client.post(self.build_url(API_UPLOAD)))
            .timeout(self.transfer_timeout)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                Self::error_from_transport(e, "multipart 上传请求失败")
                    .with_kind(UploadErrorKind::TransferFailed)
            })?;

        if !response.status().is_success() {
            let err = Self::error_from_response(response).await;
            let kind = if err.kind == UploadErrorKind::Unauthorized {
                UploadErrorKind::Unauthorized
            } else {
                UploadErrorKind::TransferFailed
            };
            return Err(err.with_kind(kind));
        }

        let uploaded: FallbackUploadResponse = Self::read_json(response, "multipart 上传").await?;
        Ok(uploaded)
    }
}
