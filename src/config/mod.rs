// 配置管理模块

use crate::uploader::admission::AdmissionConfig;
use crate::uploader::strategy::RetryPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;

/// 默认配置文件路径
pub const DEFAULT_CONFIG_PATH: &str = "config/app.toml";

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 后端配置
    #[serde(default)]
    pub backend: BackendConfig,
    /// 上传配置
    #[serde(default)]
    pub upload: UploadConfig,
    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志保留天数（默认 7 天）
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u32,
    /// 日志级别（默认 info）
    #[serde(default = "default_log_level")]
    pub level: String,
    /// 单个日志文件最大大小（字节，默认 20MB）
    #[serde(default = "default_log_max_file_size")]
    pub max_file_size: u64,
}

fn default_log_enabled() -> bool {
    false
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_retention_days() -> u32 {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_max_file_size() -> u64 {
    20 * 1024 * 1024 // 20MB
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            retention_days: default_log_retention_days(),
            level: default_log_level(),
            max_file_size: default_log_max_file_size(),
        }
    }
}

/// 后端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// 应用服务器地址
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Bearer 令牌（可选）
    #[serde(default)]
    pub auth_token: Option<String>,
    /// 普通请求超时（秒）：槽位申请、登记
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// 传输超时（秒）：直传 PUT、回退 multipart POST
    #[serde(default = "default_transfer_timeout_secs")]
    pub transfer_timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_transfer_timeout_secs() -> u64 {
    600
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            auth_token: None,
            request_timeout_secs: default_request_timeout_secs(),
            transfer_timeout_secs: default_transfer_timeout_secs(),
        }
    }
}

impl BackendConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer_timeout_secs)
    }
}

/// 上传配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// 单批最大文件数
    #[serde(default = "default_max_number_of_files")]
    pub max_number_of_files: usize,
    /// 单文件最大字节数
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// 允许的文件类型（"image/*"、"application/pdf"、".docx"），为空表示不限
    #[serde(default)]
    pub allowed_file_types: Vec<String>,
    /// 最大同时上传文件数
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// 槽位申请最大尝试次数（含首次）
    #[serde(default = "default_max_slot_attempts")]
    pub max_slot_attempts: u32,
    /// 退避基准时长（毫秒），第 n 次失败后等待 base * 2^(n-1)
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// 全部成功后自动关闭的延迟（毫秒）
    #[serde(default = "default_auto_close_delay_ms")]
    pub auto_close_delay_ms: u64,
    /// 上传文件夹时是否跳过隐藏文件（以.开头的文件/文件夹）
    #[serde(default)]
    pub skip_hidden: bool,
}

fn default_max_number_of_files() -> usize {
    50
}

fn default_max_file_size() -> u64 {
    500 * 1024 * 1024 // 500MB
}

fn default_concurrency() -> usize {
    4
}

fn default_max_slot_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    1000
}

fn default_auto_close_delay_ms() -> u64 {
    1500
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_number_of_files: default_max_number_of_files(),
            max_file_size: default_max_file_size(),
            allowed_file_types: vec![],
            concurrency: default_concurrency(),
            max_slot_attempts: default_max_slot_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            auto_close_delay_ms: default_auto_close_delay_ms(),
            skip_hidden: false,
        }
    }
}

impl UploadConfig {
    /// 转换为准入过滤配置
    pub fn admission_config(&self) -> AdmissionConfig {
        AdmissionConfig {
            max_number_of_files: self.max_number_of_files,
            max_file_size: self.max_file_size,
            allowed_file_types: self.allowed_file_types.clone(),
        }
    }

    /// 转换为槽位申请重试策略
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_slot_attempts,
            base_delay: Duration::from_millis(self.backoff_base_ms),
        }
    }

    pub fn auto_close_delay(&self) -> Duration {
        Duration::from_millis(self.auto_close_delay_ms)
    }
}

impl AppConfig {
    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if self.backend.base_url.trim().is_empty() {
            anyhow::bail!("backend.base_url 不能为空");
        }
        if self.upload.concurrency == 0 {
            anyhow::bail!("upload.concurrency 必须大于 0");
        }
        if self.upload.max_slot_attempts == 0 {
            anyhow::bail!("upload.max_slot_attempts 必须大于 0");
        }
        if self.upload.max_number_of_files == 0 {
            anyhow::bail!("upload.max_number_of_files 必须大于 0");
        }
        Ok(())
    }

    /// 从文件加载配置
    pub async fn load_from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;

        let config: AppConfig = toml::from_str(&content).context("Failed to parse config file")?;

        config.validate().context("配置文件校验失败")?;

        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: &str) -> Result<()> {
        self.validate().context("保存配置失败")?;

        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("创建配置目录失败: {:?}", parent))?;
            }
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content)
            .await
            .context("Failed to write config file")?;

        Ok(())
    }

    /// 加载配置，失败时使用默认配置
    pub async fn load_or_default(path: &str) -> Self {
        match Self::load_from_file(path).await {
            Ok(config) => {
                tracing::info!("配置文件加载成功: {}", path);
                config
            }
            Err(e) => {
                tracing::warn!("配置文件加载失败，使用默认配置: {:#}", e);
                Self::default()
            }
        }
    }
}
