// 单文件上传策略
//
// 状态流转：
//   NotStarted -> RequestingUploadSlot -> DirectUploadInFlight -> Confirming -> Succeeded
//   任意状态 -> Failed
//   RequestingUploadSlot（存储不可用）-> FallbackMultipartInFlight -> Succeeded | Failed
//
// advance() 是纯函数，只根据当前状态和事件计算下一状态；
// UploadStrategy::execute() 负责执行每个状态对应的网络请求

use crate::backend::{
    ConfirmRequest, FallbackUploadResponse, UploadBackend, UploadError, UploadErrorKind,
    UploadSlot,
};
use crate::common::SessionSignal;
use crate::uploader::source::{ProgressReporter, ProgressSink};
use crate::uploader::task::{PendingUploadItem, UploadedFileRecord};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

// =====================================================
// 重试配置
// =====================================================

/// 默认槽位申请最大尝试次数（含首次）
const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// 默认退避基准（毫秒）
const DEFAULT_BASE_DELAY_MS: u64 = 1000;

/// 退避指数上限，防止溢出
const MAX_BACKOFF_EXPONENT: u32 = 16;

/// 槽位申请重试策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 最大尝试次数（含首次）
    pub max_attempts: u32,
    /// 退避基准
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// 第 attempt 次（从 1 开始）失败后的等待时长
    ///
    /// # 延迟序列（base = 1000ms）
    /// - attempt=1: 1s
    /// - attempt=2: 2s
    /// - attempt=3: 4s
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
        }
    }
}

// =====================================================
// 状态机
// =====================================================

/// 上传状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadState {
    NotStarted,
    /// 申请上传槽位（attempt 从 1 开始）
    RequestingUploadSlot { attempt: u32 },
    /// 直传到签名地址
    DirectUploadInFlight { slot: UploadSlot },
    /// 登记对象元数据
    Confirming { slot: UploadSlot },
    /// 回退 multipart 上传到应用服务器
    FallbackMultipartInFlight,
    Succeeded(UploadedFileRecord),
    Failed(UploadError),
}

impl UploadState {
    pub fn name(&self) -> &'static str {
        match self {
            UploadState::NotStarted => "not_started",
            UploadState::RequestingUploadSlot { .. } => "requesting_upload_slot",
            UploadState::DirectUploadInFlight { .. } => "direct_upload_in_flight",
            UploadState::Confirming { .. } => "confirming",
            UploadState::FallbackMultipartInFlight => "fallback_multipart_in_flight",
            UploadState::Succeeded(_) => "succeeded",
            UploadState::Failed(_) => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadState::Succeeded(_) | UploadState::Failed(_))
    }
}

/// 驱动状态机的事件（每个网络请求的结果）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyEvent {
    Start,
    SlotGranted(UploadSlot),
    SlotFailed(UploadError),
    TransferCompleted,
    TransferFailed(UploadError),
    Confirmed(UploadedFileRecord),
    ConfirmFailed(UploadError),
    FallbackCompleted(UploadedFileRecord),
    FallbackFailed(UploadError),
}

impl StrategyEvent {
    pub fn name(&self) -> &'static str {
        match self {
            StrategyEvent::Start => "start",
            StrategyEvent::SlotGranted(_) => "slot_granted",
            StrategyEvent::SlotFailed(_) => "slot_failed",
            StrategyEvent::TransferCompleted => "transfer_completed",
            StrategyEvent::TransferFailed(_) => "transfer_failed",
            StrategyEvent::Confirmed(_) => "confirmed",
            StrategyEvent::ConfirmFailed(_) => "confirm_failed",
            StrategyEvent::FallbackCompleted(_) => "fallback_completed",
            StrategyEvent::FallbackFailed(_) => "fallback_failed",
        }
    }
}

/// 一次状态转换的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub state: UploadState,
    /// 进入下一状态前需要等待的时长
    pub backoff: Option<Duration>,
    /// 是否需要发布会话过期信号
    pub session_expired: bool,
}

impl Step {
    fn to(state: UploadState) -> Self {
        Self {
            state,
            backoff: None,
            session_expired: false,
        }
    }
}

/// 计算下一状态
pub fn advance(state: UploadState, event: StrategyEvent, policy: &RetryPolicy) -> Step {
    use StrategyEvent as E;
    use UploadState as S;

    let mut step = match (state, event) {
        (S::NotStarted, E::Start) => Step::to(S::RequestingUploadSlot { attempt: 1 }),

        (S::RequestingUploadSlot { .. }, E::SlotGranted(slot)) => {
            Step::to(S::DirectUploadInFlight { slot })
        }
        (S::RequestingUploadSlot { attempt }, E::SlotFailed(err)) => {
            slot_failure(attempt, err, policy)
        }

        (S::DirectUploadInFlight { slot }, E::TransferCompleted) => {
            Step::to(S::Confirming { slot })
        }
        (S::DirectUploadInFlight { .. }, E::TransferFailed(err)) => Step::to(S::Failed(err)),

        (S::Confirming { .. }, E::Confirmed(record)) => Step::to(S::Succeeded(record)),
        (S::Confirming { .. }, E::ConfirmFailed(err)) => Step::to(S::Failed(err)),

        (S::FallbackMultipartInFlight, E::FallbackCompleted(record)) => {
            Step::to(S::Succeeded(record))
        }
        (S::FallbackMultipartInFlight, E::FallbackFailed(err)) => Step::to(S::Failed(err)),

        (state, event) => Step::to(S::Failed(UploadError::invalid_transition(format!(
            "状态 {} 不接受事件 {}",
            state.name(),
            event.name()
        )))),
    };

    // 401 出现在任何环节都要通知会话过期
    step.session_expired =
        matches!(&step.state, S::Failed(err) if err.kind == UploadErrorKind::Unauthorized);
    step
}

/// 槽位申请失败的处理
///
/// 最后一次失败的错误类型决定走回退还是终止
fn slot_failure(attempt: u32, err: UploadError, policy: &RetryPolicy) -> Step {
    if err.kind == UploadErrorKind::Unauthorized {
        return Step::to(UploadState::Failed(err));
    }

    // 结构化的存储不可用（签名失败等）重试无意义，直接回退
    if err.kind == UploadErrorKind::StorageUnavailable {
        return Step::to(UploadState::FallbackMultipartInFlight);
    }

    if !err.kind.is_retriable() {
        return Step::to(UploadState::Failed(err));
    }

    if attempt < policy.max_attempts {
        return Step {
            state: UploadState::RequestingUploadSlot {
                attempt: attempt + 1,
            },
            backoff: Some(policy.delay_for(attempt)),
            session_expired: false,
        };
    }

    if err.kind.is_infra_unavailable() {
        Step::to(UploadState::FallbackMultipartInFlight)
    } else {
        Step::to(UploadState::Failed(err))
    }
}

// =====================================================
// 执行器
// =====================================================

/// 单文件上传策略
pub struct UploadStrategy {
    backend: Arc<dyn UploadBackend>,
    session: SessionSignal,
    policy: RetryPolicy,
}

impl UploadStrategy {
    pub fn new(backend: Arc<dyn UploadBackend>, session: SessionSignal, policy: RetryPolicy) -> Self {
        Self {
            backend,
            session,
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// 上传单个文件
    ///
    /// # 参数
    /// - `item`: 上传项
    /// - `progress`: 进度回调，每次传输只在整数百分比变化时调用
    pub async fn execute(
        &self,
        item: &PendingUploadItem,
        progress: ProgressSink,
    ) -> Result<UploadedFileRecord, UploadError> {
        info!(
            "开始上传: {} ({} bytes)",
            item.relative_path, item.source.size
        );

        let mut state = UploadState::NotStarted;
        let mut event = StrategyEvent::Start;

        loop {
            let previous = state.name();
            let step = advance(state, event, &self.policy);
            debug!(
                "[{}] {} -> {}",
                item.relative_path,
                previous,
                step.state.name()
            );

            if step.session_expired {
                self.session.notify_expired(&item.relative_path);
            }

            if let Some(delay) = step.backoff {
                warn!(
                    "申请上传槽位失败，{}ms 后重试: {}",
                    delay.as_millis(),
                    item.relative_path
                );
                tokio::time::sleep(delay).await;
            }

            state = match step.state {
                UploadState::Succeeded(record) => {
                    info!("上传完成: {} -> {}", item.relative_path, record.object_path);
                    return Ok(record);
                }
                UploadState::Failed(err) => {
                    warn!("上传失败: {}, 原因: {}", item.relative_path, err);
                    return Err(err);
                }
                other => other,
            };

            event = self.perform(&state, item, &progress).await;
        }
    }

    /// 执行当前状态对应的请求
    async fn perform(
        &self,
        state: &UploadState,
        item: &PendingUploadItem,
        progress: &ProgressSink,
    ) -> StrategyEvent {
        match state {
            UploadState::RequestingUploadSlot { attempt } => {
                debug!("申请上传槽位 (第 {} 次): {}", attempt, item.relative_path);
                match self
                    .backend
                    .request_upload_slot(item.filename(), &item.relative_path)
                    .await
                {
                    Ok(slot) => StrategyEvent::SlotGranted(slot),
                    Err(e) => StrategyEvent::SlotFailed(e),
                }
            }
            UploadState::DirectUploadInFlight { slot } => {
                let reporter = ProgressReporter::new(item.source.size, progress.clone());
                match self.backend.put_object(slot, &item.source, reporter).await {
                    Ok(()) => StrategyEvent::TransferCompleted,
                    Err(e) => StrategyEvent::TransferFailed(e),
                }
            }
            UploadState::Confirming { slot } => {
                let request = ConfirmRequest {
                    object_path: slot.object_path.clone(),
                    filename: item.filename().to_string(),
                    size: item.source.size,
                    mime_type: item.source.effective_mime().to_string(),
                    relative_path: item.relative_path.clone(),
                };
                match self.backend.confirm_upload(&request).await {
                    Ok(object) => StrategyEvent::Confirmed(UploadedFileRecord {
                        id: object.id.unwrap_or_else(|| item.id.clone()),
                        filename: request.filename,
                        object_path: object.object_path.unwrap_or(request.object_path),
                        size: request.size,
                        mime_type: request.mime_type,
                        relative_path: request.relative_path,
                    }),
                    Err(e) => StrategyEvent::ConfirmFailed(e),
                }
            }
            UploadState::FallbackMultipartInFlight => {
                info!("直传不可用，回退到 multipart 上传: {}", item.relative_path);
                let reporter = ProgressReporter::new(item.source.size, progress.clone());
                match self
                    .backend
                    .upload_multipart(&item.source, &item.relative_path, reporter)
                    .await
                {
                    Ok(response) => match fallback_record(item, &response) {
                        Ok(record) => StrategyEvent::FallbackCompleted(record),
                        Err(e) => StrategyEvent::FallbackFailed(e),
                    },
                    Err(e) => StrategyEvent::FallbackFailed(e),
                }
            }
            // 初始和终止状态不会走到这里
            UploadState::NotStarted | UploadState::Succeeded(_) | UploadState::Failed(_) => {
                StrategyEvent::FallbackFailed(UploadError::invalid_transition(format!(
                    "状态 {} 没有对应的请求",
                    state.name()
                )))
            }
        }
    }
}

/// 从回退上传响应构造记录
fn fallback_record(
    item: &PendingUploadItem,
    response: &FallbackUploadResponse,
) -> Result<UploadedFileRecord, UploadError> {
    let location = response.location().ok_or_else(|| {
        UploadError::new(
            UploadErrorKind::Malformed,
            "回退上传响应缺少 url/content 字段",
        )
    })?;

    Ok(UploadedFileRecord {
        id: response.id.clone().unwrap_or_else(|| item.id.clone()),
        filename: item.filename().to_string(),
        object_path: location.to_string(),
        size: item.source.size,
        mime_type: item.source.effective_mime().to_string(),
        relative_path: item.relative_path.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ApiErrorBody;
    use crate::uploader::source::SourceFile;
    use crate::uploader::testing::{status_error, ScriptedBackend};
    use parking_lot::Mutex;

    fn policy() -> RetryPolicy {
        RetryPolicy::default()
    }

    fn slot() -> UploadSlot {
        UploadSlot {
            upload_url: "https://storage.test/put".to_string(),
            object_path: "/objects/uploads/a".to_string(),
        }
    }

    fn record() -> UploadedFileRecord {
        UploadedFileRecord {
            id: "1".to_string(),
            filename: "a.txt".to_string(),
            object_path: "/objects/uploads/a".to_string(),
            size: 5,
            mime_type: "text/plain".to_string(),
            relative_path: "docs/a.txt".to_string(),
        }
    }

    #[test]
    fn test_delay_sequence() {
        let policy = policy();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        // 极端值不溢出
        assert!(policy.delay_for(u32::MAX) >= policy.delay_for(16));
    }

    #[test]
    fn test_happy_path() {
        let policy = policy();
        let step = advance(UploadState::NotStarted, StrategyEvent::Start, &policy);
        assert_eq!(step.state, UploadState::RequestingUploadSlot { attempt: 1 });

        let step = advance(step.state, StrategyEvent::SlotGranted(slot()), &policy);
        assert_eq!(step.state, UploadState::DirectUploadInFlight { slot: slot() });

        let step = advance(step.state, StrategyEvent::TransferCompleted, &policy);
        assert_eq!(step.state, UploadState::Confirming { slot: slot() });

        let step = advance(step.state, StrategyEvent::Confirmed(record()), &policy);
        assert_eq!(step.state, UploadState::Succeeded(record()));
        assert!(step.state.is_terminal());
        assert!(!step.session_expired);
    }

    #[test]
    fn test_server_errors_retry_then_fallback() {
        let policy = policy();
        let mut state = UploadState::RequestingUploadSlot { attempt: 1 };
        let mut delays = vec![];

        for _ in 0..3 {
            let step = advance(state, StrategyEvent::SlotFailed(status_error(503)), &policy);
            delays.extend(step.backoff);
            state = step.state;
        }

        assert_eq!(state, UploadState::FallbackMultipartInFlight);
        assert_eq!(delays, vec![Duration::from_secs(1), Duration::from_secs(2)]);
    }

    #[test]
    fn test_exhausted_rate_limit_is_terminal() {
        let policy = policy();
        let step = advance(
            UploadState::RequestingUploadSlot { attempt: 3 },
            StrategyEvent::SlotFailed(status_error(429)),
            &policy,
        );
        assert!(matches!(
            step.state,
            UploadState::Failed(ref e) if e.kind == UploadErrorKind::RateLimited
        ));
        assert!(step.backoff.is_none());
    }

    #[test]
    fn test_unauthorized_stops_immediately() {
        let step = advance(
            UploadState::RequestingUploadSlot { attempt: 1 },
            StrategyEvent::SlotFailed(status_error(401)),
            &policy(),
        );
        assert!(matches!(step.state, UploadState::Failed(_)));
        assert!(step.session_expired);
        assert!(step.backoff.is_none());

        // 传输和回退中的 401 同样通知
        let step = advance(
            UploadState::FallbackMultipartInFlight,
            StrategyEvent::FallbackFailed(status_error(401)),
            &policy(),
        );
        assert!(step.session_expired);
    }

    #[test]
    fn test_client_error_does_not_consume_retries() {
        let step = advance(
            UploadState::RequestingUploadSlot { attempt: 1 },
            StrategyEvent::SlotFailed(status_error(403)),
            &policy(),
        );
        assert!(matches!(
            step.state,
            UploadState::Failed(ref e) if e.kind == UploadErrorKind::Rejected
        ));
    }

    #[test]
    fn test_storage_unavailable_falls_back_immediately() {
        let err = UploadError::new(UploadErrorKind::StorageUnavailable, "signing failed");
        let step = advance(
            UploadState::RequestingUploadSlot { attempt: 1 },
            StrategyEvent::SlotFailed(err),
            &policy(),
        );
        assert_eq!(step.state, UploadState::FallbackMultipartInFlight);

        // 带存储错误码的 5xx 仍先消耗重试次数
        let body = ApiErrorBody {
            code: Some("storage_unavailable".to_string()),
            ..Default::default()
        };
        let step = advance(
            UploadState::RequestingUploadSlot { attempt: 1 },
            StrategyEvent::SlotFailed(UploadError::from_response(503, &body)),
            &policy(),
        );
        assert_eq!(step.state, UploadState::RequestingUploadSlot { attempt: 2 });
        assert_eq!(step.backoff, Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_invalid_event_fails() {
        let step = advance(
            UploadState::Confirming { slot: slot() },
            StrategyEvent::SlotGranted(slot()),
            &policy(),
        );
        assert!(matches!(
            step.state,
            UploadState::Failed(ref e) if e.kind == UploadErrorKind::InvalidTransition
        ));
    }

    fn strategy(backend: Arc<ScriptedBackend>, session: SessionSignal) -> UploadStrategy {
        UploadStrategy::new(
            backend,
            session,
            RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
            },
        )
    }

    fn item(name: &str, body: &'static str) -> PendingUploadItem {
        PendingUploadItem::new(
            SourceFile::from_bytes(name, body, Some("text/plain".to_string())),
            format!("docs/{}", name),
        )
    }

    #[tokio::test]
    async fn test_execute_direct_upload() {
        let backend = Arc::new(ScriptedBackend::new());
        let strategy = strategy(backend.clone(), SessionSignal::new());
        let item = item("a.txt", "hello world");

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let record = strategy
            .execute(&item, Arc::new(move |p: u8| sink.lock().push(p)))
            .await
            .unwrap();

        assert_eq!(record.relative_path, "docs/a.txt");
        assert_eq!(record.object_path, "/objects/uploads/a.txt");
        assert_eq!(record.id, item.id);
        assert_eq!(record.mime_type, "text/plain");
        assert_eq!(seen.lock().last(), Some(&100));
        assert_eq!(backend.confirm_calls(), 1);
        assert_eq!(backend.fallback_calls(), 0);
    }

    #[tokio::test]
    async fn test_execute_falls_back_after_503() {
        let backend = Arc::new(
            ScriptedBackend::new().script_slot(
                "a.txt",
                vec![Err(status_error(503)), Err(status_error(503)), Err(status_error(503))],
            ),
        );
        let strategy = strategy(backend.clone(), SessionSignal::new());

        let record = strategy
            .execute(&item("a.txt", "hello"), Arc::new(|_: u8| {}))
            .await
            .unwrap();

        assert_eq!(backend.slot_calls(), 3);
        assert_eq!(backend.fallback_calls(), 1);
        assert_eq!(backend.put_calls(), 0);
        assert_eq!(record.object_path, "/uploads/a.txt");
        assert_eq!(record.id, "fb-a.txt");
    }

    #[tokio::test]
    async fn test_execute_storage_code_on_503_retries_before_fallback() {
        let body = ApiErrorBody {
            code: Some("storage_unavailable".to_string()),
            ..Default::default()
        };
        let backend = Arc::new(
            ScriptedBackend::new()
                .script_slot("a.txt", vec![Err(UploadError::from_response(503, &body))]),
        );
        let strategy = strategy(backend.clone(), SessionSignal::new());

        let record = strategy
            .execute(&item("a.txt", "hello"), Arc::new(|_: u8| {}))
            .await
            .unwrap();

        assert_eq!(backend.slot_calls(), 2);
        assert_eq!(backend.fallback_calls(), 0);
        assert_eq!(backend.put_calls(), 1);
        assert_eq!(record.object_path, "/objects/uploads/a.txt");
    }

    #[tokio::test]
    async fn test_execute_transfer_timeout_is_terminal() {
        let backend = Arc::new(ScriptedBackend::new().fail_put(
            "a.txt",
            UploadError::new(UploadErrorKind::TransferFailed, "直传请求失败: operation timed out"),
        ));
        let strategy = strategy(backend.clone(), SessionSignal::new());

        let err = strategy
            .execute(&item("a.txt", "hello"), Arc::new(|_: u8| {}))
            .await
            .unwrap_err();

        assert_eq!(err.kind, UploadErrorKind::TransferFailed);
        assert_eq!(backend.slot_calls(), 1);
        assert_eq!(backend.put_calls(), 1);
        assert_eq!(backend.confirm_calls(), 0);
        assert_eq!(backend.fallback_calls(), 0);
    }

    #[tokio::test]
    async fn test_execute_unauthorized_fires_signal_once() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .script_slot("a.txt", vec![Err(status_error(401))])
                .script_slot("b.txt", vec![Err(status_error(401))]),
        );
        let session = SessionSignal::new();
        let mut rx = session.subscribe();
        let strategy = strategy(backend.clone(), session.clone());

        let err = strategy
            .execute(&item("a.txt", "a"), Arc::new(|_: u8| {}))
            .await
            .unwrap_err();
        assert_eq!(err.kind, UploadErrorKind::Unauthorized);
        let _ = strategy.execute(&item("b.txt", "b"), Arc::new(|_: u8| {})).await;

        assert_eq!(backend.slot_calls(), 2);
        assert_eq!(backend.fallback_calls(), 0);
        assert_eq!(rx.recv().await.unwrap().source, "docs/a.txt");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_execute_confirm_failure_is_terminal() {
        let backend = Arc::new(ScriptedBackend::new().fail_confirm(
            "a.txt",
            UploadError::new(UploadErrorKind::ConfirmFailed, "HTTP 500"),
        ));
        let strategy = strategy(backend.clone(), SessionSignal::new());

        let err = strategy
            .execute(&item("a.txt", "a"), Arc::new(|_: u8| {}))
            .await
            .unwrap_err();
        assert_eq!(err.kind, UploadErrorKind::ConfirmFailed);
        assert_eq!(backend.put_calls(), 1);
        assert_eq!(backend.slot_calls(), 1);
    }

    #[tokio::test]
    async fn test_fallback_without_location_is_malformed() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .script_slot(
                    "a.txt",
                    vec![Err(UploadError::new(UploadErrorKind::StorageUnavailable, "x"))],
                )
                .fallback("a.txt", Ok(FallbackUploadResponse::default())),
        );
        let strategy = strategy(backend, SessionSignal::new());

        let err = strategy
            .execute(&item("a.txt", "a"), Arc::new(|_: u8| {}))
            .await
            .unwrap_err();
        assert_eq!(err.kind, UploadErrorKind::Malformed);
    }
}
