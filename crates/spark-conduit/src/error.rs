//! 统一错误模型。
//!
//! # 契约说明（What）
//! - [`CoreError`] 以稳定错误码 + 人类可读消息 + 可选底层原因的三元组描述失败；
//! - 错误码遵循 `<领域>.<语义>` 命名，集中登记在 [`codes`] 中，便于日志检索与告警聚合；
//! - [`CoreError::category`] 把错误码映射到五类处理策略（转换冲突、配置错误、回调错误、生命周期、执行器）。
//!
//! # 风险提示（Trade-offs）
//! - `cause` 以 `Arc` 持有，`CoreError` 因而可以 `Clone`，同一失败原因可同时交给多个监听器；
//!   底层错误类型必须满足 `Send + Sync + 'static`。

use std::{borrow::Cow, error::Error, fmt, sync::Arc};

/// 框架内统一的 `Result` 别名。
pub type Result<T, E = CoreError> = core::result::Result<T, E>;

/// 底层错误原因的共享指针。
pub type ErrorCause = Arc<dyn Error + Send + Sync + 'static>;

/// 稳定错误码表。
///
/// 错误码一经发布即视为对外契约，只增不改。
pub mod codes {
    /// 结果已成功完成，重复的终态转换被拒绝。
    pub const PROMISE_ALREADY_SUCCEEDED: &str = "promise.already_succeeded";
    /// 结果已失败，重复的终态转换被拒绝。
    pub const PROMISE_ALREADY_FAILED: &str = "promise.already_failed";
    /// 结果已取消，重复的终态转换被拒绝。
    pub const PROMISE_ALREADY_CANCELLED: &str = "promise.already_cancelled";
    /// 操作被取消时 `cause()` 返回的原因。
    pub const PROMISE_CANCELLED: &str = "promise.cancelled";
    /// 终态之后仍尝试上报进度。
    pub const PROMISE_PROGRESS_AFTER_COMPLETION: &str = "promise.progress_after_completion";
    /// 在所属执行上下文内阻塞等待尚未完成的结果。
    pub const PROMISE_BLOCKING_IN_CONTEXT: &str = "promise.blocking_in_context";
    /// 阻塞等待超时。
    pub const PROMISE_AWAIT_TIMEOUT: &str = "promise.await_timeout";
    /// 监听器返回了错误。
    pub const PROMISE_LISTENER_FAILED: &str = "promise.listener_failed";
    /// 监听器发生 panic。
    pub const PROMISE_LISTENER_PANICKED: &str = "promise.listener_panicked";
    /// Pipeline 内已存在同名槽位。
    pub const PIPELINE_DUPLICATE_NAME: &str = "pipeline.duplicate_name";
    /// 非共享 Handler 被重复挂载。
    pub const PIPELINE_NOT_SHARABLE: &str = "pipeline.not_sharable";
    /// Pipeline 已拆除。
    pub const PIPELINE_TORN_DOWN: &str = "pipeline.torn_down";
    /// 按名称或实例查找槽位失败。
    pub const PIPELINE_HANDLER_NOT_FOUND: &str = "pipeline.handler_not_found";
    /// 在尚未挂载或已经卸载的槽位上转发事件。
    pub const PIPELINE_SLOT_DETACHED: &str = "pipeline.slot_detached";
    /// Handler 回调发生 panic。
    pub const PIPELINE_HANDLER_PANICKED: &str = "pipeline.handler_panicked";
    /// 出站操作越过链头且没有传输层接收。
    pub const PIPELINE_UNHANDLED_OUTBOUND: &str = "pipeline.unhandled_outbound";
    /// `handler_added` 回调失败，槽位已被回滚。
    pub const PIPELINE_HANDLER_ADDED_FAILED: &str = "pipeline.handler_added_failed";
    /// 执行上下文已关闭，任务提交被拒绝。
    pub const EXECUTOR_SHUT_DOWN: &str = "executor.shut_down";
    /// 执行上下文中的任务发生 panic，已被捕获。
    pub const EXECUTOR_TASK_PANICKED: &str = "executor.task_panicked";
}

/// 错误的处理类别，对应调用方应采取的策略。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// 对已处于终态的结果重复设置，调用方记录或忽略即可。
    TransitionConflict,
    /// 非法的链路变更，只影响本次调用。
    Configuration,
    /// 用户回调（监听器或 Handler）抛出的错误，已被隔离。
    Callback,
    /// 操作被取消。
    Cancelled,
    /// 等待超时。
    Timeout,
    /// 在错误的生命周期阶段调用，例如在所属上下文内阻塞、在已卸载槽位上转发。
    Lifecycle,
    /// 执行上下文拒绝任务。
    Executor,
    /// 未登记的错误码。
    Unknown,
}

/// 框架核心错误。
///
/// `Display` 输出形如 `[pipeline.duplicate_name] handler name `codec` already exists`。
#[derive(Clone)]
pub struct CoreError {
    code: &'static str,
    message: Cow<'static, str>,
    cause: Option<ErrorCause>,
}

impl CoreError {
    /// 以错误码与消息构造错误。
    pub fn new(code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
        }
    }

    /// 附加底层原因。
    pub fn with_cause(mut self, cause: impl Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    /// 附加已共享的底层原因。
    pub fn with_shared_cause(mut self, cause: ErrorCause) -> Self {
        self.cause = Some(cause);
        self
    }

    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// 人类可读消息。
    pub fn message(&self) -> &str {
        &self.message
    }

    /// 底层原因。
    pub fn cause(&self) -> Option<&ErrorCause> {
        self.cause.as_ref()
    }

    /// 错误码对应的处理类别。
    pub fn category(&self) -> ErrorCategory {
        use codes::*;
        match self.code {
            PROMISE_ALREADY_SUCCEEDED
            | PROMISE_ALREADY_FAILED
            | PROMISE_ALREADY_CANCELLED
            | PROMISE_PROGRESS_AFTER_COMPLETION => ErrorCategory::TransitionConflict,
            PIPELINE_DUPLICATE_NAME
            | PIPELINE_NOT_SHARABLE
            | PIPELINE_TORN_DOWN
            | PIPELINE_HANDLER_NOT_FOUND => ErrorCategory::Configuration,
            PROMISE_LISTENER_FAILED
            | PROMISE_LISTENER_PANICKED
            | PIPELINE_HANDLER_PANICKED
            | PIPELINE_HANDLER_ADDED_FAILED
            | EXECUTOR_TASK_PANICKED => ErrorCategory::Callback,
            PROMISE_CANCELLED => ErrorCategory::Cancelled,
            PROMISE_AWAIT_TIMEOUT => ErrorCategory::Timeout,
            PROMISE_BLOCKING_IN_CONTEXT | PIPELINE_SLOT_DETACHED | PIPELINE_UNHANDLED_OUTBOUND => {
                ErrorCategory::Lifecycle
            }
            EXECUTOR_SHUT_DOWN => ErrorCategory::Executor,
            _ => ErrorCategory::Unknown,
        }
    }

    /// 是否为重复终态转换。
    pub fn is_transition_conflict(&self) -> bool {
        self.category() == ErrorCategory::TransitionConflict
    }

    /// 取消原因的规范实例。
    pub(crate) fn cancelled() -> Self {
        Self::new(codes::PROMISE_CANCELLED, "operation was cancelled")
    }
}

impl fmt::Debug for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreError")
            .field("code", &self.code)
            .field("message", &self.message)
            .field("cause", &self.cause.as_ref().map(|cause| cause.to_string()))
            .finish()
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl Error for CoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause
            .as_ref()
            .map(|cause| cause.as_ref() as &(dyn Error + 'static))
    }
}

/// 提取 panic 负载中的文本。
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&'static str>() {
        (*text).to_owned()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "<non-string panic payload>".to_owned()
    }
}
