//! 诊断日志协作者。
//!
//! 核心只在两类场景输出诊断：对已终态结果的重复通知，以及用户回调抛出的错误。
//! 具体落地（`tracing`、测试探针等）由调用方注入；未注入时诊断被直接丢弃。

use crate::error::CoreError;

/// 诊断日志接收端。
///
/// # 契约说明（What）
/// - `warn`：必须实现；`cause` 为触发诊断的错误（若有）；
/// - `debug`：默认空实现，用于链尾丢弃未处理消息等低价值事件；
/// - 实现必须线程安全且不得 panic，调用点通常位于通知或事件分发热路径。
pub trait Logger: Send + Sync + 'static {
    /// 记录告警级诊断。
    fn warn(&self, message: &str, cause: Option<&CoreError>);

    /// 记录调试级诊断。
    fn debug(&self, message: &str) {
        let _ = message;
    }
}

/// 丢弃全部诊断的日志实现。
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn warn(&self, _message: &str, _cause: Option<&CoreError>) {}
}

/// 在可选日志接收端上记录告警。
pub(crate) fn warn(logger: Option<&dyn Logger>, message: &str, cause: Option<&CoreError>) {
    if let Some(logger) = logger {
        logger.warn(message, cause);
    }
}
