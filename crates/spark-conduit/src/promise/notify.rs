//! 带诊断的终态转换辅助函数。
//!
//! 转换失败不是错误：辅助函数只在提供了日志接收端时记录一条告警，说明结果此前已成功还是已失败，
//! 以及本次未能通知出去的原因。

use super::{ListenerId, Outcome, Promise};
use crate::{error::CoreError, observability::Logger};

/// 尝试标记成功，冲突时记录告警。
pub fn try_success<T>(promise: &Promise<T>, value: T, logger: Option<&dyn Logger>) -> bool
where
    T: Send + Sync + 'static,
{
    if promise.try_success(value) {
        return true;
    }
    report_conflict(promise, "success", None, logger);
    false
}

/// 尝试标记失败，冲突时记录告警并附带未通知的原因。
pub fn try_failure<T>(promise: &Promise<T>, cause: CoreError, logger: Option<&dyn Logger>) -> bool
where
    T: Send + Sync + 'static,
{
    let rejected = logger.map(|_| cause.clone());
    if promise.try_failure(cause) {
        return true;
    }
    report_conflict(promise, "failure", rejected.as_ref(), logger);
    false
}

/// 尝试取消，冲突时记录告警。
pub fn try_cancel<T>(promise: &Promise<T>, logger: Option<&dyn Logger>) -> bool
where
    T: Send + Sync + 'static,
{
    if promise.try_cancel() {
        return true;
    }
    report_conflict(promise, "cancelled", None, logger);
    false
}

fn report_conflict<T>(
    promise: &Promise<T>,
    attempted: &str,
    rejected: Option<&CoreError>,
    logger: Option<&dyn Logger>,
) where
    T: Send + Sync + 'static,
{
    let Some(logger) = logger else {
        return;
    };
    let Some(existing) = promise.outcome() else {
        return;
    };
    let state = match existing.as_ref() {
        Outcome::Success(_) => "succeeded",
        Outcome::Failure(_) => "failed",
        Outcome::Cancelled => "been cancelled",
    };
    let message = match rejected {
        Some(cause) => format!(
            "failed to mark a promise as {attempted} because it has {state} already: {promise:?}, unnotified cause: {cause}"
        ),
        None => format!(
            "failed to mark a promise as {attempted} because it has {state} already: {promise:?}"
        ),
    };
    logger.warn(&message, rejected.or(existing.cause().as_ref()));
}

/// 把 `source` 的终态镜像到 `target`。
///
/// `target` 已处于终态时通过 `source` 的日志接收端告警。
pub fn cascade<T>(source: &Promise<T>, target: &Promise<T>) -> ListenerId
where
    T: Clone + Send + Sync + 'static,
{
    let target = target.clone();
    source.add_listener(move |completed| {
        let logger = completed.logger();
        if let Some(outcome) = completed.outcome() {
            match outcome.as_ref() {
                Outcome::Success(value) => {
                    try_success(&target, value.clone(), logger);
                }
                Outcome::Failure(cause) => {
                    try_failure(&target, cause.clone(), logger);
                }
                Outcome::Cancelled => {
                    try_cancel(&target, logger);
                }
            }
        }
        Ok(())
    })
}
