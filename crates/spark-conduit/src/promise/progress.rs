use std::{ops::Deref, sync::Arc};

use super::{ListenerId, Promise};
use crate::{
    config::NotifierConfig,
    error::{CoreError, Result, codes},
    executor::{ExecutionContext, run_or_submit},
    observability::Logger,
};

/// 进度监听器，参数依次为结果句柄、当前进度与总量。
pub type ProgressListener<T> =
    Arc<dyn Fn(&Promise<T>, i64, i64) -> Result<()> + Send + Sync + 'static>;

/// 支持中间进度上报的结果。
///
/// # 契约说明（What）
/// - 仅在 `Pending` 期间可以多次上报 `(progress, total)`；终态后上报返回 `false`（`try_progress`）
///   或转换冲突错误（`set_progress`）；
/// - 进度值不做范围校验，`progress > total` 或负值原样交给监听器；
/// - 进度只触发进度监听器，从不触发完成监听器；终态后进度监听器被整体丢弃。
///
/// 通过 `Deref` 暴露 [`Promise`] 的全部完成语义。
pub struct ProgressivePromise<T> {
    inner: Promise<T>,
}

impl<T> Clone for ProgressivePromise<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> ProgressivePromise<T> {
    pub fn new(executor: Arc<dyn ExecutionContext>) -> Self {
        Self {
            inner: Promise::new(executor),
        }
    }

    pub fn with_options(
        executor: Arc<dyn ExecutionContext>,
        logger: Option<Arc<dyn Logger>>,
        config: NotifierConfig,
    ) -> Self {
        Self {
            inner: Promise::with_options(executor, logger, config),
        }
    }

    /// 上报进度；已处于终态时返回 [`codes::PROMISE_PROGRESS_AFTER_COMPLETION`]。
    pub fn set_progress(&self, progress: i64, total: i64) -> Result<()> {
        if self.try_progress(progress, total) {
            Ok(())
        } else {
            Err(CoreError::new(
                codes::PROMISE_PROGRESS_AFTER_COMPLETION,
                format!("cannot report progress {progress}/{total} on a completed promise"),
            ))
        }
    }

    /// 尝试上报进度，返回是否被接受。
    pub fn try_progress(&self, progress: i64, total: i64) -> bool {
        let listeners: Vec<ProgressListener<T>> = {
            let mut state = self.inner.shared.state.lock();
            if state.outcome.is_some() {
                return false;
            }
            state.progress = Some((progress, total));
            state
                .progress_listeners
                .iter()
                .map(|(_, listener)| Arc::clone(listener))
                .collect()
        };
        if listeners.is_empty() {
            return true;
        }
        let promise = self.inner.clone();
        run_or_submit(
            self.inner.shared.executor.as_ref(),
            self.inner.shared.max_depth,
            self.inner.logger(),
            Box::new(move || {
                for listener in listeners {
                    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        listener(&promise, progress, total)
                    }));
                    promise.report_callback(
                        result,
                        "an exception was thrown by a promise progress listener",
                    );
                }
            }),
        );
        true
    }

    /// 最近一次上报的进度。
    pub fn progress(&self) -> Option<(i64, i64)> {
        self.inner.shared.state.lock().progress
    }

    /// 登记进度监听器；结果已处于终态时不登记，返回 `None`。
    pub fn add_progress_listener<F>(&self, listener: F) -> Option<ListenerId>
    where
        F: Fn(&Promise<T>, i64, i64) -> Result<()> + Send + Sync + 'static,
    {
        let mut state = self.inner.shared.state.lock();
        if state.outcome.is_some() {
            return None;
        }
        let id = state.next_id();
        state.progress_listeners.push((id, Arc::new(listener)));
        Some(id)
    }

    /// 退化为普通结果句柄。
    pub fn into_promise(self) -> Promise<T> {
        self.inner
    }
}

impl<T> Deref for ProgressivePromise<T> {
    type Target = Promise<T>;

    fn deref(&self) -> &Promise<T> {
        &self.inner
    }
}
