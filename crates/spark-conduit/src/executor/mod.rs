//! 执行上下文契约与内置实现。
//!
//! # 契约说明（What）
//! - [`ExecutionContext`] 是“每连接一个”的单线程、严格有序任务执行设施：`submit` 的任务按提交顺序逐个执行，
//!   任意两个任务不会并发；
//! - `in_context` 让调用方在已经位于该上下文内时跳过一次多余的投递；
//! - Promise 的通知与 Pipeline 的事件传播都调度到同一个上下文上，因此同一连接的监听器与 Handler 永远不会并发。
//!
//! # 内置实现
//! - [`EmbeddedExecutor`]：由调用线程显式 `run_pending` 驱动的队列，适合嵌入其他事件循环与确定性测试；
//! - [`SerialExecutor`]：独占一个工作线程的串行执行器；
//! - `TokioExecutionContext`（`tokio` Feature）：在单个 tokio 任务内顺序执行。

mod embedded;
mod serial;
#[cfg(feature = "tokio")]
mod tokio_context;

pub use embedded::EmbeddedExecutor;
pub use serial::SerialExecutor;
#[cfg(feature = "tokio")]
pub use tokio_context::TokioExecutionContext;

use std::{
    cell::Cell,
    panic::{self, AssertUnwindSafe},
    sync::atomic::{AtomicU64, Ordering},
};

use crate::{
    error::{CoreError, Result, codes, panic_message},
    observability::{self, Logger},
};

/// 提交给执行上下文的任务。
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// 单线程、严格有序的执行上下文。
pub trait ExecutionContext: Send + Sync + 'static {
    /// 排队一个任务。
    ///
    /// 上下文已关闭时返回 [`codes::EXECUTOR_SHUT_DOWN`](crate::error::codes::EXECUTOR_SHUT_DOWN)，任务被丢弃。
    fn submit(&self, task: Task) -> Result<()>;

    /// 当前线程是否正在该上下文内执行。
    fn in_context(&self) -> bool;
}

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// 为执行上下文分配进程内唯一标识，`0` 保留为“无上下文”。
pub(crate) fn next_context_id() -> u64 {
    NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed)
}

thread_local! {
    static INLINE_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// 内联执行帧的深度守卫，析构时回退计数（panic 路径同样生效）。
struct DepthGuard;

impl DepthGuard {
    fn enter(max_depth: usize) -> Option<Self> {
        INLINE_DEPTH.with(|depth| {
            let current = depth.get();
            if current >= max_depth {
                None
            } else {
                depth.set(current + 1);
                Some(DepthGuard)
            }
        })
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        INLINE_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// 已位于上下文内且嵌套深度未超限时内联执行，否则投递给上下文。
///
/// 投递失败只记录诊断，不向调用方传播。
pub(crate) fn run_or_submit(
    executor: &dyn ExecutionContext,
    max_depth: usize,
    logger: Option<&dyn Logger>,
    task: Task,
) {
    if executor.in_context() {
        if let Some(_guard) = DepthGuard::enter(max_depth) {
            task();
            return;
        }
    }
    if let Err(err) = executor.submit(task) {
        observability::warn(
            logger,
            "failed to submit a task to the execution context; was it shut down?",
            Some(&err),
        );
    }
}

/// 执行一个任务并捕获其 panic，捕获到的 panic 以 [`codes::EXECUTOR_TASK_PANICKED`] 告警。
pub(crate) fn run_isolated(task: Task, logger: Option<&dyn Logger>) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
        let cause = CoreError::new(
            codes::EXECUTOR_TASK_PANICKED,
            format!("task panicked: {}", panic_message(payload.as_ref())),
        );
        observability::warn(
            logger,
            "a task panicked inside the execution context and was discarded",
            Some(&cause),
        );
    }
}
