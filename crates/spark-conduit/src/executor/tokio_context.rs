use std::sync::Arc;

use tokio::{runtime::Handle, sync::mpsc};

use super::{ExecutionContext, Task, next_context_id, run_isolated};
use crate::{
    error::{CoreError, Result, codes},
    observability::Logger,
};

tokio::task_local! {
    static CURRENT_CONTEXT: u64;
}

/// 以单个 tokio 任务承载的执行上下文。
///
/// # 逻辑解析（How）
/// - `spawn` 在给定运行时上启动一个消费任务，从无界通道中逐个取出任务执行；
/// - 执行期间通过 task-local 记录上下文标识，`in_context` 据此判断；
/// - 句柄被丢弃后通道关闭，消费任务在执行完剩余任务后自然退出；
/// - 任务 panic 被捕获，配置了日志时以 [`codes::EXECUTOR_TASK_PANICKED`] 告警。
///
/// 任务在 tokio 工作线程上同步执行，不得长时间阻塞。
pub struct TokioExecutionContext {
    id: u64,
    sender: mpsc::UnboundedSender<Task>,
}

impl TokioExecutionContext {
    pub fn spawn(handle: &Handle) -> Self {
        Self::spawn_with_logger(handle, None)
    }

    pub fn spawn_with_logger(handle: &Handle, logger: Option<Arc<dyn Logger>>) -> Self {
        let id = next_context_id();
        let (sender, mut receiver) = mpsc::unbounded_channel::<Task>();
        handle.spawn(async move {
            while let Some(task) = receiver.recv().await {
                CURRENT_CONTEXT.sync_scope(id, || run_isolated(task, logger.as_deref()));
            }
        });
        Self { id, sender }
    }
}

impl ExecutionContext for TokioExecutionContext {
    fn submit(&self, task: Task) -> Result<()> {
        self.sender.send(task).map_err(|_| {
            CoreError::new(
                codes::EXECUTOR_SHUT_DOWN,
                "tokio execution context task has exited",
            )
        })
    }

    fn in_context(&self) -> bool {
        CURRENT_CONTEXT
            .try_with(|current| *current == self.id)
            .unwrap_or(false)
    }
}
