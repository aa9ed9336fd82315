use std::{
    cell::Cell,
    collections::VecDeque,
    sync::atomic::{AtomicBool, Ordering},
};

use parking_lot::Mutex;

use super::{ExecutionContext, Task, next_context_id};
use crate::error::{CoreError, Result, codes};

thread_local! {
    static DRAINING: Cell<u64> = const { Cell::new(0) };
}

/// 由调用线程驱动的嵌入式执行上下文。
///
/// # 逻辑解析（How）
/// - `submit` 只入队，不执行；
/// - `run_pending` 在调用线程上按 FIFO 顺序逐个执行，直到队列为空（执行期间新提交的任务也会被执行）；
/// - 执行期间 `in_context()` 对当前线程返回 `true`，对其他线程返回 `false`。
///
/// # 风险提示（Trade-offs）
/// - 任务 panic 会沿 `run_pending` 向上传播，队列中剩余任务保留到下一次驱动；
/// - 多个线程同时调用 `run_pending` 会破坏“单线程”语义，调用方需要自行保证只有一个驱动线程。
pub struct EmbeddedExecutor {
    id: u64,
    queue: Mutex<VecDeque<Task>>,
    shut_down: AtomicBool,
}

impl EmbeddedExecutor {
    pub fn new() -> Self {
        Self {
            id: next_context_id(),
            queue: Mutex::new(VecDeque::new()),
            shut_down: AtomicBool::new(false),
        }
    }

    /// 执行所有排队任务，返回执行数量。
    pub fn run_pending(&self) -> usize {
        let previous = DRAINING.with(|current| current.replace(self.id));
        let _restore = RestoreDraining(previous);
        let mut ran = 0;
        loop {
            let next = self.queue.lock().pop_front();
            match next {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }

    /// 排队中的任务数。
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// 拒绝后续提交；已排队任务仍可通过 `run_pending` 执行。
    pub fn shutdown(&self) {
        self.shut_down.store(true, Ordering::Release);
    }
}

impl Default for EmbeddedExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionContext for EmbeddedExecutor {
    fn submit(&self, task: Task) -> Result<()> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(CoreError::new(
                codes::EXECUTOR_SHUT_DOWN,
                "embedded executor has been shut down",
            ));
        }
        self.queue.lock().push_back(task);
        Ok(())
    }

    fn in_context(&self) -> bool {
        DRAINING.with(|current| current.get() == self.id)
    }
}

struct RestoreDraining(u64);

impl Drop for RestoreDraining {
    fn drop(&mut self) {
        DRAINING.with(|current| current.set(self.0));
    }
}
