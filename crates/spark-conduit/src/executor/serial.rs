use std::{
    collections::VecDeque,
    io,
    sync::Arc,
    thread::{self, JoinHandle, ThreadId},
};

use parking_lot::{Condvar, Mutex};

use super::{ExecutionContext, Task, run_isolated};
use crate::{
    error::{CoreError, Result, codes},
    observability::Logger,
};

struct Queue {
    tasks: VecDeque<Task>,
    shut_down: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    available: Condvar,
    logger: Option<Arc<dyn Logger>>,
}

/// 独占一个工作线程的串行执行上下文。
///
/// # 契约说明（What）
/// - 任务在名为 `name` 的工作线程上按提交顺序执行；
/// - 任务 panic 被捕获并丢弃，工作线程继续处理后续任务；配置了日志时以
///   [`codes::EXECUTOR_TASK_PANICKED`] 告警；
/// - [`shutdown`](Self::shutdown) 先执行完已排队任务再退出；之后的提交返回
///   [`codes::EXECUTOR_SHUT_DOWN`]。`Drop` 隐式调用 `shutdown`。
pub struct SerialExecutor {
    shared: Arc<Shared>,
    worker_id: ThreadId,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SerialExecutor {
    /// 启动工作线程。
    pub fn spawn(name: impl Into<String>) -> io::Result<Self> {
        Self::spawn_with_logger(name, None)
    }

    /// 启动工作线程，任务 panic 记录到 `logger`。
    pub fn spawn_with_logger(
        name: impl Into<String>,
        logger: Option<Arc<dyn Logger>>,
    ) -> io::Result<Self> {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                tasks: VecDeque::new(),
                shut_down: false,
            }),
            available: Condvar::new(),
            logger,
        });
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name(name.into())
            .spawn(move || worker_loop(&worker_shared))?;
        Ok(Self {
            shared,
            worker_id: worker.thread().id(),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// 停止接收任务，等待已排队任务执行完毕。
    ///
    /// 在工作线程内调用时只标记关闭，不等待自身退出。
    pub fn shutdown(&self) {
        {
            let mut queue = self.shared.queue.lock();
            queue.shut_down = true;
        }
        self.shared.available.notify_all();
        if self.in_context() {
            return;
        }
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let task = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(task) = queue.tasks.pop_front() {
                    break task;
                }
                if queue.shut_down {
                    return;
                }
                shared.available.wait(&mut queue);
            }
        };
        run_isolated(task, shared.logger.as_deref());
    }
}

impl ExecutionContext for SerialExecutor {
    fn submit(&self, task: Task) -> Result<()> {
        {
            let mut queue = self.shared.queue.lock();
            if queue.shut_down {
                return Err(CoreError::new(
                    codes::EXECUTOR_SHUT_DOWN,
                    "serial executor has been shut down",
                ));
            }
            queue.tasks.push_back(task);
        }
        self.shared.available.notify_one();
        Ok(())
    }

    fn in_context(&self) -> bool {
        thread::current().id() == self.worker_id
    }
}

impl Drop for SerialExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
