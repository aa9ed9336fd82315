//! 可监听结果（Promise）与完成通知。
//!
//! # 契约说明（What）
//! - [`Promise`] 是单次赋值的完成单元：`Pending` 只能转换一次到 `Success`/`Failure`/`Cancelled` 之一；
//! - `try_*` 返回本次调用是否完成了转换；`set_*`/`cancel` 在冲突时返回区分“已成功/已失败/已取消”的错误；
//! - 监听器在终态后每个恰好执行一次，按登记顺序执行，执行位置始终是结果所属的执行上下文；
//! - 监听器返回错误或 panic 时被捕获并记录，不影响其他监听器，也不传播给完成方。
//!
//! # 逻辑解析（How）
//! - 状态与监听器列表由同一把锁保护，锁只覆盖终态转换与列表增删，回调执行期间不持锁；
//! - 通知时整体取走列表（swap-and-clear），并以 `notifying` 标记保证每个结果同一时刻只有一个排空循环；
//!   排空期间新登记的监听器被追加到列表，由正在运行的循环在下一轮取走；
//! - 终态转换与登记在同一把锁下互斥：登记先于转换则由完成方调度通知，登记晚于转换则由登记方调度通知，
//!   不存在遗漏完成的窗口。

mod blocking;
pub mod notify;
mod progress;

pub use progress::{ProgressListener, ProgressivePromise};

use std::{
    borrow::Cow,
    fmt, mem,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use crate::{
    config::NotifierConfig,
    error::{CoreError, Result, codes, panic_message},
    executor::{ExecutionContext, run_or_submit},
    observability::{self, Logger},
    sync::Mutex,
};

/// 终态结果。
#[derive(Debug)]
pub enum Outcome<T> {
    Success(T),
    Failure(CoreError),
    Cancelled,
}

impl<T> Outcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    /// 成功值的引用。
    pub fn success(&self) -> Option<&T> {
        match self {
            Outcome::Success(value) => Some(value),
            _ => None,
        }
    }

    /// 失败或取消的原因；成功时为 `None`。
    pub fn cause(&self) -> Option<CoreError> {
        match self {
            Outcome::Success(_) => None,
            Outcome::Failure(cause) => Some(cause.clone()),
            Outcome::Cancelled => Some(CoreError::cancelled()),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Outcome::Success(_) => "success",
            Outcome::Failure(_) => "failure",
            Outcome::Cancelled => "cancelled",
        }
    }
}

/// 监听器登记凭据，用于 [`Promise::remove_listener`]。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// 完成监听器。
pub type FutureListener<T> = Box<dyn FnOnce(&Promise<T>) -> Result<()> + Send + 'static>;

struct State<T> {
    outcome: Option<Arc<Outcome<T>>>,
    listeners: Vec<(ListenerId, FutureListener<T>)>,
    progress_listeners: Vec<(ListenerId, ProgressListener<T>)>,
    progress: Option<(i64, i64)>,
    notifying: bool,
    next_listener: u64,
}

impl<T> State<T> {
    fn next_id(&mut self) -> ListenerId {
        self.next_listener += 1;
        ListenerId(self.next_listener)
    }
}

struct Shared<T> {
    state: Mutex<State<T>>,
    executor: Arc<dyn ExecutionContext>,
    logger: Option<Arc<dyn Logger>>,
    max_depth: usize,
}

/// 可监听的单次赋值结果。
///
/// 句柄可廉价克隆，所有克隆共享同一状态。
pub struct Promise<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + Sync + 'static> Promise<T> {
    /// 创建绑定到 `executor` 的待定结果，不输出诊断。
    pub fn new(executor: Arc<dyn ExecutionContext>) -> Self {
        Self::with_options(executor, None, NotifierConfig::default())
    }

    /// 创建带诊断日志与通知参数的待定结果。
    pub fn with_options(
        executor: Arc<dyn ExecutionContext>,
        logger: Option<Arc<dyn Logger>>,
        config: NotifierConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    outcome: None,
                    listeners: Vec::new(),
                    progress_listeners: Vec::new(),
                    progress: None,
                    notifying: false,
                    next_listener: 0,
                }),
                executor,
                logger,
                max_depth: config.max_listener_stack_depth,
            }),
        }
    }

    /// 创建已成功的结果。
    pub fn succeeded(executor: Arc<dyn ExecutionContext>, value: T) -> Self {
        let promise = Self::new(executor);
        promise.try_success(value);
        promise
    }

    /// 创建已失败的结果。
    pub fn failed(executor: Arc<dyn ExecutionContext>, cause: CoreError) -> Self {
        let promise = Self::new(executor);
        promise.try_failure(cause);
        promise
    }

    /// 以相同的执行上下文、日志与通知参数创建新的待定结果。
    pub fn sibling<U: Send + Sync + 'static>(&self) -> Promise<U> {
        Promise::with_options(
            Arc::clone(&self.shared.executor),
            self.shared.logger.clone(),
            NotifierConfig {
                max_listener_stack_depth: self.shared.max_depth,
            },
        )
    }

    pub fn executor(&self) -> &Arc<dyn ExecutionContext> {
        &self.shared.executor
    }

    pub(crate) fn logger(&self) -> Option<&dyn Logger> {
        self.shared.logger.as_deref()
    }

    pub fn try_success(&self, value: T) -> bool {
        self.complete(Outcome::Success(value)).is_ok()
    }

    pub fn try_failure(&self, cause: CoreError) -> bool {
        self.complete(Outcome::Failure(cause)).is_ok()
    }

    pub fn try_cancel(&self) -> bool {
        self.complete(Outcome::Cancelled).is_ok()
    }

    /// 标记成功；已处于终态时返回转换冲突错误。
    pub fn set_success(&self, value: T) -> Result<()> {
        self.complete(Outcome::Success(value))
            .map_err(|existing| conflict(&existing, None))
    }

    /// 标记失败；冲突错误以被拒绝的 `cause` 作为底层原因。
    pub fn set_failure(&self, cause: CoreError) -> Result<()> {
        let rejected = cause.clone();
        self.complete(Outcome::Failure(cause))
            .map_err(|existing| conflict(&existing, Some(rejected)))
    }

    /// 取消；已处于终态时返回转换冲突错误。
    pub fn cancel(&self) -> Result<()> {
        self.complete(Outcome::Cancelled)
            .map_err(|existing| conflict(&existing, None))
    }

    pub fn is_done(&self) -> bool {
        self.shared.state.lock().outcome.is_some()
    }

    pub fn is_success(&self) -> bool {
        self.outcome().is_some_and(|outcome| outcome.is_success())
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome().as_deref(), Some(Outcome::Failure(_)))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.outcome().as_deref(), Some(Outcome::Cancelled))
    }

    /// 终态结果；待定时为 `None`。
    pub fn outcome(&self) -> Option<Arc<Outcome<T>>> {
        self.shared.state.lock().outcome.clone()
    }

    /// 失败或取消的原因。
    pub fn cause(&self) -> Option<CoreError> {
        self.outcome().and_then(|outcome| outcome.cause())
    }

    /// 成功值的拷贝；待定或未成功时为 `None`。
    pub fn get_now(&self) -> Option<T>
    where
        T: Clone,
    {
        self.outcome()
            .and_then(|outcome| outcome.success().cloned())
    }

    /// 登记完成监听器。
    ///
    /// 已处于终态时立即调度通知：位于所属上下文内则内联执行，否则投递给上下文。
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: FnOnce(&Promise<T>) -> Result<()> + Send + 'static,
    {
        let (id, done) = {
            let mut state = self.shared.state.lock();
            let id = state.next_id();
            state.listeners.push((id, Box::new(listener)));
            (id, state.outcome.is_some())
        };
        if done {
            self.schedule_notify();
        }
        id
    }

    /// 移除尚未触发的监听器（完成或进度监听器），返回是否确实移除。
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut state = self.shared.state.lock();
        if let Some(index) = state.listeners.iter().position(|(entry, _)| *entry == id) {
            let removed = state.listeners.remove(index);
            drop(state);
            drop(removed);
            return true;
        }
        if let Some(index) = state
            .progress_listeners
            .iter()
            .position(|(entry, _)| *entry == id)
        {
            let removed = state.progress_listeners.remove(index);
            drop(state);
            drop(removed);
            return true;
        }
        false
    }

    fn complete(&self, outcome: Outcome<T>) -> core::result::Result<(), Arc<Outcome<T>>> {
        let (has_listeners, discarded) = {
            let mut state = self.shared.state.lock();
            if let Some(existing) = &state.outcome {
                return Err(Arc::clone(existing));
            }
            state.outcome = Some(Arc::new(outcome));
            (
                !state.listeners.is_empty(),
                mem::take(&mut state.progress_listeners),
            )
        };
        drop(discarded);
        if has_listeners {
            self.schedule_notify();
        }
        Ok(())
    }

    fn schedule_notify(&self) {
        let this = self.clone();
        run_or_submit(
            self.shared.executor.as_ref(),
            self.shared.max_depth,
            self.logger(),
            Box::new(move || this.notify_listeners_now()),
        );
    }

    fn notify_listeners_now(&self) {
        let mut batch = {
            let mut state = self.shared.state.lock();
            if state.notifying || state.listeners.is_empty() {
                return;
            }
            state.notifying = true;
            mem::take(&mut state.listeners)
        };
        loop {
            for (_, listener) in batch {
                self.invoke_listener(listener);
            }
            let mut state = self.shared.state.lock();
            if state.listeners.is_empty() {
                state.notifying = false;
                return;
            }
            batch = mem::take(&mut state.listeners);
        }
    }

    fn invoke_listener(&self, listener: FutureListener<T>) {
        let result = panic::catch_unwind(AssertUnwindSafe(|| listener(self)));
        self.report_callback(result, "an exception was thrown by a promise listener");
    }

    fn report_callback(&self, result: std::thread::Result<Result<()>>, message: &'static str) {
        let cause = match result {
            Ok(Ok(())) => return,
            Ok(Err(err)) => CoreError::new(codes::PROMISE_LISTENER_FAILED, message).with_cause(err),
            Err(payload) => CoreError::new(
                codes::PROMISE_LISTENER_PANICKED,
                format!("{message}: {}", panic_message(payload.as_ref())),
            ),
        };
        observability::warn(self.logger(), message, Some(&cause));
    }
}

fn conflict<T>(existing: &Outcome<T>, rejected: Option<CoreError>) -> CoreError {
    let (code, message, existing_cause): (&'static str, Cow<'static, str>, Option<CoreError>) =
        match existing {
        Outcome::Success(_) => (
            codes::PROMISE_ALREADY_SUCCEEDED,
            "promise has already succeeded".into(),
            None,
        ),
        Outcome::Failure(cause) => (
            codes::PROMISE_ALREADY_FAILED,
            format!("promise has already failed: {cause}").into(),
            Some(cause.clone()),
        ),
        Outcome::Cancelled => (
            codes::PROMISE_ALREADY_CANCELLED,
            "promise has already been cancelled".into(),
            None,
        ),
    };
    let err = CoreError::new(code, message);
    match rejected.or(existing_cause) {
        Some(cause) => err.with_cause(cause),
        None => err,
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        let label = state
            .outcome
            .as_ref()
            .map_or("pending", |outcome| outcome.label());
        f.debug_struct("Promise")
            .field("state", &label)
            .field("listeners", &state.listeners.len())
            .finish()
    }
}
