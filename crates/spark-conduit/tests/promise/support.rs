use std::sync::Arc;

use parking_lot::Mutex;
use spark_conduit::{
    CoreError, EmbeddedExecutor, ExecutionContext, Logger, NotifierConfig, Promise,
    ProgressivePromise,
};

/// 记录全部告警的测试日志。
#[derive(Default)]
pub struct RecordingLogger {
    pub warnings: Mutex<Vec<(String, Option<&'static str>)>>,
}

impl RecordingLogger {
    pub fn codes(&self) -> Vec<&'static str> {
        self.warnings
            .lock()
            .iter()
            .filter_map(|(_, code)| *code)
            .collect()
    }
}

impl Logger for RecordingLogger {
    fn warn(&self, message: &str, cause: Option<&CoreError>) {
        self.warnings
            .lock()
            .push((message.to_owned(), cause.map(CoreError::code)));
    }
}

pub struct Fixture {
    pub executor: Arc<EmbeddedExecutor>,
    pub logger: Arc<RecordingLogger>,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            executor: Arc::new(EmbeddedExecutor::new()),
            logger: Arc::new(RecordingLogger::default()),
        }
    }

    pub fn promise<T: Send + Sync + 'static>(&self) -> Promise<T> {
        Promise::with_options(
            self.executor.clone() as Arc<dyn ExecutionContext>,
            Some(self.logger.clone() as Arc<dyn Logger>),
            NotifierConfig::default(),
        )
    }

    pub fn progressive<T: Send + Sync + 'static>(&self) -> ProgressivePromise<T> {
        ProgressivePromise::with_options(
            self.executor.clone() as Arc<dyn ExecutionContext>,
            Some(self.logger.clone() as Arc<dyn Logger>),
            NotifierConfig::default(),
        )
    }

    /// 在执行上下文内运行 `task` 并排空队列。
    pub fn run_in_context(&self, task: impl FnOnce() + Send + 'static) {
        self.executor
            .submit(Box::new(task))
            .expect("嵌入式执行器未关闭");
        self.executor.run_pending();
    }
}
