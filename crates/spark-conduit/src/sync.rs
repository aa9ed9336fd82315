//! 同步原语切换点。
//!
// 教案级说明：启用 `--cfg loom`（或 `--cfg spark_loom`）时切换到 loom 的互斥锁，
// 让模型检查能够穷举终态竞争与监听器登记的调度交错；常规构建使用 `parking_lot`。

#[cfg(not(any(loom, spark_loom)))]
pub(crate) use parking_lot::Mutex;

#[cfg(any(loom, spark_loom))]
pub(crate) struct Mutex<T>(loom::sync::Mutex<T>);

#[cfg(any(loom, spark_loom))]
impl<T> Mutex<T> {
    pub(crate) fn new(value: T) -> Self {
        Self(loom::sync::Mutex::new(value))
    }

    pub(crate) fn lock(&self) -> loom::sync::MutexGuard<'_, T> {
        self.0
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
