//! 阻塞等待。
//!
//! 阻塞等待不属于通知快路径：它登记一个监听器，由监听器唤醒普通的互斥锁 + 条件变量。
//! 因为监听器在所属执行上下文中执行，在该上下文内阻塞会形成自锁，所以直接拒绝。

#![cfg(not(any(loom, spark_loom)))]

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};

use super::{Outcome, Promise};
use crate::error::{CoreError, Result, codes};

#[derive(Default)]
struct Signal {
    fired: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    fn fire(&self) {
        *self.fired.lock() = true;
        self.cond.notify_all();
    }

    fn wait_for(&self, timeout: Duration) -> bool {
        let mut fired = self.fired.lock();
        // 截止时间无法表示时（如 `Duration::MAX`）视为无限等待。
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            while !*fired {
                self.cond.wait(&mut fired);
            }
            return true;
        };
        while !*fired {
            if self.cond.wait_until(&mut fired, deadline).timed_out() {
                break;
            }
        }
        *fired
    }
}

impl<T: Send + Sync + 'static> Promise<T> {
    /// 最多等待 `timeout`，返回结果是否已完成。
    ///
    /// 在所属执行上下文内等待尚未完成的结果返回 [`codes::PROMISE_BLOCKING_IN_CONTEXT`]。
    pub fn await_timeout(&self, timeout: Duration) -> Result<bool> {
        if self.is_done() {
            return Ok(true);
        }
        if self.executor().in_context() {
            return Err(CoreError::new(
                codes::PROMISE_BLOCKING_IN_CONTEXT,
                "blocking wait inside the promise's own execution context would deadlock",
            ));
        }
        let signal = Arc::new(Signal::default());
        let notifier = Arc::clone(&signal);
        let id = self.add_listener(move |_| {
            notifier.fire();
            Ok(())
        });
        let fired = signal.wait_for(timeout);
        if !fired {
            self.remove_listener(id);
        }
        Ok(fired || self.is_done())
    }

    /// 最多等待 `timeout` 并返回终态结果，超时返回 [`codes::PROMISE_AWAIT_TIMEOUT`]。
    pub fn await_outcome(&self, timeout: Duration) -> Result<Arc<Outcome<T>>> {
        if self.await_timeout(timeout)? {
            if let Some(outcome) = self.outcome() {
                return Ok(outcome);
            }
        }
        Err(CoreError::new(
            codes::PROMISE_AWAIT_TIMEOUT,
            format!("promise did not complete within {timeout:?}"),
        ))
    }
}
