use std::{
    sync::{Arc, mpsc},
    thread,
    time::Duration,
};

use spark_conduit::{ExecutionContext, Outcome, Promise, SerialExecutor, codes};

fn serial(name: &str) -> Arc<SerialExecutor> {
    Arc::new(SerialExecutor::spawn(name).expect("spawn worker"))
}

#[test]
fn await_outcome_returns_once_another_thread_completes() {
    let executor = serial("await-outcome");
    let promise = Promise::<u32>::new(executor.clone() as Arc<dyn ExecutionContext>);
    let completer = promise.clone();
    let worker = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        completer.try_success(42);
    });

    let outcome = promise
        .await_outcome(Duration::from_secs(5))
        .expect("结果应在超时前完成");
    assert!(matches!(outcome.as_ref(), Outcome::Success(42)));
    worker.join().expect("completer thread");
}

#[test]
fn unbounded_timeout_waits_until_completion() {
    let executor = serial("await-unbounded");
    let promise = Promise::<u32>::new(executor.clone() as Arc<dyn ExecutionContext>);
    let completer = promise.clone();
    let worker = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        completer.try_success(7);
    });

    assert!(promise.await_timeout(Duration::MAX).expect("上下文外可以等待"));
    let outcome = promise
        .await_outcome(Duration::MAX)
        .expect("已完成的结果直接返回");
    assert!(matches!(outcome.as_ref(), Outcome::Success(7)));
    worker.join().expect("completer thread");
}

#[test]
fn await_timeout_expires_on_pending_promise() {
    let executor = serial("await-timeout");
    let promise = Promise::<()>::new(executor.clone() as Arc<dyn ExecutionContext>);
    assert!(!promise.await_timeout(Duration::from_millis(10)).expect("上下文外可以等待"));

    let err = promise
        .await_outcome(Duration::from_millis(10))
        .expect_err("未完成时应超时");
    assert_eq!(err.code(), codes::PROMISE_AWAIT_TIMEOUT);

    promise.try_success(());
    assert!(promise.await_timeout(Duration::from_millis(10)).expect("已完成"));
}

#[test]
fn blocking_inside_the_context_is_rejected() {
    let executor = serial("await-in-context");
    let promise = Promise::<()>::new(executor.clone() as Arc<dyn ExecutionContext>);
    let (tx, rx) = mpsc::channel();
    let waiter = promise.clone();
    executor
        .submit(Box::new(move || {
            let _ = tx.send(waiter.await_timeout(Duration::from_secs(5)));
        }))
        .expect("submit");

    let result = rx.recv_timeout(Duration::from_secs(5)).expect("任务应执行");
    let err = result.expect_err("上下文内阻塞等待必须被拒绝");
    assert_eq!(err.code(), codes::PROMISE_BLOCKING_IN_CONTEXT);
}

#[test]
fn waiting_on_a_completed_promise_inside_the_context_is_allowed() {
    let executor = serial("await-completed");
    let promise = Promise::<u8>::new(executor.clone() as Arc<dyn ExecutionContext>);
    promise.try_success(9);
    let (tx, rx) = mpsc::channel();
    let waiter = promise.clone();
    executor
        .submit(Box::new(move || {
            let _ = tx.send(waiter.await_timeout(Duration::from_secs(1)));
        }))
        .expect("submit");
    assert!(matches!(rx.recv_timeout(Duration::from_secs(5)), Ok(Ok(true))));
}
