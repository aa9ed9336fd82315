use std::{sync::Arc, thread};

use spark_conduit::{
    ChannelHandler, EmbeddedExecutor, ExecutionContext, HandlerContext, Pipeline, Result, codes,
    pipeline::ensure_not_sharable,
};

use super::support::{Fixture, Log, Marker, Probe, entries, log};

/// 只记录生命周期回调的非共享 Handler。
struct Tracked {
    log: Log,
}

impl ChannelHandler for Tracked {
    fn handler_added(&self, _ctx: &HandlerContext<'_>) -> Result<()> {
        self.log.lock().push("added".into());
        Ok(())
    }

    fn handler_removed(&self, _ctx: &HandlerContext<'_>) -> Result<()> {
        self.log.lock().push("removed".into());
        Ok(())
    }
}

struct SharedMarker;

impl ChannelHandler for SharedMarker {
    fn is_sharable(&self) -> bool {
        true
    }
}

fn standalone() -> Pipeline {
    Pipeline::new(Arc::new(EmbeddedExecutor::new()) as Arc<dyn ExecutionContext>)
}

#[test]
fn duplicate_names_are_rejected() {
    let fixture = Fixture::new();
    fixture.pipeline.add_last("codec", Arc::new(Marker)).expect("add codec");
    let epoch = fixture.pipeline.epoch();

    let err = fixture
        .pipeline
        .add_first("codec", Arc::new(Marker))
        .expect_err("重名必须失败");
    assert_eq!(err.code(), codes::PIPELINE_DUPLICATE_NAME);
    assert_eq!(fixture.pipeline.len(), 1);
    assert_eq!(fixture.pipeline.epoch(), epoch, "失败的变更不发布新快照");
}

#[test]
fn plain_handler_attaches_to_one_slot_only() {
    let first = Fixture::new();
    let second = standalone();
    let handler: Arc<dyn ChannelHandler> = Arc::new(Marker);

    first.pipeline.add_last("a", Arc::clone(&handler)).expect("首次挂载");
    let err = first
        .pipeline
        .add_last("b", Arc::clone(&handler))
        .expect_err("同一链路第二次挂载");
    assert_eq!(err.code(), codes::PIPELINE_NOT_SHARABLE);
    let err = second
        .add_last("a", Arc::clone(&handler))
        .expect_err("另一链路挂载");
    assert_eq!(err.code(), codes::PIPELINE_NOT_SHARABLE);

    first.pipeline.remove("a").expect("remove");
    first.drive();
    second
        .add_last("a", Arc::clone(&handler))
        .expect("卸载完成后可以挂载到其他链路");
}

#[test]
fn plain_handler_stays_claimed_until_handler_removed_has_run() {
    let trace = log();
    let handler: Arc<dyn ChannelHandler> = Arc::new(Tracked {
        log: Arc::clone(&trace),
    });
    let first = Fixture::new();
    let second = Fixture::new();

    first.pipeline.add_last("h", Arc::clone(&handler)).expect("首次挂载");
    first.drive();
    first.pipeline.remove("h").expect("remove");

    let err = second
        .pipeline
        .add_last("h", Arc::clone(&handler))
        .expect_err("handler_removed 尚未执行时实例仍归原链路所有");
    assert_eq!(err.code(), codes::PIPELINE_NOT_SHARABLE);

    first.drive();
    second
        .pipeline
        .add_last("h", Arc::clone(&handler))
        .expect("handler_removed 执行后可以挂载");
    second.drive();
    assert_eq!(entries(&trace), vec!["added", "removed", "added"]);
}

#[test]
fn removal_dropped_by_a_shut_down_executor_still_releases_the_claim() {
    let handler: Arc<dyn ChannelHandler> = Arc::new(Marker);
    let executor = Arc::new(EmbeddedExecutor::new());
    let pipeline = Pipeline::new(executor.clone() as Arc<dyn ExecutionContext>);
    pipeline.add_last("a", Arc::clone(&handler)).expect("挂载");
    executor.run_pending();
    executor.shutdown();

    pipeline.remove("a").expect("remove");
    standalone()
        .add_last("a", Arc::clone(&handler))
        .expect("卸载任务被拒绝时登记同样撤销");
}

#[test]
fn remove_handler_targets_the_instance_not_its_name() {
    let fixture = Fixture::new();
    let original: Arc<dyn ChannelHandler> = Arc::new(Marker);
    fixture.pipeline.add_last("a", Arc::clone(&original)).expect("a");
    fixture
        .pipeline
        .replace("a", "a", Arc::new(Marker))
        .expect("同名替换");

    let err = fixture
        .pipeline
        .remove_handler(&original)
        .expect_err("已被替换的实例不在链路上");
    assert_eq!(err.code(), codes::PIPELINE_HANDLER_NOT_FOUND);
    assert_eq!(fixture.pipeline.names(), vec!["a"]);
}

#[test]
fn concurrent_attach_of_a_plain_handler_has_one_winner() {
    let handler: Arc<dyn ChannelHandler> = Arc::new(Marker);
    let pipelines: Vec<Pipeline> = (0..8).map(|_| standalone()).collect();
    let successes = thread::scope(|scope| {
        let attempts: Vec<_> = pipelines
            .iter()
            .map(|pipeline| {
                let handler = Arc::clone(&handler);
                scope.spawn(move || pipeline.add_last("shared", handler).is_ok())
            })
            .collect();
        attempts
            .into_iter()
            .map(|attempt| attempt.join())
            .filter(|outcome| matches!(outcome, Ok(true)))
            .count()
    });
    assert_eq!(successes, 1);
}

#[test]
fn dropping_a_pipeline_releases_its_handlers() {
    let handler: Arc<dyn ChannelHandler> = Arc::new(Marker);
    {
        let executor = Arc::new(EmbeddedExecutor::new());
        let pipeline = Pipeline::new(executor.clone() as Arc<dyn ExecutionContext>);
        pipeline.add_last("a", Arc::clone(&handler)).expect("挂载");
        // 排队中的生命周期任务持有链路句柄，先排空。
        executor.run_pending();
    }
    standalone()
        .add_last("a", Arc::clone(&handler))
        .expect("原链路释放后可以重新挂载");
}

#[test]
fn sharable_handler_attaches_everywhere() {
    let handler: Arc<dyn ChannelHandler> = Arc::new(SharedMarker);
    let pipeline = standalone();
    pipeline.add_last("a", Arc::clone(&handler)).expect("a");
    pipeline.add_last("b", Arc::clone(&handler)).expect("b");
    standalone().add_last("a", Arc::clone(&handler)).expect("other");
    assert!(ensure_not_sharable(handler.as_ref()).is_err());
    assert!(ensure_not_sharable(&Marker).is_ok());
}

#[test]
fn relative_insertion_respects_anchors() {
    let fixture = Fixture::new();
    let pipeline = &fixture.pipeline;
    pipeline.add_last("middle", Arc::new(Marker)).expect("middle");
    pipeline.add_first("head", Arc::new(Marker)).expect("head");
    pipeline.add_last("tail", Arc::new(Marker)).expect("tail");
    pipeline
        .add_before("middle", "before-middle", Arc::new(Marker))
        .expect("before");
    pipeline
        .add_after("middle", "after-middle", Arc::new(Marker))
        .expect("after");
    assert_eq!(
        pipeline.names(),
        vec!["head", "before-middle", "middle", "after-middle", "tail"]
    );

    let err = pipeline
        .add_after("missing", "x", Arc::new(Marker))
        .expect_err("锚点不存在");
    assert_eq!(err.code(), codes::PIPELINE_HANDLER_NOT_FOUND);
    assert!(pipeline.get("x").is_none());
    assert!(pipeline.get("middle").is_some());
}

#[test]
fn removal_by_name_and_by_instance() {
    let fixture = Fixture::new();
    let handler: Arc<dyn ChannelHandler> = Arc::new(Marker);
    fixture.pipeline.add_last("a", Arc::new(Marker)).expect("a");
    fixture.pipeline.add_last("b", Arc::clone(&handler)).expect("b");

    let err = fixture
        .pipeline
        .remove("missing")
        .err()
        .expect("名称不存在");
    assert_eq!(err.code(), codes::PIPELINE_HANDLER_NOT_FOUND);

    fixture.pipeline.remove_handler(&handler).expect("按实例卸载");
    assert_eq!(fixture.pipeline.names(), vec!["a"]);
    let err = fixture
        .pipeline
        .remove_handler(&handler)
        .expect_err("已卸载");
    assert_eq!(err.code(), codes::PIPELINE_HANDLER_NOT_FOUND);
    fixture.pipeline.remove("a").expect("a");
    assert!(fixture.pipeline.is_empty());
}

#[test]
fn replace_keeps_the_position() {
    let fixture = Fixture::new();
    let trace = log();
    fixture.pipeline.add_last("a", Probe::forward("a", &trace)).expect("a");
    fixture.pipeline.add_last("b", Probe::forward("b", &trace)).expect("b");
    fixture.pipeline.add_last("c", Probe::forward("c", &trace)).expect("c");

    fixture
        .pipeline
        .replace("b", "b2", Probe::forward("b2", &trace))
        .expect("replace");
    let err = fixture
        .pipeline
        .replace("a", "c", Arc::new(Marker))
        .err()
        .expect("新名称与其他槽位重复");
    assert_eq!(err.code(), codes::PIPELINE_DUPLICATE_NAME);
    assert_eq!(fixture.pipeline.names(), vec!["a", "b2", "c"]);

    fixture.pipeline.fire_read(1u32);
    fixture.drive();
    assert_eq!(entries(&trace), vec!["a:read(1)", "b2:read(1)", "c:read(1)"]);
}

#[test]
fn torn_down_pipeline_rejects_mutation() {
    let fixture = Fixture::new();
    fixture.pipeline.add_last("a", Arc::new(Marker)).expect("a");
    fixture.pipeline.teardown();
    assert!(fixture.pipeline.is_torn_down());
    assert!(fixture.pipeline.is_empty());

    let err = fixture
        .pipeline
        .add_last("b", Arc::new(Marker))
        .expect_err("拆除后不能挂载");
    assert_eq!(err.code(), codes::PIPELINE_TORN_DOWN);
    fixture.pipeline.teardown();
}

#[test]
fn epoch_advances_with_each_published_change() {
    let fixture = Fixture::new();
    let start = fixture.pipeline.epoch();
    fixture.pipeline.add_last("a", Arc::new(Marker)).expect("a");
    fixture.pipeline.add_last("b", Arc::new(Marker)).expect("b");
    fixture.pipeline.remove("a").expect("remove");
    assert_eq!(fixture.pipeline.epoch(), start + 3);
}
