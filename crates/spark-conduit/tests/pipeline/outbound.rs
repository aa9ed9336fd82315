use std::sync::Arc;

use spark_conduit::{
    ChannelHandler, CoreError, EmbeddedExecutor, ExecutionContext, HandlerContext, InboundEvent,
    InboundHandler, Message, OutboundHandler, OutboundOp, Pipeline, Promise, Result, codes,
};

use super::support::{Fixture, OutboundProbe, Probe, entries, log};

/// 把 `u32` 写操作编码为文本。
struct Encoder;

impl ChannelHandler for Encoder {
    fn as_outbound(&self) -> Option<&dyn OutboundHandler> {
        Some(self)
    }
}

impl OutboundHandler for Encoder {
    fn on_outbound(
        &self,
        ctx: &HandlerContext<'_>,
        op: OutboundOp,
        promise: Promise<()>,
    ) -> Result<()> {
        match op {
            OutboundOp::Write(message) => match message.downcast::<u32>() {
                Ok(value) => ctx.fire_outbound(OutboundOp::write(format!("n={value}")), promise),
                Err(other) => ctx.fire_outbound(OutboundOp::Write(other), promise),
            },
            other => ctx.fire_outbound(other, promise),
        }
    }
}

/// 拒绝全部出站操作。
struct Refuse;

impl ChannelHandler for Refuse {
    fn as_outbound(&self) -> Option<&dyn OutboundHandler> {
        Some(self)
    }
}

impl OutboundHandler for Refuse {
    fn on_outbound(&self, _: &HandlerContext<'_>, _: OutboundOp, _: Promise<()>) -> Result<()> {
        Err(CoreError::new("test.refused", "write refused"))
    }
}

/// 对每个读事件回写应答。
struct Echo;

impl ChannelHandler for Echo {
    fn as_inbound(&self) -> Option<&dyn InboundHandler> {
        Some(self)
    }
}

impl InboundHandler for Echo {
    fn on_inbound(&self, ctx: &HandlerContext<'_>, event: InboundEvent) -> Result<()> {
        if let InboundEvent::Read(message) = event {
            let _reply = ctx.write(message);
        }
        Ok(())
    }
}

#[test]
fn outbound_ops_flow_tail_to_head_and_reach_the_transport() {
    let fixture = Fixture::new();
    let trace = log();
    fixture
        .pipeline
        .add_last("head-probe", OutboundProbe::new("head-probe", &trace))
        .expect("add head probe");
    fixture.pipeline.add_last("encoder", Arc::new(Encoder)).expect("add encoder");
    fixture
        .pipeline
        .add_last("tail-probe", OutboundProbe::new("tail-probe", &trace))
        .expect("add tail probe");

    let written = fixture.pipeline.write(Message::new(7u32));
    let closed = fixture.pipeline.close();
    fixture.drive();

    assert_eq!(
        entries(&trace),
        vec![
            "tail-probe:write(7)",
            "head-probe:write(\"n=7\")",
            "tail-probe:close",
            "head-probe:close",
        ]
    );
    assert_eq!(fixture.transport_ops(), vec!["write(\"n=7\")", "close"]);
    assert!(written.is_success());
    assert!(closed.is_success());
}

#[test]
fn context_write_starts_below_the_current_handler() {
    let fixture = Fixture::new();
    let trace = log();
    fixture
        .pipeline
        .add_last("below", OutboundProbe::new("below", &trace))
        .expect("add below");
    fixture.pipeline.add_last("echo", Arc::new(Echo)).expect("add echo");
    fixture
        .pipeline
        .add_last("above", OutboundProbe::new("above", &trace))
        .expect("add above");

    fixture.pipeline.fire_read(3u32);
    fixture.drive();

    assert_eq!(entries(&trace), vec!["below:write(3)"]);
    assert_eq!(fixture.transport_ops(), vec!["write(3)"]);
}

#[test]
fn missing_transport_fails_the_operation() {
    let executor = Arc::new(EmbeddedExecutor::new());
    let pipeline = Pipeline::new(executor.clone() as Arc<dyn ExecutionContext>);
    let flushed = pipeline.fire_outbound(OutboundOp::Flush);
    executor.run_pending();

    let cause = flushed.cause().expect("没有传输层时操作必须失败");
    assert_eq!(cause.code(), codes::PIPELINE_UNHANDLED_OUTBOUND);
}

#[test]
fn failing_outbound_handler_fails_the_promise_and_raises_an_exception() {
    let fixture = Fixture::new();
    let trace = log();
    fixture.pipeline.add_last("refuse", Arc::new(Refuse)).expect("add refuse");
    fixture
        .pipeline
        .add_last("watcher", Probe::forward("watcher", &trace))
        .expect("add watcher");

    let written = fixture.pipeline.write(Message::new(1u32));
    fixture.drive();

    assert_eq!(written.cause().map(|cause| cause.code()), Some("test.refused"));
    assert_eq!(entries(&trace), vec!["watcher:error(test.refused)"]);
    assert!(fixture.transport_ops().is_empty());
}

#[test]
fn shut_down_executor_fails_outbound_immediately() {
    let fixture = Fixture::new();
    fixture.executor.shutdown();
    let written = fixture.pipeline.write(Message::new(1u32));
    assert_eq!(
        written.cause().map(|cause| cause.code()),
        Some(codes::EXECUTOR_SHUT_DOWN)
    );
}
