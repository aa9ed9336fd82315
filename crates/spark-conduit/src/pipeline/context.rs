use std::sync::Arc;

use super::{
    Pipeline,
    event::{InboundEvent, Message, OutboundOp},
    slot::Slot,
};
use crate::{
    error::{CoreError, Result, codes},
    executor::ExecutionContext,
    promise::Promise,
};

/// 槽位的转发上下文，只在一次回调期间有效。
///
/// # 契约说明（What）
/// - `fire_inbound`/`fire_error` 把事件交给本槽位之后（朝链尾方向）下一个具备入站能力的槽位；
/// - `fire_outbound` 把操作交给本槽位之前（朝链头方向）下一个具备出站能力的槽位，越过链头后交给传输层；
/// - 转发沿用事件开始传播时的链路快照；
/// - 槽位尚未完成挂载或已完成卸载时，转发返回 [`codes::PIPELINE_SLOT_DETACHED`]。
///
/// 上下文以借用形式交给回调，无法逃逸；需要在回调之外发起事件时，克隆 [`pipeline`](Self::pipeline)。
pub struct HandlerContext<'a> {
    pipeline: &'a Pipeline,
    chain: &'a Arc<Vec<Arc<Slot>>>,
    index: usize,
}

impl<'a> HandlerContext<'a> {
    pub(crate) fn new(pipeline: &'a Pipeline, chain: &'a Arc<Vec<Arc<Slot>>>, index: usize) -> Self {
        Self {
            pipeline,
            chain,
            index,
        }
    }

    fn slot(&self) -> &Slot {
        &self.chain[self.index]
    }

    /// 槽位名称。
    pub fn name(&self) -> &str {
        self.slot().name()
    }

    pub fn pipeline(&self) -> &Pipeline {
        self.pipeline
    }

    pub fn executor(&self) -> &Arc<dyn ExecutionContext> {
        self.pipeline.executor()
    }

    /// 槽位是否已完成卸载。
    pub fn is_removed(&self) -> bool {
        self.slot().is_removed()
    }

    pub fn fire_inbound(&self, event: InboundEvent) -> Result<()> {
        self.ensure_attached()?;
        self.pipeline
            .dispatch_inbound(self.chain, self.index + 1, event);
        Ok(())
    }

    pub fn fire_error(&self, cause: CoreError) -> Result<()> {
        self.ensure_attached()?;
        self.pipeline.dispatch_error(self.chain, self.index + 1, cause);
        Ok(())
    }

    pub fn fire_outbound(&self, op: OutboundOp, promise: Promise<()>) -> Result<()> {
        self.ensure_attached()?;
        self.pipeline
            .dispatch_outbound(self.chain, self.index, op, promise);
        Ok(())
    }

    /// 从本槽位向链头方向写出消息，返回写出结果。
    pub fn write(&self, message: Message) -> Promise<()> {
        self.outbound(OutboundOp::Write(message))
    }

    /// 从本槽位向链头方向发起关闭，返回关闭结果。
    pub fn close(&self) -> Promise<()> {
        self.outbound(OutboundOp::Close)
    }

    /// 创建绑定到本 Pipeline 执行上下文的待定结果。
    pub fn new_promise<T: Send + Sync + 'static>(&self) -> Promise<T> {
        self.pipeline.new_promise()
    }

    fn outbound(&self, op: OutboundOp) -> Promise<()> {
        let promise = self.new_promise();
        if let Err(err) = self.fire_outbound(op, promise.clone()) {
            promise.try_failure(err);
        }
        promise
    }

    fn ensure_attached(&self) -> Result<()> {
        if self.slot().is_added() {
            Ok(())
        } else {
            Err(CoreError::new(
                codes::PIPELINE_SLOT_DETACHED,
                format!("handler `{}` is not attached to the pipeline", self.name()),
            ))
        }
    }
}
