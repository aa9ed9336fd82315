//! 事件分发与链路两端的兜底处理。
//!
//! # 逻辑解析（How）
//! - 入站与异常事件自 `from`（含）向链尾查找下一个已挂载且具备入站能力的槽位；
//! - 出站操作自 `before`（不含）向链头查找下一个已挂载且具备出站能力的槽位；
//! - 回调返回错误或 panic 时，错误从出错槽位的下一个槽位作为异常事件继续传播；
//!   出站回调出错还会让该操作的结果失败；
//! - 越过链头的出站操作交给 [`Transport`](super::Transport)；没有传输层时操作结果失败；
//! - 抵达链尾的异常事件记录告警，抵达链尾的数据消息仅记录调试信息后丢弃。

use std::{
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    thread,
};

use super::{
    Pipeline,
    context::HandlerContext,
    event::{InboundEvent, OutboundOp},
    handler::{InboundHandler, OutboundHandler},
    slot::Slot,
};
use crate::{
    error::{CoreError, Result, codes, panic_message},
    observability,
    promise::Promise,
};

impl Pipeline {
    pub(crate) fn dispatch_inbound(
        &self,
        chain: &Arc<Vec<Arc<Slot>>>,
        from: usize,
        event: InboundEvent,
    ) {
        let Some((index, handler)) = next_inbound(chain, from) else {
            self.tail_inbound(event);
            return;
        };
        let ctx = HandlerContext::new(self, chain, index);
        let result = panic::catch_unwind(AssertUnwindSafe(|| handler.on_inbound(&ctx, event)));
        if let Some(err) = callback_error(result, chain[index].name()) {
            self.dispatch_error(chain, index + 1, err);
        }
    }

    pub(crate) fn dispatch_error(
        &self,
        chain: &Arc<Vec<Arc<Slot>>>,
        from: usize,
        cause: CoreError,
    ) {
        let Some((index, handler)) = next_inbound(chain, from) else {
            self.tail_error(cause);
            return;
        };
        let ctx = HandlerContext::new(self, chain, index);
        let result = panic::catch_unwind(AssertUnwindSafe(|| handler.on_error(&ctx, cause)));
        if let Some(err) = callback_error(result, chain[index].name()) {
            self.dispatch_error(chain, index + 1, err);
        }
    }

    pub(crate) fn dispatch_outbound(
        &self,
        chain: &Arc<Vec<Arc<Slot>>>,
        before: usize,
        op: OutboundOp,
        promise: Promise<()>,
    ) {
        let Some((index, handler)) = next_outbound(chain, before) else {
            self.head_outbound(op, promise);
            return;
        };
        let ctx = HandlerContext::new(self, chain, index);
        let sink = promise.clone();
        let result =
            panic::catch_unwind(AssertUnwindSafe(|| handler.on_outbound(&ctx, op, sink)));
        if let Some(err) = callback_error(result, chain[index].name()) {
            promise.try_failure(err.clone());
            self.dispatch_error(chain, index + 1, err);
        }
    }

    fn head_outbound(&self, op: OutboundOp, promise: Promise<()>) {
        let Some(transport) = self.inner.transport.as_ref() else {
            promise.try_failure(CoreError::new(
                codes::PIPELINE_UNHANDLED_OUTBOUND,
                format!(
                    "outbound `{}` reached the head of the pipeline without a transport",
                    op.kind()
                ),
            ));
            return;
        };
        let sink = promise.clone();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            transport.on_outbound(self, op, sink);
            Ok(())
        }));
        if let Some(err) = callback_error(result, "transport") {
            promise.try_failure(err.clone());
            let chain = self.inner.chain.current();
            self.dispatch_error(&chain, 0, err);
        }
    }

    fn tail_inbound(&self, event: InboundEvent) {
        let Some(logger) = self.logger() else {
            return;
        };
        match &event {
            InboundEvent::Read(message) | InboundEvent::User(message) => logger.debug(&format!(
                "discarded a `{}` event carrying {} that reached the tail of the pipeline",
                event.kind(),
                message.type_name()
            )),
            _ => {}
        }
    }

    fn tail_error(&self, cause: CoreError) {
        observability::warn(
            self.logger(),
            "an exception event reached the tail of the pipeline without being handled",
            Some(&cause),
        );
        if self.config().pipeline.close_on_unhandled_exception {
            let _closing = self.close();
        }
    }
}

fn next_inbound(chain: &[Arc<Slot>], from: usize) -> Option<(usize, &dyn InboundHandler)> {
    chain
        .iter()
        .enumerate()
        .skip(from)
        .filter(|(_, slot)| slot.is_added())
        .find_map(|(index, slot)| slot.handler().as_inbound().map(|handler| (index, handler)))
}

fn next_outbound(chain: &[Arc<Slot>], before: usize) -> Option<(usize, &dyn OutboundHandler)> {
    let end = before.min(chain.len());
    chain[..end]
        .iter()
        .enumerate()
        .rev()
        .filter(|(_, slot)| slot.is_added())
        .find_map(|(index, slot)| slot.handler().as_outbound().map(|handler| (index, handler)))
}

/// 把回调结果折叠为需要继续传播的错误。
pub(super) fn callback_error(result: thread::Result<Result<()>>, name: &str) -> Option<CoreError> {
    match result {
        Ok(Ok(())) => None,
        Ok(Err(err)) => Some(err),
        Err(payload) => Some(CoreError::new(
            codes::PIPELINE_HANDLER_PANICKED,
            format!("handler `{name}` panicked: {}", panic_message(payload.as_ref())),
        )),
    }
}
