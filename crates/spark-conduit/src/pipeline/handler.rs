//! Handler 能力契约。
//!
//! # 契约说明（What）
//! - [`ChannelHandler`] 是挂载到槽位的基本单元，只承载生命周期回调与共享标记；
//! - 入站、出站能力通过 [`ChannelHandler::as_inbound`]、[`ChannelHandler::as_outbound`] 显式声明，
//!   未声明的能力在传播时被透明跳过；两者都不声明的 Handler 是合法的纯标记；
//! - 每个能力方法的默认实现都是“原样转发给下一个具备该能力的槽位”。
//!
//! # 风险提示（Trade-offs）
//! - Handler 可以选择不转发事件（有意吞掉）或转发变换后的事件，两者都是受支持的用法；
//! - 回调返回的错误与 panic 都会被链路捕获，并从下一个槽位开始以异常事件继续传播。

use super::{
    context::HandlerContext,
    event::{InboundEvent, OutboundOp},
};
use crate::{
    error::{CoreError, Result, codes},
    promise::Promise,
};

/// 可挂载到 Pipeline 的 Handler。
pub trait ChannelHandler: Send + Sync + 'static {
    /// 槽位挂载完成后在执行上下文中调用一次。
    fn handler_added(&self, ctx: &HandlerContext<'_>) -> Result<()> {
        let _ = ctx;
        Ok(())
    }

    /// 槽位卸载时在执行上下文中调用一次；在此之后槽位上下文失效。
    fn handler_removed(&self, ctx: &HandlerContext<'_>) -> Result<()> {
        let _ = ctx;
        Ok(())
    }

    /// 是否允许同一实例同时挂载到多个槽位或多条链路。
    fn is_sharable(&self) -> bool {
        false
    }

    fn as_inbound(&self) -> Option<&dyn InboundHandler> {
        None
    }

    fn as_outbound(&self) -> Option<&dyn OutboundHandler> {
        None
    }
}

/// 入站能力：处理入站事件与异常事件。
pub trait InboundHandler: Send + Sync {
    fn on_inbound(&self, ctx: &HandlerContext<'_>, event: InboundEvent) -> Result<()> {
        ctx.fire_inbound(event)
    }

    fn on_error(&self, ctx: &HandlerContext<'_>, cause: CoreError) -> Result<()> {
        ctx.fire_error(cause)
    }
}

/// 出站能力：处理出站操作，`promise` 是该操作的结果接收端。
pub trait OutboundHandler: Send + Sync {
    fn on_outbound(
        &self,
        ctx: &HandlerContext<'_>,
        op: OutboundOp,
        promise: Promise<()>,
    ) -> Result<()> {
        ctx.fire_outbound(op, promise)
    }
}

/// 要求 Handler 不被标记为可共享。
///
/// 持有逐连接状态的 Handler 在构造或挂载时调用，防止误标记后被多条链路复用。
pub fn ensure_not_sharable(handler: &dyn ChannelHandler) -> Result<()> {
    if handler.is_sharable() {
        return Err(CoreError::new(
            codes::PIPELINE_NOT_SHARABLE,
            "handler is marked sharable but keeps per-connection state and must not be shared",
        ));
    }
    Ok(())
}
