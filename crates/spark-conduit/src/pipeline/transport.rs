use super::{Pipeline, event::OutboundOp};
use crate::promise::Promise;

/// 链头之外的传输层协作者。
///
/// 出站操作越过所有出站 Handler 后交给 `on_outbound`，实现负责执行实际 I/O 并完成 `promise`。
/// 调用发生在 Pipeline 的执行上下文内。
pub trait Transport: Send + Sync + 'static {
    fn on_outbound(&self, pipeline: &Pipeline, op: OutboundOp, promise: Promise<()>);
}
