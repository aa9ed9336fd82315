//! 共享资源生命周期契约。
//!
//! # 契约说明（What）
//! - 句柄携带 ≥ 1 的引用计数；[`SharedResource::retain`] 递增计数并返回同一逻辑资源的新句柄；
//! - [`SharedResource::release`] 消耗句柄并递减计数，计数归零时触发确定性的清理并返回 `true`；
//! - 丢弃句柄与调用 `release` 等价；
//! - 需要在当前回调之外继续持有资源的参与方必须先 `retain`；转发句柄即转移所有权，转发方随即失去访问权。
//!
//! Pipeline 与 Promise 都不会代替 Handler 隐式 `retain`，所有权只沿着值的移动传递。
//!
//! # 风险提示（Trade-offs）
//! - `release` 以 `self` 接收，释放后继续使用在编译期被拒绝；计数下溢只可能来自实现错误，
//!   实现应在 debug 构建下以断言暴露。

/// 引用计数资源。
pub trait SharedResource: Sized {
    /// 递增引用计数，返回共享同一资源的新句柄。
    fn retain(&self) -> Self;

    /// 释放本句柄，返回资源是否因此被最终清理。
    fn release(self) -> bool;

    /// 当前引用计数，仅用于诊断。
    fn ref_count(&self) -> usize;
}

/// 释放一批句柄，返回其中触发最终清理的数量。
pub fn release_all<R, I>(handles: I) -> usize
where
    R: SharedResource,
    I: IntoIterator<Item = R>,
{
    handles
        .into_iter()
        .map(SharedResource::release)
        .filter(|freed| *freed)
        .count()
}

/// 若句柄是指定资源类型则释放，否则原样交还。
///
/// 链尾等只持有类型擦除消息的位置使用该辅助函数显式释放资源。
pub fn release_message<R>(message: crate::pipeline::Message) -> Result<bool, crate::pipeline::Message>
where
    R: SharedResource + Send + 'static,
{
    message.downcast::<R>().map(SharedResource::release)
}
