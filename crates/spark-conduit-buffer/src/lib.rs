//! `spark-conduit-buffer` 提供实现 [`SharedResource`](spark_conduit::SharedResource) 契约的字节缓冲。
//!
//! # 模块定位（Why）
//! - Pipeline 与 Promise 只消费引用计数契约，不落地具体资源；本 crate 给出基于 `bytes` 的参考实现，
//!   供传输层与编解码 Handler 在链路中传递字节；
//! - 最终释放时通过 [`BufferRecycler`] 通知所有者，所有者可以复用底层内存或仅更新统计。
//!
//! # 设计概要（How）
//! - [`CountedBuf`] 的每个句柄持有一个只读 `Bytes` 视图，所有句柄共享同一租约与逻辑计数；
//! - 句柄以值语义移动：转发即转让，需要在回调之外保留时显式 `retain`；
//! - 丢弃句柄等价于 `release`。

mod counted_buf;

pub use counted_buf::{BUFFER_OUT_OF_BOUNDS, BufferRecycler, CountedBuf, ReclaimedBuffer};
