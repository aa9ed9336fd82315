#![deny(unsafe_code)]
#![allow(clippy::result_large_err)]
#![doc = "spark-conduit: 连接级完成通知（Promise）与事件传播链（Pipeline）核心。"]
#![doc = ""]
#![doc = "== 组成 =="]
#![doc = "1. [`promise`]：可监听的单次赋值结果，含进度变体与批量通知辅助函数；"]
#![doc = "2. [`executor`]：每连接一个的串行执行上下文契约，以及嵌入式、专用线程与 tokio 三种实现；"]
#![doc = "3. [`pipeline`]：按名称寻址的 Handler 链，入站自链头到链尾，出站自链尾到链头；"]
#![doc = "4. [`resource`]：引用计数资源的显式生命周期契约；"]
#![doc = "5. [`observability`]：诊断日志协作者，由宿主注入。"]
#![doc = ""]
#![doc = "== 线程模型 =="]
#![doc = "同一连接的监听器回调、Handler 回调与生命周期回调全部在该连接的执行上下文中串行执行；"]
#![doc = "结果的终态转换与链路变更可以从任意线程发起。"]

pub mod config;
pub mod error;
pub mod executor;
pub mod observability;
pub mod pipeline;
pub mod promise;
pub mod resource;

mod sync;

pub use config::{ConduitConfig, ConfigError, NotifierConfig, PipelineConfig};
pub use error::{CoreError, ErrorCategory, Result, codes};
pub use executor::{EmbeddedExecutor, ExecutionContext, SerialExecutor, Task};
pub use observability::{Logger, NoopLogger};
pub use pipeline::{
    ChannelHandler, HandlerContext, HandlerDescriptor, InboundEvent, InboundHandler, Message,
    OutboundHandler, OutboundOp, Pipeline, PipelineBuilder, Transport,
};
pub use promise::{ListenerId, Outcome, Promise, ProgressivePromise};
pub use resource::SharedResource;
