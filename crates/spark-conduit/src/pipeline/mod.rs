//! 事件传播链（Pipeline）。
//!
//! # 契约说明（What）
//! - 一条 Pipeline 绑定一个连接与一个执行上下文，由按名称寻址的有序槽位组成；
//! - 入站事件自链头流向链尾，出站操作自链尾流向链头并最终交给 [`Transport`]；
//! - 不具备对应能力的槽位被透明跳过；Handler 可以吞掉事件，也可以转发变换后的事件；
//! - 回调的错误或 panic 被转换为异常事件，从出错槽位的下一个槽位继续向链尾传播；
//!   抵达链尾仍未被处理的异常会被记录，并可按配置发起关闭；
//! - 名称重复、重复挂载非共享 Handler、在已拆除的链路上变更，都在变更调用处同步返回配置错误。
//!
//! # 逻辑解析（How）
//! - 变更操作在 `spin::Mutex` 保护下复制当前链路、修改、整体发布新快照并递增 epoch；
//! - 事件在执行上下文内开始传播时取得快照，后续转发都基于这份快照：
//!   传播途中新增的槽位不会被本次事件访问，传播途中完成卸载的槽位会被跳过；
//! - `handler_added`、`handler_removed` 与事件分发一样在执行上下文中执行：
//!   调用方已在上下文内时内联执行，否则投递。

mod context;
mod dispatch;
mod event;
mod handler;
mod slot;
mod transport;

pub use context::HandlerContext;
pub use event::{InboundEvent, Message, OutboundOp};
pub use handler::{ChannelHandler, InboundHandler, OutboundHandler, ensure_not_sharable};
pub use transport::Transport;

use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use slot::{ChainSnapshot, Slot};

use crate::{
    config::ConduitConfig,
    error::{CoreError, Result, codes},
    executor::ExecutionContext,
    observability::{self, Logger},
    promise::Promise,
};

static NEXT_PIPELINE_ID: AtomicU64 = AtomicU64::new(1);

type Chain = Arc<Vec<Arc<Slot>>>;

struct Inner {
    id: u64,
    executor: Arc<dyn ExecutionContext>,
    logger: Option<Arc<dyn Logger>>,
    transport: Option<Arc<dyn Transport>>,
    config: ConduitConfig,
    chain: ChainSnapshot,
    mutation: spin::Mutex<()>,
    torn_down: AtomicBool,
}

impl Drop for Inner {
    fn drop(&mut self) {
        for slot in self.chain.current().iter() {
            slot::unclaim(slot.handler(), self.id);
        }
    }
}

/// Pipeline 句柄，可廉价克隆。
///
/// Handler 若持有自身所在 Pipeline 的句柄会形成引用环，需要在 `handler_removed` 中主动释放。
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<Inner>,
}

/// Pipeline 构造器。
pub struct PipelineBuilder {
    executor: Arc<dyn ExecutionContext>,
    logger: Option<Arc<dyn Logger>>,
    transport: Option<Arc<dyn Transport>>,
    config: ConduitConfig,
}

impl PipelineBuilder {
    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn config(mut self, config: ConduitConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Pipeline {
        Pipeline {
            inner: Arc::new(Inner {
                id: NEXT_PIPELINE_ID.fetch_add(1, Ordering::Relaxed),
                executor: self.executor,
                logger: self.logger,
                transport: self.transport,
                config: self.config,
                chain: ChainSnapshot::new(),
                mutation: spin::Mutex::new(()),
                torn_down: AtomicBool::new(false),
            }),
        }
    }
}

/// 槽位的只读描述。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandlerDescriptor {
    pub name: String,
    pub inbound: bool,
    pub outbound: bool,
    pub sharable: bool,
}

enum Position<'a> {
    First,
    Last,
    Before(&'a str),
    After(&'a str),
}

impl Pipeline {
    /// 以默认配置创建没有传输层、不输出诊断的 Pipeline。
    pub fn new(executor: Arc<dyn ExecutionContext>) -> Self {
        Self::builder(executor).build()
    }

    pub fn builder(executor: Arc<dyn ExecutionContext>) -> PipelineBuilder {
        PipelineBuilder {
            executor,
            logger: None,
            transport: None,
            config: ConduitConfig::default(),
        }
    }

    pub fn executor(&self) -> &Arc<dyn ExecutionContext> {
        &self.inner.executor
    }

    pub fn config(&self) -> &ConduitConfig {
        &self.inner.config
    }

    pub(crate) fn logger(&self) -> Option<&dyn Logger> {
        self.inner.logger.as_deref()
    }

    /// 创建绑定到本 Pipeline 执行上下文与日志的待定结果。
    pub fn new_promise<T: Send + Sync + 'static>(&self) -> Promise<T> {
        Promise::with_options(
            Arc::clone(&self.inner.executor),
            self.inner.logger.clone(),
            self.inner.config.notifier,
        )
    }

    pub fn add_first(&self, name: impl Into<String>, handler: Arc<dyn ChannelHandler>) -> Result<()> {
        self.insert(Position::First, name.into(), handler)
    }

    pub fn add_last(&self, name: impl Into<String>, handler: Arc<dyn ChannelHandler>) -> Result<()> {
        self.insert(Position::Last, name.into(), handler)
    }

    /// 插入到名为 `anchor` 的槽位之前（链头一侧）。
    pub fn add_before(
        &self,
        anchor: &str,
        name: impl Into<String>,
        handler: Arc<dyn ChannelHandler>,
    ) -> Result<()> {
        self.insert(Position::Before(anchor), name.into(), handler)
    }

    /// 插入到名为 `anchor` 的槽位之后（链尾一侧）。
    pub fn add_after(
        &self,
        anchor: &str,
        name: impl Into<String>,
        handler: Arc<dyn ChannelHandler>,
    ) -> Result<()> {
        self.insert(Position::After(anchor), name.into(), handler)
    }

    /// 按名称卸载槽位，返回其 Handler。
    pub fn remove(&self, name: &str) -> Result<Arc<dyn ChannelHandler>> {
        self.detach(|current| position_of(current, name))
    }

    /// 按实例卸载槽位；可共享实例挂载在多个槽位时卸载最靠近链头的一个。
    pub fn remove_handler(&self, handler: &Arc<dyn ChannelHandler>) -> Result<()> {
        self.detach(|current| {
            current
                .iter()
                .position(|slot| slot.holds(handler))
                .ok_or_else(|| {
                    CoreError::new(
                        codes::PIPELINE_HANDLER_NOT_FOUND,
                        "handler instance is not attached to this pipeline",
                    )
                })
        })
        .map(|_| ())
    }

    /// 以新 Handler 原位替换名为 `old` 的槽位，返回被替换的 Handler。
    pub fn replace(
        &self,
        old: &str,
        name: impl Into<String>,
        handler: Arc<dyn ChannelHandler>,
    ) -> Result<Arc<dyn ChannelHandler>> {
        let name = name.into();
        let (replaced, added, before, index) = {
            let _guard = self.inner.mutation.lock();
            self.ensure_live()?;
            let current = self.inner.chain.current();
            let index = position_of(&current, old)?;
            if name != old && current.iter().any(|slot| slot.name() == name) {
                return Err(duplicate_name(&name));
            }
            slot::claim(&handler, self.inner.id, &name)?;
            let added = Arc::new(Slot::new(name, handler));
            let mut next = current.as_ref().clone();
            let replaced = std::mem::replace(&mut next[index], Arc::clone(&added));
            self.inner.chain.publish(next);
            (replaced, added, current, index)
        };
        let handler = Arc::clone(replaced.handler());
        self.schedule_added(added);
        self.schedule_removed(replaced, before, index);
        Ok(handler)
    }

    /// 拆除链路：自链尾向链头卸载全部槽位，之后的变更返回 [`codes::PIPELINE_TORN_DOWN`]。
    pub fn teardown(&self) {
        let before = {
            let _guard = self.inner.mutation.lock();
            if self.inner.torn_down.swap(true, Ordering::AcqRel) {
                return;
            }
            let current = self.inner.chain.current();
            self.inner.chain.publish(Vec::new());
            current
        };
        for index in (0..before.len()).rev() {
            self.schedule_removed(Arc::clone(&before[index]), Arc::clone(&before), index);
        }
    }

    pub fn is_torn_down(&self) -> bool {
        self.inner.torn_down.load(Ordering::Acquire)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ChannelHandler>> {
        self.inner
            .chain
            .current()
            .iter()
            .find(|slot| slot.name() == name)
            .map(|slot| Arc::clone(slot.handler()))
    }

    /// 自链头到链尾的槽位名称。
    pub fn names(&self) -> Vec<String> {
        self.inner
            .chain
            .current()
            .iter()
            .map(|slot| slot.name().to_owned())
            .collect()
    }

    pub fn describe(&self) -> Vec<HandlerDescriptor> {
        self.inner
            .chain
            .current()
            .iter()
            .map(|slot| {
                let handler = slot.handler();
                HandlerDescriptor {
                    name: slot.name().to_owned(),
                    inbound: handler.as_inbound().is_some(),
                    outbound: handler.as_outbound().is_some(),
                    sharable: handler.is_sharable(),
                }
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.chain.current().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 链路变更的逻辑时钟，每次发布新快照递增一次。
    pub fn epoch(&self) -> u64 {
        self.inner.chain.epoch()
    }

    /// 自链头发起入站事件。
    pub fn fire_inbound(&self, event: InboundEvent) {
        let this = self.clone();
        let submitted = self.run_in_context(move || {
            let chain = this.inner.chain.current();
            this.dispatch_inbound(&chain, 0, event);
        });
        if let Err(err) = submitted {
            observability::warn(self.logger(), "failed to submit an inbound event", Some(&err));
        }
    }

    /// 自链头发起 `Read` 事件。
    pub fn fire_read<T: std::any::Any + Send>(&self, payload: T) {
        self.fire_inbound(InboundEvent::read(payload));
    }

    /// 自链头发起异常事件。
    pub fn fire_error(&self, cause: CoreError) {
        let this = self.clone();
        let submitted = self.run_in_context(move || {
            let chain = this.inner.chain.current();
            this.dispatch_error(&chain, 0, cause);
        });
        if let Err(err) = submitted {
            observability::warn(self.logger(), "failed to submit an exception event", Some(&err));
        }
    }

    /// 自链尾发起出站操作，返回操作结果。
    pub fn fire_outbound(&self, op: OutboundOp) -> Promise<()> {
        let promise = self.new_promise();
        let this = self.clone();
        let sink = promise.clone();
        let submitted = self.run_in_context(move || {
            let chain = this.inner.chain.current();
            this.dispatch_outbound(&chain, chain.len(), op, sink);
        });
        if let Err(err) = submitted {
            promise.try_failure(err);
        }
        promise
    }

    pub fn write(&self, message: Message) -> Promise<()> {
        self.fire_outbound(OutboundOp::Write(message))
    }

    pub fn close(&self) -> Promise<()> {
        self.fire_outbound(OutboundOp::Close)
    }

    /// 在变更锁内定位并摘除一个槽位，随后调度其 `handler_removed`。
    fn detach(
        &self,
        locate: impl FnOnce(&[Arc<Slot>]) -> Result<usize>,
    ) -> Result<Arc<dyn ChannelHandler>> {
        let (slot, before, index) = {
            let _guard = self.inner.mutation.lock();
            let current = self.inner.chain.current();
            let index = locate(current.as_slice())?;
            let mut next = current.as_ref().clone();
            let slot = next.remove(index);
            self.inner.chain.publish(next);
            (slot, current, index)
        };
        let handler = Arc::clone(slot.handler());
        self.schedule_removed(slot, before, index);
        Ok(handler)
    }

    fn insert(
        &self,
        position: Position<'_>,
        name: String,
        handler: Arc<dyn ChannelHandler>,
    ) -> Result<()> {
        let added = {
            let _guard = self.inner.mutation.lock();
            self.ensure_live()?;
            let current = self.inner.chain.current();
            if current.iter().any(|slot| slot.name() == name) {
                return Err(duplicate_name(&name));
            }
            let index = match position {
                Position::First => 0,
                Position::Last => current.len(),
                Position::Before(anchor) => position_of(&current, anchor)?,
                Position::After(anchor) => position_of(&current, anchor)? + 1,
            };
            slot::claim(&handler, self.inner.id, &name)?;
            let added = Arc::new(Slot::new(name, handler));
            let mut next = current.as_ref().clone();
            next.insert(index, Arc::clone(&added));
            self.inner.chain.publish(next);
            added
        };
        self.schedule_added(added);
        Ok(())
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_torn_down() {
            return Err(CoreError::new(
                codes::PIPELINE_TORN_DOWN,
                "pipeline has been torn down",
            ));
        }
        Ok(())
    }

    /// 已在上下文内时内联执行，否则投递。
    fn run_in_context(&self, task: impl FnOnce() + Send + 'static) -> Result<()> {
        if self.inner.executor.in_context() {
            task();
            return Ok(());
        }
        self.inner.executor.submit(Box::new(task))
    }

    fn schedule_added(&self, slot: Arc<Slot>) {
        let this = self.clone();
        if let Err(err) = self.run_in_context(move || this.call_handler_added(&slot)) {
            observability::warn(self.logger(), "failed to schedule handler_added", Some(&err));
        }
    }

    /// 挂载登记随任务一起移动：任务执行完 `handler_removed` 后撤销，任务未被执行而被丢弃时同样撤销。
    fn schedule_removed(&self, slot: Arc<Slot>, chain: Chain, index: usize) {
        let this = self.clone();
        let claim = slot::ClaimRelease::new(Arc::clone(slot.handler()), self.inner.id);
        if let Err(err) =
            self.run_in_context(move || this.call_handler_removed(&slot, &chain, index, claim))
        {
            observability::warn(self.logger(), "failed to schedule handler_removed", Some(&err));
        }
    }

    fn call_handler_added(&self, slot: &Arc<Slot>) {
        if !slot.mark_added() {
            return;
        }
        let current = self.inner.chain.current();
        let (chain, index) = match current.iter().position(|entry| Arc::ptr_eq(entry, slot)) {
            Some(index) => (current, index),
            None => (Arc::new(vec![Arc::clone(slot)]), 0),
        };
        let ctx = HandlerContext::new(self, &chain, index);
        let result = panic::catch_unwind(AssertUnwindSafe(|| slot.handler().handler_added(&ctx)));
        let Some(cause) = dispatch::callback_error(result, slot.name()) else {
            return;
        };
        let err = CoreError::new(
            codes::PIPELINE_HANDLER_ADDED_FAILED,
            format!(
                "handler `{}` failed in handler_added and was removed",
                slot.name()
            ),
        )
        .with_cause(cause);
        {
            let _guard = self.inner.mutation.lock();
            let latest = self.inner.chain.current();
            if latest.iter().any(|entry| Arc::ptr_eq(entry, slot)) {
                let next = latest
                    .iter()
                    .filter(|entry| !Arc::ptr_eq(entry, slot))
                    .cloned()
                    .collect();
                self.inner.chain.publish(next);
            }
        }
        let claim = slot::ClaimRelease::new(Arc::clone(slot.handler()), self.inner.id);
        self.call_handler_removed(slot, &chain, index, claim);
        let latest = self.inner.chain.current();
        self.dispatch_error(&latest, 0, err);
    }

    /// `claim` 在槽位进入 `Removed` 之后才释放，此前实例不能挂载到其他链路。
    fn call_handler_removed(
        &self,
        slot: &Arc<Slot>,
        chain: &Chain,
        index: usize,
        claim: slot::ClaimRelease,
    ) {
        if !slot.is_added() {
            slot.mark_removed();
            drop(claim);
            return;
        }
        let ctx = HandlerContext::new(self, chain, index);
        let result =
            panic::catch_unwind(AssertUnwindSafe(|| slot.handler().handler_removed(&ctx)));
        slot.mark_removed();
        drop(claim);
        if let Some(err) = dispatch::callback_error(result, slot.name()) {
            let latest = self.inner.chain.current();
            self.dispatch_error(&latest, 0, err);
        }
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("id", &self.inner.id)
            .field("handlers", &self.names())
            .field("epoch", &self.epoch())
            .field("torn_down", &self.is_torn_down())
            .finish()
    }
}

fn position_of(chain: &[Arc<Slot>], name: &str) -> Result<usize> {
    chain
        .iter()
        .position(|slot| slot.name() == name)
        .ok_or_else(|| {
            CoreError::new(
                codes::PIPELINE_HANDLER_NOT_FOUND,
                format!("no handler named `{name}` in the pipeline"),
            )
        })
}

fn duplicate_name(name: &str) -> CoreError {
    CoreError::new(
        codes::PIPELINE_DUPLICATE_NAME,
        format!("handler name `{name}` already exists in the pipeline"),
    )
}
