//! 槽位、链路快照与非共享 Handler 挂载表。
//!
//! # 逻辑解析（How）
//! - [`ChainSnapshot`] 以 `ArcSwap<Vec<Arc<Slot>>>` 保存当前链路：读取方无锁拿到整条链路的 `Arc`，
//!   写入方在变更锁内构造新向量后整体替换，并递增逻辑 epoch；
//! - 事件开始传播时取一次快照，整个传播过程都在这份快照上进行；
//! - [`Slot`] 的状态机 `Pending → Added → Removed` 决定它能否接收事件：只有 `Added` 槽位会被调用，
//!   因此快照中已完成卸载的槽位被跳过。

use std::sync::{
    Arc, LazyLock,
    atomic::{AtomicU8, AtomicU64, Ordering},
};

use arc_swap::ArcSwap;
use dashmap::{DashMap, mapref::entry::Entry};

use super::handler::ChannelHandler;
use crate::error::{CoreError, Result, codes};

const PENDING: u8 = 0;
const ADDED: u8 = 1;
const REMOVED: u8 = 2;

/// 链路中的一个挂载点。
pub(crate) struct Slot {
    name: String,
    handler: Arc<dyn ChannelHandler>,
    state: AtomicU8,
}

impl Slot {
    pub(crate) fn new(name: String, handler: Arc<dyn ChannelHandler>) -> Self {
        Self {
            name,
            handler,
            state: AtomicU8::new(PENDING),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn handler(&self) -> &Arc<dyn ChannelHandler> {
        &self.handler
    }

    pub(crate) fn is_added(&self) -> bool {
        self.state.load(Ordering::Acquire) == ADDED
    }

    pub(crate) fn is_removed(&self) -> bool {
        self.state.load(Ordering::Acquire) == REMOVED
    }

    /// `Pending → Added`，返回是否完成转换。
    pub(crate) fn mark_added(&self) -> bool {
        self.state
            .compare_exchange(PENDING, ADDED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// 转换到 `Removed`，返回转换前是否处于 `Added`。
    pub(crate) fn mark_removed(&self) -> bool {
        self.state.swap(REMOVED, Ordering::AcqRel) == ADDED
    }

    pub(crate) fn holds(&self, handler: &Arc<dyn ChannelHandler>) -> bool {
        instance_key(&self.handler) == instance_key(handler)
    }
}

/// 当前链路快照与逻辑 epoch。
pub(crate) struct ChainSnapshot {
    slots: ArcSwap<Vec<Arc<Slot>>>,
    epoch: AtomicU64,
}

impl ChainSnapshot {
    pub(crate) fn new() -> Self {
        Self {
            slots: ArcSwap::from_pointee(Vec::new()),
            epoch: AtomicU64::new(0),
        }
    }

    #[inline]
    pub(crate) fn current(&self) -> Arc<Vec<Arc<Slot>>> {
        self.slots.load_full()
    }

    /// 发布新链路，返回递增后的 epoch。调用方必须持有变更锁。
    pub(crate) fn publish(&self, next: Vec<Arc<Slot>>) -> u64 {
        self.slots.store(Arc::new(next));
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    #[inline]
    pub(crate) fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }
}

/// 非共享 Handler 实例 → 持有它的 Pipeline 标识。
static ATTACHED: LazyLock<DashMap<usize, u64>> = LazyLock::new(DashMap::new);

fn instance_key(handler: &Arc<dyn ChannelHandler>) -> usize {
    Arc::as_ptr(handler) as *const () as usize
}

/// 为非共享 Handler 登记挂载；实例已被任意链路持有时失败。
pub(crate) fn claim(handler: &Arc<dyn ChannelHandler>, pipeline: u64, name: &str) -> Result<()> {
    if handler.is_sharable() {
        return Ok(());
    }
    match ATTACHED.entry(instance_key(handler)) {
        Entry::Occupied(_) => Err(CoreError::new(
            codes::PIPELINE_NOT_SHARABLE,
            format!(
                "handler for `{name}` is not sharable and is already attached to a pipeline"
            ),
        )),
        Entry::Vacant(entry) => {
            entry.insert(pipeline);
            Ok(())
        }
    }
}

/// 撤销挂载登记，仅撤销本 Pipeline 的登记。
pub(crate) fn unclaim(handler: &Arc<dyn ChannelHandler>, pipeline: u64) {
    if handler.is_sharable() {
        return;
    }
    ATTACHED.remove_if(&instance_key(handler), |_, owner| *owner == pipeline);
}

/// 持有期间保留挂载登记，丢弃时撤销。
pub(crate) struct ClaimRelease {
    handler: Arc<dyn ChannelHandler>,
    pipeline: u64,
}

impl ClaimRelease {
    pub(crate) fn new(handler: Arc<dyn ChannelHandler>, pipeline: u64) -> Self {
        Self { handler, pipeline }
    }
}

impl Drop for ClaimRelease {
    fn drop(&mut self) {
        unclaim(&self.handler, self.pipeline);
    }
}
