use std::{
    fmt, mem,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use bytes::{Bytes, BytesMut};
use spark_conduit::{CoreError, Result, SharedResource};

/// 越界拆分的错误码。
pub const BUFFER_OUT_OF_BOUNDS: &str = "buffer.out_of_bounds";

/// 缓冲最终释放时的回收入口。
///
/// # 契约说明（What）
/// - 同一租约的所有句柄释放后，`reclaim` 恰好被调用一次；
/// - 实现必须线程安全且不得 panic：调用可能发生在任意线程的 `Drop` 路径上。
pub trait BufferRecycler: Send + Sync + 'static {
    fn reclaim(&self, reclaimed: ReclaimedBuffer);
}

/// 一次回收携带的上下文。
///
/// `buffer` 仅在最后一个句柄独占底层内存时为 `Some`；若仍有 [`CountedBuf::duplicate`]
/// 产生的视图存活，只能回收容量统计。
#[derive(Debug)]
pub struct ReclaimedBuffer {
    capacity: usize,
    buffer: Option<BytesMut>,
}

impl ReclaimedBuffer {
    pub fn new(capacity: usize, buffer: Option<BytesMut>) -> Self {
        Self { capacity, buffer }
    }

    /// 租约创建时的容量。
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 取回可复用的内存块，未能夺回时为 `None`。
    pub fn into_buffer(self) -> Option<BytesMut> {
        self.buffer
    }
}

struct Unpooled;

impl BufferRecycler for Unpooled {
    fn reclaim(&self, _reclaimed: ReclaimedBuffer) {}
}

struct Lease {
    recycler: Arc<dyn BufferRecycler>,
    capacity: usize,
    refs: AtomicUsize,
}

/// 引用计数的只读字节缓冲。
///
/// # 契约说明（What）
/// - 新建句柄计数为 1；[`retain`](SharedResource::retain) 与 [`retained_duplicate`](Self::retained_duplicate)
///   递增计数，[`split_to`](Self::split_to) 产生的前缀同样是独立计数的句柄；
/// - [`release`](SharedResource::release) 与 `Drop` 各递减一次，归零时调用回收器；
/// - 计数下溢在 debug 构建下触发断言。
///
/// # 风险提示（Trade-offs）
/// - 计数是逻辑计数，与 `Bytes` 内部的引用计数相互独立：[`duplicate`](Self::duplicate) 返回的视图
///   不计入逻辑计数，它会让内存存活到视图丢弃，但不会推迟回收通知。
pub struct CountedBuf {
    view: Bytes,
    lease: Arc<Lease>,
    released: bool,
}

impl CountedBuf {
    /// 以 `inner` 的当前内容创建句柄，租约容量取 `inner.capacity()`。
    pub fn new(inner: BytesMut, recycler: Arc<dyn BufferRecycler>) -> Self {
        let capacity = inner.capacity();
        Self {
            view: inner.freeze(),
            lease: Arc::new(Lease {
                recycler,
                capacity,
                refs: AtomicUsize::new(1),
            }),
            released: false,
        }
    }

    /// 引用静态数据、无需回收的句柄。
    pub fn from_static(data: &'static [u8]) -> Self {
        Self::from_bytes(Bytes::from_static(data), Arc::new(Unpooled))
    }

    fn from_bytes(view: Bytes, recycler: Arc<dyn BufferRecycler>) -> Self {
        Self {
            lease: Arc::new(Lease {
                recycler,
                capacity: view.len(),
                refs: AtomicUsize::new(1),
            }),
            view,
            released: false,
        }
    }

    fn share(&self, view: Bytes) -> Self {
        self.lease.refs.fetch_add(1, Ordering::Relaxed);
        Self {
            view,
            lease: Arc::clone(&self.lease),
            released: false,
        }
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.view
    }

    pub fn len(&self) -> usize {
        self.view.len()
    }

    pub fn is_empty(&self) -> bool {
        self.view.is_empty()
    }

    /// 不计入引用计数的零拷贝视图。
    pub fn duplicate(&self) -> Bytes {
        self.view.clone()
    }

    /// 计入引用计数的零拷贝副本，等价于 `retain`。
    pub fn retained_duplicate(&self) -> Self {
        self.share(self.view.clone())
    }

    /// 拆出前 `len` 字节作为新句柄，本句柄保留剩余部分。
    pub fn split_to(&mut self, len: usize) -> Result<Self> {
        if len > self.view.len() {
            return Err(CoreError::new(
                BUFFER_OUT_OF_BOUNDS,
                format!(
                    "cannot split {len} bytes from a buffer of {} bytes",
                    self.view.len()
                ),
            ));
        }
        let prefix = self.view.split_to(len);
        Ok(self.share(prefix))
    }

    fn release_ref(&mut self) -> bool {
        if mem::replace(&mut self.released, true) {
            return false;
        }
        let view = mem::take(&mut self.view);
        let previous = self.lease.refs.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "CountedBuf 引用计数下溢");
        if previous != 1 {
            return false;
        }
        let buffer = view.try_into_mut().ok().map(|mut buffer| {
            buffer.clear();
            buffer
        });
        self.lease
            .recycler
            .reclaim(ReclaimedBuffer::new(self.lease.capacity, buffer));
        true
    }
}

impl SharedResource for CountedBuf {
    fn retain(&self) -> Self {
        self.retained_duplicate()
    }

    fn release(mut self) -> bool {
        self.release_ref()
    }

    fn ref_count(&self) -> usize {
        self.lease.refs.load(Ordering::Acquire)
    }
}

impl Drop for CountedBuf {
    fn drop(&mut self) {
        self.release_ref();
    }
}

impl AsRef<[u8]> for CountedBuf {
    fn as_ref(&self) -> &[u8] {
        &self.view
    }
}

impl fmt::Debug for CountedBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CountedBuf")
            .field("len", &self.view.len())
            .field("ref_count", &self.ref_count())
            .finish()
    }
}
