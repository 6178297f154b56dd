use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use bytes::BytesMut;
use spin::Mutex;

/// `BufferRecycler` 描述分配器在租约结束时的回收入口。
///
/// # 设计初衷（Why）
/// - [`BufferAllocator`](super::BufferAllocator) 只负责“租借”侧，池化实现还需要知道
///   存储何时真正空闲；
/// - 回收动作统一放在租约的 `Drop` 中，调用方无需手动归还，避免统计漂移。
///
/// # 契约定义（What）
/// - 同一租约上的所有视图（保留副本、切片）全部销毁后，`reclaim` 恰好被调用一次；
/// - **前置条件**：实现必须线程安全且不得 panic，`Drop` 路径上的 panic 会终止进程。
pub trait BufferRecycler: Send + Sync + 'static {
    /// 通知分配器回收一次租约。
    fn reclaim(&self, reclaimed: ReclaimedBuffer);
}

/// 一次回收动作携带的上下文。
///
/// - `capacity`：租约最终记录的容量，保证池侧统计一致；
/// - `buffer`：若成功夺回底层 `BytesMut` 所有权则为 `Some`，仍有别名存活时为 `None`，
///   池端据此决定复用内存还是仅更新统计。
#[derive(Debug)]
pub struct ReclaimedBuffer {
    capacity: usize,
    buffer: Option<BytesMut>,
}

impl ReclaimedBuffer {
    /// 创建回收上下文。
    pub fn new(capacity: usize, buffer: Option<BytesMut>) -> Self {
        Self { capacity, buffer }
    }

    /// 本次回收的容量。
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 消耗结构并返回可复用的 `BytesMut`。
    pub fn into_buffer(self) -> Option<BytesMut> {
        self.buffer
    }
}

/// `Lease` 是 `ByteBuf` 存活计数的载体。
///
/// # 角色定位（Why）
/// - 保留副本与组合分段需要“最后一个持有者释放存储”的语义，`Arc` 的强引用计数
///   天然表达这一点，因此缓冲的存活计数直接取自 `Arc::strong_count`；
/// - 回收钩子放在 `Drop` 中，借助 `Arc` 自动判定最后一个持有者。
///
/// # 结构设计（How）
/// - `recycler`：池化分配器注入的回收句柄，堆分配缓冲为 `None`；
/// - `capacity`：原子记录容量，扩容后刷新；
/// - `storage`：首个成功夺回的 `BytesMut`，等待最终回收。
pub(crate) struct Lease {
    recycler: Option<Arc<dyn BufferRecycler>>,
    capacity: AtomicUsize,
    storage: Mutex<Option<BytesMut>>,
}

impl Lease {
    pub(crate) fn new(capacity: usize, recycler: Option<Arc<dyn BufferRecycler>>) -> Arc<Self> {
        Arc::new(Self {
            recycler,
            capacity: AtomicUsize::new(capacity),
            storage: Mutex::new(None),
        })
    }

    /// 是否需要在视图销毁时尝试夺回底层存储。
    pub(crate) fn wants_storage(&self) -> bool {
        self.recycler.is_some()
    }

    pub(crate) fn update_capacity(&self, capacity: usize) {
        self.capacity.store(capacity, Ordering::Relaxed);
    }

    pub(crate) fn store_buffer(&self, buffer: Option<BytesMut>) {
        if let Some(buf) = buffer {
            let mut slot = self.storage.lock();
            if slot.is_none() {
                *slot = Some(buf);
            }
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(recycler) = self.recycler.take() {
            let capacity = self.capacity.load(Ordering::Relaxed);
            let buffer = self.storage.lock().take();
            recycler.reclaim(ReclaimedBuffer::new(capacity, buffer));
        }
    }
}

/// `BufProbe` 是对缓冲存活计数的弱观察者。
///
/// # 设计背景（Why）
/// - 缓冲所有权按移动语义流转，交出所有权后调用方无法再读取其存活计数；
/// - 释放路径（解码器卸载、累积失败）恰恰需要在所有权离开后验证“是否真的归零”，
///   探针持有 `Weak` 引用，既不延长生命周期又能读取计数。
///
/// # 契约说明（What）
/// - [`BufProbe::ref_cnt`] 返回当前仍存活的视图数量，全部释放后为 0；
/// - 探针本身不参与计数，可在任意线程读取。
#[derive(Clone)]
pub struct BufProbe {
    lease: Weak<Lease>,
}

impl BufProbe {
    pub(crate) fn new(lease: &Arc<Lease>) -> Self {
        Self {
            lease: Arc::downgrade(lease),
        }
    }

    /// 已释放缓冲对应的探针。
    pub(crate) fn released() -> Self {
        Self { lease: Weak::new() }
    }

    /// 当前存活计数。
    pub fn ref_cnt(&self) -> usize {
        self.lease.strong_count()
    }

    /// 存储是否已经释放。
    pub fn is_released(&self) -> bool {
        self.ref_cnt() == 0
    }
}

impl fmt::Debug for BufProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufProbe")
            .field("ref_cnt", &self.ref_cnt())
            .finish()
    }
}
