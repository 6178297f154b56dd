use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use bytes::BytesMut;
use spin::Mutex;

use spark_core::buffer::{BufferAllocator, BufferError, BufferRecycler, ByteBuf, ReclaimedBuffer};

/// `SlabBufferPool` 提供基于自由链表（Free List）的缓冲池，复用 `BytesMut` 以减少堆分配次数。
///
/// # 模块角色（Why）
/// - 作为 [`BufferAllocator`] 的池化实现，供累积器扩容与解码步骤申请缓冲；
/// - 借助 `ByteBuf` 租约的回收钩子，在最后一个视图销毁时自动归还存储，调用方无需关注回收细节；
/// - 可选的驻留上限让分配失败路径可以被真实触发，用于验证上层的异常安全。
///
/// # 核心机制（How）
/// - 内部维护 `spin::Mutex<Vec<BytesMut>>` 作为自由链表，租借时优先复用足够大的块；
/// - `PoolMetrics` 通过原子计数跟踪 `allocated_bytes`、`available_bytes`、`active_leases` 等指标，
///   支撑 [`SlabBufferPool::stats`] 快照；
/// - `BufferRecycler` 实现中使用 `ReclaimedBuffer` 获取回收上下文，既更新统计也将 `BytesMut` 放回链表。
///
/// # 契约说明（What）
/// - **线程安全**：共享状态均由 `spin::Mutex` 与原子计数保护，满足 `Send + Sync + 'static`；
/// - **后置条件**：`allocate` 返回的缓冲满足 `writable_bytes() >= min_capacity`；
/// - **失败语义**：设置驻留上限后，新分配会使驻留字节超限时返回
///   [`BufferError::AllocationFailed`]，并累加 `failed_acquisitions`。
///
/// # 设计权衡（Trade-offs）
/// - 使用自旋锁而非阻塞锁：临界区只有一次线性查找与 `Vec` 操作，持锁时间极短；
/// - 回收时若无法夺回 `BytesMut`（仍有只读切片别名存活），仅更新统计，下次租借重新分配；
/// - `shrink_to_fit` 采取“清空自由链表”的简单策略，便于在压测后快速归还峰值内存。
#[derive(Clone)]
pub struct SlabBufferPool {
    inner: Arc<PoolInner>,
}

/// 池统计快照。
///
/// - `allocated_bytes`：累计向堆申请且尚未丢失的字节数；
/// - `resident_bytes`：当前由池持有（租借中 + 自由链表）的字节数；
/// - `available_bytes`：自由链表中可直接复用的字节数；
/// - `active_leases`：尚未归还的租约数，连接收尾后应为 0；
/// - `failed_acquisitions`：因驻留上限被拒绝的分配次数；
/// - `free_slots`：自由链表长度。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub allocated_bytes: usize,
    pub resident_bytes: usize,
    pub available_bytes: usize,
    pub active_leases: usize,
    pub failed_acquisitions: u64,
    pub free_slots: usize,
}

impl Default for SlabBufferPool {
    fn default() -> Self {
        Self {
            inner: Arc::new(PoolInner::new(None)),
        }
    }
}

impl SlabBufferPool {
    /// 创建不限驻留字节的空池。
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建驻留字节不超过 `max_resident_bytes` 的空池。
    pub fn with_max_resident_bytes(max_resident_bytes: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner::new(Some(max_resident_bytes))),
        }
    }

    /// 读取统计快照。
    pub fn stats(&self) -> PoolStats {
        self.inner.snapshot()
    }

    /// 清空自由链表，返回归还给系统的字节数。
    pub fn shrink_to_fit(&self) -> usize {
        self.inner.shrink_free_list()
    }
}

impl BufferAllocator for SlabBufferPool {
    fn allocate(&self, min_capacity: usize) -> Result<ByteBuf, BufferError> {
        let raw = self.inner.acquire_buffer(min_capacity)?;
        let recycler: Arc<dyn BufferRecycler> = self.inner.clone();
        Ok(ByteBuf::pooled(raw, recycler))
    }
}

struct PoolInner {
    free_list: Mutex<Vec<BytesMut>>,
    metrics: PoolMetrics,
    max_resident_bytes: Option<usize>,
}

impl PoolInner {
    fn new(max_resident_bytes: Option<usize>) -> Self {
        Self {
            free_list: Mutex::new(Vec::new()),
            metrics: PoolMetrics::default(),
            max_resident_bytes,
        }
    }

    /// 从自由链表或堆上获取一个满足容量的 `BytesMut`。
    fn acquire_buffer(&self, min_capacity: usize) -> Result<BytesMut, BufferError> {
        let reused = {
            let mut list = self.free_list.lock();
            list.iter()
                .position(|buf| buf.capacity() >= min_capacity)
                .map(|index| list.swap_remove(index))
        };

        let mut buffer = match reused {
            Some(buf) => {
                self.metrics.decrease_available(buf.capacity());
                buf
            }
            None => {
                if let Some(limit) = self.max_resident_bytes {
                    let resident = self.metrics.resident_bytes.load(Ordering::Relaxed);
                    if resident + min_capacity > limit {
                        self.metrics
                            .failed_acquisitions
                            .fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(
                            requested = min_capacity,
                            resident,
                            limit,
                            "slab pool refused allocation"
                        );
                        return Err(BufferError::allocation_failed(
                            min_capacity,
                            "slab pool resident limit reached",
                        ));
                    }
                }
                let buf = BytesMut::with_capacity(min_capacity);
                self.metrics.increase_on_new_allocation(buf.capacity());
                buf
            }
        };
        buffer.clear();
        self.metrics.increase_active_leases();
        Ok(buffer)
    }

    fn shrink_free_list(&self) -> usize {
        let mut list = self.free_list.lock();
        let reclaimed: usize = list.iter().map(BytesMut::capacity).sum();
        list.clear();
        self.metrics.decrease_on_shrink(reclaimed);
        reclaimed
    }

    fn snapshot(&self) -> PoolStats {
        let free_slots = self.free_list.lock().len();
        PoolStats {
            allocated_bytes: self.metrics.allocated_bytes.load(Ordering::Relaxed),
            resident_bytes: self.metrics.resident_bytes.load(Ordering::Relaxed),
            available_bytes: self.metrics.available_bytes.load(Ordering::Relaxed),
            active_leases: self.metrics.active_leases.load(Ordering::Relaxed),
            failed_acquisitions: self.metrics.failed_acquisitions.load(Ordering::Relaxed),
            free_slots,
        }
    }
}

impl BufferRecycler for PoolInner {
    fn reclaim(&self, reclaimed: ReclaimedBuffer) {
        self.metrics.decrease_active_leases();
        let capacity = reclaimed.capacity();
        match reclaimed.into_buffer() {
            Some(mut buf) => {
                buf.clear();
                // 租约期间的扩容由 BytesMut 自行完成，按实际容量校正驻留统计
                let actual = buf.capacity();
                if actual > capacity {
                    self.metrics.increase_on_new_allocation(actual - capacity);
                } else {
                    self.metrics.decrease_on_loss(capacity - actual);
                }
                self.metrics.increase_available(actual);
                self.free_list.lock().push(buf);
            }
            None => {
                self.metrics.decrease_on_loss(capacity);
            }
        }
    }
}

#[derive(Default)]
struct PoolMetrics {
    allocated_bytes: AtomicUsize,
    resident_bytes: AtomicUsize,
    available_bytes: AtomicUsize,
    active_leases: AtomicUsize,
    failed_acquisitions: AtomicU64,
}

impl PoolMetrics {
    fn increase_on_new_allocation(&self, capacity: usize) {
        self.allocated_bytes.fetch_add(capacity, Ordering::Relaxed);
        self.resident_bytes.fetch_add(capacity, Ordering::Relaxed);
    }

    fn increase_available(&self, capacity: usize) {
        self.available_bytes.fetch_add(capacity, Ordering::Relaxed);
    }

    fn decrease_available(&self, capacity: usize) {
        saturating_sub(&self.available_bytes, capacity);
    }

    fn decrease_on_loss(&self, capacity: usize) {
        saturating_sub(&self.allocated_bytes, capacity);
        saturating_sub(&self.resident_bytes, capacity);
    }

    fn decrease_on_shrink(&self, capacity: usize) {
        self.decrease_available(capacity);
        self.decrease_on_loss(capacity);
    }

    fn increase_active_leases(&self) {
        self.active_leases.fetch_add(1, Ordering::Relaxed);
    }

    fn decrease_active_leases(&self) {
        saturating_sub(&self.active_leases, 1);
    }
}

fn saturating_sub(target: &AtomicUsize, value: usize) {
    let _ = target.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
        Some(current.saturating_sub(value))
    });
}
