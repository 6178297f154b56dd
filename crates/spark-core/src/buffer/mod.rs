//! 缓冲模块：引用计数字节缓冲 [`ByteBuf`] 与分配器契约 [`BufferAllocator`]。
//!
//! # 模块定位（Why）
//! - 增量解码链路的每一段（传输、累积器、解码步骤、下游）都通过 `ByteBuf` 交接字节，
//!   所有权与存活计数的规则集中定义在此处；
//! - 分配器契约让累积器在扩容时不关心存储来自堆还是池，池化实现位于 `spark-buffer`。
//!
//! # 结构概览（How）
//! - `byte_buf`：缓冲本体及其四种形态；
//! - `composite`：组合缓冲的分段列表；
//! - `lease`：租约、回收钩子与弱观察者 [`BufProbe`]；
//! - `error`：缓冲层错误枚举 [`BufferError`]。

mod byte_buf;
mod composite;
mod error;
mod lease;

pub use byte_buf::{ByteBuf, DEFAULT_MAX_CAPACITY, DEFAULT_MAX_COMPONENTS};
pub use error::BufferError;
pub use lease::{BufProbe, BufferRecycler, ReclaimedBuffer};

/// 容量增长从倍增切换为线性步进的阈值（4 MiB）。
pub const CALCULATE_THRESHOLD: usize = 4 * 1024 * 1024;

/// 倍增策略的起点容量。
const MIN_GROWTH_CAPACITY: usize = 64;

/// `BufferAllocator` 定义缓冲的分配入口。
///
/// # 设计背景（Why）
/// - 累积器在合并失败时需要申请新缓冲，分配失败必须以错误形式返回而不是 panic，
///   这样解码器才能保留旧的累积缓冲并释放入站缓冲；
/// - 框架其余部分只依赖该 trait，堆分配与池化分配可按部署环境替换。
///
/// # 契约说明（What）
/// - `allocate` 返回可写缓冲，`writable_bytes() >= min_capacity`；
/// - 实现必须线程安全：同一分配器会被多个连接共享；
/// - `calculate_new_capacity` 的默认实现给出扩容目标容量：4 MiB 以下按 2 的幂增长
///   （起点 64），4 MiB 以上按 4 MiB 步进，结果不超过 `max_capacity`。
pub trait BufferAllocator: Send + Sync {
    /// 分配至少 `min_capacity` 字节的可写缓冲。
    fn allocate(&self, min_capacity: usize) -> Result<ByteBuf, BufferError>;

    /// 计算扩容后的目标容量。
    fn calculate_new_capacity(&self, min_new_capacity: usize, max_capacity: usize) -> usize {
        calculate_new_capacity(min_new_capacity, max_capacity)
    }

    /// 创建空的组合缓冲。
    fn composite(&self, max_components: usize) -> ByteBuf {
        ByteBuf::composite(max_components)
    }
}

/// [`BufferAllocator::calculate_new_capacity`] 的默认算法，供自定义分配器复用。
pub fn calculate_new_capacity(min_new_capacity: usize, max_capacity: usize) -> usize {
    let min_new_capacity = min_new_capacity.min(max_capacity);
    if min_new_capacity == CALCULATE_THRESHOLD {
        return CALCULATE_THRESHOLD;
    }
    if min_new_capacity > CALCULATE_THRESHOLD {
        let stepped = min_new_capacity / CALCULATE_THRESHOLD * CALCULATE_THRESHOLD;
        return if stepped > max_capacity.saturating_sub(CALCULATE_THRESHOLD) {
            max_capacity
        } else {
            stepped + CALCULATE_THRESHOLD
        };
    }
    min_new_capacity
        .max(MIN_GROWTH_CAPACITY)
        .next_power_of_two()
        .min(max_capacity)
}

/// 基于系统堆的默认分配器。
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapAllocator;

impl BufferAllocator for HeapAllocator {
    fn allocate(&self, min_capacity: usize) -> Result<ByteBuf, BufferError> {
        Ok(ByteBuf::with_capacity(min_capacity))
    }
}
