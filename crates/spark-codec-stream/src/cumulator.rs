use spark_core::buffer::{
    BufferAllocator, BufferError, ByteBuf, DEFAULT_MAX_CAPACITY, DEFAULT_MAX_COMPONENTS,
};
use spark_core::error::codes;
use spark_core::CoreError;

/// 累积失败的结果：底层原因加上仍然存活的旧累积缓冲。
///
/// # 契约说明（What）
/// - 入站缓冲在构造本结构之前已经被释放，调用方无需再关心它；
/// - `retained` 是累积器决定保留的旧数据（可能是原样的旧缓冲，也可能是已经承载了旧数据的
///   新缓冲），解码器把它重新作为累积缓冲；为 `None` 时表示旧数据也已释放。
#[derive(Debug, thiserror::Error)]
#[error("cumulation failed: {error}")]
pub struct MergeFailure {
    #[source]
    pub error: BufferError,
    pub retained: Option<ByteBuf>,
}

impl MergeFailure {
    pub fn new(error: BufferError, retained: Option<ByteBuf>) -> Self {
        Self { error, retained }
    }

    /// 拆分为 `codec.merge_failed` 错误与保留的累积缓冲。
    pub fn into_parts(self) -> (CoreError, Option<ByteBuf>) {
        let err = CoreError::new(codes::CODEC_MERGE_FAILED, self.error.to_string())
            .with_cause(self.error);
        (err, self.retained)
    }
}

/// `Cumulator` 定义“旧累积缓冲 + 新入站缓冲 → 新累积缓冲”的合并策略。
///
/// # 设计背景（Why）
/// - 入站字节块的边界与协议帧边界无关，解码器必须把跨事件的半帧拼接起来；
/// - 拼接方式存在取舍：线性拷贝让解码步骤面对连续内存，组合分段省去拷贝，
///   因此以 trait 抽象，解码器构造时选择。
///
/// # 契约说明（What）
/// - `previous` 为 `None` 表示尚无累积数据；
/// - 成功时返回的缓冲承载 `previous` 的可读字节后接 `incoming` 的可读字节，
///   两个输入的所有权都已转移，不再需要的部分已经释放；
/// - 失败时 `incoming` 必定已释放，`previous` 的去向由 [`MergeFailure::retained`] 说明；
/// - 实现无内部可变状态，可在连接之间共享。
pub trait Cumulator: Send + Sync {
    /// 策略名称，用于日志字段 `codec.cumulator`。
    fn name(&self) -> &'static str;

    /// 合并两段缓冲。
    fn cumulate(
        &self,
        alloc: &dyn BufferAllocator,
        previous: Option<ByteBuf>,
        incoming: ByteBuf,
    ) -> Result<ByteBuf, MergeFailure>;
}

/// 线性拷贝累积器：累积缓冲始终是一块连续内存。
///
/// # 逻辑解析（How）
/// 1. 尚无累积数据时直接接管入站缓冲，零拷贝；
/// 2. 旧缓冲已读空且入站缓冲连续时，释放旧缓冲并接管入站缓冲；
/// 3. 旧缓冲可写、容量约束允许，且未被共享或无需扩容时，原地追加（必要时先压缩已读前缀）；
/// 4. 其余情况（只读、组合、共享后需要扩容）向分配器申请新缓冲，依次复制旧数据与新数据。
///
/// # 设计取舍（Trade-offs）
/// - 原地追加前压缩已读前缀，用一次 `memmove` 换取更少的扩容次数；
/// - 被共享的缓冲只在剩余空间足够时原地写入，避免扩容导致的存储迁移影响其它视图。
#[derive(Clone, Copy, Debug, Default)]
pub struct MergeCumulator;

impl Cumulator for MergeCumulator {
    fn name(&self) -> &'static str {
        "merge"
    }

    fn cumulate(
        &self,
        alloc: &dyn BufferAllocator,
        previous: Option<ByteBuf>,
        mut incoming: ByteBuf,
    ) -> Result<ByteBuf, MergeFailure> {
        let Some(mut previous) = previous else {
            return Ok(incoming);
        };
        if !previous.is_readable() && incoming.is_contiguous() {
            return Ok(incoming);
        }

        let required = incoming.readable_bytes();
        let exclusive = previous.ref_cnt() == 1;
        let in_place = !previous.is_read_only()
            && !previous.is_composite()
            && required <= previous.max_writable_bytes()
            && (exclusive || required <= previous.writable_bytes());
        if !in_place {
            return expand_cumulation(alloc, previous, incoming);
        }

        if exclusive && previous.writable_bytes() < required {
            previous.discard_read_bytes();
        }
        match previous.write_buf(&mut incoming) {
            Ok(()) => Ok(previous),
            Err(error) => Err(MergeFailure::new(error, Some(previous))),
        }
    }
}

/// 申请新缓冲并依次复制旧数据与新数据。
fn expand_cumulation(
    alloc: &dyn BufferAllocator,
    mut previous: ByteBuf,
    mut incoming: ByteBuf,
) -> Result<ByteBuf, MergeFailure> {
    let total = previous.readable_bytes() + incoming.readable_bytes();
    let capacity = alloc.calculate_new_capacity(total, DEFAULT_MAX_CAPACITY);
    let mut merged = match alloc.allocate(capacity) {
        Ok(merged) => merged,
        Err(error) => return Err(MergeFailure::new(error, Some(previous))),
    };
    if let Err(error) = merged.ensure_writable(total) {
        return Err(MergeFailure::new(error, Some(previous)));
    }
    if let Err(error) = merged.write_buf(&mut previous) {
        return Err(MergeFailure::new(error, Some(previous)));
    }
    // 旧数据已经搬入 merged，此后失败时由 merged 承载旧数据
    drop(previous);
    match merged.write_buf(&mut incoming) {
        Ok(()) => Ok(merged),
        Err(error) => Err(MergeFailure::new(error, Some(merged))),
    }
}

/// 组合累积器：把入站缓冲作为新分段挂到组合缓冲尾部，不复制字节。
///
/// # 逻辑解析（How）
/// - 尚无累积数据或旧缓冲已读空时直接接管入站缓冲；
/// - 旧缓冲是独占的组合缓冲时原地追加分段，否则先创建新的组合缓冲把旧缓冲包装为首段；
/// - 分段数超过 `max_components` 时由 [`ByteBuf::add_component`] 借助分配器合并为单段。
///
/// # 契约说明（What）
/// - 追加失败时入站缓冲已释放；旧缓冲原样保留，若已被包装进新组合缓冲则保留该组合缓冲，
///   可读内容与旧缓冲一致。
#[derive(Clone, Copy, Debug)]
pub struct CompositeCumulator {
    max_components: usize,
}

impl CompositeCumulator {
    pub fn new(max_components: usize) -> Self {
        Self {
            max_components: max_components.max(1),
        }
    }

    pub fn max_components(&self) -> usize {
        self.max_components
    }
}

impl Default for CompositeCumulator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_COMPONENTS)
    }
}

impl Cumulator for CompositeCumulator {
    fn name(&self) -> &'static str {
        "composite"
    }

    fn cumulate(
        &self,
        alloc: &dyn BufferAllocator,
        previous: Option<ByteBuf>,
        incoming: ByteBuf,
    ) -> Result<ByteBuf, MergeFailure> {
        let Some(previous) = previous else {
            return Ok(incoming);
        };
        if !previous.is_readable() {
            return Ok(incoming);
        }

        let mut composite = if previous.is_composite() && previous.ref_cnt() == 1 {
            previous
        } else {
            let mut wrapper = alloc.composite(self.max_components);
            if let Err(error) = wrapper.add_component(alloc, previous) {
                return Err(MergeFailure::new(error, None));
            }
            wrapper
        };
        match composite.add_component(alloc, incoming) {
            Ok(()) => Ok(composite),
            Err(error) => Err(MergeFailure::new(error, Some(composite))),
        }
    }
}
