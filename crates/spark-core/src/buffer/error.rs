use std::borrow::Cow;

use crate::error::{CoreError, codes};

/// `BufferError` 枚举 [`ByteBuf`](super::ByteBuf) 与分配器在读写路径上的全部失败模式。
///
/// # 设计背景（Why）
/// - 缓冲层位于依赖图最底部，需要一个轻量、可模式匹配的错误类型，便于累积器针对
///   “分配失败”与“越界读取”做不同处理；
/// - 跨层传播时再统一折叠为 [`CoreError`]，保持对外错误码稳定。
///
/// # 契约说明（What）
/// - 每个变体都映射到 [`codes`] 中唯一的 `buffer.*` 错误码，见 [`BufferError::code`]；
/// - 转换为 [`CoreError`] 时原始枚举作为 `cause` 保留，调用方可通过
///   [`CoreError::find_cause`] 取回结构化字段。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum BufferError {
    /// 读取超过写指针。
    #[error("requested {requested} bytes but only {readable} readable")]
    Underflow { requested: usize, readable: usize },
    /// 句柄已释放，存储可能已经归还给分配器。
    #[error("buffer used after release")]
    UseAfterFree,
    /// 只读缓冲拒绝写入。
    #[error("buffer is read-only")]
    ReadOnly,
    /// 写入后长度将超过 `max_capacity`。
    #[error(
        "writing {requested} bytes exceeds max capacity {max_capacity} (current length {length})"
    )]
    CapacityExceeded {
        requested: usize,
        length: usize,
        max_capacity: usize,
    },
    /// 分配器拒绝提供存储。
    #[error("allocator refused {requested} bytes: {reason}")]
    AllocationFailed {
        requested: usize,
        reason: Cow<'static, str>,
    },
    /// 操作只对组合缓冲有效。
    #[error("`{op}` requires a composite buffer")]
    NotComposite { op: &'static str },
}

impl BufferError {
    /// 返回与变体对应的稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            BufferError::Underflow { .. } => codes::BUFFER_UNDERFLOW,
            BufferError::UseAfterFree => codes::BUFFER_USE_AFTER_FREE,
            BufferError::ReadOnly => codes::BUFFER_READ_ONLY,
            BufferError::CapacityExceeded { .. } => codes::BUFFER_CAPACITY_EXCEEDED,
            BufferError::AllocationFailed { .. } => codes::BUFFER_ALLOCATION_FAILED,
            BufferError::NotComposite { .. } => codes::BUFFER_NOT_COMPOSITE,
        }
    }

    /// 便捷构造分配失败错误。
    pub fn allocation_failed(requested: usize, reason: impl Into<Cow<'static, str>>) -> Self {
        BufferError::AllocationFailed {
            requested,
            reason: reason.into(),
        }
    }
}

impl From<BufferError> for CoreError {
    fn from(err: BufferError) -> Self {
        CoreError::new(err.code(), err.to_string()).with_cause(err)
    }
}
