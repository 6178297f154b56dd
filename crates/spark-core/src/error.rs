use std::borrow::Cow;
use std::error::Error as StdError;
use std::fmt;

/// 底层错误原因的统一承载类型。
///
/// - 约束为 `Send + Sync + 'static`，确保错误可以随 `notify_error` 事件跨越 Handler 边界；
/// - 使用 `Box` 擦除具体类型，调用方可通过 `downcast_ref` 还原。
pub type ErrorCause = Box<dyn StdError + Send + Sync + 'static>;

/// `spark-core` 统一的结果别名，默认错误类型为 [`CoreError`]。
pub type Result<T, E = CoreError> = core::result::Result<T, E>;

/// `CoreError` 表示增量解码链路中跨层共享的稳定错误域。
///
/// # 设计背景（Why）
/// - 缓冲越界、累积失败、用户解码失败分别来自不同层次，但最终都要通过同一个
///   `notify_error` 通道告知下游；统一错误码便于日志检索与自动化处置。
/// - 与框架其余部分保持一致：错误码遵循 `<领域>.<语义>` 命名，消息面向排障人员。
///
/// # 逻辑解析（How）
/// - `code` 为 `'static` 字符串，承载稳定语义；`message` 可借用或持有；
/// - `cause` 保存底层原因并通过 [`std::error::Error::source`] 暴露完整链路；
/// - `category` 默认按错误码查表，调用方也可显式覆盖。
///
/// # 契约说明（What）
/// - **前置条件**：错误码应来自 [`codes`] 模块或遵循同样的命名约定；
/// - **后置条件**：构造出的错误拥有独立所有权，可安全跨线程移动。
///
/// # 设计取舍（Trade-offs）
/// - 仅承载信息，不做任何格式化上报；日志由调用点通过 `tracing` 完成。
#[derive(Debug)]
pub struct CoreError {
    code: &'static str,
    message: Cow<'static, str>,
    cause: Option<ErrorCause>,
    category: Option<ErrorCategory>,
}

impl CoreError {
    /// 构造核心错误。
    ///
    /// # 示例
    /// ```rust
    /// use spark_core::CoreError;
    /// use spark_core::error::codes;
    ///
    /// let err = CoreError::new(codes::BUFFER_UNDERFLOW, "need 4 bytes, 1 readable");
    /// assert_eq!(err.code(), codes::BUFFER_UNDERFLOW);
    /// assert!(err.cause().is_none());
    /// ```
    pub fn new(code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
            category: None,
        }
    }

    /// 附带底层原因并返回新的核心错误。
    pub fn with_cause(mut self, cause: impl StdError + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// 为现有错误设置底层原因。
    pub fn set_cause(&mut self, cause: impl StdError + Send + Sync + 'static) {
        self.cause = Some(Box::new(cause));
    }

    /// 显式标记错误分类，覆盖按错误码查表得到的默认值。
    pub fn with_category(mut self, category: ErrorCategory) -> Self {
        self.category = Some(category);
        self
    }

    /// 获取结构化错误分类。
    ///
    /// # 契约说明（What）
    /// - 显式设置的分类优先；
    /// - 否则按错误码前缀查表：`buffer.*` 多为调用方误用，`protocol.*`/`codec.*` 视为协议违规；
    /// - 查表失败回退为 [`ErrorCategory::NonRetryable`]。
    pub fn category(&self) -> ErrorCategory {
        self.category
            .unwrap_or_else(|| ErrorCategory::for_code(self.code))
    }

    /// 获取稳定错误码。
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// 获取描述。
    pub fn message(&self) -> &str {
        &self.message
    }

    /// 获取底层原因。
    pub fn cause(&self) -> Option<&ErrorCause> {
        self.cause.as_ref()
    }

    /// 沿错误链查找指定类型的底层原因。
    pub fn find_cause<E: StdError + 'static>(&self) -> Option<&E> {
        let mut current: Option<&(dyn StdError + 'static)> = self.source();
        while let Some(err) = current {
            if let Some(found) = err.downcast_ref::<E>() {
                return Some(found);
            }
            current = err.source();
        }
        None
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl StdError for CoreError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause
            .as_ref()
            .map(|boxed| boxed.as_ref() as &(dyn StdError + 'static))
    }
}

/// 错误分类枚举，帮助上层决定是关闭连接、记录告警还是修复调用代码。
///
/// - `ProtocolViolation`：对端输入不符合帧格式，通常应关闭连接；
/// - `ResourceExhausted`：分配或容量上限触发，可在降载后恢复；
/// - `Misuse`：调用方违反缓冲或解码契约（越界读取、释放后使用），属于程序缺陷；
/// - `NonRetryable`：兜底分类。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorCategory {
    ProtocolViolation,
    ResourceExhausted,
    Misuse,
    NonRetryable,
}

impl ErrorCategory {
    fn for_code(code: &str) -> Self {
        match code {
            codes::BUFFER_UNDERFLOW
            | codes::BUFFER_USE_AFTER_FREE
            | codes::BUFFER_READ_ONLY
            | codes::BUFFER_NOT_COMPOSITE
            | codes::CODEC_DECODE_NO_PROGRESS => ErrorCategory::Misuse,
            codes::BUFFER_CAPACITY_EXCEEDED | codes::BUFFER_ALLOCATION_FAILED => {
                ErrorCategory::ResourceExhausted
            }
            codes::PROTOCOL_DECODE
            | codes::CODEC_DECODE_FAILED
            | codes::CODEC_FRAME_TOO_LONG
            | codes::CODEC_UNCONSUMED_ON_CLOSE => ErrorCategory::ProtocolViolation,
            _ => ErrorCategory::NonRetryable,
        }
    }
}

/// 稳定错误码集合。
///
/// # 设计背景（Why）
/// - 缓冲、累积器与解码循环的失败模式有限且语义明确，必须提供可检索的标识；
/// - 命名遵循 `<领域>.<语义>`，与框架其它模块保持一致。
pub mod codes {
    /// 读取超过写指针（解码步骤的编程错误）。
    pub const BUFFER_UNDERFLOW: &str = "buffer.underflow";
    /// 访问已释放的缓冲。
    pub const BUFFER_USE_AFTER_FREE: &str = "buffer.use_after_free";
    /// 向只读缓冲写入。
    pub const BUFFER_READ_ONLY: &str = "buffer.read_only";
    /// 写入超过最大容量。
    pub const BUFFER_CAPACITY_EXCEEDED: &str = "buffer.capacity_exceeded";
    /// 分配器拒绝分配。
    pub const BUFFER_ALLOCATION_FAILED: &str = "buffer.allocation_failed";
    /// 对非组合缓冲调用组合专属操作。
    pub const BUFFER_NOT_COMPOSITE: &str = "buffer.not_composite";
    /// 协议解码失败（用户解码步骤的约定错误码）。
    pub const PROTOCOL_DECODE: &str = "protocol.decode";
    /// 累积器合并失败。
    pub const CODEC_MERGE_FAILED: &str = "codec.merge_failed";
    /// 解码步骤因缓冲错误失败。
    pub const CODEC_DECODE_FAILED: &str = "codec.decode_failed";
    /// 解码步骤产出消息却没有消费任何字节。
    pub const CODEC_DECODE_NO_PROGRESS: &str = "codec.decode_no_progress";
    /// 连接关闭时仍有未消费字节。
    pub const CODEC_UNCONSUMED_ON_CLOSE: &str = "codec.unconsumed_on_close";
    /// 帧长度超过上限。
    pub const CODEC_FRAME_TOO_LONG: &str = "codec.frame_too_long";
    /// 配置非法。
    pub const CONFIG_INVALID: &str = "config.invalid";
}
