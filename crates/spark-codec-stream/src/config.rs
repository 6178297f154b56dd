use serde::Deserialize;
use spark_core::CoreError;
use spark_core::buffer::DEFAULT_MAX_COMPONENTS;
use spark_core::error::codes;

use crate::cumulator::{CompositeCumulator, Cumulator, MergeCumulator};

/// 连续多少次读取后仍有剩余字节时压缩累积缓冲。
pub const DEFAULT_DISCARD_AFTER_READS: usize = 16;

/// 累积策略选择。
///
/// - `Merge`：线性拷贝，累积缓冲始终是一块连续内存，解码步骤读取最快；
/// - `Composite`：分段组合，追加时零拷贝，适合大块、低频的入站数据。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CumulatorKind {
    #[default]
    Merge,
    Composite,
}

impl CumulatorKind {
    /// 日志中使用的策略名称。
    pub fn as_str(self) -> &'static str {
        match self {
            CumulatorKind::Merge => "merge",
            CumulatorKind::Composite => "composite",
        }
    }
}

/// 解码器从链路摘除时对剩余累积字节的处置方式。
///
/// - `ForwardRemaining`：把尚未解码的字节作为一条缓冲消息交给下游，随后补发读批次完成；
///   适用于协议升级等“后续 Handler 接管字节流”的场景；
/// - `Release`：直接释放，下游不会看到残留字节。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalPolicy {
    #[default]
    ForwardRemaining,
    Release,
}

impl RemovalPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            RemovalPolicy::ForwardRemaining => "forward_remaining",
            RemovalPolicy::Release => "release",
        }
    }
}

/// 连接关闭时最终解码后仍未消费的字节如何处理。
///
/// - `Discard`：记录 `warn!` 日志后丢弃；
/// - `Error`：向下游上报 `codec.unconsumed_on_close`。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnconsumedPolicy {
    #[default]
    Discard,
    Error,
}

impl UnconsumedPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            UnconsumedPolicy::Discard => "discard",
            UnconsumedPolicy::Error => "error",
        }
    }
}

/// `DecoderConfig` 汇总 [`ByteToMessageDecoder`](crate::ByteToMessageDecoder) 的可调参数。
///
/// # 设计背景（Why）
/// - 累积策略、单次解码模式与两类残留字节策略都属于部署期决策，
///   与解码步骤本身的协议逻辑无关，集中在配置结构中便于从文件加载；
/// - 所有字段都有默认值，TOML 中只需写出需要覆盖的键。
///
/// # 契约说明（What）
/// - `max_components`：组合累积的分段上限，超过时合并为单段，必须大于 0；
/// - `discard_after_reads`：压缩累积缓冲的读取次数阈值，必须大于 0；
/// - [`DecoderConfig::from_toml_str`] 解析后立即调用 [`DecoderConfig::validate`]，
///   失败时返回 `config.invalid`。
///
/// # 示例
/// ```rust
/// use spark_codec_stream::{CumulatorKind, DecoderConfig, RemovalPolicy};
///
/// let config = DecoderConfig::from_toml_str(
///     r#"
///     cumulator = "composite"
///     on_removal = "release"
///     "#,
/// )
/// .expect("valid config");
/// assert_eq!(config.cumulator, CumulatorKind::Composite);
/// assert_eq!(config.on_removal, RemovalPolicy::Release);
/// assert_eq!(config.discard_after_reads, 16);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DecoderConfig {
    pub cumulator: CumulatorKind,
    pub max_components: usize,
    pub single_decode: bool,
    pub discard_after_reads: usize,
    pub on_removal: RemovalPolicy,
    pub unconsumed_on_close: UnconsumedPolicy,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            cumulator: CumulatorKind::default(),
            max_components: DEFAULT_MAX_COMPONENTS,
            single_decode: false,
            discard_after_reads: DEFAULT_DISCARD_AFTER_READS,
            on_removal: RemovalPolicy::default(),
            unconsumed_on_close: UnconsumedPolicy::default(),
        }
    }
}

impl DecoderConfig {
    /// 从 TOML 文本解析配置并校验。
    pub fn from_toml_str(text: &str) -> spark_core::Result<Self> {
        let config: DecoderConfig = toml::from_str(text).map_err(|err| {
            CoreError::new(
                codes::CONFIG_INVALID,
                format!("failed to parse decoder config: {}", err.message()),
            )
            .with_cause(err)
        })?;
        config.validate()?;
        Ok(config)
    }

    /// 校验阈值类字段。
    pub fn validate(&self) -> spark_core::Result<()> {
        if self.max_components == 0 {
            return Err(CoreError::new(
                codes::CONFIG_INVALID,
                "max_components must be greater than zero",
            ));
        }
        if self.discard_after_reads == 0 {
            return Err(CoreError::new(
                codes::CONFIG_INVALID,
                "discard_after_reads must be greater than zero",
            ));
        }
        Ok(())
    }

    /// 按 `cumulator` 字段构造累积器。
    pub fn build_cumulator(&self) -> Box<dyn Cumulator> {
        match self.cumulator {
            CumulatorKind::Merge => Box::new(MergeCumulator),
            CumulatorKind::Composite => Box::new(CompositeCumulator::new(self.max_components)),
        }
    }
}
