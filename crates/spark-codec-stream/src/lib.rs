#![deny(unsafe_code)]
#![doc = "spark-codec-stream: 字节流累积与增量解码引擎。"]
#![doc = ""]
#![doc = "== 模块定位（Why） =="]
#![doc = "传输层交付的字节块与协议帧边界无关，本 crate 负责跨事件累积半帧、反复驱动解码步骤，"]
#![doc = "并在解码器被摘除或连接关闭时正确处置累积缓冲，让协议实现只需关注“当前字节能否组成一帧”。"]
#![doc = ""]
#![doc = "== 结构概览（How） =="]
#![doc = "- `cumulator`：`Cumulator` 合并策略，线性拷贝 `MergeCumulator` 与分段组合 `CompositeCumulator`；"]
#![doc = "- `step`：用户解码步骤契约 `StreamDecoder` 与闭包适配器 `decode_fn`；"]
#![doc = "- `output`：单次解码调用的产出容器 `DecoderOutput`；"]
#![doc = "- `config`：可从 TOML 加载的 `DecoderConfig` 与两类残留字节策略；"]
#![doc = "- `decoder`：解码循环与生命周期控制 `ByteToMessageDecoder`，以 `InboundHandler` 形式装入链路。"]
#![doc = ""]
#![doc = "== 契约（What） =="]
#![doc = "每个进入解码器的缓冲在正常返回、解码失败、中途摘除与连接关闭四条路径上都恰好释放一次；"]
#![doc = "失败统一折叠为 `CoreError` 并经 `notify_error` 交给下游，解码器本身不关闭连接。"]

mod config;
mod cumulator;
mod decoder;
mod output;
mod step;

pub use config::{
    CumulatorKind, DEFAULT_DISCARD_AFTER_READS, DecoderConfig, RemovalPolicy, UnconsumedPolicy,
};
pub use cumulator::{CompositeCumulator, Cumulator, MergeCumulator, MergeFailure};
pub use decoder::ByteToMessageDecoder;
pub use output::DecoderOutput;
pub use step::{DecodeFn, StreamDecoder, decode_fn};
