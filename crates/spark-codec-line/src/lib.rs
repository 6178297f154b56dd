#![deny(unsafe_code)]
#![warn(missing_docs)]

//! `spark-codec-line` 提供基于换行符分帧的解码步骤，是 `spark-codec-stream` 的参考协议实现。
//!
//! # 教案背景（Why）
//! - 增量解码引擎只定义“解码步骤”契约，本 crate 演示一个真实协议如何在不关心累积、
//!   摘除与关闭收尾的前提下实现 [`StreamDecoder`](spark_codec_stream::StreamDecoder)；
//! - 行分隔协议语义直观，却覆盖了最大帧长、超长帧丢弃与错误上报等典型分支。
//!
//! # 使用概览（How）
//! - 通过 [`LineFrameDecoder::builder`] 设置最大行长与选项，再交给
//!   `ByteToMessageDecoder::new` 装入链路；
//! - 默认产出去掉分隔符的零拷贝缓冲切片，开启 `text` 后产出 UTF-8 `String`。
//!
//! # 合约说明（What）
//! - 分隔符为 `\n` 或 `\r\n`；
//! - 超长行以 `codec.frame_too_long` 上报，解码器随后跳过该行继续工作；
//! - 非法 UTF-8（仅 `text` 模式）以 `protocol.decode` 上报。
//!
//! # 风险提示与后续（Trade-offs）
//! - 行分隔协议不包含转义策略，二进制负载应改用长度前缀协议；
//! - 每次解码都从读指针重新扫描分隔符，超长的半行会被重复扫描直到触发最大行长。

mod line;

pub use crate::line::{LineFrameDecoder, LineFrameDecoderBuilder};
