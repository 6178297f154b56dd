#![deny(unsafe_code)]

//! `spark-buffer` 提供 `spark-core` 分配器契约的池化实现。
//!
//! # 模块定位（Why）
//! - 长连接上的累积器会反复申请、释放相近尺寸的缓冲，复用 `BytesMut` 可以避免堆分配抖动；
//! - 池的统计快照（活跃租约数）同时充当泄漏检测器：连接关闭、解码器卸载后，
//!   活跃租约应当回到 0。
//!
//! # 设计概要（How）
//! - [`SlabBufferPool`] 实现 [`BufferAllocator`](spark_core::BufferAllocator)，
//!   租借出的 [`ByteBuf`](spark_core::ByteBuf) 携带池的回收句柄；
//! - 回收经由 `ByteBuf` 租约的 `Drop` 钩子完成，调用方无需手动归还；
//! - [`PoolStats`] 为只读快照，可直接用于断言或导出监控。

mod pool;

pub use pool::{PoolStats, SlabBufferPool};
