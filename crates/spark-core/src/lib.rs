#![deny(unsafe_code)]
#![doc = "spark-core: 增量解码框架的核心契约。"]
#![doc = ""]
#![doc = "== 模块地图 =="]
#![doc = "- [`error`]：稳定错误码与 [`CoreError`]；"]
#![doc = "- [`buffer`]：引用计数缓冲 [`ByteBuf`] 与分配器契约 [`BufferAllocator`]；"]
#![doc = "- [`pipeline`]：Handler 回调、上下文与内存链路 [`EmbeddedChannel`]；"]
#![doc = "- [`observability`]：结构化日志字段键名。"]
#![doc = ""]
#![doc = "== 线程模型 =="]
#![doc = "单个连接的全部事件在同一事件循环线程上按序执行，Handler 回调取 `&mut self`，"]
#![doc = "不需要锁；缓冲租约使用原子计数，转交给其它线程后仍能正确释放。"]

pub mod buffer;
pub mod error;
pub mod observability;
pub mod pipeline;

pub use buffer::{BufProbe, BufferAllocator, BufferError, ByteBuf, HeapAllocator};
pub use error::{CoreError, ErrorCategory, Result};
pub use pipeline::{
    Context, EmbeddedChannel, InboundHandler, PipelineMessage, TailEvent, UserEvent,
};
