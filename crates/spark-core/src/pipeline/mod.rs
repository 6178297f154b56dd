//! Pipeline 契约：入站消息、Handler 回调、上下文与内存链路。
//!
//! # 模块定位（Why）
//! - 字节解码器作为链路中的一个 Handler 运行，它与上下游的全部交互都经由本模块定义的
//!   [`Context`] 与 [`InboundHandler`]；
//! - [`EmbeddedChannel`] 在内存中实现同一套契约，用于测试与示例驱动 Handler。
//!
//! # 结构概览（How）
//! - `message`：[`PipelineMessage`] 区分字节缓冲与类型擦除的业务消息；
//! - `event`：[`UserEvent`]，包括输入半关闭；
//! - `context` / `handler`：上下文与回调 trait；
//! - `embedded`：单连接内存链路与末端事件日志 [`TailEvent`]。

mod context;
mod embedded;
mod event;
mod handler;
mod message;

pub use context::Context;
pub use embedded::{EmbeddedChannel, TailEvent};
pub use event::UserEvent;
pub use handler::InboundHandler;
pub use message::{PipelineMessage, UserMessage};
