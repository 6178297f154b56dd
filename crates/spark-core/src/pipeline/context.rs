use std::sync::Arc;

use crate::buffer::BufferAllocator;
use crate::error::CoreError;

use super::{PipelineMessage, UserEvent};

/// `Context` 是 Handler 观察与驱动所在链路的唯一入口。
///
/// # 设计背景（Why）
/// - 解码器需要向下游转发消息、上报错误、把自己从链路中摘除，并在摘除后感知状态；
///   这些能力全部收敛在上下文上，Handler 不直接持有链路容器；
/// - 链路在单个连接的事件循环线程上运行，方法取 `&self`，容器内部使用
///   `Cell`/`RefCell` 维护状态。
///
/// # 契约说明（What）
/// - `forward_*`：把事件交给下一个仍在链路中的 Handler，末端由容器自行收集；
///   已被摘除的上下文仍可转发，目标为其原位置之后的 Handler；
/// - `remove_self` / `remove`：同步生效，`is_removed` 随即返回 `true`；
///   若目标 Handler 正在执行，`handler_removed` 回调推迟到该调用返回之后；
/// - `notify_error`：把错误交给下游的 `on_exception_caught`，不关闭连接；
/// - `allocator`：连接共享的缓冲分配器。
pub trait Context {
    /// 当前 Handler 的名称。
    fn name(&self) -> &str;

    /// 连接共享的缓冲分配器。
    fn allocator(&self) -> Arc<dyn BufferAllocator>;

    /// 向下游转发一条消息。
    fn forward_read(&self, msg: PipelineMessage);

    /// 向下游转发读批次完成事件。
    fn forward_read_complete(&self);

    /// 向下游转发连接失活事件。
    fn forward_channel_inactive(&self);

    /// 向下游转发用户事件。
    fn forward_user_event(&self, event: UserEvent);

    /// 向下游上报错误。
    fn notify_error(&self, error: CoreError);

    /// 把当前 Handler 从链路中摘除。
    fn remove_self(&self);

    /// 按名称摘除 Handler，返回是否找到。
    fn remove(&self, name: &str) -> bool;

    /// 当前 Handler 是否已被摘除。
    fn is_removed(&self) -> bool;

    /// 连接是否仍处于活跃状态。
    fn is_channel_active(&self) -> bool;
}
