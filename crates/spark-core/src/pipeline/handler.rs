use crate::error::CoreError;

use super::{Context, PipelineMessage, UserEvent};

/// `InboundHandler` 描述入站方向的 Handler 生命周期与事件回调。
///
/// # 设计背景（Why）
/// - 入站事件按“读 → 读批次完成 → 失活”的顺序流经 Handler 链，每个 Handler
///   可以消费、转换或原样透传；
/// - 所有回调都有透传的默认实现，具体 Handler 只覆盖关心的事件。
///
/// # 契约说明（What）
/// - 回调取 `&mut self`：同一 Handler 的回调永远不会并发或重入执行；
/// - `handler_added` 在 Handler 装入链路后调用一次，`handler_removed` 在摘除后调用一次，
///   摘除若发生在 Handler 自身的回调中，`handler_removed` 推迟到该回调返回之后；
/// - 透传时消息所有权随之转移，不透传的 Handler 负责释放消息。
pub trait InboundHandler {
    /// Handler 装入链路。
    fn handler_added(&mut self, _ctx: &dyn Context) {}

    /// Handler 已从链路摘除。
    fn handler_removed(&mut self, _ctx: &dyn Context) {}

    /// 收到一条入站消息。
    fn on_read(&mut self, ctx: &dyn Context, msg: PipelineMessage) {
        ctx.forward_read(msg);
    }

    /// 一批入站消息处理完毕。
    fn on_read_complete(&mut self, ctx: &dyn Context) {
        ctx.forward_read_complete();
    }

    /// 连接失活。
    fn on_channel_inactive(&mut self, ctx: &dyn Context) {
        ctx.forward_channel_inactive();
    }

    /// 收到用户事件。
    fn on_user_event(&mut self, ctx: &dyn Context, event: UserEvent) {
        ctx.forward_user_event(event);
    }

    /// 上游上报的错误。
    fn on_exception_caught(&mut self, ctx: &dyn Context, error: CoreError) {
        ctx.notify_error(error);
    }
}
