//! `pipeline` 集成测试：验证 `EmbeddedChannel` 对 Handler 生命周期的调度顺序。
//!
//! # 测试目标（Why）
//! - 字节解码器依赖“自我摘除后回调延迟执行”“已摘除上下文仍可向下游转发”等语义，
//!   这些语义由内存链路实现，必须单独锁定；
//! - 末端事件日志是解码器测试断言顺序的依据，其记录方式同样需要覆盖。

use std::cell::RefCell;
use std::rc::Rc;

use spark_core::error::codes;
use spark_core::{
    ByteBuf, Context, CoreError, EmbeddedChannel, InboundHandler, PipelineMessage, TailEvent,
    UserEvent,
};

type Journal = Rc<RefCell<Vec<String>>>;

/// 读到消息后把自己摘除，并记录回调发生的时机。
struct SelfRemoving {
    journal: Journal,
}

impl InboundHandler for SelfRemoving {
    fn handler_added(&mut self, ctx: &dyn Context) {
        self.journal.borrow_mut().push(format!("added:{}", ctx.name()));
    }

    fn handler_removed(&mut self, ctx: &dyn Context) {
        assert!(ctx.is_removed());
        self.journal.borrow_mut().push("removed".to_owned());
        ctx.forward_read(PipelineMessage::user("farewell"));
    }

    fn on_read(&mut self, ctx: &dyn Context, msg: PipelineMessage) {
        ctx.remove_self();
        assert!(ctx.is_removed());
        self.journal.borrow_mut().push("read-returning".to_owned());
        ctx.forward_read(msg);
    }
}

#[test]
fn handler_removed_runs_after_the_removing_call_returns() {
    let journal: Journal = Rc::default();
    let channel = EmbeddedChannel::new();
    channel.add_last(
        "self-removing",
        SelfRemoving {
            journal: Rc::clone(&journal),
        },
    );

    channel.write_inbound(ByteBuf::copy_from_slice(b"x"));

    assert_eq!(
        *journal.borrow(),
        vec!["added:self-removing", "read-returning", "removed"]
    );
    assert!(!channel.contains("self-removing"));
    assert_eq!(channel.read_inbound_buf(), Some(ByteBuf::copy_from_slice(b"x")));
    assert_eq!(channel.read_inbound_user::<&str>(), Some("farewell"));
}

/// 下游收到特定消息后按名称摘除上游 Handler。
struct RemoveUpstream {
    target: &'static str,
}

impl InboundHandler for RemoveUpstream {
    fn on_read(&mut self, ctx: &dyn Context, msg: PipelineMessage) {
        match msg.downcast_user::<&str>() {
            Ok("switch") => {
                assert!(ctx.remove(self.target));
            }
            Ok(other) => ctx.forward_read(PipelineMessage::user(other)),
            Err(other) => ctx.forward_read(other),
        }
    }
}

/// 透传全部消息，只记录自己被摘除的时机。
struct Recorder {
    journal: Journal,
}

impl InboundHandler for Recorder {
    fn handler_removed(&mut self, _ctx: &dyn Context) {
        self.journal.borrow_mut().push("removed".to_owned());
    }
}

#[test]
fn removed_upstream_handler_no_longer_sees_events() {
    let journal: Journal = Rc::default();
    let channel = EmbeddedChannel::new();
    channel
        .add_last(
            "first",
            Recorder {
                journal: Rc::clone(&journal),
            },
        )
        .add_last("switch", RemoveUpstream { target: "first" });

    channel.write_inbound(PipelineMessage::user("switch"));
    assert_eq!(*journal.borrow(), vec!["removed"]);
    assert!(!channel.contains("first"));

    channel.write_inbound(PipelineMessage::user("after"));
    assert_eq!(channel.read_inbound_user::<&str>(), Some("after"));
    assert_eq!(channel.inbound_len(), 0);
}

/// 把收到的读事件转换为错误上报。
struct Failing;

impl InboundHandler for Failing {
    fn on_read(&mut self, ctx: &dyn Context, _msg: PipelineMessage) {
        ctx.notify_error(CoreError::new(codes::PROTOCOL_DECODE, "bad frame"));
    }
}

#[test]
fn unhandled_errors_are_collected_at_the_tail() {
    let channel = EmbeddedChannel::new();
    channel.add_last("failing", Failing);
    assert!(!channel.write_inbound(ByteBuf::copy_from_slice(b"?")));

    assert_eq!(
        channel.tail_events(),
        vec![
            TailEvent::Error(codes::PROTOCOL_DECODE),
            TailEvent::ReadComplete {
                channel_active: true
            },
        ]
    );
    let err = channel.check_error().expect_err("error recorded");
    assert_eq!(err.code(), codes::PROTOCOL_DECODE);
    assert!(channel.check_error().is_ok());
}

#[test]
fn input_shutdown_and_finish_are_logged_in_order() {
    let channel = EmbeddedChannel::new();
    channel.shutdown_input();
    channel.fire_user_event(UserEvent::Custom("upgrade".to_owned()));
    assert!(!channel.finish());
    channel.fire_read_complete();

    assert_eq!(
        channel.tail_events(),
        vec![
            TailEvent::UserEvent("input_shutdown".to_owned()),
            TailEvent::UserEvent("upgrade".to_owned()),
            TailEvent::ChannelInactive,
            TailEvent::ReadComplete {
                channel_active: false
            },
        ]
    );
}

#[test]
fn finish_and_release_all_drops_queued_buffers() {
    let channel = EmbeddedChannel::new();
    let buf = ByteBuf::copy_from_slice(b"queued");
    let probe = buf.probe();
    assert!(channel.write_inbound(buf));
    assert!(channel.finish_and_release_all());
    assert!(probe.is_released());
    assert!(channel.read_inbound().is_none());
}
