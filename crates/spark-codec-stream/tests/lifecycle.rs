//! `lifecycle` 集成测试：在内嵌链路中验证 `ByteToMessageDecoder` 的摘除、关闭与释放语义。
//!
//! # 测试目标（Why）
//! - 解码步骤在执行中摘除解码器、下游在转发过程中摘除上游、连接关闭时仍有残留字节，
//!   这些分支决定缓冲是否恰好释放一次，必须逐一锁定；
//! - 末端事件日志是断言“消息、读批次完成、失活”三者顺序的依据。
//!
//! # 结构安排（How）
//! - 摘除：自我摘除、摘除后写入无关缓冲、下游摘除上游、`Release` 策略；
//! - 关闭：`decode_last` 的空输入与非空输入、失活时补发读批次完成、输入半关闭；
//! - 边界：只读入站缓冲、空缓冲、无进展终止、残留字节策略、池化分配器零泄漏。

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;

use spark_buffer::SlabBufferPool;
use spark_codec_stream::{
    ByteToMessageDecoder, DecoderConfig, DecoderOutput, RemovalPolicy, StreamDecoder,
    UnconsumedPolicy, decode_fn,
};
use spark_core::error::codes;
use spark_core::{
    BufProbe, ByteBuf, Context, EmbeddedChannel, InboundHandler, PipelineMessage, TailEvent,
};

const DECODER: &str = "decoder";

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

/// 每凑满两个字节切出一帧。
fn pairs() -> impl StreamDecoder {
    decode_fn(|_ctx, input, out| {
        if input.readable_bytes() >= 2 {
            out.push_buf(input.read_slice(2)?);
        }
        Ok(())
    })
}

#[test]
fn removing_itself_forwards_the_remaining_bytes() {
    let removed = Rc::new(Cell::new(false));
    let flag = Rc::clone(&removed);
    let channel = EmbeddedChannel::new();
    channel.add_last(
        DECODER,
        ByteToMessageDecoder::new(decode_fn(move |ctx, input, _out| {
            assert!(!flag.get(), "decode step called after removal");
            input.read_u8()?;
            ctx.remove_self();
            flag.set(true);
            Ok(())
        })),
    );

    assert!(channel.write_inbound(ByteBuf::copy_from_slice(b"abc")));
    assert!(removed.get());
    assert_eq!(channel.read_inbound_buf(), Some(ByteBuf::copy_from_slice(b"bc")));
    assert!(!channel.contains(DECODER));
    // 剩余字节与读事件共用同一个读批次完成
    assert_eq!(
        channel.tail_events(),
        vec![
            TailEvent::Read,
            TailEvent::ReadComplete {
                channel_active: true
            },
        ]
    );
}

/// 在两次读事件之间由外部摘除，剩余字节转发后补发一个读批次完成。
#[test]
fn removal_between_reads_forwards_leftover_with_read_complete() {
    let channel = EmbeddedChannel::new();
    channel.add_last(DECODER, ByteToMessageDecoder::new(pairs()));
    assert!(channel.write_inbound(ByteBuf::copy_from_slice(b"abc")));
    assert!(channel.remove(DECODER));

    assert_eq!(channel.read_inbound_buf(), Some(ByteBuf::copy_from_slice(b"ab")));
    assert_eq!(channel.read_inbound_buf(), Some(ByteBuf::copy_from_slice(b"c")));
    assert_eq!(
        channel.tail_events(),
        vec![
            TailEvent::Read,
            TailEvent::ReadComplete {
                channel_active: true
            },
            TailEvent::Read,
            TailEvent::ReadComplete {
                channel_active: true
            },
        ]
    );
}

/// 只窥视字节就产出升级消息并摘除自己：消息照常转发，随后是未消费的全部字节。
#[test]
fn message_emitted_before_self_removal_is_forwarded() {
    let channel = EmbeddedChannel::new();
    channel.add_last(
        DECODER,
        ByteToMessageDecoder::new(decode_fn(|ctx, input, out| {
            if input.get_u8(0)? == b'G' {
                out.push_user("upgrade");
                ctx.remove_self();
            }
            Ok(())
        })),
    );

    assert!(channel.write_inbound(ByteBuf::copy_from_slice(b"GET")));
    assert!(channel.check_error().is_ok());
    assert_eq!(channel.read_inbound_user::<&str>(), Some("upgrade"));
    assert_eq!(channel.read_inbound_buf(), Some(ByteBuf::copy_from_slice(b"GET")));
    assert_eq!(
        channel.tail_events(),
        vec![
            TailEvent::Read,
            TailEvent::Read,
            TailEvent::ReadComplete {
                channel_active: true
            },
        ]
    );
}

/// 切出一帧、摘除自己、再修改源缓冲：转发的帧与剩余字节都不受修改影响，
/// 解码步骤只运行一次。
#[test]
fn frame_emitted_before_removal_owns_its_bytes() {
    let source = Rc::new(RefCell::new(ByteBuf::copy_from_slice(b"abc")));
    let inbound = ByteBuf::copy_from_slice(&source.borrow().to_vec());
    let calls = Rc::new(Cell::new(0));

    let step_source = Rc::clone(&source);
    let counter = Rc::clone(&calls);
    let channel = EmbeddedChannel::new();
    channel.add_last(
        DECODER,
        ByteToMessageDecoder::new(decode_fn(move |ctx, input, out| {
            counter.set(counter.get() + 1);
            out.push_buf(input.read_slice(1)?);
            ctx.remove_self();
            step_source.borrow_mut().write_u8(b'd')?;
            Ok(())
        })),
    );

    assert!(channel.write_inbound(inbound));
    assert_eq!(calls.get(), 1);
    assert_eq!(channel.read_inbound_buf(), Some(ByteBuf::copy_from_slice(b"a")));
    assert_eq!(channel.read_inbound_buf(), Some(ByteBuf::copy_from_slice(b"bc")));
    assert!(channel.read_inbound().is_none());
    assert_eq!(source.borrow().to_vec(), b"abcd");
    assert!(!channel.finish());
}

/// 摘除后修改一个无关缓冲，不应导致解码步骤再次被调用。
#[test]
fn writing_an_unrelated_buffer_after_removal_stops_decoding() {
    let source = Rc::new(RefCell::new(ByteBuf::copy_from_slice(b"abc")));
    let inbound = ByteBuf::copy_from_slice(&source.borrow().to_vec());
    let removed = Rc::new(Cell::new(false));

    let step_source = Rc::clone(&source);
    let flag = Rc::clone(&removed);
    let channel = EmbeddedChannel::new();
    channel.add_last(
        DECODER,
        ByteToMessageDecoder::new(decode_fn(move |ctx, input, _out| {
            assert!(!flag.get(), "decode step called after removal");
            input.read_u8()?;
            ctx.remove_self();
            step_source.borrow_mut().write_u8(b'd')?;
            flag.set(true);
            Ok(())
        })),
    );

    channel.write_inbound(inbound);
    assert_eq!(channel.read_inbound_buf(), Some(ByteBuf::copy_from_slice(b"bc")));
    assert!(channel.read_inbound().is_none());
    assert_eq!(source.borrow().to_vec(), b"abcd");
}

/// 读一个字节后自我摘除，并在 `on_removed` 中确认累积缓冲已经释放。
struct ReleaseChecker {
    probe: Option<BufProbe>,
    hook_calls: Rc<Cell<usize>>,
}

impl StreamDecoder for ReleaseChecker {
    fn decode(
        &mut self,
        ctx: &dyn Context,
        input: &mut ByteBuf,
        _out: &mut DecoderOutput,
    ) -> spark_core::Result<()> {
        assert_eq!(input.ref_cnt(), 1);
        self.probe = Some(input.probe());
        input.read_u8()?;
        ctx.remove_self();
        Ok(())
    }

    fn on_removed(&mut self, _ctx: &dyn Context) {
        let probe = self.probe.as_ref().expect("decode ran before removal");
        assert!(probe.is_released(), "cumulation still alive: {probe:?}");
        self.hook_calls.set(self.hook_calls.get() + 1);
    }
}

fn release_checker_channel(hook_calls: &Rc<Cell<usize>>) -> EmbeddedChannel {
    let channel = EmbeddedChannel::new();
    channel.add_last(
        DECODER,
        ByteToMessageDecoder::new(ReleaseChecker {
            probe: None,
            hook_calls: Rc::clone(hook_calls),
        }),
    );
    channel
}

#[test]
fn cumulation_is_released_on_removal_after_full_read() {
    let hook_calls = Rc::new(Cell::new(0));
    let channel = release_checker_channel(&hook_calls);
    assert!(!channel.write_inbound(ByteBuf::copy_from_slice(b"a")));
    assert!(!channel.finish());
    assert_eq!(hook_calls.get(), 1);
}

#[test]
fn cumulation_is_released_on_removal_after_partial_read() {
    let hook_calls = Rc::new(Cell::new(0));
    let channel = release_checker_channel(&hook_calls);
    assert!(channel.write_inbound(ByteBuf::copy_from_slice(b"ab")));
    assert!(channel.finish());
    assert_eq!(channel.read_inbound_buf(), Some(ByteBuf::copy_from_slice(b"b")));
    assert!(channel.read_inbound().is_none());
    assert_eq!(hook_calls.get(), 1);
}

/// 解码中自我摘除时缓冲仍然存活，收尾后才释放。
#[test]
fn removal_during_decode_defers_release() {
    let probe_slot: Rc<RefCell<Option<BufProbe>>> = Rc::default();
    let slot = Rc::clone(&probe_slot);
    let channel = EmbeddedChannel::new();
    channel.add_last(
        DECODER,
        ByteToMessageDecoder::new(decode_fn(move |ctx, input, _out| {
            ctx.remove_self();
            assert!(input.ref_cnt() != 0);
            *slot.borrow_mut() = Some(input.probe());
            Ok(())
        })),
    );

    let bytes = pattern(1024);
    assert!(channel.write_inbound(ByteBuf::copy_from_slice(&bytes)));
    let probe = probe_slot.borrow().clone().expect("decode ran");
    assert!(probe.is_released());
    assert_eq!(channel.read_inbound_buf(), Some(ByteBuf::copy_from_slice(&bytes)));
    assert!(!channel.finish_and_release_all());
}

#[test]
fn release_policy_drops_remaining_bytes_on_removal() {
    let probe_slot: Rc<RefCell<Option<BufProbe>>> = Rc::default();
    let slot = Rc::clone(&probe_slot);
    let channel = EmbeddedChannel::new();
    channel.add_last(
        DECODER,
        ByteToMessageDecoder::new(decode_fn(move |ctx, input, _out| {
            *slot.borrow_mut() = Some(input.probe());
            input.skip_bytes(1)?;
            ctx.remove_self();
            Ok(())
        }))
        .on_removal(RemovalPolicy::Release),
    );

    assert!(!channel.write_inbound(ByteBuf::copy_from_slice(b"abc")));
    assert!(probe_slot.borrow().as_ref().expect("decode ran").is_released());
    assert_eq!(
        channel.tail_events(),
        vec![TailEvent::ReadComplete {
            channel_active: true
        }]
    );
}

/// 关闭时最后一次解码的产出先于读批次完成，读批次完成先于失活事件。
#[test]
fn read_complete_is_fired_on_inactive() {
    struct SkipThenData;

    impl StreamDecoder for SkipThenData {
        fn decode(
            &mut self,
            _ctx: &dyn Context,
            input: &mut ByteBuf,
            _out: &mut DecoderOutput,
        ) -> spark_core::Result<()> {
            let readable = input.readable_bytes();
            assert!(readable > 0);
            input.skip_bytes(readable)?;
            Ok(())
        }

        fn decode_last(
            &mut self,
            _ctx: &dyn Context,
            input: &mut ByteBuf,
            out: &mut DecoderOutput,
        ) -> spark_core::Result<()> {
            assert!(!input.is_readable());
            out.push_user("data");
            Ok(())
        }
    }

    let channel = EmbeddedChannel::new();
    channel.add_last(DECODER, ByteToMessageDecoder::new(SkipThenData));
    assert!(!channel.write_inbound(ByteBuf::copy_from_slice(b"ab")));
    assert!(channel.finish());

    assert_eq!(
        channel.tail_events(),
        vec![
            TailEvent::ReadComplete {
                channel_active: true
            },
            TailEvent::Read,
            TailEvent::ReadComplete {
                channel_active: false
            },
            TailEvent::ChannelInactive,
        ]
    );
    assert_eq!(channel.read_inbound_user::<&str>(), Some("data"));
}

/// 下游收到升级消息后摘除解码器，剩余字节作为一条缓冲转发。
#[test]
fn downstream_removal_while_decoding_forwards_leftover() {
    struct Upgrade;

    struct Switcher;

    impl InboundHandler for Switcher {
        fn on_read(&mut self, ctx: &dyn Context, msg: PipelineMessage) {
            match msg.downcast_user::<Upgrade>() {
                Ok(Upgrade) => {
                    assert!(ctx.remove(DECODER));
                }
                Err(other) => ctx.forward_read(other),
            }
        }
    }

    let channel = EmbeddedChannel::new();
    channel
        .add_last(
            DECODER,
            ByteToMessageDecoder::new(decode_fn(|_ctx, input, out| {
                assert_eq!(input.read_u8()?, b'a');
                out.push_user(Upgrade);
                Ok(())
            })),
        )
        .add_last("switcher", Switcher);

    assert!(channel.write_inbound(ByteBuf::copy_from_slice(b"abc")));
    assert_eq!(channel.read_inbound_buf(), Some(ByteBuf::copy_from_slice(b"bc")));
    assert!(!channel.finish());
}

#[test]
fn decode_last_with_nothing_left() {
    let channel = EmbeddedChannel::new();
    channel.add_last(
        DECODER,
        ByteToMessageDecoder::new(decode_fn(|_ctx, input, out| {
            let readable = input.readable_bytes();
            assert!(readable > 0);
            out.push_buf(input.read_bytes(readable)?);
            Ok(())
        })),
    );
    let bytes = pattern(1024);
    assert!(channel.write_inbound(ByteBuf::copy_from_slice(&bytes)));
    assert_eq!(channel.read_inbound_buf(), Some(ByteBuf::copy_from_slice(&bytes)));
    assert!(channel.read_inbound().is_none());
    assert!(!channel.finish());
    assert!(channel.read_inbound().is_none());
}

#[test]
fn decode_last_with_leftover_bytes() {
    struct HoldLastByte {
        last: bool,
    }

    impl StreamDecoder for HoldLastByte {
        fn decode(
            &mut self,
            _ctx: &dyn Context,
            input: &mut ByteBuf,
            out: &mut DecoderOutput,
        ) -> spark_core::Result<()> {
            let readable = input.readable_bytes();
            assert!(readable > 0);
            if !self.last && readable == 1 {
                return Ok(());
            }
            let take = if self.last { readable } else { readable - 1 };
            out.push_buf(input.read_bytes(take)?);
            Ok(())
        }

        fn decode_last(
            &mut self,
            ctx: &dyn Context,
            input: &mut ByteBuf,
            out: &mut DecoderOutput,
        ) -> spark_core::Result<()> {
            assert!(!self.last, "decode_last called twice");
            self.last = true;
            if input.is_readable() {
                self.decode(ctx, input, out)?;
            }
            Ok(())
        }
    }

    let channel = EmbeddedChannel::new();
    channel.add_last(DECODER, ByteToMessageDecoder::new(HoldLastByte { last: false }));
    let bytes = pattern(1024);
    assert!(channel.write_inbound(ByteBuf::copy_from_slice(&bytes)));
    assert_eq!(
        channel.read_inbound_buf(),
        Some(ByteBuf::copy_from_slice(&bytes[..1023]))
    );
    assert!(channel.read_inbound().is_none());
    assert!(channel.finish());
    assert_eq!(
        channel.read_inbound_buf(),
        Some(ByteBuf::copy_from_slice(&bytes[1023..]))
    );
    assert!(channel.read_inbound().is_none());
}

/// 只读入站缓冲通过拷贝累积，不会触发写入错误。
#[test]
fn read_only_inbound_buffers_are_cumulated_by_copy() {
    let channel = EmbeddedChannel::new();
    channel.add_last(
        DECODER,
        ByteToMessageDecoder::new(decode_fn(|_ctx, _input, _out| Ok(()))),
    );
    let mut first = ByteBuf::with_capacity(8);
    first.write_u8(1).expect("write");
    assert!(!channel.write_inbound(first.as_read_only()));
    assert!(!channel.write_inbound(ByteBuf::copy_from_slice(&[2])));
    assert!(channel.check_error().is_ok());
    assert!(!channel.finish());
}

/// "a"、"b"、"c" 逐块到达：第一帧在 "b" 之后产出，"c" 只能在关闭时处理。
#[test]
fn frames_and_read_completes_keep_arrival_order() {
    let channel = EmbeddedChannel::new();
    channel.add_last(DECODER, ByteToMessageDecoder::new(pairs()));
    channel.write_inbound(ByteBuf::copy_from_slice(b"a"));
    channel.write_inbound(ByteBuf::copy_from_slice(b"b"));
    channel.write_inbound(ByteBuf::copy_from_slice(b"c"));

    assert_eq!(
        channel.tail_events(),
        vec![
            TailEvent::ReadComplete {
                channel_active: true
            },
            TailEvent::Read,
            TailEvent::ReadComplete {
                channel_active: true
            },
            TailEvent::ReadComplete {
                channel_active: true
            },
        ]
    );
    assert_eq!(channel.read_inbound_buf(), Some(ByteBuf::copy_from_slice(b"ab")));

    // 默认的 decode_last 只再调用一次 decode，"c" 凑不成一帧，按默认策略丢弃
    assert!(!channel.finish());
    assert!(channel.check_error().is_ok());
}

#[test]
fn overridden_decode_last_flushes_partial_frame() {
    struct PairsOrRest;

    impl StreamDecoder for PairsOrRest {
        fn decode(
            &mut self,
            _ctx: &dyn Context,
            input: &mut ByteBuf,
            out: &mut DecoderOutput,
        ) -> spark_core::Result<()> {
            if input.readable_bytes() >= 2 {
                out.push_buf(input.read_slice(2)?);
            }
            Ok(())
        }

        fn decode_last(
            &mut self,
            _ctx: &dyn Context,
            input: &mut ByteBuf,
            out: &mut DecoderOutput,
        ) -> spark_core::Result<()> {
            let readable = input.readable_bytes();
            if readable > 0 {
                out.push_buf(input.read_slice(readable)?);
            }
            Ok(())
        }
    }

    let channel = EmbeddedChannel::new();
    channel.add_last(DECODER, ByteToMessageDecoder::new(PairsOrRest));
    channel.write_inbound_all([
        ByteBuf::copy_from_slice(b"a"),
        ByteBuf::copy_from_slice(b"b"),
        ByteBuf::copy_from_slice(b"c"),
    ]);
    assert_eq!(channel.read_inbound_buf(), Some(ByteBuf::copy_from_slice(b"ab")));
    assert!(channel.read_inbound().is_none());

    assert!(channel.finish());
    assert_eq!(channel.read_inbound_buf(), Some(ByteBuf::copy_from_slice(b"c")));
    assert!(channel.read_inbound().is_none());
}

#[test]
fn unconsumed_bytes_can_be_reported_on_close() {
    let channel = EmbeddedChannel::new();
    channel.add_last(
        DECODER,
        ByteToMessageDecoder::new(pairs()).unconsumed_on_close(UnconsumedPolicy::Error),
    );
    channel.write_inbound(ByteBuf::copy_from_slice(b"abc"));
    assert_eq!(channel.read_inbound_buf(), Some(ByteBuf::copy_from_slice(b"ab")));
    assert!(!channel.finish());

    let errors = channel.take_errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].code(), codes::CODEC_UNCONSUMED_ON_CLOSE);
    assert!(channel.tail_events().ends_with(&[
        TailEvent::Error(codes::CODEC_UNCONSUMED_ON_CLOSE),
        TailEvent::ChannelInactive,
    ]));
}

#[test]
fn empty_inbound_buffer_never_reaches_the_step() {
    let calls = Rc::new(Cell::new(0));
    let counter = Rc::clone(&calls);
    let channel = EmbeddedChannel::new();
    channel.add_last(
        DECODER,
        ByteToMessageDecoder::new(decode_fn(move |_ctx, _input, _out| {
            counter.set(counter.get() + 1);
            Ok(())
        })),
    );
    assert!(!channel.write_inbound(ByteBuf::new()));
    assert_eq!(calls.get(), 0);
    assert!(!channel.finish());
    assert_eq!(calls.get(), 0);
}

/// 既不消费也不产出的解码步骤，每个入站事件最多被调用一次。
#[test]
fn step_without_progress_runs_once_per_event() {
    let calls = Rc::new(Cell::new(0));
    let counter = Rc::clone(&calls);
    let channel = EmbeddedChannel::new();
    channel.add_last(
        DECODER,
        ByteToMessageDecoder::new(decode_fn(move |_ctx, _input, _out| {
            counter.set(counter.get() + 1);
            Ok(())
        })),
    );
    channel.write_inbound(ByteBuf::copy_from_slice(b"x"));
    assert_eq!(calls.get(), 1);
    channel.write_inbound(ByteBuf::copy_from_slice(b"y"));
    assert_eq!(calls.get(), 2);
}

#[test]
fn input_shutdown_runs_the_close_procedure() {
    let channel = EmbeddedChannel::new();
    channel.add_last(
        DECODER,
        ByteToMessageDecoder::new(decode_fn(|_ctx, input, out| {
            let readable = input.readable_bytes();
            out.push_buf(input.read_slice(readable)?);
            Ok(())
        }))
        .single_decode(true),
    );
    channel.fire_read(ByteBuf::copy_from_slice(b"tail"));
    channel.shutdown_input();

    assert_eq!(
        channel.tail_events(),
        vec![TailEvent::Read, TailEvent::UserEvent("input_shutdown".to_owned())]
    );
    // 关闭后解码器已卸下，后续字节原样透传
    channel.write_inbound(ByteBuf::copy_from_slice(b"raw"));
    assert_eq!(channel.read_inbound_buf(), Some(ByteBuf::copy_from_slice(b"tail")));
    assert_eq!(channel.read_inbound_buf(), Some(ByteBuf::copy_from_slice(b"raw")));
}

#[test]
fn composite_config_decodes_across_segments() {
    let config = DecoderConfig::from_toml_str(
        r#"
        cumulator = "composite"
        max_components = 2
        "#,
    )
    .expect("config");
    let decoder = ByteToMessageDecoder::with_config(
        decode_fn(|_ctx, input, out| {
            if input.readable_bytes() >= 4 {
                out.push_user(input.read_to_vec(4)?);
            }
            Ok(())
        }),
        &config,
    )
    .expect("valid config");
    assert_eq!(decoder.cumulator_name(), "composite");

    let channel = EmbeddedChannel::new();
    channel.add_last(DECODER, decoder);
    for chunk in [&b"ab"[..], b"c", b"d", b"efg", b"h"] {
        channel.write_inbound(ByteBuf::copy_from_slice(chunk));
    }
    assert_eq!(channel.read_inbound_user::<Vec<u8>>(), Some(b"abcd".to_vec()));
    assert_eq!(channel.read_inbound_user::<Vec<u8>>(), Some(b"efgh".to_vec()));
    assert!(!channel.finish());
}

/// 使用池化分配器时，关闭连接并释放消息后租约全部归还。
#[test]
fn pooled_allocator_has_no_active_leases_after_finish() {
    let pool = SlabBufferPool::new();
    let channel = EmbeddedChannel::with_allocator(Arc::new(pool.clone()));
    channel.add_last(DECODER, ByteToMessageDecoder::new(pairs()));

    let alloc = channel.allocator();
    for chunk in [&b"a"[..], b"bc", b"d", b"e"] {
        let mut buf = alloc.allocate(chunk.len()).expect("pool allocation");
        buf.write_bytes(chunk).expect("write");
        channel.write_inbound(buf.as_read_only());
    }
    assert!(pool.stats().active_leases > 0);
    assert!(channel.finish_and_release_all());
    assert_eq!(pool.stats().active_leases, 0);
}
