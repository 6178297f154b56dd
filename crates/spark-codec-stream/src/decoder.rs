use std::any::type_name;

use spark_core::buffer::BufferError;
use spark_core::error::codes;
use spark_core::{ByteBuf, Context, CoreError, InboundHandler, PipelineMessage, UserEvent};
use tracing::{debug, trace, warn};

use crate::config::{DEFAULT_DISCARD_AFTER_READS, DecoderConfig, RemovalPolicy, UnconsumedPolicy};
use crate::cumulator::{Cumulator, MergeCumulator};
use crate::{DecoderOutput, StreamDecoder};

/// 解码器在链路中的挂载状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Attachment {
    /// 尚未装入或已经卸载：入站缓冲原样透传，不再调用解码步骤。
    Detached,
    Attached,
    /// 解码步骤执行期间观察到摘除，收尾推迟到当前调用返回之后。
    DetachRequested,
    /// 连接关闭收尾中。
    Draining,
}

/// `ByteToMessageDecoder` 把任意切分的入站字节流转换为离散消息。
///
/// # 设计背景（Why）
/// - 传输层交付的字节块与协议帧边界无关：一块可能包含半帧，也可能包含多帧；
///   解码器负责跨事件保留未消费的字节，并反复调用解码步骤直到无法继续；
/// - 解码步骤可能在执行中把解码器从链路摘除（协议升级），也可能在关闭时仍有残留字节，
///   这些生命周期分支与协议无关，统一在此处理，保证每个缓冲在所有退出路径上恰好释放一次。
///
/// # 逻辑解析（How）
/// - 入站缓冲先经 [`Cumulator`] 与累积缓冲合并，再进入解码循环；
/// - 解码循环每次调用前记录可读字节数，调用返回后按追加顺序转发产出，
///   无产出且无消费时退出等待更多数据；
/// - 调用期间观察到摘除时进入 `DetachRequested`，循环在当前调用返回后停止，
///   随后按 [`RemovalPolicy`] 处置累积缓冲并转入 `Detached`；
/// - 连接失活或输入半关闭时先解码剩余字节，再调用一次 `decode_last`，
///   按 [`UnconsumedPolicy`] 处理仍未消费的字节，最后转发关闭事件。
///
/// # 契约说明（What）
/// - 解码步骤不会重入，也不会在 `Detached` 之后被调用；
/// - 单次调用追加的消息在下一次调用之前全部转发；调用失败时这些消息被丢弃；
/// - 失败经 `notify_error` 交给下游，解码器不关闭连接，累积缓冲保持有效；
/// - 非缓冲消息原样透传，空缓冲直接释放且不改变任何状态。
///
/// # 设计取舍（Trade-offs）
/// - 产出消息却未消费字节视为解码步骤缺陷并上报 `codec.decode_no_progress`，
///   而不是无限循环；
/// - 每累计 `discard_after_reads` 次仍有残留的读取才压缩一次累积缓冲，
///   避免频繁 `memmove`，代价是已读前缀暂时占用内存。
pub struct ByteToMessageDecoder<D> {
    step: D,
    cumulator: Box<dyn Cumulator>,
    cumulation: Option<ByteBuf>,
    state: Attachment,
    single_decode: bool,
    discard_after_reads: usize,
    num_reads: usize,
    on_removal: RemovalPolicy,
    unconsumed_on_close: UnconsumedPolicy,
    removed_hook_ran: bool,
}

impl<D: StreamDecoder> ByteToMessageDecoder<D> {
    /// 使用默认配置（线性拷贝累积、转发剩余字节、关闭时丢弃残留）包装解码步骤。
    pub fn new(step: D) -> Self {
        Self {
            step,
            cumulator: Box::new(MergeCumulator),
            cumulation: None,
            state: Attachment::Detached,
            single_decode: false,
            discard_after_reads: DEFAULT_DISCARD_AFTER_READS,
            num_reads: 0,
            on_removal: RemovalPolicy::default(),
            unconsumed_on_close: UnconsumedPolicy::default(),
            removed_hook_ran: false,
        }
    }

    /// 按配置构造，配置非法时返回 `config.invalid`。
    pub fn with_config(step: D, config: &DecoderConfig) -> spark_core::Result<Self> {
        config.validate()?;
        Ok(Self::new(step)
            .with_cumulator(config.build_cumulator())
            .single_decode(config.single_decode)
            .discard_after_reads(config.discard_after_reads)
            .on_removal(config.on_removal)
            .unconsumed_on_close(config.unconsumed_on_close))
    }

    /// 替换累积策略。
    pub fn with_cumulator(mut self, cumulator: Box<dyn Cumulator>) -> Self {
        self.cumulator = cumulator;
        self
    }

    /// 单次解码模式：每个入站事件最多转发一批产出。
    pub fn single_decode(mut self, single_decode: bool) -> Self {
        self.single_decode = single_decode;
        self
    }

    /// 设置压缩累积缓冲的读取次数阈值，0 按 1 处理。
    pub fn discard_after_reads(mut self, reads: usize) -> Self {
        self.discard_after_reads = reads.max(1);
        self
    }

    pub fn on_removal(mut self, policy: RemovalPolicy) -> Self {
        self.on_removal = policy;
        self
    }

    pub fn unconsumed_on_close(mut self, policy: UnconsumedPolicy) -> Self {
        self.unconsumed_on_close = policy;
        self
    }

    pub fn is_single_decode(&self) -> bool {
        self.single_decode
    }

    /// 当前使用的累积策略名称。
    pub fn cumulator_name(&self) -> &'static str {
        self.cumulator.name()
    }

    pub fn step(&self) -> &D {
        &self.step
    }

    pub fn step_mut(&mut self) -> &mut D {
        &mut self.step
    }

    /// 累积缓冲当前的可读字节数。
    pub fn actual_readable_bytes(&self) -> usize {
        self.cumulation.as_ref().map_or(0, ByteBuf::readable_bytes)
    }

    fn decoder_name(&self) -> &'static str {
        type_name::<D>()
    }

    /// 记录调用期间发生的摘除，返回是否需要停止解码。
    fn observe_removal(&mut self, ctx: &dyn Context) -> bool {
        if ctx.is_removed() && self.state != Attachment::Detached {
            self.state = Attachment::DetachRequested;
        }
        self.state == Attachment::DetachRequested
    }

    /// 反复调用解码步骤直到无法继续，返回转发的消息数。
    fn call_decode(&mut self, ctx: &dyn Context) -> usize {
        let mut out = DecoderOutput::new();
        let mut forwarded = 0;
        while matches!(self.state, Attachment::Attached | Attachment::Draining) {
            let Some(input) = self.cumulation.as_mut() else {
                break;
            };
            let before = input.readable_bytes();
            if before == 0 {
                break;
            }

            let result = self.step.decode(ctx, input, &mut out);
            let consumed = before.saturating_sub(input.readable_bytes());
            trace!(
                codec.decoder = type_name::<D>(),
                codec.readable_bytes = before,
                codec.consumed_bytes = consumed,
                codec.messages = out.len(),
                "decode step returned"
            );
            let removed = self.observe_removal(ctx);

            if let Err(err) = result {
                out.clear();
                ctx.notify_error(decode_failure(err));
                break;
            }
            if removed {
                // 摘除后仍转发本次调用的产出，剩余字节交给卸载收尾
                forwarded += forward_all(ctx, &mut out);
                break;
            }
            if out.is_empty() {
                if consumed == 0 {
                    break;
                }
                continue;
            }
            if consumed == 0 {
                out.clear();
                ctx.notify_error(CoreError::new(
                    codes::CODEC_DECODE_NO_PROGRESS,
                    format!(
                        "{} produced messages without consuming any of {before} readable bytes",
                        self.decoder_name()
                    ),
                ));
                break;
            }

            forwarded += forward_all(ctx, &mut out);
            if self.observe_removal(ctx) || self.single_decode {
                break;
            }
        }
        forwarded
    }

    /// 关闭前的最后一次解码，返回转发的消息数。
    fn call_decode_last(&mut self, ctx: &dyn Context) -> usize {
        let mut input = self.cumulation.take().unwrap_or_default();
        let mut out = DecoderOutput::new();
        let result = self.step.decode_last(ctx, &mut input, &mut out);
        self.cumulation = Some(input);
        self.observe_removal(ctx);

        match result {
            Ok(()) => forward_all(ctx, &mut out),
            Err(err) => {
                out.clear();
                ctx.notify_error(decode_failure(err));
                0
            }
        }
    }

    /// 一次读事件结束后的收尾：处理推迟的摘除、释放读空的累积缓冲或周期性压缩。
    fn after_read(&mut self, ctx: &dyn Context) {
        if self.state == Attachment::DetachRequested {
            // 链路随后派发的读批次完成已覆盖本次转发的剩余字节
            self.finalize_detach(ctx, false);
            return;
        }
        let Some(cumulation) = self.cumulation.as_mut() else {
            return;
        };
        if !cumulation.is_readable() {
            self.num_reads = 0;
            self.cumulation = None;
            return;
        }
        self.num_reads += 1;
        if self.num_reads >= self.discard_after_reads {
            self.num_reads = 0;
            discard_some_read_bytes(cumulation);
        }
    }

    /// 卸载收尾：按策略处置累积缓冲并调用一次 `on_removed`，可重复调用。
    ///
    /// `fire_read_complete` 只在读事件之外卸载时为真；返回是否转发了剩余字节。
    fn finalize_detach(&mut self, ctx: &dyn Context, fire_read_complete: bool) -> bool {
        let mut forwarded = false;
        self.state = Attachment::Detached;
        self.num_reads = 0;
        if let Some(mut cumulation) = self.cumulation.take() {
            let readable = cumulation.readable_bytes();
            debug!(
                codec.decoder = type_name::<D>(),
                codec.readable_bytes = readable,
                codec.policy = self.on_removal.as_str(),
                "decoder detached"
            );
            if readable > 0 && self.on_removal == RemovalPolicy::ForwardRemaining {
                let remaining = cumulation.read_bytes(readable);
                drop(cumulation);
                match remaining {
                    Ok(remaining) => {
                        ctx.forward_read(PipelineMessage::Buffer(remaining));
                        forwarded = true;
                        if fire_read_complete {
                            ctx.forward_read_complete();
                        }
                    }
                    Err(err) => ctx.notify_error(err.into()),
                }
            }
        }
        if !self.removed_hook_ran {
            self.removed_hook_ran = true;
            self.step.on_removed(ctx);
        }
        forwarded
    }

    /// 连接关闭或输入半关闭：解码剩余字节、最后一次解码、处置残留，转入 `Detached`。
    fn drain_on_close(&mut self, ctx: &dyn Context) {
        if self.state != Attachment::Attached {
            return;
        }
        self.state = Attachment::Draining;
        debug!(
            codec.decoder = type_name::<D>(),
            codec.readable_bytes = self.actual_readable_bytes(),
            "input closed, draining cumulation"
        );

        let mut produced = self.call_decode(ctx);
        if self.state == Attachment::Draining {
            produced += self.call_decode_last(ctx);
        }
        if self.state == Attachment::DetachRequested {
            if self.finalize_detach(ctx, false) {
                produced += 1;
            }
        } else {
            self.dispose_unconsumed(ctx);
            self.state = Attachment::Detached;
        }
        if produced > 0 {
            ctx.forward_read_complete();
        }
    }

    fn dispose_unconsumed(&mut self, ctx: &dyn Context) {
        let Some(cumulation) = self.cumulation.take() else {
            return;
        };
        let leftover = cumulation.readable_bytes();
        drop(cumulation);
        if leftover == 0 {
            return;
        }
        match self.unconsumed_on_close {
            UnconsumedPolicy::Discard => warn!(
                codec.decoder = type_name::<D>(),
                codec.readable_bytes = leftover,
                codec.policy = self.unconsumed_on_close.as_str(),
                "discarding undecoded bytes at end of stream"
            ),
            UnconsumedPolicy::Error => ctx.notify_error(CoreError::new(
                codes::CODEC_UNCONSUMED_ON_CLOSE,
                format!("{leftover} bytes left undecoded at end of stream"),
            )),
        }
    }
}

impl<D: StreamDecoder> InboundHandler for ByteToMessageDecoder<D> {
    fn handler_added(&mut self, ctx: &dyn Context) {
        self.cumulation = None;
        self.state = Attachment::Attached;
        debug!(
            codec.decoder = type_name::<D>(),
            codec.cumulator = self.cumulator.name(),
            handler = ctx.name(),
            "decoder attached"
        );
    }

    /// 解码步骤执行期间的摘除已由 `observe_removal` 记录并在读事件收尾时处理，
    /// 此处只会遇到事件之间的摘除或重复通知。
    fn handler_removed(&mut self, ctx: &dyn Context) {
        self.finalize_detach(ctx, true);
    }

    fn on_read(&mut self, ctx: &dyn Context, msg: PipelineMessage) {
        let incoming = match msg.into_buffer() {
            Ok(incoming) => incoming,
            Err(other) => {
                ctx.forward_read(other);
                return;
            }
        };
        if self.state != Attachment::Attached {
            ctx.forward_read(PipelineMessage::Buffer(incoming));
            return;
        }
        if !incoming.is_readable() {
            return;
        }

        let alloc = ctx.allocator();
        let previous = self.cumulation.take();
        trace!(
            codec.cumulator = self.cumulator.name(),
            codec.readable_bytes = previous.as_ref().map_or(0, ByteBuf::readable_bytes),
            incoming = incoming.readable_bytes(),
            "cumulating inbound buffer"
        );
        match self.cumulator.cumulate(alloc.as_ref(), previous, incoming) {
            Ok(cumulation) => self.cumulation = Some(cumulation),
            Err(failure) => {
                let (err, retained) = failure.into_parts();
                self.cumulation = retained;
                debug!(
                    codec.cumulator = self.cumulator.name(),
                    codec.readable_bytes = self.actual_readable_bytes(),
                    error = %err,
                    "cumulation failed"
                );
                ctx.notify_error(err);
                return;
            }
        }

        self.call_decode(ctx);
        self.after_read(ctx);
    }

    fn on_read_complete(&mut self, ctx: &dyn Context) {
        self.num_reads = 0;
        if let Some(cumulation) = self.cumulation.as_mut() {
            discard_some_read_bytes(cumulation);
        }
        ctx.forward_read_complete();
    }

    fn on_channel_inactive(&mut self, ctx: &dyn Context) {
        self.drain_on_close(ctx);
        ctx.forward_channel_inactive();
    }

    fn on_user_event(&mut self, ctx: &dyn Context, event: UserEvent) {
        if event == UserEvent::InputShutdown {
            self.drain_on_close(ctx);
        }
        ctx.forward_user_event(event);
    }
}

/// 仅在独占时压缩，避免影响共享同一存储的其它视图。
fn discard_some_read_bytes(cumulation: &mut ByteBuf) {
    if cumulation.ref_cnt() == 1 {
        cumulation.discard_read_bytes();
    }
}

fn forward_all(ctx: &dyn Context, out: &mut DecoderOutput) -> usize {
    let mut forwarded = 0;
    for msg in out.drain() {
        ctx.forward_read(msg);
        forwarded += 1;
    }
    forwarded
}

/// 缓冲层错误说明解码步骤读写越界，统一包装为 `codec.decode_failed`；其余错误原样上报。
fn decode_failure(err: CoreError) -> CoreError {
    let from_buffer = err
        .find_cause::<BufferError>()
        .is_some_and(|buffer| buffer.code() == err.code());
    if from_buffer {
        CoreError::new(
            codes::CODEC_DECODE_FAILED,
            format!("decode step failed: {err}"),
        )
        .with_cause(err)
    } else {
        err
    }
}
