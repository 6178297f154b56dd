use spark_core::{ByteBuf, Context};

use crate::DecoderOutput;

/// `StreamDecoder` 是用户提供的解码步骤：从累积缓冲中切出零到多条消息。
///
/// # 设计背景（Why）
/// - 累积、重入保护、卸载与关闭收尾由 [`ByteToMessageDecoder`](crate::ByteToMessageDecoder)
///   统一处理，协议实现只需要关心“当前字节够不够组成一帧”；
/// - 三个回调对应解码器生命周期中需要协议参与的三个时刻：正常解码、关闭前最后一次解码、
///   从链路摘除。
///
/// # 契约说明（What）
/// - `decode`：字节不足时不消费、不产出并返回 `Ok(())`，解码器会等待更多数据；
///   产出消息时必须消费对应字节，否则解码器上报 `codec.decode_no_progress`；
/// - `decode_last`：连接关闭或输入半关闭时调用一次，`input` 可能为空；
///   默认实现在仍有可读字节时调用一次 `decode`；
/// - `on_removed`：解码器从链路摘除、累积缓冲处置完毕后调用一次；
/// - 任何回调中都可以通过 `ctx.remove_self()` 摘除解码器，当前调用返回后解码循环立即停止；
/// - 以错误返回时，本次调用追加的消息全部丢弃，错误经 `notify_error` 交给下游。
pub trait StreamDecoder {
    /// 尝试从 `input` 中解码消息。
    fn decode(
        &mut self,
        ctx: &dyn Context,
        input: &mut ByteBuf,
        out: &mut DecoderOutput,
    ) -> spark_core::Result<()>;

    /// 连接关闭前的最后一次解码。
    fn decode_last(
        &mut self,
        ctx: &dyn Context,
        input: &mut ByteBuf,
        out: &mut DecoderOutput,
    ) -> spark_core::Result<()> {
        if input.is_readable() {
            self.decode(ctx, input, out)?;
        }
        Ok(())
    }

    /// 解码器已从链路摘除。
    fn on_removed(&mut self, _ctx: &dyn Context) {}
}

/// 以闭包实现的解码步骤，见 [`decode_fn`]。
pub struct DecodeFn<F> {
    f: F,
}

/// 把闭包包装为 [`StreamDecoder`]，适合测试与一次性的小协议。
///
/// ```rust
/// use spark_codec_stream::{ByteToMessageDecoder, decode_fn};
/// use spark_core::{ByteBuf, EmbeddedChannel};
///
/// let channel = EmbeddedChannel::new();
/// channel.add_last(
///     "pairs",
///     ByteToMessageDecoder::new(decode_fn(|_ctx, input, out| {
///         if input.readable_bytes() >= 2 {
///             out.push_buf(input.read_slice(2)?);
///         }
///         Ok(())
///     })),
/// );
/// channel.write_inbound(ByteBuf::copy_from_slice(b"abc"));
/// assert_eq!(channel.read_inbound_buf(), Some(ByteBuf::copy_from_slice(b"ab")));
/// assert_eq!(channel.read_inbound_buf(), None);
/// ```
pub fn decode_fn<F>(f: F) -> DecodeFn<F>
where
    F: FnMut(&dyn Context, &mut ByteBuf, &mut DecoderOutput) -> spark_core::Result<()>,
{
    DecodeFn { f }
}

impl<F> StreamDecoder for DecodeFn<F>
where
    F: FnMut(&dyn Context, &mut ByteBuf, &mut DecoderOutput) -> spark_core::Result<()>,
{
    fn decode(
        &mut self,
        ctx: &dyn Context,
        input: &mut ByteBuf,
        out: &mut DecoderOutput,
    ) -> spark_core::Result<()> {
        (self.f)(ctx, input, out)
    }
}
