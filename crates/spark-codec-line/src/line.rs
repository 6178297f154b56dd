use spark_codec_stream::{DecoderOutput, StreamDecoder};
use spark_core::error::codes;
use spark_core::{ByteBuf, Context, CoreError};

const LF: u8 = b'\n';
const CR: u8 = b'\r';

/// 基于换行符的分帧解码步骤，实现 [`StreamDecoder`] 契约。
///
/// # 设计动机（Why）
/// - 日志流、文本控制协议普遍以行作为帧边界，是验证增量解码引擎最直接的样例；
/// - 攻击者可以发送永不结束的行，因此必须有最大行长并在超限时丢弃而不是无限累积。
///
/// # 行为概览（How）
/// - 正常模式：找到分隔符后切出一行；累积字节超过 `max_length` 仍未见分隔符时进入丢弃模式，
///   跳过已收到的全部字节；
/// - 丢弃模式：持续跳过字节直到遇到分隔符，随后回到正常模式；
/// - `fail_fast` 决定超长错误在进入丢弃模式时立即上报，还是等到整行被跳过后再上报。
///
/// # 契约说明（What）
/// - **输入**：任意切分的字节流；分隔符为 `\n` 或 `\r\n`；
/// - **输出**：默认为去掉分隔符的缓冲切片（零拷贝），`text` 模式下为 `String`；
/// - **错误**：超长行经 `notify_error` 上报 `codec.frame_too_long`，解码继续；
///   非法 UTF-8 以 `protocol.decode` 返回。
///
/// # 权衡与风险（Trade-offs）
/// - 超长错误不中断解码循环，方便连接在一条坏行之后继续服务；
/// - 分隔符查找依赖 [`ByteBuf::index_of`]，组合缓冲上逐段扫描，无需先合并。
#[derive(Debug, Clone)]
pub struct LineFrameDecoder {
    max_length: usize,
    strip_delimiter: bool,
    fail_fast: bool,
    text: bool,
    discarding: bool,
    discarded_bytes: usize,
}

/// [`LineFrameDecoder`] 的构造器。
#[derive(Debug, Clone)]
pub struct LineFrameDecoderBuilder {
    max_length: usize,
    strip_delimiter: bool,
    fail_fast: bool,
    text: bool,
}

impl LineFrameDecoderBuilder {
    /// 是否从产出中去掉分隔符，默认 `true`。
    pub fn strip_delimiter(mut self, strip: bool) -> Self {
        self.strip_delimiter = strip;
        self
    }

    /// 是否在超长时立即上报错误，默认 `false`（整行跳过后上报）。
    pub fn fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// 是否以 UTF-8 `String` 产出，默认 `false`（产出缓冲切片）。
    pub fn text(mut self, text: bool) -> Self {
        self.text = text;
        self
    }

    /// 构造解码步骤。
    pub fn build(self) -> LineFrameDecoder {
        LineFrameDecoder {
            max_length: self.max_length,
            strip_delimiter: self.strip_delimiter,
            fail_fast: self.fail_fast,
            text: self.text,
            discarding: false,
            discarded_bytes: 0,
        }
    }
}

impl LineFrameDecoder {
    /// 以默认选项构造，`max_length` 为不含分隔符的最大行长。
    pub fn new(max_length: usize) -> Self {
        Self::builder(max_length).build()
    }

    /// 获取构造器。
    ///
    /// # 示例
    /// ```rust
    /// use spark_codec_line::LineFrameDecoder;
    /// use spark_codec_stream::ByteToMessageDecoder;
    /// use spark_core::{ByteBuf, EmbeddedChannel};
    ///
    /// let channel = EmbeddedChannel::new();
    /// channel.add_last(
    ///     "lines",
    ///     ByteToMessageDecoder::new(LineFrameDecoder::builder(64).text(true).build()),
    /// );
    /// channel.write_inbound(ByteBuf::copy_from_slice(b"hello\r\nwor"));
    /// channel.write_inbound(ByteBuf::copy_from_slice(b"ld\n"));
    /// assert_eq!(channel.read_inbound_user::<String>().as_deref(), Some("hello"));
    /// assert_eq!(channel.read_inbound_user::<String>().as_deref(), Some("world"));
    /// ```
    pub fn builder(max_length: usize) -> LineFrameDecoderBuilder {
        LineFrameDecoderBuilder {
            max_length,
            strip_delimiter: true,
            fail_fast: false,
            text: false,
        }
    }

    /// 最大行长。
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// 是否处于丢弃超长行的模式。
    pub fn is_discarding(&self) -> bool {
        self.discarding
    }

    fn emit(
        &self,
        input: &mut ByteBuf,
        len: usize,
        out: &mut DecoderOutput,
    ) -> spark_core::Result<()> {
        if !self.text {
            out.push_buf(input.read_slice(len)?);
            return Ok(());
        }
        let raw = input.read_to_vec(len)?;
        let line = String::from_utf8(raw).map_err(|err| {
            CoreError::new(codes::PROTOCOL_DECODE, "line is not valid UTF-8").with_cause(err)
        })?;
        out.push_user(line);
        Ok(())
    }
}

/// 返回行内容长度与分隔符长度；未找到分隔符时返回 `None`。
fn find_end_of_line(input: &ByteBuf) -> Option<(usize, usize)> {
    let lf = input.index_of(LF)?;
    if lf > 0 && input.get_u8(lf - 1).ok() == Some(CR) {
        Some((lf - 1, 2))
    } else {
        Some((lf, 1))
    }
}

fn too_long(length: usize, max_length: usize) -> CoreError {
    CoreError::new(
        codes::CODEC_FRAME_TOO_LONG,
        format!("frame length ({length}) exceeds the allowed maximum ({max_length})"),
    )
}

impl StreamDecoder for LineFrameDecoder {
    fn decode(
        &mut self,
        ctx: &dyn Context,
        input: &mut ByteBuf,
        out: &mut DecoderOutput,
    ) -> spark_core::Result<()> {
        let eol = find_end_of_line(input);

        if self.discarding {
            match eol {
                Some((length, delimiter)) => {
                    let total = self.discarded_bytes + length;
                    input.skip_bytes(length + delimiter)?;
                    self.discarded_bytes = 0;
                    self.discarding = false;
                    tracing::debug!(discarded = total, "skipped over-long line");
                    if !self.fail_fast {
                        ctx.notify_error(too_long(total, self.max_length));
                    }
                }
                None => {
                    let readable = input.readable_bytes();
                    self.discarded_bytes += readable;
                    input.skip_bytes(readable)?;
                }
            }
            return Ok(());
        }

        match eol {
            Some((length, delimiter)) if length > self.max_length => {
                input.skip_bytes(length + delimiter)?;
                ctx.notify_error(too_long(length, self.max_length));
            }
            Some((length, delimiter)) => {
                if self.strip_delimiter {
                    self.emit(input, length, out)?;
                    input.skip_bytes(delimiter)?;
                } else {
                    self.emit(input, length + delimiter, out)?;
                }
            }
            None => {
                let readable = input.readable_bytes();
                if readable > self.max_length {
                    self.discarded_bytes = readable;
                    self.discarding = true;
                    input.skip_bytes(readable)?;
                    if self.fail_fast {
                        ctx.notify_error(CoreError::new(
                            codes::CODEC_FRAME_TOO_LONG,
                            format!(
                                "frame length exceeds {}: over {readable} bytes discarded",
                                self.max_length
                            ),
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_of_line_accepts_both_delimiters() {
        assert_eq!(find_end_of_line(&ByteBuf::copy_from_slice(b"ab\r\nc")), Some((2, 2)));
        assert_eq!(find_end_of_line(&ByteBuf::copy_from_slice(b"ab\nc")), Some((2, 1)));
        assert_eq!(find_end_of_line(&ByteBuf::copy_from_slice(b"\n")), Some((0, 1)));
        assert_eq!(find_end_of_line(&ByteBuf::copy_from_slice(b"ab\r")), None);
    }

    #[test]
    fn builder_defaults() {
        let decoder = LineFrameDecoder::new(8);
        assert_eq!(decoder.max_length(), 8);
        assert!(decoder.strip_delimiter);
        assert!(!decoder.fail_fast);
        assert!(!decoder.text);
        assert!(!decoder.is_discarding());
    }
}
