use std::any::Any;
use std::vec;

use spark_core::{ByteBuf, PipelineMessage};

/// 解码步骤的产出容器。
///
/// 解码器在每次调用解码步骤前传入空容器，调用返回后按追加顺序把消息转发给下游；
/// 调用以错误返回时容器中的消息全部丢弃。
#[derive(Debug, Default)]
pub struct DecoderOutput {
    messages: Vec<PipelineMessage>,
}

impl DecoderOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一条消息。
    pub fn push(&mut self, msg: impl Into<PipelineMessage>) {
        self.messages.push(msg.into());
    }

    /// 追加一个业务对象。
    pub fn push_user<T: Any + Send>(&mut self, value: T) {
        self.messages.push(PipelineMessage::user(value));
    }

    /// 追加一个字节缓冲。
    pub fn push_buf(&mut self, buf: ByteBuf) {
        self.messages.push(PipelineMessage::Buffer(buf));
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// 丢弃全部消息，缓冲随之释放。
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub(crate) fn drain(&mut self) -> vec::Drain<'_, PipelineMessage> {
        self.messages.drain(..)
    }
}
