use std::any::{Any, type_name};
use std::fmt;

use crate::buffer::ByteBuf;

/// `PipelineMessage` 是在 Handler 链上流转的入站消息。
///
/// # 设计背景（Why）
/// - 字节解码器只处理字节缓冲，其余消息必须原样透传；枚举把两类消息区分开，
///   解码器无需反射即可判断；
/// - 用户消息以 `Box<dyn Any + Send>` 承载，解码步骤可以产出任意业务类型。
///
/// # 契约说明（What）
/// - `Buffer`：所有权随消息转移，下游负责释放（通常是直接 `Drop`）；
/// - `User`：类型擦除的业务对象，通过 [`PipelineMessage::downcast_user`] 还原；
/// - `Debug` 输出只包含摘要，不打印业务数据。
pub enum PipelineMessage {
    Buffer(ByteBuf),
    User(UserMessage),
}

/// 类型擦除的业务消息，附带类型名便于排障。
pub struct UserMessage {
    type_name: &'static str,
    value: Box<dyn Any + Send>,
}

impl UserMessage {
    /// 封装业务对象。
    pub fn new<T: Any + Send>(value: T) -> Self {
        Self {
            type_name: type_name::<T>(),
            value: Box::new(value),
        }
    }

    /// 业务对象的类型名。
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// 判断是否为 `T`。
    pub fn is<T: Any>(&self) -> bool {
        self.value.is::<T>()
    }

    /// 以引用方式查看业务对象。
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// 还原业务对象，类型不符时原样返回。
    pub fn downcast<T: Any>(self) -> Result<T, Self> {
        let type_name = self.type_name;
        self.value
            .downcast::<T>()
            .map(|boxed| *boxed)
            .map_err(|value| Self { type_name, value })
    }
}

impl PipelineMessage {
    /// 构造业务消息。
    pub fn user<T: Any + Send>(value: T) -> Self {
        PipelineMessage::User(UserMessage::new(value))
    }

    /// 是否为字节缓冲。
    pub fn is_buffer(&self) -> bool {
        matches!(self, PipelineMessage::Buffer(_))
    }

    /// 以引用方式查看字节缓冲。
    pub fn as_buffer(&self) -> Option<&ByteBuf> {
        match self {
            PipelineMessage::Buffer(buf) => Some(buf),
            PipelineMessage::User(_) => None,
        }
    }

    /// 取出字节缓冲，类型不符时原样返回。
    pub fn into_buffer(self) -> Result<ByteBuf, Self> {
        match self {
            PipelineMessage::Buffer(buf) => Ok(buf),
            other => Err(other),
        }
    }

    /// 取出业务对象，类型不符时原样返回。
    pub fn downcast_user<T: Any>(self) -> Result<T, Self> {
        match self {
            PipelineMessage::User(user) => user.downcast::<T>().map_err(PipelineMessage::User),
            other => Err(other),
        }
    }
}

impl From<ByteBuf> for PipelineMessage {
    fn from(buf: ByteBuf) -> Self {
        PipelineMessage::Buffer(buf)
    }
}

impl fmt::Debug for PipelineMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineMessage::Buffer(buf) => f
                .debug_struct("Buffer")
                .field("readable_bytes", &buf.readable_bytes())
                .finish(),
            PipelineMessage::User(user) => f
                .debug_struct("User")
                .field("type", &user.type_name())
                .finish(),
        }
    }
}

impl fmt::Debug for UserMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserMessage")
            .field("type", &self.type_name)
            .finish()
    }
}
