use std::fmt;

/// 沿 Handler 链传播的用户事件。
///
/// - `InputShutdown`：对端半关闭输入方向，字节解码器据此执行与连接关闭相同的收尾流程；
/// - `Custom`：业务自定义事件，以字符串标签标识。
#[derive(Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum UserEvent {
    InputShutdown,
    Custom(String),
}

impl UserEvent {
    /// 事件标签，用于日志与测试断言。
    pub fn label(&self) -> &str {
        match self {
            UserEvent::InputShutdown => "input_shutdown",
            UserEvent::Custom(label) => label,
        }
    }
}

impl fmt::Debug for UserEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserEvent({})", self.label())
    }
}
