//! 可观测性键名契约：解码链路日志字段的单一事实来源。
//!
//! 教案式说明（Why）：`tracing` 宏的字段名必须以字面量书写，这里集中列出全部键名，
//! 调用点与测试断言都以此为准，避免多处漂移。
//! 契约定义（What）：各子模块提供只读常量，常量值与日志中出现的字段名逐字一致。

/// logging 键名分组
pub mod logging {
    /// 增量解码日志字段
    ///
    /// 累积、解码循环与生命周期收尾过程中输出的结构化字段。
    pub mod codec {
        #[doc = "类型：日志字段。"]
        #[doc = "适用范围：日志。"]
        #[doc = ""]
        #[doc = "解码步骤的类型名。"]
        pub const FIELD_DECODER: &str = "codec.decoder";

        #[doc = "类型：日志字段。"]
        #[doc = "适用范围：日志。"]
        #[doc = ""]
        #[doc = "累积缓冲当前的可读字节数。"]
        pub const FIELD_READABLE_BYTES: &str = "codec.readable_bytes";

        #[doc = "类型：日志字段。"]
        #[doc = "适用范围：日志。"]
        #[doc = ""]
        #[doc = "累积策略名称：`merge` 或 `composite`。"]
        pub const FIELD_CUMULATOR: &str = "codec.cumulator";

        #[doc = "类型：日志字段。"]
        #[doc = "适用范围：日志。"]
        #[doc = ""]
        #[doc = "单次解码调用消费的字节数。"]
        pub const FIELD_CONSUMED_BYTES: &str = "codec.consumed_bytes";

        #[doc = "类型：日志字段。"]
        #[doc = "适用范围：日志。"]
        #[doc = ""]
        #[doc = "单次解码调用产出的消息数。"]
        pub const FIELD_MESSAGES: &str = "codec.messages";

        #[doc = "类型：日志字段。"]
        #[doc = "适用范围：日志、运维事件。"]
        #[doc = ""]
        #[doc = "卸载或关闭时生效的剩余字节处置策略。"]
        pub const FIELD_POLICY: &str = "codec.policy";
    }
}
