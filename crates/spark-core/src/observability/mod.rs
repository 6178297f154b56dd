//! 可观测性约定：结构化日志字段键名。
//!
//! 解码链路通过 `tracing` 输出日志，字段名统一取自 [`keys`]，便于日志平台按固定键检索。

pub mod keys;
