//! 可观测性：结构化日志的安装与缓冲。

pub mod logging;

pub use logging::{LogOptions, PrintStrategy};
