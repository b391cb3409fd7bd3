//! 时间抽象命名空间。
//!
//! 超时、重试与退避全部经由可注入的 [`clock::Clock`] 获取时间能力，
//! 生产环境落到运行时的计时器，测试里用虚拟时钟推进，保证完全可复现。

pub mod clock;

pub use clock::{Clock, MockClock, Sleep, SystemClock};
