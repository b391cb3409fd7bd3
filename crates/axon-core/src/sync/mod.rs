//! 并发原语命名空间：单飞队列与计数信号量。
//!
//! 两个原语都支持生命周期事件回调（作业完成、许可获取/归还），
//! 回调内的 panic 被就地捕获并记入日志，绝不向调用方扩散。

pub mod queue;
pub mod semaphore;

use std::sync::Arc;

pub use queue::{JobQueue, QueueDisposeOptions};
pub use semaphore::{AcquireOptions, Semaphore, SemaphoreMetrics};

/// 原语生命周期事件。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrimitiveEvent {
    /// 队列中一个作业执行完毕（无论成败）。
    Finish,
    /// 信号量许可被获取。
    Acquired,
    /// 信号量许可被归还。
    Released,
}

/// 原语事件回调。
pub type PrimitiveListener = Arc<dyn Fn(PrimitiveEvent) + Send + Sync>;

/// 调用监听器并吞掉 panic；监听器故障不得影响原语本身。
pub(crate) fn notify(listener: &Option<PrimitiveListener>, event: PrimitiveEvent) {
    if let Some(listener) = listener {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| listener(event)));
        if result.is_err() {
            tracing::warn!(?event, "原语事件监听器 panic，已忽略");
        }
    }
}
