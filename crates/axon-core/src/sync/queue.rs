//! 单飞队列：无界 FIFO，同一时刻至多执行一个作业。
//!
//! # 设计背景（Why）
//! - 许多资源（连接握手、顺序写日志）要求操作严格串行；队列把“串行化”
//!   从业务代码中剥离：`run(job)` 把作业挂到链尾，结果仍交还给对应调用方；
//! - 实现为完成信号的接力链而非常驻工作任务：没有后台任务要管理，
//!   调用方丢弃返回的 Future 也不会卡住后继作业。
//!
//! # 契约说明（What）
//! - 作业按入队顺序执行，任意时刻至多一个在途；
//! - `dispose { cancel: false }` 排空在途与待执行作业后返回，此后 `run` 被拒绝；
//!   `dispose { cancel: true }` 向在途作业发取消信号并拒绝尚未启动的作业；
//! - 作业内再次对同一队列调用 `run` 报 `primitive.queue_deadlock`；
//! - 释放幂等；每个作业结束触发一次 `Finish` 事件。

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::{PrimitiveEvent, PrimitiveListener, notify};
use crate::errors::{KernelError, Result};
use crate::kernel::cancellation::Cancellation;
use crate::kernel::future::BoxFuture;

static NEXT_QUEUE_ID: AtomicU64 = AtomicU64::new(1);

struct QueueState {
    /// 最近一个入队作业的完成信号；新作业以此为前驱。
    tail: Option<oneshot::Receiver<()>>,
    disposed: bool,
    /// `cancel` 释放已触发：尚未启动的作业到达队头时直接拒绝。
    cancelled: bool,
    pending: usize,
}

struct QueueInner {
    id: u64,
    state: Mutex<QueueState>,
    cancellation: Cancellation,
    listener: Option<PrimitiveListener>,
}

/// 释放选项。
#[derive(Clone, Copy, Debug, Default)]
pub struct QueueDisposeOptions {
    /// `true` 时向在途作业发取消信号并拒绝待执行作业。
    pub cancel: bool,
}

/// 单飞 FIFO 队列。克隆共享同一条执行链。
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<QueueInner>,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue {
    /// 创建空队列。
    pub fn new() -> Self {
        Self::with_listener(None)
    }

    /// 创建携带生命周期事件回调的队列。
    pub fn with_listener(listener: Option<PrimitiveListener>) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                id: NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed),
                state: Mutex::new(QueueState {
                    tail: None,
                    disposed: false,
                    cancelled: false,
                    pending: 0,
                }),
                cancellation: Cancellation::new(),
                listener,
            }),
        }
    }

    /// 尚未完成的作业数（含在途）。
    pub fn pending_jobs(&self) -> usize {
        self.inner.state.lock().pending
    }

    /// 是否已释放。
    pub fn is_disposed(&self) -> bool {
        self.inner.state.lock().disposed
    }

    /// 把作业挂到链尾；返回的 Future 以该作业自身的结果完成。
    ///
    /// 作业收到一个取消令牌，`dispose { cancel: true }` 时被触发。
    pub fn run<T, F, Fut>(&self, job: F) -> BoxFuture<'static, Result<T>>
    where
        T: Send + 'static,
        F: FnOnce(Cancellation) -> Fut + Send + 'static,
        Fut: core::future::Future<Output = Result<T>> + Send + 'static,
    {
        // 作业在自己的动态作用域内持有队列令牌；这里读到自身令牌即为自入队。
        if crate::ambient::current_queue() == Some(self.inner.id) {
            return Box::pin(std::future::ready(Err(KernelError::QueueDeadlock)));
        }
        let (done_tx, done_rx) = oneshot::channel::<()>();
        let prev = {
            let mut state = self.inner.state.lock();
            if state.disposed {
                return Box::pin(std::future::ready(Err(KernelError::QueueDisposed)));
            }
            state.pending += 1;
            std::mem::replace(&mut state.tail, Some(done_rx))
        };
        let inner = Arc::clone(&self.inner);
        Box::pin(async move {
            if let Some(prev) = prev {
                // 前驱被调用方丢弃时发送端析构，接力照常推进。
                let _ = prev.await;
            }
            let rejected = {
                let state = inner.state.lock();
                state.cancelled
            };
            if rejected {
                let mut state = inner.state.lock();
                state.pending = state.pending.saturating_sub(1);
                drop(state);
                let _ = done_tx.send(());
                return Err(KernelError::QueueDisposed);
            }
            let token = inner.cancellation.child();
            let result = crate::ambient::with_queue_token(inner.id, job(token)).await;
            {
                let mut state = inner.state.lock();
                state.pending = state.pending.saturating_sub(1);
            }
            let _ = done_tx.send(());
            notify(&inner.listener, PrimitiveEvent::Finish);
            result
        })
    }

    /// 释放队列；幂等。
    ///
    /// `cancel: false` 等待链上全部作业完成；`cancel: true` 取消在途作业
    /// 并拒绝尚未启动的作业，仍等待链排空后返回。
    pub async fn dispose(&self, opts: QueueDisposeOptions) {
        let tail = {
            let mut state = self.inner.state.lock();
            if state.disposed {
                None
            } else {
                state.disposed = true;
                if opts.cancel {
                    state.cancelled = true;
                }
                state.tail.take()
            }
        };
        if opts.cancel {
            self.inner.cancellation.cancel();
        }
        if let Some(tail) = tail {
            let _ = tail.await;
        }
    }
}

impl core::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("JobQueue")
            .field("pending", &state.pending)
            .field("disposed", &state.disposed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn jobs_run_in_fifo_order() {
        let queue = JobQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..4 {
            let log = Arc::clone(&log);
            handles.push(queue.run(move |_token| async move {
                log.lock().push(i);
                Ok(i)
            }));
        }
        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.await.expect("作业应成功"), i);
        }
        assert_eq!(*log.lock(), vec![0, 1, 2, 3]);
        assert_eq!(queue.pending_jobs(), 0);
    }

    #[tokio::test]
    async fn self_enqueue_is_a_deadlock() {
        let queue = JobQueue::new();
        let probe = queue.clone();
        let err = queue
            .run(move |_token| {
                let probe = probe.clone();
                async move {
                    let inner: Result<()> = probe.run(|_t| async { Ok(()) }).await;
                    inner
                }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, KernelError::QueueDeadlock));
    }

    #[tokio::test]
    async fn dispose_rejects_new_jobs_and_is_idempotent() {
        let queue = JobQueue::new();
        queue
            .run(|_t| async { Ok(()) })
            .await
            .expect("释放前的作业应成功");
        queue.dispose(QueueDisposeOptions::default()).await;
        queue.dispose(QueueDisposeOptions::default()).await;
        let err = queue.run(|_t| async { Ok(()) }).await.unwrap_err();
        assert!(matches!(err, KernelError::QueueDisposed));
    }

    #[tokio::test]
    async fn cancel_dispose_signals_inflight_job() {
        let queue = JobQueue::new();
        let (started_tx, started_rx) = oneshot::channel::<()>();
        let inflight = queue.run(move |token| async move {
            let _ = started_tx.send(());
            token.cancelled().await;
            Err::<(), _>(KernelError::user_message("被取消"))
        });
        let runner = tokio::spawn(inflight);
        started_rx.await.expect("作业应已启动");

        queue.dispose(QueueDisposeOptions { cancel: true }).await;
        let result = runner.await.expect("任务应结束");
        assert!(result.is_err());
    }
}
