//! 计数信号量：FIFO 等待、超时/取消、许可直递与可观测指标。
//!
//! # 设计背景（Why）
//! - 有界并发是资源保护的基本手段；等待队列保持 FIFO，避免许可被后来者
//!   插队导致饥饿；
//! - 归还许可时优先直接移交给队头等待者：计数上不会出现“先加后减”的空窗，
//!   任何时刻在途持有者不超过上限；
//! - 超时依赖注入的 [`Clock`]，相关行为在虚拟时钟下完全可复现。
//!
//! # 契约说明（What）
//! - `max_permits` 必须为正，否则构造报 `primitive.semaphore_invalid_permits`；
//! - `acquire` 支持超时与取消信号，先到者生效；两条路径都会清理等待槽位，
//!   竞态中已送达的许可被归还；
//! - `dispose` 以 `"Semaphore has been disposed"` 拒绝全部等待者，其后
//!   `acquire` 立即拒绝、`release` 为空操作；幂等。

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::{PrimitiveEvent, PrimitiveListener, notify};
use crate::errors::{KernelError, Result};
use crate::kernel::cancellation::Cancellation;
use crate::time::{Clock, SystemClock};

struct Waiter {
    id: u64,
    grant: oneshot::Sender<()>,
}

struct SemaphoreState {
    available: usize,
    waiters: Vec<Waiter>,
    disposed: bool,
    next_waiter_id: u64,
}

struct SemaphoreInner {
    max_permits: usize,
    state: Mutex<SemaphoreState>,
    clock: Arc<dyn Clock>,
    listener: Option<PrimitiveListener>,
}

/// `acquire` 的等待选项。
#[derive(Clone, Default)]
pub struct AcquireOptions {
    /// 最长等待时长；超过后报 `primitive.semaphore_timeout`。
    pub timeout: Option<Duration>,
    /// 取消信号；触发后报 `primitive.semaphore_aborted`。
    pub cancellation: Option<Cancellation>,
}

/// 信号量的即时指标快照。
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SemaphoreMetrics {
    pub available_permits: usize,
    pub waiting_count: usize,
    pub max_permits: usize,
    /// 在途占用比例，`0.0..=1.0`。
    pub utilization: f64,
    pub disposed: bool,
}

/// 计数信号量。克隆共享同一许可池。
#[derive(Clone)]
pub struct Semaphore {
    inner: Arc<SemaphoreInner>,
}

impl Semaphore {
    /// 创建许可上限为 `max_permits` 的信号量；上限必须为正。
    pub fn new(max_permits: usize) -> Result<Self> {
        Self::with_clock(max_permits, Arc::new(SystemClock))
    }

    /// 以自定义时钟创建，测试中注入虚拟时钟。
    pub fn with_clock(max_permits: usize, clock: Arc<dyn Clock>) -> Result<Self> {
        Self::with_parts(max_permits, clock, None)
    }

    /// 完整构造：自定义时钟与生命周期事件回调。
    pub fn with_parts(
        max_permits: usize,
        clock: Arc<dyn Clock>,
        listener: Option<PrimitiveListener>,
    ) -> Result<Self> {
        if max_permits == 0 {
            return Err(KernelError::SemaphoreInvalidPermits { requested: 0 });
        }
        Ok(Self {
            inner: Arc::new(SemaphoreInner {
                max_permits,
                state: Mutex::new(SemaphoreState {
                    available: max_permits,
                    waiters: Vec::new(),
                    disposed: false,
                    next_waiter_id: 0,
                }),
                clock,
                listener,
            }),
        })
    }

    /// 获取一个许可；许可可用时立即返回，否则按 FIFO 排队等待。
    pub async fn acquire(&self, opts: AcquireOptions) -> Result<()> {
        let (waiter_id, rx) = {
            let mut state = self.inner.state.lock();
            if state.disposed {
                return Err(KernelError::SemaphoreDisposed);
            }
            if state.available > 0 {
                state.available -= 1;
                drop(state);
                notify(&self.inner.listener, PrimitiveEvent::Acquired);
                return Ok(());
            }
            let (grant, rx) = oneshot::channel::<()>();
            let id = state.next_waiter_id;
            state.next_waiter_id += 1;
            state.waiters.push(Waiter { id, grant });
            (id, rx)
        };

        let timeout = opts.timeout;
        let sleep = timeout.map(|d| self.inner.clock.sleep(d));
        let cancellation = opts.cancellation;

        let mut rx = rx;
        let timed_out = async {
            match sleep {
                Some(sleep) => sleep.await,
                None => std::future::pending().await,
            }
        };
        let aborted = async {
            match &cancellation {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            granted = &mut rx => match granted {
                Ok(()) => {
                    notify(&self.inner.listener, PrimitiveEvent::Acquired);
                    Ok(())
                }
                // 发送端仅在释放信号量时被集中丢弃。
                Err(_) => Err(KernelError::SemaphoreDisposed),
            },
            _ = timed_out => {
                self.abandon_wait(waiter_id, &mut rx);
                Err(KernelError::SemaphoreAcquireTimeout {
                    timeout: timeout.unwrap_or_default(),
                })
            }
            _ = aborted => {
                self.abandon_wait(waiter_id, &mut rx);
                Err(KernelError::SemaphoreAcquireAborted)
            }
        }
    }

    /// 撤出等待队列；若许可已在竞态中送达则立即归还。
    fn abandon_wait(&self, waiter_id: u64, rx: &mut oneshot::Receiver<()>) {
        let still_queued = {
            let mut state = self.inner.state.lock();
            let before = state.waiters.len();
            state.waiters.retain(|w| w.id != waiter_id);
            state.waiters.len() != before
        };
        if !still_queued && rx.try_recv().is_ok() {
            self.release();
        }
    }

    /// 归还一个许可；存在等待者时直接移交给队头。
    pub fn release(&self) {
        let handed_over = {
            let mut state = self.inner.state.lock();
            if state.disposed {
                return;
            }
            loop {
                if state.waiters.is_empty() {
                    if state.available < self.inner.max_permits {
                        state.available += 1;
                    }
                    break false;
                }
                let waiter = state.waiters.remove(0);
                // 接收端已放弃（超时/取消竞态）则跳到下一个等待者。
                if waiter.grant.send(()).is_ok() {
                    break true;
                }
            }
        };
        let _ = handed_over;
        notify(&self.inner.listener, PrimitiveEvent::Released);
    }

    /// 获取许可、执行闭包、无论成败都归还许可。
    ///
    /// 返回的 Future 中途被丢弃时，已获取的许可同样被归还。
    pub async fn with_permit<T, F, Fut>(&self, opts: AcquireOptions, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: core::future::Future<Output = Result<T>>,
    {
        self.acquire(opts).await?;
        let guard = PermitGuard { semaphore: self };
        let out = f().await;
        drop(guard);
        out
    }

    /// 释放信号量：拒绝全部等待者；幂等。
    pub fn dispose(&self) {
        let waiters = {
            let mut state = self.inner.state.lock();
            if state.disposed {
                return;
            }
            state.disposed = true;
            std::mem::take(&mut state.waiters)
        };
        // 丢弃发送端即可让所有等待者以 disposed 结束。
        drop(waiters);
    }

    /// 当前可用许可数。
    pub fn available_permits(&self) -> usize {
        self.inner.state.lock().available
    }

    /// 当前等待者数量。
    pub fn waiting_count(&self) -> usize {
        self.inner.state.lock().waiters.len()
    }

    /// 许可上限。
    pub fn max_permits(&self) -> usize {
        self.inner.max_permits
    }

    /// 是否已释放。
    pub fn is_disposed(&self) -> bool {
        self.inner.state.lock().disposed
    }

    /// 指标快照。
    pub fn metrics(&self) -> SemaphoreMetrics {
        let state = self.inner.state.lock();
        let in_use = self.inner.max_permits - state.available;
        SemaphoreMetrics {
            available_permits: state.available,
            waiting_count: state.waiters.len(),
            max_permits: self.inner.max_permits,
            utilization: in_use as f64 / self.inner.max_permits as f64,
            disposed: state.disposed,
        }
    }
}

struct PermitGuard<'a> {
    semaphore: &'a Semaphore,
}

impl Drop for PermitGuard<'_> {
    fn drop(&mut self) {
        self.semaphore.release();
    }
}

impl core::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let metrics = self.metrics();
        f.debug_struct("Semaphore")
            .field("available", &metrics.available_permits)
            .field("waiting", &metrics.waiting_count)
            .field("max", &metrics.max_permits)
            .field("disposed", &metrics.disposed)
            .finish()
    }
}
