//! 可注入时钟：统一“获取当前时间”与“等待指定时长”两种能力。
//!
//! # 设计背景（Why）
//! - 信号量超时、重试退避与超时中间件都依赖时间来源；直接调用系统时钟会让
//!   相关测试不可复现；
//! - 以 trait 注入后，生产环境使用 [`SystemClock`]（委托运行时计时器），
//!   测试注入 [`MockClock`] 并手动推进。
//!
//! # 契约说明（What）
//! - `now` 单调递增；`sleep` 返回的 Future 在至少等待所给时长后完成；
//! - `sleep` Future 遵循标准 Poll 契约：返回 `Pending` 后必须在状态变化时
//!   唤醒注册的 waker。

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// 时钟返回的统一延迟 Future 类型。
pub type Sleep = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// 可注入的时间来源。
///
/// 推荐以 `Arc<dyn Clock>` 注入需要时间能力的组件。
pub trait Clock: Send + Sync + 'static {
    /// 当前的单调时间点。
    fn now(&self) -> Instant;

    /// 在指定时长后完成的睡眠 Future。
    fn sleep(&self, duration: Duration) -> Sleep;
}

/// 生产环境时钟，`sleep` 委托给 tokio 的时间驱动。
///
/// 需要在 tokio 运行时上下文中使用，否则 Future 无法前进。
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> Sleep {
        // tokio 的 sleep 为 `!Unpin`，统一装箱为 `Sleep`。
        Box::pin(tokio::time::sleep(duration))
    }
}

struct SleeperSlot {
    id: u64,
    deadline: Duration,
    waker: Option<Waker>,
}

struct MockClockInner {
    base: Instant,
    elapsed: Mutex<Duration>,
    sleepers: Mutex<Vec<SleeperSlot>>,
    next_id: AtomicU64,
}

/// 虚拟时钟：手动推进时间，在测试中复现确定性的唤醒序列。
///
/// # 行为概览（How）
/// - 内部维护自构造起的虚拟偏移量与待触发的睡眠列表；
/// - [`MockClock::advance`] 增加偏移量并唤醒全部到期的睡眠 Future；
/// - `sleep` 返回的 Future 在未到期前返回 `Pending`，被提前 Drop 时自动
///   从调度队列移除。
#[derive(Clone)]
pub struct MockClock {
    inner: Arc<MockClockInner>,
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MockClock {
    /// 创建以当前系统时间为基准的虚拟时钟。
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MockClockInner {
                base: Instant::now(),
                elapsed: Mutex::new(Duration::ZERO),
                sleepers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// 推进虚拟时间并唤醒到期的睡眠者。
    pub fn advance(&self, delta: Duration) {
        let now = {
            let mut elapsed = self.inner.elapsed.lock();
            *elapsed += delta;
            *elapsed
        };
        let wakers: Vec<Waker> = {
            let mut sleepers = self.inner.sleepers.lock();
            let mut due = Vec::new();
            sleepers.retain_mut(|slot| {
                if slot.deadline <= now {
                    if let Some(waker) = slot.waker.take() {
                        due.push(waker);
                    }
                    false
                } else {
                    true
                }
            });
            due
        };
        for waker in wakers {
            waker.wake();
        }
    }

    /// 当前仍在等待的睡眠者数量，供测试断言。
    pub fn pending_sleepers(&self) -> usize {
        self.inner.sleepers.lock().len()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.inner.base + *self.inner.elapsed.lock()
    }

    fn sleep(&self, duration: Duration) -> Sleep {
        let now = *self.inner.elapsed.lock();
        if duration.is_zero() {
            return Box::pin(std::future::ready(()));
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let deadline = now + duration;
        Box::pin(MockSleep {
            inner: Arc::clone(&self.inner),
            id,
            deadline,
            registered: false,
        })
    }
}

struct MockSleep {
    inner: Arc<MockClockInner>,
    id: u64,
    deadline: Duration,
    registered: bool,
}

impl Future for MockSleep {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let now = *self.inner.elapsed.lock();
        if self.deadline <= now {
            if self.registered {
                let id = self.id;
                self.inner.sleepers.lock().retain(|slot| slot.id != id);
                self.registered = false;
            }
            return Poll::Ready(());
        }
        let mut sleepers = self.inner.sleepers.lock();
        match sleepers.iter_mut().find(|slot| slot.id == self.id) {
            Some(slot) => slot.waker = Some(cx.waker().clone()),
            None => sleepers.push(SleeperSlot {
                id: self.id,
                deadline: self.deadline,
                waker: Some(cx.waker().clone()),
            }),
        }
        drop(sleepers);
        self.registered = true;
        Poll::Pending
    }
}

impl Drop for MockSleep {
    fn drop(&mut self) {
        if self.registered {
            self.inner.sleepers.lock().retain(|slot| slot.id != self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn mock_clock_wakes_on_advance() {
        let clock = MockClock::new();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let sleep = clock.sleep(Duration::from_millis(100));

        let handle = std::thread::spawn(move || {
            futures::executor::block_on(sleep);
            flag.store(true, Ordering::SeqCst);
        });

        // 等待睡眠者注册后再推进，避免竞态导致空推。
        while clock.pending_sleepers() == 0 {
            std::thread::yield_now();
        }
        assert!(!fired.load(Ordering::SeqCst));
        clock.advance(Duration::from_millis(100));
        handle.join().expect("睡眠线程应平稳退出");
        assert!(fired.load(Ordering::SeqCst));
        assert_eq!(clock.pending_sleepers(), 0);
    }

    #[test]
    fn dropped_sleep_unregisters() {
        let clock = MockClock::new();
        let mut sleep = clock.sleep(Duration::from_secs(1));
        // 先 poll 一次完成注册。
        let waker = futures::task::noop_waker();
        let mut cx = Context::from_waker(&waker);
        assert!(matches!(sleep.as_mut().poll(&mut cx), Poll::Pending));
        assert_eq!(clock.pending_sleepers(), 1);
        drop(sleep);
        assert_eq!(clock.pending_sleepers(), 0);
    }
}
