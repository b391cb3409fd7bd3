//! 一次性取消令牌：队列作业中止与信号量等待放弃的统一信号源。
//!
//! # 设计背景（Why）
//! - 取消语义需要同时服务同步检查（作业轮询 `is_cancelled`）与异步等待
//!   （`cancelled().await` 参与 `select`），单一原子标记配合通知器即可覆盖两类用法；
//! - 父子派生让“队列整体取消”可以传导到在途作业，而子令牌取消不回溯影响父级。
//!
//! # 契约说明（What）
//! - `cancel` 幂等：首次调用返回 `true`，其后返回 `false`；
//! - 取消单调不可逆；子令牌在父令牌取消后必然报告已取消；
//! - 所有方法可跨线程并发调用。

use std::sync::Arc;
use std::sync::Weak;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

struct CancelInner {
    flag: AtomicBool,
    notify: Notify,
    children: Mutex<Vec<Weak<CancelInner>>>,
}

impl CancelInner {
    fn cancel(&self) -> bool {
        if self.flag.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.notify.notify_waiters();
        let children = std::mem::take(&mut *self.children.lock());
        for child in children {
            if let Some(child) = child.upgrade() {
                child.cancel();
            }
        }
        true
    }
}

/// 取消令牌。克隆共享同一信号源。
#[derive(Clone)]
pub struct Cancellation {
    inner: Arc<CancelInner>,
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}

impl Cancellation {
    /// 创建未触发的令牌。
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancelInner {
                flag: AtomicBool::new(false),
                notify: Notify::new(),
                children: Mutex::new(Vec::new()),
            }),
        }
    }

    /// 派生子令牌：父级取消向下传导，子级取消不影响父级。
    pub fn child(&self) -> Cancellation {
        let child = Cancellation::new();
        if self.is_cancelled() {
            child.inner.cancel();
        } else {
            self.inner.children.lock().push(Arc::downgrade(&child.inner));
            // 注册窗口内父级可能已经取消，补一次检查闭合竞态。
            if self.is_cancelled() {
                child.inner.cancel();
            }
        }
        child
    }

    /// 触发取消；仅首次调用返回 `true`。
    pub fn cancel(&self) -> bool {
        self.inner.cancel()
    }

    /// 是否已取消。
    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::Acquire)
    }

    /// 等待取消发生；若已取消则立即完成。
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // 先登记唤醒兴趣，再复查标记，关闭“设置标记与登记之间”的竞态窗口。
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl core::fmt::Debug for Cancellation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Cancellation")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_idempotent() {
        let token = Cancellation::new();
        assert!(!token.is_cancelled());
        assert!(token.cancel());
        assert!(!token.cancel());
        assert!(token.is_cancelled());
    }

    #[test]
    fn child_inherits_parent_cancellation() {
        let parent = Cancellation::new();
        let child = parent.child();
        parent.cancel();
        assert!(child.is_cancelled());

        let late_child = parent.child();
        assert!(late_child.is_cancelled());
    }

    #[test]
    fn child_cancel_does_not_propagate_upwards() {
        let parent = Cancellation::new();
        let child = parent.child();
        child.cancel();
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_future_resolves() {
        let token = Cancellation::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });
        token.cancel();
        handle.await.expect("等待任务应平稳退出");
    }
}
