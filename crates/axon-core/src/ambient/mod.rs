//! 任务局部的环境存储：上下文值、发射栈与队列令牌的单一载体。
//!
//! # 设计背景（Why）
//! - 三类“动态作用域”状态共享同一传播机制：异步上下文的 `provide/use`、
//!   事件重发环检测的发射栈、队列死锁检测的当前队列令牌；
//! - 统一挂在一个任务局部存储上，作用域由 `scope` 包裹的 Future 界定，
//!   返回与出错路径都自动恢复外层状态，不存在全局可变量。
//!
//! # 契约说明（What）
//! - 存储沿当前任务内的 `await` 链传播；内核的投递与初始化路径不跨任务
//!   `spawn`，因此作用域语义在整条管线上保持；
//! - 读取操作在任意同步上下文中安全：不在作用域内时得到 `None`/空栈。

use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::{KernelError, Result};
use crate::kernel::ids::NodeId;
use crate::kernel::value::DynValue;

/// 一帧在途发射：事件 ID 与来源。
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct EmissionFrame {
    pub event: NodeId,
    pub source: Option<NodeId>,
}

#[derive(Clone, Default)]
struct AmbientStore {
    contexts: HashMap<NodeId, DynValue>,
    emissions: Arc<Vec<EmissionFrame>>,
    queue: Option<u64>,
}

tokio::task_local! {
    static STORE: AmbientStore;
}

fn snapshot() -> AmbientStore {
    STORE.try_with(|s| s.clone()).unwrap_or_default()
}

/// 在 `fut` 的动态作用域内安装一个上下文值。
pub(crate) async fn provide_context<F>(key: NodeId, value: DynValue, fut: F) -> F::Output
where
    F: core::future::Future,
{
    let mut next = snapshot();
    next.contexts.insert(key, value);
    STORE.scope(next, fut).await
}

/// 读取当前作用域内的上下文值。
pub(crate) fn context_value(key: &NodeId) -> Result<DynValue> {
    STORE
        .try_with(|s| s.contexts.get(key).cloned())
        .ok()
        .flatten()
        .ok_or_else(|| KernelError::ContextUnavailable {
            context: key.clone(),
        })
}

/// 在压入一帧发射的作用域内执行 `fut`。
pub(crate) async fn with_emission_frame<F>(frame: EmissionFrame, fut: F) -> F::Output
where
    F: core::future::Future,
{
    let mut next = snapshot();
    let mut emissions = (*next.emissions).clone();
    emissions.push(frame);
    next.emissions = Arc::new(emissions);
    STORE.scope(next, fut).await
}

/// 当前任务的在途发射栈，自外向内。
pub(crate) fn emission_stack() -> Arc<Vec<EmissionFrame>> {
    STORE
        .try_with(|s| Arc::clone(&s.emissions))
        .unwrap_or_default()
}

/// 在持有队列令牌的作用域内执行作业。
pub(crate) async fn with_queue_token<F>(token: u64, fut: F) -> F::Output
where
    F: core::future::Future,
{
    let mut next = snapshot();
    next.queue = Some(token);
    STORE.scope(next, fut).await
}

/// 当前作业所属的队列令牌。
pub(crate) fn current_queue() -> Option<u64> {
    STORE.try_with(|s| s.queue).ok().flatten()
}
