//! 隧道契约：把任务调用与事件投递转发到远端对应物的资源值。
//!
//! # 设计背景（Why）
//! - 幻影任务与跨进程事件镜像需要一个“承接者”；隧道资源的值实现
//!   [`TunnelTransport`]，声明自己覆盖哪些任务与事件；
//! - 内核不关心传输细节（HTTP、消息队列、进程内桥接都可），只依赖
//!   这个对象安全的契约。
//!
//! # 契约说明（What）
//! - 资源以 [`TunnelHandle`] 作为初始化值并携带内建 `tunnel` 标签；
//! - `run_task` 的返回值视为任务的原始结果，仍受结果 Schema 约束；
//! - `emit` 返回 `Some(payload)` 时，该载荷覆盖回传之后才启动的本地
//!   监听器（按次序组为粒度）看到的发射载荷。

use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::{KernelError, Result};
use crate::events::emission::EventEmission;
use crate::kernel::ids::NodeId;
use crate::kernel::value::DynValue;

/// 事件经隧道投递的方式。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventDeliveryMode {
    /// 本地照常投递，远端转发并发在途；远端回传载荷覆盖此后尚未启动的
    /// 本地次序组看到的发射载荷。
    Mirror,
    /// 跳过本地监听器，仅投递远端。
    RemoteOnly,
    /// 仅本地投递。
    LocalOnly,
    /// 先远端；失败后回退本地投递。
    RemoteFirst,
}

/// 隧道传输契约。
#[async_trait]
pub trait TunnelTransport: Send + Sync {
    /// 本隧道承接的任务 ID 集合。
    fn task_ids(&self) -> Vec<NodeId> {
        Vec::new()
    }

    /// 承接一次任务调用。
    async fn run_task(&self, task: &NodeId, input: Option<DynValue>) -> Result<DynValue> {
        let _ = input;
        Err(KernelError::PhantomWithoutTunnel { task: task.clone() })
    }

    /// 本隧道转发的事件 ID 集合。
    fn event_ids(&self) -> Vec<NodeId> {
        Vec::new()
    }

    /// 事件投递方式，默认镜像。
    fn event_delivery_mode(&self) -> EventDeliveryMode {
        EventDeliveryMode::Mirror
    }

    /// 把发射转发到远端；回传 `Some(payload)` 时覆盖尚未启动的本地组。
    async fn emit(&self, emission: &EventEmission) -> Result<Option<DynValue>> {
        let _ = emission;
        Ok(None)
    }
}

/// 隧道资源值的统一包装。
#[derive(Clone)]
pub struct TunnelHandle(pub Arc<dyn TunnelTransport>);

impl TunnelHandle {
    /// 包装一个传输实现。
    pub fn new(transport: impl TunnelTransport + 'static) -> Self {
        Self(Arc::new(transport))
    }

    /// 是否承接给定任务。
    pub fn covers_task(&self, task: &NodeId) -> bool {
        self.0.task_ids().iter().any(|id| id == task)
    }

    /// 是否转发给定事件。
    pub fn covers_event(&self, event: &NodeId) -> bool {
        self.0.event_ids().iter().any(|id| id == event)
    }
}

impl core::fmt::Debug for TunnelHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TunnelHandle")
            .field("tasks", &self.0.task_ids().len())
            .field("events", &self.0.event_ids().len())
            .field("mode", &self.0.event_delivery_mode())
            .finish()
    }
}
