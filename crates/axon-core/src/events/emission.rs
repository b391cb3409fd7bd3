//! 发射对象：一次事件投递的不可变快照与传播控制。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

use crate::definition::tag::TagUsage;
use crate::kernel::ids::NodeId;
use crate::kernel::value::{DynValue, Meta};

/// 一次事件发射。
///
/// # 契约说明（What）
/// - 载荷、来源与时间戳在发射时固定；监听器不得修改载荷，需要衍生数据时
///   应再发新事件；
/// - [`EventEmission::stop_propagation`] 终止后续投递：顺序模式在监听器之间
///   检查，并行模式在次序组之间检查。
#[derive(Clone)]
pub struct EventEmission {
    event: NodeId,
    payload: Option<DynValue>,
    timestamp: SystemTime,
    source: Option<NodeId>,
    meta: Meta,
    tags: Vec<TagUsage>,
    stopped: Arc<AtomicBool>,
}

impl EventEmission {
    pub(crate) fn new(
        event: NodeId,
        payload: Option<DynValue>,
        source: Option<NodeId>,
        meta: Meta,
        tags: Vec<TagUsage>,
    ) -> Self {
        Self {
            event,
            payload,
            timestamp: SystemTime::now(),
            source,
            meta,
            tags,
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 事件 ID。
    pub fn event_id(&self) -> &NodeId {
        &self.event
    }

    /// 类型擦除的载荷。
    pub fn payload_dyn(&self) -> Option<&DynValue> {
        self.payload.as_ref()
    }

    /// 读取类型化载荷。
    pub fn payload<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.payload.clone().and_then(|p| p.downcast::<T>().ok())
    }

    /// 发射来源（发起节点的 ID）。
    pub fn source(&self) -> Option<&NodeId> {
        self.source.as_ref()
    }

    /// 发射时刻。
    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    /// 事件声明携带的元数据。
    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    /// 事件声明携带的标签使用。
    pub fn tags(&self) -> &[TagUsage] {
        &self.tags
    }

    /// 终止后续投递。
    pub fn stop_propagation(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    /// 是否已请求终止传播。
    pub fn is_propagation_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// 以新载荷派生副本（隧道回传载荷覆盖时使用），共享传播状态。
    pub(crate) fn with_payload(&self, payload: Option<DynValue>) -> Self {
        Self {
            event: self.event.clone(),
            payload,
            timestamp: self.timestamp,
            source: self.source.clone(),
            meta: self.meta.clone(),
            tags: self.tags.clone(),
            stopped: Arc::clone(&self.stopped),
        }
    }
}

impl core::fmt::Debug for EventEmission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventEmission")
            .field("event", &self.event)
            .field("source", &self.source)
            .field("stopped", &self.is_propagation_stopped())
            .finish_non_exhaustive()
    }
}
