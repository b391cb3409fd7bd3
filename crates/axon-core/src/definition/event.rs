//! 事件定义：带类型载荷的发布/订阅信号。
//!
//! `parallel` 标记决定投递策略：顺序逐个等待，或按次序分组并行。
//! 载荷 Schema 为可选的运行期校验。

use std::marker::PhantomData;
use std::sync::Arc;

use crate::definition::tag::TagUsage;
use crate::errors::Result;
use crate::kernel::ids::NodeId;
use crate::kernel::schema::{SchemaRef, of_type};
use crate::kernel::value::Meta;

/// 事件的不可变定义。
#[derive(Clone)]
pub struct EventDef {
    pub id: NodeId,
    pub meta: Meta,
    pub tags: Vec<TagUsage>,
    /// `true` 时按次序分组并行投递；默认顺序投递。
    pub parallel: bool,
    pub payload_schema: Option<SchemaRef>,
}

impl core::fmt::Debug for EventDef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventDef")
            .field("id", &self.id)
            .field("parallel", &self.parallel)
            .finish_non_exhaustive()
    }
}

/// 事件的类型化门面，`P` 为载荷类型。
pub struct Event<P = ()> {
    pub(crate) def: Arc<EventDef>,
    _marker: PhantomData<fn(P)>,
}

impl<P> Clone for Event<P> {
    fn clone(&self) -> Self {
        Self {
            def: Arc::clone(&self.def),
            _marker: PhantomData,
        }
    }
}

impl<P> Event<P> {
    /// 事件 ID。
    pub fn id(&self) -> &NodeId {
        &self.def.id
    }

    /// 底层定义。
    pub fn definition(&self) -> &Arc<EventDef> {
        &self.def
    }

    pub(crate) fn from_def(def: Arc<EventDef>) -> Self {
        Self {
            def,
            _marker: PhantomData,
        }
    }
}

impl<P> Event<P>
where
    P: Send + Sync + 'static,
{
    /// 开始构建一个事件。
    pub fn builder(id: impl Into<Arc<str>>) -> EventBuilder<P> {
        EventBuilder {
            id: NodeId::parse(id),
            meta: Meta::new(),
            tags: Vec::new(),
            parallel: false,
            payload_schema: None,
            _marker: PhantomData,
        }
    }
}

/// 事件构建器。
pub struct EventBuilder<P> {
    id: Result<NodeId>,
    meta: Meta,
    tags: Vec<TagUsage>,
    parallel: bool,
    payload_schema: Option<SchemaRef>,
    _marker: PhantomData<fn(P)>,
}

impl<P> EventBuilder<P>
where
    P: Send + Sync + 'static,
{
    /// 附加一条描述性元数据。
    pub fn meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    /// 附加一个标签使用。
    pub fn tag(mut self, usage: TagUsage) -> Self {
        self.tags.push(usage);
        self
    }

    /// 切换为按次序分组的并行投递。
    pub fn parallel(mut self) -> Self {
        self.parallel = true;
        self
    }

    /// 启用载荷类型校验（按 `P` 做运行期检查）。
    pub fn validate_payload(mut self) -> Self {
        self.payload_schema = Some(of_type::<P>());
        self
    }

    /// 使用自定义载荷 Schema。
    pub fn payload_schema(mut self, schema: SchemaRef) -> Self {
        self.payload_schema = Some(schema);
        self
    }

    /// 完成构建。
    pub fn build(self) -> Result<Event<P>> {
        let id = self.id?;
        Ok(Event::from_def(Arc::new(EventDef {
            id,
            meta: self.meta,
            tags: self.tags,
            parallel: self.parallel,
            payload_schema: self.payload_schema,
        })))
    }
}

impl<P> From<Event<P>> for crate::definition::Node {
    fn from(event: Event<P>) -> Self {
        crate::definition::Node::Event(event.def)
    }
}

impl<P> From<&Event<P>> for crate::definition::Node {
    fn from(event: &Event<P>) -> Self {
        crate::definition::Node::Event(Arc::clone(&event.def))
    }
}
