//! 内建节点：内核自身声明的事件。

use std::sync::Arc;

use crate::definition::event::{Event, EventDef};
use crate::definition::Node;
use crate::kernel::ids::NodeId;
use crate::kernel::value::Meta;

/// 启动完成事件：资源全部就绪、监听器布线完毕后发射一次。
///
/// 该事件发射之后注册表与监听器进入只读状态。
pub const READY_EVENT_ID: &str = "core.events.ready";

fn ready_def() -> Arc<EventDef> {
    Arc::new(EventDef {
        id: NodeId::from_static(READY_EVENT_ID),
        meta: Meta::new(),
        tags: Vec::new(),
        parallel: false,
        payload_schema: None,
    })
}

/// 启动完成事件的门面，供钩子订阅。
pub fn ready_event() -> Event<()> {
    Event::from_def(ready_def())
}

/// 内建事件的注册清单。
pub(crate) fn builtin_nodes() -> Vec<Node> {
    vec![Node::Event(ready_def())]
}
