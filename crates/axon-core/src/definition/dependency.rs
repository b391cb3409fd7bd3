//! 命名依赖集合：节点之间的有向引用与可选语义。
//!
//! # 设计背景（Why）
//! - 依赖以“名称 → 引用”的有序映射声明，名称供节点代码在运行期取值，
//!   引用（种类 + ID + 可选标记）供依赖图建边；
//! - 可选依赖建模为和类型的一翼：目标缺席时不产生边，取值解析为 `None`，
//!   而不是静默失败。
//!
//! # 契约说明（What）
//! - 条目顺序即声明顺序，决定诊断输出与解析遍历的确定性；
//! - 同名条目后写覆盖先写，与构建器“最后一次调用生效”的惯例一致。

use crate::definition::async_context::AsyncContext;
use crate::definition::error_helper::ErrorHelper;
use crate::definition::event::Event;
use crate::definition::resource::Resource;
use crate::definition::task::Task;
use crate::kernel::ids::{NodeId, NodeKind};

/// 单条依赖引用。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DependencyRef {
    pub kind: NodeKind,
    pub id: NodeId,
    pub optional: bool,
}

/// 有序的命名依赖集合。
#[derive(Clone, Debug, Default)]
pub struct DependencySet {
    entries: Vec<(String, DependencyRef)>,
}

impl DependencySet {
    /// 创建空集合。
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, name: impl Into<String>, entry: DependencyRef) -> Self {
        let name = name.into();
        self.entries.retain(|(existing, _)| existing != &name);
        self.entries.push((name, entry));
        self
    }

    /// 声明必需的资源依赖。
    pub fn resource<C, V>(self, name: impl Into<String>, resource: &Resource<C, V>) -> Self {
        self.push(
            name,
            DependencyRef {
                kind: NodeKind::Resource,
                id: resource.id().clone(),
                optional: false,
            },
        )
    }

    /// 声明可选的资源依赖：目标未注册时解析为 `None`。
    pub fn resource_optional<C, V>(
        self,
        name: impl Into<String>,
        resource: &Resource<C, V>,
    ) -> Self {
        self.push(
            name,
            DependencyRef {
                kind: NodeKind::Resource,
                id: resource.id().clone(),
                optional: true,
            },
        )
    }

    /// 声明必需的任务依赖，解析为可调用句柄。
    pub fn task<I, O>(self, name: impl Into<String>, task: &Task<I, O>) -> Self {
        self.push(
            name,
            DependencyRef {
                kind: NodeKind::Task,
                id: task.id().clone(),
                optional: false,
            },
        )
    }

    /// 声明可选的任务依赖。
    pub fn task_optional<I, O>(self, name: impl Into<String>, task: &Task<I, O>) -> Self {
        self.push(
            name,
            DependencyRef {
                kind: NodeKind::Task,
                id: task.id().clone(),
                optional: true,
            },
        )
    }

    /// 声明事件依赖，解析为发射器。
    pub fn event<P>(self, name: impl Into<String>, event: &Event<P>) -> Self {
        self.push(
            name,
            DependencyRef {
                kind: NodeKind::Event,
                id: event.id().clone(),
                optional: false,
            },
        )
    }

    /// 声明异步上下文依赖；非可选且未注册时在启动期报错。
    pub fn context<T>(self, name: impl Into<String>, context: &AsyncContext<T>) -> Self {
        self.push(
            name,
            DependencyRef {
                kind: NodeKind::AsyncContext,
                id: context.id().clone(),
                optional: false,
            },
        )
    }

    /// 声明可选的异步上下文依赖。
    pub fn context_optional<T>(self, name: impl Into<String>, context: &AsyncContext<T>) -> Self {
        self.push(
            name,
            DependencyRef {
                kind: NodeKind::AsyncContext,
                id: context.id().clone(),
                optional: true,
            },
        )
    }

    /// 声明错误助手依赖，解析为抛出句柄。
    pub fn error<D>(self, name: impl Into<String>, helper: &ErrorHelper<D>) -> Self {
        self.push(
            name,
            DependencyRef {
                kind: NodeKind::ErrorHelper,
                id: helper.id().clone(),
                optional: false,
            },
        )
    }

    /// 以裸 ID 声明依赖，供分叉重映射与动态装配使用。
    pub fn raw(self, name: impl Into<String>, entry: DependencyRef) -> Self {
        self.push(name, entry)
    }

    /// 条目视图，按声明顺序。
    pub fn entries(&self) -> &[(String, DependencyRef)] {
        &self.entries
    }

    /// 是否为空。
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn map_resource_ids(&self, remap: &dyn Fn(&NodeId) -> Option<NodeId>) -> Self {
        let entries = self
            .entries
            .iter()
            .map(|(name, entry)| {
                let mapped = if entry.kind == NodeKind::Resource {
                    remap(&entry.id).map(|id| DependencyRef {
                        kind: entry.kind,
                        id,
                        optional: entry.optional,
                    })
                } else {
                    None
                };
                (name.clone(), mapped.unwrap_or_else(|| entry.clone()))
            })
            .collect();
        Self { entries }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_entry_with_same_name_wins() {
        let a = DependencyRef {
            kind: NodeKind::Event,
            id: NodeId::parse("e.first").unwrap(),
            optional: false,
        };
        let b = DependencyRef {
            kind: NodeKind::Event,
            id: NodeId::parse("e.second").unwrap(),
            optional: true,
        };
        let set = DependencySet::new().raw("bus", a).raw("bus", b.clone());
        assert_eq!(set.entries().len(), 1);
        assert_eq!(set.entries()[0].1, b);
    }
}
