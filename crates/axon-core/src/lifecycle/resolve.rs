//! 依赖兑现：把声明引用解析为节点代码可见的活值。
//!
//! # 契约说明（What）
//! - 任务解析为经完整执行管线的可调用句柄；资源解析为其已初始化的值；
//!   事件解析为携带声明方来源的发射器；上下文与错误助手解析为访问句柄；
//! - 可选依赖的目标缺席解析为 [`DepValue::Absent`]；
//! - 句柄内部持有运行时的弱引用：运行时释放后的调用报 `runtime.disposed`，
//!   句柄本身不延长运行时生命周期。

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use crate::definition::dependency::DependencySet;
use crate::errors::{KernelError, Result};
use crate::events::EmitOptions;
use crate::injection::{
    ContextAccess, DepOverrides, DepValue, ErrorRaiser, EventEmitter, ResolvedDeps, TaskCallable,
};
use crate::kernel::ids::{NodeId, NodeKind};
use crate::runtime::RuntimeInner;

/// 为 `owner` 解析其依赖集合。
pub(crate) fn resolve_deps(
    inner: &Arc<RuntimeInner>,
    owner: &NodeId,
    deps: &DependencySet,
    overrides: Option<&DepOverrides>,
) -> Result<ResolvedDeps> {
    let mut entries = HashMap::new();
    for (name, entry) in deps.entries() {
        let value = match inner.store.kind_of(&entry.id) {
            None => {
                if entry.optional {
                    DepValue::Absent
                } else {
                    return Err(KernelError::MissingDependency {
                        from: owner.clone(),
                        missing: entry.id.clone(),
                    });
                }
            }
            Some(NodeKind::Task) => DepValue::Task(task_callable(inner, entry.id.clone())),
            Some(NodeKind::Resource) => {
                let value = inner.values.read().get(&entry.id).cloned();
                match value {
                    Some(value) => DepValue::Resource(value),
                    None if entry.optional => DepValue::Absent,
                    None => {
                        return Err(KernelError::MissingDependency {
                            from: owner.clone(),
                            missing: entry.id.clone(),
                        });
                    }
                }
            }
            Some(NodeKind::Event) => {
                DepValue::Emitter(event_emitter(inner, entry.id.clone(), owner.clone()))
            }
            Some(NodeKind::AsyncContext) => {
                let def = inner.store.async_context(&entry.id).ok_or_else(|| {
                    KernelError::UnknownNode {
                        kind: NodeKind::AsyncContext,
                        id: entry.id.clone(),
                    }
                })?;
                DepValue::Context(ContextAccess { def })
            }
            Some(NodeKind::ErrorHelper) => {
                let def = inner.store.error_helper(&entry.id).ok_or_else(|| {
                    KernelError::UnknownNode {
                        kind: NodeKind::ErrorHelper,
                        id: entry.id.clone(),
                    }
                })?;
                DepValue::Error(ErrorRaiser { def })
            }
            Some(other) => {
                return Err(KernelError::DependencyAccess {
                    owner: owner.clone(),
                    name: name.clone(),
                    detail: format!("{other} 不能作为依赖注入"),
                });
            }
        };
        entries.insert(name.clone(), value);
    }
    let resolved = ResolvedDeps::new(owner.clone(), entries);
    Ok(match overrides {
        Some(overrides) => resolved.merged_with(overrides),
        None => resolved,
    })
}

/// 生成任务的可调用句柄；调用经完整执行管线。
pub(crate) fn task_callable(inner: &Arc<RuntimeInner>, task: NodeId) -> TaskCallable {
    let weak: Weak<RuntimeInner> = Arc::downgrade(inner);
    let task_id = task.clone();
    TaskCallable {
        task,
        invoke: Arc::new(move |input| {
            let weak = weak.clone();
            let task_id = task_id.clone();
            Box::pin(async move {
                let inner = weak.upgrade().ok_or(KernelError::RuntimeDisposed {
                    operation: "调用任务",
                })?;
                let def =
                    inner
                        .store
                        .task(&task_id)
                        .ok_or_else(|| KernelError::UnknownNode {
                            kind: NodeKind::Task,
                            id: task_id.clone(),
                        })?;
                crate::pipeline::invoke_task(inner, def, input, None).await
            })
        }),
    }
}

/// 生成携带声明方来源的事件发射器。
pub(crate) fn event_emitter(
    inner: &Arc<RuntimeInner>,
    event: NodeId,
    source: NodeId,
) -> EventEmitter {
    let weak: Weak<RuntimeInner> = Arc::downgrade(inner);
    let event_id = event.clone();
    EventEmitter {
        event,
        send: Arc::new(move |payload, source_override| {
            let weak = weak.clone();
            let event_id = event_id.clone();
            let source = source_override.unwrap_or_else(|| source.clone());
            Box::pin(async move {
                let inner = weak.upgrade().ok_or(KernelError::RuntimeDisposed {
                    operation: "发射事件",
                })?;
                let def =
                    inner
                        .store
                        .event(&event_id)
                        .ok_or_else(|| KernelError::UnknownNode {
                            kind: NodeKind::Event,
                            id: event_id.clone(),
                        })?;
                inner
                    .dispatcher
                    .emit(&def, payload, Some(source), EmitOptions::default())
                    .await
                    .map(|_| ())
            })
        }),
    }
}
