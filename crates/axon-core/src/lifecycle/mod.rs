//! 资源生命周期：按拓扑序初始化、逆序释放、失败回卷。
//!
//! # 设计背景（Why）
//! - 初始化次序在启动期由依赖图一次性裁决；顺序模式最易推理，是默认；
//!   并行模式在前置资源全部就绪时即调度，缩短启动耗时；
//! - 初始化失败时，已就绪的资源按逆序释放后再上抛错误，不留半初始化状态。
//!
//! # 契约说明（What）
//! - 每个资源在一次运行内恰好初始化一次，值此后不可变；
//! - 初始化错误带上首个失败资源的 ID 注解，已注解的错误保持原样；
//! - 释放阶段逐个 `await`，错误收集为 `runtime.dispose_aggregate`，
//!   不中断其余资源的释放；重复释放为无操作。

pub mod resolve;

use std::collections::HashSet;
use std::sync::Arc;

use crate::definition::resource::{ResourceContext, ResourceDef};
use crate::definition::tag::tags;
use crate::errors::{KernelError, Result};
use crate::events::TunnelHandle;
use crate::kernel::ids::NodeId;
use crate::pipeline::journal::ExecutionJournal;
use crate::runtime::{InitMode, RuntimeInner};

use resolve::resolve_deps;

/// 按选定模式初始化全部资源；失败时回卷已初始化者后上抛。
pub(crate) async fn initialize(inner: &Arc<RuntimeInner>, mode: InitMode) -> Result<()> {
    let order: Vec<NodeId> = inner.graph.resource_order().to_vec();
    let outcome = match mode {
        InitMode::Sequential => initialize_sequential(inner, &order).await,
        InitMode::Parallel => initialize_parallel(inner, &order).await,
    };
    if let Err(err) = outcome {
        let unwind_errors = dispose_initialized(inner).await;
        for unwind in unwind_errors {
            tracing::error!(error = %unwind.render(), "初始化回卷期间的释放错误");
        }
        return Err(err);
    }
    Ok(())
}

async fn initialize_sequential(inner: &Arc<RuntimeInner>, order: &[NodeId]) -> Result<()> {
    for id in order {
        init_one(inner, id).await?;
    }
    Ok(())
}

/// 并行模式：前置资源全部就绪的节点立即入批，批内并发、批间推进。
async fn initialize_parallel(inner: &Arc<RuntimeInner>, order: &[NodeId]) -> Result<()> {
    let mut pending: Vec<NodeId> = order.to_vec();
    let mut done: HashSet<NodeId> = HashSet::new();
    while !pending.is_empty() {
        let ready: Vec<NodeId> = pending
            .iter()
            .filter(|id| {
                resource_prerequisites(inner, id)
                    .iter()
                    .all(|dep| done.contains(dep))
            })
            .cloned()
            .collect();
        if ready.is_empty() {
            return Err(KernelError::ParallelInitScheduling {
                pending: pending.len(),
            });
        }
        let results =
            futures::future::join_all(ready.iter().map(|id| init_one(inner, id))).await;
        for result in results {
            result?;
        }
        pending.retain(|id| !ready.contains(id));
        done.extend(ready);
    }
    Ok(())
}

/// 某资源的资源前置集合：沿必需边可达的其他资源。
fn resource_prerequisites(inner: &Arc<RuntimeInner>, id: &NodeId) -> Vec<NodeId> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    let mut stack: Vec<NodeId> = inner.graph.dependencies_of(id).to_vec();
    while let Some(current) = stack.pop() {
        if !seen.insert(current.clone()) {
            continue;
        }
        if inner.store.resource(&current).is_some() {
            out.push(current.clone());
        }
        stack.extend(inner.graph.dependencies_of(&current).iter().cloned());
    }
    out
}

/// 初始化单个资源：兑现依赖、过中间件链、存值、登记隧道。
async fn init_one(inner: &Arc<RuntimeInner>, id: &NodeId) -> Result<()> {
    let def = inner
        .store
        .resource(id)
        .ok_or_else(|| KernelError::UnknownNode {
            kind: crate::kernel::ids::NodeKind::Resource,
            id: id.clone(),
        })?;
    tracing::debug!(resource = %def.id, "初始化资源");

    if let Some(schema) = &def.config_schema {
        schema
            .check(def.config.as_ref())
            .map_err(|violation| KernelError::ResourceConfigValidation {
                resource: def.id.clone(),
                violation,
            })?;
    }

    let deps = resolve_deps(inner, &def.id, &def.dependencies, None)
        .map_err(|err| annotate_resource_error(&def.id, err))?;
    let context = ResourceContext::new(def.context_factory.as_ref().map(|factory| factory()));
    let chain = crate::chain::build_resource_chain(inner, &def, deps, context)
        .map_err(|err| annotate_resource_error(&def.id, err))?;
    let journal = ExecutionJournal::new();
    let value = chain(def.config.clone(), journal)
        .await
        .map_err(|err| annotate_resource_error(&def.id, err))?;

    inner.values.write().insert(def.id.clone(), value.clone());
    inner.init_order.lock().push(def.id.clone());
    register_tunnel(inner, &def, &value);
    Ok(())
}

/// 隧道资源：把初始化值登记为任务承接者与事件转发者。
fn register_tunnel(
    inner: &Arc<RuntimeInner>,
    def: &Arc<ResourceDef>,
    value: &crate::kernel::value::DynValue,
) {
    if !tags::is_tunnel(&def.tags) {
        return;
    }
    match value.clone().downcast::<TunnelHandle>() {
        Ok(handle) => {
            inner.task_tunnels.write().push((*handle).clone());
            inner.dispatcher.add_tunnel((*handle).clone());
        }
        Err(_) => {
            tracing::warn!(resource = %def.id, "携带 tunnel 标签但值不是 TunnelHandle，忽略");
        }
    }
}

/// 初始化错误注解：首个失败资源的 ID 保留在最外层，已注解者不再包裹。
fn annotate_resource_error(resource: &NodeId, err: KernelError) -> KernelError {
    match err {
        annotated @ KernelError::ResourceInit { .. } => annotated,
        other => KernelError::ResourceInit {
            resource: resource.clone(),
            source: Box::new(other),
        },
    }
}

/// 逆初始化序释放已就绪的资源，收集而不中断。
pub(crate) async fn dispose_initialized(inner: &Arc<RuntimeInner>) -> Vec<KernelError> {
    let order: Vec<NodeId> = {
        let mut init_order = inner.init_order.lock();
        init_order.drain(..).collect()
    };
    let mut errors = Vec::new();
    for id in order.iter().rev() {
        let value = inner.values.write().remove(id);
        let Some(value) = value else { continue };
        let Some(def) = inner.store.resource(id) else {
            continue;
        };
        if let Some(dispose) = &def.dispose {
            tracing::debug!(resource = %id, "释放资源");
            if let Err(err) = dispose(value).await {
                errors.push(annotate_resource_error(id, err));
            }
        }
    }
    errors
}
