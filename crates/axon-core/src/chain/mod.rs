//! 中间件引擎：启动期一次性折叠调用链。
//!
//! # 设计背景（Why）
//! - 任务的有效链 = 适用的全局中间件（注册顺序）++ 本地使用（声明顺序），
//!   自右向左折叠为单个可调用对象并缓存；调用期没有装配开销；
//! - 全局中间件若传递性依赖目标，依赖图已把该目标记入排除集，这里跳过；
//! - 隧道承接的任务以隧道 `run_task` 作为链终点；`tunnel_policy` 标签携带
//!   `client` 白名单时先过滤本地链。
//!
//! # 契约说明（What）
//! - 结果 Schema 校验发生在链终点：针对用户代码（或隧道）的原始返回值，
//!   中间件的后处理结果不再复检；
//! - 中间件配置在链装配时按其 `config_schema` 校验。

use std::sync::Arc;

use crate::definition::middleware::{
    ChainFn, Next, ResourceMiddlewareDef, ResourceMiddlewareInvocation, TaskMiddlewareDef,
    TaskMiddlewareInvocation,
};
use crate::definition::resource::{ResourceContext, ResourceDef};
use crate::definition::tag::tags;
use crate::definition::task::TaskDef;
use crate::errors::{KernelError, Result};
use crate::injection::{DepOverrides, ResolvedDeps};
use crate::kernel::ids::NodeId;
use crate::kernel::schema::SchemaRef;
use crate::kernel::value::{DynValue, dyn_value};
use crate::lifecycle::resolve::resolve_deps;
use crate::runtime::RuntimeInner;

/// 取任务的缓存链；首次访问时装配。
pub(crate) fn chain_for(inner: &Arc<RuntimeInner>, task: &Arc<TaskDef>) -> Result<ChainFn> {
    if let Some(chain) = inner.chains.lock().get(&task.id) {
        return Ok(chain.clone());
    }
    let chain = build_task_chain(inner, task, None)?;
    inner
        .chains
        .lock()
        .insert(task.id.clone(), chain.clone());
    Ok(chain)
}

/// 装配任务调用链；`overrides` 存在时不入缓存（仅影响本次调用）。
pub(crate) fn build_task_chain(
    inner: &Arc<RuntimeInner>,
    task: &Arc<TaskDef>,
    overrides: Option<&DepOverrides>,
) -> Result<ChainFn> {
    let tunnel = {
        let tunnels = inner.task_tunnels.read();
        tunnels.iter().find(|t| t.covers_task(&task.id)).cloned()
    };

    let terminal: ChainFn = if let Some(tunnel) = &tunnel {
        let transport = Arc::clone(&tunnel.0);
        let task_id = task.id.clone();
        let schema = task.result_schema.clone();
        Arc::new(move |input, _journal| {
            let transport = Arc::clone(&transport);
            let task_id = task_id.clone();
            let schema = schema.clone();
            Box::pin(async move {
                let out = transport.run_task(&task_id, input).await?;
                check_result(&task_id, &schema, &out)?;
                Ok(out)
            })
        })
    } else if let Some(run) = task.run.clone() {
        let deps = resolve_deps(inner, &task.id, &task.dependencies, overrides)?;
        let task_id = task.id.clone();
        let schema = task.result_schema.clone();
        Arc::new(move |input, _journal| {
            let run = Arc::clone(&run);
            let deps = deps.clone();
            let task_id = task_id.clone();
            let schema = schema.clone();
            Box::pin(async move {
                let out = run(input, deps).await?;
                check_result(&task_id, &schema, &out)?;
                Ok(out)
            })
        })
    } else {
        let task_id = task.id.clone();
        Arc::new(move |_input, _journal| {
            let task_id = task_id.clone();
            Box::pin(std::future::ready(Err(
                KernelError::PhantomWithoutTunnel { task: task_id },
            )))
        })
    };

    // 本地链：声明顺序；隧道任务按 tunnel_policy 的 client 白名单过滤。
    let mut local_usages = task.middleware.clone();
    if tunnel.is_some() {
        if let Some(policy) = tags::tunnel_policy().extract(&task.tags) {
            if let Some(client) = policy.client {
                local_usages.retain(|usage| client.iter().any(|id| id == usage.id.as_str()));
            }
        }
    }

    let mut links: Vec<(Arc<TaskMiddlewareDef>, Option<DynValue>)> = Vec::new();
    for middleware in inner.store.task_middlewares_in_order() {
        let Some(predicate) = middleware.everywhere.as_ref() else {
            continue;
        };
        if !predicate(task) || inner.graph.is_excluded(&middleware.id, &task.id) {
            continue;
        }
        links.push((Arc::clone(&middleware), None));
    }
    for usage in &local_usages {
        let middleware = inner.store.task_middleware(&usage.id).ok_or_else(|| {
            KernelError::MissingDependency {
                from: task.id.clone(),
                missing: usage.id.clone(),
            }
        })?;
        check_middleware_config(&middleware.id, &middleware.config_schema, &usage.config)?;
        links.push((middleware, usage.config.clone()));
    }

    let mut chain = terminal;
    for (middleware, config) in links.into_iter().rev() {
        let deps = resolve_deps(inner, &middleware.id, &middleware.dependencies, None)?;
        let run = middleware.run.clone();
        let task_def = Arc::clone(task);
        let inner_chain = chain;
        chain = Arc::new(move |input, journal| {
            let next = Next::new(input.clone(), journal.clone(), Arc::clone(&inner_chain));
            let invocation = TaskMiddlewareInvocation {
                task: Arc::clone(&task_def),
                input,
                next,
                journal,
                deps: deps.clone(),
                config: config.clone(),
            };
            run(invocation)
        });
    }
    Ok(chain)
}

/// 装配资源初始化链；链输入为资源配置，产出为资源值。
pub(crate) fn build_resource_chain(
    inner: &Arc<RuntimeInner>,
    resource: &Arc<ResourceDef>,
    deps: ResolvedDeps,
    context: ResourceContext,
) -> Result<ChainFn> {
    let terminal: ChainFn = match resource.init.clone() {
        Some(init) => {
            let resource_id = resource.id.clone();
            let schema = resource.result_schema.clone();
            Arc::new(move |config, _journal| {
                let fut = init(config, deps.clone(), context.clone());
                let resource_id = resource_id.clone();
                let schema = schema.clone();
                Box::pin(async move {
                    let value = fut.await?;
                    if let Some(schema) = &schema {
                        schema.check(Some(&value)).map_err(|violation| {
                            KernelError::ResourceResultValidation {
                                resource: resource_id.clone(),
                                violation,
                            }
                        })?;
                    }
                    Ok(value)
                })
            })
        }
        // 无 init 的资源取单元值，仅作为组合骨架存在。
        None => Arc::new(move |_config, _journal| Box::pin(std::future::ready(Ok(dyn_value(()))))),
    };

    let mut links: Vec<(Arc<ResourceMiddlewareDef>, Option<DynValue>)> = Vec::new();
    for middleware in inner.store.resource_middlewares_in_order() {
        let Some(predicate) = middleware.everywhere.as_ref() else {
            continue;
        };
        if !predicate(resource) || inner.graph.is_excluded(&middleware.id, &resource.id) {
            continue;
        }
        links.push((Arc::clone(&middleware), None));
    }
    for usage in &resource.middleware {
        let middleware = inner.store.resource_middleware(&usage.id).ok_or_else(|| {
            KernelError::MissingDependency {
                from: resource.id.clone(),
                missing: usage.id.clone(),
            }
        })?;
        check_middleware_config(&middleware.id, &middleware.config_schema, &usage.config)?;
        links.push((middleware, usage.config.clone()));
    }

    let mut chain = terminal;
    for (middleware, config) in links.into_iter().rev() {
        let mw_deps = resolve_deps(inner, &middleware.id, &middleware.dependencies, None)?;
        let run = middleware.run.clone();
        let resource_def = Arc::clone(resource);
        let inner_chain = chain;
        chain = Arc::new(move |config_input, journal| {
            let next = Next::new(config_input.clone(), journal.clone(), Arc::clone(&inner_chain));
            let invocation = ResourceMiddlewareInvocation {
                resource: Arc::clone(&resource_def),
                resource_config: config_input,
                next,
                journal,
                deps: mw_deps.clone(),
                config: config.clone(),
            };
            run(invocation)
        });
    }
    Ok(chain)
}

fn check_result(task: &NodeId, schema: &Option<SchemaRef>, out: &DynValue) -> Result<()> {
    if let Some(schema) = schema {
        schema
            .check(Some(out))
            .map_err(|violation| KernelError::TaskResultValidation {
                task: task.clone(),
                violation,
            })?;
    }
    Ok(())
}

fn check_middleware_config(
    middleware: &NodeId,
    schema: &Option<SchemaRef>,
    config: &Option<DynValue>,
) -> Result<()> {
    if let (Some(schema), Some(config)) = (schema, config) {
        schema
            .check(Some(config))
            .map_err(|violation| KernelError::MiddlewareConfigValidation {
                middleware: middleware.clone(),
                violation,
            })?;
    }
    Ok(())
}

/// 预热全部任务链，启动尾声调用一次。
pub(crate) fn warm_all(inner: &Arc<RuntimeInner>) -> Result<()> {
    for task in inner.store.tasks_in_order() {
        chain_for(inner, &task)?;
    }
    tracing::debug!(tasks = inner.chains.lock().len(), "任务链预热完成");
    Ok(())
}
