//! 运行时入口：`run(root)` 的启动编排与对外句柄。
//!
//! # 启动时序（How）
//! 1. 按日志选项安装订阅者（可缓冲）；
//! 2. 从根资源收集注册表，构建依赖图；
//! 3. 按拓扑序初始化资源（顺序或并行）；
//! 4. 兑现钩子依赖并布线监听器，预热任务链；
//! 5. 发射内建 `core.events.ready`，随后锁定注册表与监听器、冲刷日志；
//! 6. 按需安装进程级停机钩子。
//!
//! # 契约说明（What）
//! - 初始化失败时已就绪资源按逆序释放，错误携带失败资源的 ID 注解上抛；
//! - [`Runtime::dispose`] 幂等；释放后的任务调用与事件发射报 `runtime.disposed`。

pub mod shutdown;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::definition::builtin::READY_EVENT_ID;
use crate::definition::hook::HookTarget;
use crate::definition::middleware::ChainFn;
use crate::definition::{Event, Resource, Task};
use crate::errors::{KernelError, Result};
use crate::events::registry::ListenerFn;
use crate::events::{EmitOptions, EmitReport, EventDispatcher, TunnelHandle};
use crate::graph::DependencyGraph;
use crate::injection::DepOverrides;
use crate::kernel::ids::{NodeId, NodeKind};
use crate::kernel::value::{DynValue, downcast_ref, dyn_value};
use crate::observability::logging::{self, LogGuard, LogOptions};
use crate::store::Store;
use crate::time::{Clock, SystemClock};

/// 资源初始化模式。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InitMode {
    /// 按拓扑序逐个初始化，默认。
    #[default]
    Sequential,
    /// 前置就绪即调度的并行初始化。
    Parallel,
}

/// `run` 的选项。
#[derive(Clone)]
pub struct RunOptions {
    pub logs: LogOptions,
    /// 安装进程信号与 panic 桥接。
    pub shutdown_hooks: bool,
    /// 事件重发环检测开关。
    pub runtime_cycle_detection: bool,
    pub init_mode: InitMode,
    /// 统一时钟注入；缺省为系统时钟。
    pub clock: Option<Arc<dyn Clock>>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            logs: LogOptions::default(),
            shutdown_hooks: false,
            runtime_cycle_detection: true,
            init_mode: InitMode::Sequential,
            clock: None,
        }
    }
}

/// 运行时内部共享状态。
pub(crate) struct RuntimeInner {
    pub(crate) store: Store,
    pub(crate) graph: DependencyGraph,
    pub(crate) dispatcher: EventDispatcher,
    pub(crate) values: RwLock<HashMap<NodeId, DynValue>>,
    pub(crate) chains: Mutex<HashMap<NodeId, ChainFn>>,
    pub(crate) task_tunnels: RwLock<Vec<TunnelHandle>>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) init_order: Mutex<Vec<NodeId>>,
    ready: AtomicBool,
    disposed: AtomicBool,
    log_guard: LogGuard,
}

impl RuntimeInner {
    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

/// 以 `root` 为组合根启动运行时。
pub async fn run<C, V>(root: &Resource<C, V>, options: RunOptions) -> Result<Runtime>
where
    C: Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    let log_guard = logging::install(&options.logs);
    let store = Store::collect(Arc::clone(root.definition()))?;
    let graph = DependencyGraph::build(&store)?;
    let inner = Arc::new(RuntimeInner {
        store,
        graph,
        dispatcher: EventDispatcher::new(options.runtime_cycle_detection),
        values: RwLock::new(HashMap::new()),
        chains: Mutex::new(HashMap::new()),
        task_tunnels: RwLock::new(Vec::new()),
        clock: options.clock.clone().unwrap_or_else(|| Arc::new(SystemClock)),
        init_order: Mutex::new(Vec::new()),
        ready: AtomicBool::new(false),
        disposed: AtomicBool::new(false),
        log_guard,
    });

    if let Err(err) = boot(&inner, &options).await {
        inner.log_guard.flush();
        return Err(err);
    }

    if options.shutdown_hooks {
        shutdown::install(&inner);
    }

    Ok(Runtime {
        inner,
        root: root.id().clone(),
    })
}

async fn boot(inner: &Arc<RuntimeInner>, options: &RunOptions) -> Result<()> {
    crate::lifecycle::initialize(inner, options.init_mode).await?;
    wire_hooks(inner)?;
    crate::chain::warm_all(inner)?;

    // 就绪事件先于锁定：ready 监听器是最后一个合法的启动期扩展点。
    let ready_id = NodeId::from_static(READY_EVENT_ID);
    if let Some(ready_def) = inner.store.event(&ready_id) {
        inner
            .dispatcher
            .emit(&ready_def, None, None, EmitOptions::default())
            .await?;
    }
    inner.ready.store(true, Ordering::Release);
    inner.store.lock();
    inner.dispatcher.lock();
    inner.log_guard.flush();
    tracing::debug!(root = %inner.store.root_id(), "运行时就绪");
    Ok(())
}

/// 兑现钩子依赖并把监听器布线到登记簿。
fn wire_hooks(inner: &Arc<RuntimeInner>) -> Result<()> {
    for hook in inner.store.hooks_in_order() {
        let deps = crate::lifecycle::resolve::resolve_deps(inner, &hook.id, &hook.dependencies, None)?;
        let run = hook.run.clone();
        let listener: ListenerFn = Arc::new(move |emission| run(emission, deps.clone()));
        match &hook.on {
            HookTarget::One(event) => {
                inner.dispatcher.registry().add(
                    Some(event),
                    hook.id.clone(),
                    hook.order,
                    hook.filter.clone(),
                    listener,
                )?;
            }
            HookTarget::Many(events) => {
                for event in events {
                    inner.dispatcher.registry().add(
                        Some(event),
                        hook.id.clone(),
                        hook.order,
                        hook.filter.clone(),
                        Arc::clone(&listener),
                    )?;
                }
            }
            HookTarget::Global => {
                inner.dispatcher.registry().add(
                    None,
                    hook.id.clone(),
                    hook.order,
                    hook.filter.clone(),
                    listener,
                )?;
            }
        }
    }
    Ok(())
}

/// 释放运行时：逆序释放资源，聚合错误；幂等。
pub(crate) async fn dispose_inner(inner: &Arc<RuntimeInner>) -> Result<()> {
    if inner.disposed.swap(true, Ordering::AcqRel) {
        return Ok(());
    }
    let errors = crate::lifecycle::dispose_initialized(inner).await;
    if errors.is_empty() {
        Ok(())
    } else {
        Err(KernelError::DisposeAggregate { errors })
    }
}

/// 运行时对外句柄。
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
    root: NodeId,
}

impl Runtime {
    /// 调用一个任务。
    pub async fn run_task<I, O>(&self, task: &Task<I, O>, input: I) -> Result<O>
    where
        I: Clone + Send + Sync + 'static,
        O: Clone + Send + Sync + 'static,
    {
        let out = self
            .run_task_dyn(task.id(), Some(dyn_value(input)), None)
            .await?;
        self.decode_output(task.id(), out)
    }

    /// 带单次依赖替换地调用一个任务。
    pub async fn run_task_with<I, O>(
        &self,
        task: &Task<I, O>,
        input: I,
        overrides: DepOverrides,
    ) -> Result<O>
    where
        I: Clone + Send + Sync + 'static,
        O: Clone + Send + Sync + 'static,
    {
        let out = self
            .run_task_dyn(task.id(), Some(dyn_value(input)), Some(overrides))
            .await?;
        self.decode_output(task.id(), out)
    }

    /// 类型擦除形态的任务调用。
    pub async fn run_task_dyn(
        &self,
        task: &NodeId,
        input: Option<DynValue>,
        overrides: Option<DepOverrides>,
    ) -> Result<DynValue> {
        let def = self
            .inner
            .store
            .task(task)
            .ok_or_else(|| KernelError::UnknownNode {
                kind: NodeKind::Task,
                id: task.clone(),
            })?;
        crate::pipeline::invoke_task(Arc::clone(&self.inner), def, input, overrides).await
    }

    fn decode_output<O>(&self, task: &NodeId, out: DynValue) -> Result<O>
    where
        O: Clone + Send + Sync + 'static,
    {
        downcast_ref::<O>(&out)
            .cloned()
            .ok_or_else(|| KernelError::DependencyAccess {
                owner: task.clone(),
                name: task.to_string(),
                detail: format!("任务结果无法转换为 {}", std::any::type_name::<O>()),
            })
    }

    /// 发射一个事件（默认选项：出错即抛）。
    pub async fn emit<P>(&self, event: &Event<P>, payload: P) -> Result<()>
    where
        P: Send + Sync + 'static,
    {
        self.emit_with(event, payload, EmitOptions::default())
            .await
            .map(|_| ())
    }

    /// 以显式选项发射事件，可强制取回投递报告。
    pub async fn emit_with<P>(
        &self,
        event: &Event<P>,
        payload: P,
        opts: EmitOptions,
    ) -> Result<Option<EmitReport>>
    where
        P: Send + Sync + 'static,
    {
        if self.inner.is_disposed() {
            return Err(KernelError::RuntimeDisposed {
                operation: "发射事件",
            });
        }
        let def = self
            .inner
            .store
            .event(event.id())
            .ok_or_else(|| KernelError::UnknownNode {
                kind: NodeKind::Event,
                id: event.id().clone(),
            })?;
        self.inner
            .dispatcher
            .emit(&def, Some(dyn_value(payload)), None, opts)
            .await
    }

    /// 读取资源的初始化值。
    pub fn resource_value<C, V>(&self, resource: &Resource<C, V>) -> Result<Arc<V>>
    where
        C: Clone + Send + Sync + 'static,
        V: Send + Sync + 'static,
    {
        let value = self
            .inner
            .values
            .read()
            .get(resource.id())
            .cloned()
            .ok_or_else(|| KernelError::UnknownNode {
                kind: NodeKind::Resource,
                id: resource.id().clone(),
            })?;
        value
            .downcast::<V>()
            .map_err(|_| KernelError::DependencyAccess {
                owner: resource.id().clone(),
                name: resource.id().to_string(),
                detail: format!("资源值无法转换为 {}", std::any::type_name::<V>()),
            })
    }

    /// 读取资源绑定的配置。
    pub fn resource_config<C, V>(&self, resource: &Resource<C, V>) -> Result<Option<Arc<C>>>
    where
        C: Clone + Send + Sync + 'static,
        V: Send + Sync + 'static,
    {
        let def = self
            .inner
            .store
            .resource(resource.id())
            .ok_or_else(|| KernelError::UnknownNode {
                kind: NodeKind::Resource,
                id: resource.id().clone(),
            })?;
        Ok(def.config.clone().and_then(|c| c.downcast::<C>().ok()))
    }

    /// 根资源的初始化值。
    pub fn value<V: Send + Sync + 'static>(&self) -> Result<Arc<V>> {
        let value = self
            .inner
            .values
            .read()
            .get(&self.root)
            .cloned()
            .ok_or_else(|| KernelError::UnknownNode {
                kind: NodeKind::Resource,
                id: self.root.clone(),
            })?;
        value
            .downcast::<V>()
            .map_err(|_| KernelError::DependencyAccess {
                owner: self.root.clone(),
                name: self.root.to_string(),
                detail: format!("根资源值无法转换为 {}", std::any::type_name::<V>()),
            })
    }

    /// 只读的注册表视图。
    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    /// 注入的时钟。
    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.inner.clock)
    }

    /// 是否已完成启动。
    pub fn is_ready(&self) -> bool {
        self.inner.is_ready()
    }

    /// 释放运行时；幂等。
    pub async fn dispose(&self) -> Result<()> {
        dispose_inner(&self.inner).await
    }
}

impl core::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Runtime")
            .field("root", &self.root)
            .field("ready", &self.inner.is_ready())
            .field("disposed", &self.inner.is_disposed())
            .finish()
    }
}
