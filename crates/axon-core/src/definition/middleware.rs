//! 中间件定义：包裹任务执行与资源初始化的拦截器。
//!
//! # 设计背景（Why）
//! - 横切关注点（重试、超时、缓存、审计）以洋葱模型包裹目标：链在启动期折叠
//!   一次，调用期零装配开销；
//! - 中间件可声明 `everywhere` 谓词成为全局中间件；若其依赖集传递性地包含
//!   某个目标，引擎会把它从该目标的链上排除，避免递归自包裹。
//!
//! # 契约说明（What）
//! - 链内调用 [`Next::call`] 继续执行；传 `None` 时沿用当前输入；
//! - 每条链接收统一的调用上下文：目标事实、输入、执行日志、已解析依赖与
//!   本次使用的配置。

use std::sync::Arc;

use crate::definition::dependency::DependencySet;
use crate::definition::resource::ResourceDef;
use crate::definition::tag::TagUsage;
use crate::definition::task::TaskDef;
use crate::errors::Result;
use crate::injection::ResolvedDeps;
use crate::kernel::future::BoxFuture;
use crate::kernel::ids::NodeId;
use crate::kernel::schema::SchemaRef;
use crate::kernel::value::{DynValue, Meta};
use crate::pipeline::journal::ExecutionJournal;

/// 一次中间件使用：中间件 ID 加本次绑定的配置。
#[derive(Clone)]
pub struct MiddlewareUsage {
    pub id: NodeId,
    pub config: Option<DynValue>,
}

impl core::fmt::Debug for MiddlewareUsage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MiddlewareUsage")
            .field("id", &self.id)
            .field("configured", &self.config.is_some())
            .finish()
    }
}

pub(crate) type ChainFn = Arc<
    dyn Fn(Option<DynValue>, ExecutionJournal) -> BoxFuture<'static, Result<DynValue>>
        + Send
        + Sync,
>;

/// 链中指向“剩余部分”的续延。
///
/// 可多次调用：重试类中间件依赖对剩余链的重复执行。
#[derive(Clone)]
pub struct Next {
    current: Option<DynValue>,
    journal: ExecutionJournal,
    inner: ChainFn,
}

impl Next {
    pub(crate) fn new(current: Option<DynValue>, journal: ExecutionJournal, inner: ChainFn) -> Self {
        Self {
            current,
            journal,
            inner,
        }
    }

    /// 继续执行链的剩余部分；`input` 为 `None` 时沿用当前输入。
    pub fn call(&self, input: Option<DynValue>) -> BoxFuture<'static, Result<DynValue>> {
        let forwarded = input.or_else(|| self.current.clone());
        (self.inner)(forwarded, self.journal.clone())
    }

    /// 以当前输入继续执行。
    pub fn forward(&self) -> BoxFuture<'static, Result<DynValue>> {
        self.call(None)
    }
}

/// 任务中间件收到的调用上下文。
pub struct TaskMiddlewareInvocation {
    /// 被包裹任务的定义。
    pub task: Arc<TaskDef>,
    /// 本链接看到的输入。
    pub input: Option<DynValue>,
    /// 链的剩余部分。
    pub next: Next,
    /// 本次调用的执行日志。
    pub journal: ExecutionJournal,
    /// 中间件自身声明的依赖。
    pub deps: ResolvedDeps,
    pub(crate) config: Option<DynValue>,
}

impl TaskMiddlewareInvocation {
    /// 读取本次使用绑定的类型化配置。
    pub fn config<C: Send + Sync + 'static>(&self) -> Option<Arc<C>> {
        self.config
            .clone()
            .and_then(|c| c.downcast::<C>().ok())
    }
}

/// 资源中间件收到的调用上下文。
pub struct ResourceMiddlewareInvocation {
    /// 被包裹资源的定义。
    pub resource: Arc<ResourceDef>,
    /// 资源本次初始化使用的配置。
    pub resource_config: Option<DynValue>,
    /// 链的剩余部分，完成后产出资源值。
    pub next: Next,
    /// 本次初始化的执行日志。
    pub journal: ExecutionJournal,
    /// 中间件自身声明的依赖。
    pub deps: ResolvedDeps,
    pub(crate) config: Option<DynValue>,
}

impl ResourceMiddlewareInvocation {
    /// 读取本次使用绑定的类型化配置。
    pub fn config<C: Send + Sync + 'static>(&self) -> Option<Arc<C>> {
        self.config
            .clone()
            .and_then(|c| c.downcast::<C>().ok())
    }
}

pub(crate) type TaskMwRun =
    Arc<dyn Fn(TaskMiddlewareInvocation) -> BoxFuture<'static, Result<DynValue>> + Send + Sync>;
pub(crate) type ResourceMwRun = Arc<
    dyn Fn(ResourceMiddlewareInvocation) -> BoxFuture<'static, Result<DynValue>> + Send + Sync,
>;
pub(crate) type TaskPredicate = Arc<dyn Fn(&TaskDef) -> bool + Send + Sync>;
pub(crate) type ResourcePredicate = Arc<dyn Fn(&ResourceDef) -> bool + Send + Sync>;

/// 任务中间件的不可变定义。
#[derive(Clone)]
pub struct TaskMiddlewareDef {
    pub id: NodeId,
    pub meta: Meta,
    pub tags: Vec<TagUsage>,
    pub dependencies: DependencySet,
    pub config_schema: Option<SchemaRef>,
    pub(crate) everywhere: Option<TaskPredicate>,
    pub(crate) run: TaskMwRun,
}

impl TaskMiddlewareDef {
    /// 是否声明为全局中间件。
    pub fn is_global(&self) -> bool {
        self.everywhere.is_some()
    }
}

impl core::fmt::Debug for TaskMiddlewareDef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TaskMiddlewareDef")
            .field("id", &self.id)
            .field("global", &self.is_global())
            .finish_non_exhaustive()
    }
}

/// 资源中间件的不可变定义。
#[derive(Clone)]
pub struct ResourceMiddlewareDef {
    pub id: NodeId,
    pub meta: Meta,
    pub tags: Vec<TagUsage>,
    pub dependencies: DependencySet,
    pub config_schema: Option<SchemaRef>,
    pub(crate) everywhere: Option<ResourcePredicate>,
    pub(crate) run: ResourceMwRun,
}

impl ResourceMiddlewareDef {
    /// 是否声明为全局中间件。
    pub fn is_global(&self) -> bool {
        self.everywhere.is_some()
    }
}

impl core::fmt::Debug for ResourceMiddlewareDef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ResourceMiddlewareDef")
            .field("id", &self.id)
            .field("global", &self.is_global())
            .finish_non_exhaustive()
    }
}

/// 任务中间件的类型化门面，`C` 为配置类型。
pub struct TaskMiddleware<C = ()> {
    pub(crate) def: Arc<TaskMiddlewareDef>,
    _marker: std::marker::PhantomData<fn(C)>,
}

impl<C> Clone for TaskMiddleware<C> {
    fn clone(&self) -> Self {
        Self {
            def: Arc::clone(&self.def),
            _marker: std::marker::PhantomData,
        }
    }
}

impl<C> TaskMiddleware<C>
where
    C: Send + Sync + 'static,
{
    /// 开始构建一个任务中间件。
    pub fn builder(id: impl Into<Arc<str>>) -> TaskMiddlewareBuilder<C> {
        TaskMiddlewareBuilder {
            id: NodeId::parse(id),
            meta: Meta::new(),
            tags: Vec::new(),
            dependencies: DependencySet::new(),
            config_schema: None,
            everywhere: None,
            run: None,
            _marker: std::marker::PhantomData,
        }
    }

    /// 中间件 ID。
    pub fn id(&self) -> &NodeId {
        &self.def.id
    }

    /// 底层定义。
    pub fn definition(&self) -> &Arc<TaskMiddlewareDef> {
        &self.def
    }

    /// 绑定配置，得到一次使用。
    pub fn with(&self, config: C) -> MiddlewareUsage {
        MiddlewareUsage {
            id: self.def.id.clone(),
            config: Some(crate::kernel::value::dyn_value(config)),
        }
    }

    /// 不带配置的裸使用。
    pub fn usage(&self) -> MiddlewareUsage {
        MiddlewareUsage {
            id: self.def.id.clone(),
            config: None,
        }
    }
}

/// 任务中间件构建器。
pub struct TaskMiddlewareBuilder<C> {
    id: Result<NodeId>,
    meta: Meta,
    tags: Vec<TagUsage>,
    dependencies: DependencySet,
    config_schema: Option<SchemaRef>,
    everywhere: Option<TaskPredicate>,
    run: Option<TaskMwRun>,
    _marker: std::marker::PhantomData<fn(C)>,
}

impl<C> TaskMiddlewareBuilder<C>
where
    C: Send + Sync + 'static,
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

    /// 声明依赖集合。
    pub fn dependencies(mut self, deps: DependencySet) -> Self {
        self.dependencies = deps;
        self
    }

    /// 启用配置类型校验（按 `C` 做运行期检查）。
    pub fn validate_config(mut self) -> Self {
        self.config_schema = Some(crate::kernel::schema::of_type::<C>());
        self
    }

    /// 使用自定义配置 Schema。
    pub fn config_schema(mut self, schema: SchemaRef) -> Self {
        self.config_schema = Some(schema);
        self
    }

    /// 声明为全局中间件，按谓词选择包裹目标。
    pub fn everywhere<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&TaskDef) -> bool + Send + Sync + 'static,
    {
        self.everywhere = Some(Arc::new(predicate));
        self
    }

    /// 声明为覆盖全部任务的全局中间件。
    pub fn everywhere_all(self) -> Self {
        self.everywhere(|_| true)
    }

    /// 提供中间件实现。
    pub fn run<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(TaskMiddlewareInvocation) -> Fut + Send + Sync + 'static,
        Fut: core::future::Future<Output = Result<DynValue>> + Send + 'static,
    {
        self.run = Some(Arc::new(move |invocation| Box::pin(f(invocation))));
        self
    }

    /// 完成构建；缺失 `run` 时报错。
    pub fn build(self) -> Result<TaskMiddleware<C>> {
        let id = self.id?;
        let run = self
            .run
            .ok_or_else(|| crate::errors::KernelError::IncompleteDefinition {
                kind: crate::kernel::ids::NodeKind::TaskMiddleware,
                id: id.clone(),
                missing: "run",
            })?;
        Ok(TaskMiddleware {
            def: Arc::new(TaskMiddlewareDef {
                id,
                meta: self.meta,
                tags: self.tags,
                dependencies: self.dependencies,
                config_schema: self.config_schema,
                everywhere: self.everywhere,
                run,
            }),
            _marker: std::marker::PhantomData,
        })
    }
}

/// 资源中间件的类型化门面，`C` 为配置类型。
pub struct ResourceMiddleware<C = ()> {
    pub(crate) def: Arc<ResourceMiddlewareDef>,
    _marker: std::marker::PhantomData<fn(C)>,
}

impl<C> Clone for ResourceMiddleware<C> {
    fn clone(&self) -> Self {
        Self {
            def: Arc::clone(&self.def),
            _marker: std::marker::PhantomData,
        }
    }
}

impl<C> ResourceMiddleware<C>
where
    C: Send + Sync + 'static,
{
    /// 开始构建一个资源中间件。
    pub fn builder(id: impl Into<Arc<str>>) -> ResourceMiddlewareBuilder<C> {
        ResourceMiddlewareBuilder {
            id: NodeId::parse(id),
            meta: Meta::new(),
            tags: Vec::new(),
            dependencies: DependencySet::new(),
            config_schema: None,
            everywhere: None,
            run: None,
            _marker: std::marker::PhantomData,
        }
    }

    /// 中间件 ID。
    pub fn id(&self) -> &NodeId {
        &self.def.id
    }

    /// 底层定义。
    pub fn definition(&self) -> &Arc<ResourceMiddlewareDef> {
        &self.def
    }

    /// 绑定配置，得到一次使用。
    pub fn with(&self, config: C) -> MiddlewareUsage {
        MiddlewareUsage {
            id: self.def.id.clone(),
            config: Some(crate::kernel::value::dyn_value(config)),
        }
    }

    /// 不带配置的裸使用。
    pub fn usage(&self) -> MiddlewareUsage {
        MiddlewareUsage {
            id: self.def.id.clone(),
            config: None,
        }
    }
}

/// 资源中间件构建器。
pub struct ResourceMiddlewareBuilder<C> {
    id: Result<NodeId>,
    meta: Meta,
    tags: Vec<TagUsage>,
    dependencies: DependencySet,
    config_schema: Option<SchemaRef>,
    everywhere: Option<ResourcePredicate>,
    run: Option<ResourceMwRun>,
    _marker: std::marker::PhantomData<fn(C)>,
}

impl<C> ResourceMiddlewareBuilder<C>
where
    C: Send + Sync + 'static,
{
    /// 附加一条描述性元数据。
    pub fn meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    /// 声明依赖集合。
    pub fn dependencies(mut self, deps: DependencySet) -> Self {
        self.dependencies = deps;
        self
    }

    /// 启用配置类型校验。
    pub fn validate_config(mut self) -> Self {
        self.config_schema = Some(crate::kernel::schema::of_type::<C>());
        self
    }

    /// 声明为全局中间件，按谓词选择包裹目标。
    pub fn everywhere<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ResourceDef) -> bool + Send + Sync + 'static,
    {
        self.everywhere = Some(Arc::new(predicate));
        self
    }

    /// 提供中间件实现。
    pub fn run<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ResourceMiddlewareInvocation) -> Fut + Send + Sync + 'static,
        Fut: core::future::Future<Output = Result<DynValue>> + Send + 'static,
    {
        self.run = Some(Arc::new(move |invocation| Box::pin(f(invocation))));
        self
    }

    /// 完成构建；缺失 `run` 时报错。
    pub fn build(self) -> Result<ResourceMiddleware<C>> {
        let id = self.id?;
        let run = self
            .run
            .ok_or_else(|| crate::errors::KernelError::IncompleteDefinition {
                kind: crate::kernel::ids::NodeKind::ResourceMiddleware,
                id: id.clone(),
                missing: "run",
            })?;
        Ok(ResourceMiddleware {
            def: Arc::new(ResourceMiddlewareDef {
                id,
                meta: self.meta,
                tags: self.tags,
                dependencies: self.dependencies,
                config_schema: self.config_schema,
                everywhere: self.everywhere,
                run,
            }),
            _marker: std::marker::PhantomData,
        })
    }
}

impl<C> From<TaskMiddleware<C>> for crate::definition::Node {
    fn from(mw: TaskMiddleware<C>) -> Self {
        crate::definition::Node::TaskMiddleware(mw.def)
    }
}

impl<C> From<&TaskMiddleware<C>> for crate::definition::Node {
    fn from(mw: &TaskMiddleware<C>) -> Self {
        crate::definition::Node::TaskMiddleware(Arc::clone(&mw.def))
    }
}

impl<C> From<ResourceMiddleware<C>> for crate::definition::Node {
    fn from(mw: ResourceMiddleware<C>) -> Self {
        crate::definition::Node::ResourceMiddleware(mw.def)
    }
}

impl<C> From<&ResourceMiddleware<C>> for crate::definition::Node {
    fn from(mw: &ResourceMiddleware<C>) -> Self {
        crate::definition::Node::ResourceMiddleware(Arc::clone(&mw.def))
    }
}
