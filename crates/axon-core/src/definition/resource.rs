//! 资源定义：带配置、初始化与释放生命周期的有状态单例。
//!
//! # 设计背景（Why）
//! - 资源是组合的骨架：`register` 列表挂载子节点构成注册树，`overrides`
//!   在收集阶段先于注册生效，让消费方看到的始终是补丁后的定义；
//! - 分叉（fork）产出带新 ID 的副本并拥有独立生命周期；深分叉对自身注册
//!   子树做资源依赖重映射，使副本子树完全自洽。
//!
//! # 契约说明（What）
//! - 资源值在一次运行内恰好初始化一次，之后不可变；
//! - `init` 缺省时资源值为 `()`；`dispose` 缺省为空操作；
//! - 深分叉要求静态 `register` 列表；惰性列表按浅分叉处理。

use std::any::type_name;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::definition::Node;
use crate::definition::dependency::DependencySet;
use crate::definition::middleware::MiddlewareUsage;
use crate::definition::tag::TagUsage;
use crate::errors::{KernelError, Result};
use crate::injection::ResolvedDeps;
use crate::kernel::future::BoxFuture;
use crate::kernel::ids::NodeId;
use crate::kernel::schema::{SchemaRef, SchemaViolation, of_type};
use crate::kernel::value::{DynValue, Meta, downcast_ref, dyn_value};

pub(crate) type ResourceInitFn = Arc<
    dyn Fn(Option<DynValue>, ResolvedDeps, ResourceContext) -> BoxFuture<'static, Result<DynValue>>
        + Send
        + Sync,
>;
pub(crate) type ResourceDisposeFn =
    Arc<dyn Fn(DynValue) -> BoxFuture<'static, Result<()>> + Send + Sync>;
pub(crate) type ContextFactory = Arc<dyn Fn() -> DynValue + Send + Sync>;

/// 资源贡献的子节点列表：静态清单或按配置惰性求值。
#[derive(Clone)]
pub enum RegisterList {
    Static(Vec<Node>),
    Lazy(Arc<dyn Fn(Option<&DynValue>) -> Vec<Node> + Send + Sync>),
}

impl Default for RegisterList {
    fn default() -> Self {
        RegisterList::Static(Vec::new())
    }
}

impl RegisterList {
    pub(crate) fn evaluate(&self, config: Option<&DynValue>) -> Vec<Node> {
        match self {
            RegisterList::Static(items) => items.clone(),
            RegisterList::Lazy(f) => f(config),
        }
    }
}

/// 资源实例的私有上下文袋，由 `context` 工厂按实例创建。
#[derive(Clone, Default)]
pub struct ResourceContext {
    bag: Option<DynValue>,
}

impl ResourceContext {
    pub(crate) fn new(bag: Option<DynValue>) -> Self {
        Self { bag }
    }

    /// 读取类型化的上下文袋。
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.bag.clone().and_then(|b| b.downcast::<T>().ok())
    }
}

/// 资源的不可变定义。
#[derive(Clone)]
pub struct ResourceDef {
    pub id: NodeId,
    pub meta: Meta,
    pub tags: Vec<TagUsage>,
    pub dependencies: DependencySet,
    pub middleware: Vec<MiddlewareUsage>,
    pub config: Option<DynValue>,
    pub config_schema: Option<SchemaRef>,
    pub result_schema: Option<SchemaRef>,
    pub(crate) register: RegisterList,
    pub(crate) overrides: Vec<Node>,
    pub(crate) init: Option<ResourceInitFn>,
    pub(crate) dispose: Option<ResourceDisposeFn>,
    pub(crate) context_factory: Option<ContextFactory>,
}

impl core::fmt::Debug for ResourceDef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ResourceDef")
            .field("id", &self.id)
            .field("configured", &self.config.is_some())
            .field("overrides", &self.overrides.len())
            .finish_non_exhaustive()
    }
}

/// 资源的类型化门面，`C` 为配置类型、`V` 为资源值类型。
pub struct Resource<C = (), V = ()> {
    pub(crate) def: Arc<ResourceDef>,
    _marker: PhantomData<fn(C) -> V>,
}

impl<C, V> Clone for Resource<C, V> {
    fn clone(&self) -> Self {
        Self {
            def: Arc::clone(&self.def),
            _marker: PhantomData,
        }
    }
}

/// 深分叉时对注册子树的处理方式。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ForkRegister {
    /// 仅复制自身，子树原样引用。
    Shallow,
    /// 深走查注册子树，为其中的资源生成分叉副本并重映射资源依赖。
    Deep,
}

impl<C, V> Resource<C, V> {
    /// 资源 ID。
    pub fn id(&self) -> &NodeId {
        &self.def.id
    }

    /// 底层定义。
    pub fn definition(&self) -> &Arc<ResourceDef> {
        &self.def
    }

    pub(crate) fn from_def(def: Arc<ResourceDef>) -> Self {
        Self {
            def,
            _marker: PhantomData,
        }
    }
}

impl<C, V> Resource<C, V>
where
    C: Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// 开始构建一个资源。
    pub fn builder(id: impl Into<Arc<str>>) -> ResourceBuilder<C, V> {
        ResourceBuilder {
            id: NodeId::parse(id),
            meta: Meta::new(),
            tags: Vec::new(),
            dependencies: DependencySet::new(),
            middleware: Vec::new(),
            config: None,
            config_schema: None,
            result_schema: None,
            register: RegisterList::default(),
            overrides: Vec::new(),
            init: None,
            dispose: None,
            context_factory: None,
            _marker: PhantomData,
        }
    }

    /// 绑定配置，返回新的门面；原定义不受影响。
    pub fn with(&self, config: C) -> Resource<C, V> {
        let mut def = (*self.def).clone();
        def.config = Some(dyn_value(config));
        Resource {
            def: Arc::new(def),
            _marker: PhantomData,
        }
    }

    /// 以新 ID 产出分叉副本，继承标签、中间件、配置形状与 Schema。
    ///
    /// `ForkRegister::Deep` 时深走查静态注册子树：子树中的每个资源获得
    /// `"<新ID>::<原ID>"` 形式的副本 ID，且子树内指向这些资源的依赖被替换为
    /// 分叉后的对应物；任务、事件、标签等非资源依赖保持原样。
    pub fn fork(&self, new_id: impl Into<Arc<str>>, register: ForkRegister) -> Result<Resource<C, V>> {
        let new_id = NodeId::parse(new_id)?;
        let def = match register {
            ForkRegister::Shallow => {
                let mut def = (*self.def).clone();
                def.id = new_id;
                Arc::new(def)
            }
            ForkRegister::Deep => {
                let mut remap = HashMap::new();
                collect_fork_ids(&self.def, &new_id, &mut remap)?;
                rebuild_forked(&self.def, new_id, &remap)
            }
        };
        Ok(Resource {
            def,
            _marker: PhantomData,
        })
    }

    /// 以现有定义为底稿重新构建（保持 ID 不变），用于补丁覆盖。
    pub fn redefine(&self) -> ResourceBuilder<C, V> {
        ResourceBuilder {
            id: Ok(self.def.id.clone()),
            meta: self.def.meta.clone(),
            tags: self.def.tags.clone(),
            dependencies: self.def.dependencies.clone(),
            middleware: self.def.middleware.clone(),
            config: self.def.config.clone(),
            config_schema: self.def.config_schema.clone(),
            result_schema: self.def.result_schema.clone(),
            register: self.def.register.clone(),
            overrides: self.def.overrides.clone(),
            init: self.def.init.clone(),
            dispose: self.def.dispose.clone(),
            context_factory: self.def.context_factory.clone(),
            _marker: PhantomData,
        }
    }
}

/// 收集深分叉子树内全部资源的重映射表。
fn collect_fork_ids(
    def: &ResourceDef,
    fork_root: &NodeId,
    remap: &mut HashMap<NodeId, NodeId>,
) -> Result<()> {
    if let RegisterList::Static(items) = &def.register {
        for node in items {
            if let Node::Resource(child) = node {
                let forked = NodeId::parse(format!("{}::{}", fork_root, child.id))?;
                remap.insert(child.id.clone(), forked);
                collect_fork_ids(child, fork_root, remap)?;
            }
        }
    }
    Ok(())
}

/// 按重映射表重建分叉定义；资源依赖替换为分叉对应物。
fn rebuild_forked(
    def: &ResourceDef,
    new_id: NodeId,
    remap: &HashMap<NodeId, NodeId>,
) -> Arc<ResourceDef> {
    let register = match &def.register {
        RegisterList::Static(items) => RegisterList::Static(
            items
                .iter()
                .map(|node| match node {
                    Node::Resource(child) => {
                        let child_id = remap
                            .get(&child.id)
                            .cloned()
                            .unwrap_or_else(|| child.id.clone());
                        Node::Resource(rebuild_forked(child, child_id, remap))
                    }
                    other => other.clone(),
                })
                .collect(),
        ),
        lazy => lazy.clone(),
    };
    let mut forked = def.clone();
    forked.id = new_id;
    forked.register = register;
    forked.dependencies = def
        .dependencies
        .map_resource_ids(&|id| remap.get(id).cloned());
    Arc::new(forked)
}

/// 把类型擦除的配置还原为 `C`；`None` 仅在 `C = ()` 时合法。
pub(crate) fn decode_config<C>(resource: &NodeId, config: Option<&DynValue>) -> Result<C>
where
    C: Clone + Send + Sync + 'static,
{
    match config {
        Some(v) => downcast_ref::<C>(v).cloned().ok_or_else(|| {
            KernelError::ResourceConfigValidation {
                resource: resource.clone(),
                violation: SchemaViolation::new(format!(
                    "配置无法转换为 {}",
                    type_name::<C>()
                )),
            }
        }),
        None => {
            let unit = dyn_value(());
            downcast_ref::<C>(&unit)
                .cloned()
                .ok_or_else(|| KernelError::ResourceConfigValidation {
                    resource: resource.clone(),
                    violation: SchemaViolation::new(format!(
                        "缺少配置，期望 {}",
                        type_name::<C>()
                    )),
                })
        }
    }
}

/// 资源构建器。
pub struct ResourceBuilder<C, V> {
    id: Result<NodeId>,
    meta: Meta,
    tags: Vec<TagUsage>,
    dependencies: DependencySet,
    middleware: Vec<MiddlewareUsage>,
    config: Option<DynValue>,
    config_schema: Option<SchemaRef>,
    result_schema: Option<SchemaRef>,
    register: RegisterList,
    overrides: Vec<Node>,
    init: Option<ResourceInitFn>,
    dispose: Option<ResourceDisposeFn>,
    context_factory: Option<ContextFactory>,
    _marker: PhantomData<fn(C) -> V>,
}

impl<C, V> ResourceBuilder<C, V>
where
    C: Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
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

    /// 追加一个资源中间件使用。
    pub fn middleware(mut self, usage: MiddlewareUsage) -> Self {
        self.middleware.push(usage);
        self
    }

    /// 绑定初始配置。
    pub fn config(mut self, config: C) -> Self {
        self.config = Some(dyn_value(config));
        self
    }

    /// 启用配置类型校验（按 `C` 做运行期检查）。
    pub fn validate_config(mut self) -> Self {
        self.config_schema = Some(of_type::<C>());
        self
    }

    /// 使用自定义配置 Schema。
    pub fn config_schema(mut self, schema: SchemaRef) -> Self {
        self.config_schema = Some(schema);
        self
    }

    /// 启用初始化结果类型校验（按 `V` 做运行期检查）。
    pub fn validate_result(mut self) -> Self {
        self.result_schema = Some(of_type::<V>());
        self
    }

    /// 使用自定义初始化结果 Schema，校验 `init` 的原始返回值。
    pub fn result_schema(mut self, schema: SchemaRef) -> Self {
        self.result_schema = Some(schema);
        self
    }

    /// 静态挂载子节点。
    pub fn register(mut self, items: impl IntoIterator<Item = Node>) -> Self {
        self.register = RegisterList::Static(items.into_iter().collect());
        self
    }

    /// 按配置惰性求值的子节点列表。
    pub fn register_lazy<F>(mut self, f: F) -> Self
    where
        F: Fn(Option<&DynValue>) -> Vec<Node> + Send + Sync + 'static,
    {
        self.register = RegisterList::Lazy(Arc::new(f));
        self
    }

    /// 追加一个覆盖补丁；`None` 条目被忽略。
    pub fn override_with(mut self, node: impl Into<Option<Node>>) -> Self {
        if let Some(node) = node.into() {
            self.overrides.push(node);
        }
        self
    }

    /// 批量追加覆盖补丁，`None` 条目被忽略。
    pub fn overrides(mut self, items: impl IntoIterator<Item = Option<Node>>) -> Self {
        self.overrides.extend(items.into_iter().flatten());
        self
    }

    /// 设置按实例创建的上下文袋工厂。
    pub fn context<B, F>(mut self, factory: F) -> Self
    where
        B: Send + Sync + 'static,
        F: Fn() -> B + Send + Sync + 'static,
    {
        self.context_factory = Some(Arc::new(move || dyn_value(factory())));
        self
    }

    /// 提供初始化实现。
    pub fn init<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(C, ResolvedDeps, ResourceContext) -> Fut + Send + Sync + 'static,
        Fut: core::future::Future<Output = Result<V>> + Send + 'static,
    {
        self.init = Some(Arc::new(move |config, deps, ctx| {
            let typed = match decode_config::<C>(deps.owner(), config.as_ref()) {
                Ok(v) => v,
                Err(e) => return Box::pin(std::future::ready(Err(e))),
            };
            let fut = f(typed, deps, ctx);
            Box::pin(async move { fut.await.map(dyn_value) })
        }));
        self
    }

    /// 提供释放实现。
    pub fn dispose<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<V>) -> Fut + Send + Sync + 'static,
        Fut: core::future::Future<Output = Result<()>> + Send + 'static,
    {
        self.dispose = Some(Arc::new(move |value| {
            let typed = match value.downcast::<V>() {
                Ok(v) => v,
                Err(_) => {
                    return Box::pin(std::future::ready(Err(KernelError::user_message(format!(
                        "资源值无法转换为 {}，释放回调被跳过",
                        type_name::<V>()
                    )))));
                }
            };
            Box::pin(f(typed))
        }));
        self
    }

    /// 完成构建。
    pub fn build(self) -> Result<Resource<C, V>> {
        let id = self.id?;
        Ok(Resource::from_def(Arc::new(ResourceDef {
            id,
            meta: self.meta,
            tags: self.tags,
            dependencies: self.dependencies,
            middleware: self.middleware,
            config: self.config,
            config_schema: self.config_schema,
            result_schema: self.result_schema,
            register: self.register,
            overrides: self.overrides,
            init: self.init,
            dispose: self.dispose,
            context_factory: self.context_factory,
        })))
    }
}

impl<C, V> From<Resource<C, V>> for Node {
    fn from(resource: Resource<C, V>) -> Self {
        Node::Resource(resource.def)
    }
}

impl<C, V> From<&Resource<C, V>> for Node {
    fn from(resource: &Resource<C, V>) -> Self {
        Node::Resource(Arc::clone(&resource.def))
    }
}
