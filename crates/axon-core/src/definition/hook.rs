//! 钩子定义：绑定到单个事件、事件列表或通配符的监听器。
//!
//! # 契约说明（What）
//! - `on` 与 `run` 为必填项，缺失在 `build()` 处报 `boot.incomplete_definition`；
//! - `order` 越小越先投递，相同 `order` 保持注册顺序；
//! - 可选 `filter` 在投递前对每次发射求值，返回 `false` 则跳过本监听器。

use std::sync::Arc;

use crate::definition::dependency::DependencySet;
use crate::definition::event::Event;
use crate::definition::tag::TagUsage;
use crate::errors::{KernelError, Result};
use crate::events::EventEmission;
use crate::injection::ResolvedDeps;
use crate::kernel::future::BoxFuture;
use crate::kernel::ids::{NodeId, NodeKind};
use crate::kernel::value::Meta;

pub(crate) type HookRun =
    Arc<dyn Fn(EventEmission, ResolvedDeps) -> BoxFuture<'static, Result<()>> + Send + Sync>;
pub(crate) type HookFilter = Arc<dyn Fn(&EventEmission) -> bool + Send + Sync>;

/// 钩子监听的目标。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HookTarget {
    /// 单个事件。
    One(NodeId),
    /// 一组事件。
    Many(Vec<NodeId>),
    /// 通配符 `"*"`：监听所有事件（携带排除标签的事件除外）。
    Global,
}

/// 钩子的不可变定义。
#[derive(Clone)]
pub struct HookDef {
    pub id: NodeId,
    pub meta: Meta,
    pub tags: Vec<TagUsage>,
    pub on: HookTarget,
    pub order: i32,
    pub dependencies: DependencySet,
    pub(crate) filter: Option<HookFilter>,
    pub(crate) run: HookRun,
}

impl core::fmt::Debug for HookDef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HookDef")
            .field("id", &self.id)
            .field("on", &self.on)
            .field("order", &self.order)
            .finish_non_exhaustive()
    }
}

/// 钩子的门面句柄。
#[derive(Clone)]
pub struct Hook {
    pub(crate) def: Arc<HookDef>,
}

impl Hook {
    /// 开始构建一个钩子。
    pub fn builder(id: impl Into<Arc<str>>) -> HookBuilder {
        HookBuilder {
            id: NodeId::parse(id),
            meta: Meta::new(),
            tags: Vec::new(),
            on: None,
            order: 0,
            dependencies: DependencySet::new(),
            filter: None,
            run: None,
        }
    }

    /// 钩子 ID。
    pub fn id(&self) -> &NodeId {
        &self.def.id
    }

    /// 底层定义。
    pub fn definition(&self) -> &Arc<HookDef> {
        &self.def
    }
}

/// 钩子构建器。
pub struct HookBuilder {
    id: Result<NodeId>,
    meta: Meta,
    tags: Vec<TagUsage>,
    on: Option<HookTarget>,
    order: i32,
    dependencies: DependencySet,
    filter: Option<HookFilter>,
    run: Option<HookRun>,
}

impl HookBuilder {
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

    /// 监听单个事件。
    pub fn on<P>(mut self, event: &Event<P>) -> Self {
        self.on = Some(HookTarget::One(event.id().clone()));
        self
    }

    /// 监听一组事件。
    pub fn on_each<'a, P: 'a>(mut self, events: impl IntoIterator<Item = &'a Event<P>>) -> Self {
        let ids = events.into_iter().map(|e| e.id().clone()).collect();
        self.on = Some(HookTarget::Many(ids));
        self
    }

    /// 监听全部事件（通配符 `"*"`）。
    pub fn on_any(mut self) -> Self {
        self.on = Some(HookTarget::Global);
        self
    }

    /// 设定投递次序，默认 0。
    pub fn order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    /// 声明依赖集合。
    pub fn dependencies(mut self, deps: DependencySet) -> Self {
        self.dependencies = deps;
        self
    }

    /// 设置发射过滤谓词。
    pub fn filter<F>(mut self, f: F) -> Self
    where
        F: Fn(&EventEmission) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(f));
        self
    }

    /// 提供监听器实现。
    pub fn run<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(EventEmission, ResolvedDeps) -> Fut + Send + Sync + 'static,
        Fut: core::future::Future<Output = Result<()>> + Send + 'static,
    {
        self.run = Some(Arc::new(move |emission, deps| Box::pin(f(emission, deps))));
        self
    }

    /// 完成构建；缺失 `on` 或 `run` 时报错。
    pub fn build(self) -> Result<Hook> {
        let id = self.id?;
        let on = self.on.ok_or_else(|| KernelError::IncompleteDefinition {
            kind: NodeKind::Hook,
            id: id.clone(),
            missing: "on",
        })?;
        let run = self.run.ok_or_else(|| KernelError::IncompleteDefinition {
            kind: NodeKind::Hook,
            id: id.clone(),
            missing: "run",
        })?;
        Ok(Hook {
            def: Arc::new(HookDef {
                id,
                meta: self.meta,
                tags: self.tags,
                on,
                order: self.order,
                dependencies: self.dependencies,
                filter: self.filter,
                run,
            }),
        })
    }
}

impl From<Hook> for crate::definition::Node {
    fn from(hook: Hook) -> Self {
        crate::definition::Node::Hook(hook.def)
    }
}

impl From<&Hook> for crate::definition::Node {
    fn from(hook: &Hook) -> Self {
        crate::definition::Node::Hook(Arc::clone(&hook.def))
    }
}
