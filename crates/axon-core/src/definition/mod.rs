//! 节点定义层：声明式构建块的数据模型与构建器。
//!
//! # 模块定位（Why）
//! - 应用由九类可识别节点组合而成：任务、资源、事件、钩子、两类中间件、标签、
//!   错误助手与异步上下文；本命名空间承载它们的不可变定义与类型化门面；
//! - 构建器在 `build()` 处完成结构校验（必填字段、HTTP 码范围等），产物以
//!   `Arc` 共享且构建后不可变，后续阶段无需防御性拷贝。
//!
//! # 结构概览（What）
//! - [`node`]（本文件）：[`Node`] 标签联合与跨种类的通用访问器；
//! - [`dependency`]：命名依赖集合与可选依赖语义；
//! - [`task`] / [`resource`] / [`event`] / [`hook`]：四类执行性节点;
//! - [`middleware`]：任务与资源中间件及其调用上下文；
//! - [`tag`]：类型化可配置元数据与内建标签；
//! - [`error_helper`]：可抛出的类型化错误身份；
//! - [`async_context`]：作用域环境值的声明。

pub mod async_context;
pub mod builtin;
pub mod dependency;
pub mod error_helper;
pub mod event;
pub mod hook;
pub mod middleware;
pub mod resource;
pub mod tag;
pub mod task;

use std::sync::Arc;

use crate::kernel::ids::{NodeId, NodeKind};

pub use async_context::{AsyncContext, AsyncContextDef};
pub use dependency::{DependencyRef, DependencySet};
pub use error_helper::{ErrorHelper, ErrorHelperDef};
pub use event::{Event, EventDef};
pub use hook::{Hook, HookDef, HookTarget};
pub use middleware::{
    MiddlewareUsage, Next, ResourceMiddleware, ResourceMiddlewareDef,
    ResourceMiddlewareInvocation, TaskMiddleware, TaskMiddlewareDef, TaskMiddlewareInvocation,
};
pub use resource::{ForkRegister, RegisterList, Resource, ResourceContext, ResourceDef};
pub use tag::{Tag, TagDef, TagUsage, tags};
pub use task::{Task, TaskDef};

/// 全部节点种类的标签联合。
///
/// # 契约说明（What）
/// - 注册表按变体分集合存放；`id`/`kind` 访问器为诊断与收集走查提供统一视角；
/// - 定义以 `Arc` 共享，`Node` 本身可廉价克隆。
#[derive(Clone)]
pub enum Node {
    Task(Arc<TaskDef>),
    Resource(Arc<ResourceDef>),
    Event(Arc<EventDef>),
    Hook(Arc<HookDef>),
    TaskMiddleware(Arc<TaskMiddlewareDef>),
    ResourceMiddleware(Arc<ResourceMiddlewareDef>),
    Tag(Arc<TagDef>),
    ErrorHelper(Arc<ErrorHelperDef>),
    AsyncContext(Arc<AsyncContextDef>),
}

impl Node {
    /// 节点标识。
    pub fn id(&self) -> &NodeId {
        match self {
            Node::Task(def) => &def.id,
            Node::Resource(def) => &def.id,
            Node::Event(def) => &def.id,
            Node::Hook(def) => &def.id,
            Node::TaskMiddleware(def) => &def.id,
            Node::ResourceMiddleware(def) => &def.id,
            Node::Tag(def) => &def.id,
            Node::ErrorHelper(def) => &def.id,
            Node::AsyncContext(def) => &def.id,
        }
    }

    /// 节点种类。
    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Task(..) => NodeKind::Task,
            Node::Resource(..) => NodeKind::Resource,
            Node::Event(..) => NodeKind::Event,
            Node::Hook(..) => NodeKind::Hook,
            Node::TaskMiddleware(..) => NodeKind::TaskMiddleware,
            Node::ResourceMiddleware(..) => NodeKind::ResourceMiddleware,
            Node::Tag(..) => NodeKind::Tag,
            Node::ErrorHelper(..) => NodeKind::ErrorHelper,
            Node::AsyncContext(..) => NodeKind::AsyncContext,
        }
    }

    /// 节点携带的标签使用列表；标签与上下文自身不携带标签。
    pub fn tag_usages(&self) -> &[TagUsage] {
        match self {
            Node::Task(def) => &def.tags,
            Node::Resource(def) => &def.tags,
            Node::Event(def) => &def.tags,
            Node::Hook(def) => &def.tags,
            Node::TaskMiddleware(def) => &def.tags,
            Node::ResourceMiddleware(def) => &def.tags,
            Node::Tag(..) | Node::ErrorHelper(..) | Node::AsyncContext(..) => &[],
        }
    }
}

impl core::fmt::Debug for Node {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Node::{}({})", self.kind(), self.id())
    }
}
