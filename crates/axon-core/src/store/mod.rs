//! 注册表：九类节点的唯一归属地。
//!
//! # 设计背景（Why）
//! - 所有定义从根资源的 `register` 树深度优先收集而来，覆盖补丁在注册
//!   **之前**生效，消费方看到的始终是补丁后的定义；
//! - 注册表是启动期唯一可变的共享结构，`lock()` 之后进入只读状态，
//!   后续的修改尝试一律报 `boot.store_locked`。
//!
//! # 契约说明（What）
//! - ID 在一次运行内跨种类全局唯一，重复注册报 `boot.duplicate_id`；
//! - 每个节点记录声明序号（注册顺序），下游用它做确定性的平手裁决；
//! - 已注册宿主引用的标签、`throws` 白名单在收集尾声统一校验。

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::definition::tag::tags;
use crate::definition::{
    AsyncContextDef, ErrorHelperDef, EventDef, HookDef, Node, ResourceDef, ResourceMiddlewareDef,
    TagDef, TaskDef, TaskMiddlewareDef,
};
use crate::errors::{KernelError, Result};
use crate::kernel::ids::{NodeId, NodeKind};

/// 一条注册记录：定义加声明序号。
#[derive(Clone)]
pub struct Registered<T> {
    pub def: Arc<T>,
    pub index: u64,
}

/// 节点注册表。
pub struct Store {
    tasks: HashMap<NodeId, Registered<TaskDef>>,
    resources: HashMap<NodeId, Registered<ResourceDef>>,
    events: HashMap<NodeId, Registered<EventDef>>,
    hooks: HashMap<NodeId, Registered<HookDef>>,
    task_middlewares: HashMap<NodeId, Registered<TaskMiddlewareDef>>,
    resource_middlewares: HashMap<NodeId, Registered<ResourceMiddlewareDef>>,
    tags: HashMap<NodeId, Registered<TagDef>>,
    error_helpers: HashMap<NodeId, Registered<ErrorHelperDef>>,
    async_contexts: HashMap<NodeId, Registered<AsyncContextDef>>,
    next_index: u64,
    locked: AtomicBool,
    root: NodeId,
}

impl Store {
    /// 从根资源收集注册树，构建注册表。
    pub fn collect(root: Arc<ResourceDef>) -> Result<Self> {
        let mut store = Self {
            tasks: HashMap::new(),
            resources: HashMap::new(),
            events: HashMap::new(),
            hooks: HashMap::new(),
            task_middlewares: HashMap::new(),
            resource_middlewares: HashMap::new(),
            tags: HashMap::new(),
            error_helpers: HashMap::new(),
            async_contexts: HashMap::new(),
            next_index: 0,
            locked: AtomicBool::new(false),
            root: root.id.clone(),
        };
        for node in tags::builtin_nodes() {
            store.register_node(node)?;
        }
        for node in crate::definition::builtin::builtin_nodes() {
            store.register_node(node)?;
        }
        let mut overrides: HashMap<NodeId, Node> = HashMap::new();
        let mut visiting: Vec<NodeId> = Vec::new();
        store.walk_resource(root, &mut overrides, &mut visiting)?;
        store.validate_tag_usages()?;
        store.validate_throws()?;
        Ok(store)
    }

    /// 深度优先走查资源的注册子树。
    ///
    /// 先吸收本资源声明的覆盖补丁（外层先注册者优先），再注册自身与子节点；
    /// 子资源递归下钻。`visiting` 栈用于发现注册链上的环。
    fn walk_resource(
        &mut self,
        def: Arc<ResourceDef>,
        overrides: &mut HashMap<NodeId, Node>,
        visiting: &mut Vec<NodeId>,
    ) -> Result<()> {
        // 覆盖补丁可能替换整个资源定义。
        let def = match overrides.get(&def.id) {
            Some(Node::Resource(patched)) => Arc::clone(patched),
            _ => def,
        };
        if visiting.contains(&def.id) {
            let mut path: Vec<String> = visiting.iter().map(|id| id.to_string()).collect();
            path.push(def.id.to_string());
            return Err(KernelError::RegistrationCycle {
                path: path.join(" -> "),
            });
        }
        for node in &def.overrides {
            // 外层补丁先入场，后到的同名补丁不生效。
            overrides.entry(node.id().clone()).or_insert_with(|| node.clone());
        }
        self.register_node(Node::Resource(Arc::clone(&def)))?;
        visiting.push(def.id.clone());
        let children = def.register.evaluate(def.config.as_ref());
        for child in children {
            let child = overrides
                .get(child.id())
                .cloned()
                .unwrap_or(child);
            match child {
                Node::Resource(resource) => {
                    self.walk_resource(resource, overrides, visiting)?;
                }
                other => {
                    self.register_node(other)?;
                }
            }
        }
        visiting.pop();
        Ok(())
    }

    /// 注册单个节点；ID 冲突报 `boot.duplicate_id`。
    pub(crate) fn register_node(&mut self, node: Node) -> Result<()> {
        self.ensure_unlocked("注册节点")?;
        if let Some(kind) = self.kind_of(node.id()) {
            return Err(KernelError::DuplicateId {
                id: node.id().clone(),
                kind,
            });
        }
        let index = self.next_index;
        self.next_index += 1;
        match node {
            Node::Task(def) => {
                self.tasks.insert(def.id.clone(), Registered { def, index });
            }
            Node::Resource(def) => {
                self.resources
                    .insert(def.id.clone(), Registered { def, index });
            }
            Node::Event(def) => {
                self.events.insert(def.id.clone(), Registered { def, index });
            }
            Node::Hook(def) => {
                self.hooks.insert(def.id.clone(), Registered { def, index });
            }
            Node::TaskMiddleware(def) => {
                self.task_middlewares
                    .insert(def.id.clone(), Registered { def, index });
            }
            Node::ResourceMiddleware(def) => {
                self.resource_middlewares
                    .insert(def.id.clone(), Registered { def, index });
            }
            Node::Tag(def) => {
                self.tags.insert(def.id.clone(), Registered { def, index });
            }
            Node::ErrorHelper(def) => {
                self.error_helpers
                    .insert(def.id.clone(), Registered { def, index });
            }
            Node::AsyncContext(def) => {
                self.async_contexts
                    .insert(def.id.clone(), Registered { def, index });
            }
        }
        Ok(())
    }

    fn validate_tag_usages(&self) -> Result<()> {
        let mut check = |host: &NodeId, usages: &[crate::definition::TagUsage]| -> Result<()> {
            for usage in usages {
                if !self.tags.contains_key(&usage.id) {
                    return Err(KernelError::TagNotRegistered {
                        tag: usage.id.clone(),
                        host: host.clone(),
                    });
                }
            }
            Ok(())
        };
        for entry in self.tasks.values() {
            check(&entry.def.id, &entry.def.tags)?;
        }
        for entry in self.resources.values() {
            check(&entry.def.id, &entry.def.tags)?;
        }
        for entry in self.events.values() {
            check(&entry.def.id, &entry.def.tags)?;
        }
        for entry in self.hooks.values() {
            check(&entry.def.id, &entry.def.tags)?;
        }
        for entry in self.task_middlewares.values() {
            check(&entry.def.id, &entry.def.tags)?;
        }
        for entry in self.resource_middlewares.values() {
            check(&entry.def.id, &entry.def.tags)?;
        }
        Ok(())
    }

    fn validate_throws(&self) -> Result<()> {
        for entry in self.tasks.values() {
            if let Some(throws) = &entry.def.throws {
                for error_id in throws {
                    if !self.error_helpers.contains_key(error_id) {
                        return Err(KernelError::InvalidThrows {
                            task: entry.def.id.clone(),
                            error: error_id.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// 查询某 ID 当前注册的种类。
    pub fn kind_of(&self, id: &NodeId) -> Option<NodeKind> {
        if self.tasks.contains_key(id) {
            Some(NodeKind::Task)
        } else if self.resources.contains_key(id) {
            Some(NodeKind::Resource)
        } else if self.events.contains_key(id) {
            Some(NodeKind::Event)
        } else if self.hooks.contains_key(id) {
            Some(NodeKind::Hook)
        } else if self.task_middlewares.contains_key(id) {
            Some(NodeKind::TaskMiddleware)
        } else if self.resource_middlewares.contains_key(id) {
            Some(NodeKind::ResourceMiddleware)
        } else if self.tags.contains_key(id) {
            Some(NodeKind::Tag)
        } else if self.error_helpers.contains_key(id) {
            Some(NodeKind::ErrorHelper)
        } else if self.async_contexts.contains_key(id) {
            Some(NodeKind::AsyncContext)
        } else {
            None
        }
    }

    /// 根资源 ID。
    pub fn root_id(&self) -> &NodeId {
        &self.root
    }

    /// 锁定注册表；此后所有修改被拒绝。
    pub(crate) fn lock(&self) {
        self.locked.store(true, Ordering::Release);
    }

    /// 是否已锁定。
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    pub(crate) fn ensure_unlocked(&self, operation: &'static str) -> Result<()> {
        if self.is_locked() {
            return Err(KernelError::StoreLocked { operation });
        }
        Ok(())
    }

    /// 按 ID 取任务定义。
    pub fn task(&self, id: &NodeId) -> Option<Arc<TaskDef>> {
        self.tasks.get(id).map(|r| Arc::clone(&r.def))
    }

    /// 按 ID 取资源定义。
    pub fn resource(&self, id: &NodeId) -> Option<Arc<ResourceDef>> {
        self.resources.get(id).map(|r| Arc::clone(&r.def))
    }

    /// 按 ID 取事件定义。
    pub fn event(&self, id: &NodeId) -> Option<Arc<EventDef>> {
        self.events.get(id).map(|r| Arc::clone(&r.def))
    }

    /// 按 ID 取钩子定义。
    pub fn hook(&self, id: &NodeId) -> Option<Arc<HookDef>> {
        self.hooks.get(id).map(|r| Arc::clone(&r.def))
    }

    /// 按 ID 取任务中间件定义。
    pub fn task_middleware(&self, id: &NodeId) -> Option<Arc<TaskMiddlewareDef>> {
        self.task_middlewares.get(id).map(|r| Arc::clone(&r.def))
    }

    /// 按 ID 取资源中间件定义。
    pub fn resource_middleware(&self, id: &NodeId) -> Option<Arc<ResourceMiddlewareDef>> {
        self.resource_middlewares.get(id).map(|r| Arc::clone(&r.def))
    }

    /// 按 ID 取标签定义。
    pub fn tag(&self, id: &NodeId) -> Option<Arc<TagDef>> {
        self.tags.get(id).map(|r| Arc::clone(&r.def))
    }

    /// 按 ID 取错误助手定义。
    pub fn error_helper(&self, id: &NodeId) -> Option<Arc<ErrorHelperDef>> {
        self.error_helpers.get(id).map(|r| Arc::clone(&r.def))
    }

    /// 按 ID 取异步上下文定义。
    pub fn async_context(&self, id: &NodeId) -> Option<Arc<AsyncContextDef>> {
        self.async_contexts.get(id).map(|r| Arc::clone(&r.def))
    }

    /// 某 ID 的声明序号。
    pub(crate) fn declaration_index(&self, id: &NodeId) -> Option<u64> {
        match self.kind_of(id)? {
            NodeKind::Task => self.tasks.get(id).map(|r| r.index),
            NodeKind::Resource => self.resources.get(id).map(|r| r.index),
            NodeKind::Event => self.events.get(id).map(|r| r.index),
            NodeKind::Hook => self.hooks.get(id).map(|r| r.index),
            NodeKind::TaskMiddleware => self.task_middlewares.get(id).map(|r| r.index),
            NodeKind::ResourceMiddleware => self.resource_middlewares.get(id).map(|r| r.index),
            NodeKind::Tag => self.tags.get(id).map(|r| r.index),
            NodeKind::ErrorHelper => self.error_helpers.get(id).map(|r| r.index),
            NodeKind::AsyncContext => self.async_contexts.get(id).map(|r| r.index),
        }
    }

    /// 全部任务，按声明序号升序。
    pub fn tasks_in_order(&self) -> Vec<Arc<TaskDef>> {
        let mut entries: Vec<&Registered<TaskDef>> = self.tasks.values().collect();
        entries.sort_by_key(|r| r.index);
        entries.into_iter().map(|r| Arc::clone(&r.def)).collect()
    }

    /// 全部资源，按声明序号升序。
    pub fn resources_in_order(&self) -> Vec<Arc<ResourceDef>> {
        let mut entries: Vec<&Registered<ResourceDef>> = self.resources.values().collect();
        entries.sort_by_key(|r| r.index);
        entries.into_iter().map(|r| Arc::clone(&r.def)).collect()
    }

    /// 全部钩子，按声明序号升序。
    pub fn hooks_in_order(&self) -> Vec<Arc<HookDef>> {
        let mut entries: Vec<&Registered<HookDef>> = self.hooks.values().collect();
        entries.sort_by_key(|r| r.index);
        entries.into_iter().map(|r| Arc::clone(&r.def)).collect()
    }

    /// 全部任务中间件，按声明序号升序（即全局中间件的注册顺序）。
    pub fn task_middlewares_in_order(&self) -> Vec<Arc<TaskMiddlewareDef>> {
        let mut entries: Vec<&Registered<TaskMiddlewareDef>> =
            self.task_middlewares.values().collect();
        entries.sort_by_key(|r| r.index);
        entries.into_iter().map(|r| Arc::clone(&r.def)).collect()
    }

    /// 全部资源中间件，按声明序号升序。
    pub fn resource_middlewares_in_order(&self) -> Vec<Arc<ResourceMiddlewareDef>> {
        let mut entries: Vec<&Registered<ResourceMiddlewareDef>> =
            self.resource_middlewares.values().collect();
        entries.sort_by_key(|r| r.index);
        entries.into_iter().map(|r| Arc::clone(&r.def)).collect()
    }

    /// 全部事件，按声明序号升序。
    pub fn events_in_order(&self) -> Vec<Arc<EventDef>> {
        let mut entries: Vec<&Registered<EventDef>> = self.events.values().collect();
        entries.sort_by_key(|r| r.index);
        entries.into_iter().map(|r| Arc::clone(&r.def)).collect()
    }
}

impl core::fmt::Debug for Store {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Store")
            .field("tasks", &self.tasks.len())
            .field("resources", &self.resources.len())
            .field("events", &self.events.len())
            .field("hooks", &self.hooks.len())
            .field("locked", &self.is_locked())
            .finish_non_exhaustive()
    }
}
