//! 依赖图：声明依赖的建边、环检测与确定性的拓扑排序。
//!
//! # 设计背景（Why）
//! - 资源初始化次序、全局中间件的自依赖排除都要在启动期一次性裁决；
//!   图构建完成后调用期只读；
//! - 可选依赖只有在目标已注册时才产生边，缺席的目标不参与排序，
//!   对应取值解析为 `None`。
//!
//! # 契约说明（What）
//! - 必需边上的有向环为致命错误，错误消息打印完整环路；
//! - 拓扑序的平手按声明序号裁决，结果在同一棵注册树上完全确定；
//! - 全局中间件 M 若传递性依赖目标 T，则 M 被排除出 T 的链
//!   （查询见 [`DependencyGraph::is_excluded`]）。

use std::collections::{BinaryHeap, HashMap, HashSet};
use std::cmp::Reverse;

use crate::definition::dependency::DependencySet;
use crate::definition::hook::HookTarget;
use crate::errors::{KernelError, Result};
use crate::kernel::ids::NodeId;
use crate::store::Store;

/// 构建完成的依赖图。
pub struct DependencyGraph {
    /// 邻接表：节点 → 它依赖的节点（必须先就绪者）。
    edges: HashMap<NodeId, Vec<NodeId>>,
    /// 被排除的 `(全局中间件, 目标)` 对。
    exclusions: HashSet<(NodeId, NodeId)>,
    /// 资源初始化次序。
    resource_order: Vec<NodeId>,
}

impl DependencyGraph {
    /// 从注册表构建依赖图并完成环检测与排序。
    pub fn build(store: &Store) -> Result<Self> {
        let mut graph = Self {
            edges: HashMap::new(),
            exclusions: HashSet::new(),
            resource_order: Vec::new(),
        };
        graph.add_declared_edges(store)?;
        graph.add_global_middleware_edges(store);
        graph.detect_cycles(store)?;
        graph.resource_order = graph.topological_resources(store);
        Ok(graph)
    }

    /// 建立声明依赖与本地中间件使用的边。
    fn add_declared_edges(&mut self, store: &Store) -> Result<()> {
        for task in store.tasks_in_order() {
            self.add_dependency_edges(store, &task.id, &task.dependencies)?;
            for usage in &task.middleware {
                if store.task_middleware(&usage.id).is_none() {
                    return Err(KernelError::MissingDependency {
                        from: task.id.clone(),
                        missing: usage.id.clone(),
                    });
                }
                self.add_edge(task.id.clone(), usage.id.clone());
            }
        }
        for resource in store.resources_in_order() {
            self.add_dependency_edges(store, &resource.id, &resource.dependencies)?;
            for usage in &resource.middleware {
                if store.resource_middleware(&usage.id).is_none() {
                    return Err(KernelError::MissingDependency {
                        from: resource.id.clone(),
                        missing: usage.id.clone(),
                    });
                }
                self.add_edge(resource.id.clone(), usage.id.clone());
            }
        }
        for hook in store.hooks_in_order() {
            self.add_dependency_edges(store, &hook.id, &hook.dependencies)?;
            match &hook.on {
                HookTarget::One(event) => self.require_event(store, &hook.id, event)?,
                HookTarget::Many(events) => {
                    for event in events {
                        self.require_event(store, &hook.id, event)?;
                    }
                }
                HookTarget::Global => {}
            }
        }
        for middleware in store.task_middlewares_in_order() {
            self.add_dependency_edges(store, &middleware.id, &middleware.dependencies)?;
        }
        for middleware in store.resource_middlewares_in_order() {
            self.add_dependency_edges(store, &middleware.id, &middleware.dependencies)?;
        }
        Ok(())
    }

    fn require_event(&mut self, store: &Store, hook: &NodeId, event: &NodeId) -> Result<()> {
        if store.event(event).is_none() {
            return Err(KernelError::MissingDependency {
                from: hook.clone(),
                missing: event.clone(),
            });
        }
        self.add_edge(hook.clone(), event.clone());
        Ok(())
    }

    fn add_dependency_edges(
        &mut self,
        store: &Store,
        from: &NodeId,
        deps: &DependencySet,
    ) -> Result<()> {
        for (_, entry) in deps.entries() {
            if store.kind_of(&entry.id).is_some() {
                self.add_edge(from.clone(), entry.id.clone());
            } else if !entry.optional {
                return Err(KernelError::MissingDependency {
                    from: from.clone(),
                    missing: entry.id.clone(),
                });
            }
            // 可选且缺席：不建边，取值时解析为 None。
        }
        Ok(())
    }

    /// 全局中间件按谓词挂边；传递性自依赖的目标改记排除。
    fn add_global_middleware_edges(&mut self, store: &Store) {
        for middleware in store.task_middlewares_in_order() {
            let Some(predicate) = middleware.everywhere.as_ref() else {
                continue;
            };
            for task in store.tasks_in_order() {
                if task.id == middleware.id || !predicate(&task) {
                    continue;
                }
                if self.reaches(&middleware.id, &task.id) {
                    self.exclusions
                        .insert((middleware.id.clone(), task.id.clone()));
                } else {
                    self.add_edge(task.id.clone(), middleware.id.clone());
                }
            }
        }
        for middleware in store.resource_middlewares_in_order() {
            let Some(predicate) = middleware.everywhere.as_ref() else {
                continue;
            };
            for resource in store.resources_in_order() {
                if resource.id == middleware.id || !predicate(&resource) {
                    continue;
                }
                if self.reaches(&middleware.id, &resource.id) {
                    self.exclusions
                        .insert((middleware.id.clone(), resource.id.clone()));
                } else {
                    self.add_edge(resource.id.clone(), middleware.id.clone());
                }
            }
        }
    }

    fn add_edge(&mut self, from: NodeId, to: NodeId) {
        let targets = self.edges.entry(from).or_default();
        if !targets.contains(&to) {
            targets.push(to);
        }
    }

    /// `from` 是否沿必需边可达 `to`。
    fn reaches(&self, from: &NodeId, to: &NodeId) -> bool {
        let mut stack = vec![from.clone()];
        let mut seen = HashSet::new();
        while let Some(current) = stack.pop() {
            if &current == to {
                return true;
            }
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(targets) = self.edges.get(&current) {
                stack.extend(targets.iter().cloned());
            }
        }
        false
    }

    /// 三色深度优先检测有向环；命中时打印完整环路。
    fn detect_cycles(&self, store: &Store) -> Result<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }
        let mut colors: HashMap<NodeId, Color> = HashMap::new();
        let mut all_nodes: Vec<NodeId> = self.edges.keys().cloned().collect();
        all_nodes.sort_by_key(|id| store.declaration_index(id).unwrap_or(u64::MAX));

        fn visit(
            graph: &DependencyGraph,
            node: &NodeId,
            colors: &mut HashMap<NodeId, Color>,
            stack: &mut Vec<NodeId>,
        ) -> Result<()> {
            colors.insert(node.clone(), Color::Gray);
            stack.push(node.clone());
            if let Some(targets) = graph.edges.get(node) {
                for target in targets {
                    match colors.get(target).copied().unwrap_or(Color::White) {
                        Color::White => visit(graph, target, colors, stack)?,
                        Color::Gray => {
                            let start = stack
                                .iter()
                                .position(|id| id == target)
                                .unwrap_or(0);
                            let mut path: Vec<String> =
                                stack[start..].iter().map(|id| id.to_string()).collect();
                            path.push(target.to_string());
                            return Err(KernelError::DependencyCycle {
                                path: path.join(" -> "),
                            });
                        }
                        Color::Black => {}
                    }
                }
            }
            stack.pop();
            colors.insert(node.clone(), Color::Black);
            Ok(())
        }

        let mut stack = Vec::new();
        for node in &all_nodes {
            if colors.get(node).copied().unwrap_or(Color::White) == Color::White {
                visit(self, node, &mut colors, &mut stack)?;
            }
        }
        Ok(())
    }

    /// Kahn 拓扑排序，平手按声明序号；返回其中的资源子序列。
    fn topological_resources(&self, store: &Store) -> Vec<NodeId> {
        // 参与排序的节点全集：有边的节点加全部资源。
        let mut nodes: HashSet<NodeId> = HashSet::new();
        for (from, targets) in &self.edges {
            nodes.insert(from.clone());
            for target in targets {
                nodes.insert(target.clone());
            }
        }
        for resource in store.resources_in_order() {
            nodes.insert(resource.id.clone());
        }

        let mut in_degree: HashMap<NodeId, usize> = nodes.iter().map(|n| (n.clone(), 0)).collect();
        let mut dependents: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for (from, targets) in &self.edges {
            for target in targets {
                *in_degree.entry(from.clone()).or_default() += 1;
                dependents.entry(target.clone()).or_default().push(from.clone());
            }
        }

        let mut ready: BinaryHeap<Reverse<(u64, NodeId)>> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| {
                Reverse((
                    store.declaration_index(id).unwrap_or(u64::MAX),
                    id.clone(),
                ))
            })
            .collect();

        let mut order = Vec::new();
        while let Some(Reverse((_, id))) = ready.pop() {
            if store.resource(&id).is_some() {
                order.push(id.clone());
            }
            if let Some(deps) = dependents.get(&id) {
                for dependent in deps.clone() {
                    if let Some(degree) = in_degree.get_mut(&dependent) {
                        *degree -= 1;
                        if *degree == 0 {
                            ready.push(Reverse((
                                store.declaration_index(&dependent).unwrap_or(u64::MAX),
                                dependent,
                            )));
                        }
                    }
                }
            }
        }
        order
    }

    /// 资源初始化次序。
    pub fn resource_order(&self) -> &[NodeId] {
        &self.resource_order
    }

    /// 全局中间件是否被排除出某目标的链。
    pub fn is_excluded(&self, middleware: &NodeId, target: &NodeId) -> bool {
        self.exclusions
            .contains(&(middleware.clone(), target.clone()))
    }

    /// 某节点声明依赖的邻接视图，供诊断使用。
    pub fn dependencies_of(&self, id: &NodeId) -> &[NodeId] {
        self.edges.get(id).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl core::fmt::Debug for DependencyGraph {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DependencyGraph")
            .field("nodes", &self.edges.len())
            .field("exclusions", &self.exclusions.len())
            .field("resource_order", &self.resource_order.len())
            .finish()
    }
}
