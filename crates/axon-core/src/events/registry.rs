//! 监听器登记簿：按事件分桶的有序数组、全局数组与合并视图缓存。
//!
//! # 设计背景（Why）
//! - 投递热路径要求一次读取就拿到排好序的监听器列表；这里维护按
//!   `(order, 注册序号)` 排序的分桶数组，并把“事件监听器 + 全局监听器”的
//!   合并结果缓存在读多写少的 [`ArcSwap`] 视图里；
//! - 失效粒度：对某事件的增删只作废该事件的缓存项；对全局监听器的增删
//!   作废整个缓存。
//!
//! # 契约说明（What）
//! - 插入用二分定位（`partition_point`），同 `order` 的监听器保持注册顺序；
//! - `ready` 之后登记簿锁定，增删报 `boot.store_locked`。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::definition::hook::HookFilter;
use crate::errors::{KernelError, Result};
use crate::events::emission::EventEmission;
use crate::kernel::future::BoxFuture;
use crate::kernel::ids::NodeId;

pub(crate) type ListenerFn =
    Arc<dyn Fn(EventEmission) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// 一条已布线的监听器。
#[derive(Clone)]
pub(crate) struct ListenerEntry {
    pub id: NodeId,
    pub order: i32,
    pub seq: u64,
    pub filter: Option<HookFilter>,
    pub run: ListenerFn,
}

#[derive(Default)]
struct DirtyState {
    events: HashSet<NodeId>,
    all: bool,
}

/// 监听器登记簿。
pub(crate) struct ListenerRegistry {
    per_event: Mutex<HashMap<NodeId, Vec<ListenerEntry>>>,
    globals: Mutex<Vec<ListenerEntry>>,
    merged: ArcSwap<HashMap<NodeId, Arc<Vec<ListenerEntry>>>>,
    dirty: Mutex<DirtyState>,
    locked: AtomicBool,
    next_seq: AtomicU64,
}

impl ListenerRegistry {
    pub(crate) fn new() -> Self {
        Self {
            per_event: Mutex::new(HashMap::new()),
            globals: Mutex::new(Vec::new()),
            merged: ArcSwap::from_pointee(HashMap::new()),
            dirty: Mutex::new(DirtyState::default()),
            locked: AtomicBool::new(false),
            next_seq: AtomicU64::new(0),
        }
    }

    fn ensure_unlocked(&self) -> Result<()> {
        if self.locked.load(Ordering::Acquire) {
            return Err(KernelError::StoreLocked {
                operation: "增删监听器",
            });
        }
        Ok(())
    }

    /// 挂接监听器；`event` 为 `None` 时挂到全局数组。
    pub(crate) fn add(
        &self,
        event: Option<&NodeId>,
        id: NodeId,
        order: i32,
        filter: Option<HookFilter>,
        run: ListenerFn,
    ) -> Result<()> {
        self.ensure_unlocked()?;
        let entry = ListenerEntry {
            id,
            order,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            filter,
            run,
        };
        match event {
            Some(event) => {
                let mut buckets = self.per_event.lock();
                let bucket = buckets.entry(event.clone()).or_default();
                insert_sorted(bucket, entry);
                self.dirty.lock().events.insert(event.clone());
            }
            None => {
                let mut globals = self.globals.lock();
                insert_sorted(&mut globals, entry);
                self.dirty.lock().all = true;
            }
        }
        Ok(())
    }

    /// 按监听器 ID 摘除，事件桶与全局数组都清理。
    pub(crate) fn remove(&self, listener: &NodeId) -> Result<()> {
        self.ensure_unlocked()?;
        {
            let mut buckets = self.per_event.lock();
            let mut dirty = self.dirty.lock();
            for (event, bucket) in buckets.iter_mut() {
                let before = bucket.len();
                bucket.retain(|e| &e.id != listener);
                if bucket.len() != before {
                    dirty.events.insert(event.clone());
                }
            }
        }
        {
            let mut globals = self.globals.lock();
            let before = globals.len();
            globals.retain(|e| &e.id != listener);
            if globals.len() != before {
                self.dirty.lock().all = true;
            }
        }
        Ok(())
    }

    /// 解析某事件的投递列表。
    ///
    /// `include_globals` 为 `false`（事件携带排除标签）时直接返回事件桶的
    /// 快照；合并视图仅在包含全局监听器时走缓存。
    pub(crate) fn resolve(
        &self,
        event: &NodeId,
        include_globals: bool,
    ) -> Arc<Vec<ListenerEntry>> {
        if !include_globals {
            let buckets = self.per_event.lock();
            return Arc::new(buckets.get(event).cloned().unwrap_or_default());
        }

        self.flush_dirty();
        let snapshot = self.merged.load();
        if let Some(cached) = snapshot.get(event) {
            return Arc::clone(cached);
        }
        drop(snapshot);

        let merged = {
            let buckets = self.per_event.lock();
            let globals = self.globals.lock();
            let locals = buckets.get(event).cloned().unwrap_or_default();
            Arc::new(merge_sorted(locals, globals.clone()))
        };
        let mut next = (**self.merged.load()).clone();
        next.insert(event.clone(), Arc::clone(&merged));
        self.merged.store(Arc::new(next));
        merged
    }

    /// 把积压的失效落实到合并缓存。
    fn flush_dirty(&self) {
        let mut dirty = self.dirty.lock();
        if dirty.all {
            dirty.all = false;
            dirty.events.clear();
            self.merged.store(Arc::new(HashMap::new()));
            return;
        }
        if dirty.events.is_empty() {
            return;
        }
        let mut next = (**self.merged.load()).clone();
        for event in dirty.events.drain() {
            next.remove(&event);
        }
        self.merged.store(Arc::new(next));
    }

    /// 锁定登记簿；此后增删被拒绝。
    pub(crate) fn lock(&self) {
        self.locked.store(true, Ordering::Release);
    }

    /// 当前挂接的监听器总数（事件桶 + 全局）。
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        let buckets = self.per_event.lock();
        let globals = self.globals.lock();
        buckets.values().map(Vec::len).sum::<usize>() + globals.len()
    }
}

/// 二分定位插入，保持 `(order, seq)` 升序；同 `order` 追加在末尾。
fn insert_sorted(bucket: &mut Vec<ListenerEntry>, entry: ListenerEntry) {
    let at = bucket.partition_point(|e| e.order <= entry.order);
    bucket.insert(at, entry);
}

/// 双指针合并两个有序数组，稳定保持 `(order, seq)` 次序。
fn merge_sorted(locals: Vec<ListenerEntry>, globals: Vec<ListenerEntry>) -> Vec<ListenerEntry> {
    let mut merged = Vec::with_capacity(locals.len() + globals.len());
    let mut left = locals.into_iter().peekable();
    let mut right = globals.into_iter().peekable();
    while let (Some(l), Some(r)) = (left.peek(), right.peek()) {
        let take_left = (l.order, l.seq) <= (r.order, r.seq);
        let next = if take_left { left.next() } else { right.next() };
        merged.extend(next);
    }
    merged.extend(left);
    merged.extend(right);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_listener(id: &str, order: i32) -> (NodeId, i32, Option<HookFilter>, ListenerFn) {
        (
            NodeId::parse(id).unwrap(),
            order,
            None,
            Arc::new(|_| Box::pin(std::future::ready(Ok(())))),
        )
    }

    #[test]
    fn listeners_sort_by_order_then_insertion() {
        let registry = ListenerRegistry::new();
        let event = NodeId::parse("e.test").unwrap();
        for (id, order) in [("h.late", 10), ("h.first", 0), ("h.second", 0)] {
            let (id, order, filter, run) = noop_listener(id, order);
            registry.add(Some(&event), id, order, filter, run).unwrap();
        }
        let resolved = registry.resolve(&event, true);
        let ids: Vec<&str> = resolved.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["h.first", "h.second", "h.late"]);
    }

    #[test]
    fn global_changes_invalidate_cache() {
        let registry = ListenerRegistry::new();
        let event = NodeId::parse("e.test").unwrap();
        let (id, order, filter, run) = noop_listener("h.local", 5);
        registry.add(Some(&event), id, order, filter, run).unwrap();
        assert_eq!(registry.resolve(&event, true).len(), 1);

        let (id, order, filter, run) = noop_listener("h.global", 0);
        registry.add(None, id, order, filter, run).unwrap();
        let resolved = registry.resolve(&event, true);
        let ids: Vec<&str> = resolved.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["h.global", "h.local"]);
    }

    #[test]
    fn locked_registry_rejects_mutation() {
        let registry = ListenerRegistry::new();
        registry.lock();
        let (id, order, filter, run) = noop_listener("h.x", 0);
        let err = registry.add(None, id, order, filter, run).unwrap_err();
        assert!(matches!(err, KernelError::StoreLocked { .. }));
    }

    #[test]
    fn remove_by_id_cleans_both_sides() {
        let registry = ListenerRegistry::new();
        let event = NodeId::parse("e.test").unwrap();
        let (id, order, filter, run) = noop_listener("h.both", 0);
        registry.add(Some(&event), id, order, filter, run).unwrap();
        let (id, order, filter, run) = noop_listener("h.both2", 0);
        registry.add(None, id, order, filter, run).unwrap();
        assert_eq!(registry.len(), 2);
        registry.remove(&NodeId::parse("h.both").unwrap()).unwrap();
        registry.remove(&NodeId::parse("h.both2").unwrap()).unwrap();
        assert_eq!(registry.len(), 0);
        assert!(registry.resolve(&event, true).is_empty());
    }
}
