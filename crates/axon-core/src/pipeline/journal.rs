//! 执行日志：单次任务调用内中间件协作的追加式键值簿。
//!
//! # 设计背景（Why）
//! - 重试次数、缓存命中这类调用内状态需要在链接之间传递，又不应污染任务
//!   输入输出；日志为每次调用新建，随调用结束丢弃；
//! - 追加式语义（已存在的键默认拒绝重写）让各中间件的记录不被悄悄覆盖，
//!   覆盖必须显式声明。
//!
//! # 契约说明（What）
//! - 键为类型化的 [`JournalKey`]；同一调用内写入按调用顺序全序；
//! - 克隆共享同一底层存储，链上所有链接看到同一份日志。

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::errors::{KernelError, Result};
use crate::kernel::value::{DynValue, downcast_ref, dyn_value};

/// 类型化日志键。
pub struct JournalKey<T> {
    name: &'static str,
    _marker: PhantomData<fn(T)>,
}

impl<T> JournalKey<T> {
    /// 声明一个日志键。
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    /// 键名。
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

/// 内核与一方中间件约定的公共日志键。
pub mod keys {
    use super::JournalKey;

    /// 重试中间件：当前尝试序号（从 1 起）。
    pub const RETRY_ATTEMPT: JournalKey<u32> = JournalKey::new("retry.attempt");
    /// 重试中间件：最近一次失败的渲染消息。
    pub const RETRY_LAST_ERROR: JournalKey<String> = JournalKey::new("retry.lastError");
    /// 缓存中间件：本次调用是否命中缓存。
    pub const CACHE_HIT: JournalKey<bool> = JournalKey::new("cache.hit");
}

/// 单次调用的执行日志。
#[derive(Clone, Default)]
pub struct ExecutionJournal {
    entries: Arc<Mutex<BTreeMap<String, DynValue>>>,
}

impl ExecutionJournal {
    /// 新建空日志。
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加写入；键已存在时报 `runtime.journal_key_exists`。
    pub fn set<T: Send + Sync + 'static>(&self, key: &JournalKey<T>, value: T) -> Result<()> {
        self.set_named(key.name, dyn_value(value), false)
    }

    /// 显式覆盖写入。
    pub fn set_override<T: Send + Sync + 'static>(&self, key: &JournalKey<T>, value: T) {
        // 覆盖写入不会失败，忽略结果。
        let _ = self.set_named(key.name, dyn_value(value), true);
    }

    /// 类型擦除形态的写入，供动态装配使用。
    pub fn set_named(&self, name: &str, value: DynValue, allow_override: bool) -> Result<()> {
        let mut entries = self.entries.lock();
        if !allow_override && entries.contains_key(name) {
            return Err(KernelError::JournalKeyExists {
                key: name.to_string(),
            });
        }
        entries.insert(name.to_string(), value);
        Ok(())
    }

    /// 读取类型化的值。
    pub fn get<T: Clone + Send + Sync + 'static>(&self, key: &JournalKey<T>) -> Option<T> {
        self.entries
            .lock()
            .get(key.name)
            .and_then(|v| downcast_ref::<T>(v).cloned())
    }

    /// 键是否已写入。
    pub fn contains(&self, name: &str) -> bool {
        self.entries.lock().contains_key(name)
    }

    /// 当前全部键名，按字典序。
    pub fn key_names(&self) -> Vec<String> {
        self.entries.lock().keys().cloned().collect()
    }
}
