//! 缓存中间件：按键记忆任务结果，带 TTL 与容量上限。
//!
//! # 契约说明（What）
//! - 键由配置的 `key_of` 从输入派生；返回 `None` 的调用不参与缓存；
//!   缺省策略仅缓存无输入调用（键为任务 ID）；
//! - 命中在日志键 `cache.hit` 记 `true`，未命中记 `false`；
//! - 过期依注入时钟判定；超容时逐出最早写入的条目。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use axon_core::journal_keys;
use axon_core::{Clock, DynValue, Result, TaskMiddleware};

/// 缓存键派生策略。
pub type KeyOf = Arc<dyn Fn(&Option<DynValue>) -> Option<String> + Send + Sync>;

/// 缓存配置。
#[derive(Clone)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub capacity: usize,
    /// 从输入派生缓存键；`None` 表示本次调用不缓存。
    pub key_of: Option<KeyOf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            capacity: 256,
            key_of: None,
        }
    }
}

impl core::fmt::Debug for CacheConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CacheConfig")
            .field("ttl", &self.ttl)
            .field("capacity", &self.capacity)
            .field("has_key_of", &self.key_of.is_some())
            .finish()
    }
}

struct CacheEntry {
    value: DynValue,
    stored_at: Instant,
    expires_at: Instant,
}

/// 构建缓存中间件；同一个中间件实例共享一份缓存存储。
pub fn cache_middleware(clock: Arc<dyn Clock>) -> Result<TaskMiddleware<CacheConfig>> {
    let entries: Arc<Mutex<HashMap<String, CacheEntry>>> = Arc::new(Mutex::new(HashMap::new()));
    TaskMiddleware::<CacheConfig>::builder("middleware.cache")
        .validate_config()
        .run(move |invocation| {
            let clock = Arc::clone(&clock);
            let entries = Arc::clone(&entries);
            async move {
                let config = invocation
                    .config::<CacheConfig>()
                    .map(|c| (*c).clone())
                    .unwrap_or_default();
                let key = match &config.key_of {
                    Some(key_of) => key_of(&invocation.input),
                    // 缺省仅缓存无输入调用，键为任务 ID。
                    None => invocation
                        .input
                        .is_none()
                        .then(|| invocation.task.id.to_string()),
                };
                let Some(key) = key else {
                    return invocation.next.forward().await;
                };

                let now = clock.now();
                let cached = {
                    let mut map = entries.lock();
                    match map.get(&key) {
                        Some(entry) if entry.expires_at > now => Some(entry.value.clone()),
                        Some(_) => {
                            map.remove(&key);
                            None
                        }
                        None => None,
                    }
                };
                if let Some(value) = cached {
                    invocation.journal.set_override(&journal_keys::CACHE_HIT, true);
                    return Ok(value);
                }
                invocation
                    .journal
                    .set_override(&journal_keys::CACHE_HIT, false);

                let out = invocation.next.forward().await?;
                let mut map = entries.lock();
                if map.len() >= config.capacity.max(1) {
                    // 超容逐出最早写入的条目。
                    if let Some(oldest) = map
                        .iter()
                        .min_by_key(|(_, entry)| entry.stored_at)
                        .map(|(key, _)| key.clone())
                    {
                        map.remove(&oldest);
                    }
                }
                map.insert(
                    key,
                    CacheEntry {
                        value: out.clone(),
                        stored_at: now,
                        expires_at: now + config.ttl,
                    },
                );
                Ok(out)
            }
        })
        .build()
}
