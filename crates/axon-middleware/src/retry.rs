//! 重试中间件：失败后按退避序列重放链的剩余部分。
//!
//! # 契约说明（What）
//! - `attempts` 为总尝试次数（含首次）；`stop_when` 命中时立即放弃重试；
//! - 每次尝试前把序号写入日志键 `retry.attempt`；失败时用渲染消息覆盖
//!   `retry.lastError`；
//! - 退避时长 = `backoff × factor^(尝试序号-1)`，经注入的时钟等待，
//!   虚拟时钟下完全可测。

use std::sync::Arc;
use std::time::Duration;

use axon_core::journal_keys;
use axon_core::{Clock, KernelError, Result, TaskMiddleware};

/// 重试配置。
#[derive(Clone)]
pub struct RetryConfig {
    /// 总尝试次数（含首次），至少 1。
    pub attempts: u32,
    /// 首次失败后的基础退避。
    pub backoff: Duration,
    /// 退避倍率，逐次相乘。
    pub factor: f64,
    /// 命中即停止重试的谓词（如业务校验错误不值得重放）。
    pub stop_when: Option<Arc<dyn Fn(&KernelError) -> bool + Send + Sync>>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(100),
            factor: 2.0,
            stop_when: None,
        }
    }
}

impl core::fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RetryConfig")
            .field("attempts", &self.attempts)
            .field("backoff", &self.backoff)
            .field("factor", &self.factor)
            .field("has_stop_when", &self.stop_when.is_some())
            .finish()
    }
}

fn backoff_for(config: &RetryConfig, attempt: u32) -> Duration {
    let scale = config.factor.powi(attempt.saturating_sub(1) as i32);
    config.backoff.mul_f64(scale.max(0.0))
}

/// 构建重试中间件。
pub fn retry_middleware(clock: Arc<dyn Clock>) -> Result<TaskMiddleware<RetryConfig>> {
    TaskMiddleware::<RetryConfig>::builder("middleware.retry")
        .validate_config()
        .run(move |invocation| {
            let clock = Arc::clone(&clock);
            async move {
                let config = invocation
                    .config::<RetryConfig>()
                    .map(|c| (*c).clone())
                    .unwrap_or_default();
                let attempts = config.attempts.max(1);
                let mut attempt = 0u32;
                loop {
                    attempt += 1;
                    invocation
                        .journal
                        .set_override(&journal_keys::RETRY_ATTEMPT, attempt);
                    match invocation.next.call(invocation.input.clone()).await {
                        Ok(out) => return Ok(out),
                        Err(err) => {
                            let give_up = attempt >= attempts
                                || config
                                    .stop_when
                                    .as_ref()
                                    .is_some_and(|stop| stop(&err));
                            if give_up {
                                return Err(err);
                            }
                            invocation
                                .journal
                                .set_override(&journal_keys::RETRY_LAST_ERROR, err.render());
                            let delay = backoff_for(&config, attempt);
                            tracing::debug!(
                                task = %invocation.task.id,
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                "任务失败，退避后重试"
                            );
                            clock.sleep(delay).await;
                        }
                    }
                }
            }
        })
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_by_factor() {
        let config = RetryConfig {
            attempts: 4,
            backoff: Duration::from_millis(100),
            factor: 2.0,
            stop_when: None,
        };
        assert_eq!(backoff_for(&config, 1), Duration::from_millis(100));
        assert_eq!(backoff_for(&config, 2), Duration::from_millis(200));
        assert_eq!(backoff_for(&config, 3), Duration::from_millis(400));
    }
}
