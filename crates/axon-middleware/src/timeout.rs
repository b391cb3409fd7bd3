//! 超时中间件：给单次任务调用设截止时长。
//!
//! 超时后剩余链的 Future 被丢弃（协作取消），以错误助手抛出携带
//! 配置时长的品牌化错误。

use std::sync::Arc;
use std::time::Duration;

use axon_core::{Clock, ErrorHelper, Result, TaskMiddleware};

/// 超时错误数据。
#[derive(Clone, Debug)]
pub struct TimeoutExceeded {
    pub task: String,
    pub limit: Duration,
}

/// 超时错误助手；宿主可将其注册进组合树做结构化识别。
pub fn timeout_error() -> Result<ErrorHelper<TimeoutExceeded>> {
    ErrorHelper::<TimeoutExceeded>::builder("middleware.errors.timeout")
        .format(|data| {
            format!(
                "任务 `{}` 超过 {}ms 未完成",
                data.task,
                data.limit.as_millis()
            )
        })
        .remediation("提高超时阈值，或把长任务拆分为幂等分片")
        .build()
}

/// 超时配置。
#[derive(Clone, Copy, Debug)]
pub struct TimeoutConfig {
    pub limit: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            limit: Duration::from_secs(5),
        }
    }
}

/// 构建超时中间件。
pub fn timeout_middleware(clock: Arc<dyn Clock>) -> Result<TaskMiddleware<TimeoutConfig>> {
    let helper = timeout_error()?;
    TaskMiddleware::<TimeoutConfig>::builder("middleware.timeout")
        .validate_config()
        .run(move |invocation| {
            let clock = Arc::clone(&clock);
            let helper = helper.clone();
            async move {
                let config = invocation
                    .config::<TimeoutConfig>()
                    .map(|c| *c)
                    .unwrap_or_default();
                let work = invocation.next.forward();
                let deadline = clock.sleep(config.limit);
                tokio::select! {
                    out = work => out,
                    _ = deadline => Err(helper.raise(TimeoutExceeded {
                        task: invocation.task.id.to_string(),
                        limit: config.limit,
                    })),
                }
            }
        })
        .build()
}
