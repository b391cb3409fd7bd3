#![doc = "axon-middleware: 内核公开契约之上的一方可复用任务中间件。"]
#![doc = ""]
#![doc = "重试、超时与缓存都是普通的任务中间件：经 `TaskMiddleware` 构建器声明，"]
#![doc = "按需在任务上 `with(config)` 使用或以 `everywhere` 谓词全局挂载。"]
#![doc = "时间能力统一经注入的 `Clock` 获取，调用内状态经执行日志协作"]
#![doc = "（`retry.attempt`、`retry.lastError`、`cache.hit`）。"]

pub mod cache;
pub mod retry;
pub mod timeout;

pub use cache::{CacheConfig, cache_middleware};
pub use retry::{RetryConfig, retry_middleware};
pub use timeout::{TimeoutConfig, TimeoutExceeded, timeout_error, timeout_middleware};
