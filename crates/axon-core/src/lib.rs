#![doc = "axon-core: 声明式应用运行时内核。"]
#![doc = ""]
#![doc = "应用由九类可识别的构建块声明式组合：任务（可调用单元）、资源（带生命周期的"]
#![doc = "有状态单例）、事件（类型化信号）、钩子（事件监听器）、任务/资源中间件"]
#![doc = "（拦截器）、标签（类型化元数据）、错误助手（可抛出身份）与异步上下文"]
#![doc = "（作用域环境值）。把组合根交给 [`run`]，内核解析依赖图、按拓扑序初始化"]
#![doc = "资源、折叠中间件链、布线监听器，返回可执行任务、发射事件、读取资源值、"]
#![doc = "逆序释放一切的 [`Runtime`] 句柄。"]
#![doc = ""]
#![doc = "== 兼容性 =="]
#![doc = "本 Crate 遵守语义化版本 2.0；`errors::codes` 中的错误码与内建标签/事件 ID"]
#![doc = "属于稳定对外语义，变更即破坏性变更。"]

pub use async_trait::async_trait;

mod ambient;
pub(crate) mod chain;
pub mod definition;
pub mod errors;
pub mod events;
pub mod graph;
pub mod injection;
pub mod kernel;
pub(crate) mod lifecycle;
pub mod observability;
pub mod pipeline;
pub mod prelude;
pub mod runtime;
pub mod store;
pub mod sync;
pub mod time;

pub use definition::{
    AsyncContext, DependencySet, ErrorHelper, Event, ForkRegister, Hook, HookTarget,
    MiddlewareUsage, Next, Node, RegisterList, Resource, ResourceContext, ResourceMiddleware,
    ResourceMiddlewareInvocation, Tag, TagUsage, Task, TaskMiddleware, TaskMiddlewareInvocation,
    builtin, tags,
};
pub use errors::{BrandedError, KernelError, Result, codes};
pub use events::{
    EmitOptions, EmitReport, EventDeliveryMode, EventEmission, FailureMode, TunnelHandle,
    TunnelTransport,
};
pub use injection::{DepOverrides, DepValue, EventEmitter, ResolvedDeps, TaskCallable};
pub use kernel::{
    BoxFuture, Cancellation, DynValue, Meta, NodeId, NodeKind, Schema, SchemaRef, SchemaViolation,
    downcast_arc, downcast_ref, dyn_value,
};
pub use kernel::schema::{of_type, validator};
pub use observability::{LogOptions, PrintStrategy};
pub use pipeline::journal::{ExecutionJournal, JournalKey, keys as journal_keys};
pub use runtime::{InitMode, RunOptions, Runtime, run};
pub use sync::{
    AcquireOptions, JobQueue, PrimitiveEvent, PrimitiveListener, QueueDisposeOptions, Semaphore,
    SemaphoreMetrics,
};
pub use time::{Clock, MockClock, Sleep, SystemClock};
