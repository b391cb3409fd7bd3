//! 常用导入集合：业务侧一次性引入声明与运行所需的门面。

pub use crate::definition::tag::tags;
pub use crate::definition::{
    AsyncContext, DependencySet, ErrorHelper, Event, ForkRegister, Hook, Node, Resource,
    ResourceContext, ResourceMiddleware, Tag, Task, TaskMiddleware,
};
pub use crate::errors::{KernelError, Result};
pub use crate::events::{EmitOptions, EmitReport, FailureMode, TunnelHandle, TunnelTransport};
pub use crate::injection::{DepOverrides, ResolvedDeps};
pub use crate::kernel::{DynValue, NodeId, dyn_value};
pub use crate::pipeline::journal::{ExecutionJournal, keys as journal_keys};
pub use crate::runtime::{InitMode, RunOptions, Runtime, run};
pub use crate::sync::{AcquireOptions, JobQueue, Semaphore};
pub use crate::time::{Clock, MockClock, SystemClock};
