//! 稳定错误码表。
//!
//! # 设计背景（Why）
//! - 日志、指标与上层治理依赖机器可读的错误码做精确分流；码值一经发布即为稳定语义，
//!   重命名属于破坏性变更；
//! - 命名遵循 `<域>.<语义>`：`boot` 启动期配置、`graph` 依赖图、`validation` 载荷校验、
//!   `runtime` 调用期、`primitive` 并发原语、`context` 环境上下文、`platform` 平台能力、
//!   `user` 业务侧错误。

/// 启动期：节点 ID 为空或仅含空白。
pub const BOOT_INVALID_ID: &str = "boot.invalid_id";
/// 启动期：同一 ID 被重复注册。
pub const BOOT_DUPLICATE_ID: &str = "boot.duplicate_id";
/// 启动期：构建器缺少必填字段。
pub const BOOT_INCOMPLETE_DEFINITION: &str = "boot.incomplete_definition";
/// 启动期：宿主引用了未注册的标签。
pub const BOOT_TAG_NOT_REGISTERED: &str = "boot.tag_not_registered";
/// 启动期：`throws` 白名单指向未注册的错误助手。
pub const BOOT_INVALID_THROWS: &str = "boot.invalid_throws";
/// 启动期：错误助手携带的 HTTP 状态码越界。
pub const BOOT_INVALID_HTTP_CODE: &str = "boot.invalid_http_code";
/// 启动期：资源注册链出现环。
pub const BOOT_REGISTRATION_CYCLE: &str = "boot.registration_cycle";
/// 启动完成后仍尝试修改注册表或监听器。
pub const BOOT_STORE_LOCKED: &str = "boot.store_locked";
/// 按 ID 查找不到目标节点。
pub const BOOT_UNKNOWN_NODE: &str = "boot.unknown_node";

/// 依赖图：必需边构成有向环。
pub const GRAPH_DEPENDENCY_CYCLE: &str = "graph.dependency_cycle";
/// 依赖图：必需依赖未注册。
pub const GRAPH_MISSING_DEPENDENCY: &str = "graph.missing_dependency";
/// 并行初始化：存在待初始化资源但无法继续调度。
pub const GRAPH_PARALLEL_INIT_SCHEDULING: &str = "graph.parallel_init_scheduling";

/// 任务输入校验失败。
pub const VALIDATION_TASK_INPUT: &str = "validation.task_input";
/// 任务结果校验失败。
pub const VALIDATION_TASK_RESULT: &str = "validation.task_result";
/// 资源配置校验失败。
pub const VALIDATION_RESOURCE_CONFIG: &str = "validation.resource_config";
/// 资源初始化结果校验失败。
pub const VALIDATION_RESOURCE_RESULT: &str = "validation.resource_result";
/// 事件载荷校验失败。
pub const VALIDATION_EVENT_PAYLOAD: &str = "validation.event_payload";
/// 中间件配置校验失败。
pub const VALIDATION_MIDDLEWARE_CONFIG: &str = "validation.middleware_config";

/// 调用期：事件重发构成运行时环。
pub const RUNTIME_EVENT_CYCLE: &str = "runtime.event_cycle";
/// 调用期：资源初始化失败（携带资源 ID 注解）。
pub const RUNTIME_RESOURCE_INIT: &str = "runtime.resource_init";
/// 调用期：监听器执行失败（携带监听器 ID 与次序注解）。
pub const RUNTIME_LISTENER_FAILURE: &str = "runtime.listener_failure";
/// 调用期：并行事件投递的聚合错误。
pub const RUNTIME_EMIT_AGGREGATE: &str = "runtime.emit_aggregate";
/// 调用期：释放阶段收集到的聚合错误。
pub const RUNTIME_DISPOSE_AGGREGATE: &str = "runtime.dispose_aggregate";
/// 调用期：依赖访问的名称或类型不匹配。
pub const RUNTIME_DEPENDENCY_ACCESS: &str = "runtime.dependency_access";
/// 调用期：幻影任务没有可用隧道。
pub const RUNTIME_PHANTOM_WITHOUT_TUNNEL: &str = "runtime.phantom_without_tunnel";
/// 调用期：执行日志键重复写入且未声明覆盖。
pub const RUNTIME_JOURNAL_KEY_EXISTS: &str = "runtime.journal_key_exists";
/// 调用期：运行时已整体释放。
pub const RUNTIME_DISPOSED: &str = "runtime.disposed";

/// 队列已释放，拒绝新作业。
pub const PRIMITIVE_QUEUE_DISPOSED: &str = "primitive.queue_disposed";
/// 作业向所属队列再次入队。
pub const PRIMITIVE_QUEUE_DEADLOCK: &str = "primitive.queue_deadlock";
/// 信号量已释放。
pub const PRIMITIVE_SEMAPHORE_DISPOSED: &str = "primitive.semaphore_disposed";
/// 信号量等待超时。
pub const PRIMITIVE_SEMAPHORE_TIMEOUT: &str = "primitive.semaphore_timeout";
/// 信号量许可数非法。
pub const PRIMITIVE_SEMAPHORE_INVALID_PERMITS: &str = "primitive.semaphore_invalid_permits";
/// 信号量等待被取消信号中止。
pub const PRIMITIVE_SEMAPHORE_ABORTED: &str = "primitive.semaphore_aborted";

/// 在 `provide` 作用域之外读取上下文。
pub const CONTEXT_UNAVAILABLE: &str = "context.unavailable";
/// 上下文序列化或反序列化失败。
pub const CONTEXT_SERIALIZATION: &str = "context.serialization";

/// 当前平台缺少所需能力。
pub const PLATFORM_UNSUPPORTED: &str = "platform.unsupported";

/// 错误助手抛出的业务错误。
pub const USER_BRANDED: &str = "user.branded";
/// 未归类的业务错误。
pub const USER_UNHANDLED: &str = "user.unhandled";
