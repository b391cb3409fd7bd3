//! 内核错误分层：稳定错误码、上下文注解与用户可见渲染。
//!
//! # 设计背景（Why）
//! - 内核不吞错误：所有故障在注解（资源 ID、监听器 ID 等）后原样上抛，
//!   由调用方或宿主决定终止还是降级；
//! - 每个变体绑定一个稳定 [`codes`] 码值，供日志与自动化治理精确分流；
//! - 业务侧经由错误助手抛出的 [`BrandedError`] 与内核错误共用一条传播通道。
//!
//! # 契约说明（What）
//! - [`KernelError::code`] 返回稳定码值；[`KernelError::remediation`] 返回可选的
//!   补救提示；[`KernelError::render`] 输出 `"<码值>: <消息>"`，存在补救提示时追加
//!   `"\n\nRemediation: <text>"`；
//! - 聚合变体（投递、释放）保留全部子错误，便于调用方逐条检视。

pub mod codes;

use core::fmt;
use core::time::Duration;

use crate::kernel::ids::{NodeId, NodeKind};
use crate::kernel::schema::SchemaViolation;
use crate::kernel::value::DynValue;

/// 错误助手产出的品牌化业务错误。
///
/// # 契约说明（What）
/// - `id` 为错误助手的节点 ID；`data` 为类型擦除的业务数据；
/// - `message` 由助手的 `format` 回调在抛出时渲染；
/// - `http_code` 若存在，构建期已校验落在 `100..=599`。
#[derive(Clone)]
pub struct BrandedError {
    pub id: NodeId,
    pub data: DynValue,
    pub message: String,
    pub remediation: Option<String>,
    pub http_code: Option<u16>,
}

impl fmt::Debug for BrandedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrandedError")
            .field("id", &self.id)
            .field("message", &self.message)
            .field("remediation", &self.remediation)
            .field("http_code", &self.http_code)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for BrandedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.id, self.message)
    }
}

/// 内核统一错误。
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum KernelError {
    /// 节点 ID 为空或仅含空白。
    #[error("节点 ID 非法：`{value}` 为空或仅包含空白字符")]
    InvalidId { value: String },

    /// 同一 ID 已被注册。
    #[error("标识 `{id}` 已注册为 {kind}，不允许重复注册")]
    DuplicateId { id: NodeId, kind: NodeKind },

    /// 构建器缺少必填字段。
    #[error("{kind} `{id}` 定义不完整：缺少 {missing}")]
    IncompleteDefinition {
        kind: NodeKind,
        id: NodeId,
        missing: &'static str,
    },

    /// 宿主引用了未注册的标签。
    #[error("标签 `{tag}` 未注册（被 `{host}` 引用）")]
    TagNotRegistered { tag: NodeId, host: NodeId },

    /// `throws` 白名单指向未注册的错误助手。
    #[error("任务 `{task}` 的 throws 白名单引用了未注册的错误助手 `{error}`")]
    InvalidThrows { task: NodeId, error: NodeId },

    /// HTTP 状态码越界。
    #[error("错误助手 `{id}` 的 HTTP 状态码 {code} 不在 100..=599 范围内")]
    InvalidHttpCode { id: NodeId, code: i64 },

    /// 资源注册链成环。
    #[error("资源注册链出现环：{path}")]
    RegistrationCycle { path: String },

    /// 启动完成后注册表与监听器进入只读状态。
    #[error("运行时已就绪，{operation} 被拒绝：注册表与监听器在启动后为只读")]
    StoreLocked { operation: &'static str },

    /// 目标节点不存在。
    #[error("未找到 {kind} `{id}`")]
    UnknownNode { kind: NodeKind, id: NodeId },

    /// 必需依赖边构成有向环。
    #[error("依赖图存在环：{path}")]
    DependencyCycle { path: String },

    /// 必需依赖未注册。
    #[error("`{from}` 声明的必需依赖 `{missing}` 未注册")]
    MissingDependency { from: NodeId, missing: NodeId },

    /// 并行初始化无法继续调度。
    #[error("并行初始化停滞：仍有 {pending} 个资源待初始化但没有可调度项")]
    ParallelInitScheduling { pending: usize },

    /// 任务输入校验失败。
    #[error("任务 `{task}` 输入校验失败：{violation}")]
    TaskInputValidation {
        task: NodeId,
        violation: SchemaViolation,
    },

    /// 任务结果校验失败。
    #[error("任务 `{task}` 结果校验失败：{violation}")]
    TaskResultValidation {
        task: NodeId,
        violation: SchemaViolation,
    },

    /// 资源配置校验失败。
    #[error("资源 `{resource}` 配置校验失败：{violation}")]
    ResourceConfigValidation {
        resource: NodeId,
        violation: SchemaViolation,
    },

    /// 资源初始化结果校验失败。
    #[error("资源 `{resource}` 初始化结果校验失败：{violation}")]
    ResourceResultValidation {
        resource: NodeId,
        violation: SchemaViolation,
    },

    /// 事件载荷校验失败。
    #[error("事件 `{event}` 载荷校验失败：{violation}")]
    EventPayloadValidation {
        event: NodeId,
        violation: SchemaViolation,
    },

    /// 中间件配置校验失败。
    #[error("中间件 `{middleware}` 配置校验失败：{violation}")]
    MiddlewareConfigValidation {
        middleware: NodeId,
        violation: SchemaViolation,
    },

    /// 事件重发构成运行时环。
    #[error("事件重发构成环：{path}")]
    EventCycle { path: String },

    /// 资源初始化失败的注解包装。
    #[error("资源 `{resource}` 初始化失败")]
    ResourceInit {
        resource: NodeId,
        #[source]
        source: Box<KernelError>,
    },

    /// 监听器执行失败的注解包装。
    #[error("监听器 `{listener}`（次序 {order}）执行失败")]
    ListenerFailure {
        listener: NodeId,
        order: i32,
        #[source]
        source: Box<KernelError>,
    },

    /// 并行投递的聚合错误。
    #[error("事件 `{event}` 投递失败：{} 个监听器出错", .errors.len())]
    EmitAggregate {
        event: NodeId,
        errors: Vec<KernelError>,
    },

    /// 释放阶段的聚合错误。
    #[error("释放阶段收集到 {} 个错误", .errors.len())]
    DisposeAggregate { errors: Vec<KernelError> },

    /// 依赖访问的名称或类型不匹配。
    #[error("`{owner}` 访问依赖 `{name}` 失败：{detail}")]
    DependencyAccess {
        owner: NodeId,
        name: String,
        detail: String,
    },

    /// 幻影任务缺少隧道。
    #[error("任务 `{task}` 没有本地实现，也没有隧道资源承接")]
    PhantomWithoutTunnel { task: NodeId },

    /// 执行日志键重复写入。
    #[error("执行日志键 `{key}` 已存在；覆盖写入需要显式声明 override")]
    JournalKeyExists { key: String },

    /// 运行时句柄已释放。
    #[error("运行时已释放，{operation} 被拒绝")]
    RuntimeDisposed { operation: &'static str },

    /// 队列已释放。
    #[error("队列已释放，不再接受新作业")]
    QueueDisposed,

    /// 作业向所属队列再次入队。
    #[error("检测到队列死锁：作业不得向自己所在的队列再次入队")]
    QueueDeadlock,

    /// 信号量已释放。
    #[error("Semaphore has been disposed")]
    SemaphoreDisposed,

    /// 信号量等待超时。
    #[error("信号量等待超时（{}ms）", .timeout.as_millis())]
    SemaphoreAcquireTimeout { timeout: Duration },

    /// 信号量许可数非法。
    #[error("信号量许可数非法：{requested}，要求正整数")]
    SemaphoreInvalidPermits { requested: i64 },

    /// 信号量等待被取消。
    #[error("信号量等待被取消信号中止")]
    SemaphoreAcquireAborted,

    /// 在 `provide` 作用域之外读取上下文。
    #[error("上下文 `{context}` 不可用：当前不在 provide 作用域内")]
    ContextUnavailable { context: NodeId },

    /// 上下文序列化失败。
    #[error("上下文 `{context}` 序列化失败：{detail}")]
    ContextSerialization { context: NodeId, detail: String },

    /// 平台能力缺失。
    #[error("当前平台不支持 {feature}")]
    PlatformUnsupported { feature: &'static str },

    /// 错误助手抛出的业务错误。
    #[error("{0}")]
    Branded(BrandedError),

    /// 未归类的业务错误。
    #[error("{message}")]
    User {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl KernelError {
    /// 将任意业务错误折叠为内核错误。
    pub fn user(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        KernelError::User {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }

    /// 用纯文本消息构造业务错误。
    pub fn user_message(message: impl Into<String>) -> Self {
        KernelError::User {
            message: message.into(),
            source: None,
        }
    }

    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            KernelError::InvalidId { .. } => codes::BOOT_INVALID_ID,
            KernelError::DuplicateId { .. } => codes::BOOT_DUPLICATE_ID,
            KernelError::IncompleteDefinition { .. } => codes::BOOT_INCOMPLETE_DEFINITION,
            KernelError::TagNotRegistered { .. } => codes::BOOT_TAG_NOT_REGISTERED,
            KernelError::InvalidThrows { .. } => codes::BOOT_INVALID_THROWS,
            KernelError::InvalidHttpCode { .. } => codes::BOOT_INVALID_HTTP_CODE,
            KernelError::RegistrationCycle { .. } => codes::BOOT_REGISTRATION_CYCLE,
            KernelError::StoreLocked { .. } => codes::BOOT_STORE_LOCKED,
            KernelError::UnknownNode { .. } => codes::BOOT_UNKNOWN_NODE,
            KernelError::DependencyCycle { .. } => codes::GRAPH_DEPENDENCY_CYCLE,
            KernelError::MissingDependency { .. } => codes::GRAPH_MISSING_DEPENDENCY,
            KernelError::ParallelInitScheduling { .. } => codes::GRAPH_PARALLEL_INIT_SCHEDULING,
            KernelError::TaskInputValidation { .. } => codes::VALIDATION_TASK_INPUT,
            KernelError::TaskResultValidation { .. } => codes::VALIDATION_TASK_RESULT,
            KernelError::ResourceConfigValidation { .. } => codes::VALIDATION_RESOURCE_CONFIG,
            KernelError::ResourceResultValidation { .. } => codes::VALIDATION_RESOURCE_RESULT,
            KernelError::EventPayloadValidation { .. } => codes::VALIDATION_EVENT_PAYLOAD,
            KernelError::MiddlewareConfigValidation { .. } => {
                codes::VALIDATION_MIDDLEWARE_CONFIG
            }
            KernelError::EventCycle { .. } => codes::RUNTIME_EVENT_CYCLE,
            KernelError::ResourceInit { .. } => codes::RUNTIME_RESOURCE_INIT,
            KernelError::ListenerFailure { .. } => codes::RUNTIME_LISTENER_FAILURE,
            KernelError::EmitAggregate { .. } => codes::RUNTIME_EMIT_AGGREGATE,
            KernelError::DisposeAggregate { .. } => codes::RUNTIME_DISPOSE_AGGREGATE,
            KernelError::DependencyAccess { .. } => codes::RUNTIME_DEPENDENCY_ACCESS,
            KernelError::PhantomWithoutTunnel { .. } => codes::RUNTIME_PHANTOM_WITHOUT_TUNNEL,
            KernelError::JournalKeyExists { .. } => codes::RUNTIME_JOURNAL_KEY_EXISTS,
            KernelError::RuntimeDisposed { .. } => codes::RUNTIME_DISPOSED,
            KernelError::QueueDisposed => codes::PRIMITIVE_QUEUE_DISPOSED,
            KernelError::QueueDeadlock => codes::PRIMITIVE_QUEUE_DEADLOCK,
            KernelError::SemaphoreDisposed => codes::PRIMITIVE_SEMAPHORE_DISPOSED,
            KernelError::SemaphoreAcquireTimeout { .. } => codes::PRIMITIVE_SEMAPHORE_TIMEOUT,
            KernelError::SemaphoreInvalidPermits { .. } => {
                codes::PRIMITIVE_SEMAPHORE_INVALID_PERMITS
            }
            KernelError::SemaphoreAcquireAborted => codes::PRIMITIVE_SEMAPHORE_ABORTED,
            KernelError::ContextUnavailable { .. } => codes::CONTEXT_UNAVAILABLE,
            KernelError::ContextSerialization { .. } => codes::CONTEXT_SERIALIZATION,
            KernelError::PlatformUnsupported { .. } => codes::PLATFORM_UNSUPPORTED,
            KernelError::Branded(..) => codes::USER_BRANDED,
            KernelError::User { .. } => codes::USER_UNHANDLED,
        }
    }

    /// 返回补救提示；多数变体没有。
    pub fn remediation(&self) -> Option<&str> {
        match self {
            KernelError::Branded(branded) => branded.remediation.as_deref(),
            KernelError::DuplicateId { .. } => {
                Some("检查注册树是否重复挂载了同一节点，或为分叉资源指定新 ID")
            }
            KernelError::TagNotRegistered { .. } => {
                Some("将标签加入某个资源的 register 列表后再在宿主上使用")
            }
            KernelError::QueueDeadlock => {
                Some("把后续作业挂到队列外层，或为级联工作使用第二个队列")
            }
            KernelError::ContextUnavailable { .. } => {
                Some("仅在 provide 的动态作用域内调用 use/current")
            }
            _ => None,
        }
    }

    /// 用户可见的完整渲染：`"<码值>: <消息>"`，存在补救提示时追加说明段。
    pub fn render(&self) -> String {
        match self.remediation() {
            Some(hint) => format!("{}: {}\n\nRemediation: {}", self.code(), self, hint),
            None => format!("{}: {}", self.code(), self),
        }
    }

    /// 判断错误是否由任意错误助手抛出。
    pub fn is_branded(&self) -> bool {
        matches!(self, KernelError::Branded(..))
    }

    /// 若为品牌化错误则返回其载荷。
    pub fn branded(&self) -> Option<&BrandedError> {
        match self {
            KernelError::Branded(branded) => Some(branded),
            _ => None,
        }
    }
}

/// 内核统一结果别名。
pub type Result<T, E = KernelError> = core::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_appends_remediation_when_present() {
        let err = KernelError::QueueDeadlock;
        let rendered = err.render();
        assert!(rendered.starts_with("primitive.queue_deadlock: "));
        assert!(rendered.contains("\n\nRemediation: "));
    }

    #[test]
    fn render_is_code_prefixed_without_remediation() {
        let err = KernelError::SemaphoreDisposed;
        assert_eq!(
            err.render(),
            "primitive.semaphore_disposed: Semaphore has been disposed"
        );
    }
}
