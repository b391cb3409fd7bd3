//! 依赖注入的取值侧：节点代码在运行期看到的已解析依赖。
//!
//! # 设计背景（Why）
//! - 声明侧（[`crate::definition::DependencySet`]）只携带引用；初始化阶段按
//!   拓扑序把引用兑现成活值：任务变成可调用句柄、资源变成其值、事件变成
//!   发射器、上下文与错误助手变成访问句柄；
//! - 取值接口统一返回内核错误而非 `panic`，名称或类型不匹配在错误消息中
//!   带出所属节点与依赖名，便于排障。
//!
//! # 契约说明（What）
//! - [`ResolvedDeps`] 克隆成本为一次引用计数，跨中间件与监听器安全传递；
//! - 可选依赖的缺席以 [`DepValue::Absent`] 表达，`maybe_*` 访问器返回 `None`。

use std::collections::HashMap;
use std::sync::Arc;

use crate::definition::async_context::AsyncContextDef;
use crate::definition::error_helper::ErrorHelperDef;
use crate::errors::{KernelError, Result};
use crate::kernel::future::BoxFuture;
use crate::kernel::ids::NodeId;
use crate::kernel::value::{DynValue, downcast_ref, dyn_value};

type DynCall =
    Arc<dyn Fn(Option<DynValue>) -> BoxFuture<'static, Result<DynValue>> + Send + Sync>;
type DynEmit = Arc<
    dyn Fn(Option<DynValue>, Option<NodeId>) -> BoxFuture<'static, Result<()>> + Send + Sync,
>;

/// 任务依赖兑现出的可调用句柄。
///
/// 经句柄发起的调用走完整执行管线（校验、中间件、日志），与顶层调用一致。
#[derive(Clone)]
pub struct TaskCallable {
    pub(crate) task: NodeId,
    pub(crate) invoke: DynCall,
}

impl TaskCallable {
    /// 被调任务的 ID。
    pub fn task_id(&self) -> &NodeId {
        &self.task
    }

    /// 以类型化输入调用任务并取回类型化结果。
    pub async fn call<I, O>(&self, input: I) -> Result<O>
    where
        I: Send + Sync + 'static,
        O: Clone + Send + Sync + 'static,
    {
        let out = (self.invoke)(Some(dyn_value(input))).await?;
        downcast_ref::<O>(&out).cloned().ok_or_else(|| {
            KernelError::DependencyAccess {
                owner: self.task.clone(),
                name: self.task.to_string(),
                detail: format!("任务结果无法转换为 {}", std::any::type_name::<O>()),
            }
        })
    }

    /// 无输入调用。
    pub async fn call_empty<O>(&self) -> Result<O>
    where
        O: Clone + Send + Sync + 'static,
    {
        let out = (self.invoke)(None).await?;
        downcast_ref::<O>(&out).cloned().ok_or_else(|| {
            KernelError::DependencyAccess {
                owner: self.task.clone(),
                name: self.task.to_string(),
                detail: format!("任务结果无法转换为 {}", std::any::type_name::<O>()),
            }
        })
    }

    /// 类型擦除形态的调用，供隧道与动态装配使用。
    pub fn call_dyn(&self, input: Option<DynValue>) -> BoxFuture<'static, Result<DynValue>> {
        (self.invoke)(input)
    }
}

/// 事件依赖兑现出的发射器；发射自动携带声明方作为来源。
#[derive(Clone)]
pub struct EventEmitter {
    pub(crate) event: NodeId,
    pub(crate) send: DynEmit,
}

impl EventEmitter {
    /// 目标事件的 ID。
    pub fn event_id(&self) -> &NodeId {
        &self.event
    }

    /// 携带载荷发射；来源为声明方。
    pub async fn emit<P: Send + Sync + 'static>(&self, payload: P) -> Result<()> {
        (self.send)(Some(dyn_value(payload)), None).await
    }

    /// 无载荷发射。
    pub async fn emit_empty(&self) -> Result<()> {
        (self.send)(None, None).await
    }

    /// 以显式来源发射。
    ///
    /// 换源重发是监听器对自身事件做“下游接力”的合法模式：来源不同于栈顶
    /// 来源的再发射不会被环检测拦截，而与栈顶同源的再发射会。
    pub async fn emit_as<P: Send + Sync + 'static>(
        &self,
        payload: P,
        source: impl Into<Arc<str>>,
    ) -> Result<()> {
        let source = NodeId::parse(source)?;
        (self.send)(Some(dyn_value(payload)), Some(source)).await
    }
}

/// 异步上下文依赖的访问句柄。
#[derive(Clone)]
pub struct ContextAccess {
    pub(crate) def: Arc<AsyncContextDef>,
}

impl ContextAccess {
    /// 读取当前作用域内的上下文值；不在 `provide` 作用域内时报错。
    pub fn current<T: Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        let value = crate::ambient::context_value(&self.def.id)?;
        value
            .downcast::<T>()
            .map_err(|_| KernelError::DependencyAccess {
                owner: self.def.id.clone(),
                name: self.def.id.to_string(),
                detail: format!("上下文值无法转换为 {}", std::any::type_name::<T>()),
            })
    }
}

/// 错误助手依赖的抛出句柄。
#[derive(Clone)]
pub struct ErrorRaiser {
    pub(crate) def: Arc<ErrorHelperDef>,
}

impl ErrorRaiser {
    /// 以类型化数据构造品牌化错误。
    pub fn raise<D: Send + Sync + 'static>(&self, data: D) -> KernelError {
        self.def.raise_dyn(dyn_value(data))
    }

    /// 判断给定错误是否出自本助手。
    pub fn matches(&self, err: &KernelError) -> bool {
        err.branded().is_some_and(|b| b.id == self.def.id)
    }
}

/// 单条已解析依赖。
#[derive(Clone)]
pub enum DepValue {
    Task(TaskCallable),
    Resource(DynValue),
    Emitter(EventEmitter),
    Context(ContextAccess),
    Error(ErrorRaiser),
    /// 可选依赖的目标缺席。
    Absent,
}

impl DepValue {
    fn kind_name(&self) -> &'static str {
        match self {
            DepValue::Task(..) => "task",
            DepValue::Resource(..) => "resource",
            DepValue::Emitter(..) => "event",
            DepValue::Context(..) => "async_context",
            DepValue::Error(..) => "error_helper",
            DepValue::Absent => "absent",
        }
    }
}

/// 节点代码可见的已解析依赖集合。
#[derive(Clone)]
pub struct ResolvedDeps {
    owner: NodeId,
    entries: Arc<HashMap<String, DepValue>>,
}

impl ResolvedDeps {
    pub(crate) fn new(owner: NodeId, entries: HashMap<String, DepValue>) -> Self {
        Self {
            owner,
            entries: Arc::new(entries),
        }
    }

    /// 无依赖的空集合，供独立测试与脚手架使用。
    pub fn empty(owner: NodeId) -> Self {
        Self::new(owner, HashMap::new())
    }

    /// 所属节点的 ID。
    pub fn owner(&self) -> &NodeId {
        &self.owner
    }

    fn entry(&self, name: &str) -> Result<&DepValue> {
        self.entries
            .get(name)
            .ok_or_else(|| KernelError::DependencyAccess {
                owner: self.owner.clone(),
                name: name.to_string(),
                detail: "未声明该依赖".to_string(),
            })
    }

    fn mismatch(&self, name: &str, expected: &str, actual: &DepValue) -> KernelError {
        KernelError::DependencyAccess {
            owner: self.owner.clone(),
            name: name.to_string(),
            detail: format!("期望 {expected}，实际解析为 {}", actual.kind_name()),
        }
    }

    /// 读取必需的资源值。
    pub fn resource<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>> {
        match self.entry(name)? {
            DepValue::Resource(value) => {
                value
                    .clone()
                    .downcast::<T>()
                    .map_err(|_| KernelError::DependencyAccess {
                        owner: self.owner.clone(),
                        name: name.to_string(),
                        detail: format!("资源值无法转换为 {}", std::any::type_name::<T>()),
                    })
            }
            other => Err(self.mismatch(name, "resource", other)),
        }
    }

    /// 读取可选资源值；目标缺席时返回 `None`。
    pub fn maybe_resource<T: Send + Sync + 'static>(&self, name: &str) -> Result<Option<Arc<T>>> {
        match self.entry(name)? {
            DepValue::Absent => Ok(None),
            DepValue::Resource(..) => self.resource::<T>(name).map(Some),
            other => Err(self.mismatch(name, "resource", other)),
        }
    }

    /// 读取任务句柄。
    pub fn task(&self, name: &str) -> Result<TaskCallable> {
        match self.entry(name)? {
            DepValue::Task(callable) => Ok(callable.clone()),
            other => Err(self.mismatch(name, "task", other)),
        }
    }

    /// 读取可选任务句柄。
    pub fn maybe_task(&self, name: &str) -> Result<Option<TaskCallable>> {
        match self.entry(name)? {
            DepValue::Absent => Ok(None),
            DepValue::Task(callable) => Ok(Some(callable.clone())),
            other => Err(self.mismatch(name, "task", other)),
        }
    }

    /// 读取事件发射器。
    pub fn emitter(&self, name: &str) -> Result<EventEmitter> {
        match self.entry(name)? {
            DepValue::Emitter(emitter) => Ok(emitter.clone()),
            other => Err(self.mismatch(name, "event", other)),
        }
    }

    /// 读取上下文访问句柄。
    pub fn context(&self, name: &str) -> Result<ContextAccess> {
        match self.entry(name)? {
            DepValue::Context(access) => Ok(access.clone()),
            other => Err(self.mismatch(name, "async_context", other)),
        }
    }

    /// 读取可选上下文访问句柄。
    pub fn maybe_context(&self, name: &str) -> Result<Option<ContextAccess>> {
        match self.entry(name)? {
            DepValue::Absent => Ok(None),
            DepValue::Context(access) => Ok(Some(access.clone())),
            other => Err(self.mismatch(name, "async_context", other)),
        }
    }

    /// 读取错误助手句柄。
    pub fn error(&self, name: &str) -> Result<ErrorRaiser> {
        match self.entry(name)? {
            DepValue::Error(raiser) => Ok(raiser.clone()),
            other => Err(self.mismatch(name, "error_helper", other)),
        }
    }

    pub(crate) fn merged_with(&self, overrides: &DepOverrides) -> Self {
        if overrides.entries.is_empty() {
            return self.clone();
        }
        let mut entries: HashMap<String, DepValue> = (*self.entries).clone();
        for (name, value) in &overrides.entries {
            entries.insert(name.clone(), value.clone());
        }
        Self::new(self.owner.clone(), entries)
    }
}

/// 单次调用级的依赖替换集合。
///
/// 仅影响本次任务调用所见的依赖，不触碰注册表与其他调用。
#[derive(Clone, Default)]
pub struct DepOverrides {
    entries: HashMap<String, DepValue>,
}

impl DepOverrides {
    /// 创建空集合。
    pub fn new() -> Self {
        Self::default()
    }

    /// 用给定值顶替一个资源依赖。
    pub fn resource_value<T: Send + Sync + 'static>(
        mut self,
        name: impl Into<String>,
        value: T,
    ) -> Self {
        self.entries
            .insert(name.into(), DepValue::Resource(dyn_value(value)));
        self
    }

    /// 以任意已解析形态顶替依赖。
    pub fn raw(mut self, name: impl Into<String>, value: DepValue) -> Self {
        self.entries.insert(name.into(), value);
        self
    }

    /// 是否为空。
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
