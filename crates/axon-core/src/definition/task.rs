//! 任务定义：带可选输入输出校验与中间件链的可调用单元。
//!
//! # 设计背景（Why）
//! - 任务是运行时的主要执行面：调用经输入校验、中间件链、用户代码、结果校验
//!   四段组成的管线；定义层只负责声明这些组成部分；
//! - 类型化门面 [`Task`] 在构建器边界保留输入输出类型，内部以类型擦除形态
//!   存放，换取注册表与中间件引擎的统一处理。
//!
//! # 契约说明（What）
//! - 无 `run` 的任务为幻影任务，调用必须由隧道资源承接；
//! - `throws` 白名单在启动期校验指向已注册的错误助手；
//! - 定义构建后不可变。

use std::any::type_name;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::definition::dependency::DependencySet;
use crate::definition::error_helper::ErrorHelper;
use crate::definition::middleware::MiddlewareUsage;
use crate::definition::tag::TagUsage;
use crate::errors::{KernelError, Result};
use crate::injection::ResolvedDeps;
use crate::kernel::future::BoxFuture;
use crate::kernel::ids::NodeId;
use crate::kernel::schema::{SchemaRef, SchemaViolation, of_type};
use crate::kernel::value::{DynValue, Meta, downcast_ref, dyn_value};

pub(crate) type TaskRun =
    Arc<dyn Fn(Option<DynValue>, ResolvedDeps) -> BoxFuture<'static, Result<DynValue>> + Send + Sync>;

/// 任务的不可变定义。
pub struct TaskDef {
    pub id: NodeId,
    pub meta: Meta,
    pub tags: Vec<TagUsage>,
    pub dependencies: DependencySet,
    pub middleware: Vec<MiddlewareUsage>,
    pub input_schema: Option<SchemaRef>,
    pub result_schema: Option<SchemaRef>,
    pub throws: Option<Vec<NodeId>>,
    pub(crate) run: Option<TaskRun>,
}

impl TaskDef {
    /// 是否为幻影任务（无本地实现）。
    pub fn is_phantom(&self) -> bool {
        self.run.is_none()
    }
}

impl core::fmt::Debug for TaskDef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TaskDef")
            .field("id", &self.id)
            .field("phantom", &self.is_phantom())
            .field("middleware", &self.middleware.len())
            .finish_non_exhaustive()
    }
}

/// 把类型擦除的输入还原为 `I`。
///
/// `None` 输入仅在 `I = ()` 时合法；类型不匹配折叠为输入校验错误。
pub(crate) fn decode_input<I>(task: &NodeId, input: Option<&DynValue>) -> Result<I>
where
    I: Clone + Send + Sync + 'static,
{
    match input {
        Some(v) => downcast_ref::<I>(v).cloned().ok_or_else(|| {
            KernelError::TaskInputValidation {
                task: task.clone(),
                violation: SchemaViolation::new(format!(
                    "输入载荷无法转换为 {}",
                    type_name::<I>()
                )),
            }
        }),
        None => {
            let unit = dyn_value(());
            downcast_ref::<I>(&unit)
                .cloned()
                .ok_or_else(|| KernelError::TaskInputValidation {
                    task: task.clone(),
                    violation: SchemaViolation::new(format!(
                        "缺少输入载荷，期望 {}",
                        type_name::<I>()
                    )),
                })
        }
    }
}

/// 任务的类型化门面。
pub struct Task<I = (), O = ()> {
    pub(crate) def: Arc<TaskDef>,
    _marker: PhantomData<fn(I) -> O>,
}

impl<I, O> Clone for Task<I, O> {
    fn clone(&self) -> Self {
        Self {
            def: Arc::clone(&self.def),
            _marker: PhantomData,
        }
    }
}

impl<I, O> Task<I, O> {
    /// 任务 ID。
    pub fn id(&self) -> &NodeId {
        &self.def.id
    }

    /// 底层定义。
    pub fn definition(&self) -> &Arc<TaskDef> {
        &self.def
    }

    pub(crate) fn from_def(def: Arc<TaskDef>) -> Self {
        Self {
            def,
            _marker: PhantomData,
        }
    }
}

impl<I, O> Task<I, O>
where
    I: Clone + Send + Sync + 'static,
    O: Send + Sync + 'static,
{
    /// 开始构建一个任务。
    pub fn builder(id: impl Into<Arc<str>>) -> TaskBuilder<I, O> {
        TaskBuilder {
            id: NodeId::parse(id),
            meta: Meta::new(),
            tags: Vec::new(),
            dependencies: DependencySet::new(),
            middleware: Vec::new(),
            input_schema: None,
            result_schema: None,
            throws: None,
            run: None,
            _marker: PhantomData,
        }
    }

    /// 以现有定义为底稿重新构建（保持 ID 不变），用于补丁覆盖。
    pub fn redefine(&self) -> TaskBuilder<I, O> {
        TaskBuilder {
            id: Ok(self.def.id.clone()),
            meta: self.def.meta.clone(),
            tags: self.def.tags.clone(),
            dependencies: self.def.dependencies.clone(),
            middleware: self.def.middleware.clone(),
            input_schema: self.def.input_schema.clone(),
            result_schema: self.def.result_schema.clone(),
            throws: self.def.throws.clone(),
            run: self.def.run.clone(),
            _marker: PhantomData,
        }
    }
}

/// 任务构建器。
pub struct TaskBuilder<I, O> {
    id: Result<NodeId>,
    meta: Meta,
    tags: Vec<TagUsage>,
    dependencies: DependencySet,
    middleware: Vec<MiddlewareUsage>,
    input_schema: Option<SchemaRef>,
    result_schema: Option<SchemaRef>,
    throws: Option<Vec<NodeId>>,
    run: Option<TaskRun>,
    _marker: PhantomData<fn(I) -> O>,
}

impl<I, O> TaskBuilder<I, O>
where
    I: Clone + Send + Sync + 'static,
    O: Send + Sync + 'static,
{
    /// 附加一条描述性元数据。
    pub fn meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    /// 附加一个标签使用。
    pub fn tag(mut self, usage: TagUsage) -> Self {
        self.tags.push(usage);
        self
    }

    /// 声明依赖集合。
    pub fn dependencies(mut self, deps: DependencySet) -> Self {
        self.dependencies = deps;
        self
    }

    /// 追加一个中间件使用，按声明顺序生效。
    pub fn middleware(mut self, usage: MiddlewareUsage) -> Self {
        self.middleware.push(usage);
        self
    }

    /// 启用输入类型校验（按 `I` 做运行期检查）。
    pub fn validate_input(mut self) -> Self {
        self.input_schema = Some(of_type::<I>());
        self
    }

    /// 使用自定义输入 Schema。
    pub fn input_schema(mut self, schema: SchemaRef) -> Self {
        self.input_schema = Some(schema);
        self
    }

    /// 启用结果类型校验（按 `O` 做运行期检查）。
    pub fn validate_result(mut self) -> Self {
        self.result_schema = Some(of_type::<O>());
        self
    }

    /// 使用自定义结果 Schema。
    pub fn result_schema(mut self, schema: SchemaRef) -> Self {
        self.result_schema = Some(schema);
        self
    }

    /// 声明任务可能抛出的错误助手，进入 `throws` 白名单。
    pub fn may_throw<D>(mut self, helper: &ErrorHelper<D>) -> Self {
        self.throws
            .get_or_insert_with(Vec::new)
            .push(helper.id().clone());
        self
    }

    /// 提供任务实现。
    ///
    /// 不调用本方法得到幻影任务，其调用必须由隧道资源承接。
    pub fn run<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(I, ResolvedDeps) -> Fut + Send + Sync + 'static,
        Fut: core::future::Future<Output = Result<O>> + Send + 'static,
    {
        self.run = Some(Arc::new(move |input, deps| {
            let typed = match decode_input::<I>(deps.owner(), input.as_ref()) {
                Ok(v) => v,
                Err(e) => return Box::pin(std::future::ready(Err(e))),
            };
            let fut = f(typed, deps);
            Box::pin(async move { fut.await.map(dyn_value) })
        }));
        self
    }

    /// 完成构建。
    pub fn build(self) -> Result<Task<I, O>> {
        let id = self.id?;
        Ok(Task::from_def(Arc::new(TaskDef {
            id,
            meta: self.meta,
            tags: self.tags,
            dependencies: self.dependencies,
            middleware: self.middleware,
            input_schema: self.input_schema,
            result_schema: self.result_schema,
            throws: self.throws,
            run: self.run,
        })))
    }
}

impl<I, O> From<Task<I, O>> for crate::definition::Node {
    fn from(task: Task<I, O>) -> Self {
        crate::definition::Node::Task(task.def)
    }
}

impl<I, O> From<&Task<I, O>> for crate::definition::Node {
    fn from(task: &Task<I, O>) -> Self {
        crate::definition::Node::Task(Arc::clone(&task.def))
    }
}
