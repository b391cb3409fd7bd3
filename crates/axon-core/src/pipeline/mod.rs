//! 任务执行管线：输入校验 → 中间件链 → 用户代码 → 结果校验。
//!
//! # 契约说明（What）
//! - 每次调用新建一份 [`journal::ExecutionJournal`] 并贯穿整条链；
//! - 输入 Schema 在进链前校验（幻影任务跳过——其输入由远端裁决）；
//!   结果 Schema 由链终点对原始返回值校验；
//! - `dep_overrides` 仅替换本次调用可见的依赖，不触碰缓存链。

pub mod journal;

use std::sync::Arc;

use crate::definition::task::TaskDef;
use crate::errors::{KernelError, Result};
use crate::injection::DepOverrides;
use crate::kernel::future::BoxFuture;
use crate::kernel::value::DynValue;
use crate::runtime::RuntimeInner;

use journal::ExecutionJournal;

/// 调用一个任务。
///
/// 返回装箱 Future 以切断“任务调用任务”的递归类型展开。
pub(crate) fn invoke_task(
    inner: Arc<RuntimeInner>,
    task: Arc<TaskDef>,
    input: Option<DynValue>,
    overrides: Option<DepOverrides>,
) -> BoxFuture<'static, Result<DynValue>> {
    Box::pin(async move {
        if inner.is_disposed() {
            return Err(KernelError::RuntimeDisposed {
                operation: "调用任务",
            });
        }
        if !task.is_phantom() {
            if let Some(schema) = &task.input_schema {
                schema
                    .check(input.as_ref())
                    .map_err(|violation| KernelError::TaskInputValidation {
                        task: task.id.clone(),
                        violation,
                    })?;
            }
        }
        let chain = match &overrides {
            Some(overrides) if !overrides.is_empty() => {
                crate::chain::build_task_chain(&inner, &task, Some(overrides))?
            }
            _ => crate::chain::chain_for(&inner, &task)?,
        };
        let journal = ExecutionJournal::new();
        chain(input, journal).await
    })
}
