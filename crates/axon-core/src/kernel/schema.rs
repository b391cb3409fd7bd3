//! 运行期尽力校验的 Schema 契约。
//!
//! # 设计背景（Why）
//! - 任务输入输出与事件载荷以类型擦除形式流转，静态类型只能约束到构建器边界；
//!   Schema 在调用期补上最后一道检查：类型匹配 + 可选的业务谓词；
//! - 校验失败统一折叠为 [`SchemaViolation`]，由管线包装为带节点 ID 的验证错误。
//!
//! # 契约说明（What）
//! - `check` 不得修改载荷，也不得阻塞；
//! - 违例消息面向排障人员，不应包含敏感数据。

use core::fmt;
use core::marker::PhantomData;
use std::any::type_name;
use std::sync::Arc;

use crate::kernel::value::DynValue;

/// Schema 校验违例，携带人类可读的原因描述。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchemaViolation {
    message: String,
}

impl SchemaViolation {
    /// 用给定原因构造违例。
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// 违例原因。
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// 载荷校验契约。
///
/// # 契约说明（What）
/// - **输入参数**：待校验的类型擦除载荷；`None` 表示调用方未提供载荷；
/// - **后置条件**：`Ok(())` 表示载荷可被下游安全下转换并满足业务谓词；
/// - **实现约束**：实现必须无副作用，可被任意次重复调用。
pub trait Schema: Send + Sync {
    /// 校验载荷；违例时返回原因。
    fn check(&self, value: Option<&DynValue>) -> Result<(), SchemaViolation>;

    /// 供诊断输出使用的期望描述。
    fn describe(&self) -> String;
}

/// 共享的 Schema 引用。
pub type SchemaRef = Arc<dyn Schema>;

/// 仅校验类型匹配的 Schema。
struct TypeSchema<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> Schema for TypeSchema<T> {
    fn check(&self, value: Option<&DynValue>) -> Result<(), SchemaViolation> {
        match value {
            Some(v) if v.downcast_ref::<T>().is_some() => Ok(()),
            Some(_) => Err(SchemaViolation::new(format!(
                "载荷类型不匹配，期望 {}",
                type_name::<T>()
            ))),
            None => Err(SchemaViolation::new(format!(
                "缺少载荷，期望 {}",
                type_name::<T>()
            ))),
        }
    }

    fn describe(&self) -> String {
        type_name::<T>().to_string()
    }
}

/// 在类型匹配之上叠加业务谓词的 Schema。
struct PredicateSchema<T, F> {
    predicate: F,
    _marker: PhantomData<fn() -> T>,
}

impl<T, F> Schema for PredicateSchema<T, F>
where
    T: Send + Sync + 'static,
    F: Fn(&T) -> Result<(), String> + Send + Sync,
{
    fn check(&self, value: Option<&DynValue>) -> Result<(), SchemaViolation> {
        let v = value.ok_or_else(|| {
            SchemaViolation::new(format!("缺少载荷，期望 {}", type_name::<T>()))
        })?;
        let typed = v.downcast_ref::<T>().ok_or_else(|| {
            SchemaViolation::new(format!("载荷类型不匹配，期望 {}", type_name::<T>()))
        })?;
        (self.predicate)(typed).map_err(SchemaViolation::new)
    }

    fn describe(&self) -> String {
        format!("{} + 谓词校验", type_name::<T>())
    }
}

/// 构造只检查类型匹配的 Schema。
pub fn of_type<T: Send + Sync + 'static>() -> SchemaRef {
    Arc::new(TypeSchema::<T> {
        _marker: PhantomData,
    })
}

/// 构造“类型匹配 + 谓词”的 Schema；谓词返回 `Err` 时其内容作为违例原因。
pub fn validator<T, F>(predicate: F) -> SchemaRef
where
    T: Send + Sync + 'static,
    F: Fn(&T) -> Result<(), String> + Send + Sync + 'static,
{
    Arc::new(PredicateSchema::<T, F> {
        predicate,
        _marker: PhantomData,
    })
}
