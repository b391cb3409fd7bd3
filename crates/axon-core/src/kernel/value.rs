//! 类型擦除的载荷通货：任务输入输出、资源值、事件载荷与日志条目的统一表达。
//!
//! # 设计背景（Why）
//! - 运行时以声明式节点组合应用，节点之间的载荷类型在注册表层面不可静态获知；
//!   统一用 `Arc<dyn Any + Send + Sync>` 承载，由类型化门面在边界处下转换；
//! - `Arc` 语义使载荷可以在中间件链、事件监听器与依赖注入之间零拷贝共享。
//!
//! # 契约说明（What）
//! - 下转换失败属于调用方契约违例，相关访问器返回带有期望类型名的内核错误；
//! - 存入的值必须满足 `Send + Sync + 'static`，跨任务传递不产生额外约束。

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

/// 统一的类型擦除载荷。
pub type DynValue = Arc<dyn Any + Send + Sync>;

/// 自由格式的描述性元数据，键值均为字符串。
///
/// 有序映射保证日志与诊断输出的确定性。
pub type Meta = BTreeMap<String, String>;

/// 将任意值装入 [`DynValue`]。
pub fn dyn_value<T: Send + Sync + 'static>(value: T) -> DynValue {
    Arc::new(value)
}

/// 以引用方式尝试读取 [`DynValue`] 中的具体类型。
pub fn downcast_ref<T: 'static>(value: &DynValue) -> Option<&T> {
    value.downcast_ref::<T>()
}

/// 尝试把 [`DynValue`] 下转换为 `Arc<T>`，失败时原样返还。
///
/// # 契约说明（What）
/// - 成功路径不发生克隆，仅转移引用计数；
/// - 失败路径返还原 `Arc`，调用方可继续用于诊断（如读取 `type_id`）。
pub fn downcast_arc<T: Send + Sync + 'static>(value: DynValue) -> Result<Arc<T>, DynValue> {
    value.downcast::<T>()
}
