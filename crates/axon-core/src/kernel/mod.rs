//! 内核命名空间：承载运行时最底层的共享契约。
//!
//! # 模块定位（Why）
//! - **统一契约入口**：标识符、类型擦除值、运行期校验与取消原语在各子系统间高频共享，
//!   集中在 `kernel` 下避免交叉依赖；
//! - **最小可用内核**：`definition`、`store`、`events` 等上层模块只经由这里的抽象互通，
//!   保证各组件可以独立演进。
//!
//! # 结构概览（What）
//! - [`ids`]：节点标识符与节点种类枚举；
//! - [`value`]：类型擦除的载荷通货 [`DynValue`] 与元数据容器；
//! - [`schema`]：运行期尽力校验的 Schema 契约；
//! - [`future`]：对象安全的 Future 包装别名；
//! - [`cancellation`]：一次性取消令牌与子令牌派生。

pub mod cancellation;
pub mod future;
pub mod ids;
pub mod schema;
pub mod value;

pub use cancellation::Cancellation;
pub use future::BoxFuture;
pub use ids::{NodeId, NodeKind};
pub use schema::{Schema, SchemaRef, SchemaViolation};
pub use value::{DynValue, Meta, downcast_arc, downcast_ref, dyn_value};
