//! 对象安全的 Future 包装别名。
//!
//! # 设计背景（Why）
//! - 节点的 `run`/`init`/`dispose` 等回调以 trait 对象形式存放在注册表里，
//!   返回值必须是对象安全的 Future；统一别名避免各模块重复拼写。
//!
//! # 契约说明（What）
//! - 约束 `Send + 'a`，可跨线程调度；单线程专用场景在本内核中不出现。

use core::future::Future;
use core::pin::Pin;

/// 运行时统一使用的装箱 Future。
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
