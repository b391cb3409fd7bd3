//! 标识符契约：约束节点 ID 的结构并统一节点种类的枚举语义。
//!
//! # 设计动机（Why）
//! - 消除“字符串即 ID”带来的隐式耦合：所有节点（任务、资源、事件等）共用一套
//!   受非空约束保护的新类型，重复注册、悬挂引用等问题可以在构建期暴露；
//! - `Arc<str>` 底座让 ID 在注册表、依赖图与事件分发之间零拷贝流转。
//!
//! # 集成方式（How）
//! - 构建器内部统一经由 [`NodeId::parse`] 校验；业务侧通常只需传入字符串字面量；
//! - [`NodeKind`] 在错误消息与注册表诊断中提供稳定的种类名称。

use core::fmt;
use std::sync::Arc;

use crate::errors::KernelError;

/// 运行时内全局唯一的节点标识。
///
/// # 契约说明（What）
/// - **输入参数**：任意可转为 `Arc<str>` 的值；裁剪后不允许为空；
/// - **前置条件**：唯一性由注册表在收集阶段裁决，本类型仅负责结构校验；
/// - **后置条件**：克隆成本为一次引用计数递增，可安全跨线程传递。
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(Arc<str>);

impl NodeId {
    /// 从原始字符串解析节点标识；空或纯空白输入返回 `boot.invalid_id`。
    pub fn parse(value: impl Into<Arc<str>>) -> Result<Self, KernelError> {
        let arc: Arc<str> = value.into();
        if arc.trim().is_empty() {
            return Err(KernelError::InvalidId {
                value: arc.to_string(),
            });
        }
        Ok(Self(arc))
    }

    /// 以 `&str` 视图读取底层数据，供日志与诊断拼接。
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 从内建的非空字面量直接构造，跳过运行期校验。
    pub(crate) fn from_static(value: &'static str) -> Self {
        debug_assert!(!value.trim().is_empty());
        Self(Arc::from(value))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AsRef<str> for NodeId {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// 节点种类，对应注册表的九个集合。
///
/// # 契约说明（What）
/// - 枚举值与注册表集合一一对应；`as_str` 返回的名称进入错误消息与日志，
///   属于稳定对外语义，修改即破坏性变更。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Task,
    Resource,
    Event,
    Hook,
    TaskMiddleware,
    ResourceMiddleware,
    Tag,
    ErrorHelper,
    AsyncContext,
}

impl NodeKind {
    /// 种类全集，便于诊断与遍历。
    pub const ALL: [NodeKind; 9] = [
        NodeKind::Task,
        NodeKind::Resource,
        NodeKind::Event,
        NodeKind::Hook,
        NodeKind::TaskMiddleware,
        NodeKind::ResourceMiddleware,
        NodeKind::Tag,
        NodeKind::ErrorHelper,
        NodeKind::AsyncContext,
    ];

    /// 返回稳定的种类名称。
    pub const fn as_str(self) -> &'static str {
        match self {
            NodeKind::Task => "task",
            NodeKind::Resource => "resource",
            NodeKind::Event => "event",
            NodeKind::Hook => "hook",
            NodeKind::TaskMiddleware => "task_middleware",
            NodeKind::ResourceMiddleware => "resource_middleware",
            NodeKind::Tag => "tag",
            NodeKind::ErrorHelper => "error_helper",
            NodeKind::AsyncContext => "async_context",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
