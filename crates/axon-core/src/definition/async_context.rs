//! 异步上下文：作用域环境值的声明与访问门面。
//!
//! # 设计背景（Why）
//! - 请求标识、租户信息这类环境值不适合在每层签名里显式穿参；`provide`
//!   把值安装进动态作用域，作用域内任意深度的 `current` 都能读到；
//! - 跨进程传播（隧道）需要字符串表示，上下文可携带自定义编解码，
//!   默认走 serde JSON。
//!
//! # 契约说明（What）
//! - `provide(value, fut)` 的作用域随 `fut` 的完成（含出错）结束，外层值自动恢复；
//! - 作用域外 `current` 报 `context.unavailable`；
//! - 非可选的上下文依赖若未注册，在启动期失败。

use std::any::type_name;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::errors::{KernelError, Result};
use crate::kernel::ids::NodeId;
use crate::kernel::value::{DynValue, Meta, downcast_ref, dyn_value};

pub(crate) type SerializeFn = Arc<dyn Fn(&DynValue) -> Result<String> + Send + Sync>;
pub(crate) type ParseFn = Arc<dyn Fn(&str) -> Result<DynValue> + Send + Sync>;

/// 异步上下文的不可变定义。
#[derive(Clone)]
pub struct AsyncContextDef {
    pub id: NodeId,
    pub meta: Meta,
    pub(crate) serialize: Option<SerializeFn>,
    pub(crate) parse: Option<ParseFn>,
}

impl core::fmt::Debug for AsyncContextDef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AsyncContextDef")
            .field("id", &self.id)
            .field("codec", &self.serialize.is_some())
            .finish()
    }
}

/// 异步上下文的类型化门面，`T` 为上下文值类型。
pub struct AsyncContext<T> {
    pub(crate) def: Arc<AsyncContextDef>,
    _marker: PhantomData<fn(T)>,
}

impl<T> Clone for AsyncContext<T> {
    fn clone(&self) -> Self {
        Self {
            def: Arc::clone(&self.def),
            _marker: PhantomData,
        }
    }
}

impl<T> AsyncContext<T> {
    /// 上下文 ID。
    pub fn id(&self) -> &NodeId {
        &self.def.id
    }

    /// 底层定义。
    pub fn definition(&self) -> &Arc<AsyncContextDef> {
        &self.def
    }
}

impl<T> AsyncContext<T>
where
    T: Send + Sync + 'static,
{
    /// 声明一个不带编解码的上下文。
    pub fn new(id: impl Into<Arc<str>>) -> Result<Self> {
        Ok(Self {
            def: Arc::new(AsyncContextDef {
                id: NodeId::parse(id)?,
                meta: Meta::new(),
                serialize: None,
                parse: None,
            }),
            _marker: PhantomData,
        })
    }

    /// 在 `fut` 的动态作用域内安装值；作用域结束（含出错）后外层值恢复。
    pub async fn provide<F>(&self, value: T, fut: F) -> F::Output
    where
        F: core::future::Future,
    {
        crate::ambient::provide_context(self.def.id.clone(), dyn_value(value), fut).await
    }

    /// 读取当前作用域内的值；作用域外报 `context.unavailable`。
    pub fn current(&self) -> Result<Arc<T>> {
        let value = crate::ambient::context_value(&self.def.id)?;
        value
            .downcast::<T>()
            .map_err(|_| KernelError::ContextSerialization {
                context: self.def.id.clone(),
                detail: format!("上下文值无法转换为 {}", type_name::<T>()),
            })
    }

    /// 用声明的编解码序列化一个值，供跨边界传播。
    pub fn serialize(&self, value: &T) -> Result<String>
    where
        T: Clone,
    {
        let serializer =
            self.def
                .serialize
                .as_ref()
                .ok_or_else(|| KernelError::ContextSerialization {
                    context: self.def.id.clone(),
                    detail: "未声明编解码".to_string(),
                })?;
        let erased = dyn_value(value.clone());
        serializer(&erased)
    }

    /// 用声明的编解码还原一个值。
    pub fn parse(&self, raw: &str) -> Result<T>
    where
        T: Clone,
    {
        let parser = self
            .def
            .parse
            .as_ref()
            .ok_or_else(|| KernelError::ContextSerialization {
                context: self.def.id.clone(),
                detail: "未声明编解码".to_string(),
            })?;
        let erased = parser(raw)?;
        downcast_ref::<T>(&erased)
            .cloned()
            .ok_or_else(|| KernelError::ContextSerialization {
                context: self.def.id.clone(),
                detail: format!("还原结果无法转换为 {}", type_name::<T>()),
            })
    }
}

impl<T> AsyncContext<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// 声明一个携带默认 JSON 编解码的上下文。
    pub fn serde(id: impl Into<Arc<str>>) -> Result<Self> {
        let node_id = NodeId::parse(id)?;
        let ser_id = node_id.clone();
        let parse_id = node_id.clone();
        let serialize: SerializeFn = Arc::new(move |value| {
            let typed = downcast_ref::<T>(value).ok_or_else(|| KernelError::ContextSerialization {
                context: ser_id.clone(),
                detail: format!("待序列化值不是 {}", type_name::<T>()),
            })?;
            serde_json::to_string(typed).map_err(|e| KernelError::ContextSerialization {
                context: ser_id.clone(),
                detail: e.to_string(),
            })
        });
        let parse: ParseFn = Arc::new(move |raw| {
            serde_json::from_str::<T>(raw)
                .map(dyn_value)
                .map_err(|e| KernelError::ContextSerialization {
                    context: parse_id.clone(),
                    detail: e.to_string(),
                })
        });
        Ok(Self {
            def: Arc::new(AsyncContextDef {
                id: node_id,
                meta: Meta::new(),
                serialize: Some(serialize),
                parse: Some(parse),
            }),
            _marker: PhantomData,
        })
    }
}

impl<T> From<AsyncContext<T>> for crate::definition::Node {
    fn from(context: AsyncContext<T>) -> Self {
        crate::definition::Node::AsyncContext(context.def)
    }
}

impl<T> From<&AsyncContext<T>> for crate::definition::Node {
    fn from(context: &AsyncContext<T>) -> Self {
        crate::definition::Node::AsyncContext(Arc::clone(&context.def))
    }
}
