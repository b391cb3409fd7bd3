//! 错误助手：可抛出的类型化错误身份。
//!
//! # 契约说明（What）
//! - 助手以 `raise(data)` 产出品牌化错误：`{id, data, message, remediation?, http_code?}`；
//!   消息由 `format` 回调在抛出时渲染；
//! - `http_code` 在构建期校验落在 `100..=599`，越界报 `boot.invalid_http_code`；
//! - `matches` 按 ID 精确识别本助手抛出的错误；跨助手的整体识别用
//!   [`crate::errors::KernelError::is_branded`]。

use std::any::type_name;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::errors::{BrandedError, KernelError, Result};
use crate::kernel::ids::NodeId;
use crate::kernel::value::{DynValue, Meta, downcast_ref, dyn_value};

pub(crate) type FormatFn = Arc<dyn Fn(&DynValue) -> String + Send + Sync>;

/// 错误助手的不可变定义。
#[derive(Clone)]
pub struct ErrorHelperDef {
    pub id: NodeId,
    pub meta: Meta,
    pub remediation: Option<String>,
    pub http_code: Option<u16>,
    pub(crate) format: FormatFn,
}

impl ErrorHelperDef {
    /// 以类型擦除数据构造品牌化错误。
    pub(crate) fn raise_dyn(&self, data: DynValue) -> KernelError {
        let message = (self.format)(&data);
        KernelError::Branded(BrandedError {
            id: self.id.clone(),
            data,
            message,
            remediation: self.remediation.clone(),
            http_code: self.http_code,
        })
    }
}

impl core::fmt::Debug for ErrorHelperDef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ErrorHelperDef")
            .field("id", &self.id)
            .field("http_code", &self.http_code)
            .finish_non_exhaustive()
    }
}

/// 错误助手的类型化门面，`D` 为错误数据类型。
pub struct ErrorHelper<D = ()> {
    pub(crate) def: Arc<ErrorHelperDef>,
    _marker: PhantomData<fn(D)>,
}

impl<D> Clone for ErrorHelper<D> {
    fn clone(&self) -> Self {
        Self {
            def: Arc::clone(&self.def),
            _marker: PhantomData,
        }
    }
}

impl<D> ErrorHelper<D> {
    /// 助手 ID。
    pub fn id(&self) -> &NodeId {
        &self.def.id
    }

    /// 底层定义。
    pub fn definition(&self) -> &Arc<ErrorHelperDef> {
        &self.def
    }

    /// 判断给定错误是否出自本助手。
    pub fn matches(&self, err: &KernelError) -> bool {
        err.branded().is_some_and(|b| b.id == self.def.id)
    }
}

impl<D> ErrorHelper<D>
where
    D: Send + Sync + 'static,
{
    /// 开始构建一个错误助手。
    pub fn builder(id: impl Into<Arc<str>>) -> ErrorHelperBuilder<D> {
        ErrorHelperBuilder {
            id: NodeId::parse(id),
            meta: Meta::new(),
            remediation: None,
            http_code: None,
            format: None,
            _marker: PhantomData,
        }
    }

    /// 以类型化数据抛出品牌化错误。
    pub fn raise(&self, data: D) -> KernelError {
        self.def.raise_dyn(dyn_value(data))
    }

    /// 若错误出自本助手，取回类型化数据。
    pub fn data_of(&self, err: &KernelError) -> Option<D>
    where
        D: Clone,
    {
        err.branded()
            .filter(|b| b.id == self.def.id)
            .and_then(|b| downcast_ref::<D>(&b.data).cloned())
    }
}

/// 错误助手构建器。
pub struct ErrorHelperBuilder<D> {
    id: Result<NodeId>,
    meta: Meta,
    remediation: Option<String>,
    http_code: Option<i64>,
    format: Option<FormatFn>,
    _marker: PhantomData<fn(D)>,
}

impl<D> ErrorHelperBuilder<D>
where
    D: Send + Sync + 'static,
{
    /// 附加一条描述性元数据。
    pub fn meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    /// 设置消息渲染回调。
    pub fn format<F>(mut self, f: F) -> Self
    where
        F: Fn(&D) -> String + Send + Sync + 'static,
    {
        self.format = Some(Arc::new(move |data| match downcast_ref::<D>(data) {
            Some(typed) => f(typed),
            None => format!("错误数据无法转换为 {}", type_name::<D>()),
        }));
        self
    }

    /// 设置补救提示。
    pub fn remediation(mut self, hint: impl Into<String>) -> Self {
        self.remediation = Some(hint.into());
        self
    }

    /// 设置 HTTP 状态码，构建期校验 `100..=599`。
    pub fn http_code(mut self, code: i64) -> Self {
        self.http_code = Some(code);
        self
    }

    /// 完成构建。
    pub fn build(self) -> Result<ErrorHelper<D>> {
        let id = self.id?;
        let http_code = match self.http_code {
            Some(code) if (100..=599).contains(&code) => Some(code as u16),
            Some(code) => {
                return Err(KernelError::InvalidHttpCode { id, code });
            }
            None => None,
        };
        let format = self
            .format
            .unwrap_or_else(|| Arc::new(|_| "未提供错误描述".to_string()));
        Ok(ErrorHelper {
            def: Arc::new(ErrorHelperDef {
                id,
                meta: self.meta,
                remediation: self.remediation,
                http_code,
                format,
            }),
            _marker: PhantomData,
        })
    }
}

impl<D> From<ErrorHelper<D>> for crate::definition::Node {
    fn from(helper: ErrorHelper<D>) -> Self {
        crate::definition::Node::ErrorHelper(helper.def)
    }
}

impl<D> From<&ErrorHelper<D>> for crate::definition::Node {
    fn from(helper: &ErrorHelper<D>) -> Self {
        crate::definition::Node::ErrorHelper(Arc::clone(&helper.def))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_code_range_is_enforced() {
        let out = ErrorHelper::<()>::builder("err.bad_code")
            .format(|_| "x".to_string())
            .http_code(42)
            .build();
        assert!(matches!(
            out,
            Err(KernelError::InvalidHttpCode { code: 42, .. })
        ));
    }

    #[test]
    fn raise_formats_message_and_brands() {
        #[derive(Clone)]
        struct NotFound {
            key: String,
        }
        let helper = ErrorHelper::<NotFound>::builder("err.not_found")
            .format(|d| format!("key `{}` 不存在", d.key))
            .http_code(404)
            .build()
            .expect("构建应成功");
        let err = helper.raise(NotFound {
            key: "user:1".to_string(),
        });
        assert!(helper.matches(&err));
        assert!(err.is_branded());
        let branded = err.branded().expect("应为品牌化错误");
        assert_eq!(branded.http_code, Some(404));
        assert_eq!(branded.message, "key `user:1` 不存在");
        assert_eq!(helper.data_of(&err).expect("应取回数据").key, "user:1");
    }
}
