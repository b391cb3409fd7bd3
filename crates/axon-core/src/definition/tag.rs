//! 标签：类型化、可配置的元数据与契约载体。
//!
//! # 设计背景（Why）
//! - 标签把“某节点具备某种性质”表达为一等公民：排除全局监听、隧道承接、
//!   调试标注等内核行为都经由标签驱动；
//! - 配置合并走 serde 的 JSON 对象表示：默认配置与使用方配置做浅合并
//!   （对象字段逐键覆盖，标量整体替换），再还原为类型化配置。
//!
//! # 契约说明（What）
//! - `with(config)` 产出携带配置的使用；`usage()` 为裸使用；
//! - `extract` 返回宿主上第一个**携带配置**的使用合并默认值后的结果；
//!   仅有裸使用时返回 `None`；`exists` 判断任意形态的存在；
//! - 已注册宿主引用未注册标签在启动期报 `boot.tag_not_registered`。

use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::errors::{KernelError, Result};
use crate::kernel::ids::NodeId;
use crate::kernel::value::{DynValue, Meta, downcast_ref, dyn_value};

/// 标签的不可变定义。
#[derive(Clone)]
pub struct TagDef {
    pub id: NodeId,
    pub meta: Meta,
    pub(crate) default_config: Option<serde_json::Value>,
}

impl core::fmt::Debug for TagDef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TagDef")
            .field("id", &self.id)
            .field("has_default", &self.default_config.is_some())
            .finish()
    }
}

/// 一次标签使用：标签 ID 加可选的本次配置。
#[derive(Clone)]
pub struct TagUsage {
    pub id: NodeId,
    pub(crate) config: Option<DynValue>,
    pub(crate) config_json: Option<serde_json::Value>,
}

impl TagUsage {
    /// 是否携带配置。
    pub fn is_configured(&self) -> bool {
        self.config.is_some()
    }
}

impl core::fmt::Debug for TagUsage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TagUsage")
            .field("id", &self.id)
            .field("configured", &self.is_configured())
            .finish()
    }
}

/// 标签的类型化门面，`C` 为配置类型。
pub struct Tag<C = ()> {
    pub(crate) def: Arc<TagDef>,
    _marker: PhantomData<fn(C)>,
}

impl<C> Clone for Tag<C> {
    fn clone(&self) -> Self {
        Self {
            def: Arc::clone(&self.def),
            _marker: PhantomData,
        }
    }
}

impl<C> Tag<C> {
    /// 标签 ID。
    pub fn id(&self) -> &NodeId {
        &self.def.id
    }

    /// 底层定义。
    pub fn definition(&self) -> &Arc<TagDef> {
        &self.def
    }

    /// 不带配置的裸使用。
    pub fn usage(&self) -> TagUsage {
        TagUsage {
            id: self.def.id.clone(),
            config: None,
            config_json: None,
        }
    }
}

impl<C> Tag<C>
where
    C: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// 声明一个无默认配置的标签。
    pub fn new(id: impl Into<Arc<str>>) -> Result<Self> {
        Ok(Self {
            def: Arc::new(TagDef {
                id: NodeId::parse(id)?,
                meta: Meta::new(),
                default_config: None,
            }),
            _marker: PhantomData,
        })
    }

    /// 声明一个携带默认配置的标签。
    pub fn with_default(id: impl Into<Arc<str>>, default: C) -> Result<Self> {
        let default_config = serde_json::to_value(&default)
            .map_err(|e| KernelError::user_message(format!("标签默认配置序列化失败：{e}")))?;
        Ok(Self {
            def: Arc::new(TagDef {
                id: NodeId::parse(id)?,
                meta: Meta::new(),
                default_config: Some(default_config),
            }),
            _marker: PhantomData,
        })
    }

    /// 绑定配置，产出一次使用。
    pub fn with(&self, config: C) -> TagUsage {
        let config_json = serde_json::to_value(&config).ok();
        TagUsage {
            id: self.def.id.clone(),
            config: Some(dyn_value(config)),
            config_json,
        }
    }

    /// 从宿主的标签列表提取第一个携带配置的使用，合并默认值后返回。
    ///
    /// 合并失败（自定义 Serialize 实现不可逆等）时退回使用方配置整体覆盖。
    pub fn extract(&self, usages: &[TagUsage]) -> Option<C> {
        let usage = usages
            .iter()
            .find(|u| u.id == self.def.id && u.is_configured())?;
        if let Some(json) = &usage.config_json {
            let merged = shallow_merge(self.def.default_config.as_ref(), json);
            if let Ok(config) = serde_json::from_value::<C>(merged) {
                return Some(config);
            }
        }
        usage
            .config
            .as_ref()
            .and_then(|c| downcast_ref::<C>(c).cloned())
    }

    /// 宿主是否携带本标签（任意形态）。
    pub fn exists(&self, usages: &[TagUsage]) -> bool {
        usages.iter().any(|u| u.id == self.def.id)
    }
}

/// JSON 对象级浅合并：对象逐键覆盖，其余形态整体替换。
fn shallow_merge(
    default: Option<&serde_json::Value>,
    usage: &serde_json::Value,
) -> serde_json::Value {
    match (default, usage) {
        (Some(serde_json::Value::Object(d)), serde_json::Value::Object(u)) => {
            let mut merged = d.clone();
            for (key, value) in u {
                merged.insert(key.clone(), value.clone());
            }
            serde_json::Value::Object(merged)
        }
        (_, other) => other.clone(),
    }
}

impl<C> From<Tag<C>> for crate::definition::Node {
    fn from(tag: Tag<C>) -> Self {
        crate::definition::Node::Tag(tag.def)
    }
}

impl<C> From<&Tag<C>> for crate::definition::Node {
    fn from(tag: &Tag<C>) -> Self {
        crate::definition::Node::Tag(Arc::clone(&tag.def))
    }
}

/// 内建标签：内核行为的开关位。
pub mod tags {
    use super::{Tag, TagDef, TagUsage};
    use crate::definition::Node;
    use crate::kernel::ids::NodeId;
    use crate::kernel::value::Meta;
    use serde::{Deserialize, Serialize};
    use std::marker::PhantomData;
    use std::sync::Arc;

    /// 携带本标签的事件不投递给全局监听器。
    pub const EXCLUDE_FROM_GLOBAL_HOOKS: &str = "core.tags.exclude_from_global_hooks";
    /// 标记资源为隧道：其值承接幻影任务调用与事件转发。
    pub const TUNNEL: &str = "core.tags.tunnel";
    /// 任务侧隧道策略：过滤本地中间件链。
    pub const TUNNEL_POLICY: &str = "core.tags.tunnel_policy";
    /// 调试标注：提示日志层输出更详细的执行轨迹。
    pub const DEBUG: &str = "core.tags.debug";

    /// 隧道策略配置。
    ///
    /// `client` 为本地中间件 ID 白名单：`None` 不过滤，空列表跳过全部本地链。
    #[derive(Clone, Debug, Default, Serialize, Deserialize)]
    pub struct TunnelPolicyConfig {
        pub client: Option<Vec<String>>,
    }

    fn builtin<C>(id: &'static str) -> Tag<C> {
        Tag {
            def: Arc::new(TagDef {
                id: NodeId::from_static(id),
                meta: Meta::new(),
                default_config: None,
            }),
            _marker: PhantomData,
        }
    }

    /// 排除全局监听标签。
    pub fn exclude_from_global_hooks() -> Tag<()> {
        builtin(EXCLUDE_FROM_GLOBAL_HOOKS)
    }

    /// 隧道标签。
    pub fn tunnel() -> Tag<()> {
        builtin(TUNNEL)
    }

    /// 隧道策略标签。
    pub fn tunnel_policy() -> Tag<TunnelPolicyConfig> {
        builtin(TUNNEL_POLICY)
    }

    /// 调试标签。
    pub fn debug() -> Tag<()> {
        builtin(DEBUG)
    }

    /// 内建标签的注册清单，启动期由注册表播种。
    pub fn builtin_nodes() -> Vec<Node> {
        vec![
            Node::Tag(Arc::clone(exclude_from_global_hooks().definition())),
            Node::Tag(Arc::clone(tunnel().definition())),
            Node::Tag(Arc::clone(tunnel_policy().definition())),
            Node::Tag(Arc::clone(debug().definition())),
        ]
    }

    /// 判断标签列表是否携带排除全局监听标记。
    pub(crate) fn excludes_global_hooks(usages: &[TagUsage]) -> bool {
        usages
            .iter()
            .any(|u| u.id.as_str() == EXCLUDE_FROM_GLOBAL_HOOKS)
    }

    /// 判断标签列表是否携带隧道标记。
    pub(crate) fn is_tunnel(usages: &[TagUsage]) -> bool {
        usages.iter().any(|u| u.id.as_str() == TUNNEL)
    }
}
