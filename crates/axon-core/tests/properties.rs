//! 性质测试：对合并与标识契约做随机化检验。
//!
//! # 教案级导览
//!
//! - **Why**：标签配置的浅合并与标识校验是纯函数契约，适合用随机输入
//!   穷尽人工用例想不到的组合；
//! - **What**：固定两条律——合并结果等于“默认在底、使用方在上”的逐键
//!   覆盖；非空裁剪后的字符串恒可作为标识。

use std::collections::BTreeMap;

use proptest::prelude::*;

use axon_core::{NodeId, Tag};

proptest! {
    /// 合并律：`extract(with(u))` 等于默认配置被 `u` 逐键覆盖。
    #[test]
    fn tag_merge_is_usage_over_default(
        default in proptest::collection::btree_map("[a-z]{1,6}", 0i64..1000, 0..6),
        usage in proptest::collection::btree_map("[a-z]{1,6}", 0i64..1000, 0..6),
    ) {
        let tag = Tag::<BTreeMap<String, i64>>::with_default("tag.prop", default.clone())
            .expect("字面量标签恒可构造");
        let merged = tag
            .extract(&[tag.with(usage.clone())])
            .expect("配置使用应可提取");

        let mut expected = default;
        for (key, value) in usage {
            expected.insert(key, value);
        }
        prop_assert_eq!(merged, expected);
    }

    /// 标识律：含非空白字符的输入恒可解析，且原文保留。
    #[test]
    fn node_id_accepts_non_blank(raw in "[a-zA-Z0-9._-]{1,24}") {
        let id = NodeId::parse(raw.clone()).expect("非空标识应可解析");
        prop_assert_eq!(id.as_str(), raw.as_str());
    }

    /// 标识律：纯空白输入恒被拒绝。
    #[test]
    fn node_id_rejects_blank(blanks in " {0,8}") {
        prop_assert!(NodeId::parse(blanks).is_err());
    }
}
