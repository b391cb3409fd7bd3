//! 注册树收集的契约测试套件。
//!
//! # 教案级导览
//!
//! - **Why**：注册树是组合的入口，环、重复与惰性求值的边界行为决定了
//!   启动期诊断的质量；
//! - **What**：覆盖注册链成环的拒绝、惰性注册列表的按配置展开与
//!   多事件钩子的布线。

use std::sync::Arc;

use parking_lot::Mutex;

use axon_core::prelude::*;
use axon_core::{LogOptions, Node};

fn quiet() -> RunOptions {
    RunOptions {
        logs: LogOptions {
            print_threshold: None,
            ..LogOptions::default()
        },
        ..RunOptions::default()
    }
}

/// ## 注册链成环在启动期被拒绝
///
/// - **逻辑 (How)**：`a` 挂 `b`，`b` 又挂一个与 `a` 同 ID 的资源，
///   走查在重复注册之前先命中环检测；
/// - **契约 (What)**：报 `boot.registration_cycle` 且环路含 `res.a`。
#[tokio::test]
async fn register_chain_cycle_fails_boot() {
    let a_again = Resource::<(), ()>::builder("res.a").build().unwrap();
    let b = Resource::<(), ()>::builder("res.b")
        .register([Node::from(&a_again)])
        .build()
        .unwrap();
    let a = Resource::<(), ()>::builder("res.a")
        .register([Node::from(&b)])
        .build()
        .unwrap();
    let root = Resource::<(), ()>::builder("res.root")
        .register([Node::from(&a)])
        .build()
        .unwrap();

    let err = run(&root, quiet()).await.unwrap_err();
    assert_eq!(err.code(), "boot.registration_cycle");
    assert!(err.to_string().contains("res.a"));
}

/// ## 惰性注册列表按配置展开
///
/// - **逻辑 (How)**：资源按配置决定挂多少个子任务，配置在求值前已绑定；
/// - **契约 (What)**：子任务可按 ID 调用，数量与配置一致。
#[tokio::test]
async fn lazy_register_list_expands_with_config() {
    #[derive(Clone)]
    struct ShardConfig {
        shards: u32,
    }

    let host = Resource::<ShardConfig, ()>::builder("res.shards")
        .config(ShardConfig { shards: 3 })
        .register_lazy(|config| {
            let shards = config
                .and_then(|c| c.downcast_ref::<ShardConfig>().map(|c| c.shards))
                .unwrap_or(0);
            (0..shards)
                .filter_map(|i| {
                    Task::<(), u32>::builder(format!("task.shard_{i}"))
                        .run(move |_input, _deps| async move { Ok(i) })
                        .build()
                        .ok()
                        .map(Node::from)
                })
                .collect()
        })
        .build()
        .unwrap();

    let root = Resource::<(), ()>::builder("res.root")
        .register([Node::from(&host)])
        .build()
        .unwrap();
    let runtime = run(&root, quiet()).await.unwrap();

    for i in 0..3_u32 {
        let id = axon_core::NodeId::parse(format!("task.shard_{i}")).unwrap();
        let out = runtime.run_task_dyn(&id, None, None).await.unwrap();
        assert_eq!(out.downcast_ref::<u32>().copied(), Some(i));
    }
    runtime.dispose().await.unwrap();
}

/// ## 一个钩子监听多个事件
#[tokio::test]
async fn hook_on_each_listens_to_every_target() {
    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let created = Event::<()>::builder("e.created").build().unwrap();
    let deleted = Event::<()>::builder("e.deleted").build().unwrap();

    let sink = Arc::clone(&log);
    let audit = Hook::builder("h.audit")
        .on_each([&created, &deleted])
        .run(move |emission, _deps| {
            let sink = Arc::clone(&sink);
            let seen = emission.event_id().to_string();
            async move {
                sink.lock().push(seen);
                Ok(())
            }
        })
        .build()
        .unwrap();

    let root = Resource::<(), ()>::builder("res.root")
        .register([
            Node::from(&created),
            Node::from(&deleted),
            Node::from(&audit),
        ])
        .build()
        .unwrap();
    let runtime = run(&root, quiet()).await.unwrap();
    runtime.emit(&created, ()).await.unwrap();
    runtime.emit(&deleted, ()).await.unwrap();

    assert_eq!(*log.lock(), vec!["e.created", "e.deleted"]);
    runtime.dispose().await.unwrap();
}

/// ## 资源初始化结果校验
#[tokio::test]
async fn resource_result_schema_checks_raw_init_value() {
    let suspicious = Resource::<(), u32>::builder("res.suspicious")
        .result_schema(axon_core::validator::<u32, _>(|v| {
            if *v > 0 {
                Ok(())
            } else {
                Err("初始化值必须为正".to_string())
            }
        }))
        .init(|_, _, _| async { Ok(0) })
        .build()
        .unwrap();
    let root = Resource::<(), ()>::builder("res.root")
        .register([Node::from(&suspicious)])
        .build()
        .unwrap();

    let err = run(&root, quiet()).await.unwrap_err();
    assert_eq!(err.code(), "runtime.resource_init");
    // 注解链内层是结果校验错误。
    let rendered = format!("{err:?}");
    assert!(rendered.contains("ResourceResultValidation"));
}
