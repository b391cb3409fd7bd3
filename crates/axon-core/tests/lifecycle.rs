//! 资源生命周期契约测试套件。
//!
//! # 教案级导览
//!
//! - **Why**：初始化次序、恰好一次语义、逆序释放与失败回卷是组合运行时的
//!   地基；本文件用最小可复现场景逐条固定这些不变量；
//! - **How**：每个测试构造一棵小注册树，经公开 `run` 入口启动，用共享的
//!   记录缓冲断言次序与次数；
//! - **What**：覆盖拓扑取值、重复初始化拒绝、逆序释放、失败回卷、并行
//!   初始化、覆盖补丁与分叉隔离。

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

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

/// ## 拓扑取值
///
/// - **意图 (Why)**：依赖值必须在依赖方初始化前就绪；
/// - **逻辑 (How)**：`a = 1`，`b = a + 1`，根 `= b + 1`；
/// - **契约 (What)**：根值恰为 3，任何次序偏差都会改变结果。
#[tokio::test]
async fn resources_initialize_in_topological_order() {
    let a = Resource::<(), i32>::builder("res.a")
        .init(|_, _, _| async { Ok(1) })
        .build()
        .unwrap();
    let b_deps = DependencySet::new().resource("a", &a);
    let b = Resource::<(), i32>::builder("res.b")
        .dependencies(b_deps)
        .init(|_, deps, _| async move {
            let a = deps.resource::<i32>("a")?;
            Ok(*a + 1)
        })
        .build()
        .unwrap();
    let root = Resource::<(), i32>::builder("res.root")
        .register([Node::from(&a), Node::from(&b)])
        .dependencies(DependencySet::new().resource("b", &b))
        .init(|_, deps, _| async move {
            let b = deps.resource::<i32>("b")?;
            Ok(*b + 1)
        })
        .build()
        .unwrap();

    let runtime = run(&root, quiet()).await.expect("启动应成功");
    assert_eq!(*runtime.value::<i32>().unwrap(), 3);
    runtime.dispose().await.unwrap();
}

/// ## 恰好一次初始化与逆序释放
///
/// - **意图 (Why)**：资源值不可变意味着 `init` 只能跑一次；释放必须与
///   初始化严格互逆，否则依赖方会访问到已释放的值；
/// - **逻辑 (How)**：两个资源把初始化与释放动作写入共享缓冲；
/// - **契约 (What)**：缓冲内容为 `init:a, init:b, dispose:b, dispose:a`。
#[tokio::test]
async fn dispose_walks_reverse_init_order() {
    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let log_a = Arc::clone(&log);
    let drop_a = Arc::clone(&log);
    let a = Resource::<(), ()>::builder("res.a")
        .init(move |_, _, _| {
            let log = Arc::clone(&log_a);
            async move {
                log.lock().push("init:a".to_string());
                Ok(())
            }
        })
        .dispose(move |_| {
            let log = Arc::clone(&drop_a);
            async move {
                log.lock().push("dispose:a".to_string());
                Ok(())
            }
        })
        .build()
        .unwrap();

    let log_b = Arc::clone(&log);
    let drop_b = Arc::clone(&log);
    let b = Resource::<(), ()>::builder("res.b")
        .dependencies(DependencySet::new().resource("a", &a))
        .init(move |_, _, _| {
            let log = Arc::clone(&log_b);
            async move {
                log.lock().push("init:b".to_string());
                Ok(())
            }
        })
        .dispose(move |_| {
            let log = Arc::clone(&drop_b);
            async move {
                log.lock().push("dispose:b".to_string());
                Ok(())
            }
        })
        .build()
        .unwrap();

    let root = Resource::<(), ()>::builder("res.root")
        .register([Node::from(&a), Node::from(&b)])
        .build()
        .unwrap();

    let runtime = run(&root, quiet()).await.unwrap();
    runtime.dispose().await.unwrap();
    // 重复释放为无操作。
    runtime.dispose().await.unwrap();

    assert_eq!(
        *log.lock(),
        vec!["init:a", "init:b", "dispose:b", "dispose:a"]
    );
}

/// ## 初始化失败回卷
///
/// - **意图 (Why)**：失败不得留下半初始化状态；已就绪资源按逆序释放，
///   错误带上失败资源的 ID 注解；
/// - **逻辑 (How)**：`ok` 成功后 `broken` 失败，断言 `ok` 的释放已执行；
/// - **契约 (What)**：错误码为 `runtime.resource_init` 且指向 `res.broken`。
#[tokio::test]
async fn init_failure_unwinds_initialized_resources() {
    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let drop_ok = Arc::clone(&log);
    let ok = Resource::<(), ()>::builder("res.ok")
        .init(|_, _, _| async { Ok(()) })
        .dispose(move |_| {
            let log = Arc::clone(&drop_ok);
            async move {
                log.lock().push("dispose:ok".to_string());
                Ok(())
            }
        })
        .build()
        .unwrap();

    let broken = Resource::<(), ()>::builder("res.broken")
        .dependencies(DependencySet::new().resource("ok", &ok))
        .init(|_, _, _| async { Err(KernelError::user_message("数据库握手失败")) })
        .build()
        .unwrap();

    let root = Resource::<(), ()>::builder("res.root")
        .register([Node::from(&ok), Node::from(&broken)])
        .build()
        .unwrap();

    let err = run(&root, quiet()).await.unwrap_err();
    assert_eq!(err.code(), "runtime.resource_init");
    assert!(err.to_string().contains("res.broken"));
    assert_eq!(*log.lock(), vec!["dispose:ok"]);
}

/// ## 并行初始化
///
/// - **意图 (Why)**：并行模式只在前置就绪时调度，结果必须与顺序模式一致；
/// - **逻辑 (How)**：两个独立资源加一个汇聚资源，用计数器核对 `init` 次数；
/// - **契约 (What)**：根值等于两个前置之和，每个 `init` 恰好一次。
#[tokio::test]
async fn parallel_init_respects_prerequisites() {
    let calls = Arc::new(AtomicU32::new(0));

    let calls_l = Arc::clone(&calls);
    let left = Resource::<(), i32>::builder("res.left")
        .init(move |_, _, _| {
            let calls = Arc::clone(&calls_l);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(10)
            }
        })
        .build()
        .unwrap();
    let calls_r = Arc::clone(&calls);
    let right = Resource::<(), i32>::builder("res.right")
        .init(move |_, _, _| {
            let calls = Arc::clone(&calls_r);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(32)
            }
        })
        .build()
        .unwrap();
    let root = Resource::<(), i32>::builder("res.root")
        .register([Node::from(&left), Node::from(&right)])
        .dependencies(
            DependencySet::new()
                .resource("left", &left)
                .resource("right", &right),
        )
        .init(|_, deps, _| async move {
            let left = deps.resource::<i32>("left")?;
            let right = deps.resource::<i32>("right")?;
            Ok(*left + *right)
        })
        .build()
        .unwrap();

    let options = RunOptions {
        init_mode: InitMode::Parallel,
        ..quiet()
    };
    let runtime = run(&root, options).await.unwrap();
    assert_eq!(*runtime.value::<i32>().unwrap(), 42);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    runtime.dispose().await.unwrap();
}

/// ## 覆盖补丁先于注册生效
///
/// - **意图 (Why)**：消费方必须看到补丁后的定义，而不是先注册原定义再换；
/// - **逻辑 (How)**：根在 `overrides` 里挂入 `base` 的 `redefine` 补丁，
///   补丁把值从 1 改为 7；`None` 条目应被忽略；
/// - **契约 (What)**：读取 `base` 资源值得到 7。
#[tokio::test]
async fn overrides_apply_before_registration() {
    let base = Resource::<(), i32>::builder("res.base")
        .init(|_, _, _| async { Ok(1) })
        .build()
        .unwrap();
    let patched = base
        .redefine()
        .init(|_, _, _| async { Ok(7) })
        .build()
        .unwrap();

    let root = Resource::<(), ()>::builder("res.root")
        .register([Node::from(&base)])
        .overrides([Some(Node::from(&patched)), None])
        .build()
        .unwrap();

    let runtime = run(&root, quiet()).await.unwrap();
    assert_eq!(*runtime.resource_value(&base).unwrap(), 7);
    runtime.dispose().await.unwrap();
}

/// ## 分叉隔离
///
/// - **意图 (Why)**：分叉副本各自携带配置与生命周期，互不串值；
/// - **逻辑 (How)**：`base` 按配置产出值；分叉出 `a`/`b` 各绑不同配置；
/// - **契约 (What)**：两个副本的值分别为各自配置，`init` 恰好两次。
#[tokio::test]
async fn forks_are_isolated_instances() {
    #[derive(Clone)]
    struct NameConfig {
        name: String,
    }
    #[derive(Clone)]
    struct Named {
        v: String,
    }

    let calls = Arc::new(AtomicU32::new(0));
    let calls_in = Arc::clone(&calls);
    let base = Resource::<NameConfig, Named>::builder("res.base")
        .init(move |config, _, _| {
            let calls = Arc::clone(&calls_in);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Named { v: config.name })
            }
        })
        .build()
        .unwrap();

    let f1 = base
        .fork("res.fork_a", ForkRegister::Shallow)
        .unwrap()
        .with(NameConfig {
            name: "x".to_string(),
        });
    let f2 = base
        .fork("res.fork_b", ForkRegister::Shallow)
        .unwrap()
        .with(NameConfig {
            name: "y".to_string(),
        });

    let root = Resource::<(), ()>::builder("res.root")
        .register([Node::from(&f1), Node::from(&f2)])
        .build()
        .unwrap();

    let runtime = run(&root, quiet()).await.unwrap();
    assert_eq!(runtime.resource_value(&f1).unwrap().v, "x");
    assert_eq!(runtime.resource_value(&f2).unwrap().v, "y");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    runtime.dispose().await.unwrap();
}

/// ## 释放错误聚合
///
/// - **意图 (Why)**：单个 `dispose` 出错不得中断其余资源的释放；
/// - **逻辑 (How)**：两个资源的 `dispose` 都失败，一个正常资源夹在中间；
/// - **契约 (What)**：返回 `runtime.dispose_aggregate`，其中错误恰为两个，
///   正常资源照常释放。
#[tokio::test]
async fn dispose_collects_errors_without_stopping() {
    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let bad1 = Resource::<(), ()>::builder("res.bad1")
        .init(|_, _, _| async { Ok(()) })
        .dispose(|_| async { Err(KernelError::user_message("句柄已失效")) })
        .build()
        .unwrap();
    let drop_mid = Arc::clone(&log);
    let mid = Resource::<(), ()>::builder("res.mid")
        .init(|_, _, _| async { Ok(()) })
        .dispose(move |_| {
            let log = Arc::clone(&drop_mid);
            async move {
                log.lock().push("dispose:mid".to_string());
                Ok(())
            }
        })
        .build()
        .unwrap();
    let bad2 = Resource::<(), ()>::builder("res.bad2")
        .init(|_, _, _| async { Ok(()) })
        .dispose(|_| async { Err(KernelError::user_message("刷盘失败")) })
        .build()
        .unwrap();

    let root = Resource::<(), ()>::builder("res.root")
        .register([Node::from(&bad1), Node::from(&mid), Node::from(&bad2)])
        .build()
        .unwrap();

    let runtime = run(&root, quiet()).await.unwrap();
    let err = runtime.dispose().await.unwrap_err();
    assert_eq!(err.code(), "runtime.dispose_aggregate");
    match err {
        KernelError::DisposeAggregate { errors } => assert_eq!(errors.len(), 2),
        other => panic!("期望聚合错误，得到 {other:?}"),
    }
    assert_eq!(*log.lock(), vec!["dispose:mid"]);
}
