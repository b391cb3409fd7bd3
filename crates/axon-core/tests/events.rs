//! 事件投递契约测试套件。
//!
//! # 教案级导览
//!
//! - **Why**：投递次序、并行分组屏障、自抑制与重发环检测是事件面的全部
//!   公开承诺，任何回归都会直接改变业务可见行为；
//! - **How**：用共享缓冲记录监听器的启动与完成序列，经公开 `run`/`emit`
//!   入口驱动；并行屏障用双参与者栅栏证明组内确实并发；
//! - **What**：覆盖顺序投递、并行分组、换源重发、同源环拦截、全局监听
//!   排除、传播终止与投递报告。

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Barrier;

use axon_core::prelude::*;
use axon_core::{EmitOptions, FailureMode, LogOptions, Node};

fn quiet() -> RunOptions {
    RunOptions {
        logs: LogOptions {
            print_threshold: None,
            ..LogOptions::default()
        },
        ..RunOptions::default()
    }
}

fn recording_hook(
    id: &str,
    event: &Event<()>,
    order: i32,
    log: &Arc<Mutex<Vec<String>>>,
    entry: &str,
) -> Hook {
    let sink = Arc::clone(log);
    let entry = entry.to_string();
    Hook::builder(id)
        .on(event)
        .order(order)
        .run(move |_emission, _deps| {
            let sink = Arc::clone(&sink);
            let entry = entry.clone();
            async move {
                sink.lock().push(entry);
                Ok(())
            }
        })
        .build()
        .unwrap()
}

/// ## 顺序投递按 `order` 升序
///
/// - **意图 (Why)**：次序是公开契约：`order` 小者先行；
/// - **逻辑 (How)**：`h1(order=10)` 记 `a`，`h2(order=0)` 记 `b`；
/// - **契约 (What)**：缓冲序列为 `["b", "a"]`。
#[tokio::test]
async fn sequential_delivery_sorts_by_order() {
    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let event = Event::<()>::builder("e.ping").build().unwrap();
    let h1 = recording_hook("h.late", &event, 10, &log, "a");
    let h2 = recording_hook("h.early", &event, 0, &log, "b");

    let root = Resource::<(), ()>::builder("res.root")
        .register([Node::from(&event), Node::from(&h1), Node::from(&h2)])
        .build()
        .unwrap();
    let runtime = run(&root, quiet()).await.unwrap();
    runtime.emit(&event, ()).await.unwrap();

    assert_eq!(*log.lock(), vec!["b", "a"]);
    runtime.dispose().await.unwrap();
}

/// ## 并行投递的次序组屏障
///
/// - **意图 (Why)**：并行事件在同一 `order` 组内并发、组间设屏障；
/// - **逻辑 (How)**：两个 order-0 钩子在双参与者栅栏处互等——只有组内
///   真并发才能双双越过；order-5 钩子断言两者都已完成；
/// - **契约 (What)**：序列为两个 `settle:0*` 后跟 `start:5`。
#[tokio::test]
async fn parallel_delivery_gates_between_order_groups() {
    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let barrier = Arc::new(Barrier::new(2));
    let event = Event::<()>::builder("e.fanout").parallel().build().unwrap();

    let make_gate_hook = |id: &str, entry: &'static str| {
        let sink = Arc::clone(&log);
        let gate = Arc::clone(&barrier);
        Hook::builder(id)
            .on(&event)
            .order(0)
            .run(move |_emission, _deps| {
                let sink = Arc::clone(&sink);
                let gate = Arc::clone(&gate);
                async move {
                    gate.wait().await;
                    sink.lock().push(entry.to_string());
                    Ok(())
                }
            })
            .build()
            .unwrap()
    };
    let h0a = make_gate_hook("h.zero_a", "settle:0a");
    let h0b = make_gate_hook("h.zero_b", "settle:0b");

    let sink = Arc::clone(&log);
    let h5 = Hook::builder("h.five")
        .on(&event)
        .order(5)
        .run(move |_emission, _deps| {
            let sink = Arc::clone(&sink);
            async move {
                let seen = sink.lock().clone();
                assert!(seen.contains(&"settle:0a".to_string()));
                assert!(seen.contains(&"settle:0b".to_string()));
                sink.lock().push("start:5".to_string());
                Ok(())
            }
        })
        .build()
        .unwrap();

    let root = Resource::<(), ()>::builder("res.root")
        .register([
            Node::from(&event),
            Node::from(&h0a),
            Node::from(&h0b),
            Node::from(&h5),
        ])
        .build()
        .unwrap();
    let runtime = run(&root, quiet()).await.unwrap();
    runtime.emit(&event, ()).await.unwrap();

    assert_eq!(log.lock().len(), 3);
    assert_eq!(log.lock()[2], "start:5");
    runtime.dispose().await.unwrap();
}

/// ## 同源重发构成环，换源重发合法
///
/// - **意图 (Why)**：环检测要拦截“同一来源反复自发”的失控回路，同时给
///   “换源接力”的合法模式放行；
/// - **逻辑 (How)**：钩子甲以固定来源 `src.loop` 重发自身事件——第二层与
///   栈顶同源即被拦截；钩子乙用自身身份（缺省来源）重发——自抑制终止递归；
/// - **契约 (What)**：前者报 `runtime.event_cycle`，后者正常结束且执行
///   恰好两层。
#[tokio::test]
async fn same_source_reemission_is_a_cycle() {
    let event = Event::<()>::builder("e.echo").build().unwrap();
    let failures: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&failures);
    let hook = Hook::builder("h.echo")
        .on(&event)
        .dependencies(DependencySet::new().event("echo", &event))
        .run(move |_emission, deps| {
            let sink = Arc::clone(&sink);
            async move {
                let echo = deps.emitter("echo")?;
                if let Err(err) = echo.emit_as((), "src.loop").await {
                    sink.lock().push(err.code().to_string());
                }
                Ok(())
            }
        })
        .build()
        .unwrap();

    let root = Resource::<(), ()>::builder("res.root")
        .register([Node::from(&event), Node::from(&hook)])
        .build()
        .unwrap();
    let runtime = run(&root, quiet()).await.unwrap();
    runtime.emit(&event, ()).await.unwrap();

    // 第一层换源合法；第二层与栈顶同源（src.loop）被拦截。
    assert_eq!(*failures.lock(), vec!["runtime.event_cycle"]);
    runtime.dispose().await.unwrap();
}

/// ## 缺省来源重发依赖自抑制收敛
#[tokio::test]
async fn self_sourced_reemission_terminates_via_suppression() {
    let event = Event::<()>::builder("e.ripple").build().unwrap();
    let runs = Arc::new(Mutex::new(0u32));

    let counter = Arc::clone(&runs);
    let hook = Hook::builder("h.ripple")
        .on(&event)
        .dependencies(DependencySet::new().event("ripple", &event))
        .run(move |_emission, deps| {
            let counter = Arc::clone(&counter);
            async move {
                *counter.lock() += 1;
                let ripple = deps.emitter("ripple")?;
                // 来源为 h.ripple：重发的投递对自身自抑制，递归就此停住。
                ripple.emit(()).await
            }
        })
        .build()
        .unwrap();

    let root = Resource::<(), ()>::builder("res.root")
        .register([Node::from(&event), Node::from(&hook)])
        .build()
        .unwrap();
    let runtime = run(&root, quiet()).await.unwrap();
    runtime.emit(&event, ()).await.unwrap();

    assert_eq!(*runs.lock(), 1);
    runtime.dispose().await.unwrap();
}

/// ## 排除全局监听标签
///
/// - **契约 (What)**：携带 `exclude_from_global_hooks` 的事件不投递给
///   通配符监听器；普通事件照常投递。
#[tokio::test]
async fn exclusion_tag_skips_global_listeners() {
    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let internal = Event::<()>::builder("e.internal")
        .tag(tags::exclude_from_global_hooks().usage())
        .build()
        .unwrap();
    let public = Event::<()>::builder("e.public").build().unwrap();

    let sink = Arc::clone(&log);
    let global = Hook::builder("h.audit")
        .on_any()
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
            Node::from(&internal),
            Node::from(&public),
            Node::from(&global),
        ])
        .build()
        .unwrap();
    let runtime = run(&root, quiet()).await.unwrap();
    runtime.emit(&internal, ()).await.unwrap();
    runtime.emit(&public, ()).await.unwrap();

    // 就绪事件也会走全局监听；此处只关心两次显式发射。
    let seen = log.lock().clone();
    assert!(!seen.contains(&"e.internal".to_string()));
    assert!(seen.contains(&"e.public".to_string()));
    runtime.dispose().await.unwrap();
}

/// ## 传播终止与投递报告
///
/// - **逻辑 (How)**：首个监听器 `stop_propagation`，次个监听器不应执行；
///   以 `report: true` 取回报告核对计数；
/// - **契约 (What)**：报告显示 2 个监听器中尝试 1 个、传播已终止。
#[tokio::test]
async fn stop_propagation_halts_sequential_delivery() {
    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let event = Event::<()>::builder("e.halt").build().unwrap();

    let first = Hook::builder("h.stopper")
        .on(&event)
        .order(0)
        .run(move |emission, _deps| {
            emission.stop_propagation();
            async move { Ok(()) }
        })
        .build()
        .unwrap();
    let second = recording_hook("h.never", &event, 1, &log, "never");

    let root = Resource::<(), ()>::builder("res.root")
        .register([Node::from(&event), Node::from(&first), Node::from(&second)])
        .build()
        .unwrap();
    let runtime = run(&root, quiet()).await.unwrap();
    let report = runtime
        .emit_with(
            &event,
            (),
            EmitOptions {
                report: true,
                ..EmitOptions::default()
            },
        )
        .await
        .unwrap()
        .expect("要求报告时必须返回");

    assert!(log.lock().is_empty());
    assert_eq!(report.total_listeners, 2);
    assert_eq!(report.attempted_listeners, 1);
    assert_eq!(report.succeeded_listeners, 1);
    assert!(report.propagation_stopped);
    runtime.dispose().await.unwrap();
}

/// ## 聚合模式收集监听器错误
///
/// - **契约 (What)**：`Aggregate` + `throw_on_error: false` 时全部监听器
///   跑完，错误带 `runtime.listener_failure` 注解进入报告。
#[tokio::test]
async fn aggregate_mode_collects_listener_errors() {
    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let event = Event::<()>::builder("e.flaky").build().unwrap();

    let bad = Hook::builder("h.bad")
        .on(&event)
        .order(0)
        .run(|_emission, _deps| async { Err(KernelError::user_message("解析失败")) })
        .build()
        .unwrap();
    let good = recording_hook("h.good", &event, 1, &log, "good");

    let root = Resource::<(), ()>::builder("res.root")
        .register([Node::from(&event), Node::from(&bad), Node::from(&good)])
        .build()
        .unwrap();
    let runtime = run(&root, quiet()).await.unwrap();
    let report = runtime
        .emit_with(
            &event,
            (),
            EmitOptions {
                report: true,
                throw_on_error: false,
                failure_mode: FailureMode::Aggregate,
            },
        )
        .await
        .unwrap()
        .expect("要求报告时必须返回");

    assert_eq!(*log.lock(), vec!["good"]);
    assert_eq!(report.failed_listeners, 1);
    assert_eq!(report.succeeded_listeners, 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].code(), "runtime.listener_failure");
    runtime.dispose().await.unwrap();
}

/// ## 过滤谓词跳过不相关发射
#[tokio::test]
async fn filter_predicate_skips_listener() {
    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let event = Event::<u32>::builder("e.metric").build().unwrap();

    let sink = Arc::clone(&log);
    let hook = Hook::builder("h.threshold")
        .on(&event)
        .filter(|emission| {
            emission
                .payload::<u32>()
                .is_some_and(|value| *value >= 100)
        })
        .run(move |emission, _deps| {
            let sink = Arc::clone(&sink);
            let value = emission.payload::<u32>().map(|v| *v).unwrap_or_default();
            async move {
                sink.lock().push(format!("seen:{value}"));
                Ok(())
            }
        })
        .build()
        .unwrap();

    let root = Resource::<(), ()>::builder("res.root")
        .register([Node::from(&event), Node::from(&hook)])
        .build()
        .unwrap();
    let runtime = run(&root, quiet()).await.unwrap();
    runtime.emit(&event, 5_u32).await.unwrap();
    runtime.emit(&event, 150_u32).await.unwrap();

    assert_eq!(*log.lock(), vec!["seen:150"]);
    runtime.dispose().await.unwrap();
}
