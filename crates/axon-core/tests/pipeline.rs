//! 任务执行管线契约测试套件。
//!
//! # 教案级导览
//!
//! - **Why**：链序（全局在外、本地在内）、校验时机（结果校验针对原始返回）
//!   与日志追加语义是中间件协作的全部前提；
//! - **How**：中间件把进出动作写入共享缓冲；校验用带谓词的 Schema 触发；
//!   隧道用进程内 `TunnelTransport` 实现充当远端；
//! - **What**：覆盖链序、输入/结果校验、依赖替换、全局中间件自依赖排除、
//!   幻影任务承接与 `tunnel_policy` 白名单。

use std::sync::Arc;

use parking_lot::Mutex;

use axon_core::prelude::*;
use axon_core::{
    LogOptions, Node, NodeId, TunnelTransport, async_trait, dyn_value, validator,
};

fn quiet() -> RunOptions {
    RunOptions {
        logs: LogOptions {
            print_threshold: None,
            ..LogOptions::default()
        },
        ..RunOptions::default()
    }
}

/// ## 链序：全局在外、本地在内，返回路径互逆
///
/// - **逻辑 (How)**：全局与本地中间件各记一进一出，任务体记 `task`；
/// - **契约 (What)**：序列为 `g:in, l:in, task, l:out, g:out`。
#[tokio::test]
async fn chain_order_is_globals_then_locals() {
    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let make_probe = |id: &str, label: &'static str, sink: &Arc<Mutex<Vec<String>>>| {
        let sink = Arc::clone(sink);
        TaskMiddleware::<()>::builder(id)
            .run(move |invocation| {
                let sink = Arc::clone(&sink);
                async move {
                    sink.lock().push(format!("{label}:in"));
                    let out = invocation.next.forward().await;
                    sink.lock().push(format!("{label}:out"));
                    out
                }
            })
            .build()
            .unwrap()
    };
    let global = {
        let sink = Arc::clone(&log);
        TaskMiddleware::<()>::builder("mw.global")
            .everywhere(|task| task.id.as_str() == "task.work")
            .run(move |invocation| {
                let sink = Arc::clone(&sink);
                async move {
                    sink.lock().push("g:in".to_string());
                    let out = invocation.next.forward().await;
                    sink.lock().push("g:out".to_string());
                    out
                }
            })
            .build()
            .unwrap()
    };
    let local = make_probe("mw.local", "l", &log);

    let sink = Arc::clone(&log);
    let work = Task::<(), u32>::builder("task.work")
        .middleware(local.usage())
        .run(move |_input, _deps| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().push("task".to_string());
                Ok(7)
            }
        })
        .build()
        .unwrap();

    let root = Resource::<(), ()>::builder("res.root")
        .register([Node::from(&global), Node::from(&local), Node::from(&work)])
        .build()
        .unwrap();
    let runtime = run(&root, quiet()).await.unwrap();
    let out: u32 = runtime.run_task(&work, ()).await.unwrap();

    assert_eq!(out, 7);
    assert_eq!(*log.lock(), vec!["g:in", "l:in", "task", "l:out", "g:out"]);
    runtime.dispose().await.unwrap();
}

/// ## 输入校验失败带任务 ID
#[tokio::test]
async fn input_validation_rejects_bad_payload() {
    let strict = Task::<u32, u32>::builder("task.strict")
        .input_schema(validator::<u32, _>(|v| {
            if *v > 0 {
                Ok(())
            } else {
                Err("输入必须为正数".to_string())
            }
        }))
        .run(|input, _deps| async move { Ok(input * 2) })
        .build()
        .unwrap();

    let root = Resource::<(), ()>::builder("res.root")
        .register([Node::from(&strict)])
        .build()
        .unwrap();
    let runtime = run(&root, quiet()).await.unwrap();

    assert_eq!(runtime.run_task(&strict, 4_u32).await.unwrap(), 8);
    let err = runtime.run_task(&strict, 0_u32).await.unwrap_err();
    assert_eq!(err.code(), "validation.task_input");
    assert!(err.to_string().contains("task.strict"));
    runtime.dispose().await.unwrap();
}

/// ## 结果校验针对原始返回，中间件后处理不复检
///
/// - **逻辑 (How)**：结果 Schema 拒绝奇数；任务返回偶数后，中间件把结果
///   替换为奇数——链终点已完成校验，不再复检；
/// - **契约 (What)**：偶数原始返回经奇数化后处理照常放行；任务直接返回
///   奇数则报 `validation.task_result`。
#[tokio::test]
async fn result_validation_applies_to_raw_return_only() {
    let oddifier = TaskMiddleware::<()>::builder("mw.oddify")
        .run(|invocation| async move {
            let out = invocation.next.forward().await?;
            let value = out
                .downcast_ref::<u32>()
                .copied()
                .unwrap_or_default();
            Ok(dyn_value(value + 1))
        })
        .build()
        .unwrap();

    let even_only = validator::<u32, _>(|v| {
        if v % 2 == 0 {
            Ok(())
        } else {
            Err("结果必须为偶数".to_string())
        }
    });

    let doubles = Task::<u32, u32>::builder("task.doubles")
        .result_schema(even_only.clone())
        .middleware(oddifier.usage())
        .run(|input, _deps| async move { Ok(input * 2) })
        .build()
        .unwrap();
    let leaks_odd = Task::<u32, u32>::builder("task.leaks_odd")
        .result_schema(even_only)
        .run(|input, _deps| async move { Ok(input * 2 + 1) })
        .build()
        .unwrap();

    let root = Resource::<(), ()>::builder("res.root")
        .register([
            Node::from(&oddifier),
            Node::from(&doubles),
            Node::from(&leaks_odd),
        ])
        .build()
        .unwrap();
    let runtime = run(&root, quiet()).await.unwrap();

    // 原始返回 6 通过校验；中间件改成 7 不复检。
    assert_eq!(runtime.run_task(&doubles, 3_u32).await.unwrap(), 7);
    let err = runtime.run_task(&leaks_odd, 3_u32).await.unwrap_err();
    assert_eq!(err.code(), "validation.task_result");
    runtime.dispose().await.unwrap();
}

/// ## 执行日志在链上共享且追加式
#[tokio::test]
async fn journal_is_shared_and_append_only() {
    let observed: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&observed);
    let writer = TaskMiddleware::<()>::builder("mw.writer")
        .run(move |invocation| {
            let sink = Arc::clone(&sink);
            async move {
                invocation
                    .journal
                    .set(&journal_keys::RETRY_ATTEMPT, 1)?;
                // 重复追加写必须被拒绝。
                let dup = invocation.journal.set(&journal_keys::RETRY_ATTEMPT, 2);
                sink.lock().push(format!(
                    "dup:{}",
                    dup.unwrap_err().code()
                ));
                invocation.next.forward().await
            }
        })
        .build()
        .unwrap();

    let sink = Arc::clone(&observed);
    let reader = TaskMiddleware::<()>::builder("mw.reader")
        .run(move |invocation| {
            let sink = Arc::clone(&sink);
            async move {
                let attempt = invocation.journal.get(&journal_keys::RETRY_ATTEMPT);
                sink.lock().push(format!("seen:{attempt:?}"));
                invocation.next.forward().await
            }
        })
        .build()
        .unwrap();

    let work = Task::<(), ()>::builder("task.work")
        .middleware(writer.usage())
        .middleware(reader.usage())
        .run(|_input, _deps| async { Ok(()) })
        .build()
        .unwrap();

    let root = Resource::<(), ()>::builder("res.root")
        .register([Node::from(&writer), Node::from(&reader), Node::from(&work)])
        .build()
        .unwrap();
    let runtime = run(&root, quiet()).await.unwrap();
    runtime.run_task(&work, ()).await.unwrap();

    assert_eq!(
        *observed.lock(),
        vec!["dup:runtime.journal_key_exists", "seen:Some(1)"]
    );
    runtime.dispose().await.unwrap();
}

/// ## 单次调用的依赖替换
///
/// - **契约 (What)**：`DepOverrides` 只影响本次调用；后续调用回到注册值。
#[tokio::test]
async fn dep_overrides_are_per_invocation() {
    let store = Resource::<(), i32>::builder("res.store")
        .init(|_, _, _| async { Ok(10) })
        .build()
        .unwrap();
    let reads = Task::<(), i32>::builder("task.reads")
        .dependencies(DependencySet::new().resource("store", &store))
        .run(|_input, deps| async move {
            let store = deps.resource::<i32>("store")?;
            Ok(*store)
        })
        .build()
        .unwrap();

    let root = Resource::<(), ()>::builder("res.root")
        .register([Node::from(&store), Node::from(&reads)])
        .build()
        .unwrap();
    let runtime = run(&root, quiet()).await.unwrap();

    assert_eq!(runtime.run_task(&reads, ()).await.unwrap(), 10);
    let overridden = runtime
        .run_task_with(
            &reads,
            (),
            DepOverrides::new().resource_value("store", 99_i32),
        )
        .await
        .unwrap();
    assert_eq!(overridden, 99);
    assert_eq!(runtime.run_task(&reads, ()).await.unwrap(), 10);
    runtime.dispose().await.unwrap();
}

/// ## 全局中间件的传递性自依赖排除
///
/// - **意图 (Why)**：依赖某任务的全局中间件若包裹该任务会递归自包裹；
/// - **逻辑 (How)**：`mw.audit` 依赖 `task.log`，谓词选中全部任务；
/// - **契约 (What)**：`task.log` 的链不含 `mw.audit`，其余任务照常包裹。
#[tokio::test]
async fn global_middleware_excludes_transitive_self_dependency() {
    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&log);
    let log_task = Task::<(), ()>::builder("task.log")
        .run(move |_input, _deps| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().push("log-task".to_string());
                Ok(())
            }
        })
        .build()
        .unwrap();

    let sink = Arc::clone(&log);
    let audit = TaskMiddleware::<()>::builder("mw.audit")
        .dependencies(DependencySet::new().task("logger", &log_task))
        .everywhere(|_| true)
        .run(move |invocation| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().push(format!("audit:{}", invocation.task.id));
                invocation.next.forward().await
            }
        })
        .build()
        .unwrap();

    let plain = Task::<(), ()>::builder("task.plain")
        .run(|_input, _deps| async { Ok(()) })
        .build()
        .unwrap();

    let root = Resource::<(), ()>::builder("res.root")
        .register([
            Node::from(&log_task),
            Node::from(&audit),
            Node::from(&plain),
        ])
        .build()
        .unwrap();
    let runtime = run(&root, quiet()).await.unwrap();

    runtime.run_task(&plain, ()).await.unwrap();
    runtime.run_task(&log_task, ()).await.unwrap();

    let seen = log.lock().clone();
    assert!(seen.contains(&"audit:task.plain".to_string()));
    assert!(!seen.contains(&"audit:task.log".to_string()));
    runtime.dispose().await.unwrap();
}

struct InProcessTunnel {
    covered: NodeId,
}

#[async_trait]
impl TunnelTransport for InProcessTunnel {
    fn task_ids(&self) -> Vec<NodeId> {
        vec![self.covered.clone()]
    }

    async fn run_task(
        &self,
        _task: &NodeId,
        input: Option<axon_core::DynValue>,
    ) -> axon_core::Result<axon_core::DynValue> {
        let base = input
            .and_then(|v| v.downcast_ref::<u32>().copied())
            .unwrap_or_default();
        Ok(dyn_value(base + 100))
    }
}

/// ## 幻影任务由隧道承接，`tunnel_policy` 过滤本地链
///
/// - **逻辑 (How)**：无本地实现的任务挂上空 `client` 白名单的策略标签；
///   携带 `tunnel` 标签的资源以 [`TunnelHandle`] 承接调用；
/// - **契约 (What)**：调用结果来自隧道；本地中间件一次都不执行。
#[tokio::test]
async fn phantom_task_is_fulfilled_by_tunnel() {
    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&log);
    let local_probe = TaskMiddleware::<()>::builder("mw.probe")
        .run(move |invocation| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().push("probe".to_string());
                invocation.next.forward().await
            }
        })
        .build()
        .unwrap();

    let phantom = Task::<u32, u32>::builder("task.remote")
        .middleware(local_probe.usage())
        .tag(tags::tunnel_policy().with(tags::TunnelPolicyConfig {
            client: Some(vec![]),
        }))
        .build()
        .unwrap();

    let covered = phantom.id().clone();
    let tunnel_resource = Resource::<(), TunnelHandle>::builder("res.bridge")
        .tag(tags::tunnel().usage())
        .init(move |_, _, _| {
            let covered = covered.clone();
            async move { Ok(TunnelHandle::new(InProcessTunnel { covered })) }
        })
        .build()
        .unwrap();

    let root = Resource::<(), ()>::builder("res.root")
        .register([
            Node::from(&local_probe),
            Node::from(&phantom),
            Node::from(&tunnel_resource),
        ])
        .build()
        .unwrap();
    let runtime = run(&root, quiet()).await.unwrap();

    assert_eq!(runtime.run_task(&phantom, 5_u32).await.unwrap(), 105);
    assert!(log.lock().is_empty());
    runtime.dispose().await.unwrap();
}

/// ## 没有隧道的幻影任务在调用时失败
#[tokio::test]
async fn phantom_without_tunnel_fails_at_invocation() {
    let phantom = Task::<(), ()>::builder("task.orphan").build().unwrap();
    let root = Resource::<(), ()>::builder("res.root")
        .register([Node::from(&phantom)])
        .build()
        .unwrap();
    let runtime = run(&root, quiet()).await.unwrap();

    let err = runtime.run_task(&phantom, ()).await.unwrap_err();
    assert_eq!(err.code(), "runtime.phantom_without_tunnel");
    runtime.dispose().await.unwrap();
}
