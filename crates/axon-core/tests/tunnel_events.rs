//! 事件隧道投递方式的契约测试套件。
//!
//! # 教案级导览
//!
//! - **Why**：四种投递方式（镜像、仅远端、仅本地、远端优先）决定了跨进程
//!   事件的可见性边界，实现偏差会造成事件丢失或双投；
//! - **How**：进程内 `TunnelTransport` 充当远端，记录收到的发射；本地侧
//!   用普通钩子记录；每种方式单独起一个运行时；
//! - **What**：逐条固定“本地/远端各自是否收到”，以及远端失败时
//!   `remote-first` 的本地回退。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

use axon_core::prelude::*;
use axon_core::{
    EventDeliveryMode, EventEmission, LogOptions, Node, NodeId, TunnelTransport, async_trait,
    builtin, dyn_value,
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

struct RecordingBridge {
    event: NodeId,
    mode: EventDeliveryMode,
    fail_remote: bool,
    received: Arc<Mutex<Vec<String>>>,
    /// 存在时远端先等放行信号再应答，用于固定组间时序。
    gate: Option<Arc<Notify>>,
    /// 存在时作为覆盖载荷回传。
    override_payload: Option<String>,
}

#[async_trait]
impl TunnelTransport for RecordingBridge {
    fn event_ids(&self) -> Vec<NodeId> {
        vec![self.event.clone()]
    }

    fn event_delivery_mode(&self) -> EventDeliveryMode {
        self.mode
    }

    async fn emit(&self, emission: &EventEmission) -> axon_core::Result<Option<axon_core::DynValue>> {
        if self.fail_remote {
            return Err(KernelError::user_message("远端暂不可达"));
        }
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.received
            .lock()
            .push(format!("remote:{}", emission.event_id()));
        Ok(self
            .override_payload
            .as_ref()
            .map(|payload| dyn_value(payload.clone())))
    }
}

/// 组装“事件 + 本地钩子 + 指定方式的隧道资源”，返回运行时与事件门面。
async fn bridge_fixture(
    mode: EventDeliveryMode,
    fail_remote: bool,
    log: &Arc<Mutex<Vec<String>>>,
) -> (Runtime, Event<()>) {
    let event = Event::<()>::builder("e.span").build().unwrap();

    let sink = Arc::clone(log);
    let local = Hook::builder("h.local")
        .on(&event)
        .run(move |_emission, _deps| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().push("local".to_string());
                Ok(())
            }
        })
        .build()
        .unwrap();

    let received = Arc::clone(log);
    let event_id = event.id().clone();
    let bridge = Resource::<(), TunnelHandle>::builder("res.bridge")
        .tag(tags::tunnel().usage())
        .init(move |_, _, _| {
            let handle = TunnelHandle::new(RecordingBridge {
                event: event_id.clone(),
                mode,
                fail_remote,
                received: Arc::clone(&received),
                gate: None,
                override_payload: None,
            });
            async move { Ok(handle) }
        })
        .build()
        .unwrap();

    let root = Resource::<(), ()>::builder("res.root")
        .register([Node::from(&event), Node::from(&local), Node::from(&bridge)])
        .build()
        .unwrap();
    let runtime = run(&root, quiet()).await.expect("启动应成功");
    (runtime, event)
}

/// ## 镜像：本地与远端都收到
#[tokio::test]
async fn mirror_delivers_both_sides() {
    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let (runtime, event) = bridge_fixture(EventDeliveryMode::Mirror, false, &log).await;
    runtime.emit(&event, ()).await.unwrap();

    let seen = log.lock().clone();
    assert!(seen.contains(&"local".to_string()));
    assert!(seen.contains(&"remote:e.span".to_string()));
    runtime.dispose().await.unwrap();
}

/// ## 镜像：回传载荷覆盖本地组之后的投递
///
/// - **意图 (Why)**：远端与本地并发推进时，回传载荷必须能送达尚未启动的
///   次序组，这是镜像模式区别于“两边各投各的”的关键承诺；
/// - **逻辑 (How)**：远端应答被放行信号卡住；order-0 组看到原始载荷后放行
///   远端并回传覆盖载荷；order-10 组启动前的组间探询已拿到覆盖结果；
/// - **契约 (What)**：序列恰为 `first:original, remote:e.span, second:patched`。
#[tokio::test]
async fn mirror_override_applies_to_groups_after_remote_settles() {
    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let gate = Arc::new(Notify::new());
    let event = Event::<String>::builder("e.span").parallel().build().unwrap();

    let sink = Arc::clone(&log);
    let release = Arc::clone(&gate);
    let first = Hook::builder("h.first")
        .on(&event)
        .order(0)
        .run(move |emission, _deps| {
            let sink = Arc::clone(&sink);
            let release = Arc::clone(&release);
            let seen = emission
                .payload::<String>()
                .map(|p| p.as_ref().clone())
                .unwrap_or_default();
            async move {
                sink.lock().push(format!("first:{seen}"));
                release.notify_one();
                Ok(())
            }
        })
        .build()
        .unwrap();

    let sink = Arc::clone(&log);
    let second = Hook::builder("h.second")
        .on(&event)
        .order(10)
        .run(move |emission, _deps| {
            let sink = Arc::clone(&sink);
            let seen = emission
                .payload::<String>()
                .map(|p| p.as_ref().clone())
                .unwrap_or_default();
            async move {
                sink.lock().push(format!("second:{seen}"));
                Ok(())
            }
        })
        .build()
        .unwrap();

    let received = Arc::clone(&log);
    let event_id = event.id().clone();
    let remote_gate = Arc::clone(&gate);
    let bridge = Resource::<(), TunnelHandle>::builder("res.bridge")
        .tag(tags::tunnel().usage())
        .init(move |_, _, _| {
            let handle = TunnelHandle::new(RecordingBridge {
                event: event_id.clone(),
                mode: EventDeliveryMode::Mirror,
                fail_remote: false,
                received: Arc::clone(&received),
                gate: Some(Arc::clone(&remote_gate)),
                override_payload: Some("patched".to_string()),
            });
            async move { Ok(handle) }
        })
        .build()
        .unwrap();

    let root = Resource::<(), ()>::builder("res.root")
        .register([
            Node::from(&event),
            Node::from(&first),
            Node::from(&second),
            Node::from(&bridge),
        ])
        .build()
        .unwrap();
    let runtime = run(&root, quiet()).await.unwrap();
    runtime.emit(&event, "original".to_string()).await.unwrap();

    assert_eq!(
        *log.lock(),
        vec!["first:original", "remote:e.span", "second:patched"]
    );
    runtime.dispose().await.unwrap();
}

/// ## 仅远端：本地监听器一次不跑
#[tokio::test]
async fn remote_only_skips_local_listeners() {
    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let (runtime, event) = bridge_fixture(EventDeliveryMode::RemoteOnly, false, &log).await;
    runtime.emit(&event, ()).await.unwrap();

    assert_eq!(*log.lock(), vec!["remote:e.span"]);
    runtime.dispose().await.unwrap();
}

/// ## 仅本地：远端一次不调
#[tokio::test]
async fn local_only_never_calls_remote() {
    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let (runtime, event) = bridge_fixture(EventDeliveryMode::LocalOnly, false, &log).await;
    runtime.emit(&event, ()).await.unwrap();

    assert_eq!(*log.lock(), vec!["local"]);
    runtime.dispose().await.unwrap();
}

/// ## 远端优先：成功则本地不投，失败则回退本地
#[tokio::test]
async fn remote_first_falls_back_to_local_on_failure() {
    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let (runtime, event) = bridge_fixture(EventDeliveryMode::RemoteFirst, false, &log).await;
    runtime.emit(&event, ()).await.unwrap();
    assert_eq!(*log.lock(), vec!["remote:e.span"]);
    runtime.dispose().await.unwrap();

    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let (runtime, event) = bridge_fixture(EventDeliveryMode::RemoteFirst, true, &log).await;
    runtime.emit(&event, ()).await.unwrap();
    assert_eq!(*log.lock(), vec!["local"]);
    runtime.dispose().await.unwrap();
}

/// ## 就绪事件恰好发射一次
///
/// - **契约 (What)**：启动尾声发射内建就绪事件；监听器在 `run` 返回前
///   已经执行完毕。
#[tokio::test]
async fn ready_event_fires_once_before_run_returns() {
    let fired = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&fired);
    let on_ready = Hook::builder("h.ready")
        .on(&builtin::ready_event())
        .run(move |_emission, _deps| {
            let flag = Arc::clone(&flag);
            async move {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            }
        })
        .build()
        .unwrap();

    let root = Resource::<(), ()>::builder("res.root")
        .register([Node::from(&on_ready)])
        .build()
        .unwrap();
    let runtime = run(&root, quiet()).await.unwrap();
    assert!(fired.load(Ordering::SeqCst));
    runtime.dispose().await.unwrap();
}
