//! 事件分发：排序投递、并行分组、重发环检测与隧道转发。
//!
//! # 设计背景（Why）
//! - 投递次序是公开契约：`order` 升序，同序保持注册顺序，全局监听器按同一
//!   规则稳定并入；
//! - 顺序事件逐个 `await`，并行事件把**相邻同序**的监听器聚成一组并发执行，
//!   组间仍保持次序屏障；`stop_propagation` 在顺序模式下于监听器之间、
//!   并行模式下于组之间生效；
//! - 重发环检测基于任务局部的发射栈：同一事件再次出现即视为环，除非新发射
//!   的来源不同于栈顶来源（监听器换源重发的合法模式）。
//!
//! # 契约说明（What）
//! - 监听器错误带上 `{listenerId, listenerOrder}` 注解；`FailFast` 在首错后
//!   终止投递，`Aggregate` 收集全部错误；
//! - `throw_on_error` 时顺序事件抛第一个错误，并行事件抛聚合错误；
//! - 携带 `exclude_from_global_hooks` 标签的事件不投递全局监听器；
//! - 来源等于监听器自身 ID 的发射对该监听器自抑制。

pub mod emission;
pub(crate) mod registry;
pub mod tunnel;

use std::sync::Arc;
use std::task::Poll;

use parking_lot::RwLock;

use crate::ambient::EmissionFrame;
use crate::definition::EventDef;
use crate::definition::tag::tags;
use crate::errors::{KernelError, Result};
use crate::kernel::future::BoxFuture;
use crate::kernel::ids::NodeId;
use crate::kernel::value::DynValue;

pub use emission::EventEmission;
pub use tunnel::{EventDeliveryMode, TunnelHandle, TunnelTransport};

pub(crate) use registry::{ListenerEntry, ListenerFn, ListenerRegistry};

/// 监听器出错时的整体策略。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FailureMode {
    /// 首个错误即终止投递。
    #[default]
    FailFast,
    /// 继续投递并收集全部错误。
    Aggregate,
}

/// 一次发射的选项。
#[derive(Clone, Copy, Debug)]
pub struct EmitOptions {
    /// 强制返回投递报告。
    pub report: bool,
    /// 存在错误时抛出（顺序事件抛首错，并行事件抛聚合）。
    pub throw_on_error: bool,
    pub failure_mode: FailureMode,
}

impl Default for EmitOptions {
    fn default() -> Self {
        Self {
            report: false,
            throw_on_error: true,
            failure_mode: FailureMode::FailFast,
        }
    }
}

/// 一次发射的投递报告。
#[derive(Debug, Default)]
pub struct EmitReport {
    pub total_listeners: usize,
    pub attempted_listeners: usize,
    pub skipped_listeners: usize,
    pub succeeded_listeners: usize,
    pub failed_listeners: usize,
    pub propagation_stopped: bool,
    pub errors: Vec<KernelError>,
}

impl EmitReport {
    fn with_total(total: usize) -> Self {
        Self {
            total_listeners: total,
            ..Self::default()
        }
    }
}

/// 事件分发器。
pub(crate) struct EventDispatcher {
    registry: ListenerRegistry,
    cycle_detection: bool,
    tunnels: RwLock<Vec<TunnelHandle>>,
}

impl EventDispatcher {
    pub(crate) fn new(cycle_detection: bool) -> Self {
        Self {
            registry: ListenerRegistry::new(),
            cycle_detection,
            tunnels: RwLock::new(Vec::new()),
        }
    }

    pub(crate) fn registry(&self) -> &ListenerRegistry {
        &self.registry
    }

    /// 启动期登记一个事件隧道。
    pub(crate) fn add_tunnel(&self, handle: TunnelHandle) {
        self.tunnels.write().push(handle);
    }

    /// 发射一个事件。
    pub(crate) async fn emit(
        &self,
        def: &Arc<EventDef>,
        payload: Option<DynValue>,
        source: Option<NodeId>,
        opts: EmitOptions,
    ) -> Result<Option<EmitReport>> {
        if let Some(schema) = &def.payload_schema {
            schema
                .check(payload.as_ref())
                .map_err(|violation| KernelError::EventPayloadValidation {
                    event: def.id.clone(),
                    violation,
                })?;
        }

        if self.cycle_detection {
            let stack = crate::ambient::emission_stack();
            if stack.iter().any(|frame| frame.event == def.id)
                && stack.last().is_some_and(|top| top.source == source)
            {
                let mut path: Vec<String> = stack.iter().map(format_frame).collect();
                path.push(format_frame(&EmissionFrame {
                    event: def.id.clone(),
                    source: source.clone(),
                }));
                return Err(KernelError::EventCycle {
                    path: path.join(" -> "),
                });
            }
        }

        let emission = EventEmission::new(
            def.id.clone(),
            payload,
            source.clone(),
            def.meta.clone(),
            def.tags.clone(),
        );
        let tunnel = {
            let tunnels = self.tunnels.read();
            tunnels.iter().find(|t| t.covers_event(&def.id)).cloned()
        };
        let frame = EmissionFrame {
            event: def.id.clone(),
            source,
        };

        let mut report = crate::ambient::with_emission_frame(frame, async {
            self.route(def, emission, tunnel, opts.failure_mode).await
        })
        .await;

        if opts.throw_on_error && !report.errors.is_empty() {
            if def.parallel {
                return Err(KernelError::EmitAggregate {
                    event: def.id.clone(),
                    errors: report.errors,
                });
            }
            return Err(report.errors.remove(0));
        }
        Ok(opts.report.then_some(report))
    }

    /// 按隧道投递方式路由本地与远端。
    async fn route(
        &self,
        def: &Arc<EventDef>,
        emission: EventEmission,
        tunnel: Option<TunnelHandle>,
        failure_mode: FailureMode,
    ) -> EmitReport {
        match tunnel {
            None => self.deliver_local(def, emission, failure_mode, None).await,
            Some(tunnel) => match tunnel.0.event_delivery_mode() {
                EventDeliveryMode::LocalOnly => {
                    self.deliver_local(def, emission, failure_mode, None).await
                }
                EventDeliveryMode::RemoteOnly => {
                    let mut report = EmitReport::with_total(0);
                    if let Err(err) = tunnel.0.emit(&emission).await {
                        report.errors.push(err);
                    }
                    report
                }
                EventDeliveryMode::RemoteFirst => match tunnel.0.emit(&emission).await {
                    Ok(_) => EmitReport::with_total(0),
                    Err(err) => {
                        // 远端失败回退本地投递。
                        tracing::debug!(event = %def.id, error = %err, "隧道投递失败，回退本地");
                        self.deliver_local(def, emission, failure_mode, None).await
                    }
                },
                EventDeliveryMode::Mirror => {
                    // 远端与本地并发推进：远端转发保持在途，本地在组间探询其
                    // 结果；回传载荷自探询命中起覆盖尚未启动的组看到的发射载荷。
                    let transport = Arc::clone(&tunnel.0);
                    let remote_emission = emission.clone();
                    let probe = MirrorProbe::new(Box::pin(async move {
                        transport.emit(&remote_emission).await
                    }));
                    self.deliver_local(def, emission, failure_mode, Some(probe))
                        .await
                }
            },
        }
    }

    /// 本地投递：顺序或按次序分组并行；镜像模式附带在途的远端探针。
    async fn deliver_local(
        &self,
        def: &Arc<EventDef>,
        emission: EventEmission,
        failure_mode: FailureMode,
        mut mirror: Option<MirrorProbe>,
    ) -> EmitReport {
        let include_globals = !tags::excludes_global_hooks(&def.tags);
        let listeners = self.registry.resolve(&def.id, include_globals);
        let mut report = EmitReport::with_total(listeners.len());

        if def.parallel {
            self.deliver_batched(&listeners, &emission, failure_mode, &mut report, &mut mirror)
                .await;
        } else {
            self.deliver_sequential(&listeners, &emission, failure_mode, &mut report, &mut mirror)
                .await;
        }
        // 本地组结束后远端仍在途则等它收尾；此时已无组可覆盖，只收错误。
        if let Some(probe) = &mut mirror {
            probe.finish().await;
            if let Some(err) = probe.take_error() {
                report.errors.push(err);
            }
        }
        report
    }

    async fn deliver_sequential(
        &self,
        listeners: &[ListenerEntry],
        emission: &EventEmission,
        failure_mode: FailureMode,
        report: &mut EmitReport,
        mirror: &mut Option<MirrorProbe>,
    ) {
        for entry in listeners {
            if let Some(probe) = mirror.as_mut() {
                probe.poll_remote().await;
            }
            if emission.is_propagation_stopped() {
                report.propagation_stopped = true;
                return;
            }
            let current = mirrored_emission(emission, mirror);
            if !should_attempt(entry, &current, report) {
                continue;
            }
            report.attempted_listeners += 1;
            match (entry.run)(current).await {
                Ok(()) => report.succeeded_listeners += 1,
                Err(err) => {
                    report.failed_listeners += 1;
                    report.errors.push(annotate_listener_error(entry, err));
                    if failure_mode == FailureMode::FailFast {
                        return;
                    }
                }
            }
        }
        if emission.is_propagation_stopped() {
            report.propagation_stopped = true;
        }
    }

    /// 相邻同 `order` 的监听器并发执行；组间等待并检查传播终止。
    ///
    /// 镜像模式下每个组启动前探询一次远端：回传载荷已就位时，
    /// 该组及其后各组收到覆盖后的发射。
    async fn deliver_batched(
        &self,
        listeners: &[ListenerEntry],
        emission: &EventEmission,
        failure_mode: FailureMode,
        report: &mut EmitReport,
        mirror: &mut Option<MirrorProbe>,
    ) {
        let mut index = 0;
        while index < listeners.len() {
            if let Some(probe) = mirror.as_mut() {
                probe.poll_remote().await;
            }
            if emission.is_propagation_stopped() {
                report.propagation_stopped = true;
                return;
            }
            let current = mirrored_emission(emission, mirror);
            let order = listeners[index].order;
            let mut group: Vec<&ListenerEntry> = Vec::new();
            while index < listeners.len() && listeners[index].order == order {
                let entry = &listeners[index];
                index += 1;
                if should_attempt(entry, &current, report) {
                    group.push(entry);
                }
            }
            if group.is_empty() {
                continue;
            }
            report.attempted_listeners += group.len();
            let results =
                futures::future::join_all(group.iter().map(|entry| (entry.run)(current.clone())))
                    .await;
            let mut group_failed = false;
            for (entry, result) in group.iter().zip(results) {
                match result {
                    Ok(()) => report.succeeded_listeners += 1,
                    Err(err) => {
                        report.failed_listeners += 1;
                        report.errors.push(annotate_listener_error(entry, err));
                        group_failed = true;
                    }
                }
            }
            if group_failed && failure_mode == FailureMode::FailFast {
                return;
            }
        }
        if emission.is_propagation_stopped() {
            report.propagation_stopped = true;
        }
    }

    /// 锁定登记簿，`ready` 之后调用。
    pub(crate) fn lock(&self) {
        self.registry.lock();
    }
}

/// 镜像模式的在途远端探针。
///
/// # 契约说明（What）
/// - [`MirrorProbe::poll_remote`] 在组间对远端 Future 做单次非阻塞探询，
///   结束后记录回传载荷或错误；远端结束后的探询为无操作；
/// - [`MirrorProbe::finish`] 在本地投递收尾时等待远端完成；
/// - 回传载荷经 [`mirrored_emission`] 覆盖此后各组看到的发射载荷。
struct MirrorProbe {
    remote: BoxFuture<'static, Result<Option<DynValue>>>,
    settled: bool,
    override_payload: Option<DynValue>,
    error: Option<KernelError>,
}

impl MirrorProbe {
    fn new(remote: BoxFuture<'static, Result<Option<DynValue>>>) -> Self {
        Self {
            remote,
            settled: false,
            override_payload: None,
            error: None,
        }
    }

    fn settle(&mut self, outcome: Result<Option<DynValue>>) {
        self.settled = true;
        match outcome {
            Ok(payload) => self.override_payload = payload,
            Err(err) => self.error = Some(err),
        }
    }

    /// 单次探询；远端尚未结束时立即返回。
    async fn poll_remote(&mut self) {
        if self.settled {
            return;
        }
        if let Poll::Ready(outcome) = futures::poll!(self.remote.as_mut()) {
            self.settle(outcome);
        }
    }

    /// 等待远端收尾。
    async fn finish(&mut self) {
        if self.settled {
            return;
        }
        let outcome = self.remote.as_mut().await;
        self.settle(outcome);
    }

    fn take_error(&mut self) -> Option<KernelError> {
        self.error.take()
    }
}

/// 组即将启动时应看到的发射：远端已回传载荷则派生覆盖副本。
fn mirrored_emission(emission: &EventEmission, mirror: &Option<MirrorProbe>) -> EventEmission {
    match mirror.as_ref().and_then(|probe| probe.override_payload.as_ref()) {
        Some(payload) => emission.with_payload(Some(payload.clone())),
        None => emission.clone(),
    }
}

/// 自抑制与过滤裁决；跳过时计入报告。
fn should_attempt(entry: &ListenerEntry, emission: &EventEmission, report: &mut EmitReport) -> bool {
    if emission.source() == Some(&entry.id) {
        report.skipped_listeners += 1;
        return false;
    }
    if let Some(filter) = &entry.filter {
        if !filter(emission) {
            report.skipped_listeners += 1;
            return false;
        }
    }
    true
}

/// 为监听器错误补上 ID 与次序注解；已注解者保持原样。
fn annotate_listener_error(entry: &ListenerEntry, err: KernelError) -> KernelError {
    match err {
        already @ KernelError::ListenerFailure { .. } => already,
        other => KernelError::ListenerFailure {
            listener: entry.id.clone(),
            order: entry.order,
            source: Box::new(other),
        },
    }
}

fn format_frame(frame: &EmissionFrame) -> String {
    match &frame.source {
        Some(source) => format!("{}(source={})", frame.event, source),
        None => frame.event.to_string(),
    }
}
