//! 进程级安全网：停机信号驱动释放，panic 转发日志。
//!
//! # 契约说明（What）
//! - `SIGINT`（Ctrl-C）与 Unix 下的 `SIGTERM` 触发运行时释放后退出进程；
//! - 释放过程中的错误记入日志后吞掉，停机路径不抛错；
//! - panic 钩子只追加日志转发，原钩子行为保留；全进程安装一次。

use std::sync::{Arc, Once};

use super::RuntimeInner;

/// 安装信号监听与 panic 桥接。
pub(crate) fn install(inner: &Arc<RuntimeInner>) {
    install_panic_bridge();
    let weak = Arc::downgrade(inner);
    tokio::spawn(async move {
        wait_for_signal().await;
        if let Some(inner) = weak.upgrade() {
            tracing::info!("收到停机信号，开始释放");
            if let Err(err) = super::dispose_inner(&inner).await {
                tracing::error!(error = %err.render(), "停机释放出错（已吞掉）");
            }
        }
        std::process::exit(0);
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(err) => {
            tracing::warn!(error = %err, "SIGTERM 监听不可用，仅响应 Ctrl-C");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// panic 转发日志；保留既有钩子。
fn install_panic_bridge() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            tracing::error!(panic = %info, "未捕获的 panic");
            previous(info);
        }));
    });
}
