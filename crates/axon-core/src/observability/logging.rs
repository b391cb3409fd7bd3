//! 日志安装：阈值、输出格式与“缓冲到就绪再冲刷”。
//!
//! # 设计背景（Why）
//! - 内核各处经 `tracing` 宏发日志；这里按运行选项装一个全局订阅者：
//!   级别阈值、`pretty`/`json` 两种渲染、可选的启动期缓冲；
//! - 启动期缓冲把 `ready` 之前的日志积在内存里，就绪后一次性按原顺序冲刷，
//!   避免启动输出与宿主自己的输出交错。
//!
//! # 契约说明（What）
//! - 阈值为 `None` 或策略为 [`PrintStrategy::None`] 时不装订阅者；
//! - 全局订阅者已存在时静默放弃（常见于测试里多次启动运行时）；
//! - `json_pretty` 当前按 `json` 渲染。

use std::io::Write;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::Level;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::fmt::MakeWriter;

/// 日志输出策略。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PrintStrategy {
    /// 面向人的多行渲染。
    #[default]
    Pretty,
    /// 单行 JSON。
    Json,
    /// 多行 JSON；当前按 [`PrintStrategy::Json`] 渲染。
    JsonPretty,
    /// 不输出。
    None,
}

/// 日志选项。
#[derive(Clone, Debug)]
pub struct LogOptions {
    /// 最低打印级别；`None` 关闭打印。
    pub print_threshold: Option<Level>,
    pub print_strategy: PrintStrategy,
    /// 缓冲启动期日志，就绪后冲刷。
    pub buffer_logs: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            print_threshold: Some(Level::INFO),
            print_strategy: PrintStrategy::Pretty,
            buffer_logs: false,
        }
    }
}

struct BufferState {
    buffering: bool,
    buffered: Vec<u8>,
}

/// 订阅者写端：缓冲期写进内存，其余时间直通标准输出。
#[derive(Clone)]
struct SinkWriterFactory {
    state: Arc<Mutex<BufferState>>,
}

struct SinkWriter {
    state: Arc<Mutex<BufferState>>,
}

impl Write for SinkWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut state = self.state.lock();
        if state.buffering {
            state.buffered.extend_from_slice(buf);
            Ok(buf.len())
        } else {
            drop(state);
            std::io::stdout().write(buf)
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        std::io::stdout().flush()
    }
}

impl<'a> MakeWriter<'a> for SinkWriterFactory {
    type Writer = SinkWriter;

    fn make_writer(&'a self) -> SinkWriter {
        SinkWriter {
            state: Arc::clone(&self.state),
        }
    }
}

/// 已安装日志的冲刷句柄。
pub(crate) struct LogGuard {
    state: Option<Arc<Mutex<BufferState>>>,
}

impl LogGuard {
    /// 结束缓冲期并把积压日志按原顺序写出。
    pub(crate) fn flush(&self) {
        let Some(state) = &self.state else { return };
        let buffered = {
            let mut state = state.lock();
            state.buffering = false;
            std::mem::take(&mut state.buffered)
        };
        if !buffered.is_empty() {
            let mut stdout = std::io::stdout();
            let _ = stdout.write_all(&buffered);
            let _ = stdout.flush();
        }
    }
}

/// 按选项安装全局订阅者，返回冲刷句柄。
pub(crate) fn install(options: &LogOptions) -> LogGuard {
    let Some(level) = options.print_threshold else {
        return LogGuard { state: None };
    };
    if options.print_strategy == PrintStrategy::None {
        return LogGuard { state: None };
    }
    let state = Arc::new(Mutex::new(BufferState {
        buffering: options.buffer_logs,
        buffered: Vec::new(),
    }));
    let writer = SinkWriterFactory {
        state: Arc::clone(&state),
    };
    let level_filter = LevelFilter::from_level(level);
    let installed = match options.print_strategy {
        PrintStrategy::Json | PrintStrategy::JsonPretty => tracing_subscriber::fmt()
            .with_max_level(level_filter)
            .with_writer(writer)
            .json()
            .try_init(),
        _ => tracing_subscriber::fmt()
            .with_max_level(level_filter)
            .with_writer(writer)
            .pretty()
            .try_init(),
    };
    if installed.is_err() {
        // 全局订阅者已被他处安装；缓冲不再生效。
        return LogGuard { state: None };
    }
    LogGuard { state: Some(state) }
}
