// ==========================================
// 考勤对账引擎 - 日志系统
// ==========================================
// 使用 tracing 和 tracing-subscriber, 日志统一写 stderr (stdout 留给命令输出)
// 组件不依赖全局日志状态: 由调用方注入 Span, 事件以 parent 方式挂载
// ==========================================

use tracing::Span;
use tracing_subscriber::{fmt, EnvFilter};

/// 日志输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    /// 定时批次运行时由采集端解析
    Json,
}

impl LogFormat {
    /// 解析 ATTENDANCE_LOG_FORMAT 取值, 未知取值按文本处理
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_lowercase()) {
            Some(v) if v == "json" => LogFormat::Json,
            _ => LogFormat::Text,
        }
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// 初始化日志系统
///
/// # 环境变量
/// - RUST_LOG: 日志级别过滤器（默认: info）
///   例如: RUST_LOG=debug 或 RUST_LOG=attendance_reconciler=trace,perf=debug
/// - ATTENDANCE_LOG_FORMAT: text（默认）/ json
///
/// # 示例
/// ```no_run
/// use attendance_reconciler::logging;
/// logging::init();
/// ```
pub fn init() {
    let format = LogFormat::parse(std::env::var("ATTENDANCE_LOG_FORMAT").ok().as_deref());

    let result = match format {
        LogFormat::Text => fmt()
            .with_env_filter(env_filter())
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_line_number(true)
            .try_init(),
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(env_filter())
            .with_writer(std::io::stderr)
            .with_current_span(true)
            .try_init(),
    };

    if let Err(e) = result {
        eprintln!("日志系统已初始化, 忽略重复初始化: {}", e);
    }
}

/// 初始化测试环境的日志系统
///
/// 使用更详细的日志级别，便于调试
pub fn init_test() {
    let _ = fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}

/// 为组件创建默认日志 Span
///
/// 调用方可以改为传入自己的 Span（例如带上调度任务号）
pub fn component_span(component: &'static str) -> Span {
    tracing::info_span!("component", name = component)
}
