// ==========================================
// 考勤对账引擎 - 分组性能统计
// ==========================================
// 职责: 统计每个对账分组的耗时与 SQL 语句数, 记录慢 SQL
// 机制: SQLite profile 回调 (每条语句执行完成触发一次) + 线程局部计数
//       分组在单个 blocking 线程内从读取执行到提交, 计数不串组
// 开关: ATTENDANCE_PERF_SQL / ATTENDANCE_SLOW_SQL_MS
// ==========================================

use rusqlite::Connection;
use serde::Serialize;
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

const SLOW_SQL_LOG_CHARS: usize = 420;

static PERF_SQL_ENABLED: AtomicBool = AtomicBool::new(false);
static SLOW_SQL_THRESHOLD_MS: AtomicU64 = AtomicU64::new(0);

thread_local! {
    static GUARD_DEPTH: Cell<u32> = Cell::new(0);
    static SQL_COUNT: Cell<u64> = Cell::new(0);
    static SLOW_SQL_COUNT: Cell<u64> = Cell::new(0);
}

// ==========================================
// PerfSettings - 统计开关
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerfSettings {
    pub enabled: bool,
    pub slow_sql_ms: u64,
}

impl PerfSettings {
    /// 从环境变量读取
    ///
    /// - Debug 构建默认开启, Release 默认关闭
    /// - 慢 SQL 阈值默认 Debug 50ms / Release 200ms
    pub fn from_env() -> Self {
        Self::resolve(
            std::env::var("ATTENDANCE_PERF_SQL").ok().as_deref(),
            std::env::var("ATTENDANCE_SLOW_SQL_MS").ok().as_deref(),
        )
    }

    fn resolve(enabled: Option<&str>, slow_ms: Option<&str>) -> Self {
        let enabled = match enabled {
            Some(v) => is_true(v),
            None => cfg!(debug_assertions),
        };
        let slow_sql_ms = slow_ms
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(if cfg!(debug_assertions) { 50 } else { 200 });

        Self { enabled, slow_sql_ms }
    }
}

fn is_true(v: &str) -> bool {
    matches!(
        v.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

/// 截断 SQL 用于日志 (按字符截断, 不切断多字节字符)
fn truncate_sql(sql: &str, max_chars: usize) -> String {
    let flat = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}…", &flat[..cut]),
        None => flat,
    }
}

/// 在连接上安装 SQL 计数与慢 SQL 日志
pub fn install_sqlite_tracing(conn: &mut Connection) {
    install_with(conn, PerfSettings::from_env());
}

/// 按指定开关安装 (测试与嵌入方使用)
pub fn install_with(conn: &mut Connection, settings: PerfSettings) {
    PERF_SQL_ENABLED.store(settings.enabled, Ordering::Relaxed);
    SLOW_SQL_THRESHOLD_MS.store(settings.slow_sql_ms, Ordering::Relaxed);

    if !settings.enabled {
        // 复用连接时清理残留回调
        conn.profile(None);
        return;
    }

    // trace 与 profile 共用同一 SQLite 钩子, 只注册 profile
    conn.profile(Some(on_sql_profile));
}

fn guard_active() -> bool {
    GUARD_DEPTH.with(|d| d.get() > 0)
}

fn on_sql_profile(sql: &str, duration: Duration) {
    if !PERF_SQL_ENABLED.load(Ordering::Relaxed) {
        return;
    }
    let counted = guard_active();
    if counted {
        SQL_COUNT.with(|c| c.set(c.get().saturating_add(1)));
    }

    let ms = duration.as_millis() as u64;
    let threshold = SLOW_SQL_THRESHOLD_MS.load(Ordering::Relaxed);
    if threshold == 0 || ms < threshold {
        return;
    }

    tracing::warn!(
        target: "slow_sql",
        duration_ms = ms,
        sql = %truncate_sql(sql, SLOW_SQL_LOG_CHARS),
        "慢 SQL"
    );
    if counted {
        SLOW_SQL_COUNT.with(|c| c.set(c.get().saturating_add(1)));
    }
}

// ==========================================
// PerfSample - 单次统计结果
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PerfSample {
    pub op: &'static str,
    pub label: Option<String>,
    pub elapsed_ms: u64,
    pub sql_count: u64,
    pub slow_sql_count: u64,
}

// ==========================================
// PerfGuard - 作用域统计
// ==========================================
// 析构时以 target "perf" 输出一条统计日志
//
// ```ignore
// let _perf = PerfGuard::new("reconcile_group").with_label(key.to_string());
// ```
pub struct PerfGuard {
    op: &'static str,
    label: Option<String>,
    start: Instant,
    sql_start: u64,
    slow_sql_start: u64,
}

impl PerfGuard {
    pub fn new(op: &'static str) -> Self {
        GUARD_DEPTH.with(|d| d.set(d.get().saturating_add(1)));
        Self {
            op,
            label: None,
            start: Instant::now(),
            sql_start: SQL_COUNT.with(|c| c.get()),
            slow_sql_start: SLOW_SQL_COUNT.with(|c| c.get()),
        }
    }

    /// 附加业务标签（对账分组键 / 批次号）
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// 截至目前的统计
    pub fn sample(&self) -> PerfSample {
        PerfSample {
            op: self.op,
            label: self.label.clone(),
            elapsed_ms: self.start.elapsed().as_millis() as u64,
            sql_count: SQL_COUNT.with(|c| c.get()).saturating_sub(self.sql_start),
            slow_sql_count: SLOW_SQL_COUNT
                .with(|c| c.get())
                .saturating_sub(self.slow_sql_start),
        }
    }
}

impl Drop for PerfGuard {
    fn drop(&mut self) {
        let sample = self.sample();
        tracing::debug!(
            target: "perf",
            op = sample.op,
            label = sample.label.as_deref().unwrap_or(""),
            elapsed_ms = sample.elapsed_ms,
            sql_count = sample.sql_count,
            slow_sql_count = sample.slow_sql_count,
            "done"
        );

        GUARD_DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    }
}
