// ==========================================
// 考勤对账引擎 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为
// - 统一 busy_timeout（持久化调用的超时, 超时视为可重试失败）
// - 统一建表脚本（幂等）
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 建表脚本
///
/// 说明：
/// - punch_event 的员工/设备/日期/时间列允许为空，畸形数据在仓储解码时识别并隔离
/// - attendance_record 通过部分唯一索引保证 (employee_id, work_date) 只有一条未删除记录
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS config_kv (
    scope_id TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (scope_id, key)
);

CREATE TABLE IF NOT EXISTS attendance_record (
    record_id TEXT PRIMARY KEY,
    employee_id TEXT NOT NULL,
    work_date TEXT NOT NULL,
    entry_time TEXT,
    exit_time TEXT,
    entry2_time TEXT,
    exit2_time TEXT,
    worked_secs INTEGER NOT NULL DEFAULT 0,
    lunch_secs INTEGER NOT NULL DEFAULT 0,
    regular_secs INTEGER NOT NULL DEFAULT 0,
    recargo25_secs INTEGER NOT NULL DEFAULT 0,
    suplementario50_secs INTEGER NOT NULL DEFAULT 0,
    extraordinario100_secs INTEGER NOT NULL DEFAULT 0,
    night_secs INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL,
    manual_override INTEGER NOT NULL DEFAULT 0,
    notes TEXT,
    modified_by TEXT,
    modified_at TEXT,
    config_version INTEGER,
    version INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS uq_attendance_record_active
    ON attendance_record (employee_id, work_date)
    WHERE deleted_at IS NULL;

CREATE TABLE IF NOT EXISTS punch_event (
    punch_id TEXT PRIMARY KEY,
    employee_id TEXT,
    device_id TEXT,
    punch_date TEXT,
    punch_time TEXT,
    movement TEXT,
    verification TEXT,
    confidence REAL,
    failed_attempts INTEGER NOT NULL DEFAULT 0,
    processed INTEGER NOT NULL DEFAULT 0,
    effective INTEGER NOT NULL DEFAULT 1,
    attendance_record_id TEXT REFERENCES attendance_record(record_id),
    ingested_at TEXT NOT NULL DEFAULT (datetime('now')),
    deleted_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_punch_event_employee_date
    ON punch_event (employee_id, punch_date);
CREATE INDEX IF NOT EXISTS idx_punch_event_device_date
    ON punch_event (device_id, punch_date);
CREATE INDEX IF NOT EXISTS idx_punch_event_pending
    ON punch_event (processed, effective, punch_date);

CREATE TABLE IF NOT EXISTS reconcile_run_log (
    run_id TEXT PRIMARY KEY,
    actor TEXT NOT NULL,
    mode TEXT NOT NULL,
    employee_id TEXT,
    date_from TEXT NOT NULL,
    date_to TEXT NOT NULL,
    config_version INTEGER NOT NULL,
    updated_count INTEGER NOT NULL DEFAULT 0,
    unchanged_count INTEGER NOT NULL DEFAULT 0,
    escalated_count INTEGER NOT NULL DEFAULT 0,
    failed_count INTEGER NOT NULL DEFAULT 0,
    skipped_count INTEGER NOT NULL DEFAULT 0,
    aborted_reason TEXT,
    config_snapshot_json TEXT,
    started_at TEXT NOT NULL,
    finished_at TEXT NOT NULL
);
"#;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要“每个连接”单独开启
/// - busy_timeout 需要“每个连接”单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let mut conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    crate::perf::install_sqlite_tracing(&mut conn);
    Ok(conn)
}

/// 幂等建表并登记 schema_version
pub fn ensure_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;
    Ok(())
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> = conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

/// 获取默认数据库路径
///
/// # 返回
/// - 环境变量 ATTENDANCE_DB_PATH 优先
/// - 否则: 用户数据目录/attendance-reconciler/attendance.db (开发构建使用 -dev 目录)
pub fn get_default_db_path() -> String {
    use std::path::PathBuf;

    if let Ok(path) = std::env::var("ATTENDANCE_DB_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./attendance.db");

    if let Some(data_dir) = dirs::data_dir() {
        let dir = if cfg!(debug_assertions) {
            data_dir.join("attendance-reconciler-dev")
        } else {
            data_dir.join("attendance-reconciler")
        };

        // 目录创建失败时回退到当前目录
        if std::fs::create_dir_all(&dir).is_ok() {
            path = dir.join("attendance.db");
        }
    }

    path.to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(read_schema_version(&conn).unwrap(), None);

        ensure_schema(&conn).unwrap();
        ensure_schema(&conn).unwrap();

        assert_eq!(read_schema_version(&conn).unwrap(), Some(CURRENT_SCHEMA_VERSION));
    }

    #[test]
    fn test_get_default_db_path() {
        let path = get_default_db_path();
        assert!(!path.is_empty());
        if std::env::var("ATTENDANCE_DB_PATH").is_err() {
            assert!(path.ends_with(".db"));
        }
    }
}
