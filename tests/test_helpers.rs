// ==========================================
// 测试辅助函数
// ==========================================
// 职责: 提供测试所需的数据库初始化、配置写入、打卡数据构造
// ==========================================
#![allow(dead_code)]

use attendance_reconciler::config::{config_keys, ConfigManager};
use attendance_reconciler::db::{ensure_schema, open_sqlite_connection};
use attendance_reconciler::domain::punch::RawPunchRow;
use attendance_reconciler::engine::ReconciliationCoordinator;
use attendance_reconciler::logging;
use attendance_reconciler::repository::{
    AttendanceRecordRepository, PunchEventRepository, RunLogRepository,
};
use chrono::{NaiveDate, NaiveTime};
use rusqlite::Connection;
use std::error::Error;
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;

/// 创建临时测试数据库并初始化 schema
///
/// # 返回
/// - NamedTempFile: 临时数据库文件（需要保持存活）
/// - String: 数据库文件路径
pub fn create_test_db() -> Result<(NamedTempFile, String), Box<dyn Error>> {
    let temp_file = NamedTempFile::new()?;
    let db_path = temp_file
        .path()
        .to_str()
        .ok_or("临时文件路径不是 UTF-8")?
        .to_string();

    let conn = open_sqlite_connection(&db_path)?;
    ensure_schema(&conn)?;

    Ok((temp_file, db_path))
}

/// 测试环境: 共享一个连接的全部仓储
pub struct TestEnv {
    pub temp_file: NamedTempFile,
    pub db_path: String,
    pub conn: Arc<Mutex<Connection>>,
    pub punches: Arc<PunchEventRepository>,
    pub records: Arc<AttendanceRecordRepository>,
    pub run_logs: Arc<RunLogRepository>,
    pub config: Arc<ConfigManager>,
}

impl TestEnv {
    /// 创建对账协调器 (带批次日志)
    pub fn coordinator(&self) -> ReconciliationCoordinator<ConfigManager> {
        ReconciliationCoordinator::new(
            self.punches.clone(),
            self.records.clone(),
            self.config.clone(),
            logging::component_span("coordinator-test"),
        )
        .with_run_log(self.run_logs.clone())
    }

    /// 写入一组打卡
    pub fn insert_punches(&self, rows: &[RawPunchRow]) {
        self.punches.insert_raw_batch(rows).unwrap();
    }

    pub fn set_config(&self, key: &str, value: &str) {
        self.config.set_global_config_value(key, value).unwrap();
    }
}

/// 创建完整测试环境 (已写入基础配置)
pub fn setup_env() -> TestEnv {
    logging::init_test();

    let (temp_file, db_path) = create_test_db().unwrap();
    let conn = Arc::new(Mutex::new(open_sqlite_connection(&db_path).unwrap()));

    let env = TestEnv {
        temp_file,
        db_path,
        punches: Arc::new(PunchEventRepository::new(conn.clone())),
        records: Arc::new(AttendanceRecordRepository::new(conn.clone())),
        run_logs: Arc::new(RunLogRepository::new(conn.clone())),
        config: Arc::new(ConfigManager::from_connection(conn.clone()).unwrap()),
        conn,
    };
    seed_base_config(&env.config);
    env
}

/// 基础配置
///
/// - 正常工时上限 8h
/// - 加班档位: 前 2h 25%, 再 2h 50%, 其余 100%
/// - 夜班窗口 19:00 - 06:00
pub fn seed_base_config(manager: &ConfigManager) {
    let entries = [
        (config_keys::CONFIG_VERSION, "1"),
        (config_keys::DEDUP_THRESHOLD_SECS, "60"),
        (config_keys::REGULAR_DAILY_CAP_MINUTES, "480"),
        (
            config_keys::OVERTIME_TIERS,
            r#"[{"up_to_minutes":120,"bucket":"RECARGO_25"},{"up_to_minutes":240,"bucket":"SUPLEMENTARIO_50"},{"up_to_minutes":null,"bucket":"EXTRAORDINARIO_100"}]"#,
        ),
        (config_keys::NIGHT_WINDOW_START, "19:00"),
        (config_keys::NIGHT_WINDOW_END, "06:00"),
        (config_keys::GAP_THRESHOLD_MINUTES, "120"),
        (config_keys::MAX_CONFLICT_RETRIES, "3"),
        (config_keys::WORKER_COUNT, "2"),
    ];
    for (key, value) in entries {
        manager.set_global_config_value(key, value).unwrap();
    }
}

// ==========================================
// 数据构造
// ==========================================

/// 批次"当日" (测试中固定, 工作日取其之前的日期)
pub fn today() -> NaiveDate {
    d(2024, 3, 15)
}

pub fn yesterday() -> NaiveDate {
    d(2024, 3, 14)
}

pub fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

pub fn t(h: u32, m: u32, s: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, s).unwrap()
}

/// 构造一条打卡 (设备 DEV-1, 指纹验证)
pub fn punch(id: &str, employee: &str, date: NaiveDate, time: &str, movement: &str) -> RawPunchRow {
    punch_on(id, employee, "DEV-1", date, time, movement)
}

pub fn punch_on(
    id: &str,
    employee: &str,
    device: &str,
    date: NaiveDate,
    time: &str,
    movement: &str,
) -> RawPunchRow {
    RawPunchRow {
        punch_id: id.to_string(),
        employee_id: Some(employee.to_string()),
        device_id: Some(device.to_string()),
        punch_date: Some(date.format("%Y-%m-%d").to_string()),
        punch_time: Some(time.to_string()),
        movement: Some(movement.to_string()),
        verification: Some("FINGERPRINT".to_string()),
        confidence: Some(0.99),
        failed_attempts: Some(0),
    }
}

/// 标准一天: 08:00 入, 12:00 出, 13:00 入, 17:00 出
pub fn standard_day(prefix: &str, employee: &str, date: NaiveDate) -> Vec<RawPunchRow> {
    vec![
        punch(&format!("{}-1", prefix), employee, date, "08:00:00", "IN"),
        punch(&format!("{}-2", prefix), employee, date, "12:00:00", "OUT"),
        punch(&format!("{}-3", prefix), employee, date, "13:00:00", "IN"),
        punch(&format!("{}-4", prefix), employee, date, "17:00:00", "OUT"),
    ]
}
