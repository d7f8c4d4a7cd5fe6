// ==========================================
// 考勤对账引擎 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、写入
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use crate::config::config_reader::ReconcileConfigReader;
use crate::config::reconcile_config::{
    ConfigError, OvertimeTier, OvertimeTierSpec, ReconcileConfig, TimeWindow,
};
use crate::db::open_sqlite_connection;
use async_trait::async_trait;
use chrono::NaiveTime;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{json, Value as JsonValue};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> Result<Self, ConfigError> {
        let conn = open_sqlite_connection(db_path).map_err(storage)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：为保证连接行为一致，会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Result<Self, ConfigError> {
        {
            let conn_guard = conn
                .lock()
                .map_err(|e| ConfigError::Storage(format!("锁获取失败: {}", e)))?;
            crate::db::configure_sqlite_connection(&conn_guard).map_err(storage)?;
        }

        Ok(Self { conn })
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    fn get_config_value(&self, key: &str) -> Result<Option<String>, ConfigError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| ConfigError::Storage(format!("锁获取失败: {}", e)))?;

        conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .map_err(storage)
    }

    /// 读取 global scope 的配置值（公开方法，供其他模块复用）
    pub fn get_global_config_value(&self, key: &str) -> Result<Option<String>, ConfigError> {
        self.get_config_value(key)
    }

    /// 写入 global scope 配置值 (UPSERT)
    pub fn set_global_config_value(&self, key: &str, value: &str) -> Result<(), ConfigError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| ConfigError::Storage(format!("锁获取失败: {}", e)))?;

        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value, updated_at)
             VALUES ('global', ?1, ?2, datetime('now'))
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value],
        )
        .map_err(storage)?;

        Ok(())
    }

    /// 获取所有配置的快照（JSON格式）
    ///
    /// # 用途
    /// - 在批次日志中记录当次使用的原始配置
    pub fn get_config_snapshot(&self) -> Result<JsonValue, ConfigError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| ConfigError::Storage(format!("锁获取失败: {}", e)))?;

        let mut stmt = conn
            .prepare("SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key")
            .map_err(storage)?;

        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .map_err(storage)?;

        let mut config_map: BTreeMap<String, String> = BTreeMap::new();
        for row in rows {
            let (key, value) = row.map_err(storage)?;
            config_map.insert(key, value);
        }

        Ok(json!(config_map))
    }

    // ===== 解析辅助 =====

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.get_config_value(key)?
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingKey(key.to_string()))
    }

    fn parse_i64(key: &str, raw: &str) -> Result<i64, ConfigError> {
        raw.trim().parse::<i64>().map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })
    }

    fn optional_i64(&self, key: &str, default: i64) -> Result<i64, ConfigError> {
        match self.get_config_value(key)? {
            Some(raw) if !raw.trim().is_empty() => Self::parse_i64(key, &raw),
            _ => Ok(default),
        }
    }

    fn parse_time(key: &str, raw: &str) -> Result<NaiveTime, ConfigError> {
        let s = raw.trim();
        NaiveTime::parse_from_str(s, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("期望 HH:MM, 实际 {} ({})", s, e),
            })
    }

    fn parse_tiers(raw: &str) -> Result<Vec<OvertimeTier>, ConfigError> {
        let specs: Vec<OvertimeTierSpec> =
            serde_json::from_str(raw).map_err(|e| ConfigError::InvalidValue {
                key: config_keys::OVERTIME_TIERS.to_string(),
                message: e.to_string(),
            })?;
        Ok(specs.into_iter().map(OvertimeTier::from).collect())
    }

    /// 读取活动窗口（起止需同时配置）
    fn activity_window(&self) -> Result<Option<TimeWindow>, ConfigError> {
        let start = self
            .get_config_value(config_keys::ACTIVITY_WINDOW_START)?
            .filter(|v| !v.trim().is_empty());
        let end = self
            .get_config_value(config_keys::ACTIVITY_WINDOW_END)?
            .filter(|v| !v.trim().is_empty());

        match (start, end) {
            (Some(s), Some(e)) => Ok(Some(TimeWindow::new(
                Self::parse_time(config_keys::ACTIVITY_WINDOW_START, &s)?,
                Self::parse_time(config_keys::ACTIVITY_WINDOW_END, &e)?,
            ))),
            (None, None) => Ok(None),
            _ => Err(ConfigError::InvalidValue {
                key: "activity_window".to_string(),
                message: "activity_window_start 与 activity_window_end 必须同时配置".to_string(),
            }),
        }
    }

    /// 从 config_kv 组装对账配置（同步版本）
    pub fn read_reconcile_config(&self) -> Result<ReconcileConfig, ConfigError> {
        let config_version = self.optional_i64(config_keys::CONFIG_VERSION, 1)?;
        let dedup_threshold_secs = self.optional_i64(
            config_keys::DEDUP_THRESHOLD_SECS,
            ReconcileConfig::DEFAULT_DEDUP_THRESHOLD_SECS,
        )?;

        // 劳动法阈值: 必填, 不提供默认值
        let cap_minutes = Self::parse_i64(
            config_keys::REGULAR_DAILY_CAP_MINUTES,
            &self.required(config_keys::REGULAR_DAILY_CAP_MINUTES)?,
        )?;
        let overtime_tiers = Self::parse_tiers(&self.required(config_keys::OVERTIME_TIERS)?)?;
        let night_window = TimeWindow::new(
            Self::parse_time(
                config_keys::NIGHT_WINDOW_START,
                &self.required(config_keys::NIGHT_WINDOW_START)?,
            )?,
            Self::parse_time(
                config_keys::NIGHT_WINDOW_END,
                &self.required(config_keys::NIGHT_WINDOW_END)?,
            )?,
        );

        let gap_threshold_secs = self.optional_i64(
            config_keys::GAP_THRESHOLD_MINUTES,
            ReconcileConfig::DEFAULT_GAP_THRESHOLD_SECS / 60,
        )? * 60;
        let max_conflict_retries = self.optional_i64(
            config_keys::MAX_CONFLICT_RETRIES,
            ReconcileConfig::DEFAULT_MAX_CONFLICT_RETRIES as i64,
        )?;
        let worker_count = self.optional_i64(
            config_keys::WORKER_COUNT,
            ReconcileConfig::DEFAULT_WORKER_COUNT as i64,
        )?;

        let config = ReconcileConfig {
            config_version,
            dedup_threshold_secs,
            regular_daily_cap_secs: cap_minutes * 60,
            overtime_tiers,
            night_window,
            gap_threshold_secs,
            activity_window: self.activity_window()?,
            max_conflict_retries: max_conflict_retries.max(0) as u32,
            worker_count: worker_count.max(0) as usize,
        };

        config.validate()?;

        tracing::debug!(
            config_version = config.config_version,
            tiers = config.overtime_tiers.len(),
            "对账配置加载完成"
        );

        Ok(config)
    }
}

fn storage(err: rusqlite::Error) -> ConfigError {
    ConfigError::Storage(err.to_string())
}

// ==========================================
// ReconcileConfigReader Trait 实现
// ==========================================
#[async_trait]
impl ReconcileConfigReader for ConfigManager {
    async fn load_reconcile_config(&self) -> Result<ReconcileConfig, ConfigError> {
        self.read_reconcile_config()
    }

    async fn config_snapshot(&self) -> Result<JsonValue, ConfigError> {
        self.get_config_snapshot()
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 版本
    pub const CONFIG_VERSION: &str = "config_version";

    // 去重
    pub const DEDUP_THRESHOLD_SECS: &str = "dedup_threshold_secs";

    // 工时规则 (必填)
    pub const REGULAR_DAILY_CAP_MINUTES: &str = "regular_daily_cap_minutes";
    pub const OVERTIME_TIERS: &str = "overtime_tiers"; // JSON 数组
    pub const NIGHT_WINDOW_START: &str = "night_window_start";
    pub const NIGHT_WINDOW_END: &str = "night_window_end";

    // 设备缺口
    pub const GAP_THRESHOLD_MINUTES: &str = "gap_threshold_minutes";
    pub const ACTIVITY_WINDOW_START: &str = "activity_window_start";
    pub const ACTIVITY_WINDOW_END: &str = "activity_window_end";

    // 批次执行
    pub const MAX_CONFLICT_RETRIES: &str = "max_conflict_retries";
    pub const WORKER_COUNT: &str = "worker_count";
}
