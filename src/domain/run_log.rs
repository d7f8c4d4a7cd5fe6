// ==========================================
// 考勤对账引擎 - 对账批次日志
// ==========================================
// 红线: 每次批次运行必须留痕
// 用途: 审计追踪, 配置追溯
// 对齐: reconcile_run_log 表
// ==========================================

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

// ==========================================
// ReconcileRunLog - 批次日志
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileRunLog {
    pub run_id: String,
    pub actor: String,                 // 触发方 (scheduler / cli / 用户)
    pub mode: String,                  // INCREMENTAL / FULL
    pub employee_id: Option<String>,   // 指定员工 (None = 全部)
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
    pub config_version: i64,

    // ===== 结果统计 =====
    pub updated_count: i32,
    pub unchanged_count: i32,
    pub escalated_count: i32,
    pub failed_count: i32,
    pub skipped_count: i32,
    pub aborted_reason: Option<String>,

    // ===== 快照 =====
    pub config_snapshot_json: Option<JsonValue>,
    pub started_at: NaiveDateTime,
    pub finished_at: NaiveDateTime,
}
