// ==========================================
// 考勤对账引擎 - 对账批次日志仓储
// ==========================================
// 对齐: reconcile_run_log 表
// 红线: 每次批次运行必须留痕
// ==========================================

use crate::domain::run_log::ReconcileRunLog;
use crate::engine::ports::RunLogSink;
use crate::repository::decode::{fmt_date, fmt_datetime, required_date, required_datetime};
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};

// ==========================================
// RunLogRepository - 批次日志仓储
// ==========================================
// 红线: Repository 不做业务逻辑,只做数据映射
pub struct RunLogRepository {
    conn: Arc<Mutex<Connection>>,
}

impl RunLogRepository {
    /// 创建新的批次日志仓储
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 插入批次日志
    ///
    /// # 返回
    /// - `Ok(run_id)`: 成功插入
    pub fn insert(&self, log: &ReconcileRunLog) -> RepositoryResult<String> {
        let conn = self.get_conn()?;

        conn.execute(
            r#"
            INSERT INTO reconcile_run_log (
                run_id, actor, mode, employee_id, date_from, date_to, config_version,
                updated_count, unchanged_count, escalated_count, failed_count, skipped_count,
                aborted_reason, config_snapshot_json, started_at, finished_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                log.run_id,
                log.actor,
                log.mode,
                log.employee_id,
                fmt_date(log.date_from),
                fmt_date(log.date_to),
                log.config_version,
                log.updated_count,
                log.unchanged_count,
                log.escalated_count,
                log.failed_count,
                log.skipped_count,
                log.aborted_reason,
                log.config_snapshot_json.as_ref().map(|v| v.to_string()),
                fmt_datetime(log.started_at),
                fmt_datetime(log.finished_at),
            ],
        )?;

        Ok(log.run_id.clone())
    }

    /// 查询最近的批次日志
    pub fn find_recent(&self, limit: i64) -> RepositoryResult<Vec<ReconcileRunLog>> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(
            r#"
            SELECT run_id, actor, mode, employee_id, date_from, date_to, config_version,
                   updated_count, unchanged_count, escalated_count, failed_count, skipped_count,
                   aborted_reason, config_snapshot_json, started_at, finished_at
            FROM reconcile_run_log
            ORDER BY started_at DESC, run_id DESC
            LIMIT ?
            "#,
        )?;

        let logs = stmt
            .query_map(params![limit], map_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(logs)
    }
}

impl RunLogSink for RunLogRepository {
    fn record_run(&self, log: &ReconcileRunLog) -> RepositoryResult<()> {
        self.insert(log).map(|_| ())
    }
}

fn map_row(row: &rusqlite::Row) -> rusqlite::Result<ReconcileRunLog> {
    let snapshot: Option<String> = row.get(13)?;

    Ok(ReconcileRunLog {
        run_id: row.get(0)?,
        actor: row.get(1)?,
        mode: row.get(2)?,
        employee_id: row.get(3)?,
        date_from: required_date(row, 4)?,
        date_to: required_date(row, 5)?,
        config_version: row.get(6)?,
        updated_count: row.get(7)?,
        unchanged_count: row.get(8)?,
        escalated_count: row.get(9)?,
        failed_count: row.get(10)?,
        skipped_count: row.get(11)?,
        aborted_reason: row.get(12)?,
        config_snapshot_json: snapshot.and_then(|s| serde_json::from_str(&s).ok()),
        started_at: required_datetime(row, 14)?,
        finished_at: required_datetime(row, 15)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ensure_schema;
    use chrono::NaiveDate;
    use serde_json::json;

    #[test]
    fn test_insert_and_find_recent() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        let repo = RunLogRepository::new(Arc::new(Mutex::new(conn)));

        let started = NaiveDate::from_ymd_opt(2024, 3, 2)
            .unwrap()
            .and_hms_opt(1, 0, 0)
            .unwrap();
        let log = ReconcileRunLog {
            run_id: "RUN-1".to_string(),
            actor: "scheduler".to_string(),
            mode: "INCREMENTAL".to_string(),
            employee_id: None,
            date_from: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            date_to: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            config_version: 3,
            updated_count: 10,
            unchanged_count: 2,
            escalated_count: 1,
            failed_count: 0,
            skipped_count: 0,
            aborted_reason: None,
            config_snapshot_json: Some(json!({"regular_daily_cap_minutes": "480"})),
            started_at: started,
            finished_at: started,
        };

        repo.insert(&log).unwrap();
        let logs = repo.find_recent(5).unwrap();

        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].config_version, 3);
        assert_eq!(logs[0].updated_count, 10);
        assert_eq!(
            logs[0].config_snapshot_json,
            Some(json!({"regular_daily_cap_minutes": "480"}))
        );
    }
}
