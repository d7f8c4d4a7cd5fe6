// ==========================================
// 考勤对账引擎 - 考勤记录仓储
// ==========================================
// 职责: attendance_record 的读取、原子提交、人工裁定
// 红线: 更新一律按 version 比较交换, 不使用全局锁
// 红线: 记录写入与打卡回链在同一事务内完成
// ==========================================

use crate::domain::attendance::{AttendanceRecord, DaySlots, HoursBreakdown, ManualAdjustment};
use crate::domain::punch::GroupKey;
use crate::domain::types::AttendanceStatus;
use crate::engine::ports::{AttendanceStore, CommitReceipt, GroupCommit};
use crate::repository::decode::{
    conversion_error, fmt_date, fmt_time, now_string, optional_datetime, optional_time,
    required_date, required_datetime,
};
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use std::sync::{Arc, Mutex};

const RECORD_COLUMNS: &str = r#"record_id, employee_id, work_date,
       entry_time, exit_time, entry2_time, exit2_time,
       worked_secs, lunch_secs, regular_secs,
       recargo25_secs, suplementario50_secs, extraordinario100_secs, night_secs,
       status, manual_override, notes, modified_by, modified_at, config_version,
       version, created_at, updated_at, deleted_at"#;

// ==========================================
// AttendanceRecordRepository - 考勤记录仓储
// ==========================================
pub struct AttendanceRecordRepository {
    conn: Arc<Mutex<Connection>>,
}

impl AttendanceRecordRepository {
    /// 创建新的AttendanceRecordRepository实例
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 按 record_id 查询 (含已软删除)
    pub fn find_by_id(&self, record_id: &str) -> RepositoryResult<Option<AttendanceRecord>> {
        let conn = self.get_conn()?;
        Self::find_by_id_with(&conn, record_id)
    }

    /// 查询区间内的未删除记录
    pub fn list_by_range(
        &self,
        employee_id: Option<&str>,
        from: NaiveDate,
        to: NaiveDate,
    ) -> RepositoryResult<Vec<AttendanceRecord>> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(&format!(
            r#"SELECT {} FROM attendance_record
               WHERE deleted_at IS NULL
                 AND work_date BETWEEN ?1 AND ?2
                 AND (?3 IS NULL OR employee_id = ?3)
               ORDER BY employee_id, work_date"#,
            RECORD_COLUMNS
        ))?;
        let records = stmt
            .query_map(params![fmt_date(from), fmt_date(to), employee_id], map_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(records)
    }

    /// 统计 (员工, 日期) 的未删除记录数
    pub fn count_active(&self, key: &GroupKey) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM attendance_record WHERE employee_id = ? AND work_date = ? AND deleted_at IS NULL",
            params![&key.employee_id, fmt_date(key.work_date)],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// 软删除记录 (审计动作)
    pub fn soft_delete(&self, record_id: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            "UPDATE attendance_record SET deleted_at = ?, updated_at = ? WHERE record_id = ? AND deleted_at IS NULL",
            params![now_string(), now_string(), record_id],
        )?;

        if affected == 0 {
            return Err(RepositoryError::NotFound {
                entity: "AttendanceRecord".to_string(),
                id: record_id.to_string(),
            });
        }
        Ok(())
    }

    // ===== 内部辅助 =====

    fn find_by_id_with(conn: &Connection, record_id: &str) -> RepositoryResult<Option<AttendanceRecord>> {
        let record = conn
            .query_row(
                &format!("SELECT {} FROM attendance_record WHERE record_id = ?", RECORD_COLUMNS),
                params![record_id],
                map_row,
            )
            .optional()?;
        Ok(record)
    }

    fn find_active_with(conn: &Connection, key: &GroupKey) -> RepositoryResult<Option<AttendanceRecord>> {
        let record = conn
            .query_row(
                &format!(
                    "SELECT {} FROM attendance_record WHERE employee_id = ? AND work_date = ? AND deleted_at IS NULL",
                    RECORD_COLUMNS
                ),
                params![&key.employee_id, fmt_date(key.work_date)],
                map_row,
            )
            .optional()?;
        Ok(record)
    }

    fn insert_with(
        tx: &Transaction,
        record_id: &str,
        key: &GroupKey,
        slots: &DaySlots,
        hours: &HoursBreakdown,
        status: AttendanceStatus,
        notes: Option<&str>,
        config_version: Option<i64>,
    ) -> RepositoryResult<()> {
        let now = now_string();
        tx.execute(
            r#"INSERT INTO attendance_record (
                record_id, employee_id, work_date,
                entry_time, exit_time, entry2_time, exit2_time,
                worked_secs, lunch_secs, regular_secs,
                recargo25_secs, suplementario50_secs, extraordinario100_secs, night_secs,
                status, manual_override, notes, config_version,
                version, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?, 1, ?, ?)"#,
            params![
                record_id,
                &key.employee_id,
                fmt_date(key.work_date),
                slots.entry.map(fmt_time),
                slots.exit.map(fmt_time),
                slots.entry2.map(fmt_time),
                slots.exit2.map(fmt_time),
                hours.worked_secs,
                hours.lunch_secs,
                hours.regular_secs,
                hours.recargo25_secs,
                hours.suplementario50_secs,
                hours.extraordinario100_secs,
                hours.night_secs,
                status.to_db_str(),
                notes,
                config_version,
                &now,
                &now,
            ],
        )?;
        Ok(())
    }

    /// 0 行受影响时区分"版本冲突""已被删除"与"记录不存在"
    fn version_mismatch(conn: &Connection, record_id: &str, expected: i32) -> RepositoryError {
        let actual: Result<Option<(i32, Option<String>)>, _> = conn
            .query_row(
                "SELECT version, deleted_at FROM attendance_record WHERE record_id = ?",
                params![record_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional();

        match actual {
            Ok(Some((_, Some(_)))) => RepositoryError::ConcurrentlyDeleted {
                record_id: record_id.to_string(),
            },
            Ok(Some((actual, None))) => RepositoryError::OptimisticLockFailure {
                record_id: record_id.to_string(),
                expected,
                actual,
            },
            Ok(None) => RepositoryError::NotFound {
                entity: "AttendanceRecord".to_string(),
                id: record_id.to_string(),
            },
            Err(e) => e.into(),
        }
    }

    fn require_record(conn: &Connection, record_id: &str) -> RepositoryResult<AttendanceRecord> {
        Self::find_by_id_with(conn, record_id)?.ok_or_else(|| RepositoryError::NotFound {
            entity: "AttendanceRecord".to_string(),
            id: record_id.to_string(),
        })
    }
}

// ==========================================
// AttendanceStore Trait 实现
// ==========================================
impl AttendanceStore for AttendanceRecordRepository {
    fn find_active(&self, key: &GroupKey) -> RepositoryResult<Option<AttendanceRecord>> {
        let conn = self.get_conn()?;
        Self::find_active_with(&conn, key)
    }

    fn find_stale_pending(
        &self,
        employee_id: Option<&str>,
        from: NaiveDate,
        to: NaiveDate,
        today: NaiveDate,
    ) -> RepositoryResult<Vec<GroupKey>> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(
            r#"SELECT employee_id, work_date FROM attendance_record
               WHERE deleted_at IS NULL AND status = ?1
                 AND work_date BETWEEN ?2 AND ?3
                 AND work_date < ?4
                 AND (?5 IS NULL OR employee_id = ?5)
               ORDER BY employee_id, work_date"#,
        )?;
        let keys = stmt
            .query_map(
                params![
                    AttendanceStatus::Pending.to_db_str(),
                    fmt_date(from),
                    fmt_date(to),
                    fmt_date(today),
                    employee_id,
                ],
                |row| {
                    Ok(GroupKey {
                        employee_id: row.get(0)?,
                        work_date: required_date(row, 1)?,
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(keys)
    }

    /// 原子提交单个分组
    ///
    /// # 并发控制
    /// - 新建: 部分唯一索引保证同一 (员工, 日期) 只有一条未删除记录
    /// - 更新: `WHERE version = ?` 比较交换, 成功后 version + 1
    /// - 仅回链: 版本号仍需匹配, 保证回链基于最新记录
    fn commit_group(&self, commit: &GroupCommit) -> RepositoryResult<CommitReceipt> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let derived = &commit.derived;

        let version = match commit.expected_version {
            None => {
                Self::insert_with(
                    &tx,
                    &commit.record_id,
                    &commit.key,
                    &derived.slots,
                    &derived.hours,
                    derived.status,
                    derived.notes.as_deref(),
                    derived.config_version,
                )?;
                1
            }
            Some(expected) if commit.write_record => {
                let affected = tx.execute(
                    r#"UPDATE attendance_record
                       SET entry_time = ?, exit_time = ?, entry2_time = ?, exit2_time = ?,
                           worked_secs = ?, lunch_secs = ?, regular_secs = ?,
                           recargo25_secs = ?, suplementario50_secs = ?,
                           extraordinario100_secs = ?, night_secs = ?,
                           status = ?, notes = ?, config_version = ?,
                           version = version + 1, updated_at = ?
                       WHERE record_id = ? AND version = ? AND deleted_at IS NULL"#,
                    params![
                        derived.slots.entry.map(fmt_time),
                        derived.slots.exit.map(fmt_time),
                        derived.slots.entry2.map(fmt_time),
                        derived.slots.exit2.map(fmt_time),
                        derived.hours.worked_secs,
                        derived.hours.lunch_secs,
                        derived.hours.regular_secs,
                        derived.hours.recargo25_secs,
                        derived.hours.suplementario50_secs,
                        derived.hours.extraordinario100_secs,
                        derived.hours.night_secs,
                        derived.status.to_db_str(),
                        &derived.notes,
                        derived.config_version,
                        now_string(),
                        &commit.record_id,
                        expected,
                    ],
                )?;

                if affected == 0 {
                    return Err(Self::version_mismatch(&tx, &commit.record_id, expected));
                }
                expected + 1
            }
            Some(expected) => {
                let actual: Option<i32> = tx
                    .query_row(
                        "SELECT version FROM attendance_record WHERE record_id = ? AND deleted_at IS NULL",
                        params![&commit.record_id],
                        |row| row.get(0),
                    )
                    .optional()?;
                if actual != Some(expected) {
                    return Err(Self::version_mismatch(&tx, &commit.record_id, expected));
                }
                expected
            }
        };

        // 回链打卡: 回指一经写入不可改写
        let mut linked_punches = 0;
        for link in &commit.punch_links {
            linked_punches += tx.execute(
                r#"UPDATE punch_event
                   SET processed = 1,
                       effective = ?,
                       attendance_record_id = COALESCE(attendance_record_id, ?)
                   WHERE punch_id = ? AND deleted_at IS NULL
                     AND (attendance_record_id IS NULL OR attendance_record_id = ?)"#,
                params![link.effective, &commit.record_id, &link.punch_id, &commit.record_id],
            )?;
        }

        // 隔离畸形打卡: 不计入计算, 保持未处理
        for punch_id in &commit.quarantined {
            tx.execute(
                "UPDATE punch_event SET effective = 0 WHERE punch_id = ? AND processed = 0",
                params![punch_id],
            )?;
        }

        tx.commit()?;

        Ok(CommitReceipt {
            record_id: commit.record_id.clone(),
            version,
            linked_punches,
        })
    }

    /// 升级为人工复核
    ///
    /// 说明: 复核优先于并发推导, 不做版本比较; 工时清零, 不臆造结果
    fn escalate_to_review(&self, key: &GroupKey, note: &str) -> RepositoryResult<AttendanceRecord> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let record_id = match Self::find_active_with(&tx, key)? {
            Some(existing) => {
                tx.execute(
                    r#"UPDATE attendance_record
                       SET status = ?, notes = ?,
                           worked_secs = 0, lunch_secs = 0, regular_secs = 0,
                           recargo25_secs = 0, suplementario50_secs = 0,
                           extraordinario100_secs = 0, night_secs = 0,
                           version = version + 1, updated_at = ?
                       WHERE record_id = ?"#,
                    params![
                        AttendanceStatus::UnderReview.to_db_str(),
                        note,
                        now_string(),
                        &existing.record_id,
                    ],
                )?;
                existing.record_id
            }
            None => {
                let record_id = uuid::Uuid::new_v4().to_string();
                Self::insert_with(
                    &tx,
                    &record_id,
                    key,
                    &DaySlots::default(),
                    &HoursBreakdown::default(),
                    AttendanceStatus::UnderReview,
                    Some(note),
                    None,
                )?;
                record_id
            }
        };

        let record = Self::require_record(&tx, &record_id)?;
        tx.commit()?;
        Ok(record)
    }

    fn apply_manual_adjustment(
        &self,
        adjustment: &ManualAdjustment,
        hours: &HoursBreakdown,
    ) -> RepositoryResult<AttendanceRecord> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = now_string();

        let affected = tx.execute(
            r#"UPDATE attendance_record
               SET entry_time = ?, exit_time = ?, entry2_time = ?, exit2_time = ?,
                   worked_secs = ?, lunch_secs = ?, regular_secs = ?,
                   recargo25_secs = ?, suplementario50_secs = ?,
                   extraordinario100_secs = ?, night_secs = ?,
                   status = ?, notes = ?, manual_override = 1,
                   modified_by = ?, modified_at = ?,
                   version = version + 1, updated_at = ?
               WHERE record_id = ? AND version = ? AND deleted_at IS NULL"#,
            params![
                adjustment.slots.entry.map(fmt_time),
                adjustment.slots.exit.map(fmt_time),
                adjustment.slots.entry2.map(fmt_time),
                adjustment.slots.exit2.map(fmt_time),
                hours.worked_secs,
                hours.lunch_secs,
                hours.regular_secs,
                hours.recargo25_secs,
                hours.suplementario50_secs,
                hours.extraordinario100_secs,
                hours.night_secs,
                adjustment.status.to_db_str(),
                &adjustment.notes,
                &adjustment.modified_by,
                &now,
                &now,
                &adjustment.record_id,
                adjustment.expected_version,
            ],
        )?;

        if affected == 0 {
            return Err(Self::version_mismatch(
                &tx,
                &adjustment.record_id,
                adjustment.expected_version,
            ));
        }

        let record = Self::require_record(&tx, &adjustment.record_id)?;
        tx.commit()?;
        Ok(record)
    }

    fn release_review(
        &self,
        record_id: &str,
        expected_version: i32,
        actor: &str,
    ) -> RepositoryResult<AttendanceRecord> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = now_string();

        let affected = tx.execute(
            r#"UPDATE attendance_record
               SET manual_override = 0, status = ?,
                   worked_secs = 0, lunch_secs = 0, regular_secs = 0,
                   recargo25_secs = 0, suplementario50_secs = 0,
                   extraordinario100_secs = 0, night_secs = 0,
                   modified_by = ?, modified_at = ?,
                   version = version + 1, updated_at = ?
               WHERE record_id = ? AND version = ? AND deleted_at IS NULL"#,
            params![
                AttendanceStatus::Inconsistent.to_db_str(),
                actor,
                &now,
                &now,
                record_id,
                expected_version,
            ],
        )?;

        if affected == 0 {
            return Err(Self::version_mismatch(&tx, record_id, expected_version));
        }

        let record = Self::require_record(&tx, record_id)?;
        tx.commit()?;
        Ok(record)
    }
}

/// 行映射 (持久化边界的唯一解码入口)
fn map_row(row: &rusqlite::Row) -> rusqlite::Result<AttendanceRecord> {
    let status_str: String = row.get(14)?;
    let status = AttendanceStatus::from_str(&status_str)
        .ok_or_else(|| conversion_error(14, &status_str, "AttendanceStatus"))?;

    Ok(AttendanceRecord {
        record_id: row.get(0)?,
        employee_id: row.get(1)?,
        work_date: required_date(row, 2)?,
        slots: DaySlots {
            entry: optional_time(row, 3)?,
            exit: optional_time(row, 4)?,
            entry2: optional_time(row, 5)?,
            exit2: optional_time(row, 6)?,
        },
        hours: HoursBreakdown {
            worked_secs: row.get(7)?,
            lunch_secs: row.get(8)?,
            regular_secs: row.get(9)?,
            recargo25_secs: row.get(10)?,
            suplementario50_secs: row.get(11)?,
            extraordinario100_secs: row.get(12)?,
            night_secs: row.get(13)?,
        },
        status,
        manual_override: row.get(15)?,
        notes: row.get(16)?,
        modified_by: row.get(17)?,
        modified_at: optional_datetime(row, 18)?,
        config_version: row.get(19)?,
        version: row.get(20)?,
        created_at: required_datetime(row, 21)?,
        updated_at: required_datetime(row, 22)?,
        deleted_at: optional_datetime(row, 23)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ensure_schema;
    use crate::engine::ports::DerivedRecord;
    use chrono::NaiveTime;

    fn setup() -> AttendanceRecordRepository {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        AttendanceRecordRepository::new(Arc::new(Mutex::new(conn)))
    }

    fn key() -> GroupKey {
        GroupKey::new("E1", NaiveDate::from_ymd_opt(2024, 3, 1).unwrap())
    }

    fn commit(expected_version: Option<i32>, status: AttendanceStatus) -> GroupCommit {
        GroupCommit {
            key: key(),
            record_id: "R1".to_string(),
            expected_version,
            write_record: true,
            derived: DerivedRecord {
                slots: DaySlots {
                    entry: NaiveTime::from_hms_opt(8, 0, 0),
                    ..DaySlots::default()
                },
                hours: HoursBreakdown::default(),
                status,
                notes: None,
                config_version: Some(1),
            },
            punch_links: Vec::new(),
            quarantined: Vec::new(),
        }
    }

    #[test]
    fn test_commit_create_then_update_bumps_version() {
        let repo = setup();

        let receipt = repo.commit_group(&commit(None, AttendanceStatus::Pending)).unwrap();
        assert_eq!(receipt.version, 1);

        let receipt = repo.commit_group(&commit(Some(1), AttendanceStatus::Inconsistent)).unwrap();
        assert_eq!(receipt.version, 2);

        let record = repo.find_active(&key()).unwrap().unwrap();
        assert_eq!(record.status, AttendanceStatus::Inconsistent);
        assert_eq!(record.version, 2);
        assert_eq!(record.slots.entry, NaiveTime::from_hms_opt(8, 0, 0));
    }

    #[test]
    fn test_stale_version_is_rejected() {
        let repo = setup();
        repo.commit_group(&commit(None, AttendanceStatus::Pending)).unwrap();
        repo.commit_group(&commit(Some(1), AttendanceStatus::Complete)).unwrap();

        let err = repo
            .commit_group(&commit(Some(1), AttendanceStatus::Inconsistent))
            .unwrap_err();
        match err {
            RepositoryError::OptimisticLockFailure { expected, actual, .. } => {
                assert_eq!(expected, 1);
                assert_eq!(actual, 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_update_of_deleted_record_is_a_conflict() {
        let repo = setup();
        repo.commit_group(&commit(None, AttendanceStatus::Pending)).unwrap();
        repo.soft_delete("R1").unwrap();

        let err = repo
            .commit_group(&commit(Some(1), AttendanceStatus::Complete))
            .unwrap_err();
        assert!(matches!(err, RepositoryError::ConcurrentlyDeleted { .. }));
        assert!(err.is_conflict());
    }

    #[test]
    fn test_second_create_for_same_day_conflicts() {
        let repo = setup();
        repo.commit_group(&commit(None, AttendanceStatus::Pending)).unwrap();

        let mut again = commit(None, AttendanceStatus::Pending);
        again.record_id = "R2".to_string();
        let err = repo.commit_group(&again).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(repo.count_active(&key()).unwrap(), 1);
    }

    #[test]
    fn test_escalate_creates_or_updates_review_record() {
        let repo = setup();

        let created = repo.escalate_to_review(&key(), "冲突重试耗尽").unwrap();
        assert_eq!(created.status, AttendanceStatus::UnderReview);
        assert_eq!(created.version, 1);

        let updated = repo.escalate_to_review(&key(), "再次升级").unwrap();
        assert_eq!(updated.record_id, created.record_id);
        assert_eq!(updated.version, 2);
        assert_eq!(updated.notes.as_deref(), Some("再次升级"));
    }

    #[test]
    fn test_manual_adjustment_and_release() {
        let repo = setup();
        repo.commit_group(&commit(None, AttendanceStatus::Inconsistent)).unwrap();

        let adjustment = ManualAdjustment {
            record_id: "R1".to_string(),
            expected_version: 1,
            slots: DaySlots {
                entry: NaiveTime::from_hms_opt(8, 0, 0),
                exit: NaiveTime::from_hms_opt(16, 0, 0),
                ..DaySlots::default()
            },
            status: AttendanceStatus::Complete,
            notes: Some("补登下班卡".to_string()),
            modified_by: "supervisor".to_string(),
        };
        let hours = HoursBreakdown {
            worked_secs: 8 * 3600,
            regular_secs: 8 * 3600,
            ..HoursBreakdown::default()
        };

        let adjusted = repo.apply_manual_adjustment(&adjustment, &hours).unwrap();
        assert!(adjusted.manual_override);
        assert_eq!(adjusted.modified_by.as_deref(), Some("supervisor"));
        assert!(adjusted.modified_at.is_some());
        assert_eq!(adjusted.version, 2);

        // 旧版本号的裁定被拒绝
        assert!(repo.apply_manual_adjustment(&adjustment, &hours).unwrap_err().is_conflict());

        let released = repo.release_review("R1", 2, "supervisor").unwrap();
        assert!(!released.manual_override);
        assert_eq!(released.status, AttendanceStatus::Inconsistent);
        assert_eq!(released.hours, HoursBreakdown::default());
    }

    #[test]
    fn test_soft_deleted_record_frees_the_day() {
        let repo = setup();
        repo.commit_group(&commit(None, AttendanceStatus::Pending)).unwrap();
        repo.soft_delete("R1").unwrap();

        assert!(repo.find_active(&key()).unwrap().is_none());
        assert!(repo.find_by_id("R1").unwrap().unwrap().deleted_at.is_some());

        let mut again = commit(None, AttendanceStatus::Pending);
        again.record_id = "R2".to_string();
        repo.commit_group(&again).unwrap();
        assert_eq!(repo.count_active(&key()).unwrap(), 1);
    }
}
