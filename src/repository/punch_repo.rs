// ==========================================
// 考勤对账引擎 - 打卡事件仓储
// ==========================================
// 职责: punch_event 表的写入、查询、类型化解码
// 红线: 打卡事实字段入库后不可修改, 仅 processed/effective/回指 可变
// 红线: 畸形行不拒收, 解码时识别为 MalformedPunch
// ==========================================

use crate::domain::punch::{GroupKey, GroupPunches, MalformedPunch, PunchEvent, RawPunchRow};
use crate::domain::types::{MovementKind, VerificationKind};
use crate::engine::ports::PunchSource;
use crate::repository::decode::{fmt_date, parse_date, parse_datetime, parse_time};
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

const PUNCH_COLUMNS: &str = r#"punch_id, employee_id, device_id, punch_date, punch_time,
       movement, verification, confidence, failed_attempts,
       processed, effective, attendance_record_id, deleted_at"#;

/// 可归入分组的行: 员工非空 且 日期按 YYYY-MM-DD 存储
const GROUPABLE_FILTER: &str = r#"employee_id IS NOT NULL AND trim(employee_id) <> ''
       AND punch_date IS NOT NULL AND date(punch_date) IS punch_date"#;

// ==========================================
// PunchProcessingState - 打卡处理状态
// ==========================================
// 畸形打卡无法解码为 PunchEvent, 通过该结构观察其隔离状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PunchProcessingState {
    pub processed: bool,
    pub effective: bool,
    pub attendance_record_id: Option<String>,
}

// ==========================================
// PunchEventRepository - 打卡事件仓储
// ==========================================
pub struct PunchEventRepository {
    conn: Arc<Mutex<Connection>>,
}

impl PunchEventRepository {
    /// 创建新的PunchEventRepository实例
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 写入
    // ==========================================

    /// 原样写入一条原始打卡
    ///
    /// # 返回
    /// - true: 新写入
    /// - false: punch_id 已存在 (设备重复同步), 忽略
    pub fn insert_raw(&self, row: &RawPunchRow) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let affected = Self::insert_raw_with(&conn, row)?;
        Ok(affected > 0)
    }

    /// 批量写入原始打卡 (单事务)
    ///
    /// # 返回
    /// 实际新写入的行数
    pub fn insert_raw_batch(&self, rows: &[RawPunchRow]) -> RepositoryResult<usize> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let mut inserted = 0;
        for row in rows {
            inserted += Self::insert_raw_with(&tx, row)?;
        }

        tx.commit()?;
        Ok(inserted)
    }

    /// 写入已类型化的打卡
    pub fn insert(&self, punch: &PunchEvent) -> RepositoryResult<bool> {
        self.insert_raw(&RawPunchRow::from(punch))
    }

    fn insert_raw_with(conn: &Connection, row: &RawPunchRow) -> rusqlite::Result<usize> {
        conn.execute(
            r#"INSERT OR IGNORE INTO punch_event (
                punch_id, employee_id, device_id, punch_date, punch_time,
                movement, verification, confidence, failed_attempts
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            params![
                &row.punch_id,
                &row.employee_id,
                &row.device_id,
                &row.punch_date,
                &row.punch_time,
                &row.movement,
                &row.verification,
                &row.confidence,
                row.failed_attempts.unwrap_or(0),
            ],
        )
    }

    /// 软删除打卡 (审计动作)
    pub fn soft_delete(&self, punch_id: &str) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            "UPDATE punch_event SET deleted_at = datetime('now') WHERE punch_id = ? AND deleted_at IS NULL",
            params![punch_id],
        )?;
        Ok(affected > 0)
    }

    // ==========================================
    // 查询
    // ==========================================

    /// 按 punch_id 查询 (畸形行返回 DecodeError)
    pub fn find_by_id(&self, punch_id: &str) -> RepositoryResult<Option<PunchEvent>> {
        let conn = self.get_conn()?;

        let raw = conn
            .query_row(
                &format!("SELECT {} FROM punch_event WHERE punch_id = ?", PUNCH_COLUMNS),
                params![punch_id],
                PunchRowRaw::from_row,
            )
            .optional()?;

        match raw {
            Some(raw) => raw
                .into_event()
                .map(Some)
                .map_err(|m| RepositoryError::DecodeError {
                    field: "punch_event".to_string(),
                    message: format!("{}: {}", m.punch_id, m.reason),
                }),
            None => Ok(None),
        }
    }

    /// 查询处理状态 (含畸形行)
    pub fn find_processing_state(&self, punch_id: &str) -> RepositoryResult<Option<PunchProcessingState>> {
        let conn = self.get_conn()?;

        let state = conn
            .query_row(
                "SELECT processed, effective, attendance_record_id FROM punch_event WHERE punch_id = ?",
                params![punch_id],
                |row| {
                    Ok(PunchProcessingState {
                        processed: row.get(0)?,
                        effective: row.get(1)?,
                        attendance_record_id: row.get(2)?,
                    })
                },
            )
            .optional()?;

        Ok(state)
    }

    /// 查询被某条考勤记录消费的打卡
    pub fn list_by_record(&self, record_id: &str) -> RepositoryResult<Vec<PunchEvent>> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM punch_event WHERE attendance_record_id = ? ORDER BY punch_time, punch_id",
            PUNCH_COLUMNS
        ))?;
        let raws = stmt
            .query_map(params![record_id], PunchRowRaw::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(raws.into_iter().filter_map(|r| r.into_event().ok()).collect())
    }

    fn query_group_keys(
        &self,
        pending_only: bool,
        employee_id: Option<&str>,
        from: NaiveDate,
        to: NaiveDate,
    ) -> RepositoryResult<Vec<GroupKey>> {
        let conn = self.get_conn()?;

        let pending_filter = if pending_only {
            "AND processed = 0 AND effective = 1"
        } else {
            ""
        };
        let sql = format!(
            r#"SELECT DISTINCT employee_id, punch_date
               FROM punch_event
               WHERE deleted_at IS NULL {}
                 AND {}
                 AND punch_date BETWEEN ?1 AND ?2
                 AND (?3 IS NULL OR employee_id = ?3)
               ORDER BY employee_id, punch_date"#,
            pending_filter, GROUPABLE_FILTER
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![fmt_date(from), fmt_date(to), employee_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut keys = Vec::with_capacity(rows.len());
        for (employee_id, date_str) in rows {
            let work_date = parse_date(&date_str).ok_or_else(|| RepositoryError::DecodeError {
                field: "punch_date".to_string(),
                message: date_str.clone(),
            })?;
            keys.push(GroupKey { employee_id, work_date });
        }
        Ok(keys)
    }
}

// ==========================================
// PunchSource Trait 实现
// ==========================================
impl PunchSource for PunchEventRepository {
    fn find_pending_groups(
        &self,
        employee_id: Option<&str>,
        from: NaiveDate,
        to: NaiveDate,
    ) -> RepositoryResult<Vec<GroupKey>> {
        self.query_group_keys(true, employee_id, from, to)
    }

    fn find_groups_in_range(
        &self,
        employee_id: Option<&str>,
        from: NaiveDate,
        to: NaiveDate,
    ) -> RepositoryResult<Vec<GroupKey>> {
        self.query_group_keys(false, employee_id, from, to)
    }

    fn load_group(&self, key: &GroupKey) -> RepositoryResult<GroupPunches> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(&format!(
            r#"SELECT {} FROM punch_event
               WHERE deleted_at IS NULL AND employee_id = ? AND punch_date = ?
               ORDER BY punch_time, punch_id"#,
            PUNCH_COLUMNS
        ))?;
        let raws = stmt
            .query_map(params![&key.employee_id, fmt_date(key.work_date)], PunchRowRaw::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        let mut group = GroupPunches::default();
        for raw in raws {
            match raw.into_event() {
                Ok(punch) => group.punches.push(punch),
                Err(malformed) => group.malformed.push(malformed),
            }
        }
        group.punches.sort_by(|a, b| {
            a.punch_time
                .cmp(&b.punch_time)
                .then_with(|| a.punch_id.cmp(&b.punch_id))
        });

        Ok(group)
    }

    fn load_device_day(&self, device_id: &str, date: NaiveDate) -> RepositoryResult<Vec<PunchEvent>> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(&format!(
            r#"SELECT {} FROM punch_event
               WHERE deleted_at IS NULL AND device_id = ? AND punch_date = ?"#,
            PUNCH_COLUMNS
        ))?;
        let raws = stmt
            .query_map(params![device_id, fmt_date(date)], PunchRowRaw::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        let mut punches: Vec<PunchEvent> = raws.into_iter().filter_map(|r| r.into_event().ok()).collect();
        punches.sort_by(|a, b| {
            a.punch_time
                .cmp(&b.punch_time)
                .then_with(|| a.punch_id.cmp(&b.punch_id))
        });
        Ok(punches)
    }

    fn list_devices_with_activity(&self, date: NaiveDate) -> RepositoryResult<Vec<String>> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(
            r#"SELECT DISTINCT device_id FROM punch_event
               WHERE deleted_at IS NULL AND punch_date = ?
                 AND device_id IS NOT NULL AND trim(device_id) <> ''
               ORDER BY device_id"#,
        )?;
        let devices = stmt
            .query_map(params![fmt_date(date)], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(devices)
    }

    fn find_orphans(&self) -> RepositoryResult<Vec<MalformedPunch>> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(&format!(
            r#"SELECT {} FROM punch_event
               WHERE deleted_at IS NULL AND processed = 0 AND effective = 1
                 AND NOT ({})
               ORDER BY punch_id"#,
            PUNCH_COLUMNS, GROUPABLE_FILTER
        ))?;
        let raws = stmt
            .query_map([], PunchRowRaw::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(raws.into_iter().map(PunchRowRaw::into_malformed).collect())
    }

    fn quarantine(&self, punch_ids: &[String]) -> RepositoryResult<usize> {
        if punch_ids.is_empty() {
            return Ok(0);
        }

        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let mut affected = 0;
        for punch_id in punch_ids {
            affected += tx.execute(
                "UPDATE punch_event SET effective = 0 WHERE punch_id = ? AND processed = 0",
                params![punch_id],
            )?;
        }

        tx.commit()?;
        Ok(affected)
    }
}

// ==========================================
// PunchRowRaw - 未解码的数据库行
// ==========================================
struct PunchRowRaw {
    punch_id: String,
    employee_id: Option<String>,
    device_id: Option<String>,
    punch_date: Option<String>,
    punch_time: Option<String>,
    movement: Option<String>,
    verification: Option<String>,
    confidence: Option<f64>,
    failed_attempts: i32,
    processed: bool,
    effective: bool,
    attendance_record_id: Option<String>,
    deleted_at: Option<String>,
}

impl PunchRowRaw {
    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            punch_id: row.get(0)?,
            employee_id: row.get(1)?,
            device_id: row.get(2)?,
            punch_date: row.get(3)?,
            punch_time: row.get(4)?,
            movement: row.get(5)?,
            verification: row.get(6)?,
            confidence: row.get(7)?,
            failed_attempts: row.get(8)?,
            processed: row.get(9)?,
            effective: row.get(10)?,
            attendance_record_id: row.get(11)?,
            deleted_at: row.get(12)?,
        })
    }

    fn non_blank(value: &Option<String>) -> Option<&str> {
        value.as_deref().filter(|s| !s.trim().is_empty())
    }

    /// 类型化解码; 失败时给出畸形诊断
    fn into_event(self) -> Result<PunchEvent, MalformedPunch> {
        let employee_id = Self::non_blank(&self.employee_id).map(str::to_string);
        let punch_date = self.punch_date.as_deref().and_then(parse_date);

        let reason = if employee_id.is_none() {
            Some("缺少员工ID".to_string())
        } else if Self::non_blank(&self.device_id).is_none() {
            Some("缺少设备ID".to_string())
        } else if punch_date.is_none() {
            Some(format!("日期缺失或格式非法: {:?}", self.punch_date))
        } else if self.punch_time.as_deref().and_then(parse_time).is_none() {
            Some(format!("时刻缺失或格式非法: {:?}", self.punch_time))
        } else if self.movement.as_deref().and_then(MovementKind::from_str).is_none() {
            Some(format!("未知动作类型: {:?}", self.movement))
        } else {
            None
        };

        match (reason, employee_id, punch_date) {
            (None, Some(employee_id), Some(punch_date)) => {
                let device_id = self.device_id.unwrap_or_default();
                let punch_time = self.punch_time.as_deref().and_then(parse_time);
                let movement = self.movement.as_deref().and_then(MovementKind::from_str);
                match (punch_time, movement) {
                    (Some(punch_time), Some(movement)) => Ok(PunchEvent {
                        punch_id: self.punch_id,
                        employee_id,
                        device_id,
                        punch_date,
                        punch_time,
                        movement,
                        verification: self
                            .verification
                            .as_deref()
                            .map(VerificationKind::from_str)
                            .unwrap_or(VerificationKind::Other),
                        confidence: self.confidence,
                        failed_attempts: self.failed_attempts,
                        processed: self.processed,
                        effective: self.effective,
                        attendance_record_id: self.attendance_record_id,
                        deleted_at: self.deleted_at.as_deref().and_then(parse_datetime),
                    }),
                    _ => Err(MalformedPunch {
                        punch_id: self.punch_id,
                        employee_id: Some(employee_id),
                        punch_date: Some(punch_date),
                        reason: "时刻或动作类型无法解码".to_string(),
                        quarantined: !self.effective,
                    }),
                }
            }
            (reason, employee_id, punch_date) => Err(MalformedPunch {
                punch_id: self.punch_id,
                employee_id,
                punch_date,
                reason: reason.unwrap_or_else(|| "字段无法解码".to_string()),
                quarantined: !self.effective,
            }),
        }
    }

    /// 孤立行一律按畸形处理 (日期虽可解析但未按规范格式存储时也无法归组)
    fn into_malformed(self) -> MalformedPunch {
        let raw_date = self.punch_date.clone();
        match self.into_event() {
            Err(malformed) => malformed,
            Ok(punch) => MalformedPunch {
                punch_id: punch.punch_id,
                employee_id: Some(punch.employee_id),
                punch_date: Some(punch.punch_date),
                reason: format!("日期未按 YYYY-MM-DD 存储: {:?}", raw_date),
                quarantined: !punch.effective,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ensure_schema;

    fn setup() -> PunchEventRepository {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        PunchEventRepository::new(Arc::new(Mutex::new(conn)))
    }

    fn raw(id: &str, emp: Option<&str>, date: &str, time: &str, movement: &str) -> RawPunchRow {
        RawPunchRow {
            punch_id: id.to_string(),
            employee_id: emp.map(str::to_string),
            device_id: Some("DEV-1".to_string()),
            punch_date: Some(date.to_string()),
            punch_time: Some(time.to_string()),
            movement: Some(movement.to_string()),
            verification: Some("FINGERPRINT".to_string()),
            confidence: Some(0.98),
            failed_attempts: None,
        }
    }

    #[test]
    fn test_insert_raw_ignores_existing_id() {
        let repo = setup();
        let row = raw("P1", Some("E1"), "2024-03-01", "08:00:00", "ENTRY");

        assert!(repo.insert_raw(&row).unwrap());
        assert!(!repo.insert_raw(&row).unwrap());
    }

    #[test]
    fn test_load_group_separates_malformed_rows() {
        let repo = setup();
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        repo.insert_raw(&raw("P1", Some("E1"), "2024-03-01", "08:00", "IN")).unwrap();
        repo.insert_raw(&raw("P2", Some("E1"), "2024-03-01", "xx:yy", "ENTRY")).unwrap();
        repo.insert_raw(&raw("P3", Some("E1"), "2024-03-01", "17:00:00", "BREAK")).unwrap();

        let group = repo.load_group(&GroupKey::new("E1", date)).unwrap();
        assert_eq!(group.punches.len(), 1);
        assert_eq!(group.punches[0].movement, MovementKind::Entry);
        assert_eq!(group.malformed.len(), 2);
        assert!(group.has_pending_work());
    }

    #[test]
    fn test_orphans_are_found_and_quarantined() {
        let repo = setup();
        repo.insert_raw(&raw("P1", None, "2024-03-01", "08:00:00", "ENTRY")).unwrap();
        repo.insert_raw(&raw("P2", Some("E1"), "01/03/2024", "08:00:00", "ENTRY")).unwrap();
        repo.insert_raw(&raw("P3", Some("E1"), "2024-03-01", "08:00:00", "ENTRY")).unwrap();

        let orphans = repo.find_orphans().unwrap();
        let ids: Vec<&str> = orphans.iter().map(|m| m.punch_id.as_str()).collect();
        assert_eq!(ids, vec!["P1", "P2"]);

        let ids: Vec<String> = orphans.into_iter().map(|m| m.punch_id).collect();
        assert_eq!(repo.quarantine(&ids).unwrap(), 2);
        assert!(repo.find_orphans().unwrap().is_empty());

        let state = repo.find_processing_state("P1").unwrap().unwrap();
        assert!(!state.processed);
        assert!(!state.effective);
    }

    #[test]
    fn test_pending_groups_respect_employee_filter() {
        let repo = setup();
        repo.insert_raw(&raw("P1", Some("E1"), "2024-03-01", "08:00:00", "ENTRY")).unwrap();
        repo.insert_raw(&raw("P2", Some("E2"), "2024-03-01", "08:00:00", "ENTRY")).unwrap();
        repo.insert_raw(&raw("P3", Some("E1"), "2024-03-05", "08:00:00", "ENTRY")).unwrap();

        let from = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let to = NaiveDate::from_ymd_opt(2024, 3, 2).unwrap();

        assert_eq!(repo.find_pending_groups(None, from, to).unwrap().len(), 2);
        let only_e1 = repo.find_pending_groups(Some("E1"), from, to).unwrap();
        assert_eq!(only_e1, vec![GroupKey::new("E1", from)]);
    }

    #[test]
    fn test_soft_deleted_punches_are_invisible() {
        let repo = setup();
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        repo.insert_raw(&raw("P1", Some("E1"), "2024-03-01", "08:00:00", "ENTRY")).unwrap();

        assert!(repo.soft_delete("P1").unwrap());
        assert!(repo.load_group(&GroupKey::new("E1", date)).unwrap().punches.is_empty());
        assert!(repo.load_device_day("DEV-1", date).unwrap().is_empty());
    }
}
