// ==========================================
// Repository 层集成测试
// ==========================================
// 测试目标: 在文件数据库上验证跨连接的原子提交、回链不可改写、忙超时分类
// ==========================================

#[path = "test_helpers.rs"]
mod test_helpers;

use attendance_reconciler::db::open_sqlite_connection;
use attendance_reconciler::domain::attendance::{DaySlots, HoursBreakdown};
use attendance_reconciler::domain::punch::GroupKey;
use attendance_reconciler::domain::types::AttendanceStatus;
use attendance_reconciler::engine::{
    AttendanceStore, DerivedRecord, GroupCommit, PunchLink, PunchSource,
};
use attendance_reconciler::repository::{
    AttendanceRecordRepository, PunchEventRepository, RepositoryError,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use test_helpers::*;

fn commit_for(key: &GroupKey, record_id: &str, expected_version: Option<i32>, punch_ids: &[&str]) -> GroupCommit {
    GroupCommit {
        key: key.clone(),
        record_id: record_id.to_string(),
        expected_version,
        write_record: true,
        derived: DerivedRecord {
            slots: DaySlots {
                entry: Some(t(8, 0, 0)),
                exit: Some(t(17, 0, 0)),
                entry2: None,
                exit2: None,
            },
            hours: HoursBreakdown {
                worked_secs: 9 * 3600,
                regular_secs: 8 * 3600,
                recargo25_secs: 3600,
                ..HoursBreakdown::default()
            },
            status: AttendanceStatus::Complete,
            notes: None,
            config_version: Some(1),
        },
        punch_links: punch_ids
            .iter()
            .map(|id| PunchLink {
                punch_id: id.to_string(),
                effective: true,
            })
            .collect(),
        quarantined: Vec::new(),
    }
}

fn open_repos(db_path: &str) -> (PunchEventRepository, AttendanceRecordRepository) {
    let conn = Arc::new(Mutex::new(open_sqlite_connection(db_path).unwrap()));
    (
        PunchEventRepository::new(conn.clone()),
        AttendanceRecordRepository::new(conn),
    )
}

#[test]
fn test_commit_is_visible_from_other_connection() {
    let (_temp_file, db_path) = create_test_db().unwrap();
    let (punches_a, records_a) = open_repos(&db_path);
    let (punches_b, records_b) = open_repos(&db_path);

    punches_a
        .insert_raw_batch(&[
            punch("P1", "E1", yesterday(), "08:00:00", "IN"),
            punch("P2", "E1", yesterday(), "17:00:00", "OUT"),
        ])
        .unwrap();
    let key = GroupKey::new("E1", yesterday());
    assert_eq!(
        punches_b.find_pending_groups(None, yesterday(), yesterday()).unwrap(),
        vec![key.clone()]
    );

    let receipt = records_a.commit_group(&commit_for(&key, "R1", None, &["P1", "P2"])).unwrap();
    assert_eq!(receipt.version, 1);
    assert_eq!(receipt.linked_punches, 2);

    let record = records_b.find_active(&key).unwrap().unwrap();
    assert_eq!(record.record_id, "R1");
    assert!(record.hours.is_conserved());
    assert!(punches_b.find_pending_groups(None, yesterday(), yesterday()).unwrap().is_empty());
    assert_eq!(punches_b.list_by_record("R1").unwrap().len(), 2);
}

#[test]
fn test_linked_punch_is_never_relinked() {
    let (_temp_file, db_path) = create_test_db().unwrap();
    let (punches, records) = open_repos(&db_path);
    punches
        .insert_raw(&punch("P1", "E1", yesterday(), "08:00:00", "IN"))
        .unwrap();

    let key = GroupKey::new("E1", yesterday());
    records.commit_group(&commit_for(&key, "R1", None, &["P1"])).unwrap();
    records.soft_delete("R1").unwrap();

    // 软删除释放了 (员工, 日期), 但打卡的回指保持不变
    let receipt = records.commit_group(&commit_for(&key, "R2", None, &["P1"])).unwrap();
    assert_eq!(receipt.linked_punches, 0);
    let state = punches.find_processing_state("P1").unwrap().unwrap();
    assert_eq!(state.attendance_record_id.as_deref(), Some("R1"));
}

#[test]
fn test_busy_database_is_retryable_timeout() {
    let (_temp_file, db_path) = create_test_db().unwrap();

    let holder = open_sqlite_connection(&db_path).unwrap();
    holder.execute_batch("BEGIN IMMEDIATE;").unwrap();

    let blocked = open_sqlite_connection(&db_path).unwrap();
    blocked.busy_timeout(Duration::from_millis(50)).unwrap();
    let records = AttendanceRecordRepository::new(Arc::new(Mutex::new(blocked)));

    let key = GroupKey::new("E1", yesterday());
    let err = records.commit_group(&commit_for(&key, "R1", None, &[])).unwrap_err();
    assert!(matches!(err, RepositoryError::Timeout(_)), "{:?}", err);
    assert!(err.is_retryable());
    assert!(!err.is_conflict());

    holder.execute_batch("ROLLBACK;").unwrap();
    assert!(records.commit_group(&commit_for(&key, "R1", None, &[])).is_ok());
}

#[test]
fn test_update_requires_matching_version_across_connections() {
    let (_temp_file, db_path) = create_test_db().unwrap();
    let (_, records_a) = open_repos(&db_path);
    let (_, records_b) = open_repos(&db_path);
    let key = GroupKey::new("E1", yesterday());

    records_a.commit_group(&commit_for(&key, "R1", None, &[])).unwrap();

    // 两个连接基于同一版本更新, 只有一个成功
    assert!(records_a.commit_group(&commit_for(&key, "R1", Some(1), &[])).is_ok());
    let err = records_b.commit_group(&commit_for(&key, "R1", Some(1), &[])).unwrap_err();
    assert!(err.is_conflict());

    assert_eq!(records_b.find_active(&key).unwrap().unwrap().version, 2);
}
