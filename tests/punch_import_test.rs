// ==========================================
// 打卡 CSV 导入集成测试
// ==========================================
// 测试目标: 文件导入 → 对账 的端到端链路
// ==========================================

#[path = "test_helpers.rs"]
mod test_helpers;

use attendance_reconciler::domain::punch::GroupKey;
use attendance_reconciler::domain::types::AttendanceStatus;
use attendance_reconciler::engine::{AttendanceStore, ReconcileRequest};
use attendance_reconciler::importer::{ImportError, PunchCsvImporter};
use attendance_reconciler::logging;
use std::io::Write;
use tempfile::Builder;
use test_helpers::*;

const EXPORT: &str = "punch_id,employee_id,device_id,date,time,movement,verification,confidence,failed_attempts
P1,E1,DEV-1,2024-03-14,08:00:00,IN,FINGERPRINT,0.98,0
P2,E1,DEV-1,2024-03-14,08:00:40,IN,FINGERPRINT,0.97,1
P3,E1,DEV-1,2024-03-14,12:00:00,OUT,FACE,,
P4,E1,DEV-1,2024-03-14,13:00:00,IN,FACE,,
P5,E1,DEV-1,2024-03-14,17:00:00,OUT,CARD,,
P6,,DEV-1,2024-03-14,09:00:00,IN,CARD,,
";

fn write_csv(content: &str) -> tempfile::NamedTempFile {
    let mut file = Builder::new().suffix(".csv").tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[tokio::test]
async fn test_import_then_reconcile() {
    let env = setup_env();
    let importer = PunchCsvImporter::new(env.punches.clone(), logging::component_span("import-test"));
    let file = write_csv(EXPORT);

    let summary = importer.import_file(file.path()).unwrap();
    assert_eq!(summary.rows_read, 6);
    assert_eq!(summary.inserted, 6);
    assert_eq!(summary.skipped_existing, 0);

    // 重复导入同一文件不产生新打卡
    let again = importer.import_file(file.path()).unwrap();
    assert_eq!(again.inserted, 0);
    assert_eq!(again.skipped_existing, 6);

    let report = env
        .coordinator()
        .reconcile(ReconcileRequest::incremental(None, yesterday(), yesterday()).with_today(today()))
        .await
        .unwrap();
    assert!(report.malformed.iter().any(|m| m.punch_id == "P6"));

    let record = env
        .records
        .find_active(&GroupKey::new("E1", yesterday()))
        .unwrap()
        .unwrap();
    assert_eq!(record.status, AttendanceStatus::Complete);
    assert_eq!(record.hours.worked_secs, 8 * 3600);
    assert!(!env.punches.find_processing_state("P2").unwrap().unwrap().effective);
}

#[test]
fn test_import_rejects_missing_file_and_wrong_extension() {
    let env = setup_env();
    let importer = PunchCsvImporter::new(env.punches.clone(), logging::component_span("import-test"));

    let err = importer.import_file("/nonexistent/punches.csv").unwrap_err();
    assert!(matches!(err, ImportError::FileNotFound(_)));

    let mut txt = Builder::new().suffix(".txt").tempfile().unwrap();
    txt.write_all(EXPORT.as_bytes()).unwrap();
    let err = importer.import_file(txt.path()).unwrap_err();
    assert!(matches!(err, ImportError::UnsupportedFormat(ref ext) if ext == "txt"));
}

#[test]
fn test_bad_row_rejects_whole_file() {
    let env = setup_env();
    let importer = PunchCsvImporter::new(env.punches.clone(), logging::component_span("import-test"));

    let data = "punch_id,employee_id,device_id,date,time,movement,failed_attempts\n\
                P1,E1,DEV-1,2024-03-14,08:00:00,IN,0\n\
                P2,E1,DEV-1,2024-03-14,17:00:00,OUT,many\n";
    let err = importer.import_reader(data.as_bytes()).unwrap_err();
    assert!(matches!(err, ImportError::TypeConversionError { row: 3, .. }));
    assert!(env.punches.find_processing_state("P1").unwrap().is_none());
}
