// ==========================================
// 考勤对账引擎 - 打卡 CSV 导入器
// ==========================================
// 列: punch_id, employee_id, device_id, date, time, movement,
//     verification, confidence, failed_attempts
// 规则: 空字段写 NULL; 已存在的 punch_id 跳过 (INSERT OR IGNORE)
// 红线: 整个文件在一个事务内写入, 任一行类型错误则整体拒绝
// ==========================================

use crate::domain::punch::RawPunchRow;
use crate::importer::error::{ImportError, ImportResult};
use crate::repository::PunchEventRepository;
use csv::{ReaderBuilder, StringRecord};
use serde::Serialize;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use tracing::Span;

const REQUIRED_COLUMNS: [&str; 6] = [
    "punch_id",
    "employee_id",
    "device_id",
    "date",
    "time",
    "movement",
];

/// 导入结果统计
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub rows_read: usize,
    pub inserted: usize,
    pub skipped_existing: usize,
}

pub struct PunchCsvImporter {
    repo: Arc<PunchEventRepository>,
    span: Span,
}

impl PunchCsvImporter {
    pub fn new(repo: Arc<PunchEventRepository>, span: Span) -> Self {
        Self { repo, span }
    }

    /// 导入 CSV 文件
    ///
    /// # 错误
    /// - 文件不存在 / 扩展名不是 .csv
    /// - 缺少必需列, punch_id 为空, confidence / failed_attempts 非数字
    pub fn import_file<P: AsRef<Path>>(&self, file_path: P) -> ImportResult<ImportSummary> {
        let path = file_path.as_ref();

        if !path.exists() {
            return Err(ImportError::FileNotFound(path.display().to_string()));
        }

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        if ext != "csv" {
            return Err(ImportError::UnsupportedFormat(ext));
        }

        let rows = parse_rows(File::open(path)?)?;
        self.write_rows(rows, &path.display().to_string())
    }

    /// 从任意 Reader 导入 (测试与管道输入使用)
    pub fn import_reader<R: std::io::Read>(&self, reader: R) -> ImportResult<ImportSummary> {
        let rows = parse_rows(reader)?;
        self.write_rows(rows, "<reader>")
    }

    fn write_rows(&self, rows: Vec<RawPunchRow>, source: &str) -> ImportResult<ImportSummary> {
        let rows_read = rows.len();
        let inserted = self.repo.insert_raw_batch(&rows)?;

        let summary = ImportSummary {
            rows_read,
            inserted,
            skipped_existing: rows_read - inserted,
        };

        tracing::info!(
            parent: &self.span,
            source,
            rows_read = summary.rows_read,
            inserted = summary.inserted,
            skipped = summary.skipped_existing,
            "打卡导入完成"
        );
        Ok(summary)
    }
}

// ==========================================
// CSV 解析
// ==========================================

fn parse_rows<R: std::io::Read>(reader: R) -> ImportResult<Vec<RawPunchRow>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true) // 允许行长度不一致
        .from_reader(reader);

    let columns: HashMap<String, usize> = reader
        .headers()?
        .iter()
        .enumerate()
        .map(|(idx, h)| (h.trim().to_lowercase(), idx))
        .collect();

    for required in REQUIRED_COLUMNS {
        if !columns.contains_key(required) {
            return Err(ImportError::MissingColumn(required.to_string()));
        }
    }

    let mut rows = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        let record = result?;
        // 表头占第 1 行
        let line = idx + 2;

        // 跳过完全空白的行
        if record.iter().all(|v| v.trim().is_empty()) {
            continue;
        }

        let field = |name: &str| cell(&record, &columns, name);

        let punch_id = field("punch_id").ok_or(ImportError::PrimaryKeyMissing(line))?;

        rows.push(RawPunchRow {
            punch_id,
            employee_id: field("employee_id"),
            device_id: field("device_id"),
            punch_date: field("date"),
            punch_time: field("time"),
            movement: field("movement"),
            verification: field("verification"),
            confidence: parse_number(field("confidence"), line, "confidence")?,
            failed_attempts: parse_number(field("failed_attempts"), line, "failed_attempts")?,
        });
    }

    Ok(rows)
}

fn cell(record: &StringRecord, columns: &HashMap<String, usize>, name: &str) -> Option<String> {
    columns
        .get(name)
        .and_then(|&idx| record.get(idx))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn parse_number<T: std::str::FromStr>(
    value: Option<String>,
    row: usize,
    field: &str,
) -> ImportResult<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match value {
        None => Ok(None),
        Some(v) => v
            .parse::<T>()
            .map(Some)
            .map_err(|e| ImportError::TypeConversionError {
                row,
                field: field.to_string(),
                message: format!("{}: {}", v, e),
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rows_maps_blank_fields_to_none() {
        let data = "punch_id,employee_id,device_id,date,time,movement,verification,confidence,failed_attempts\n\
                    P1,E1,D1,2024-03-01,08:00:00,IN,FACE,0.97,0\n\
                    P2,,D1,2024-03-01,,OUT,,,\n";
        let rows = parse_rows(data.as_bytes()).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].confidence, Some(0.97));
        assert_eq!(rows[0].failed_attempts, Some(0));
        assert_eq!(rows[1].employee_id, None);
        assert_eq!(rows[1].punch_time, None);
        assert_eq!(rows[1].movement.as_deref(), Some("OUT"));
    }

    #[test]
    fn test_optional_columns_may_be_absent() {
        let data = "punch_id,employee_id,device_id,date,time,movement\n\
                    P1,E1,D1,2024-03-01,08:00,IN\n";
        let rows = parse_rows(data.as_bytes()).unwrap();
        assert_eq!(rows[0].verification, None);
        assert_eq!(rows[0].failed_attempts, None);
    }

    #[test]
    fn test_missing_required_column_is_rejected() {
        let data = "punch_id,employee_id,date,time,movement\nP1,E1,2024-03-01,08:00,IN\n";
        let err = parse_rows(data.as_bytes()).unwrap_err();
        assert!(matches!(err, ImportError::MissingColumn(c) if c == "device_id"));
    }

    #[test]
    fn test_blank_punch_id_reports_line() {
        let data = "punch_id,employee_id,device_id,date,time,movement\n\
                    P1,E1,D1,2024-03-01,08:00,IN\n\
                    ,E1,D1,2024-03-01,17:00,OUT\n";
        let err = parse_rows(data.as_bytes()).unwrap_err();
        assert!(matches!(err, ImportError::PrimaryKeyMissing(3)));
    }

    #[test]
    fn test_non_numeric_confidence_is_rejected() {
        let data = "punch_id,employee_id,device_id,date,time,movement,confidence\n\
                    P1,E1,D1,2024-03-01,08:00,IN,high\n";
        let err = parse_rows(data.as_bytes()).unwrap_err();
        assert!(matches!(
            err,
            ImportError::TypeConversionError { row: 2, ref field, .. } if field == "confidence"
        ));
    }
}
