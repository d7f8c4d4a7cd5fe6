// ==========================================
// 考勤对账引擎 - 持久化边界的类型化解码
// ==========================================
// 约定: 日期 %Y-%m-%d, 时刻 %H:%M:%S, 时间戳 %Y-%m-%d %H:%M:%S
// 引擎层只接触解码后的强类型数据
// ==========================================

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::types::Type;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M:%S";
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn fmt_date(d: NaiveDate) -> String {
    d.format(DATE_FORMAT).to_string()
}

pub fn fmt_time(t: NaiveTime) -> String {
    t.format(TIME_FORMAT).to_string()
}

pub fn fmt_datetime(dt: NaiveDateTime) -> String {
    dt.format(DATETIME_FORMAT).to_string()
}

/// 当前时间戳 (本地时区, 秒级)
pub fn now_string() -> String {
    fmt_datetime(chrono::Local::now().naive_local())
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT).ok()
}

/// 解析时刻, 兼容设备导出的 HH:MM
pub fn parse_time(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, TIME_FORMAT)
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .ok()
}

pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s.trim(), DATETIME_FORMAT).ok()
}

/// 必填列解码失败时转换为 rusqlite 错误 (由 From 映射为 DecodeError)
pub fn conversion_error(idx: usize, value: &str, expected: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        Type::Text,
        format!("期望 {}, 实际 '{}'", expected, value).into(),
    )
}

/// 读取必填日期列
pub fn required_date(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    parse_date(&raw).ok_or_else(|| conversion_error(idx, &raw, DATE_FORMAT))
}

/// 读取必填时间戳列
pub fn required_datetime(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<NaiveDateTime> {
    let raw: String = row.get(idx)?;
    parse_datetime(&raw).ok_or_else(|| conversion_error(idx, &raw, DATETIME_FORMAT))
}

/// 读取可空时间戳列
pub fn optional_datetime(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Option<NaiveDateTime>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => parse_datetime(&raw)
            .map(Some)
            .ok_or_else(|| conversion_error(idx, &raw, DATETIME_FORMAT)),
        None => Ok(None),
    }
}

/// 读取可空时刻列
pub fn optional_time(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Option<NaiveTime>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => parse_time(&raw)
            .map(Some)
            .ok_or_else(|| conversion_error(idx, &raw, TIME_FORMAT)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_time_accepts_short_form() {
        assert_eq!(parse_time("08:00"), NaiveTime::from_hms_opt(8, 0, 0));
        assert_eq!(parse_time("17:30:05"), NaiveTime::from_hms_opt(17, 30, 5));
        assert_eq!(parse_time("25:00"), None);
    }

    #[test]
    fn test_parse_date_rejects_other_layouts() {
        assert!(parse_date("2024-03-01").is_some());
        assert!(parse_date("01/03/2024").is_none());
    }
}
