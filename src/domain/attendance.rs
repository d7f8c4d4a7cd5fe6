// ==========================================
// 考勤对账引擎 - 考勤记录领域模型
// ==========================================
// 红线: 每个 (员工, 日期) 仅一条未删除记录
// 红线: 工时全程按秒计算, 仅展示时取整
// ==========================================

use crate::domain::types::AttendanceStatus;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

/// 当日秒数
pub fn seconds_of_day(t: NaiveTime) -> i64 {
    t.num_seconds_from_midnight() as i64
}

// ==========================================
// DaySlots - 四个打卡槽位
// ==========================================
// entry: 上班, exit: 午休出/下班, entry2: 午休回, exit2: 下班
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaySlots {
    pub entry: Option<NaiveTime>,
    pub exit: Option<NaiveTime>,
    pub entry2: Option<NaiveTime>,
    pub exit2: Option<NaiveTime>,
}

impl DaySlots {
    /// 是否完全没有槽位
    pub fn is_empty(&self) -> bool {
        self.entry.is_none() && self.exit.is_none() && self.entry2.is_none() && self.exit2.is_none()
    }

    /// 是否存在第二段 (午休后)
    pub fn has_second_pair(&self) -> bool {
        self.entry2.is_some() || self.exit2.is_some()
    }
}

// ==========================================
// HoursBreakdown - 工时分桶 (单位: 秒)
// ==========================================
// 夜班工时是叠加维度, 不参与 regular + 加班 的守恒
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoursBreakdown {
    pub worked_secs: i64,            // 实际工作时长
    pub lunch_secs: i64,             // 午休时长
    pub regular_secs: i64,           // 正常工时
    pub recargo25_secs: i64,         // 25% 加班
    pub suplementario50_secs: i64,   // 50% 加班
    pub extraordinario100_secs: i64, // 100% 加班
    pub night_secs: i64,             // 夜班工时
}

impl HoursBreakdown {
    /// 加班合计
    pub fn overtime_secs(&self) -> i64 {
        self.recargo25_secs + self.suplementario50_secs + self.extraordinario100_secs
    }

    /// 守恒校验: regular + 各档加班 == worked
    pub fn is_conserved(&self) -> bool {
        self.regular_secs + self.overtime_secs() == self.worked_secs
    }
}

// ==========================================
// Hours - 展示用工时 (小时, 保留两位小数)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hours(pub f64);

impl Hours {
    /// 秒 → 小时, 仅在展示层取整
    pub fn from_secs(secs: i64) -> Self {
        let hours = secs as f64 / 3600.0;
        Hours((hours * 100.0).round() / 100.0)
    }
}

// ==========================================
// AttendanceRecord - 考勤日记录
// ==========================================
// 对齐: attendance_record 表
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    // ===== 主键 =====
    pub record_id: String,
    pub employee_id: String,
    pub work_date: NaiveDate,

    // ===== 槽位与工时 =====
    pub slots: DaySlots,
    pub hours: HoursBreakdown,

    // ===== 状态 =====
    pub status: AttendanceStatus,
    pub manual_override: bool,         // 人工调整标记
    pub notes: Option<String>,         // 异常说明 / 人工备注
    pub modified_by: Option<String>,   // 人工修改人
    pub modified_at: Option<NaiveDateTime>,
    pub config_version: Option<i64>,   // 计算所依据的配置版本

    // ===== 并发与软删除 =====
    pub version: i32,                  // 乐观锁版本号
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub deleted_at: Option<NaiveDateTime>,
}

impl AttendanceRecord {
    /// 推导字段是否与给定结果一致 (幂等判断)
    pub fn same_derivation(
        &self,
        slots: &DaySlots,
        hours: &HoursBreakdown,
        status: AttendanceStatus,
        notes: Option<&str>,
        config_version: Option<i64>,
    ) -> bool {
        self.slots == *slots
            && self.hours == *hours
            && self.status == status
            && self.notes.as_deref() == notes
            && self.config_version == config_version
    }

    /// 槽位时间顺序不变式: entry ≤ exit2
    pub fn slots_ordered(&self) -> bool {
        match (self.slots.entry, self.slots.exit2) {
            (Some(entry), Some(exit2)) => entry <= exit2,
            _ => true,
        }
    }
}

// ==========================================
// ManualAdjustment - 人工调整
// ==========================================
// 用途: 复核人员裁定后的槽位与状态, 写入后对账不再覆盖
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualAdjustment {
    pub record_id: String,
    pub expected_version: i32,
    pub slots: DaySlots,
    pub status: AttendanceStatus,
    pub notes: Option<String>,
    pub modified_by: String,
}
