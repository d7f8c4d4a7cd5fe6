// ==========================================
// 考勤对账引擎 - 打卡事件领域模型
// ==========================================
// 红线: 打卡一经入库不可修改, 仅处理状态字段可变
// 红线: 重复打卡只打标记, 不删除 (保留完整审计轨迹)
// ==========================================

use crate::domain::types::{MovementKind, VerificationKind};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// PunchEvent - 打卡事件
// ==========================================
// 对齐: punch_event 表
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PunchEvent {
    // ===== 主键与来源 =====
    pub punch_id: String,      // 打卡ID
    pub employee_id: String,   // 员工ID
    pub device_id: String,     // 设备ID

    // ===== 打卡事实 =====
    pub punch_date: NaiveDate,           // 日历日期
    pub punch_time: NaiveTime,           // 当日时刻 (秒级)
    pub movement: MovementKind,          // 动作类型
    pub verification: VerificationKind,  // 验证方式
    pub confidence: Option<f64>,         // 识别置信度
    pub failed_attempts: i32,            // 失败尝试次数

    // ===== 处理状态 (唯一可变部分) =====
    pub processed: bool,                      // 是否已被对账消费
    pub effective: bool,                      // 是否计入计算 (false = 重复/隔离)
    pub attendance_record_id: Option<String>, // 消费该打卡的考勤记录

    // ===== 软删除 =====
    pub deleted_at: Option<NaiveDateTime>,
}

impl PunchEvent {
    /// 对账分组键 (员工 + 日期)
    pub fn group_key(&self) -> GroupKey {
        GroupKey::new(&self.employee_id, self.punch_date)
    }

    /// 是否已软删除
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// 当日秒数 (对账计算统一使用秒)
    pub fn seconds_of_day(&self) -> i64 {
        crate::domain::attendance::seconds_of_day(self.punch_time)
    }

    /// 已处理的打卡必须带有回指, 且回指不可改写
    pub fn is_linked_to(&self, record_id: &str) -> bool {
        self.processed && self.attendance_record_id.as_deref() == Some(record_id)
    }
}

// ==========================================
// GroupKey - 对账分组键
// ==========================================
// 对账工作单元: 单个员工在单个日历日的全部打卡
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKey {
    pub employee_id: String,
    pub work_date: NaiveDate,
}

impl GroupKey {
    pub fn new(employee_id: &str, work_date: NaiveDate) -> Self {
        Self {
            employee_id: employee_id.to_string(),
            work_date,
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.employee_id, self.work_date)
    }
}

// ==========================================
// MalformedPunch - 畸形打卡诊断
// ==========================================
// 仓储层解码失败的行 (缺员工/设备/时间, 或字段无法识别)
// 不阻塞所在分组, 隔离后仅输出诊断
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MalformedPunch {
    pub punch_id: String,
    pub employee_id: Option<String>,
    pub punch_date: Option<NaiveDate>,
    pub reason: String,
    pub quarantined: bool, // 已隔离 (effective=0 且未处理)
}

// ==========================================
// GroupPunches - 单个分组加载结果
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct GroupPunches {
    pub punches: Vec<PunchEvent>,
    pub malformed: Vec<MalformedPunch>,
}

impl GroupPunches {
    /// 是否含有尚未处理的打卡 (含待隔离的畸形打卡)
    pub fn has_pending_work(&self) -> bool {
        self.punches.iter().any(|p| !p.processed) || self.malformed.iter().any(|m| !m.quarantined)
    }
}

// ==========================================
// RawPunchRow - 入库前的原始打卡行
// ==========================================
// 来源: 设备同步 / CSV 导出; 字段原样落库, 不做校验
// 校验在仓储解码时统一进行 (畸形行被隔离而非拒收)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawPunchRow {
    pub punch_id: String,
    pub employee_id: Option<String>,
    pub device_id: Option<String>,
    pub punch_date: Option<String>,
    pub punch_time: Option<String>,
    pub movement: Option<String>,
    pub verification: Option<String>,
    pub confidence: Option<f64>,
    pub failed_attempts: Option<i32>,
}

impl From<&PunchEvent> for RawPunchRow {
    fn from(p: &PunchEvent) -> Self {
        Self {
            punch_id: p.punch_id.clone(),
            employee_id: Some(p.employee_id.clone()),
            device_id: Some(p.device_id.clone()),
            punch_date: Some(p.punch_date.format("%Y-%m-%d").to_string()),
            punch_time: Some(p.punch_time.format("%H:%M:%S").to_string()),
            movement: Some(p.movement.to_db_str().to_string()),
            verification: Some(p.verification.to_db_str().to_string()),
            confidence: p.confidence,
            failed_attempts: Some(p.failed_attempts),
        }
    }
}
