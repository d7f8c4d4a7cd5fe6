// ==========================================
// 考勤对账引擎 - 设备通讯缺口
// ==========================================
// 用途: 设备健康信号, 不修正任何考勤记录
// ==========================================

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

/// 缺口位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GapKind {
    BetweenPunches, // 相邻两次打卡之间
    LeadingSilence, // 活动窗口开始到首次打卡
    TrailingSilence, // 末次打卡到活动窗口结束
}

// ==========================================
// CommunicationGap - 通讯缺口
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunicationGap {
    pub device_id: String,
    pub punch_date: NaiveDate,
    pub kind: GapKind,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub duration_secs: i64,
}

impl CommunicationGap {
    /// 缺口时长 (分钟, 向下取整)
    pub fn duration_minutes(&self) -> i64 {
        self.duration_secs / 60
    }
}
