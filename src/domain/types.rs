// ==========================================
// 考勤对账引擎 - 领域类型定义
// ==========================================
// 序列化格式: SCREAMING_SNAKE_CASE (与数据库一致)
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 打卡动作类型 (Movement Kind)
// ==========================================
// ENTRY/EXIT 为第一段, ENTRY2/EXIT2 为午休后第二段
// 配对时只区分"进"和"出"两类, 设备上报的段号仅作参考
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementKind {
    Entry,  // 上班
    Exit,   // 下班 / 午休出
    Entry2, // 午休回
    Exit2,  // 下班
}

impl fmt::Display for MovementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

impl MovementKind {
    /// 从字符串解析动作类型
    ///
    /// 未知取值返回 None, 由仓储层归类为畸形打卡
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "ENTRY" | "IN" => Some(MovementKind::Entry),
            "EXIT" | "OUT" => Some(MovementKind::Exit),
            "ENTRY2" | "IN2" => Some(MovementKind::Entry2),
            "EXIT2" | "OUT2" => Some(MovementKind::Exit2),
            _ => None,
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            MovementKind::Entry => "ENTRY",
            MovementKind::Exit => "EXIT",
            MovementKind::Entry2 => "ENTRY2",
            MovementKind::Exit2 => "EXIT2",
        }
    }

    /// 是否为"进"类打卡
    pub fn is_entry(&self) -> bool {
        matches!(self, MovementKind::Entry | MovementKind::Entry2)
    }

    /// 是否为"出"类打卡
    pub fn is_exit(&self) -> bool {
        matches!(self, MovementKind::Exit | MovementKind::Exit2)
    }
}

// ==========================================
// 验证方式 (Verification Kind)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationKind {
    Fingerprint, // 指纹
    Face,        // 人脸
    Card,        // 刷卡
    Password,    // 密码
    Other,       // 其他
}

impl fmt::Display for VerificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

impl VerificationKind {
    /// 从字符串解析验证方式
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "FINGERPRINT" | "FP" => VerificationKind::Fingerprint,
            "FACE" => VerificationKind::Face,
            "CARD" => VerificationKind::Card,
            "PASSWORD" | "PIN" => VerificationKind::Password,
            _ => VerificationKind::Other, // 默认值
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            VerificationKind::Fingerprint => "FINGERPRINT",
            VerificationKind::Face => "FACE",
            VerificationKind::Card => "CARD",
            VerificationKind::Password => "PASSWORD",
            VerificationKind::Other => "OTHER",
        }
    }
}

// ==========================================
// 考勤状态 (Attendance Status)
// ==========================================
// 状态单调推进; 仅 UNDER_REVIEW / INCONSISTENT / COMPLETE 之间允许往返
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttendanceStatus {
    Pending,      // 当日待下班卡
    Complete,     // 完整
    Absent,       // 缺勤
    Inconsistent, // 不一致
    UnderReview,  // 人工复核中
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

impl AttendanceStatus {
    /// 从字符串解析状态
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "PENDING" => Some(AttendanceStatus::Pending),
            "COMPLETE" => Some(AttendanceStatus::Complete),
            "ABSENT" => Some(AttendanceStatus::Absent),
            "INCONSISTENT" => Some(AttendanceStatus::Inconsistent),
            "UNDER_REVIEW" => Some(AttendanceStatus::UnderReview),
            _ => None,
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Pending => "PENDING",
            AttendanceStatus::Complete => "COMPLETE",
            AttendanceStatus::Absent => "ABSENT",
            AttendanceStatus::Inconsistent => "INCONSISTENT",
            AttendanceStatus::UnderReview => "UNDER_REVIEW",
        }
    }

    /// 是否允许从当前状态转换到目标状态
    ///
    /// # 参数
    /// - next: 目标状态
    /// - day_open: 记录日期尚未结束 (当日仍可补卡)
    ///
    /// 规则:
    /// - 相同状态总是允许 (幂等重算)
    /// - PENDING 可进入任意终态
    /// - 仅当日记录可回到 PENDING (例如午休后再次进卡, 等待下班卡)
    /// - ABSENT 在补传打卡后可进入 COMPLETE / INCONSISTENT / UNDER_REVIEW
    /// - COMPLETE / INCONSISTENT / UNDER_REVIEW 之间可往返
    /// - 已有打卡结论的记录不能退回 ABSENT
    pub fn can_transition_to(&self, next: AttendanceStatus, day_open: bool) -> bool {
        use AttendanceStatus::*;

        if *self == next {
            return true;
        }

        match (self, next) {
            (_, Pending) => day_open,
            (Pending, _) => true,
            (Absent, Complete | Inconsistent | UnderReview) => true,
            (Complete | Inconsistent | UnderReview, Complete | Inconsistent | UnderReview) => true,
            _ => false,
        }
    }

    /// 是否允许记录工时 (只有 COMPLETE 才输出工时, 其余状态不臆造工时)
    pub fn carries_hours(&self) -> bool {
        matches!(self, AttendanceStatus::Complete)
    }
}

// ==========================================
// 加班档位 (Overtime Bucket)
// ==========================================
// 25% / 50% / 100% 三档加成, 档位边界来自外部配置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OvertimeBucket {
    #[serde(rename = "RECARGO_25")]
    Recargo25,
    #[serde(rename = "SUPLEMENTARIO_50")]
    Suplementario50,
    #[serde(rename = "EXTRAORDINARIO_100")]
    Extraordinario100,
}

impl fmt::Display for OvertimeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

impl OvertimeBucket {
    /// 加成百分比
    pub fn surcharge_pct(&self) -> u32 {
        match self {
            OvertimeBucket::Recargo25 => 25,
            OvertimeBucket::Suplementario50 => 50,
            OvertimeBucket::Extraordinario100 => 100,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            OvertimeBucket::Recargo25 => "RECARGO_25",
            OvertimeBucket::Suplementario50 => "SUPLEMENTARIO_50",
            OvertimeBucket::Extraordinario100 => "EXTRAORDINARIO_100",
        }
    }
}

// ==========================================
// 对账模式 (Reconcile Mode)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconcileMode {
    Incremental, // 仅处理存在未处理有效打卡的分组
    Full,        // 区间内全部分组重新推导
}

impl fmt::Display for ReconcileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileMode::Incremental => write!(f, "INCREMENTAL"),
            ReconcileMode::Full => write!(f, "FULL"),
        }
    }
}
