// ==========================================
// 考勤对账引擎 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型、业务不变式
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod attendance;
pub mod gap;
pub mod punch;
pub mod run_log;
pub mod types;

// 重导出核心类型
pub use attendance::{AttendanceRecord, DaySlots, Hours, HoursBreakdown, ManualAdjustment};
pub use gap::{CommunicationGap, GapKind};
pub use punch::{GroupKey, GroupPunches, MalformedPunch, PunchEvent, RawPunchRow};
pub use run_log::ReconcileRunLog;
pub use types::{AttendanceStatus, MovementKind, OvertimeBucket, ReconcileMode, VerificationKind};
