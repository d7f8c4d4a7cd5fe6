// ==========================================
// 考勤对账引擎 - 核心库
// ==========================================
// 技术栈: Rust + SQLite + tokio
// 系统定位: 将考勤机原始打卡对账为每人每日一条考勤记录
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 对账规则
pub mod engine;

// 导入层 - 打卡 CSV
pub mod importer;

// 配置层 - 对账配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// 性能统计
pub mod perf;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{
    AttendanceStatus, MovementKind, OvertimeBucket, ReconcileMode, VerificationKind,
};

// 领域实体
pub use domain::{
    AttendanceRecord, CommunicationGap, DaySlots, GroupKey, HoursBreakdown, ManualAdjustment,
    PunchEvent, ReconcileRunLog,
};

// 配置
pub use config::{ConfigManager, ReconcileConfig, ReconcileConfigReader};

// 引擎
pub use engine::{
    CancellationFlag, GroupOutcome, IntegrityVerifier, ReconcileError, ReconcileReport,
    ReconcileRequest, ReconciliationCoordinator,
};

// 仓储
pub use repository::{AttendanceRecordRepository, PunchEventRepository, RunLogRepository};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "考勤对账引擎";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
