// ==========================================
// 考勤对账引擎 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================
// 职责: 提供数据访问接口, 屏蔽数据库细节, 完成类型化解码
// 约束: 所有查询使用参数化, 防止 SQL 注入
// ==========================================

pub mod attendance_repo;
pub mod decode;
pub mod error;
pub mod punch_repo;
pub mod run_log_repo;

// 重导出核心仓储
pub use attendance_repo::AttendanceRecordRepository;
pub use error::{RepositoryError, RepositoryResult};
pub use punch_repo::{PunchEventRepository, PunchProcessingState};
pub use run_log_repo::RunLogRepository;
