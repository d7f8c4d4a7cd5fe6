// ==========================================
// 考勤对账引擎 - 导入层
// ==========================================
// 职责: 将考勤机导出的 CSV 原样写入 punch_event
// 红线: 导入不做字段校验, 畸形数据留给仓储解码阶段诊断
// ==========================================

pub mod error;
pub mod punch_csv;

pub use error::{ImportError, ImportResult};
pub use punch_csv::{ImportSummary, PunchCsvImporter};
