// ==========================================
// 考勤对账引擎 - 引擎层
// ==========================================
// 职责: 实现对账规则, 不拼 SQL
// 流程: 去重 → 配对 → (工时计算 + 异常判定) → 协调器原子提交
//       缺口校验独立运行, 只读
// 红线: Engine 不拼 SQL, 所有异常判定必须输出原因
// ==========================================

pub mod anomaly;
pub mod coordinator;
pub mod dedup;
pub mod error;
pub mod hours;
pub mod integrity;
pub mod pairing;
pub mod ports;

// 重导出核心引擎
pub use anomaly::{AnomalyDetector, AnomalyVerdict};
pub use coordinator::{
    CancellationFlag, GroupOutcome, OutcomeCounts, ReconcileReport, ReconcileRequest,
    ReconciliationCoordinator,
};
pub use dedup::{DedupOutcome, DuplicatePunch, PunchDeduplicator};
pub use error::{ReconcileError, ReconcileResult};
pub use hours::HoursCalculator;
pub use integrity::{detect_gaps, IntegrityVerifier};
pub use pairing::{PairingOutcome, PunchPairer, UnassignablePunch};
pub use ports::{
    AttendanceStore, CommitReceipt, DerivedRecord, GroupCommit, PunchLink, PunchSource,
    RunLogSink,
};
