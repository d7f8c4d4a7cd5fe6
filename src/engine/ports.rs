// ==========================================
// 考勤对账引擎 - 外部协作接口
// ==========================================
// 职责: 定义引擎消费的打卡来源与考勤存储 trait，实现依赖倒置
// 说明: Engine 层定义 trait，Repository 层实现
// ==========================================

use crate::domain::attendance::{AttendanceRecord, DaySlots, HoursBreakdown, ManualAdjustment};
use crate::domain::punch::{GroupKey, GroupPunches, MalformedPunch, PunchEvent};
use crate::domain::run_log::ReconcileRunLog;
use crate::domain::types::AttendanceStatus;
use crate::repository::error::RepositoryResult;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ==========================================
// PunchSource - 打卡来源
// ==========================================
pub trait PunchSource: Send + Sync {
    /// 查询存在"有效且未处理"打卡的分组
    fn find_pending_groups(
        &self,
        employee_id: Option<&str>,
        from: NaiveDate,
        to: NaiveDate,
    ) -> RepositoryResult<Vec<GroupKey>>;

    /// 查询区间内存在任意未删除打卡的分组 (全量重算)
    fn find_groups_in_range(
        &self,
        employee_id: Option<&str>,
        from: NaiveDate,
        to: NaiveDate,
    ) -> RepositoryResult<Vec<GroupKey>>;

    /// 加载分组内全部未删除打卡 (含已处理、含重复), 附带畸形打卡诊断
    fn load_group(&self, key: &GroupKey) -> RepositoryResult<GroupPunches>;

    /// 加载单台设备单日的全部未删除原始打卡 (按时间升序)
    fn load_device_day(&self, device_id: &str, date: NaiveDate) -> RepositoryResult<Vec<PunchEvent>>;

    /// 当日有打卡记录的设备列表
    fn list_devices_with_activity(&self, date: NaiveDate) -> RepositoryResult<Vec<String>>;

    /// 无法归入任何分组的待处理畸形打卡 (缺员工或日期不可解析)
    fn find_orphans(&self) -> RepositoryResult<Vec<MalformedPunch>>;

    /// 隔离畸形打卡 (effective=0, 保持未处理)
    fn quarantine(&self, punch_ids: &[String]) -> RepositoryResult<usize>;
}

// ==========================================
// 提交载荷
// ==========================================

/// 推导出的记录字段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedRecord {
    pub slots: DaySlots,
    pub hours: HoursBreakdown,
    pub status: AttendanceStatus,
    pub notes: Option<String>,
    pub config_version: Option<i64>,
}

/// 单条打卡的处理结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PunchLink {
    pub punch_id: String,
    pub effective: bool,
}

/// 单个分组的原子提交
///
/// - `expected_version = None`: 新建记录
/// - `expected_version = Some(v)`: 按版本号守卫更新
/// - `write_record = false`: 人工裁定记录, 只回链打卡, 不覆盖字段
#[derive(Debug, Clone)]
pub struct GroupCommit {
    pub key: GroupKey,
    pub record_id: String,
    pub expected_version: Option<i32>,
    pub write_record: bool,
    pub derived: DerivedRecord,
    pub punch_links: Vec<PunchLink>,
    pub quarantined: Vec<String>,
}

/// 提交回执
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReceipt {
    pub record_id: String,
    pub version: i32,
    pub linked_punches: usize,
}

// ==========================================
// AttendanceStore - 考勤记录存储
// ==========================================
pub trait AttendanceStore: Send + Sync {
    /// 查询 (员工, 日期) 的未删除记录
    fn find_active(&self, key: &GroupKey) -> RepositoryResult<Option<AttendanceRecord>>;

    /// 查询已过当日仍为 PENDING 的记录分组 (需重新判定缺卡)
    fn find_stale_pending(
        &self,
        employee_id: Option<&str>,
        from: NaiveDate,
        to: NaiveDate,
        today: NaiveDate,
    ) -> RepositoryResult<Vec<GroupKey>>;

    /// 原子提交: 写记录 + 标记打卡已处理 + 隔离畸形打卡
    ///
    /// # 错误
    /// - `OptimisticLockFailure`: 版本号不匹配
    /// - `UniqueConstraintViolation`: 并发新建同一分组
    /// - `Timeout`: 数据库忙
    fn commit_group(&self, commit: &GroupCommit) -> RepositoryResult<CommitReceipt>;

    /// 冲突重试耗尽后升级为人工复核
    fn escalate_to_review(&self, key: &GroupKey, note: &str) -> RepositoryResult<AttendanceRecord>;

    /// 写入人工裁定 (版本号守卫, 置 manual_override)
    ///
    /// # 参数
    /// - adjustment: 裁定内容
    /// - hours: 调用方按裁定槽位重算的工时 (非 COMPLETE 时为零)
    fn apply_manual_adjustment(
        &self,
        adjustment: &ManualAdjustment,
        hours: &HoursBreakdown,
    ) -> RepositoryResult<AttendanceRecord>;

    /// 解除复核锁定 (清除 manual_override, 状态回到 INCONSISTENT 以待重新推导)
    fn release_review(
        &self,
        record_id: &str,
        expected_version: i32,
        actor: &str,
    ) -> RepositoryResult<AttendanceRecord>;
}

// ==========================================
// RunLogSink - 批次日志落库
// ==========================================
pub trait RunLogSink: Send + Sync {
    fn record_run(&self, log: &ReconcileRunLog) -> RepositoryResult<()>;
}
