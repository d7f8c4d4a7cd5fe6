// ==========================================
// 考勤对账引擎 - 对账协调器
// ==========================================
// 职责: 按 (员工, 日期) 分组, 依次执行 去重 → 配对 → 工时 + 异常判定,
//       将结果与打卡回链作为单个原子单元提交
// 红线: 幂等 (同一有效打卡集合重复对账不改变任何字段, 不产生第二条记录)
// 红线: 版本号比较交换, 冲突有限次重试后升级为 UNDER_REVIEW
// 红线: 单个分组失败不影响同批次其他分组
// ==========================================

use crate::config::{ReconcileConfig, ReconcileConfigReader};
use crate::domain::attendance::{AttendanceRecord, HoursBreakdown, ManualAdjustment};
use crate::domain::punch::{GroupKey, MalformedPunch};
use crate::domain::run_log::ReconcileRunLog;
use crate::domain::types::{AttendanceStatus, ReconcileMode};
use crate::engine::anomaly::AnomalyDetector;
use crate::engine::dedup::PunchDeduplicator;
use crate::engine::error::{ReconcileError, ReconcileResult};
use crate::engine::hours::HoursCalculator;
use crate::engine::pairing::PunchPairer;
use crate::engine::ports::{
    AttendanceStore, DerivedRecord, GroupCommit, PunchLink, PunchSource, RunLogSink,
};
use crate::perf::PerfGuard;
use crate::repository::error::RepositoryError;
use chrono::{Local, NaiveDate, NaiveDateTime};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::Span;

// ==========================================
// ReconcileRequest - 对账请求
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileRequest {
    pub employee_id: Option<String>,
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
    pub mode: ReconcileMode,
    pub actor: String,
    /// 批次"当日"; None 取本地日期
    pub today: Option<NaiveDate>,
}

impl ReconcileRequest {
    /// 增量对账: 仅处理含未处理有效打卡的分组
    pub fn incremental(employee_id: Option<&str>, date_from: NaiveDate, date_to: NaiveDate) -> Self {
        Self {
            employee_id: employee_id.map(str::to_string),
            date_from,
            date_to,
            mode: ReconcileMode::Incremental,
            actor: "system".to_string(),
            today: None,
        }
    }

    /// 全量重算: 区间内全部分组重新推导
    pub fn full(employee_id: Option<&str>, date_from: NaiveDate, date_to: NaiveDate) -> Self {
        Self {
            mode: ReconcileMode::Full,
            ..Self::incremental(employee_id, date_from, date_to)
        }
    }

    pub fn with_actor(mut self, actor: &str) -> Self {
        self.actor = actor.to_string();
        self
    }

    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }
}

// ==========================================
// GroupOutcome - 单个分组的处理结果
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GroupOutcome {
    /// 记录已新建或更新 (含仅回链打卡)
    Updated {
        key: GroupKey,
        record_id: String,
        status: AttendanceStatus,
        version: i32,
        created: bool,
    },
    /// 推导结果与既有记录一致, 无写入
    Unchanged {
        key: GroupKey,
        record_id: String,
        status: AttendanceStatus,
    },
    /// 冲突重试耗尽, 已升级为人工复核
    Escalated {
        key: GroupKey,
        record_id: String,
        attempts: u32,
    },
    /// 处理失败 (retryable = true 时打卡仍为未处理, 下次批次自动重入)
    Failed {
        key: GroupKey,
        reason: String,
        retryable: bool,
    },
    /// 批次中止或取消, 分组未处理
    Skipped { key: GroupKey, reason: String },
}

impl GroupOutcome {
    pub fn key(&self) -> &GroupKey {
        match self {
            GroupOutcome::Updated { key, .. }
            | GroupOutcome::Unchanged { key, .. }
            | GroupOutcome::Escalated { key, .. }
            | GroupOutcome::Failed { key, .. }
            | GroupOutcome::Skipped { key, .. } => key,
        }
    }

    /// 结果对应的记录ID (失败/跳过时为空)
    pub fn record_id(&self) -> Option<&str> {
        match self {
            GroupOutcome::Updated { record_id, .. }
            | GroupOutcome::Unchanged { record_id, .. }
            | GroupOutcome::Escalated { record_id, .. } => Some(record_id),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<AttendanceStatus> {
        match self {
            GroupOutcome::Updated { status, .. } | GroupOutcome::Unchanged { status, .. } => {
                Some(*status)
            }
            GroupOutcome::Escalated { .. } => Some(AttendanceStatus::UnderReview),
            _ => None,
        }
    }
}

/// 分结果计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub updated: i32,
    pub unchanged: i32,
    pub escalated: i32,
    pub failed: i32,
    pub skipped: i32,
}

// ==========================================
// ReconcileReport - 批次报告
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub run_id: String,
    pub mode: ReconcileMode,
    pub config_version: i64,
    pub outcomes: Vec<GroupOutcome>,
    pub malformed: Vec<MalformedPunch>,
    /// 持久化不可用导致批次中止的原因
    pub aborted: Option<String>,
    pub cancelled: bool,
    pub started_at: NaiveDateTime,
    pub finished_at: NaiveDateTime,
}

impl ReconcileReport {
    pub fn counts(&self) -> OutcomeCounts {
        let mut counts = OutcomeCounts::default();
        for outcome in &self.outcomes {
            match outcome {
                GroupOutcome::Updated { .. } => counts.updated += 1,
                GroupOutcome::Unchanged { .. } => counts.unchanged += 1,
                GroupOutcome::Escalated { .. } => counts.escalated += 1,
                GroupOutcome::Failed { .. } => counts.failed += 1,
                GroupOutcome::Skipped { .. } => counts.skipped += 1,
            }
        }
        counts
    }

    /// 查找指定分组的结果
    pub fn outcome_for(&self, key: &GroupKey) -> Option<&GroupOutcome> {
        self.outcomes.iter().find(|o| o.key() == key)
    }

    /// 将中止/取消转换为错误 (已提交的分组保持有效)
    pub fn into_result(self) -> ReconcileResult<Self> {
        if let Some(reason) = &self.aborted {
            return Err(ReconcileError::PersistenceUnavailable(reason.clone()));
        }
        if self.cancelled {
            return Err(ReconcileError::Cancelled);
        }
        Ok(self)
    }
}

// ==========================================
// CancellationFlag - 批次取消标记
// ==========================================
// 在分组之间检查; 已开始的分组总是执行到提交点
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ==========================================
// GroupPipeline - 单个分组的处理流水线
// ==========================================
// 在 blocking 线程中同步执行; 持有本批次配置 (按值)
#[derive(Clone)]
struct GroupPipeline {
    source: Arc<dyn PunchSource>,
    store: Arc<dyn AttendanceStore>,
    config: Arc<ReconcileConfig>,
    today: NaiveDate,
    halt: Arc<AtomicBool>,
    halt_reason: Arc<Mutex<Option<String>>>,
    span: Span,
}

/// 单次尝试的结果
enum Attempt {
    Done(GroupOutcome),
    Conflict(RepositoryError),
}

impl GroupPipeline {
    /// 处理单个分组 (含冲突重试与升级)
    fn run(&self, key: &GroupKey) -> GroupOutcome {
        let _perf = PerfGuard::new("reconcile_group").with_label(key.to_string());
        let max_attempts = self.config.max_conflict_retries + 1;

        for attempt in 1..=max_attempts {
            match self.attempt(key) {
                Ok(Attempt::Done(outcome)) => return outcome,
                Ok(Attempt::Conflict(err)) => {
                    tracing::debug!(parent: &self.span, group = %key, attempt, error = %err, "并发冲突, 重新读取后重试");
                }
                Err(err) => return self.failure(key, err),
            }
        }

        self.escalate(key, max_attempts)
    }

    fn attempt(&self, key: &GroupKey) -> Result<Attempt, RepositoryError> {
        let group = self.source.load_group(key)?;
        let existing = self.store.find_active(key)?;

        for malformed in group.malformed.iter().filter(|m| !m.quarantined) {
            tracing::warn!(
                parent: &self.span,
                punch_id = %malformed.punch_id,
                group = %key,
                reason = %malformed.reason,
                "{}",
                ReconcileError::MalformedPunch {
                    punch_id: malformed.punch_id.clone(),
                    reason: malformed.reason.clone(),
                }
            );
        }

        // 1. 去重 → 2. 配对 → 3. 异常判定 + 工时
        let dedup = PunchDeduplicator::new(self.config.dedup_threshold_secs, self.span.clone())
            .deduplicate(&group.punches);
        let pairing = PunchPairer::new().pair(&dedup.effective);
        for unassignable in &pairing.unassignable {
            tracing::debug!(
                parent: &self.span,
                "{}",
                ReconcileError::UnpairablePunch {
                    punch_id: unassignable.punch_id.clone(),
                    reason: unassignable.reason.clone(),
                }
            );
        }
        let verdict = AnomalyDetector::new(self.today, self.span.clone()).assess(
            key.work_date,
            dedup.effective.len(),
            &pairing,
            existing.as_ref(),
        );

        let mut derived = DerivedRecord {
            slots: pairing.slots,
            hours: HoursBreakdown::default(),
            status: verdict.status,
            notes: verdict.notes(),
            config_version: Some(self.config.config_version),
        };
        if let Some(record) = existing.as_ref().filter(|_| !verdict.sticky) {
            let day_open = key.work_date >= self.today;
            if !record.status.can_transition_to(derived.status, day_open) {
                derived.notes = Some(format!(
                    "状态不可从 {} 变为 {}, 待人工复核",
                    record.status, derived.status
                ));
                derived.status = AttendanceStatus::UnderReview;
            }
        }
        if derived.status.carries_hours() {
            derived.hours = HoursCalculator::new(&self.config).calculate(&derived.slots);
        }

        // 打卡处理状态
        let duplicate_ids: HashSet<&str> =
            dedup.duplicates.iter().map(|d| d.punch_id.as_str()).collect();
        let punch_links: Vec<PunchLink> = group
            .punches
            .iter()
            .map(|p| PunchLink {
                punch_id: p.punch_id.clone(),
                effective: !duplicate_ids.contains(p.punch_id.as_str()),
            })
            .collect();
        let links_pending = group
            .punches
            .iter()
            .zip(&punch_links)
            .any(|(p, link)| !p.processed || p.effective != link.effective);
        let quarantined: Vec<String> = group
            .malformed
            .iter()
            .filter(|m| !m.quarantined)
            .map(|m| m.punch_id.clone())
            .collect();

        let (record_id, expected_version, write_record) = match &existing {
            Some(record) => {
                let unchanged = verdict.sticky || Self::same_as(record, &derived);
                if unchanged && !links_pending && quarantined.is_empty() {
                    return Ok(Attempt::Done(GroupOutcome::Unchanged {
                        key: key.clone(),
                        record_id: record.record_id.clone(),
                        status: record.status,
                    }));
                }
                (record.record_id.clone(), Some(record.version), !unchanged)
            }
            None => (uuid::Uuid::new_v4().to_string(), None, true),
        };

        if self.halt.load(Ordering::SeqCst) {
            return Ok(Attempt::Done(GroupOutcome::Skipped {
                key: key.clone(),
                reason: "持久化不可用, 批次已停止提交".to_string(),
            }));
        }

        let status = if write_record {
            derived.status
        } else {
            existing.as_ref().map(|r| r.status).unwrap_or(derived.status)
        };
        let commit = GroupCommit {
            key: key.clone(),
            record_id,
            expected_version,
            write_record,
            derived,
            punch_links,
            quarantined,
        };

        match self.store.commit_group(&commit) {
            Ok(receipt) => {
                tracing::debug!(
                    parent: &self.span,
                    group = %key,
                    record_id = %receipt.record_id,
                    version = receipt.version,
                    linked = receipt.linked_punches,
                    status = %status,
                    "分组已提交"
                );
                Ok(Attempt::Done(GroupOutcome::Updated {
                    key: key.clone(),
                    record_id: receipt.record_id,
                    status,
                    version: receipt.version,
                    created: expected_version.is_none(),
                }))
            }
            Err(err) if err.is_conflict() => Ok(Attempt::Conflict(err)),
            Err(err) => Err(err),
        }
    }

    fn same_as(record: &AttendanceRecord, derived: &DerivedRecord) -> bool {
        record.same_derivation(
            &derived.slots,
            &derived.hours,
            derived.status,
            derived.notes.as_deref(),
            derived.config_version,
        )
    }

    /// 冲突重试耗尽 → UNDER_REVIEW
    fn escalate(&self, key: &GroupKey, attempts: u32) -> GroupOutcome {
        let conflict = ReconcileError::ConcurrencyConflict {
            group: key.clone(),
            attempts,
        };
        tracing::warn!(parent: &self.span, group = %key, "{}", conflict);

        match self.store.escalate_to_review(key, &conflict.to_string()) {
            Ok(record) => GroupOutcome::Escalated {
                key: key.clone(),
                record_id: record.record_id,
                attempts,
            },
            Err(err) => self.failure(key, err),
        }
    }

    /// 失败分类: 不可用 → 停止后续提交; 忙/超时 → 可重试
    fn failure(&self, key: &GroupKey, err: RepositoryError) -> GroupOutcome {
        if err.is_unavailable() {
            self.halt.store(true, Ordering::SeqCst);
            if let Ok(mut reason) = self.halt_reason.lock() {
                reason.get_or_insert_with(|| err.to_string());
            }
            tracing::error!(parent: &self.span, group = %key, error = %err, "持久化不可用, 停止后续提交");
        } else {
            tracing::warn!(parent: &self.span, group = %key, error = %err, retryable = err.is_retryable(), "分组处理失败");
        }

        GroupOutcome::Failed {
            key: key.clone(),
            reason: err.to_string(),
            retryable: err.is_retryable() || err.is_unavailable(),
        }
    }

    fn halt_reason(&self) -> Option<String> {
        if !self.halt.load(Ordering::SeqCst) {
            return None;
        }
        let reason = self.halt_reason.lock().ok().and_then(|r| r.clone());
        Some(reason.unwrap_or_else(|| "持久化不可用".to_string()))
    }
}

// ==========================================
// ReconciliationCoordinator - 对账协调器
// ==========================================
pub struct ReconciliationCoordinator<C>
where
    C: ReconcileConfigReader,
{
    source: Arc<dyn PunchSource>,
    store: Arc<dyn AttendanceStore>,
    config_reader: Arc<C>,
    run_log: Option<Arc<dyn RunLogSink>>,
    span: Span,
}

impl<C> ReconciliationCoordinator<C>
where
    C: ReconcileConfigReader + 'static,
{
    /// 创建协调器
    ///
    /// # 参数
    /// - source: 打卡来源
    /// - store: 考勤记录存储
    /// - config_reader: 配置读取器 (每个批次加载一次)
    /// - span: 调用方注入的日志上下文
    pub fn new(
        source: Arc<dyn PunchSource>,
        store: Arc<dyn AttendanceStore>,
        config_reader: Arc<C>,
        span: Span,
    ) -> Self {
        Self {
            source,
            store,
            config_reader,
            run_log: None,
            span,
        }
    }

    /// 启用批次日志落库
    pub fn with_run_log(mut self, sink: Arc<dyn RunLogSink>) -> Self {
        self.run_log = Some(sink);
        self
    }

    /// 对账入口
    pub async fn reconcile(&self, request: ReconcileRequest) -> ReconcileResult<ReconcileReport> {
        self.reconcile_with_cancel(request, CancellationFlag::new()).await
    }

    /// 对账入口 (可取消)
    ///
    /// # 返回
    /// - Ok(report): 逐分组结果; 持久化中止时 report.aborted 有值
    /// - Err: 配置非法 / 请求非法 / 分组发现阶段失败 (批次未开始)
    pub async fn reconcile_with_cancel(
        &self,
        request: ReconcileRequest,
        cancel: CancellationFlag,
    ) -> ReconcileResult<ReconcileReport> {
        if request.date_from > request.date_to {
            return Err(ReconcileError::InvalidRequest(format!(
                "date_from {} 晚于 date_to {}",
                request.date_from, request.date_to
            )));
        }

        let started_at = Local::now().naive_local();
        let run_id = uuid::Uuid::new_v4().to_string();
        let span = tracing::info_span!(
            parent: &self.span,
            "reconcile",
            run_id = %run_id,
            mode = %request.mode
        );

        // 配置: 每个批次加载一次, 按值传递
        let config = self.config_reader.load_reconcile_config().await?;
        let snapshot = match self.config_reader.config_snapshot().await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                tracing::warn!(parent: &span, error = %e, "配置快照获取失败");
                None
            }
        };
        let worker_count = config.worker_count.max(1);
        let today = request.today.unwrap_or_else(|| Local::now().date_naive());

        let pipeline = GroupPipeline {
            source: self.source.clone(),
            store: self.store.clone(),
            config: Arc::new(config),
            today,
            halt: Arc::new(AtomicBool::new(false)),
            halt_reason: Arc::new(Mutex::new(None)),
            span: span.clone(),
        };

        tracing::info!(
            parent: &span,
            employee_id = ?request.employee_id,
            from = %request.date_from,
            to = %request.date_to,
            config_version = pipeline.config.config_version,
            worker_count,
            "对账批次开始"
        );

        let malformed = self.quarantine_orphans(&pipeline).await;
        let keys = self.discover_groups(&request, today).await?;

        let mut outcomes: Vec<GroupOutcome> = stream::iter(keys.into_iter().map(|key| {
            let pipeline = pipeline.clone();
            let cancel = cancel.clone();
            async move {
                if cancel.is_cancelled() {
                    return GroupOutcome::Skipped {
                        key,
                        reason: "批次已取消".to_string(),
                    };
                }
                if pipeline.halt.load(Ordering::SeqCst) {
                    return GroupOutcome::Skipped {
                        key,
                        reason: "持久化不可用, 批次已停止提交".to_string(),
                    };
                }

                let task_key = key.clone();
                match tokio::task::spawn_blocking(move || pipeline.run(&task_key)).await {
                    Ok(outcome) => outcome,
                    Err(e) => GroupOutcome::Failed {
                        key,
                        reason: ReconcileError::Worker(e.to_string()).to_string(),
                        retryable: true,
                    },
                }
            }
        }))
        .buffer_unordered(worker_count)
        .collect()
        .await;

        outcomes.sort_by(|a, b| a.key().cmp(b.key()));

        let report = ReconcileReport {
            run_id,
            mode: request.mode,
            config_version: pipeline.config.config_version,
            outcomes,
            malformed,
            aborted: pipeline.halt_reason(),
            cancelled: cancel.is_cancelled(),
            started_at,
            finished_at: Local::now().naive_local(),
        };

        let counts = report.counts();
        tracing::info!(
            parent: &span,
            updated = counts.updated,
            unchanged = counts.unchanged,
            escalated = counts.escalated,
            failed = counts.failed,
            skipped = counts.skipped,
            aborted = report.aborted.is_some(),
            cancelled = report.cancelled,
            "对账批次结束"
        );

        self.write_run_log(&request, &report, snapshot, &span).await;
        Ok(report)
    }

    /// 写入人工裁定
    ///
    /// COMPLETE 状态按裁定槽位重算工时; 其余状态工时为零
    pub async fn apply_manual_adjustment(
        &self,
        adjustment: ManualAdjustment,
    ) -> ReconcileResult<AttendanceRecord> {
        if adjustment.status == AttendanceStatus::Pending {
            return Err(ReconcileError::InvalidRequest(
                "人工裁定不能将记录置为 PENDING".to_string(),
            ));
        }

        let config = self.config_reader.load_reconcile_config().await?;
        let hours = if adjustment.status.carries_hours() {
            let slots = adjustment.slots;
            let ordered = matches!((slots.entry, slots.exit), (Some(entry), Some(exit)) if entry < exit)
                && match (slots.entry2, slots.exit2) {
                    (Some(entry2), Some(exit2)) => slots.exit < Some(entry2) && entry2 < exit2,
                    (None, None) => true,
                    _ => false,
                };
            if !ordered {
                return Err(ReconcileError::InvalidRequest(
                    "COMPLETE 裁定要求槽位完整且按时间顺序".to_string(),
                ));
            }
            HoursCalculator::new(&config).calculate(&slots)
        } else {
            HoursBreakdown::default()
        };

        let store = self.store.clone();
        let record = tokio::task::spawn_blocking(move || store.apply_manual_adjustment(&adjustment, &hours))
            .await
            .map_err(|e| ReconcileError::Worker(e.to_string()))??;

        tracing::info!(
            parent: &self.span,
            record_id = %record.record_id,
            status = %record.status,
            modified_by = ?record.modified_by,
            "人工裁定已写入"
        );
        Ok(record)
    }

    /// 解除复核并立即重新推导该分组
    pub async fn release_review(
        &self,
        record_id: &str,
        expected_version: i32,
        actor: &str,
        today: Option<NaiveDate>,
    ) -> ReconcileResult<GroupOutcome> {
        let config = self.config_reader.load_reconcile_config().await?;

        let store = self.store.clone();
        let (record_id_owned, actor_owned) = (record_id.to_string(), actor.to_string());
        let released = tokio::task::spawn_blocking(move || {
            store.release_review(&record_id_owned, expected_version, &actor_owned)
        })
        .await
        .map_err(|e| ReconcileError::Worker(e.to_string()))??;

        let key = GroupKey::new(&released.employee_id, released.work_date);
        let pipeline = GroupPipeline {
            source: self.source.clone(),
            store: self.store.clone(),
            config: Arc::new(config),
            today: today.unwrap_or_else(|| Local::now().date_naive()),
            halt: Arc::new(AtomicBool::new(false)),
            halt_reason: Arc::new(Mutex::new(None)),
            span: self.span.clone(),
        };

        let outcome = tokio::task::spawn_blocking(move || pipeline.run(&key))
            .await
            .map_err(|e| ReconcileError::Worker(e.to_string()))?;

        tracing::info!(parent: &self.span, record_id, outcome = ?outcome, "复核已解除");
        Ok(outcome)
    }

    // ===== 内部辅助 =====

    /// 隔离无法归组的畸形打卡
    async fn quarantine_orphans(&self, pipeline: &GroupPipeline) -> Vec<MalformedPunch> {
        let source = self.source.clone();
        let result = tokio::task::spawn_blocking(move || {
            let orphans = source.find_orphans()?;
            let ids: Vec<String> = orphans.iter().map(|m| m.punch_id.clone()).collect();
            source.quarantine(&ids)?;
            Ok::<_, RepositoryError>(orphans)
        })
        .await;

        match result {
            Ok(Ok(orphans)) => {
                for orphan in &orphans {
                    tracing::warn!(
                        parent: &pipeline.span,
                        punch_id = %orphan.punch_id,
                        reason = %orphan.reason,
                        "畸形打卡已隔离"
                    );
                }
                orphans
            }
            Ok(Err(err)) => {
                tracing::warn!(parent: &pipeline.span, error = %err, "畸形打卡隔离失败");
                if err.is_unavailable() {
                    pipeline.halt.store(true, Ordering::SeqCst);
                    if let Ok(mut reason) = pipeline.halt_reason.lock() {
                        reason.get_or_insert_with(|| err.to_string());
                    }
                }
                Vec::new()
            }
            Err(e) => {
                tracing::warn!(parent: &pipeline.span, error = %e, "畸形打卡隔离任务异常");
                Vec::new()
            }
        }
    }

    /// 发现待处理分组
    ///
    /// - INCREMENTAL: 含未处理有效打卡的分组 + 已过当日仍为 PENDING 的分组
    /// - FULL: 区间内有打卡的全部分组; 指定员工时, 已过去且无任何打卡的日期也作为分组 (推导为 ABSENT)
    async fn discover_groups(
        &self,
        request: &ReconcileRequest,
        today: NaiveDate,
    ) -> ReconcileResult<Vec<GroupKey>> {
        let source = self.source.clone();
        let store = self.store.clone();
        let request = request.clone();

        let keys = tokio::task::spawn_blocking(move || -> Result<Vec<GroupKey>, RepositoryError> {
            let employee = request.employee_id.as_deref();
            let mut keys: BTreeSet<GroupKey> = BTreeSet::new();
            match request.mode {
                ReconcileMode::Incremental => {
                    keys.extend(source.find_pending_groups(employee, request.date_from, request.date_to)?);
                    keys.extend(store.find_stale_pending(
                        employee,
                        request.date_from,
                        request.date_to,
                        today,
                    )?);
                }
                ReconcileMode::Full => {
                    keys.extend(source.find_groups_in_range(employee, request.date_from, request.date_to)?);
                }
            }

            if let (ReconcileMode::Full, Some(employee)) = (request.mode, employee) {
                for date in request
                    .date_from
                    .iter_days()
                    .take_while(|d| *d <= request.date_to && *d < today)
                {
                    keys.insert(GroupKey::new(employee, date));
                }
            }

            Ok(keys.into_iter().collect())
        })
        .await
        .map_err(|e| ReconcileError::Worker(e.to_string()))?;

        keys.map_err(|err| {
            if err.is_unavailable() {
                ReconcileError::PersistenceUnavailable(err.to_string())
            } else {
                ReconcileError::Repository(err)
            }
        })
    }

    async fn write_run_log(
        &self,
        request: &ReconcileRequest,
        report: &ReconcileReport,
        snapshot: Option<serde_json::Value>,
        span: &Span,
    ) {
        let Some(sink) = self.run_log.clone() else {
            return;
        };

        let counts = report.counts();
        let log = ReconcileRunLog {
            run_id: report.run_id.clone(),
            actor: request.actor.clone(),
            mode: report.mode.to_string(),
            employee_id: request.employee_id.clone(),
            date_from: request.date_from,
            date_to: request.date_to,
            config_version: report.config_version,
            updated_count: counts.updated,
            unchanged_count: counts.unchanged,
            escalated_count: counts.escalated,
            failed_count: counts.failed,
            skipped_count: counts.skipped,
            aborted_reason: report.aborted.clone(),
            config_snapshot_json: snapshot,
            started_at: report.started_at,
            finished_at: report.finished_at,
        };

        match tokio::task::spawn_blocking(move || sink.record_run(&log)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(parent: span, error = %e, "批次日志写入失败"),
            Err(e) => tracing::warn!(parent: span, error = %e, "批次日志任务异常"),
        }
    }
}
