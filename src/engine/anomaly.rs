// ==========================================
// 考勤对账引擎 - 异常判定
// ==========================================
// 输入: 配对结果 + 日期 + 既有记录
// 输出: 考勤状态 + 原因 (写入 notes)
// 红线: 无法判定的日子输出 INCONSISTENT / UNDER_REVIEW, 不臆造工时
// 红线: 当日尚可补卡时为 PENDING, 不得判为 ABSENT / INCONSISTENT
// ==========================================

use crate::domain::attendance::{AttendanceRecord, DaySlots};
use crate::domain::types::AttendanceStatus;
use crate::engine::pairing::PairingOutcome;
use chrono::NaiveDate;
use tracing::Span;

/// 判定结论
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnomalyVerdict {
    pub status: AttendanceStatus,
    pub reasons: Vec<String>,
    /// 既有记录处于人工裁定 / 复核中, 推导结果不得覆盖
    pub sticky: bool,
}

impl AnomalyVerdict {
    fn new(status: AttendanceStatus, reasons: Vec<String>) -> Self {
        Self { status, reasons, sticky: false }
    }

    /// 原因合并为备注
    pub fn notes(&self) -> Option<String> {
        if self.reasons.is_empty() {
            None
        } else {
            Some(self.reasons.join("; "))
        }
    }
}

// ==========================================
// AnomalyDetector - 异常判定器
// ==========================================
pub struct AnomalyDetector {
    today: NaiveDate,
    span: Span,
}

impl AnomalyDetector {
    /// # 参数
    /// - today: 批次的"当日" (决定 PENDING 与缺卡判定)
    /// - span: 调用方注入的日志上下文
    pub fn new(today: NaiveDate, span: Span) -> Self {
        Self { today, span }
    }

    /// 判定单日状态
    ///
    /// # 参数
    /// - work_date: 分组日期
    /// - effective_count: 去重后的有效打卡数
    /// - pairing: 配对结果
    /// - existing: 既有未删除记录
    pub fn assess(
        &self,
        work_date: NaiveDate,
        effective_count: usize,
        pairing: &PairingOutcome,
        existing: Option<&AttendanceRecord>,
    ) -> AnomalyVerdict {
        if let Some(record) = existing {
            if record.manual_override || record.status == AttendanceStatus::UnderReview {
                return AnomalyVerdict {
                    status: record.status,
                    reasons: Vec::new(),
                    sticky: true,
                };
            }
        }

        let still_open = work_date >= self.today;

        if effective_count == 0 {
            return if still_open {
                AnomalyVerdict::new(AttendanceStatus::Pending, Vec::new())
            } else {
                AnomalyVerdict::new(AttendanceStatus::Absent, vec!["无有效打卡".to_string()])
            };
        }

        let mut reasons: Vec<String> = pairing
            .unassignable
            .iter()
            .map(|u| format!("{} {} {}: {}", u.punch_id, u.movement, u.punch_time, u.reason))
            .collect();
        reasons.extend(Self::order_violations(&pairing.slots));

        let mut awaiting_exit = false;
        for (opened, closed, label) in [
            (pairing.slots.entry, pairing.slots.exit, "缺少出卡"),
            (pairing.slots.entry2, pairing.slots.exit2, "缺少第二次出卡"),
        ] {
            if opened.is_some() && closed.is_none() {
                if still_open {
                    awaiting_exit = true;
                } else {
                    reasons.push(label.to_string());
                }
            }
        }

        let status = if !reasons.is_empty() {
            AttendanceStatus::Inconsistent
        } else if awaiting_exit {
            AttendanceStatus::Pending
        } else {
            AttendanceStatus::Complete
        };

        if status == AttendanceStatus::Inconsistent {
            tracing::debug!(parent: &self.span, %work_date, reasons = ?reasons, "判定为不一致");
        }

        AnomalyVerdict::new(status, reasons)
    }

    /// 槽位时间顺序检查
    fn order_violations(slots: &DaySlots) -> Vec<String> {
        let mut violations = Vec::new();
        if let (Some(entry), Some(exit)) = (slots.entry, slots.exit) {
            if entry >= exit {
                violations.push(format!("进卡 {} 不早于出卡 {}", entry, exit));
            }
        }
        if let (Some(entry2), Some(exit2)) = (slots.entry2, slots.exit2) {
            if entry2 >= exit2 {
                violations.push(format!("第二次进卡 {} 不早于第二次出卡 {}", entry2, exit2));
            }
        }
        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::attendance::HoursBreakdown;
    use crate::domain::types::MovementKind;
    use crate::engine::pairing::UnassignablePunch;
    use chrono::NaiveTime;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    fn t(h: u32) -> Option<NaiveTime> {
        NaiveTime::from_hms_opt(h, 0, 0)
    }

    fn detector() -> AnomalyDetector {
        AnomalyDetector::new(d(10), Span::none())
    }

    fn pairing(slots: DaySlots) -> PairingOutcome {
        PairingOutcome { slots, unassignable: Vec::new() }
    }

    fn record(status: AttendanceStatus, manual_override: bool) -> AttendanceRecord {
        let ts = d(9).and_hms_opt(18, 0, 0).unwrap();
        AttendanceRecord {
            record_id: "R1".to_string(),
            employee_id: "E1".to_string(),
            work_date: d(9),
            slots: DaySlots::default(),
            hours: HoursBreakdown::default(),
            status,
            manual_override,
            notes: None,
            modified_by: None,
            modified_at: None,
            config_version: Some(1),
            version: 1,
            created_at: ts,
            updated_at: ts,
            deleted_at: None,
        }
    }

    #[test]
    fn test_no_punches_is_absent_only_for_past_days() {
        let empty = PairingOutcome::default();
        assert_eq!(detector().assess(d(9), 0, &empty, None).status, AttendanceStatus::Absent);
        assert_eq!(detector().assess(d(10), 0, &empty, None).status, AttendanceStatus::Pending);
    }

    #[test]
    fn test_missing_exit_depends_on_day() {
        let slots = DaySlots { entry: t(8), ..DaySlots::default() };

        let past = detector().assess(d(9), 1, &pairing(slots), None);
        assert_eq!(past.status, AttendanceStatus::Inconsistent);
        assert_eq!(past.notes().as_deref(), Some("缺少出卡"));

        let today = detector().assess(d(10), 1, &pairing(slots), None);
        assert_eq!(today.status, AttendanceStatus::Pending);
        assert_eq!(today.notes(), None);
    }

    #[test]
    fn test_unassignable_punch_is_inconsistent() {
        let mut outcome = pairing(DaySlots { entry: t(8), exit: t(17), ..DaySlots::default() });
        outcome.unassignable.push(UnassignablePunch {
            punch_id: "P2".to_string(),
            punch_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            movement: MovementKind::Entry,
            reason: "连续两次进卡, 中间缺少出卡".to_string(),
        });

        let verdict = detector().assess(d(10), 3, &outcome, None);
        assert_eq!(verdict.status, AttendanceStatus::Inconsistent);
        assert!(verdict.reasons[0].starts_with("P2"));
    }

    #[test]
    fn test_ordered_slots_are_complete() {
        let slots = DaySlots { entry: t(8), exit: t(12), entry2: t(13), exit2: t(17) };
        let verdict = detector().assess(d(9), 4, &pairing(slots), None);
        assert_eq!(verdict.status, AttendanceStatus::Complete);
        assert!(!verdict.sticky);
    }

    #[test]
    fn test_reversed_slots_are_inconsistent() {
        let slots = DaySlots { entry: t(17), exit: t(8), ..DaySlots::default() };
        let verdict = detector().assess(d(9), 2, &pairing(slots), None);
        assert_eq!(verdict.status, AttendanceStatus::Inconsistent);
    }

    #[test]
    fn test_review_and_manual_records_are_sticky() {
        let slots = DaySlots { entry: t(8), exit: t(17), ..DaySlots::default() };

        let review = record(AttendanceStatus::UnderReview, false);
        let verdict = detector().assess(d(9), 2, &pairing(slots), Some(&review));
        assert!(verdict.sticky);
        assert_eq!(verdict.status, AttendanceStatus::UnderReview);

        let manual = record(AttendanceStatus::Complete, true);
        let verdict = detector().assess(d(9), 0, &PairingOutcome::default(), Some(&manual));
        assert!(verdict.sticky);
        assert_eq!(verdict.status, AttendanceStatus::Complete);
    }
}
