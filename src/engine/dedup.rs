// ==========================================
// 考勤对账引擎 - 重复打卡去重
// ==========================================
// 输入: 单个分组 (员工, 日期) 的全部已解码打卡
// 输出: 有效打卡 (按时间合并排序) + 重复打卡标记
// 红线: 簇内保留最早一次, 同时刻按 punch_id 决胜, 绝不"后者覆盖"
// 红线: 重复打卡只打标记, 不删除
// ==========================================

use crate::domain::punch::PunchEvent;
use crate::domain::types::MovementKind;
use std::collections::BTreeMap;
use tracing::Span;

/// 被判定为重复的打卡
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicatePunch {
    pub punch_id: String,
    pub kept_punch_id: String, // 吸收该重复的保留打卡
    pub delta_secs: i64,
}

/// 去重结果
#[derive(Debug, Clone, Default)]
pub struct DedupOutcome {
    pub effective: Vec<PunchEvent>,
    pub duplicates: Vec<DuplicatePunch>,
}

impl DedupOutcome {
    pub fn is_duplicate(&self, punch_id: &str) -> bool {
        self.duplicates.iter().any(|d| d.punch_id == punch_id)
    }
}

// ==========================================
// PunchDeduplicator - 重复打卡去重器
// ==========================================
pub struct PunchDeduplicator {
    threshold_secs: i64,
    span: Span,
}

impl PunchDeduplicator {
    /// # 参数
    /// - threshold_secs: 与上一次保留打卡间隔小于该值即视为重复
    /// - span: 调用方注入的日志上下文
    pub fn new(threshold_secs: i64, span: Span) -> Self {
        Self { threshold_secs, span }
    }

    /// 去重
    ///
    /// 按 (设备, 动作类型) 分簇, 簇内按时间升序单次扫描;
    /// 不同设备或不同动作之间互不去重
    pub fn deduplicate(&self, punches: &[PunchEvent]) -> DedupOutcome {
        let mut clusters: BTreeMap<(&str, MovementKind), Vec<&PunchEvent>> = BTreeMap::new();
        for punch in punches.iter().filter(|p| !p.is_deleted()) {
            clusters
                .entry((punch.device_id.as_str(), punch.movement))
                .or_default()
                .push(punch);
        }

        let mut outcome = DedupOutcome::default();

        for ((device_id, movement), mut cluster) in clusters {
            cluster.sort_by(|a, b| {
                a.punch_time
                    .cmp(&b.punch_time)
                    .then_with(|| a.punch_id.cmp(&b.punch_id))
            });

            let mut last_kept: Option<&PunchEvent> = None;
            for punch in cluster {
                match last_kept {
                    Some(kept) if punch.seconds_of_day() - kept.seconds_of_day() < self.threshold_secs => {
                        let delta_secs = punch.seconds_of_day() - kept.seconds_of_day();
                        tracing::debug!(
                            parent: &self.span,
                            punch_id = %punch.punch_id,
                            kept = %kept.punch_id,
                            device_id,
                            movement = %movement,
                            delta_secs,
                            "重复打卡"
                        );
                        outcome.duplicates.push(DuplicatePunch {
                            punch_id: punch.punch_id.clone(),
                            kept_punch_id: kept.punch_id.clone(),
                            delta_secs,
                        });
                    }
                    _ => {
                        outcome.effective.push(punch.clone());
                        last_kept = Some(punch);
                    }
                }
            }
        }

        outcome.effective.sort_by(|a, b| {
            a.punch_time
                .cmp(&b.punch_time)
                .then_with(|| a.punch_id.cmp(&b.punch_id))
        });

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::VerificationKind;
    use chrono::{NaiveDate, NaiveTime};

    fn punch(id: &str, device: &str, hms: (u32, u32, u32), movement: MovementKind) -> PunchEvent {
        PunchEvent {
            punch_id: id.to_string(),
            employee_id: "E1".to_string(),
            device_id: device.to_string(),
            punch_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            punch_time: NaiveTime::from_hms_opt(hms.0, hms.1, hms.2).unwrap(),
            movement,
            verification: VerificationKind::Fingerprint,
            confidence: None,
            failed_attempts: 0,
            processed: false,
            effective: true,
            attendance_record_id: None,
            deleted_at: None,
        }
    }

    fn dedup(threshold: i64, punches: &[PunchEvent]) -> DedupOutcome {
        PunchDeduplicator::new(threshold, Span::none()).deduplicate(punches)
    }

    #[test]
    fn test_earliest_punch_in_cluster_is_kept() {
        let punches = vec![
            punch("P2", "D1", (8, 0, 30), MovementKind::Entry),
            punch("P1", "D1", (8, 0, 0), MovementKind::Entry),
        ];

        let outcome = dedup(60, &punches);
        assert_eq!(outcome.effective.len(), 1);
        assert_eq!(outcome.effective[0].punch_id, "P1");
        assert_eq!(
            outcome.duplicates,
            vec![DuplicatePunch {
                punch_id: "P2".to_string(),
                kept_punch_id: "P1".to_string(),
                delta_secs: 30,
            }]
        );
    }

    #[test]
    fn test_delta_is_measured_from_last_kept_punch() {
        // 08:00:00 保留, 08:00:50 重复, 08:01:10 与保留打卡相差 70s → 保留
        let punches = vec![
            punch("P1", "D1", (8, 0, 0), MovementKind::Entry),
            punch("P2", "D1", (8, 0, 50), MovementKind::Entry),
            punch("P3", "D1", (8, 1, 10), MovementKind::Entry),
        ];

        let outcome = dedup(60, &punches);
        let kept: Vec<&str> = outcome.effective.iter().map(|p| p.punch_id.as_str()).collect();
        assert_eq!(kept, vec!["P1", "P3"]);
        assert!(outcome.is_duplicate("P2"));
    }

    #[test]
    fn test_threshold_boundary_is_exclusive() {
        let punches = vec![
            punch("P1", "D1", (8, 0, 0), MovementKind::Entry),
            punch("P2", "D1", (8, 1, 0), MovementKind::Entry),
        ];
        assert_eq!(dedup(60, &punches).effective.len(), 2);
    }

    #[test]
    fn test_different_devices_and_movements_do_not_collapse() {
        let punches = vec![
            punch("P1", "D1", (8, 0, 0), MovementKind::Entry),
            punch("P2", "D2", (8, 0, 5), MovementKind::Entry),
            punch("P3", "D1", (8, 0, 10), MovementKind::Exit),
        ];
        let outcome = dedup(60, &punches);
        assert_eq!(outcome.effective.len(), 3);
        assert!(outcome.duplicates.is_empty());
    }

    #[test]
    fn test_same_instant_tie_breaks_on_punch_id() {
        let punches = vec![
            punch("P9", "D1", (8, 0, 0), MovementKind::Entry),
            punch("P3", "D1", (8, 0, 0), MovementKind::Entry),
        ];
        let outcome = dedup(60, &punches);
        assert_eq!(outcome.effective[0].punch_id, "P3");
    }
}
